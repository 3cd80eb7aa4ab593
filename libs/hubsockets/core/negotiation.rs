//! Negotiate response and derived transport options

use crate::traits::{HubSocketError, Result};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Timeout value the server uses for "not set"
pub const UNSET_TIMEOUT: f64 = -1.0;

/// Body of `GET negotiate`
///
/// Timeouts are seconds as sent by the server; `-1` (or `null`/absent) means unset.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NegotiationResponse {
    #[serde(default)]
    pub url: String,
    pub connection_token: String,
    pub connection_id: String,
    pub protocol_version: String,
    #[serde(default)]
    pub try_web_sockets: bool,
    #[serde(default = "unset", deserialize_with = "seconds_or_unset")]
    pub keep_alive_timeout: f64,
    #[serde(default = "unset", deserialize_with = "seconds_or_unset")]
    pub disconnect_timeout: f64,
    #[serde(default = "unset", deserialize_with = "seconds_or_unset")]
    pub transport_connect_timeout: f64,
}

/// Millisecond view of the negotiated timeouts
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransportOptions {
    pub keep_alive_timeout: Option<Duration>,
    pub disconnect_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub try_websockets: bool,
}

impl NegotiationResponse {
    /// Fail with `ProtocolMismatch` unless the server speaks exactly `expected`
    pub fn verify_protocol(&self, expected: &str) -> Result<()> {
        if self.protocol_version != expected {
            return Err(HubSocketError::ProtocolMismatch {
                expected: expected.to_string(),
                actual: self.protocol_version.clone(),
            });
        }
        Ok(())
    }

    pub fn keep_alive_timeout_ms(&self) -> Option<u64> {
        to_duration(self.keep_alive_timeout).map(|d| d.as_millis() as u64)
    }

    pub fn disconnect_timeout_ms(&self) -> Option<u64> {
        to_duration(self.disconnect_timeout).map(|d| d.as_millis() as u64)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            keep_alive_timeout: to_duration(self.keep_alive_timeout),
            disconnect_timeout: to_duration(self.disconnect_timeout),
            connect_timeout: to_duration(self.transport_connect_timeout),
            try_websockets: self.try_web_sockets,
        }
    }
}

impl TransportOptions {
    /// Keep-alive timeout if the server enabled keep-alives
    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive_timeout.filter(|t| !t.is_zero())
    }
}

fn unset() -> f64 {
    UNSET_TIMEOUT
}

fn seconds_or_unset<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(UNSET_TIMEOUT))
}

fn to_duration(seconds: f64) -> Option<Duration> {
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_millis((seconds * 1000.0).round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "Url": "/signalr",
        "ConnectionToken": "abc+/=",
        "ConnectionId": "6f1c",
        "KeepAliveTimeout": 20.0,
        "DisconnectTimeout": 30.0,
        "ConnectionTimeout": 110.0,
        "TryWebSockets": true,
        "ProtocolVersion": "1.3",
        "TransportConnectTimeout": 5.0,
        "LongPollDelay": 0.0
    }"#;

    #[test]
    fn test_parse_negotiate_body() {
        let response: NegotiationResponse = serde_json::from_str(BODY).unwrap();

        assert_eq!(response.connection_token, "abc+/=");
        assert_eq!(response.connection_id, "6f1c");
        assert!(response.try_web_sockets);
        assert_eq!(response.keep_alive_timeout_ms(), Some(20_000));
        assert_eq!(response.disconnect_timeout_ms(), Some(30_000));
        assert_eq!(
            response.transport_options().connect_timeout,
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_null_keep_alive_is_unset() {
        let body = r#"{"ConnectionToken":"t","ConnectionId":"i","ProtocolVersion":"1.3","KeepAliveTimeout":null}"#;
        let response: NegotiationResponse = serde_json::from_str(body).unwrap();

        assert_eq!(response.keep_alive_timeout, UNSET_TIMEOUT);
        assert_eq!(response.keep_alive_timeout_ms(), None);
        assert_eq!(response.transport_options().keep_alive(), None);
    }

    #[test]
    fn test_protocol_mismatch() {
        let mut response: NegotiationResponse = serde_json::from_str(BODY).unwrap();
        assert!(response.verify_protocol("1.3").is_ok());

        response.protocol_version = "9.9".into();
        match response.verify_protocol("1.3") {
            Err(HubSocketError::ProtocolMismatch { expected, actual }) => {
                assert_eq!(expected, "1.3");
                assert_eq!(actual, "9.9");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
