//! Server ping job
//!
//! Independent of the keep-alive monitor: every [`DEFAULT_PING_INTERVAL`] the
//! engine calls `GET ping` and expects `{"Response":"pong"}`. Anything else is
//! reported to listeners as a non-fatal error; it never tears the connection down.

use crate::traits::{Encoder, HubSocketError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Wall-clock interval between pings
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(300);

/// Body of `GET ping`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PingResponse {
    pub response: String,
}

/// Accept the ping body only if it says "pong" (any case)
pub fn verify_pong(encoder: &dyn Encoder, body: &str) -> Result<()> {
    let pong: PingResponse = encoder
        .decode_as(body)
        .map_err(|e| HubSocketError::Ping(format!("unreadable ping response: {}", e)))?;

    if pong.response.eq_ignore_ascii_case("pong") {
        Ok(())
    } else {
        Err(HubSocketError::Ping(format!(
            "expected \"pong\", server answered {:?}",
            pong.response
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::JsonEncoder;

    #[test]
    fn test_pong_any_case() {
        assert!(verify_pong(&JsonEncoder, r#"{"Response":"pong"}"#).is_ok());
        assert!(verify_pong(&JsonEncoder, r#"{"Response":"PONG"}"#).is_ok());
    }

    #[test]
    fn test_wrong_answer_is_ping_error() {
        let err = verify_pong(&JsonEncoder, r#"{"Response":"wrong"}"#).unwrap_err();
        assert!(matches!(err, HubSocketError::Ping(_)));
        assert!(err.to_string().contains("wrong"));
    }

    #[test]
    fn test_garbage_is_ping_error() {
        let err = verify_pong(&JsonEncoder, "not json").unwrap_err();
        assert!(matches!(err, HubSocketError::Ping(_)));
    }
}
