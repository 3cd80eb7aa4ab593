//! Wire envelopes
//!
//! Outbound hub call:
//! ```text
//! {"I":"0","H":"chat","M":"send","A":["hello"],"S":{...}}
//! ```
//!
//! Inbound frames come in two shapes, told apart by the `I` field alone:
//! ```text
//! {"I":"0","R":...,"E":...,"H":true,"T":"stack","D":...,"S":{...}}   correlated reply
//! {"C":"d-1","S":1,"D":1,"T":1,"G":"tok","L":0,"M":[push, push]}     multiplexed pushes
//! ```

use crate::traits::{HubSocketError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Round-tripped hub state blob
pub type HubState = Map<String, Value>;

/// Client → server hub method call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubRequest {
    #[serde(rename = "I")]
    pub id: String,
    #[serde(rename = "H")]
    pub hub: String,
    #[serde(rename = "M")]
    pub method: String,
    #[serde(rename = "A", default)]
    pub args: Vec<Value>,
    #[serde(rename = "S", default, skip_serializing_if = "Option::is_none")]
    pub state: Option<HubState>,
}

/// Server reply to a [`HubRequest`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HubResponse {
    #[serde(rename = "I", deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(rename = "R", default)]
    pub result: Option<Value>,
    #[serde(rename = "E", default)]
    pub error: Option<String>,
    #[serde(rename = "H", default)]
    pub is_hub_exception: Option<bool>,
    #[serde(rename = "T", default)]
    pub stack_trace: Option<String>,
    #[serde(rename = "D", default)]
    pub error_data: Option<Value>,
    #[serde(rename = "S", default)]
    pub state: Option<HubState>,
}

impl HubResponse {
    /// Remote failure carried by this reply, if any
    pub fn failure(&self) -> Option<HubSocketError> {
        self.error.as_ref().map(|message| HubSocketError::HubInvocation {
            message: message.clone(),
            data: self.error_data.clone(),
            stack_trace: self.stack_trace.clone(),
            is_hub_exception: self.is_hub_exception.unwrap_or(false),
        })
    }
}

/// Server push envelope carrying uncorrelated messages
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct MultiplexedMessage {
    #[serde(rename = "C", default)]
    pub message_id: Option<String>,
    #[serde(rename = "S", default, deserialize_with = "flag")]
    pub initialized: bool,
    #[serde(rename = "D", default, deserialize_with = "flag")]
    pub disconnect: bool,
    #[serde(rename = "T", default, deserialize_with = "flag")]
    pub reconnect: bool,
    #[serde(rename = "G", default)]
    pub groups_token: Option<String>,
    #[serde(rename = "L", default)]
    pub long_poll_delay: Option<u64>,
    #[serde(rename = "M", default)]
    pub messages: Vec<Value>,
}

/// Server → client hub method call, found inside `M`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HubInvocation {
    #[serde(rename = "H")]
    pub hub: String,
    #[serde(rename = "M")]
    pub method: String,
    #[serde(rename = "A", default)]
    pub args: Vec<Value>,
    #[serde(rename = "S", default)]
    pub state: Option<HubState>,
}

/// Result of applying the demultiplexing rule to one inbound tree
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Reply(HubResponse),
    Multiplexed(MultiplexedMessage),
}

/// A present, non-null `I` field marks a correlated reply
pub fn has_correlation_id(value: &Value) -> bool {
    value.get("I").map_or(false, |id| !id.is_null())
}

/// The `I` field as a correlation id, read the same way replies are
///
/// Useful when the rest of a reply is malformed but its call can still be found.
pub fn correlation_id(value: &Value) -> Option<String> {
    value
        .get("I")
        .filter(|id| !id.is_null())
        .and_then(|id| id_as_string(id).ok())
}

/// Empty object frames are keep-alives
pub fn is_keep_alive(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty())
}

/// Classify an inbound tree as a correlated reply or a multiplexed envelope
pub fn demultiplex(value: &Value) -> Result<Inbound> {
    if !value.is_object() {
        return Err(HubSocketError::Serialization(format!(
            "inbound frame is not an object: {}",
            value
        )));
    }
    if has_correlation_id(value) {
        let reply = HubResponse::deserialize(value)
            .map_err(|e| HubSocketError::Serialization(format!("malformed reply: {}", e)))?;
        return Ok(Inbound::Reply(reply));
    }
    let envelope = MultiplexedMessage::deserialize(value)
        .map_err(|e| HubSocketError::Serialization(format!("malformed envelope: {}", e)))?;
    Ok(Inbound::Multiplexed(envelope))
}

fn id_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "correlation id must be a string or number, got {}",
            other
        ))),
    }
}

fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    })
}
