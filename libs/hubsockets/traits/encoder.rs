use crate::traits::error::{HubSocketError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Text codec for envelopes and endpoint responses
///
/// The engine only ever sees JSON trees; typed shapes are decoded from the
/// tree with `decode_as`.
pub trait Encoder: Send + Sync {
    /// Serialize a JSON tree to wire text
    fn encode(&self, value: &Value) -> Result<String>;

    /// Parse wire text into a JSON tree
    fn decode(&self, text: &str) -> Result<Value>;
}

impl<'a> dyn Encoder + 'a {
    /// Decode wire text into a caller-chosen shape
    pub fn decode_as<T: DeserializeOwned>(&self, text: &str) -> Result<T> {
        let tree = self.decode(text)?;
        serde_json::from_value(tree).map_err(|e| {
            HubSocketError::Serialization(format!("unexpected message shape: {}", e))
        })
    }

    /// Encode any serializable value
    pub fn encode_as<T: Serialize>(&self, value: &T) -> Result<String> {
        let tree = serde_json::to_value(value)?;
        self.encode(&tree)
    }
}

/// Default [`Encoder`] backed by `serde_json`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, value: &Value) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn decode(&self, text: &str) -> Result<Value> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pong {
        #[serde(rename = "Response")]
        response: String,
    }

    #[test]
    fn test_decode_as_typed_shape() {
        let encoder: &dyn Encoder = &JsonEncoder;
        let pong: Pong = encoder.decode_as(r#"{"Response":"pong"}"#).unwrap();
        assert_eq!(pong.response, "pong");
    }

    #[test]
    fn test_decode_as_wrong_shape() {
        let encoder: &dyn Encoder = &JsonEncoder;
        let result: Result<Pong> = encoder.decode_as(r#"{"Other":1}"#);
        assert!(matches!(result, Err(HubSocketError::Serialization(_))));
    }

    #[test]
    fn test_encode_keeps_field_order() {
        let encoder = JsonEncoder;
        let text = encoder.encode(&json!({"I": "0", "H": "chat"})).unwrap();
        assert_eq!(text, r#"{"I":"0","H":"chat"}"#);
    }
}
