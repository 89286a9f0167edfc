//! Lenient decoding of the backend's response envelope
//!
//! The backend wraps most payloads as `{ success?, data?, message? }` but is
//! not consistent about it. Accepted shapes:
//!
//! - `{"success": true, ...}` is a success, `{"success": false, ...}` a failure
//! - no `success` but a `data` field is a success carrying `data`
//! - no `success` and no `data` but a `detail` field (framework error body) is a failure
//! - any other object is a success whose payload is the whole object
//! - a non-object body (array, string, number) is a success carrying that value
//! - `null` is a success with no payload

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Decoded response envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Success {
        data: Option<Value>,
        message: Option<String>,
    },
    Failure {
        message: String,
        data: Option<Value>,
    },
}

impl Envelope {
    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Envelope::Success { message, .. } => message.as_deref(),
            Envelope::Failure { message, .. } => Some(message),
        }
    }

    /// Payload of a success, or `Error::Rejected` for a failure
    pub fn into_data(self) -> Result<Option<Value>> {
        match self {
            Envelope::Success { data, .. } => Ok(data),
            Envelope::Failure { message, .. } => Err(Error::Rejected(message)),
        }
    }

    /// Decode the payload of a success into `T`, treating a missing payload as `null`
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T> {
        let data = self.into_data()?.unwrap_or(Value::Null);
        serde_json::from_value(data)
            .map_err(|e| Error::Envelope(format!("unexpected payload shape: {}", e)))
    }
}

fn text_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn present(map: &Map<String, Value>, key: &str) -> Option<Value> {
    map.get(key).filter(|v| !v.is_null()).cloned()
}

/// Decode any JSON body into an [`Envelope`]; never fails
pub fn decode_value(body: Value) -> Envelope {
    let map = match body {
        Value::Object(map) => map,
        Value::Null => {
            return Envelope::Success {
                data: None,
                message: None,
            }
        }
        other => {
            return Envelope::Success {
                data: Some(other),
                message: None,
            }
        }
    };

    let message = text_field(&map, "message");

    match map.get("success") {
        Some(Value::Bool(true)) => Envelope::Success {
            data: present(&map, "data"),
            message,
        },
        Some(Value::Bool(false)) => Envelope::Failure {
            message: message
                .or_else(|| text_field(&map, "detail"))
                .or_else(|| text_field(&map, "error"))
                .unwrap_or_else(|| "request failed".to_string()),
            data: present(&map, "data"),
        },
        _ => {
            if map.contains_key("data") {
                Envelope::Success {
                    data: present(&map, "data"),
                    message,
                }
            } else if let Some(detail) = text_field(&map, "detail") {
                Envelope::Failure {
                    message: detail,
                    data: None,
                }
            } else {
                Envelope::Success {
                    data: Some(Value::Object(map)),
                    message,
                }
            }
        }
    }
}

/// Decode raw response bytes; an empty or non-JSON body is a success with no payload
pub fn decode_bytes(bytes: &[u8]) -> Envelope {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return decode_value(Value::Null);
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => decode_value(value),
        Err(_) => Envelope::Success {
            data: Some(Value::String(String::from_utf8_lossy(bytes).into_owned())),
            message: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_explicit_success_flag() {
        let env = decode_value(json!({"success": true, "data": {"n": 1}, "message": "ok"}));
        assert_eq!(
            env,
            Envelope::Success {
                data: Some(json!({"n": 1})),
                message: Some("ok".to_string())
            }
        );

        let env = decode_value(json!({"success": false, "message": "Credenciales incorrectas"}));
        assert!(!env.is_success());
        assert_eq!(env.message(), Some("Credenciales incorrectas"));
    }

    #[test]
    fn test_data_without_flag_is_success() {
        let env = decode_value(json!({"data": [1, 2]}));
        assert_eq!(env.into_data().unwrap(), Some(json!([1, 2])));
    }

    #[test]
    fn test_detail_without_flag_is_failure() {
        let env = decode_value(json!({"detail": "Not authenticated"}));
        match env.into_data() {
            Err(Error::Rejected(msg)) => assert_eq!(msg, "Not authenticated"),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_object_is_its_own_payload() {
        let env = decode_value(json!({"status": "healthy"}));
        assert_eq!(env.into_data().unwrap(), Some(json!({"status": "healthy"})));
    }

    #[test]
    fn test_failure_falls_back_to_detail_text() {
        let env = decode_value(json!({"success": false, "detail": "quota exceeded"}));
        assert_eq!(env.message(), Some("quota exceeded"));

        let env = decode_value(json!({"success": false}));
        assert_eq!(env.message(), Some("request failed"));
    }

    #[test]
    fn test_non_json_bodies() {
        assert!(decode_bytes(b"").is_success());
        assert_eq!(
            decode_bytes(b"Internal Server Error").into_data().unwrap(),
            Some(json!("Internal Server Error"))
        );
    }

    #[test]
    fn test_typed_payload_mismatch_is_envelope_error() {
        let env = decode_value(json!({"data": "not a number"}));
        assert!(matches!(env.into_typed::<u32>(), Err(Error::Envelope(_))));
    }
}
