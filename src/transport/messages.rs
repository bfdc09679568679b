//! Server Message Types
//!
//! Payloads the gateway itself originates. Everything else on the wire is
//! relayed upstream data the gateway never inspects.

use bytes::Bytes;
use serde::Serialize;

/// Messages generated by the gateway
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current number of connected subscribers
    Users {
        count: usize,
    },
    /// Error message
    Error {
        /// Error description
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_users() {
        let json = serde_json::to_string(&ServerMessage::Users { count: 4 }).unwrap();
        assert_eq!(json, r#"{"type":"users","count":4}"#);
    }

    #[test]
    fn test_serialize_error() {
        let json = serde_json::to_string(&ServerMessage::error("Hub is shutting down")).unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"message\":\"Hub is shutting down\""));
    }
}
