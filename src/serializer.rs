// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Wire serializer
//!
//! Converts canonical messages to and from the bytes exchanged with partners and kept by the
//! body persister.
//!

use agent::{Error, model::As4Message};

pub const JSON_CONTENT_TYPE: &str = "application/json";

pub trait MessageSerializer: Send + Sync {
    /// Content type of the produced bytes.
    fn content_type(&self) -> &str;

    fn serialize(&self, message: &As4Message) -> Result<Vec<u8>, Error>;

    fn deserialize(&self, body: &[u8], content_type: &str) -> Result<As4Message, Error>;
}

/// JSON encoding of [`As4Message`].
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl MessageSerializer for JsonSerializer {
    fn content_type(&self) -> &str {
        JSON_CONTENT_TYPE
    }

    fn serialize(&self, message: &As4Message) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(message)?)
    }

    fn deserialize(&self, body: &[u8], content_type: &str) -> Result<As4Message, Error> {
        let media_type = content_type.split(';').next().unwrap_or_default().trim();
        if !media_type.eq_ignore_ascii_case(JSON_CONTENT_TYPE) {
            return Err(Error::Transform(format!(
                "Unsupported content type '{}'",
                content_type
            )));
        }
        let message: As4Message = serde_json::from_slice(body)
            .map_err(|e| Error::Transform(format!("Invalid AS4 message: {}", e)))?;
        if message.is_empty() {
            return Err(Error::Transform("AS4 message has no message units".to_owned()));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent::model::{MessageUnit, Receipt};
    use chrono::Utc;

    #[test]
    fn test_json_serializer() {
        let serializer = JsonSerializer;
        let message = As4Message::with_unit(MessageUnit::Receipt(Receipt {
            message_id: "receipt-1".to_owned(),
            ref_to_message_id: "user-1".to_owned(),
            timestamp: Utc::now(),
        }));
        let body = serializer.serialize(&message).unwrap();
        let parsed = serializer
            .deserialize(&body, "application/json; charset=utf-8")
            .unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_rejects_unknown_input() {
        let serializer = JsonSerializer;
        assert!(matches!(
            serializer.deserialize(b"{}", "text/xml"),
            Err(Error::Transform(_))
        ));
        assert!(matches!(
            serializer.deserialize(b"not json", JSON_CONTENT_TYPE),
            Err(Error::Transform(_))
        ));
        assert!(matches!(
            serializer.deserialize(br#"{"message_units":[]}"#, JSON_CONTENT_TYPE),
            Err(Error::Transform(_))
        ));
    }
}
