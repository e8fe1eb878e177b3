use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;

/// A chat message as exchanged over the room's data channel.
///
/// Wire form is a JSON object with the keys `messageId`, `senderSid`,
/// `senderIdentity` and `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: String,
    pub sender_sid: String,
    pub sender_identity: String,
    pub text: String,
}

impl ChatMessage {
    /// Build a locally authored message with a fresh id.
    pub fn new_local(sender_sid: &str, sender_identity: &str, text: &str) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            sender_sid: sender_sid.to_string(),
            sender_identity: sender_identity.to_string(),
            text: text.to_string(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        // Four string fields cannot fail to serialize.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChatMessage {
        ChatMessage {
            message_id: "m-1".into(),
            sender_sid: "PA_alice".into(),
            sender_identity: "alice".into(),
            text: "hello there".into(),
        }
    }

    #[test]
    fn wire_uses_camel_case_keys() {
        let value: serde_json::Value = serde_json::from_slice(&sample().encode()).unwrap();
        assert_eq!(value["messageId"], "m-1");
        assert_eq!(value["senderSid"], "PA_alice");
        assert_eq!(value["senderIdentity"], "alice");
        assert_eq!(value["text"], "hello there");
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let msg = sample();
        assert_eq!(ChatMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn field_order_is_irrelevant() {
        let payload =
            br#"{"text":"yo","senderIdentity":"bob","senderSid":"PA_bob","messageId":"x"}"#;
        let msg = ChatMessage::decode(payload).unwrap();
        assert_eq!(msg.text, "yo");
        assert_eq!(msg.sender_identity, "bob");
    }

    #[test]
    fn missing_text_is_rejected() {
        let payload = br#"{"messageId":"x","senderSid":"PA_bob","senderIdentity":"bob"}"#;
        assert!(ChatMessage::decode(payload).is_err());
    }

    #[test]
    fn non_string_field_is_rejected() {
        let payload = br#"{"messageId":7,"senderSid":"PA_bob","senderIdentity":"bob","text":"t"}"#;
        assert!(ChatMessage::decode(payload).is_err());
    }

    #[test]
    fn local_messages_get_unique_ids() {
        let a = ChatMessage::new_local("PA_me", "me", "hi");
        let b = ChatMessage::new_local("PA_me", "me", "hi");
        assert!(!a.message_id.is_empty());
        assert_ne!(a.message_id, b.message_id);
    }
}
