//! JSON frame encoding
//!
//! Relay frames and peer payloads are plain UTF-8 JSON so browser receivers
//! can consume them without a decoder.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Encode a message into a frame
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| Error::EncodeError(e.to_string()))
}

/// Decode a frame into a message
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ClientMessage, ServerMessage};
    use crate::types::{FieldUpdate, Group, PositionState};

    #[test]
    fn test_encode_is_utf8_json() {
        let bytes = encode(&ClientMessage::Update(FieldUpdate::Region("Everfall".into()))).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert_eq!(text, r#"{"op":"update","d":{"region":"Everfall"}}"#);
    }

    #[test]
    fn test_status_survives_encoding() {
        let mut group = Group::new();
        let mut state = PositionState::new("7656", Some("Aria".into()));
        state.apply(&FieldUpdate::Map("newworld_vitaeeterna".into()));
        group.insert("7656".into(), state);

        let msg = ServerMessage::Status {
            request_id: 4,
            group,
            connections: vec!["abc".into()],
        };
        let decoded: ServerMessage = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_decode_garbage() {
        let result = decode::<ClientMessage>(b"not json");
        assert!(matches!(result, Err(Error::DecodeError(_))));
    }
}
