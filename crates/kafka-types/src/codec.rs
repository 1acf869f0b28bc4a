//! Payload codec.
//!
//! A payload travels through two layers:
//!
//! 1. protobuf binary serialization of the application message, tolerant of
//!    partially populated messages (no required-field check on either side);
//! 2. standard padded base64 framing, so the record value survives transports
//!    that are not byte-clean.
//!
//! The two layers are independent: the consumer unframes every record before
//! handing the raw payload to a handler, and the handler deserializes into
//! whatever message type it expects.

use crate::error::{KafkaTypesError, Result};
use base64::Engine;
use protobuf::{CodedInputStream, CodedOutputStream};

/// Serialize a protobuf message without checking required fields.
pub fn serialize<M: protobuf::Message>(message: &M) -> Result<Vec<u8>> {
    let size = message.compute_size();
    let mut buf = Vec::with_capacity(size as usize);
    {
        let mut os = CodedOutputStream::vec(&mut buf);
        message
            .write_to_with_cached_sizes(&mut os)
            .map_err(|e| KafkaTypesError::ProtobufEncode(e.to_string()))?;
        os.flush()
            .map_err(|e| KafkaTypesError::ProtobufEncode(e.to_string()))?;
    }
    Ok(buf)
}

/// Deserialize a protobuf message without checking required fields.
pub fn deserialize<M: protobuf::Message>(bytes: &[u8]) -> Result<M> {
    let mut message = M::new();
    let mut is = CodedInputStream::from_bytes(bytes);
    message
        .merge_from(&mut is)
        .map_err(|e| KafkaTypesError::ProtobufDecode(e.to_string()))?;
    is.check_eof()
        .map_err(|e| KafkaTypesError::ProtobufDecode(e.to_string()))?;
    Ok(message)
}

/// Frame raw payload bytes for the record value.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    base64::engine::general_purpose::STANDARD
        .encode(payload)
        .into_bytes()
}

/// Recover raw payload bytes from a record value.
pub fn decode(framed: &[u8]) -> Result<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(framed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use protobuf::well_known_types::timestamp::Timestamp;
    use protobuf::well_known_types::wrappers::StringValue;

    #[test]
    fn test_frame_roundtrip() {
        let payloads: [&[u8]; 4] = [b"", b"hello", &[0, 159, 146, 150, 255], &[0u8; 1024]];
        for payload in payloads {
            assert_eq!(decode(&encode(payload)).unwrap(), payload);
        }
    }

    #[test]
    fn test_frame_is_standard_base64() {
        assert_eq!(encode(b"hello"), b"aGVsbG8=");
        assert!(encode(b"").is_empty());
    }

    #[test]
    fn test_decode_rejects_invalid_frames() {
        assert!(matches!(
            decode(b"not base64!"),
            Err(KafkaTypesError::Frame(_))
        ));
        assert!(decode(b"aGVsbG8").is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut value = StringValue::new();
        value.value = "hello".to_string();

        let bytes = serialize(&value).unwrap();
        let decoded: StringValue = deserialize(&bytes).unwrap();
        assert_eq!(decoded.value, "hello");
    }

    #[test]
    fn test_serialize_empty_message() {
        let bytes = serialize(&Timestamp::new()).unwrap();
        assert!(bytes.is_empty());

        let decoded: Timestamp = deserialize(&bytes).unwrap();
        assert_eq!(decoded, Timestamp::new());
    }

    #[test]
    fn test_deserialize_truncated_input() {
        let result: Result<Timestamp> = deserialize(&[0x08, 0xff]);
        assert!(matches!(result, Err(KafkaTypesError::ProtobufDecode(_))));
    }
}
