//! CBOR encoding for wire messages and bus payloads.
//!
//! Framing is left to the carrier: one WebSocket message or one bus message
//! holds exactly one CBOR value, so no length prefix is needed.

use crate::error::VzResult;
use std::io::Cursor;

/// Encode a serializable value as CBOR bytes.
pub fn cbor_encode<T: serde::Serialize>(value: &T) -> VzResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)?;
    Ok(payload)
}

/// Decode CBOR bytes into a typed value.
pub fn cbor_decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> VzResult<T> {
    let cursor = Cursor::new(data);
    let value: T = ciborium::from_reader(cursor)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VzError;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestMsg {
        name: String,
        value: i64,
    }

    #[test]
    fn round_trip() {
        let msg = TestMsg {
            name: "hello".into(),
            value: 42,
        };
        let bytes = cbor_encode(&msg).unwrap();
        let decoded: TestMsg = cbor_decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn truncated_input_is_codec_error() {
        let msg = TestMsg {
            name: "truncated".into(),
            value: 7,
        };
        let bytes = cbor_encode(&msg).unwrap();
        let err = cbor_decode::<TestMsg>(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, VzError::Codec(_)));
    }

    #[test]
    fn wrong_shape_is_codec_error() {
        let bytes = cbor_encode(&"just a string").unwrap();
        assert!(matches!(
            cbor_decode::<TestMsg>(&bytes),
            Err(VzError::Codec(_))
        ));
    }
}
