//! CBOR encoding for protocol messages.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a message to CBOR bytes.
pub fn encode<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| ProtocolError::encoding(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a message from CBOR bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::decoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChecksumRequest, MigrationType};

    #[test]
    fn truncated_input_is_rejected() {
        let request = ChecksumRequest::new(MigrationType::Node, "salt", 1, 100);
        let bytes = encode(&request).unwrap();
        let result: ProtocolResult<ChecksumRequest> = decode(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(ProtocolError::DecodingFailed { .. })));
    }

    #[test]
    fn garbage_is_rejected() {
        let result: ProtocolResult<ChecksumRequest> = decode(&[0xff, 0x00, 0x13]);
        assert!(result.is_err());
    }
}
