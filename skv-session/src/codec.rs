//! Wire encoding for session payloads.
//!
//! Values are stored as standard, padded base64 so any other instance of the
//! driver can read them back.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::Result;

/// Encodes a payload for storage. Empty input encodes to an empty string.
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes a stored value. An empty value means "no value", not an empty
/// payload.
pub fn decode(value: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
    let value = value.as_ref();
    if value.is_empty() {
        return Ok(None);
    }
    Ok(Some(STANDARD.decode(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn roundtrips_binary_payloads() {
        let payloads: [&[u8]; 4] = [b"a", b"session", &[0, 255, 10, 13, 0], &[0xfb; 100]];
        for payload in payloads {
            assert_eq!(decode(encode(payload)).unwrap().as_deref(), Some(payload));
        }
    }

    #[test]
    fn uses_standard_padded_alphabet() {
        assert_eq!(encode(b"\xfb\xff"), "+/8=");
        assert_eq!(encode(b"hello"), "aGVsbG8=");
        assert_eq!(decode("aGVsbG8=").unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn empty_means_absent() {
        assert_eq!(encode(b""), "");
        assert_eq!(decode("").unwrap(), None);
    }

    #[test]
    fn rejects_non_base64() {
        assert!(matches!(decode("not base64!"), Err(StoreError::Decode(_))));
        // URL-safe alphabet is not accepted.
        assert!(matches!(decode("-_8="), Err(StoreError::Decode(_))));
    }
}
