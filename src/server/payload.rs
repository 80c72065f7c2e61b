//! Application payload transform
//!
//! Every message the server fans out passes through a [`PayloadEncoder`]
//! before framing. The reactor never looks inside the result.

use crate::server::error::ServerResult;

/// Turns raw message bytes into the payload placed in an outgoing frame
pub trait PayloadEncoder {
    fn encode(&self, payload: &[u8]) -> ServerResult<Vec<u8>>;
}

/// Encodes each message as a JSON string
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD first.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl PayloadEncoder for JsonEncoder {
    fn encode(&self, payload: &[u8]) -> ServerResult<Vec<u8>> {
        let text = String::from_utf8_lossy(payload);
        Ok(serde_json::to_vec(&text)?)
    }
}

/// Forwards message bytes unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct RawEncoder;

impl PayloadEncoder for RawEncoder {
    fn encode(&self, payload: &[u8]) -> ServerResult<Vec<u8>> {
        Ok(payload.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_encoder_quotes_and_escapes() {
        assert_eq!(JsonEncoder.encode(b"hi").unwrap(), b"\"hi\"");
        assert_eq!(
            JsonEncoder.encode(b"say \"hi\"\n").unwrap(),
            br#""say \"hi\"\n""#.to_vec()
        );
        assert_eq!(
            JsonEncoder.encode(b"client#3 disconnect").unwrap(),
            b"\"client#3 disconnect\""
        );
    }

    #[test]
    fn test_json_encoder_lossy_utf8() {
        let encoded = JsonEncoder.encode(&[0x61, 0xff]).unwrap();
        assert_eq!(String::from_utf8(encoded).unwrap(), "\"a\u{fffd}\"");
    }

    #[test]
    fn test_raw_encoder() {
        assert_eq!(RawEncoder.encode(&[0, 1, 2]).unwrap(), vec![0, 1, 2]);
    }
}
