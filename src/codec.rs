//! Frame codec
//!
//! PCM chunks travel as standard (padded) base64 text inside the JSON envelope.

use base64::engine::general_purpose;
use base64::Engine;

/// Error returned when an inbound payload is not valid base64
#[derive(Debug, thiserror::Error)]
#[error("invalid base64 payload: {0}")]
pub struct DecodeError(#[from] base64::DecodeError);

/// Encode a raw PCM chunk for the wire.
pub fn encode(raw: &[u8]) -> String {
    general_purpose::STANDARD.encode(raw)
}

/// Decode a wire payload back into raw PCM.
///
/// Leading and trailing ASCII whitespace is tolerated (some services append a
/// newline); anything else that is not canonical base64 is rejected.
pub fn decode(wire: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(general_purpose::STANDARD.decode(wire.trim_ascii())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_payload() {
        assert_eq!(decode("AAE=").unwrap(), vec![0x00, 0x01]);
        assert_eq!(encode(&[0x00, 0x01]), "AAE=");
    }

    #[test]
    fn test_round_trip() {
        let pcm: Vec<u8> = (0..=255u8).cycle().take(1024 + 3).collect();
        assert_eq!(decode(&encode(&pcm)).unwrap(), pcm);
        assert_eq!(decode(&encode(&[])).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_trailing_newline_is_tolerated() {
        assert_eq!(decode("AAE=\n").unwrap(), vec![0x00, 0x01]);
    }

    #[test]
    fn test_malformed_input() {
        assert!(decode("AAE").is_err(), "missing padding");
        assert!(decode("A*E=").is_err(), "invalid alphabet");
        assert!(decode("AA E=").is_err(), "embedded whitespace");
    }
}
