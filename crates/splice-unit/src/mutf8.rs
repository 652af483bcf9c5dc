//! Modified UTF-8 as used by `CONSTANT_Utf8` entries
//!
//! Differs from standard UTF-8 in two ways: NUL is encoded as two bytes and
//! supplementary characters are encoded as surrogate pairs of three bytes each.

use crate::error::{UnitError, UnitResult};

/// Encode a string into modified UTF-8
#[must_use]
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Decode modified UTF-8 bytes
///
/// # Errors
/// Returns [`UnitError::Malformed`] on invalid sequences or unpaired surrogates
pub fn decode(bytes: &[u8]) -> UnitResult<String> {
    // Fast path: plain ASCII is identical in both encodings
    if bytes.iter().all(|b| (1..0x80).contains(b)) {
        return String::from_utf8(bytes.to_vec()).map_err(|e| UnitError::malformed(e.to_string()));
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = u16::from(bytes[i]);
        if b0 & 0x80 == 0 {
            if b0 == 0 {
                return Err(UnitError::malformed("raw NUL in modified UTF-8"));
            }
            units.push(b0);
            i += 1;
        } else if b0 & 0xE0 == 0xC0 {
            let b1 = continuation(bytes, i + 1)?;
            units.push(((b0 & 0x1F) << 6) | b1);
            i += 2;
        } else if b0 & 0xF0 == 0xE0 {
            let b1 = continuation(bytes, i + 1)?;
            let b2 = continuation(bytes, i + 2)?;
            units.push(((b0 & 0x0F) << 12) | (b1 << 6) | b2);
            i += 3;
        } else {
            return Err(UnitError::malformed(format!(
                "invalid modified UTF-8 lead byte {b0:#04x} at {i}"
            )));
        }
    }
    String::from_utf16(&units).map_err(|e| UnitError::malformed(e.to_string()))
}

fn continuation(bytes: &[u8], at: usize) -> UnitResult<u16> {
    match bytes.get(at) {
        Some(b) if b & 0xC0 == 0x80 => Ok(u16::from(b & 0x3F)),
        Some(b) => Err(UnitError::malformed(format!(
            "invalid continuation byte {b:#04x} at {at}"
        ))),
        None => Err(UnitError::malformed("truncated modified UTF-8 sequence")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ascii_is_unchanged() {
        assert_eq!(encode("java/lang/Object"), b"java/lang/Object".to_vec());
    }

    #[test]
    fn nul_uses_two_bytes() {
        assert_eq!(encode("\0"), vec![0xC0, 0x80]);
        assert_eq!(decode(&[0xC0, 0x80]).unwrap(), "\0");
    }

    #[test]
    fn supplementary_uses_surrogate_pair() {
        let encoded = encode("\u{1F600}");
        assert_eq!(encoded.len(), 6);
        assert_eq!(decode(&encoded).unwrap(), "\u{1F600}");
    }

    #[test]
    fn rejects_raw_nul() {
        assert!(decode(&[b'a', 0, b'b']).is_err());
    }

    #[test]
    fn rejects_truncated_sequence() {
        assert!(decode(&[0xE2, 0x82]).is_err());
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(s in "\\PC*") {
            prop_assert_eq!(decode(&encode(&s)).unwrap(), s);
        }
    }
}
