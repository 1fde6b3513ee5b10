//! EBCDIC code page 037 conversion
//!
//! The sign-on security check carries the user identifier as a fixed-width
//! EBCDIC field. Code page 037 (US/Canada English) covers the invariant
//! character set that IBM i user profile names are drawn from.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::{AuthError, AuthResult};

/// EBCDIC space, used to pad fixed-width fields
pub const EBCDIC_SPACE: u8 = 0x40;

/// Width of the user identifier field in sign-on frames
pub const USER_ID_LEN: usize = 10;

/// EBCDIC to Unicode translation table for code page 037
const CP037_TO_CHAR: [char; 256] = [
    // 0x00-0x3F: control characters
    '\x00', '\x01', '\x02', '\x03', '\u{009C}', '\t', '\u{0086}', '\x7F',
    '\u{0097}', '\u{008D}', '\u{008E}', '\x0B', '\x0C', '\r', '\x0E', '\x0F',
    '\x10', '\x11', '\x12', '\x13', '\u{009D}', '\u{0085}', '\x08', '\u{0087}',
    '\x18', '\x19', '\u{0092}', '\u{008F}', '\x1C', '\x1D', '\x1E', '\x1F',
    '\u{0080}', '\u{0081}', '\u{0082}', '\u{0083}', '\u{0084}', '\n', '\x17', '\x1B',
    '\u{0088}', '\u{0089}', '\u{008A}', '\u{008B}', '\u{008C}', '\x05', '\x06', '\x07',
    '\u{0090}', '\u{0091}', '\x16', '\u{0093}', '\u{0094}', '\u{0095}', '\u{0096}', '\x04',
    '\u{0098}', '\u{0099}', '\u{009A}', '\u{009B}', '\x14', '\x15', '\u{009E}', '\x1A',
    // 0x40-0x7F: space, punctuation, specials
    ' ', '\u{00A0}', '\u{00E2}', '\u{00E4}', '\u{00E0}', '\u{00E1}', '\u{00E3}', '\u{00E5}',
    '\u{00E7}', '\u{00F1}', '\u{00A2}', '.', '<', '(', '+', '|',
    '&', '\u{00E9}', '\u{00EA}', '\u{00EB}', '\u{00E8}', '\u{00ED}', '\u{00EE}', '\u{00EF}',
    '\u{00EC}', '\u{00DF}', '!', '$', '*', ')', ';', '\u{00AC}',
    '-', '/', '\u{00C2}', '\u{00C4}', '\u{00C0}', '\u{00C1}', '\u{00C3}', '\u{00C5}',
    '\u{00C7}', '\u{00D1}', '\u{00A6}', ',', '%', '_', '>', '?',
    '\u{00F8}', '\u{00C9}', '\u{00CA}', '\u{00CB}', '\u{00C8}', '\u{00CD}', '\u{00CE}', '\u{00CF}',
    '\u{00CC}', '`', ':', '#', '@', '\'', '=', '"',
    // 0x80-0xBF: lowercase letters and specials
    '\u{00D8}', 'a', 'b', 'c', 'd', 'e', 'f', 'g',
    'h', 'i', '\u{00AB}', '\u{00BB}', '\u{00F0}', '\u{00FD}', '\u{00FE}', '\u{00B1}',
    '\u{00B0}', 'j', 'k', 'l', 'm', 'n', 'o', 'p',
    'q', 'r', '\u{00AA}', '\u{00BA}', '\u{00E6}', '\u{00B8}', '\u{00C6}', '\u{00A4}',
    '\u{00B5}', '~', 's', 't', 'u', 'v', 'w', 'x',
    'y', 'z', '\u{00A1}', '\u{00BF}', '\u{00D0}', '\u{00DD}', '\u{00DE}', '\u{00AE}',
    '^', '\u{00A3}', '\u{00A5}', '\u{00B7}', '\u{00A9}', '\u{00A7}', '\u{00B6}', '\u{00BC}',
    '\u{00BD}', '\u{00BE}', '[', ']', '\u{00AF}', '\u{00A8}', '\u{00B4}', '\u{00D7}',
    // 0xC0-0xFF: uppercase letters, digits, specials
    '{', 'A', 'B', 'C', 'D', 'E', 'F', 'G',
    'H', 'I', '\u{00AD}', '\u{00F4}', '\u{00F6}', '\u{00F2}', '\u{00F3}', '\u{00F5}',
    '}', 'J', 'K', 'L', 'M', 'N', 'O', 'P',
    'Q', 'R', '\u{00B9}', '\u{00FB}', '\u{00FC}', '\u{00F9}', '\u{00FA}', '\u{00FF}',
    '\\', '\u{00F7}', 'S', 'T', 'U', 'V', 'W', 'X',
    'Y', 'Z', '\u{00B2}', '\u{00D4}', '\u{00D6}', '\u{00D2}', '\u{00D3}', '\u{00D5}',
    '0', '1', '2', '3', '4', '5', '6', '7',
    '8', '9', '\u{00B3}', '\u{00DB}', '\u{00DC}', '\u{00D9}', '\u{00DA}', '\u{009F}',
];

/// Reverse map, built once from the forward table
static CHAR_TO_CP037: Lazy<HashMap<char, u8>> = Lazy::new(|| {
    let mut map = HashMap::with_capacity(256);
    for (byte, ch) in CP037_TO_CHAR.iter().enumerate() {
        map.entry(*ch).or_insert(byte as u8);
    }
    map
});

/// Convert an EBCDIC byte to its Unicode character
pub fn ebcdic_to_char(byte: u8) -> char {
    CP037_TO_CHAR[byte as usize]
}

/// Convert a character to its EBCDIC byte, if representable in CP037
pub fn char_to_ebcdic(ch: char) -> Option<u8> {
    CHAR_TO_CP037.get(&ch).copied()
}

/// Encode a user profile name as the fixed-width sign-on field
///
/// The name is folded to uppercase and padded with EBCDIC spaces. Names
/// longer than ten characters or containing characters outside CP037 are
/// rejected.
pub fn encode_user_id(user: &str) -> AuthResult<[u8; USER_ID_LEN]> {
    let folded = user.trim().to_uppercase();
    if folded.is_empty() {
        return Err(AuthError::InvalidUserId {
            user: user.to_string(),
            reason: "user ID is empty".to_string(),
        });
    }
    if folded.chars().count() > USER_ID_LEN {
        return Err(AuthError::InvalidUserId {
            user: user.to_string(),
            reason: format!("user ID longer than {USER_ID_LEN} characters"),
        });
    }

    let mut field = [EBCDIC_SPACE; USER_ID_LEN];
    for (i, ch) in folded.chars().enumerate() {
        field[i] = char_to_ebcdic(ch).ok_or_else(|| AuthError::InvalidUserId {
            user: user.to_string(),
            reason: format!("character '{ch}' has no CP037 encoding"),
        })?;
    }
    Ok(field)
}

/// Decode a fixed-width EBCDIC field, trailing pad removed
pub fn decode_field(bytes: &[u8]) -> String {
    let trimmed = bytes
        .iter()
        .rposition(|&b| b != EBCDIC_SPACE)
        .map_or(&bytes[..0], |pos| &bytes[..=pos]);
    trimmed.iter().map(|&b| ebcdic_to_char(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letter_and_digit_mapping() {
        assert_eq!(ebcdic_to_char(0xC1), 'A');
        assert_eq!(ebcdic_to_char(0xF0), '0');
        assert_eq!(char_to_ebcdic('A'), Some(0xC1));
        assert_eq!(char_to_ebcdic('9'), Some(0xF9));
        assert_eq!(char_to_ebcdic(' '), Some(EBCDIC_SPACE));
    }

    #[test]
    fn test_encode_user_id_pads_and_folds() {
        let field = encode_user_id("qsecofr").expect("valid user ID");
        assert_eq!(&field[..7], &[0xD8, 0xE2, 0xC5, 0xC3, 0xD6, 0xC6, 0xD9]);
        assert_eq!(&field[7..], &[EBCDIC_SPACE; 3]);
    }

    #[test]
    fn test_encode_user_id_rejects_long_names() {
        let err = encode_user_id("MUCHTOOLONGNAME").unwrap_err();
        match err {
            AuthError::InvalidUserId { reason, .. } => {
                assert!(reason.contains("longer than"));
            }
            other => panic!("expected InvalidUserId, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_user_id_rejects_unmappable() {
        assert!(encode_user_id("USER\u{4E00}").is_err());
        assert!(encode_user_id("").is_err());
        assert!(encode_user_id("   ").is_err());
    }

    #[test]
    fn test_decode_field_strips_padding() {
        let field = encode_user_id("JDOE").unwrap();
        assert_eq!(decode_field(&field), "JDOE");
        assert_eq!(decode_field(&[EBCDIC_SPACE; 10]), "");
    }
}
