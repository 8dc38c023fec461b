//! Municipality label repair.
//!
//! Some labels arrive as UTF-8 bytes that were decoded as Windows-1252
//! somewhere upstream (`CÃ¡diz` for `Cádiz`). Re-encoding as Windows-1252
//! and decoding as UTF-8 undoes that. Labels that are not mojibake fail one
//! of the two steps and are returned unchanged.

/// Windows-1252 bytes 0x80..=0x9F. `None` marks undefined positions.
const CP1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'), None, Some('\u{201A}'), Some('\u{0192}'),
    Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
    Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'), Some('\u{2039}'),
    Some('\u{0152}'), None, Some('\u{017D}'), None,
    None, Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
    Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
    Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
    Some('\u{0153}'), None, Some('\u{017E}'), Some('\u{0178}'),
];

fn cp1252_byte(ch: char) -> Option<u8> {
    let code = ch as u32;
    if code < 0x80 || (0xA0..=0xFF).contains(&code) {
        return Some(code as u8);
    }
    CP1252_HIGH
        .iter()
        .position(|c| *c == Some(ch))
        .map(|i| 0x80 + i as u8)
}

fn encode_cp1252(text: &str) -> Option<Vec<u8>> {
    text.chars().map(cp1252_byte).collect()
}

/// Repair double-decoded UTF-8, or return the input unchanged.
pub fn fix_mojibake(text: &str) -> String {
    encode_cp1252(text)
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repairs_double_decoded_text() {
        assert_eq!(fix_mojibake("CÃ¡diz"), "Cádiz");
        assert_eq!(fix_mojibake("A CoruÃ±a"), "A Coruña");
        assert_eq!(fix_mojibake("LÂ´Alfàs"), "LÂ´Alfàs");
    }

    #[test]
    fn test_leaves_correct_text_untouched() {
        assert_eq!(fix_mojibake("Cádiz"), "Cádiz");
        assert_eq!(fix_mojibake("Alegría-Dulantzi"), "Alegría-Dulantzi");
        assert_eq!(fix_mojibake("Zaragoza"), "Zaragoza");
        assert_eq!(fix_mojibake(""), "");
    }

    #[test]
    fn test_unencodable_text_untouched() {
        assert_eq!(fix_mojibake("Łódź"), "Łódź");
        assert_eq!(fix_mojibake("\u{0081}"), "\u{0081}");
    }

    #[test]
    fn test_high_range_characters_encode() {
        // "’" is U+2019 = 0x92, 'â€™' re-encodes to E2 80 99
        assert_eq!(fix_mojibake("l\u{00E2}\u{20AC}\u{2122}"), "l\u{2019}");
    }
}
