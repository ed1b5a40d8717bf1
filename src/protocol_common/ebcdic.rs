//! EBCDIC character map
//!
//! The display buffer stores raw EBCDIC bytes exactly as the host sent
//! them. Conversion happens only at the edges: when a key typed in the
//! local character set (Latin-1) is written into a field, and when the
//! screen is shown to a person. Code page 037 (US/Canada) is built in.

use once_cell::sync::Lazy;

/// EBCDIC CP037 to Latin-1 table. Every entry is below U+0100, so the
/// Latin-1 side fits in one byte.
const CP037_TO_LATIN1: [char; 256] = [
    // 0x00-0x0F: Control characters
    '\x00', '\x01', '\x02', '\x03', '\u{009C}', '\t', '\u{0086}', '\x7F',
    '\u{0097}', '\u{008D}', '\u{008E}', '\x0B', '\x0C', '\r', '\x0E', '\x0F',
    // 0x10-0x1F: Control characters
    '\x10', '\x11', '\x12', '\x13', '\u{009D}', '\u{0085}', '\x08', '\u{0087}',
    '\x18', '\x19', '\u{0092}', '\u{008F}', '\x1C', '\x1D', '\x1E', '\x1F',
    // 0x20-0x2F: Control characters and special
    '\u{0080}', '\u{0081}', '\u{0082}', '\u{0083}', '\u{0084}', '\n', '\x17', '\x1B',
    '\u{0088}', '\u{0089}', '\u{008A}', '\u{008B}', '\u{008C}', '\x05', '\x06', '\x07',
    // 0x30-0x3F: Control characters
    '\u{0090}', '\u{0091}', '\x16', '\u{0093}', '\u{0094}', '\u{0095}', '\u{0096}', '\x04',
    '\u{0098}', '\u{0099}', '\u{009A}', '\u{009B}', '\x14', '\x15', '\u{009E}', '\x1A',
    // 0x40-0x4F: Space and special characters
    ' ', '\u{00A0}', '\u{00E2}', '\u{00E4}', '\u{00E0}', '\u{00E1}', '\u{00E3}', '\u{00E5}',
    '\u{00E7}', '\u{00F1}', '\u{00A2}', '.', '<', '(', '+', '|',
    // 0x50-0x5F: Ampersand and special characters
    '&', '\u{00E9}', '\u{00EA}', '\u{00EB}', '\u{00E8}', '\u{00ED}', '\u{00EE}', '\u{00EF}',
    '\u{00EC}', '\u{00DF}', '!', '$', '*', ')', ';', '\u{00AC}',
    // 0x60-0x6F: Dash and special characters
    '-', '/', '\u{00C2}', '\u{00C4}', '\u{00C0}', '\u{00C1}', '\u{00C3}', '\u{00C5}',
    '\u{00C7}', '\u{00D1}', '\u{00A6}', ',', '%', '_', '>', '?',
    // 0x70-0x7F: Special characters and quotes
    '\u{00F8}', '\u{00C9}', '\u{00CA}', '\u{00CB}', '\u{00C8}', '\u{00CD}', '\u{00CE}', '\u{00CF}',
    '\u{00CC}', '`', ':', '#', '@', '\'', '=', '"',
    // 0x80-0x8F: Special character and lowercase a-i
    '\u{00D8}', 'a', 'b', 'c', 'd', 'e', 'f', 'g',
    'h', 'i', '\u{00AB}', '\u{00BB}', '\u{00F0}', '\u{00FD}', '\u{00FE}', '\u{00B1}',
    // 0x90-0x9F: Degree symbol and lowercase j-r
    '\u{00B0}', 'j', 'k', 'l', 'm', 'n', 'o', 'p',
    'q', 'r', '\u{00AA}', '\u{00BA}', '\u{00E6}', '\u{00B8}', '\u{00C6}', '\u{00A4}',
    // 0xA0-0xAF: Micro sign and lowercase s-z
    '\u{00B5}', '~', 's', 't', 'u', 'v', 'w', 'x',
    'y', 'z', '\u{00A1}', '\u{00BF}', '\u{00D0}', '\u{00DD}', '\u{00DE}', '\u{00AE}',
    // 0xB0-0xBF: Caret and special characters
    '^', '\u{00A3}', '\u{00A5}', '\u{00B7}', '\u{00A9}', '\u{00A7}', '\u{00B6}', '\u{00BC}',
    '\u{00BD}', '\u{00BE}', '[', ']', '\u{00AF}', '\u{00A8}', '\u{00B4}', '\u{00D7}',
    // 0xC0-0xCF: Left brace and uppercase A-I
    '{', 'A', 'B', 'C', 'D', 'E', 'F', 'G',
    'H', 'I', '\u{00AD}', '\u{00F4}', '\u{00F6}', '\u{00F2}', '\u{00F3}', '\u{00F5}',
    // 0xD0-0xDF: Right brace and uppercase J-R
    '}', 'J', 'K', 'L', 'M', 'N', 'O', 'P',
    'Q', 'R', '\u{00B9}', '\u{00FB}', '\u{00FC}', '\u{00F9}', '\u{00FA}', '\u{00FF}',
    // 0xE0-0xEF: Backslash and uppercase S-Z
    '\\', '\u{00F7}', 'S', 'T', 'U', 'V', 'W', 'X',
    'Y', 'Z', '\u{00B2}', '\u{00D4}', '\u{00D6}', '\u{00D2}', '\u{00D3}', '\u{00D5}',
    // 0xF0-0xFF: Digits 0-9 and special characters
    '0', '1', '2', '3', '4', '5', '6', '7',
    '8', '9', '\u{00B3}', '\u{00DB}', '\u{00DC}', '\u{00D9}', '\u{00DA}', '\u{009F}',
];

static LATIN1_TO_CP037: Lazy<[u8; 256]> = Lazy::new(|| {
    // Unmapped code points fall back to EBCDIC space.
    let mut table = [0x40u8; 256];
    for (ebcdic, ch) in CP037_TO_LATIN1.iter().enumerate() {
        table[*ch as usize] = ebcdic as u8;
    }
    table
});

/// Bytes that a 3179-2 refuses to display (they are 5250 orders).
const NON_PRINTABLE: [u8; 11] = [0x01, 0x02, 0x03, 0x04, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x1D];

/// Bidirectional local <-> remote translation table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharMap {
    name: String,
    to_local: [u8; 256],
    to_remote: [u8; 256],
}

impl Default for CharMap {
    fn default() -> Self {
        Self::cp037()
    }
}

impl CharMap {
    /// The US/Canada code page
    pub fn cp037() -> Self {
        let mut to_local = [0u8; 256];
        for (ebcdic, ch) in CP037_TO_LATIN1.iter().enumerate() {
            to_local[ebcdic] = *ch as u32 as u8;
        }
        Self {
            name: "37".to_string(),
            to_local,
            to_remote: *LATIN1_TO_CP037,
        }
    }

    /// Look up a map by its configured name. Only CP037 and its aliases
    /// are built in.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "37" | "037" | "cp037" | "en" | "us" => Some(Self::cp037()),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// EBCDIC byte to local Latin-1 byte
    pub fn to_local(&self, remote: u8) -> u8 {
        self.to_local[remote as usize]
    }

    /// Local Latin-1 byte to EBCDIC byte
    pub fn to_remote(&self, local: u8) -> u8 {
        self.to_remote[local as usize]
    }

    /// EBCDIC byte rendered as a `char`
    pub fn to_char(&self, remote: u8) -> char {
        self.to_local(remote) as char
    }

    /// Translate a local string (Latin-1 subset) to EBCDIC
    pub fn str_to_remote(&self, s: &str) -> Vec<u8> {
        s.chars()
            .map(|c| if (c as u32) < 0x100 { self.to_remote(c as u32 as u8) } else { 0x40 })
            .collect()
    }

    /// Translate EBCDIC bytes to a local string
    pub fn remote_to_string(&self, bytes: &[u8]) -> String {
        bytes.iter().map(|&b| self.to_char(b)).collect()
    }

    /// Whether a WTD byte that is not an order can be written to the screen
    pub fn is_printable(&self, remote: u8) -> bool {
        !NON_PRINTABLE.contains(&remote)
    }

    /// Whether the byte is a 5250 field attribute (001x xxxx)
    pub fn is_attribute(&self, remote: u8) -> bool {
        (remote & 0xE0) == 0x20
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_and_digits() {
        let map = CharMap::cp037();
        assert_eq!(map.to_local(0xC1), b'A');
        assert_eq!(map.to_local(0xA9), b'z');
        assert_eq!(map.to_local(0xF5), b'5');
        assert_eq!(map.to_remote(b' '), 0x40);
        assert_eq!(map.to_remote(b'-'), 0x60);
    }

    #[test]
    fn test_round_trip_all_bytes() {
        let map = CharMap::cp037();
        for b in 0..=255u8 {
            assert_eq!(map.to_remote(map.to_local(b)), b, "byte {b:#04x}");
        }
    }

    #[test]
    fn test_string_conversion() {
        let map = CharMap::cp037();
        let remote = map.str_to_remote("HELLO WORLD");
        assert_eq!(remote[..5], [0xC8, 0xC5, 0xD3, 0xD3, 0xD6]);
        assert_eq!(map.remote_to_string(&remote), "HELLO WORLD");
    }

    #[test]
    fn test_predicates() {
        let map = CharMap::default();
        assert!(map.is_attribute(0x20));
        assert!(map.is_attribute(0x3F));
        assert!(!map.is_attribute(0x40));
        assert!(!map.is_printable(0x11));
        assert!(map.is_printable(0x00));
        assert!(map.is_printable(0xC1));
    }

    #[test]
    fn test_lookup_by_name() {
        assert!(CharMap::by_name("37").is_some());
        assert!(CharMap::by_name("klingon").is_none());
    }
}
