/// Growable byte buffer used as scratch space for every outbound record,
/// plus the hex dump format shared by trace logging and trace replay.

use std::fmt::Write as _;

use crate::protocol_common::ebcdic::CharMap;

/// Append-only byte vector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity) }
    }

    pub fn append_byte(&mut self, b: u8) {
        self.data.push(b);
    }

    pub fn append_data(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Append a big-endian 16-bit value
    pub fn append_u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Render the buffer in trace format, one line per 16 bytes.
    pub fn hex_dump(&self, prefix: &str) -> String {
        hex_dump(&self.data, prefix)
    }

    /// Emit the trace dump at `trace` level.
    pub fn log_hex(&self, prefix: &str) {
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("dumping buffer (length={}):\n{}", self.data.len(), self.hex_dump(prefix));
        }
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// `<prefix> +OFFS hhhhhhhh hhhhhhhh hhhhhhhh hhhhhhhh  text`
///
/// With the seven-character `@record` prefix the hex column starts at
/// offset 14, which is where the trace reader expects it.
pub fn hex_dump(data: &[u8], prefix: &str) -> String {
    let map = CharMap::cp037();
    let mut out = String::new();
    for (line, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{} +{:04X} ", prefix, line * 16);
        let mut text = String::with_capacity(16);
        for n in 0..16 {
            match chunk.get(n) {
                Some(&b) => {
                    let _ = write!(out, "{b:02x}");
                    let local = map.to_local(b);
                    text.push(if local.is_ascii_graphic() || local == b' ' { local as char } else { '.' });
                }
                None => out.push_str("  "),
            }
            if (n + 1) % 4 == 0 {
                out.push(' ');
            }
        }
        let _ = writeln!(out, " {text}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_clear() {
        let mut buf = ByteBuffer::new();
        assert!(buf.is_empty());
        buf.append_byte(0x04);
        buf.append_data(&[0x11, 0x01]);
        buf.append_u16(0x1234);
        assert_eq!(buf.data(), &[0x04, 0x11, 0x01, 0x12, 0x34]);
        buf.clear();
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_hex_dump_layout() {
        let data: Vec<u8> = (0xC1..=0xC9).chain(0xD1..=0xD9).collect();
        let dump = hex_dump(&data, "@record");
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("@record +0000 c1c2c3c4 c5c6c7c8"));
        assert_eq!(&lines[0][14..16], "c1");
        assert!(lines[0].ends_with("ABCDEFGHIJKLMNOP"));
        assert!(lines[1].starts_with("@record +0010 d8d9"));
        assert!(lines[1].ends_with(" QR"));
    }
}
