/// One framed 5250 message with a read cursor.
///
/// Layout of the header that starts every record:
///
/// ```text
/// [0..2]  record length, big endian (header included)
/// [2..4]  0x12 0xA0 record type (general data stream)
/// [4..6]  flow type
/// [6]     variable header length (4)
/// [7]     flags
/// [8]     reserved
/// [9]     opcode
/// ```

use super::buffer::{hex_dump, ByteBuffer};
use crate::error::{ProtocolError, Result};

/// Offset of the variable header length byte
const VARIABLE_HEADER_OFFSET: usize = 6;
/// Minimum bytes in a well-formed record
pub const RECORD_HEADER_LENGTH: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    data: ByteBuffer,
    cursor: usize,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap raw bytes; the cursor starts at the beginning.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { data: ByteBuffer::from(bytes), cursor: 0 }
    }

    pub fn append_byte(&mut self, b: u8) {
        self.data.append_byte(b);
    }

    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Next byte, or an error if the record is exhausted.
    pub fn get_byte(&mut self) -> Result<u8> {
        self.next_byte()
            .ok_or_else(|| ProtocolError::UnexpectedEnd { context: "record data" }.into())
    }

    /// Next byte, or `None` at the end of the record.
    pub fn next_byte(&mut self) -> Option<u8> {
        let b = self.data.data().get(self.cursor).copied()?;
        self.cursor += 1;
        Some(b)
    }

    /// Peek without consuming
    pub fn peek_byte(&self) -> Option<u8> {
        self.data.data().get(self.cursor).copied()
    }

    /// Big-endian 16-bit value
    pub fn get_u16(&mut self) -> Result<u16> {
        let hi = self.get_byte()? as u16;
        let lo = self.get_byte()? as u16;
        Ok((hi << 8) | lo)
    }

    /// Consume `n` bytes
    pub fn get_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let end = self.cursor.checked_add(n).filter(|&e| e <= self.len());
        match end {
            Some(end) => {
                let out = self.data.data()[self.cursor..end].to_vec();
                self.cursor = end;
                Ok(out)
            }
            None => Err(ProtocolError::UnexpectedEnd { context: "record data" }.into()),
        }
    }

    /// Skip up to `n` bytes, stopping at the end of the record.
    pub fn skip(&mut self, n: usize) {
        self.cursor = (self.cursor + n).min(self.len());
    }

    pub fn unget_byte(&mut self) {
        debug_assert!(self.cursor > 0);
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn is_chain_end(&self) -> bool {
        self.cursor == self.len()
    }

    pub fn skip_to_end(&mut self) {
        self.cursor = self.len();
    }

    /// Move the cursor past the header to the first payload byte.
    pub fn skip_header(&mut self) -> Result<()> {
        if self.len() < RECORD_HEADER_LENGTH {
            return Err(ProtocolError::InvalidHeader { length: self.len() }.into());
        }
        self.cursor = self.header_length().min(self.len());
        Ok(())
    }

    /// Bytes before the payload: the fixed part up to the variable-header
    /// length byte, plus that length.
    pub fn header_length(&self) -> usize {
        VARIABLE_HEADER_OFFSET + self.header_byte(VARIABLE_HEADER_OFFSET) as usize
    }

    fn header_byte(&self, n: usize) -> u8 {
        self.data.data().get(n).copied().unwrap_or(0)
    }

    pub fn flow_type(&self) -> u16 {
        ((self.header_byte(4) as u16) << 8) | self.header_byte(5) as u16
    }

    pub fn flags(&self) -> u8 {
        self.header_byte(7)
    }

    pub fn opcode(&self) -> u8 {
        self.header_byte(9)
    }

    /// Payload bytes after the variable header
    pub fn payload(&self) -> &[u8] {
        let start = VARIABLE_HEADER_OFFSET + self.header_byte(VARIABLE_HEADER_OFFSET) as usize;
        self.data.data().get(start..).unwrap_or(&[])
    }

    /// Trace-format dump, terminated by `@eor`.
    pub fn dump(&self) -> String {
        let mut out = hex_dump(self.data.data(), "@record");
        out.push_str("@eor\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record::from_bytes(vec![0x00, 0x0D, 0x12, 0xA0, 0x00, 0x00, 0x04, 0x08, 0x00, 0x03, 0x04, 0x11, 0x00])
    }

    #[test]
    fn test_header_accessors() {
        let rec = sample();
        assert_eq!(rec.flow_type(), 0x0000);
        assert_eq!(rec.flags(), 0x08);
        assert_eq!(rec.opcode(), 0x03);
        assert_eq!(rec.payload(), &[0x04, 0x11, 0x00]);
        assert_eq!(rec.header_length(), 10);
    }

    #[test]
    fn test_cursor_and_chain_end() {
        let mut rec = sample();
        rec.skip_header().unwrap();
        assert_eq!(rec.get_byte().unwrap(), 0x04);
        rec.unget_byte();
        assert_eq!(rec.get_u16().unwrap(), 0x0411);
        assert!(!rec.is_chain_end());
        assert_eq!(rec.get_byte().unwrap(), 0x00);
        assert!(rec.is_chain_end());
        assert!(rec.get_byte().is_err());
    }

    #[test]
    fn test_short_record_rejected() {
        let mut rec = Record::from_bytes(vec![0x00, 0x04, 0x12, 0xA0]);
        assert!(rec.skip_header().is_err());
    }

    #[test]
    fn test_get_bytes_bounds() {
        let mut rec = Record::from_bytes(vec![1, 2, 3]);
        assert_eq!(rec.get_bytes(2).unwrap(), vec![1, 2]);
        assert!(rec.get_bytes(2).is_err());
        rec.skip(10);
        assert!(rec.is_chain_end());
    }

    #[test]
    fn test_dump_ends_with_eor() {
        let dump = sample().dump();
        assert!(dump.starts_with("@record +0000 000d12a0"));
        assert!(dump.ends_with("@eor\n"));
    }
}
