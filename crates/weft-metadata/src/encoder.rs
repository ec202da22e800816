//! Metadata encoding and decoding utilities
//!
//! Little-endian primitive writers/readers plus the [`Encode`] / [`Decode`]
//! traits implemented by every persisted metadata element.

use thiserror::Error;

/// Errors that can occur while decoding a module image
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unexpected end of the metadata stream
    #[error("Unexpected end of metadata at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode byte
    #[error("Invalid opcode {0:#x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Unknown tag for a tagged union
    #[error("Invalid {kind} tag {tag} at offset {offset}")]
    InvalidTag {
        /// What was being decoded
        kind: &'static str,
        /// The tag byte that was read
        tag: u8,
        /// Offset of the tag byte
        offset: usize,
    },
}

/// Writer for the binary module image
#[derive(Debug, Default)]
pub struct MetadataWriter {
    pub(crate) buffer: Vec<u8>,
}

impl MetadataWriter {
    /// Create a new writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the encoded bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current offset (length of the buffer)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer (little-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer (little-endian)
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit signed integer (little-endian)
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float (little-endian)
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a boolean as a single byte
    pub fn emit_bool(&mut self, value: bool) {
        self.emit_u8(value as u8);
    }

    /// Emit a length-prefixed UTF-8 string
    pub fn emit_str(&mut self, value: &str) {
        self.emit_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Emit raw bytes without a length prefix
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Patch a u32 at a specific offset
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        let bytes = value.to_le_bytes();
        self.buffer[offset..offset + 4].copy_from_slice(&bytes);
    }
}

/// Reader for the binary module image
pub struct MetadataReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> MetadataReader<'a> {
    /// Create a new reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Get the current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Check if there are more bytes to read
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        if self.position + count > self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let slice = &self.buffer[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a 16-bit unsigned integer (little-endian)
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a 32-bit unsigned integer (little-endian)
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a 64-bit signed integer (little-endian)
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(raw))
    }

    /// Read a 64-bit float (little-endian)
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(f64::from_le_bytes(raw))
    }

    /// Read a boolean byte
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let start = self.position;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read raw bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        Ok(self.take(count)?.to_vec())
    }
}

/// Binary encoding of a metadata element
pub trait Encode {
    /// Append the element to the writer
    fn encode(&self, writer: &mut MetadataWriter);
}

/// Binary decoding of a metadata element
pub trait Decode: Sized {
    /// Read the element from the reader
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError>;
}

impl Encode for String {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_str(self);
    }
}

impl Decode for String {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        reader.read_string()
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_u32(self.len() as u32);
        for item in self {
            item.encode(writer);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        let count = reader.read_u32()? as usize;
        let mut items = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            items.push(T::decode(reader)?);
        }
        Ok(items)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, writer: &mut MetadataWriter) {
        match self {
            Some(value) => {
                writer.emit_u8(1);
                value.encode(writer);
            }
            None => writer.emit_u8(0),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        if reader.read_bool()? {
            Ok(Some(T::decode(reader)?))
        } else {
            Ok(None)
        }
    }
}

impl<T: Encode> Encode for Box<T> {
    fn encode(&self, writer: &mut MetadataWriter) {
        (**self).encode(writer);
    }
}

impl<T: Decode> Decode for Box<T> {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Box::new(T::decode(reader)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_roundtrip() {
        let mut writer = MetadataWriter::new();
        writer.emit_u8(7);
        writer.emit_u16(0x1234);
        writer.emit_u32(0xdead_beef);
        writer.emit_i64(-42);
        writer.emit_f64(2.5);
        writer.emit_str("weft");

        let bytes = writer.into_bytes();
        let mut reader = MetadataReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(reader.read_i64().unwrap(), -42);
        assert_eq!(reader.read_f64().unwrap(), 2.5);
        assert_eq!(reader.read_string().unwrap(), "weft");
        assert!(!reader.has_more());
    }

    #[test]
    fn test_unexpected_end() {
        let bytes = [1u8, 2];
        let mut reader = MetadataReader::new(&bytes);
        assert!(matches!(reader.read_u32(), Err(DecodeError::UnexpectedEnd(0))));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut writer = MetadataWriter::new();
        writer.emit_u32(2);
        writer.emit_bytes(&[0xff, 0xfe]);
        let bytes = writer.into_bytes();
        let mut reader = MetadataReader::new(&bytes);
        assert!(matches!(reader.read_string(), Err(DecodeError::InvalidUtf8(4))));
    }

    #[test]
    fn test_patch_u32() {
        let mut writer = MetadataWriter::new();
        writer.emit_u32(0);
        writer.emit_u8(9);
        writer.patch_u32(0, 77);
        let bytes = writer.into_bytes();
        let mut reader = MetadataReader::new(&bytes);
        assert_eq!(reader.read_u32().unwrap(), 77);
        assert_eq!(reader.read_u8().unwrap(), 9);
    }
}
