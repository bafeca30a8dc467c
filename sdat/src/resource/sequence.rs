//! Sequences (`SSEQ`)

use super::{read_prologue, write_prologue, ResourceError};
use crate::header::StdHeader;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read};

/// A music program
///
/// The body of a sequence is nothing more than the bytecode that the
/// [`player`](crate::player) interprets. Track 0 starts executing at offset 0.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sequence {
    /// The bytecode
    pub data: Vec<u8>,
}

impl Sequence {
    /// Offset of the bytecode in bodies written by [`Sequence::to_bytes()`]
    pub const DATA_OFFSET: u32 = 0x1C;

    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Parse a sequence from its full body, standard header included
    pub fn from_bytes(body: &[u8]) -> Result<Self, ResourceError> {
        let mut cursor = Cursor::new(body);
        let size = read_prologue(&mut cursor, *b"SSEQ")?;
        let data_offset = cursor.read_u32::<LittleEndian>()?;

        let mut data = vec![0; size.saturating_sub(12) as usize];
        cursor.set_position(data_offset as u64);
        cursor.read_exact(&mut data)?;

        Ok(Self { data })
    }

    /// Serialize the sequence into a full body, standard header included
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let total_len = StdHeader::LEN + 12 + self.data.len();

        let mut bytes = Vec::with_capacity(total_len);
        write_prologue(&mut bytes, *b"SSEQ", total_len)?;
        bytes.write_u32::<LittleEndian>(Self::DATA_OFFSET)?;
        bytes.extend_from_slice(&self.data);

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body() {
        let sequence = Sequence::new(vec![0x3C, 0x64, 0x30, 0xFF]);
        let bytes = sequence.to_bytes().unwrap();

        assert_eq!(&bytes[..4], b"SSEQ");
        assert_eq!(bytes.len(), 0x1C + 4);
        assert_eq!(&bytes[0x1C..], &[0x3C, 0x64, 0x30, 0xFF]);

        assert_eq!(Sequence::from_bytes(&bytes).unwrap(), sequence);
    }

    #[test]
    fn honours_data_offset() {
        let mut bytes = Sequence::new(vec![0xFF]).to_bytes().unwrap();

        // Move the bytecode four bytes further and point the offset at it
        bytes.splice(0x1C..0x1C, [0xAA; 4]);
        bytes[0x18] = 0x20;

        assert_eq!(Sequence::from_bytes(&bytes).unwrap().data, vec![0xFF]);
    }

    #[test]
    fn truncated() {
        let bytes = Sequence::new(vec![0x80, 0x10, 0xFF]).to_bytes().unwrap();
        let error = Sequence::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(error, ResourceError::Truncated(_)));
    }
}
