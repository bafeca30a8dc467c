//! The resource bodies stored in an archive's file blob
//!
//! An archive stores three kinds of bodies that this crate understands:
//!
//!  * [`Sequence`] (`SSEQ`): a bytecode program that drives up to 16 tracks
//!  * [`Bank`] (`SBNK`): the instruments a sequence plays with
//!  * [`WaveArchive`] (`SWAR`): the sampled [`Wave`]s PCM instruments refer to
//!
//! Every body starts with a [`StdHeader`](crate::header::StdHeader). When that header is off,
//! the caller's [`DecodePolicy`] decides whether that is fatal.

pub mod adpcm;
pub mod bank;
pub mod sequence;
pub mod wave;
pub mod wave_archive;

pub use bank::{Articulation, Bank, Instrument, Range};
pub use sequence::Sequence;
pub use wave::{Wave, WaveFormat};
pub use wave_archive::WaveArchive;

use crate::{
    header::{HeaderError, StdHeader},
    io::{read_tag, Tag},
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Write};
use thiserror::Error;

/// What to do when a resource body does not start with the standard header it should
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DecodePolicy {
    /// Propagate the mismatch as an error
    #[default]
    FailHard,

    /// Leave the resource unparsed and carry on, keeping the raw bytes around
    BestEffort,
}

/// Errors that might be returned when decoding or encoding a resource body
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The standard header at the start of the body is not the expected one
    #[error("The resource header is invalid")]
    Header(#[from] HeaderError),

    /// The block following the standard header is not a `DATA` block
    #[error("Expected a DATA block, found {}", String::from_utf8_lossy(.found))]
    DataBlock { found: Tag },

    /// A wave declared a format this crate does not know
    #[error("Unknown wave format {0}")]
    WaveFormat(u8),

    /// The body ended before all declared data could be read
    #[error("The resource body is truncated")]
    Truncated(#[from] io::Error),

    /// A rebuilt body does not fit the 16-bit offsets of its format
    #[error("The encoded resource is too large ({0} bytes)")]
    TooLarge(usize),
}

impl ResourceError {
    /// Whether a [`DecodePolicy::BestEffort`] decode may skip over this error
    pub fn is_missing_resource(&self) -> bool {
        matches!(self, Self::Header(_))
    }
}

/// The number of bytes that bank and wave archive bodies keep between the `DATA` size and
/// their entry count
pub(crate) const DATA_RESERVED_LEN: usize = 32;

/// Read and check the standard header, then the `DATA` block tag, returning the block size
pub(crate) fn read_prologue(
    cursor: &mut Cursor<&[u8]>,
    expected: Tag,
) -> Result<u32, ResourceError> {
    StdHeader::from_reader(&mut *cursor)?.verify(expected)?;

    let tag = read_tag(&mut *cursor)?;
    if &tag != b"DATA" {
        return Err(ResourceError::DataBlock { found: tag });
    }

    Ok(cursor.read_u32::<LittleEndian>()?)
}

/// Write the standard header followed by a `DATA` block header for a body of `total_len` bytes
pub(crate) fn write_prologue<W>(mut writer: W, tag: Tag, total_len: usize) -> io::Result<()>
where
    W: Write,
{
    StdHeader::new(tag, total_len as u32, StdHeader::LEN as u16, 1).to_writer(&mut writer)?;
    writer.write_all(b"DATA")?;
    writer.write_u32::<LittleEndian>((total_len - StdHeader::LEN) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prologue() {
        let mut bytes = Vec::new();
        write_prologue(&mut bytes, *b"SWAR", 0x40).unwrap();
        bytes.resize(0x40, 0);

        let size = read_prologue(&mut Cursor::new(bytes.as_slice()), *b"SWAR").unwrap();
        assert_eq!(size, 0x30);

        let error = read_prologue(&mut Cursor::new(bytes.as_slice()), *b"SBNK").unwrap_err();
        assert!(error.is_missing_resource());
    }

    #[test]
    fn missing_data_block() {
        let mut bytes = Vec::new();
        StdHeader::new(*b"SSEQ", 0x20, 16, 1)
            .to_writer(&mut bytes)
            .unwrap();
        bytes.extend_from_slice(b"NOPE\0\0\0\0");

        let error = read_prologue(&mut Cursor::new(bytes.as_slice()), *b"SSEQ").unwrap_err();
        assert!(matches!(error, ResourceError::DataBlock { found } if &found == b"NOPE"));
        assert!(!error.is_missing_resource());
    }
}
