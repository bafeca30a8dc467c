//! The standard header that prefixes every Nitro file
//!
//! The archive itself and every resource body stored inside it (`SSEQ`, `SBNK`, `SWAR`) start
//! with the same 16 bytes: a four character tag, a version magic, the total file size, the
//! header size and the number of blocks that follow.

use crate::io::{read_tag, Tag};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// The 16-byte header in front of every Nitro file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StdHeader {
    /// The four character identifier, e.g. `b"SSEQ"`
    pub tag: Tag,

    /// Byte order mark and version, [`StdHeader::MAGIC`] for every file we understand
    pub magic: u32,

    /// Size of the whole file, header included
    pub file_size: u32,

    /// Size of the header, which is 16 for resources and 64 for the archive
    pub header_size: u16,

    /// The number of data blocks following the header
    pub blocks: u16,
}

impl StdHeader {
    /// The magic shared by all supported files (`FF FE 00 01`)
    pub const MAGIC: u32 = 0x0100FEFF;

    /// The number of bytes a [`StdHeader`] occupies
    pub const LEN: usize = 16;

    pub fn new(tag: Tag, file_size: u32, header_size: u16, blocks: u16) -> Self {
        Self {
            tag,
            magic: Self::MAGIC,
            file_size,
            header_size,
            blocks,
        }
    }

    pub fn from_reader<R>(mut reader: R) -> io::Result<Self>
    where
        R: Read,
    {
        Ok(Self {
            tag: read_tag(&mut reader)?,
            magic: reader.read_u32::<LittleEndian>()?,
            file_size: reader.read_u32::<LittleEndian>()?,
            header_size: reader.read_u16::<LittleEndian>()?,
            blocks: reader.read_u16::<LittleEndian>()?,
        })
    }

    pub fn to_writer<W>(&self, mut writer: W) -> io::Result<()>
    where
        W: Write,
    {
        writer.write_all(&self.tag)?;
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.file_size)?;
        writer.write_u16::<LittleEndian>(self.header_size)?;
        writer.write_u16::<LittleEndian>(self.blocks)
    }

    /// Check that the header carries the expected tag and the standard magic
    pub fn verify(&self, expected: Tag) -> Result<(), HeaderError> {
        if self.tag == expected && self.magic == Self::MAGIC {
            Ok(())
        } else {
            Err(HeaderError {
                expected,
                found: self.tag,
                magic: self.magic,
            })
        }
    }
}

/// A standard header did not carry the expected tag or magic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error(
    "Expected a {} header, found {} with magic {magic:#010x}",
    String::from_utf8_lossy(.expected),
    String::from_utf8_lossy(.found)
)]
pub struct HeaderError {
    pub expected: Tag,
    pub found: Tag,
    pub magic: u32,
}
