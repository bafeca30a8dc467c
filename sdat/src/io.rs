//! Little-endian helpers shared by the section and resource codecs

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// A four character block identifier, such as `b"INFO"`
pub type Tag = [u8; 4];

pub fn read_tag<R>(mut reader: R) -> io::Result<Tag>
where
    R: Read,
{
    let mut tag = [0; 4];
    reader.read_exact(&mut tag)?;
    Ok(tag)
}

pub fn read_u32_array<R, const N: usize>(mut reader: R) -> io::Result<[u32; N]>
where
    R: Read,
{
    let mut values = [0; N];
    reader.read_u32_into::<LittleEndian>(&mut values)?;
    Ok(values)
}

pub fn write_zeros<W>(mut writer: W, count: usize) -> io::Result<()>
where
    W: Write,
{
    for _ in 0..count {
        writer.write_u8(0)?;
    }

    Ok(())
}

/// Read a NUL-terminated string starting at `offset`
///
/// Bytes are interpreted as Latin-1, which is what the authoring tools emit in practice.
pub fn read_cstring(data: &[u8], offset: usize) -> io::Result<String> {
    let tail = data
        .get(offset..)
        .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
    let end = tail
        .iter()
        .position(|byte| *byte == 0)
        .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;

    Ok(tail[..end].iter().map(|byte| *byte as char).collect())
}

pub fn write_cstring<W>(mut writer: W, string: &str) -> io::Result<()>
where
    W: Write,
{
    for c in string.chars() {
        writer.write_u8(u32::from(c).min(0xFF) as u8)?;
    }
    writer.write_u8(0)
}

/// The number of bytes [`write_cstring()`] emits for `string`
pub fn cstring_len(string: &str) -> usize {
    string.chars().count() + 1
}

/// Round `value` up to the next multiple of four
pub fn align4(value: usize) -> usize {
    (value + 3) & !3
}

pub fn write_u32s<W>(mut writer: W, values: &[u32]) -> io::Result<()>
where
    W: Write,
{
    for value in values {
        writer.write_u32::<LittleEndian>(*value)?;
    }

    Ok(())
}
