//! The `FAT ` section, locating every resource body in the file blob

use super::DecodeError;
use crate::io::{read_tag, write_zeros};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Write};

/// Where a single body lives, measured from the start of the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct FileRecord {
    pub offset: u32,
    pub size: u32,
}

impl FileRecord {
    const LEN: usize = 16;

    /// The record's body, or `None` if it lies outside of `data`
    pub fn slice<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        let start = self.offset as usize;
        data.get(start..start.checked_add(self.size as usize)?)
    }
}

pub(crate) const TAG: [u8; 4] = *b"FAT ";

/// The size of the section for `count` files
pub(crate) fn encoded_len(count: usize) -> usize {
    12 + count * FileRecord::LEN
}

pub(crate) fn from_bytes(section: &[u8]) -> Result<Vec<FileRecord>, DecodeError> {
    let mut cursor = Cursor::new(section);

    let tag = read_tag(&mut cursor)?;
    if tag != TAG {
        return Err(DecodeError::Section {
            expected: TAG,
            found: tag,
        });
    }
    cursor.read_u32::<LittleEndian>()?;

    let count = cursor.read_u32::<LittleEndian>()?;
    let mut records = Vec::with_capacity(count.min(0x1000) as usize);
    for _ in 0..count {
        let offset = cursor.read_u32::<LittleEndian>()?;
        let size = cursor.read_u32::<LittleEndian>()?;
        cursor.set_position(cursor.position() + 8);
        records.push(FileRecord { offset, size });
    }

    Ok(records)
}

pub(crate) fn to_writer<W>(mut writer: W, records: &[FileRecord]) -> io::Result<()>
where
    W: Write,
{
    writer.write_all(&TAG)?;
    writer.write_u32::<LittleEndian>(encoded_len(records.len()) as u32)?;
    writer.write_u32::<LittleEndian>(records.len() as u32)?;

    for record in records {
        writer.write_u32::<LittleEndian>(record.offset)?;
        writer.write_u32::<LittleEndian>(record.size)?;
        write_zeros(&mut writer, 8)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write() {
        let records = vec![
            FileRecord {
                offset: 0x100,
                size: 0x20,
            },
            FileRecord {
                offset: 0x120,
                size: 4,
            },
        ];

        let mut bytes = Vec::new();
        to_writer(&mut bytes, &records).unwrap();
        assert_eq!(bytes.len(), encoded_len(2));
        assert_eq!(from_bytes(&bytes).unwrap(), records);
    }

    #[test]
    fn truncated_record_list() {
        let mut bytes = Vec::new();
        to_writer(&mut bytes, &[FileRecord::default(); 3]).unwrap();
        bytes.truncate(30);

        assert!(matches!(from_bytes(&bytes), Err(DecodeError::Truncated(_))));
    }

    #[test]
    fn slices() {
        let data = [0, 1, 2, 3, 4];
        let record = FileRecord { offset: 1, size: 3 };
        assert_eq!(record.slice(&data), Some(&data[1..4]));

        let record = FileRecord { offset: 4, size: 3 };
        assert_eq!(record.slice(&data), None);
    }
}
