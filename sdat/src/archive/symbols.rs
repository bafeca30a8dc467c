//! The optional `SYMB` section, holding the names of every entry

use super::DecodeError;
use crate::io::{
    align4, cstring_len, read_cstring, read_tag, read_u32_array, write_cstring, write_u32s,
    write_zeros,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Write};

/// Names per category, positionally matching the index section's slots
///
/// A `None` name means the slot has no symbol (an offset of zero).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct SymbolSection {
    pub sequences: Vec<Option<String>>,
    pub banks: Vec<Option<String>>,
    pub wave_archives: Vec<Option<String>>,
}

impl SymbolSection {
    pub const TAG: [u8; 4] = *b"SYMB";

    /// Tag, size, eight record offsets and 24 reserved bytes
    const RECORDS_START: usize = 0x40;

    /// The header plus the counts of the five records that are always empty
    const BASE_LEN: usize = Self::RECORDS_START + 5 * 4;

    pub fn from_bytes(section: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(section);

        let tag = read_tag(&mut cursor)?;
        if tag != Self::TAG {
            return Err(DecodeError::Section {
                expected: Self::TAG,
                found: tag,
            });
        }
        cursor.read_u32::<LittleEndian>()?;

        let [sequences, _, banks, wave_archives, ..]: [u32; 8] = read_u32_array(&mut cursor)?;

        Ok(Self {
            sequences: read_record(section, sequences)?,
            banks: read_record(section, banks)?,
            wave_archives: read_record(section, wave_archives)?,
        })
    }

    /// The unpadded size of the section, as written into its own size field
    pub fn encoded_len(&self) -> usize {
        Self::BASE_LEN
            + record_len(&self.sequences)
            + record_len(&self.banks)
            + record_len(&self.wave_archives)
    }

    /// Write the section, padded to a multiple of four bytes
    pub fn to_writer<W>(&self, mut writer: W) -> io::Result<()>
    where
        W: Write,
    {
        let len = self.encoded_len();

        let sequences = Self::RECORDS_START;
        let sequence_archives = sequences + 4 + 4 * self.sequences.len();
        let banks = sequence_archives + 4;
        let wave_archives = banks + 4 + 4 * self.banks.len();
        let players = wave_archives + 4 + 4 * self.wave_archives.len();
        let groups = players + 4;
        let players2 = groups + 4;
        let streams = players2 + 4;

        writer.write_all(&Self::TAG)?;
        writer.write_u32::<LittleEndian>(len as u32)?;
        write_u32s(
            &mut writer,
            &[
                sequences as u32,
                sequence_archives as u32,
                banks as u32,
                wave_archives as u32,
                players as u32,
                groups as u32,
                players2 as u32,
                streams as u32,
            ],
        )?;
        write_zeros(&mut writer, 24)?;

        // Strings follow the last record count
        let mut offset = streams + 4;
        write_record_header(&mut writer, &self.sequences, &mut offset)?;
        writer.write_u32::<LittleEndian>(0)?;
        write_record_header(&mut writer, &self.banks, &mut offset)?;
        write_record_header(&mut writer, &self.wave_archives, &mut offset)?;
        write_zeros(&mut writer, 4 * 4)?;

        for name in self
            .sequences
            .iter()
            .chain(&self.banks)
            .chain(&self.wave_archives)
            .flatten()
        {
            write_cstring(&mut writer, name)?;
        }

        write_zeros(&mut writer, align4(len) - len)
    }
}

fn read_record(section: &[u8], offset: u32) -> Result<Vec<Option<String>>, DecodeError> {
    if offset == 0 {
        return Ok(Vec::new());
    }

    let mut cursor = Cursor::new(section);
    cursor.set_position(offset as u64);
    let count = cursor.read_u32::<LittleEndian>()?;

    let mut names = Vec::with_capacity(count.min(0x1000) as usize);
    for _ in 0..count {
        let offset = cursor.read_u32::<LittleEndian>()?;
        if offset == 0 {
            names.push(None);
        } else {
            names.push(Some(read_cstring(section, offset as usize)?));
        }
    }

    Ok(names)
}

fn record_len(names: &[Option<String>]) -> usize {
    4 + names.len() * 4
        + names
            .iter()
            .flatten()
            .map(|name| cstring_len(name))
            .sum::<usize>()
}

fn write_record_header<W>(
    mut writer: W,
    names: &[Option<String>],
    offset: &mut usize,
) -> io::Result<()>
where
    W: Write,
{
    writer.write_u32::<LittleEndian>(names.len() as u32)?;
    for name in names {
        match name {
            Some(name) => {
                writer.write_u32::<LittleEndian>(*offset as u32)?;
                *offset += cstring_len(name);
            }
            None => writer.write_u32::<LittleEndian>(0)?,
        }
    }

    Ok(())
}
