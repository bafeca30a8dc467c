//! The `INFO` section, the index of every slot in the archive

use super::{DecodeError, PlayerEntry};
use crate::io::{read_tag, read_u32_array, write_u32s, write_zeros};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

/// A fixed size entry of one of the index records
pub(crate) trait Record: Sized {
    const LEN: usize;

    fn from_reader<R: Read>(reader: R) -> io::Result<Self>;
    fn to_writer<W: Write>(&self, writer: W) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct SequenceRecord {
    pub file_id: u16,
    pub reserved: u16,
    pub bank: u16,
    pub volume: u8,
    pub channel_priority: u8,
    pub player_priority: u8,
    pub player: u8,
    pub reserved_tail: [u8; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct BankRecord {
    pub file_id: u16,
    pub reserved: u16,
    pub wave_archives: [u16; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct WaveArchiveRecord {
    pub file_id: u16,
    pub reserved: u16,
}

impl Record for SequenceRecord {
    const LEN: usize = 12;

    fn from_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let file_id = reader.read_u16::<LittleEndian>()?;
        let reserved = reader.read_u16::<LittleEndian>()?;
        let bank = reader.read_u16::<LittleEndian>()?;

        let mut bytes = [0; 6];
        reader.read_exact(&mut bytes)?;

        Ok(Self {
            file_id,
            reserved,
            bank,
            volume: bytes[0],
            channel_priority: bytes[1],
            player_priority: bytes[2],
            player: bytes[3],
            reserved_tail: [bytes[4], bytes[5]],
        })
    }

    fn to_writer<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self.file_id)?;
        writer.write_u16::<LittleEndian>(self.reserved)?;
        writer.write_u16::<LittleEndian>(self.bank)?;
        writer.write_all(&[
            self.volume,
            self.channel_priority,
            self.player_priority,
            self.player,
        ])?;
        writer.write_all(&self.reserved_tail)
    }
}

impl Record for BankRecord {
    const LEN: usize = 12;

    fn from_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let file_id = reader.read_u16::<LittleEndian>()?;
        let reserved = reader.read_u16::<LittleEndian>()?;

        let mut wave_archives = [0; 4];
        reader.read_u16_into::<LittleEndian>(&mut wave_archives)?;

        Ok(Self {
            file_id,
            reserved,
            wave_archives,
        })
    }

    fn to_writer<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self.file_id)?;
        writer.write_u16::<LittleEndian>(self.reserved)?;
        for index in self.wave_archives {
            writer.write_u16::<LittleEndian>(index)?;
        }
        Ok(())
    }
}

impl Record for WaveArchiveRecord {
    const LEN: usize = 4;

    fn from_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            file_id: reader.read_u16::<LittleEndian>()?,
            reserved: reader.read_u16::<LittleEndian>()?,
        })
    }

    fn to_writer<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self.file_id)?;
        writer.write_u16::<LittleEndian>(self.reserved)
    }
}

impl Record for PlayerEntry {
    const LEN: usize = 8;

    fn from_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            max_sequences: reader.read_u8()?,
            padding: reader.read_u8()?,
            channel_mask: reader.read_u16::<LittleEndian>()?,
            heap_size: reader.read_u32::<LittleEndian>()?,
        })
    }

    fn to_writer<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u8(self.max_sequences)?;
        writer.write_u8(self.padding)?;
        writer.write_u16::<LittleEndian>(self.channel_mask)?;
        writer.write_u32::<LittleEndian>(self.heap_size)
    }
}

/// The decoded index, with `None` for every slot whose offset is zero
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct InfoSection {
    pub sequences: Vec<Option<SequenceRecord>>,
    pub banks: Vec<Option<BankRecord>>,
    pub wave_archives: Vec<Option<WaveArchiveRecord>>,
    pub players: Vec<Option<PlayerEntry>>,
}

impl InfoSection {
    pub const TAG: [u8; 4] = *b"INFO";

    /// Tag, size, eight record offsets and 24 reserved bytes
    const RECORDS_START: usize = 0x40;

    /// The header plus the counts of the four records that are always empty
    const BASE_LEN: usize = Self::RECORDS_START + 4 * 4;

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

        let [sequences, _, banks, wave_archives, players, ..]: [u32; 8] =
            read_u32_array(&mut cursor)?;

        Ok(Self {
            sequences: read_record(section, sequences)?,
            banks: read_record(section, banks)?,
            wave_archives: read_record(section, wave_archives)?,
            players: read_record(section, players)?,
        })
    }

    pub fn encoded_len(&self) -> usize {
        Self::BASE_LEN
            + record_len(&self.sequences)
            + record_len(&self.banks)
            + record_len(&self.wave_archives)
            + record_len(&self.players)
    }

    pub fn to_writer<W>(&self, mut writer: W) -> io::Result<()>
    where
        W: Write,
    {
        let sequences = Self::RECORDS_START;
        let sequence_archives = sequences + 4 + 4 * self.sequences.len();
        let banks = sequence_archives + 4;
        let wave_archives = banks + 4 + 4 * self.banks.len();
        let players = wave_archives + 4 + 4 * self.wave_archives.len();
        let groups = players + 4 + 4 * self.players.len();
        let players2 = groups + 4;
        let streams = players2 + 4;

        writer.write_all(&Self::TAG)?;
        writer.write_u32::<LittleEndian>(self.encoded_len() as u32)?;
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

        let mut offset = streams + 4;
        write_record_header(&mut writer, &self.sequences, &mut offset)?;
        writer.write_u32::<LittleEndian>(0)?;
        write_record_header(&mut writer, &self.banks, &mut offset)?;
        write_record_header(&mut writer, &self.wave_archives, &mut offset)?;
        write_record_header(&mut writer, &self.players, &mut offset)?;
        write_zeros(&mut writer, 3 * 4)?;

        write_record_data(&mut writer, &self.sequences)?;
        write_record_data(&mut writer, &self.banks)?;
        write_record_data(&mut writer, &self.wave_archives)?;
        write_record_data(&mut writer, &self.players)
    }
}

fn read_record<T>(section: &[u8], offset: u32) -> Result<Vec<Option<T>>, DecodeError>
where
    T: Record,
{
    if offset == 0 {
        return Ok(Vec::new());
    }

    let mut cursor = Cursor::new(section);
    cursor.set_position(offset as u64);
    let count = cursor.read_u32::<LittleEndian>()?;

    let mut offsets = Vec::with_capacity(count.min(0x1000) as usize);
    for _ in 0..count {
        offsets.push(cursor.read_u32::<LittleEndian>()?);
    }

    let mut entries = Vec::with_capacity(offsets.len());
    for offset in offsets {
        if offset == 0 {
            entries.push(None);
        } else {
            cursor.set_position(offset as u64);
            entries.push(Some(T::from_reader(&mut cursor)?));
        }
    }

    Ok(entries)
}

fn record_len<T>(entries: &[Option<T>]) -> usize
where
    T: Record,
{
    4 + entries.len() * 4 + entries.iter().flatten().count() * T::LEN
}

fn write_record_header<W, T>(
    mut writer: W,
    entries: &[Option<T>],
    offset: &mut usize,
) -> io::Result<()>
where
    W: Write,
    T: Record,
{
    writer.write_u32::<LittleEndian>(entries.len() as u32)?;
    for entry in entries {
        if entry.is_some() {
            writer.write_u32::<LittleEndian>(*offset as u32)?;
            *offset += T::LEN;
        } else {
            writer.write_u32::<LittleEndian>(0)?;
        }
    }

    Ok(())
}

fn write_record_data<W, T>(mut writer: W, entries: &[Option<T>]) -> io::Result<()>
where
    W: Write,
    T: Record,
{
    for entry in entries.iter().flatten() {
        entry.to_writer(&mut writer)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section() -> InfoSection {
        InfoSection {
            sequences: vec![
                Some(SequenceRecord {
                    file_id: 0,
                    bank: 1,
                    volume: 127,
                    channel_priority: 64,
                    player_priority: 32,
                    player: 0,
                    reserved_tail: [0xAB, 0xCD],
                    ..Default::default()
                }),
                None,
            ],
            banks: vec![
                None,
                Some(BankRecord {
                    file_id: 1,
                    reserved: 0,
                    wave_archives: [0, 0xFFFF, 0xFFFF, 0xFFFF],
                }),
            ],
            wave_archives: vec![Some(WaveArchiveRecord {
                file_id: 2,
                reserved: 0,
            })],
            players: vec![Some(PlayerEntry {
                max_sequences: 1,
                padding: 0,
                channel_mask: 0xFFFF,
                heap_size: 0,
            })],
        }
    }

    #[test]
    fn read_write() {
        let section = section();

        let mut bytes = Vec::new();
        section.to_writer(&mut bytes).unwrap();
        assert_eq!(bytes.len(), section.encoded_len());
        assert_eq!(InfoSection::from_bytes(&bytes).unwrap(), section);
    }

    #[test]
    fn empty() {
        let section = InfoSection::default();
        assert_eq!(section.encoded_len(), 96);

        let mut bytes = Vec::new();
        section.to_writer(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 96);
        assert_eq!(&bytes[..4], b"INFO");
    }

    #[test]
    fn sequence_record_layout() {
        let mut bytes = Vec::new();
        section().sequences[0]
            .unwrap()
            .to_writer(&mut bytes)
            .unwrap();

        assert_eq!(bytes, [0, 0, 0, 0, 1, 0, 127, 64, 32, 0, 0xAB, 0xCD]);
    }
}
