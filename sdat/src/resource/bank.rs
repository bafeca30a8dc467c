//! Instrument banks (`SBNK`)

use super::{read_prologue, write_prologue, ResourceError, DATA_RESERVED_LEN};
use crate::{
    header::StdHeader,
    io::{align4, write_zeros},
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

/// A list of instruments, addressed by the patch opcode of a sequence
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bank {
    pub instruments: Vec<Instrument>,
}

/// One patch slot in a [`Bank`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instrument {
    /// Nothing, notes played with this patch are dropped
    Empty,

    /// One [`Range`] that covers the whole keyboard
    Single(Range),

    /// A range per key, starting at `low_note`
    NoteTable { low_note: u8, ranges: Vec<Range> },

    /// Up to 8 key regions, each covering the notes up to and including its `high_note`
    KeySplit(Vec<Range>),
}

/// The leaf of an instrument: what to play for a span of notes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Range {
    /// The lowest note this range applies to
    pub low_note: u8,

    /// The highest note this range applies to
    pub high_note: u8,

    /// The articulation record, see [`Range::articulation()`]
    pub record: u16,

    /// The wave index inside the wave archive (PCM), or the duty cycle (PSG)
    pub wave: u16,

    /// Which of the bank's four wave archive slots the wave lives in
    pub wave_archive: u16,

    /// The note at which the wave plays at its native pitch
    pub base_note: u8,

    pub attack: u8,
    pub decay: u8,
    pub sustain: u8,
    pub release: u8,
    pub pan: u8,
}

/// How a [`Range`] produces sound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Articulation {
    /// A sampled wave from a wave archive
    Pcm,

    /// A PSG square wave, with [`Range::wave`] as the duty cycle
    PsgTone,

    /// PSG white noise
    PsgNoise,

    /// Any other sampled record type, played the same way as [`Articulation::Pcm`]
    Direct(u16),
}

impl Range {
    /// The number of bytes a range occupies, excluding a possible leading record
    pub const LEN: usize = 10;

    /// The kind of sound this range plays, or `None` when the record is empty
    pub fn articulation(&self) -> Option<Articulation> {
        match self.record {
            0 => None,
            1 => Some(Articulation::Pcm),
            2 => Some(Articulation::PsgTone),
            3 => Some(Articulation::PsgNoise),
            other => Some(Articulation::Direct(other)),
        }
    }

    /// Whether this range plays a wave from a wave archive
    pub fn uses_wave(&self) -> bool {
        matches!(
            self.articulation(),
            Some(Articulation::Pcm | Articulation::Direct(_))
        )
    }

    fn from_reader<R>(mut reader: R, low_note: u8, high_note: u8, record: u16) -> io::Result<Self>
    where
        R: Read,
    {
        Ok(Self {
            low_note,
            high_note,
            record,
            wave: reader.read_u16::<LittleEndian>()?,
            wave_archive: reader.read_u16::<LittleEndian>()?,
            base_note: reader.read_u8()?,
            attack: reader.read_u8()?,
            decay: reader.read_u8()?,
            sustain: reader.read_u8()?,
            release: reader.read_u8()?,
            pan: reader.read_u8()?,
        })
    }

    fn to_writer<W>(&self, mut writer: W) -> io::Result<()>
    where
        W: Write,
    {
        writer.write_u16::<LittleEndian>(self.wave)?;
        writer.write_u16::<LittleEndian>(self.wave_archive)?;
        writer.write_all(&[
            self.base_note,
            self.attack,
            self.decay,
            self.sustain,
            self.release,
            self.pan,
        ])
    }
}

impl Instrument {
    /// The record byte that identifies a [`Instrument::NoteTable`]
    pub const NOTE_TABLE: u8 = 16;

    /// The record byte that identifies a [`Instrument::KeySplit`]
    pub const KEY_SPLIT: u8 = 17;

    /// The maximum number of regions in a [`Instrument::KeySplit`]
    pub const KEY_SPLIT_REGIONS: usize = 8;

    /// All ranges this instrument is made of
    pub fn ranges(&self) -> &[Range] {
        match self {
            Self::Empty => &[],
            Self::Single(range) => std::slice::from_ref(range),
            Self::NoteTable { ranges, .. } | Self::KeySplit(ranges) => ranges,
        }
    }

    pub fn ranges_mut(&mut self) -> &mut [Range] {
        match self {
            Self::Empty => &mut [],
            Self::Single(range) => std::slice::from_mut(range),
            Self::NoteTable { ranges, .. } | Self::KeySplit(ranges) => ranges,
        }
    }

    /// Select the range that should sound for `key`
    pub fn range_for_key(&self, key: u8) -> Option<&Range> {
        match self {
            Self::Empty => None,
            Self::Single(range) => Some(range),
            Self::NoteTable { low_note, ranges } => {
                let high_note = ranges.last()?.high_note;
                if *low_note <= key && key <= high_note {
                    ranges.get((key - low_note) as usize)
                } else {
                    None
                }
            }
            Self::KeySplit(ranges) => ranges.iter().find(|range| key <= range.high_note),
        }
    }

    fn record(&self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Single(range) => range.record as u8,
            Self::NoteTable { .. } => Self::NOTE_TABLE,
            Self::KeySplit(_) => Self::KEY_SPLIT,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Single(_) => Range::LEN,
            Self::NoteTable { ranges, .. } => 2 + ranges.len() * (2 + Range::LEN),
            Self::KeySplit(ranges) => Self::KEY_SPLIT_REGIONS + ranges.len() * (2 + Range::LEN),
        }
    }

    fn read_payload(cursor: &mut Cursor<&[u8]>, record: u8) -> io::Result<Self> {
        match record {
            0 => Ok(Self::Empty),
            Self::NOTE_TABLE => {
                let low_note = cursor.read_u8()?;
                let high_note = cursor.read_u8()?;
                let count = high_note.wrapping_sub(low_note).wrapping_add(1);

                let mut ranges = Vec::with_capacity(count as usize);
                for i in 0..count {
                    let note = low_note.wrapping_add(i);
                    let record = cursor.read_u16::<LittleEndian>()?;
                    ranges.push(Range::from_reader(&mut *cursor, note, note, record)?);
                }

                Ok(Self::NoteTable { low_note, ranges })
            }
            Self::KEY_SPLIT => {
                let mut regions = [0; Self::KEY_SPLIT_REGIONS];
                cursor.read_exact(&mut regions)?;

                let mut ranges = Vec::new();
                for (i, high_note) in regions.iter().enumerate() {
                    if *high_note == 0 {
                        break;
                    }

                    let low_note = if i == 0 { 0 } else { regions[i - 1].wrapping_add(1) };
                    let record = cursor.read_u16::<LittleEndian>()?;
                    ranges.push(Range::from_reader(
                        &mut *cursor,
                        low_note,
                        *high_note,
                        record,
                    )?);
                }

                Ok(Self::KeySplit(ranges))
            }
            record => Ok(Self::Single(Range::from_reader(
                cursor,
                0,
                127,
                record as u16,
            )?)),
        }
    }

    fn write_payload<W>(&self, mut writer: W) -> io::Result<()>
    where
        W: Write,
    {
        match self {
            Self::Empty => Ok(()),
            Self::Single(range) => range.to_writer(writer),
            Self::NoteTable { low_note, ranges } => {
                let high_note = ranges.last().map_or(*low_note, |range| range.high_note);
                writer.write_all(&[*low_note, high_note])?;
                for range in ranges {
                    writer.write_u16::<LittleEndian>(range.record)?;
                    range.to_writer(&mut writer)?;
                }
                Ok(())
            }
            Self::KeySplit(ranges) => {
                let mut regions = [0; Self::KEY_SPLIT_REGIONS];
                for (region, range) in regions.iter_mut().zip(ranges) {
                    *region = range.high_note;
                }
                writer.write_all(&regions)?;

                for range in ranges {
                    writer.write_u16::<LittleEndian>(range.record)?;
                    range.to_writer(&mut writer)?;
                }
                Ok(())
            }
        }
    }
}

impl Bank {
    /// The offset of the first instrument header in a bank body
    const INSTRUMENTS_OFFSET: usize = StdHeader::LEN + 8 + DATA_RESERVED_LEN + 4;

    pub fn new(instruments: Vec<Instrument>) -> Self {
        Self { instruments }
    }

    /// Parse a bank from its full body, standard header included
    pub fn from_bytes(body: &[u8]) -> Result<Self, ResourceError> {
        let mut cursor = Cursor::new(body);
        read_prologue(&mut cursor, *b"SBNK")?;

        cursor.set_position(cursor.position() + DATA_RESERVED_LEN as u64);
        let count = cursor.read_u32::<LittleEndian>()?;

        let mut instruments = Vec::with_capacity(count.min(0x1000) as usize);
        for _ in 0..count {
            let record = cursor.read_u8()?;
            let offset = cursor.read_u16::<LittleEndian>()?;
            cursor.read_u8()?;

            let end_of_header = cursor.position();
            cursor.set_position(offset as u64);
            instruments.push(Instrument::read_payload(&mut cursor, record)?);
            cursor.set_position(end_of_header);
        }

        Ok(Self { instruments })
    }

    /// Serialize the bank into a full body, standard header included
    pub fn to_bytes(&self) -> Result<Vec<u8>, ResourceError> {
        let payload_start = Self::INSTRUMENTS_OFFSET + self.instruments.len() * 4;
        let payload_len: usize = self.instruments.iter().map(Instrument::payload_len).sum();
        let total_len = align4(payload_start + payload_len);

        if payload_start + payload_len > u16::MAX as usize {
            return Err(ResourceError::TooLarge(total_len));
        }

        let mut bytes = Vec::with_capacity(total_len);
        write_prologue(&mut bytes, *b"SBNK", total_len)?;
        write_zeros(&mut bytes, DATA_RESERVED_LEN)?;
        bytes.write_u32::<LittleEndian>(self.instruments.len() as u32)?;

        let mut offset = payload_start;
        for instrument in &self.instruments {
            let record = instrument.record();
            bytes.write_u8(record)?;
            bytes.write_u16::<LittleEndian>(if record == 0 { 0 } else { offset as u16 })?;
            bytes.write_u8(0)?;
            offset += instrument.payload_len();
        }

        for instrument in &self.instruments {
            instrument.write_payload(&mut bytes)?;
        }

        bytes.resize(total_len, 0);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(record: u16, wave: u16) -> Range {
        Range {
            low_note: 0,
            high_note: 127,
            record,
            wave,
            wave_archive: 0,
            base_note: 60,
            attack: 127,
            decay: 127,
            sustain: 127,
            release: 127,
            pan: 64,
        }
    }

    fn bank() -> Bank {
        Bank::new(vec![
            Instrument::Single(range(1, 3)),
            Instrument::Empty,
            Instrument::NoteTable {
                low_note: 60,
                ranges: vec![
                    Range {
                        low_note: 60,
                        high_note: 60,
                        ..range(1, 0)
                    },
                    Range {
                        low_note: 61,
                        high_note: 61,
                        ..range(2, 4)
                    },
                ],
            },
            Instrument::KeySplit(vec![
                Range {
                    low_note: 0,
                    high_note: 47,
                    ..range(1, 5)
                },
                Range {
                    low_note: 48,
                    high_note: 127,
                    ..range(3, 0)
                },
            ]),
        ])
    }

    #[test]
    fn body() {
        let bank = bank();
        let bytes = bank.to_bytes().unwrap();

        assert_eq!(&bytes[..4], b"SBNK");
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(Bank::from_bytes(&bytes).unwrap(), bank);
    }

    #[test]
    fn key_selection() {
        let bank = bank();

        assert_eq!(bank.instruments[0].range_for_key(12).unwrap().wave, 3);
        assert!(bank.instruments[1].range_for_key(12).is_none());

        let table = &bank.instruments[2];
        assert!(table.range_for_key(59).is_none());
        assert_eq!(table.range_for_key(61).unwrap().wave, 4);
        assert!(table.range_for_key(62).is_none());

        let split = &bank.instruments[3];
        assert_eq!(split.range_for_key(47).unwrap().wave, 5);
        assert_eq!(
            split.range_for_key(48).unwrap().articulation(),
            Some(Articulation::PsgNoise)
        );
    }

    #[test]
    fn articulations() {
        assert_eq!(range(0, 0).articulation(), None);
        assert!(range(1, 0).uses_wave());
        assert!(!range(2, 0).uses_wave());
        assert!(!range(3, 0).uses_wave());
        assert_eq!(range(4, 0).articulation(), Some(Articulation::Direct(4)));
        assert!(range(4, 0).uses_wave());
    }
}
