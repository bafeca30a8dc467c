//! Wave archives (`SWAR`)

use super::{read_prologue, write_prologue, ResourceError, Wave, DATA_RESERVED_LEN};
use crate::{
    header::StdHeader,
    io::{align4, write_zeros},
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{collections::BTreeMap, io::Cursor};

/// A sparse collection of [`Wave`]s, addressed by their index
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WaveArchive {
    /// The number of wave slots, including empty ones
    pub len: u32,

    /// The waves that are present, keyed by slot index
    pub waves: BTreeMap<u32, Wave>,
}

impl WaveArchive {
    const OFFSETS_START: usize = StdHeader::LEN + 8 + DATA_RESERVED_LEN + 4;

    /// Build a dense archive out of a list of waves
    pub fn from_waves<I>(waves: I) -> Self
    where
        I: IntoIterator<Item = Wave>,
    {
        let waves: BTreeMap<_, _> = waves
            .into_iter()
            .enumerate()
            .map(|(index, wave)| (index as u32, wave))
            .collect();

        Self {
            len: waves.len() as u32,
            waves,
        }
    }

    pub fn wave(&self, index: u32) -> Option<&Wave> {
        self.waves.get(&index)
    }

    /// Parse an archive from its full body, standard header included
    pub fn from_bytes(body: &[u8]) -> Result<Self, ResourceError> {
        let mut cursor = Cursor::new(body);
        read_prologue(&mut cursor, *b"SWAR")?;

        cursor.set_position(cursor.position() + DATA_RESERVED_LEN as u64);
        let len = cursor.read_u32::<LittleEndian>()?;

        let mut offsets = Vec::with_capacity(len.min(0x1000) as usize);
        for _ in 0..len {
            offsets.push(cursor.read_u32::<LittleEndian>()?);
        }

        let mut waves = BTreeMap::new();
        for (index, offset) in offsets.into_iter().enumerate() {
            if offset != 0 {
                cursor.set_position(offset as u64);
                waves.insert(index as u32, Wave::from_reader(&mut cursor)?);
            }
        }

        Ok(Self { len, waves })
    }

    /// Serialize the archive into a full body, standard header included
    pub fn to_bytes(&self) -> Result<Vec<u8>, ResourceError> {
        let data_start = Self::OFFSETS_START + self.len as usize * 4;
        let data_len: usize = self
            .waves
            .range(..self.len)
            .map(|(_, wave)| wave.encoded_len())
            .sum();
        let total_len = align4(data_start + data_len);

        let mut bytes = Vec::with_capacity(total_len);
        write_prologue(&mut bytes, *b"SWAR", total_len)?;
        write_zeros(&mut bytes, DATA_RESERVED_LEN)?;
        bytes.write_u32::<LittleEndian>(self.len)?;

        let mut offset = data_start;
        for index in 0..self.len {
            match self.waves.get(&index) {
                Some(wave) => {
                    bytes.write_u32::<LittleEndian>(offset as u32)?;
                    offset += wave.encoded_len();
                }
                None => bytes.write_u32::<LittleEndian>(0)?,
            }
        }

        for wave in self.waves.range(..self.len).map(|(_, wave)| wave) {
            wave.to_writer(&mut bytes)?;
        }

        bytes.resize(total_len, 0);
        Ok(bytes)
    }
}
