//! Single sampled waves (`SWAV`), as embedded in a wave archive

use super::{adpcm, ResourceError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// The sample encoding of a [`Wave`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveFormat {
    Pcm8,
    Pcm16,
    Adpcm,
}

impl WaveFormat {
    pub fn from_byte(byte: u8) -> Result<Self, ResourceError> {
        match byte {
            0 => Ok(Self::Pcm8),
            1 => Ok(Self::Pcm16),
            2 => Ok(Self::Adpcm),
            other => Err(ResourceError::WaveFormat(other)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Pcm8 => 0,
            Self::Pcm16 => 1,
            Self::Adpcm => 2,
        }
    }

    /// How many samples a 32-bit word holds
    fn samples_per_word(self) -> u32 {
        match self {
            Self::Pcm8 => 4,
            Self::Pcm16 => 2,
            Self::Adpcm => 8,
        }
    }
}

/// A sampled wave and its loop metadata
///
/// Loop offset and length are stored the way the hardware expects them, in 32-bit words.
/// Use [`Wave::loop_start()`] and [`Wave::loop_length()`] for positions in samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    pub format: WaveFormat,
    pub looped: bool,
    pub sample_rate: u16,

    /// The hardware timer value that plays the wave at its native rate
    pub timer: u16,

    /// Start of the loop, in words from the start of the data
    pub loop_offset: u16,

    /// Length of the data after the loop start, in words
    pub non_loop_length: u32,

    /// The encoded sample data, exactly as stored
    pub raw: Vec<u8>,

    samples: Vec<i16>,
}

impl Wave {
    /// The number of bytes in front of the sample data
    pub const INFO_LEN: usize = 12;

    pub fn new(
        format: WaveFormat,
        looped: bool,
        sample_rate: u16,
        timer: u16,
        loop_offset: u16,
        raw: Vec<u8>,
    ) -> Self {
        let non_loop_length = (raw.len() as u32 / 4).saturating_sub(loop_offset as u32);
        let samples = decode_samples(format, &raw);

        Self {
            format,
            looped,
            sample_rate,
            timer,
            loop_offset,
            non_loop_length,
            raw,
            samples,
        }
    }

    pub fn from_reader<R>(mut reader: R) -> Result<Self, ResourceError>
    where
        R: Read,
    {
        let format = WaveFormat::from_byte(reader.read_u8()?)?;
        let looped = reader.read_u8()? != 0;
        let sample_rate = reader.read_u16::<LittleEndian>()?;
        let timer = reader.read_u16::<LittleEndian>()?;
        let loop_offset = reader.read_u16::<LittleEndian>()?;
        let non_loop_length = reader.read_u32::<LittleEndian>()?;

        let len = (loop_offset as usize + non_loop_length as usize) * 4;
        let mut raw = vec![0; len];
        reader.read_exact(&mut raw)?;

        let samples = decode_samples(format, &raw);

        Ok(Self {
            format,
            looped,
            sample_rate,
            timer,
            loop_offset,
            non_loop_length,
            raw,
            samples,
        })
    }

    pub fn to_writer<W>(&self, mut writer: W) -> io::Result<()>
    where
        W: Write,
    {
        writer.write_u8(self.format.to_byte())?;
        writer.write_u8(self.looped as u8)?;
        writer.write_u16::<LittleEndian>(self.sample_rate)?;
        writer.write_u16::<LittleEndian>(self.timer)?;
        writer.write_u16::<LittleEndian>(self.loop_offset)?;
        writer.write_u32::<LittleEndian>(self.non_loop_length)?;
        writer.write_all(&self.raw)
    }

    /// The number of bytes [`Wave::to_writer()`] emits
    pub fn encoded_len(&self) -> usize {
        Self::INFO_LEN + self.raw.len()
    }

    /// The decoded samples, scaled to 16 bits
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// The sample at which playback jumps back to when looping
    pub fn loop_start(&self) -> u32 {
        match self.format {
            // The ADPCM header occupies the first word
            WaveFormat::Adpcm => (self.loop_offset as u32).saturating_sub(1) * 8,
            format => self.loop_offset as u32 * format.samples_per_word(),
        }
    }

    /// The number of samples from the loop start to the end of the wave
    pub fn loop_length(&self) -> u32 {
        self.non_loop_length * self.format.samples_per_word()
    }
}

fn decode_samples(format: WaveFormat, raw: &[u8]) -> Vec<i16> {
    match format {
        WaveFormat::Pcm8 => raw.iter().map(|byte| ((*byte as i8) as i16) << 8).collect(),
        WaveFormat::Pcm16 => raw
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect(),
        WaveFormat::Adpcm => adpcm::decode(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn pcm8() {
        let wave = Wave::new(WaveFormat::Pcm8, true, 8000, 0xF7C0, 1, vec![0x7F, 0x80, 0, 1, 2, 3, 4, 5]);
        assert_eq!(wave.samples()[..3], [0x7F00, -0x8000, 0]);
        assert_eq!(wave.non_loop_length, 1);
        assert_eq!(wave.loop_start(), 4);
        assert_eq!(wave.loop_length(), 4);
    }

    #[test]
    fn pcm16() {
        let wave = Wave::new(WaveFormat::Pcm16, false, 0, 0, 0, vec![0x34, 0x12, 0xFF, 0xFF]);
        assert_eq!(wave.samples(), &[0x1234, -1]);
        assert_eq!(wave.loop_length(), 2);
    }

    #[test]
    fn adpcm() {
        let wave = Wave::new(WaveFormat::Adpcm, true, 0, 0, 1, vec![0; 12]);
        assert_eq!(wave.samples().len(), 16);
        assert_eq!(wave.loop_start(), 0);
        assert_eq!(wave.loop_length(), 16);
    }

    #[test]
    fn read_write() {
        let wave = Wave::new(WaveFormat::Pcm8, true, 16384, 0xFC00, 0, vec![1, 2, 3, 4]);

        let mut bytes = Vec::new();
        wave.to_writer(&mut bytes).unwrap();
        assert_eq!(bytes.len(), wave.encoded_len());

        assert_eq!(Wave::from_reader(Cursor::new(&bytes)).unwrap(), wave);
    }

    #[test]
    fn unknown_format() {
        let bytes = [3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            Wave::from_reader(Cursor::new(&bytes)),
            Err(ResourceError::WaveFormat(3))
        ));
    }
}
