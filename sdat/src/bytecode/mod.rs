//! The sequence bytecode: opcodes, operand decoding and command lengths
//!
//! A sequence body is a flat stream of commands. Every command starts with an opcode byte,
//! followed by operands that are either fixed width little-endian integers or variable
//! length (VL) integers, seven bits per byte with the high bit set on all but the last.
//!
//! Branches ([`op::OPEN_TRACK`], [`op::JUMP`], [`op::CALL`]) take an absolute 24-bit offset
//! into the bytecode.

pub mod patches;

pub use patches::{scan_patches, splice, PatchScan, PatchSite, SpliceError};

use thiserror::Error;
use ux::u24;

/// Opcode bytes
pub mod op {
    /// Every opcode below this one is a note-on, where the opcode is the key
    pub const NOTE_END: u8 = 0x80;

    pub const REST: u8 = 0x80;
    pub const PATCH: u8 = 0x81;
    pub const OPEN_TRACK: u8 = 0x93;
    pub const JUMP: u8 = 0x94;
    pub const CALL: u8 = 0x95;

    pub const RANDOM: u8 = 0xA0;
    pub const FROM_VARIABLE: u8 = 0xA1;
    pub const IF: u8 = 0xA2;

    pub const VAR_SET: u8 = 0xB0;
    pub const VAR_ADD: u8 = 0xB1;
    pub const VAR_SUB: u8 = 0xB2;
    pub const VAR_MUL: u8 = 0xB3;
    pub const VAR_DIV: u8 = 0xB4;
    pub const VAR_SHIFT: u8 = 0xB5;
    pub const VAR_RAND: u8 = 0xB6;
    pub const VAR_EQ: u8 = 0xB8;
    pub const VAR_GE: u8 = 0xB9;
    pub const VAR_GT: u8 = 0xBA;
    pub const VAR_LE: u8 = 0xBB;
    pub const VAR_LT: u8 = 0xBC;
    pub const VAR_NE: u8 = 0xBD;

    pub const PAN: u8 = 0xC0;
    pub const VOLUME: u8 = 0xC1;
    pub const MASTER_VOLUME: u8 = 0xC2;
    pub const TRANSPOSE: u8 = 0xC3;
    pub const PITCH_BEND: u8 = 0xC4;
    pub const BEND_RANGE: u8 = 0xC5;
    pub const PRIORITY: u8 = 0xC6;
    pub const NOTE_WAIT: u8 = 0xC7;
    pub const TIE: u8 = 0xC8;
    pub const PORTA_KEY: u8 = 0xC9;
    pub const MOD_DEPTH: u8 = 0xCA;
    pub const MOD_SPEED: u8 = 0xCB;
    pub const MOD_TYPE: u8 = 0xCC;
    pub const MOD_RANGE: u8 = 0xCD;
    pub const PORTA: u8 = 0xCE;
    pub const PORTA_TIME: u8 = 0xCF;

    pub const ATTACK: u8 = 0xD0;
    pub const DECAY: u8 = 0xD1;
    pub const SUSTAIN: u8 = 0xD2;
    pub const RELEASE: u8 = 0xD3;
    pub const LOOP_START: u8 = 0xD4;
    pub const EXPRESSION: u8 = 0xD5;
    pub const PRINT_VARIABLE: u8 = 0xD6;

    pub const MOD_DELAY: u8 = 0xE0;
    pub const TEMPO: u8 = 0xE1;
    pub const SWEEP_PITCH: u8 = 0xE3;

    pub const LOOP_END: u8 = 0xFC;
    pub const RETURN: u8 = 0xFD;
    pub const ALLOCATE_TRACKS: u8 = 0xFE;
    pub const END: u8 = 0xFF;

    /// Whether `op` is a note-on
    pub fn is_note(op: u8) -> bool {
        op < NOTE_END
    }

    /// Whether `op` operates on a variable, taking a variable index in front of its value
    pub fn is_variable(op: u8) -> bool {
        (VAR_SET..=VAR_NE).contains(&op)
    }
}

/// The shape of the operands following an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    None,
    U8,
    U16,
    S16,
    U24,
    Vl,

    /// Velocity `u8` followed by a VL duration
    Note,

    /// Track `u8` followed by a `u24` offset
    OpenTrack,

    /// Variable index `u8` followed by an `s16` value
    Variable,

    /// A prefix, whose operands depend on the command it modifies
    Prefix,
}

impl Operands {
    /// Look up the operand shape of an opcode
    ///
    /// Unassigned opcodes have no operands.
    pub fn of(op: u8) -> Self {
        use op::*;

        match op {
            0x00..=0x7F => Self::Note,
            REST | PATCH => Self::Vl,
            OPEN_TRACK => Self::OpenTrack,
            JUMP | CALL => Self::U24,
            RANDOM | FROM_VARIABLE | IF => Self::Prefix,
            VAR_SET..=VAR_NE => Self::Variable,
            PAN..=PORTA_TIME | ATTACK..=PRINT_VARIABLE => Self::U8,
            MOD_DELAY | TEMPO | ALLOCATE_TRACKS => Self::U16,
            SWEEP_PITCH => Self::S16,
            _ => Self::None,
        }
    }
}

/// A read ran past the end of the bytecode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("The bytecode ends in the middle of a command (at {position:#x})")]
pub struct EndOfData {
    pub position: usize,
}

/// A read cursor over bytecode
#[derive(Debug, Clone)]
pub struct Stream<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Stream<'a> {
    /// The longest VL integer the hardware decodes
    pub const MAX_VL_LEN: usize = 4;

    pub fn new(data: &'a [u8], position: usize) -> Self {
        Self { data, position }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    pub fn at_end(&self) -> bool {
        self.position >= self.data.len()
    }

    pub fn read_u8(&mut self) -> Result<u8, EndOfData> {
        let byte = self.data.get(self.position).copied().ok_or(EndOfData {
            position: self.position,
        })?;
        self.position += 1;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> Result<u16, EndOfData> {
        let low = self.read_u8()?;
        let high = self.read_u8()?;
        Ok(u16::from_le_bytes([low, high]))
    }

    pub fn read_s16(&mut self) -> Result<i16, EndOfData> {
        self.read_u16().map(|value| value as i16)
    }

    pub fn read_u24(&mut self) -> Result<u24, EndOfData> {
        let bytes = [self.read_u8()?, self.read_u8()?, self.read_u8()?];
        Ok(u24::new(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])))
    }

    /// Read a variable length integer
    pub fn read_vl(&mut self) -> Result<u32, EndOfData> {
        let mut value = 0;
        for _ in 0..Self::MAX_VL_LEN {
            let byte = self.read_u8()?;
            value = (value << 7) | (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(value)
    }

    /// Skip the operands of `op`, which has just been read
    pub fn skip_operands(&mut self, op: u8) -> Result<(), EndOfData> {
        match Operands::of(op) {
            Operands::None => {}
            Operands::U8 => {
                self.read_u8()?;
            }
            Operands::U16 | Operands::S16 => {
                self.read_u16()?;
            }
            Operands::U24 => {
                self.read_u24()?;
            }
            Operands::Vl => {
                self.read_vl()?;
            }
            Operands::Note => {
                self.read_u8()?;
                self.read_vl()?;
            }
            Operands::OpenTrack => {
                self.read_u8()?;
                self.read_u24()?;
            }
            Operands::Variable => {
                self.read_u8()?;
                self.read_u16()?;
            }
            Operands::Prefix => self.skip_prefixed(op)?,
        }
        Ok(())
    }

    /// Skip a whole command, prefixes included
    pub fn skip_command(&mut self) -> Result<(), EndOfData> {
        let op = self.read_u8()?;
        self.skip_operands(op)
    }

    fn skip_prefixed(&mut self, prefix: u8) -> Result<(), EndOfData> {
        match prefix {
            op::IF => self.skip_command(),
            _ => {
                let target = self.read_u8()?;
                if op::is_note(target) || op::is_variable(target) {
                    self.read_u8()?;
                }
                match prefix {
                    op::RANDOM => {
                        self.read_s16()?;
                        self.read_s16()?;
                    }
                    _ => {
                        self.read_u8()?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// The length in bytes of the command starting at `position`
pub fn command_len(data: &[u8], position: usize) -> Result<usize, EndOfData> {
    let mut stream = Stream::new(data, position);
    stream.skip_command()?;
    Ok(stream.position() - position)
}

/// Encode `value` as a VL integer, using as few bytes as possible
pub fn encode_vl(value: u32) -> Vec<u8> {
    let mut bytes = vec![(value & 0x7F) as u8];
    let mut rest = value >> 7;
    while rest != 0 {
        bytes.push((rest & 0x7F) as u8 | 0x80);
        rest >>= 7;
    }
    bytes.reverse();
    bytes
}
