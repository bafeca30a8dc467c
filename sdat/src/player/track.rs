//! The bytecode interpreter, one instance per track

use super::{
    channel::{Modulation, Note, Source},
    tables, Pool, Shared,
};
use crate::{
    bytecode::{op, EndOfData, Operands, Stream},
    resource::{Articulation, Range},
};
use tracing::{debug, trace};

/// Nesting depth of calls and loops
pub const STACK_DEPTH: usize = 3;

/// Commands a track may execute in a single tick without waiting before it yields
const COMMAND_LIMIT: usize = 4096;

/// What a track changed during a tick, for the channels playing its notes to pick up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Updates {
    /// The track ran, so note lengths count down
    pub length: bool,
    pub volume: bool,
    pub pan: bool,
    pub timer: bool,
    pub modulation: bool,
}

/// Per-track overrides of the envelope of the instrument, `0xFF` meaning no override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub attack: u8,
    pub decay: u8,
    pub sustain: u8,
    pub release: u8,
}

impl Envelope {
    pub const DEFAULT: u8 = 0xFF;

    /// Fill in the envelope of `range` wherever nothing is overridden
    pub fn resolve(&self, range: &Range) -> Self {
        let pick = |over: u8, base: u8| if over == Self::DEFAULT { base } else { over };

        Self {
            attack: pick(self.attack, range.attack),
            decay: pick(self.decay, range.decay),
            sustain: pick(self.sustain, range.sustain),
            release: pick(self.release, range.release),
        }
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            attack: Self::DEFAULT,
            decay: Self::DEFAULT,
            sustain: Self::DEFAULT,
            release: Self::DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Call,

    /// A loop with the number of passes left, 0 looping forever
    Loop(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    kind: FrameKind,

    /// Where to continue when the frame is done (call) or repeats (loop)
    position: usize,
}

/// A single voice of a sequence
#[derive(Debug, Clone)]
pub struct Track<'a> {
    pub id: usize,
    stream: Stream<'a>,

    pub priority: u8,
    note_wait: bool,
    tie: bool,
    pub portamento: bool,
    ended: bool,

    stack: Vec<Frame>,
    wait: u32,
    patch: u32,

    pub porta_key: u8,
    pub porta_time: u8,
    pub sweep_pitch: i16,

    pub volume: u8,
    pub expression: u8,
    pub pan: i8,
    pub bend_range: u8,
    pub pitch_bend: i8,
    transpose: i8,

    pub envelope: Envelope,
    pub modulation: Modulation,

    /// Result of the last comparison, which decides whether conditional commands run
    condition: bool,

    pub updates: Updates,

    /// Set when the track jumped backwards or looped forever, until the player records it
    pub hit_loop: bool,

    /// Set when the track ended, until the player records it
    pub hit_end: bool,
}

impl<'a> Track<'a> {
    /// A track that starts executing `data` at `start`, in a player of priority
    /// `player_priority`
    pub fn new(id: usize, data: &'a [u8], start: usize, player_priority: u8) -> Self {
        Self {
            id,
            stream: Stream::new(data, start),
            priority: player_priority.wrapping_add(64),
            note_wait: true,
            tie: false,
            portamento: false,
            ended: false,
            stack: Vec::with_capacity(STACK_DEPTH),
            wait: 0,
            patch: 0,
            porta_key: 60,
            porta_time: 0,
            sweep_pitch: 0,
            volume: 64,
            expression: 127,
            pan: 0,
            bend_range: 2,
            pitch_bend: 0,
            transpose: 0,
            envelope: Envelope::default(),
            modulation: Modulation::default(),
            condition: true,
            updates: Updates::default(),
            hit_loop: false,
            hit_end: false,
        }
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn position(&self) -> usize {
        self.stream.position()
    }

    /// Run one tick: count down the current wait, then execute commands until the next one
    pub(crate) fn run(&mut self, shared: &mut Shared<'a>) {
        self.updates.length = true;

        if self.ended {
            return;
        }
        if self.wait > 0 {
            self.wait -= 1;
            if self.wait > 0 {
                return;
            }
        }

        let mut commands = 0;
        while self.wait == 0 && !self.ended {
            if commands == COMMAND_LIMIT {
                trace!(track = self.id, "Yielding after {} commands", COMMAND_LIMIT);
                break;
            }
            commands += 1;

            if let Err(error) = self.step(shared) {
                debug!(track = self.id, "Ending track: {}", error);
                self.end();
            }
        }
    }

    fn end(&mut self) {
        self.ended = true;
        self.hit_end = true;
    }

    fn step(&mut self, shared: &mut Shared<'a>) -> Result<(), EndOfData> {
        let opcode = self.stream.read_u8()?;
        self.execute(opcode, shared)
    }

    fn execute(&mut self, opcode: u8, shared: &mut Shared<'a>) -> Result<(), EndOfData> {
        match opcode {
            op::RANDOM => {
                let (target, extra) = self.prefixed_target()?;
                let min = self.stream.read_s16()?;
                let max = self.stream.read_s16()?;
                let value = shared.random(min, max);
                self.perform(target, extra, Some(value), shared)
            }
            op::FROM_VARIABLE => {
                let (target, extra) = self.prefixed_target()?;
                let index = self.stream.read_u8()?;
                let value = shared.variable(index);
                self.perform(target, extra, Some(value), shared)
            }
            op::IF => {
                if self.condition {
                    let opcode = self.stream.read_u8()?;
                    self.execute(opcode, shared)
                } else {
                    self.stream.skip_command()
                }
            }
            _ => self.perform(opcode, None, None, shared),
        }
    }

    /// Read the command a prefix applies to, with the literal byte notes and variable
    /// commands keep in front of the computed value
    fn prefixed_target(&mut self) -> Result<(u8, Option<u8>), EndOfData> {
        let target = self.stream.read_u8()?;
        let extra = if op::is_note(target) || op::is_variable(target) {
            Some(self.stream.read_u8()?)
        } else {
            None
        };
        Ok((target, extra))
    }

    /// Read the operands of `opcode`, where a computed `value` stands in for the last one
    fn operands(
        &mut self,
        opcode: u8,
        extra: Option<u8>,
        value: Option<i16>,
    ) -> Result<(i32, i32), EndOfData> {
        let stream = &mut self.stream;

        Ok(match (Operands::of(opcode), value) {
            (Operands::Note | Operands::Variable, Some(value)) => {
                (extra.unwrap_or_default() as i32, value as i32)
            }
            (_, Some(value)) => (value as i32, 0),
            (Operands::None | Operands::Prefix, None) => (0, 0),
            (Operands::U8, None) => (stream.read_u8()? as i32, 0),
            (Operands::U16, None) => (stream.read_u16()? as i32, 0),
            (Operands::S16, None) => (stream.read_s16()? as i32, 0),
            (Operands::U24, None) => (u32::from(stream.read_u24()?) as i32, 0),
            (Operands::Vl, None) => (stream.read_vl()? as i32, 0),
            (Operands::Note, None) => (stream.read_u8()? as i32, stream.read_vl()? as i32),
            (Operands::OpenTrack, None) => {
                (stream.read_u8()? as i32, u32::from(stream.read_u24()?) as i32)
            }
            (Operands::Variable, None) => (stream.read_u8()? as i32, stream.read_s16()? as i32),
        })
    }

    fn perform(
        &mut self,
        opcode: u8,
        extra: Option<u8>,
        value: Option<i16>,
        shared: &mut Shared<'a>,
    ) -> Result<(), EndOfData> {
        let (first, second) = self.operands(opcode, extra, value)?;

        match opcode {
            0x00..=0x7F => self.note(opcode, first as u8, second, shared),
            op::REST => self.wait = first.max(0) as u32,
            op::PATCH => self.patch = first.max(0) as u32,

            op::JUMP => {
                self.stream.seek(first as usize);
                self.hit_loop = true;
            }
            op::CALL => {
                if self.stack.len() < STACK_DEPTH {
                    self.stack.push(Frame {
                        kind: FrameKind::Call,
                        position: self.stream.position(),
                    });
                    self.stream.seek(first as usize);
                }
            }
            op::RETURN => {
                if let Some(Frame {
                    kind: FrameKind::Call,
                    position,
                }) = self.stack.last().copied()
                {
                    self.stack.pop();
                    self.stream.seek(position);
                }
            }
            op::LOOP_START => {
                if self.stack.len() < STACK_DEPTH {
                    self.stack.push(Frame {
                        kind: FrameKind::Loop(first as u8),
                        position: self.stream.position(),
                    });
                }
            }
            op::LOOP_END => {
                if let Some(Frame {
                    kind: FrameKind::Loop(count),
                    position,
                }) = self.stack.last_mut()
                {
                    let position = *position;
                    match *count {
                        0 => {
                            self.hit_loop = true;
                            self.stream.seek(position);
                        }
                        1 => {
                            // The last pass still jumps back, the closing LOOP_END falls through
                            self.stack.pop();
                            self.stream.seek(position);
                        }
                        _ => {
                            *count -= 1;
                            self.stream.seek(position);
                        }
                    }
                }
            }
            op::END => self.end(),

            op::PAN => {
                self.pan = (first as u8 as i32 - 64).clamp(-64, 63) as i8;
                self.updates.pan = true;
            }
            op::VOLUME => {
                self.volume = first as u8;
                self.updates.volume = true;
            }
            op::MASTER_VOLUME => {
                shared.master_volume = tables::sustain(first as u8);
                shared.volume_changed = true;
            }
            op::EXPRESSION => {
                self.expression = first as u8;
                self.updates.volume = true;
            }
            op::PRIORITY => self.priority = shared.priority.wrapping_add(first as u8),
            op::NOTE_WAIT => self.note_wait = first != 0,
            op::TIE => {
                self.tie = first != 0;
                self.release_notes(shared);
            }
            op::TEMPO => shared.tempo = first as u16,

            op::TRANSPOSE => self.transpose = first as i8,
            op::PITCH_BEND => {
                self.pitch_bend = first as i8;
                self.updates.timer = true;
            }
            op::BEND_RANGE => {
                self.bend_range = first as u8;
                self.updates.timer = true;
            }

            op::ATTACK => self.envelope.attack = first as u8,
            op::DECAY => self.envelope.decay = first as u8,
            op::SUSTAIN => self.envelope.sustain = first as u8,
            op::RELEASE => self.envelope.release = first as u8,

            op::PORTA_KEY => {
                self.porta_key = (first + self.transpose as i32).clamp(0, 127) as u8;
                self.portamento = true;
            }
            op::PORTA => self.portamento = first != 0,
            op::PORTA_TIME => self.porta_time = first as u8,
            op::SWEEP_PITCH => self.sweep_pitch = first as i16,

            op::MOD_DEPTH | op::MOD_SPEED | op::MOD_TYPE | op::MOD_RANGE | op::MOD_DELAY => {
                let modulation = &mut self.modulation;
                match opcode {
                    op::MOD_DEPTH => modulation.depth = first as u8,
                    op::MOD_SPEED => modulation.speed = first as u8,
                    op::MOD_TYPE => modulation.kind = first as u8,
                    op::MOD_RANGE => modulation.range = first as u8,
                    _ => modulation.delay = first as u16,
                }
                self.updates.modulation = true;
            }

            op::VAR_SET..=op::VAR_RAND => {
                let value = second as i16;
                if let Some(variable) = shared.variables.get(first as usize).copied() {
                    let result = match opcode {
                        op::VAR_SET => Some(value),
                        op::VAR_ADD => Some(variable.wrapping_add(value)),
                        op::VAR_SUB => Some(variable.wrapping_sub(value)),
                        op::VAR_MUL => Some(variable.wrapping_mul(value)),
                        op::VAR_DIV => variable.checked_div(value),
                        op::VAR_SHIFT if value >= 0 => {
                            Some(variable.checked_shl(value as u32).unwrap_or(0))
                        }
                        op::VAR_SHIFT => Some(variable >> value.unsigned_abs().min(15)),
                        _ => Some(shared.random(0, value)),
                    };
                    if let Some(result) = result {
                        shared.variables[first as usize] = result;
                    }
                }
            }
            op::VAR_EQ..=op::VAR_NE => {
                let value = second as i16;
                if let Some(variable) = shared.variables.get(first as usize).copied() {
                    self.condition = match opcode {
                        op::VAR_EQ => variable == value,
                        op::VAR_GE => variable >= value,
                        op::VAR_GT => variable > value,
                        op::VAR_LE => variable <= value,
                        op::VAR_LT => variable < value,
                        _ => variable != value,
                    };
                }
            }
            op::PRINT_VARIABLE => {
                debug!(
                    track = self.id,
                    "Variable {} = {}",
                    first,
                    shared.variable(first as u8)
                );
            }

            // Track setup only matters at the start of a sequence
            _ => {}
        }

        Ok(())
    }

    fn note(&mut self, opcode: u8, velocity: u8, length: i32, shared: &mut Shared<'a>) {
        let key = (opcode as i32 + self.transpose as i32).clamp(0, 127) as u8;
        if self.note_wait {
            self.wait = length.max(0) as u32;
        }
        if shared.instruments.is_none() {
            return;
        }

        let note = Note {
            key,
            velocity,
            length,
        };
        let channel = if self.tie {
            self.tie_note(note, shared)
        } else {
            self.note_on(note, shared)
        };

        if channel.is_none() {
            trace!(track = self.id, key, patch = self.patch, "Note dropped");
        }
    }

    /// Start a note on a newly allocated channel, returning the channel
    pub(crate) fn note_on(&mut self, note: Note, shared: &mut Shared<'a>) -> Option<usize> {
        let instruments = shared.instruments?;
        let instrument = instruments.bank.instruments.get(self.patch as usize)?;
        let range = instrument.range_for_key(note.key)?;

        let (pool, source) = match range.articulation()? {
            Articulation::PsgTone => (Pool::Psg, Source::Square((range.wave & 7) as u8)),
            Articulation::PsgNoise => (Pool::Noise, Source::Noise),
            Articulation::Pcm | Articulation::Direct(_) => {
                (Pool::Pcm, Source::Pcm(instruments.wave(range)?))
            }
        };

        let id = shared.allocate(pool, self.priority)?;
        let base_volume = shared.base_volume();
        shared.channels[id].start(source, range, self, note, base_volume);
        self.porta_key = note.key;

        Some(id)
    }

    /// Change the key of the note this track is holding, or start a held one
    fn tie_note(&mut self, note: Note, shared: &mut Shared<'a>) -> Option<usize> {
        let held = shared
            .channels
            .iter()
            .position(|channel| channel.holds_note_of(self.id));

        match held {
            Some(id) => {
                let base_volume = shared.base_volume();
                shared.channels[id].retrigger(self, note.key, note.velocity, base_volume);
                self.porta_key = note.key;
                Some(id)
            }
            None => self.note_on(Note { length: -1, ..note }, shared),
        }
    }

    fn release_notes(&self, shared: &mut Shared<'a>) {
        for channel in shared.channels.iter_mut() {
            if channel.holds_note_of(self.id) {
                channel.release();
            }
        }
    }
}
