//! Hardware channels and their envelopes

use super::{
    tables::{self, AMPLITUDE_SILENCE, SILENCE, TUNE_PER_SEMITONE},
    track::Track,
    TICK_CYCLES,
};
use crate::resource::{Range, Wave};

/// Where a channel is in the life of a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ChannelState {
    #[default]
    None,
    Start,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// What a channel plays
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
    Pcm(&'a Wave),

    /// A square wave with a duty cycle
    Square(u8),

    Noise,
}

impl Source<'_> {
    /// The timer of PSG sources, which plays A4 (key 69) at 8 steps per period
    pub const PSG_TIMER: u16 = (0x100_0000 / (440 * 8)) as u16;

    /// The key PSG sources play at their native timer
    pub const PSG_KEY: u8 = 69;
}

/// A note to start on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    pub key: u8,
    pub velocity: u8,

    /// Ticks until the note is released, negative to hold it
    pub length: i32,
}

/// Modulation (vibrato, tremolo or auto-pan) settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modulation {
    /// 0 modulates pitch, 1 volume and 2 pan
    pub kind: u8,
    pub speed: u8,
    pub depth: u8,
    pub range: u8,

    /// Updates to wait after a note starts
    pub delay: u16,
}

impl Default for Modulation {
    fn default() -> Self {
        Self {
            kind: 0,
            speed: 16,
            depth: 0,
            range: 1,
            delay: 10,
        }
    }
}

/// The sound registers of a channel, as the mixer sees them
#[derive(Debug, Clone, Default)]
struct Registers<'a> {
    source: Option<Source<'a>>,
    volume: u8,
    divider: u8,
    pan: u8,

    /// Position in samples, negative while the hardware is still starting up
    position: f64,

    /// Samples advanced per tick
    increase: f64,

    noise: u16,
    noise_sample: i16,
    noise_position: u32,
}

/// One of the 16 hardware channels
#[derive(Debug, Clone)]
pub struct Channel<'a> {
    pub id: usize,
    pub state: ChannelState,

    /// The track that started the current note
    pub track: Option<usize>,
    pub priority: u8,

    /// Ticks left until the note is released, negative when it is held until released
    pub note_length: i32,

    /// Effective hardware volume, used to pick a channel to steal
    pub volume: u16,

    source: Option<Source<'a>>,
    timer: u16,

    update_volume: bool,
    update_pan: bool,
    update_timer: bool,

    key: u8,
    base_key: u8,
    velocity: i16,
    pan: i8,

    /// Volume of the track, in tenths of a decibel
    track_volume: i16,
    track_pan: i8,

    /// Tuning from key and pitch bend, in 64ths of a semitone
    tune: i32,

    /// Envelope amplitude, with 7 fractional bits
    amplitude: i32,

    modulation: Modulation,
    modulation_delay: u16,
    modulation_counter: u16,

    sweep_pitch: i16,
    sweep_length: u32,
    sweep_count: u32,
    manual_sweep: bool,

    attack: u8,
    decay: u16,
    sustain: u8,
    release: u16,

    registers: Registers<'a>,
}

impl<'a> Channel<'a> {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            state: ChannelState::None,
            track: None,
            priority: 0,
            note_length: -1,
            volume: 0,
            source: None,
            timer: 0,
            update_volume: false,
            update_pan: false,
            update_timer: false,
            key: 0,
            base_key: 0,
            velocity: 0,
            pan: 0,
            track_volume: 0,
            track_pan: 0,
            tune: 0,
            amplitude: AMPLITUDE_SILENCE,
            modulation: Modulation::default(),
            modulation_delay: 0,
            modulation_counter: 0,
            sweep_pitch: 0,
            sweep_length: 0,
            sweep_count: 0,
            manual_sweep: false,
            attack: 0,
            decay: 0,
            sustain: 0,
            release: 0,
            registers: Registers::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state != ChannelState::None
    }

    /// Whether this channel holds a note of `track` that has not been released yet
    pub fn holds_note_of(&self, track: usize) -> bool {
        self.is_active() && self.track == Some(track) && self.state != ChannelState::Release
    }

    /// Claim the channel for a new note
    pub fn claim(&mut self) {
        self.note_length = -1;
        self.volume = 0;
    }

    /// Start a note, with the envelope of `range` unless `track` overrides it
    pub fn start(
        &mut self,
        source: Source<'a>,
        range: &Range,
        track: &Track,
        note: Note,
        base_volume: i16,
    ) {
        self.source = Some(source);
        self.timer = match source {
            Source::Pcm(wave) => wave.timer,
            Source::Square(_) | Source::Noise => Source::PSG_TIMER,
        };
        self.registers.position = match source {
            Source::Pcm(_) => -3.0,
            Source::Square(_) | Source::Noise => -1.0,
        };
        self.registers.noise = 0x7FFF;
        self.registers.increase = 0.0;

        self.state = ChannelState::Start;
        self.track = Some(track.id);
        self.clear_updates();
        self.priority = track.priority;
        self.key = note.key;
        self.base_key = match source {
            Source::Pcm(_) => range.base_note,
            Source::Square(_) | Source::Noise => Source::PSG_KEY,
        };
        self.velocity = tables::sustain(note.velocity);
        self.pan = (range.pan as i32 - 64).clamp(-64, 63) as i8;
        self.modulation_delay = 0;
        self.modulation_counter = 0;
        self.note_length = note.length;

        let envelope = track.envelope.resolve(range);
        self.attack = tables::attack(envelope.attack);
        self.decay = tables::fall(envelope.decay);
        self.sustain = envelope.sustain;
        self.release = tables::fall(envelope.release);

        self.follow_volume(track, base_volume);
        self.follow_pan(track);
        self.follow_tune(track);
        self.follow_modulation(track);
        self.follow_portamento(track);
    }

    /// Play a new key on a note that is already sounding
    pub fn retrigger(&mut self, track: &Track, key: u8, velocity: u8, base_volume: i16) {
        self.clear_updates();
        self.priority = track.priority;
        self.key = key;
        self.velocity = tables::sustain(velocity);
        self.modulation_delay = 0;
        self.modulation_counter = 0;

        self.follow_volume(track, base_volume);
        self.follow_tune(track);
        self.follow_modulation(track);
        self.follow_portamento(track);

        self.update_timer = true;
    }

    pub fn release(&mut self) {
        self.note_length = -1;
        self.priority = 1;
        self.state = ChannelState::Release;
    }

    pub fn kill(&mut self) {
        self.state = ChannelState::None;
        self.track = None;
        self.priority = 0;
        self.volume = 0;
        self.note_length = -1;
        self.registers = Registers::default();
    }

    fn clear_updates(&mut self) {
        self.update_volume = false;
        self.update_pan = false;
        self.update_timer = false;
    }

    /// Take over the volume of `track`, on top of the player's master and sequence volume
    fn follow_volume(&mut self, track: &Track, base_volume: i16) {
        let volume = base_volume as i32
            + tables::sustain(track.volume) as i32
            + tables::sustain(track.expression) as i32;
        self.track_volume = volume.max(SILENCE) as i16;
    }

    fn follow_pan(&mut self, track: &Track) {
        self.track_pan = track.pan;
    }

    fn follow_tune(&mut self, track: &Track) {
        let key = (self.key as i32 - self.base_key as i32) * TUNE_PER_SEMITONE;
        let bend = (track.pitch_bend as i32 * track.bend_range as i32) >> 1;
        self.tune = key + bend;
    }

    fn follow_modulation(&mut self, track: &Track) {
        self.modulation = track.modulation;
    }

    fn follow_portamento(&mut self, track: &Track) {
        self.manual_sweep = false;
        self.sweep_pitch = track.sweep_pitch;
        self.sweep_count = 0;

        if !track.portamento {
            self.sweep_length = 0;
            return;
        }

        let distance = (track.porta_key as i32 - self.key as i32) << 22;
        self.sweep_pitch = self.sweep_pitch.wrapping_add((distance >> 16) as i16);

        if track.porta_time == 0 {
            self.sweep_length = self.note_length as u32;
            self.manual_sweep = true;
        } else {
            let time = track.porta_time as u32 * track.porta_time as u32;
            self.sweep_length = (self.sweep_pitch.unsigned_abs() as u32 * time) >> 11;
        }
    }

    /// Follow the changes `track` made during the last tick
    pub fn follow_track(&mut self, track: &Track, base_volume: i16) {
        let updates = track.updates;

        if updates.length && self.state > ChannelState::Start {
            if self.state < ChannelState::Release {
                self.note_length = self.note_length.wrapping_sub(1);
                if self.note_length == 0 {
                    self.release();
                }
            }
            if self.manual_sweep && self.sweep_count < self.sweep_length {
                self.sweep_count += 1;
            }
        }
        if updates.volume {
            self.follow_volume(track, base_volume);
            self.update_volume = true;
        }
        if updates.pan {
            self.follow_pan(track);
            self.update_pan = true;
        }
        if updates.timer {
            self.follow_tune(track);
            self.update_timer = true;
        }
        if updates.modulation {
            let kind = self.modulation.kind;
            self.follow_modulation(track);
            if kind != self.modulation.kind {
                self.update_volume = true;
                self.update_pan = true;
                self.update_timer = true;
            }
        }
    }

    /// Advance the envelope and modulation by one tick and refresh the registers
    pub fn update(&mut self) {
        let in_start = self.state == ChannelState::Start;
        let in_sustain = self.state == ChannelState::Sustain;
        let sweeping =
            self.sweep_pitch != 0 && self.sweep_length != 0 && self.sweep_count <= self.sweep_length;

        let mut modulating = self.modulation.depth != 0;
        let mut update_volume = self.update_volume || !in_sustain;
        let mut update_pan = self.update_pan || in_start;
        let mut update_timer = self.update_timer || in_start || sweeping;

        match self.state {
            ChannelState::None => return,
            ChannelState::Start => {
                self.registers.source = self.source;
                self.amplitude = AMPLITUDE_SILENCE;
                self.state = ChannelState::Attack;
                self.attack_step();
            }
            ChannelState::Attack => self.attack_step(),
            ChannelState::Decay => {
                self.amplitude -= self.decay as i32;
                let sustain = (tables::sustain(self.sustain) as i32) << 7;
                if self.amplitude <= sustain {
                    self.amplitude = sustain;
                    self.state = ChannelState::Sustain;
                }
            }
            ChannelState::Sustain => {}
            ChannelState::Release => {
                self.amplitude -= self.release as i32;
                if self.amplitude <= AMPLITUDE_SILENCE {
                    self.kill();
                    return;
                }
            }
        }

        if modulating && self.modulation_delay < self.modulation.delay {
            self.modulation_delay += 1;
            modulating = false;
        }

        let mut offset = 0;
        if modulating {
            match self.modulation.kind {
                0 => update_timer = true,
                1 => update_volume = true,
                2 => update_pan = true,
                _ => {}
            }

            let phase = (self.modulation_counter >> 8) as u8;
            let depth = tables::sine(phase)
                * self.modulation.range as i32
                * self.modulation.depth as i32;
            offset = if self.modulation.kind == 1 {
                ((depth as i64 * 60) >> 14) as i32
            } else {
                depth >> 8
            };

            let speed = (self.modulation.speed as u16) << 6;
            let advanced = self.modulation_counter.wrapping_add(speed);
            let phase = (advanced >> 8) % 0x80;
            self.modulation_counter = (advanced & 0xFF) | (phase << 8);
        }

        if update_timer {
            let mut pitch = self.tune;
            if modulating && self.modulation.kind == 0 {
                pitch += offset;
            }
            if sweeping {
                let remaining = self.sweep_length as i64 - self.sweep_count as i64;
                pitch += (self.sweep_pitch as i64 * remaining / self.sweep_length as i64) as i32;
                if !self.manual_sweep {
                    self.sweep_count += 1;
                }
            }

            let timer = if pitch != 0 {
                tables::adjust_timer(self.timer, pitch)
            } else {
                self.timer
            };
            self.registers.increase = TICK_CYCLES as f64 / (2.0 * timer.max(1) as f64);
            self.update_timer = false;
        }

        if update_volume {
            let mut level = (self.amplitude >> 7) + self.track_volume as i32 + self.velocity as i32;
            if modulating && self.modulation.kind == 1 {
                level += offset;
            }

            let (volume, divider) = tables::volume(level - SILENCE);
            self.registers.volume = volume;
            self.registers.divider = divider;
            self.volume = ((volume as u16) << 4) >> tables::divider_shift(divider);
            self.update_volume = false;
        }

        if update_pan {
            let mut pan = self.pan as i32 + self.track_pan as i32;
            if modulating && self.modulation.kind == 2 {
                pan += offset;
            }
            self.registers.pan = (pan + 64).clamp(0, 127) as u8;
            self.update_pan = false;
        }
    }

    fn attack_step(&mut self) {
        let previous = self.amplitude >> 7;
        let mut amplitude = self.amplitude;
        loop {
            amplitude = amplitude * self.attack as i32 / 256;
            if amplitude >> 7 != previous {
                break;
            }
        }

        self.amplitude = amplitude;
        if amplitude == 0 {
            self.state = ChannelState::Decay;
        }
    }

    /// Produce the current sample and advance to the next one, returning the left and right
    /// output
    pub fn mix(&mut self) -> (i32, i32) {
        let sample = self.sample();
        self.advance();

        let scaled = tables::mul_div7(sample, self.registers.volume)
            >> tables::divider_shift(self.registers.divider);
        let pan = self.registers.pan;

        (
            tables::mul_div7(scaled, 127 - pan),
            tables::mul_div7(scaled, pan),
        )
    }

    fn sample(&mut self) -> i32 {
        let registers = &mut self.registers;
        if registers.position < 0.0 {
            return 0;
        }
        let position = registers.position as u32;

        match registers.source {
            None => 0,
            Some(Source::Pcm(wave)) => wave
                .samples()
                .get(position as usize)
                .copied()
                .unwrap_or_default() as i32,
            Some(Source::Square(duty)) => tables::square(duty, position) as i32,
            Some(Source::Noise) => {
                while registers.noise_position < position {
                    if registers.noise & 1 != 0 {
                        registers.noise = (registers.noise >> 1) ^ 0x6000;
                        registers.noise_sample = -0x7FFF;
                    } else {
                        registers.noise >>= 1;
                        registers.noise_sample = 0x7FFF;
                    }
                    registers.noise_position += 1;
                }
                registers.noise_sample as i32
            }
        }
    }

    fn advance(&mut self) {
        let mut position = self.registers.position + self.registers.increase;

        if let Some(Source::Pcm(wave)) = self.registers.source {
            let start = wave.loop_start() as f64;
            let length = wave.loop_length() as f64;

            if self.registers.position >= 0.0 && position >= start + length {
                if wave.looped && length > 0.0 {
                    position = start + (position - start) % length;
                } else {
                    self.kill();
                    return;
                }
            }
        }

        self.registers.position = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pcm_range, pcm_wave};

    fn track() -> Track<'static> {
        Track::new(0, &[], 0, 0)
    }

    fn started<'a>(source: Source<'a>, range: &Range) -> Channel<'a> {
        let mut channel = Channel::new(4);
        let note = Note {
            key: 60,
            velocity: 127,
            length: 10,
        };
        channel.start(source, range, &track(), note, 0);
        channel
    }

    #[test]
    fn envelope_runs_through_every_state() {
        let mut range = pcm_range(0, 0);
        range.attack = 0x7F;
        range.decay = 0x7F;
        range.sustain = 64;
        range.release = 0x7F;

        let mut channel = started(Source::Square(3), &range);
        assert_eq!(channel.state, ChannelState::Start);

        // Instant attack
        channel.update();
        assert_eq!(channel.state, ChannelState::Decay);

        channel.update();
        assert_eq!(channel.state, ChannelState::Sustain);
        assert_eq!(channel.amplitude, (tables::sustain(64) as i32) << 7);

        channel.release();
        channel.update();
        assert_eq!(channel.state, ChannelState::Release);
        channel.update();
        assert_eq!(channel.state, ChannelState::None);
        assert_eq!(channel.track, None);
    }

    #[test]
    fn slow_attack_takes_several_updates() {
        let mut range = pcm_range(0, 0);
        range.attack = 0x40;

        let mut channel = started(Source::Square(3), &range);
        channel.update();
        assert_eq!(channel.state, ChannelState::Attack);

        let mut updates = 1;
        while channel.state == ChannelState::Attack {
            channel.update();
            updates += 1;
        }
        assert!(updates > 10);
        assert_eq!(channel.amplitude, 0);
    }

    #[test]
    fn note_length_releases() {
        let range = pcm_range(0, 0);
        let mut channel = started(Source::Square(3), &range);
        channel.update();

        let mut track = track();
        track.updates.length = true;
        for _ in 0..9 {
            channel.follow_track(&track, 0);
        }
        assert_ne!(channel.state, ChannelState::Release);

        channel.follow_track(&track, 0);
        assert_eq!(channel.state, ChannelState::Release);
        assert_eq!(channel.priority, 1);
    }

    #[test]
    fn one_shot_waves_stop() {
        let wave = pcm_wave(&[0x40; 8]);
        let range = pcm_range(0, 0);
        let mut channel = started(Source::Pcm(&wave), &range);
        channel.update();

        let mut heard = false;
        for _ in 0..100 {
            let (left, right) = channel.mix();
            heard |= left != 0 || right != 0;
            if !channel.is_active() {
                break;
            }
        }

        assert!(heard);
        assert!(!channel.is_active());
    }

    #[test]
    fn looped_waves_keep_playing() {
        let mut wave = pcm_wave(&[0x40; 8]);
        wave.looped = true;
        let range = pcm_range(0, 0);
        let mut channel = started(Source::Pcm(&wave), &range);
        channel.update();

        for _ in 0..1000 {
            channel.mix();
        }
        assert!(channel.is_active());
    }

    #[test]
    fn noise_is_not_silent() {
        let range = pcm_range(0, 0);
        let mut channel = started(Source::Noise, &range);
        channel.update();

        let samples: Vec<_> = (0..16).map(|_| channel.mix().0).collect();
        assert!(samples.iter().any(|sample| *sample != 0));
    }

    #[test]
    fn pan_follows_range_and_track() {
        let mut range = pcm_range(0, 0);
        range.pan = 127;
        let mut channel = started(Source::Square(3), &range);
        channel.update();
        assert_eq!(channel.registers.pan, 127);

        range.pan = 0;
        let mut channel = started(Source::Square(3), &range);
        channel.update();
        assert_eq!(channel.registers.pan, 0);
    }
}
