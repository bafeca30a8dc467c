//! A headless player for sequences, used to measure how long they play
//!
//! The player runs the sequence driver at its native tick rate without producing audio
//! output. While timing, only the bytecode runs and every track records when it loops or
//! ends. When instruments are attached, notes are started on the 16 hardware channels and
//! mixed, so trailing silence can be detected.

pub mod channel;
pub mod length;
pub mod tables;
pub mod track;

pub use length::{
    format_seconds, sequence_length, timing_tags, Length, LengthError, LengthKind,
    LengthOptions, TimingOptions,
};

use crate::{
    bytecode::{op, Stream},
    resource::{Bank, Range, Wave, WaveArchive},
};
use channel::Channel;
use rand::{rngs::StdRng, Rng, SeedableRng};
use track::Track;

/// Clock rate of the sound processor
pub const ARM7_CLOCK: u32 = 33_513_982;

/// Processor cycles in a single tick of the sequence driver
pub const TICK_CYCLES: u32 = 64 * 2728;

/// Duration of a single tick in seconds
pub const SECONDS_PER_TICK: f64 = TICK_CYCLES as f64 / ARM7_CLOCK as f64;

/// The tempo counter advances the tracks whenever it passes this threshold
pub const TEMPO_THRESHOLD: u32 = 240;

/// Playback rate, where 0x100 is normal speed
pub const TEMPO_RATE: u32 = 0x100;

pub const MAX_TRACKS: usize = 16;
pub const CHANNELS: usize = 16;
pub const VARIABLES: usize = 32;

/// The seed used for random commands unless another one is set
pub const DEFAULT_SEED: u64 = 0x5D47_5D47;

/// The bank and wave archives notes are played with
#[derive(Debug, Clone, Copy)]
pub struct Instruments<'a> {
    pub bank: &'a Bank,
    pub wave_archives: [Option<&'a WaveArchive>; 4],
}

impl<'a> Instruments<'a> {
    /// The wave a PCM range plays, if it is loaded
    pub fn wave(&self, range: &Range) -> Option<&'a Wave> {
        let wave_archive = self
            .wave_archives
            .get(range.wave_archive as usize)
            .copied()
            .flatten()?;
        wave_archive.wave(range.wave as u32)
    }
}

/// The kinds of channels notes can be allocated on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Pcm,
    Psg,
    Noise,
}

impl Pool {
    /// Channels in the order they are considered for allocation
    pub fn channels(self) -> &'static [usize] {
        match self {
            Pool::Pcm => &[4, 5, 6, 7, 2, 0, 3, 1, 8, 9, 10, 11, 14, 12, 15, 13],
            Pool::Psg => &[13, 12, 11, 10, 9, 8],
            Pool::Noise => &[15, 14],
        }
    }
}

/// State shared by every track of a player
#[derive(Debug, Clone)]
pub(crate) struct Shared<'a> {
    pub channels: [Channel<'a>; CHANNELS],
    pub variables: [i16; VARIABLES],
    rng: StdRng,
    pub instruments: Option<Instruments<'a>>,

    pub tempo: u16,

    /// Volume levels in tenths of a decibel
    pub master_volume: i16,
    pub sequence_volume: i16,

    /// Priority of the player, the base of every track priority
    pub priority: u8,

    /// The master volume changed while the tracks ran
    pub volume_changed: bool,
}

impl<'a> Shared<'a> {
    pub fn new(instruments: Option<Instruments<'a>>, priority: u8) -> Self {
        Self {
            channels: std::array::from_fn(Channel::new),
            variables: [-1; VARIABLES],
            rng: StdRng::seed_from_u64(DEFAULT_SEED),
            instruments,
            tempo: 120,
            master_volume: 0,
            sequence_volume: 0,
            priority,
            volume_changed: false,
        }
    }

    /// The volume every channel starts from, before its track's volume and expression
    ///
    /// The master volume is applied when mixing.
    pub fn base_volume(&self) -> i16 {
        self.sequence_volume
    }

    pub fn variable(&self, index: u8) -> i16 {
        self.variables
            .get(index as usize)
            .copied()
            .unwrap_or_default()
    }

    /// A random value between `min` and `max`, both inclusive and in either order
    pub fn random(&mut self, min: i16, max: i16) -> i16 {
        let (low, high) = if min <= max { (min, max) } else { (max, min) };
        self.rng.gen_range(low..=high)
    }

    /// Find a channel for a note of the given priority, stealing the least important one
    pub fn allocate(&mut self, pool: Pool, priority: u8) -> Option<usize> {
        let mut chosen: Option<&Channel> = None;
        for &id in pool.channels() {
            let channel = &self.channels[id];
            if let Some(current) = chosen {
                if channel.priority > current.priority {
                    continue;
                }
                if channel.priority == current.priority && current.volume <= channel.volume {
                    continue;
                }
            }
            chosen = Some(channel);
        }

        let chosen = chosen?;
        if priority < chosen.priority {
            return None;
        }

        let id = chosen.id;
        self.channels[id].claim();
        Some(id)
    }
}

/// Whether a track looped or ended at a point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Time {
    pub seconds: f64,
    pub kind: LengthKind,
}

/// Plays a single sequence
#[derive(Debug, Clone)]
pub struct Player<'a> {
    shared: Shared<'a>,
    tracks: Vec<Track<'a>>,

    /// Every loop and end of every track, in order
    times: Vec<Vec<Time>>,

    tempo_count: u32,
    seconds: f64,
}

impl<'a> Player<'a> {
    /// Prepare to play the bytecode `data` from its start, opening the tracks it allocates
    pub fn new(data: &'a [u8]) -> Self {
        let mut tracks = Vec::new();
        let mut stream = Stream::new(data, 0);

        if data.first() == Some(&op::ALLOCATE_TRACKS) {
            stream.seek(3);
            while tracks.len() + 1 < MAX_TRACKS
                && data.get(stream.position()) == Some(&op::OPEN_TRACK)
            {
                stream.seek(stream.position() + 2);
                match stream.read_u24() {
                    Ok(offset) => {
                        let start = u32::from(offset) as usize;
                        tracks.push(Track::new(tracks.len() + 1, data, start, 0));
                    }
                    Err(_) => break,
                }
            }
        }
        tracks.insert(0, Track::new(0, data, stream.position(), 0));

        let times = vec![Vec::new(); tracks.len()];
        Self {
            shared: Shared::new(None, 0),
            tracks,
            times,
            tempo_count: 0,
            seconds: 0.0,
        }
    }

    /// Play notes with these instruments, rather than only running the bytecode
    pub fn with_instruments(mut self, instruments: Instruments<'a>) -> Self {
        self.shared.instruments = Some(instruments);
        self
    }

    /// Set the volume of the sequence, as a linear 7-bit level
    pub fn with_volume(mut self, volume: u8) -> Self {
        self.shared.sequence_volume = tables::sustain(volume);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.shared.priority = priority;
        for track in &mut self.tracks {
            track.priority = priority.wrapping_add(64);
        }
        self
    }

    /// Seed the random commands
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.shared.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn renders_notes(&self) -> bool {
        self.shared.instruments.is_some()
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    pub fn tracks(&self) -> &[Track<'a>] {
        &self.tracks
    }

    pub fn channels(&self) -> &[Channel<'a>] {
        &self.shared.channels
    }

    /// Every loop and end recorded for a track
    pub fn times(&self, track: usize) -> &[Time] {
        self.times.get(track).map(Vec::as_slice).unwrap_or_default()
    }

    /// Advance by a single tick, running the tracks as often as the tempo demands
    pub fn tick(&mut self) {
        while self.tempo_count > TEMPO_THRESHOLD {
            self.tempo_count -= TEMPO_THRESHOLD;

            for (track, times) in self.tracks.iter_mut().zip(&mut self.times) {
                track.run(&mut self.shared);

                if track.hit_loop {
                    times.push(Time {
                        seconds: self.seconds,
                        kind: LengthKind::Loop,
                    });
                    track.hit_loop = false;
                }
                if track.hit_end {
                    times.push(Time {
                        seconds: self.seconds,
                        kind: LengthKind::End,
                    });
                    track.hit_end = false;
                }
            }

            if self.shared.volume_changed {
                for track in &mut self.tracks {
                    track.updates.volume = true;
                }
                self.shared.volume_changed = false;
            }
        }

        self.tempo_count += (self.shared.tempo as u32 * TEMPO_RATE) >> 8;
        self.seconds += SECONDS_PER_TICK;
    }

    /// Let every channel follow the changes of its track, then forget the changes
    pub fn update_tracks(&mut self) {
        let base_volume = self.shared.base_volume();
        for channel in self.shared.channels.iter_mut() {
            if let Some(track) = channel.track.and_then(|id| self.tracks.get(id)) {
                channel.follow_track(track, base_volume);
            }
        }
        for track in &mut self.tracks {
            track.updates = Default::default();
        }
    }

    /// Advance the envelope and modulation of every channel
    pub fn update_channels(&mut self) {
        for channel in self.shared.channels.iter_mut() {
            channel.update();
        }
    }

    /// Mix one sample of every active channel, returning the left and right output
    pub fn mix(&mut self) -> (i32, i32) {
        let (mut left, mut right) = (0, 0);
        for channel in self.shared.channels.iter_mut() {
            if channel.is_active() {
                let (l, r) = channel.mix();
                left += l;
                right += r;
            }
        }

        let gain = tables::gain(self.shared.master_volume);
        (
            tables::mul_div7(left, gain).clamp(-0x8000, 0x7FFF),
            tables::mul_div7(right, gain).clamp(-0x8000, 0x7FFF),
        )
    }

    /// Decide whether the tracks have played enough to know the length of the sequence
    ///
    /// A track counts as looped once it has looped `loops` times, and as ended when it
    /// ended. Until every track did either, there is no length yet.
    pub fn classify(&self, loops: usize) -> Option<Length> {
        let mut looped = 0;
        let mut ended = 0;
        let mut latest = Time {
            seconds: -1.0,
            kind: LengthKind::Loop,
        };

        for times in &self.times {
            let Some(last) = times.last() else {
                continue;
            };
            match last.kind {
                LengthKind::Loop if times.len() >= loops => looped += 1,
                LengthKind::End => ended += 1,
                LengthKind::Loop => continue,
            }
            if last.seconds > latest.seconds {
                latest = *last;
            }
        }

        let tracks = self.tracks.len();
        let kind = if looped == tracks {
            LengthKind::Loop
        } else if ended == tracks {
            LengthKind::End
        } else if looped + ended == tracks {
            latest.kind
        } else {
            return None;
        };

        Some(Length {
            seconds: latest.seconds.max(0.0),
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pcm_bank, pcm_wave};

    fn run_for(player: &mut Player, seconds: f64) {
        while player.seconds() < seconds {
            player.tick();
        }
    }

    #[test]
    fn opens_allocated_tracks() {
        #[rustfmt::skip]
        let data = [
            op::ALLOCATE_TRACKS, 0x07, 0x00,
            op::OPEN_TRACK, 1, 17, 0, 0,
            op::OPEN_TRACK, 2, 18, 0, 0,
            op::END, op::END, op::END, op::END,
            op::END, op::END,
        ];
        let player = Player::new(&data);

        assert_eq!(player.tracks().len(), 3);
        assert_eq!(player.tracks()[0].position(), 13);
        assert_eq!(player.tracks()[1].position(), 17);
        assert_eq!(player.tracks()[2].position(), 18);
        assert_eq!(player.tracks()[2].id, 2);
    }

    #[test]
    fn single_track() {
        let player = Player::new(&[op::END]);
        assert_eq!(player.tracks().len(), 1);
        assert_eq!(player.tracks()[0].position(), 0);
    }

    #[test]
    fn truncated_track_list() {
        let data = [op::ALLOCATE_TRACKS, 0x03, 0x00, op::OPEN_TRACK, 1, 9];
        let player = Player::new(&data);
        assert_eq!(player.tracks().len(), 1);
    }

    #[test]
    fn priorities() {
        let player = Player::new(&[op::END]).with_priority(10);
        assert_eq!(player.tracks()[0].priority, 74);
    }

    #[test]
    fn ends_are_recorded() {
        // 48 ticks at tempo 120 last a quarter note
        let data = [0x3C, 100, 48, op::END];
        let mut player = Player::new(&data);
        run_for(&mut player, 2.0);

        let times = player.times(0);
        assert_eq!(times.len(), 1);
        assert_eq!(times[0].kind, LengthKind::End);
        assert!(times[0].seconds > 0.4 && times[0].seconds < 0.6);

        let length = player.classify(2).unwrap();
        assert_eq!(length.kind, LengthKind::End);
        assert_eq!(length.seconds, times[0].seconds);
    }

    #[test]
    fn loops_need_enough_passes() {
        let data = [0x3C, 100, 48, op::JUMP, 0, 0, 0];
        let mut player = Player::new(&data);

        run_for(&mut player, 0.6);
        assert_eq!(player.times(0).len(), 1);
        assert_eq!(player.classify(2), None);

        run_for(&mut player, 1.1);
        let length = player.classify(2).unwrap();
        assert_eq!(length.kind, LengthKind::Loop);
        assert!(length.seconds > 0.9 && length.seconds < 1.1);
    }

    #[test]
    fn mixed_tracks_take_the_latest() {
        #[rustfmt::skip]
        let data = [
            op::ALLOCATE_TRACKS, 0x03, 0x00,
            op::OPEN_TRACK, 1, 12, 0, 0,
            op::REST, 96, op::END,  // 8
            0,                      // padding
            op::REST, 24, op::JUMP, 12, 0, 0,  // 12
        ];
        let mut player = Player::new(&data);
        run_for(&mut player, 0.3);
        assert_eq!(player.classify(2), None);

        // The looping track keeps going after the other one ended
        run_for(&mut player, 3.0);
        let length = player.classify(2).unwrap();
        assert_eq!(player.times(0)[0].kind, LengthKind::End);
        assert!(length.seconds > player.times(0)[0].seconds);
        assert_eq!(length.kind, LengthKind::Loop);
    }

    #[test]
    fn tempo_changes_speed() {
        let slow = [0x3C, 100, 48, op::END];
        let fast = [op::TEMPO, 240, 0, 0x3C, 100, 48, op::END];

        let end = |data: &[u8]| {
            let mut player = Player::new(data);
            run_for(&mut player, 2.0);
            player.times(0)[0].seconds
        };
        assert!(end(&fast) < end(&slow) * 0.6);
    }

    #[test]
    fn allocation_prefers_quiet_low_priority_channels() {
        let mut shared = Shared::new(None, 0);
        assert_eq!(shared.allocate(Pool::Pcm, 64), Some(4));
        assert_eq!(shared.allocate(Pool::Psg, 64), Some(13));
        assert_eq!(shared.allocate(Pool::Noise, 64), Some(15));

        for channel in shared.channels.iter_mut() {
            channel.priority = 100;
            channel.volume = 50;
        }
        shared.channels[6].volume = 10;
        shared.channels[9].priority = 90;
        assert_eq!(shared.allocate(Pool::Pcm, 95), Some(9));

        shared.channels[9].priority = 100;
        shared.channels[9].volume = 50;
        assert_eq!(shared.allocate(Pool::Pcm, 100), Some(6));
        assert_eq!(shared.allocate(Pool::Pcm, 99), None);
    }

    #[test]
    fn random_values_are_reproducible() {
        let mut first = Shared::new(None, 0);
        let mut second = Shared::new(None, 0);
        for _ in 0..16 {
            let value = first.random(-5, 5);
            assert_eq!(value, second.random(5, -5));
            assert!((-5..=5).contains(&value));
        }
    }

    #[test]
    fn mixing_is_silent_after_notes_stop() {
        let wave_archive = WaveArchive::from_waves([pcm_wave(&[0x40; 64])]);
        let bank = pcm_bank(&[0]);
        let instruments = Instruments {
            bank: &bank,
            wave_archives: [Some(&wave_archive), None, None, None],
        };

        let data = [0x3C, 127, 4, op::END];
        let mut player = Player::new(&data)
            .with_volume(127)
            .with_instruments(instruments);

        let mut heard = false;
        for _ in 0..200 {
            let (left, right) = player.mix();
            heard |= left != 0 || right != 0;
            player.update_tracks();
            player.update_channels();
            player.tick();
        }

        assert!(heard);
        assert_eq!(player.mix(), (0, 0));
        assert!(player.channels().iter().all(|channel| !channel.is_active()));
    }
}
