//! Measuring how long a sequence plays, and whether it loops
//!
//! Measuring happens in two phases. First only the bytecode runs, until every track has
//! looped or ended. When the sequence ends rather than loops, it is played a second time
//! with its instruments, so the length can include the notes ringing out after the tracks
//! end: the sequence is over once the output stays silent for
//! [`LengthOptions::trailing_silence`] seconds.
//!
//! Every phase runs on a worker thread with a wall clock budget. A sequence that takes too
//! long to measure has no length, which is not an error.

use super::{Instruments, Player, SECONDS_PER_TICK};
use crate::{archive::Archive, tags::TagList};
use crossbeam_channel::bounded;
use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Whether a sequence repeats forever or ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthKind {
    Loop,
    End,
}

/// The measured length of a sequence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Length {
    /// For looping sequences the time of the last counted loop, for ending sequences the
    /// time the last note stopped sounding
    pub seconds: f64,
    pub kind: LengthKind,
}

/// Settings for [`sequence_length()`]
#[derive(Debug, Clone, PartialEq)]
pub struct LengthOptions {
    /// How many times every track has to loop for the sequence to count as looped
    pub loops: usize,

    /// How often the worker is checked on
    pub poll_interval: Duration,

    /// Checks before the first phase is given up on
    pub timing_polls: u32,

    /// Checks before the second phase is given up on
    pub render_polls: u32,

    /// Simulated time after which the first phase gives up
    pub max_seconds: f64,

    /// Simulated time the second phase may run past the length of the first
    pub render_margin: f64,

    /// Silence after which an ending sequence is considered over
    pub trailing_silence: f64,

    /// Seed for the random commands
    pub seed: u64,
}

impl Default for LengthOptions {
    fn default() -> Self {
        Self {
            loops: 2,
            poll_interval: Duration::from_millis(150),
            timing_polls: 20,
            render_polls: 40,
            max_seconds: 6000.0,
            render_margin: 30.0,
            trailing_silence: 20.0,
            seed: super::DEFAULT_SEED,
        }
    }
}

/// Settings for [`timing_tags()`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingOptions {
    /// Fade out in seconds for looping sequences
    pub fade_loop: u32,

    /// Fade out in seconds for sequences that end
    pub fade_one_shot: u32,
}

impl Default for TimingOptions {
    fn default() -> Self {
        Self {
            fade_loop: 10,
            fade_one_shot: 0,
        }
    }
}

/// Errors that might be returned from [`sequence_length()`]
#[derive(Debug, Error)]
pub enum LengthError {
    #[error("There is no sequence {0}")]
    MissingSequence(usize),

    #[error("Sequence {0} was not decoded")]
    UnparsedSequence(usize),
}

/// Measure sequence `index` of `archive`
///
/// Returns `None` when the length could not be determined in time.
pub fn sequence_length(
    archive: &Archive,
    index: usize,
    options: &LengthOptions,
) -> Result<Option<Length>, LengthError> {
    let entry = archive
        .sequence(index)
        .ok_or(LengthError::MissingSequence(index))?;
    let data = entry
        .sequence
        .as_ref()
        .ok_or(LengthError::UnparsedSequence(index))?
        .data
        .as_slice();

    let player = || {
        Player::new(data)
            .with_volume(entry.volume)
            .with_priority(entry.player_priority)
            .with_seed(options.seed)
    };

    let timing_budget = options.poll_interval * options.timing_polls;
    let timed = with_budget(timing_budget, |cancel| {
        measure(player(), options, options.max_seconds, cancel)
    });

    let Some(timed) = timed else {
        debug!(sequence = %entry.info.name, "No length found");
        return Ok(None);
    };
    if timed.kind == LengthKind::Loop {
        return Ok(Some(timed));
    }

    let instruments = archive.bank(entry.bank).and_then(|bank| {
        Some(Instruments {
            bank: bank.bank.as_ref()?,
            wave_archives: archive.wave_archives_of(bank),
        })
    });
    let Some(instruments) = instruments else {
        warn!(
            sequence = %entry.info.name,
            bank = entry.bank,
            "The bank is missing, so trailing notes are not measured"
        );
        return Ok(Some(timed));
    };

    let render_budget = options.poll_interval * options.render_polls;
    let max_seconds = timed.seconds + options.render_margin;
    let rendered = with_budget(render_budget, |cancel| {
        measure(
            player().with_instruments(instruments),
            options,
            max_seconds,
            cancel,
        )
    });

    Ok(match rendered {
        Some(length) => Some(length),
        None => {
            debug!(sequence = %entry.info.name, "Rendering gave no length, keeping the timing");
            Some(timed)
        }
    })
}

/// Run `job` on a worker thread, raising its cancellation flag when it takes longer than
/// `budget`
fn with_budget<F>(budget: Duration, job: F) -> Option<Length>
where
    F: FnOnce(&AtomicBool) -> Option<Length> + Send,
{
    let cancel = AtomicBool::new(false);
    let (sender, receiver) = bounded(1);

    thread::scope(|scope| {
        scope.spawn(|| {
            // The receiver only goes away after the scope ends
            let _ = sender.send(job(&cancel));
        });

        match receiver.recv_timeout(budget) {
            Ok(length) => length,
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                debug!("Measuring took longer than {:?}", budget);
                None
            }
        }
    })
}

/// Play until the length is known, `max_seconds` have passed or `cancel` is raised
///
/// Without instruments the tracks decide the length; with instruments the sequence is over
/// once the output has been silent long enough.
pub fn measure(
    mut player: Player,
    options: &LengthOptions,
    max_seconds: f64,
    cancel: &AtomicBool,
) -> Option<Length> {
    let rendering = player.renders_notes();
    let mut silence = 0.0;

    loop {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }

        if rendering {
            let (left, right) = player.mix();
            if left == 0 && right == 0 {
                silence += SECONDS_PER_TICK;
            } else {
                silence = 0.0;
            }

            player.update_tracks();
            player.update_channels();
        }

        player.tick();

        if rendering {
            if silence >= options.trailing_silence {
                return Some(Length {
                    seconds: (player.seconds() - silence).max(0.0),
                    kind: LengthKind::End,
                });
            }
        } else if let Some(length) = player.classify(options.loops) {
            return Some(length);
        }

        if player.seconds() > max_seconds {
            return None;
        }
    }
}

/// Format seconds as `MM:SS`, rounding up to whole seconds
pub fn format_seconds(seconds: f64) -> String {
    let total = seconds.max(0.0).ceil() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Store the `fade` and `length` tags for a measured length, or remove them when there is
/// none
pub fn timing_tags(length: Option<Length>, options: &TimingOptions, tags: &mut TagList) {
    match length {
        Some(length) => {
            let fade = match length.kind {
                LengthKind::Loop => options.fade_loop,
                LengthKind::End => options.fade_one_shot,
            };
            let seconds = if length.seconds.ceil() == 0.0 {
                1.0
            } else {
                length.seconds
            };

            tags.set("fade", fade.to_string());
            tags.set("length", format_seconds(seconds));
        }
        None => {
            tags.remove("fade");
            tags.remove("length");
        }
    }
}
