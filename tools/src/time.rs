//! The `time` subcommand

use crate::utils::load_archives;
use anyhow::{Context, Result};
use clap::Args;
use humantime::parse_duration;
use sdat::{
    archive::Archive,
    player::{format_seconds, sequence_length, timing_tags, LengthKind, LengthOptions, TimingOptions},
    resource::DecodePolicy,
    tags::{Publication, TagList},
};
use std::path::{Path, PathBuf};

/// Arguments for the `time` subcommand
#[derive(Args)]
#[clap(author, version, about = "Work out how long the sequences in an archive play", long_about = None)]
pub struct TimeArgs {
    /// The archive or ROM to time
    path: PathBuf,

    /// Indices of the sequences to time. No indices means all sequences
    index: Vec<usize>,

    /// How many times a looping sequence plays before it fades
    #[clap(short, long, default_value = "2")]
    loops: usize,

    /// How long to spend on a single sequence, e.g. "3s"
    #[clap(short, long, default_value = "3s")]
    timeout: String,

    /// Fade out in seconds for looping sequences
    #[clap(long, default_value = "10")]
    fade_loop: u32,

    /// Fade out in seconds for sequences that end
    #[clap(long, default_value = "0")]
    fade_one_shot: u32,

    /// Print the tags every sequence would be published with
    #[clap(long)]
    tags: bool,

    /// Leave resources with a broken header undecoded instead of failing
    #[clap(short, long)]
    best_effort: bool,
}

/// Work out how long the sequences in an archive play
pub fn time(args: TimeArgs) -> Result<()> {
    let policy = if args.best_effort {
        DecodePolicy::BestEffort
    } else {
        DecodePolicy::FailHard
    };

    let timeout = parse_duration(&args.timeout).context("Could not parse the timeout")?;
    let mut options = LengthOptions {
        loops: args.loops,
        ..LengthOptions::default()
    };
    let polls = (timeout.as_secs_f64() / options.poll_interval.as_secs_f64()).ceil() as u32;
    options.timing_polls = polls.max(1);
    options.render_polls = polls.max(1) * 2;

    let timing = TimingOptions {
        fade_loop: args.fade_loop,
        fade_one_shot: args.fade_one_shot,
    };

    for archive in load_archives(&args.path, policy)? {
        time_archive(&archive, &args, &options, &timing)?;
    }

    Ok(())
}

fn time_archive(
    archive: &Archive,
    args: &TimeArgs,
    options: &LengthOptions,
    timing: &TimingOptions,
) -> Result<()> {
    let library = library_name(&args.path);

    for (index, entry) in archive.live_sequences() {
        if !args.index.is_empty() && !args.index.contains(&index) {
            continue;
        }

        let length = sequence_length(archive, index, options)
            .context(format!("Could not time sequence {}", index))?;

        let (time, kind) = match length {
            Some(length) => (
                format_seconds(length.seconds),
                match length.kind {
                    LengthKind::Loop => "loop",
                    LengthKind::End => "end",
                },
            ),
            None => ("--:--".to_owned(), "unknown"),
        };
        println!("{index:>5} | {:<24} | {time} | {kind}", entry.info.name);

        if args.tags {
            let mut tags = TagList::new();
            tags.set(Publication::PRODUCER_TAG, env!("CARGO_PKG_NAME"));
            tags.set(Publication::ORIGINAL_NAME_TAG, entry.info.name.as_str());
            timing_tags(length, timing, &mut tags);

            let publication = Publication::sequence(index as u32, &library, tags);
            for line in publication.tags.to_text().lines() {
                println!("      {line}");
            }
        }
    }

    Ok(())
}

fn library_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    format!("{stem}.ncsflib")
}
