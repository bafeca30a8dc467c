//! The `strip` subcommand

use crate::utils::{check_for_overwrite, iter_files, load_archives, ARCHIVE_EXTENSIONS};
use anyhow::{Context, Error, Result};
use clap::Args;
use sdat::{
    archive::{strip::StripOptions, Archive},
    filter::Rules,
    resource::DecodePolicy,
};
use std::path::PathBuf;
use tracing::info;

/// Arguments for the `strip` subcommand
#[derive(Args)]
#[clap(
    author,
    version,
    about = "Merge sound archives and strip them down to their unique sequences",
    long_about = "Strip reads every archive it is given (.sdat files, or .nds ROMs which are searched for embedded archives), merges them into one and removes duplicate sequences, banks and wave archives.\n\nSequences can be excluded by name with wildcard patterns. A pattern containing a slash matches \"archive/name\", where archive is the file name, followed by #n for archives found in a ROM. Includes are applied after excludes, so they win."
)]
pub struct StripArgs {
    /// The archives and ROMs to merge
    input: Vec<PathBuf>,

    /// The output path
    #[clap(short, long)]
    output: PathBuf,

    /// Exclude the sequences matching this pattern
    #[clap(short = 'x', long)]
    exclude: Vec<String>,

    /// Keep the sequences matching this pattern, even when excluded
    #[clap(short, long)]
    include: Vec<String>,

    /// Also remove the instruments and waves no sequence plays
    #[clap(long)]
    gc: bool,

    /// Search folders recursively
    #[clap(short, long)]
    recursive: bool,

    /// Leave resources with a broken header undecoded instead of failing
    #[clap(short, long)]
    best_effort: bool,
}

/// Merge sound archives and strip them down to their unique sequences
pub fn strip(args: StripArgs) -> Result<()> {
    let policy = if args.best_effort {
        DecodePolicy::BestEffort
    } else {
        DecodePolicy::FailHard
    };

    let mut merged: Option<Archive> = None;
    for entry in iter_files(&args.input, args.recursive, ARCHIVE_EXTENSIONS) {
        let path = entry.path();
        for archive in load_archives(path, policy)? {
            println!(
                "{} => {} sequences",
                path.to_string_lossy(),
                archive.live_sequences().count()
            );

            match &mut merged {
                Some(merged) => merged.merge(&archive),
                None => merged = Some(archive),
            }
        }
    }

    let mut archive = merged.ok_or_else(|| Error::msg("No archives found to strip"))?;

    let mut rules = Rules::new();
    for pattern in &args.exclude {
        rules.exclude(pattern);
    }
    for pattern in &args.include {
        rules.include(pattern);
    }

    let summary = archive.strip(&rules, StripOptions::default());
    info!(
        "Removed {} duplicate and {} excluded sequences",
        summary.duplicate_sequences, summary.excluded_sequences
    );

    if args.gc {
        let summary = archive
            .strip_banks_and_wave_archives()
            .context("Could not remove unused instruments")?;
        info!(
            "Removed {} instruments and {} waves",
            summary.removed_instruments, summary.removed_waves
        );
    }

    if check_for_overwrite(&args.output)? {
        archive.to_path(&args.output).context(format!(
            "Could not write the archive to {}",
            args.output.to_string_lossy()
        ))?;

        println!(
            "Wrote {} with {} sequences",
            args.output.to_string_lossy(),
            archive.live_sequences().count()
        );
    }

    Ok(())
}
