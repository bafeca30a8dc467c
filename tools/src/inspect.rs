use crate::utils::{iter_files, load_archives, ARCHIVE_EXTENSIONS};
use anyhow::Result;
use clap::Args;
use sdat::{archive::Archive, resource::DecodePolicy};
use std::path::{Path, PathBuf};

#[derive(Args)]
#[clap(author, version, about = "List the contents of sound archives and ROMs", long_about = None)]
pub struct InspectArgs {
    /// The path(s) to inspect
    path: Vec<PathBuf>,

    /// Search folders recursively
    #[clap(short, long)]
    recursive: bool,

    /// Leave resources with a broken header undecoded instead of failing
    #[clap(short, long)]
    best_effort: bool,
}

pub fn inspect(args: &InspectArgs) -> Result<()> {
    let policy = if args.best_effort {
        DecodePolicy::BestEffort
    } else {
        DecodePolicy::FailHard
    };

    let paths: Vec<_> = iter_files(&args.path, args.recursive, ARCHIVE_EXTENSIONS)
        .map(|entry| entry.into_path())
        .collect();

    if let Some((last, rest)) = paths.split_last() {
        for path in rest {
            print(path, policy)?;
            println!();
        }

        print(last, policy)?;
    }

    Ok(())
}

fn print(path: &Path, policy: DecodePolicy) -> Result<()> {
    let archives = load_archives(path, policy)?;
    if archives.is_empty() {
        println!("{:<32}No archives", path.display());
    }

    for archive in &archives {
        print_archive(archive);
    }

    Ok(())
}

fn print_archive(archive: &Archive) {
    let id = archive
        .live_sequences()
        .next()
        .map(|(_, entry)| entry.info.archive_id.as_str())
        .unwrap_or_default();

    println!(
        "{:<32}Seq {} | Bank {} | Wave {} | Player {} | Files {}",
        id,
        live(&archive.sequences),
        live(&archive.banks),
        live(&archive.wave_archives),
        live(&archive.players),
        archive.file_count(),
    );

    for (index, entry) in archive.live_sequences() {
        let decoded = if entry.sequence.is_some() { "" } else { " (undecoded)" };
        println!(
            "{index:>5} | {:<24} | bank {:>4} | player {:>3} | vol {:>3} | {:>6} bytes{decoded}",
            entry.info.name,
            entry.bank,
            entry.player,
            entry.volume,
            entry.info.body.len(),
        );
    }
}

fn live<T>(slots: &[Option<T>]) -> usize {
    slots.iter().flatten().count()
}
