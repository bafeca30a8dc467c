use anyhow::{Context, Result};
use sdat::{
    archive::{rom::find_archives, Archive},
    resource::DecodePolicy,
};
use std::{fs, io::stdin, path::Path};
use walkdir::{DirEntry, WalkDir};

/// Extensions of the files archives are read from
pub const ARCHIVE_EXTENSIONS: &[&str] = &["sdat", "nds"];

pub fn iter_files<'a, I>(
    paths: I,
    recursive: bool,
    extensions: &'a [&'static str],
) -> impl Iterator<Item = DirEntry> + 'a
where
    I: IntoIterator + 'a,
    <I as IntoIterator>::Item: AsRef<Path>,
{
    paths
        .into_iter()
        .flat_map(move |path| {
            let mut walk_dir = WalkDir::new(path.as_ref());
            if !recursive {
                walk_dir = walk_dir.max_depth(1);
            }

            walk_dir
        })
        .filter_map(Result::ok)
        .filter(|entry| {
            !is_hidden(entry)
                && extensions.iter().any(|extension| {
                    entry
                        .path()
                        .extension()
                        .map(|ext| ext.eq_ignore_ascii_case(extension))
                        .unwrap_or(false)
                })
        })
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

pub fn has_extension(path: &Path, extension: &str) -> bool {
    match path.extension() {
        Some(ext) => ext.eq_ignore_ascii_case(extension),
        None => false,
    }
}

/// Read the archives in a file: the file itself for `.sdat`, every embedded one for `.nds`
pub fn load_archives(path: &Path, policy: DecodePolicy) -> Result<Vec<Archive>> {
    let id = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    if has_extension(path, "nds") {
        let rom = fs::read(path).context(format!("Could not read {}", path.display()))?;
        Ok(find_archives(&rom, &id, policy))
    } else {
        let data = fs::read(path).context(format!("Could not read {}", path.display()))?;
        let archive = Archive::from_bytes(&data, id, policy)
            .context(format!("Could not decode {}", path.display()))?;
        Ok(vec![archive])
    }
}

/// Ask whether an existing file may be overwritten, returning whether to go ahead
pub fn check_for_overwrite(path: &Path) -> Result<bool> {
    if path.exists() {
        loop {
            println!(
                "{} already exists. Do you want to overwrite it? Y/n",
                path.to_string_lossy()
            );

            let mut line = String::new();
            stdin()
                .read_line(&mut line)
                .context("Could not read terminal input")?;

            match line.trim_end() {
                "Y" => break,
                "n" => return Ok(false),
                _ => (),
            }
        }
    }

    Ok(true)
}
