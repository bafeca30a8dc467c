//! Tags and program data handed to the writer of the tagged wrapper format
//!
//! The wrapper itself (compression, checksums, file layout) lives outside of this crate.
//! This module only decides *what* goes in it: the reserved bytes, the program section and
//! an ordered list of `key=value` tags.

use crate::{
    archive::{Archive, DecodeError},
    resource::DecodePolicy,
};
use std::io;

/// An ordered list of tags with case-insensitive names
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagList {
    tags: Vec<(String, String)>,
}

impl TagList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value` lines, where a repeated key continues the value on a new line
    ///
    /// Lines without a `=`, or with an empty key or value, are skipped.
    pub fn parse(text: &str) -> Self {
        let mut tags = Self::new();

        for line in text.lines() {
            let Some((name, value)) = line.split_once('=') else {
                continue;
            };
            let (name, value) = (name.trim(), value.trim());
            if name.is_empty() || value.is_empty() {
                continue;
            }

            match tags.position(name) {
                Some(index) => {
                    let existing = &mut tags.tags[index].1;
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => tags.tags.push((name.to_owned(), value.to_owned())),
            }
        }

        tags
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.tags
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|index| self.tags[index].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Set a tag, keeping its place in the order when it already exists
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.position(name) {
            Some(index) => self.tags[index].1 = value,
            None => self.tags.push((name.to_owned(), value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.position(name)?;
        Some(self.tags.remove(index).1)
    }

    /// Overwrite every tag of `self` that `other` has as well, adding the ones it lacks
    pub fn merge_from(&mut self, other: &TagList) {
        for (name, value) in &other.tags {
            self.set(name, value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// The tags as `key=value` strings, in order
    pub fn to_strings(&self) -> Vec<String> {
        self.iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect()
    }

    /// The tags as text, with multi-line values split over repeated keys
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for (name, value) in self.iter() {
            for line in value.lines() {
                text.push_str(name);
                text.push('=');
                text.push_str(line);
                text.push('\n');
            }
        }
        text
    }
}

/// The contents of a single wrapper file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Publication {
    /// Reserved bytes, holding the sequence to play
    pub reserved: Vec<u8>,

    /// The program section: an encoded archive, or nothing when a library provides it
    pub program: Vec<u8>,

    pub tags: TagList,
}

impl Publication {
    /// Who produced the wrapper files
    pub const PRODUCER_TAG: &'static str = "ncsfby";

    /// The library a file without a program depends on
    pub const LIBRARY_TAG: &'static str = "_lib";

    /// The name the sequence had in its archive
    pub const ORIGINAL_NAME_TAG: &'static str = "origFilename";

    /// A self-contained file, playing sequence 0 of `archive`
    pub fn standalone(archive: &Archive, tags: TagList) -> io::Result<Self> {
        Ok(Self {
            reserved: 0u32.to_le_bytes().to_vec(),
            program: archive.to_bytes()?,
            tags,
        })
    }

    /// A library holding `archive`, which files made by [`Publication::sequence()`] refer to
    pub fn library(archive: &Archive) -> io::Result<Self> {
        Ok(Self {
            reserved: Vec::new(),
            program: archive.to_bytes()?,
            tags: TagList::new(),
        })
    }

    /// A file playing sequence `index` of the archive in library `library`
    pub fn sequence(index: u32, library: &str, mut tags: TagList) -> Self {
        tags.set(Self::LIBRARY_TAG, library);
        Self {
            reserved: index.to_le_bytes().to_vec(),
            program: Vec::new(),
            tags,
        }
    }

    /// The sequence index stored in the reserved bytes
    pub fn sequence_index(&self) -> Option<u32> {
        let bytes = self.reserved.get(..4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Decode the program section back into an archive
    pub fn archive(&self) -> Result<Archive, DecodeError> {
        Archive::from_bytes(
            &self.program,
            self.tags
                .get(Self::ORIGINAL_NAME_TAG)
                .unwrap_or_default()
                .to_owned(),
            DecodePolicy::FailHard,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sequence_entry, ArchiveBuilder};
    use pretty_assertions::assert_eq;

    #[test]
    fn names_ignore_case() {
        let mut tags = TagList::new();
        tags.set("Fade", "10");
        tags.set("length", "1:00");
        tags.set("FADE", "0");

        assert_eq!(tags.get("fade"), Some("0"));
        assert_eq!(tags.to_strings(), vec!["Fade=0", "length=1:00"]);

        assert_eq!(tags.remove("LENGTH"), Some("1:00".to_owned()));
        assert!(!tags.contains("length"));
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn parse_joins_repeated_keys() {
        let tags = TagList::parse("title=Theme\ncomment=one\nbroken\ncomment = two\nempty=\n");

        assert_eq!(tags.get("title"), Some("Theme"));
        assert_eq!(tags.get("comment"), Some("one\ntwo"));
        assert!(!tags.contains("empty"));
        assert_eq!(tags.to_text(), "title=Theme\ncomment=one\ncomment=two\n");
    }

    #[test]
    fn merge_overwrites_and_appends() {
        let mut tags = TagList::parse("a=1\nb=2");
        tags.merge_from(&TagList::parse("B=3\nc=4"));
        assert_eq!(tags.to_strings(), vec!["a=1", "b=3", "c=4"]);
    }

    #[test]
    fn publications() -> anyhow::Result<()> {
        let archive = ArchiveBuilder::new("game.sdat")
            .sequence(sequence_entry("BGM_TITLE", 0, &[0xFF]))
            .build();

        let library = Publication::library(&archive)?;
        assert!(library.reserved.is_empty());
        assert_eq!(library.archive()?.sequences.len(), 1);

        let mut tags = TagList::new();
        tags.set(Publication::PRODUCER_TAG, "sdat");
        let file = Publication::sequence(7, "game.ncsflib", tags.clone());
        assert_eq!(file.sequence_index(), Some(7));
        assert!(file.program.is_empty());
        assert_eq!(file.tags.get("_lib"), Some("game.ncsflib"));

        let standalone = Publication::standalone(&archive, tags)?;
        assert_eq!(standalone.sequence_index(), Some(0));
        assert_eq!(standalone.program, archive.to_bytes()?);

        Ok(())
    }
}
