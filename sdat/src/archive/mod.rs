//! Sound archive (`SDAT`) handling
//!
//! An archive bundles sequences, the instrument banks they play with, the wave archives those
//! banks sample from and the players sequences are played on. It is laid out as a 64-byte
//! header, followed by an optional symbol section (`SYMB`) naming every entry, the index
//! section (`INFO`) describing every slot, the file table (`FAT `) and the file blob
//! (`FILE`) holding the resource bodies.
//!
//! ```no_run
//! # use sdat::{archive::Archive, resource::DecodePolicy};
//! let mut archive = Archive::from_path("game.sdat", DecodePolicy::FailHard)?;
//! let other = Archive::from_path("other.sdat", DecodePolicy::FailHard)?;
//! archive.merge(&other);
//! archive.to_path("merged.sdat")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod entry;
mod fat;
pub mod gc;
mod info;
pub mod merge;
pub mod rom;
pub mod strip;
mod symbols;

pub use entry::{
    BankEntry, Entry, EntryInfo, PlayerEntry, SequenceEntry, WaveArchiveEntry, NO_WAVE_ARCHIVE,
};

use crate::{
    header::{HeaderError, StdHeader},
    io::{align4, read_u32_array, write_u32s, write_zeros, Tag},
    resource::{Bank, DecodePolicy, ResourceError, Sequence, WaveArchive},
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fat::FileRecord;
use info::{BankRecord, InfoSection, SequenceRecord, WaveArchiveRecord};
use std::{
    fs::{create_dir_all, File},
    io::{self, Cursor, Read, Write},
    path::Path,
};
use symbols::SymbolSection;
use thiserror::Error;
use tracing::{debug, warn};

/// A decoded sound archive
///
/// Every category is a list of slots, where `None` is a hole: a slot the index section lists
/// without an entry. Cross references between entries (a sequence's bank, a bank's wave
/// archives, a sequence's player) are slot indices, and are validated whenever they are
/// followed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Archive {
    /// How many archives were merged into this one
    pub merge_count: u16,

    /// Whether a symbol section is written when encoding
    pub has_symbols: bool,

    /// Set when some entries carry placeholder names that should be replaced by synthesized ones
    pub needs_symbol_cleanup: bool,

    /// The number of records in the file table that file IDs index into
    ///
    /// Entries can share a file or leave some unreferenced, so this can exceed
    /// [`Archive::file_count()`].
    pub file_table_len: usize,

    pub sequences: Vec<Option<SequenceEntry>>,
    pub banks: Vec<Option<BankEntry>>,
    pub wave_archives: Vec<Option<WaveArchiveEntry>>,
    pub players: Vec<Option<PlayerEntry>>,
}

impl Archive {
    /// The size of the archive header
    pub const HEADER_LEN: usize = 0x40;

    /// The signature every archive starts with
    pub const SIGNATURE: [u8; 8] = [b'S', b'D', b'A', b'T', 0xFF, 0xFE, 0x00, 0x01];

    const FILE_HEADER_LEN: usize = 24;

    /// Decode an archive from memory
    ///
    /// `archive_id` is stored in every entry, so entries can be told apart after merging.
    pub fn from_bytes(
        data: &[u8],
        archive_id: impl Into<String>,
        policy: DecodePolicy,
    ) -> Result<Self, DecodeError> {
        let archive_id = archive_id.into();

        let mut cursor = Cursor::new(data);
        StdHeader::from_reader(&mut cursor)?.verify(*b"SDAT")?;
        let offsets: [u32; 8] = read_u32_array(&mut cursor)?;
        let [symbols_offset, symbols_len, info_offset, info_len, fat_offset, fat_len, _, _] =
            offsets;
        let merge_count = cursor.read_u16::<LittleEndian>()?;

        let symbols = if symbols_offset == 0 {
            None
        } else {
            let section = section(data, SymbolSection::TAG, symbols_offset, symbols_len, 0x40)?;
            Some(SymbolSection::from_bytes(section)?)
        };
        let info = InfoSection::from_bytes(section(
            data,
            InfoSection::TAG,
            info_offset,
            info_len,
            0x40,
        )?)?;
        let files = fat::from_bytes(section(data, fat::TAG, fat_offset, fat_len, 12)?)?;

        if info.sequences.is_empty() {
            return Err(DecodeError::NoSequences);
        }

        let decoder = EntryDecoder {
            data,
            files: &files,
            archive_id: &archive_id,
            policy,
        };

        let mut sequences = Vec::with_capacity(info.sequences.len());
        for (index, record) in info.sequences.iter().enumerate() {
            let entry = match record {
                Some(record) => {
                    let name = symbol(symbols.as_ref().map(|s| &s.sequences), index);
                    let (info, body) = decoder.info::<SequenceEntry>(index, record.file_id, name)?;
                    let sequence = body
                        .map(Sequence::from_bytes)
                        .transpose()
                        .or_else(|error| decoder.skip(SequenceEntry::KIND, index, error))?;

                    Some(SequenceEntry {
                        info,
                        bank: record.bank,
                        volume: record.volume,
                        channel_priority: record.channel_priority,
                        player_priority: record.player_priority,
                        player: record.player,
                        reserved: record.reserved,
                        reserved_tail: record.reserved_tail,
                        sequence,
                    })
                }
                None => None,
            };
            sequences.push(entry);
        }

        let mut banks = Vec::with_capacity(info.banks.len());
        for (index, record) in info.banks.iter().enumerate() {
            let entry = match record {
                Some(record) => {
                    let name = symbol(symbols.as_ref().map(|s| &s.banks), index);
                    let (info, body) = decoder.info::<BankEntry>(index, record.file_id, name)?;
                    let bank = body
                        .map(Bank::from_bytes)
                        .transpose()
                        .or_else(|error| decoder.skip(BankEntry::KIND, index, error))?;

                    Some(BankEntry {
                        info,
                        wave_archives: record.wave_archives,
                        reserved: record.reserved,
                        bank,
                    })
                }
                None => None,
            };
            banks.push(entry);
        }

        let mut wave_archives = Vec::with_capacity(info.wave_archives.len());
        for (index, record) in info.wave_archives.iter().enumerate() {
            let entry = match record {
                Some(record) => {
                    let name = symbol(symbols.as_ref().map(|s| &s.wave_archives), index);
                    let (info, body) =
                        decoder.info::<WaveArchiveEntry>(index, record.file_id, name)?;
                    let wave_archive = body
                        .map(WaveArchive::from_bytes)
                        .transpose()
                        .or_else(|error| decoder.skip(WaveArchiveEntry::KIND, index, error))?;

                    Some(WaveArchiveEntry {
                        info,
                        reserved: record.reserved,
                        wave_archive,
                    })
                }
                None => None,
            };
            wave_archives.push(entry);
        }

        debug!(
            archive = %archive_id,
            sequences = sequences.len(),
            banks = banks.len(),
            wave_archives = wave_archives.len(),
            players = info.players.len(),
            "Decoded archive"
        );

        Ok(Self {
            merge_count,
            has_symbols: symbols.is_some(),
            needs_symbol_cleanup: false,
            file_table_len: files.len(),
            sequences,
            banks,
            wave_archives,
            players: info.players,
        })
    }

    /// Decode an archive from an arbitrary I/O reader
    pub fn from_reader<R>(
        mut reader: R,
        archive_id: impl Into<String>,
        policy: DecodePolicy,
    ) -> Result<Self, FromReaderError>
    where
        R: Read,
    {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        Ok(Self::from_bytes(&data, archive_id, policy)?)
    }

    /// Decode an archive from a path on disk, identifying it by its file name
    pub fn from_path<P>(path: P, policy: DecodePolicy) -> Result<Self, FromPathError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let archive_id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let file = File::open(path)?;
        let archive = Self::from_reader(file, archive_id, policy)?;

        Ok(archive)
    }

    /// Serialize the archive to an arbitrary I/O writer
    ///
    /// Every offset, size and file ID is recomputed. File IDs are handed out sequentially in
    /// slot order: sequences first, then banks, then wave archives.
    pub fn to_writer<W>(&self, mut writer: W) -> io::Result<()>
    where
        W: Write,
    {
        let mut bodies = Vec::new();

        let info = InfoSection {
            sequences: self
                .sequences
                .iter()
                .map(|slot| {
                    slot.as_ref().map(|entry| SequenceRecord {
                        file_id: push_body(&mut bodies, &entry.info.body),
                        reserved: entry.reserved,
                        bank: entry.bank,
                        volume: entry.volume,
                        channel_priority: entry.channel_priority,
                        player_priority: entry.player_priority,
                        player: entry.player,
                        reserved_tail: entry.reserved_tail,
                    })
                })
                .collect(),
            banks: self
                .banks
                .iter()
                .map(|slot| {
                    slot.as_ref().map(|entry| BankRecord {
                        file_id: push_body(&mut bodies, &entry.info.body),
                        reserved: entry.reserved,
                        wave_archives: entry.wave_archives,
                    })
                })
                .collect(),
            wave_archives: self
                .wave_archives
                .iter()
                .map(|slot| {
                    slot.as_ref().map(|entry| WaveArchiveRecord {
                        file_id: push_body(&mut bodies, &entry.info.body),
                        reserved: entry.reserved,
                    })
                })
                .collect(),
            players: self.players.clone(),
        };

        let symbols = self.has_symbols.then(|| SymbolSection {
            sequences: symbols_of(&self.sequences, &info.sequences, |r: &SequenceRecord| {
                r.file_id
            }),
            banks: symbols_of(&self.banks, &info.banks, |r: &BankRecord| r.file_id),
            wave_archives: symbols_of(
                &self.wave_archives,
                &info.wave_archives,
                |r: &WaveArchiveRecord| r.file_id,
            ),
        });

        let symbols_len = symbols.as_ref().map_or(0, SymbolSection::encoded_len);
        let symbols_offset = if symbols.is_some() {
            Self::HEADER_LEN
        } else {
            0
        };
        let info_offset = Self::HEADER_LEN + align4(symbols_len);
        let info_len = info.encoded_len();
        let fat_offset = info_offset + info_len;
        let fat_len = fat::encoded_len(bodies.len());
        let file_offset = fat_offset + fat_len;
        let file_len = Self::FILE_HEADER_LEN + bodies.iter().map(|body| body.len()).sum::<usize>();
        let total_len = file_offset + file_len;

        let mut records = Vec::with_capacity(bodies.len());
        let mut offset = file_offset + Self::FILE_HEADER_LEN;
        for body in &bodies {
            records.push(FileRecord {
                offset: offset as u32,
                size: body.len() as u32,
            });
            offset += body.len();
        }

        let blocks = if symbols.is_some() { 4 } else { 3 };
        StdHeader::new(*b"SDAT", total_len as u32, Self::HEADER_LEN as u16, blocks)
            .to_writer(&mut writer)?;
        write_u32s(
            &mut writer,
            &[
                symbols_offset as u32,
                align4(symbols_len) as u32,
                info_offset as u32,
                info_len as u32,
                fat_offset as u32,
                fat_len as u32,
                file_offset as u32,
                file_len as u32,
            ],
        )?;
        writer.write_u16::<LittleEndian>(self.merge_count)?;
        write_zeros(&mut writer, 14)?;

        if let Some(symbols) = &symbols {
            symbols.to_writer(&mut writer)?;
        }
        info.to_writer(&mut writer)?;
        fat::to_writer(&mut writer, &records)?;

        writer.write_all(b"FILE")?;
        writer.write_u32::<LittleEndian>(file_len as u32)?;
        writer.write_u32::<LittleEndian>(bodies.len() as u32)?;
        write_zeros(&mut writer, 12)?;
        for body in bodies {
            writer.write_all(body)?;
        }

        Ok(())
    }

    /// Serialize the archive into a byte buffer
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.to_writer(&mut bytes)?;
        Ok(bytes)
    }

    /// Serialize the archive to a path on disk, creating parent directories as needed
    pub fn to_path<P>(&self, path: P) -> io::Result<()>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }

        self.to_writer(File::create(path)?)
    }

    pub fn sequence(&self, index: usize) -> Option<&SequenceEntry> {
        self.sequences.get(index)?.as_ref()
    }

    pub fn bank(&self, index: u16) -> Option<&BankEntry> {
        self.banks.get(index as usize)?.as_ref()
    }

    pub fn wave_archive(&self, index: u16) -> Option<&WaveArchiveEntry> {
        if index == NO_WAVE_ARCHIVE {
            return None;
        }

        self.wave_archives.get(index as usize)?.as_ref()
    }

    pub fn player(&self, index: u8) -> Option<&PlayerEntry> {
        self.players.get(index as usize)?.as_ref()
    }

    /// The non-hole sequences together with their slot index
    pub fn live_sequences(&self) -> impl Iterator<Item = (usize, &SequenceEntry)> {
        self.sequences
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| Some((index, slot.as_ref()?)))
    }

    /// The parsed wave archives a bank's four slots refer to
    pub fn wave_archives_of(&self, bank: &BankEntry) -> [Option<&WaveArchive>; 4] {
        bank.wave_archives
            .map(|index| self.wave_archive(index)?.wave_archive.as_ref())
    }

    /// The number of entries backed by a body in the file blob
    pub fn file_count(&self) -> usize {
        self.sequences.iter().flatten().count()
            + self.banks.iter().flatten().count()
            + self.wave_archives.iter().flatten().count()
    }

    /// Assign file IDs the way [`Archive::to_writer()`] does
    pub fn renumber_files(&mut self) {
        let mut next = 0u16;
        let mut assign = |info: &mut EntryInfo| {
            info.file_id = next;
            next = next.wrapping_add(1);
        };

        self.sequences.iter_mut().flatten().for_each(|e| assign(&mut e.info));
        self.banks.iter_mut().flatten().for_each(|e| assign(&mut e.info));
        self.wave_archives.iter_mut().flatten().for_each(|e| assign(&mut e.info));

        self.file_table_len = next as usize;
    }

    /// One past the highest file ID any entry refers to, or the file table length if larger
    pub fn file_id_span(&self) -> usize {
        let highest = self
            .sequences
            .iter()
            .flatten()
            .map(|e| e.info.file_id)
            .chain(self.banks.iter().flatten().map(|e| e.info.file_id))
            .chain(self.wave_archives.iter().flatten().map(|e| e.info.file_id))
            .map(|id| id as usize + 1)
            .max()
            .unwrap_or(0);

        highest.max(self.file_table_len)
    }

    /// Replace every placeholder name with the one synthesized from its current file ID
    pub fn clean_up_symbols(&mut self) {
        fn clean<E: Entry>(slots: &mut [Option<E>]) {
            for entry in slots.iter_mut().flatten() {
                let info = entry.info_mut();
                if info.name_is_placeholder || info.name.is_empty() {
                    info.name = E::synthesized_name(info.file_id);
                    info.name_is_placeholder = false;
                }
            }
        }

        clean(&mut self.sequences);
        clean(&mut self.banks);
        clean(&mut self.wave_archives);
        self.needs_symbol_cleanup = false;
    }
}

/// Errors that might be returned from [`Archive::from_bytes()`]
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The archive header carries the wrong tag or magic
    #[error("The archive header is invalid")]
    Header(#[from] HeaderError),

    /// A section does not start with the tag it should
    #[error(
        "Expected a {} section, found {}",
        String::from_utf8_lossy(.expected),
        String::from_utf8_lossy(.found)
    )]
    Section { expected: Tag, found: Tag },

    /// A section declares a size smaller than its fixed header
    #[error("The {section} section declares {declared} bytes, it needs at least {minimum}")]
    SectionSize {
        section: String,
        declared: u32,
        minimum: u32,
    },

    /// A declared range lies (partly) outside of the data
    #[error("The {what} at {offset:#x}..{end:#x} extends past the end of the data")]
    OutOfBounds {
        what: String,
        offset: usize,
        end: usize,
    },

    /// Reading ran past the end of the data
    #[error("The archive data is truncated")]
    Truncated(#[from] io::Error),

    /// An entry refers to a file that is not in the file table
    #[error("{kind} {index} refers to file {file_id}, which is not in the file table")]
    MissingFile {
        kind: &'static str,
        index: usize,
        file_id: u16,
    },

    /// A resource body could not be decoded
    #[error("Decoding {kind} {index} failed")]
    Resource {
        kind: &'static str,
        index: usize,
        #[source]
        source: ResourceError,
    },

    /// The archive contains no sequence slots
    #[error("The archive contains no sequences")]
    NoSequences,
}

/// Errors that might be returned from [`Archive::from_reader()`]
#[derive(Debug, Error)]
pub enum FromReaderError {
    /// Reading the data failed
    #[error("Reading the archive failed")]
    Read(#[from] io::Error),

    /// The data is not a valid archive
    #[error("Decoding the archive failed")]
    Decode(#[from] DecodeError),
}

/// Errors that might be returned from [`Archive::from_path()`]
#[derive(Debug, Error)]
pub enum FromPathError {
    /// Opening the file itself failed
    #[error("Opening the file failed")]
    FileOpen(#[from] io::Error),

    /// Deserialization failed
    #[error("Reading the archive from file failed")]
    Read(#[from] FromReaderError),
}

/// Slice out a section, validating its declared size and bounds
fn section(
    data: &[u8],
    tag: Tag,
    offset: u32,
    len: u32,
    minimum: u32,
) -> Result<&[u8], DecodeError> {
    let name = String::from_utf8_lossy(&tag).trim_end().to_owned();
    if len < minimum {
        return Err(DecodeError::SectionSize {
            section: name,
            declared: len,
            minimum,
        });
    }

    let offset = offset as usize;
    let end = offset + len as usize;
    data.get(offset..end).ok_or(DecodeError::OutOfBounds {
        what: format!("{name} section"),
        offset,
        end,
    })
}

fn symbol(names: Option<&Vec<Option<String>>>, index: usize) -> Option<String> {
    names?
        .get(index)?
        .as_ref()
        .filter(|name| !name.is_empty())
        .cloned()
}

fn push_body<'a>(bodies: &mut Vec<&'a [u8]>, body: &'a [u8]) -> u16 {
    bodies.push(body);
    (bodies.len() - 1) as u16
}

fn symbols_of<E, R>(
    entries: &[Option<E>],
    records: &[Option<R>],
    file_id: impl Fn(&R) -> u16,
) -> Vec<Option<String>>
where
    E: Entry,
{
    entries
        .iter()
        .zip(records)
        .map(|(entry, record)| Some(entry.as_ref()?.symbol(file_id(record.as_ref()?))))
        .collect()
}

/// Shared state for decoding the entries of one archive
struct EntryDecoder<'a> {
    data: &'a [u8],
    files: &'a [FileRecord],
    archive_id: &'a str,
    policy: DecodePolicy,
}

impl<'a> EntryDecoder<'a> {
    /// Build the shared entry fields, returning the body to parse unless it is missing
    fn info<E: Entry>(
        &self,
        index: usize,
        file_id: u16,
        name: Option<String>,
    ) -> Result<(EntryInfo, Option<&'a [u8]>), DecodeError> {
        let (name, name_is_placeholder) = match name {
            Some(name) => (name, false),
            None => (E::synthesized_name(file_id), true),
        };

        let body = match self.files.get(file_id as usize) {
            Some(record) => Some(record.slice(self.data).ok_or_else(|| {
                DecodeError::OutOfBounds {
                    what: format!("body of {} {index}", E::KIND),
                    offset: record.offset as usize,
                    end: record.offset as usize + record.size as usize,
                }
            })?),
            None if self.policy == DecodePolicy::BestEffort => {
                warn!(
                    archive = %self.archive_id,
                    "{} {index} refers to missing file {file_id}",
                    E::KIND
                );
                None
            }
            None => {
                return Err(DecodeError::MissingFile {
                    kind: E::KIND,
                    index,
                    file_id,
                })
            }
        };

        let info = EntryInfo {
            name,
            name_is_placeholder,
            archive_id: self.archive_id.to_owned(),
            file_id,
            body: body.map(<[u8]>::to_vec).unwrap_or_default(),
        };

        Ok((info, body))
    }

    /// Decide whether a resource that failed to parse may be left unparsed
    fn skip<T>(
        &self,
        kind: &'static str,
        index: usize,
        error: ResourceError,
    ) -> Result<Option<T>, DecodeError> {
        if self.policy == DecodePolicy::BestEffort && error.is_missing_resource() {
            warn!(archive = %self.archive_id, "Leaving {kind} {index} unparsed: {error}");
            Ok(None)
        } else {
            Err(DecodeError::Resource {
                kind,
                index,
                source: error,
            })
        }
    }
}
