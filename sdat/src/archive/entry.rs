//! The typed slots of an archive's index section

use crate::resource::{Bank, Sequence, WaveArchive};

/// The value of a bank's wave archive slot that refers to no archive at all
pub const NO_WAVE_ARCHIVE: u16 = 0xFFFF;

/// The fields every file-backed entry shares
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntryInfo {
    /// The original name, from the symbol section or synthesized from the file ID
    pub name: String,

    /// Set when the name was not stored in a symbol section, and should be re-synthesized from
    /// the final file ID before it is written
    pub name_is_placeholder: bool,

    /// Identifies the archive this entry was decoded from, for provenance after merges
    pub archive_id: String,

    /// Index into the file table
    pub file_id: u16,

    /// The raw body, exactly as stored in the file blob
    pub body: Vec<u8>,
}

/// Behaviour shared by the sequence, bank and wave archive entries
pub trait Entry {
    /// Prefix of names synthesized for entries without a symbol, e.g. `"SSEQ"`
    const PREFIX: &'static str;

    /// What the entry is called in log and error messages
    const KIND: &'static str;

    fn info(&self) -> &EntryInfo;
    fn info_mut(&mut self) -> &mut EntryInfo;

    /// The name an entry gets when its archive carries no symbols
    fn synthesized_name(file_id: u16) -> String {
        format!("{}{:04x}", Self::PREFIX, file_id)
    }

    /// The name as it should be written, never a placeholder
    fn symbol(&self, file_id: u16) -> String {
        let info = self.info();
        if info.name_is_placeholder || info.name.is_empty() {
            Self::synthesized_name(file_id)
        } else {
            info.name.clone()
        }
    }
}

/// A sequence slot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequenceEntry {
    pub info: EntryInfo,

    /// The bank slot the sequence plays with
    pub bank: u16,

    pub volume: u8,
    pub channel_priority: u8,
    pub player_priority: u8,

    /// The player slot the sequence is played on
    pub player: u8,

    pub reserved: u16,
    pub reserved_tail: [u8; 2],

    /// The parsed body, `None` when a best-effort decode skipped it
    pub sequence: Option<Sequence>,
}

/// A bank slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankEntry {
    pub info: EntryInfo,

    /// The wave archive slots the bank's instruments refer to, or [`NO_WAVE_ARCHIVE`]
    pub wave_archives: [u16; 4],

    pub reserved: u16,

    /// The parsed body, `None` when a best-effort decode skipped it
    pub bank: Option<Bank>,
}

/// A wave archive slot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WaveArchiveEntry {
    pub info: EntryInfo,
    pub reserved: u16,

    /// The parsed body, `None` when a best-effort decode skipped it
    pub wave_archive: Option<WaveArchive>,
}

/// Playback engine parameters a sequence is played with
///
/// Players are never simulated; they are only carried along, merged and deduplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PlayerEntry {
    /// How many sequences may play on this player simultaneously
    pub max_sequences: u8,

    pub padding: u8,

    /// The hardware channels the player may allocate
    pub channel_mask: u16,

    pub heap_size: u32,
}

impl Default for BankEntry {
    fn default() -> Self {
        Self {
            info: EntryInfo::default(),
            wave_archives: [NO_WAVE_ARCHIVE; 4],
            reserved: 0,
            bank: None,
        }
    }
}

impl Entry for SequenceEntry {
    const PREFIX: &'static str = "SSEQ";
    const KIND: &'static str = "sequence";

    fn info(&self) -> &EntryInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut EntryInfo {
        &mut self.info
    }
}

impl Entry for BankEntry {
    const PREFIX: &'static str = "SBNK";
    const KIND: &'static str = "bank";

    fn info(&self) -> &EntryInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut EntryInfo {
        &mut self.info
    }
}

impl Entry for WaveArchiveEntry {
    const PREFIX: &'static str = "SWAR";
    const KIND: &'static str = "wave archive";

    fn info(&self) -> &EntryInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut EntryInfo {
        &mut self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_names() {
        assert_eq!(SequenceEntry::synthesized_name(0x1F), "SSEQ001f");
        assert_eq!(BankEntry::synthesized_name(0x100), "SBNK0100");
        assert_eq!(WaveArchiveEntry::synthesized_name(0xABCD), "SWARabcd");
    }

    #[test]
    fn symbols() {
        let mut entry = SequenceEntry::default();
        entry.info.name = "BGM_TITLE".into();
        assert_eq!(entry.symbol(7), "BGM_TITLE");

        entry.info.name_is_placeholder = true;
        assert_eq!(entry.symbol(7), "SSEQ0007");

        entry.info.name_is_placeholder = false;
        entry.info.name.clear();
        assert_eq!(entry.symbol(7), "SSEQ0007");
    }
}
