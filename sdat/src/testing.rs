//! Builders for assembling archives in tests

use crate::{
    archive::{
        Archive, BankEntry, EntryInfo, PlayerEntry, SequenceEntry, WaveArchiveEntry,
        NO_WAVE_ARCHIVE,
    },
    resource::{Bank, Instrument, Range, Sequence, Wave, WaveArchive, WaveFormat},
};

pub struct ArchiveBuilder {
    archive_id: String,
    archive: Archive,
}

impl ArchiveBuilder {
    pub fn new(archive_id: &str) -> Self {
        Self {
            archive_id: archive_id.to_owned(),
            archive: Archive {
                has_symbols: true,
                ..Default::default()
            },
        }
    }

    pub fn sequence(mut self, entry: SequenceEntry) -> Self {
        self.archive.sequences.push(Some(entry));
        self
    }

    pub fn sequence_hole(mut self) -> Self {
        self.archive.sequences.push(None);
        self
    }

    pub fn bank(mut self, entry: BankEntry) -> Self {
        self.archive.banks.push(Some(entry));
        self
    }

    pub fn wave_archive(mut self, entry: WaveArchiveEntry) -> Self {
        self.archive.wave_archives.push(Some(entry));
        self
    }

    pub fn player(mut self, player: PlayerEntry) -> Self {
        self.archive.players.push(Some(player));
        self
    }

    pub fn without_symbols(mut self) -> Self {
        self.archive.has_symbols = false;
        self
    }

    /// Stamp the archive ID on every entry and hand out file IDs in encoding order
    pub fn build(mut self) -> Archive {
        let id = &self.archive_id;
        let archive = &mut self.archive;

        for entry in archive.sequences.iter_mut().flatten() {
            entry.info.archive_id = id.clone();
        }
        for entry in archive.banks.iter_mut().flatten() {
            entry.info.archive_id = id.clone();
        }
        for entry in archive.wave_archives.iter_mut().flatten() {
            entry.info.archive_id = id.clone();
        }
        archive.renumber_files();

        if !archive.has_symbols {
            archive.clean_up_symbols();
            for entry in archive.sequences.iter_mut().flatten() {
                entry.info.name_is_placeholder = true;
            }
            for entry in archive.banks.iter_mut().flatten() {
                entry.info.name_is_placeholder = true;
            }
            for entry in archive.wave_archives.iter_mut().flatten() {
                entry.info.name_is_placeholder = true;
            }
        }

        self.archive
    }
}

fn info(name: &str, body: Vec<u8>) -> EntryInfo {
    EntryInfo {
        name: name.to_owned(),
        name_is_placeholder: false,
        archive_id: String::new(),
        file_id: 0,
        body,
    }
}

pub fn sequence_entry(name: &str, bank: u16, data: &[u8]) -> SequenceEntry {
    let sequence = Sequence::new(data.to_vec());

    SequenceEntry {
        info: info(name, sequence.to_bytes().unwrap()),
        bank,
        volume: 127,
        channel_priority: 64,
        player_priority: 32,
        player: 0,
        reserved: 0,
        reserved_tail: [0; 2],
        sequence: Some(sequence),
    }
}

pub fn bank_entry(name: &str, wave_archives: [u16; 4], bank: Bank) -> BankEntry {
    BankEntry {
        info: info(name, bank.to_bytes().unwrap()),
        wave_archives,
        reserved: 0,
        bank: Some(bank),
    }
}

pub fn wave_archive_entry(name: &str, waves: &[&[u8]]) -> WaveArchiveEntry {
    let wave_archive = WaveArchive::from_waves(waves.iter().map(|raw| pcm_wave(raw)));

    WaveArchiveEntry {
        info: info(name, wave_archive.to_bytes().unwrap()),
        reserved: 0,
        wave_archive: Some(wave_archive),
    }
}

/// Only the first wave archive slot in use
pub fn first_slot(index: u16) -> [u16; 4] {
    [index, NO_WAVE_ARCHIVE, NO_WAVE_ARCHIVE, NO_WAVE_ARCHIVE]
}

pub fn pcm_wave(raw: &[u8]) -> Wave {
    Wave::new(WaveFormat::Pcm8, false, 8000, 0xF7C0, 0, raw.to_vec())
}

pub fn pcm_range(wave: u16, wave_archive: u16) -> Range {
    Range {
        low_note: 0,
        high_note: 127,
        record: 1,
        wave,
        wave_archive,
        base_note: 60,
        attack: 127,
        decay: 127,
        sustain: 127,
        release: 127,
        pan: 64,
    }
}

/// A bank with one single-range PCM instrument per wave, all in the first wave archive slot
pub fn pcm_bank(waves: &[u16]) -> Bank {
    Bank::new(
        waves
            .iter()
            .map(|wave| Instrument::Single(pcm_range(*wave, 0)))
            .collect(),
    )
}

pub fn player() -> PlayerEntry {
    PlayerEntry {
        max_sequences: 1,
        padding: 0,
        channel_mask: 0xFFFF,
        heap_size: 0,
    }
}
