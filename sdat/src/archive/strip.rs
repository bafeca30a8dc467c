//! Deduplication and removal of everything no kept sequence depends on

use super::{Archive, Entry, SequenceEntry, NO_WAVE_ARCHIVE};
use crate::filter::{Decider, Keep};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Tunes what [`Archive::strip()`] removes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripOptions {
    /// Drop the sequences the decider excludes
    ///
    /// When this is off, exclusions are ignored and only duplicates are removed.
    pub remove_excluded: bool,
}

impl Default for StripOptions {
    fn default() -> Self {
        Self {
            remove_excluded: true,
        }
    }
}

/// What a strip removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StripSummary {
    pub duplicate_sequences: usize,
    pub duplicate_banks: usize,
    pub duplicate_wave_archives: usize,
    pub excluded_sequences: usize,

    /// Live entries that were dropped for any reason, per category
    pub removed_sequences: usize,
    pub removed_banks: usize,
    pub removed_wave_archives: usize,
    pub removed_players: usize,
}

impl Archive {
    /// Remove duplicates, holes and everything that no kept sequence needs
    ///
    /// Wave archives are deduplicated on their bytes, banks on their bytes plus the wave
    /// archives they resolve to, and sequences on their bytes plus the bank they resolve to.
    /// Of every duplicate group only the first member is kept, and references to the others
    /// are pointed at it. Sequences the decider excludes never take part in deduplication.
    ///
    /// Afterwards every category is compacted, keeping only the banks used by kept sequences
    /// and the wave archives used by kept banks, and file IDs are reassigned.
    pub fn strip<D>(&mut self, decider: &D, options: StripOptions) -> StripSummary
    where
        D: Decider + ?Sized,
    {
        let mut summary = StripSummary::default();

        let wave_archive_leaders = find_duplicates(&self.wave_archives, |a, b| {
            a.info.body == b.info.body
        });
        let resolve_wave_archive = |index: u16| match index {
            NO_WAVE_ARCHIVE => NO_WAVE_ARCHIVE,
            index => leader(&wave_archive_leaders, index as usize) as u16,
        };

        let bank_leaders = find_duplicates(&self.banks, |a, b| {
            a.info.body == b.info.body
                && a.wave_archives.map(resolve_wave_archive)
                    == b.wave_archives.map(resolve_wave_archive)
        });
        let resolve_bank = |index: u16| leader(&bank_leaders, index as usize) as u16;

        let excluded: Vec<bool> = self
            .sequences
            .iter()
            .map(|slot| match slot {
                Some(entry) if options.remove_excluded => {
                    decider.decide(&entry.info.name, &entry.info.archive_id) == Keep::Exclude
                }
                _ => false,
            })
            .collect();

        let sequence_leaders = {
            let candidates: Vec<Option<&SequenceEntry>> = self
                .sequences
                .iter()
                .zip(&excluded)
                .map(|(slot, excluded)| slot.as_ref().filter(|_| !excluded))
                .collect();

            find_duplicates(&candidates, |a, b| {
                a.info.body == b.info.body && resolve_bank(a.bank) == resolve_bank(b.bank)
            })
        };

        summary.duplicate_wave_archives = count_duplicates(&wave_archive_leaders);
        summary.duplicate_banks = count_duplicates(&bank_leaders);
        summary.duplicate_sequences = count_duplicates(&sequence_leaders);
        summary.excluded_sequences = excluded.iter().filter(|excluded| **excluded).count();

        // Decide what survives
        let mut kept_sequences = Vec::new();
        for (index, slot) in self.sequences.iter().enumerate() {
            let Some(entry) = slot else { continue };

            if excluded[index] {
                debug!("Excluding sequence {index} ({})", entry.info.name);
                continue;
            }

            if sequence_leaders[index] != Some(index) {
                continue;
            }

            if self.bank(resolve_bank(entry.bank)).is_none() {
                warn!(
                    "Dropping sequence {index} ({}), its bank {} does not exist",
                    entry.info.name, entry.bank
                );
                continue;
            }

            kept_sequences.push(index);
        }

        let mut kept_banks: Vec<usize> = kept_sequences
            .iter()
            .filter_map(|index| self.sequences[*index].as_ref())
            .map(|entry| resolve_bank(entry.bank) as usize)
            .collect();
        kept_banks.sort_unstable();
        kept_banks.dedup();

        let mut kept_wave_archives: Vec<usize> = Vec::new();
        for bank in kept_banks.iter().filter_map(|index| self.banks[*index].as_ref()) {
            for index in bank.wave_archives {
                if index == NO_WAVE_ARCHIVE {
                    continue;
                }

                let resolved = resolve_wave_archive(index);
                if self.wave_archive(resolved).is_some() {
                    kept_wave_archives.push(resolved as usize);
                } else {
                    warn!(
                        "Bank {} refers to wave archive {index}, which does not exist",
                        bank.info.name
                    );
                }
            }
        }
        kept_wave_archives.sort_unstable();
        kept_wave_archives.dedup();

        let bank_moves: HashMap<usize, u16> = kept_banks
            .iter()
            .enumerate()
            .map(|(new, old)| (*old, new as u16))
            .collect();
        let wave_archive_moves: HashMap<usize, u16> = kept_wave_archives
            .iter()
            .enumerate()
            .map(|(new, old)| (*old, new as u16))
            .collect();

        // Rebuild every category compactly
        let mut sequences = Vec::with_capacity(kept_sequences.len());
        for index in &kept_sequences {
            let Some(mut entry) = self.sequences[*index].take() else { continue };
            if let Some(bank) = bank_moves.get(&(resolve_bank(entry.bank) as usize)) {
                entry.bank = *bank;
                sequences.push(Some(entry));
            }
        }

        let mut banks = Vec::with_capacity(kept_banks.len());
        for index in &kept_banks {
            if let Some(mut entry) = self.banks[*index].take() {
                entry.wave_archives = entry.wave_archives.map(|index| {
                    match wave_archive_moves.get(&(resolve_wave_archive(index) as usize)) {
                        Some(new) if index != NO_WAVE_ARCHIVE => *new,
                        _ => NO_WAVE_ARCHIVE,
                    }
                });
                banks.push(Some(entry));
            }
        }

        let mut wave_archives = Vec::with_capacity(kept_wave_archives.len());
        for index in &kept_wave_archives {
            wave_archives.push(self.wave_archives[*index].take());
        }

        summary.removed_sequences = live(&self.sequences);
        summary.removed_banks = live(&self.banks);
        summary.removed_wave_archives = live(&self.wave_archives);

        self.sequences = sequences;
        self.banks = banks;
        self.wave_archives = wave_archives;

        summary.removed_players = self.strip_players();

        self.renumber_files();
        if self.needs_symbol_cleanup {
            self.clean_up_symbols();
        }

        debug!(?summary, "Stripped archive");
        summary
    }

    /// Keep only the players kept sequences use, collapsing players with identical settings
    fn strip_players(&mut self) -> usize {
        if self.players.is_empty() {
            return 0;
        }

        let before = live(&self.players);
        let mut players = Vec::new();
        let mut moves = HashMap::new();

        let mut used: Vec<u8> = self
            .sequences
            .iter()
            .flatten()
            .map(|entry| entry.player)
            .collect();
        used.sort_unstable();
        used.dedup();

        for index in used {
            match self.player(index) {
                Some(player) => {
                    let new = match players.iter().position(|kept| kept == &Some(*player)) {
                        Some(existing) => existing,
                        None => {
                            players.push(Some(*player));
                            players.len() - 1
                        }
                    };
                    moves.insert(index, new as u8);
                }
                None => warn!("Player {index} is used but does not exist"),
            }
        }

        for entry in self.sequences.iter_mut().flatten() {
            if let Some(new) = moves.get(&entry.player) {
                entry.player = *new;
            }
        }

        self.players = players;
        before - live(&self.players)
    }
}

/// For every slot, the index of the first earlier slot it duplicates, itself if it is the
/// first of its kind, or `None` for holes
fn find_duplicates<E, F>(slots: &[Option<E>], equal: F) -> Vec<Option<usize>>
where
    F: Fn(&E, &E) -> bool,
{
    let mut leaders = vec![None; slots.len()];

    for i in 0..slots.len() {
        let Some(a) = &slots[i] else { continue };
        if leaders[i].is_some() {
            continue;
        }

        leaders[i] = Some(i);
        for j in i + 1..slots.len() {
            if leaders[j].is_some() {
                continue;
            }

            if let Some(b) = &slots[j] {
                if equal(a, b) {
                    debug!("Slot {j} duplicates slot {i}");
                    leaders[j] = Some(i);
                }
            }
        }
    }

    leaders
}

/// Resolve an index to the first slot of its duplicate group
///
/// Indices outside of the table or pointing at holes resolve to themselves.
fn leader(leaders: &[Option<usize>], index: usize) -> usize {
    leaders.get(index).copied().flatten().unwrap_or(index)
}

fn count_duplicates(leaders: &[Option<usize>]) -> usize {
    leaders
        .iter()
        .enumerate()
        .filter(|(index, leader)| matches!(leader, Some(leader) if leader != index))
        .count()
}

fn live<T>(slots: &[Option<T>]) -> usize {
    slots.iter().flatten().count()
}

/// Names of the live entries of a category, used in tests and tools to inspect strip results
pub fn names<E: Entry>(slots: &[Option<E>]) -> Vec<&str> {
    slots
        .iter()
        .flatten()
        .map(|entry| entry.info().name.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        archive::PlayerEntry,
        filter::Rules,
        resource::DecodePolicy,
        testing::{
            bank_entry, first_slot, pcm_bank, player, sequence_entry, wave_archive_entry,
            ArchiveBuilder,
        },
    };
    use pretty_assertions::assert_eq;

    fn keep_all(_: &str, _: &str) -> Keep {
        Keep::Unspecified
    }

    /// Two distinct sequences, each on its own copy of the same bank and wave archive
    fn duplicated_banks() -> Archive {
        ArchiveBuilder::new("game.sdat")
            .sequence(sequence_entry("BGM_A", 0, &[0x3C, 100, 48, 0xFF]))
            .sequence(sequence_entry("BGM_B", 1, &[0x3E, 100, 48, 0xFF]))
            .bank(bank_entry("BANK_A", first_slot(0), pcm_bank(&[0])))
            .bank(bank_entry("BANK_B", first_slot(1), pcm_bank(&[0])))
            .wave_archive(wave_archive_entry("WAVE_A", &[&[1, 2, 3, 4]]))
            .wave_archive(wave_archive_entry("WAVE_B", &[&[1, 2, 3, 4]]))
            .player(player())
            .build()
    }

    #[test]
    fn collapses_identical_banks_and_wave_archives() {
        let mut archive = duplicated_banks();
        let summary = archive.strip(&keep_all, StripOptions::default());

        assert_eq!(summary.duplicate_banks, 1);
        assert_eq!(summary.duplicate_wave_archives, 1);
        assert_eq!(summary.duplicate_sequences, 0);

        assert_eq!(names(&archive.sequences), ["BGM_A", "BGM_B"]);
        assert_eq!(names(&archive.banks), ["BANK_A"]);
        assert_eq!(names(&archive.wave_archives), ["WAVE_A"]);

        assert!(archive.sequences.iter().flatten().all(|entry| entry.bank == 0));
        assert_eq!(archive.bank(0).unwrap().wave_archives, first_slot(0));
        assert_eq!(archive.file_count(), 4);
        assert_eq!(archive.bank(0).unwrap().info.file_id, 2);
    }

    #[test]
    fn banks_with_different_wave_archives_stay_apart() {
        let mut archive = duplicated_banks();
        archive.wave_archives[1] = Some(wave_archive_entry("WAVE_B", &[&[9, 9, 9, 9]]));

        archive.strip(&keep_all, StripOptions::default());
        assert_eq!(names(&archive.banks), ["BANK_A", "BANK_B"]);
        assert_eq!(archive.sequence(1).unwrap().bank, 1);
        assert_eq!(archive.bank(1).unwrap().wave_archives, first_slot(1));
    }

    #[test]
    fn duplicate_sequences() {
        let mut archive = duplicated_banks();
        let copy = archive.sequences[0].clone().unwrap();
        archive.sequences.push(Some(SequenceEntry {
            info: crate::archive::EntryInfo {
                name: "BGM_A_COPY".into(),
                ..copy.info
            },
            bank: 1,
            ..copy
        }));

        let summary = archive.strip(&keep_all, StripOptions::default());
        assert_eq!(summary.duplicate_sequences, 1);
        assert_eq!(summary.removed_sequences, 1);
        assert_eq!(names(&archive.sequences), ["BGM_A", "BGM_B"]);
    }

    #[test]
    fn excluding_the_representative() {
        let mut archive = duplicated_banks();
        let copy = archive.sequences[0].clone().unwrap();
        archive.sequences.push(Some(SequenceEntry {
            info: crate::archive::EntryInfo {
                name: "BGM_A_COPY".into(),
                ..copy.info
            },
            ..copy
        }));

        let mut rules = Rules::new();
        rules.exclude("BGM_A");

        let summary = archive.strip(&rules, StripOptions::default());
        assert_eq!(summary.excluded_sequences, 1);
        assert_eq!(summary.duplicate_sequences, 0);
        assert_eq!(names(&archive.sequences), ["BGM_B", "BGM_A_COPY"]);
    }

    #[test]
    fn keeping_excluded() {
        let mut archive = duplicated_banks();

        let mut rules = Rules::new();
        rules.exclude("*");

        let options = StripOptions {
            remove_excluded: false,
        };
        archive.strip(&rules, options);
        assert_eq!(names(&archive.sequences), ["BGM_A", "BGM_B"]);
    }

    #[test]
    fn removes_holes_and_unused() {
        let mut archive = ArchiveBuilder::new("game.sdat")
            .sequence_hole()
            .sequence(sequence_entry("BGM", 2, &[0xFF]))
            .bank(bank_entry("UNUSED", first_slot(0), pcm_bank(&[0])))
            .bank(bank_entry("ALSO_UNUSED", first_slot(0), pcm_bank(&[1])))
            .bank(bank_entry("USED", first_slot(1), pcm_bank(&[0])))
            .wave_archive(wave_archive_entry("WAVE_UNUSED", &[&[1; 4]]))
            .wave_archive(wave_archive_entry("WAVE_USED", &[&[2; 4]]))
            .build();

        let summary = archive.strip(&keep_all, StripOptions::default());
        assert_eq!(summary.removed_banks, 2);
        assert_eq!(summary.removed_wave_archives, 1);
        assert_eq!(archive.sequences.len(), 1);
        assert_eq!(names(&archive.banks), ["USED"]);
        assert_eq!(names(&archive.wave_archives), ["WAVE_USED"]);
        assert_eq!(archive.sequence(0).unwrap().bank, 0);
        assert_eq!(archive.bank(0).unwrap().wave_archives, first_slot(0));
    }

    #[test]
    fn no_dangling_references() {
        let mut archive = duplicated_banks();
        archive.merge(&duplicated_banks());
        archive.sequences.push(Some(sequence_entry("BROKEN", 40, &[0xFF])));
        archive.banks[3].as_mut().unwrap().wave_archives[2] = 77;

        archive.strip(&keep_all, StripOptions::default());

        assert!(archive.sequences.iter().all(Option::is_some));
        assert!(archive.banks.iter().all(Option::is_some));
        assert!(archive.wave_archives.iter().all(Option::is_some));
        for (_, sequence) in archive.live_sequences() {
            let bank = archive.bank(sequence.bank).unwrap();
            for index in bank.wave_archives {
                assert!(index == NO_WAVE_ARCHIVE || archive.wave_archive(index).is_some());
            }
            assert!(archive.player(sequence.player).is_some());
        }
        assert!(!names(&archive.sequences).contains(&"BROKEN"));
    }

    #[test]
    fn players() {
        let other = PlayerEntry {
            max_sequences: 4,
            ..player()
        };

        let mut archive = duplicated_banks();
        archive.players = vec![Some(other), Some(player()), Some(player()), None];
        archive.sequences[0].as_mut().unwrap().player = 2;
        archive.sequences[1].as_mut().unwrap().player = 1;

        let summary = archive.strip(&keep_all, StripOptions::default());
        assert_eq!(summary.removed_players, 2);
        assert_eq!(archive.players, vec![Some(player())]);
        assert!(archive.sequences.iter().flatten().all(|entry| entry.player == 0));
    }

    #[test]
    fn idempotent() {
        let mut archive = duplicated_banks();
        archive.merge(&duplicated_banks());

        archive.strip(&keep_all, StripOptions::default());
        let once = archive.to_bytes().unwrap();

        archive.strip(&keep_all, StripOptions::default());
        assert_eq!(archive.to_bytes().unwrap(), once);

        let mut decoded = Archive::from_bytes(&once, "game.sdat", DecodePolicy::FailHard).unwrap();
        decoded.strip(&keep_all, StripOptions::default());
        assert_eq!(decoded.to_bytes().unwrap(), once);
    }

    #[test]
    fn cleans_up_placeholder_names() {
        let mut archive = duplicated_banks();
        let mut plain = duplicated_banks();
        plain.has_symbols = false;
        for entry in plain.sequences.iter_mut().flatten() {
            entry.info.name_is_placeholder = true;
        }
        plain.sequences[0].as_mut().unwrap().info.body.push(0xFF);
        plain.sequences[1].as_mut().unwrap().info.body.push(0xFF);

        archive.merge(&plain);
        assert!(archive.needs_symbol_cleanup);

        archive.strip(&keep_all, StripOptions::default());
        assert!(!archive.needs_symbol_cleanup);
        assert_eq!(names(&archive.sequences), ["BGM_A", "BGM_B", "SSEQ0002", "SSEQ0003"]);
    }
}
