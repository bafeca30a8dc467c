//! Appending one archive to another

use super::{Archive, NO_WAVE_ARCHIVE};
use tracing::{debug, warn};

impl Archive {
    /// Append every slot of `other` after the slots of `self`
    ///
    /// All cross references of the appended entries are renumbered by the number of slots
    /// `self` had before in that category, and file IDs by the length of its file table. The
    /// appended resources are deep copies, `other` is left untouched.
    pub fn merge(&mut self, other: &Archive) {
        let sequences = self.sequences.len();
        let banks = self.banks.len();
        let wave_archives = self.wave_archives.len();
        let players = self.players.len();
        let files = self.file_id_span();

        if self.has_symbols || other.has_symbols {
            self.needs_symbol_cleanup = self.has_symbols != other.has_symbols
                || self.needs_symbol_cleanup
                || other.needs_symbol_cleanup;
            self.has_symbols = true;
        }

        let file_offset = files as u16;

        self.sequences
            .extend(other.sequences.iter().map(|slot| {
                let mut entry = slot.clone()?;
                entry.info.file_id = entry.info.file_id.wrapping_add(file_offset);
                entry.bank = entry.bank.wrapping_add(banks as u16);
                entry.player = match u8::try_from(entry.player as usize + players) {
                    Ok(player) => player,
                    Err(_) => {
                        warn!(
                            "Player {} of sequence {} no longer fits after merging",
                            entry.player, entry.info.name
                        );
                        u8::MAX
                    }
                };
                Some(entry)
            }));

        self.banks.extend(other.banks.iter().map(|slot| {
            let mut entry = slot.clone()?;
            entry.info.file_id = entry.info.file_id.wrapping_add(file_offset);
            for index in &mut entry.wave_archives {
                if *index != NO_WAVE_ARCHIVE {
                    *index = index.wrapping_add(wave_archives as u16);
                }
            }
            Some(entry)
        }));

        self.wave_archives
            .extend(other.wave_archives.iter().map(|slot| {
                let mut entry = slot.clone()?;
                entry.info.file_id = entry.info.file_id.wrapping_add(file_offset);
                Some(entry)
            }));

        self.players.extend(other.players.iter().cloned());

        self.file_table_len = files + other.file_id_span();

        self.merge_count = self.merge_count.wrapping_add(1);

        debug!(
            sequences = self.sequences.len() - sequences,
            banks = self.banks.len() - banks,
            wave_archives = self.wave_archives.len() - wave_archives,
            "Appended slots"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        bank_entry, first_slot, pcm_bank, player, sequence_entry, wave_archive_entry,
        ArchiveBuilder,
    };

    fn archive(id: &str, fill: u8) -> Archive {
        ArchiveBuilder::new(id)
            .wave_archive(wave_archive_entry("WAVE", &[&[fill; 4]]))
            .bank(bank_entry("BANK", first_slot(0), pcm_bank(&[0])))
            .sequence(sequence_entry("SEQ", 0, &[0x3C, fill, 48, 0xFF]))
            .player(player())
            .build()
    }

    #[test]
    fn renumbers_references() {
        let mut merged = archive("a.sdat", 1);
        merged.merge(&archive("b.sdat", 2));

        assert_eq!(merged.merge_count, 1);
        assert_eq!(merged.sequences.len(), 2);
        assert_eq!(merged.players.len(), 2);

        let sequence = merged.sequence(1).unwrap();
        assert_eq!(sequence.info.archive_id, "b.sdat");
        assert_eq!(sequence.info.file_id, 3);
        assert_eq!(sequence.bank, 1);
        assert_eq!(sequence.player, 1);

        let bank = merged.bank(1).unwrap();
        assert_eq!(bank.info.file_id, 4);
        assert_eq!(bank.wave_archives, first_slot(1));
        assert_eq!(merged.wave_archive(1).unwrap().info.file_id, 5);

        // Still resolves to the wave archive it came with
        let wave_archive = merged.wave_archives_of(bank)[0].unwrap();
        assert_eq!(wave_archive.wave(0).unwrap().raw, vec![2; 4]);
    }

    #[test]
    fn offsets_by_file_table() {
        // Two records in the file table nobody refers to
        let mut merged = archive("a.sdat", 1);
        merged.file_table_len = 5;
        merged.merge(&archive("b.sdat", 2));

        assert_eq!(merged.sequence(1).unwrap().info.file_id, 5);
        assert_eq!(merged.bank(1).unwrap().info.file_id, 6);
        assert_eq!(merged.wave_archive(1).unwrap().info.file_id, 7);
        assert_eq!(merged.file_table_len, 8);

        // An ID past the table still pushes the appended ones further
        let mut other = archive("c.sdat", 3);
        other.sequences[0].as_mut().unwrap().info.file_id = 9;
        merged.merge(&other);

        assert_eq!(merged.sequence(2).unwrap().info.file_id, 17);
        assert_eq!(merged.bank(2).unwrap().info.file_id, 9);
        assert_eq!(merged.file_table_len, 18);

        let mut ids: Vec<_> = merged
            .sequences
            .iter()
            .flatten()
            .map(|e| e.info.file_id)
            .chain(merged.banks.iter().flatten().map(|e| e.info.file_id))
            .chain(merged.wave_archives.iter().flatten().map(|e| e.info.file_id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), merged.file_count());
    }

    #[test]
    fn keeps_holes() {
        let mut other = archive("b.sdat", 2);
        other.sequences.insert(0, None);
        other.sequences[1].as_mut().unwrap().bank = 0;

        let mut merged = archive("a.sdat", 1);
        merged.merge(&other);

        assert_eq!(merged.sequences.len(), 3);
        assert!(merged.sequences[1].is_none());
        assert_eq!(merged.sequence(2).unwrap().bank, 1);
    }

    #[test]
    fn symbols() {
        let mut merged = archive("a.sdat", 1);
        let mut other = archive("b.sdat", 2);
        other.has_symbols = false;

        merged.merge(&other);
        assert!(merged.has_symbols);
        assert!(merged.needs_symbol_cleanup);

        let mut plain = archive("c.sdat", 3);
        plain.has_symbols = false;
        plain.merge(&other);
        assert!(!plain.has_symbols);
        assert!(!plain.needs_symbol_cleanup);
    }

    #[test]
    fn associative_counts() {
        let (a, b, c) = (archive("a", 1), archive("b", 2), archive("c", 3));

        let mut left = a.clone();
        left.merge(&b);
        left.merge(&c);

        let mut bc = b.clone();
        bc.merge(&c);
        let mut right = a.clone();
        right.merge(&bc);

        assert_eq!(left.sequences.len(), right.sequences.len());
        assert_eq!(left.banks.len(), right.banks.len());
        assert_eq!(left.wave_archives.len(), right.wave_archives.len());
        assert_eq!(left.file_count(), right.file_count());

        let bodies = |archive: &Archive| {
            let mut bodies: Vec<_> = archive
                .sequences
                .iter()
                .flatten()
                .map(|entry| entry.info.body.clone())
                .collect();
            bodies.sort();
            bodies
        };
        assert_eq!(bodies(&left), bodies(&right));

        // References resolve to the same content either way
        for (l, r) in left.live_sequences().zip(right.live_sequences()) {
            let lbank = left.bank(l.1.bank).unwrap();
            let rbank = right.bank(r.1.bank).unwrap();
            assert_eq!(lbank.info.body, rbank.info.body);
            assert_eq!(left.wave_archives_of(lbank), right.wave_archives_of(rbank));
        }
    }

    #[test]
    fn merged_archive_round_trips() {
        let mut merged = archive("a.sdat", 1);
        merged.merge(&archive("b.sdat", 2));
        merged.renumber_files();

        let bytes = merged.to_bytes().unwrap();
        let decoded =
            Archive::from_bytes(&bytes, "merged", crate::resource::DecodePolicy::FailHard)
                .unwrap();
        assert_eq!(decoded.sequences.len(), 2);
        assert_eq!(decoded.merge_count, 1);
        assert_eq!(decoded.sequence(1).unwrap().bank, 1);
    }
}
