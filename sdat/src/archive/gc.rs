//! Shrinking banks and wave archives to the instruments and waves sequences actually play

use super::Archive;
use crate::{
    bytecode::{scan_patches, splice, PatchScan, SpliceError},
    resource::{Bank, Instrument, ResourceError, Sequence, WaveArchive},
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io,
};
use thiserror::Error;
use tracing::{debug, warn};

/// What [`Archive::strip_banks_and_wave_archives()`] removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcSummary {
    pub removed_instruments: usize,
    pub removed_waves: usize,

    /// Sequences whose patch changes were renumbered
    pub rewritten_sequences: usize,

    /// Banks left untouched because a sequence computes its patches at run time
    pub whole_banks: usize,
}

/// Errors that might be returned from [`Archive::strip_banks_and_wave_archives()`]
#[derive(Debug, Error)]
pub enum GcError {
    #[error("Renumbering the patches of sequence {index} failed")]
    Splice {
        index: usize,
        #[source]
        source: SpliceError,
    },

    #[error("Encoding sequence {index} failed")]
    Sequence {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("Encoding {kind} {index} failed")]
    Resource {
        kind: &'static str,
        index: usize,
        #[source]
        source: ResourceError,
    },
}

#[derive(Debug, Default)]
struct BankUsage {
    patches: BTreeSet<u32>,

    /// Some patch can't be told without running the sequence
    dynamic: bool,
}

#[derive(Debug, Default)]
struct WaveUsage {
    waves: BTreeSet<u32>,
    referenced: bool,

    /// A bank referring to the archive was not decoded
    unknown: bool,
}

/// The instruments a bank keeps, and where every selected patch moved to
#[derive(Debug)]
struct ShrunkBank {
    moves: BTreeMap<u32, u32>,
    instruments: Vec<Instrument>,
}

/// Every resource a collection replaces, with its new body
#[derive(Debug, Default)]
struct Plan {
    sequences: Vec<(usize, Sequence, Vec<u8>)>,
    banks: Vec<(usize, Bank, Vec<u8>)>,
    wave_archives: Vec<(usize, WaveArchive, Vec<u8>)>,
}

impl Archive {
    /// Remove the instruments no sequence selects and the waves no instrument plays
    ///
    /// The bytecode of every sequence is scanned for patch changes. Every bank is cut down to
    /// the patches its sequences select (and patch 0, which tracks start with), and the patch
    /// changes are renumbered to match. Then every wave archive is cut down to the waves the
    /// remaining instruments play, and the instruments are renumbered in turn.
    ///
    /// Banks that a sequence selects instruments from at run time are left whole. This is
    /// meant to run after [`Archive::strip()`]. When an error is returned, the archive is left
    /// as it was.
    pub fn strip_banks_and_wave_archives(&mut self) -> Result<GcSummary, GcError> {
        let mut summary = GcSummary::default();
        let plan = self.plan_collection(&mut summary)?;

        for (index, sequence, body) in plan.sequences {
            if let Some(entry) = self.sequences[index].as_mut() {
                entry.sequence = Some(sequence);
                entry.info.body = body;
            }
        }
        for (index, bank, body) in plan.banks {
            if let Some(entry) = self.banks[index].as_mut() {
                entry.bank = Some(bank);
                entry.info.body = body;
            }
        }
        for (index, wave_archive, body) in plan.wave_archives {
            if let Some(entry) = self.wave_archives[index].as_mut() {
                entry.wave_archive = Some(wave_archive);
                entry.info.body = body;
            }
        }

        debug!(?summary, "Collected unused instruments and waves");
        Ok(summary)
    }

    fn plan_collection(&self, summary: &mut GcSummary) -> Result<Plan, GcError> {
        let (usage, mut scans) = self.bank_usage();
        let shrunk = self.shrink_banks(&usage, summary);
        let mut plan = Plan::default();

        for (index, entry) in self.live_sequences() {
            let (Some(bank), Some(scan), Some(sequence)) = (
                shrunk.get(&entry.bank),
                scans[index].as_mut(),
                entry.sequence.as_ref(),
            ) else {
                continue;
            };

            let mut data = sequence.data.clone();
            let mut changed = false;
            for site in 0..scan.patches.len() {
                let old = scan.patches[site].patch;
                let new = bank.moves.get(&old).copied().unwrap_or(old);
                if new != old {
                    splice(&mut data, scan, site, new)
                        .map_err(|source| GcError::Splice { index, source })?;
                    changed = true;
                }
            }

            if changed {
                let sequence = Sequence::new(data);
                let body = sequence
                    .to_bytes()
                    .map_err(|source| GcError::Sequence { index, source })?;
                plan.sequences.push((index, sequence, body));
                summary.rewritten_sequences += 1;
            }
        }

        let wave_moves = self.shrink_wave_archives(&shrunk, &mut plan, summary)?;

        for (index, slot) in self.banks.iter().enumerate() {
            let Some(entry) = slot else { continue };
            let Some(bank) = &entry.bank else { continue };
            let slots = entry.wave_archives;

            let planned = shrunk.get(&(index as u16));
            let mut instruments = match planned {
                Some(planned) => planned.instruments.clone(),
                None => bank.instruments.clone(),
            };

            let mut changed = planned.is_some();
            for range in instruments
                .iter_mut()
                .flat_map(|instrument| instrument.ranges_mut())
                .filter(|range| range.uses_wave())
            {
                let moves = slots
                    .get(range.wave_archive as usize)
                    .and_then(|archive| wave_moves.get(*archive as usize))
                    .and_then(Option::as_ref);
                let Some(moves) = moves else { continue };

                let new = moves.get(&(range.wave as u32)).copied().unwrap_or(range.wave as u32);
                if new != range.wave as u32 {
                    range.wave = new as u16;
                    changed = true;
                }
            }

            if changed {
                let bank = Bank::new(instruments);
                let body = bank.to_bytes().map_err(|source| GcError::Resource {
                    kind: "bank",
                    index,
                    source,
                })?;
                plan.banks.push((index, bank, body));
            }
        }

        Ok(plan)
    }

    /// Scan every sequence, collecting the patches each bank has to provide
    fn bank_usage(&self) -> (HashMap<u16, BankUsage>, Vec<Option<PatchScan>>) {
        let mut usage: HashMap<u16, BankUsage> = HashMap::new();
        let mut scans = vec![None; self.sequences.len()];

        for (index, entry) in self.live_sequences() {
            let usage = usage.entry(entry.bank).or_default();
            usage.patches.insert(0);

            let Some(sequence) = &entry.sequence else {
                warn!(
                    "Sequence {index} ({}) was not decoded, keeping bank {} whole",
                    entry.info.name, entry.bank
                );
                usage.dynamic = true;
                continue;
            };

            match scan_patches(&sequence.data) {
                Ok(scan) => {
                    usage.dynamic |= scan.dynamic;
                    usage.patches.extend(scan.used_patches());
                    scans[index] = Some(scan);
                }
                Err(error) => {
                    warn!(
                        "Scanning sequence {index} ({}) failed, keeping bank {} whole: {error}",
                        entry.info.name, entry.bank
                    );
                    usage.dynamic = true;
                }
            }
        }

        (usage, scans)
    }

    /// Work out which instruments every bank keeps, given the patches in `usage`
    ///
    /// Patches without an instrument move past the end of the shrunk bank, so they still
    /// select nothing.
    fn shrink_banks(
        &self,
        usage: &HashMap<u16, BankUsage>,
        summary: &mut GcSummary,
    ) -> HashMap<u16, ShrunkBank> {
        let mut shrunk = HashMap::new();

        for (index, slot) in self.banks.iter().enumerate() {
            let Some(entry) = slot else { continue };
            let Some(bank) = &entry.bank else { continue };
            let Some(usage) = usage.get(&(index as u16)) else { continue };

            if usage.dynamic {
                debug!("Keeping bank {index} ({}) whole", entry.info.name);
                summary.whole_banks += 1;
                continue;
            }

            let kept: Vec<u32> = usage
                .patches
                .iter()
                .copied()
                .filter(|patch| {
                    !matches!(
                        bank.instruments.get(*patch as usize),
                        None | Some(Instrument::Empty)
                    )
                })
                .collect();

            let moves: BTreeMap<u32, u32> = usage
                .patches
                .iter()
                .map(|patch| {
                    let new = kept
                        .iter()
                        .position(|kept| kept == patch)
                        .unwrap_or(kept.len());
                    (*patch, new as u32)
                })
                .collect();

            let instruments: Vec<Instrument> = kept
                .iter()
                .map(|patch| bank.instruments[*patch as usize].clone())
                .collect();
            summary.removed_instruments += bank.instruments.len() - instruments.len();

            debug!(
                "Bank {index} ({}) keeps {} instruments",
                entry.info.name,
                instruments.len()
            );
            shrunk.insert(index as u16, ShrunkBank { moves, instruments });
        }

        shrunk
    }

    /// Cut every wave archive down to the waves the shrunk banks play, returning how the waves
    /// moved, or `None` for archives that are left alone
    fn shrink_wave_archives(
        &self,
        banks: &HashMap<u16, ShrunkBank>,
        plan: &mut Plan,
        summary: &mut GcSummary,
    ) -> Result<Vec<Option<BTreeMap<u32, u32>>>, GcError> {
        let mut usage: Vec<WaveUsage> = std::iter::repeat_with(WaveUsage::default)
            .take(self.wave_archives.len())
            .collect();

        for (index, slot) in self.banks.iter().enumerate() {
            let Some(entry) = slot else { continue };
            for archive in entry.wave_archives {
                if let Some(usage) = usage.get_mut(archive as usize) {
                    usage.referenced = true;
                    usage.unknown |= entry.bank.is_none();
                }
            }

            let Some(bank) = &entry.bank else { continue };
            let instruments = match banks.get(&(index as u16)) {
                Some(shrunk) => shrunk.instruments.as_slice(),
                None => bank.instruments.as_slice(),
            };
            for range in instruments
                .iter()
                .flat_map(|instrument| instrument.ranges())
                .filter(|range| range.uses_wave())
            {
                let archive = entry.wave_archives.get(range.wave_archive as usize);
                if let Some(usage) = archive.and_then(|archive| usage.get_mut(*archive as usize)) {
                    usage.waves.insert(range.wave as u32);
                }
            }
        }

        let mut wave_moves = Vec::with_capacity(self.wave_archives.len());
        for (index, (slot, usage)) in self.wave_archives.iter().zip(usage).enumerate() {
            let wave_archive = slot
                .as_ref()
                .filter(|_| usage.referenced && !usage.unknown)
                .and_then(|entry| entry.wave_archive.as_ref());
            let Some(wave_archive) = wave_archive else {
                wave_moves.push(None);
                continue;
            };

            let kept: Vec<u32> = usage
                .waves
                .iter()
                .copied()
                .filter(|wave| wave_archive.wave(*wave).is_some())
                .collect();
            let moves: BTreeMap<u32, u32> = usage
                .waves
                .iter()
                .map(|wave| {
                    let new = kept.iter().position(|kept| kept == wave).unwrap_or(kept.len());
                    (*wave, new as u32)
                })
                .collect();

            let shrunk = WaveArchive::from_waves(
                kept.iter()
                    .filter_map(|wave| wave_archive.wave(*wave))
                    .cloned()
                    .collect::<Vec<_>>(),
            );
            summary.removed_waves += wave_archive.waves.len() - shrunk.waves.len();

            if shrunk != *wave_archive {
                let body = shrunk.to_bytes().map_err(|source| GcError::Resource {
                    kind: "wave archive",
                    index,
                    source,
                })?;
                plan.wave_archives.push((index, shrunk, body));
            }
            wave_moves.push(Some(moves));
        }

        Ok(wave_moves)
    }
}
