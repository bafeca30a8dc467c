//! Finding archives embedded in a game image

use super::Archive;
use crate::resource::DecodePolicy;
use tracing::{debug, warn};

/// Decode every archive embedded in `rom`
///
/// Archives are located by [`Archive::SIGNATURE`] and cut out using the file size declared in
/// their header. Hits that fail to decode are skipped. Each archive gets `"{rom_id}#{index}"`
/// as its id, where `index` counts the archives found so far.
pub fn find_archives(rom: &[u8], rom_id: &str, policy: DecodePolicy) -> Vec<Archive> {
    let mut archives = Vec::new();
    let mut offset = 0;

    while let Some(found) = find_signature(&rom[offset..]) {
        let start = offset + found;
        offset = start + 1;

        let Some(declared) = rom.get(start + 8..start + 12) else {
            continue;
        };
        let size = u32::from_le_bytes([declared[0], declared[1], declared[2], declared[3]]);
        let end = start.saturating_add(size as usize);
        let Some(data) = rom.get(start..end) else {
            warn!("Archive at {start:#x} declares {size} bytes, past the end of the image");
            continue;
        };

        let id = format!("{}#{}", rom_id, archives.len());
        match Archive::from_bytes(data, id, policy) {
            Ok(archive) => {
                debug!("Found an archive at {start:#x}..{end:#x}");
                archives.push(archive);
                offset = end;
            }
            Err(error) => warn!("Skipping the archive at {start:#x}: {error}"),
        }
    }

    archives
}

fn find_signature(data: &[u8]) -> Option<usize> {
    data.windows(Archive::SIGNATURE.len())
        .position(|window| window == Archive::SIGNATURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sequence_entry, ArchiveBuilder};
    use pretty_assertions::assert_eq;

    fn archive(name: &str) -> Vec<u8> {
        ArchiveBuilder::new("rom")
            .sequence(sequence_entry(name, 0, &[0xFF]))
            .build()
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn finds_every_archive() {
        let mut rom = vec![0xAA; 0x200];
        rom.extend(archive("BGM_A"));
        rom.extend([0x55; 0x33]);
        rom.extend(archive("BGM_B"));
        rom.extend([0x00; 0x10]);

        let archives = find_archives(&rom, "game.nds", DecodePolicy::FailHard);
        assert_eq!(archives.len(), 2);

        let names: Vec<_> = archives
            .iter()
            .map(|archive| archive.sequences[0].as_ref().unwrap().info.name.as_str())
            .collect();
        assert_eq!(names, ["BGM_A", "BGM_B"]);
        assert_eq!(
            archives[1].sequences[0].as_ref().unwrap().info.archive_id,
            "game.nds#1"
        );
    }

    #[test]
    fn skips_broken_hits() {
        let mut rom = Archive::SIGNATURE.to_vec();
        rom.extend([0xFF; 4]); // absurd size
        rom.extend(Archive::SIGNATURE);
        rom.extend([0x20, 0, 0, 0]); // too small to hold the sections
        rom.extend([0; 0x20]);
        rom.extend(archive("BGM"));

        let archives = find_archives(&rom, "game.nds", DecodePolicy::FailHard);
        assert_eq!(archives.len(), 1);
    }

    #[test]
    fn nothing_to_find() {
        assert!(find_archives(&[0; 64], "empty", DecodePolicy::FailHard).is_empty());
        assert!(find_archives(&Archive::SIGNATURE, "short", DecodePolicy::FailHard).is_empty());
    }
}
