//! Static analysis of which instruments a sequence can select

use super::{encode_vl, op, EndOfData, Stream};
use std::collections::BTreeSet;
use thiserror::Error;

/// A literal patch change found in the bytecode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSite {
    /// Offset of the command (or of its prefix)
    pub command: usize,

    /// Offset of the VL operand
    pub operand: usize,

    /// Length of the VL operand in bytes
    pub len: usize,

    pub patch: u32,
}

/// The result of [`scan_patches()`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatchScan {
    /// Every literal patch change, ordered by position
    pub patches: Vec<PatchSite>,

    /// Offsets of every literal 24-bit branch operand, ordered
    pub branches: Vec<usize>,

    /// Set when a patch or a branch target is computed at run time, so the scan can't tell
    /// every instrument that may be used
    pub dynamic: bool,
}

impl PatchScan {
    /// Every patch a literal patch change selects
    pub fn used_patches(&self) -> BTreeSet<u32> {
        self.patches.iter().map(|site| site.patch).collect()
    }
}

/// Errors that might be returned from [`splice()`]
#[derive(Debug, Error)]
pub enum SpliceError {
    #[error("There is no patch site {0}")]
    UnknownSite(usize),

    #[error("The branch at {position:#x} would jump past the 24-bit range")]
    TargetOutOfRange { position: usize },

    #[error("A recorded branch operand lies outside the bytecode")]
    Branch(#[from] EndOfData),
}

/// Walk every path through the bytecode, without executing it, and record its patch changes
///
/// Walking starts at offset 0 and follows track openings, jumps and calls. Conditional
/// commands are assumed to be both taken and not taken.
pub fn scan_patches(data: &[u8]) -> Result<PatchScan, EndOfData> {
    let mut scan = PatchScan::default();
    let mut visited = BTreeSet::new();
    let mut pending = vec![0];

    while let Some(start) = pending.pop() {
        let mut stream = Stream::new(data, start);
        loop {
            if !visited.insert(stream.position()) {
                break;
            }
            if !scan.command(&mut stream, &mut pending)? {
                break;
            }
        }
    }

    scan.patches.sort_by_key(|site| site.command);
    scan.branches.sort_unstable();
    scan.branches.dedup();
    Ok(scan)
}

impl PatchScan {
    /// Record a single command, returning whether execution can fall through to the next one
    fn command(&mut self, stream: &mut Stream, pending: &mut Vec<usize>) -> Result<bool, EndOfData> {
        let command = stream.position();
        let opcode = stream.read_u8()?;

        match opcode {
            op::PATCH => {
                let operand = stream.position();
                let patch = stream.read_vl()?;
                self.patches.push(PatchSite {
                    command,
                    operand,
                    len: stream.position() - operand,
                    patch,
                });
            }
            op::OPEN_TRACK | op::JUMP | op::CALL => {
                if opcode == op::OPEN_TRACK {
                    stream.read_u8()?;
                }
                self.branches.push(stream.position());
                pending.push(u32::from(stream.read_u24()?) as usize);

                return Ok(opcode != op::JUMP);
            }
            op::IF => {
                // Whatever the condition does, the next command is reachable either way
                self.command(stream, pending)?;
            }
            op::RANDOM | op::FROM_VARIABLE => {
                let target = stream.data().get(stream.position()).copied();
                if matches!(target, Some(op::PATCH | op::JUMP | op::CALL)) {
                    self.dynamic = true;
                }
                stream.skip_operands(opcode)?;
            }
            op::RETURN | op::END => return Ok(false),
            _ => stream.skip_operands(opcode)?,
        }

        Ok(true)
    }
}

/// Replace the operand of patch site `site` by `patch`, growing or shrinking the bytecode as
/// needed
///
/// Positions in `scan` that lie after the operand move along with the bytes, and branch
/// targets pointing past the operand are corrected.
pub fn splice(
    data: &mut Vec<u8>,
    scan: &mut PatchScan,
    site: usize,
    patch: u32,
) -> Result<(), SpliceError> {
    let PatchSite { operand, len, .. } = *scan
        .patches
        .get(site)
        .ok_or(SpliceError::UnknownSite(site))?;

    let bytes = encode_vl(patch);
    let delta = bytes.len() as isize - len as isize;
    data.splice(operand..operand + len, bytes.iter().copied());

    let shift = |position: &mut usize| {
        if *position > operand {
            *position = (*position as isize + delta) as usize;
        }
    };

    for other in &mut scan.patches {
        shift(&mut other.command);
        shift(&mut other.operand);
    }
    for branch in &mut scan.branches {
        shift(branch);
    }
    scan.patches[site].len = bytes.len();
    scan.patches[site].patch = patch;

    if delta == 0 {
        return Ok(());
    }

    for &position in &scan.branches {
        let mut target = u32::from(Stream::new(data, position).read_u24()?) as usize;
        if target <= operand {
            continue;
        }

        target = (target as isize + delta) as usize;
        if target > 0xFF_FFFF {
            return Err(SpliceError::TargetOutOfRange { position });
        }
        data[position..position + 3].copy_from_slice(&(target as u32).to_le_bytes()[..3]);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn literal_patches() {
        #[rustfmt::skip]
        let data = [
            op::PATCH, 0x02,
            0x3C, 0x64, 0x30,
            op::PATCH, 0x81, 0x00,
            0x3E, 0x64, 0x30,
            op::END,
        ];
        let scan = scan_patches(&data).unwrap();

        assert!(!scan.dynamic);
        assert_eq!(scan.used_patches(), BTreeSet::from([2, 128]));
        assert_eq!(
            scan.patches[1],
            PatchSite {
                command: 5,
                operand: 6,
                len: 2,
                patch: 128
            }
        );
    }

    #[test]
    fn follows_tracks_and_calls() {
        #[rustfmt::skip]
        let data = [
            op::ALLOCATE_TRACKS, 0x03, 0x00,
            op::OPEN_TRACK, 1, 14, 0, 0,
            op::CALL, 18, 0, 0,
            op::PATCH, 1,
            op::END,
            op::PATCH, 9, // unreachable
            op::END,
            op::PATCH, 2, // 18: subroutine
            op::RETURN,
        ];
        let scan = scan_patches(&data).unwrap();
        assert_eq!(scan.used_patches(), BTreeSet::from([1, 2]));
        assert_eq!(scan.branches, vec![5, 9]);
    }

    #[test]
    fn loops_terminate() {
        let data = [op::PATCH, 4, 0x3C, 0x64, 0x30, op::JUMP, 0, 0, 0];
        let scan = scan_patches(&data).unwrap();
        assert_eq!(scan.patches.len(), 1);
    }

    #[test]
    fn conditional_patches_count() {
        let data = [op::IF, op::PATCH, 7, op::END];
        let scan = scan_patches(&data).unwrap();
        assert_eq!(scan.patches[0].operand, 2);
        assert_eq!(scan.used_patches(), BTreeSet::from([7]));
    }

    #[test]
    fn computed_patches() {
        let data = [op::FROM_VARIABLE, op::PATCH, 3, op::END];
        assert!(scan_patches(&data).unwrap().dynamic);

        let data = [op::RANDOM, op::PATCH, 0, 0, 5, 0, op::END];
        assert!(scan_patches(&data).unwrap().dynamic);

        let data = [op::RANDOM, op::PAN, 0, 0, 5, 0, op::END];
        assert!(!scan_patches(&data).unwrap().dynamic);
    }

    #[test]
    fn truncated() {
        assert!(scan_patches(&[op::PATCH]).is_err());
        assert!(scan_patches(&[op::JUMP, 0]).is_err());
    }

    #[test]
    fn splice_shrinks_and_corrects_branches() {
        #[rustfmt::skip]
        let mut data = vec![
            op::PATCH, 0x81, 0x00,  // 0
            0x3C, 0x64, 0x30,       // 3
            op::PATCH, 0x81, 0x01,  // 6
            op::JUMP, 3, 0, 0,      // 9
        ];
        let mut scan = scan_patches(&data).unwrap();

        splice(&mut data, &mut scan, 0, 1).unwrap();

        #[rustfmt::skip]
        let expected = vec![
            op::PATCH, 0x01,
            0x3C, 0x64, 0x30,
            op::PATCH, 0x81, 0x01,
            op::JUMP, 2, 0, 0,
        ];
        assert_eq!(data, expected);
        assert_eq!(scan.patches[1].operand, 6);
        assert_eq!(scan.branches, vec![9]);

        // Positions stay valid for the next splice
        splice(&mut data, &mut scan, 1, 2).unwrap();
        assert_eq!(&data[5..7], &[op::PATCH, 0x02]);
        assert_eq!(&data[7..], &[op::JUMP, 2, 0, 0]);
        assert_eq!(scan.used_patches(), BTreeSet::from([1, 2]));
    }

    #[test]
    fn splice_grows() {
        let mut data = vec![op::PATCH, 0x01, op::JUMP, 6, 0, 0, op::END];
        let mut scan = scan_patches(&data).unwrap();

        splice(&mut data, &mut scan, 0, 300).unwrap();
        assert_eq!(data, vec![op::PATCH, 0x82, 0x2C, op::JUMP, 7, 0, 0, op::END]);
    }

    #[test]
    fn unknown_site() {
        let mut data = vec![op::END];
        let mut scan = scan_patches(&data).unwrap();
        assert!(matches!(
            splice(&mut data, &mut scan, 0, 1),
            Err(SpliceError::UnknownSite(0))
        ));
    }
}
