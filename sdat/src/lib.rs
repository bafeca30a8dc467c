//! Reading, writing, merging and stripping Nintendo DS sound archives (`SDAT`), and working
//! out how long their sequences play.
//!
//! The [`archive`] module decodes and encodes whole archives, merges them and strips them down
//! to a minimal set of unique sequences. The [`player`] module interprets sequence bytecode
//! tick by tick, which is what [`player::sequence_length()`] uses to time a sequence. Tags for
//! the wrapper format rips are usually published in are built with [`tags`].
//!
//! This crate doesn't write the wrapper files themselves (compression and checksums are left to
//! whatever consumes a [`tags::Publication`]).

pub mod archive;
pub mod bytecode;
pub mod filter;
pub mod header;
mod io;
pub mod player;
pub mod resource;
pub mod tags;

#[cfg(test)]
pub(crate) mod testing;
