//! # SDAT Tools
//!
//! Nintendo DS games built on the Nitro Composer sound system keep their music in sound
//! archives (`.sdat`), usually embedded in the game's ROM. Rips of that music tend to ship a
//! single archive that every track refers to, so it pays off to merge the archives of a game
//! and throw out everything that is stored more than once. This crate provides a command-line
//! utility that does exactly that, and times the sequences while it's at it.
//!
//! ## Inspect
//!
//! ```console
//! sdat-tools-inspect 0.1.0
//! List the contents of sound archives and ROMs
//!
//! USAGE:
//!     sdat-tools inspect [OPTIONS] [PATH]...
//!
//! ARGS:
//!     <PATH>...    The path(s) to inspect
//!
//! OPTIONS:
//!     -b, --best-effort    Leave resources with a broken header undecoded instead of failing
//!     -h, --help           Print help information
//!     -r, --recursive      Search folders recursively
//!     -V, --version        Print version information
//! ```
//!
//! ### Example
//!
//! ```console
//! > sdat-tools inspect sound_data.sdat
//! sound_data.sdat                 Seq 3 | Bank 2 | Wave 2 | Player 1 | Files 7
//!     0 | BGM_TITLE                | bank    0 | player   0 | vol 127 |   5432 bytes
//!     1 | BGM_FIELD                | bank    1 | player   0 | vol 110 |  10876 bytes
//!     2 | SE_JUMP                  | bank    1 | player   0 | vol 127 |     92 bytes
//! ```
//!
//! ## Strip
//!
//! ```console
//! sdat-tools-strip 0.1.0
//! Merge sound archives and strip them down to their unique sequences
//!
//! USAGE:
//!     sdat-tools strip [OPTIONS] --output <OUTPUT> [INPUT]...
//!
//! ARGS:
//!     <INPUT>...    The archives and ROMs to merge
//!
//! OPTIONS:
//!     -b, --best-effort          Leave resources with a broken header undecoded instead of failing
//!         --gc                   Also remove the instruments and waves no sequence plays
//!     -h, --help                 Print help information
//!     -i, --include <INCLUDE>    Keep the sequences matching this pattern, even when excluded
//!     -o, --output <OUTPUT>      The output path
//!     -r, --recursive            Search folders recursively
//!     -V, --version              Print version information
//!     -x, --exclude <EXCLUDE>    Exclude the sequences matching this pattern
//! ```
//!
//! ### Example
//!
//! ```console
//! > sdat-tools strip game.nds -x "SE_*" --gc -o game.sdat
//! game.nds => 212 sequences
//! game.nds => 18 sequences
//! Wrote game.sdat with 61 sequences
//! ```
//!
//! ## Time
//!
//! ```console
//! sdat-tools-time 0.1.0
//! Work out how long the sequences in an archive play
//!
//! USAGE:
//!     sdat-tools time [OPTIONS] <PATH> [INDEX]...
//!
//! ARGS:
//!     <PATH>        The archive or ROM to time
//!     <INDEX>...    Indices of the sequences to time. No indices means all sequences
//! ```
//!
//! ### Example
//!
//! ```console
//! > sdat-tools time game.sdat --tags 0
//!     0 | BGM_TITLE                | 01:48 | loop
//!       ncsfby=sdat-tools
//!       origFilename=BGM_TITLE
//!       fade=10
//!       length=01:48
//!       _lib=game.ncsflib
//! ```

pub mod inspect;
pub mod strip;
pub mod time;
pub(crate) mod utils;
