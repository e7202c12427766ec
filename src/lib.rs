//! Retrovault: in-place editing of retro-game archive containers
//!
//! Classic DOS-era games bundle their levels, sprites and sounds into
//! a single container file, each game with its own header layout,
//! file-allocation table and quirks. This crate gives all of them one
//! mutation model (enumerate, open, insert, remove, rename, resize,
//! reorder, flush) while reproducing every format's on-disk structure
//! byte for byte.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ format registry (probe by signature)          │
//! │   wad-doom, grp-duke3d, rff-blood, epf, ...   │
//! ├───────────────────────────────────────────────┤
//! │ FAT engine (archive.rs)                       │
//! │   file vector · shift propagation · handles   │
//! │   strategy hooks for per-format FAT bytes     │
//! ├───────────────────────────────────────────────┤
//! │ segmented stream (segment.rs)                 │
//! │   deferred insert/remove · one-pass commit    │
//! ├───────────────────────────────────────────────┤
//! │ backing stream (io.rs): file, memory, window  │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! File data can pass through named filters (`xor-blood`, `lzw-bash`,
//! `lzw-epfs`) when a format stores entries encrypted or compressed;
//! [`Archive::read_file`] and [`Archive::write_file`] apply them
//! transparently.
//!
//! ## Example
//!
//! ```
//! use retrovault::format::{Format, SuppData, WadDoom};
//! use retrovault::io::MemoryBacking;
//!
//! let mut arc = WadDoom
//!     .create(Box::new(MemoryBacking::new()), &mut SuppData::default())
//!     .unwrap();
//! let lump = arc
//!     .insert(None, "E1M1", 5, retrovault::entry::FILETYPE_GENERIC, Default::default())
//!     .unwrap();
//! arc.write_file(&lump, b"hello").unwrap();
//! arc.flush().unwrap();
//! assert_eq!(arc.read_file(&lump).unwrap(), b"hello");
//! ```
//!
//! A single archive is not thread-safe; serialize all operations on it
//! and keep views on the same thread as their archive.

pub mod archive;
pub mod attribute;
pub mod entry;
pub mod error;
pub mod filter;
pub mod format;
pub mod io;
pub mod manifest;
pub mod segment;
pub mod view;

pub use archive::{Archive, ArchiveState, EntryHandle};
pub use attribute::{AttrValue, Attribute};
pub use entry::{EntryAttrs, FileEntry, FILETYPE_GENERIC};
pub use error::{Error, Result};
pub use format::{by_code, probe, registry, Certainty, Format, SuppData};
pub use io::{Backing, MemoryBacking};
pub use manifest::ArchiveSummary;
pub use view::FileView;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
