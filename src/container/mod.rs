//! Low-level binary container format.
//!
//! A container file holds a filesystem-like hierarchy of typed entries:
//! raw data blocks at the front, followed by a self-describing index
//! (string table, node records, free-page list) and a magic-number footer
//! that makes the file readable from its last bytes alone.
//!
//! Mutation is append/overwrite-whole-entry only: rewriting an entry frees
//! its old data block through the page allocator and writes a new one,
//! reusing freed space best-fit. Flushing the index appends a new index
//! generation at the logical end of the data region.

pub mod format;
mod string_cache;
mod alloc;
mod index;
mod file;

pub use alloc::PageAllocator;
pub use file::{ContainerStats, IndexedFile, MissingBehaviour, OpenMode};
pub use index::{Entry, EntryKind};
pub use string_cache::StringCache;
