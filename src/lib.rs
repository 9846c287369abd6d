//! # Scenio
//!
//! Hierarchical, versioned, binary-file storage engine with a time-sampled
//! scene-graph cache layered on top.
//!
//! The container format stores a filesystem-like hierarchy of typed entries
//! inside a single file, with an appendable index, string interning and
//! free-space reuse. The scene layer exposes each hierarchy node as a
//! scene-graph location with independently time-sampled bound, transform,
//! attribute and object channels, and can mount one stored scene as a
//! subtree of another.
//!
//! ## Modules
//!
//! - [`util`] - Basic types (POD kinds, errors, math)
//! - [`container`] - Low-level binary container (index, allocator, cursors)
//! - [`scene`] - Time-sampled scene cache and scene linking
//!
//! ## Example
//!
//! ```ignore
//! use scenio::container::{IndexedFile, OpenMode};
//!
//! let root = IndexedFile::open("cache.scn", OpenMode::Read)?;
//! for entry in root.entry_ids() {
//!     println!("{}", entry);
//! }
//! ```

pub mod util;
pub mod container;
pub mod scene;

// Re-export commonly used types
pub use util::{Box3d, DataKind, Error, Result};
pub use container::{IndexedFile, OpenMode};
pub use scene::{LinkedScene, Payload, SceneReader, SceneWriter};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{Box3d, DataKind, Error, Result};
    pub use crate::container::{Entry, EntryKind, IndexedFile, MissingBehaviour, OpenMode};
    pub use crate::scene::{
        LinkedScene, Payload, SceneFileCache, SceneReader, SceneWriter, TagFilter,
    };
}
