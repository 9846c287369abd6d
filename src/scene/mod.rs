//! Time-sampled scene-graph cache layered on the container format.
//!
//! Every scene-graph location maps to one container directory holding the
//! per-channel sample entries:
//!
//! ```text
//! /header/...                   writer identification
//! /sampleTimes/<k>              global deduplicated sample-time vectors
//! /root/                        hierarchy root location
//!   bound/<i>                   double[6] box samples
//!   transform/<i>               double[16] matrix samples
//!   object/<i>/...              payload samples
//!   attributes/<name>/<i>/...   payload samples per named attribute
//!   tags/local/<t>/ tags/descendant/<t>/
//!   children/<name>/...         child locations, recursively
//! ```
//!
//! Each channel directory also stores a `sampleTimes` entry holding the
//! index of its (deduplicated) time vector in the global table.

mod payload;
mod sample;
mod cache;
mod reader;
mod writer;
mod bounds;
mod link;
mod shared;

pub use cache::DecodeCache;
pub use link::{LinkedScene, LINK_FILE_ATTRIBUTE, LINK_ROOT_ATTRIBUTE, LINK_TIME_ATTRIBUTE};
pub use payload::Payload;
pub use reader::SceneReader;
pub use shared::SceneFileCache;
pub use writer::SceneWriter;

/// Entry names used by the scene layout.
pub(crate) const HEADER_ENTRY: &str = "header";
pub(crate) const ROOT_ENTRY: &str = "root";
pub(crate) const BOUND_ENTRY: &str = "bound";
pub(crate) const TRANSFORM_ENTRY: &str = "transform";
pub(crate) const OBJECT_ENTRY: &str = "object";
pub(crate) const ATTRIBUTES_ENTRY: &str = "attributes";
pub(crate) const CHILDREN_ENTRY: &str = "children";
pub(crate) const SAMPLE_TIMES_ENTRY: &str = "sampleTimes";
pub(crate) const TAGS_ENTRY: &str = "tags";
pub(crate) const LOCAL_TAGS_ENTRY: &str = "local";
pub(crate) const DESCENDANT_TAGS_ENTRY: &str = "descendant";

/// Name for a sample index within a channel directory.
pub(crate) fn sample_entry(index: usize) -> String {
    index.to_string()
}

/// Which tag sets a tag query covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagFilter(u8);

impl TagFilter {
    /// The empty filter; matches nothing.
    pub const NONE: Self = Self(0);
    /// Tags written at the location itself.
    pub const LOCAL: Self = Self(1);
    /// Tags inherited from below (descendant locations or linked scenes).
    pub const DESCENDANT: Self = Self(2);
    /// Tags written at ancestor locations.
    pub const ANCESTOR: Self = Self(4);
    /// All of the above.
    pub const ALL: Self = Self(7);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for TagFilter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Identity of a time-sampled channel at one location.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ChannelKey {
    Bound,
    Transform,
    Object,
    Attribute(String),
}

impl ChannelKey {
    /// Channel name used in error reporting.
    pub fn label(&self) -> String {
        match self {
            Self::Bound => BOUND_ENTRY.to_string(),
            Self::Transform => TRANSFORM_ENTRY.to_string(),
            Self::Object => OBJECT_ENTRY.to_string(),
            Self::Attribute(name) => format!("attribute '{name}'"),
        }
    }
}
