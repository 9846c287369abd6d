//! Read path of the scene cache.
//!
//! A [`SceneReader`] wraps a container cursor per scene-graph location.
//! Channel sample-time vectors load lazily and are shared through the
//! session-wide deduplicated table; decoded samples live in a bounded
//! cache guaranteeing at most one decode per stored sample even under
//! concurrent readers.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use super::cache::DecodeCache;
use super::payload::Payload;
use super::sample::sample_interval;
use super::{
    sample_entry, ChannelKey, TagFilter, ATTRIBUTES_ENTRY, BOUND_ENTRY, CHILDREN_ENTRY,
    DESCENDANT_TAGS_ENTRY, LINK_FILE_ATTRIBUTE, LINK_ROOT_ATTRIBUTE, LINK_TIME_ATTRIBUTE,
    LOCAL_TAGS_ENTRY, OBJECT_ENTRY, ROOT_ENTRY, SAMPLE_TIMES_ENTRY, TAGS_ENTRY, TRANSFORM_ENTRY,
};
use crate::container::{EntryKind, IndexedFile, MissingBehaviour, OpenMode};
use crate::util::{Box3d, DMat4, DVec3, Error, Result};

/// Session state shared by every location of one open scene.
struct ReadSession {
    global_times_io: IndexedFile,
    times_cache: DecodeCache<u64, Vec<f64>>,
    payload_cache: DecodeCache<(i64, usize), Payload>,
    /// One sample at time 0, implied for unwritten bound/transform
    /// channels.
    implicit_times: Arc<Vec<f64>>,
}

struct ReaderNode {
    session: Arc<ReadSession>,
    io: IndexedFile,
    parent: Option<SceneReader>,
    name: String,
    /// Lazily resolved per-channel sample-time vectors.
    times: RwLock<HashMap<ChannelKey, Arc<Vec<f64>>>>,
}

/// Handle on one location of a stored scene, opened read-only.
#[derive(Clone)]
pub struct SceneReader {
    inner: Arc<ReaderNode>,
}

impl SceneReader {
    /// Open a scene file read-only, positioned at the root location.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = IndexedFile::open(path, OpenMode::Read)?;
        let global_times_io = file
            .subdirectory(SAMPLE_TIMES_ENTRY, MissingBehaviour::Error)?
            .ok_or_else(|| Error::corrupt("scene file without sample-time table"))?;
        let root_io = file
            .subdirectory(ROOT_ENTRY, MissingBehaviour::Error)?
            .ok_or_else(|| Error::corrupt("scene file without root location"))?;

        let session = Arc::new(ReadSession {
            global_times_io,
            times_cache: DecodeCache::new(1024),
            payload_cache: DecodeCache::new(4096),
            implicit_times: Arc::new(vec![0.0]),
        });
        Ok(Self {
            inner: Arc::new(ReaderNode {
                session,
                io: root_io,
                parent: None,
                name: "/".to_string(),
                times: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Path of the underlying scene file.
    pub fn file_path(&self) -> &Path {
        self.inner.io.file_path()
    }

    /// Name of this location, `/` at the root.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Path of this location, root excluded.
    pub fn path(&self) -> Vec<String> {
        let mut parts = Vec::new();
        let mut cur = Some(self.clone());
        while let Some(node) = cur {
            if node.inner.parent.is_some() {
                parts.push(node.inner.name.clone());
            }
            cur = node.inner.parent.clone();
        }
        parts.reverse();
        parts
    }

    fn path_display(&self) -> String {
        format!("/{}", self.path().join("/"))
    }

    // === Hierarchy ===

    /// Names of the child locations.
    pub fn child_names(&self) -> Result<Vec<String>> {
        match self.inner.io.subdirectory(CHILDREN_ENTRY, MissingBehaviour::Null)? {
            Some(children) => children.entry_ids_of_kind(EntryKind::Directory),
            None => Ok(Vec::new()),
        }
    }

    /// Whether a child of this name exists.
    pub fn has_child(&self, name: &str) -> Result<bool> {
        match self.inner.io.subdirectory(CHILDREN_ENTRY, MissingBehaviour::Null)? {
            Some(children) => children.has_entry(name),
            None => Ok(false),
        }
    }

    /// Descend into a child location.
    pub fn child(&self, name: &str) -> Result<Self> {
        self.child_opt(name)?.ok_or_else(|| Error::NotFound {
            path: self.path_display(),
            name: name.to_string(),
        })
    }

    /// Descend into a child location if it exists.
    pub fn child_opt(&self, name: &str) -> Result<Option<Self>> {
        let children = match self
            .inner
            .io
            .subdirectory(CHILDREN_ENTRY, MissingBehaviour::Null)?
        {
            Some(c) => c,
            None => return Ok(None),
        };
        let child_io = match children.subdirectory(name, MissingBehaviour::Null)? {
            Some(io) => io,
            None => return Ok(None),
        };
        Ok(Some(Self {
            inner: Arc::new(ReaderNode {
                session: Arc::clone(&self.inner.session),
                io: child_io,
                parent: Some(self.clone()),
                name: name.to_string(),
                times: RwLock::new(HashMap::new()),
            }),
        }))
    }

    /// Navigate to an arbitrary location from the scene root.
    pub fn scene<S: AsRef<str>>(&self, path: &[S]) -> Result<Self> {
        let mut cur = self.scene_root();
        for part in path {
            cur = cur.child(part.as_ref())?;
        }
        Ok(cur)
    }

    /// Like [`Self::scene`] but returning `None` on a missing location.
    pub fn scene_opt<S: AsRef<str>>(&self, path: &[S]) -> Result<Option<Self>> {
        let mut cur = self.scene_root();
        for part in path {
            match cur.child_opt(part.as_ref())? {
                Some(next) => cur = next,
                None => return Ok(None),
            }
        }
        Ok(Some(cur))
    }

    /// Handle on the root location of the scene this location belongs to.
    pub fn scene_root(&self) -> Self {
        let mut cur = self.clone();
        while let Some(parent) = cur.inner.parent.clone() {
            cur = parent;
        }
        cur
    }

    // === Sample times ===

    fn channel_dir(&self, key: &ChannelKey) -> Result<Option<IndexedFile>> {
        let io = &self.inner.io;
        match key {
            ChannelKey::Bound => io.subdirectory(BOUND_ENTRY, MissingBehaviour::Null),
            ChannelKey::Transform => io.subdirectory(TRANSFORM_ENTRY, MissingBehaviour::Null),
            ChannelKey::Object => io.subdirectory(OBJECT_ENTRY, MissingBehaviour::Null),
            ChannelKey::Attribute(name) => {
                match io.subdirectory(ATTRIBUTES_ENTRY, MissingBehaviour::Null)? {
                    Some(attrs) => attrs.subdirectory(name, MissingBehaviour::Null),
                    None => Ok(None),
                }
            }
        }
    }

    /// Sample-time vector of a channel, loaded once and shared.
    fn channel_times(&self, key: &ChannelKey) -> Result<Arc<Vec<f64>>> {
        if let Some(times) = self.inner.times.read().get(key) {
            return Ok(Arc::clone(times));
        }

        let mut stored = None;
        if let Some(dir) = self.channel_dir(key)? {
            if dir.has_entry(SAMPLE_TIMES_ENTRY)? {
                let index: u64 = dir.read(SAMPLE_TIMES_ENTRY)?;
                let session = &self.inner.session;
                stored = Some(session.times_cache.get_or_load(index, || {
                    session
                        .global_times_io
                        .read_array::<f64>(&sample_entry(index as usize))
                })?);
            }
        }

        let times = match stored {
            Some(times) => times,
            None => match key {
                // Unwritten bound/transform channels imply one default
                // sample at time 0.
                ChannelKey::Bound | ChannelKey::Transform => {
                    Arc::clone(&self.inner.session.implicit_times)
                }
                ChannelKey::Object | ChannelKey::Attribute(_) => {
                    return Err(Error::NoSamples {
                        path: self.path_display(),
                        channel: key.label(),
                    })
                }
            },
        };

        self.inner
            .times
            .write()
            .entry(key.clone())
            .or_insert_with(|| Arc::clone(&times));
        Ok(times)
    }

    fn check_sample_index(&self, key: &ChannelKey, index: usize) -> Result<Arc<Vec<f64>>> {
        let times = self.channel_times(key)?;
        if index >= times.len() {
            return Err(Error::SampleOutOfBounds {
                index,
                count: times.len(),
            });
        }
        Ok(times)
    }

    // === Bound channel ===

    pub fn num_bound_samples(&self) -> Result<usize> {
        Ok(self.channel_times(&ChannelKey::Bound)?.len())
    }

    pub fn bound_sample_time(&self, index: usize) -> Result<f64> {
        Ok(self.check_sample_index(&ChannelKey::Bound, index)?[index])
    }

    /// `(floor, ceil, x)` for a bound read at `time`.
    pub fn bound_sample_interval(&self, time: f64) -> Result<(usize, usize, f64)> {
        Ok(sample_interval(&self.channel_times(&ChannelKey::Bound)?, time))
    }

    pub fn read_bound_at_sample(&self, index: usize) -> Result<Box3d> {
        self.check_sample_index(&ChannelKey::Bound, index)?;
        let dir = match self.channel_dir(&ChannelKey::Bound)? {
            Some(dir) => dir,
            // Implicit default: the empty box.
            None => return Ok(Box3d::EMPTY),
        };
        let v: Vec<f64> = dir.read_array_expecting(&sample_entry(index), Some(6))?;
        Ok(Box3d::new(
            DVec3::new(v[0], v[1], v[2]),
            DVec3::new(v[3], v[4], v[5]),
        ))
    }

    pub fn read_bound(&self, time: f64) -> Result<Box3d> {
        let (floor, ceil, x) = self.bound_sample_interval(time)?;
        if x == 0.0 {
            return self.read_bound_at_sample(floor);
        }
        let a = self.read_bound_at_sample(floor)?;
        let b = self.read_bound_at_sample(ceil)?;
        if a.is_empty() {
            return Ok(b);
        }
        if b.is_empty() {
            return Ok(a);
        }
        Ok(Box3d::lerp(&a, &b, x))
    }

    // === Transform channel ===

    pub fn num_transform_samples(&self) -> Result<usize> {
        Ok(self.channel_times(&ChannelKey::Transform)?.len())
    }

    pub fn transform_sample_time(&self, index: usize) -> Result<f64> {
        Ok(self.check_sample_index(&ChannelKey::Transform, index)?[index])
    }

    pub fn transform_sample_interval(&self, time: f64) -> Result<(usize, usize, f64)> {
        Ok(sample_interval(
            &self.channel_times(&ChannelKey::Transform)?,
            time,
        ))
    }

    pub fn read_transform_at_sample(&self, index: usize) -> Result<DMat4> {
        self.check_sample_index(&ChannelKey::Transform, index)?;
        let dir = match self.channel_dir(&ChannelKey::Transform)? {
            Some(dir) => dir,
            // Implicit default: identity.
            None => return Ok(DMat4::IDENTITY),
        };
        let key = (dir.node_id(), index);
        let payload = self.inner.session.payload_cache.get_or_load(key, || {
            let v: Vec<f64> = dir.read_array_expecting(&sample_entry(index), Some(16))?;
            let cols: [f64; 16] = v
                .try_into()
                .map_err(|_| Error::corrupt("transform sample with wrong length"))?;
            Ok::<_, Error>(Payload::Matrix(DMat4::from_cols_array(&cols)))
        })?;
        match payload.as_ref() {
            Payload::Matrix(m) => Ok(*m),
            _ => Err(Error::corrupt("transform sample holds a non-matrix payload")),
        }
    }

    pub fn read_transform(&self, time: f64) -> Result<DMat4> {
        let (floor, ceil, x) = self.transform_sample_interval(time)?;
        if x == 0.0 {
            return self.read_transform_at_sample(floor);
        }
        let a = self.read_transform_at_sample(floor)?;
        let b = self.read_transform_at_sample(ceil)?;
        Ok(crate::util::lerp_matrix(&a, &b, x))
    }

    // === Object channel ===

    /// Whether this location stores an object.
    pub fn has_object(&self) -> Result<bool> {
        Ok(self
            .inner
            .io
            .subdirectory(OBJECT_ENTRY, MissingBehaviour::Null)?
            .is_some())
    }

    pub fn num_object_samples(&self) -> Result<usize> {
        Ok(self.channel_times(&ChannelKey::Object)?.len())
    }

    pub fn object_sample_time(&self, index: usize) -> Result<f64> {
        Ok(self.check_sample_index(&ChannelKey::Object, index)?[index])
    }

    pub fn object_sample_interval(&self, time: f64) -> Result<(usize, usize, f64)> {
        Ok(sample_interval(&self.channel_times(&ChannelKey::Object)?, time))
    }

    pub fn read_object_at_sample(&self, index: usize) -> Result<Arc<Payload>> {
        self.check_sample_index(&ChannelKey::Object, index)?;
        let dir = self
            .channel_dir(&ChannelKey::Object)?
            .ok_or_else(|| Error::NoSamples {
                path: self.path_display(),
                channel: ChannelKey::Object.label(),
            })?;
        self.load_payload_sample(&dir, index)
    }

    pub fn read_object(&self, time: f64) -> Result<Arc<Payload>> {
        let (floor, ceil, x) = self.object_sample_interval(time)?;
        if x == 0.0 {
            return self.read_object_at_sample(floor);
        }
        let a = self.read_object_at_sample(floor)?;
        let b = self.read_object_at_sample(ceil)?;
        match Payload::interpolate(&a, &b, x) {
            Some(mixed) => Ok(Arc::new(mixed)),
            // Interpolation undefined for this payload: the nearer sample.
            None => Ok(if x >= 0.5 { b } else { a }),
        }
    }

    // === Attribute channels ===

    /// Names of the attributes stored at this location, reserved link
    /// attributes hidden.
    pub fn attribute_names(&self) -> Result<Vec<String>> {
        let attrs = match self
            .inner
            .io
            .subdirectory(ATTRIBUTES_ENTRY, MissingBehaviour::Null)?
        {
            Some(attrs) => attrs,
            None => return Ok(Vec::new()),
        };
        Ok(attrs
            .entry_ids_of_kind(EntryKind::Directory)?
            .into_iter()
            .filter(|name| {
                name != LINK_FILE_ATTRIBUTE
                    && name != LINK_ROOT_ATTRIBUTE
                    && name != LINK_TIME_ATTRIBUTE
            })
            .collect())
    }

    pub fn has_attribute(&self, name: &str) -> Result<bool> {
        match self
            .inner
            .io
            .subdirectory(ATTRIBUTES_ENTRY, MissingBehaviour::Null)?
        {
            Some(attrs) => Ok(attrs
                .subdirectory(name, MissingBehaviour::Null)?
                .is_some()),
            None => Ok(false),
        }
    }

    pub fn num_attribute_samples(&self, name: &str) -> Result<usize> {
        Ok(self
            .channel_times(&ChannelKey::Attribute(name.to_string()))?
            .len())
    }

    pub fn attribute_sample_time(&self, name: &str, index: usize) -> Result<f64> {
        let key = ChannelKey::Attribute(name.to_string());
        Ok(self.check_sample_index(&key, index)?[index])
    }

    pub fn attribute_sample_interval(&self, name: &str, time: f64) -> Result<(usize, usize, f64)> {
        let key = ChannelKey::Attribute(name.to_string());
        Ok(sample_interval(&self.channel_times(&key)?, time))
    }

    pub fn read_attribute_at_sample(&self, name: &str, index: usize) -> Result<Arc<Payload>> {
        let key = ChannelKey::Attribute(name.to_string());
        self.check_sample_index(&key, index)?;
        let dir = self.channel_dir(&key)?.ok_or_else(|| Error::NoSamples {
            path: self.path_display(),
            channel: key.label(),
        })?;
        self.load_payload_sample(&dir, index)
    }

    pub fn read_attribute(&self, name: &str, time: f64) -> Result<Arc<Payload>> {
        let (floor, ceil, x) = self.attribute_sample_interval(name, time)?;
        if x == 0.0 {
            return self.read_attribute_at_sample(name, floor);
        }
        let a = self.read_attribute_at_sample(name, floor)?;
        let b = self.read_attribute_at_sample(name, ceil)?;
        match Payload::interpolate(&a, &b, x) {
            Some(mixed) => Ok(Arc::new(mixed)),
            None => Ok(if x >= 0.5 { b } else { a }),
        }
    }

    fn load_payload_sample(&self, channel_dir: &IndexedFile, index: usize) -> Result<Arc<Payload>> {
        let key = (channel_dir.node_id(), index);
        self.inner.session.payload_cache.get_or_load(key, || {
            let sample_dir = channel_dir
                .subdirectory(&sample_entry(index), MissingBehaviour::Error)?
                .ok_or_else(|| Error::corrupt("missing payload sample directory"))?;
            Payload::load(&sample_dir)
        })
    }

    // === Tags ===

    /// Tags visible at this location under the given filter.
    pub fn read_tags(&self, filter: TagFilter) -> Result<Vec<String>> {
        let mut out = BTreeSet::new();
        if filter.contains(TagFilter::LOCAL) {
            out.extend(self.tag_set(LOCAL_TAGS_ENTRY)?);
        }
        if filter.contains(TagFilter::DESCENDANT) {
            out.extend(self.tag_set(DESCENDANT_TAGS_ENTRY)?);
        }
        if filter.contains(TagFilter::ANCESTOR) {
            let mut cur = self.inner.parent.clone();
            while let Some(node) = cur {
                out.extend(node.tag_set(LOCAL_TAGS_ENTRY)?);
                cur = node.inner.parent.clone();
            }
        }
        Ok(out.into_iter().collect())
    }

    pub fn has_tag(&self, name: &str, filter: TagFilter) -> Result<bool> {
        Ok(self.read_tags(filter)?.iter().any(|t| t == name))
    }

    fn tag_set(&self, which: &str) -> Result<Vec<String>> {
        let tags = match self.inner.io.subdirectory(TAGS_ENTRY, MissingBehaviour::Null)? {
            Some(tags) => tags,
            None => return Ok(Vec::new()),
        };
        match tags.subdirectory(which, MissingBehaviour::Null)? {
            Some(dir) => dir.entry_ids(),
            None => Ok(Vec::new()),
        }
    }
}
