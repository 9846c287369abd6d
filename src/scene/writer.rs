//! Write path of the scene cache.
//!
//! Writer handles share one session holding an arena of per-location
//! write nodes. Channel samples are persisted as they arrive while their
//! times buffer in memory; [`SceneWriter::finalize`] then stores the
//! deduplicated sample-time vectors, computes missing bounding boxes
//! bottom-up across the whole hierarchy, writes tags and commits the
//! container index. Finalization is explicit and returns a result;
//! dropping an unfinalized session only logs a warning.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::bounds::{merge_box_samples, transformed_child_samples};
use super::payload::Payload;
use super::{
    sample_entry, ATTRIBUTES_ENTRY, BOUND_ENTRY, CHILDREN_ENTRY, DESCENDANT_TAGS_ENTRY,
    HEADER_ENTRY, LOCAL_TAGS_ENTRY, OBJECT_ENTRY, ROOT_ENTRY, SAMPLE_TIMES_ENTRY, TAGS_ENTRY,
    TRANSFORM_ENTRY,
};
use crate::container::{IndexedFile, MissingBehaviour, OpenMode};
use crate::util::{Box3d, DMat4, Error, Result};

struct WriteNode {
    io: IndexedFile,
    name: String,
    parent: Option<usize>,
    children: BTreeMap<String, usize>,
    bound_times: Vec<f64>,
    bound_boxes: Vec<Box3d>,
    transform_times: Vec<f64>,
    transform_samples: Vec<DMat4>,
    object_times: Vec<f64>,
    object_bounds: Vec<Box3d>,
    attribute_times: BTreeMap<String, Vec<f64>>,
    local_tags: BTreeSet<String>,
    descendant_tags: BTreeSet<String>,
}

impl WriteNode {
    fn new(io: IndexedFile, name: String, parent: Option<usize>) -> Self {
        Self {
            io,
            name,
            parent,
            children: BTreeMap::new(),
            bound_times: Vec::new(),
            bound_boxes: Vec::new(),
            transform_times: Vec::new(),
            transform_samples: Vec::new(),
            object_times: Vec::new(),
            object_bounds: Vec::new(),
            attribute_times: BTreeMap::new(),
            local_tags: BTreeSet::new(),
            descendant_tags: BTreeSet::new(),
        }
    }
}

struct SessionInner {
    nodes: Vec<WriteNode>,
    /// Deduplicated sample-time vectors, keyed by their bit patterns.
    times_table: BTreeMap<Vec<u64>, u64>,
    global_times_io: IndexedFile,
    finalized: bool,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if !self.finalized {
            warn!(
                path = %self.global_times_io.file_path().display(),
                "scene write session dropped without finalize; nothing was flushed"
            );
        }
    }
}

/// Handle on one location of a scene being written.
#[derive(Clone)]
pub struct SceneWriter {
    session: Arc<Mutex<SessionInner>>,
    node: usize,
}

impl SceneWriter {
    /// Create a new scene file, returning the root location handle.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file_root = IndexedFile::open(path, OpenMode::Write)?;
        let header = file_root.create_subdirectory(HEADER_ENTRY)?;
        header.write("writer", &format!("scenio {}", env!("CARGO_PKG_VERSION")))?;
        header.write("sceneVersion", &1i64)?;
        let global_times_io = file_root.create_subdirectory(SAMPLE_TIMES_ENTRY)?;
        let root_io = file_root.create_subdirectory(ROOT_ENTRY)?;

        let inner = SessionInner {
            nodes: vec![WriteNode::new(root_io, "/".to_string(), None)],
            times_table: BTreeMap::new(),
            global_times_io,
            finalized: false,
        };
        Ok(Self {
            session: Arc::new(Mutex::new(inner)),
            node: 0,
        })
    }

    /// Name of this location, `/` at the root.
    pub fn name(&self) -> String {
        self.session.lock().nodes[self.node].name.clone()
    }

    /// Path of this location, root excluded.
    pub fn path(&self) -> Vec<String> {
        let inner = self.session.lock();
        path_of(&inner, self.node)
    }

    /// Names of the children created so far.
    pub fn child_names(&self) -> Vec<String> {
        let inner = self.session.lock();
        inner.nodes[self.node].children.keys().cloned().collect()
    }

    /// Whether this location received object samples.
    pub fn has_object(&self) -> bool {
        !self.session.lock().nodes[self.node].object_times.is_empty()
    }

    /// Whether a child of this name was created.
    pub fn has_child(&self, name: &str) -> bool {
        self.session.lock().nodes[self.node].children.contains_key(name)
    }

    /// Whether this location received samples of the named attribute.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.session.lock().nodes[self.node]
            .attribute_times
            .contains_key(name)
    }

    /// Handle on an existing child location.
    pub fn child(&self, name: &str) -> Option<Self> {
        let inner = self.session.lock();
        inner.nodes[self.node]
            .children
            .get(name)
            .map(|&idx| Self {
                session: Arc::clone(&self.session),
                node: idx,
            })
    }

    /// Create a child location.
    pub fn create_child(&self, name: &str) -> Result<Self> {
        let mut inner = self.session.lock();
        self.writable(&inner, "create child")?;
        if inner.nodes[self.node].children.contains_key(name) {
            return Err(Error::AlreadyExists {
                path: format!("/{}", path_of(&inner, self.node).join("/")),
                name: name.to_string(),
            });
        }
        let children_io = subdir_or_create(&inner.nodes[self.node].io, CHILDREN_ENTRY)?;
        let child_io = children_io.create_subdirectory(name)?;
        let idx = inner.nodes.len();
        inner
            .nodes
            .push(WriteNode::new(child_io, name.to_string(), Some(self.node)));
        inner.nodes[self.node].children.insert(name.to_string(), idx);
        Ok(Self {
            session: Arc::clone(&self.session),
            node: idx,
        })
    }

    /// Append one bound sample; times must be strictly increasing.
    pub fn write_bound(&self, bound: &Box3d, time: f64) -> Result<()> {
        let mut inner = self.session.lock();
        self.writable(&inner, "write bound")?;
        self.check_monotonic(&inner, BOUND_ENTRY, &inner.nodes[self.node].bound_times, time)?;
        let index = inner.nodes[self.node].bound_times.len();
        let dir = subdir_or_create(&inner.nodes[self.node].io, BOUND_ENTRY)?;
        dir.write_array(&sample_entry(index), &box_to_array(bound))?;
        let node = &mut inner.nodes[self.node];
        node.bound_times.push(time);
        node.bound_boxes.push(*bound);
        Ok(())
    }

    /// Append one transform sample. The root location carries no
    /// transform.
    pub fn write_transform(&self, transform: &DMat4, time: f64) -> Result<()> {
        let mut inner = self.session.lock();
        self.writable(&inner, "write transform")?;
        if self.node == 0 {
            return Err(Error::unsupported(
                "the root location cannot carry a transform",
            ));
        }
        self.check_monotonic(
            &inner,
            TRANSFORM_ENTRY,
            &inner.nodes[self.node].transform_times,
            time,
        )?;
        let index = inner.nodes[self.node].transform_times.len();
        let dir = subdir_or_create(&inner.nodes[self.node].io, TRANSFORM_ENTRY)?;
        dir.write_array(&sample_entry(index), &transform.to_cols_array())?;
        let node = &mut inner.nodes[self.node];
        node.transform_times.push(time);
        node.transform_samples.push(*transform);
        Ok(())
    }

    /// Append one object sample. Either every object sample carries an
    /// intrinsic bound or none does; the root location carries no object.
    pub fn write_object(&self, object: &Payload, time: f64) -> Result<()> {
        let mut inner = self.session.lock();
        self.writable(&inner, "write object")?;
        if self.node == 0 {
            return Err(Error::unsupported(
                "the root location cannot carry an object",
            ));
        }
        self.check_monotonic(&inner, OBJECT_ENTRY, &inner.nodes[self.node].object_times, time)?;

        let bound = object.bound();
        {
            let node = &inner.nodes[self.node];
            let mixed = match bound {
                Some(_) => node.object_bounds.is_empty() && !node.object_times.is_empty(),
                None => !node.object_bounds.is_empty(),
            };
            if mixed {
                return Err(Error::InconsistentBounds {
                    path: format!("/{}", path_of(&inner, self.node).join("/")),
                });
            }
        }

        let index = inner.nodes[self.node].object_times.len();
        let dir = subdir_or_create(&inner.nodes[self.node].io, OBJECT_ENTRY)?;
        let sample_dir = dir.create_subdirectory(&sample_entry(index))?;
        object.save(&sample_dir)?;

        let node = &mut inner.nodes[self.node];
        node.object_times.push(time);
        if let Some(b) = bound {
            node.object_bounds.push(b);
        }
        Ok(())
    }

    /// Append one sample of a named attribute.
    pub fn write_attribute(&self, name: &str, value: &Payload, time: f64) -> Result<()> {
        let mut inner = self.session.lock();
        self.writable(&inner, "write attribute")?;
        let last = inner.nodes[self.node]
            .attribute_times
            .get(name)
            .and_then(|times| times.last().copied());
        if let Some(last) = last {
            if time <= last {
                return Err(Error::NonMonotonicTime {
                    path: format!("/{}", path_of(&inner, self.node).join("/")),
                    channel: format!("attribute '{name}'"),
                    last,
                    time,
                });
            }
        }
        let index = inner.nodes[self.node]
            .attribute_times
            .get(name)
            .map_or(0, Vec::len);
        let attrs = subdir_or_create(&inner.nodes[self.node].io, ATTRIBUTES_ENTRY)?;
        let attr_dir = subdir_or_create(&attrs, name)?;
        let sample_dir = attr_dir.create_subdirectory(&sample_entry(index))?;
        value.save(&sample_dir)?;

        inner.nodes[self.node]
            .attribute_times
            .entry(name.to_string())
            .or_default()
            .push(time);
        Ok(())
    }

    /// Tag this location.
    pub fn write_tags<S: AsRef<str>>(&self, tags: &[S]) -> Result<()> {
        self.store_tags(tags, false)
    }

    /// Tag this location as inheriting the tags from content below it
    /// (used when mounting linked scenes).
    pub fn write_descendant_tags<S: AsRef<str>>(&self, tags: &[S]) -> Result<()> {
        self.store_tags(tags, true)
    }

    fn store_tags<S: AsRef<str>>(&self, tags: &[S], descendant: bool) -> Result<()> {
        let mut inner = self.session.lock();
        self.writable(&inner, "write tags")?;
        let node = &mut inner.nodes[self.node];
        let set = if descendant {
            &mut node.descendant_tags
        } else {
            &mut node.local_tags
        };
        for tag in tags {
            set.insert(tag.as_ref().to_string());
        }
        Ok(())
    }

    /// Finish the write session: compute missing bounds bottom-up, store
    /// sample-time vectors and tags, and commit the container index. Only
    /// the root handle may finalize; afterwards every handle is read-only.
    pub fn finalize(&self) -> Result<()> {
        if self.node != 0 {
            return Err(Error::unsupported(
                "finalize must be called on the root location",
            ));
        }
        let mut inner = self.session.lock();
        if inner.finalized {
            return Ok(());
        }
        flush_node(&mut inner, 0)?;
        inner.finalized = true;
        let io = inner.nodes[0].io.clone();
        drop(inner);
        io.commit()
    }

    fn writable(&self, inner: &SessionInner, op: &'static str) -> Result<()> {
        if inner.finalized {
            return Err(Error::PermissionDenied {
                path: format!("/{}", path_of(inner, self.node).join("/")),
                op,
            });
        }
        Ok(())
    }

    fn check_monotonic(
        &self,
        inner: &SessionInner,
        channel: &str,
        times: &[f64],
        time: f64,
    ) -> Result<()> {
        if let Some(&last) = times.last() {
            if time <= last {
                return Err(Error::NonMonotonicTime {
                    path: format!("/{}", path_of(inner, self.node).join("/")),
                    channel: channel.to_string(),
                    last,
                    time,
                });
            }
        }
        Ok(())
    }
}

fn path_of(inner: &SessionInner, mut idx: usize) -> Vec<String> {
    let mut parts = Vec::new();
    while let Some(parent) = inner.nodes[idx].parent {
        parts.push(inner.nodes[idx].name.clone());
        idx = parent;
    }
    parts.reverse();
    parts
}

fn subdir_or_create(io: &IndexedFile, name: &str) -> Result<IndexedFile> {
    io.subdirectory(name, MissingBehaviour::Create)?
        .ok_or_else(|| Error::corrupt(format!("could not create '{name}' directory")))
}

fn box_to_array(b: &Box3d) -> [f64; 6] {
    [b.min.x, b.min.y, b.min.z, b.max.x, b.max.y, b.max.z]
}

/// Store a sample-time vector through the global deduplicated table and
/// record its index in the channel directory.
fn store_sample_times(inner: &mut SessionInner, times: &[f64], dir: &IndexedFile) -> Result<()> {
    let key: Vec<u64> = times.iter().map(|t| t.to_bits()).collect();
    let index = match inner.times_table.get(&key) {
        Some(&i) => i,
        None => {
            let i = inner.times_table.len() as u64;
            inner
                .global_times_io
                .write_array(&sample_entry(i as usize), times)?;
            inner.times_table.insert(key, i);
            i
        }
    };
    dir.write(SAMPLE_TIMES_ENTRY, &index)
}

/// Flush one location: children first, then sample times, computed
/// bounds and tags.
fn flush_node(inner: &mut SessionInner, idx: usize) -> Result<()> {
    let children: Vec<usize> = inner.nodes[idx].children.values().copied().collect();
    for &child in &children {
        flush_node(inner, child)?;
    }

    let io = inner.nodes[idx].io.clone();

    if !inner.nodes[idx].transform_times.is_empty() {
        let times = inner.nodes[idx].transform_times.clone();
        let dir = subdir_or_create(&io, TRANSFORM_ENTRY)?;
        store_sample_times(inner, &times, &dir)?;
    }

    let attribute_names: Vec<String> = inner.nodes[idx].attribute_times.keys().cloned().collect();
    if !attribute_names.is_empty() {
        let attrs = subdir_or_create(&io, ATTRIBUTES_ENTRY)?;
        for name in attribute_names {
            let times = inner.nodes[idx].attribute_times[&name].clone();
            let dir = subdir_or_create(&attrs, &name)?;
            store_sample_times(inner, &times, &dir)?;
        }
    }

    if !inner.nodes[idx].object_times.is_empty() {
        let times = inner.nodes[idx].object_times.clone();
        let dir = subdir_or_create(&io, OBJECT_ENTRY)?;
        store_sample_times(inner, &times, &dir)?;
    }

    // Bounds: explicit samples win; otherwise merge the children's
    // transformed bounds and the object's own bounds over time.
    let explicit_bound = !inner.nodes[idx].bound_times.is_empty();
    if !explicit_bound {
        for &child in &children {
            let (bt, bb, tt, ts) = {
                let ch = &inner.nodes[child];
                (
                    ch.bound_times.clone(),
                    ch.bound_boxes.clone(),
                    ch.transform_times.clone(),
                    ch.transform_samples.clone(),
                )
            };
            if bt.is_empty() {
                continue;
            }
            let (ct, cb) = transformed_child_samples(&bt, &bb, &tt, &ts);
            let mut acc_times = std::mem::take(&mut inner.nodes[idx].bound_times);
            let mut acc_boxes = std::mem::take(&mut inner.nodes[idx].bound_boxes);
            merge_box_samples(&mut acc_times, &mut acc_boxes, &ct, &cb);
            inner.nodes[idx].bound_times = acc_times;
            inner.nodes[idx].bound_boxes = acc_boxes;
        }
        if !inner.nodes[idx].object_bounds.is_empty() {
            let ot = inner.nodes[idx].object_times.clone();
            let ob = inner.nodes[idx].object_bounds.clone();
            let mut acc_times = std::mem::take(&mut inner.nodes[idx].bound_times);
            let mut acc_boxes = std::mem::take(&mut inner.nodes[idx].bound_boxes);
            merge_box_samples(&mut acc_times, &mut acc_boxes, &ot, &ob);
            inner.nodes[idx].bound_times = acc_times;
            inner.nodes[idx].bound_boxes = acc_boxes;
        }
    }

    if !inner.nodes[idx].bound_times.is_empty() {
        let times = inner.nodes[idx].bound_times.clone();
        let dir = subdir_or_create(&io, BOUND_ENTRY)?;
        store_sample_times(inner, &times, &dir)?;
        if !explicit_bound {
            let boxes = inner.nodes[idx].bound_boxes.clone();
            for (i, b) in boxes.iter().enumerate() {
                dir.write_array(&sample_entry(i), &box_to_array(b))?;
            }
        }
    }

    // Tags: persist, then hand everything up as the parent's descendants.
    let local: Vec<String> = inner.nodes[idx].local_tags.iter().cloned().collect();
    let descendant: Vec<String> = inner.nodes[idx].descendant_tags.iter().cloned().collect();
    if !local.is_empty() || !descendant.is_empty() {
        let tags = subdir_or_create(&io, TAGS_ENTRY)?;
        if !local.is_empty() {
            let dir = subdir_or_create(&tags, LOCAL_TAGS_ENTRY)?;
            for tag in &local {
                dir.create_subdirectory(tag)?;
            }
        }
        if !descendant.is_empty() {
            let dir = subdir_or_create(&tags, DESCENDANT_TAGS_ENTRY)?;
            for tag in &descendant {
                dir.create_subdirectory(tag)?;
            }
        }
        if let Some(parent) = inner.nodes[idx].parent {
            inner.nodes[parent].descendant_tags.extend(local);
            inner.nodes[parent].descendant_tags.extend(descendant);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;
    use tempfile::NamedTempFile;

    #[test]
    fn test_monotonic_time_enforced() {
        let temp = NamedTempFile::new().expect("temp file");
        let root = SceneWriter::create(temp.path()).unwrap();
        let child = root.create_child("a").unwrap();
        let b = Box3d::new(DVec3::ZERO, DVec3::ONE);
        child.write_bound(&b, 0.0).unwrap();
        child.write_bound(&b, 1.0).unwrap();
        let err = child.write_bound(&b, 0.5).unwrap_err();
        assert!(matches!(err, Error::NonMonotonicTime { .. }));
        root.finalize().unwrap();
    }

    #[test]
    fn test_root_rejects_transform_and_object() {
        let temp = NamedTempFile::new().expect("temp file");
        let root = SceneWriter::create(temp.path()).unwrap();
        assert!(root.write_transform(&DMat4::IDENTITY, 0.0).is_err());
        assert!(root
            .write_object(&Payload::Double(1.0), 0.0)
            .is_err());
        root.finalize().unwrap();
    }

    #[test]
    fn test_mixed_object_bounds_rejected() {
        let temp = NamedTempFile::new().expect("temp file");
        let root = SceneWriter::create(temp.path()).unwrap();
        let child = root.create_child("geo").unwrap();
        child
            .write_object(
                &Payload::Points {
                    positions: vec![DVec3::ZERO],
                },
                0.0,
            )
            .unwrap();
        let err = child
            .write_object(&Payload::Double(1.0), 1.0)
            .unwrap_err();
        assert!(matches!(err, Error::InconsistentBounds { .. }));
        root.finalize().unwrap();
    }

    #[test]
    fn test_writes_after_finalize_rejected() {
        let temp = NamedTempFile::new().expect("temp file");
        let root = SceneWriter::create(temp.path()).unwrap();
        let child = root.create_child("a").unwrap();
        root.finalize().unwrap();
        let err = child
            .write_bound(&Box3d::new(DVec3::ZERO, DVec3::ONE), 0.0)
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
    }

    #[test]
    fn test_duplicate_child_rejected() {
        let temp = NamedTempFile::new().expect("temp file");
        let root = SceneWriter::create(temp.path()).unwrap();
        root.create_child("a").unwrap();
        assert!(matches!(
            root.create_child("a"),
            Err(Error::AlreadyExists { .. })
        ));
        root.finalize().unwrap();
    }
}
