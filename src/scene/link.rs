//! Scene linking: mounting one stored scene as a subtree of another.
//!
//! A location becomes a link boundary when the reserved link attributes
//! are written. Below the boundary every read redirects into the target
//! scene, with paths re-based onto the stored link root; the boundary
//! node itself keeps its hosting-side transform and bound, so links
//! override placement but not internal content. An optional remap
//! attribute maps hosting-side time to target-side time before any
//! channel read on the target. A broken link degrades to "no linked
//! content" so a partially-broken hierarchy remains walkable.

use std::sync::Arc;

use tracing::warn;

use super::payload::Payload;
use super::reader::SceneReader;
use super::shared::SceneFileCache;
use super::writer::SceneWriter;
use super::TagFilter;
use crate::util::{Box3d, DMat4, Error, Result};

/// Attribute holding the target file name of a link.
pub const LINK_FILE_ATTRIBUTE: &str = "scene:link.fileName";
/// Attribute holding the target root path of a link.
pub const LINK_ROOT_ATTRIBUTE: &str = "scene:link.root";
/// Attribute holding the hosting-to-target time remap samples.
pub const LINK_TIME_ATTRIBUTE: &str = "scene:link.time";

fn is_reserved_attribute(name: &str) -> bool {
    name == LINK_FILE_ATTRIBUTE || name == LINK_ROOT_ATTRIBUTE || name == LINK_TIME_ATTRIBUTE
}

#[derive(Clone)]
enum MainScene {
    Reader(SceneReader),
    Writer(SceneWriter),
}

/// A scene-graph handle that resolves links between stored scenes.
pub struct LinkedScene {
    main: MainScene,
    linked: Option<SceneReader>,
    root_link_depth: usize,
    read_only: bool,
    at_link: bool,
    time_remapped: bool,
    files: Arc<SceneFileCache>,
}

impl LinkedScene {
    /// Open a scene file read-only with a private shared-file cache.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::open_with_cache(path, Arc::new(SceneFileCache::default()))
    }

    /// Open a scene file read-only, resolving link targets through the
    /// given cache.
    pub fn open_with_cache(
        path: impl AsRef<std::path::Path>,
        files: Arc<SceneFileCache>,
    ) -> Result<Self> {
        Ok(Self {
            main: MainScene::Reader(SceneReader::open(path)?),
            linked: None,
            root_link_depth: 0,
            read_only: true,
            at_link: false,
            time_remapped: false,
            files,
        })
    }

    /// Wrap an already-open reader.
    pub fn from_reader(reader: SceneReader, files: Arc<SceneFileCache>) -> Self {
        Self {
            main: MainScene::Reader(reader),
            linked: None,
            root_link_depth: 0,
            read_only: true,
            at_link: false,
            time_remapped: false,
            files,
        }
    }

    /// Create a scene file for writing.
    pub fn create(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self {
            main: MainScene::Writer(SceneWriter::create(path)?),
            linked: None,
            root_link_depth: 0,
            read_only: false,
            at_link: false,
            time_remapped: false,
            files: Arc::new(SceneFileCache::default()),
        })
    }

    fn reader(&self) -> Result<&SceneReader> {
        match &self.main {
            MainScene::Reader(r) => Ok(r),
            MainScene::Writer(_) => Err(Error::unsupported(
                "operation not available while writing a scene",
            )),
        }
    }

    fn writer(&self) -> Result<&SceneWriter> {
        match &self.main {
            MainScene::Writer(w) if !self.read_only => Ok(w),
            _ => Err(Error::PermissionDenied {
                path: self.path().join("/"),
                op: "write",
            }),
        }
    }

    /// Whether this location mounts another scene.
    pub fn is_link_boundary(&self) -> bool {
        self.at_link
    }

    /// Name of this location. At the boundary the name comes from the
    /// hosting scene: links override placement, not identity.
    pub fn name(&self) -> String {
        match (&self.linked, self.at_link) {
            (Some(linked), false) => linked.name().to_string(),
            _ => match &self.main {
                MainScene::Reader(r) => r.name().to_string(),
                MainScene::Writer(w) => w.name(),
            },
        }
    }

    /// Path of this location: the hosting path, extended below a link
    /// boundary by the target path re-based past the link root.
    pub fn path(&self) -> Vec<String> {
        let mut path = match &self.main {
            MainScene::Reader(r) => r.path(),
            MainScene::Writer(w) => w.path(),
        };
        if let Some(linked) = &self.linked {
            path.extend(linked.path().into_iter().skip(self.root_link_depth));
        }
        path
    }

    // === Writing ===

    /// Mount `target` at this location without time remapping.
    pub fn write_link(&mut self, target: &SceneReader) -> Result<()> {
        self.write_link_impl(target, None)
    }

    /// Mount `target` at this location, mapping hosting time `host_time`
    /// to target time `target_time`. Repeated calls at increasing hosting
    /// times build the remap curve.
    pub fn write_time_remapped_link(
        &mut self,
        target: &SceneReader,
        target_time: f64,
        host_time: f64,
    ) -> Result<()> {
        self.write_link_impl(target, Some((target_time, host_time)))
    }

    fn write_link_impl(&mut self, target: &SceneReader, remap: Option<(f64, f64)>) -> Result<()> {
        let writer = self.writer()?.clone();
        let first_time = !writer.has_attribute(LINK_FILE_ATTRIBUTE);

        if first_time {
            if writer.has_object() {
                return Err(Error::LinkBoundary {
                    path: format!("/{}", writer.path().join("/")),
                    op: "create a link where an object is stored",
                });
            }
            // Nothing may be written before these checks pass.
            let host_children = writer.child_names();
            let target_children = target.child_names()?;
            for name in &target_children {
                if host_children.contains(name) {
                    return Err(Error::LinkCollision {
                        path: format!("/{}", writer.path().join("/")),
                        name: name.clone(),
                    });
                }
            }
            if !host_children.is_empty() {
                return Err(Error::LinkBoundary {
                    path: format!("/{}", writer.path().join("/")),
                    op: "create a link where child locations exist",
                });
            }

            // Carry the target's bounds onto the hosting location so the
            // hosting hierarchy bounds correctly without opening the
            // target.
            match remap {
                None => {
                    for i in 0..target.num_bound_samples()? {
                        writer
                            .write_bound(&target.read_bound_at_sample(i)?, target.bound_sample_time(i)?)?;
                    }
                }
                Some((target_time, host_time)) => {
                    writer.write_bound(&target.read_bound(target_time)?, host_time)?;
                }
            }

            // The target's own and inherited tags become descendant tags
            // here, so tag queries need not open the target file.
            let ancestor_tags = target.read_tags(TagFilter::ANCESTOR)?;
            if !ancestor_tags.is_empty() {
                warn!(
                    target = %target.file_path().display(),
                    "link target has ancestor tags; they will not be visible through the link"
                );
            }
            let tags = target.read_tags(TagFilter::LOCAL | TagFilter::DESCENDANT)?;
            if !tags.is_empty() {
                writer.write_descendant_tags(&tags)?;
            }

            let attr_time = remap.map_or(0.0, |(_, host_time)| host_time);
            writer.write_attribute(
                LINK_FILE_ATTRIBUTE,
                &Payload::String(target.file_path().to_string_lossy().into_owned()),
                attr_time,
            )?;
            writer.write_attribute(
                LINK_ROOT_ATTRIBUTE,
                &Payload::StringArray(target.path()),
                attr_time,
            )?;
        } else if let Some((target_time, host_time)) = remap {
            writer.write_bound(&target.read_bound(target_time)?, host_time)?;
        }

        if let Some((target_time, host_time)) = remap {
            writer.write_attribute(LINK_TIME_ATTRIBUTE, &Payload::Double(target_time), host_time)?;
            self.time_remapped = true;
        }
        self.at_link = true;
        Ok(())
    }

    /// Append one bound sample on the hosting side.
    pub fn write_bound(&self, bound: &Box3d, time: f64) -> Result<()> {
        self.writer()?.write_bound(bound, time)
    }

    /// Append one transform sample on the hosting side.
    pub fn write_transform(&self, transform: &DMat4, time: f64) -> Result<()> {
        self.writer()?.write_transform(transform, time)
    }

    /// Append one object sample. Link boundaries cannot carry objects.
    pub fn write_object(&self, object: &Payload, time: f64) -> Result<()> {
        let writer = self.writer()?;
        if self.at_link {
            return Err(Error::LinkBoundary {
                path: format!("/{}", writer.path().join("/")),
                op: "write an object",
            });
        }
        writer.write_object(object, time)
    }

    /// Append one attribute sample. The reserved link attributes are
    /// written through [`Self::write_link`] only.
    pub fn write_attribute(&self, name: &str, value: &Payload, time: f64) -> Result<()> {
        if is_reserved_attribute(name) {
            return Err(Error::unsupported(format!(
                "attribute '{name}' is reserved; use write_link"
            )));
        }
        self.writer()?.write_attribute(name, value, time)
    }

    /// Tag the hosting location.
    pub fn write_tags<S: AsRef<str>>(&self, tags: &[S]) -> Result<()> {
        self.writer()?.write_tags(tags)
    }

    /// Create a child location. Link boundaries cannot carry children of
    /// their own.
    pub fn create_child(&self, name: &str) -> Result<Self> {
        let writer = self.writer()?;
        if self.at_link {
            return Err(Error::LinkBoundary {
                path: format!("/{}", writer.path().join("/")),
                op: "create a child location",
            });
        }
        Ok(Self {
            main: MainScene::Writer(writer.create_child(name)?),
            linked: None,
            root_link_depth: 0,
            read_only: false,
            at_link: false,
            time_remapped: false,
            files: Arc::clone(&self.files),
        })
    }

    /// Finish the write session (root handle only).
    pub fn finalize(&self) -> Result<()> {
        self.writer()?.finalize()
    }

    // === Link resolution ===

    fn read_link_target(node: &SceneReader) -> Result<Option<(String, Vec<String>, bool)>> {
        if !(node.has_attribute(LINK_FILE_ATTRIBUTE)? && node.has_attribute(LINK_ROOT_ATTRIBUTE)?)
        {
            return Ok(None);
        }
        let file = match Self::first_attribute(node, LINK_FILE_ATTRIBUTE)?.as_ref() {
            Payload::String(s) => s.clone(),
            _ => return Err(Error::corrupt("link fileName attribute is not a string")),
        };
        let root = match Self::first_attribute(node, LINK_ROOT_ATTRIBUTE)?.as_ref() {
            Payload::StringArray(parts) => parts.clone(),
            _ => return Err(Error::corrupt("link root attribute is not a string array")),
        };
        let remapped = node.has_attribute(LINK_TIME_ATTRIBUTE)?;
        Ok(Some((file, root, remapped)))
    }

    fn first_attribute(node: &SceneReader, name: &str) -> Result<Arc<Payload>> {
        node.read_attribute_at_sample(name, 0)
    }

    /// Open a link target through the shared-file cache and navigate to
    /// the stored root path. Failure degrades to `None`: a broken link
    /// yields no linked content rather than aborting the traversal.
    fn expand_link(&self, file: &str, root: &[String]) -> Option<(SceneReader, usize)> {
        let scene = match self.files.get(file) {
            Ok(scene) => scene,
            Err(e) => {
                warn!(file, error = %e, "could not open link target");
                return None;
            }
        };
        match scene.scene_opt(root) {
            Ok(Some(target)) => Some((target, root.len())),
            Ok(None) => {
                warn!(file, root = %root.join("/"), "link target path missing");
                None
            }
            Err(e) => {
                warn!(file, error = %e, "could not resolve link target path");
                None
            }
        }
    }

    fn wrap_reader_child(&self, child: SceneReader) -> Result<Self> {
        if let Ok(Some((file, root, remapped))) = Self::read_link_target(&child) {
            if let Some((target, depth)) = self.expand_link(&file, &root) {
                return Ok(Self {
                    main: MainScene::Reader(child),
                    linked: Some(target),
                    root_link_depth: depth,
                    read_only: self.read_only,
                    at_link: true,
                    time_remapped: remapped,
                    files: Arc::clone(&self.files),
                });
            }
        }
        Ok(Self {
            main: MainScene::Reader(child),
            linked: None,
            root_link_depth: 0,
            read_only: self.read_only,
            at_link: false,
            time_remapped: false,
            files: Arc::clone(&self.files),
        })
    }

    /// Descend into a child location, expanding link boundaries.
    pub fn child(&self, name: &str) -> Result<Self> {
        if let Some(linked) = &self.linked {
            let c = linked.child(name)?;
            return Ok(Self {
                main: self.main.clone(),
                linked: Some(c),
                root_link_depth: self.root_link_depth,
                read_only: self.read_only,
                at_link: false,
                time_remapped: self.time_remapped,
                files: Arc::clone(&self.files),
            });
        }
        match &self.main {
            MainScene::Reader(r) => self.wrap_reader_child(r.child(name)?),
            MainScene::Writer(w) => {
                let child = w.child(name).ok_or_else(|| Error::NotFound {
                    path: format!("/{}", w.path().join("/")),
                    name: name.to_string(),
                })?;
                Ok(Self {
                    main: MainScene::Writer(child),
                    linked: None,
                    root_link_depth: 0,
                    read_only: self.read_only,
                    at_link: false,
                    time_remapped: false,
                    files: Arc::clone(&self.files),
                })
            }
        }
    }

    /// Navigate to an arbitrary location, crossing at most one link
    /// boundary on the way down.
    pub fn scene<S: AsRef<str>>(&self, path: &[S]) -> Result<Self> {
        let mut node = self.reader()?.scene_root();
        let mut consumed = 0;
        for part in path {
            match node.child_opt(part.as_ref())? {
                Some(next) => {
                    node = next;
                    consumed += 1;
                }
                None => break,
            }
        }

        let mut linked = None;
        let mut depth = 0;
        let mut at_link = false;
        let mut remapped = false;
        if let Some((file, root_path, r)) = Self::read_link_target(&node)? {
            if let Some((target, d)) = self.expand_link(&file, &root_path) {
                linked = Some(target);
                depth = d;
                at_link = true;
                remapped = r;
            }
        }

        if consumed < path.len() {
            let mut target = match linked {
                Some(t) if at_link => t,
                _ => {
                    return Err(Error::NotFound {
                        path: format!("/{}", node.path().join("/")),
                        name: path[consumed].as_ref().to_string(),
                    })
                }
            };
            for part in &path[consumed..] {
                target = target.child(part.as_ref())?;
            }
            return Ok(Self {
                main: MainScene::Reader(node),
                linked: Some(target),
                root_link_depth: depth,
                read_only: self.read_only,
                at_link: false,
                time_remapped: remapped,
                files: Arc::clone(&self.files),
            });
        }

        Ok(Self {
            main: MainScene::Reader(node),
            linked,
            root_link_depth: depth,
            read_only: self.read_only,
            at_link,
            time_remapped: remapped,
            files: Arc::clone(&self.files),
        })
    }

    // === Time remapping ===

    /// Map hosting-side time to target-side time through the stored remap
    /// samples (identity when the link is not remapped).
    pub fn remapped_time(&self, time: f64) -> Result<f64> {
        if !self.time_remapped {
            return Ok(time);
        }
        match self.reader()?.read_attribute(LINK_TIME_ATTRIBUTE, time)?.as_ref() {
            Payload::Double(t) => Ok(*t),
            _ => Err(Error::corrupt("link time attribute is not a double")),
        }
    }

    fn remapped_time_at_sample(&self, index: usize) -> Result<f64> {
        match self
            .reader()?
            .read_attribute_at_sample(LINK_TIME_ATTRIBUTE, index)?
            .as_ref()
        {
            Payload::Double(t) => Ok(*t),
            _ => Err(Error::corrupt("link time attribute is not a double")),
        }
    }

    // === Reading: hierarchy ===

    pub fn child_names(&self) -> Result<Vec<String>> {
        match &self.linked {
            Some(linked) => linked.child_names(),
            None => match &self.main {
                MainScene::Reader(r) => r.child_names(),
                MainScene::Writer(w) => Ok(w.child_names()),
            },
        }
    }

    pub fn has_child(&self, name: &str) -> Result<bool> {
        match &self.linked {
            Some(linked) => linked.has_child(name),
            None => match &self.main {
                MainScene::Reader(r) => r.has_child(name),
                MainScene::Writer(w) => Ok(w.has_child(name)),
            },
        }
    }

    pub fn has_object(&self) -> Result<bool> {
        match &self.linked {
            Some(linked) => linked.has_object(),
            None => match &self.main {
                MainScene::Reader(r) => r.has_object(),
                MainScene::Writer(w) => Ok(w.has_object()),
            },
        }
    }

    // === Reading: bound channel ===
    //
    // The bound and transform at the boundary itself come from the
    // hosting scene: the link overrides placement, not internal content.

    pub fn num_bound_samples(&self) -> Result<usize> {
        match (&self.linked, self.at_link) {
            (Some(_), false) if self.time_remapped => {
                self.reader()?.num_attribute_samples(LINK_TIME_ATTRIBUTE)
            }
            (Some(linked), false) => linked.num_bound_samples(),
            _ => self.reader()?.num_bound_samples(),
        }
    }

    pub fn bound_sample_time(&self, index: usize) -> Result<f64> {
        match (&self.linked, self.at_link) {
            (Some(_), false) if self.time_remapped => {
                self.reader()?.attribute_sample_time(LINK_TIME_ATTRIBUTE, index)
            }
            (Some(linked), false) => linked.bound_sample_time(index),
            _ => self.reader()?.bound_sample_time(index),
        }
    }

    pub fn read_bound_at_sample(&self, index: usize) -> Result<Box3d> {
        match (&self.linked, self.at_link) {
            (Some(linked), false) if self.time_remapped => {
                linked.read_bound(self.remapped_time_at_sample(index)?)
            }
            (Some(linked), false) => linked.read_bound_at_sample(index),
            _ => self.reader()?.read_bound_at_sample(index),
        }
    }

    pub fn read_bound(&self, time: f64) -> Result<Box3d> {
        match (&self.linked, self.at_link) {
            (Some(linked), false) => linked.read_bound(self.remapped_time(time)?),
            _ => self.reader()?.read_bound(time),
        }
    }

    // === Reading: transform channel ===

    pub fn num_transform_samples(&self) -> Result<usize> {
        match (&self.linked, self.at_link) {
            (Some(_), false) if self.time_remapped => {
                self.reader()?.num_attribute_samples(LINK_TIME_ATTRIBUTE)
            }
            (Some(linked), false) => linked.num_transform_samples(),
            _ => self.reader()?.num_transform_samples(),
        }
    }

    pub fn transform_sample_time(&self, index: usize) -> Result<f64> {
        match (&self.linked, self.at_link) {
            (Some(_), false) if self.time_remapped => {
                self.reader()?.attribute_sample_time(LINK_TIME_ATTRIBUTE, index)
            }
            (Some(linked), false) => linked.transform_sample_time(index),
            _ => self.reader()?.transform_sample_time(index),
        }
    }

    pub fn read_transform_at_sample(&self, index: usize) -> Result<DMat4> {
        match (&self.linked, self.at_link) {
            (Some(linked), false) if self.time_remapped => {
                linked.read_transform(self.remapped_time_at_sample(index)?)
            }
            (Some(linked), false) => linked.read_transform_at_sample(index),
            _ => self.reader()?.read_transform_at_sample(index),
        }
    }

    pub fn read_transform(&self, time: f64) -> Result<DMat4> {
        match (&self.linked, self.at_link) {
            (Some(linked), false) => linked.read_transform(self.remapped_time(time)?),
            _ => self.reader()?.read_transform(time),
        }
    }

    // === Reading: object channel ===
    //
    // Objects always come from the linked scene once a boundary is
    // crossed, the boundary node included: boundaries cannot carry
    // objects of their own.

    pub fn num_object_samples(&self) -> Result<usize> {
        match &self.linked {
            Some(_) if self.time_remapped => {
                self.reader()?.num_attribute_samples(LINK_TIME_ATTRIBUTE)
            }
            Some(linked) => linked.num_object_samples(),
            None => self.reader()?.num_object_samples(),
        }
    }

    pub fn object_sample_time(&self, index: usize) -> Result<f64> {
        match &self.linked {
            Some(_) if self.time_remapped => {
                self.reader()?.attribute_sample_time(LINK_TIME_ATTRIBUTE, index)
            }
            Some(linked) => linked.object_sample_time(index),
            None => self.reader()?.object_sample_time(index),
        }
    }

    pub fn read_object_at_sample(&self, index: usize) -> Result<Arc<Payload>> {
        match &self.linked {
            Some(linked) if self.time_remapped => {
                linked.read_object(self.remapped_time_at_sample(index)?)
            }
            Some(linked) => linked.read_object_at_sample(index),
            None => self.reader()?.read_object_at_sample(index),
        }
    }

    pub fn read_object(&self, time: f64) -> Result<Arc<Payload>> {
        match &self.linked {
            Some(linked) => linked.read_object(self.remapped_time(time)?),
            None => self.reader()?.read_object(time),
        }
    }

    // === Reading: attribute channels ===

    pub fn attribute_names(&self) -> Result<Vec<String>> {
        match (&self.linked, self.at_link) {
            (Some(linked), false) => linked.attribute_names(),
            _ => match &self.main {
                MainScene::Reader(r) => r.attribute_names(),
                MainScene::Writer(_) => Err(Error::unsupported(
                    "operation not available while writing a scene",
                )),
            },
        }
    }

    pub fn has_attribute(&self, name: &str) -> Result<bool> {
        match (&self.linked, self.at_link) {
            (Some(linked), false) => linked.has_attribute(name),
            _ => self.reader()?.has_attribute(name),
        }
    }

    pub fn num_attribute_samples(&self, name: &str) -> Result<usize> {
        match (&self.linked, self.at_link) {
            (Some(_), false) if self.time_remapped => {
                self.reader()?.num_attribute_samples(LINK_TIME_ATTRIBUTE)
            }
            (Some(linked), false) => linked.num_attribute_samples(name),
            _ => self.reader()?.num_attribute_samples(name),
        }
    }

    pub fn read_attribute_at_sample(&self, name: &str, index: usize) -> Result<Arc<Payload>> {
        match (&self.linked, self.at_link) {
            (Some(linked), false) if self.time_remapped => {
                linked.read_attribute(name, self.remapped_time_at_sample(index)?)
            }
            (Some(linked), false) => linked.read_attribute_at_sample(name, index),
            _ => self.reader()?.read_attribute_at_sample(name, index),
        }
    }

    pub fn read_attribute(&self, name: &str, time: f64) -> Result<Arc<Payload>> {
        match (&self.linked, self.at_link) {
            (Some(linked), false) => linked.read_attribute(name, self.remapped_time(time)?),
            _ => self.reader()?.read_attribute(name, time),
        }
    }

    // === Reading: tags ===

    /// Tags visible at this location. Through a link, target tags union
    /// the hosting-side ancestor tags; the hosting boundary's local tags
    /// count as ancestors for locations below it.
    pub fn read_tags(&self, filter: TagFilter) -> Result<Vec<String>> {
        match &self.linked {
            Some(linked) => {
                let mut out: std::collections::BTreeSet<String> =
                    linked.read_tags(filter)?.into_iter().collect();
                let mut main_filter = TagFilter::NONE;
                if filter.contains(TagFilter::ANCESTOR) {
                    main_filter = main_filter | TagFilter::ANCESTOR;
                    if !self.at_link {
                        // Below the boundary, the boundary's own local
                        // tags read as ancestors.
                        main_filter = main_filter | TagFilter::LOCAL;
                    }
                }
                if self.at_link && filter.contains(TagFilter::LOCAL) {
                    main_filter = main_filter | TagFilter::LOCAL;
                }
                if main_filter != TagFilter::NONE {
                    out.extend(self.reader()?.read_tags(main_filter)?);
                }
                Ok(out.into_iter().collect())
            }
            None => self.reader()?.read_tags(filter),
        }
    }

    pub fn has_tag(&self, name: &str, filter: TagFilter) -> Result<bool> {
        Ok(self.read_tags(filter)?.iter().any(|t| t == name))
    }
}
