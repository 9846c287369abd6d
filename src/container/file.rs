//! Container file handle and client-facing cursor.
//!
//! [`IndexedFile`] is a "current directory" pointer into the index of a
//! shared, open container. Cursors are cheap to duplicate: each carries its
//! own position and open mode while sharing the underlying file and index.
//!
//! Flushing the index is explicit: [`IndexedFile::commit`] writes a new
//! index generation and truncates the file after it. Dropping an
//! uncommitted writable container only logs a warning.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::format::{
    UNVERSIONED_FOOTER_SIZE, UNVERSIONED_MAGIC, VERSIONED_FOOTER_SIZE, VERSIONED_MAGIC,
};
use super::index::{Entry, EntryKind, Index, NodeId};
use crate::util::{Error, IoData, Result};

/// How a container was opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only; the file must exist and parse.
    Read,
    /// Create or truncate, then write a fresh container.
    Write,
    /// Open an existing container for additional writes. An empty file
    /// degrades to `Write` behavior.
    Append,
}

/// What to do when a looked-up child is missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingBehaviour {
    /// Fail with a not-found error.
    Error,
    /// Return `None`.
    Null,
    /// Create the child (directories only; requires a writable cursor).
    Create,
}

/// Raw byte storage behind a container: memory-mapped for read-only
/// handles, a seekable file for writable ones.
#[derive(Debug)]
enum BlockFile {
    Mmap(Mmap),
    File(File),
}

impl BlockFile {
    fn len(&self) -> Result<u64> {
        match self {
            Self::Mmap(m) => Ok(m.len() as u64),
            Self::File(f) => Ok(f.metadata()?.len()),
        }
    }

    fn read_exact_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        match self {
            Self::Mmap(m) => {
                let end = pos as usize + buf.len();
                if end > m.len() {
                    return Err(Error::UnexpectedEof(end as u64));
                }
                buf.copy_from_slice(&m[pos as usize..end]);
                Ok(())
            }
            Self::File(f) => {
                f.seek(SeekFrom::Start(pos))?;
                f.read_exact(buf)?;
                Ok(())
            }
        }
    }

    fn write_all_at(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        match self {
            Self::Mmap(_) => Err(Error::unsupported("write through a read-only container")),
            Self::File(f) => {
                f.seek(SeekFrom::Start(pos))?;
                f.write_all(data)?;
                Ok(())
            }
        }
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        match self {
            Self::Mmap(_) => Err(Error::unsupported("truncate a read-only container")),
            Self::File(f) => {
                f.set_len(len)?;
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            Self::Mmap(_) => Ok(()),
            Self::File(f) => {
                f.flush()?;
                Ok(())
            }
        }
    }
}

/// Shared state of one open container.
#[derive(Debug)]
pub(crate) struct Container {
    path: PathBuf,
    file: Mutex<BlockFile>,
    index: RwLock<Index>,
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.index.read().is_dirty() {
            warn!(path = %self.path.display(), "container dropped with uncommitted index");
        }
    }
}

/// Summary counters for an open container, used by tooling.
#[derive(Clone, Copy, Debug)]
pub struct ContainerStats {
    pub format_version: i64,
    pub node_count: usize,
    pub free_page_count: usize,
    pub string_count: usize,
    pub data_end: i64,
}

/// Cursor into an open container.
#[derive(Clone, Debug)]
pub struct IndexedFile {
    container: Arc<Container>,
    node: NodeId,
    top: NodeId,
    mode: OpenMode,
}

impl IndexedFile {
    /// Open a container file, positioned at its root directory.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();
        let (block, index) = match mode {
            OpenMode::Read => {
                let file = File::open(path).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        Error::FileNotFound(path.to_path_buf())
                    } else {
                        Error::Io(e)
                    }
                })?;
                // Safety: the mapping is read-only and the container policy
                // gives writers exclusive ownership of their file.
                let mmap = unsafe { Mmap::map(&file) }.map_err(Error::Io)?;
                let mut block = BlockFile::Mmap(mmap);
                let index = load_index(&mut block)?;
                (block, index)
            }
            OpenMode::Write => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)?;
                (BlockFile::File(file), Index::new())
            }
            OpenMode::Append => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(path)?;
                let mut block = BlockFile::File(file);
                let index = if block.len()? == 0 {
                    Index::new()
                } else {
                    load_index(&mut block)?
                };
                (block, index)
            }
        };

        debug!(
            path = %path.display(),
            ?mode,
            nodes = index.node_count(),
            "opened container"
        );

        Ok(Self {
            container: Arc::new(Container {
                path: path.to_path_buf(),
                file: Mutex::new(block),
                index: RwLock::new(index),
            }),
            node: 0,
            top: 0,
            mode,
        })
    }

    /// The mode this cursor operates under.
    #[inline]
    pub fn open_mode(&self) -> OpenMode {
        self.mode
    }

    /// Path of the underlying container file.
    pub fn file_path(&self) -> &Path {
        &self.container.path
    }

    /// Arena id of the cursor's current node.
    pub(crate) fn node_id(&self) -> i64 {
        self.node
    }

    /// Second cursor over the same container, repositioned at the root.
    /// A write-exclusive cursor is demoted to an append-compatible mode so
    /// the file can be read elsewhere while still being written here.
    pub fn reset_root(&self) -> Self {
        Self {
            container: Arc::clone(&self.container),
            node: 0,
            top: 0,
            mode: match self.mode {
                OpenMode::Write => OpenMode::Append,
                other => other,
            },
        }
    }

    /// Cursor whose `..`/absolute navigation is confined to the current
    /// directory and its subtree.
    pub fn rooted(&self) -> Self {
        Self {
            top: self.node,
            ..self.clone()
        }
    }

    /// Name of the cursor's current entry.
    pub fn current_entry_id(&self) -> Result<String> {
        let index = self.container.index.read();
        Ok(index.node(self.node)?.entry.name().to_string())
    }

    /// Path of the cursor's current directory, container root excluded.
    pub fn path(&self) -> Result<Vec<String>> {
        self.container.index.read().path_of(self.node)
    }

    fn path_display(&self) -> String {
        match self.path() {
            Ok(parts) => format!("/{}", parts.join("/")),
            Err(_) => "<detached>".to_string(),
        }
    }

    fn require_writable(&self, op: &'static str) -> Result<()> {
        if self.mode == OpenMode::Read {
            return Err(Error::PermissionDenied {
                path: self.path_display(),
                op,
            });
        }
        Ok(())
    }

    fn at(&self, node: NodeId) -> Self {
        Self {
            container: Arc::clone(&self.container),
            node,
            top: self.top,
            mode: self.mode,
        }
    }

    /// Names of all children of the current directory.
    pub fn entry_ids(&self) -> Result<Vec<String>> {
        let index = self.container.index.read();
        Ok(index.node(self.node)?.children.keys().cloned().collect())
    }

    /// Names of children of the given kind.
    pub fn entry_ids_of_kind(&self, kind: EntryKind) -> Result<Vec<String>> {
        let index = self.container.index.read();
        let node = index.node(self.node)?;
        let mut out = Vec::with_capacity(node.children.len());
        for (name, &child) in &node.children {
            if index.node(child)?.entry.kind() == kind {
                out.push(name.clone());
            }
        }
        Ok(out)
    }

    /// Whether the current directory has a child of the given name.
    pub fn has_entry(&self, name: &str) -> Result<bool> {
        let index = self.container.index.read();
        Ok(index.child_of(self.node, name)?.is_some())
    }

    /// Describe the named child.
    pub fn entry(&self, name: &str) -> Result<Entry> {
        let index = self.container.index.read();
        match index.child_of(self.node, name)? {
            Some(child) => Ok(index.node(child)?.entry.clone()),
            None => Err(self.not_found(name)),
        }
    }

    fn not_found(&self, name: &str) -> Error {
        Error::NotFound {
            path: self.path_display(),
            name: name.to_string(),
        }
    }

    /// Descend into a child directory.
    pub fn subdirectory(&self, name: &str, missing: MissingBehaviour) -> Result<Option<Self>> {
        let found = {
            let index = self.container.index.read();
            match index.child_of(self.node, name)? {
                Some(child) => {
                    // A File entry shadows the name without matching.
                    if index.node(child)?.entry.kind() == EntryKind::Directory {
                        Some(child)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some(child) = found {
            return Ok(Some(self.at(child)));
        }
        match missing {
            MissingBehaviour::Null => Ok(None),
            MissingBehaviour::Error => Err(self.not_found(name)),
            MissingBehaviour::Create => {
                self.require_writable("create subdirectory")?;
                let mut index = self.container.index.write();
                let child = index.insert(self.node, Entry::directory(name))?;
                Ok(Some(self.at(child)))
            }
        }
    }

    /// Create a child directory, failing if the name exists.
    pub fn create_subdirectory(&self, name: &str) -> Result<Self> {
        self.require_writable("create subdirectory")?;
        let mut index = self.container.index.write();
        let child = index.insert(self.node, Entry::directory(name))?;
        Ok(self.at(child))
    }

    /// Cursor at the parent directory, `None` at the container root.
    pub fn parent_directory(&self) -> Result<Option<Self>> {
        let index = self.container.index.read();
        Ok(index.node(self.node)?.parent.map(|p| self.at(p)))
    }

    /// Navigate a directory path from the cursor's top boundary.
    pub fn directory<S: AsRef<str>>(
        &self,
        path: &[S],
        missing: MissingBehaviour,
    ) -> Result<Option<Self>> {
        let mut cursor = self.at(self.top);
        for part in path {
            cursor = match cursor.subdirectory(part.as_ref(), missing)? {
                Some(next) => next,
                None => return Ok(None),
            };
        }
        Ok(Some(cursor))
    }

    /// Resolve a `/`-separated path (with `.` and `..`) from the cursor,
    /// confined to the cursor's top boundary. Returns the deepest cursor
    /// reached and whether the full path resolved.
    pub fn find(&self, path: &str) -> Result<(Self, bool)> {
        let index = self.container.index.read();
        let (node, exact) = index.find(self.node, self.top, path)?;
        Ok((self.at(node), exact))
    }

    /// Remove the named child and its subtree, freeing stored data.
    pub fn remove(&self, name: &str) -> Result<()> {
        self.require_writable("remove")?;
        let mut index = self.container.index.write();
        match index.child_of(self.node, name)? {
            Some(child) => index.remove(child),
            None => Err(self.not_found(name)),
        }
    }

    /// Remove every child of the current directory.
    pub fn remove_all(&self) -> Result<()> {
        self.require_writable("remove")?;
        let mut index = self.container.index.write();
        let children: Vec<NodeId> = index.node(self.node)?.children.values().copied().collect();
        for child in children {
            index.remove(child)?;
        }
        Ok(())
    }

    /// Write a scalar entry. An existing entry of the same name is removed
    /// first; the format has no in-place update.
    pub fn write<T: IoData>(&self, name: &str, value: &T) -> Result<()> {
        let mut data = Vec::new();
        T::encode(std::slice::from_ref(value), &mut data);
        self.write_entry(name, T::SCALAR_KIND, 0, &data)
    }

    /// Write an array entry.
    pub fn write_array<T: IoData>(&self, name: &str, values: &[T]) -> Result<()> {
        let mut data = Vec::new();
        T::encode(values, &mut data);
        self.write_entry(name, T::ARRAY_KIND, values.len() as u64, &data)
    }

    fn write_entry(
        &self,
        name: &str,
        kind: crate::util::DataKind,
        array_length: u64,
        data: &[u8],
    ) -> Result<()> {
        self.require_writable("write")?;
        let mut index = self.container.index.write();
        if let Some(existing) = index.child_of(self.node, name)? {
            index.remove(existing)?;
        }
        let id = index.insert(self.node, Entry::file(name, kind, array_length))?;
        let offset = if data.is_empty() {
            0
        } else {
            index.alloc.allocate(data.len() as i64)
        };
        {
            let node = index.node_mut(id)?;
            node.offset = offset;
            node.size = data.len() as i64;
        }
        index.mark_dirty();
        if !data.is_empty() {
            let mut file = self.container.file.lock();
            file.write_all_at(offset as u64, data)?;
        }
        Ok(())
    }

    /// Read a scalar entry, validating its stored kind.
    pub fn read<T: IoData>(&self, name: &str) -> Result<T> {
        let (_, offset, size) = self.entry_location(name, T::SCALAR_KIND, None)?;
        let bytes = self.read_block(offset, size)?;
        let mut values = T::decode(&bytes, 1)?;
        values
            .pop()
            .ok_or_else(|| Error::corrupt(format!("empty scalar entry '{name}'")))
    }

    /// Read an array entry, validating its stored kind.
    pub fn read_array<T: IoData>(&self, name: &str) -> Result<Vec<T>> {
        self.read_array_expecting(name, None)
    }

    /// Read an array entry; when `expected` is given the stored length
    /// must match.
    pub fn read_array_expecting<T: IoData>(
        &self,
        name: &str,
        expected: Option<u64>,
    ) -> Result<Vec<T>> {
        let (count, offset, size) = self.entry_location(name, T::ARRAY_KIND, expected)?;
        let bytes = self.read_block(offset, size)?;
        T::decode(&bytes, count as usize)
    }

    fn entry_location(
        &self,
        name: &str,
        expected_kind: crate::util::DataKind,
        expected_length: Option<u64>,
    ) -> Result<(u64, i64, i64)> {
        let index = self.container.index.read();
        let child = index
            .child_of(self.node, name)?
            .ok_or_else(|| self.not_found(name))?;
        let node = index.node(child)?;
        if node.entry.kind() != EntryKind::File {
            return Err(self.not_found(name));
        }
        if node.entry.data_kind() != expected_kind {
            return Err(Error::TypeMismatch {
                name: name.to_string(),
                expected: expected_kind,
                actual: node.entry.data_kind(),
            });
        }
        if let Some(expected) = expected_length {
            if node.entry.array_length() != expected {
                return Err(Error::ArrayLengthMismatch {
                    name: name.to_string(),
                    expected,
                    actual: node.entry.array_length(),
                });
            }
        }
        Ok((node.entry.array_length(), node.offset, node.size))
    }

    fn read_block(&self, offset: i64, size: i64) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; size as usize];
        if size > 0 {
            let mut file = self.container.file.lock();
            file.read_exact_at(offset as u64, &mut bytes)?;
        }
        Ok(bytes)
    }

    /// Flush the index to disk if it changed, truncating the file just
    /// past the new footer.
    pub fn commit(&self) -> Result<()> {
        let mut index = self.container.index.write();
        if !index.is_dirty() {
            return Ok(());
        }
        let end = index.alloc.end();
        let bytes = index.serialize(end)?;
        {
            let mut file = self.container.file.lock();
            file.write_all_at(end as u64, &bytes)?;
            file.set_len(end as u64 + bytes.len() as u64)?;
            file.flush()?;
        }
        index.clear_dirty();
        debug!(path = %self.container.path.display(), end, "committed container index");
        Ok(())
    }

    /// Summary counters for tooling.
    pub fn stats(&self) -> ContainerStats {
        let index = self.container.index.read();
        ContainerStats {
            format_version: index.version(),
            node_count: index.node_count(),
            free_page_count: index.alloc.free_page_count(),
            string_count: index.string_count(),
            data_end: index.alloc.end(),
        }
    }

    /// Whether this cursor and `other` share one open container.
    pub fn same_container(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.container, &other.container)
    }
}

fn load_index(block: &mut BlockFile) -> Result<Index> {
    let len = block.len()?;
    if len < 8 {
        return Err(Error::UnexpectedEof(len));
    }
    let mut tail = [0u8; 8];
    block.read_exact_at(len - 8, &mut tail)?;
    let magic = i64::from_le_bytes(tail);

    let (index_offset, version, index_end) = if magic == VERSIONED_MAGIC {
        if len < VERSIONED_FOOTER_SIZE {
            return Err(Error::UnexpectedEof(len));
        }
        let mut buf = [0u8; 16];
        block.read_exact_at(len - VERSIONED_FOOTER_SIZE, &mut buf)?;
        let offset = i64::from_le_bytes(buf[0..8].try_into().expect("8 bytes"));
        let version = i64::from_le_bytes(buf[8..16].try_into().expect("8 bytes"));
        (offset, version, len - VERSIONED_FOOTER_SIZE)
    } else if magic == UNVERSIONED_MAGIC {
        if len < UNVERSIONED_FOOTER_SIZE {
            return Err(Error::UnexpectedEof(len));
        }
        let mut buf = [0u8; 8];
        block.read_exact_at(len - UNVERSIONED_FOOTER_SIZE, &mut buf)?;
        (i64::from_le_bytes(buf), 0, len - UNVERSIONED_FOOTER_SIZE)
    } else {
        return Err(Error::BadMagic(magic));
    };

    if index_offset < 0 || index_offset as u64 > index_end {
        return Err(Error::corrupt(format!(
            "index offset {index_offset} outside file of {len} bytes"
        )));
    }

    let mut body = vec![0u8; (index_end - index_offset as u64) as usize];
    block.read_exact_at(index_offset as u64, &mut body)?;
    Index::deserialize(&body, version, index_offset)
}
