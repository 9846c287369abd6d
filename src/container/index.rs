//! In-memory tree of nodes mirroring the stored hierarchy.
//!
//! Nodes live in an arena addressed by monotonically assigned ids; parent
//! and child edges are id references, never owning pointers, so the
//! recursive delete/deallocate walk cannot dangle. The arena, the string
//! cache and the page allocator persist together as one index generation
//! at the logical end of the file.

use std::collections::BTreeMap;
use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use smallvec::SmallVec;

use super::alloc::PageAllocator;
use super::format::{
    CURRENT_VERSION, ENTRY_TYPE_DIRECTORY, ENTRY_TYPE_FILE, NO_PARENT, ROOT_NAME,
    VERSIONED_MAGIC,
};
use super::string_cache::StringCache;
use crate::util::{DataKind, Error, Result};

/// Arena id of a node. The root is always id 0.
pub(crate) type NodeId = i64;

/// Kind of a hierarchy entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    File,
}

/// Description of one child within its parent: name, kind and, for File
/// entries, the stored data kind and array length.
#[derive(Clone, Debug)]
pub struct Entry {
    name: String,
    kind: EntryKind,
    data_kind: DataKind,
    array_length: u64,
}

impl Entry {
    /// Entry describing a directory.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            data_kind: DataKind::Invalid,
            array_length: 0,
        }
    }

    /// Entry describing a typed data file.
    pub fn file(name: impl Into<String>, data_kind: DataKind, array_length: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            data_kind,
            array_length,
        }
    }

    /// The entry's name within its parent.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    #[inline]
    pub fn data_kind(&self) -> DataKind {
        self.data_kind
    }

    /// Element count for array entries, 0 for scalars and directories.
    #[inline]
    pub fn array_length(&self) -> u64 {
        self.array_length
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        self.data_kind.is_array()
    }
}

/// One stored node: an entry plus the location of its data block.
#[derive(Debug)]
pub(crate) struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub entry: Entry,
    pub offset: i64,
    pub size: i64,
    pub children: BTreeMap<String, NodeId>,
}

/// The container index: node arena, string cache and free-page allocator.
#[derive(Debug)]
pub(crate) struct Index {
    nodes: Vec<Option<Node>>,
    strings: StringCache,
    pub alloc: PageAllocator,
    version: i64,
    dirty: bool,
}

impl Index {
    /// Create a fresh index holding only the root directory.
    pub fn new() -> Self {
        let mut strings = StringCache::new();
        strings.intern(ROOT_NAME);
        let root = Node {
            id: 0,
            parent: None,
            entry: Entry::directory(ROOT_NAME),
            offset: 0,
            size: 0,
            children: BTreeMap::new(),
        };
        Self {
            nodes: vec![Some(root)],
            strings,
            alloc: PageAllocator::new(),
            version: CURRENT_VERSION,
            dirty: true,
        }
    }

    #[inline]
    pub fn version(&self) -> i64 {
        self.version
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::corrupt(format!("node id {id} not present in index")))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::corrupt(format!("node id {id} not present in index")))
    }

    /// True when the node is still live (cursors may outlive a removal).
    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.get(id as usize).map_or(false, Option::is_some)
    }

    pub fn child_of(&self, parent: NodeId, name: &str) -> Result<Option<NodeId>> {
        Ok(self.node(parent)?.children.get(name).copied())
    }

    /// Reconstruct the path of a node, root excluded.
    pub fn path_of(&self, id: NodeId) -> Result<Vec<String>> {
        let mut parts = Vec::new();
        let mut cur = self.node(id)?;
        while let Some(parent) = cur.parent {
            parts.push(cur.entry.name().to_string());
            cur = self.node(parent)?;
        }
        parts.reverse();
        Ok(parts)
    }

    /// Insert a new entry under `parent`, returning the node id.
    pub fn insert(&mut self, parent: NodeId, entry: Entry) -> Result<NodeId> {
        if self.node(parent)?.children.contains_key(entry.name()) {
            return Err(Error::AlreadyExists {
                path: self.path_of(parent)?.join("/"),
                name: entry.name().to_string(),
            });
        }
        let id = self.nodes.len() as NodeId;
        self.strings.intern(entry.name());
        let name = entry.name().to_string();
        self.nodes.push(Some(Node {
            id,
            parent: Some(parent),
            entry,
            offset: 0,
            size: 0,
            children: BTreeMap::new(),
        }));
        self.node_mut(parent)?.children.insert(name, id);
        self.dirty = true;
        Ok(id)
    }

    /// Remove a node and its subtree, deallocating every File descendant's
    /// data block.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        let parent = self.node(id)?.parent;
        self.remove_walk(id)?;
        if let Some(parent) = parent {
            let name = match &self.nodes[id as usize] {
                Some(n) => n.entry.name().to_string(),
                None => return Err(Error::corrupt(format!("node id {id} vanished during remove"))),
            };
            self.node_mut(parent)?.children.remove(&name);
        }
        self.nodes[id as usize] = None;
        self.dirty = true;
        Ok(())
    }

    fn remove_walk(&mut self, id: NodeId) -> Result<()> {
        let (children, freed): (Vec<NodeId>, Option<(i64, i64)>) = {
            let node = self.node(id)?;
            let freed = match node.entry.kind() {
                EntryKind::File if node.size > 0 => Some((node.offset, node.size)),
                _ => None,
            };
            (node.children.values().copied().collect(), freed)
        };
        if let Some((offset, size)) = freed {
            self.alloc.deallocate(offset, size);
        }
        for child in children {
            self.remove_walk(child)?;
            self.nodes[child as usize] = None;
        }
        Ok(())
    }

    /// Resolve a `/`-separated path from `start`, never ascending above
    /// `top`. Returns the deepest node matched and whether the whole path
    /// resolved.
    pub fn find(&self, start: NodeId, top: NodeId, path: &str) -> Result<(NodeId, bool)> {
        let mut node = if path.starts_with('/') { top } else { start };
        let tokens: SmallVec<[&str; 8]> =
            path.split('/').filter(|t| !t.is_empty()).collect();
        for token in tokens {
            match token {
                "." => {}
                ".." => {
                    if node != top {
                        node = self
                            .node(node)?
                            .parent
                            .ok_or_else(|| Error::corrupt("non-root node without parent"))?;
                    }
                }
                name => match self.child_of(node, name)? {
                    Some(child) => node = child,
                    None => return Ok((node, false)),
                },
            }
        }
        Ok((node, true))
    }

    /// Serialize the index block plus footer, ready to be written at
    /// `index_offset` (the logical end of the data region).
    pub fn serialize(&self, index_offset: i64) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(4096);
        self.strings.write_to(&mut buf)?;

        buf.write_i64::<LittleEndian>(self.node_count() as i64)?;
        self.write_node_walk(&mut buf, 0)?;

        buf.write_i64::<LittleEndian>(self.alloc.free_page_count() as i64)?;
        for (offset, size) in self.alloc.pages_by_size() {
            buf.write_i64::<LittleEndian>(offset)?;
            buf.write_i64::<LittleEndian>(size)?;
        }

        buf.write_i64::<LittleEndian>(index_offset)?;
        buf.write_i64::<LittleEndian>(CURRENT_VERSION)?;
        buf.write_i64::<LittleEndian>(VERSIONED_MAGIC)?;
        Ok(buf)
    }

    fn write_node_walk(&self, buf: &mut Vec<u8>, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        let entry = &node.entry;
        let type_byte = match entry.kind() {
            EntryKind::Directory => ENTRY_TYPE_DIRECTORY,
            EntryKind::File => ENTRY_TYPE_FILE,
        };
        buf.push(type_byte);
        buf.write_i64::<LittleEndian>(self.strings.find(entry.name())?)?;
        buf.push(entry.data_kind() as u8);
        buf.write_i64::<LittleEndian>(entry.array_length() as i64)?;
        buf.write_i64::<LittleEndian>(node.id)?;
        buf.write_i64::<LittleEndian>(node.parent.unwrap_or(NO_PARENT))?;
        buf.write_i64::<LittleEndian>(node.offset)?;
        buf.write_i64::<LittleEndian>(node.size)?;

        for &child in node.children.values() {
            self.write_node_walk(buf, child)?;
        }
        Ok(())
    }

    /// Rebuild an index from a serialized block (footer excluded).
    pub fn deserialize(bytes: &[u8], version: i64, index_offset: i64) -> Result<Self> {
        let mut r = bytes;

        let strings = if version >= 1 {
            StringCache::read_from(&mut r)?
        } else {
            StringCache::new()
        };

        let mut index = Self {
            nodes: Vec::new(),
            strings,
            alloc: PageAllocator::with_end(index_offset),
            version,
            dirty: false,
        };

        let node_count = r.read_i64::<LittleEndian>()?;
        if node_count < 1 {
            return Err(Error::corrupt(format!("node count {node_count}")));
        }
        for _ in 0..node_count {
            index.read_node(&mut r, version)?;
        }

        let free_pages = r.read_i64::<LittleEndian>()?;
        if free_pages < 0 {
            return Err(Error::corrupt(format!("free page count {free_pages}")));
        }
        for _ in 0..free_pages {
            let offset = r.read_i64::<LittleEndian>()?;
            let size = r.read_i64::<LittleEndian>()?;
            index.alloc.restore_page(offset, size)?;
        }

        if !index.is_live(0) {
            return Err(Error::corrupt("no root node in index"));
        }
        Ok(index)
    }

    fn read_node(&mut self, r: &mut &[u8], version: i64) -> Result<()> {
        let mut type_byte = [0u8; 1];
        r.read_exact(&mut type_byte)?;
        let kind = match type_byte[0] {
            ENTRY_TYPE_DIRECTORY => EntryKind::Directory,
            ENTRY_TYPE_FILE => EntryKind::File,
            other => return Err(Error::corrupt(format!("unknown entry type {other}"))),
        };

        let name = if version >= 1 {
            let string_id = r.read_i64::<LittleEndian>()?;
            self.strings.get(string_id)?.to_string()
        } else {
            // Legacy: inline name bytes per node.
            let len = r.read_i64::<LittleEndian>()?;
            if len < 0 {
                return Err(Error::corrupt(format!("negative name length {len}")));
            }
            let mut bytes = vec![0u8; len as usize];
            r.read_exact(&mut bytes)?;
            let name = String::from_utf8(bytes)?;
            self.strings.intern(&name);
            name
        };

        let mut kind_byte = [0u8; 1];
        r.read_exact(&mut kind_byte)?;
        let data_kind = DataKind::from_u8(kind_byte[0]);
        let array_length = r.read_i64::<LittleEndian>()?;
        let id = r.read_i64::<LittleEndian>()?;
        let parent_id = r.read_i64::<LittleEndian>()?;
        let offset = r.read_i64::<LittleEndian>()?;
        let size = r.read_i64::<LittleEndian>()?;

        if id < 0 {
            return Err(Error::corrupt(format!("negative node id {id}")));
        }
        let entry = match kind {
            EntryKind::Directory => Entry::directory(&name),
            EntryKind::File => Entry::file(&name, data_kind, array_length.max(0) as u64),
        };

        let parent = if parent_id == NO_PARENT {
            if id != 0 {
                return Err(Error::corrupt(format!("non-root node {id} without parent")));
            }
            None
        } else {
            Some(parent_id)
        };

        if id as usize >= self.nodes.len() {
            self.nodes.resize_with(id as usize + 1, || None);
        }
        self.nodes[id as usize] = Some(Node {
            id,
            parent,
            entry,
            offset,
            size,
            children: BTreeMap::new(),
        });

        if let Some(parent_id) = parent {
            // Nodes are written pre-order, so the parent must already exist.
            if !self.is_live(parent_id) {
                return Err(Error::corrupt(format!(
                    "node {id} references missing parent {parent_id}"
                )));
            }
            self.node_mut(parent_id)?.children.insert(name, id);
        }
        Ok(())
    }
}
