//! Interned string table persisted once per index generation.
//!
//! Entry and attribute names repeat at every hierarchy location, so node
//! records store a compact integer id instead of the name bytes. Ids are
//! assigned monotonically and never reused within a session.

use std::collections::HashMap;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::util::{Error, Result};

/// Bidirectional string <-> id table.
#[derive(Debug, Default)]
pub struct StringCache {
    string_to_id: HashMap<String, i64>,
    id_to_string: Vec<String>,
    next_id: i64,
}

impl StringCache {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Find-or-add a string, returning its id.
    pub fn intern(&mut self, s: &str) -> i64 {
        if let Some(&id) = self.string_to_id.get(s) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.string_to_id.insert(s.to_string(), id);
        if id as usize >= self.id_to_string.len() {
            self.id_to_string.resize(id as usize + 1, String::new());
        }
        self.id_to_string[id as usize] = s.to_string();
        debug_assert_eq!(self.string_to_id.len(), self.id_to_string.len());
        id
    }

    /// Look up the id of an already-interned string.
    pub fn find(&self, s: &str) -> Result<i64> {
        self.string_to_id.get(s).copied().ok_or_else(|| {
            Error::corrupt(format!("string cache: string '{s}' not interned"))
        })
    }

    /// Look up a string by id.
    pub fn get(&self, id: i64) -> Result<&str> {
        self.id_to_string
            .get(id as usize)
            .map(String::as_str)
            .ok_or_else(|| Error::corrupt(format!("string cache: invalid string id {id}")))
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.string_to_id.len()
    }

    /// True when nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.string_to_id.is_empty()
    }

    /// Serialize the table: `Count {Length bytes Id}*`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_i64::<LittleEndian>(self.string_to_id.len() as i64)?;
        // Walk by id so output is deterministic.
        for (id, s) in self.id_to_string.iter().enumerate() {
            w.write_i64::<LittleEndian>(s.len() as i64)?;
            w.write_all(s.as_bytes())?;
            w.write_i64::<LittleEndian>(id as i64)?;
        }
        Ok(())
    }

    /// Deserialize a table written by [`Self::write_to`].
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let count = r.read_i64::<LittleEndian>()?;
        if count < 0 {
            return Err(Error::corrupt(format!("string cache: negative count {count}")));
        }
        let mut cache = Self::new();
        for _ in 0..count {
            let len = r.read_i64::<LittleEndian>()?;
            if len < 0 {
                return Err(Error::corrupt(format!("string cache: negative length {len}")));
            }
            let mut bytes = vec![0u8; len as usize];
            r.read_exact(&mut bytes)?;
            let s = String::from_utf8(bytes)?;
            let id = r.read_i64::<LittleEndian>()?;
            if id < 0 {
                return Err(Error::corrupt(format!("string cache: negative id {id}")));
            }
            if id as usize >= cache.id_to_string.len() {
                cache.id_to_string.resize(id as usize + 1, String::new());
            }
            cache.id_to_string[id as usize] = s.clone();
            cache.string_to_id.insert(s, id);
            cache.next_id = cache.next_id.max(id + 1);
        }
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_dedup() {
        let mut c = StringCache::new();
        let a = c.intern("bound");
        let b = c.intern("transform");
        assert_ne!(a, b);
        for _ in 0..1000 {
            assert_eq!(c.intern("bound"), a);
        }
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_find_and_get() {
        let mut c = StringCache::new();
        let id = c.intern("object");
        assert_eq!(c.find("object").unwrap(), id);
        assert_eq!(c.get(id).unwrap(), "object");
        assert!(c.find("missing").is_err());
        assert!(c.get(99).is_err());
    }

    #[test]
    fn test_roundtrip() {
        let mut c = StringCache::new();
        for name in ["a", "b", "children", "bound", "a"] {
            c.intern(name);
        }
        let mut buf = Vec::new();
        c.write_to(&mut buf).unwrap();
        let back = StringCache::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(back.len(), 4);
        for name in ["a", "b", "children", "bound"] {
            assert_eq!(back.find(name).unwrap(), c.find(name).unwrap());
        }
        // New ids keep growing past the loaded ones.
        let mut back = back;
        let id = back.intern("fresh");
        assert_eq!(id, 4);
    }
}
