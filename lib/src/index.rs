//! Identity header shared by every entity, and the name+position index
//! that groups, variables and compound types use to hold their members.
//!
//! An [`NcIndex`] keeps items in insertion order (position-addressable) and
//! buckets positions by a CRC-32 of the name, so lookup by either is cheap.
//! Names are unique within one index.

use crate::errors::{CatalogError, Result};
use crate::names::normalize_name;
use serde::Serialize;
use std::collections::HashMap;

/// Discriminant carried by every entity header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sort {
    Group,
    Variable,
    Dimension,
    Attribute,
    Type,
    Field,
}

/// Hash used to bucket names.
pub fn hash_name(name: &str) -> u32 {
    ncimage::header::crc32_ieee(name.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjHeader {
    pub sort: Sort,
    pub name: String,
    pub id: usize,
    pub hashkey: u32,
}

impl ObjHeader {
    pub fn new(sort: Sort, name: impl Into<String>, id: usize) -> Self {
        let name = name.into();
        let hashkey = hash_name(&name);
        ObjHeader {
            sort,
            name,
            id,
            hashkey,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.hashkey = hash_name(&self.name);
    }
}

/// Anything that carries an [`ObjHeader`].
pub trait Entity {
    fn hdr(&self) -> &ObjHeader;
    fn hdr_mut(&mut self) -> &mut ObjHeader;

    fn name(&self) -> &str {
        &self.hdr().name
    }

    fn id(&self) -> usize {
        self.hdr().id
    }

    fn sort(&self) -> Sort {
        self.hdr().sort
    }
}

impl Entity for ObjHeader {
    fn hdr(&self) -> &ObjHeader {
        self
    }

    fn hdr_mut(&mut self) -> &mut ObjHeader {
        self
    }
}

/// Ordered container addressable by position and by name.
#[derive(Debug, Clone)]
pub struct NcIndex<T> {
    items: Vec<T>,
    buckets: HashMap<u32, Vec<usize>>,
}

impl<T> Default for NcIndex<T> {
    fn default() -> Self {
        NcIndex {
            items: Vec::new(),
            buckets: HashMap::new(),
        }
    }
}

// buckets are derived from the items
impl<T: PartialEq> PartialEq for NcIndex<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T: Entity> NcIndex<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, pos: usize) -> Option<&T> {
        self.items.get(pos)
    }

    pub fn get_mut(&mut self, pos: usize) -> Option<&mut T> {
        self.items.get_mut(pos)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.name()).collect()
    }

    /// Position of the item called `name`, compared in normalized form.
    pub fn position(&self, name: &str) -> Option<usize> {
        let name = normalize_name(name);
        let positions = self.buckets.get(&hash_name(&name))?;
        positions
            .iter()
            .copied()
            .find(|&p| self.items[p].name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<&T> {
        self.position(name).map(|p| &self.items[p])
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut T> {
        let pos = self.position(name)?;
        self.items.get_mut(pos)
    }

    /// Position of the item whose header id is `id`.
    pub fn find_id(&self, id: usize) -> Option<usize> {
        self.items.iter().position(|i| i.id() == id)
    }

    /// Appends `item`. Its id becomes its position unless `assigned` is given
    /// (used when the id was fixed elsewhere, e.g. by a backend).
    pub fn add(&mut self, mut item: T, assigned: Option<usize>) -> Result<usize> {
        if self.contains(item.name()) {
            return Err(CatalogError::DuplicateName(item.name().to_string()));
        }
        let pos = self.items.len();
        let id = assigned.unwrap_or(pos);
        let hdr = item.hdr_mut();
        hdr.id = id;
        hdr.hashkey = hash_name(&hdr.name);
        self.buckets.entry(hdr.hashkey).or_default().push(pos);
        self.items.push(item);
        Ok(id)
    }

    /// Removes the item at `pos`, shifting later items down by one.
    /// Ids are left alone; call [`NcIndex::renumber`] for position-keyed ids.
    pub fn remove(&mut self, pos: usize) -> Option<T> {
        if pos >= self.items.len() {
            return None;
        }
        let item = self.items.remove(pos);
        self.rebuild_buckets();
        Some(item)
    }

    /// Resets every id to the item's position.
    pub fn renumber(&mut self) {
        for (pos, item) in self.items.iter_mut().enumerate() {
            item.hdr_mut().id = pos;
        }
    }

    pub fn rename(&mut self, pos: usize, new_name: &str) -> Result<()> {
        if let Some(existing) = self.position(new_name) {
            if existing == pos {
                return Ok(());
            }
            return Err(CatalogError::DuplicateName(new_name.to_string()));
        }
        let item = self
            .items
            .get_mut(pos)
            .ok_or_else(|| CatalogError::NotFound(format!("index position {}", pos)))?;
        item.hdr_mut().set_name(new_name);
        self.rebuild_buckets();
        Ok(())
    }

    fn rebuild_buckets(&mut self) {
        self.buckets.clear();
        for (pos, item) in self.items.iter().enumerate() {
            self.buckets.entry(item.hdr().hashkey).or_default().push(pos);
        }
    }
}

impl<'a, T> IntoIterator for &'a NcIndex<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hdr(name: &str) -> ObjHeader {
        ObjHeader::new(Sort::Variable, name, 0)
    }

    #[test]
    fn add_assigns_positions_and_rejects_duplicates() {
        let mut idx = NcIndex::new();
        assert_eq!(idx.add(hdr("lat"), None).unwrap(), 0);
        assert_eq!(idx.add(hdr("lon"), None).unwrap(), 1);
        assert!(matches!(
            idx.add(hdr("lat"), None),
            Err(CatalogError::DuplicateName(_))
        ));
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.lookup("lon").unwrap().id, 1);
        assert_eq!(idx.position("lat"), Some(0));
        assert!(idx.lookup("LAT").is_none());
    }

    #[test]
    fn assigned_ids_are_kept() {
        let mut idx = NcIndex::new();
        idx.add(hdr("a"), Some(40)).unwrap();
        idx.add(hdr("b"), Some(7)).unwrap();
        assert_eq!(idx.find_id(7), Some(1));
        assert_eq!(idx.get(0).unwrap().id, 40);
    }

    #[test]
    fn remove_then_renumber_keeps_ids_dense() {
        let mut idx = NcIndex::new();
        for n in ["a", "b", "c", "d"] {
            idx.add(hdr(n), None).unwrap();
        }
        let gone = idx.remove(1).unwrap();
        assert_eq!(gone.name, "b");
        idx.renumber();
        let ids: Vec<usize> = idx.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(idx.position("d"), Some(2));
        assert!(idx.lookup("b").is_none());
        assert!(idx.remove(10).is_none());
    }

    #[test]
    fn rename_updates_lookup() {
        let mut idx = NcIndex::new();
        idx.add(hdr("time"), None).unwrap();
        idx.add(hdr("depth"), None).unwrap();
        assert!(matches!(
            idx.rename(0, "depth"),
            Err(CatalogError::DuplicateName(_))
        ));
        idx.rename(0, "t").unwrap();
        assert!(idx.lookup("time").is_none());
        assert_eq!(idx.lookup("t").unwrap().hashkey, hash_name("t"));
        // renaming to the current name is a no-op
        idx.rename(1, "depth").unwrap();
    }
}
