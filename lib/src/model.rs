//! Catalog entities and the per-file arenas that own them.
//!
//! Groups, dimensions and user types live in flat vectors indexed directly by
//! id. Deleting one leaves a `None` in its slot, so ids stay stable and are
//! never reused. Variables and attributes live in their container's
//! [`NcIndex`], where position equals id and deletion compacts.

use crate::consts::*;
use crate::index::{Entity, NcIndex, ObjHeader, Sort};
use crate::types::{Endianness, TypeId, TypeInfo};
use crate::values::NcValues;
use serde::{Deserialize, Serialize};

pub type GroupId = usize;
pub type DimId = usize;
pub type VarId = usize;
pub type AttId = usize;

/// Opaque handle a backend hands back for a created entity.
pub type BackendHandle = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub hdr: ObjHeader,
    pub container: GroupId,
    /// Current length; the record count for unlimited dimensions.
    pub len: usize,
    pub unlimited: bool,
    /// Record count grew since the last commit.
    pub extended: bool,
    /// Length does not fit a 32-bit size.
    pub too_long: bool,
    pub dirty: bool,
    pub created: bool,
    pub backend: Option<BackendHandle>,
}

impl Entity for Dimension {
    fn hdr(&self) -> &ObjHeader {
        &self.hdr
    }

    fn hdr_mut(&mut self) -> &mut ObjHeader {
        &mut self.hdr
    }
}

/// Owner of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttContainer {
    Group(GroupId),
    Variable(GroupId, VarId),
}

impl AttContainer {
    pub fn new(group: GroupId, var: Option<VarId>) -> Self {
        match var {
            Some(v) => AttContainer::Variable(group, v),
            None => AttContainer::Group(group),
        }
    }

    pub fn group(&self) -> GroupId {
        match self {
            AttContainer::Group(g) | AttContainer::Variable(g, _) => *g,
        }
    }

    pub fn var(&self) -> Option<VarId> {
        match self {
            AttContainer::Group(_) => None,
            AttContainer::Variable(_, v) => Some(*v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub hdr: ObjHeader,
    pub container: AttContainer,
    pub type_id: TypeId,
    /// Number of elements of `type_id`.
    pub len: usize,
    pub data: NcValues,
    pub dirty: bool,
    pub created: bool,
    pub backend: Option<BackendHandle>,
}

impl Entity for Attribute {
    fn hdr(&self) -> &ObjHeader {
        &self.hdr
    }

    fn hdr_mut(&mut self) -> &mut ObjHeader {
        &mut self.hdr
    }
}

impl Attribute {
    pub(crate) fn new(
        name: String,
        container: AttContainer,
        type_id: TypeId,
        len: usize,
        data: NcValues,
    ) -> Self {
        Attribute {
            hdr: ObjHeader::new(Sort::Attribute, name, 0),
            container,
            type_id,
            len,
            data,
            dirty: true,
            created: false,
            backend: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarFlags {
    /// Defined in this define-mode session.
    pub is_new: bool,
    /// Exists in the backend.
    pub created: bool,
    /// Metadata changed since the last commit.
    pub dirty: bool,
    pub written_to: bool,
    /// Held data changed since it was last pushed to the backend.
    pub data_dirty: bool,
    pub was_coord_var: bool,
    pub became_coord_var: bool,
    pub fill_val_changed: bool,
    pub attr_dirty: bool,
    pub meta_read: bool,
    pub atts_read: bool,
    pub coords_read: bool,
    /// Variable is a dimension's coordinate variable.
    pub dimscale: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkCache {
    pub size: usize,
    pub nelems: usize,
    pub preemption: f32,
}

impl Default for ChunkCache {
    fn default() -> Self {
        ChunkCache {
            size: DEFAULT_CHUNK_CACHE_SIZE,
            nelems: DEFAULT_CHUNK_CACHE_NELEMS,
            preemption: DEFAULT_CHUNK_CACHE_PREEMPTION,
        }
    }
}

/// One stage of a variable's filter chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterSpec {
    pub id: u32,
    pub params: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageHints {
    pub contiguous: bool,
    /// Empty until set explicitly.
    pub chunksizes: Vec<usize>,
    /// Deflate level 0..=9.
    pub deflate: Option<u32>,
    pub shuffle: bool,
    pub fletcher32: bool,
    pub chunk_cache: ChunkCache,
    pub filters: Vec<FilterSpec>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillPolicy {
    pub no_fill: bool,
    /// Explicit fill value; the type's default applies when `None`.
    pub value: Option<NcValues>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelAccess {
    #[default]
    Independent,
    Collective,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub hdr: ObjHeader,
    pub container: GroupId,
    pub dimids: Vec<DimId>,
    pub type_id: TypeId,
    pub atts: NcIndex<Attribute>,
    pub flags: VarFlags,
    pub storage: StorageHints,
    pub fill: FillPolicy,
    pub parallel_access: ParallelAccess,
    pub endianness: Endianness,
    /// Little-endian element bytes written so far.
    pub data: Vec<u8>,
    pub backend: Option<BackendHandle>,
}

impl Entity for Variable {
    fn hdr(&self) -> &ObjHeader {
        &self.hdr
    }

    fn hdr_mut(&mut self) -> &mut ObjHeader {
        &mut self.hdr
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub hdr: ObjHeader,
    pub parent: Option<GroupId>,
    /// Headers of child groups; ids are group ids.
    pub children: NcIndex<ObjHeader>,
    /// Headers of dimensions defined here; ids are dimension ids.
    pub dims: NcIndex<ObjHeader>,
    /// Headers of user types defined here; ids are type ids.
    pub types: NcIndex<ObjHeader>,
    pub atts: NcIndex<Attribute>,
    pub vars: NcIndex<Variable>,
    pub dirty: bool,
    pub created: bool,
    pub atts_read: bool,
    pub backend: Option<BackendHandle>,
}

impl Entity for Group {
    fn hdr(&self) -> &ObjHeader {
        &self.hdr
    }

    fn hdr_mut(&mut self) -> &mut ObjHeader {
        &mut self.hdr
    }
}

impl Group {
    pub(crate) fn new(name: String, id: GroupId, parent: Option<GroupId>) -> Self {
        Group {
            hdr: ObjHeader::new(Sort::Group, name, id),
            parent,
            children: NcIndex::new(),
            dims: NcIndex::new(),
            types: NcIndex::new(),
            atts: NcIndex::new(),
            vars: NcIndex::new(),
            dirty: true,
            created: false,
            atts_read: true,
            backend: None,
        }
    }
}

/// Everything a session knows about its object graph.
///
/// Cloning a `Graph` gives a complete snapshot; two graphs compare equal when
/// every entity, flag and counter matches.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    pub groups: Vec<Option<Group>>,
    pub dims: Vec<Option<Dimension>>,
    /// Indexed by type id; atomic and reserved slots are always `None`.
    pub types: Vec<Option<TypeInfo>>,
    /// `_NCProperties` of the root group.
    pub provenance: Option<Attribute>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// A graph holding only the root group.
    pub fn new() -> Self {
        Graph {
            groups: vec![Some(Group::new(ROOT_GROUP_NAME.to_string(), 0, None))],
            dims: Vec::new(),
            types: vec![None; FIRST_USER_TYPE_ID],
            provenance: None,
        }
    }

    pub(crate) fn empty() -> Self {
        Graph {
            groups: Vec::new(),
            dims: Vec::new(),
            types: vec![None; FIRST_USER_TYPE_ID],
            provenance: None,
        }
    }

    pub fn next_grpid(&self) -> GroupId {
        self.groups.len()
    }

    pub fn next_dimid(&self) -> DimId {
        self.dims.len()
    }

    pub fn next_typeid(&self) -> TypeId {
        self.types.len()
    }

    pub fn group(&self, gid: GroupId) -> Option<&Group> {
        self.groups.get(gid).and_then(|g| g.as_ref())
    }

    pub fn group_mut(&mut self, gid: GroupId) -> Option<&mut Group> {
        self.groups.get_mut(gid).and_then(|g| g.as_mut())
    }

    pub fn dim(&self, dimid: DimId) -> Option<&Dimension> {
        self.dims.get(dimid).and_then(|d| d.as_ref())
    }

    pub fn dim_mut(&mut self, dimid: DimId) -> Option<&mut Dimension> {
        self.dims.get_mut(dimid).and_then(|d| d.as_mut())
    }

    pub fn type_info(&self, id: TypeId) -> Option<&TypeInfo> {
        self.types.get(id).and_then(|t| t.as_ref())
    }

    pub fn type_info_mut(&mut self, id: TypeId) -> Option<&mut TypeInfo> {
        self.types.get_mut(id).and_then(|t| t.as_mut())
    }

    pub fn live_groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter().flatten()
    }

    pub fn live_dims(&self) -> impl Iterator<Item = &Dimension> {
        self.dims.iter().flatten()
    }

    pub fn live_types(&self) -> impl Iterator<Item = &TypeInfo> {
        self.types.iter().flatten()
    }

    /// True if `gid` is `ancestor` or lies below it.
    pub fn is_within(&self, gid: GroupId, ancestor: GroupId) -> bool {
        let mut cur = Some(gid);
        while let Some(g) = cur {
            if g == ancestor {
                return true;
            }
            cur = self.group(g).and_then(|grp| grp.parent);
        }
        false
    }

    /// `gid` followed by its ancestors up to the root.
    pub fn ancestry(&self, gid: GroupId) -> Vec<GroupId> {
        let mut out = Vec::new();
        let mut cur = Some(gid);
        while let Some(g) = cur {
            out.push(g);
            cur = self.group(g).and_then(|grp| grp.parent);
        }
        out
    }

    /// `gid` and every group below it, parents before children.
    pub fn subtree(&self, gid: GroupId) -> Vec<GroupId> {
        let mut out = Vec::new();
        let mut stack = vec![gid];
        while let Some(g) = stack.pop() {
            if let Some(grp) = self.group(g) {
                out.push(g);
                stack.extend(grp.children.iter().rev().map(|c| c.id));
            }
        }
        out
    }

    /// Absolute path of a group, e.g. `/forecast/surface`.
    pub fn full_name(&self, gid: GroupId) -> String {
        let mut parts: Vec<&str> = self
            .ancestry(gid)
            .into_iter()
            .filter_map(|g| self.group(g))
            .filter(|g| g.parent.is_some())
            .map(|g| g.hdr.name.as_str())
            .collect();
        parts.reverse();
        format!("/{}", parts.join("/"))
    }

    /// Every (variable, attribute) type reference in the graph, with the
    /// group that holds it.
    pub(crate) fn type_refs(&self) -> Vec<(GroupId, TypeId)> {
        let mut out = Vec::new();
        for g in self.live_groups() {
            for a in &g.atts {
                out.push((g.hdr.id, a.type_id));
            }
            for v in &g.vars {
                out.push((g.hdr.id, v.type_id));
                for a in &v.atts {
                    out.push((g.hdr.id, a.type_id));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Graph {
        // / -> a -> b, / -> c
        let mut g = Graph::new();
        for (id, name, parent) in [(1, "a", 0), (2, "b", 1), (3, "c", 0)] {
            g.groups.push(Some(Group::new(name.to_string(), id, Some(parent))));
            g.group_mut(parent)
                .unwrap()
                .children
                .add(ObjHeader::new(Sort::Group, name, id), Some(id))
                .unwrap();
        }
        g
    }

    #[test]
    fn ancestry_and_subtree() {
        let g = tree();
        assert_eq!(g.ancestry(2), vec![2, 1, 0]);
        assert!(g.is_within(2, 1));
        assert!(!g.is_within(3, 1));
        assert_eq!(g.subtree(0), vec![0, 1, 2, 3]);
        assert_eq!(g.subtree(1), vec![1, 2]);
        assert_eq!(g.full_name(2), "/a/b");
        assert_eq!(g.full_name(0), "/");
    }

    #[test]
    fn arenas_start_with_root_and_reserved_type_slots() {
        let g = Graph::new();
        assert_eq!(g.next_grpid(), 1);
        assert_eq!(g.next_dimid(), 0);
        assert_eq!(g.next_typeid(), FIRST_USER_TYPE_ID);
        assert!(g.type_info(5).is_none());
        assert_eq!(g.group(0).unwrap().hdr.name, "/");
    }

    #[test]
    fn att_container_parts() {
        let c = AttContainer::new(2, Some(4));
        assert_eq!(c.group(), 2);
        assert_eq!(c.var(), Some(4));
        assert_eq!(AttContainer::new(1, None), AttContainer::Group(1));
    }
}
