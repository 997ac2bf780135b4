//! Plain record types stored in an image.
//!
//! Records carry catalog ids exactly as the catalog assigned them; the image
//! never renumbers anything. Type ids below 32 name the fixed atomic types.

/// One group. The root group has no parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRec {
    pub id: u32,
    pub parent: Option<u32>,
    pub name: String,
}

/// One dimension. `len` is the current length (record count when unlimited).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimRec {
    pub id: u32,
    pub group: u32,
    pub name: String,
    pub len: u64,
    pub unlimited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRec {
    pub name: String,
    pub type_id: u32,
    pub offset: u64,
    pub dims: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRec {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeClassRec {
    Compound { fields: Vec<FieldRec> },
    Enum { base: u32, members: Vec<MemberRec> },
    Vlen { base: u32 },
    Opaque,
}

impl TypeClassRec {
    pub(crate) fn tag(&self) -> u8 {
        match self {
            TypeClassRec::Compound { .. } => 1,
            TypeClassRec::Enum { .. } => 2,
            TypeClassRec::Vlen { .. } => 3,
            TypeClassRec::Opaque => 4,
        }
    }
}

/// One user-defined type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRec {
    pub id: u32,
    pub group: u32,
    pub name: String,
    pub size: u64,
    pub endianness: u8,
    pub class: TypeClassRec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRec {
    pub id: u32,
    pub params: Vec<u32>,
}

/// Storage layout and filter chain of a variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageRec {
    pub contiguous: bool,
    pub chunksizes: Vec<u64>,
    pub deflate_level: Option<u32>,
    pub shuffle: bool,
    pub fletcher32: bool,
    pub filters: Vec<FilterRec>,
    pub endianness: u8,
}

/// Typed value bytes.
///
/// `Fixed` holds little-endian element bytes for fixed-size types, `Strings`
/// holds string elements, and `Vlen` holds one byte run per element in the
/// base type's fixed-size encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Fixed(Vec<u8>),
    Strings(Vec<String>),
    Vlen(Vec<Vec<u8>>),
}

impl Payload {
    pub(crate) fn tag(&self) -> u8 {
        match self {
            Payload::Fixed(_) => 1,
            Payload::Strings(_) => 2,
            Payload::Vlen(_) => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarRec {
    pub group: u32,
    pub id: u32,
    pub name: String,
    pub type_id: u32,
    pub dimids: Vec<u32>,
    pub storage: StorageRec,
    pub no_fill: bool,
    pub fill: Option<Payload>,
}

/// One attribute; `var` is `None` for group attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttRec {
    pub group: u32,
    pub var: Option<u32>,
    pub id: u32,
    pub name: String,
    pub type_id: u32,
    pub len: u64,
    pub value: Payload,
}

/// Raw data written to a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDataRec {
    pub group: u32,
    pub var: u32,
    pub bytes: Vec<u8>,
}

/// Lengths of the id arenas, counting freed slots. Ids below these were
/// handed out at some point and must not be handed out again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaExtents {
    pub groups: u32,
    pub dims: u32,
    pub types: u32,
}

/// Complete image contents, in the order sections are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    pub groups: Vec<GroupRec>,
    pub dims: Vec<DimRec>,
    pub types: Vec<TypeRec>,
    pub vars: Vec<VarRec>,
    pub atts: Vec<AttRec>,
    pub data: Vec<VarDataRec>,
    pub extents: Option<ArenaExtents>,
}

impl Image {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Attributes attached to `group` (and to `var`, when given), in id order.
    pub fn atts_of(&self, group: u32, var: Option<u32>) -> Vec<&AttRec> {
        let mut out: Vec<&AttRec> = self
            .atts
            .iter()
            .filter(|a| a.group == group && a.var == var)
            .collect();
        out.sort_by_key(|a| a.id);
        out
    }

    pub fn data_of(&self, group: u32, var: u32) -> Option<&[u8]> {
        self.data
            .iter()
            .find(|d| d.group == group && d.var == var)
            .map(|d| d.bytes.as_slice())
    }
}
