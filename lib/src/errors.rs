//! Error types for the catalog.
//!
//! Every fallible catalog operation returns [`CatalogError`]. Storage engines
//! report failures as `anyhow::Error`; those are wrapped in
//! [`CatalogError::Backend`] unless they already carry a catalog error.

use crate::model::{AttContainer, DimId, GroupId, VarId};
use crate::types::TypeId;
use std::fmt;

/// Identifies one catalog entity for commit ordering and failure reporting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Group(GroupId),
    Dim(DimId),
    Type(TypeId),
    Var { group: GroupId, var: VarId },
    Att { container: AttContainer, name: String },
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EntityKey::Group(g) => write!(f, "group {}", g),
            EntityKey::Dim(d) => write!(f, "dimension {}", d),
            EntityKey::Type(t) => write!(f, "type {}", t),
            EntityKey::Var { group, var } => write!(f, "variable {}/{}", group, var),
            EntityKey::Att {
                container: AttContainer::Group(g),
                name,
            } => write!(f, "attribute {}:{}", g, name),
            EntityKey::Att {
                container: AttContainer::Variable(g, v),
                name,
            } => write!(f, "attribute {}/{}:{}", g, v, name),
        }
    }
}

/// Outcome of a commit that did not fully succeed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Entities pushed to the backend and now clean.
    pub committed: usize,
    /// Entities that failed, with the backend's message. These stay dirty.
    pub failed: Vec<(EntityKey, String)>,
}

impl CommitReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.failed.iter().map(|(k, _)| k)
    }
}

/// Why a mode check rejected an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeViolation {
    /// Schema change attempted outside define mode.
    NotInDefine,
    /// Operation not allowed while in define mode.
    InDefine,
    /// Define-mode changes are still uncommitted.
    Uncommitted,
    /// The session is closing or closed.
    Closed,
}

impl fmt::Display for ModeViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ModeViolation::NotInDefine => "operation requires define mode",
            ModeViolation::InDefine => "operation not allowed in define mode",
            ModeViolation::Uncommitted => "uncommitted define-mode changes; commit or abort first",
            ModeViolation::Closed => "session is closed",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("bad handle {0:#010x}")]
    BadHandle(u32),
    #[error("no group with id {0}")]
    BadGroupId(GroupId),
    #[error("no dimension with id {0}")]
    BadDim(DimId),
    #[error("no variable with id {0}")]
    BadVar(VarId),
    #[error("no type with id {0}")]
    BadType(TypeId),
    #[error("attribute not found: {0}")]
    AttNotFound(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("name already in use: {0}")]
    DuplicateName(String),
    #[error("{0}")]
    WrongMode(ModeViolation),
    #[error("session is read-only")]
    ReadOnly,
    #[error("numeric conversion out of range")]
    Range,
    #[error("type {0} is still in use")]
    TypeInUse(TypeId),
    #[error("type {0} is already committed and cannot be edited")]
    TypeDefined(TypeId),
    #[error("dimension {0} is still referenced by a variable")]
    InUse(DimId),
    #[error("invalid name {name:?}: {reason}")]
    BadName { name: String, reason: &'static str },
    #[error("cannot convert between char and numeric types")]
    CharConversion,
    #[error("type {0} has no fixed size")]
    VariableSize(TypeId),
    #[error("variable storage can no longer be changed once committed")]
    LateDefinition,
    #[error("in-memory image is locked and cannot grow")]
    ImageLocked,
    #[error("invalid argument: {0}")]
    Invalid(String),
    #[error("commit failed for {} of {} entities", .0.failed.len(), .0.failed.len() + .0.committed)]
    Commit(CommitReport),
    #[error(transparent)]
    Backend(anyhow::Error),
}

impl CatalogError {
    /// True for the "no such object" family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CatalogError::BadHandle(_)
                | CatalogError::BadGroupId(_)
                | CatalogError::BadDim(_)
                | CatalogError::BadVar(_)
                | CatalogError::BadType(_)
                | CatalogError::AttNotFound(_)
                | CatalogError::NotFound(_)
        )
    }

    pub(crate) fn bad_name(name: &str, reason: &'static str) -> Self {
        CatalogError::BadName {
            name: name.to_string(),
            reason,
        }
    }
}

impl From<anyhow::Error> for CatalogError {
    fn from(err: anyhow::Error) -> Self {
        // catalog errors raised inside a backend come back unwrapped
        match err.downcast::<CatalogError>() {
            Ok(inner) => inner,
            Err(err) => CatalogError::Backend(err),
        }
    }
}

impl From<ncimage::ImageError> for CatalogError {
    fn from(err: ncimage::ImageError) -> Self {
        CatalogError::Backend(anyhow::Error::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
