//! Integer handles for open sessions and their groups.
//!
//! A handle packs a file id into the high 16 bits and a group id into the low
//! 16 bits. The [`Registry`] owns every open session and turns handles back
//! into references; stale or out-of-range handles are reported as errors.

use crate::config::Config;
use crate::consts::MAX_GROUP_ID;
use crate::errors::{CatalogError, Result};
use crate::file::NcFile;
use crate::model::{DimId, Dimension, GroupId, VarId, Variable};
use crate::types::{TypeDesc, TypeId};
use log::debug;
use std::fmt;

pub const FILE_ID_MASK: u32 = 0xffff_0000;
pub const GRP_ID_MASK: u32 = 0x0000_ffff;
pub const ID_SHIFT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u32);

impl Handle {
    pub fn new(file: u32, group: u32) -> Self {
        Handle(((file << ID_SHIFT) & FILE_ID_MASK) | (group & GRP_ID_MASK))
    }

    pub fn file_id(self) -> u32 {
        (self.0 & FILE_ID_MASK) >> ID_SHIFT
    }

    pub fn group_id(self) -> GroupId {
        (self.0 & GRP_ID_MASK) as GroupId
    }

    /// Same file, root group.
    pub fn root(self) -> Self {
        Handle::new(self.file_id(), 0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Largest file id a handle can carry.
pub const MAX_FILE_ID: usize = (FILE_ID_MASK >> ID_SHIFT) as usize;

/// Open sessions, addressed by handle. File ids start at 1. Fresh ids are
/// handed out until the id space runs out; after that the lowest closed slot
/// is reused, so a stale handle stays invalid for as long as possible.
#[derive(Default)]
pub struct Registry {
    files: Vec<Option<NcFile>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.files.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn create(&mut self, config: Config) -> Result<Handle> {
        self.insert(NcFile::create(config)?)
    }

    pub fn open(&mut self, config: Config) -> Result<Handle> {
        self.insert(NcFile::open(config)?)
    }

    /// Takes ownership of a session and returns the handle of its root group.
    pub fn insert(&mut self, file: NcFile) -> Result<Handle> {
        let file_id = if self.files.len() < MAX_FILE_ID {
            self.files.push(Some(file));
            self.files.len()
        } else {
            let pos = self
                .files
                .iter()
                .position(Option::is_none)
                .ok_or_else(|| CatalogError::Invalid("too many open sessions".into()))?;
            self.files[pos] = Some(file);
            pos + 1
        };
        let handle = Handle::new(file_id as u32, 0);
        debug!("Registered session {}", handle);
        Ok(handle)
    }

    fn slot(&self, handle: Handle) -> Result<&NcFile> {
        (handle.file_id() as usize)
            .checked_sub(1)
            .and_then(|i| self.files.get(i))
            .and_then(Option::as_ref)
            .ok_or(CatalogError::BadHandle(handle.0))
    }

    fn slot_mut(&mut self, handle: Handle) -> Result<&mut NcFile> {
        (handle.file_id() as usize)
            .checked_sub(1)
            .and_then(|i| self.files.get_mut(i))
            .and_then(Option::as_mut)
            .ok_or(CatalogError::BadHandle(handle.0))
    }

    /// Handle for group `gid` of the session `handle` belongs to.
    pub fn group_handle(&self, handle: Handle, gid: GroupId) -> Result<Handle> {
        if gid > MAX_GROUP_ID {
            return Err(CatalogError::BadGroupId(gid));
        }
        self.slot(handle)?.find_group(gid)?;
        Ok(Handle::new(handle.file_id(), gid as u32))
    }

    pub fn resolve(&self, handle: Handle) -> Result<(&NcFile, GroupId)> {
        let file = self.slot(handle)?;
        let gid = handle.group_id();
        file.find_group(gid)?;
        Ok((file, gid))
    }

    pub fn resolve_mut(&mut self, handle: Handle) -> Result<(&mut NcFile, GroupId)> {
        let gid = handle.group_id();
        let file = self.slot_mut(handle)?;
        file.find_group(gid)?;
        Ok((file, gid))
    }

    /// A dimension visible from the handle's group.
    pub fn resolve_dim(&self, handle: Handle, dimid: DimId) -> Result<&Dimension> {
        let (file, gid) = self.resolve(handle)?;
        Ok(file.find_dim(gid, dimid)?.0)
    }

    /// A variable of the handle's group.
    pub fn resolve_var(&self, handle: Handle, varid: VarId) -> Result<&Variable> {
        let (file, gid) = self.resolve(handle)?;
        file.var(gid, varid)
    }

    pub fn resolve_type(&self, handle: Handle, type_id: TypeId) -> Result<TypeDesc<'_>> {
        let (file, _) = self.resolve(handle)?;
        file.resolve_type(type_id)
    }

    /// Closes a session. It stays registered if closing fails.
    pub fn close(&mut self, handle: Handle) -> Result<Option<Vec<u8>>> {
        let out = self.slot_mut(handle)?.close()?;
        self.release_slot(handle);
        Ok(out)
    }

    pub fn abort(&mut self, handle: Handle) -> Result<Option<Vec<u8>>> {
        let out = self.slot_mut(handle)?.abort()?;
        self.release_slot(handle);
        Ok(out)
    }

    fn release_slot(&mut self, handle: Handle) {
        if let Some(slot) = (handle.file_id() as usize)
            .checked_sub(1)
            .and_then(|i| self.files.get_mut(i))
        {
            *slot = None;
        }
        debug!("Released session {}", handle.root());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AtomicType;

    #[test]
    fn handles_pack_file_and_group() {
        let h = Handle::new(3, 7);
        assert_eq!(h.0, 0x0003_0007);
        assert_eq!(h.file_id(), 3);
        assert_eq!(h.group_id(), 7);
        assert_eq!(h.root(), Handle(0x0003_0000));
        assert_eq!(Handle::new(1, 0x1_0002).group_id(), 2);
    }

    #[test]
    fn resolution_and_stale_handles() {
        let mut reg = Registry::new();
        let h = reg.create(Config::memory()).unwrap();
        assert_eq!(h.file_id(), 1);
        let (file, _) = reg.resolve_mut(h).unwrap();
        let g = file.add_group(0, "g").unwrap();
        let x = file.add_dimension(0, "x", Some(2)).unwrap();
        let v = file.add_variable(g, "v", AtomicType::Int.id(), &[x]).unwrap();

        let gh = reg.group_handle(h, g).unwrap();
        assert_eq!(reg.resolve_dim(gh, x).unwrap().len, 2);
        assert_eq!(reg.resolve_var(gh, v).unwrap().hdr.name, "v");
        assert!(matches!(reg.resolve_var(h, v), Err(CatalogError::BadVar(_))));
        assert_eq!(reg.resolve_type(gh, 4).unwrap().name(), "int");
        assert!(reg.resolve_type(gh, 40).unwrap_err().is_not_found());
        assert!(matches!(
            reg.resolve(Handle::new(1, 9)),
            Err(CatalogError::BadGroupId(9))
        ));
        assert!(matches!(
            reg.resolve(Handle::new(0, 0)),
            Err(CatalogError::BadHandle(_))
        ));
        assert!(reg.resolve(Handle::new(5, 0)).is_err());

        reg.abort(h).unwrap();
        assert!(reg.is_empty());
        assert!(matches!(reg.resolve(h), Err(CatalogError::BadHandle(_))));
        let again = reg.create(Config::memory()).unwrap();
        assert_eq!(again.file_id(), 2);
    }

    #[test]
    fn closed_slots_are_reused_once_ids_run_out() {
        let mut reg = Registry::new();
        reg.files = (0..MAX_FILE_ID).map(|_| None).collect();
        let h = reg.create(Config::memory()).unwrap();
        assert_eq!(h.file_id(), 1);
        let next = reg.create(Config::memory()).unwrap();
        assert_eq!(next.file_id(), 2);
        reg.abort(h).unwrap();
        assert_eq!(reg.create(Config::memory()).unwrap().file_id(), 1);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.files.len(), MAX_FILE_ID);
    }

    #[test]
    fn failed_close_keeps_the_session() {
        let mut reg = Registry::new();
        let h = reg.create(Config::memory()).unwrap();
        assert!(reg.close(h).is_err());
        assert_eq!(reg.len(), 1);
        reg.resolve_mut(h).unwrap().0.enddef().unwrap();
        assert!(reg.close(h).unwrap().is_some());
        assert_eq!(reg.len(), 0);
    }
}
