//! One open catalog session: the object graph, its mode state machine, and
//! the backend it reconciles with.
//!
//! Sessions move through `Creating/opening -> (Data <-> Define) -> Closing ->
//! Closed`. Every schema edit requires define mode and validates before it
//! mutates, so a rejected call leaves the graph exactly as it was. Leaving
//! define mode commits dirty entities to the backend in dependency order.

mod commit;
mod data;
mod define;
mod find;
mod remove;
mod rename;
mod storage;
mod summary;
mod typedefs;

use crate::config::{Config, OpenMode};
use crate::consts::{NCPROPS_ATT, NCPROPS_VERSION};
use crate::errors::{CatalogError, EntityKey, ModeViolation, Result};
use crate::io::{open_backend, CatalogIO, MemoryIO};
use crate::memio::MemImage;
use crate::model::{AttContainer, Attribute, BackendHandle, ChunkCache, Graph};
use crate::options::{CloseAction, FillMode, RangeMode};
use crate::schema::from_image;
use crate::types::AtomicType;
use crate::values::NcValues;
use chrono::SecondsFormat;
use log::{debug, info};
use std::path::{Path, PathBuf};

pub use data::PutOutcome;
pub use summary::CatalogSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Creating,
    Define,
    Data,
    Closing,
    Closed,
}

/// File-level mode and dirtiness flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeFlags {
    /// Session was created, not opened, and has never been committed.
    pub creating: bool,
    pub indef: bool,
    /// Record count of an unlimited dimension changed since the last flush.
    pub ndirty: bool,
    /// Schema changed since the last commit.
    pub hdirty: bool,
}

/// An entity removed in define mode that the backend still has to drop.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingDelete {
    pub key: EntityKey,
    pub handle: Option<BackendHandle>,
}

pub struct NcFile {
    pub(crate) path: Option<PathBuf>,
    pub(crate) mode: OpenMode,
    pub(crate) state: SessionState,
    pub(crate) cmode: ModeFlags,
    /// Define mode was entered from data mode rather than by creation.
    pub(crate) redef: bool,
    pub(crate) fill_mode: FillMode,
    pub(crate) range_mode: RangeMode,
    pub(crate) default_chunk_cache: ChunkCache,
    pub(crate) graph: Graph,
    pub(crate) io: Box<dyn CatalogIO>,
    /// Graph as it was when `redef` was called; restored by `abort`.
    pub(crate) snapshot: Option<Graph>,
    pub(crate) pending_deletes: Vec<PendingDelete>,
}

fn provenance_att() -> Attribute {
    let value = format!(
        "version={},ncmeta={},created={}",
        NCPROPS_VERSION,
        env!("CARGO_PKG_VERSION"),
        chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    let mut att = Attribute::new(
        NCPROPS_ATT.to_string(),
        AttContainer::Group(0),
        AtomicType::Char.id(),
        value.len(),
        NcValues::text(&value),
    );
    att.hdr.id = 0;
    att
}

impl NcFile {
    /// Creates a new catalog with the backend `config` selects.
    pub fn create(config: Config) -> Result<Self> {
        let io = open_backend(&config, true)?;
        Self::create_with(config, io)
    }

    /// Creates a new catalog on an already opened backend.
    pub fn create_with(config: Config, io: Box<dyn CatalogIO>) -> Result<Self> {
        if config.read_only || io.is_read_only() {
            return Err(CatalogError::ReadOnly);
        }
        let mut graph = Graph::new();
        graph.provenance = Some(provenance_att());
        info!("Created catalog on {} backend", io.io_type());
        Ok(NcFile {
            path: config.path.clone(),
            mode: config.open_mode(),
            state: SessionState::Define,
            cmode: ModeFlags {
                creating: true,
                indef: true,
                ndirty: false,
                hdirty: true,
            },
            redef: false,
            fill_mode: config.fill_mode,
            range_mode: config.range_mode,
            default_chunk_cache: config.chunk_cache,
            graph,
            io,
            snapshot: None,
            pending_deletes: Vec::new(),
        })
    }

    /// Opens an existing catalog with the backend `config` selects.
    pub fn open(config: Config) -> Result<Self> {
        let io = open_backend(&config, false)?;
        Self::open_with(config, io)
    }

    /// Opens an existing catalog, building the graph from the backend schema.
    pub fn open_with(config: Config, mut io: Box<dyn CatalogIO>) -> Result<Self> {
        let schema = io.read_schema()?.ok_or_else(|| {
            CatalogError::NotFound(format!(
                "no catalog in {}",
                io.location()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| io.io_type())
            ))
        })?;
        let graph = from_image(&schema)?;
        let mut mode = config.open_mode();
        mode.read_only |= io.is_read_only();
        info!(
            "Opened catalog on {} backend ({} groups, {} variables)",
            io.io_type(),
            graph.live_groups().count(),
            graph.live_groups().map(|g| g.vars.len()).sum::<usize>()
        );
        Ok(NcFile {
            path: config.path.clone(),
            mode,
            state: SessionState::Data,
            cmode: ModeFlags::default(),
            redef: false,
            fill_mode: config.fill_mode,
            range_mode: config.range_mode,
            default_chunk_cache: config.chunk_cache,
            graph,
            io,
            snapshot: None,
            pending_deletes: Vec::new(),
        })
    }

    /// Creates a catalog whose image lives in `memory`.
    pub fn create_memio(memory: MemImage) -> Result<Self> {
        let config = Config::memory();
        let io = MemoryIO::new(memory, config.image, false);
        Self::create_with(config, Box::new(io))
    }

    /// Opens the catalog image held in `memory`.
    pub fn open_memio(memory: MemImage, read_only: bool) -> Result<Self> {
        let config = Config {
            read_only,
            ..Config::memory()
        };
        let io = MemoryIO::new(memory, config.image, read_only);
        Self::open_with(config, Box::new(io))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn flags(&self) -> ModeFlags {
        self.cmode
    }

    pub fn is_define_mode(&self) -> bool {
        self.state == SessionState::Define
    }

    pub fn io_type(&self) -> String {
        self.io.io_type()
    }

    pub fn range_mode(&self) -> RangeMode {
        self.range_mode
    }

    pub fn set_range_mode(&mut self, mode: RangeMode) {
        self.range_mode = mode;
    }

    pub fn fill_mode(&self) -> FillMode {
        self.fill_mode
    }

    /// The whole object graph. Cloning it gives a comparable snapshot.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn root(&self) -> usize {
        0
    }

    /// The `_NCProperties` provenance attribute, if the catalog has one.
    pub fn provenance(&self) -> Option<&Attribute> {
        self.graph.provenance.as_ref()
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        match self.state {
            SessionState::Closing | SessionState::Closed => {
                Err(CatalogError::WrongMode(ModeViolation::Closed))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.mode.read_only {
            return Err(CatalogError::ReadOnly);
        }
        Ok(())
    }

    /// Gate for every schema edit.
    pub(crate) fn check_define(&self) -> Result<()> {
        self.check_writable()?;
        if self.state != SessionState::Define {
            return Err(CatalogError::WrongMode(ModeViolation::NotInDefine));
        }
        Ok(())
    }

    pub(crate) fn touch(&mut self) {
        self.cmode.hdirty = true;
    }

    /// Enters define mode from data mode.
    pub fn redef(&mut self) -> Result<()> {
        self.check_writable()?;
        if self.state == SessionState::Define {
            return Err(CatalogError::WrongMode(ModeViolation::InDefine));
        }
        self.snapshot = Some(self.graph.clone());
        self.state = SessionState::Define;
        self.cmode.indef = true;
        self.redef = true;
        debug!("Entered define mode");
        Ok(())
    }

    /// Commits define-mode changes and returns to data mode. On failure the
    /// session stays in define mode with the failed entities still dirty.
    pub fn enddef(&mut self) -> Result<()> {
        self.check_writable()?;
        if self.state != SessionState::Define {
            return Err(CatalogError::WrongMode(ModeViolation::NotInDefine));
        }
        self.commit()?;
        self.state = SessionState::Data;
        self.cmode.indef = false;
        self.cmode.creating = false;
        self.redef = false;
        self.snapshot = None;
        debug!("Left define mode");
        Ok(())
    }

    /// Pushes written variable data and record counts to the backend.
    pub fn sync(&mut self) -> Result<()> {
        self.check_open()?;
        if self.state == SessionState::Define {
            return Err(CatalogError::WrongMode(ModeViolation::InDefine));
        }
        if self.mode.read_only {
            return Ok(());
        }
        if self.needs_flush() {
            self.commit()?;
        }
        Ok(())
    }

    fn needs_flush(&self) -> bool {
        self.cmode.hdirty
            || self.cmode.ndirty
            || self
                .graph
                .live_groups()
                .any(|g| g.vars.iter().any(|v| v.flags.data_dirty))
    }

    /// Closes the session, flushing pending data. Uncommitted define-mode
    /// changes are an error; use [`NcFile::abort`] to drop them.
    ///
    /// In-memory sessions return the final image bytes.
    pub fn close(&mut self) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        if self.state == SessionState::Define && self.cmode.hdirty {
            return Err(CatalogError::WrongMode(ModeViolation::Uncommitted));
        }
        if !self.mode.read_only && self.state == SessionState::Data && self.needs_flush() {
            self.commit()?;
        }
        self.state = SessionState::Closing;
        let out = self.io.close(CloseAction::Persist);
        self.state = SessionState::Closed;
        info!("Closed catalog on {} backend", self.io.io_type());
        Ok(out?)
    }

    /// Drops every uncommitted change and closes without touching storage.
    pub fn abort(&mut self) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        if let Some(snapshot) = self.snapshot.take() {
            self.graph = snapshot;
        }
        self.pending_deletes.clear();
        self.state = SessionState::Closing;
        let out = self.io.close(CloseAction::Discard);
        self.state = SessionState::Closed;
        info!("Aborted catalog on {} backend", self.io.io_type());
        Ok(out?)
    }

    /// Closes an in-memory session and returns its image bytes.
    pub fn close_memio(&mut self) -> Result<Vec<u8>> {
        self.close()?
            .ok_or_else(|| CatalogError::Invalid("session is not in memory".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_starts_in_define_mode_with_provenance() {
        let f = NcFile::create(Config::memory()).unwrap();
        assert_eq!(f.state(), SessionState::Define);
        assert!(f.flags().creating && f.flags().hdirty);
        let prov = f.provenance().unwrap().data.as_text().unwrap();
        assert!(prov.starts_with("version=2,ncmeta="));
        assert!(prov.contains("created="));
    }

    #[test]
    fn mode_transitions() {
        let mut f = NcFile::create(Config::memory()).unwrap();
        assert!(matches!(
            f.redef(),
            Err(CatalogError::WrongMode(ModeViolation::InDefine))
        ));
        assert!(matches!(
            f.sync(),
            Err(CatalogError::WrongMode(ModeViolation::InDefine))
        ));
        f.enddef().unwrap();
        assert_eq!(f.state(), SessionState::Data);
        assert!(!f.flags().creating);
        assert!(matches!(
            f.enddef(),
            Err(CatalogError::WrongMode(ModeViolation::NotInDefine))
        ));
        f.redef().unwrap();
        assert!(f.is_define_mode());
        f.enddef().unwrap();
        f.sync().unwrap();
        f.close().unwrap();
        assert_eq!(f.state(), SessionState::Closed);
        assert!(matches!(
            f.redef(),
            Err(CatalogError::WrongMode(ModeViolation::Closed))
        ));
    }

    #[test]
    fn close_with_uncommitted_changes_fails() {
        let mut f = NcFile::create(Config::memory()).unwrap();
        assert!(matches!(
            f.close(),
            Err(CatalogError::WrongMode(ModeViolation::Uncommitted))
        ));
        // still usable afterwards
        f.enddef().unwrap();
        assert!(f.close_memio().unwrap().starts_with(b"NCIM"));
    }

    #[test]
    fn abort_restores_snapshot() {
        let mut f = NcFile::create(Config::memory()).unwrap();
        f.enddef().unwrap();
        f.redef().unwrap();
        let before = f.graph().clone();
        f.add_dimension(0, "x", Some(3)).unwrap();
        assert_ne!(f.graph(), &before);
        f.abort().unwrap();
        assert_eq!(f.graph(), &before);
        assert_eq!(f.state(), SessionState::Closed);
    }
}
