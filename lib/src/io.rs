//! Storage backends behind a catalog session.
//!
//! The catalog talks to storage only through [`CatalogIO`]. Engines return
//! `anyhow::Result`; the session wraps failures as
//! [`CatalogError::Backend`](crate::errors::CatalogError::Backend) unless they
//! already carry a catalog error.

use crate::config::{Config, ImageOptions};
use crate::errors::{CatalogError, EntityKey};
use crate::index::Sort;
use crate::memio::MemImage;
use crate::model::{Attribute, BackendHandle, Dimension, Group, Variable};
use crate::options::CloseAction;
use crate::schema::SchemaFragment;
use crate::types::{AtomicType, TypeInfo};
use crate::values::NcValues;
use anyhow::{anyhow, Result};
use fs2::FileExt;
use log::{debug, info};
use ncimage::ImageFile;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// The entity a backend is asked to create.
#[derive(Debug, Clone, Copy)]
pub enum EntitySpec<'a> {
    Group(&'a Group),
    Dim(&'a Dimension),
    Type(&'a TypeInfo),
    Var(&'a Variable),
    Att(&'a Attribute),
}

impl EntitySpec<'_> {
    pub fn sort(&self) -> Sort {
        match self {
            EntitySpec::Group(_) => Sort::Group,
            EntitySpec::Dim(_) => Sort::Dimension,
            EntitySpec::Type(_) => Sort::Type,
            EntitySpec::Var(_) => Sort::Variable,
            EntitySpec::Att(_) => Sort::Attribute,
        }
    }

    pub fn key(&self) -> EntityKey {
        match self {
            EntitySpec::Group(g) => EntityKey::Group(g.hdr.id),
            EntitySpec::Dim(d) => EntityKey::Dim(d.hdr.id),
            EntitySpec::Type(t) => EntityKey::Type(t.hdr.id),
            EntitySpec::Var(v) => EntityKey::Var {
                group: v.container,
                var: v.hdr.id,
            },
            EntitySpec::Att(a) => EntityKey::Att {
                container: a.container,
                name: a.hdr.name.clone(),
            },
        }
    }
}

/// Storage engine contract.
pub trait CatalogIO: Send {
    /// Short engine name, e.g. `"file"`.
    fn io_type(&self) -> String;

    /// Where the engine keeps its bytes, if anywhere.
    fn location(&self) -> Option<&Path>;

    fn is_read_only(&self) -> bool;

    /// Whether variable data may be written before the schema is committed.
    fn allows_define_mode_writes(&self) -> bool {
        true
    }

    /// The persisted schema, or `None` for a fresh store.
    fn read_schema(&mut self) -> Result<Option<SchemaFragment>>;

    fn create_entity(&mut self, spec: &EntitySpec<'_>) -> Result<BackendHandle>;

    /// Removes an entity. `handle` is `None` for entities loaded by
    /// `read_schema` rather than created in this session.
    fn delete_entity(&mut self, key: &EntityKey, handle: Option<BackendHandle>) -> Result<()>;

    fn write_attribute_data(&mut self, key: &EntityKey, att: &Attribute) -> Result<()>;

    fn write_variable_data(&mut self, key: &EntityKey, bytes: &[u8]) -> Result<()>;

    /// Makes `schema` the persisted state.
    fn flush_header(&mut self, schema: &SchemaFragment) -> Result<()>;

    fn convert_to_bytes(&self, values: &NcValues) -> Result<Vec<u8>> {
        values
            .to_bytes()
            .ok_or_else(|| anyhow!("values have no fixed-size encoding"))
    }

    fn convert_from_bytes(&self, bytes: &[u8], t: AtomicType) -> Result<NcValues> {
        Ok(NcValues::from_bytes(bytes, t)?)
    }

    /// Releases the engine. In-memory engines hand back the image bytes.
    fn close(&mut self, action: CloseAction) -> Result<Option<Vec<u8>>>;
}

/// Backend handles issued by the image engines.
///
/// Image engines persist whole images: [`CatalogIO::flush_header`] encodes
/// the full schema, variable data included, and replaces the stored image.
/// Per-entity calls only manage handles and reject keys of the wrong sort.
#[derive(Debug, Default)]
struct Handles {
    next: BackendHandle,
    live: HashMap<BackendHandle, EntityKey>,
}

impl Handles {
    fn issue(&mut self, spec: &EntitySpec<'_>) -> BackendHandle {
        self.next += 1;
        self.live.insert(self.next, spec.key());
        debug!("Created {} as backend handle {}", spec.key(), self.next);
        self.next
    }

    fn retire(&mut self, key: &EntityKey, handle: Option<BackendHandle>) -> Result<()> {
        if let Some(h) = handle {
            let issued = self
                .live
                .remove(&h)
                .ok_or_else(|| anyhow!("unknown backend handle {} for {}", h, key))?;
            debug!("Retired handle {} (created as {})", h, issued);
        }
        debug!("Deleted {}", key);
        Ok(())
    }
}

fn check_att_key(key: &EntityKey) -> Result<()> {
    match key {
        EntityKey::Att { .. } => Ok(()),
        other => Err(anyhow!("{} cannot hold attribute data", other)),
    }
}

fn check_var_key(key: &EntityKey) -> Result<()> {
    match key {
        EntityKey::Var { .. } => Ok(()),
        other => Err(anyhow!("{} cannot hold variable data", other)),
    }
}

/// Engine over a [`MemImage`]; images are kept `ncimage` encoded.
pub struct MemoryIO {
    memory: MemImage,
    handles: Handles,
    options: ImageOptions,
    created_unix: u64,
    read_only: bool,
}

impl MemoryIO {
    pub fn new(memory: MemImage, options: ImageOptions, read_only: bool) -> Self {
        Self {
            memory,
            handles: Handles::default(),
            options,
            created_unix: chrono::Utc::now().timestamp().max(0) as u64,
            read_only,
        }
    }

    pub fn memory(&self) -> &MemImage {
        &self.memory
    }
}

impl CatalogIO for MemoryIO {
    fn io_type(&self) -> String {
        "memory".to_string()
    }

    fn location(&self) -> Option<&Path> {
        self.memory.persist_path()
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn read_schema(&mut self) -> Result<Option<SchemaFragment>> {
        let bytes = self.memory.contents()?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let file = ImageFile::from_bytes(bytes)?;
        self.created_unix = file.header().created_unix64;
        Ok(Some(file.into_image()))
    }

    fn create_entity(&mut self, spec: &EntitySpec<'_>) -> Result<BackendHandle> {
        if self.read_only {
            return Err(CatalogError::ReadOnly.into());
        }
        Ok(self.handles.issue(spec))
    }

    fn delete_entity(&mut self, key: &EntityKey, handle: Option<BackendHandle>) -> Result<()> {
        if self.read_only {
            return Err(CatalogError::ReadOnly.into());
        }
        self.handles.retire(key, handle)
    }

    fn write_attribute_data(&mut self, key: &EntityKey, _att: &Attribute) -> Result<()> {
        if self.read_only {
            return Err(CatalogError::ReadOnly.into());
        }
        check_att_key(key)
    }

    fn write_variable_data(&mut self, key: &EntityKey, _bytes: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(CatalogError::ReadOnly.into());
        }
        check_var_key(key)
    }

    fn flush_header(&mut self, schema: &SchemaFragment) -> Result<()> {
        if self.read_only {
            return Err(CatalogError::ReadOnly.into());
        }
        let bytes = ncimage::encode(schema, self.options.writer_options(self.created_unix))?;
        self.memory.replace(&bytes)?;
        debug!("Flushed {} byte in-memory image", bytes.len());
        Ok(())
    }

    fn close(&mut self, action: CloseAction) -> Result<Option<Vec<u8>>> {
        if action.is_persist() && !self.read_only {
            self.memory.persist()?;
        }
        Ok(Some(self.memory.contents()?))
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn open_lock_file(path: &Path) -> Result<(File, PathBuf)> {
    let lock_path = lock_path_for(path);
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)?;
    Ok((lock_file, lock_path))
}

/// Read-write engine over an image file. Holds an exclusive lock for its
/// lifetime and only rewrites the file when the encoded bytes change.
pub struct FileIO {
    path: PathBuf,
    // keep the interprocess lock alive for the lifetime of this IO
    lock_file: File,
    handles: Handles,
    options: ImageOptions,
    created_unix: u64,
    last_hash: Option<blake3::Hash>,
    create: bool,
}

impl FileIO {
    pub fn new(path: PathBuf, create: bool, options: ImageOptions) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let (lock_file, lock_path) = open_lock_file(&path)?;
        if let Err(e) = lock_file.try_lock_exclusive() {
            return Err(anyhow!(
                "Failed to open {:?} for write: could not acquire exclusive lock on {:?}: {}. If another process has the file open (even read-only), open this one read-only.",
                path, lock_path, e
            ));
        }
        if !create && !path.exists() {
            return Err(anyhow!("image file {:?} does not exist", path));
        }
        info!("Opened {:?} for write", path);
        Ok(Self {
            path,
            lock_file,
            handles: Handles::default(),
            options,
            created_unix: chrono::Utc::now().timestamp().max(0) as u64,
            last_hash: None,
            create,
        })
    }
}

impl CatalogIO for FileIO {
    fn io_type(&self) -> String {
        "file".to_string()
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn read_schema(&mut self) -> Result<Option<SchemaFragment>> {
        if self.create {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path)?;
        self.last_hash = Some(blake3::hash(&bytes));
        let file = ImageFile::from_bytes(bytes)?;
        self.created_unix = file.header().created_unix64;
        Ok(Some(file.into_image()))
    }

    fn create_entity(&mut self, spec: &EntitySpec<'_>) -> Result<BackendHandle> {
        Ok(self.handles.issue(spec))
    }

    fn delete_entity(&mut self, key: &EntityKey, handle: Option<BackendHandle>) -> Result<()> {
        self.handles.retire(key, handle)
    }

    fn write_attribute_data(&mut self, key: &EntityKey, _att: &Attribute) -> Result<()> {
        check_att_key(key)
    }

    fn write_variable_data(&mut self, key: &EntityKey, _bytes: &[u8]) -> Result<()> {
        check_var_key(key)
    }

    fn flush_header(&mut self, schema: &SchemaFragment) -> Result<()> {
        let bytes = ncimage::encode(schema, self.options.writer_options(self.created_unix))?;
        let hash = blake3::hash(&bytes);
        if self.last_hash == Some(hash) {
            debug!("Image {:?} unchanged; skipping write", self.path);
            return Ok(());
        }
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &bytes)?;
        std::fs::rename(&tmp_path, &self.path)?;
        self.last_hash = Some(hash);
        debug!("Wrote {} bytes to {:?}", bytes.len(), self.path);
        Ok(())
    }

    fn close(&mut self, _action: CloseAction) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

impl Drop for FileIO {
    fn drop(&mut self) {
        // best-effort unlock on drop
        let _ = self.lock_file.unlock();
    }
}

/// Read-only engine over an image file; holds a shared lock.
pub struct ReadOnlyFileIO {
    path: PathBuf,
    // keep the shared interprocess lock alive for the lifetime of this IO
    lock_file: File,
}

impl ReadOnlyFileIO {
    pub fn new(path: PathBuf) -> Result<Self> {
        let (lock_file, lock_path) = open_lock_file(&path)?;
        if let Err(e) = lock_file.try_lock_shared() {
            return Err(anyhow!(
                "Failed to open {:?} read-only: {:?} is locked by a writer: {}",
                path,
                lock_path,
                e
            ));
        }
        info!("Opened {:?} read-only", path);
        Ok(Self { path, lock_file })
    }
}

impl CatalogIO for ReadOnlyFileIO {
    fn io_type(&self) -> String {
        "read-only".to_string()
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn allows_define_mode_writes(&self) -> bool {
        false
    }

    fn read_schema(&mut self) -> Result<Option<SchemaFragment>> {
        let file = ImageFile::open(&self.path)?;
        Ok(Some(file.into_image()))
    }

    fn create_entity(&mut self, _spec: &EntitySpec<'_>) -> Result<BackendHandle> {
        Err(CatalogError::ReadOnly.into())
    }

    fn delete_entity(&mut self, _key: &EntityKey, _handle: Option<BackendHandle>) -> Result<()> {
        Err(CatalogError::ReadOnly.into())
    }

    fn write_attribute_data(&mut self, _key: &EntityKey, _att: &Attribute) -> Result<()> {
        Err(CatalogError::ReadOnly.into())
    }

    fn write_variable_data(&mut self, _key: &EntityKey, _bytes: &[u8]) -> Result<()> {
        Err(CatalogError::ReadOnly.into())
    }

    fn flush_header(&mut self, _schema: &SchemaFragment) -> Result<()> {
        Err(CatalogError::ReadOnly.into())
    }

    fn close(&mut self, _action: CloseAction) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

impl Drop for ReadOnlyFileIO {
    fn drop(&mut self) {
        // best-effort unlock on drop
        let _ = self.lock_file.unlock();
    }
}

/// Picks and opens the engine `config` asks for.
pub fn open_backend(config: &Config, create: bool) -> Result<Box<dyn CatalogIO>> {
    if create && config.read_only {
        return Err(CatalogError::Invalid("cannot create a read-only session".into()).into());
    }
    if config.is_in_memory() {
        let mut memory = match (&config.path, create || config.diskless) {
            (Some(path), false) => MemImage::from_file(path)?,
            (Some(path), true) if !create && path.exists() => MemImage::from_file(path)?,
            _ => MemImage::new(0),
        };
        if config.persist {
            if let Some(path) = &config.path {
                memory = memory.persist_to(path);
            }
        }
        return Ok(Box::new(MemoryIO::new(memory, config.image, config.read_only)));
    }
    let path = config
        .path
        .clone()
        .ok_or_else(|| CatalogError::Invalid("no path configured".into()))?;
    if config.read_only {
        Ok(Box::new(ReadOnlyFileIO::new(path)?))
    } else {
        Ok(Box::new(FileIO::new(path, create, config.image)?))
    }
}
