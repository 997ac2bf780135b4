//! Session configuration: where the catalog lives, how it is opened, and the
//! defaults new variables inherit.

use crate::errors::{CatalogError, Result};
use crate::model::ChunkCache;
use crate::options::{FillMode, RangeMode};
use derive_builder::Builder;
use ncimage::WriterOptions;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

/// Encoding options for images written by the file and memory backends.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ImageOptions {
    pub zstd: bool,
    pub with_crc: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        ImageOptions {
            zstd: false,
            with_crc: true,
        }
    }
}

impl ImageOptions {
    pub fn writer_options(&self, created_unix: u64) -> WriterOptions {
        WriterOptions {
            zstd: self.zstd,
            with_crc: self.with_crc,
            created_unix,
        }
    }
}

/// How a session was opened. Derived from [`Config`] and fixed for the
/// session's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OpenMode {
    pub read_only: bool,
    pub in_memory: bool,
    pub diskless: bool,
    pub parallel: bool,
    pub persist: bool,
}

#[derive(Builder, Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[builder(setter(into), default, build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct Config {
    /// Image file on disk. Optional only for purely in-memory sessions.
    #[builder(setter(into, strip_option))]
    pub path: Option<PathBuf>,
    pub read_only: bool,
    /// Keep the whole image in memory; an existing file at `path` is loaded.
    pub in_memory: bool,
    /// Like `in_memory`, but nothing touches disk unless `persist` is set.
    pub diskless: bool,
    /// Write an in-memory image to `path` on close.
    pub persist: bool,
    pub parallel: bool,
    pub range_mode: RangeMode,
    pub fill_mode: FillMode,
    /// Chunk cache given to variables that do not set their own.
    pub chunk_cache: ChunkCache,
    pub image: ImageOptions,
}

impl ConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        let in_memory = self.in_memory.unwrap_or(false) || self.diskless.unwrap_or(false);
        let has_path = matches!(self.path, Some(Some(_)));
        if !in_memory && !has_path {
            return Err("a path is required unless the session is in memory".to_string());
        }
        if self.persist.unwrap_or(false) && !(in_memory && has_path) {
            return Err("persist requires an in-memory session with a path".to_string());
        }
        Ok(())
    }
}

impl From<ConfigBuilderError> for CatalogError {
    fn from(err: ConfigBuilderError) -> Self {
        CatalogError::Invalid(err.to_string())
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Read-write session on an image file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Config {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Diskless session with no backing file.
    pub fn memory() -> Self {
        Config {
            in_memory: true,
            diskless: true,
            ..Default::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.in_memory || self.diskless
    }

    pub fn open_mode(&self) -> OpenMode {
        OpenMode {
            read_only: self.read_only,
            in_memory: self.is_in_memory(),
            diskless: self.diskless,
            parallel: self.parallel,
            persist: self.persist,
        }
    }

    pub fn save_to_file(&self, file: &Path) -> Result<()> {
        let config_str = serde_json::to_string_pretty(&self)
            .map_err(|e| CatalogError::Invalid(format!("cannot serialize config: {}", e)))?;
        let mut file = std::fs::File::create(file).map_err(anyhow::Error::from)?;
        file.write_all(config_str.as_bytes())
            .map_err(anyhow::Error::from)?;
        Ok(())
    }

    pub fn from_file(file: &Path) -> Result<Self> {
        let file = std::fs::File::open(file).map_err(anyhow::Error::from)?;
        let reader = BufReader::new(file);
        let config: Config = serde_json::from_reader(reader)
            .map_err(|e| CatalogError::Invalid(format!("cannot parse config: {}", e)))?;
        Ok(config)
    }

    /// Prints the configuration for command line output.
    pub fn print(&self) {
        println!("Configuration:");
        match &self.path {
            Some(p) => println!("  Path: {}", p.display()),
            None => println!("  Path: <none>"),
        }
        println!("  Read Only: {}", self.read_only);
        println!("  In Memory: {}", self.in_memory);
        println!("  Diskless: {}", self.diskless);
        println!("  Persist: {}", self.persist);
        println!("  Parallel: {}", self.parallel);
        println!("  Range Mode: {:?}", self.range_mode);
        println!("  Fill Mode: {:?}", self.fill_mode);
        println!(
            "  Chunk Cache: {} bytes, {} slots, preemption {}",
            self.chunk_cache.size, self.chunk_cache.nelems, self.chunk_cache.preemption
        );
        println!("  Image: zstd={} crc={}", self.image.zstd, self.image.with_crc);
    }
}
