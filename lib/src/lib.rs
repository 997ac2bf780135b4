//! `ncmeta` keeps the metadata of a hierarchical, self-describing array file
//! in memory: groups, dimensions, variables, attributes and user-defined
//! types, with the define/data mode lifecycle that governs when the schema
//! may change and how changes reach storage.
//!
//! ```no_run
//! use ncmeta::{AtomicType, Config, NcFile, NcValues};
//!
//! # fn main() -> ncmeta::Result<()> {
//! let mut file = NcFile::create(Config::file("forecast.ncim"))?;
//! let time = file.add_dimension(0, "time", None)?;
//! let t = file.add_variable(0, "time", AtomicType::Double.id(), &[time])?;
//! file.put_att_text(0, Some(t), "units", "hours since 2024-01-01")?;
//! file.enddef()?;
//! file.put_var(0, t, NcValues::Double(vec![0.0, 6.0, 12.0]))?;
//! file.close()?;
//! # Ok(())
//! # }
//! ```

extern crate derive_builder;

pub mod config;
pub mod consts;
pub mod convert;
pub mod errors;
pub mod file;
pub mod handle;
pub mod index;
pub mod io;
pub mod memio;
pub mod model;
pub mod names;
pub mod options;
pub mod schema;
pub mod types;
pub mod util;
pub mod values;

pub use config::{Config, ConfigBuilder, ImageOptions, OpenMode};
pub use errors::{CatalogError, CommitReport, EntityKey, ModeViolation, Result};
pub use file::{CatalogSummary, ModeFlags, NcFile, PutOutcome, SessionState};
pub use handle::{Handle, Registry};
pub use io::{CatalogIO, EntitySpec, FileIO, MemoryIO, ReadOnlyFileIO};
pub use memio::MemImage;
pub use model::{AttContainer, ChunkCache, DimId, FilterSpec, GroupId, ParallelAccess, VarId};
pub use options::{Chunking, CloseAction, FillMode, RangeMode};
pub use types::{AtomicType, FieldSpec, TypeClassTag, TypeId, TypeSpec};
pub use values::NcValues;

/// Initializes logging for the ncmeta library.
///
/// If `NCMETA_LOG` is set, `RUST_LOG` takes its value. Call this before
/// initializing a logger such as `env_logger`.
pub fn init_logging() {
    if let Ok(log_level) = std::env::var("NCMETA_LOG") {
        std::env::set_var("RUST_LOG", log_level);
    }
}
