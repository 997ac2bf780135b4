//! ncimage — compact, checksummed binary images of an array-metadata catalog.
//!
//! An image holds the groups, dimensions, user-defined types, variables,
//! attributes and raw variable data of one catalog session as a header,
//! a run of record sections, a table of contents and an optional CRC footer.
//!
//! Quick start: write an image
//!
//! ```no_run
//! use ncimage::{write_file, GroupRec, DimRec, Image};
//!
//! let image = Image {
//!     groups: vec![GroupRec { id: 0, parent: None, name: "/".into() }],
//!     dims: vec![DimRec { id: 0, group: 0, name: "time".into(), len: 0, unlimited: true }],
//!     ..Default::default()
//! };
//! write_file("example.ncim", &image).expect("write ok");
//! ```
//!
//! Read it back
//!
//! ```no_run
//! use ncimage::ImageFile;
//! use std::path::Path;
//!
//! let f = ImageFile::open(Path::new("example.ncim")).expect("open");
//! for d in &f.image().dims {
//!     println!("dim {} len={} unlimited={}", d.name, d.len, d.unlimited);
//! }
//! ```
//!
//! Layout: 32-byte header (`NCIM`, version, flags, created, TOC offset and
//! length), sections in [`SectionKind`] order, 32-byte TOC entries, and a
//! 16-byte footer (global CRC + `NCIM_ENDMARK`) when CRCs are enabled.

pub mod header;
pub mod reader;
pub mod records;
pub mod writer;

pub use header::SectionKind;
pub use reader::{ImageError, ImageFile, decode};
pub use records::{
    ArenaExtents, AttRec, DimRec, FieldRec, FilterRec, GroupRec, Image, MemberRec, Payload, StorageRec,
    TypeClassRec, TypeRec, VarDataRec, VarRec,
};
pub use writer::{WriterOptions, encode, write_file, write_file_with_options};

/// Crate‑level result type using the reader error.
pub type Result<T> = std::result::Result<T, crate::reader::ImageError>;
