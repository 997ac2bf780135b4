//! Name validation and the reserved attribute table.
//!
//! The same checks run on names from callers and names read from a backend.

use crate::consts::MAX_NAME;
use crate::errors::{CatalogError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;
use unicode_normalization::{is_nfc, UnicodeNormalization};

lazy_static! {
    // first char: ASCII alnum, underscore, or any multibyte char;
    // the rest: anything but '/' and control characters
    static ref NAME_RE: Regex =
        Regex::new(r"^(?:[A-Za-z0-9_]|[^\x00-\x7F])[^/\x00-\x1F\x7F]*$").unwrap();
}

/// Hidden dimension-scale bookkeeping; never visible through the API.
pub const DIMSCALE_FLAG: u8 = 1;
/// Readable but immutable.
pub const READONLY_FLAG: u8 = 2;
/// Readable by name only; not counted or listed.
pub const NAMEONLY_FLAG: u8 = 4;
/// Value is stored in the image.
pub const MATERIALIZED_FLAG: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedAtt {
    pub name: &'static str,
    pub flags: u8,
}

// sorted by byte order for binary search
static RESERVED_ATTS: [ReservedAtt; 11] = [
    ReservedAtt { name: "CLASS", flags: DIMSCALE_FLAG },
    ReservedAtt { name: "DIMENSION_LIST", flags: DIMSCALE_FLAG },
    ReservedAtt { name: "NAME", flags: DIMSCALE_FLAG },
    ReservedAtt { name: "REFERENCE_LIST", flags: DIMSCALE_FLAG },
    ReservedAtt { name: "_Format", flags: READONLY_FLAG | NAMEONLY_FLAG },
    ReservedAtt { name: "_IsNetcdf4", flags: READONLY_FLAG | NAMEONLY_FLAG },
    ReservedAtt {
        name: "_NCProperties",
        flags: READONLY_FLAG | NAMEONLY_FLAG | MATERIALIZED_FLAG,
    },
    ReservedAtt { name: "_Netcdf4Coordinates", flags: DIMSCALE_FLAG },
    ReservedAtt { name: "_Netcdf4Dimid", flags: DIMSCALE_FLAG },
    ReservedAtt { name: "_SuperblockVersion", flags: READONLY_FLAG | NAMEONLY_FLAG },
    ReservedAtt { name: "_nc3_strict", flags: READONLY_FLAG | NAMEONLY_FLAG },
];

pub fn find_reserved(name: &str) -> Option<&'static ReservedAtt> {
    RESERVED_ATTS
        .binary_search_by(|r| r.name.cmp(name))
        .ok()
        .map(|i| &RESERVED_ATTS[i])
}

/// Canonical (NFC) form of a name. Names that normalize equal are the same name.
pub fn normalize_name(name: &str) -> Cow<'_, str> {
    if is_nfc(name) {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(name.nfc().collect())
    }
}

/// Validates `name` and returns its normalized form.
pub fn check_name(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(CatalogError::bad_name(name, "empty name"));
    }
    let norm = normalize_name(name);
    if norm.len() > MAX_NAME {
        return Err(CatalogError::bad_name(name, "name too long"));
    }
    if norm.ends_with(char::is_whitespace) {
        return Err(CatalogError::bad_name(name, "trailing whitespace"));
    }
    if !NAME_RE.is_match(&norm) {
        return Err(CatalogError::bad_name(
            name,
            "illegal character or leading character",
        ));
    }
    Ok(norm.into_owned())
}

/// Like [`check_name`], and additionally rejects reserved attribute names.
pub fn check_att_name(name: &str) -> Result<String> {
    let norm = check_name(name)?;
    if find_reserved(&norm).is_some() {
        return Err(CatalogError::bad_name(name, "reserved attribute name"));
    }
    Ok(norm)
}
