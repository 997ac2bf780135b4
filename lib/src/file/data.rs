//! Whole-variable data held by the catalog. Values are kept as little-endian
//! element bytes and pushed to the backend on the next commit or sync.

use super::{NcFile, SessionState};
use crate::consts::MAX_VAR_BYTES;
use crate::convert::{convert, Converted};
use crate::errors::{CatalogError, ModeViolation, Result};
use crate::model::*;
use crate::types::*;
use crate::values::NcValues;
use log::{debug, warn};

/// Result of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    /// Id of the attribute or variable written.
    pub id: usize,
    /// Some values were out of range and replaced by the fill value.
    pub range_error: bool,
}

/// How a variable's elements are laid out in bytes.
enum Layout {
    Atomic(AtomicType),
    Bytes(usize),
}

impl Layout {
    fn elem_size(&self) -> usize {
        match self {
            Layout::Atomic(t) => t.size().unwrap_or(0),
            Layout::Bytes(n) => *n,
        }
    }
}

fn too_large(var: &Variable) -> CatalogError {
    CatalogError::Invalid(format!(
        "variable {} is too large to hold in memory",
        var.hdr.name
    ))
}

impl NcFile {
    fn layout(&self, type_id: TypeId) -> Result<Layout> {
        let desc = self.resolve_type(type_id)?;
        if !desc.is_fixed_size() {
            return Err(CatalogError::VariableSize(type_id));
        }
        match desc.storage_atomic() {
            Some(t) => Ok(Layout::Atomic(t)),
            None => Ok(Layout::Bytes(desc.size()?)),
        }
    }

    /// Bytes of one fill element.
    fn fill_bytes(&self, var: &Variable, layout: &Layout) -> Vec<u8> {
        let size = layout.elem_size();
        if var.fill.no_fill {
            return vec![0; size];
        }
        let explicit = var.fill.value.as_ref().and_then(NcValues::to_bytes);
        match (explicit, layout) {
            (Some(b), _) if b.len() == size => b,
            (_, Layout::Atomic(t)) => NcValues::fill(*t, 1)
                .to_bytes()
                .unwrap_or_else(|| vec![0; size]),
            (_, Layout::Bytes(_)) => vec![0; size],
        }
    }

    /// Element count implied by the current dimension lengths.
    fn shape_len(&self, var: &Variable) -> Result<usize> {
        let mut n = 1usize;
        for d in &var.dimids {
            let len = self.find_dim(var.container, *d)?.0.len;
            n = n.checked_mul(len).ok_or_else(|| too_large(var))?;
        }
        Ok(n)
    }

    /// Bytes needed to hold the whole shape, bounded by [`MAX_VAR_BYTES`].
    fn shape_bytes(&self, var: &Variable, elem_size: usize) -> Result<usize> {
        match self.shape_len(var)?.checked_mul(elem_size) {
            Some(n) if n <= MAX_VAR_BYTES => Ok(n),
            _ => Err(too_large(var)),
        }
    }

    /// Replaces all data of a variable. A leading unlimited dimension grows
    /// to hold however many records `values` contains; otherwise the element
    /// count must match the variable's shape.
    pub fn put_var(&mut self, gid: GroupId, varid: VarId, values: NcValues) -> Result<PutOutcome> {
        self.check_writable()?;
        if self.state == SessionState::Define && !self.io.allows_define_mode_writes() {
            return Err(CatalogError::WrongMode(ModeViolation::InDefine));
        }
        let var = self.var(gid, varid)?;
        let layout = self.layout(var.type_id)?;
        let (bytes, range_error) = match &layout {
            Layout::Atomic(t) => {
                let c = convert(&values, *t, self.range_mode)?;
                let bytes = c.values.to_bytes().ok_or(CatalogError::VariableSize(var.type_id))?;
                (bytes, c.range_error)
            }
            Layout::Bytes(_) => match values {
                NcValues::Raw(b) => (b, false),
                _ => return Err(CatalogError::BadType(var.type_id)),
            },
        };
        let size = layout.elem_size();
        if size == 0 || bytes.len() % size != 0 {
            return Err(CatalogError::Invalid(format!(
                "{} bytes is not a whole number of elements",
                bytes.len()
            )));
        }
        let n = bytes.len() / size;

        let mut grow: Option<(DimId, usize)> = None;
        match var.dimids.first() {
            Some(first) if self.find_dim(gid, *first)?.0.unlimited => {
                let mut record = 1usize;
                for d in &var.dimids[1..] {
                    record = record.saturating_mul(self.find_dim(gid, *d)?.0.len);
                }
                if record == 0 || n % record != 0 {
                    return Err(CatalogError::Invalid(format!(
                        "{} elements is not a whole number of records",
                        n
                    )));
                }
                let records = n / record;
                if records > self.find_dim(gid, *first)?.0.len {
                    grow = Some((*first, records));
                }
            }
            _ => {
                let want = self.shape_len(var)?;
                if n != want {
                    return Err(CatalogError::Invalid(format!(
                        "expected {} elements, got {}",
                        want, n
                    )));
                }
            }
        }
        if range_error {
            warn!("Variable {}/{} had out-of-range values replaced by fill", gid, varid);
        }

        if let Some((dimid, records)) = grow {
            let dim = self
                .graph
                .dim_mut(dimid)
                .ok_or(CatalogError::BadDim(dimid))?;
            dim.len = records;
            dim.extended = true;
            dim.too_long = records as u64 > u32::MAX as u64;
            self.cmode.ndirty = true;
            debug!("Unlimited dimension {} grew to {} records", dimid, records);
        }
        let var = self.var_mut(gid, varid)?;
        var.data = bytes;
        var.flags.written_to = true;
        var.flags.data_dirty = true;
        Ok(PutOutcome {
            id: varid,
            range_error,
        })
    }

    /// All data of a variable in its storage type, padded with the fill value
    /// up to the current shape. Compound and opaque data come back as raw
    /// bytes.
    pub fn get_var(&self, gid: GroupId, varid: VarId) -> Result<NcValues> {
        let var = self.var(gid, varid)?;
        let layout = self.layout(var.type_id)?;
        let size = layout.elem_size();
        let want = self.shape_bytes(var, size)?;
        let mut bytes = var.data.clone();
        if bytes.len() < want {
            let fill = self.fill_bytes(var, &layout);
            while bytes.len() < want {
                bytes.extend_from_slice(&fill);
            }
        }
        match layout {
            Layout::Atomic(t) => Ok(self.io.convert_from_bytes(&bytes, t)?),
            Layout::Bytes(_) => Ok(NcValues::Raw(bytes)),
        }
    }

    /// Variable data converted to `t` under the session's range mode.
    pub fn get_var_as(&self, gid: GroupId, varid: VarId, t: AtomicType) -> Result<Converted> {
        convert(&self.get_var(gid, varid)?, t, self.range_mode)
    }
}
