//! Range-checked conversion between atomic value arrays.
//!
//! Narrowing never truncates silently: an element that does not fit the
//! destination is a range error. In [`RangeMode::Strict`] the conversion
//! fails; in [`RangeMode::Lenient`] the element becomes the destination's
//! default fill value and [`Converted::range_error`] is set.

use crate::consts::*;
use crate::errors::{CatalogError, Result};
use crate::options::RangeMode;
use crate::types::AtomicType;
use crate::values::NcValues;

#[derive(Debug, Clone, PartialEq)]
pub struct Converted {
    pub values: NcValues,
    pub range_error: bool,
}

#[derive(Debug, Clone, Copy)]
enum Num {
    I(i64),
    U(u64),
    F(f64),
}

fn to_nums(values: &NcValues) -> Option<Vec<Num>> {
    Some(match values {
        NcValues::Byte(v) => v.iter().map(|x| Num::I(*x as i64)).collect(),
        NcValues::Short(v) => v.iter().map(|x| Num::I(*x as i64)).collect(),
        NcValues::Int(v) => v.iter().map(|x| Num::I(*x as i64)).collect(),
        NcValues::Int64(v) => v.iter().map(|x| Num::I(*x)).collect(),
        NcValues::UByte(v) => v.iter().map(|x| Num::U(*x as u64)).collect(),
        NcValues::UShort(v) => v.iter().map(|x| Num::U(*x as u64)).collect(),
        NcValues::UInt(v) => v.iter().map(|x| Num::U(*x as u64)).collect(),
        NcValues::UInt64(v) => v.iter().map(|x| Num::U(*x)).collect(),
        NcValues::Float(v) => v.iter().map(|x| Num::F(*x as f64)).collect(),
        NcValues::Double(v) => v.iter().map(|x| Num::F(*x)).collect(),
        _ => return None,
    })
}

fn to_int(n: Num, (min, max): (i128, i128)) -> Option<i128> {
    match n {
        Num::I(v) => Some(v as i128).filter(|v| (min..=max).contains(v)),
        Num::U(v) => Some(v as i128).filter(|v| (min..=max).contains(v)),
        Num::F(f) => {
            // max + 1 is a power of two, so the upper bound is exact
            if f.is_nan() || f < min as f64 || f >= (max + 1) as f64 {
                None
            } else {
                Some(f.trunc() as i128)
            }
        }
    }
}

fn to_f64(n: Num) -> f64 {
    match n {
        Num::I(v) => v as f64,
        Num::U(v) => v as f64,
        Num::F(f) => f,
    }
}

fn to_f32(n: Num) -> Option<f32> {
    let v = to_f64(n);
    if v.is_finite() && v.abs() > f32::MAX as f64 {
        None
    } else {
        Some(v as f32)
    }
}

macro_rules! ints_into {
    ($nums:expr, $dst:expr, $mode:expr, $variant:ident, $t:ty, $fill:expr) => {{
        let range = $dst.int_range().ok_or(CatalogError::BadType($dst.id()))?;
        let mut out: Vec<$t> = Vec::with_capacity($nums.len());
        let mut range_error = false;
        for n in $nums {
            match to_int(n, range) {
                Some(v) => out.push(v as $t),
                None if $mode.is_strict() => return Err(CatalogError::Range),
                None => {
                    range_error = true;
                    out.push($fill);
                }
            }
        }
        (NcValues::$variant(out), range_error)
    }};
}

/// Converts `values` into elements of `dst`.
pub fn convert(values: &NcValues, dst: AtomicType, mode: RangeMode) -> Result<Converted> {
    let src = match values.atomic_type() {
        Some(t) => t,
        None => return Err(CatalogError::BadType(dst.id())),
    };
    if src == dst {
        return Ok(Converted {
            values: values.clone(),
            range_error: false,
        });
    }
    if src == AtomicType::Char || dst == AtomicType::Char {
        return Err(CatalogError::CharConversion);
    }
    if src == AtomicType::String || dst == AtomicType::String {
        return Err(CatalogError::BadType(dst.id()));
    }
    let nums = to_nums(values).ok_or(CatalogError::BadType(src.id()))?;

    let (values, range_error) = match dst {
        AtomicType::Byte => ints_into!(nums, dst, mode, Byte, i8, FILL_BYTE),
        AtomicType::Short => ints_into!(nums, dst, mode, Short, i16, FILL_SHORT),
        AtomicType::Int => ints_into!(nums, dst, mode, Int, i32, FILL_INT),
        AtomicType::Int64 => ints_into!(nums, dst, mode, Int64, i64, FILL_INT64),
        AtomicType::UByte => ints_into!(nums, dst, mode, UByte, u8, FILL_UBYTE),
        AtomicType::UShort => ints_into!(nums, dst, mode, UShort, u16, FILL_USHORT),
        AtomicType::UInt => ints_into!(nums, dst, mode, UInt, u32, FILL_UINT),
        AtomicType::UInt64 => ints_into!(nums, dst, mode, UInt64, u64, FILL_UINT64),
        AtomicType::Float => {
            let mut out = Vec::with_capacity(nums.len());
            let mut range_error = false;
            for n in nums {
                match to_f32(n) {
                    Some(v) => out.push(v),
                    None if mode.is_strict() => return Err(CatalogError::Range),
                    None => {
                        range_error = true;
                        out.push(FILL_FLOAT);
                    }
                }
            }
            (NcValues::Float(out), range_error)
        }
        AtomicType::Double => (NcValues::Double(nums.into_iter().map(to_f64).collect()), false),
        AtomicType::Char | AtomicType::String => return Err(CatalogError::BadType(dst.id())),
    };
    Ok(Converted {
        values,
        range_error,
    })
}
