//! Shared option types that replace boolean flag parameters in the Rust API.

use serde::{Deserialize, Serialize};

/// How numeric conversions treat values that do not fit the destination type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeMode {
    /// Fail the whole conversion with a range error.
    #[default]
    Strict,
    /// Replace each out-of-range element with the destination's default fill
    /// value and report that a range error occurred.
    Lenient,
}

impl RangeMode {
    pub fn is_strict(self) -> bool {
        matches!(self, RangeMode::Strict)
    }
}

impl From<bool> for RangeMode {
    fn from(strict: bool) -> Self {
        if strict {
            RangeMode::Strict
        } else {
            RangeMode::Lenient
        }
    }
}

/// Whether newly defined variables are prefilled with their fill value.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillMode {
    #[default]
    Fill,
    NoFill,
}

impl FillMode {
    pub fn is_fill(self) -> bool {
        matches!(self, FillMode::Fill)
    }
}

impl From<bool> for FillMode {
    fn from(fill: bool) -> Self {
        if fill {
            FillMode::Fill
        } else {
            FillMode::NoFill
        }
    }
}

/// What a backend does with pending state when it is closed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CloseAction {
    /// Write out anything not yet persisted.
    Persist,
    /// Drop pending state without touching storage.
    Discard,
}

impl CloseAction {
    pub fn is_persist(self) -> bool {
        matches!(self, CloseAction::Persist)
    }
}

impl From<bool> for CloseAction {
    fn from(persist: bool) -> Self {
        if persist {
            CloseAction::Persist
        } else {
            CloseAction::Discard
        }
    }
}

/// Storage layout requested for a variable.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Chunking {
    Contiguous,
    Chunked(Vec<usize>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bool_conversions() {
        assert_eq!(RangeMode::from(true), RangeMode::Strict);
        assert_eq!(RangeMode::from(false), RangeMode::Lenient);
        assert!(FillMode::from(true).is_fill());
        assert!(!CloseAction::from(false).is_persist());
    }

    #[test]
    fn modes_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&RangeMode::Lenient).unwrap(), "\"lenient\"");
        let m: FillMode = serde_json::from_str("\"nofill\"").unwrap();
        assert_eq!(m, FillMode::NoFill);
    }
}
