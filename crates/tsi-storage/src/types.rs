//! Column/value types and open flags for `idydb` (spec §4.7).

use serde::{Deserialize, Serialize};

/// The type tag of a value retrieved from the store. `Null` is never
/// written directly — it is what `extract` reports for an absent row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Null,
    Integer,
    Float,
    Bool,
    Char,
    Vector,
}

/// A value stored at one `(column, row)` address. Rows within a column are
/// otherwise untyped — the store enforces no cross-row schema beyond what
/// each individual cell records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    Int(i32),
    Float(f32),
    Bool(bool),
    Char(String),
    Vector(Vec<f32>),
}

impl StoredValue {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Int(_) => ColumnType::Integer,
            Self::Float(_) => ColumnType::Float,
            Self::Bool(_) => ColumnType::Bool,
            Self::Char(_) => ColumnType::Char,
            Self::Vector(_) => ColumnType::Vector,
        }
    }
}

bitflags::bitflags! {
    /// Open-mode flags (spec §4.7): `CREATE` permits making a new container
    /// if `path` doesn't exist yet; `READONLY` blocks every mutator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u8 {
        const CREATE   = 0b0000_0001;
        const READONLY = 0b0000_0010;
    }
}

/// The result of [`crate::IdyDb::extract`]: either nothing (an absent or
/// deleted row) or one typed value, with accessors matching the reference
/// `retrieved_type()` / `retrieve_*()` surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted(pub(crate) Option<StoredValue>);

impl Extracted {
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn retrieved_type(&self) -> ColumnType {
        self.0.as_ref().map(StoredValue::column_type).unwrap_or(ColumnType::Null)
    }

    pub fn retrieve_int(&self) -> Option<i32> {
        match &self.0 {
            Some(StoredValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn retrieve_float(&self) -> Option<f32> {
        match &self.0 {
            Some(StoredValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn retrieve_bool(&self) -> Option<bool> {
        match &self.0 {
            Some(StoredValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn retrieve_const_char(&self) -> Option<&str> {
        match &self.0 {
            Some(StoredValue::Char(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn retrieve_vector(&self) -> Option<&[f32]> {
        match &self.0 {
            Some(StoredValue::Vector(v)) => Some(v.as_slice()),
            _ => None,
        }
    }
}
