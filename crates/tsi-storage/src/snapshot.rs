//! In-memory representation of a whole `idydb` container. The store keeps
//! the full snapshot resident and mutates it in place; the container
//! formats (`plaintext`, `encrypted`) only govern how this snapshot is
//! serialized to and from a single file on `open`/`close`.

use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::StoredValue;

/// One column's sparse rows, plus a high-water mark that tracks the
/// largest row index ever written — independent of deletions, per spec
/// §4.7 ("`column_next_row` is unaffected by deletions").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnStore {
    pub rows: BTreeMap<u64, StoredValue>,
    pub high_water: Option<u64>,
}

impl ColumnStore {
    pub fn insert(&mut self, row: u64, value: StoredValue) {
        self.high_water = Some(self.high_water.map_or(row, |h| h.max(row)));
        self.rows.insert(row, value);
    }

    pub fn delete(&mut self, row: u64) {
        self.rows.remove(&row);
    }

    pub fn next_row(&self) -> u64 {
        self.high_water.map_or(1, |h| h + 1)
    }
}

/// The whole store: every column keyed by its `u16` id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub columns: HashMap<u16, ColumnStore>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn column(&self, col: u16) -> Option<&ColumnStore> {
        self.columns.get(&col)
    }

    pub fn column_mut(&mut self, col: u16) -> &mut ColumnStore {
        self.columns.entry(col).or_default()
    }
}
