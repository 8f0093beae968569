use std::collections::{BTreeMap, BTreeSet};

use crate::simulation::error::{AsimError, Result};
use crate::simulation::table::Table;

/// The tables of a running pipeline. Tables changed since the last checkpoint are marked dirty,
/// so that a checkpoint only snapshots what a step actually touched.
#[derive(Debug, Default, Clone)]
pub struct TableStore {
    tables: BTreeMap<String, Table>,
    dirty: BTreeSet<String>,
}

impl TableStore {
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| AsimError::UnknownTable(name.to_string()))
    }

    /// Mutable access marks the table dirty.
    pub fn get_mut(&mut self, name: &str) -> Result<&mut Table> {
        let table = self
            .tables
            .get_mut(name)
            .ok_or_else(|| AsimError::UnknownTable(name.to_string()))?;
        self.dirty.insert(name.to_string());
        Ok(table)
    }

    /// Adds or replaces the table stored under the table's name.
    pub fn insert(&mut self, table: Table) {
        let name = table.name().to_string();
        self.dirty.insert(name.clone());
        self.tables.insert(name, table);
    }

    pub fn is_dirty(&self, name: &str) -> bool {
        self.dirty.contains(name)
    }

    pub(crate) fn take_dirty(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.dirty)
    }

    /// Replaces all tables with restored ones. Nothing is dirty afterwards.
    pub(crate) fn restore(&mut self, tables: impl IntoIterator<Item = Table>) {
        self.tables = tables
            .into_iter()
            .map(|t| (t.name().to_string(), t))
            .collect();
        self.dirty.clear();
    }
}
