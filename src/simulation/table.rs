use ahash::HashMap;
use serde::{Deserialize, Serialize};

use crate::simulation::error::{AsimError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int,
    Float,
    Str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Str(Vec<String>),
}

impl Column {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Column::Int(_) => ColumnType::Int,
            Column::Float(_) => ColumnType::Float,
            Column::Str(_) => ColumnType::Str,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders a single cell the way it is written to csv and trace files.
    pub fn value_string(&self, position: usize) -> String {
        match self {
            Column::Int(v) => v[position].to_string(),
            Column::Float(v) => v[position].to_string(),
            Column::Str(v) => v[position].clone(),
        }
    }

    fn take(&self, positions: &[usize]) -> Column {
        match self {
            Column::Int(v) => Column::Int(positions.iter().map(|&p| v[p]).collect()),
            Column::Float(v) => Column::Float(positions.iter().map(|&p| v[p]).collect()),
            Column::Str(v) => Column::Str(positions.iter().map(|&p| v[p].clone()).collect()),
        }
    }

    fn extend(&mut self, other: Column) -> std::result::Result<(), ColumnType> {
        match (self, other) {
            (Column::Int(a), Column::Int(b)) => a.extend(b),
            (Column::Float(a), Column::Float(b)) => a.extend(b),
            (Column::Str(a), Column::Str(b)) => a.extend(b),
            (_, other) => return Err(other.column_type()),
        }
        Ok(())
    }
}

/// A named table with a declared index and typed, named columns. Rows are addressed either by
/// position or by index value. Column access checks name and type at the table boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TableRepr", into = "TableRepr")]
pub struct Table {
    name: String,
    index_name: String,
    index: Vec<i64>,
    columns: Vec<(String, Column)>,
    positions: HashMap<i64, usize>,
}

// Serialized form. The position lookup is rebuilt (and validated) on load.
#[derive(Serialize, Deserialize)]
struct TableRepr {
    name: String,
    index_name: String,
    index: Vec<i64>,
    columns: Vec<(String, Column)>,
}

impl TryFrom<TableRepr> for Table {
    type Error = AsimError;

    fn try_from(repr: TableRepr) -> Result<Self> {
        let mut table = Table::new(repr.name, repr.index_name, repr.index)?;
        for (name, column) in repr.columns {
            table.set_column(name, column)?;
        }
        Ok(table)
    }
}

impl From<Table> for TableRepr {
    fn from(table: Table) -> Self {
        TableRepr {
            name: table.name,
            index_name: table.index_name,
            index: table.index,
            columns: table.columns,
        }
    }
}

impl Table {
    pub fn new(
        name: impl Into<String>,
        index_name: impl Into<String>,
        index: Vec<i64>,
    ) -> Result<Self> {
        let name = name.into();
        let positions = build_positions(&name, &index)?;
        Ok(Table {
            name,
            index_name: index_name.into(),
            index,
            columns: Vec::new(),
            positions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn index(&self) -> &[i64] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.positions.contains_key(&id)
    }

    pub fn position(&self, id: i64) -> Result<usize> {
        self.positions
            .get(&id)
            .copied()
            .ok_or_else(|| AsimError::MissingIndex {
                table: self.name.clone(),
                index_name: self.index_name.clone(),
                id,
            })
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn schema(&self) -> Vec<(&str, ColumnType)> {
        self.columns
            .iter()
            .map(|(name, column)| (name.as_str(), column.column_type()))
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    /// Adds a column or replaces an existing column of the same name. Re-running a model step
    /// replaces its output columns.
    pub fn set_column(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if column.len() != self.len() {
            return Err(AsimError::ColumnLength {
                table: self.name.clone(),
                column: name,
                expected: self.len(),
                actual: column.len(),
            });
        }
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = column,
            None => self.columns.push((name, column)),
        }
        Ok(())
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
            .ok_or_else(|| AsimError::MissingColumn {
                table: self.name.clone(),
                column: name.to_string(),
            })
    }

    pub fn ints(&self, name: &str) -> Result<&[i64]> {
        match self.column(name)? {
            Column::Int(v) => Ok(v),
            other => Err(self.type_error(name, ColumnType::Int, other)),
        }
    }

    pub fn floats(&self, name: &str) -> Result<&[f64]> {
        match self.column(name)? {
            Column::Float(v) => Ok(v),
            other => Err(self.type_error(name, ColumnType::Float, other)),
        }
    }

    pub fn strs(&self, name: &str) -> Result<&[String]> {
        match self.column(name)? {
            Column::Str(v) => Ok(v),
            other => Err(self.type_error(name, ColumnType::Str, other)),
        }
    }

    pub fn get_int(&self, column: &str, id: i64) -> Result<i64> {
        let position = self.position(id)?;
        Ok(self.ints(column)?[position])
    }

    pub fn get_float(&self, column: &str, id: i64) -> Result<f64> {
        let position = self.position(id)?;
        Ok(self.floats(column)?[position])
    }

    pub fn get_str(&self, column: &str, id: i64) -> Result<&str> {
        let position = self.position(id)?;
        Ok(&self.strs(column)?[position])
    }

    /// Slices an integer column by index values, in the order of `ids`.
    pub fn int_values(&self, column: &str, ids: &[i64]) -> Result<Vec<i64>> {
        let values = self.ints(column)?;
        ids.iter()
            .map(|&id| self.position(id).map(|p| values[p]))
            .collect()
    }

    pub fn float_values(&self, column: &str, ids: &[i64]) -> Result<Vec<f64>> {
        let values = self.floats(column)?;
        ids.iter()
            .map(|&id| self.position(id).map(|p| values[p]))
            .collect()
    }

    pub fn str_values(&self, column: &str, ids: &[i64]) -> Result<Vec<String>> {
        let values = self.strs(column)?;
        ids.iter()
            .map(|&id| self.position(id).map(|p| values[p].clone()))
            .collect()
    }

    /// New table with the rows at `positions`, in that order.
    pub fn take(&self, positions: &[usize]) -> Table {
        let index: Vec<i64> = positions.iter().map(|&p| self.index[p]).collect();
        let lookup = index.iter().enumerate().map(|(p, &id)| (id, p)).collect();
        Table {
            name: self.name.clone(),
            index_name: self.index_name.clone(),
            index,
            columns: self
                .columns
                .iter()
                .map(|(n, c)| (n.clone(), c.take(positions)))
                .collect(),
            positions: lookup,
        }
    }

    pub fn filter<F>(&self, mut predicate: F) -> Table
    where
        F: FnMut(usize) -> bool,
    {
        let positions: Vec<usize> = (0..self.len()).filter(|&p| predicate(p)).collect();
        self.take(&positions)
    }

    pub fn head(&self, n: usize) -> Table {
        let positions: Vec<usize> = (0..self.len().min(n)).collect();
        self.take(&positions)
    }

    /// Appends the rows of `other`, which must have the same columns in the same order.
    pub fn append(&mut self, other: Table) -> Result<()> {
        let same_schema = self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|((a, ca), (b, cb))| a == b && ca.column_type() == cb.column_type());
        if !same_schema {
            let column = other
                .columns
                .iter()
                .find(|(n, _)| !self.has_column(n))
                .or_else(|| other.columns.first())
                .map(|(n, _)| n.clone())
                .unwrap_or_default();
            return Err(AsimError::MissingColumn {
                table: self.name.clone(),
                column,
            });
        }
        for &id in &other.index {
            if self.positions.contains_key(&id) {
                return Err(AsimError::DuplicateIndex {
                    table: self.name.clone(),
                    id,
                });
            }
        }

        let offset = self.index.len();
        for (i, &id) in other.index.iter().enumerate() {
            self.positions.insert(id, offset + i);
        }
        self.index.extend(other.index);
        for ((name, column), (_, other_column)) in self.columns.iter_mut().zip(other.columns) {
            column
                .extend(other_column)
                .map_err(|actual| AsimError::ColumnType {
                    table: self.name.clone(),
                    column: name.clone(),
                    expected: column.column_type(),
                    actual,
                })?;
        }
        Ok(())
    }

    /// All cells of the row at `position` as strings, index first.
    pub fn row_strings(&self, position: usize) -> Vec<String> {
        std::iter::once(self.index[position].to_string())
            .chain(self.columns.iter().map(|(_, c)| c.value_string(position)))
            .collect()
    }

    fn type_error(&self, column: &str, expected: ColumnType, actual: &Column) -> AsimError {
        AsimError::ColumnType {
            table: self.name.clone(),
            column: column.to_string(),
            expected,
            actual: actual.column_type(),
        }
    }
}

fn build_positions(table: &str, index: &[i64]) -> Result<HashMap<i64, usize>> {
    let mut positions = HashMap::default();
    for (position, &id) in index.iter().enumerate() {
        if positions.insert(id, position).is_some() {
            return Err(AsimError::DuplicateIndex {
                table: table.to_string(),
                id,
            });
        }
    }
    Ok(positions)
}
