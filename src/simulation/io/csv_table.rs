use std::fs;
use std::path::Path;

use tracing::debug;

use crate::simulation::error::{AsimError, Result};
use crate::simulation::table::{Column, ColumnType, Table};

/// Reads a csv file into a table. `index_column` must hold unique integers, every column in
/// `schema` must be present. Any other column of the file is ignored.
pub fn read_table(
    path: &Path,
    table_name: &str,
    index_column: &str,
    schema: &[(&str, ColumnType)],
) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path).map_err(AsimError::csv(path))?;
    let headers = reader.headers().map_err(AsimError::csv(path))?.clone();

    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| AsimError::MissingColumn {
                table: table_name.to_string(),
                column: name.to_string(),
            })
    };
    let index_pos = find(index_column)?;
    let column_pos = schema
        .iter()
        .map(|(name, _)| find(name))
        .collect::<Result<Vec<_>>>()?;

    let mut index = Vec::new();
    let mut columns: Vec<Column> = schema
        .iter()
        .map(|(_, column_type)| match column_type {
            ColumnType::Int => Column::Int(Vec::new()),
            ColumnType::Float => Column::Float(Vec::new()),
            ColumnType::Str => Column::Str(Vec::new()),
        })
        .collect();

    for record in reader.records() {
        let record = record.map_err(AsimError::csv(path))?;
        let field = |pos: usize| record.get(pos).unwrap_or("").trim();

        index.push(parse_int(path, index_column, field(index_pos))?);
        for ((column, &pos), (name, _)) in columns.iter_mut().zip(&column_pos).zip(schema) {
            let raw = field(pos);
            match column {
                Column::Int(values) => values.push(parse_int(path, name, raw)?),
                Column::Float(values) => values.push(raw.parse().map_err(|_| {
                    AsimError::ParseValue {
                        path: path.to_path_buf(),
                        column: name.to_string(),
                        value: raw.to_string(),
                        expected: ColumnType::Float,
                    }
                })?),
                Column::Str(values) => values.push(raw.to_string()),
            }
        }
    }

    let mut table = Table::new(table_name, index_column, index)?;
    for ((name, _), column) in schema.iter().zip(columns) {
        table.set_column(*name, column)?;
    }
    debug!("Read {} rows of table {table_name} from {path:?}", table.len());
    Ok(table)
}

// Integer columns written by other tools sometimes carry a trailing `.0`.
fn parse_int(path: &Path, column: &str, raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .ok()
        .or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        })
        .ok_or_else(|| AsimError::ParseValue {
            path: path.to_path_buf(),
            column: column.to_string(),
            value: raw.to_string(),
            expected: ColumnType::Int,
        })
}

/// Writes the table with its index as first column.
pub fn write_table(table: &Table, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(AsimError::io(parent))?;
        }
    }
    let mut writer = csv::Writer::from_path(path).map_err(AsimError::csv(path))?;
    let header: Vec<&str> = std::iter::once(table.index_name())
        .chain(table.column_names())
        .collect();
    writer.write_record(&header).map_err(AsimError::csv(path))?;
    for position in 0..table.len() {
        writer
            .write_record(table.row_strings(position))
            .map_err(AsimError::csv(path))?;
    }
    writer.flush().map_err(AsimError::io(path))?;
    Ok(())
}
