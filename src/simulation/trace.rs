use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use tracing::{debug, info};

use crate::simulation::config::{Settings, TraceOd};
use crate::simulation::error::{AsimError, Result};
use crate::simulation::table::Table;

pub const LABEL_COLUMN: &str = "label";

/// Writes diagnostic files for the traced household and zone pair. Trace files are transposed:
/// one row per label, one column (`value_1`, `value_2`, ...) per traced instance.
#[derive(Debug, Clone)]
pub struct Tracer {
    trace_hh_id: Option<i64>,
    trace_od: Option<TraceOd>,
    output_dir: PathBuf,
}

impl Tracer {
    pub fn new(settings: &Settings, output_dir: &Path) -> Self {
        Tracer {
            trace_hh_id: settings.trace_hh_id,
            trace_od: settings.trace_od,
            output_dir: output_dir.to_path_buf(),
        }
    }

    pub fn trace_hh_id(&self) -> Option<i64> {
        self.trace_hh_id
    }

    pub fn trace_od(&self) -> Option<TraceOd> {
        self.trace_od
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }

    pub fn write(&self, file_name: &str, labels: &[&str], instances: &[Vec<String>]) -> Result<()> {
        let path = self.path(file_name);
        write_trace_csv(&path, labels, instances)?;
        debug!("Wrote {} traced instances to {path:?}", instances.len());
        Ok(())
    }

    /// Traces the rows of `table` whose household column equals the traced household.
    /// `household_column` is `None` for tables indexed by household id.
    pub fn trace_household_rows(
        &self,
        file_name: &str,
        table: &Table,
        household_column: Option<&str>,
    ) -> Result<()> {
        let Some(hh_id) = self.trace_hh_id else {
            return Ok(());
        };
        let positions: Vec<usize> = match household_column {
            Some(column) => table
                .ints(column)?
                .iter()
                .positions(|&hh| hh == hh_id)
                .collect(),
            None => table.position(hh_id).ok().into_iter().collect(),
        };
        let labels: Vec<&str> = std::iter::once(table.index_name())
            .chain(table.column_names())
            .collect();
        let instances: Vec<Vec<String>> = positions.iter().map(|&p| table.row_strings(p)).collect();
        self.write(file_name, &labels, &instances)
    }
}

/// Writes instances (one value per label each) as a transposed, label keyed csv file.
pub fn write_trace_csv(path: &Path, labels: &[&str], instances: &[Vec<String>]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(AsimError::io(parent))?;
        }
    }
    if let Some(instance) = instances.iter().find(|i| i.len() != labels.len()) {
        return Err(AsimError::MalformedTrace {
            path: path.to_path_buf(),
            reason: format!(
                "instance has {} values for {} labels",
                instance.len(),
                labels.len()
            ),
        });
    }

    let mut writer = csv::Writer::from_path(path).map_err(AsimError::csv(path))?;
    let header: Vec<String> = std::iter::once(LABEL_COLUMN.to_string())
        .chain((1..=instances.len()).map(|i| format!("value_{i}")))
        .collect();
    writer.write_record(&header).map_err(AsimError::csv(path))?;
    for (i, label) in labels.iter().enumerate() {
        let record = std::iter::once(*label).chain(instances.iter().map(|inst| inst[i].as_str()));
        writer.write_record(record).map_err(AsimError::csv(path))?;
    }
    writer.flush().map_err(AsimError::io(path))?;
    Ok(())
}

/// A trace file transposed back into one row per traced instance, with the labels as columns.
/// Values are kept as the strings found in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceFrame {
    labels: Vec<String>,
    rows: Vec<Vec<String>>,
}

pub fn read_trace_csv(path: &Path) -> Result<TraceFrame> {
    let mut reader = csv::Reader::from_path(path).map_err(AsimError::csv(path))?;
    let headers = reader.headers().map_err(AsimError::csv(path))?.clone();
    if headers.get(0).map(str::trim) != Some(LABEL_COLUMN) {
        return Err(AsimError::MalformedTrace {
            path: path.to_path_buf(),
            reason: format!("first column must be `{LABEL_COLUMN}`"),
        });
    }
    let instances = headers.len().saturating_sub(1);

    let mut labels = Vec::new();
    let mut rows: Vec<Vec<String>> = vec![Vec::new(); instances];
    for record in reader.records() {
        let record = record.map_err(AsimError::csv(path))?;
        let mut fields = record.iter();
        let label = fields.next().unwrap_or_default();
        labels.push(label.to_string());
        for (row, value) in rows.iter_mut().zip(fields) {
            row.push(value.to_string());
        }
    }
    info!(
        "Read trace {path:?} with {instances} instances and labels {labels:?}"
    );
    Ok(TraceFrame { labels, rows })
}

impl TraceFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn column(&self, label: &str) -> Result<Vec<&str>> {
        let i = self.label_position(label)?;
        Ok(self.rows.iter().map(|row| row[i].as_str()).collect())
    }

    /// Stable sort by the given labels. Values compare as strings.
    pub fn sort_by(&mut self, labels: &[&str]) -> Result<()> {
        let keys = labels
            .iter()
            .map(|l| self.label_position(l))
            .collect::<Result<Vec<_>>>()?;
        let rows = &self.rows;
        let order: Vec<usize> = (0..rows.len())
            .sorted_by(|&a, &b| {
                let key = |r: usize| keys.iter().map(move |&k| &rows[r][k]);
                key(a).cmp(key(b))
            })
            .collect();
        self.rows = order.iter().map(|&i| self.rows[i].clone()).collect();
        Ok(())
    }

    fn label_position(&self, label: &str) -> Result<usize> {
        self.labels
            .iter()
            .position(|l| l == label)
            .ok_or_else(|| AsimError::MissingColumn {
                table: "trace".to_string(),
                column: label.to_string(),
            })
    }
}
