use std::path::PathBuf;

use thiserror::Error;

use crate::simulation::table::ColumnType;

pub type Result<T> = std::result::Result<T, AsimError>;

#[derive(Debug, Error)]
pub enum AsimError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error in {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to parse settings at {path:?}: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_path_to_error::Error<serde_yaml::Error>,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown setting `{0}`")]
    UnknownSetting(String),
    #[error("invalid value `{value}` for setting `{key}`")]
    InvalidSetting { key: String, value: String },
    #[error("unknown injectable `{0}`")]
    UnknownInjectable(String),
    #[error("injectable `{name}` expects a {expected}")]
    InjectableType { name: String, expected: &'static str },
    #[error("no model step named `{0}` is registered")]
    UnknownStep(String),
    #[error("table `{0}` does not exist in the pipeline")]
    UnknownTable(String),
    #[error("table `{table}` has no column `{column}`")]
    MissingColumn { table: String, column: String },
    #[error("column `{column}` of table `{table}` is {actual:?}, not {expected:?}")]
    ColumnType {
        table: String,
        column: String,
        expected: ColumnType,
        actual: ColumnType,
    },
    #[error("column `{column}` has {actual} rows, table `{table}` has {expected}")]
    ColumnLength {
        table: String,
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("table `{table}` contains index value {id} twice")]
    DuplicateIndex { table: String, id: i64 },
    #[error("table `{table}` has no row with {index_name} = {id}")]
    MissingIndex {
        table: String,
        index_name: String,
        id: i64,
    },
    #[error("cannot parse `{value}` in column `{column}` of {path:?} as {expected:?}")]
    ParseValue {
        path: PathBuf,
        column: String,
        value: String,
        expected: ColumnType,
    },
    #[error("resume point `{0}` is not part of the model list")]
    InvalidResumePoint(String),
    #[error("no checkpoint named `{0}` in the checkpoint log")]
    MissingCheckpoint(String),
    #[error("checkpoint log version {found} is not supported (expected {expected})")]
    CheckpointVersion { found: u16, expected: u16 },
    #[error("checkpoint was written with {setting} = {stored}, current settings have {current}")]
    IncompatibleCheckpoint {
        setting: &'static str,
        stored: String,
        current: String,
    },
    #[error("{model}: chooser {chooser} has no available alternative")]
    NoAvailableAlternative { model: String, chooser: i64 },
    #[error("{model}: alternative `{alternative}` has a non finite utility for chooser {chooser}")]
    InvalidUtility {
        model: String,
        alternative: String,
        chooser: i64,
    },
    #[error("malformed trace file {path:?}: {reason}")]
    MalformedTrace { path: PathBuf, reason: String },
}

impl AsimError {
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| AsimError::Io { path, source }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>) -> impl FnOnce(csv::Error) -> Self {
        let path = path.into();
        move |source| AsimError::Csv { path, source }
    }
}
