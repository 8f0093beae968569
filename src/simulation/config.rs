use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::simulation::error::{AsimError, Result};

pub const SETTINGS_FILE: &str = "settings.yaml";

/// Registers a handler for a `key=value` settings override, e.g. `--set chunk_size=10`.
#[macro_export]
macro_rules! register_override {
    ($key:literal, $func:expr) => {
        inventory::submit! {
            $crate::simulation::config::OverrideHandler {
                key: $key,
                apply: $func,
            }
        }
    };
}

pub struct OverrideHandler {
    pub key: &'static str,
    pub apply: fn(settings: &mut Settings, value: &str) -> Result<()>,
}

// Collect all OverrideHandler submitted from anywhere in the crate
inventory::collect!(OverrideHandler);

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CommandLineArgs {
    #[arg(long)]
    pub configs_dir: PathBuf,
    #[arg(long)]
    pub data_dir: PathBuf,
    #[arg(long)]
    pub output_dir: PathBuf,
    /// Resume after this step instead of the `resume_after` entry of the settings.
    #[arg(long)]
    pub resume_after: Option<String>,
    #[arg(long = "set", value_parser = parse_key_val)]
    pub overrides: Vec<(String, String)>,
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let pos = s.find('=');
    match pos {
        Some(pos) => Ok((s[..pos].to_string(), s[pos + 1..].to_string())),
        None => Err(format!("invalid KEY=VALUE: no `=` found in `{}`", s)),
    }
}

/// Typed content of `settings.yaml`. Unknown keys are rejected when parsing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Number of households taken from the head of the households file. 0 means all.
    #[serde(default)]
    pub households_sample_size: usize,
    /// Number of choosers per batch. 0 runs every model unchunked.
    #[serde(default)]
    pub chunk_size: usize,
    #[serde(default)]
    pub trace_hh_id: Option<i64>,
    #[serde(default)]
    pub trace_od: Option<TraceOd>,
    #[serde(default)]
    pub check_for_variability: bool,
    #[serde(default)]
    pub rng_base_seed: u64,
    #[serde(default)]
    pub input_tables: InputTables,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub resume_after: Option<String>,
    #[serde(default)]
    pub output_tables: Vec<String>,
    #[serde(default)]
    pub logging: Logging,
}

/// Origin and destination zone of the traced zone pair, written as `[orig, dest]`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(from = "[i64; 2]", into = "[i64; 2]")]
pub struct TraceOd {
    pub orig: i64,
    pub dest: i64,
}

impl From<[i64; 2]> for TraceOd {
    fn from([orig, dest]: [i64; 2]) -> Self {
        TraceOd { orig, dest }
    }
}

impl From<TraceOd> for [i64; 2] {
    fn from(od: TraceOd) -> Self {
        [od.orig, od.dest]
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct InputTables {
    #[serde(default = "default_households_file")]
    pub households: PathBuf,
    #[serde(default = "default_persons_file")]
    pub persons: PathBuf,
    #[serde(default = "default_land_use_file")]
    pub land_use: PathBuf,
}

impl Default for InputTables {
    fn default() -> Self {
        InputTables {
            households: default_households_file(),
            persons: default_persons_file(),
            land_use: default_land_use_file(),
        }
    }
}

/// Have this extra layer of log level enum, as tracing subscriber has no
/// off/none option by default. At least it can't be parsed
#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub enum Logging {
    None,
    #[default]
    Info,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            households_sample_size: 0,
            chunk_size: 0,
            trace_hh_id: None,
            trace_od: None,
            check_for_variability: false,
            rng_base_seed: 0,
            input_tables: InputTables::default(),
            models: Vec::new(),
            resume_after: None,
            output_tables: Vec::new(),
            logging: Logging::default(),
        }
    }
}

impl Settings {
    /// Reads `<configs_dir>/settings.yaml`.
    pub fn load(configs_dir: &Path) -> Result<Self> {
        let path = configs_dir.join(SETTINGS_FILE);
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(AsimError::io(path))?;
        let deserializer = serde_yaml::Deserializer::from_reader(BufReader::new(file));
        serde_path_to_error::deserialize(deserializer).map_err(|source| AsimError::Settings {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn set_households_sample_size(mut self, households_sample_size: usize) -> Self {
        self.households_sample_size = households_sample_size;
        self
    }

    pub fn set_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn set_trace_hh_id(mut self, trace_hh_id: Option<i64>) -> Self {
        self.trace_hh_id = trace_hh_id;
        self
    }

    pub fn set_trace_od(mut self, trace_od: Option<TraceOd>) -> Self {
        self.trace_od = trace_od;
        self
    }

    pub fn set_check_for_variability(mut self, check_for_variability: bool) -> Self {
        self.check_for_variability = check_for_variability;
        self
    }

    pub fn set_rng_base_seed(mut self, rng_base_seed: u64) -> Self {
        self.rng_base_seed = rng_base_seed;
        self
    }

    /// Apply generic key-value overrides, e.g. `chunk_size=10`. Unknown keys are an error.
    pub fn apply_overrides(&mut self, overrides: &[(String, String)]) -> Result<()> {
        if !overrides.is_empty() {
            info!("Applying overrides: {:?}", overrides);
        }
        for (key, value) in overrides {
            self.apply_override(key, value)?;
        }
        Ok(())
    }

    pub fn apply_override(&mut self, key: &str, value: &str) -> Result<()> {
        let handler = inventory::iter::<OverrideHandler>()
            .find(|h| h.key == key)
            .ok_or_else(|| AsimError::UnknownSetting(key.to_string()))?;
        (handler.apply)(self, value)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| AsimError::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// `none`, `null`, `~` and the empty string clear an optional setting.
fn parse_optional<T: std::str::FromStr>(key: &str, value: &str) -> Result<Option<T>> {
    match value.trim() {
        "" | "~" | "none" | "None" | "null" => Ok(None),
        v => parse_value(key, v).map(Some),
    }
}

register_override!("households_sample_size", |settings, value| {
    settings.households_sample_size = parse_value("households_sample_size", value)?;
    Ok(())
});

register_override!("chunk_size", |settings, value| {
    settings.chunk_size = parse_value("chunk_size", value)?;
    Ok(())
});

register_override!("trace_hh_id", |settings, value| {
    settings.trace_hh_id = parse_optional("trace_hh_id", value)?;
    Ok(())
});

register_override!("trace_od", |settings, value| {
    let invalid = || AsimError::InvalidSetting {
        key: "trace_od".to_string(),
        value: value.to_string(),
    };
    let trimmed = value.trim().trim_start_matches('[').trim_end_matches(']');
    if parse_optional::<i64>("trace_od", trimmed).is_ok_and(|v| v.is_none()) {
        settings.trace_od = None;
        return Ok(());
    }
    let (orig, dest) = trimmed.split_once(',').ok_or_else(invalid)?;
    settings.trace_od = Some(TraceOd {
        orig: orig.trim().parse().map_err(|_| invalid())?,
        dest: dest.trim().parse().map_err(|_| invalid())?,
    });
    Ok(())
});

register_override!("check_for_variability", |settings, value| {
    settings.check_for_variability = parse_value("check_for_variability", value)?;
    Ok(())
});

register_override!("rng_base_seed", |settings, value| {
    settings.rng_base_seed = parse_value("rng_base_seed", value)?;
    Ok(())
});

register_override!("resume_after", |settings, value| {
    settings.resume_after = parse_optional("resume_after", value)?;
    Ok(())
});

register_override!("logging", |settings, value| {
    settings.logging = match value.trim().to_lowercase().as_str() {
        "none" => Logging::None,
        "info" => Logging::Info,
        _ => {
            return Err(AsimError::InvalidSetting {
                key: "logging".to_string(),
                value: value.to_string(),
            });
        }
    };
    Ok(())
});

fn default_households_file() -> PathBuf {
    PathBuf::from("households.csv")
}

fn default_persons_file() -> PathBuf {
    PathBuf::from("persons.csv")
}

fn default_land_use_file() -> PathBuf {
    PathBuf::from("land_use.csv")
}
