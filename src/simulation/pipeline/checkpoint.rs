use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::simulation::config::Settings;
use crate::simulation::error::{AsimError, Result};
use crate::simulation::table::Table;

pub const CHECKPOINT_DIR: &str = "pipeline";
pub const CHECKPOINT_LOG: &str = "checkpoints.json";
pub const CHECKPOINT_VERSION: u16 = 1;

/// Name of the checkpoint holding the input tables.
pub const INIT_CHECKPOINT: &str = "init";

/// A completed step and the snapshot files of the tables it changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub sequence: usize,
    pub step: String,
    /// Table name to snapshot file name, relative to the checkpoint directory.
    pub tables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointLog {
    version: u16,
    households_sample_size: usize,
    rng_base_seed: u64,
    closed: bool,
    checkpoints: Vec<Checkpoint>,
}

/// The checkpoint log of a pipeline run and its table snapshots, stored in
/// `<output_dir>/pipeline`. The log is rewritten atomically after each checkpoint.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
    log: CheckpointLog,
}

impl CheckpointStore {
    /// Starts an empty log, removing the checkpoints of any previous run.
    pub fn create(output_dir: &Path, settings: &Settings) -> Result<Self> {
        let dir = output_dir.join(CHECKPOINT_DIR);
        if dir.exists() {
            debug!("Removing previous checkpoints in {dir:?}");
            fs::remove_dir_all(&dir).map_err(AsimError::io(&dir))?;
        }
        fs::create_dir_all(&dir).map_err(AsimError::io(&dir))?;
        let store = CheckpointStore {
            dir,
            log: CheckpointLog {
                version: CHECKPOINT_VERSION,
                households_sample_size: settings.households_sample_size,
                rng_base_seed: settings.rng_base_seed,
                closed: false,
                checkpoints: Vec::new(),
            },
        };
        store.write_log()?;
        Ok(store)
    }

    /// Opens the log of an earlier run.
    pub fn open(output_dir: &Path) -> Result<Self> {
        let dir = output_dir.join(CHECKPOINT_DIR);
        let path = dir.join(CHECKPOINT_LOG);
        let file = File::open(&path).map_err(AsimError::io(&path))?;
        let log: CheckpointLog = serde_json::from_reader(BufReader::new(file))?;
        if log.version != CHECKPOINT_VERSION {
            return Err(AsimError::CheckpointVersion {
                found: log.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        info!(
            "Opened checkpoint log {path:?} with {} checkpoints",
            log.checkpoints.len()
        );
        Ok(CheckpointStore { dir, log })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.log.checkpoints
    }

    pub fn is_closed(&self) -> bool {
        self.log.closed
    }

    /// Fails if the checkpoints were written with a different sample or random seed, as their
    /// tables could not be continued with the current settings.
    pub fn check_compatible(&self, settings: &Settings) -> Result<()> {
        if self.log.households_sample_size != settings.households_sample_size {
            return Err(AsimError::IncompatibleCheckpoint {
                setting: "households_sample_size",
                stored: self.log.households_sample_size.to_string(),
                current: settings.households_sample_size.to_string(),
            });
        }
        if self.log.rng_base_seed != settings.rng_base_seed {
            return Err(AsimError::IncompatibleCheckpoint {
                setting: "rng_base_seed",
                stored: self.log.rng_base_seed.to_string(),
                current: settings.rng_base_seed.to_string(),
            });
        }
        Ok(())
    }

    /// Snapshots `tables` into `<table>.<sequence>.<step>.json.gz` and appends a checkpoint for
    /// `step`.
    pub fn write_checkpoint(&mut self, step: &str, tables: &[&Table]) -> Result<()> {
        let sequence = self.log.checkpoints.len();
        let mut files = BTreeMap::new();
        for table in tables {
            let file_name = format!("{}.{sequence}.{step}.json.gz", table.name());
            write_snapshot(&self.dir.join(&file_name), table)?;
            files.insert(table.name().to_string(), file_name);
        }
        let checkpoint = Checkpoint {
            sequence,
            step: step.to_string(),
            tables: files,
        };
        debug!("Writing checkpoint {checkpoint:?}");
        self.log.checkpoints.push(checkpoint);
        self.log.closed = false;
        self.write_log()
    }

    /// Drops every checkpoint after the last one of `step` and returns the tables as they were
    /// at that checkpoint.
    pub fn resume_after(&mut self, step: &str) -> Result<Vec<Table>> {
        let position = self
            .log
            .checkpoints
            .iter()
            .rposition(|c| c.step == step)
            .ok_or_else(|| AsimError::MissingCheckpoint(step.to_string()))?;

        let mut latest: BTreeMap<&str, &str> = BTreeMap::new();
        for checkpoint in &self.log.checkpoints[..=position] {
            for (table, file) in &checkpoint.tables {
                latest.insert(table.as_str(), file.as_str());
            }
        }
        let tables = latest
            .values()
            .map(|file| read_snapshot(&self.dir.join(file)))
            .collect::<Result<Vec<_>>>()?;

        let dropped = self.log.checkpoints.len() - position - 1;
        self.log.checkpoints.truncate(position + 1);
        self.log.closed = false;
        self.write_log()?;
        info!(
            "Resuming after checkpoint {step}: loaded {} tables, dropped {dropped} later checkpoints",
            tables.len()
        );
        Ok(tables)
    }

    /// Marks the log as belonging to a finished run.
    pub fn close(&mut self) -> Result<()> {
        self.log.closed = true;
        self.write_log()
    }

    fn write_log(&self) -> Result<()> {
        let path = self.dir.join(CHECKPOINT_LOG);
        let mut file = NamedTempFile::new_in(&self.dir).map_err(AsimError::io(&self.dir))?;
        serde_json::to_writer_pretty(&mut file, &self.log)?;
        file.flush().map_err(AsimError::io(&path))?;
        file.persist(&path)
            .map_err(|e| AsimError::io(&path)(e.error))?;
        Ok(())
    }
}

pub fn write_snapshot(path: &Path, table: &Table) -> Result<()> {
    let file = File::create(path).map_err(AsimError::io(path))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::fast());
    serde_json::to_writer(&mut encoder, table)?;
    encoder
        .finish()
        .and_then(|mut writer| writer.flush())
        .map_err(AsimError::io(path))?;
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<Table> {
    let file = File::open(path).map_err(AsimError::io(path))?;
    let table = serde_json::from_reader(GzDecoder::new(BufReader::new(file)))?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::table::Column;

    fn table(name: &str, values: Vec<i64>) -> Table {
        let index = (1..=values.len() as i64).collect();
        let mut t = Table::new(name, "id", index).unwrap();
        t.set_column("value", Column::Int(values)).unwrap();
        t
    }

    #[test]
    fn snapshot_keeps_schema_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.init.json.gz");
        let mut t = table("households", vec![3, 4]);
        t.set_column("mode", Column::Str(vec!["WALK".into(), "BIKE".into()]))
            .unwrap();
        t.set_column("cost", Column::Float(vec![0.5, 1.25])).unwrap();
        write_snapshot(&path, &t).unwrap();
        assert_eq!(read_snapshot(&path).unwrap(), t);
    }

    #[test]
    fn resume_loads_latest_snapshot_per_table() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default();
        let mut store = CheckpointStore::create(dir.path(), &settings).unwrap();
        store
            .write_checkpoint(
                INIT_CHECKPOINT,
                &[&table("households", vec![0, 0]), &table("persons", vec![1])],
            )
            .unwrap();
        store
            .write_checkpoint("a", &[&table("households", vec![1, 1])])
            .unwrap();
        store
            .write_checkpoint("b", &[&table("households", vec![2, 2])])
            .unwrap();

        let mut reopened = CheckpointStore::open(dir.path()).unwrap();
        assert_eq!(reopened.checkpoints().len(), 3);
        let tables = reopened.resume_after("a").unwrap();
        assert_eq!(tables.len(), 2);
        let households = tables.iter().find(|t| t.name() == "households").unwrap();
        assert_eq!(households.ints("value").unwrap(), &[1, 1]);

        let steps: Vec<_> = CheckpointStore::open(dir.path())
            .unwrap()
            .checkpoints()
            .iter()
            .map(|c| c.step.clone())
            .collect();
        assert_eq!(steps, vec![INIT_CHECKPOINT, "a"]);
        assert!(matches!(
            reopened.resume_after("b"),
            Err(AsimError::MissingCheckpoint(_))
        ));
    }

    #[test]
    fn refuses_other_sample_or_seed() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default().set_households_sample_size(100);
        CheckpointStore::create(dir.path(), &settings).unwrap();
        let store = CheckpointStore::open(dir.path()).unwrap();
        assert!(store.check_compatible(&settings).is_ok());
        assert!(matches!(
            store.check_compatible(&settings.clone().set_households_sample_size(101)),
            Err(AsimError::IncompatibleCheckpoint {
                setting: "households_sample_size",
                ..
            })
        ));
        assert!(matches!(
            store.check_compatible(&settings.clone().set_rng_base_seed(9)),
            Err(AsimError::IncompatibleCheckpoint {
                setting: "rng_base_seed",
                ..
            })
        ));
    }

    #[test]
    fn rejects_unknown_log_version() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline_dir = dir.path().join(CHECKPOINT_DIR);
        fs::create_dir_all(&pipeline_dir).unwrap();
        fs::write(
            pipeline_dir.join(CHECKPOINT_LOG),
            r#"{"version":99,"households_sample_size":0,"rng_base_seed":0,"closed":false,"checkpoints":[]}"#,
        )
        .unwrap();
        assert!(matches!(
            CheckpointStore::open(dir.path()),
            Err(AsimError::CheckpointVersion { found: 99, .. })
        ));
    }

    #[test]
    fn create_removes_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default();
        let mut store = CheckpointStore::create(dir.path(), &settings).unwrap();
        store
            .write_checkpoint(INIT_CHECKPOINT, &[&table("persons", vec![1])])
            .unwrap();
        store.close().unwrap();
        assert!(CheckpointStore::open(dir.path()).unwrap().is_closed());
        assert!(store.dir().join("persons.0.init.json.gz").exists());

        let store = CheckpointStore::create(dir.path(), &settings).unwrap();
        assert!(store.checkpoints().is_empty());
        assert!(!store.dir().join("persons.0.init.json.gz").exists());
    }

    #[test]
    fn repeated_step_keeps_every_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CheckpointStore::create(dir.path(), &Settings::default()).unwrap();
        store
            .write_checkpoint(INIT_CHECKPOINT, &[&table("households", vec![0])])
            .unwrap();
        store
            .write_checkpoint("a", &[&table("households", vec![1])])
            .unwrap();
        store
            .write_checkpoint("a", &[&table("households", vec![2])])
            .unwrap();

        let files: Vec<_> = store
            .checkpoints()
            .iter()
            .map(|c| c.tables["households"].clone())
            .collect();
        assert_eq!(
            files,
            vec![
                "households.0.init.json.gz",
                "households.1.a.json.gz",
                "households.2.a.json.gz"
            ]
        );
        let first = read_snapshot(&store.dir().join(&files[1])).unwrap();
        assert_eq!(first.ints("value").unwrap(), &[1]);

        let tables = store.resume_after("a").unwrap();
        assert_eq!(tables[0].ints("value").unwrap(), &[2]);
        assert_eq!(store.checkpoints().len(), 3);
    }
}
