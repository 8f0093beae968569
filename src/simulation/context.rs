use std::path::{Path, PathBuf};

use ahash::HashMap;
use derive_builder::Builder;
use once_cell::unsync::OnceCell;
use tracing::debug;

use crate::simulation::config::{Settings, TraceOd};
use crate::simulation::error::{AsimError, Result};
use crate::simulation::io::resolve_path;
use crate::simulation::population;
use crate::simulation::table::Table;

/// A named value that can be registered with and resolved from a [`PipelineContext`].
#[derive(Debug, Clone, PartialEq)]
pub enum Injectable {
    Path(PathBuf),
    Settings(Box<Settings>),
    Int(i64),
    Bool(bool),
    Text(String),
    ZonePair(TraceOd),
    Null,
}

impl From<PathBuf> for Injectable {
    fn from(value: PathBuf) -> Self {
        Injectable::Path(value)
    }
}

impl From<&Path> for Injectable {
    fn from(value: &Path) -> Self {
        Injectable::Path(value.to_path_buf())
    }
}

impl From<Settings> for Injectable {
    fn from(value: Settings) -> Self {
        Injectable::Settings(Box::new(value))
    }
}

impl From<i64> for Injectable {
    fn from(value: i64) -> Self {
        Injectable::Int(value)
    }
}

impl From<bool> for Injectable {
    fn from(value: bool) -> Self {
        Injectable::Bool(value)
    }
}

impl From<&str> for Injectable {
    fn from(value: &str) -> Self {
        Injectable::Text(value.to_string())
    }
}

impl<T: Into<Injectable>> From<Option<T>> for Injectable {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Injectable::Null)
    }
}

impl From<TraceOd> for Injectable {
    fn from(value: TraceOd) -> Self {
        Injectable::ZonePair(value)
    }
}

/// Settings are unsigned; injectables expose them as `Int` and refuse values that do not fit.
fn int_injectable<T>(key: &str, value: T) -> Result<Injectable>
where
    T: TryInto<i64> + ToString + Copy,
{
    value
        .try_into()
        .map(Injectable::Int)
        .map_err(|_| AsimError::InvalidSetting {
            key: key.to_string(),
            value: value.to_string(),
        })
}

#[derive(Debug, Default)]
struct InputCache {
    land_use: OnceCell<Table>,
    households: OnceCell<Table>,
    persons: OnceCell<Table>,
}

/// Everything a pipeline run resolves its inputs from: directories, settings, additional named
/// values and the lazily loaded input tables. One context belongs to one pipeline run.
#[derive(Debug, Builder)]
#[builder(pattern = "owned")]
pub struct PipelineContext {
    #[builder(setter(into))]
    configs_dir: PathBuf,
    #[builder(setter(into))]
    data_dir: PathBuf,
    #[builder(setter(into))]
    output_dir: PathBuf,
    #[builder(default)]
    settings: Settings,
    #[builder(setter(skip))]
    injectables: HashMap<String, Injectable>,
    #[builder(setter(skip))]
    cache: InputCache,
}

impl PipelineContext {
    /// Creates a context with the settings read from `<configs_dir>/settings.yaml`.
    pub fn new(
        configs_dir: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let configs_dir = configs_dir.into();
        let settings = Settings::load(&configs_dir)?;
        Ok(PipelineContext {
            configs_dir,
            data_dir: data_dir.into(),
            output_dir: output_dir.into(),
            settings,
            injectables: HashMap::default(),
            cache: InputCache::default(),
        })
    }

    pub fn configs_dir(&self) -> &Path {
        &self.configs_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replaces the settings wholesale. Cached input tables are dropped as they depend on them.
    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
        self.clear_cache();
    }

    /// Registers a value. Directories, `settings` and the individual settings keys update the
    /// typed fields; any other name is stored as an additional injectable.
    pub fn add_injectable(&mut self, name: &str, value: impl Into<Injectable>) -> Result<()> {
        let value = value.into();
        let type_error = |expected| AsimError::InjectableType {
            name: name.to_string(),
            expected,
        };
        match name {
            "configs_dir" | "data_dir" | "output_dir" => {
                let Injectable::Path(path) = value else {
                    return Err(type_error("path"));
                };
                match name {
                    "configs_dir" => self.configs_dir = path,
                    "data_dir" => {
                        self.data_dir = path;
                        self.clear_cache();
                    }
                    _ => self.output_dir = path,
                }
            }
            "settings" => {
                let Injectable::Settings(settings) = value else {
                    return Err(type_error("settings document"));
                };
                self.set_settings(*settings);
            }
            "households_sample_size" | "chunk_size" => {
                let size = match value {
                    Injectable::Int(v) if v >= 0 => v as usize,
                    _ => return Err(type_error("non negative integer")),
                };
                if name == "chunk_size" {
                    self.settings.chunk_size = size;
                } else {
                    self.settings.households_sample_size = size;
                    self.clear_cache();
                }
            }
            "trace_hh_id" => {
                self.settings.trace_hh_id = match value {
                    Injectable::Int(v) => Some(v),
                    Injectable::Null => None,
                    _ => return Err(type_error("household id")),
                };
            }
            "trace_od" => {
                self.settings.trace_od = match value {
                    Injectable::ZonePair(od) => Some(od),
                    Injectable::Null => None,
                    _ => return Err(type_error("zone pair")),
                };
            }
            "check_for_variability" => {
                let Injectable::Bool(v) = value else {
                    return Err(type_error("boolean"));
                };
                self.settings.check_for_variability = v;
            }
            _ => {
                self.injectables.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    pub fn get_injectable(&self, name: &str) -> Result<Injectable> {
        let settings = &self.settings;
        let value: Injectable = match name {
            "configs_dir" => self.configs_dir.clone().into(),
            "data_dir" => self.data_dir.clone().into(),
            "output_dir" => self.output_dir.clone().into(),
            "settings" => settings.clone().into(),
            "households_sample_size" => {
                int_injectable(name, settings.households_sample_size)?
            }
            "chunk_size" => int_injectable(name, settings.chunk_size)?,
            "trace_hh_id" => settings.trace_hh_id.into(),
            "trace_od" => settings.trace_od.into(),
            "check_for_variability" => settings.check_for_variability.into(),
            "rng_base_seed" => int_injectable(name, settings.rng_base_seed)?,
            _ => self
                .injectables
                .get(name)
                .cloned()
                .ok_or_else(|| AsimError::UnknownInjectable(name.to_string()))?,
        };
        Ok(value)
    }

    /// Drops every cached input table. The next access reloads it from the data directory.
    pub fn clear_cache(&mut self) {
        debug!("Clearing input table cache");
        self.cache = InputCache::default();
    }

    pub fn land_use(&self) -> Result<&Table> {
        self.cache.land_use.get_or_try_init(|| {
            population::load_land_use(&self.input_path(&self.settings.input_tables.land_use))
        })
    }

    /// The sampled households with the person counts `workers` and `num_children`.
    pub fn households(&self) -> Result<&Table> {
        self.cache.households.get_or_try_init(|| {
            let path = self.input_path(&self.settings.input_tables.households);
            let mut households =
                population::load_households(&path, self.settings.households_sample_size)?;
            let persons = self.persons_of(&households)?;
            population::add_household_person_counts(&mut households, persons)?;
            Ok(households)
        })
    }

    /// The persons of the sampled households.
    pub fn persons(&self) -> Result<&Table> {
        let households = self.households()?;
        self.persons_of(households)
    }

    fn persons_of(&self, households: &Table) -> Result<&Table> {
        self.cache.persons.get_or_try_init(|| {
            population::load_persons(
                &self.input_path(&self.settings.input_tables.persons),
                households,
            )
        })
    }

    fn input_path(&self, file: &Path) -> PathBuf {
        resolve_path(&self.data_dir, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_inputs(dir: &Path) {
        fs::write(
            dir.join("settings.yaml"),
            "households_sample_size: 1\nchunk_size: 0\n",
        )
        .unwrap();
        fs::write(
            dir.join("households.csv"),
            "HHID,TAZ,income,hhsize\n7,1,50000,1\n3,1,20000,1\n",
        )
        .unwrap();
        fs::write(
            dir.join("persons.csv"),
            "PERID,household_id,age,sex,pemploy,pstudent\n70,7,40,1,1,3\n30,3,22,1,3,2\n",
        )
        .unwrap();
    }

    #[test]
    fn settings_keys_resolve_as_injectables() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());
        let mut context = PipelineContext::new(dir.path(), dir.path(), dir.path()).unwrap();

        assert_eq!(context.get_injectable("chunk_size").unwrap(), Injectable::Int(0));
        context.add_injectable("chunk_size", 10_i64).unwrap();
        assert_eq!(context.get_injectable("chunk_size").unwrap(), Injectable::Int(10));
        assert_eq!(context.settings().chunk_size, 10);

        assert_eq!(context.get_injectable("trace_hh_id").unwrap(), Injectable::Null);
        context.add_injectable("trace_hh_id", Some(7_i64)).unwrap();
        assert_eq!(context.settings().trace_hh_id, Some(7_i64));

        assert!(matches!(
            context.add_injectable("chunk_size", "ten"),
            Err(AsimError::InjectableType { .. })
        ));
        assert!(matches!(
            context.get_injectable("nothing"),
            Err(AsimError::UnknownInjectable(_))
        ));

        context.add_injectable("scenario_name", "test").unwrap();
        assert_eq!(
            context.get_injectable("scenario_name").unwrap(),
            Injectable::Text("test".to_string())
        );
        assert_eq!(
            context.get_injectable("data_dir").unwrap(),
            Injectable::Path(dir.path().to_path_buf())
        );
    }

    #[test]
    fn seeds_beyond_int_range_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());
        let mut context = PipelineContext::new(dir.path(), dir.path(), dir.path()).unwrap();

        let settings = context.settings().clone().set_rng_base_seed(i64::MAX as u64);
        context.add_injectable("settings", settings).unwrap();
        assert_eq!(
            context.get_injectable("rng_base_seed").unwrap(),
            Injectable::Int(i64::MAX)
        );

        let settings = context.settings().clone().set_rng_base_seed(u64::MAX);
        context.add_injectable("settings", settings).unwrap();
        assert!(matches!(
            context.get_injectable("rng_base_seed"),
            Err(AsimError::InvalidSetting { key, .. }) if key == "rng_base_seed"
        ));
    }

    #[test]
    fn cache_follows_sample_size() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());
        let mut context = PipelineContext::new(dir.path(), dir.path(), dir.path()).unwrap();

        assert_eq!(context.households().unwrap().len(), 1);
        assert_eq!(context.persons().unwrap().index(), &[70]);

        context.add_injectable("households_sample_size", 2_i64).unwrap();
        assert_eq!(context.households().unwrap().len(), 2);
        assert_eq!(context.persons().unwrap().len(), 2);

        let settings = context.settings().clone().set_households_sample_size(1);
        context.add_injectable("settings", settings).unwrap();
        context.clear_cache();
        assert_eq!(context.households().unwrap().len(), 1);
    }
}
