use tracing::debug;

use crate::simulation::config::Settings;
use crate::simulation::error::{AsimError, Result};
use crate::simulation::models::choice::UtilityMatrix;
use crate::simulation::pipeline::store::TableStore;
use crate::simulation::random::RandomChannel;
use crate::simulation::table::Table;
use crate::simulation::trace::Tracer;

pub mod accessibility;
pub mod auto_ownership;
pub mod cdap;
pub mod choice;
pub mod chunk;
pub mod destination;
pub mod location_choice;
pub mod mode_choice;
pub mod scheduling;
#[cfg(test)]
pub(crate) mod test_support;
pub mod tour_frequency;
pub mod zones;

pub const ACCESSIBILITY: &str = "accessibility";
pub const TOURS: &str = "tours";
pub const TRIPS: &str = "trips";

/// The model steps of a full run, in execution order.
pub const DEFAULT_MODELS: [&str; 12] = [
    "compute_accessibility",
    "school_location_simulate",
    "workplace_location_simulate",
    "auto_ownership_simulate",
    "cdap_simulate",
    "mandatory_tour_frequency",
    "mandatory_scheduling",
    "non_mandatory_tour_frequency",
    "destination_choice",
    "non_mandatory_scheduling",
    "tour_mode_choice_simulate",
    "trip_mode_choice_simulate",
];

/// A named model step. Steps register themselves with [`register_step!`] and are looked up by
/// name when a pipeline runs its model list.
pub struct ModelStep {
    pub name: &'static str,
    pub run: fn(&mut StepContext<'_>) -> Result<()>,
}

inventory::collect!(ModelStep);

#[macro_export]
macro_rules! register_step {
    ($name:literal, $func:path) => {
        inventory::submit! {
            $crate::simulation::models::ModelStep {
                name: $name,
                run: $func,
            }
        }
    };
}

pub fn find_step(name: &str) -> Result<&'static ModelStep> {
    inventory::iter::<ModelStep>()
        .find(|s| s.name == name)
        .ok_or_else(|| AsimError::UnknownStep(name.to_string()))
}

/// What a running step sees of the pipeline: the settings, the pipeline tables, the tracer and
/// the step's random channel.
pub struct StepContext<'a> {
    step: &'static str,
    settings: &'a Settings,
    tables: &'a mut TableStore,
    tracer: &'a Tracer,
    channel: RandomChannel,
}

impl<'a> StepContext<'a> {
    pub fn new(
        step: &'static str,
        settings: &'a Settings,
        tables: &'a mut TableStore,
        tracer: &'a Tracer,
    ) -> Self {
        StepContext {
            step,
            settings,
            tables,
            tracer,
            channel: RandomChannel::new(settings.rng_base_seed, step),
        }
    }

    pub fn step_name(&self) -> &'static str {
        self.step
    }

    pub fn settings(&self) -> &Settings {
        self.settings
    }

    pub fn chunk_size(&self) -> usize {
        self.settings.chunk_size
    }

    pub fn channel(&self) -> &RandomChannel {
        &self.channel
    }

    pub fn tracer(&self) -> &Tracer {
        self.tracer
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables.get_mut(name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains(name)
    }

    pub fn put_table(&mut self, table: Table) {
        debug!("{} stores table {} with {} rows", self.step, table.name(), table.len());
        self.tables.insert(table);
    }

    /// Checks the utilities if variability checks are switched on, then draws the choices.
    pub fn simulate(&self, utilities: &UtilityMatrix) -> Result<Vec<usize>> {
        if self.settings.check_for_variability {
            utilities.check_for_variability()?;
        }
        utilities.simulate(&self.channel)
    }

    /// Traces the traced household's rows of a table into `<step>.<table>.csv`.
    pub fn trace_rows(&self, table_name: &str, household_column: Option<&str>) -> Result<()> {
        let table = self.tables.get(table_name)?;
        self.tracer.trace_household_rows(
            &format!("{}.{table_name}.csv", self.step),
            table,
            household_column,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_default_model_is_registered() {
        for name in DEFAULT_MODELS {
            assert_eq!(find_step(name).unwrap().name, name);
        }
        assert_eq!(inventory::iter::<ModelStep>().count(), DEFAULT_MODELS.len());
        assert!(matches!(find_step("nope"), Err(AsimError::UnknownStep(_))));
    }
}
