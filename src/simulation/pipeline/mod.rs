use std::fs;
use std::time::Instant;

use tracing::{info, info_span, warn};

use crate::simulation::context::PipelineContext;
use crate::simulation::error::{AsimError, Result};
use crate::simulation::io::csv_table::write_table;
use crate::simulation::models::{find_step, ModelStep, StepContext};
use crate::simulation::pipeline::checkpoint::{Checkpoint, CheckpointStore, INIT_CHECKPOINT};
use crate::simulation::pipeline::store::TableStore;
use crate::simulation::population::{unknown_home_zones, LAND_USE, ZONE_INDEX};
use crate::simulation::table::Table;
use crate::simulation::trace::Tracer;

pub mod checkpoint;
pub mod store;

/// An open pipeline run: the context it resolves inputs from, the current tables and the
/// checkpoint log. Consumed by [`Pipeline::close`].
#[derive(Debug)]
pub struct Pipeline {
    context: PipelineContext,
    tables: TableStore,
    store: CheckpointStore,
    tracer: Tracer,
}

impl Pipeline {
    /// Runs `models` in order. With `resume_after` the pipeline continues from the last
    /// checkpoint of that step and only the steps after its last occurrence in `models` are run. The pipeline stays open so tables can be inspected.
    pub fn run<S: AsRef<str>>(
        context: PipelineContext,
        models: &[S],
        resume_after: Option<&str>,
    ) -> Result<Pipeline> {
        let steps = models
            .iter()
            .map(|name| find_step(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let skip = match resume_after {
            None | Some(INIT_CHECKPOINT) => 0,
            Some(point) => {
                steps
                    .iter()
                    .rposition(|s| s.name == point)
                    .ok_or_else(|| AsimError::InvalidResumePoint(point.to_string()))?
                    + 1
            }
        };

        let mut pipeline = Pipeline::start_pipeline(context, resume_after)?;
        for step in &steps[skip..] {
            pipeline.run_step(step)?;
        }
        Ok(pipeline)
    }

    /// Opens a pipeline. Without a resume point all checkpoints of earlier runs are removed and
    /// the input tables are loaded into a fresh `init` checkpoint. With a resume point the tables
    /// are restored from the checkpoint log as they were after that step.
    pub fn start_pipeline(context: PipelineContext, resume_after: Option<&str>) -> Result<Pipeline> {
        let output_dir = context.output_dir();
        fs::create_dir_all(output_dir).map_err(AsimError::io(output_dir))?;
        let tracer = Tracer::new(context.settings(), output_dir);

        let (tables, store) = match resume_after {
            None => Self::load_inputs(&context, &tracer)?,
            Some(point) => {
                let mut store = CheckpointStore::open(output_dir)?;
                store.check_compatible(context.settings())?;
                let mut tables = TableStore::default();
                tables.restore(store.resume_after(point)?);
                (tables, store)
            }
        };

        Ok(Pipeline {
            context,
            tables,
            store,
            tracer,
        })
    }

    fn load_inputs(context: &PipelineContext, tracer: &Tracer) -> Result<(TableStore, CheckpointStore)> {
        let land_use = context.land_use()?.clone();
        let households = context.households()?.clone();
        let persons = context.persons()?.clone();

        if let Some(&zone) = unknown_home_zones(&households, &land_use)?.iter().min() {
            return Err(AsimError::MissingIndex {
                table: LAND_USE.to_string(),
                index_name: ZONE_INDEX.to_string(),
                id: zone,
            });
        }
        info!(
            "Loaded {} zones, {} households and {} persons",
            land_use.len(),
            households.len(),
            persons.len()
        );
        tracer.trace_household_rows("init.households.csv", &households, None)?;
        tracer.trace_household_rows("init.persons.csv", &persons, Some("household_id"))?;

        let mut store = CheckpointStore::create(context.output_dir(), context.settings())?;
        store.write_checkpoint(INIT_CHECKPOINT, &[&land_use, &households, &persons])?;

        let mut tables = TableStore::default();
        tables.restore([land_use, households, persons]);
        Ok((tables, store))
    }

    /// Runs a single registered step against the current tables and checkpoints it.
    pub fn run_model(&mut self, name: &str) -> Result<()> {
        let step = find_step(name)?;
        self.run_step(step)
    }

    fn run_step(&mut self, step: &'static ModelStep) -> Result<()> {
        let _span = info_span!("step", name = step.name).entered();
        let start = Instant::now();

        let mut ctx = StepContext::new(
            step.name,
            self.context.settings(),
            &mut self.tables,
            &self.tracer,
        );
        (step.run)(&mut ctx)?;

        let dirty = self.tables.take_dirty();
        let changed = dirty
            .iter()
            .map(|name| self.tables.get(name))
            .collect::<Result<Vec<_>>>()?;
        self.store.write_checkpoint(step.name, &changed)?;

        info!(
            "Finished {} in {}ms, changed tables {:?}",
            step.name,
            start.elapsed().as_millis(),
            dirty
        );
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.names()
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        self.store.checkpoints()
    }

    /// Writes the configured output tables as `final_<name>.csv` and closes the checkpoint log.
    pub fn close(mut self) -> Result<()> {
        let output_dir = self.context.output_dir();
        for name in &self.context.settings().output_tables {
            match self.tables.get(name) {
                Ok(table) => {
                    let path = output_dir.join(format!("final_{name}.csv"));
                    write_table(table, &path)?;
                    info!("Wrote {} rows of {name} to {path:?}", table.len());
                }
                Err(_) => warn!("Output table {name} does not exist in the pipeline"),
            }
        }
        self.store.close()?;
        info!("Closed pipeline after {} checkpoints", self.store.checkpoints().len());
        Ok(())
    }
}
