use itertools::Itertools;
use tracing::info;

use crate::simulation::error::Result;
use crate::simulation::models::auto_ownership::AUTO_OWNERSHIP;
use crate::simulation::models::choice::{UtilityMatrix, UNAVAILABLE};
use crate::simulation::models::chunk::for_each_chunk;
use crate::simulation::models::StepContext;
use crate::simulation::population::{ptype, HOUSEHOLDS, PERSONS};
use crate::simulation::table::Column;

pub const CDAP_ACTIVITY: &str = "cdap_activity";

pub const MANDATORY: &str = "M";
pub const NON_MANDATORY: &str = "N";
pub const HOME: &str = "H";

const ACTIVITIES: [&str; 3] = [MANDATORY, NON_MANDATORY, HOME];

/// Constants by person type 1 to 8.
const MANDATORY_ASC: [f64; 8] = [2.5, 1.0, 1.5, 0.0, 0.0, 2.8, 3.0, 1.0];
const NON_MANDATORY_ASC: [f64; 8] = [0.2, 0.8, 0.6, 1.1, 0.9, 0.3, 0.2, 0.5];

const NO_CAR_MANDATORY: f64 = -0.3;
const CAR_NON_MANDATORY: f64 = 0.4;
const CHILDREN_NON_MANDATORY: f64 = 0.2;

crate::register_step!("cdap_simulate", cdap_simulate);

fn is_adult_worker(person_type: i64) -> bool {
    matches!(
        person_type,
        ptype::FULL_TIME_WORKER | ptype::PART_TIME_WORKER
    )
}

/// Coordinated daily activity pattern: every person is assigned a mandatory (`M`),
/// non-mandatory (`N`) or stay at home (`H`) day. Only workers and students can have a
/// mandatory day.
pub fn cdap_simulate(ctx: &mut StepContext) -> Result<()> {
    let persons = ctx.table(PERSONS)?;
    let households = ctx.table(HOUSEHOLDS)?;

    let household_ids = persons.ints("household_id")?;
    let person_types = persons.ints("ptype")?;
    let is_worker = persons.ints("is_worker")?;
    let is_student = persons.ints("is_student")?;
    let alternatives: Vec<String> = ACTIVITIES.iter().map(|a| a.to_string()).collect();

    let positions: Vec<usize> = (0..persons.len()).collect();
    let chosen = for_each_chunk(ctx.step_name(), &positions, ctx.chunk_size(), |chunk| {
        let mut utilities =
            UtilityMatrix::with_capacity(ctx.step_name(), alternatives.clone(), chunk.len());
        for &p in chunk {
            let household = household_ids[p];
            let cars = households.get_int(AUTO_OWNERSHIP, household)?;
            let children = households.get_int("num_children", household)?;
            let t = (person_types[p].clamp(1, 8) - 1) as usize;

            let mandatory = if is_worker[p] == 1 || is_student[p] == 1 {
                let no_car = if cars == 0 && is_adult_worker(person_types[p]) {
                    NO_CAR_MANDATORY
                } else {
                    0.0
                };
                MANDATORY_ASC[t] + no_car
            } else {
                UNAVAILABLE
            };
            let non_mandatory = NON_MANDATORY_ASC[t]
                + if cars > 0 { CAR_NON_MANDATORY } else { 0.0 }
                + if children > 0 { CHILDREN_NON_MANDATORY } else { 0.0 };
            utilities.push_row(persons.index()[p], [mandatory, non_mandatory, 0.0]);
        }
        ctx.simulate(&utilities)
    })?;

    let activities: Vec<String> = chosen
        .into_iter()
        .map(|a| ACTIVITIES[a].to_string())
        .collect();
    let counts = activities.iter().counts();
    info!("{}: activity patterns {counts:?}", ctx.step_name());

    ctx.table_mut(PERSONS)?
        .set_column(CDAP_ACTIVITY, Column::Str(activities))?;
    ctx.trace_rows(PERSONS, Some("household_id"))
}
