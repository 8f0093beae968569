use tracing::info;

use crate::simulation::error::Result;
use crate::simulation::models::choice::{UtilityMatrix, UNAVAILABLE};
use crate::simulation::models::chunk::for_each_chunk;
use crate::simulation::models::zones::Zones;
use crate::simulation::models::StepContext;
use crate::simulation::population::{ptype, HOUSEHOLDS, LAND_USE, PERSONS};
use crate::simulation::table::Column;

pub const SCHOOL_TAZ: &str = "school_taz";
pub const WORKPLACE_TAZ: &str = "workplace_taz";

/// Column value of persons that do not take part in a location choice.
pub const NO_LOCATION: i64 = -1;

const SAME_ZONE_BONUS: f64 = 0.3;

crate::register_step!("school_location_simulate", school_location_simulate);
crate::register_step!("workplace_location_simulate", workplace_location_simulate);

/// One long term location choice: who chooses, what attracts them, how far they are willing
/// to go.
struct LocationModel {
    chooser_flag: &'static str,
    size_term: &'static str,
    output: &'static str,
    distance_coefficient: fn(i64) -> f64,
}

fn school_distance_coefficient(person_type: i64) -> f64 {
    match person_type {
        ptype::UNIVERSITY_STUDENT => -0.25,
        ptype::DRIVING_AGE_STUDENT => -0.45,
        _ => -0.6,
    }
}

fn work_distance_coefficient(person_type: i64) -> f64 {
    match person_type {
        ptype::FULL_TIME_WORKER => -0.12,
        _ => -0.18,
    }
}

pub fn school_location_simulate(ctx: &mut StepContext) -> Result<()> {
    simulate_location(
        ctx,
        &LocationModel {
            chooser_flag: "is_student",
            size_term: "ENROLL",
            output: SCHOOL_TAZ,
            distance_coefficient: school_distance_coefficient,
        },
    )
}

pub fn workplace_location_simulate(ctx: &mut StepContext) -> Result<()> {
    simulate_location(
        ctx,
        &LocationModel {
            chooser_flag: "is_worker",
            size_term: "TOTEMP",
            output: WORKPLACE_TAZ,
            distance_coefficient: work_distance_coefficient,
        },
    )
}

fn simulate_location(ctx: &mut StepContext, model: &LocationModel) -> Result<()> {
    let persons = ctx.table(PERSONS)?;
    let households = ctx.table(HOUSEHOLDS)?;
    let zones = Zones::new(ctx.table(LAND_USE)?)?;

    let size = zones.ints(model.size_term)?;
    let size_term: Vec<f64> = size
        .iter()
        .map(|&s| if s > 0 { (s as f64).ln() } else { UNAVAILABLE })
        .collect();
    let alternatives: Vec<String> = zones.ids().iter().map(|z| z.to_string()).collect();

    let flags = persons.ints(model.chooser_flag)?;
    let household_ids = persons.ints("household_id")?;
    let person_types = persons.ints("ptype")?;
    let choosers: Vec<usize> = (0..persons.len()).filter(|&p| flags[p] == 1).collect();

    let chosen = for_each_chunk(ctx.step_name(), &choosers, ctx.chunk_size(), |chunk| {
        let mut utilities =
            UtilityMatrix::with_capacity(ctx.step_name(), alternatives.clone(), chunk.len());
        for &p in chunk {
            let home = zones.position(households.get_int("TAZ", household_ids[p])?)?;
            let beta = (model.distance_coefficient)(person_types[p]);
            utilities.push_row(
                persons.index()[p],
                (0..zones.len()).map(|d| {
                    let bonus = if d == home { SAME_ZONE_BONUS } else { 0.0 };
                    size_term[d] + beta * zones.distance(home, d) + bonus
                }),
            );
        }
        ctx.simulate(&utilities)
    })?;

    let mut location = vec![NO_LOCATION; persons.len()];
    for (&p, &alternative) in choosers.iter().zip(&chosen) {
        location[p] = zones.ids()[alternative];
    }
    info!(
        "{}: {} of {} persons chose a location",
        ctx.step_name(),
        choosers.len(),
        persons.len()
    );

    ctx.table_mut(PERSONS)?
        .set_column(model.output, Column::Int(location))?;
    ctx.trace_rows(PERSONS, Some("household_id"))
}
