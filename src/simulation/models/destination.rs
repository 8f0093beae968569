use tracing::info;

use crate::simulation::error::Result;
use crate::simulation::models::choice::{UtilityMatrix, UNAVAILABLE};
use crate::simulation::models::chunk::group_chunks;
use crate::simulation::models::tour_frequency::NON_MANDATORY_CATEGORY;
use crate::simulation::models::zones::Zones;
use crate::simulation::models::{StepContext, TOURS};
use crate::simulation::population::LAND_USE;
use crate::simulation::table::Column;

crate::register_step!("destination_choice", destination_choice);

/// Land use columns that make up the attraction of a destination for a tour type.
fn size_terms(tour_type: &str) -> &'static [&'static str] {
    match tour_type {
        "escort" => &["ENROLL", "TOTHH"],
        "othdiscr" => &["TOTPOP", "TOTEMP"],
        "social" => &["TOTHH"],
        _ => &["TOTEMP"],
    }
}

fn distance_coefficient(tour_type: &str) -> f64 {
    match tour_type {
        "escort" => -0.5,
        "shopping" => -0.35,
        "othmaint" | "eatout" => -0.3,
        "othdiscr" => -0.25,
        _ => -0.2,
    }
}

/// Destination of every non-mandatory tour, by zone size and distance from the tour origin.
pub fn destination_choice(ctx: &mut StepContext) -> Result<()> {
    let tours = ctx.table(TOURS)?;
    let zones = Zones::new(ctx.table(LAND_USE)?)?;
    let category = tours.strs("tour_category")?;
    let tour_types = tours.strs("tour_type")?;
    let origins = tours.ints("origin")?;
    let person_ids = tours.ints("person_id")?;
    let alternatives: Vec<String> = zones.ids().iter().map(|z| z.to_string()).collect();

    let choosers: Vec<usize> = (0..tours.len())
        .filter(|&t| category[t] == NON_MANDATORY_CATEGORY)
        .collect();
    let keys: Vec<i64> = choosers.iter().map(|&t| person_ids[t]).collect();

    let mut destination = tours.ints("destination")?.to_vec();
    for chunk in group_chunks(&choosers, &keys, ctx.chunk_size()) {
        let mut utilities =
            UtilityMatrix::with_capacity(ctx.step_name(), alternatives.clone(), chunk.len());
        for &t in &chunk {
            let origin = zones.position(origins[t])?;
            let beta = distance_coefficient(&tour_types[t]);
            let columns = size_terms(&tour_types[t])
                .iter()
                .map(|c| zones.ints(c))
                .collect::<Result<Vec<_>>>()?;
            utilities.push_row(
                tours.index()[t],
                (0..zones.len()).map(|d| {
                    let size: i64 = columns.iter().map(|c| c[d]).sum();
                    if size > 0 {
                        (size as f64).ln() + beta * zones.distance(origin, d)
                    } else {
                        UNAVAILABLE
                    }
                }),
            );
        }
        for (&t, alternative) in chunk.iter().zip(ctx.simulate(&utilities)?) {
            destination[t] = zones.ids()[alternative];
        }
    }
    info!(
        "{}: chose destinations of {} tours",
        ctx.step_name(),
        choosers.len()
    );

    ctx.table_mut(TOURS)?
        .set_column("destination", Column::Int(destination))?;
    ctx.trace_rows(TOURS, Some("household_id"))
}
