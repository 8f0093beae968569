use tracing::info;

use crate::simulation::error::Result;
use crate::simulation::models::accessibility::EMPLOYMENT_ACCESS;
use crate::simulation::models::choice::UtilityMatrix;
use crate::simulation::models::chunk::for_each_chunk;
use crate::simulation::models::{StepContext, ACCESSIBILITY};
use crate::simulation::population::{HOUSEHOLDS, LAND_USE};
use crate::simulation::table::Column;

pub const AUTO_OWNERSHIP: &str = "auto_ownership";

/// Coefficients per number of cars (0 to 4 cars); zero cars is the reference alternative.
const ASC: [f64; 5] = [0.0, -0.5, -2.5, -4.5, -6.5];
const INCOME: [f64; 5] = [0.0, 0.15, 0.25, 0.3, 0.33];
const WORKERS: [f64; 5] = [0.0, 0.4, 0.9, 1.2, 1.4];
const HOUSEHOLD_SIZE: [f64; 5] = [0.0, 0.2, 0.45, 0.6, 0.7];
const ACCESS: [f64; 5] = [0.0, -0.1, -0.2, -0.3, -0.35];
const CBD: [f64; 5] = [0.0, -0.6, -1.0, -1.3, -1.5];

/// Income enters in units of 10k and is capped.
const MAX_INCOME_10K: f64 = 20.0;
const MAX_HOUSEHOLD_SIZE: i64 = 5;
const CBD_AREA_TYPE: i64 = 0;

crate::register_step!("auto_ownership_simulate", auto_ownership_simulate);

pub fn auto_ownership_simulate(ctx: &mut StepContext) -> Result<()> {
    let households = ctx.table(HOUSEHOLDS)?;
    let land_use = ctx.table(LAND_USE)?;
    let access = ctx.table(ACCESSIBILITY)?;

    let home = households.ints("TAZ")?;
    let income = households.ints("income")?;
    let workers = households.ints("workers")?;
    let size = households.ints("hhsize")?;
    let alternatives: Vec<String> = (0..ASC.len()).map(|k| format!("cars{k}")).collect();

    let positions: Vec<usize> = (0..households.len()).collect();
    let chosen = for_each_chunk(ctx.step_name(), &positions, ctx.chunk_size(), |chunk| {
        let mut utilities =
            UtilityMatrix::with_capacity(ctx.step_name(), alternatives.clone(), chunk.len());
        for &h in chunk {
            let income_10k = (income[h] as f64 / 10_000.0).clamp(0.0, MAX_INCOME_10K);
            let employment_access = access.get_float(EMPLOYMENT_ACCESS, home[h])?;
            let cbd = f64::from(land_use.get_int("area_type", home[h])? == CBD_AREA_TYPE);
            let household_size = size[h].min(MAX_HOUSEHOLD_SIZE) as f64;
            utilities.push_row(
                households.index()[h],
                (0..ASC.len()).map(|k| {
                    ASC[k]
                        + INCOME[k] * income_10k
                        + WORKERS[k] * workers[h] as f64
                        + HOUSEHOLD_SIZE[k] * household_size
                        + ACCESS[k] * employment_access
                        + CBD[k] * cbd
                }),
            );
        }
        ctx.simulate(&utilities)
    })?;

    let cars: Vec<i64> = chosen.into_iter().map(|k| k as i64).collect();
    info!(
        "{}: {} cars in {} households",
        ctx.step_name(),
        cars.iter().sum::<i64>(),
        cars.len()
    );
    ctx.table_mut(HOUSEHOLDS)?
        .set_column(AUTO_OWNERSHIP, Column::Int(cars))?;
    ctx.trace_rows(HOUSEHOLDS, None)
}
