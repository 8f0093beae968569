use tracing::{info, warn};

use crate::simulation::error::Result;
use crate::simulation::models::zones::Zones;
use crate::simulation::models::{StepContext, ACCESSIBILITY};
use crate::simulation::population::{LAND_USE, ZONE_INDEX};
use crate::simulation::table::{Column, Table};

const EMPLOYMENT_DECAY: f64 = 0.25;
const SCHOOL_DECAY: f64 = 0.3;

pub const EMPLOYMENT_ACCESS: &str = "employment_access";
pub const SCHOOL_ACCESS: &str = "school_access";

crate::register_step!("compute_accessibility", compute_accessibility);

/// Distance decayed sum of a zone attribute over all destinations, on a log scale.
fn access(zones: &Zones, origin: usize, attribute: &[i64], decay: f64) -> f64 {
    let sum: f64 = (0..zones.len())
        .map(|d| attribute[d] as f64 * (-decay * zones.distance(origin, d)).exp())
        .sum();
    sum.ln_1p()
}

pub fn compute_accessibility(ctx: &mut StepContext) -> Result<()> {
    let land_use = ctx.table(LAND_USE)?;
    let zones = Zones::new(land_use)?;
    let employment = zones.ints("TOTEMP")?;
    let enrollment = zones.ints("ENROLL")?;

    let employment_access: Vec<f64> = (0..zones.len())
        .map(|o| access(&zones, o, employment, EMPLOYMENT_DECAY))
        .collect();
    let school_access: Vec<f64> = (0..zones.len())
        .map(|o| access(&zones, o, enrollment, SCHOOL_DECAY))
        .collect();

    if let Some(od) = ctx.tracer().trace_od() {
        match (zones.position(od.orig), zones.position(od.dest)) {
            (Ok(o), Ok(d)) => {
                let distance = zones.distance(o, d);
                let values = [
                    od.orig.to_string(),
                    od.dest.to_string(),
                    distance.to_string(),
                    employment[d].to_string(),
                    (-EMPLOYMENT_DECAY * distance).exp().to_string(),
                    enrollment[d].to_string(),
                    (-SCHOOL_DECAY * distance).exp().to_string(),
                    employment_access[o].to_string(),
                    school_access[o].to_string(),
                ];
                ctx.tracer().write(
                    "accessibility.od.csv",
                    &[
                        "orig",
                        "dest",
                        "distance",
                        "dest_employment",
                        "employment_decay",
                        "dest_enrollment",
                        "school_decay",
                        EMPLOYMENT_ACCESS,
                        SCHOOL_ACCESS,
                    ],
                    &[values.to_vec()],
                )?;
            }
            _ => warn!("trace_od {od:?} references zones missing from land use"),
        }
    }

    let mut table = Table::new(ACCESSIBILITY, ZONE_INDEX, zones.ids().to_vec())?;
    table.set_column(EMPLOYMENT_ACCESS, Column::Float(employment_access))?;
    table.set_column(SCHOOL_ACCESS, Column::Float(school_access))?;
    info!("Computed accessibility for {} zones", table.len());
    ctx.put_table(table);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::config::{Settings, TraceOd};
    use crate::simulation::models::test_support::land_use;
    use crate::simulation::pipeline::store::TableStore;
    use crate::simulation::trace::{read_trace_csv, Tracer};

    #[test]
    fn access_decreases_away_from_employment() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default().set_trace_od(Some(TraceOd { orig: 1, dest: 3 }));
        let tracer = Tracer::new(&settings, dir.path());
        let mut tables = TableStore::default();
        tables.insert(land_use());

        let mut ctx = StepContext::new("compute_accessibility", &settings, &mut tables, &tracer);
        compute_accessibility(&mut ctx).unwrap();

        let accessibility = tables.get(ACCESSIBILITY).unwrap();
        let access = accessibility.floats(EMPLOYMENT_ACCESS).unwrap();
        assert_eq!(accessibility.index(), &[1, 2, 3]);
        // employment is concentrated in zone 1
        assert!(access[0] > access[1]);
        assert!(access[1] > access[2]);

        let trace = read_trace_csv(&dir.path().join("accessibility.od.csv")).unwrap();
        assert_eq!(trace.column("dest").unwrap(), vec!["3"]);
    }
}
