use itertools::Itertools;
use tracing::info;

use crate::simulation::error::Result;
use crate::simulation::models::auto_ownership::AUTO_OWNERSHIP;
use crate::simulation::models::choice::{UtilityMatrix, UNAVAILABLE};
use crate::simulation::models::chunk::group_chunks;
use crate::simulation::models::zones::Zones;
use crate::simulation::models::{StepContext, TOURS, TRIPS};
use crate::simulation::population::{HOUSEHOLDS, LAND_USE, PERSONS};
use crate::simulation::table::{Column, Table};

pub const MODE: &str = "mode";
pub const TRIP_MODE: &str = "trip_mode";
pub const TRIP_INDEX: &str = "trip_id";

pub const MODES: [&str; 9] = [
    "DRIVEALONEFREE",
    "SHARED2FREE",
    "SHARED3FREE",
    "WALK",
    "BIKE",
    "WALK_LOC",
    "WALK_COM",
    "DRIVE_LOC",
    "DRIVE_COM",
];

const TIME: f64 = -0.025;
const COST: f64 = -0.4;
const TRANSIT_WITHOUT_CAR: f64 = 0.5;
const TRANSIT_TO_WORK: f64 = 0.3;
const CHILD_SHARED_RIDE: f64 = 1.0;

const MAX_WALK_DISTANCE: f64 = 3.0;
const MAX_BIKE_DISTANCE: f64 = 10.0;
const MIN_COMMUTER_RAIL_DISTANCE: f64 = 8.0;
const LOCAL_TRANSIT_MAX_AREA_TYPE: i64 = 2;
const COMMUTER_RAIL_MAX_AREA_TYPE: i64 = 1;
const DRIVING_AGE: i64 = 16;

const TOUR_MODE_TRACE: &str = "tour_mode_choice.mode.csv";
const TRIP_MODE_TRACE: &str = "trip_mode_choice.mode.csv";

crate::register_step!("tour_mode_choice_simulate", tour_mode_choice_simulate);
crate::register_step!("trip_mode_choice_simulate", trip_mode_choice_simulate);

/// Level of service and person attributes a mode choice utility depends on.
#[derive(Debug, Clone, Copy)]
struct Trip {
    distance: f64,
    cars: i64,
    age: i64,
    household_size: i64,
    origin_area_type: i64,
    destination_area_type: i64,
    parking_cost: f64,
}

/// Travel time in minutes and out of pocket cost of each mode, `None` if unavailable.
fn level_of_service(mode: &str, trip: &Trip) -> Option<(f64, f64)> {
    let d = trip.distance;
    let has_car = trip.cars > 0;
    let local_transit = trip.origin_area_type <= LOCAL_TRANSIT_MAX_AREA_TYPE
        && trip.destination_area_type <= LOCAL_TRANSIT_MAX_AREA_TYPE;
    let commuter_rail = d >= MIN_COMMUTER_RAIL_DISTANCE
        && trip.destination_area_type <= COMMUTER_RAIL_MAX_AREA_TYPE;
    let car_time = 5.0 + d / 40.0 * 60.0;
    let car_cost = 0.15 * d + trip.parking_cost;
    let local_time = 10.0 + d / 20.0 * 60.0;
    let rail_time = 15.0 + d / 50.0 * 60.0;
    match mode {
        "DRIVEALONEFREE" if has_car && trip.age >= DRIVING_AGE => Some((car_time, car_cost)),
        "SHARED2FREE" if has_car => Some((car_time, car_cost / 2.0)),
        "SHARED3FREE" if has_car && trip.household_size >= 3 => Some((car_time, car_cost / 3.5)),
        "WALK" if d <= MAX_WALK_DISTANCE => Some((d / 5.0 * 60.0, 0.0)),
        "BIKE" if d <= MAX_BIKE_DISTANCE => Some((d / 15.0 * 60.0, 0.0)),
        "WALK_LOC" if local_transit => Some((local_time, 2.0)),
        "WALK_COM" if commuter_rail => Some((rail_time, 4.0)),
        "DRIVE_LOC" if has_car && local_transit => Some((local_time - 3.0, 3.0)),
        "DRIVE_COM" if has_car && commuter_rail => Some((rail_time, 5.0)),
        _ => None,
    }
}

fn mode_constant(mode: &str) -> f64 {
    match mode {
        "SHARED2FREE" => -1.2,
        "SHARED3FREE" => -2.0,
        "WALK" => 1.0,
        "BIKE" => -1.0,
        "WALK_LOC" => -0.8,
        "WALK_COM" => -1.5,
        "DRIVE_LOC" => -1.6,
        "DRIVE_COM" => -1.8,
        _ => 0.0,
    }
}

fn is_transit(mode: &str) -> bool {
    mode.ends_with("_LOC") || mode.ends_with("_COM")
}

fn tour_mode_utility(mode: &str, tour_type: &str, trip: &Trip) -> f64 {
    let Some((time, cost)) = level_of_service(mode, trip) else {
        return UNAVAILABLE;
    };
    let mut utility = mode_constant(mode) + TIME * time + COST * cost;
    if is_transit(mode) {
        if trip.cars == 0 {
            utility += TRANSIT_WITHOUT_CAR;
        }
        if tour_type == "work" {
            utility += TRANSIT_TO_WORK;
        }
    }
    if mode == "SHARED2FREE" && trip.age < DRIVING_AGE {
        utility += CHILD_SHARED_RIDE;
    }
    utility
}

/// Trip modes that go with a tour mode; the tour mode itself comes first.
pub fn trip_modes(tour_mode: &str) -> &'static [&'static str] {
    match tour_mode {
        "DRIVEALONEFREE" => &["DRIVEALONEFREE"],
        "SHARED2FREE" => &["SHARED2FREE", "DRIVEALONEFREE"],
        "SHARED3FREE" => &["SHARED3FREE", "SHARED2FREE"],
        "WALK" => &["WALK"],
        "BIKE" => &["BIKE", "WALK"],
        "WALK_LOC" => &["WALK_LOC", "WALK"],
        "WALK_COM" => &["WALK_COM", "WALK_LOC"],
        "DRIVE_LOC" => &["DRIVE_LOC", "WALK_LOC"],
        "DRIVE_COM" => &["DRIVE_COM", "WALK_COM"],
        _ => &[],
    }
}

const SAME_AS_TOUR_MODE: f64 = 2.0;
const TRIP_WALK_DISTANCE: f64 = -0.3;

fn trip_mode_utility(mode: &str, tour_mode: &str, trip: &Trip) -> f64 {
    let allowed = trip_modes(tour_mode);
    if !allowed.contains(&mode) {
        return UNAVAILABLE;
    }
    if mode == tour_mode {
        return SAME_AS_TOUR_MODE;
    }
    // level of service only restricts the modes other than the tour mode
    let Some((time, cost)) = level_of_service(mode, trip) else {
        return UNAVAILABLE;
    };
    let walk = if mode == "WALK" {
        TRIP_WALK_DISTANCE * trip.distance
    } else {
        0.0
    };
    mode_constant(mode) + TIME * time + COST * cost + walk
}

/// Reads the person, household and zone attributes of a trip between two zones.
struct TripBuilder<'a> {
    zones: Zones<'a>,
    households: &'a Table,
    persons: &'a Table,
    area_type: &'a [i64],
    parking_cost: &'a [f64],
}

impl<'a> TripBuilder<'a> {
    fn new(zones: Zones<'a>, households: &'a Table, persons: &'a Table) -> Result<Self> {
        Ok(TripBuilder {
            zones,
            households,
            persons,
            area_type: zones.ints("area_type")?,
            parking_cost: zones.floats("parking_cost")?,
        })
    }

    fn trip(
        &self,
        person_id: i64,
        household_id: i64,
        origin: i64,
        destination: i64,
    ) -> Result<Trip> {
        let o = self.zones.position(origin)?;
        let d = self.zones.position(destination)?;
        Ok(Trip {
            distance: self.zones.distance(o, d),
            cars: self.households.get_int(AUTO_OWNERSHIP, household_id)?,
            age: self.persons.get_int("age", person_id)?,
            household_size: self.households.get_int("hhsize", household_id)?,
            origin_area_type: self.area_type[o],
            destination_area_type: self.area_type[d],
            parking_cost: self.parking_cost[d],
        })
    }
}

/// Main mode of every tour.
pub fn tour_mode_choice_simulate(ctx: &mut StepContext) -> Result<()> {
    let tours = ctx.table(TOURS)?;
    let builder = TripBuilder::new(
        Zones::new(ctx.table(LAND_USE)?)?,
        ctx.table(HOUSEHOLDS)?,
        ctx.table(PERSONS)?,
    )?;
    let person_ids = tours.ints("person_id")?;
    let household_ids = tours.ints("household_id")?;
    let origins = tours.ints("origin")?;
    let destinations = tours.ints("destination")?;
    let tour_types = tours.strs("tour_type")?;
    let alternatives: Vec<String> = MODES.iter().map(|m| m.to_string()).collect();

    let positions: Vec<usize> = (0..tours.len()).collect();
    let mut modes = vec![String::new(); tours.len()];
    for chunk in group_chunks(&positions, person_ids, ctx.chunk_size()) {
        let mut utilities =
            UtilityMatrix::with_capacity(ctx.step_name(), alternatives.clone(), chunk.len());
        for &t in &chunk {
            let trip =
                builder.trip(person_ids[t], household_ids[t], origins[t], destinations[t])?;
            utilities.push_row(
                tours.index()[t],
                MODES.iter().map(|m| tour_mode_utility(m, &tour_types[t], &trip)),
            );
        }
        for (&t, mode) in chunk.iter().zip(ctx.simulate(&utilities)?) {
            modes[t] = MODES[mode].to_string();
        }
    }
    info!("{}: tour modes {:?}", ctx.step_name(), modes.iter().counts());

    ctx.table_mut(TOURS)?.set_column(MODE, Column::Str(modes))?;
    ctx.trace_rows(TOURS, Some("household_id"))?;
    trace_modes(
        ctx,
        TOURS,
        TOUR_MODE_TRACE,
        &["tour_id", MODE, "person_id", "tour_type", "tour_num"],
    )
}

/// Splits every tour into an outbound and an inbound trip and chooses a mode for each trip
/// among the modes compatible with the tour mode.
pub fn trip_mode_choice_simulate(ctx: &mut StepContext) -> Result<()> {
    let tours = ctx.table(TOURS)?;
    let builder = TripBuilder::new(
        Zones::new(ctx.table(LAND_USE)?)?,
        ctx.table(HOUSEHOLDS)?,
        ctx.table(PERSONS)?,
    )?;
    let person_ids = tours.ints("person_id")?;
    let household_ids = tours.ints("household_id")?;
    let origins = tours.ints("origin")?;
    let destinations = tours.ints("destination")?;
    let start = tours.ints("start")?;
    let end = tours.ints("end")?;
    let tour_modes = tours.strs(MODE)?;

    let n = tours.len() * 2;
    let mut trip_ids = Vec::with_capacity(n);
    let mut columns: [Vec<i64>; 7] = Default::default();
    let mut trip_tour_modes = Vec::with_capacity(n);
    for t in 0..tours.len() {
        for outbound in [true, false] {
            let (o, d, depart) = if outbound {
                (origins[t], destinations[t], start[t])
            } else {
                (destinations[t], origins[t], end[t])
            };
            trip_ids.push(tours.index()[t] * 2 + i64::from(!outbound));
            for (column, value) in columns.iter_mut().zip([
                tours.index()[t],
                person_ids[t],
                household_ids[t],
                i64::from(outbound),
                o,
                d,
                depart,
            ]) {
                column.push(value);
            }
            trip_tour_modes.push(tour_modes[t].clone());
        }
    }
    let [tour_id, person_id, household_id, outbound, origin, destination, depart] = columns;

    let alternatives: Vec<String> = MODES.iter().map(|m| m.to_string()).collect();
    let positions: Vec<usize> = (0..n).collect();
    let mut trip_modes = vec![String::new(); n];
    for chunk in group_chunks(&positions, &person_id, ctx.chunk_size()) {
        let mut utilities =
            UtilityMatrix::with_capacity(ctx.step_name(), alternatives.clone(), chunk.len());
        for &i in &chunk {
            let trip = builder.trip(person_id[i], household_id[i], origin[i], destination[i])?;
            utilities.push_row(
                trip_ids[i],
                MODES
                    .iter()
                    .map(|m| trip_mode_utility(m, &trip_tour_modes[i], &trip)),
            );
        }
        for (&i, mode) in chunk.iter().zip(ctx.simulate(&utilities)?) {
            trip_modes[i] = MODES[mode].to_string();
        }
    }

    let mut trips = Table::new(TRIPS, TRIP_INDEX, trip_ids)?;
    trips.set_column("tour_id", Column::Int(tour_id))?;
    trips.set_column("person_id", Column::Int(person_id))?;
    trips.set_column("household_id", Column::Int(household_id))?;
    trips.set_column("outbound", Column::Int(outbound))?;
    trips.set_column("origin", Column::Int(origin))?;
    trips.set_column("destination", Column::Int(destination))?;
    trips.set_column("depart", Column::Int(depart))?;
    trips.set_column("tour_mode", Column::Str(trip_tour_modes))?;
    trips.set_column(TRIP_MODE, Column::Str(trip_modes))?;
    info!("{}: {} trips", ctx.step_name(), trips.len());

    ctx.put_table(trips);
    ctx.trace_rows(TRIPS, Some("household_id"))?;
    trace_modes(
        ctx,
        TRIPS,
        TRIP_MODE_TRACE,
        &["trip_id", TRIP_MODE, "tour_id", "person_id", "outbound"],
    )
}

/// Traces selected columns of the traced household's rows, one instance per row.
fn trace_modes(
    ctx: &StepContext,
    table_name: &str,
    file_name: &str,
    labels: &[&str],
) -> Result<()> {
    let Some(hh_id) = ctx.tracer().trace_hh_id() else {
        return Ok(());
    };
    let table = ctx.table(table_name)?;
    let household_ids = table.ints("household_id")?;
    let instances = (0..table.len())
        .filter(|&r| household_ids[r] == hh_id)
        .map(|r| {
            labels
                .iter()
                .map(|&label| -> Result<String> {
                    if label == table.index_name() {
                        Ok(table.index()[r].to_string())
                    } else {
                        Ok(table.column(label)?.value_string(r))
                    }
                })
                .collect::<Result<Vec<String>>>()
        })
        .collect::<Result<Vec<_>>>()?;
    ctx.tracer().write(file_name, labels, &instances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::config::Settings;
    use crate::simulation::models::test_support::{input_tables, run_steps};
    use crate::simulation::models::DEFAULT_MODELS;

    fn trip(distance: f64, cars: i64, age: i64) -> Trip {
        Trip {
            distance,
            cars,
            age,
            household_size: 2,
            origin_area_type: 0,
            destination_area_type: 0,
            parking_cost: 1.0,
        }
    }

    #[test]
    fn availability_follows_cars_age_and_distance() {
        assert_eq!(tour_mode_utility("DRIVEALONEFREE", "work", &trip(5.0, 0, 40)), UNAVAILABLE);
        assert_eq!(tour_mode_utility("DRIVEALONEFREE", "work", &trip(5.0, 1, 12)), UNAVAILABLE);
        assert!(tour_mode_utility("DRIVEALONEFREE", "work", &trip(5.0, 1, 40)).is_finite());
        assert_eq!(tour_mode_utility("WALK", "shopping", &trip(5.0, 1, 40)), UNAVAILABLE);
        assert!(tour_mode_utility("WALK", "shopping", &trip(1.0, 1, 40)).is_finite());
        assert_eq!(tour_mode_utility("SHARED3FREE", "social", &trip(1.0, 1, 40)), UNAVAILABLE);
        assert_eq!(tour_mode_utility("WALK_COM", "work", &trip(2.0, 0, 40)), UNAVAILABLE);
        assert!(tour_mode_utility("WALK_COM", "work", &trip(9.0, 0, 40)).is_finite());
    }

    #[test]
    fn trip_modes_depend_on_tour_mode() {
        let far = trip(20.0, 1, 40);
        assert_eq!(trip_mode_utility("WALK", "WALK", &far), SAME_AS_TOUR_MODE);
        assert_eq!(trip_mode_utility("BIKE", "WALK", &far), UNAVAILABLE);
        assert_eq!(trip_mode_utility("WALK", "BIKE", &far), UNAVAILABLE);
        for mode in MODES {
            assert_eq!(trip_modes(mode)[0], mode);
        }
    }

    #[test]
    fn every_tour_and_trip_gets_a_mode() {
        let mut tables = input_tables();
        run_steps(&DEFAULT_MODELS, &Settings::default().set_rng_base_seed(4), &mut tables);

        let tours = tables.get(TOURS).unwrap();
        let trips = tables.get(TRIPS).unwrap();
        assert_eq!(trips.len(), tours.len() * 2);
        assert!(tours.strs(MODE).unwrap().iter().all(|m| MODES.contains(&m.as_str())));

        for (r, &tour) in trips.ints("tour_id").unwrap().iter().enumerate() {
            let tour_mode = tours.get_str(MODE, tour).unwrap();
            let trip_mode = &trips.strs(TRIP_MODE).unwrap()[r];
            assert!(trip_modes(tour_mode).contains(&trip_mode.as_str()));
            assert_eq!(trips.index()[r] / 2, tour);
        }
    }
}
