use ahash::HashMap;
use tracing::{info, info_span};

use crate::simulation::error::Result;
use crate::simulation::models::choice::{UtilityMatrix, UNAVAILABLE};
use crate::simulation::models::chunk::group_chunks;
use crate::simulation::models::location_choice::{SCHOOL_TAZ, WORKPLACE_TAZ};
use crate::simulation::models::tour_frequency::{
    mandatory_tours, tour_id, TourRows, MANDATORY_CATEGORY, MANDATORY_TOUR_FREQUENCY,
    NON_MANDATORY_CATEGORY, UNSET,
};
use crate::simulation::models::{StepContext, TOURS};
use crate::simulation::population::{HOUSEHOLDS, PERSONS};
use crate::simulation::table::Column;

pub const EARLIEST_HOUR: i64 = 5;
pub const LATEST_HOUR: i64 = 23;

type Window = (i64, i64);

crate::register_step!("mandatory_scheduling", mandatory_scheduling);
crate::register_step!("non_mandatory_scheduling", non_mandatory_scheduling);

/// All `(start, end)` hour pairs a tour can be scheduled in.
pub fn time_windows() -> Vec<Window> {
    (EARLIEST_HOUR..=LATEST_HOUR)
        .flat_map(|start| (start..=LATEST_HOUR).map(move |end| (start, end)))
        .collect()
}

/// Two tours overlap if one starts before the other ends. Touching windows, where one tour
/// starts in the hour the other ends, do not overlap.
pub fn overlaps(a: Window, b: Window) -> bool {
    a.0 < b.1 && b.0 < a.1
}

/// Preferred start hour and duration by tour type.
fn preferred_window(tour_type: &str) -> Window {
    match tour_type {
        "work" => (8, 9),
        "school" => (8, 7),
        "escort" => (8, 1),
        "shopping" => (14, 1),
        "othmaint" => (11, 1),
        "othdiscr" => (17, 2),
        "eatout" => (18, 1),
        "social" => (19, 2),
        _ => (12, 2),
    }
}

fn window_utility(
    tour_type: &str,
    window: Window,
    start_coefficient: f64,
    duration_coefficient: f64,
) -> f64 {
    let (preferred_start, preferred_duration) = preferred_window(tour_type);
    start_coefficient * (window.0 - preferred_start).abs() as f64
        + duration_coefficient * (window.1 - window.0 - preferred_duration).abs() as f64
}

/// Schedules tours one at a time, each person's tours in the order given. A tour can only be
/// placed in windows that do not overlap the person's `busy` windows; the chosen window is
/// added to them.
fn schedule_tours<F>(
    ctx: &StepContext,
    tours: &[usize],
    person_ids: &[i64],
    tour_ids: &[i64],
    busy: &mut HashMap<i64, Vec<Window>>,
    utility: F,
) -> Result<Vec<Window>>
where
    F: Fn(usize, Window, &[Window]) -> f64,
{
    let windows = time_windows();
    let alternatives: Vec<String> = windows.iter().map(|(s, e)| format!("{s}_{e}")).collect();
    let keys: Vec<i64> = tours.iter().map(|&t| person_ids[t]).collect();

    let mut chosen: HashMap<usize, Window> = HashMap::default();
    for (i, chunk) in group_chunks(tours, &keys, ctx.chunk_size()).iter().enumerate() {
        let _span = info_span!("chunk", model = ctx.step_name(), chunk = i, rows = chunk.len())
            .entered();
        for &t in chunk {
            let person_busy = busy.entry(person_ids[t]).or_default();
            let mut utilities = UtilityMatrix::new(ctx.step_name(), alternatives.clone());
            utilities.push_row(
                tour_ids[t],
                windows.iter().map(|&w| {
                    if person_busy.iter().any(|&b| overlaps(w, b)) {
                        UNAVAILABLE
                    } else {
                        utility(t, w, &person_busy[..])
                    }
                }),
            );
            let window = windows[ctx.simulate(&utilities)?[0]];
            person_busy.push(window);
            chosen.insert(t, window);
        }
    }
    Ok(tours.iter().filter_map(|t| chosen.get(t).copied()).collect())
}

/// Creates the tours table from the mandatory tour frequencies and schedules the mandatory
/// tours. A second mandatory tour starts no earlier than the first one ends.
pub fn mandatory_scheduling(ctx: &mut StepContext) -> Result<()> {
    let persons = ctx.table(PERSONS)?;
    let households = ctx.table(HOUSEHOLDS)?;
    let frequency = persons.strs(MANDATORY_TOUR_FREQUENCY)?;
    let household_ids = persons.ints("household_id")?;
    let school = persons.ints(SCHOOL_TAZ)?;
    let work = persons.ints(WORKPLACE_TAZ)?;

    let mut rows = TourRows::default();
    for p in 0..persons.len() {
        let person_id = persons.index()[p];
        let home = households.get_int("TAZ", household_ids[p])?;
        for (slot, &(tour_type, num)) in mandatory_tours(&frequency[p]).iter().enumerate() {
            rows.tour_id.push(tour_id(person_id, slot as i64));
            rows.person_id.push(person_id);
            rows.household_id.push(household_ids[p]);
            rows.tour_type.push(tour_type.to_string());
            rows.tour_num.push(num);
            rows.tour_category.push(MANDATORY_CATEGORY.to_string());
            rows.origin.push(home);
            rows.destination
                .push(if tour_type == "work" { work[p] } else { school[p] });
            rows.start.push(UNSET);
            rows.end.push(UNSET);
        }
    }
    let mut tours = rows.into_table()?;

    let positions: Vec<usize> = (0..tours.len()).collect();
    let windows = {
        let tour_types = tours.strs("tour_type")?;
        let mut busy = HashMap::default();
        schedule_tours(
            ctx,
            &positions,
            tours.ints("person_id")?,
            tours.index(),
            &mut busy,
            |t, window, earlier| {
                match earlier.iter().map(|w| w.1).max() {
                    None => {
                        let (start, duration) = if tour_types[t] == "work" {
                            (-0.4, -0.25)
                        } else {
                            (-0.5, -0.3)
                        };
                        window_utility(&tour_types[t], window, start, duration)
                    }
                    Some(previous_end) if window.0 < previous_end => UNAVAILABLE,
                    Some(previous_end) => {
                        -0.3 * (window.0 - previous_end - 1).abs() as f64
                            - 0.25 * (window.1 - window.0 - 4).abs() as f64
                    }
                }
            },
        )?
    };
    let (start, end): (Vec<i64>, Vec<i64>) = windows.into_iter().unzip();
    tours.set_column("start", Column::Int(start))?;
    tours.set_column("end", Column::Int(end))?;

    info!("{}: scheduled {} mandatory tours", ctx.step_name(), tours.len());
    ctx.put_table(tours);
    ctx.trace_rows(TOURS, Some("household_id"))
}

/// Schedules non-mandatory tours around each person's already scheduled tours.
pub fn non_mandatory_scheduling(ctx: &mut StepContext) -> Result<()> {
    let tours = ctx.table(TOURS)?;
    let person_ids = tours.ints("person_id")?;
    let category = tours.strs("tour_category")?;
    let tour_types = tours.strs("tour_type")?;
    let mut start = tours.ints("start")?.to_vec();
    let mut end = tours.ints("end")?.to_vec();

    let mut busy: HashMap<i64, Vec<Window>> = HashMap::default();
    for t in 0..tours.len() {
        if start[t] != UNSET {
            busy.entry(person_ids[t]).or_default().push((start[t], end[t]));
        }
    }
    let choosers: Vec<usize> = (0..tours.len())
        .filter(|&t| category[t] == NON_MANDATORY_CATEGORY)
        .collect();
    let windows = schedule_tours(
        ctx,
        &choosers,
        person_ids,
        tours.index(),
        &mut busy,
        |t, window, _| window_utility(&tour_types[t], window, -0.15, -0.3),
    )?;
    for (&t, (s, e)) in choosers.iter().zip(windows) {
        start[t] = s;
        end[t] = e;
    }
    info!(
        "{}: scheduled {} non-mandatory tours",
        ctx.step_name(),
        choosers.len()
    );

    let tours = ctx.table_mut(TOURS)?;
    tours.set_column("start", Column::Int(start))?;
    tours.set_column("end", Column::Int(end))?;
    ctx.trace_rows(TOURS, Some("household_id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::config::Settings;
    use crate::simulation::models::test_support::{input_tables, run_steps};
    use itertools::Itertools;

    #[test]
    fn windows_cover_the_day() {
        let windows = time_windows();
        assert_eq!(windows.len(), 19 * 20 / 2);
        assert_eq!(windows[0], (EARLIEST_HOUR, EARLIEST_HOUR));
        assert!(windows.iter().all(|&(s, e)| s <= e));
    }

    #[test]
    fn touching_windows_do_not_overlap() {
        assert!(overlaps((8, 17), (12, 13)));
        assert!(overlaps((8, 17), (7, 9)));
        assert!(!overlaps((8, 17), (17, 19)));
        assert!(!overlaps((8, 17), (5, 8)));
        assert!(!overlaps((17, 17), (17, 17)));
    }

    #[test]
    fn tours_of_a_person_never_overlap() {
        for seed in 0..5 {
            let mut tables = input_tables();
            run_steps(
                &[
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
                ],
                &Settings::default().set_rng_base_seed(seed),
                &mut tables,
            );
            let tours = tables.get(TOURS).unwrap();
            let person_ids = tours.ints("person_id").unwrap();
            let start = tours.ints("start").unwrap();
            let end = tours.ints("end").unwrap();
            let by_person = (0..tours.len()).into_group_map_by(|&t| person_ids[t]);
            for (_, person_tours) in by_person {
                for (&a, &b) in person_tours.iter().tuple_combinations() {
                    assert!(
                        !overlaps((start[a], end[a]), (start[b], end[b])),
                        "tours {} and {} overlap",
                        tours.index()[a],
                        tours.index()[b]
                    );
                }
            }
            assert!(start.iter().all(|&s| (EARLIEST_HOUR..=LATEST_HOUR).contains(&s)));
        }
    }
}
