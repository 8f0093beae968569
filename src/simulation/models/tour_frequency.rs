use itertools::Itertools;
use tracing::info;

use crate::simulation::error::Result;
use crate::simulation::models::auto_ownership::AUTO_OWNERSHIP;
use crate::simulation::models::cdap::{CDAP_ACTIVITY, MANDATORY, NON_MANDATORY};
use crate::simulation::models::choice::{UtilityMatrix, UNAVAILABLE};
use crate::simulation::models::chunk::for_each_chunk;
use crate::simulation::models::{StepContext, TOURS};
use crate::simulation::population::{ptype, HOUSEHOLDS, PERSONS};
use crate::simulation::table::{Column, Table};

pub const MANDATORY_TOUR_FREQUENCY: &str = "mandatory_tour_frequency";
pub const NON_MANDATORY_TOUR_FREQUENCY: &str = "non_mandatory_tour_frequency";

pub const TOUR_INDEX: &str = "tour_id";
pub const MANDATORY_CATEGORY: &str = "mandatory";
pub const NON_MANDATORY_CATEGORY: &str = "non_mandatory";

/// Placeholder for tour attributes that a later step fills in.
pub const UNSET: i64 = -1;

/// Tour slots per person: 0 and 1 are mandatory, 2 to 9 non-mandatory.
pub const TOUR_SLOTS: i64 = 10;
const FIRST_NON_MANDATORY_SLOT: i64 = 2;

pub const MANDATORY_ALTERNATIVES: [&str; 5] =
    ["work1", "work2", "school1", "school2", "work_and_school"];

pub const NON_MANDATORY_TOUR_TYPES: [&str; 6] =
    ["escort", "shopping", "othmaint", "othdiscr", "eatout", "social"];

/// Tours per type (in [`NON_MANDATORY_TOUR_TYPES`] order) of each non-mandatory alternative.
pub const NON_MANDATORY_ALTERNATIVES: [[u8; 6]; 12] = [
    [0, 0, 0, 0, 0, 0],
    [0, 1, 0, 0, 0, 0],
    [0, 0, 1, 0, 0, 0],
    [0, 0, 0, 1, 0, 0],
    [0, 0, 0, 0, 1, 0],
    [0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 0],
    [0, 1, 0, 0, 1, 0],
    [0, 1, 0, 1, 0, 0],
    [0, 0, 1, 0, 0, 1],
    [0, 2, 0, 0, 0, 0],
    [1, 1, 0, 0, 0, 0],
];

const TOUR_TYPE_ASC: [f64; 6] = [-0.8, -0.3, -0.6, -0.5, -0.9, -0.7];
const MANDATORY_DAY_PER_TOUR: f64 = -1.2;
const AT_HOME_ADULT_PER_TOUR: f64 = 0.4;
const NO_CAR_PER_TOUR: f64 = -0.3;
const EXTRA_TOUR: f64 = -0.6;
const NO_TOURS_ON_MANDATORY_DAY: f64 = 0.5;

crate::register_step!("mandatory_tour_frequency", mandatory_tour_frequency);
crate::register_step!("non_mandatory_tour_frequency", non_mandatory_tour_frequency);

/// Id of the tour a person makes in the given slot.
pub fn tour_id(person_id: i64, slot: i64) -> i64 {
    person_id * TOUR_SLOTS + slot
}

/// Mandatory tours `(tour_type, tour_num)` of a mandatory tour frequency alternative.
pub fn mandatory_tours(alternative: &str) -> &'static [(&'static str, i64)] {
    match alternative {
        "work1" => &[("work", 1)],
        "work2" => &[("work", 1), ("work", 2)],
        "school1" => &[("school", 1)],
        "school2" => &[("school", 1), ("school", 2)],
        "work_and_school" => &[("work", 1), ("school", 1)],
        _ => &[],
    }
}

/// Rows of a tours table, accumulated column by column.
#[derive(Debug, Default)]
pub(crate) struct TourRows {
    pub tour_id: Vec<i64>,
    pub person_id: Vec<i64>,
    pub household_id: Vec<i64>,
    pub tour_type: Vec<String>,
    pub tour_num: Vec<i64>,
    pub tour_category: Vec<String>,
    pub origin: Vec<i64>,
    pub destination: Vec<i64>,
    pub start: Vec<i64>,
    pub end: Vec<i64>,
}

impl TourRows {
    pub fn into_table(self) -> Result<Table> {
        let mut tours = Table::new(TOURS, TOUR_INDEX, self.tour_id)?;
        tours.set_column("person_id", Column::Int(self.person_id))?;
        tours.set_column("household_id", Column::Int(self.household_id))?;
        tours.set_column("tour_type", Column::Str(self.tour_type))?;
        tours.set_column("tour_num", Column::Int(self.tour_num))?;
        tours.set_column("tour_category", Column::Str(self.tour_category))?;
        tours.set_column("origin", Column::Int(self.origin))?;
        tours.set_column("destination", Column::Int(self.destination))?;
        tours.set_column("start", Column::Int(self.start))?;
        tours.set_column("end", Column::Int(self.end))?;
        Ok(tours)
    }
}

/// Number and kind of mandatory tours of persons with a mandatory day pattern.
pub fn mandatory_tour_frequency(ctx: &mut StepContext) -> Result<()> {
    let persons = ctx.table(PERSONS)?;
    let activity = persons.strs(CDAP_ACTIVITY)?;
    let person_types = persons.ints("ptype")?;
    let is_worker = persons.ints("is_worker")?;
    let is_student = persons.ints("is_student")?;
    let alternatives: Vec<String> = MANDATORY_ALTERNATIVES.iter().map(|a| a.to_string()).collect();

    let choosers: Vec<usize> = (0..persons.len())
        .filter(|&p| activity[p] == MANDATORY)
        .collect();
    let chosen = for_each_chunk(ctx.step_name(), &choosers, ctx.chunk_size(), |chunk| {
        let mut utilities =
            UtilityMatrix::with_capacity(ctx.step_name(), alternatives.clone(), chunk.len());
        for &p in chunk {
            let t = person_types[p];
            let works = is_worker[p] == 1;
            let studies = is_student[p] == 1;
            let available = |ok: bool, u: f64| if ok { u } else { UNAVAILABLE };
            utilities.push_row(
                persons.index()[p],
                [
                    available(works, if t == ptype::FULL_TIME_WORKER { 1.0 } else { 0.0 }),
                    available(works, -2.5),
                    available(
                        studies,
                        if matches!(
                            t,
                            ptype::DRIVING_AGE_STUDENT
                                | ptype::NON_DRIVING_STUDENT
                                | ptype::PRESCHOOL
                        ) {
                            1.5
                        } else {
                            0.0
                        },
                    ),
                    available(studies, -3.0),
                    available(
                        works && studies,
                        if t == ptype::UNIVERSITY_STUDENT { -0.4 } else { -1.2 },
                    ),
                ],
            );
        }
        ctx.simulate(&utilities)
    })?;

    let mut frequency = vec![String::new(); persons.len()];
    for (&p, &alternative) in choosers.iter().zip(&chosen) {
        frequency[p] = MANDATORY_ALTERNATIVES[alternative].to_string();
    }
    info!(
        "{}: {:?}",
        ctx.step_name(),
        frequency.iter().filter(|f| !f.is_empty()).counts()
    );

    ctx.table_mut(PERSONS)?
        .set_column(MANDATORY_TOUR_FREQUENCY, Column::Str(frequency))?;
    ctx.trace_rows(PERSONS, Some("household_id"))
}

/// Non-mandatory tour frequency of persons that leave home. Appends the chosen tours to the
/// tours table with destination and times left unset.
pub fn non_mandatory_tour_frequency(ctx: &mut StepContext) -> Result<()> {
    let persons = ctx.table(PERSONS)?;
    let households = ctx.table(HOUSEHOLDS)?;
    let activity = persons.strs(CDAP_ACTIVITY)?;
    let person_types = persons.ints("ptype")?;
    let household_ids = persons.ints("household_id")?;
    let alternatives: Vec<String> = NON_MANDATORY_ALTERNATIVES
        .iter()
        .map(|counts| {
            let name = counts
                .iter()
                .zip(NON_MANDATORY_TOUR_TYPES)
                .flat_map(|(&n, tour_type)| std::iter::repeat_n(tour_type, n as usize))
                .join("_");
            if name.is_empty() { "none".to_string() } else { name }
        })
        .collect();

    let choosers: Vec<usize> = (0..persons.len())
        .filter(|&p| activity[p] == MANDATORY || activity[p] == NON_MANDATORY)
        .collect();
    let chosen = for_each_chunk(ctx.step_name(), &choosers, ctx.chunk_size(), |chunk| {
        let mut utilities =
            UtilityMatrix::with_capacity(ctx.step_name(), alternatives.clone(), chunk.len());
        for &p in chunk {
            let household = household_ids[p];
            let cars = households.get_int(AUTO_OWNERSHIP, household)?;
            let children = households.get_int("num_children", household)?;
            let mandatory_day = activity[p] == MANDATORY;
            let at_home_adult =
                matches!(person_types[p], ptype::NON_WORKER | ptype::RETIRED);

            let row = NON_MANDATORY_ALTERNATIVES.iter().map(|counts| {
                let tours: u8 = counts.iter().sum();
                if tours == 0 {
                    // a non-mandatory day pattern means at least one tour
                    return if mandatory_day {
                        NO_TOURS_ON_MANDATORY_DAY
                    } else {
                        UNAVAILABLE
                    };
                }
                if counts[0] > 0 && children == 0 {
                    return UNAVAILABLE;
                }
                let mut per_tour = 0.0;
                if mandatory_day {
                    per_tour += MANDATORY_DAY_PER_TOUR;
                }
                if at_home_adult {
                    per_tour += AT_HOME_ADULT_PER_TOUR;
                }
                if cars == 0 {
                    per_tour += NO_CAR_PER_TOUR;
                }
                let type_terms: f64 = counts
                    .iter()
                    .zip(TOUR_TYPE_ASC)
                    .map(|(&n, asc)| n as f64 * asc)
                    .sum();
                type_terms + per_tour * tours as f64 + EXTRA_TOUR * (tours - 1) as f64
            });
            utilities.push_row(persons.index()[p], row);
        }
        ctx.simulate(&utilities)
    })?;

    let mut frequency = vec![UNSET; persons.len()];
    let mut rows = TourRows::default();
    for (&p, &alternative) in choosers.iter().zip(&chosen) {
        frequency[p] = alternative as i64;
        let person_id = persons.index()[p];
        let household = household_ids[p];
        let home = households.get_int("TAZ", household)?;
        let mut slot = FIRST_NON_MANDATORY_SLOT;
        for (tour_type, &count) in NON_MANDATORY_TOUR_TYPES
            .iter()
            .zip(&NON_MANDATORY_ALTERNATIVES[alternative])
        {
            for num in 1..=count {
                rows.tour_id.push(tour_id(person_id, slot));
                rows.person_id.push(person_id);
                rows.household_id.push(household);
                rows.tour_type.push(tour_type.to_string());
                rows.tour_num.push(i64::from(num));
                rows.tour_category.push(NON_MANDATORY_CATEGORY.to_string());
                rows.origin.push(home);
                rows.destination.push(UNSET);
                rows.start.push(UNSET);
                rows.end.push(UNSET);
                slot += 1;
            }
        }
    }
    let new_tours = rows.into_table()?;
    info!(
        "{}: {} non-mandatory tours for {} persons",
        ctx.step_name(),
        new_tours.len(),
        choosers.len()
    );

    ctx.table_mut(PERSONS)?
        .set_column(NON_MANDATORY_TOUR_FREQUENCY, Column::Int(frequency))?;
    if ctx.has_table(TOURS) {
        ctx.table_mut(TOURS)?.append(new_tours)?;
    } else {
        ctx.put_table(new_tours);
    }
    ctx.trace_rows(PERSONS, Some("household_id"))?;
    ctx.trace_rows(TOURS, Some("household_id"))
}
