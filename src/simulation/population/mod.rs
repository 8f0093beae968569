use std::path::Path;

use ahash::{HashMap, HashSet};
use tracing::{info, warn};

use crate::simulation::error::Result;
use crate::simulation::io::csv_table::read_table;
use crate::simulation::table::{Column, ColumnType, Table};

pub const HOUSEHOLDS: &str = "households";
pub const PERSONS: &str = "persons";
pub const LAND_USE: &str = "land_use";

pub const HOUSEHOLD_INDEX: &str = "HHID";
pub const PERSON_INDEX: &str = "PERID";
pub const ZONE_INDEX: &str = "TAZ";

/// Person types as used by the activity models.
pub mod ptype {
    pub const FULL_TIME_WORKER: i64 = 1;
    pub const PART_TIME_WORKER: i64 = 2;
    pub const UNIVERSITY_STUDENT: i64 = 3;
    pub const NON_WORKER: i64 = 4;
    pub const RETIRED: i64 = 5;
    pub const DRIVING_AGE_STUDENT: i64 = 6;
    pub const NON_DRIVING_STUDENT: i64 = 7;
    pub const PRESCHOOL: i64 = 8;
}

const PEMPLOY_FULL_TIME: i64 = 1;
const PEMPLOY_PART_TIME: i64 = 2;
const PSTUDENT_GRADE_SCHOOL: i64 = 1;
const PSTUDENT_UNIVERSITY: i64 = 2;

pub fn load_land_use(path: &Path) -> Result<Table> {
    let table = read_table(
        path,
        LAND_USE,
        ZONE_INDEX,
        &[
            ("x", ColumnType::Float),
            ("y", ColumnType::Float),
            ("TOTHH", ColumnType::Int),
            ("TOTPOP", ColumnType::Int),
            ("TOTEMP", ColumnType::Int),
            ("ENROLL", ColumnType::Int),
            ("area_type", ColumnType::Int),
            ("parking_cost", ColumnType::Float),
        ],
    )?;
    info!("Loaded {} zones from {path:?}", table.len());
    Ok(table)
}

/// Loads the first `sample_size` households of the file, all of them if `sample_size` is 0.
/// Taking the head keeps every household of a smaller sample in any larger one.
pub fn load_households(path: &Path, sample_size: usize) -> Result<Table> {
    let table = read_table(
        path,
        HOUSEHOLDS,
        HOUSEHOLD_INDEX,
        &[
            ("TAZ", ColumnType::Int),
            ("income", ColumnType::Int),
            ("hhsize", ColumnType::Int),
        ],
    )?;
    let table = if sample_size == 0 {
        table
    } else {
        if sample_size > table.len() {
            warn!(
                "households_sample_size {sample_size} exceeds the {} households in {path:?}",
                table.len()
            );
        }
        table.head(sample_size)
    };
    info!("Loaded {} households from {path:?}", table.len());
    Ok(table)
}

/// Loads the persons of the given households and derives person types.
pub fn load_persons(path: &Path, households: &Table) -> Result<Table> {
    let all = read_table(
        path,
        PERSONS,
        PERSON_INDEX,
        &[
            ("household_id", ColumnType::Int),
            ("age", ColumnType::Int),
            ("sex", ColumnType::Int),
            ("pemploy", ColumnType::Int),
            ("pstudent", ColumnType::Int),
        ],
    )?;
    let household_ids = all.ints("household_id")?;
    let mut persons = all.filter(|p| households.contains(household_ids[p]));

    let age = persons.ints("age")?;
    let pemploy = persons.ints("pemploy")?;
    let pstudent = persons.ints("pstudent")?;

    let ptypes: Vec<i64> = (0..persons.len())
        .map(|p| person_type(age[p], pemploy[p], pstudent[p]))
        .collect();
    let is_worker: Vec<i64> = pemploy
        .iter()
        .map(|&e| i64::from(e == PEMPLOY_FULL_TIME || e == PEMPLOY_PART_TIME))
        .collect();
    let is_student: Vec<i64> = pstudent
        .iter()
        .map(|&s| i64::from(s == PSTUDENT_GRADE_SCHOOL || s == PSTUDENT_UNIVERSITY))
        .collect();

    persons.set_column("ptype", Column::Int(ptypes))?;
    persons.set_column("is_worker", Column::Int(is_worker))?;
    persons.set_column("is_student", Column::Int(is_student))?;
    info!("Loaded {} persons from {path:?}", persons.len());
    Ok(persons)
}

pub fn person_type(age: i64, pemploy: i64, pstudent: i64) -> i64 {
    if age < 6 {
        ptype::PRESCHOOL
    } else if age < 16 {
        ptype::NON_DRIVING_STUDENT
    } else if pemploy == PEMPLOY_FULL_TIME {
        ptype::FULL_TIME_WORKER
    } else if pstudent == PSTUDENT_UNIVERSITY {
        ptype::UNIVERSITY_STUDENT
    } else if pstudent == PSTUDENT_GRADE_SCHOOL {
        ptype::DRIVING_AGE_STUDENT
    } else if pemploy == PEMPLOY_PART_TIME {
        ptype::PART_TIME_WORKER
    } else if age >= 65 {
        ptype::RETIRED
    } else {
        ptype::NON_WORKER
    }
}

/// Adds the household columns that are aggregated over persons: `workers`, `num_children`.
pub fn add_household_person_counts(households: &mut Table, persons: &Table) -> Result<()> {
    let mut workers: HashMap<i64, i64> = HashMap::default();
    let mut children: HashMap<i64, i64> = HashMap::default();
    let household_ids = persons.ints("household_id")?;
    let is_worker = persons.ints("is_worker")?;
    let age = persons.ints("age")?;
    for p in 0..persons.len() {
        *workers.entry(household_ids[p]).or_default() += is_worker[p];
        *children.entry(household_ids[p]).or_default() += i64::from(age[p] < 16);
    }
    let count = |map: &HashMap<i64, i64>| {
        households
            .index()
            .iter()
            .map(|id| map.get(id).copied().unwrap_or(0))
            .collect::<Vec<_>>()
    };
    let workers = count(&workers);
    let children = count(&children);
    households.set_column("workers", Column::Int(workers))?;
    households.set_column("num_children", Column::Int(children))?;
    Ok(())
}

/// Row positions of each household's persons, in person table order.
pub fn persons_by_household(persons: &Table) -> Result<HashMap<i64, Vec<usize>>> {
    let mut map: HashMap<i64, Vec<usize>> = HashMap::default();
    for (position, &hh) in persons.ints("household_id")?.iter().enumerate() {
        map.entry(hh).or_default().push(position);
    }
    Ok(map)
}

/// Zones referenced by households that are missing from land use.
pub fn unknown_home_zones(households: &Table, land_use: &Table) -> Result<HashSet<i64>> {
    Ok(households
        .ints("TAZ")?
        .iter()
        .copied()
        .filter(|zone| !land_use.contains(*zone))
        .collect())
}
