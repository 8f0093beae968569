//! Small hand made tables for the unit tests of the model steps.

use crate::simulation::config::Settings;
use crate::simulation::error::Result;
use crate::simulation::models::StepContext;
use crate::simulation::pipeline::store::TableStore;
use crate::simulation::population::{
    add_household_person_counts, person_type, HOUSEHOLDS, HOUSEHOLD_INDEX, LAND_USE, PERSONS,
    PERSON_INDEX, ZONE_INDEX,
};
use crate::simulation::table::{Column, Table};
use crate::simulation::trace::Tracer;

pub fn land_use() -> Table {
    let mut t = Table::new(LAND_USE, ZONE_INDEX, vec![1, 2, 3]).unwrap();
    t.set_column("x", Column::Float(vec![0.0, 2.0, 6.0])).unwrap();
    t.set_column("y", Column::Float(vec![0.0, 0.0, 0.0])).unwrap();
    t.set_column("TOTHH", Column::Int(vec![100, 50, 20])).unwrap();
    t.set_column("TOTPOP", Column::Int(vec![250, 120, 50])).unwrap();
    t.set_column("TOTEMP", Column::Int(vec![500, 100, 10])).unwrap();
    t.set_column("ENROLL", Column::Int(vec![300, 0, 50])).unwrap();
    t.set_column("area_type", Column::Int(vec![0, 1, 3])).unwrap();
    t.set_column("parking_cost", Column::Float(vec![2.0, 0.5, 0.0]))
        .unwrap();
    t
}

/// Households 10, 20 and 30 living in zones 1, 2 and 3, with their persons:
/// a full time worker and a child (10), a part time working university student (20),
/// a retiree, a high school student and a preschooler (30).
pub fn population() -> (Table, Table) {
    let mut households = Table::new(HOUSEHOLDS, HOUSEHOLD_INDEX, vec![10, 20, 30]).unwrap();
    households.set_column("TAZ", Column::Int(vec![1, 2, 3])).unwrap();
    households
        .set_column("income", Column::Int(vec![80000, 30000, 15000]))
        .unwrap();
    households.set_column("hhsize", Column::Int(vec![2, 1, 3])).unwrap();

    let age = vec![40, 10, 30, 70, 17, 4];
    let pemploy = vec![1, 4, 2, 3, 3, 4];
    let pstudent = vec![3, 1, 2, 3, 1, 3];
    let mut persons =
        Table::new(PERSONS, PERSON_INDEX, vec![101, 102, 201, 301, 302, 303]).unwrap();
    persons
        .set_column("household_id", Column::Int(vec![10, 10, 20, 30, 30, 30]))
        .unwrap();
    let ptype = (0..age.len())
        .map(|p| person_type(age[p], pemploy[p], pstudent[p]))
        .collect();
    let is_worker = pemploy.iter().map(|&e| i64::from(e <= 2)).collect();
    let is_student = pstudent.iter().map(|&s| i64::from(s <= 2)).collect();
    persons.set_column("age", Column::Int(age)).unwrap();
    persons.set_column("sex", Column::Int(vec![1, 2, 1, 2, 1, 2])).unwrap();
    persons.set_column("pemploy", Column::Int(pemploy)).unwrap();
    persons.set_column("pstudent", Column::Int(pstudent)).unwrap();
    persons.set_column("ptype", Column::Int(ptype)).unwrap();
    persons.set_column("is_worker", Column::Int(is_worker)).unwrap();
    persons.set_column("is_student", Column::Int(is_student)).unwrap();

    add_household_person_counts(&mut households, &persons).unwrap();
    (households, persons)
}

/// A store holding land use, households and persons.
pub fn input_tables() -> TableStore {
    let (households, persons) = population();
    let mut tables = TableStore::default();
    tables.insert(land_use());
    tables.insert(households);
    tables.insert(persons);
    tables
}

pub fn run_step(
    name: &'static str,
    step: fn(&mut StepContext<'_>) -> Result<()>,
    settings: &Settings,
    tables: &mut TableStore,
) -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let tracer = Tracer::new(settings, dir.path());
    let mut ctx = StepContext::new(name, settings, tables, &tracer);
    step(&mut ctx)
}

/// Runs the given steps of the default model list in order.
pub fn run_steps(names: &[&'static str], settings: &Settings, tables: &mut TableStore) {
    for &name in names {
        let step = crate::simulation::models::find_step(name).unwrap();
        run_step(step.name, step.run, settings, tables).unwrap();
    }
}
