use std::path::{Path, PathBuf};

use macros::integration_test;
use rust_asim::simulation::config::Settings;
use rust_asim::simulation::context::PipelineContext;
use rust_asim::simulation::models::DEFAULT_MODELS;
use rust_asim::simulation::pipeline::Pipeline;
use rust_asim::simulation::trace::{read_trace_csv, TraceFrame};

const CONFIGS_DIR: &str = "./tests/resources/configs";
const DATA_DIR: &str = "./tests/resources/data";

const HH_IDS: [i64; 3] = [2664549, 2122982, 1829334];
const PERSON_IDS: [i64; 3] = [24995, 92148, 92872];
const TRACED_HH_ID: i64 = 961042;

const EXPECTED_AUTO_OWNERSHIP: [i64; 3] = [0, 2, 1];
const EXPECTED_MANDATORY_TOUR_FREQUENCY: [&str; 3] = ["work1", "work_and_school", "school2"];
const EXPECTED_TOUR_COUNT: usize = 231;
const TRACED_PERSON_IDS: [&str; 4] = ["1888694", "1888695", "1888696", "1888696"];
const TRACED_TOUR_TYPES: [&str; 4] = ["work", "work", "school", "social"];

const MINI_MODELS: [&str; 4] = [
    "compute_accessibility",
    "school_location_simulate",
    "workplace_location_simulate",
    "auto_ownership_simulate",
];

/// Registers the directories with a fresh context, loads the settings and overrides the
/// fields a test cares about.
fn setup_dirs<F>(output_dir: &Path, configure: F) -> PipelineContext
where
    F: FnOnce(Settings) -> Settings,
{
    let mut context = PipelineContext::new(CONFIGS_DIR, DATA_DIR, output_dir).unwrap();
    context
        .add_injectable("configs_dir", Path::new(CONFIGS_DIR))
        .unwrap();
    context.add_injectable("data_dir", Path::new(DATA_DIR)).unwrap();
    context.add_injectable("output_dir", output_dir).unwrap();

    let settings = configure(Settings::load(Path::new(CONFIGS_DIR)).unwrap());
    context.add_injectable("settings", settings).unwrap();
    context.clear_cache();
    context
}

fn mini_run_outcomes(pipeline: &Pipeline) -> (Vec<i64>, Vec<String>) {
    let auto_ownership = pipeline
        .get_table("households")
        .unwrap()
        .int_values("auto_ownership", &HH_IDS)
        .unwrap();
    let mandatory_tour_frequency = pipeline
        .get_table("persons")
        .unwrap()
        .str_values("mandatory_tour_frequency", &PERSON_IDS)
        .unwrap();
    (auto_ownership, mandatory_tour_frequency)
}

#[integration_test(rust_asim)]
fn mini_pipeline_run() {
    let output_dir = tempfile::tempdir().unwrap();
    let context = setup_dirs(output_dir.path(), |s| s.set_households_sample_size(100));

    let mut pipeline = Pipeline::run(context, &MINI_MODELS, None).unwrap();
    pipeline.run_model("cdap_simulate").unwrap();
    pipeline.run_model("mandatory_tour_frequency").unwrap();

    let (auto_ownership, mandatory_tour_frequency) = mini_run_outcomes(&pipeline);
    assert_eq!(auto_ownership, EXPECTED_AUTO_OWNERSHIP);
    assert_eq!(mandatory_tour_frequency, EXPECTED_MANDATORY_TOUR_FREQUENCY);

    let steps: Vec<_> = pipeline.checkpoints().iter().map(|c| c.step.clone()).collect();
    assert_eq!(steps.len(), 7);
    assert_eq!(steps.last().unwrap(), "mandatory_tour_frequency");
    pipeline.close().unwrap();
}

#[integration_test(rust_asim)]
fn resumed_mini_run_reproduces_continuous_run() {
    let output_dir = tempfile::tempdir().unwrap();

    let context = setup_dirs(output_dir.path(), |s| s.set_households_sample_size(100));
    let mut pipeline = Pipeline::run(context, &MINI_MODELS, None).unwrap();
    pipeline.run_model("cdap_simulate").unwrap();
    pipeline.run_model("mandatory_tour_frequency").unwrap();
    let expected = mini_run_outcomes(&pipeline);
    assert_eq!(expected.0, EXPECTED_AUTO_OWNERSHIP);
    pipeline.close().unwrap();

    let context = setup_dirs(output_dir.path(), |s| s.set_households_sample_size(100));
    let mut pipeline =
        Pipeline::start_pipeline(context, Some("auto_ownership_simulate")).unwrap();
    assert!(!pipeline.table_names().any(|name| name == "tours"));
    pipeline.run_model("cdap_simulate").unwrap();
    pipeline.run_model("mandatory_tour_frequency").unwrap();

    let (auto_ownership, mandatory_tour_frequency) = mini_run_outcomes(&pipeline);
    assert_eq!(auto_ownership, EXPECTED_AUTO_OWNERSHIP);
    assert_eq!(mandatory_tour_frequency, EXPECTED_MANDATORY_TOUR_FREQUENCY);
    assert_eq!((auto_ownership, mandatory_tour_frequency), expected);
    pipeline.close().unwrap();
}

#[integration_test(rust_asim)]
fn resume_from_other_sample_is_refused() {
    let output_dir = tempfile::tempdir().unwrap();
    let context = setup_dirs(output_dir.path(), |s| s.set_households_sample_size(100));
    Pipeline::run(context, &MINI_MODELS[..1], None)
        .unwrap()
        .close()
        .unwrap();

    let context = setup_dirs(output_dir.path(), |s| s.set_households_sample_size(10));
    assert!(Pipeline::start_pipeline(context, Some("compute_accessibility")).is_err());
}

struct FullRun {
    tour_count: usize,
    household_count: usize,
    traced_tours: TraceFrame,
}

fn full_run(output_dir: &Path, households_sample_size: usize, chunk_size: usize) -> FullRun {
    let context = setup_dirs(output_dir, |s| {
        s.set_households_sample_size(households_sample_size)
            .set_chunk_size(chunk_size)
            .set_trace_hh_id(Some(TRACED_HH_ID))
            .set_check_for_variability(true)
    });
    let pipeline = Pipeline::run(context, &DEFAULT_MODELS, None).unwrap();
    let tour_count = pipeline.get_table("tours").unwrap().len();
    let household_count = pipeline.get_table("households").unwrap().len();
    pipeline.close().unwrap();

    let mut traced_tours =
        read_trace_csv(&output_dir.join("tour_mode_choice.mode.csv")).unwrap();
    traced_tours
        .sort_by(&["person_id", "tour_type", "tour_num"])
        .unwrap();
    FullRun {
        tour_count,
        household_count,
        traced_tours,
    }
}

/// Checks that the traced household made exactly its four expected tours.
fn assert_traced_tours(frame: &TraceFrame) {
    assert_eq!(frame.len(), 4);
    assert_eq!(frame.column("person_id").unwrap(), TRACED_PERSON_IDS);
    assert_eq!(frame.column("tour_type").unwrap(), TRACED_TOUR_TYPES);
    assert_eq!(frame.column("tour_num").unwrap(), ["1", "1", "1", "1"]);
}

fn traced_person_tour_modes(frame: &TraceFrame) -> Vec<(String, String, String)> {
    let person_ids = frame.column("person_id").unwrap();
    let tour_types = frame.column("tour_type").unwrap();
    let modes = frame.column("mode").unwrap();
    (0..frame.len())
        .map(|r| {
            (
                person_ids[r].to_string(),
                tour_types[r].to_string(),
                modes[r].to_string(),
            )
        })
        .collect()
}

#[integration_test(rust_asim)]
fn full_run_produces_tours() {
    let output_dir = tempfile::tempdir().unwrap();
    let run = full_run(output_dir.path(), 100, 0);

    assert_eq!(run.tour_count, EXPECTED_TOUR_COUNT);
    assert_eq!(run.household_count, 100);
    assert_traced_tours(&run.traced_tours);
    for table in ["households", "persons", "tours", "trips"] {
        let path: PathBuf = output_dir.path().join(format!("final_{table}.csv"));
        assert!(path.exists(), "{path:?} was not written");
    }
    assert!(output_dir.path().join("accessibility.od.csv").exists());
}

#[integration_test(rust_asim)]
fn chunking_does_not_change_outcomes() {
    let unchunked_dir = tempfile::tempdir().unwrap();
    let chunked_dir = tempfile::tempdir().unwrap();
    let unchunked = full_run(unchunked_dir.path(), 100, 0);
    let chunked = full_run(chunked_dir.path(), 100, 10);

    assert_eq!(unchunked.tour_count, EXPECTED_TOUR_COUNT);
    assert_eq!(chunked.tour_count, EXPECTED_TOUR_COUNT);
    assert_traced_tours(&chunked.traced_tours);
    assert_eq!(chunked.traced_tours, unchunked.traced_tours);
}

#[integration_test(rust_asim)]
fn larger_sample_keeps_traced_household() {
    let dir_100 = tempfile::tempdir().unwrap();
    let dir_101 = tempfile::tempdir().unwrap();
    let run_100 = full_run(dir_100.path(), 100, 0);
    let run_101 = full_run(dir_101.path(), 101, 0);

    assert_eq!(run_101.household_count, 101);
    assert_traced_tours(&run_100.traced_tours);
    assert_traced_tours(&run_101.traced_tours);
    assert_eq!(
        traced_person_tour_modes(&run_101.traced_tours),
        traced_person_tour_modes(&run_100.traced_tours)
    );
}

#[integration_test(rust_asim)]
fn trace_labels_become_columns() {
    let output_dir = tempfile::tempdir().unwrap();
    let run = full_run(output_dir.path(), 100, 0);
    let frame = &run.traced_tours;

    assert!(frame.labels().iter().any(|l| l == "person_id"));
    assert_eq!(frame.column("person_id").unwrap(), TRACED_PERSON_IDS);
    let tour_ids = frame.column("tour_id").unwrap();
    assert_eq!(tour_ids.len(), 4);
    assert!(
        tour_ids
            .iter()
            .zip(TRACED_PERSON_IDS)
            .all(|(tour, person)| tour.starts_with(person))
    );
}
