use std::fs;

use clap::Parser;
use tracing::{error, info};

use rust_asim::simulation::config::CommandLineArgs;
use rust_asim::simulation::context::PipelineContext;
use rust_asim::simulation::error::{AsimError, Result};
use rust_asim::simulation::logging::{init_logging, init_std_out_logging_thread_local};
use rust_asim::simulation::models::DEFAULT_MODELS;
use rust_asim::simulation::pipeline::Pipeline;

fn main() -> Result<()> {
    let args = CommandLineArgs::parse();
    let mut context = {
        let _guard = init_std_out_logging_thread_local();
        info!("Starting run with args: {args:?}");
        let mut context =
            PipelineContext::new(&args.configs_dir, &args.data_dir, &args.output_dir)?;
        let mut settings = context.settings().clone();
        settings.apply_overrides(&args.overrides)?;
        context.set_settings(settings);
        context
    };

    fs::create_dir_all(&args.output_dir).map_err(AsimError::io(&args.output_dir))?;
    let _guards = init_logging(context.settings(), &args.output_dir);

    let settings = context.settings().clone();
    let models: Vec<&str> = if settings.models.is_empty() {
        DEFAULT_MODELS.to_vec()
    } else {
        settings.models.iter().map(String::as_str).collect()
    };
    let resume_after = args.resume_after.as_deref().or(settings.resume_after.as_deref());
    context.clear_cache();

    let result = Pipeline::run(context, models.as_slice(), resume_after).and_then(Pipeline::close);
    match &result {
        Ok(()) => info!("Finished {} model steps", models.len()),
        Err(e) => error!("Run failed: {e}"),
    }
    result
}
