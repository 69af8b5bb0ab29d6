mod cli;
mod config;
mod errors;
mod processing;

use clap::Parser;
use novoseek::decoding::MassFeasibility;
use novoseek::oracle::PeakMatchModel;
use novoseek::utils::load_or_build_knapsack;
use novoseek::DenovoPipeline;
use std::sync::Arc;
use tracing::info;
use tracing::subscriber::set_global_default;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::Registry;

use cli::Cli;
use config::Config;
use errors::CliError;

#[cfg(target_os = "windows")]
use mimalloc::MiMalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn write_template(path: &std::path::Path) -> Result<(), CliError> {
    let file = std::fs::File::create_new(path).map_err(|e| CliError::io(e, path))?;
    serde_json::to_writer_pretty(file, &Config::default())
        .map_err(|e| CliError::ParseError { msg: e.to_string() })?;
    info!("Wrote configuration template to {}", path.display());
    Ok(())
}

fn main() -> Result<(), CliError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_span_events(FmtSpan::CLOSE));
    set_global_default(subscriber).expect("Setting default subscriber failed");

    let args = Cli::parse();
    if let Some(path) = &args.write_template {
        return write_template(path);
    }

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let config = config.with_cli_args(&args)?;
    info!("Parsed configuration: {:#?}", config);

    let (Some(input), Some(output)) = (config.input.as_ref(), config.output.as_ref()) else {
        return Err(CliError::Config("Missing input or output".to_string()));
    };

    let residues = Arc::new(
        config
            .inference
            .build_residue_set()
            .map_err(novoseek::NovoSeekError::from)?,
    );
    let feasibility = if config.inference.use_knapsack {
        let knapsack = load_or_build_knapsack(
            &residues,
            &config.inference,
            input.knapsack_path.as_deref(),
        )?;
        MassFeasibility::Knapsack(Arc::new(knapsack))
    } else {
        info!("Knapsack disabled, decoding without mass constraints");
        MassFeasibility::Disabled
    };

    let model = PeakMatchModel::new(residues.clone(), config.model.clone());
    let pipeline = DenovoPipeline::new(&config.inference, model, residues, feasibility)?;

    processing::process_spectra(
        &input.path,
        &pipeline,
        config.inference.batch_size,
        output,
    )
}
