use super::config::OutputConfig;
use crate::errors::CliError;
use indicatif::{
    ProgressIterator,
    ProgressStyle,
};
use novoseek::models::Spectrum;
use novoseek::oracle::PeakMatchModel;
use novoseek::scoring::InferenceTimings;
use novoseek::{
    DenovoPipeline,
    PredictionWriter,
    read_spectra,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::{
    debug,
    info,
};

pub fn main_loop(
    spectra: &[Spectrum],
    pipeline: &DenovoPipeline<PeakMatchModel>,
    batch_size: usize,
    output: &OutputConfig,
) -> std::result::Result<(), CliError> {
    let mut chunk_num = 0;
    let mut first_index = 0;
    let mut timings = InferenceTimings::default();
    let mut status_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let start = Instant::now();

    let out_path = output.resolved_path();
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CliError::io(e, parent))?;
    }
    let mut writer = PredictionWriter::new(&out_path, output.row_group_size)?;
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
    )
    .map_err(|e| CliError::Config(e.to_string()))?;

    for chunk in spectra.chunks(batch_size.max(1)).progress_with_style(style) {
        let out = pipeline.run_batch(chunk, first_index);
        first_index += chunk.len();
        for (status, count) in out.status_counts() {
            *status_counts.entry(status).or_insert(0) += count;
        }
        timings += out.timings;
        if let Some(best) = out
            .records
            .iter()
            .filter_map(|r| r.confidence.map(|c| (c, r)))
            .max_by(|a, b| a.0.total_cmp(&b.0))
        {
            debug!("Best prediction in chunk: {:#?}", best.1);
        }
        writer.add_all(out.records.iter())?;
        chunk_num += 1;
    }

    let nwritten = writer.close()?;
    info!(
        "Processed {} spectra, wrote {} predictions to {}",
        spectra.len(),
        nwritten,
        out_path.display()
    );
    for (status, count) in status_counts.iter() {
        info!("{:>36}: {}", status, count);
    }
    info!("Time per stage: {}", serde_json::to_string(&timings).unwrap_or_default());
    info!(
        "Finished processing {} chunks in {:?}",
        chunk_num,
        start.elapsed()
    );
    Ok(())
}

pub fn process_spectra(
    path: &Path,
    pipeline: &DenovoPipeline<PeakMatchModel>,
    batch_size: usize,
    output: &OutputConfig,
) -> std::result::Result<(), CliError> {
    let st = Instant::now();
    let spectra = read_spectra(path)?;
    info!(
        "Loading {} spectra took: {:?} for {}",
        spectra.len(),
        st.elapsed(),
        path.display()
    );

    main_loop(&spectra, pipeline, batch_size, output)
}
