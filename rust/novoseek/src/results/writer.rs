//! Tabular output, one row per spectrum.
//!
//! Both formats share [`PredictionRow`] as their fixed schema, CSV through
//! serde and Parquet through `parquet_derive`. Rows are buffered and flushed
//! one row group at a time.

use crate::errors::{
    NovoSeekError,
    Result,
};
use crate::models::PredictionRecord;
use parquet::file::writer::SerializedFileWriter;
use parquet::record::RecordWriter;
use serde::Serialize;
use std::fs::File;
use std::path::{
    Path,
    PathBuf,
};
use tracing::{
    debug,
    info,
};

#[derive(Debug, Clone, PartialEq, Serialize, ParquetRecordWriter)]
pub struct PredictionRow {
    pub spectrum_id: String,
    pub preds: String,
    pub preds_tokenised: String,
    pub log_probabilities: Option<f64>,
    pub token_log_probabilities: String,
    pub confidence: Option<f64>,
    pub refined: bool,
    pub refinement: String,
    pub status: String,
    pub isotope_offset: Option<i32>,
    pub mass_error_ppm: Option<f64>,
    pub targets: Option<String>,

    // Passthrough
    pub id: Option<String>,
    pub experiment_name: Option<String>,
    pub scan_number: Option<String>,
    pub spectrum_index: Option<String>,
    pub global_index: Option<String>,
    pub file_index: Option<String>,
    pub file: Option<String>,
    pub sample: Option<String>,
    pub index: Option<String>,
    pub fileno: Option<String>,
    pub precursor_mz: Option<f64>,
    pub precursor_charge: Option<i32>,
}

impl From<&PredictionRecord> for PredictionRow {
    fn from(rec: &PredictionRecord) -> Self {
        let pt = |key: &str| rec.passthrough.get(key).cloned();
        let token_log_probabilities = rec
            .token_log_probabilities
            .iter()
            .map(|x| format!("{:.5}", x))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            spectrum_id: rec.spectrum_id.clone(),
            preds: rec.preds(),
            preds_tokenised: rec.preds_tokenised(),
            log_probabilities: rec.log_probability,
            token_log_probabilities,
            confidence: rec.confidence,
            refined: rec.refined(),
            refinement: rec.refinement.as_str().to_string(),
            status: rec.status.as_str().to_string(),
            isotope_offset: rec.isotope_offset.map(|x| x as i32),
            mass_error_ppm: rec.mass_error_ppm,
            targets: rec.target.clone(),
            id: pt("id"),
            experiment_name: pt("experiment_name"),
            scan_number: pt("scan_number"),
            spectrum_index: pt("spectrum_index"),
            global_index: pt("global_index"),
            file_index: pt("file_index"),
            file: pt("file"),
            sample: pt("sample"),
            index: pt("index"),
            fileno: pt("fileno"),
            precursor_mz: pt("precursor_mz").and_then(|x| x.parse().ok()),
            precursor_charge: pt("precursor_charge").and_then(|x| x.parse().ok()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Parquet,
}

impl OutputFormat {
    /// Anything that is not `.parquet` is written as CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("parquet") => OutputFormat::Parquet,
            _ => OutputFormat::Csv,
        }
    }
}

fn create_output_file(path: &Path) -> Result<File> {
    File::create_new(path).map_err(|err| {
        tracing::error!("Failed to open file {:?} with error: {}", path, err);
        NovoSeekError::io(err, path)
    })
}

pub struct CsvPredictionWriter {
    writer: csv::Writer<File>,
    num_rows: usize,
}

impl CsvPredictionWriter {
    pub fn new(out_path: &Path) -> Result<Self> {
        let file = create_output_file(out_path)?;
        Ok(Self {
            writer: csv::Writer::from_writer(file),
            num_rows: 0,
        })
    }

    pub fn add(&mut self, record: &PredictionRecord) -> Result<()> {
        self.writer.serialize(PredictionRow::from(record))?;
        self.num_rows += 1;
        Ok(())
    }

    pub fn close(mut self) -> Result<usize> {
        self.writer
            .flush()
            .map_err(|e| NovoSeekError::Io { source: e, path: None })?;
        Ok(self.num_rows)
    }
}

pub struct ParquetPredictionWriter {
    row_group_size: usize,
    writer: SerializedFileWriter<File>,
    buffer: Vec<PredictionRow>,
    num_rows: usize,
}

impl ParquetPredictionWriter {
    pub fn new(out_path: &Path, row_group_size: usize) -> Result<Self> {
        let file = create_output_file(out_path)?;
        let rows: &[PredictionRow] = &[];
        let schema = rows.schema()?;
        let writer = SerializedFileWriter::new(file, schema, Default::default())?;
        Ok(Self {
            buffer: Vec::with_capacity(row_group_size),
            writer,
            row_group_size: row_group_size.max(1),
            num_rows: 0,
        })
    }

    fn flush_to_file(&mut self) -> Result<()> {
        debug!("Flushing {} predictions to file", self.buffer.len());
        let mut row_group = self.writer.next_row_group()?;
        self.buffer.as_slice().write_to_row_group(&mut row_group)?;
        row_group.close()?;
        self.num_rows += self.buffer.len();
        self.buffer.clear();
        Ok(())
    }

    pub fn add(&mut self, record: &PredictionRecord) -> Result<()> {
        self.buffer.push(PredictionRow::from(record));
        if self.buffer.len() >= self.row_group_size {
            self.flush_to_file()?;
        }
        Ok(())
    }

    pub fn close(mut self) -> Result<usize> {
        if !self.buffer.is_empty() {
            self.flush_to_file()?;
        }
        self.writer.close()?;
        Ok(self.num_rows)
    }
}

/// Writer for either output format, picked from the file extension.
pub enum PredictionWriter {
    Csv(CsvPredictionWriter),
    Parquet(ParquetPredictionWriter),
}

impl PredictionWriter {
    pub fn new(out_path: impl AsRef<Path>, row_group_size: usize) -> Result<Self> {
        let path = out_path.as_ref();
        let format = OutputFormat::from_path(path);
        info!("Writing {:?} predictions to {}", format, path.display());
        Ok(match format {
            OutputFormat::Csv => PredictionWriter::Csv(CsvPredictionWriter::new(path)?),
            OutputFormat::Parquet => {
                PredictionWriter::Parquet(ParquetPredictionWriter::new(path, row_group_size)?)
            }
        })
    }

    pub fn add(&mut self, record: &PredictionRecord) -> Result<()> {
        match self {
            PredictionWriter::Csv(w) => w.add(record),
            PredictionWriter::Parquet(w) => w.add(record),
        }
    }

    pub fn add_all<'a>(&mut self, records: impl IntoIterator<Item = &'a PredictionRecord>) -> Result<()> {
        for rec in records {
            self.add(rec)?;
        }
        Ok(())
    }

    /// Flushes everything and returns the number of rows written.
    pub fn close(self) -> Result<usize> {
        match self {
            PredictionWriter::Csv(w) => w.close(),
            PredictionWriter::Parquet(w) => w.close(),
        }
    }
}

/// Default location for results inside an output directory.
pub fn default_output_path(out_dir: &Path, format: OutputFormat) -> PathBuf {
    match format {
        OutputFormat::Csv => out_dir.join("predictions.csv"),
        OutputFormat::Parquet => out_dir.join("predictions.parquet"),
    }
}
