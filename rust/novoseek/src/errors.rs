use std::path::PathBuf;
use thiserror::Error;

/// Configuration-level contradictions.
///
/// These are the only failures that are fatal at startup, everything
/// that goes wrong for a single spectrum is reported through
/// [`crate::models::PredictionStatus`] instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("max_charge ({requested}) exceeds what the model supports ({supported})")]
    ChargeNotSupported { requested: u8, supported: u8 },

    #[error("expected {field} to be at least {min}, got {value}")]
    ValueTooSmall {
        field: &'static str,
        min: f64,
        value: f64,
    },

    #[error("expected {field} to be within [{low}, {high}], got {value}")]
    ValueOutOfRange {
        field: &'static str,
        low: f64,
        high: f64,
        value: f64,
    },

    #[error("isotope error range is inverted: ({0}, {1})")]
    InvertedIsotopeRange(i8, i8),

    #[error("unknown residue '{label}' in {context}")]
    UnknownResidue { label: String, context: &'static str },

    #[error("duplicated residue label '{0}' in vocabulary")]
    DuplicatedResidue(String),

    #[error("vocabulary has {0} tokens, the knapsack index supports at most 255")]
    VocabularyTooLarge(usize),

    #[error("no residue with a positive mass available to build the knapsack")]
    NoPositiveResidues,
}

#[derive(Error, Debug)]
pub enum SpectrumReadingError {
    #[error("error parsing spectrum ({context}): {source}")]
    ParsingError {
        source: serde_json::Error,
        context: &'static str,
    },

    #[error("error reading spectra ({context}) at {path:?}: {source}")]
    FileReadingError {
        source: std::io::Error,
        context: &'static str,
        path: PathBuf,
    },

    #[error("error decoding MessagePack spectrum: {0}")]
    MessagePackError(#[from] rmp_serde::decode::Error),
}

#[derive(Error, Debug)]
pub enum NovoSeekError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    #[error("parse error: {msg}")]
    ParseError { msg: String },

    #[error(transparent)]
    SpectrumReading(#[from] SpectrumReadingError),

    #[error("knapsack cache error: {msg}")]
    KnapsackCache { msg: String },

    #[error("output error: {msg}")]
    Output { msg: String },

    #[error("could not start worker threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, NovoSeekError>;

impl From<serde_json::Error> for NovoSeekError {
    fn from(val: serde_json::Error) -> Self {
        NovoSeekError::ParseError {
            msg: val.to_string(),
        }
    }
}

impl From<csv::Error> for NovoSeekError {
    fn from(x: csv::Error) -> Self {
        Self::Output { msg: x.to_string() }
    }
}

impl From<parquet::errors::ParquetError> for NovoSeekError {
    fn from(x: parquet::errors::ParquetError) -> Self {
        Self::Output { msg: x.to_string() }
    }
}

impl From<bincode::Error> for NovoSeekError {
    fn from(x: bincode::Error) -> Self {
        Self::KnapsackCache { msg: x.to_string() }
    }
}

impl NovoSeekError {
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }
}
