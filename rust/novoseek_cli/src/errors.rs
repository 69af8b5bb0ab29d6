use novoseek::NovoSeekError;
use novoseek::errors::SpectrumReadingError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Error interpreting the config: {0}")]
    Config(String),

    #[error("Error parsing config: {msg}")]
    ParseError { msg: String },

    #[error("Error reading file {path}: {source}")]
    Io {
        source: std::io::Error,
        path: String,
    },

    #[error("Error reading data: {0}")]
    DataReading(#[from] SpectrumReadingError),

    #[error(transparent)]
    NovoSeek(#[from] NovoSeekError),
}

impl CliError {
    pub fn io(source: std::io::Error, path: &std::path::Path) -> Self {
        CliError::Io {
            source,
            path: path.to_string_lossy().to_string(),
        }
    }
}
