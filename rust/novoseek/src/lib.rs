pub mod config;
pub mod data_sources;
pub mod decoding;
pub mod errors;
pub mod models;
pub mod oracle;
pub mod refinement;
pub mod results;
pub mod scoring;
pub mod traits;
pub mod utils;
extern crate parquet;
#[macro_use]
extern crate parquet_derive;

pub use config::InferenceConfig;
pub use data_sources::{
    SpectraReader,
    read_spectra,
};
pub use decoding::{
    BeamSearchDecoder,
    Knapsack,
    MassFeasibility,
};
pub use errors::{
    NovoSeekError,
    Result,
};
pub use models::{
    PredictionRecord,
    PredictionStatus,
    ResidueSet,
    Spectrum,
};
pub use oracle::PeakMatchModel;
pub use results::PredictionWriter;
pub use scoring::{
    BatchOutput,
    DenovoPipeline,
};
