//! Built-in model backends.

mod peak_match;

pub use peak_match::{
    ModelConfig,
    PeakEmbedding,
    PeakMatchModel,
};
