mod accumulator;
pub mod confidence;
pub mod pipeline;
pub mod timings;

pub use confidence::confidence;
pub use pipeline::{
    BatchOutput,
    DenovoPipeline,
};
pub use timings::InferenceTimings;
