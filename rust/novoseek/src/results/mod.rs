pub mod assembler;
pub mod writer;

pub use assembler::{
    PASSTHROUGH_COLUMNS,
    RefinementUpdate,
    ResultAssembler,
};
pub use writer::{
    OutputFormat,
    PredictionRow,
    PredictionWriter,
    default_output_path,
};
