mod candidate;
pub mod constants;
mod prediction;
mod residues;
mod spectrum;

pub use candidate::{
    BeamState,
    Candidate,
};
pub use constants::TokenId;
pub use prediction::{
    PredictionRecord,
    PredictionStatus,
    RefinementOutcome,
    RejectionReason,
};
pub use residues::{
    Residue,
    ResidueEntry,
    ResidueRemapping,
    ResidueSet,
};
pub use spectrum::Spectrum;
