pub mod beam_search;
pub mod knapsack;
pub mod masking;

pub use beam_search::{
    BeamSearchDecoder,
    DecodeResult,
};
pub use knapsack::{
    Knapsack,
    MassFeasibility,
};
pub use masking::TokenMask;
