//! Capability interfaces for the models used during inference.
//!
//! The decoder and refiner only ever talk to these traits, so any model
//! (a neural network, the bundled peak matching oracle, or a lookup
//! table in a test) can be plugged in.

use crate::models::{
    Spectrum,
    TokenId,
};

/// Turns a spectrum into whatever representation the other models consume.
pub trait SpectrumEncoder: Send + Sync {
    type Embedding: Send + Sync;

    fn encode(&self, spectrum: &Spectrum) -> Self::Embedding;

    /// Highest precursor charge the model was built for.
    fn max_supported_charge(&self) -> u8 {
        u8::MAX
    }
}

/// Autoregressive next token model.
pub trait SequenceScorer<E>: Send + Sync {
    /// Log-probabilities over the whole vocabulary (indexed by token id)
    /// for the token that follows `prefix`.
    fn score(&self, prefix: &[TokenId], embedding: &E) -> Vec<f32>;

    /// Scores every active beam of a spectrum at once.
    fn score_batch(&self, prefixes: &[&[TokenId]], embedding: &E) -> Vec<Vec<f32>> {
        prefixes
            .iter()
            .map(|prefix| self.score(prefix, embedding))
            .collect()
    }
}

/// Non autoregressive model used for iterative refinement.
pub trait Denoiser<E>: Send + Sync {
    /// Per position log-probabilities over the vocabulary, one row per
    /// position of `tokens`. `[PAD]` at a position means "no residue".
    fn denoise(&self, tokens: &[TokenId], embedding: &E, iteration: usize) -> Vec<Vec<f32>>;
}
