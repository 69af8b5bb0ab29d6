use super::constants::TokenId;
use serde::Serialize;

/// A partial hypothesis during beam search.
///
/// Every expansion produces a new state, the parent is never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamState {
    pub tokens: Vec<TokenId>,
    pub log_probability: f64,
    pub token_log_probabilities: Vec<f32>,
    /// Mass still missing to reach the (isotope corrected) target.
    pub residual_mass: f64,
}

impl BeamState {
    pub fn root(target_mass: f64) -> Self {
        Self {
            tokens: Vec::new(),
            log_probability: 0.0,
            token_log_probabilities: Vec::new(),
            residual_mass: target_mass,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn extend(&self, token: TokenId, token_log_prob: f32, token_mass: f64) -> Self {
        let mut tokens = Vec::with_capacity(self.tokens.len() + 1);
        tokens.extend_from_slice(&self.tokens);
        tokens.push(token);
        let mut token_log_probabilities = Vec::with_capacity(self.tokens.len() + 1);
        token_log_probabilities.extend_from_slice(&self.token_log_probabilities);
        token_log_probabilities.push(token_log_prob);
        Self {
            tokens,
            log_probability: self.log_probability + token_log_prob as f64,
            token_log_probabilities,
            residual_mass: self.residual_mass - token_mass,
        }
    }
}

/// A finished (or best effort) sequence for one spectrum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// Residue tokens, the stop token is not included.
    pub tokens: Vec<TokenId>,
    pub log_probability: f64,
    /// One entry per residue plus a trailing entry for the stop token
    /// when the sequence was terminated by one.
    pub token_log_probabilities: Vec<f32>,
    pub confidence: f64,
    pub isotope_offset: i8,
    pub mass_error_ppm: f64,
}

impl Candidate {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
