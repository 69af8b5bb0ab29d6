use crate::errors::ConfigError;
use crate::models::{
    ResidueSet,
    TokenId,
};

/// Static per token masking rules shared by beam search and refinement.
///
/// Both rules are applied regardless of the beam width.
#[derive(Debug, Clone)]
pub struct TokenMask {
    emittable: Vec<bool>,
    n_terminal_only: Vec<bool>,
    disable_terminal_anywhere: bool,
}

impl TokenMask {
    pub fn new(
        residues: &ResidueSet,
        suppressed: &[String],
        disable_terminal_anywhere: bool,
    ) -> Result<Self, ConfigError> {
        let suppressed = residues.ids_for_labels(suppressed, "suppressed_residues")?;
        let emittable = (0..residues.len())
            .map(|id| !residues.is_special(id) && !suppressed.contains(&id))
            .collect();
        let n_terminal_only = (0..residues.len())
            .map(|id| residues.is_n_terminal(id))
            .collect();
        Ok(Self {
            emittable,
            n_terminal_only,
            disable_terminal_anywhere,
        })
    }

    /// Whether a residue token may be placed at `position` (0 based).
    /// Structural tokens are never allowed here.
    #[inline]
    pub fn allows(&self, token: TokenId, position: usize) -> bool {
        if !self.emittable.get(token).copied().unwrap_or(false) {
            return false;
        }
        !(self.disable_terminal_anywhere && position > 0 && self.n_terminal_only[token])
    }

    pub fn allows_sequence(&self, tokens: &[TokenId]) -> bool {
        tokens
            .iter()
            .enumerate()
            .all(|(pos, &tok)| self.allows(tok, pos))
    }
}
