use super::constants::{
    EOS_TOKEN,
    NUM_SPECIAL_TOKENS,
    PAD_TOKEN,
    SOS_TOKEN,
    TokenId,
};
use crate::errors::ConfigError;
use regex::Regex;
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::{
    HashMap,
    HashSet,
};
use std::sync::LazyLock;

/// Matches, in order of preference:
/// - a bracketed N-terminal modification (`[UNIMOD:1]` or `[UNIMOD:1]-`)
/// - a parenthesised standalone modification (`(+42.01)`)
/// - an amino acid with an optional attached modification (`M`, `M(ox)`, `C[UNIMOD:4]`)
static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[[^\]]+\]-?|\([^)]+\)|[A-Z](?:\[[^\]]+\]|\([^)]+\))?")
        .expect("Token regex is valid")
});

/// Configuration form of a residue, the id is assigned by position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResidueEntry {
    pub label: String,
    pub mass: f64,
    /// Whether the token may only appear at the N-terminus.
    /// When missing, labels without a leading amino acid letter are
    /// considered N-terminal (e.g. `[UNIMOD:1]` or `(+42.01)`).
    #[serde(default)]
    pub n_terminal: Option<bool>,
}

impl ResidueEntry {
    pub fn new(label: impl Into<String>, mass: f64) -> Self {
        Self {
            label: label.into(),
            mass,
            n_terminal: None,
        }
    }

    fn infer_n_terminal(&self) -> bool {
        self.n_terminal
            .unwrap_or_else(|| matches!(self.label.chars().next(), Some('[') | Some('(')))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Residue {
    pub id: TokenId,
    pub label: String,
    pub mass: f64,
    pub n_terminal: bool,
}

/// Rewrites alternate modification notations to canonical identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ResidueRemapping(HashMap<String, String>);

impl Default for ResidueRemapping {
    fn default() -> Self {
        let pairs = [
            ("M(ox)", "M[UNIMOD:35]"),
            ("M(+15.99)", "M[UNIMOD:35]"),
            ("S(p)", "S[UNIMOD:21]"),
            ("T(p)", "T[UNIMOD:21]"),
            ("Y(p)", "Y[UNIMOD:21]"),
            ("S(+79.97)", "S[UNIMOD:21]"),
            ("T(+79.97)", "T[UNIMOD:21]"),
            ("Y(+79.97)", "Y[UNIMOD:21]"),
            ("Q(+0.98)", "Q[UNIMOD:7]"),
            ("N(+0.98)", "N[UNIMOD:7]"),
            ("Q(+.98)", "Q[UNIMOD:7]"),
            ("N(+.98)", "N[UNIMOD:7]"),
            ("C(+57.02)", "C[UNIMOD:4]"),
            ("(+42.01)", "[UNIMOD:1]"),
            ("(+43.01)", "[UNIMOD:5]"),
            ("(-17.03)", "[UNIMOD:385]"),
        ];
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl ResidueRemapping {
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    pub fn from_pairs<K: Into<String>, V: Into<String>>(
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns the canonical form of a label, or the label itself when
    /// no rewrite is registered.
    pub fn apply<'a>(&'a self, label: &'a str) -> &'a str {
        self.0.get(label).map(|x| x.as_str()).unwrap_or(label)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Immutable vocabulary and mass table.
///
/// Ids 0, 1 and 2 are always the structural `[PAD]`, `[SOS]` and `[EOS]`
/// tokens (zero mass), the configured residues follow in order.
#[derive(Debug, Clone)]
pub struct ResidueSet {
    residues: Vec<Residue>,
    by_label: HashMap<String, TokenId>,
    remapping: ResidueRemapping,
}

impl ResidueSet {
    pub fn new(entries: &[ResidueEntry], remapping: ResidueRemapping) -> Result<Self, ConfigError> {
        let mut residues = Vec::with_capacity(entries.len() + NUM_SPECIAL_TOKENS);
        for (id, label) in [PAD_TOKEN, SOS_TOKEN, EOS_TOKEN].into_iter().enumerate() {
            residues.push(Residue {
                id,
                label: label.to_string(),
                mass: 0.0,
                n_terminal: false,
            });
        }

        let mut by_label = HashMap::with_capacity(entries.len() * 2 + NUM_SPECIAL_TOKENS);
        for res in residues.iter() {
            by_label.insert(res.label.clone(), res.id);
        }

        for entry in entries {
            if by_label.contains_key(&entry.label) {
                return Err(ConfigError::DuplicatedResidue(entry.label.clone()));
            }
            let id = residues.len();
            by_label.insert(entry.label.clone(), id);
            residues.push(Residue {
                id,
                label: entry.label.clone(),
                mass: entry.mass,
                n_terminal: entry.infer_n_terminal(),
            });
        }

        // Canonical aliases, so `M[UNIMOD:35]` resolves to a vocabulary
        // that spells it `M(ox)`. Real labels always win over aliases.
        for res in residues.iter().skip(NUM_SPECIAL_TOKENS) {
            let canonical = remapping.apply(&res.label);
            if canonical != res.label {
                by_label.entry(canonical.to_string()).or_insert(res.id);
            }
        }

        Ok(Self {
            residues,
            by_label,
            remapping,
        })
    }

    /// Standard amino acids plus the modifications the reference models ship with.
    pub fn default_entries() -> Vec<ResidueEntry> {
        [
            ("G", 57.021464),
            ("A", 71.037114),
            ("S", 87.032028),
            ("P", 97.052764),
            ("V", 99.068414),
            ("T", 101.047670),
            ("C[UNIMOD:4]", 160.030649),
            ("L", 113.084064),
            ("I", 113.084064),
            ("N", 114.042927),
            ("D", 115.026943),
            ("Q", 128.058578),
            ("K", 128.094963),
            ("E", 129.042593),
            ("M", 131.040485),
            ("H", 137.058912),
            ("F", 147.068414),
            ("R", 156.101111),
            ("Y", 163.063329),
            ("W", 186.079313),
            ("M[UNIMOD:35]", 147.035400),
            ("N[UNIMOD:7]", 115.026943),
            ("Q[UNIMOD:7]", 129.042594),
            ("S[UNIMOD:21]", 166.998028),
            ("T[UNIMOD:21]", 181.01367),
            ("Y[UNIMOD:21]", 243.029660),
            ("[UNIMOD:385]", -17.026549),
            ("[UNIMOD:5]", 43.005814),
            ("[UNIMOD:1]", 42.010565),
        ]
        .into_iter()
        .map(|(label, mass)| ResidueEntry::new(label, mass))
        .collect()
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    pub fn get(&self, id: TokenId) -> Option<&Residue> {
        self.residues.get(id)
    }

    /// Mass of a token, unknown ids weigh nothing.
    pub fn mass(&self, id: TokenId) -> f64 {
        self.residues.get(id).map(|r| r.mass).unwrap_or(0.0)
    }

    pub fn label(&self, id: TokenId) -> &str {
        self.residues
            .get(id)
            .map(|r| r.label.as_str())
            .unwrap_or(PAD_TOKEN)
    }

    /// Label after applying the residue remapping.
    pub fn canonical_label(&self, id: TokenId) -> &str {
        self.remapping.apply(self.label(id))
    }

    pub fn is_special(&self, id: TokenId) -> bool {
        id < NUM_SPECIAL_TOKENS
    }

    pub fn is_n_terminal(&self, id: TokenId) -> bool {
        self.residues.get(id).map(|r| r.n_terminal).unwrap_or(false)
    }

    pub fn remapping(&self) -> &ResidueRemapping {
        &self.remapping
    }

    /// Iterates over the non structural residues.
    pub fn residues(&self) -> impl Iterator<Item = &Residue> {
        self.residues.iter().skip(NUM_SPECIAL_TOKENS)
    }

    pub fn id_of(&self, label: &str) -> Option<TokenId> {
        self.by_label
            .get(label)
            .or_else(|| self.by_label.get(self.remapping.apply(label)))
            .copied()
    }

    pub fn ids_for_labels<S: AsRef<str>>(
        &self,
        labels: &[S],
        context: &'static str,
    ) -> Result<HashSet<TokenId>, ConfigError> {
        labels
            .iter()
            .map(|l| {
                self.id_of(l.as_ref())
                    .ok_or_else(|| ConfigError::UnknownResidue {
                        label: l.as_ref().to_string(),
                        context,
                    })
            })
            .collect()
    }

    pub fn sequence_mass(&self, tokens: &[TokenId]) -> f64 {
        tokens.iter().map(|&t| self.mass(t)).sum()
    }

    /// Splits a peptide string into vocabulary tokens.
    ///
    /// Alternate notations are remapped before lookup, so both `PEM(ox)K`
    /// and `PEM[UNIMOD:35]K` resolve to the same ids.
    pub fn tokenize(&self, peptide: &str) -> Result<Vec<TokenId>, ConfigError> {
        let mut out = Vec::with_capacity(peptide.len());
        let mut last_end = 0;
        for m in TOKEN_REGEX.find_iter(peptide) {
            if m.start() != last_end {
                return Err(ConfigError::UnknownResidue {
                    label: peptide[last_end..m.start()].to_string(),
                    context: "peptide",
                });
            }
            last_end = m.end();
            let raw = m.as_str().trim_end_matches('-');
            let id = self.id_of(raw).ok_or_else(|| ConfigError::UnknownResidue {
                label: raw.to_string(),
                context: "peptide",
            })?;
            out.push(id);
        }
        if last_end != peptide.len() {
            return Err(ConfigError::UnknownResidue {
                label: peptide[last_end..].to_string(),
                context: "peptide",
            });
        }
        Ok(out)
    }

    /// Renders tokens with canonical labels, joined by `sep`.
    pub fn render(&self, tokens: &[TokenId], sep: &str) -> String {
        tokens
            .iter()
            .map(|&t| self.canonical_label(t))
            .collect::<Vec<_>>()
            .join(sep)
    }
}

impl Default for ResidueSet {
    fn default() -> Self {
        Self::new(&Self::default_entries(), ResidueRemapping::default())
            .expect("Default residues are unique")
    }
}
