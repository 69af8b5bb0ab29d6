use crate::errors::ConfigError;
use crate::models::{
    ResidueEntry,
    ResidueRemapping,
    ResidueSet,
};
use half::f16;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Full,
    /// Scores are rounded through half precision floats.
    Reduced,
}

impl Precision {
    #[inline]
    pub fn apply(&self, x: f32) -> f32 {
        match self {
            Precision::Full => x,
            Precision::Reduced => f16::from_f32(x).to_f32(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Auto,
    Cpu,
    Cuda,
    Mps,
}

impl Device {
    /// Every oracle in this crate runs on the CPU, accelerators fall back to it.
    pub fn resolve(&self) -> Device {
        match self {
            Device::Auto | Device::Cpu => Device::Cpu,
            other => {
                warn!("Device {:?} is not available, falling back to cpu", other);
                Device::Cpu
            }
        }
    }
}

/// Immutable inference configuration.
///
/// Built once at startup and passed by reference to every component,
/// nothing in the crate reads configuration from anywhere else.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InferenceConfig {
    pub num_beams: usize,
    pub max_length: usize,
    pub max_charge: u8,
    /// Inclusive range of isotope offsets to try.
    pub isotope_error_range: (i8, i8),
    pub precursor_tolerance_ppm: f64,

    pub use_knapsack: bool,
    pub knapsack_max_mass: f64,
    pub knapsack_mass_scale: f64,
    /// Decode without mass constraints when no completion can match the precursor.
    pub fallback_unconstrained: bool,

    pub suppressed_residues: Vec<String>,
    pub disable_terminal_residues_anywhere: bool,

    pub refine: bool,
    pub refine_all: bool,
    pub refine_threshold: f64,
    pub n_preds: usize,
    pub refine_iterations: usize,
    pub refine_noise_fraction: f32,
    pub refine_temperature: f32,
    pub seed: u64,

    pub batch_size: usize,
    /// Zero means one worker per core.
    pub num_workers: usize,
    pub device: Device,
    pub precision: Precision,

    pub residues: Vec<ResidueEntry>,
    pub residue_remapping: ResidueRemapping,
    pub denovo: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            num_beams: 1,
            max_length: 40,
            max_charge: 10,
            isotope_error_range: (0, 1),
            precursor_tolerance_ppm: 50.0,
            use_knapsack: true,
            knapsack_max_mass: 4000.0,
            knapsack_mass_scale: 10_000.0,
            fallback_unconstrained: false,
            suppressed_residues: Vec::new(),
            disable_terminal_residues_anywhere: true,
            refine: false,
            refine_all: false,
            refine_threshold: 0.9,
            n_preds: 8,
            refine_iterations: 5,
            refine_noise_fraction: 0.1,
            refine_temperature: 1.0,
            seed: 42,
            batch_size: 64,
            num_workers: 0,
            device: Device::Auto,
            precision: Precision::Full,
            residues: ResidueSet::default_entries(),
            residue_remapping: ResidueRemapping::default(),
            denovo: true,
        }
    }
}

impl InferenceConfig {
    pub fn build_residue_set(&self) -> Result<ResidueSet, ConfigError> {
        ResidueSet::new(&self.residues, self.residue_remapping.clone())
    }

    /// Offsets in the order they are tried: closest to zero first.
    pub fn isotope_offsets(&self) -> Vec<i8> {
        let (lo, hi) = self.isotope_error_range;
        let mut out: Vec<i8> = (lo..=hi).collect();
        out.sort_by_key(|&x| (x.unsigned_abs(), x));
        out
    }

    /// Checks for contradictions that make running pointless.
    pub fn validate(&self, max_supported_charge: u8) -> Result<(), ConfigError> {
        if self.max_charge > max_supported_charge {
            return Err(ConfigError::ChargeNotSupported {
                requested: self.max_charge,
                supported: max_supported_charge,
            });
        }
        if self.max_charge == 0 {
            return Err(ConfigError::ValueTooSmall {
                field: "max_charge",
                min: 1.0,
                value: 0.0,
            });
        }
        for (field, value) in [
            ("num_beams", self.num_beams),
            ("max_length", self.max_length),
            ("batch_size", self.batch_size),
        ] {
            if value == 0 {
                return Err(ConfigError::ValueTooSmall {
                    field,
                    min: 1.0,
                    value: 0.0,
                });
            }
        }
        if self.refine && self.n_preds == 0 {
            return Err(ConfigError::ValueTooSmall {
                field: "n_preds",
                min: 1.0,
                value: 0.0,
            });
        }
        let (lo, hi) = self.isotope_error_range;
        if lo > hi {
            return Err(ConfigError::InvertedIsotopeRange(lo, hi));
        }
        if !(0.0..=1.0).contains(&self.refine_threshold) {
            return Err(ConfigError::ValueOutOfRange {
                field: "refine_threshold",
                low: 0.0,
                high: 1.0,
                value: self.refine_threshold,
            });
        }
        if !(0.0..=1.0).contains(&self.refine_noise_fraction) {
            return Err(ConfigError::ValueOutOfRange {
                field: "refine_noise_fraction",
                low: 0.0,
                high: 1.0,
                value: self.refine_noise_fraction as f64,
            });
        }
        if self.refine_temperature <= 0.0 {
            return Err(ConfigError::ValueTooSmall {
                field: "refine_temperature",
                min: f64::MIN_POSITIVE,
                value: self.refine_temperature as f64,
            });
        }
        if self.precursor_tolerance_ppm < 0.0 {
            return Err(ConfigError::ValueTooSmall {
                field: "precursor_tolerance_ppm",
                min: 0.0,
                value: self.precursor_tolerance_ppm,
            });
        }
        if self.use_knapsack {
            if self.knapsack_max_mass <= 0.0 {
                return Err(ConfigError::ValueTooSmall {
                    field: "knapsack_max_mass",
                    min: f64::MIN_POSITIVE,
                    value: self.knapsack_max_mass,
                });
            }
            if self.knapsack_mass_scale <= 0.0 {
                return Err(ConfigError::ValueTooSmall {
                    field: "knapsack_mass_scale",
                    min: f64::MIN_POSITIVE,
                    value: self.knapsack_mass_scale,
                });
            }
        }

        let residues = self.build_residue_set()?;
        residues.ids_for_labels(&self.suppressed_residues, "suppressed_residues")?;
        Ok(())
    }
}
