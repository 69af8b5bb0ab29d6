use super::constants::{
    MASS_PROTON,
    MASS_WATER,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A single MS2 spectrum as read from disk.
///
/// Peaks are kept as parallel arrays, the same way they are serialized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Spectrum {
    pub spectrum_id: String,
    pub precursor_mz: f64,
    pub precursor_charge: u8,
    pub mz_array: Arc<[f64]>,
    pub intensity_array: Arc<[f32]>,
    /// Annotated peptide, only present for labelled data.
    #[serde(default)]
    pub sequence: Option<String>,
    /// Any extra column carried along with the spectrum (scan numbers, file names ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Spectrum {
    pub fn new(
        spectrum_id: impl Into<String>,
        precursor_mz: f64,
        precursor_charge: u8,
        mz_array: Vec<f64>,
        intensity_array: Vec<f32>,
    ) -> Self {
        Self {
            spectrum_id: spectrum_id.into(),
            precursor_mz,
            precursor_charge,
            mz_array: mz_array.into(),
            intensity_array: intensity_array.into(),
            sequence: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.sequence = Some(sequence.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Neutral (uncharged) precursor mass.
    pub fn precursor_mass(&self) -> f64 {
        (self.precursor_mz - MASS_PROTON) * self.precursor_charge as f64
    }

    /// Mass the residues of the peptide have to add up to
    /// (neutral precursor mass minus the terminal water).
    pub fn residue_target_mass(&self) -> f64 {
        self.precursor_mass() - MASS_WATER
    }

    pub fn num_peaks(&self) -> usize {
        self.mz_array.len().min(self.intensity_array.len())
    }

    pub fn iter_peaks(&self) -> impl Iterator<Item = (f64, f32)> + '_ {
        self.mz_array
            .iter()
            .copied()
            .zip(self.intensity_array.iter().copied())
    }

    /// Builds a spectrum whose residue target is exactly `residue_mass`.
    pub fn from_residue_mass(
        spectrum_id: impl Into<String>,
        residue_mass: f64,
        charge: u8,
        mz_array: Vec<f64>,
        intensity_array: Vec<f32>,
    ) -> Self {
        let neutral = residue_mass + MASS_WATER;
        let mz = neutral / charge as f64 + MASS_PROTON;
        Self::new(spectrum_id, mz, charge, mz_array, intensity_array)
    }

    pub fn sample() -> Self {
        Self::new(
            "sample_0",
            500.25,
            2,
            vec![175.119, 262.151, 363.198, 476.282, 591.309],
            vec![1.0, 0.5, 0.8, 0.3, 0.9],
        )
        .with_metadata("scan_number", "1234")
        .with_metadata("file", "sample.mzML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_residue_target_roundtrip() {
        for charge in 1..=4u8 {
            let spec = Spectrum::from_residue_mass("x", 500.25, charge, vec![100.0], vec![1.0]);
            assert!((spec.residue_target_mass() - 500.25).abs() < 1e-9);
        }
    }

    #[test]
    fn test_precursor_mass() {
        let spec = Spectrum::new("x", 500.0, 2, vec![], vec![]);
        assert!((spec.precursor_mass() - (2.0 * (500.0 - MASS_PROTON))).abs() < 1e-9);
        assert_eq!(spec.num_peaks(), 0);
    }

    #[test]
    fn test_deserialize_minimal() {
        let json = r#"{
            "spectrum_id": "scan=1",
            "precursor_mz": 450.5,
            "precursor_charge": 2,
            "mz_array": [100.0, 200.0],
            "intensity_array": [1.0, 2.0]
        }"#;
        let spec: Spectrum = serde_json::from_str(json).unwrap();
        assert_eq!(spec.num_peaks(), 2);
        assert!(spec.sequence.is_none());
        assert!(spec.metadata.is_empty());
    }
}
