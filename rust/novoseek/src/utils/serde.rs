use crate::config::InferenceConfig;
use crate::decoding::{
    Knapsack,
    TokenMask,
};
use crate::errors::{
    NovoSeekError,
    Result,
};
use crate::models::ResidueSet;
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::{
    error,
    info,
    warn,
};
use zstd::stream::read::Decoder;
use zstd::stream::write::Encoder;

// Save with compression
pub fn save_compressed<T: Serialize>(data: &T, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| NovoSeekError::io(e, path))?;
    let mut encoder = Encoder::new(file, 3).map_err(|e| NovoSeekError::io(e, path))?;
    bincode::serialize_into(&mut encoder, data)?;
    encoder.finish().map_err(|e| NovoSeekError::io(e, path))?;
    Ok(())
}

// Load with decompression
pub fn load_compressed<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| NovoSeekError::io(e, path))?;
    let decoder = Decoder::new(file).map_err(|e| NovoSeekError::io(e, path))?;
    let data = bincode::deserialize_from(decoder)?;
    Ok(data)
}

fn maybe_cache_load_knapsack(
    cache_loc: &Path,
    residues: &ResidueSet,
    mask: &TokenMask,
    config: &InferenceConfig,
) -> Option<Knapsack> {
    if !cache_loc.exists() {
        info!("No knapsack cache at {:?}", cache_loc);
        return None;
    }
    info!("Attempting to load knapsack from cache at {:?}", cache_loc);
    match load_compressed::<Knapsack>(cache_loc) {
        Ok(ks)
            if ks.is_compatible(
                residues,
                mask,
                config.knapsack_max_mass,
                config.knapsack_mass_scale,
            ) =>
        {
            info!("Loaded knapsack from cache at {:?}", cache_loc);
            Some(ks)
        }
        Ok(_) => {
            warn!(
                "Knapsack cached at {:?} was built for a different vocabulary or mass range, rebuilding",
                cache_loc
            );
            None
        }
        Err(e) => {
            error!("Failed to load knapsack from cache at {:?}: {:?}", cache_loc, e);
            None
        }
    }
}

/// Loads the knapsack from `cache_loc` if a compatible one is there,
/// otherwise builds it and (best effort) saves it for next time.
///
/// The indexed residues follow the masking rules in `config`, so changing
/// the suppressed residues invalidates a cached index.
pub fn load_or_build_knapsack(
    residues: &ResidueSet,
    config: &InferenceConfig,
    cache_loc: Option<&Path>,
) -> Result<Knapsack> {
    let st = Instant::now();
    let mask = TokenMask::new(
        residues,
        &config.suppressed_residues,
        config.disable_terminal_residues_anywhere,
    )?;
    if let Some(ks) = cache_loc.and_then(|p| maybe_cache_load_knapsack(p, residues, &mask, config))
    {
        return Ok(ks);
    }

    info!(
        "Building knapsack up to {} Da at scale {} (might take a bit)",
        config.knapsack_max_mass, config.knapsack_mass_scale
    );
    let ks = Knapsack::construct(
        residues,
        &mask,
        config.knapsack_max_mass,
        config.knapsack_mass_scale,
    )?;

    if let Some(path) = cache_loc {
        info!("Saving knapsack to cache at {:?}", path);
        if let Err(e) = save_compressed(&ks, path) {
            error!("Failed to save knapsack to cache: {:?}", e);
        } else {
            info!("Saved knapsack to cache");
        }
    }
    info!("Loading knapsack took: {:#?}", st.elapsed());
    Ok(ks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ResidueEntry,
        ResidueRemapping,
    };

    fn small_config() -> InferenceConfig {
        InferenceConfig {
            knapsack_max_mass: 300.0,
            knapsack_mass_scale: 100.0,
            residues: vec![ResidueEntry::new("G", 57.02), ResidueEntry::new("A", 71.04)],
            residue_remapping: ResidueRemapping::empty(),
            ..Default::default()
        }
    }

    #[test]
    fn test_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knapsack.bin.zst");
        let config = small_config();
        let residues = config.build_residue_set().unwrap();

        let built = load_or_build_knapsack(&residues, &config, Some(&path)).unwrap();
        assert!(path.exists());
        let loaded: Knapsack = load_compressed(&path).unwrap();
        assert_eq!(built, loaded);
        let again = load_or_build_knapsack(&residues, &config, Some(&path)).unwrap();
        assert_eq!(built, again);
    }

    #[test]
    fn test_incompatible_cache_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knapsack.bin.zst");
        let config = small_config();
        let residues = config.build_residue_set().unwrap();
        load_or_build_knapsack(&residues, &config, Some(&path)).unwrap();

        let wider = InferenceConfig {
            knapsack_max_mass: 400.0,
            ..small_config()
        };
        let ks = load_or_build_knapsack(&residues, &wider, Some(&path)).unwrap();
        assert_eq!(ks.max_mass(), 400.0);
        assert!(ks.is_feasible(71.04, 0.01, 1));

        let without_a = InferenceConfig {
            suppressed_residues: vec!["A".into()],
            ..wider
        };
        let ks = load_or_build_knapsack(&residues, &without_a, Some(&path)).unwrap();
        assert!(!ks.is_feasible(71.04, 0.01, 1));
    }

    #[test]
    fn test_corrupt_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.zst");
        std::fs::write(&path, b"not zstd at all").unwrap();
        assert!(load_compressed::<Knapsack>(&path).is_err());
        let config = small_config();
        let residues = config.build_residue_set().unwrap();
        // Falls back to building.
        assert!(load_or_build_knapsack(&residues, &config, Some(&path)).is_ok());
    }
}
