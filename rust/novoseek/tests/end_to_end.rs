use novoseek::decoding::MassFeasibility;
use novoseek::models::constants::{
    MASS_PROTON,
    MASS_WATER,
};
use novoseek::models::{
    PredictionStatus,
    RefinementOutcome,
    ResidueSet,
    Spectrum,
};
use novoseek::oracle::{
    ModelConfig,
    PeakMatchModel,
};
use novoseek::utils::load_or_build_knapsack;
use novoseek::{
    DenovoPipeline,
    InferenceConfig,
    PredictionWriter,
    read_spectra,
};
use std::io::Write;
use std::sync::Arc;

/// Singly charged b and y ladders, unit intensity.
fn ladder(residues: &ResidueSet, id: &str, peptide: &str) -> Spectrum {
    let tokens = residues.tokenize(peptide).unwrap();
    let total = residues.sequence_mass(&tokens);
    let mut mzs = Vec::new();
    let mut acc = 0.0;
    for &t in tokens[..tokens.len() - 1].iter() {
        acc += residues.mass(t);
        mzs.push(acc + MASS_PROTON);
        mzs.push(total - acc + MASS_WATER + MASS_PROTON);
    }
    mzs.sort_by(|a, b| a.total_cmp(b));
    let ints = vec![1.0; mzs.len()];
    Spectrum::from_residue_mass(id, total, 2, mzs, ints)
        .with_sequence(peptide)
        .with_metadata("scan_number", id)
}

fn base_config() -> InferenceConfig {
    InferenceConfig {
        num_beams: 3,
        max_length: 12,
        knapsack_max_mass: 1200.0,
        knapsack_mass_scale: 1000.0,
        denovo: false,
        ..Default::default()
    }
}

fn pipeline(config: &InferenceConfig) -> (DenovoPipeline<PeakMatchModel>, Arc<ResidueSet>) {
    let residues = Arc::new(config.build_residue_set().unwrap());
    let knapsack = load_or_build_knapsack(&residues, config, None).unwrap();
    let model = PeakMatchModel::new(residues.clone(), ModelConfig::default());
    let pipeline = DenovoPipeline::new(
        config,
        model,
        residues.clone(),
        MassFeasibility::Knapsack(Arc::new(knapsack)),
    )
    .unwrap();
    (pipeline, residues)
}

#[test]
fn test_recovers_ladder_peptides() {
    let config = base_config();
    let (pipeline, residues) = pipeline(&config);
    let spectra = vec![
        ladder(&residues, "1", "PASTWK"),
        ladder(&residues, "2", "SPVTAK"),
        Spectrum::new("3", 400.0, 0, vec![100.0], vec![1.0]),
        Spectrum::new("4", 400.0, 2, vec![], vec![]),
    ];
    let out = pipeline.run_batch(&spectra, 0);
    assert_eq!(out.records.len(), spectra.len());

    let first = &out.records[0];
    assert_eq!(first.status, PredictionStatus::Ok);
    assert_eq!(first.preds(), "PASTWK");
    assert_eq!(first.isotope_offset, Some(0));
    assert_eq!(first.target.as_deref(), Some("PASTWK"));
    assert!(first.confidence.unwrap() > 0.5);
    assert!(first.mass_error_ppm.unwrap().abs() <= config.precursor_tolerance_ppm);
    assert_eq!(first.passthrough.get("scan_number").map(String::as_str), Some("1"));

    assert_eq!(out.records[1].preds(), "SPVTAK");
    assert_eq!(
        out.records[2].status.as_str(),
        "input_rejected:invalid_charge"
    );
    assert_eq!(out.records[3].status.as_str(), "input_rejected:no_peaks");
    assert!(out.records[3].sequence.is_none());

    let counts = out.status_counts();
    assert_eq!(counts.get("ok"), Some(&2));
}

#[test]
fn test_refined_outputs_stay_mass_consistent() {
    let config = InferenceConfig {
        refine: true,
        refine_all: true,
        n_preds: 3,
        refine_iterations: 2,
        ..base_config()
    };
    let (pipeline, residues) = pipeline(&config);
    let spectra = vec![
        ladder(&residues, "1", "PASTWK"),
        ladder(&residues, "2", "SPVTAK"),
    ];
    let out = pipeline.run_batch(&spectra, 0);
    for (rec, spec) in out.records.iter().zip(spectra.iter()) {
        assert_ne!(rec.refinement, RefinementOutcome::NotRequested);
        let tokens = residues.tokenize(&rec.preds()).unwrap();
        let offset = rec.isotope_offset.unwrap() as f64;
        let target = spec.residue_target_mass() - offset * 1.00335483;
        let err = (residues.sequence_mass(&tokens) - target).abs();
        assert!(err <= target * config.precursor_tolerance_ppm * 1e-6);
    }

    // Same inputs, same answers, whatever the batch boundaries.
    let again: Vec<_> = spectra
        .iter()
        .enumerate()
        .flat_map(|(i, s)| pipeline.run_batch(std::slice::from_ref(s), i).records)
        .collect();
    assert_eq!(again, out.records);
}

#[test]
fn test_file_to_file() {
    let config = base_config();
    let (pipeline, residues) = pipeline(&config);
    let dir = tempfile::tempdir().unwrap();

    let input = dir.path().join("spectra.ndjson");
    let mut file = std::fs::File::create(&input).unwrap();
    for (i, peptide) in ["PASTWK", "SPVTAK", "VTPSAK"].iter().enumerate() {
        let spec = ladder(&residues, &i.to_string(), peptide);
        serde_json::to_writer(&mut file, &spec).unwrap();
        file.write_all(b"\n").unwrap();
    }
    drop(file);

    let spectra = read_spectra(&input).unwrap();
    assert_eq!(spectra.len(), 3);

    let output = dir.path().join("predictions.csv");
    let mut writer = PredictionWriter::new(&output, 100).unwrap();
    for (chunk_idx, chunk) in spectra.chunks(2).enumerate() {
        let out = pipeline.run_batch(chunk, chunk_idx * 2);
        writer.add_all(out.records.iter()).unwrap();
    }
    assert_eq!(writer.close().unwrap(), 3);

    let mut rdr = csv::Reader::from_path(&output).unwrap();
    let headers = rdr.headers().unwrap().clone();
    let preds_col = headers.iter().position(|h| h == "preds").unwrap();
    let status_col = headers.iter().position(|h| h == "status").unwrap();
    let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(&rows[0][preds_col], "PASTWK");
    assert!(rows.iter().all(|r| &r[status_col] == "ok"));
}
