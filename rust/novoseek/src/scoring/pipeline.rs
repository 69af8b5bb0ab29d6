//! Batch inference pipeline.
//!
//! A batch goes through two parallel passes:
//!
//! 1. **First pass**: input checks, encoding and constrained beam search,
//!    independently per spectrum.
//! 2. **Refinement**: only the spectra picked by the selector, using the
//!    embeddings kept from the first pass.
//!
//! Records are then assembled in input order. Timings for every stage are
//! summed across threads with the same fold-reduce accumulator.

use super::accumulator::BatchAccumulator;
use super::timings::InferenceTimings;
use crate::config::InferenceConfig;
use crate::decoding::{
    BeamSearchDecoder,
    DecodeResult,
    MassFeasibility,
};
use crate::errors::Result;
use crate::models::{
    PredictionRecord,
    ResidueSet,
    Spectrum,
};
use crate::refinement::{
    IterativeRefiner,
    RefinementRequest,
    RefinementSelector,
};
use crate::results::{
    RefinementUpdate,
    ResultAssembler,
};
use crate::traits::{
    Denoiser,
    SequenceScorer,
    SpectrumEncoder,
};
#[cfg(not(feature = "serial_decoding"))]
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{
    debug,
    info,
};

/// Records for one batch, in input order, plus where the time went.
#[derive(Debug)]
pub struct BatchOutput {
    pub records: Vec<PredictionRecord>,
    pub timings: InferenceTimings,
}

impl BatchOutput {
    /// Number of records per reason code (`ok`, `infeasible_mass`, ...),
    /// refinement failures are counted under `refinement_failed`.
    pub fn status_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut out = BTreeMap::new();
        for rec in self.records.iter() {
            *out.entry(rec.status.as_str()).or_insert(0) += 1;
            if rec.refinement == crate::models::RefinementOutcome::Failed {
                *out.entry(rec.refinement.as_str()).or_insert(0) += 1;
            }
        }
        out
    }
}

type FirstPass<E> = (DecodeResult, Option<E>);

pub struct DenovoPipeline<M: SpectrumEncoder> {
    model: M,
    decoder: BeamSearchDecoder,
    selector: RefinementSelector,
    refiner: IterativeRefiner,
    assembler: ResultAssembler,
    thread_pool: Option<rayon::ThreadPool>,
}

impl<M> DenovoPipeline<M>
where
    M: SpectrumEncoder + SequenceScorer<M::Embedding> + Denoiser<M::Embedding>,
{
    /// Validates the configuration against the model and wires up every stage.
    pub fn new(
        config: &InferenceConfig,
        model: M,
        residues: Arc<ResidueSet>,
        feasibility: MassFeasibility,
    ) -> Result<Self> {
        config.validate(model.max_supported_charge())?;
        let device = config.device.resolve();
        info!("Running inference on {:?}", device);

        let decoder = BeamSearchDecoder::new(config, residues.clone(), feasibility)?;
        let refiner = IterativeRefiner::new(
            config,
            residues.clone(),
            decoder.mask().clone(),
            decoder.feasibility().is_enabled(),
        );
        let thread_pool = if config.num_workers > 0 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.num_workers)
                    .build()?,
            )
        } else {
            None
        };

        Ok(Self {
            model,
            decoder,
            selector: RefinementSelector::from_config(config),
            refiner,
            assembler: ResultAssembler::new(residues, config.denovo),
            thread_pool,
        })
    }

    pub fn decoder(&self) -> &BeamSearchDecoder {
        &self.decoder
    }

    fn first_pass(&self, spectrum: &Spectrum) -> (FirstPass<M::Embedding>, InferenceTimings) {
        let mut timings = InferenceTimings::default();
        if let Some(reason) = self.decoder.check_input(spectrum) {
            debug!("{}: rejected ({:?})", spectrum.spectrum_id, reason);
            return ((DecodeResult::rejected(reason), None), timings);
        }

        let st = Instant::now();
        let embedding = self.model.encode(spectrum);
        timings.encode += st.elapsed();

        let st = Instant::now();
        let result = self.decoder.decode(&self.model, spectrum, &embedding);
        timings.decode += st.elapsed();

        let keep = self.selector.should_refine(&result);
        ((result, keep.then_some(embedding)), timings)
    }

    fn refine_one(
        &self,
        spectrum_index: usize,
        spectrum: &Spectrum,
        result: &DecodeResult,
        embedding: Option<&M::Embedding>,
    ) -> (RefinementUpdate, InferenceTimings) {
        let mut timings = InferenceTimings::default();
        let st = Instant::now();
        let Some(coarse) = result.best() else {
            return (RefinementUpdate::Failed, timings);
        };
        let encoded;
        let embedding = match embedding {
            Some(e) => e,
            None => {
                encoded = self.model.encode(spectrum);
                &encoded
            }
        };
        let request = RefinementRequest {
            spectrum_index,
            spectrum,
            embedding,
            coarse,
        };
        let update = match self.refiner.refine(&self.model, &request) {
            Some(candidate) => RefinementUpdate::Refined(candidate),
            None => {
                debug!("{}: refinement found no valid sequence", spectrum.spectrum_id);
                RefinementUpdate::Failed
            }
        };
        timings.refine += st.elapsed();
        (update, timings)
    }

    /// Runs a batch of spectra. `first_index` is the position of the first
    /// spectrum in the whole input and keys the refinement sampler.
    #[cfg_attr(
        feature = "instrumentation",
        tracing::instrument(skip(self, spectra), level = "trace")
    )]
    pub fn run_batch(&self, spectra: &[Spectrum], first_index: usize) -> BatchOutput {
        match &self.thread_pool {
            Some(pool) => pool.install(|| self.run_batch_inner(spectra, first_index)),
            None => self.run_batch_inner(spectra, first_index),
        }
    }

    fn run_batch_inner(&self, spectra: &[Spectrum], first_index: usize) -> BatchOutput {
        let num_spectra = spectra.len();
        let start = Instant::now();

        #[cfg(not(feature = "serial_decoding"))]
        let first: BatchAccumulator<FirstPass<M::Embedding>> = spectra
            .par_iter()
            .map(|spectrum| self.first_pass(spectrum))
            .collect();

        #[cfg(feature = "serial_decoding")]
        let first: BatchAccumulator<FirstPass<M::Embedding>> = spectra
            .iter()
            .map(|spectrum| self.first_pass(spectrum))
            .collect();

        let mut timings = first.timings;
        let (results, embeddings): (Vec<DecodeResult>, Vec<Option<M::Embedding>>) =
            first.res.into_iter().unzip();

        let (to_refine, _) = self.selector.partition(&results);
        if !to_refine.is_empty() {
            debug!("Refining {} of {} spectra", to_refine.len(), num_spectra);
        }
        let refine_fn = |&i: &usize| {
            let (update, t) = self.refine_one(
                first_index + i,
                &spectra[i],
                &results[i],
                embeddings[i].as_ref(),
            );
            ((i, update), t)
        };

        #[cfg(not(feature = "serial_decoding"))]
        let refined: BatchAccumulator<(usize, RefinementUpdate)> =
            to_refine.par_iter().map(refine_fn).collect();

        #[cfg(feature = "serial_decoding")]
        let refined: BatchAccumulator<(usize, RefinementUpdate)> =
            to_refine.iter().map(refine_fn).collect();

        timings += refined.timings;
        drop(embeddings);

        let st = Instant::now();
        let records = self
            .assembler
            .assemble_batch(spectra, results, refined.res.into_iter().collect());
        timings.assemble += st.elapsed();

        let elapsed = start.elapsed();
        let throughput = num_spectra as f64 / elapsed.as_secs_f64();
        info!(
            "Decoding {} spectra took: {:?} throughput: {:#.1}/s",
            num_spectra, elapsed, throughput
        );
        debug!("{:?}", timings);

        BatchOutput { records, timings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::constants::{
        EOS_ID,
        PAD_ID,
    };
    use crate::models::{
        PredictionStatus,
        RefinementOutcome,
        ResidueEntry,
        ResidueRemapping,
        TokenId,
    };
    use crate::utils::load_or_build_knapsack;

    /// Scripted model: the decoder is pushed toward `coarse`, the denoiser
    /// toward `refined`.
    struct Scripted {
        coarse: Vec<TokenId>,
        refined: Vec<TokenId>,
        vocab: usize,
    }

    impl SpectrumEncoder for Scripted {
        type Embedding = ();
        fn encode(&self, _spectrum: &Spectrum) {}
        fn max_supported_charge(&self) -> u8 {
            4
        }
    }

    impl SequenceScorer<()> for Scripted {
        fn score(&self, prefix: &[TokenId], _embedding: &()) -> Vec<f32> {
            let want = self.coarse.get(prefix.len()).copied().unwrap_or(EOS_ID);
            (0..self.vocab)
                .map(|t| if t == want { -0.7 } else { -5.0 })
                .collect()
        }
    }

    impl Denoiser<()> for Scripted {
        fn denoise(&self, tokens: &[TokenId], _embedding: &(), _iteration: usize) -> Vec<Vec<f32>> {
            (0..tokens.len())
                .map(|p| {
                    let want = self.refined.get(p).copied().unwrap_or(PAD_ID);
                    (0..self.vocab)
                        .map(|t| if t == want { -0.01 } else { -40.0 })
                        .collect()
                })
                .collect()
        }
    }

    fn setup(config: &InferenceConfig) -> (Arc<ResidueSet>, MassFeasibility) {
        let residues = Arc::new(config.build_residue_set().unwrap());
        let config = InferenceConfig {
            knapsack_max_mass: 1000.0,
            knapsack_mass_scale: 100.0,
            ..config.clone()
        };
        let ks = load_or_build_knapsack(&residues, &config, None).unwrap();
        (residues, MassFeasibility::Knapsack(Arc::new(ks)))
    }

    fn ga_config() -> InferenceConfig {
        InferenceConfig {
            num_beams: 2,
            max_length: 8,
            max_charge: 4,
            residues: vec![ResidueEntry::new("G", 57.02), ResidueEntry::new("A", 71.04)],
            residue_remapping: ResidueRemapping::empty(),
            ..Default::default()
        }
    }

    #[test]
    fn test_refinement_replaces_low_confidence() {
        let config = InferenceConfig {
            refine: true,
            refine_threshold: 0.9,
            n_preds: 2,
            refine_iterations: 1,
            refine_temperature: 0.5,
            ..ga_config()
        };
        let (residues, feasibility) = setup(&config);
        let g = residues.id_of("G").unwrap();
        let a = residues.id_of("A").unwrap();
        // Same composition, different order, so both match the precursor.
        let model = Scripted {
            coarse: vec![g, g, a],
            refined: vec![a, g, g],
            vocab: residues.len(),
        };
        let pipeline = DenovoPipeline::new(&config, model, residues.clone(), feasibility).unwrap();

        let mass = residues.sequence_mass(&[g, g, a]);
        let spectra = vec![
            Spectrum::from_residue_mass("a", mass, 2, vec![100.0], vec![1.0]),
            Spectrum::from_residue_mass("b", mass, 9, vec![100.0], vec![1.0]),
        ];
        let out = pipeline.run_batch(&spectra, 0);
        assert_eq!(out.records.len(), 2);

        let first = &out.records[0];
        assert_eq!(first.status, PredictionStatus::Ok);
        assert_eq!(first.refinement, RefinementOutcome::Applied);
        assert_eq!(first.preds(), "AGG");

        let second = &out.records[1];
        assert!(second.status.is_rejected());
        assert!(second.sequence.is_none());
        assert_eq!(second.refinement, RefinementOutcome::NotRequested);

        let counts = out.status_counts();
        assert_eq!(counts.get("ok"), Some(&1));
        assert_eq!(counts.get("input_rejected:charge_exceeds_max"), Some(&1));
    }

    #[test]
    fn test_refinement_failure_keeps_coarse() {
        let config = InferenceConfig {
            refine: true,
            refine_all: true,
            n_preds: 2,
            refine_iterations: 1,
            ..ga_config()
        };
        let (residues, feasibility) = setup(&config);
        let g = residues.id_of("G").unwrap();
        let a = residues.id_of("A").unwrap();
        // Refined proposal has the wrong mass and is rejected.
        let model = Scripted {
            coarse: vec![g, a],
            refined: vec![a, a, a],
            vocab: residues.len(),
        };
        let pipeline = DenovoPipeline::new(&config, model, residues.clone(), feasibility).unwrap();
        let mass = residues.sequence_mass(&[g, a]);
        let spectra = vec![Spectrum::from_residue_mass("a", mass, 2, vec![100.0], vec![1.0])];
        let out = pipeline.run_batch(&spectra, 10);
        let rec = &out.records[0];
        assert_eq!(rec.refinement, RefinementOutcome::Failed);
        assert_eq!(rec.preds(), "GA");
        assert_eq!(out.status_counts().get("refinement_failed"), Some(&1));
    }

    #[test]
    fn test_charge_contradiction_is_fatal() {
        let config = InferenceConfig {
            max_charge: 6,
            ..ga_config()
        };
        let (residues, feasibility) = setup(&config);
        let model = Scripted {
            coarse: vec![],
            refined: vec![],
            vocab: residues.len(),
        };
        assert!(DenovoPipeline::new(&config, model, residues, feasibility).is_err());
    }

    #[test]
    fn test_results_do_not_depend_on_workers() {
        let base = InferenceConfig {
            refine: true,
            refine_all: true,
            n_preds: 3,
            refine_iterations: 2,
            ..ga_config()
        };
        let (residues, feasibility) = setup(&base);
        let g = residues.id_of("G").unwrap();
        let a = residues.id_of("A").unwrap();
        let spectra: Vec<Spectrum> = (0..16)
            .map(|i| {
                let n_g = 1 + i % 3;
                let mass = n_g as f64 * 57.02 + 71.04;
                Spectrum::from_residue_mass(format!("s{}", i), mass, 2, vec![100.0], vec![1.0])
            })
            .collect();

        let run = |workers: usize| {
            let config = InferenceConfig {
                num_workers: workers,
                ..base.clone()
            };
            let model = Scripted {
                coarse: vec![g, a, g],
                refined: vec![a, g],
                vocab: residues.len(),
            };
            let pipeline =
                DenovoPipeline::new(&config, model, residues.clone(), feasibility.clone()).unwrap();
            pipeline.run_batch(&spectra, 0).records
        };
        assert_eq!(run(1), run(4));
    }
}
