//! Timing instrumentation for the inference pipeline.
//!
//! Timings are collected per spectrum and summed across worker threads.

use serde::Serialize;
use std::time::Duration;

/// Accumulated time spent in each stage, over all spectra of a batch.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct InferenceTimings {
    /// Running the spectrum encoder.
    pub encode: Duration,

    /// Constrained beam search, over all isotope offsets.
    pub decode: Duration,

    /// Iterative refinement of low confidence predictions.
    pub refine: Duration,

    /// Building the output records.
    pub assemble: Duration,
}

impl InferenceTimings {
    pub fn total(&self) -> Duration {
        self.encode + self.decode + self.refine + self.assemble
    }
}

impl Serialize for InferenceTimings {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("InferenceTimings", 4)?;
        state.serialize_field("encode_ms", &self.encode.as_millis())?;
        state.serialize_field("decode_ms", &self.decode.as_millis())?;
        state.serialize_field("refine_ms", &self.refine.as_millis())?;
        state.serialize_field("assemble_ms", &self.assemble.as_millis())?;
        state.end()
    }
}

impl std::ops::AddAssign for InferenceTimings {
    fn add_assign(&mut self, rhs: Self) {
        self.encode += rhs.encode;
        self.decode += rhs.decode;
        self.refine += rhs.refine;
        self.assemble += rhs.assemble;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_serialize() {
        let mut a = InferenceTimings {
            encode: Duration::from_millis(3),
            decode: Duration::from_millis(10),
            ..Default::default()
        };
        a += InferenceTimings {
            decode: Duration::from_millis(5),
            refine: Duration::from_millis(2),
            ..Default::default()
        };
        assert_eq!(a.decode, Duration::from_millis(15));
        assert_eq!(a.total(), Duration::from_millis(20));
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(
            json,
            r#"{"encode_ms":3,"decode_ms":15,"refine_ms":2,"assemble_ms":0}"#
        );
    }
}
