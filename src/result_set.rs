//! In-memory staging of one sweep's samples.

use tmeter_shared::{SampleRecord, SweepRequest};

use crate::error::RunError;

/// Every sample of a completed sweep, in sweep order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    samples: Vec<SampleRecord>,
}

impl ResultSet {
    pub fn samples(&self) -> &[SampleRecord] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn stimuli(&self) -> Vec<f32> {
        self.samples.iter().map(|s| s.stimulus).collect()
    }

    pub fn responses(&self) -> Vec<f32> {
        self.samples.iter().map(|s| s.response).collect()
    }
}

#[derive(Debug)]
pub struct ResultSetBuilder {
    request: SweepRequest,
    samples: Vec<SampleRecord>,
}

impl ResultSetBuilder {
    pub fn new(request: SweepRequest) -> Self {
        Self {
            request,
            samples: Vec::with_capacity(request.steps as usize),
        }
    }

    pub fn received(&self) -> usize {
        self.samples.len()
    }

    /// Accept the next sample. Indices must arrive as 0, 1, 2, ... up to `steps - 1`.
    pub fn push(&mut self, sample: SampleRecord) -> Result<(), RunError> {
        let expected = self.samples.len();
        if expected >= self.request.steps as usize {
            return Err(RunError::OutOfSequence {
                expected: "end-of-sweep marker".to_string(),
                received: format!("sample {}", sample.index),
            });
        }
        if sample.index as usize != expected {
            return Err(RunError::OutOfSequence {
                expected: format!("sample {expected}"),
                received: format!("sample {}", sample.index),
            });
        }
        self.samples.push(sample);
        Ok(())
    }

    /// Close the set on the terminal marker.
    pub fn finish(self, reported: u16) -> Result<ResultSet, RunError> {
        if reported != self.request.steps || self.samples.len() != self.request.steps as usize {
            return Err(RunError::CountMismatch {
                requested: self.request.steps,
                reported,
                received: self.samples.len(),
            });
        }
        Ok(ResultSet { samples: self.samples })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(steps: u16) -> SweepRequest {
        SweepRequest { start: 0.0, stop: -1.0, steps, settle_us: 0 }
    }

    fn sample(req: &SweepRequest, index: u16) -> SampleRecord {
        SampleRecord { index, stimulus: req.stimulus_at(index), response: 1.0 }
    }

    #[test]
    fn test_complete_set() {
        let req = request(3);
        let mut builder = ResultSetBuilder::new(req);
        for i in 0..3 {
            builder.push(sample(&req, i)).unwrap();
        }
        let set = builder.finish(3).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.stimuli(), vec![0.0, -0.5, -1.0]);
    }

    #[test]
    fn test_gap_is_out_of_sequence() {
        let req = request(5);
        let mut builder = ResultSetBuilder::new(req);
        builder.push(sample(&req, 0)).unwrap();
        let err = builder.push(sample(&req, 2)).unwrap_err();
        assert!(matches!(err, RunError::OutOfSequence { .. }));
    }

    #[test]
    fn test_extra_sample_is_out_of_sequence() {
        let req = request(2);
        let mut builder = ResultSetBuilder::new(req);
        builder.push(sample(&req, 0)).unwrap();
        builder.push(sample(&req, 1)).unwrap();
        assert!(builder.push(sample(&req, 2)).is_err());
    }

    #[test]
    fn test_early_marker_is_count_mismatch() {
        let req = request(4);
        let mut builder = ResultSetBuilder::new(req);
        builder.push(sample(&req, 0)).unwrap();
        let err = builder.finish(1).unwrap_err();
        assert!(matches!(
            err,
            RunError::CountMismatch { requested: 4, reported: 1, received: 1 }
        ));
    }
}
