//! Sweep request and sample record types shared by host and controller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest gate voltage magnitude the rig may be driven to.
pub const MAX_STIMULUS_VOLTS: f32 = 12.0;
pub const MIN_STEPS: u16 = 2;
pub const MAX_STEPS: u16 = 1000;
pub const MAX_SETTLE_US: u32 = 1_000_000;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SweepError {
    #[error("sweep bounds must be finite")]
    NonFinite,
    #[error("stimulus {0} V outside ±{MAX_STIMULUS_VOLTS} V")]
    OutOfRange(f32),
    #[error("sweep start and stop are both {0} V")]
    EmptyRange(f32),
    #[error("step count {0} outside {MIN_STEPS}..={MAX_STEPS}")]
    Steps(u16),
    #[error("settle time {0} us exceeds {MAX_SETTLE_US} us")]
    Settle(u32),
}

/// Parameters of one measurement run. Sent once, never modified mid-sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRequest {
    /// Gate voltage of the first step.
    #[serde(default = "default_start")]
    pub start: f32,
    /// Gate voltage of the last step.
    #[serde(default = "default_stop")]
    pub stop: f32,
    #[serde(default = "default_steps")]
    pub steps: u16,
    /// Settling delay between setting the gate and sampling the drain.
    #[serde(default = "default_settle_us")]
    pub settle_us: u32,
}

impl Default for SweepRequest {
    fn default() -> Self {
        Self {
            start: default_start(),
            stop: default_stop(),
            steps: default_steps(),
            settle_us: default_settle_us(),
        }
    }
}

fn default_start() -> f32 {
    0.0
}
fn default_stop() -> f32 {
    -3.0
}
fn default_steps() -> u16 {
    31
}
fn default_settle_us() -> u32 {
    2000
}

impl SweepRequest {
    pub fn validate(&self) -> Result<(), SweepError> {
        if !self.start.is_finite() || !self.stop.is_finite() {
            return Err(SweepError::NonFinite);
        }
        for bound in [self.start, self.stop] {
            if bound.abs() > MAX_STIMULUS_VOLTS {
                return Err(SweepError::OutOfRange(bound));
            }
        }
        if self.start == self.stop {
            return Err(SweepError::EmptyRange(self.start));
        }
        if !(MIN_STEPS..=MAX_STEPS).contains(&self.steps) {
            return Err(SweepError::Steps(self.steps));
        }
        if self.settle_us > MAX_SETTLE_US {
            return Err(SweepError::Settle(self.settle_us));
        }
        Ok(())
    }

    /// Stimulus applied at step `index`. Computed in f64 so host and controller
    /// agree bit for bit.
    pub fn stimulus_at(&self, index: u16) -> f32 {
        let span = self.stop as f64 - self.start as f64;
        let last = (self.steps.max(MIN_STEPS) - 1) as f64;
        (self.start as f64 + span * index as f64 / last) as f32
    }

    pub fn stimuli(&self) -> impl Iterator<Item = f32> + '_ {
        (0..self.steps).map(|i| self.stimulus_at(i))
    }
}

/// One measured point: gate volts in, drain milliamps out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub index: u16,
    pub stimulus: f32,
    pub response: f32,
}
