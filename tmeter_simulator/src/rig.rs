//! Simulated rig: the JFET model behind the `Rig` trait, with a fault plan.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tmeter_mcu::{Rig, RigFault};
use tmeter_shared::config::SimulatorConfig;
use tmeter_shared::sweep::MAX_STIMULUS_VOLTS;

use crate::model::JfetModel;

/// Faults injected at a given step index of every sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FaultPlan {
    pub fail_at_step: Option<u16>,
    pub stall_at_step: Option<u16>,
    pub corrupt_at_step: Option<u16>,
}

impl FaultPlan {
    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self {
            fail_at_step: config.fail_at_step,
            stall_at_step: config.stall_at_step,
            corrupt_at_step: config.corrupt_at_step,
        }
    }
}

#[derive(Debug)]
pub struct SimulatedRig {
    model: JfetModel,
    faults: FaultPlan,
    noise_ma: f32,
    seed: u64,
    rng: StdRng,
    gate: f32,
    /// Samples taken since the rig last went idle; equals the sweep step index.
    step: u16,
    elapsed_us: u64,
    stalled: bool,
    corrupt_pending: bool,
}

impl SimulatedRig {
    pub fn new(model: JfetModel, noise_ma: f32, seed: u64, faults: FaultPlan) -> Self {
        Self {
            model,
            faults,
            noise_ma,
            seed,
            rng: StdRng::seed_from_u64(seed),
            gate: 0.0,
            step: 0,
            elapsed_us: 0,
            stalled: false,
            corrupt_pending: false,
        }
    }

    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self::new(
            JfetModel::from_config(config),
            config.noise_ma,
            config.seed,
            FaultPlan::from_config(config),
        )
    }

    pub fn gate(&self) -> f32 {
        self.gate
    }

    /// Simulated time spent settling.
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_us
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Returns true once per corrupted step.
    pub fn take_corruption(&mut self) -> bool {
        std::mem::take(&mut self.corrupt_pending)
    }
}

impl Rig for SimulatedRig {
    fn set_stimulus(&mut self, volts: f32) -> Result<(), RigFault> {
        if volts.abs() > MAX_STIMULUS_VOLTS {
            return Err(RigFault::StimulusOutOfRange(volts));
        }
        self.gate = volts;
        Ok(())
    }

    fn settle(&mut self, micros: u32) {
        self.elapsed_us += micros as u64;
    }

    fn sample_response(&mut self) -> Result<f32, RigFault> {
        let step = self.step;
        if self.faults.fail_at_step == Some(step) {
            return Err(RigFault::Adc(format!("simulated conversion failure at step {step}")));
        }
        if self.faults.stall_at_step == Some(step) {
            tracing::warn!("Simulated controller stalls at step {}", step);
            self.stalled = true;
        }
        if self.faults.corrupt_at_step == Some(step) {
            self.corrupt_pending = true;
        }
        self.step += 1;
        let mut current = self.model.drain_current(self.gate);
        if self.noise_ma > 0.0 {
            current += self.rng.random_range(-self.noise_ma..=self.noise_ma);
        }
        Ok(current.max(0.0))
    }

    fn safe_idle(&mut self) {
        self.gate = 0.0;
        self.step = 0;
        self.rng = StdRng::seed_from_u64(self.seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rig(noise: f32, faults: FaultPlan) -> SimulatedRig {
        SimulatedRig::new(JfetModel::new(8.0, -2.0, 1.0), noise, 7, faults)
    }

    fn sweep(rig: &mut SimulatedRig, steps: u16) -> Vec<Result<f32, RigFault>> {
        let out = (0..steps)
            .map(|i| {
                rig.set_stimulus(-0.1 * i as f32)?;
                rig.settle(100);
                rig.sample_response()
            })
            .collect();
        rig.safe_idle();
        out
    }

    #[test]
    fn test_noise_is_reproducible_across_sweeps() {
        let mut r = rig(0.05, FaultPlan::default());
        let first = sweep(&mut r, 20);
        let second = sweep(&mut r, 20);
        assert_eq!(first, second);
        assert_eq!(r.elapsed_us(), 4000);
    }

    #[test]
    fn test_readings_never_negative() {
        let mut r = rig(0.5, FaultPlan::default());
        for value in sweep(&mut r, 40) {
            assert!(value.unwrap() >= 0.0);
        }
    }

    #[test]
    fn test_fail_at_step() {
        let mut r = rig(0.0, FaultPlan { fail_at_step: Some(5), ..Default::default() });
        let results = sweep(&mut r, 10);
        assert!(results[4].is_ok());
        assert!(matches!(results[5], Err(RigFault::Adc(_))));
    }

    #[test]
    fn test_out_of_range_stimulus() {
        let mut r = rig(0.0, FaultPlan::default());
        assert_eq!(r.set_stimulus(20.0), Err(RigFault::StimulusOutOfRange(20.0)));
        assert_eq!(r.gate(), 0.0);
    }

    #[test]
    fn test_corruption_flag_is_one_shot() {
        let mut r = rig(0.0, FaultPlan { corrupt_at_step: Some(0), ..Default::default() });
        r.set_stimulus(0.0).unwrap();
        r.sample_response().unwrap();
        assert!(r.take_corruption());
        assert!(!r.take_corruption());
    }
}
