//! Hardware abstraction for the measurement rig.
//!
//! A board port drives a gate DAC and reads the drain-current ADC; the
//! simulator implements the same trait against a device model.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RigFault {
    #[error("stimulus {0} V out of range")]
    StimulusOutOfRange(f32),
    #[error("ADC read failed: {0}")]
    Adc(String),
    #[error("reading is not a finite number")]
    InvalidReading,
}

pub trait Rig {
    /// Drive the stimulus (gate voltage).
    fn set_stimulus(&mut self, volts: f32) -> Result<(), RigFault>;
    /// Block until the device under test has settled.
    fn settle(&mut self, micros: u32);
    /// Sample the response (drain current, mA).
    fn sample_response(&mut self) -> Result<f32, RigFault>;
    /// Return every actuator to its safe resting level. Must not fail.
    fn safe_idle(&mut self);
}
