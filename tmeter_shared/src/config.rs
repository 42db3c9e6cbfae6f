//! Shared configuration logic for host, simulator, and tests.
//!
//! ```toml
//! [link]
//! port = "/dev/ttyUSB0"
//! baud = 38400
//! timeout_ms = 10000
//!
//! [sweep]
//! start = 0.0
//! stop = -3.0
//! steps = 31
//!
//! [output]
//! dir = "measurements"
//! prefix = "n-jfet"
//! csv = true
//!
//! [simulator]
//! idss_ma = 8.0
//! voff = -2.0
//! vsat = 1.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::sweep::{SweepError, SweepRequest};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid sweep: {0}")]
    Sweep(#[from] SweepError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub sweep: SweepRequest,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Serial link to the controller board.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Longest wait for any single record.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Pause after opening the port; most boards reset when DTR toggles.
    #[serde(default = "default_open_settle_ms")]
    pub open_settle_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud: default_baud(),
            timeout_ms: default_timeout_ms(),
            open_settle_ms: default_open_settle_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub csv: bool,
    #[serde(default = "default_chart_width")]
    pub chart_width: u32,
    #[serde(default = "default_chart_height")]
    pub chart_height: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            prefix: default_prefix(),
            csv: false,
            chart_width: default_chart_width(),
            chart_height: default_chart_height(),
        }
    }
}

/// Parameters of the simulated device under test and its fault plan.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimulatorConfig {
    /// Drain current at zero gate voltage, mA.
    #[serde(default = "default_idss_ma")]
    pub idss_ma: f32,
    /// Gate-source cutoff voltage, V.
    #[serde(default = "default_voff")]
    pub voff: f32,
    /// Saturation voltage offset, V.
    #[serde(default = "default_vsat")]
    pub vsat: f32,
    /// Peak amplitude of the deterministic measurement noise, mA.
    #[serde(default)]
    pub noise_ma: f32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Rig fault raised while sampling this step.
    #[serde(default)]
    pub fail_at_step: Option<u16>,
    /// The controller goes silent once this step is reached.
    #[serde(default)]
    pub stall_at_step: Option<u16>,
    /// The record of this step is damaged on the wire.
    #[serde(default)]
    pub corrupt_at_step: Option<u16>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            idss_ma: default_idss_ma(),
            voff: default_voff(),
            vsat: default_vsat(),
            noise_ma: 0.0,
            seed: default_seed(),
            fail_at_step: None,
            stall_at_step: None,
            corrupt_at_step: None,
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.idss_ma > 0.0) {
            return Err(ConfigError::Invalid(format!("idss_ma must be positive, got {}", self.idss_ma)));
        }
        if !(self.voff < 0.0) {
            return Err(ConfigError::Invalid(format!("voff must be negative, got {}", self.voff)));
        }
        if !(self.vsat > 0.0 && self.vsat < -2.0 * self.voff) {
            return Err(ConfigError::Invalid(format!(
                "vsat must lie in (0, {}), got {}",
                -2.0 * self.voff,
                self.vsat
            )));
        }
        if !(self.noise_ma >= 0.0) {
            return Err(ConfigError::Invalid(format!("noise_ma must not be negative, got {}", self.noise_ma)));
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sweep.validate()?;
        if self.link.baud == 0 {
            return Err(ConfigError::Invalid("baud must be non-zero".to_string()));
        }
        if self.link.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be non-zero".to_string()));
        }
        // every sample waits out the settle time before it is sent
        if self.link.timeout_ms.saturating_mul(1000) <= u64::from(self.sweep.settle_us) {
            return Err(ConfigError::Invalid(format!(
                "timeout_ms ({} ms) must exceed settle_us ({} us)",
                self.link.timeout_ms, self.sweep.settle_us
            )));
        }
        if self.output.prefix.is_empty() || self.output.prefix.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!("bad output prefix '{}'", self.output.prefix)));
        }
        if self.output.chart_width < 200 || self.output.chart_height < 150 {
            return Err(ConfigError::Invalid("chart must be at least 200x150".to_string()));
        }
        self.simulator.validate()
    }
}

fn default_port() -> String {
    if cfg!(target_os = "linux") {
        "/dev/ttyUSB0".to_string()
    } else {
        "/dev/tty.wchusbserialfd130".to_string()
    }
}
fn default_baud() -> u32 {
    38400
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_open_settle_ms() -> u64 {
    1000
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_prefix() -> String {
    "n-jfet".to_string()
}
fn default_chart_width() -> u32 {
    800
}
fn default_chart_height() -> u32 {
    600
}
fn default_idss_ma() -> f32 {
    8.0
}
fn default_voff() -> f32 {
    -2.0
}
fn default_vsat() -> f32 {
    1.0
}
fn default_seed() -> u64 {
    1
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path.display(), e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.link.baud, 38400);
        assert_eq!(config.link.timeout_ms, 10_000);
        assert_eq!(config.output.prefix, "n-jfet");
        assert!(!config.output.csv);
        assert_eq!(config.sweep, SweepRequest::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("meter.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "[link]\nport = '/dev/ttyACM0'\n[sweep]\nsteps = 10\n[output]\ncsv = true").unwrap();
        file.flush().unwrap();
        let config = load_config(&file_path).unwrap();
        assert_eq!(config.link.port, "/dev/ttyACM0");
        assert_eq!(config.sweep.steps, 10);
        assert!(config.output.csv);
        // Defaults for missing fields
        assert_eq!(config.link.baud, 38400);
        assert_eq!(config.sweep.stop, -3.0);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent_file.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(&file_path);
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_load_config_rejects_bad_sweep() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("sweep.toml");
        std::fs::write(&file_path, "[sweep]\nsteps = 1\n").unwrap();
        let result = load_config(&file_path);
        assert!(matches!(result, Err(ConfigError::Sweep(SweepError::Steps(1)))));
    }

    #[test]
    fn test_timeout_must_exceed_settle_time() {
        let mut config = Config::default();
        config.sweep.settle_us = 1_000_000;
        config.link.timeout_ms = 500;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(m)) if m.contains("settle_us")));
        config.link.timeout_ms = 1000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.link.timeout_ms = 1001;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_simulator_vsat_must_fit_below_cutoff() {
        let sim = SimulatorConfig { voff: -1.0, vsat: 2.5, ..Default::default() };
        assert!(matches!(sim.validate(), Err(ConfigError::Invalid(_))));
    }
}
