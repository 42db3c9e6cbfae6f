// tmeter: host driver for the transistor characterization rig

pub mod analysis;
pub mod chart;
pub mod driver;
pub mod error;
pub mod link;
pub mod persist;
pub mod result_set;

pub use tmeter_shared::config;

pub use driver::{ControllerInfo, HostDriver, Measurement, measure};
pub use error::{ErrorKind, RunError};
pub use link::{ControllerLink, LinkOpener, SerialOpener};
#[cfg(feature = "sim-in-host")]
pub use link::SimulatorOpener;
pub use result_set::ResultSet;
