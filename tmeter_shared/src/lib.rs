// tmeter_shared: wire format, sweep model, and configuration shared by host, simulator, and MCU

pub mod config;
pub mod frame;
pub mod protocol;
pub mod sweep;

pub use frame::{FrameAccumulator, FrameError};
pub use protocol::{ControllerToHost, HostToController, PROTOCOL_VERSION, ProtocolError};
pub use sweep::{SampleRecord, SweepError, SweepRequest};
