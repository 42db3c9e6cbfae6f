// tmeter_mcu: measurement controller firmware logic, written against the Rig and Link traits

pub mod controller;
pub mod link;
pub mod rig;

pub use controller::{Controller, ControllerState, FIRMWARE_VERSION};
pub use link::{BufferLink, Link};
pub use rig::{Rig, RigFault};
