// tmeter_simulator: simulated N-JFET rig and an in-process controller for tests and dry runs

pub mod bridge;
pub mod model;
pub mod rig;

pub use bridge::{run_controller, spawn_controller};
pub use model::JfetModel;
pub use rig::{FaultPlan, SimulatedRig};
