//! Command dispatch and the sweep loop.
//!
//! The controller owns its state explicitly: `Idle` until a valid sweep
//! command arrives, `Sweeping` while steps remain, and `Idle` again after the
//! terminal marker, an error, or an abort. Every exit from `Sweeping` other
//! than normal completion drives the rig to safe idle first.

use tmeter_shared::frame::FrameError;
use tmeter_shared::protocol::{self, ControllerToHost, HostToController, PROTOCOL_VERSION, ProtocolError};
use tmeter_shared::{FrameAccumulator, SampleRecord, SweepRequest};

use crate::link::Link;
use crate::rig::{Rig, RigFault};

pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControllerState {
    Idle,
    Sweeping { request: SweepRequest, next: u16 },
}

pub struct Controller<R: Rig, L: Link> {
    rig: R,
    link: L,
    state: ControllerState,
    rx: FrameAccumulator,
}

impl<R: Rig, L: Link> Controller<R, L> {
    pub fn new(mut rig: R, link: L) -> Self {
        rig.safe_idle();
        Self {
            rig,
            link,
            state: ControllerState::Idle,
            rx: FrameAccumulator::new(),
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, ControllerState::Idle)
    }

    pub fn rig(&self) -> &R {
        &self.rig
    }

    pub fn rig_mut(&mut self) -> &mut R {
        &mut self.rig
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// One pass of the main loop: handle every pending command, then run at
    /// most one sweep step. Commands are therefore seen between steps, which is
    /// where an abort takes effect.
    pub fn poll(&mut self) {
        while let Some(byte) = self.link.read_byte() {
            if let Some(frame) = self.rx.push(byte) {
                self.handle_frame(frame);
            }
        }
        self.step();
    }

    /// Poll until the controller is idle again.
    pub fn run_until_idle(&mut self) {
        self.poll();
        while !self.is_idle() {
            self.poll();
        }
    }

    fn handle_frame(&mut self, frame: Result<Vec<u8>, FrameError>) {
        let command = frame
            .map_err(ProtocolError::from)
            .and_then(|payload| protocol::decode_message::<HostToController>(&payload));
        match command {
            Ok(command) => self.dispatch(command),
            Err(e) => {
                tracing::warn!("Rejected command: {}", e);
                self.fail(format!("bad command: {e}"));
            }
        }
    }

    fn dispatch(&mut self, command: HostToController) {
        match (command, self.state) {
            (HostToController::Abort, ControllerState::Sweeping { next, .. }) => {
                tracing::info!("Sweep aborted before step {}", next);
                self.rig.safe_idle();
                self.state = ControllerState::Idle;
                self.send(&ControllerToHost::Aborted);
            }
            (HostToController::Abort, ControllerState::Idle) => {
                self.rig.safe_idle();
                self.send(&ControllerToHost::Aborted);
            }
            (_, ControllerState::Sweeping { .. }) => {
                self.fail("busy: sweep in progress".to_string());
            }
            (HostToController::Version, ControllerState::Idle) => {
                self.send(&ControllerToHost::Version {
                    firmware: FIRMWARE_VERSION.to_string(),
                    protocol: PROTOCOL_VERSION,
                });
            }
            (HostToController::Sweep(request), ControllerState::Idle) => match request.validate() {
                Ok(()) => {
                    tracing::info!(
                        "Sweep start: {} V -> {} V in {} steps",
                        request.start,
                        request.stop,
                        request.steps
                    );
                    self.state = ControllerState::Sweeping { request, next: 0 };
                }
                Err(e) => self.fail(format!("invalid sweep: {e}")),
            },
        }
    }

    fn step(&mut self) {
        let ControllerState::Sweeping { request, next } = self.state else {
            return;
        };
        let stimulus = request.stimulus_at(next);
        match self.measure(stimulus, request.settle_us) {
            Ok(response) => {
                self.send(&ControllerToHost::Sample(SampleRecord {
                    index: next,
                    stimulus,
                    response,
                }));
                if next + 1 == request.steps {
                    self.rig.safe_idle();
                    self.state = ControllerState::Idle;
                    self.send(&ControllerToHost::Done { count: request.steps });
                    tracing::info!("Sweep complete: {} samples", request.steps);
                } else {
                    self.state = ControllerState::Sweeping { request, next: next + 1 };
                }
            }
            Err(fault) => {
                tracing::error!("Rig fault at step {}: {}", next, fault);
                self.fail(format!("step {next}: {fault}"));
            }
        }
    }

    fn measure(&mut self, stimulus: f32, settle_us: u32) -> Result<f32, RigFault> {
        self.rig.set_stimulus(stimulus)?;
        self.rig.settle(settle_us);
        let response = self.rig.sample_response()?;
        if !response.is_finite() {
            return Err(RigFault::InvalidReading);
        }
        Ok(response)
    }

    fn fail(&mut self, message: String) {
        self.rig.safe_idle();
        self.state = ControllerState::Idle;
        self.send(&ControllerToHost::Error { message });
    }

    fn send(&mut self, record: &ControllerToHost) {
        match protocol::encode_message(record) {
            Ok(bytes) => self.link.write_all(&bytes),
            Err(e) => tracing::error!("Failed to encode record: {}", e),
        }
    }
}
