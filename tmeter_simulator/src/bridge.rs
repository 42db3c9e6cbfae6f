//! Runs a real `Controller` over an in-memory byte stream.
//!
//! The host gets one end of a duplex pipe and talks to it exactly as it talks
//! to a serial port. The controller side lives in a single tokio task: while
//! idle it waits for input, while sweeping it polls for pending commands
//! between steps.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tmeter_mcu::{BufferLink, Controller};
use tmeter_shared::config::SimulatorConfig;

use crate::rig::SimulatedRig;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Spawn a simulated controller and return the host end of its link.
///
/// Must be called from within a tokio runtime.
pub fn spawn_controller(config: &SimulatorConfig) -> DuplexStream {
    let (host_side, controller_side) = tokio::io::duplex(PIPE_CAPACITY);
    let rig = SimulatedRig::from_config(config);
    tokio::spawn(run_controller(rig, controller_side));
    host_side
}

/// Controller main loop. Returns when the host closes its end.
pub async fn run_controller(rig: SimulatedRig, mut stream: DuplexStream) {
    let mut controller = Controller::new(rig, BufferLink::new());
    let mut buf = [0u8; 512];
    loop {
        let received = if controller.is_idle() {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            }
        } else {
            match tokio::time::timeout(Duration::ZERO, stream.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) => break,
                Ok(Ok(n)) => n,
                Err(_) => 0,
            }
        };
        controller.link_mut().receive(&buf[..received]);
        controller.poll();

        let mut out = controller.link_mut().take_transmitted();
        if controller.rig().is_stalled() {
            drain_until_closed(&mut stream).await;
            return;
        }
        if controller.rig_mut().take_corruption() && out.len() > 2 {
            // "{\"type\"..." -> "{\"uype\"...": the checksum no longer matches
            out[2] ^= 0x01;
        }
        if !out.is_empty() && stream.write_all(&out).await.is_err() {
            break;
        }
        if !controller.is_idle() {
            tokio::task::yield_now().await;
        }
    }
    tracing::debug!("Simulated controller link closed");
}

/// A stalled controller keeps the link open but never answers again.
async fn drain_until_closed(stream: &mut DuplexStream) {
    let mut sink = [0u8; 512];
    while let Ok(n) = stream.read(&mut sink).await {
        if n == 0 {
            break;
        }
    }
}
