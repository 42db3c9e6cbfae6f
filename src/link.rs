//! Host end of the serial link: framing, per-record timeouts, and openers for
//! a real port or the in-process simulator.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout_at};
use tmeter_shared::protocol::{self, ControllerToHost, HostToController, ProtocolError};
use tmeter_shared::{FrameAccumulator, FrameError};

use crate::error::RunError;

/// Any full-duplex byte stream the host can drive.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

pub struct ControllerLink<S> {
    stream: S,
    rx: FrameAccumulator,
    pending: VecDeque<Result<Vec<u8>, FrameError>>,
    record_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ControllerLink<S> {
    pub fn new(stream: S, record_timeout: Duration) -> Self {
        Self {
            stream,
            rx: FrameAccumulator::new(),
            pending: VecDeque::new(),
            record_timeout,
        }
    }

    pub fn record_timeout(&self) -> Duration {
        self.record_timeout
    }

    pub async fn send(&mut self, command: &HostToController) -> Result<(), RunError> {
        let bytes = protocol::encode_message(command)?;
        tracing::debug!("Serial TX: {:?}", command);
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Wait for the next complete record.
    pub async fn recv(&mut self) -> Result<ControllerToHost, RunError> {
        let frame = self.next_frame().await?;
        let payload = frame.map_err(ProtocolError::from)?;
        let record = protocol::decode_message(&payload)?;
        tracing::trace!("Serial RX: {:?}", record);
        Ok(record)
    }

    /// The timeout covers a whole record, so a trickle of noise cannot keep the
    /// host waiting forever.
    async fn next_frame(&mut self) -> Result<Result<Vec<u8>, FrameError>, RunError> {
        let deadline = Instant::now() + self.record_timeout;
        let mut buf = [0u8; 256];
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }
            let n = match timeout_at(deadline, self.stream.read(&mut buf)).await {
                Err(_) => {
                    tracing::warn!("Timeout after {:?} waiting for record", self.record_timeout);
                    return Err(RunError::Timeout(self.record_timeout));
                }
                Ok(Err(e)) => return Err(RunError::Io(e)),
                Ok(Ok(0)) => return Err(RunError::Closed),
                Ok(Ok(n)) => n,
            };
            for &byte in &buf[..n] {
                if let Some(frame) = self.rx.push(byte) {
                    self.pending.push_back(frame);
                }
            }
        }
    }
}

#[async_trait]
pub trait LinkOpener: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Transport>, RunError>;
    fn describe(&self) -> String;
}

/// A USB-serial adapter or native UART, 8N1.
#[derive(Debug, Clone)]
pub struct SerialOpener {
    pub port: String,
    pub baud: u32,
    pub open_settle: Duration,
}

#[async_trait]
impl LinkOpener for SerialOpener {
    async fn open(&self) -> Result<Box<dyn Transport>, RunError> {
        let port = serial2_tokio::SerialPort::open(&self.port, self.baud).map_err(|source| RunError::Open {
            port: self.port.clone(),
            source,
        })?;
        tracing::info!("Opened {} @ {} baud", self.port, self.baud);
        if !self.open_settle.is_zero() {
            tokio::time::sleep(self.open_settle).await;
        }
        if let Err(e) = port.discard_buffers() {
            tracing::warn!("Could not discard stale input on {}: {}", self.port, e);
        }
        Ok(Box::new(port))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port, self.baud)
    }
}

/// In-process simulated controller.
#[cfg(feature = "sim-in-host")]
#[derive(Debug, Clone, Default)]
pub struct SimulatorOpener {
    pub config: tmeter_shared::config::SimulatorConfig,
}

#[cfg(feature = "sim-in-host")]
#[async_trait]
impl LinkOpener for SimulatorOpener {
    async fn open(&self) -> Result<Box<dyn Transport>, RunError> {
        Ok(Box::new(tmeter_simulator::spawn_controller(&self.config)))
    }

    fn describe(&self) -> String {
        format!(
            "simulator (Idss {} mA, Voff {} V, Vsat {} V)",
            self.config.idss_ma, self.config.voff, self.config.vsat
        )
    }
}

pub fn available_ports() -> Vec<String> {
    match serial2_tokio::SerialPort::available_ports() {
        Ok(paths) => paths.iter().map(|p| p.display().to_string()).collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate serial ports: {}", e);
            vec![]
        }
    }
}
