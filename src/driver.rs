//! Host side of a measurement run: version handshake, sweep collection, and the
//! end-to-end `measure` flow that fits and persists a completed sweep.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tmeter_shared::config::Config;
use tmeter_shared::protocol::{ControllerToHost, HostToController, PROTOCOL_VERSION};
use tmeter_shared::SweepRequest;

use crate::analysis::{self, JfetParameters};
use crate::error::RunError;
use crate::link::{ControllerLink, LinkOpener};
use crate::persist::{ArtifactPaths, ArtifactWriter};
use crate::result_set::{ResultSet, ResultSetBuilder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInfo {
    pub firmware: String,
    pub protocol: u16,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub controller: ControllerInfo,
    pub results: ResultSet,
    /// `None` when the sweep could not be fitted.
    pub parameters: Option<JfetParameters>,
    pub artifacts: ArtifactPaths,
}

pub struct HostDriver<S> {
    link: ControllerLink<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> HostDriver<S> {
    pub fn new(link: ControllerLink<S>) -> Self {
        Self { link }
    }

    pub async fn query_version(&mut self) -> Result<ControllerInfo, RunError> {
        let result = self.exchange_version().await;
        self.abort_if_busy(result).await
    }

    /// Run one sweep and return its complete result set. Nothing partial is
    /// ever returned.
    pub async fn run_sweep(&mut self, request: &SweepRequest) -> Result<ResultSet, RunError> {
        request.validate()?;
        let result = self.collect(request).await;
        self.abort_if_busy(result).await
    }

    async fn exchange_version(&mut self) -> Result<ControllerInfo, RunError> {
        self.link.send(&HostToController::Version).await?;
        match self.link.recv().await? {
            ControllerToHost::Version { firmware, protocol } => {
                if protocol != PROTOCOL_VERSION {
                    return Err(RunError::VersionMismatch {
                        controller: protocol,
                        host: PROTOCOL_VERSION,
                    });
                }
                tracing::info!("Controller firmware {} (protocol {})", firmware, protocol);
                Ok(ControllerInfo { firmware, protocol })
            }
            ControllerToHost::Error { message } => Err(RunError::Controller(message)),
            other => Err(RunError::OutOfSequence {
                expected: "version record".to_string(),
                received: describe(&other),
            }),
        }
    }

    async fn collect(&mut self, request: &SweepRequest) -> Result<ResultSet, RunError> {
        self.link.send(&HostToController::Sweep(*request)).await?;
        tracing::info!(
            "Sweep {} V -> {} V, {} steps, settle {} us",
            request.start,
            request.stop,
            request.steps,
            request.settle_us
        );
        let mut builder = ResultSetBuilder::new(*request);
        loop {
            match self.link.recv().await? {
                ControllerToHost::Sample(sample) => {
                    tracing::debug!(
                        "Sample {}: Vg {:.3} V, Id {:.3} mA",
                        sample.index,
                        sample.stimulus,
                        sample.response
                    );
                    builder.push(sample)?;
                }
                ControllerToHost::Done { count } => return builder.finish(count),
                ControllerToHost::Error { message } => {
                    tracing::error!("Controller error after {} samples: {}", builder.received(), message);
                    return Err(RunError::Controller(message));
                }
                ControllerToHost::Aborted => return Err(RunError::Aborted),
                other => {
                    return Err(RunError::OutOfSequence {
                        expected: format!("sample {}", builder.received()),
                        received: describe(&other),
                    });
                }
            }
        }
    }

    async fn abort_if_busy<T>(&mut self, result: Result<T, RunError>) -> Result<T, RunError> {
        if let Err(e) = &result {
            if e.controller_may_be_busy() {
                tracing::warn!("Sending abort after failure: {}", e);
                if let Err(send) = self.link.send(&HostToController::Abort).await {
                    tracing::debug!("Abort not delivered: {}", send);
                }
            }
        }
        result
    }
}

fn describe(record: &ControllerToHost) -> String {
    match record {
        ControllerToHost::Version { .. } => "version record".to_string(),
        ControllerToHost::Sample(s) => format!("sample {}", s.index),
        ControllerToHost::Done { count } => format!("end-of-sweep marker ({count})"),
        ControllerToHost::Error { .. } => "error record".to_string(),
        ControllerToHost::Aborted => "abort acknowledgement".to_string(),
    }
}

/// Open the link, check the controller, run the configured sweep, fit it, and
/// write the artifacts.
pub async fn measure(opener: &dyn LinkOpener, config: &Config) -> Result<Measurement, RunError> {
    config.sweep.validate()?;
    tracing::info!("Connecting to {}", opener.describe());
    let stream = opener.open().await?;
    let link = ControllerLink::new(stream, Duration::from_millis(config.link.timeout_ms));
    let mut driver = HostDriver::new(link);

    let controller = driver.query_version().await?;
    let results = driver.run_sweep(&config.sweep).await?;

    let parameters = match analysis::fit(&results) {
        Ok(p) => {
            tracing::info!(
                "Idss {:.2} mA, Voff {:.2} V, Yfs {:.2} mA/V, Vsat {:.2} V",
                p.idss,
                p.voff,
                p.yfs,
                p.vsat
            );
            Some(p)
        }
        Err(e) => {
            tracing::warn!("Bad transistor: {}", e);
            None
        }
    };

    let artifacts = ArtifactWriter::from_config(&config.output).write(&results, parameters.as_ref())?;
    Ok(Measurement {
        controller,
        results,
        parameters,
        artifacts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmeter_shared::protocol;
    use tmeter_shared::{FrameAccumulator, SampleRecord};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn driver(timeout_ms: u64) -> (HostDriver<DuplexStream>, DuplexStream) {
        let (controller, host) = tokio::io::duplex(8192);
        let link = ControllerLink::new(host, Duration::from_millis(timeout_ms));
        (HostDriver::new(link), controller)
    }

    async fn reply(controller: &mut DuplexStream, records: &[ControllerToHost]) {
        for record in records {
            controller.write_all(&protocol::encode_message(record).unwrap()).await.unwrap();
        }
    }

    async fn commands(controller: &mut DuplexStream) -> Vec<HostToController> {
        let mut buf = vec![0u8; 4096];
        let n = controller.read(&mut buf).await.unwrap();
        let mut acc = FrameAccumulator::new();
        buf[..n]
            .iter()
            .filter_map(|&b| acc.push(b))
            .map(|f| protocol::decode_message(&f.unwrap()).unwrap())
            .collect()
    }

    fn request(steps: u16) -> SweepRequest {
        SweepRequest { start: 0.0, stop: -1.0, steps, settle_us: 0 }
    }

    fn sample(index: u16) -> ControllerToHost {
        ControllerToHost::Sample(SampleRecord {
            index,
            stimulus: request(3).stimulus_at(index),
            response: 3.0 - index as f32,
        })
    }

    #[tokio::test]
    async fn test_version_mismatch_is_refused() {
        let (mut driver, mut controller) = driver(500);
        reply(&mut controller, &[ControllerToHost::Version { firmware: "9.9".into(), protocol: 7 }]).await;
        let err = driver.query_version().await.unwrap_err();
        assert!(matches!(err, RunError::VersionMismatch { controller: 7, host: PROTOCOL_VERSION }));
    }

    #[tokio::test]
    async fn test_complete_sweep() {
        let (mut driver, mut controller) = driver(500);
        reply(&mut controller, &[sample(0), sample(1), sample(2), ControllerToHost::Done { count: 3 }]).await;
        let results = driver.run_sweep(&request(3)).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.responses(), vec![3.0, 2.0, 1.0]);
        assert_eq!(commands(&mut controller).await, vec![HostToController::Sweep(request(3))]);
    }

    #[tokio::test]
    async fn test_skipped_index_is_out_of_sequence() {
        let (mut driver, mut controller) = driver(500);
        reply(&mut controller, &[sample(0), sample(2)]).await;
        let err = driver.run_sweep(&request(3)).await.unwrap_err();
        assert!(matches!(err, RunError::OutOfSequence { .. }));
        let sent = commands(&mut controller).await;
        assert_eq!(sent.last(), Some(&HostToController::Abort));
    }

    #[tokio::test]
    async fn test_controller_error_fails_without_abort() {
        let (mut driver, mut controller) = driver(500);
        reply(&mut controller, &[sample(0), ControllerToHost::error("step 1: adc")]).await;
        let err = driver.run_sweep(&request(3)).await.unwrap_err();
        assert!(matches!(&err, RunError::Controller(m) if m == "step 1: adc"));
        assert_eq!(commands(&mut controller).await, vec![HostToController::Sweep(request(3))]);
    }

    #[tokio::test]
    async fn test_early_done_is_count_mismatch() {
        let (mut driver, mut controller) = driver(500);
        reply(&mut controller, &[sample(0), ControllerToHost::Done { count: 1 }]).await;
        let err = driver.run_sweep(&request(3)).await.unwrap_err();
        assert!(matches!(err, RunError::CountMismatch { requested: 3, reported: 1, received: 1 }));
    }

    #[tokio::test]
    async fn test_timeout_sends_abort() {
        let (mut driver, mut controller) = driver(50);
        reply(&mut controller, &[sample(0)]).await;
        let err = driver.run_sweep(&request(3)).await.unwrap_err();
        assert!(matches!(err, RunError::Timeout(_)));
        assert_eq!(
            commands(&mut controller).await,
            vec![HostToController::Sweep(request(3)), HostToController::Abort]
        );
    }

    #[tokio::test]
    async fn test_invalid_request_sends_nothing() {
        let (mut driver, mut controller) = driver(50);
        let err = driver.run_sweep(&request(1)).await.unwrap_err();
        assert!(matches!(err, RunError::Sweep(_)));
        drop(driver);
        let mut buf = Vec::new();
        controller.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }
}
