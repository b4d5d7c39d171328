use crate::cancel::{run_until_cancelled, sleep_or_cancelled};
use crate::client::TraceJobClient;
use crate::control_plane::{AttachRequest, ControlPlane, OutputStream};
use crate::error::{Error, Result};
use crate::status::{ExecutionStatus, Observation, StatusTracker};
use crate::types::TraceJob;
use futures::StreamExt;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachConfig {
    /// Wait between polls while the trace is not running yet.
    pub poll_interval: Duration,
    /// Relay stderr along with stdout.
    pub stderr: bool,
    /// Suspend the remote job when the caller cancels.
    pub stop_on_cancel: bool,
    /// Fetch container logs when nothing could be streamed.
    pub fallback_logs: bool,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            stderr: false,
            stop_on_cancel: false,
            fallback_logs: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttachOutcome {
    /// The remote stream ended, the program exited.
    Completed,
    /// The caller cancelled. Not an error.
    Cancelled,
    /// Streaming was not possible but the trace itself is unaffected.
    Detached { reason: String },
}

enum Wait {
    Running(String),
    Finished(Observation),
    Cancelled,
}

pub struct Attacher<C> {
    client: TraceJobClient<C>,
    tracker: StatusTracker<C>,
    config: AttachConfig,
}

impl<C: ControlPlane + Clone> Attacher<C> {
    pub fn new(client: TraceJobClient<C>, config: AttachConfig) -> Self {
        let tracker = StatusTracker::new(client.control_plane().clone());
        Self {
            client,
            tracker,
            config,
        }
    }

    /// Stream the trace's output into `sink` until it ends or `token` fires.
    ///
    /// Polls until the backing container is running, then attaches. Attach
    /// is never attempted while the trace is pending or not found.
    pub async fn attach_job<W>(
        &self,
        trace: &TraceJob,
        sink: &mut W,
        token: &CancellationToken,
    ) -> Result<AttachOutcome>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let pod = match self.wait_for_running(trace, token).await? {
            Wait::Running(pod) => pod,
            Wait::Finished(observation) => {
                let reason = format!("trace already {}", observation.status);
                return match observation.pod_name() {
                    Some(pod) => self.detach(trace, pod, reason, 0, sink, token).await,
                    None => {
                        tracing::warn!(trace = %trace.name, %reason, "could not attach");
                        Ok(AttachOutcome::Detached { reason })
                    }
                };
            }
            Wait::Cancelled => return self.cancelled(trace).await,
        };

        let request = AttachRequest {
            container: trace.name.clone(),
            stderr: self.config.stderr,
        };
        let attach = self
            .client
            .control_plane()
            .attach(&trace.namespace, &pod, &request);
        let stream = match run_until_cancelled(token, attach).await {
            None => return self.cancelled(trace).await,
            Some(Err(err)) => {
                return self.detach(trace, &pod, err.to_string(), 0, sink, token).await
            }
            Some(Ok(stream)) => stream,
        };
        tracing::debug!(trace = %trace.name, %pod, "attached to trace pod");
        self.relay(trace, &pod, stream, sink, token).await
    }

    async fn wait_for_running(&self, trace: &TraceJob, token: &CancellationToken) -> Result<Wait> {
        loop {
            let observation = match run_until_cancelled(token, self.tracker.observe(trace)).await {
                None => return Ok(Wait::Cancelled),
                Some(observation) => observation?,
            };
            match observation.status {
                ExecutionStatus::Running => {
                    if let Some(pod) = observation.pod_name() {
                        return Ok(Wait::Running(pod.to_string()));
                    }
                }
                ExecutionStatus::Pending | ExecutionStatus::Unknown => {}
                _ => return Ok(Wait::Finished(observation)),
            }
            tracing::debug!(trace = %trace.name, status = %observation.status, "waiting for trace pod");
            if !sleep_or_cancelled(token, self.config.poll_interval).await {
                return Ok(Wait::Cancelled);
            }
        }
    }

    async fn relay<W>(
        &self,
        trace: &TraceJob,
        pod: &str,
        mut stream: OutputStream,
        sink: &mut W,
        token: &CancellationToken,
    ) -> Result<AttachOutcome>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut relayed = 0;
        loop {
            let next = match run_until_cancelled(token, stream.next()).await {
                Some(next) => next,
                None => {
                    // closes the local side of the stream
                    drop(stream);
                    sink.flush().await.map_err(Error::Sink)?;
                    return self.cancelled(trace).await;
                }
            };
            match next {
                Some(Ok(blob)) => {
                    relayed += blob.len();
                    sink.write_all(&blob).await.map_err(Error::Sink)?;
                }
                Some(Err(err)) => {
                    sink.flush().await.map_err(Error::Sink)?;
                    return self
                        .detach(trace, pod, err.to_string(), relayed, sink, token)
                        .await;
                }
                None => {
                    sink.flush().await.map_err(Error::Sink)?;
                    tracing::debug!(trace = %trace.name, relayed, "trace output ended");
                    return Ok(AttachOutcome::Completed);
                }
            }
        }
    }

    /// Downgrade a failed attach to a warning, relaying logs instead if
    /// nothing reached the sink yet.
    async fn detach<W>(
        &self,
        trace: &TraceJob,
        pod: &str,
        reason: String,
        relayed: usize,
        sink: &mut W,
        token: &CancellationToken,
    ) -> Result<AttachOutcome>
    where
        W: AsyncWrite + Unpin + Send,
    {
        tracing::warn!(
            trace = %trace.name,
            %pod,
            %reason,
            "could not attach, the trace may have already finished"
        );
        if self.config.fallback_logs && relayed == 0 {
            let logs = self
                .client
                .control_plane()
                .logs(&trace.namespace, pod, &trace.name);
            match run_until_cancelled(token, logs).await {
                None => return self.cancelled(trace).await,
                Some(Ok(blob)) => {
                    sink.write_all(&blob).await.map_err(Error::Sink)?;
                    sink.flush().await.map_err(Error::Sink)?;
                }
                Some(Err(err)) => {
                    tracing::warn!(trace = %trace.name, %pod, error = %err, "could not fetch trace logs");
                }
            }
        }
        Ok(AttachOutcome::Detached { reason })
    }

    async fn cancelled(&self, trace: &TraceJob) -> Result<AttachOutcome> {
        tracing::debug!(trace = %trace.name, "attach cancelled");
        if self.config.stop_on_cancel {
            match timeout(STOP_TIMEOUT, self.client.stop_job(&trace.name)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(trace = %trace.name, error = %err, "could not stop trace")
                }
                Err(_) => tracing::warn!(trace = %trace.name, "timed out stopping trace"),
            }
        }
        Ok(AttachOutcome::Cancelled)
    }
}
