mod actors;
pub mod attacher;
pub mod bundle;
pub mod cancel;
pub mod client;
pub mod control_plane;
pub mod error;
pub mod status;
pub mod types;

// re-export the signal actor handle as if it is the propagator itself.
pub use actors::signals::{
    Escalation, Signal, SignalPropagatorHandle as SignalPropagator, ESCALATION_EXIT_CODE,
};
pub use attacher::{AttachConfig, AttachOutcome, Attacher};
pub use bundle::BundleConfig;
pub use client::{JobFilter, TraceJobClient};
pub use control_plane::{ControlPlane, KubeControlPlane};
pub use error::{Error, Result};
pub use status::{ExecutionStatus, StatusTracker};
pub use types::TraceJob;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::fake::FakeControlPlane;
    use bytes::Bytes;
    use futures::{stream, StreamExt};
    use std::io;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn basic() {
        let plane = FakeControlPlane::default();
        let client = TraceJobClient::new(plane.clone(), "default");
        let tracker = StatusTracker::new(plane.clone());
        let trace = TraceJob::new("default", "nodeA", "BEGIN { print(1) }".into());

        client.create_job(&trace).await.expect("trace create err");
        assert_eq!(tracker.status(&trace).await.unwrap(), ExecutionStatus::Pending);

        plane.set_pod("default", &trace.name, "trace-pod", "Running");
        let output: Vec<io::Result<Bytes>> = vec![Ok(Bytes::from("1\n"))];
        plane.queue_attach_stream(stream::iter(output).boxed());

        let attacher = Attacher::new(client.clone(), AttachConfig::default());
        let mut output_bytes: Vec<u8> = vec![];
        let outcome = attacher
            .attach_job(&trace, &mut output_bytes, &CancellationToken::new())
            .await
            .expect("failed to attach to trace");
        assert_eq!(outcome, AttachOutcome::Completed);
        assert_eq!(String::from_utf8_lossy(&output_bytes), "1\n");

        plane.set_job_condition("default", &trace.name, "Complete");
        assert_eq!(tracker.status(&trace).await.unwrap(), ExecutionStatus::Succeeded);

        client
            .delete_jobs(&JobFilter::Id(trace.id))
            .await
            .expect("trace delete err");
        assert_eq!(tracker.status(&trace).await.unwrap(), ExecutionStatus::Unknown);
    }
}
