use crate::control_plane::ControlPlane;
use crate::error::Result;
use crate::types::{id_selector, TraceJob};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use std::fmt;

const CONDITION_FAILED: &str = "Failed";
const CONDITION_COMPLETE: &str = "Complete";
const CONDITION_SUCCESS_CRITERIA_MET: &str = "SuccessCriteriaMet";
const CONDITION_SUSPENDED: &str = "Suspended";
const PHASE_RUNNING: &str = "Running";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    Unknown,
    Pending,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Stopped
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            ExecutionStatus::Unknown => "Unknown",
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Succeeded => "Succeeded",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Stopped => "Stopped",
        };
        f.write_str(status)
    }
}

/// The fields of one observation that status derivation looks at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub found: bool,
    /// Names of the job conditions whose status is `True`.
    pub conditions: Vec<String>,
    pub container_phase: Option<String>,
}

impl StatusSnapshot {
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn from_objects(job: Option<&Job>, pod: Option<&Pod>) -> Self {
        let job = match job {
            Some(job) => job,
            None => return Self::missing(),
        };
        let conditions = job
            .status
            .as_ref()
            .and_then(|status| status.conditions.as_ref())
            .map(|conditions| {
                conditions
                    .iter()
                    .filter(|c| c.status == "True")
                    .map(|c| c.type_.clone())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            found: true,
            conditions,
            container_phase: pod.and_then(phase_of).map(str::to_string),
        }
    }

    fn has(&self, condition: &str) -> bool {
        self.conditions.iter().any(|c| c == condition)
    }

    /// Total over every snapshot, so any remote state maps to one status.
    pub fn status(&self) -> ExecutionStatus {
        if !self.found {
            ExecutionStatus::Unknown
        } else if self.has(CONDITION_FAILED) {
            ExecutionStatus::Failed
        } else if self.has(CONDITION_COMPLETE) || self.has(CONDITION_SUCCESS_CRITERIA_MET) {
            ExecutionStatus::Succeeded
        } else if self.has(CONDITION_SUSPENDED) {
            ExecutionStatus::Stopped
        } else if self.container_phase.as_deref() == Some(PHASE_RUNNING) {
            ExecutionStatus::Running
        } else {
            ExecutionStatus::Pending
        }
    }
}

fn phase_of(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

/// One poll of a trace: its derived status and the pod backing it, if any.
#[derive(Clone, Debug)]
pub struct Observation {
    pub status: ExecutionStatus,
    pub pod: Option<Pod>,
}

impl Observation {
    pub fn pod_name(&self) -> Option<&str> {
        self.pod.as_ref()?.metadata.name.as_deref()
    }
}

/// Recomputes a trace's status from scratch on every call.
#[derive(Clone)]
pub struct StatusTracker<C> {
    plane: C,
}

impl<C: ControlPlane> StatusTracker<C> {
    pub fn new(plane: C) -> Self {
        Self { plane }
    }

    pub async fn observe(&self, trace: &TraceJob) -> Result<Observation> {
        let job = self.plane.get_job(&trace.namespace, &trace.name).await?;
        if job.is_none() {
            return Ok(Observation {
                status: ExecutionStatus::Unknown,
                pod: None,
            });
        }
        let pods = self
            .plane
            .list_pods(&trace.namespace, &id_selector(trace.id))
            .await?;
        let pod = backing_pod(pods);
        let status = StatusSnapshot::from_objects(job.as_ref(), pod.as_ref()).status();
        tracing::trace!(trace = %trace.name, %status, "observed trace status");
        Ok(Observation { status, pod })
    }

    pub async fn status(&self, trace: &TraceJob) -> Result<ExecutionStatus> {
        Ok(self.observe(trace).await?.status)
    }
}

/// A running pod if there is one, otherwise the newest.
fn backing_pod(mut pods: Vec<Pod>) -> Option<Pod> {
    if let Some(index) = pods.iter().position(|pod| phase_of(pod) == Some(PHASE_RUNNING)) {
        return Some(pods.swap_remove(index));
    }
    pods.sort_by(|a, b| {
        let created = |pod: &Pod| pod.metadata.creation_timestamp.clone();
        created(a).cmp(&created(b))
    });
    pods.pop()
}
