mod kubernetes;
#[cfg(test)]
pub(crate) mod fake;

pub use kubernetes::KubeControlPlane;

use crate::types::OutputBlob;
use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use std::{fmt, io, result};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    ConfigMap,
    Job,
    Pod,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ObjectKind::ConfigMap => "configmap",
            ObjectKind::Job => "job",
            ObjectKind::Pod => "pod",
        };
        f.write_str(kind)
    }
}

#[derive(Error, Debug)]
pub enum ControlPlaneError {
    #[error("{kind} {name} not found")]
    NotFound { kind: ObjectKind, name: String },
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: ObjectKind, name: String },
    #[error("control plane rejected the request ({code}): {message}")]
    Rejected { code: u16, message: String },
    #[error(transparent)]
    Transport(#[from] kube::Error),
}

impl ControlPlaneError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControlPlaneError::NotFound { .. })
    }
}

pub type Result<T> = result::Result<T, ControlPlaneError>;

/// Raw bytes relayed from an attached container.
pub type OutputStream = BoxStream<'static, io::Result<OutputBlob>>;

/// What to stream from an attached container. Stdin is never redirected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachRequest {
    pub container: String,
    pub stderr: bool,
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap)
        -> Result<ConfigMap>;
    async fn list_config_maps(&self, namespace: &str, selector: &str) -> Result<Vec<ConfigMap>>;
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;
    /// Deleting an absent config map fails with [`ControlPlaneError::NotFound`].
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job>;
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;
    async fn list_jobs(&self, namespace: &str, selector: &str) -> Result<Vec<Job>>;
    /// Deletes the job together with its pods.
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;
    /// Ask the control plane to stop the job's pods gracefully.
    async fn suspend_job(&self, namespace: &str, name: &str) -> Result<()>;

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;
    async fn attach(
        &self,
        namespace: &str,
        pod: &str,
        request: &AttachRequest,
    ) -> Result<OutputStream>;
    async fn logs(&self, namespace: &str, pod: &str, container: &str) -> Result<OutputBlob>;
}
