use super::{AttachRequest, ControlPlane, ControlPlaneError, ObjectKind, OutputStream, Result};
use crate::types::OutputBlob;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{
    Api, AttachParams, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams,
};
use kube::Client;
use serde_json::json;
use tokio_util::io::ReaderStream;

/// [`ControlPlane`] backed by a Kubernetes API server.
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster environment.
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Translate API status codes into the cases callers branch on.
fn classify(err: kube::Error, kind: ObjectKind, name: &str) -> ControlPlaneError {
    match err {
        kube::Error::Api(response) => match response.code {
            404 => ControlPlaneError::NotFound {
                kind,
                name: name.into(),
            },
            409 => ControlPlaneError::AlreadyExists {
                kind,
                name: name.into(),
            },
            code => ControlPlaneError::Rejected {
                code,
                message: response.message,
            },
        },
        other => ControlPlaneError::Transport(other),
    }
}

fn name_of(meta: &ObjectMeta) -> &str {
    meta.name.as_deref().unwrap_or_default()
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap> {
        self.config_maps(namespace)
            .create(&PostParams::default(), config_map)
            .await
            .map_err(|err| classify(err, ObjectKind::ConfigMap, name_of(&config_map.metadata)))
    }

    async fn list_config_maps(&self, namespace: &str, selector: &str) -> Result<Vec<ConfigMap>> {
        let list = self
            .config_maps(namespace)
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|err| classify(err, ObjectKind::ConfigMap, selector))?;
        Ok(list.items)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        self.config_maps(namespace)
            .get_opt(name)
            .await
            .map_err(|err| classify(err, ObjectKind::ConfigMap, name))
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        self.config_maps(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|err| classify(err, ObjectKind::ConfigMap, name))
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job> {
        self.jobs(namespace)
            .create(&PostParams::default(), job)
            .await
            .map_err(|err| classify(err, ObjectKind::Job, name_of(&job.metadata)))
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        self.jobs(namespace)
            .get_opt(name)
            .await
            .map_err(|err| classify(err, ObjectKind::Job, name))
    }

    async fn list_jobs(&self, namespace: &str, selector: &str) -> Result<Vec<Job>> {
        let list = self
            .jobs(namespace)
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|err| classify(err, ObjectKind::Job, selector))?;
        Ok(list.items)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        self.jobs(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|err| classify(err, ObjectKind::Job, name))
    }

    async fn suspend_job(&self, namespace: &str, name: &str) -> Result<()> {
        let patch = json!({ "spec": { "suspend": true } });
        self.jobs(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|err| classify(err, ObjectKind::Job, name))
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|err| classify(err, ObjectKind::Pod, selector))?;
        Ok(list.items)
    }

    async fn attach(
        &self,
        namespace: &str,
        pod: &str,
        request: &AttachRequest,
    ) -> Result<OutputStream> {
        let params = AttachParams::default()
            .container(request.container.as_str())
            .stdin(false)
            .stdout(true)
            .stderr(request.stderr)
            .tty(false);
        let mut process = self
            .pods(namespace)
            .attach(pod, &params)
            .await
            .map_err(|err| classify(err, ObjectKind::Pod, pod))?;

        let stdout = process.stdout().map(|reader| ReaderStream::new(reader).boxed());
        let stderr = process.stderr().map(|reader| ReaderStream::new(reader).boxed());
        let merged = match (stdout, stderr) {
            (Some(out), Some(err)) => stream::select(out, err).boxed(),
            (Some(out), None) => out,
            (None, Some(err)) => err,
            (None, None) => stream::empty().boxed(),
        };
        // the process owns the websocket task, so it lives as long as the stream
        Ok(merged
            .inspect(move |_| {
                let _ = &process;
            })
            .boxed())
    }

    async fn logs(&self, namespace: &str, pod: &str, container: &str) -> Result<OutputBlob> {
        let params = LogParams {
            container: Some(container.into()),
            ..LogParams::default()
        };
        let logs = self
            .pods(namespace)
            .logs(pod, &params)
            .await
            .map_err(|err| classify(err, ObjectKind::Pod, pod))?;
        Ok(OutputBlob::from(logs))
    }
}
