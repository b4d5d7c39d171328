use super::{AttachRequest, ControlPlane, ControlPlaneError, ObjectKind, OutputStream, Result};
use crate::types::{OutputBlob, TRACE_LABEL_KEY};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

/// A remote call observed by the fake, in order of arrival.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    CreateConfigMap(String),
    CreateJob(String),
    DeleteConfigMap(String),
    DeleteJob(String),
    SuspendJob(String),
    Attach(String),
    Logs(String),
    Read,
}

type Key = (String, String);

#[derive(Default)]
struct State {
    config_maps: BTreeMap<Key, ConfigMap>,
    jobs: BTreeMap<Key, Job>,
    pods: BTreeMap<Key, Pod>,
    calls: Vec<Call>,
    reject_job_create: bool,
    reject_config_map_delete: bool,
    reject_job_delete: bool,
    reject_attach: bool,
    attach_streams: VecDeque<OutputStream>,
    logs: BTreeMap<String, OutputBlob>,
}

/// In-memory control plane with per-object consistency and no scheduler.
///
/// Tests drive lifecycle transitions by hand through the `set_*` helpers.
#[derive(Clone, Default)]
pub(crate) struct FakeControlPlane {
    state: Arc<Mutex<State>>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn matches(meta: &ObjectMeta, selector: &str) -> bool {
    let labels = meta.labels.clone().unwrap_or_default();
    selector.split(',').all(|term| match term.split_once('=') {
        Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
        None => labels.contains_key(term),
    })
}

impl FakeControlPlane {
    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls that would create, mutate or stream from remote objects.
    pub(crate) fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| *call != Call::Read)
            .collect()
    }

    pub(crate) fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        let state = self.state.lock().unwrap();
        state.config_maps.get(&key(namespace, name)).cloned()
    }

    pub(crate) fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        let state = self.state.lock().unwrap();
        state.jobs.get(&key(namespace, name)).cloned()
    }

    pub(crate) fn remove_config_map(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.config_maps.remove(&key(namespace, name));
    }

    pub(crate) fn reject_job_create(&self) {
        self.state.lock().unwrap().reject_job_create = true;
    }

    pub(crate) fn reject_config_map_delete(&self, reject: bool) {
        self.state.lock().unwrap().reject_config_map_delete = reject;
    }

    pub(crate) fn reject_job_delete(&self, reject: bool) {
        self.state.lock().unwrap().reject_job_delete = reject;
    }

    pub(crate) fn reject_attach(&self) {
        self.state.lock().unwrap().reject_attach = true;
    }

    pub(crate) fn queue_attach_stream(&self, stream: OutputStream) {
        self.state.lock().unwrap().attach_streams.push_back(stream);
    }

    pub(crate) fn set_logs(&self, pod: &str, logs: &str) {
        let mut state = self.state.lock().unwrap();
        state.logs.insert(pod.into(), OutputBlob::from(logs.to_string()));
    }

    /// Set a condition with status `True` on a job.
    pub(crate) fn set_job_condition(&self, namespace: &str, name: &str, condition: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&key(namespace, name)) {
            let status = job.status.get_or_insert_with(JobStatus::default);
            status
                .conditions
                .get_or_insert_with(Vec::new)
                .push(JobCondition {
                    type_: condition.into(),
                    status: "True".into(),
                    ..JobCondition::default()
                });
        }
    }

    /// Create or update the backing pod of a job, labeled like the job template.
    pub(crate) fn set_pod(&self, namespace: &str, job_name: &str, pod_name: &str, phase: &str) {
        let mut state = self.state.lock().unwrap();
        let labels = state
            .jobs
            .get(&key(namespace, job_name))
            .and_then(|job| job.spec.as_ref())
            .and_then(|spec| spec.template.metadata.as_ref())
            .and_then(|meta| meta.labels.clone())
            .unwrap_or_default();
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(pod_name.into()),
                namespace: Some(namespace.into()),
                labels: Some(labels),
                ..ObjectMeta::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.into()),
                ..PodStatus::default()
            }),
            ..Pod::default()
        };
        state.pods.insert(key(namespace, pod_name), pod);
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap> {
        let mut state = self.state.lock().unwrap();
        let name = config_map.metadata.name.clone().unwrap_or_default();
        state.calls.push(Call::CreateConfigMap(name.clone()));
        let k = key(namespace, &name);
        if state.config_maps.contains_key(&k) {
            return Err(ControlPlaneError::AlreadyExists {
                kind: ObjectKind::ConfigMap,
                name,
            });
        }
        let mut created = config_map.clone();
        created.metadata.namespace = Some(namespace.into());
        state.config_maps.insert(k, created.clone());
        Ok(created)
    }

    async fn list_config_maps(&self, namespace: &str, selector: &str) -> Result<Vec<ConfigMap>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Read);
        Ok(state
            .config_maps
            .iter()
            .filter(|((ns, _), cm)| ns == namespace && matches(&cm.metadata, selector))
            .map(|(_, cm)| cm.clone())
            .collect())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Read);
        Ok(state.config_maps.get(&key(namespace, name)).cloned())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::DeleteConfigMap(name.into()));
        if state.reject_config_map_delete {
            return Err(ControlPlaneError::Rejected {
                code: 500,
                message: "etcd unavailable".into(),
            });
        }
        match state.config_maps.remove(&key(namespace, name)) {
            Some(_) => Ok(()),
            None => Err(ControlPlaneError::NotFound {
                kind: ObjectKind::ConfigMap,
                name: name.into(),
            }),
        }
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job> {
        let mut state = self.state.lock().unwrap();
        let name = job.metadata.name.clone().unwrap_or_default();
        state.calls.push(Call::CreateJob(name.clone()));
        if state.reject_job_create {
            return Err(ControlPlaneError::Rejected {
                code: 422,
                message: "job spec is invalid".into(),
            });
        }
        let k = key(namespace, &name);
        if state.jobs.contains_key(&k) {
            return Err(ControlPlaneError::AlreadyExists {
                kind: ObjectKind::Job,
                name,
            });
        }
        let mut created = job.clone();
        created.metadata.namespace = Some(namespace.into());
        state.jobs.insert(k, created.clone());
        Ok(created)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Read);
        Ok(state.jobs.get(&key(namespace, name)).cloned())
    }

    async fn list_jobs(&self, namespace: &str, selector: &str) -> Result<Vec<Job>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Read);
        Ok(state
            .jobs
            .iter()
            .filter(|((ns, _), job)| ns == namespace && matches(&job.metadata, selector))
            .map(|(_, job)| job.clone())
            .collect())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::DeleteJob(name.into()));
        if state.reject_job_delete {
            return Err(ControlPlaneError::Rejected {
                code: 503,
                message: "apiserver unavailable".into(),
            });
        }
        if state.jobs.remove(&key(namespace, name)).is_none() {
            return Err(ControlPlaneError::NotFound {
                kind: ObjectKind::Job,
                name: name.into(),
            });
        }
        // background propagation
        state.pods.retain(|(ns, _), pod| {
            let owner = pod
                .metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(TRACE_LABEL_KEY));
            !(ns == namespace && owner.map(String::as_str) == Some(name))
        });
        Ok(())
    }

    async fn suspend_job(&self, namespace: &str, name: &str) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::SuspendJob(name.into()));
            let job = state
                .jobs
                .get_mut(&key(namespace, name))
                .ok_or_else(|| ControlPlaneError::NotFound {
                    kind: ObjectKind::Job,
                    name: name.into(),
                })?;
            if let Some(spec) = job.spec.as_mut() {
                spec.suspend = Some(true);
            }
        }
        self.set_job_condition(namespace, name, "Suspended");
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Read);
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), pod)| ns == namespace && matches(&pod.metadata, selector))
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn attach(
        &self,
        _namespace: &str,
        pod: &str,
        _request: &AttachRequest,
    ) -> Result<OutputStream> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Attach(pod.into()));
        if state.reject_attach {
            return Err(ControlPlaneError::Rejected {
                code: 400,
                message: "container is not running".into(),
            });
        }
        Ok(state
            .attach_streams
            .pop_front()
            .unwrap_or_else(|| stream::empty().boxed()))
    }

    async fn logs(&self, _namespace: &str, pod: &str, _container: &str) -> Result<OutputBlob> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Logs(pod.into()));
        state
            .logs
            .get(pod)
            .cloned()
            .ok_or_else(|| ControlPlaneError::NotFound {
                kind: ObjectKind::Pod,
                name: pod.into(),
            })
    }
}
