use crate::error::{Error, Result};
use crate::types::{TraceJob, HOSTNAME_LABEL_KEY, PROGRAM_KEY};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, ConfigMap, ConfigMapVolumeSource, Container, HostPathVolumeSource,
    NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, PodSpec,
    PodTemplateSpec, SecurityContext, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

pub const DEFAULT_INIT_IMAGE: &str = "quay.io/fntlnz/kubectl-trace-init:latest";
pub const DEFAULT_TRACE_IMAGE: &str = "quay.io/fntlnz/kubectl-trace-bpftrace:latest";
pub const INIT_CONTAINER_NAME: &str = "kubectl-trace-init";
const PROGRAM_MOUNT_PATH: &str = "/programs";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleConfig {
    /// Image that prepares kernel headers for the target host.
    pub init_image: String,
    /// Image carrying the bpftrace runtime.
    pub trace_image: String,
    pub backoff_limit: i32,
    /// Let the control plane reap finished jobs. Off by default since it
    /// would leave the config map behind.
    pub ttl_seconds_after_finished: Option<i32>,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            init_image: DEFAULT_INIT_IMAGE.into(),
            trace_image: DEFAULT_TRACE_IMAGE.into(),
            backoff_limit: 1,
            ttl_seconds_after_finished: None,
        }
    }
}

/// The pair of objects backing one trace. Both carry the trace name.
#[derive(Clone, Debug)]
pub struct ProgramBundle {
    pub config_map: ConfigMap,
    pub job: Job,
}

/// Fails before anything remote happens if the trace cannot run.
pub fn validate(trace: &TraceJob) -> Result<()> {
    if trace.program.trim().is_empty() {
        return Err(Error::EmptyProgram);
    }
    if trace.hostname.trim().is_empty() {
        return Err(Error::MissingTarget);
    }
    Ok(())
}

pub fn build(trace: &TraceJob, config: &BundleConfig) -> Result<ProgramBundle> {
    validate(trace)?;
    let meta = ObjectMeta {
        name: Some(trace.name.clone()),
        namespace: Some(trace.namespace.clone()),
        labels: Some(trace.labels()),
        ..ObjectMeta::default()
    };

    let config_map = ConfigMap {
        metadata: meta.clone(),
        data: Some(BTreeMap::from([(
            PROGRAM_KEY.to_string(),
            trace.program.clone(),
        )])),
        ..ConfigMap::default()
    };

    let job = Job {
        metadata: meta,
        spec: Some(JobSpec {
            parallelism: Some(1),
            completions: Some(1),
            backoff_limit: Some(config.backoff_limit),
            ttl_seconds_after_finished: config.ttl_seconds_after_finished,
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(trace.labels()),
                    ..ObjectMeta::default()
                }),
                spec: Some(pod_spec(trace, config)),
            },
            ..JobSpec::default()
        }),
        ..Job::default()
    };

    Ok(ProgramBundle { config_map, job })
}

fn pod_spec(trace: &TraceJob, config: &BundleConfig) -> PodSpec {
    let init = Container {
        name: INIT_CONTAINER_NAME.into(),
        image: Some(config.init_image.clone()),
        volume_mounts: Some(vec![
            mount("lsb-release", "/etc/lsb-release-host", true),
            mount("os-release", "/etc/os-release-host", true),
            mount("modules-dir", "/lib/modules", false),
            mount("modules-host", "/lib/modules-host", true),
            mount("usr-host", "/usr-host", true),
        ]),
        ..Container::default()
    };

    let trace_container = Container {
        name: trace.name.clone(),
        image: Some(config.trace_image.clone()),
        command: Some(vec![
            "bpftrace".into(),
            format!("{}/{}", PROGRAM_MOUNT_PATH, PROGRAM_KEY),
        ]),
        volume_mounts: Some(vec![
            mount("program", PROGRAM_MOUNT_PATH, true),
            mount("sys", "/sys", true),
            mount("modules-dir", "/lib/modules", true),
            mount("usr-host", "/usr-host", true),
        ]),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            capabilities: Some(Capabilities {
                add: Some(vec!["SYS_ADMIN".into()]),
                ..Capabilities::default()
            }),
            ..SecurityContext::default()
        }),
        ..Container::default()
    };

    let program_volume = Volume {
        name: "program".into(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(trace.name.clone()),
            ..ConfigMapVolumeSource::default()
        }),
        ..Volume::default()
    };

    PodSpec {
        host_pid: Some(true),
        restart_policy: Some("Never".into()),
        init_containers: Some(vec![init]),
        containers: vec![trace_container],
        volumes: Some(vec![
            program_volume,
            host_path("lsb-release", "/etc/lsb-release"),
            host_path("os-release", "/etc/os-release"),
            host_path("modules-host", "/lib/modules"),
            host_path("sys", "/sys"),
            host_path("usr-host", "/usr"),
            Volume {
                name: "modules-dir".into(),
                empty_dir: Some(Default::default()),
                ..Volume::default()
            },
        ]),
        affinity: Some(node_affinity(&trace.hostname)),
        tolerations: Some(vec![Toleration {
            operator: Some("Exists".into()),
            ..Toleration::default()
        }]),
        ..PodSpec::default()
    }
}

fn node_affinity(hostname: &str) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: HOSTNAME_LABEL_KEY.into(),
                        operator: "In".into(),
                        values: Some(vec![hostname.into()]),
                    }]),
                    ..NodeSelectorTerm::default()
                }],
            }),
            ..NodeAffinity::default()
        }),
        ..Affinity::default()
    }
}

/// Recover the target hostname from a job built by [`build`].
pub fn hostname_of(job: &Job) -> Option<String> {
    let terms = &job
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .affinity
        .as_ref()?
        .node_affinity
        .as_ref()?
        .required_during_scheduling_ignored_during_execution
        .as_ref()?
        .node_selector_terms;
    terms
        .iter()
        .flat_map(|term| term.match_expressions.iter().flatten())
        .find(|req| req.key == HOSTNAME_LABEL_KEY)
        .and_then(|req| req.values.as_ref()?.first().cloned())
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.into(),
        mount_path: path.into(),
        read_only: Some(read_only),
        ..VolumeMount::default()
    }
}

fn host_path(name: &str, path: &str) -> Volume {
    Volume {
        name: name.into(),
        host_path: Some(HostPathVolumeSource {
            path: path.into(),
            ..HostPathVolumeSource::default()
        }),
        ..Volume::default()
    }
}
