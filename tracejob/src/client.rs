use crate::bundle::{self, BundleConfig};
use crate::control_plane::{ControlPlane, ControlPlaneError, ObjectKind};
use crate::error::{DeleteErrors, Error, Result};
use crate::types::{
    all_selector, id_selector, TraceId, TraceJob, PROGRAM_KEY, TRACE_ID_LABEL_KEY,
};
use k8s_openapi::api::batch::v1::Job;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Which traces a lookup or deletion applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobFilter {
    All,
    Name(String),
    Id(TraceId),
}

/// Creates, finds and deletes the config map + job pair of a trace as one unit.
///
/// There is no transaction underneath: creation is two ordered calls and
/// deletion two independent ones, see [`TraceJobClient::create_job`] and
/// [`TraceJobClient::delete_jobs`] for what a partial failure leaves behind.
#[derive(Clone)]
pub struct TraceJobClient<C> {
    plane: C,
    namespace: String,
    bundle: BundleConfig,
}

impl<C: ControlPlane> TraceJobClient<C> {
    pub fn new(plane: C, namespace: &str) -> Self {
        Self::with_bundle_config(plane, namespace, BundleConfig::default())
    }

    pub fn with_bundle_config(plane: C, namespace: &str, bundle: BundleConfig) -> Self {
        Self {
            plane,
            namespace: namespace.into(),
            bundle,
        }
    }

    pub fn control_plane(&self) -> &C {
        &self.plane
    }

    /// Create the config map, then the job that mounts it.
    ///
    /// A failed job creation leaves the config map in place and is reported as
    /// [`Error::JobCreate`]; deleting the trace reclaims it. A trace from
    /// another namespace is rejected before any remote call.
    pub async fn create_job(&self, trace: &TraceJob) -> Result<Job> {
        if trace.namespace != self.namespace {
            return Err(Error::NamespaceMismatch {
                expected: self.namespace.clone(),
                found: trace.namespace.clone(),
            });
        }
        let bundle = bundle::build(trace, &self.bundle)?;

        self.plane
            .create_config_map(&self.namespace, &bundle.config_map)
            .await
            .map_err(|source| Error::ConfigMapCreate {
                name: trace.name.clone(),
                source,
            })?;

        let job = self
            .plane
            .create_job(&self.namespace, &bundle.job)
            .await
            .map_err(|source| Error::JobCreate {
                name: trace.name.clone(),
                source,
            })?;

        tracing::info!(trace = %trace.name, host = %trace.hostname, "trace job created");
        Ok(job)
    }

    pub async fn get_job(&self, name: &str) -> Result<Option<TraceJob>> {
        match self.plane.get_job(&self.namespace, name).await? {
            Some(job) => self.to_trace_job(&job).await,
            None => Ok(None),
        }
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<TraceJob>> {
        let jobs = match filter {
            JobFilter::Name(name) => return Ok(self.get_job(name).await?.into_iter().collect()),
            JobFilter::Id(id) => self.plane.list_jobs(&self.namespace, &id_selector(*id)).await?,
            JobFilter::All => self.plane.list_jobs(&self.namespace, &all_selector()).await?,
        };
        let mut traces = Vec::with_capacity(jobs.len());
        for job in &jobs {
            if let Some(trace) = self.to_trace_job(job).await? {
                traces.push(trace);
            }
        }
        Ok(traces)
    }

    /// Delete both objects of every matching trace.
    ///
    /// Every deletion is attempted even when an earlier one fails; objects that
    /// are already gone count as deleted. Failures come back together in
    /// [`Error::Delete`].
    pub async fn delete_jobs(&self, filter: &JobFilter) -> Result<()> {
        let names = self.names_matching(filter).await?;
        let mut errors = DeleteErrors::default();
        for name in &names {
            if let Err(err) = self.plane.delete_job(&self.namespace, name).await {
                record(&mut errors, ObjectKind::Job, name, err);
            }
            if let Err(err) = self.plane.delete_config_map(&self.namespace, name).await {
                record(&mut errors, ObjectKind::ConfigMap, name, err);
            }
            tracing::debug!(trace = %name, "trace job deleted");
        }
        errors.into_result()
    }

    /// Request a graceful remote stop by suspending the job.
    pub async fn stop_job(&self, name: &str) -> Result<()> {
        self.plane
            .suspend_job(&self.namespace, name)
            .await
            .map_err(|err| match err {
                ControlPlaneError::NotFound { .. } => Error::NotFound(name.into()),
                other => other.into(),
            })?;
        tracing::info!(trace = %name, "trace job stop requested");
        Ok(())
    }

    /// Names of every object matching the filter, job or config map.
    ///
    /// Config maps are listed too so a half-created trace is still found.
    async fn names_matching(&self, filter: &JobFilter) -> Result<BTreeSet<String>> {
        let selector = match filter {
            JobFilter::Name(name) => return Ok(BTreeSet::from([name.clone()])),
            JobFilter::Id(id) => id_selector(*id),
            JobFilter::All => all_selector(),
        };
        let jobs = self.plane.list_jobs(&self.namespace, &selector).await?;
        let config_maps = self.plane.list_config_maps(&self.namespace, &selector).await?;
        Ok(jobs
            .iter()
            .map(|job| &job.metadata)
            .chain(config_maps.iter().map(|cm| &cm.metadata))
            .filter_map(|meta| meta.name.clone())
            .collect())
    }

    async fn to_trace_job(&self, job: &Job) -> Result<Option<TraceJob>> {
        let name = match job.metadata.name.clone() {
            Some(name) => name,
            None => return Ok(None),
        };
        let id = job
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(TRACE_ID_LABEL_KEY))
            .and_then(|id| Uuid::parse_str(id).ok());
        let id = match id {
            Some(id) => id,
            None => return Ok(None),
        };
        let program = self
            .plane
            .get_config_map(&self.namespace, &name)
            .await?
            .and_then(|cm| cm.data)
            .and_then(|mut data| data.remove(PROGRAM_KEY))
            .unwrap_or_default();
        Ok(Some(TraceJob {
            id,
            name,
            namespace: self.namespace.clone(),
            hostname: bundle::hostname_of(job).unwrap_or_default(),
            program,
        }))
    }
}

fn record(errors: &mut DeleteErrors, kind: ObjectKind, name: &str, err: ControlPlaneError) {
    if err.is_not_found() {
        tracing::debug!(%kind, name, "already deleted");
    } else {
        errors.push(kind, name, err);
    }
}
