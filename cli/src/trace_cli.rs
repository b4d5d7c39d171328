use crate::target;
use std::error::Error;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracejob::cancel::run_until_cancelled;
use tracejob::{
    AttachConfig, AttachOutcome, Attacher, BundleConfig, JobFilter, KubeControlPlane,
    SignalPropagator, StatusTracker, TraceJob, TraceJobClient,
};
use uuid::Uuid;

type CliResult<T> = Result<T, Box<dyn Error>>;

pub struct TraceCli {
    plane: KubeControlPlane,
    namespace: String,
}

impl TraceCli {
    pub async fn connect(namespace: Option<String>) -> CliResult<Self> {
        let plane = KubeControlPlane::try_default().await?;
        let namespace =
            namespace.unwrap_or_else(|| plane.client().default_namespace().to_string());
        Ok(Self { plane, namespace })
    }

    fn client(&self, bundle: BundleConfig) -> TraceJobClient<KubeControlPlane> {
        TraceJobClient::with_bundle_config(self.plane.clone(), &self.namespace, bundle)
    }

    /// create a trace, optionally following its output
    pub async fn run_trace(
        &self,
        resource: &str,
        program: String,
        bundle: BundleConfig,
        attach: Option<AttachConfig>,
    ) -> CliResult<()> {
        let signals = SignalPropagator::install(CancellationToken::new())?;
        let result = self
            .create_and_follow(&signals.token(), resource, program, bundle, attach)
            .await;
        signals.uninstall().await;
        result
    }

    async fn create_and_follow(
        &self,
        token: &CancellationToken,
        resource: &str,
        program: String,
        bundle: BundleConfig,
        attach: Option<AttachConfig>,
    ) -> CliResult<()> {
        let hostname = run_until_cancelled(token, target::resolve_hostname(self.plane.client(), resource))
            .await
            .ok_or_else(interrupted)??;
        let client = self.client(bundle);
        let trace = TraceJob::new(&self.namespace, &hostname, program);
        match run_until_cancelled(token, client.create_job(&trace)).await {
            Some(created) => created?,
            None => {
                return Err(format!(
                    "interrupted while creating trace {}, delete it to clean up what was created",
                    trace.id
                )
                .into())
            }
        };
        println!("trace {} created", trace.id);

        if let Some(config) = attach {
            follow(&client, &trace, config, token).await?;
        }
        Ok(())
    }

    pub async fn attach_trace(&self, trace_id: Uuid, config: AttachConfig) -> CliResult<()> {
        let client = self.client(BundleConfig::default());
        let trace = client
            .list_jobs(&JobFilter::Id(trace_id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| tracejob::Error::NotFound(trace_id.to_string()))?;
        let signals = SignalPropagator::install(CancellationToken::new())?;
        let result = follow(&client, &trace, config, &signals.token()).await;
        signals.uninstall().await;
        result
    }

    pub async fn get_traces(&self, trace_id: Option<Uuid>) -> CliResult<()> {
        let client = self.client(BundleConfig::default());
        let filter = trace_id.map(JobFilter::Id).unwrap_or(JobFilter::All);
        let tracker = StatusTracker::new(self.plane.clone());
        println!("{:<16} {:<32} {:<50} {}", "NAMESPACE", "NODE", "NAME", "STATUS");
        for trace in client.list_jobs(&filter).await? {
            let status = tracker.status(&trace).await?;
            println!(
                "{:<16} {:<32} {:<50} {}",
                trace.namespace, trace.hostname, trace.name, status
            );
        }
        Ok(())
    }

    pub async fn delete_traces(&self, filter: JobFilter) -> CliResult<()> {
        let client = self.client(BundleConfig::default());
        let signals = SignalPropagator::install(CancellationToken::new())?;
        let deleted = run_until_cancelled(&signals.token(), client.delete_jobs(&filter)).await;
        signals.uninstall().await;
        // an interrupted delete can be rerun, deletion is idempotent
        deleted.ok_or_else(interrupted)??;
        Ok(())
    }
}

fn interrupted() -> Box<dyn Error> {
    "interrupted".into()
}

/// Stream a trace to stdout until it ends or `token` is cancelled.
async fn follow(
    client: &TraceJobClient<KubeControlPlane>,
    trace: &TraceJob,
    config: AttachConfig,
    token: &CancellationToken,
) -> CliResult<()> {
    let attacher = Attacher::new(client.clone(), config);
    let mut stdout = tokio::io::stdout();
    let outcome = attacher.attach_job(trace, &mut stdout, token).await?;
    if let AttachOutcome::Detached { reason } = outcome {
        tracing::debug!(trace = %trace.id, %reason, "detached from trace");
    }
    Ok(())
}

/// Load a program from a literal or a file.
pub async fn load_program(eval: Option<String>, filename: Option<&Path>) -> CliResult<String> {
    let program = match (eval, filename) {
        (Some(eval), _) => eval,
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .map_err(|err| format!("error opening program file {}: {}", path.display(), err))?,
        (None, None) => return Err("the bpftrace program is mandatory".into()),
    };
    if program.trim().is_empty() {
        return Err(tracejob::Error::EmptyProgram.into());
    }
    Ok(program)
}
