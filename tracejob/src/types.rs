use std::collections::BTreeMap;
use uuid::Uuid;

pub type TraceId = Uuid;
pub type Program = String;
pub type OutputBlob = bytes::Bytes;

/// Prefix of every object name owned by a trace.
pub const OBJECT_NAME_PREFIX: &str = "kubectl-trace-";
/// Label carrying the trace name, present on the config map, job and pod template.
pub const TRACE_LABEL_KEY: &str = "fntlnz.wtf/kubectl-trace";
/// Label carrying the trace id, used for selector based lookups.
pub const TRACE_ID_LABEL_KEY: &str = "fntlnz.wtf/kubectl-trace-id";
/// Node label the job's affinity is pinned on.
pub const HOSTNAME_LABEL_KEY: &str = "kubernetes.io/hostname";
/// Config map key holding the program text.
pub const PROGRAM_KEY: &str = "program.bt";

/// One request to run a tracing program on a node.
///
/// A `TraceJob` is never mutated once its objects exist. Running the same
/// program again means building a new one with [`TraceJob::new`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceJob {
    pub id: TraceId,
    pub name: String,
    pub namespace: String,
    pub hostname: String,
    pub program: Program,
}

impl TraceJob {
    /// Build a trace with a freshly generated id.
    pub fn new(namespace: &str, hostname: &str, program: Program) -> Self {
        Self::with_id(Uuid::new_v4(), namespace, hostname, program)
    }

    pub fn with_id(id: TraceId, namespace: &str, hostname: &str, program: Program) -> Self {
        Self {
            id,
            name: object_name(id),
            namespace: namespace.into(),
            hostname: hostname.into(),
            program,
        }
    }

    /// Labels shared by every object belonging to this trace.
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (TRACE_LABEL_KEY.to_string(), self.name.clone()),
            (TRACE_ID_LABEL_KEY.to_string(), self.id.to_string()),
        ])
    }
}

/// Derive the remote object name for a trace id.
pub fn object_name(id: TraceId) -> String {
    format!("{}{}", OBJECT_NAME_PREFIX, id)
}

/// Selector matching every object of a single trace.
pub fn id_selector(id: TraceId) -> String {
    format!("{}={}", TRACE_ID_LABEL_KEY, id)
}

/// Selector matching every trace object in a namespace.
pub fn all_selector() -> String {
    TRACE_LABEL_KEY.to_string()
}
