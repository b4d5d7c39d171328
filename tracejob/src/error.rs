use crate::control_plane::{ControlPlaneError, ObjectKind};
use std::{fmt, io, result};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("the bpftrace program cannot be empty")]
    EmptyProgram,
    #[error("a target hostname is required")]
    MissingTarget,
    #[error("trace belongs to namespace {found}, this client manages {expected}")]
    NamespaceMismatch { expected: String, found: String },
    #[error("failed to create config map {name}: {source}")]
    ConfigMapCreate {
        name: String,
        #[source]
        source: ControlPlaneError,
    },
    /// The config map exists but the job does not; `delete` reclaims it.
    #[error("config map {name} was created but its job was not, delete the trace to clean up: {source}")]
    JobCreate {
        name: String,
        #[source]
        source: ControlPlaneError,
    },
    #[error("trace {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Delete(#[from] DeleteErrors),
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
    #[error("failed to write trace output: {0}")]
    Sink(#[source] io::Error),
}

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug)]
pub struct DeleteFailure {
    pub kind: ObjectKind,
    pub name: String,
    pub source: ControlPlaneError,
}

/// Every deletion that failed during one `delete_jobs` call.
#[derive(Debug, Default)]
pub struct DeleteErrors {
    pub failures: Vec<DeleteFailure>,
}

impl DeleteErrors {
    pub fn push(&mut self, kind: ObjectKind, name: &str, source: ControlPlaneError) {
        self.failures.push(DeleteFailure {
            kind,
            name: name.into(),
            source,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Delete(self))
        }
    }
}

impl fmt::Display for DeleteErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} deletion(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {} {}: {}", failure.kind, failure.name, failure.source)?;
        }
        Ok(())
    }
}

impl std::error::Error for DeleteErrors {}
