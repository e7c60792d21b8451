use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Version Error: {0}")]
    Version(#[from] VersionError),

    #[error("Dispatch Error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Discovery Error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Configuration Error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Cluster description error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Malformed api version {0:?}. Should be <major>.<minor>")]
    MalformedVersion(String),
}

/// Why a [`Context`](crate::scheduler::Context) is done.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no node matches the dispatch predicate")]
    NoMatchingNodes,

    #[error("dispatch canceled while waiting for nodes")]
    Canceled,

    #[error("deadline exceeded while waiting for nodes")]
    DeadlineExceeded,

    /// The job ran and failed; `source` is exactly what it returned.
    #[error("job failed on node {node}: {source}")]
    Job {
        node: String,
        #[source]
        source: anyhow::Error,
    },
}

impl DispatchError {
    /// True for the two ways a context can end a wait.
    pub fn is_context_error(&self) -> bool {
        matches!(self, DispatchError::Canceled | DispatchError::DeadlineExceeded)
    }

    /// Unwrap the job's own error, if that is what this is.
    pub fn into_job_error(self) -> Option<anyhow::Error> {
        match self {
            DispatchError::Job { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ContextError> for DispatchError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Canceled => DispatchError::Canceled,
            ContextError::DeadlineExceeded => DispatchError::DeadlineExceeded,
        }
    }
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Unexpected daemon payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid daemon version: {0}")]
    Version(#[from] VersionError),

    #[error("Daemon did not report {0}")]
    MissingField(&'static str),
}

// Result type alias for convenience
pub type FleetResult<T> = Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_errors_map_onto_dispatch_errors() {
        assert!(matches!(
            DispatchError::from(ContextError::Canceled),
            DispatchError::Canceled
        ));
        assert!(matches!(
            DispatchError::from(ContextError::DeadlineExceeded),
            DispatchError::DeadlineExceeded
        ));
        assert!(DispatchError::Canceled.is_context_error());
        assert!(!DispatchError::NoMatchingNodes.is_context_error());
    }

    #[test]
    fn job_error_keeps_its_source() {
        let err = DispatchError::Job {
            node: "n1".into(),
            source: anyhow::anyhow!("exit status 3"),
        };
        assert_eq!(err.to_string(), "job failed on node n1: exit status 3");
        assert_eq!(err.into_job_error().unwrap().to_string(), "exit status 3");
    }
}
