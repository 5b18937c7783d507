use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardianError {
    #[error("attempted to use unregistered service '{0}'")]
    UnregisteredService(String),

    #[error("can't start {0} because it's already running")]
    AlreadyRunning(String),

    #[error("service {0} is not running so can not stop")]
    NotRunning(String),

    #[error("spawn timeout not set, please set it before a process is spawned")]
    TimeoutNotConfigured,

    #[error("error starting process {service}: {source}")]
    SpawnFailed {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not find process {0} or it failed to start before timeout, check the logs for errors")]
    SpawnTimedOut(String),

    #[error("process {0} already exited, check the logs for errors")]
    ProcessExitedEarly(String),

    #[error("start of {service} was aborted: {reason}")]
    StartAborted { service: String, reason: String },

    #[error("couldn't kill service {service}, error was: {reason}")]
    KillFailed { service: String, reason: String },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl GuardianError {
    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnregisteredService(_) => "unregistered-service",
            Self::AlreadyRunning(_) => "already-running",
            Self::NotRunning(_) => "not-running",
            Self::TimeoutNotConfigured => "timeout-not-configured",
            Self::SpawnFailed { .. } => "spawn-failed",
            Self::SpawnTimedOut(_) => "spawn-timed-out",
            Self::ProcessExitedEarly(_) => "process-exited-early",
            Self::StartAborted { .. } => "start-aborted",
            Self::KillFailed { .. } => "kill-failed",
            Self::Aggregate(_) => "aggregate",
        }
    }
}

/// Which bulk operation produced an [`AggregateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Start,
    Stop,
}

impl BulkAction {
    fn verb(self) -> &'static str {
        match self {
            BulkAction::Start => "starting",
            BulkAction::Stop => "stopping",
        }
    }
}

/// One failure per failing service of an "all" operation.
#[derive(Debug)]
pub struct AggregateError {
    action: BulkAction,
    failures: Vec<(String, GuardianError)>,
}

impl AggregateError {
    pub fn new(action: BulkAction) -> Self {
        Self {
            action,
            failures: Vec::new(),
        }
    }

    pub fn push(&mut self, service: impl Into<String>, error: GuardianError) {
        self.failures.push((service.into(), error));
    }

    pub fn failures(&self) -> &[(String, GuardianError)] {
        &self.failures
    }

    pub fn failed_services(&self) -> Vec<&str> {
        self.failures.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// `Ok(())` when nothing failed, otherwise the aggregate as an error.
    pub fn into_result(mut self) -> Result<()> {
        if self.failures.is_empty() {
            return Ok(());
        }
        self.failures.sort_by(|a, b| a.0.cmp(&b.0));
        Err(GuardianError::Aggregate(self))
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.failures.len() == 1 { "error" } else { "errors" };
        write!(f, "{} {} occurred:", self.failures.len(), noun)?;
        for (service, error) in &self.failures {
            write!(
                f,
                "\n\t* error {} service {}: {}",
                self.action.verb(),
                service,
                error
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

pub type Result<T> = std::result::Result<T, GuardianError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_aggregate_is_ok() {
        assert!(AggregateError::new(BulkAction::Start).into_result().is_ok());
    }

    #[test]
    fn aggregate_names_each_service_and_cause() {
        let mut agg = AggregateError::new(BulkAction::Stop);
        agg.push("networkd", GuardianError::NotRunning("networkd".into()));
        agg.push("controld", GuardianError::UnregisteredService("controld".into()));

        let err = agg.into_result().unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("2 errors occurred:"));
        assert!(text.contains("error stopping service networkd: service networkd is not running"));
        assert!(text.contains("error stopping service controld: attempted to use unregistered"));

        let GuardianError::Aggregate(agg) = err else {
            panic!("expected aggregate error");
        };
        assert_eq!(agg.failed_services(), vec!["controld", "networkd"]);
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(GuardianError::TimeoutNotConfigured.kind(), "timeout-not-configured");
        assert_eq!(
            GuardianError::KillFailed {
                service: "x".into(),
                reason: "y".into()
            }
            .kind(),
            "kill-failed"
        );
    }
}
