use super::launcher::ProcessHandle;
use serde::{Deserialize, Serialize};

/// Immutable registration record for one managed daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub executable: String,
    /// `KEY=VALUE` entries, in order.
    pub environment: Vec<String>,
}

/// Runtime state of a registered service.
#[derive(Debug, Clone, Default)]
pub enum RuntimeState {
    #[default]
    Absent,
    /// A start attempt holds the reservation; the launcher is waiting out the timeout.
    Starting,
    Running(ProcessHandle),
}

impl RuntimeState {
    pub fn handle(&self) -> Option<&ProcessHandle> {
        match self {
            RuntimeState::Running(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, RuntimeState::Absent)
    }
}

/// Point-in-time copy of a service's status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub pid: Option<u32>,
    #[serde(rename = "environment_vars")]
    pub env: Vec<String>,
    #[serde(rename = "executable_location")]
    pub location: Option<String>,
}

impl ServiceStatus {
    pub fn from_state(state: Option<&RuntimeState>) -> Self {
        match state.and_then(RuntimeState::handle) {
            Some(handle) => Self {
                running: true,
                pid: Some(handle.pid),
                env: handle.env.clone(),
                location: Some(handle.executable.clone()),
            },
            None => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_starting_report_not_running() {
        assert_eq!(ServiceStatus::from_state(None), ServiceStatus::default());
        let starting = ServiceStatus::from_state(Some(&RuntimeState::Starting));
        assert!(!starting.running);
        assert!(starting.pid.is_none());
    }

    #[test]
    fn running_snapshot_copies_handle() {
        let handle = ProcessHandle::new(7, 1234, "/opt/edged", vec!["A=1".into()]);
        let status = ServiceStatus::from_state(Some(&RuntimeState::Running(handle)));
        assert!(status.running);
        assert_eq!(status.pid, Some(1234));
        assert_eq!(status.env, vec!["A=1"]);
        assert_eq!(status.location.as_deref(), Some("/opt/edged"));
    }

    #[test]
    fn serializes_with_wire_names() {
        let json = serde_json::to_value(ServiceStatus::default()).unwrap();
        assert_eq!(json["running"], false);
        assert!(json.get("environment_vars").is_some());
        assert!(json.get("executable_location").is_some());
    }
}
