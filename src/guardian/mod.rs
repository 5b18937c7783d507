//! Guardian - supervisor for a fixed set of companion daemons
//!
//! Handles:
//! - Service registration and start/stop lifecycle
//! - Start-timeout confirmation through a platform [`Launcher`]
//! - Bounded per-service log capture
//! - Live log fan-out to attached observers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  Guardian                     │
//! ├──────────────────────────────────────────────┤
//! │ registry │ runtime │ log buffers │ subscribers│  <- one Mutex
//! ├──────────────────────────────────────────────┤
//! │        Launcher (child | snapshot)            │
//! │   drain stdout/stderr  ·  exit waiter         │
//! ├──────────────────────────────────────────────┤
//! │          networkd   │   controld   │ ...      │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The lock is only held to read or update the maps. Spawning, the start
//! timeout, output draining and exit waiting all run outside it.

pub mod fanout;
pub mod launcher;
pub mod log_buffer;
pub mod status;


pub use fanout::{ChannelSink, LogSink, SinkClosed, Subscribers};
pub use launcher::{
    platform_launcher, LaunchRequest, Launcher, LauncherKind, ProcessEvents, ProcessHandle,
};
pub use log_buffer::LogBuffer;
pub use status::{RuntimeState, ServiceDefinition, ServiceStatus};

use crate::error::{AggregateError, BulkAction, GuardianError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// Service name selecting every registered service.
pub const ALL_SERVICES: &str = "all";

/// Delay callers may wait after a stop before reading status again.
pub const STOP_CONFIRMATION_DELAY: Duration = Duration::from_millis(200);

fn is_all(name: &str) -> bool {
    name.is_empty() || name == ALL_SERVICES
}

/// Environment a start attempt runs with.
///
/// A non-empty `requested` list is used verbatim. Otherwise the process-wide
/// defaults come first, followed by the service's own entries.
pub fn effective_environment(
    requested: Vec<String>,
    defaults: &[String],
    service: &[String],
) -> Vec<String> {
    if !requested.is_empty() {
        return requested;
    }
    defaults.iter().chain(service).cloned().collect()
}

#[derive(Default)]
struct State {
    spawn_timeout: Option<Duration>,
    default_environment: Vec<String>,
    registered: BTreeMap<String, ServiceDefinition>,
    runtime: HashMap<String, RuntimeState>,
    logs: HashMap<String, LogBuffer>,
    subscribers: HashMap<String, Subscribers>,
}

struct Shared {
    state: Mutex<State>,
    max_log_lines: usize,
    next_launch_id: AtomicU64,
}

impl Shared {
    async fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().await
    }

    async fn append(&self, service: &str, line: String) {
        let mut state = self.lock().await;
        if let Some(subscribers) = state.subscribers.get_mut(service) {
            let dropped = subscribers.broadcast(&line);
            if dropped > 0 {
                debug!(service = %service, dropped, "Dropped closed log clients");
            }
        }
        state
            .logs
            .entry(service.to_string())
            .or_insert_with(|| LogBuffer::new(self.max_log_lines))
            .push(line);
    }
}

#[async_trait]
impl ProcessEvents for Shared {
    async fn append_line(&self, service: &str, line: String) {
        self.append(service, line).await;
    }

    async fn process_exited(&self, service: &str, launch_id: u64) {
        let mut state = self.lock().await;
        let current = state
            .runtime
            .get(service)
            .and_then(RuntimeState::handle)
            .is_some_and(|handle| handle.launch_id == launch_id);
        if current {
            state.runtime.insert(service.to_string(), RuntimeState::Absent);
            debug!(service = %service, launch_id, "Service exited, cleared runtime state");
        }
    }
}

/// Concurrency-safe registry and lifecycle supervisor.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Guardian {
    shared: Arc<Shared>,
    launcher: Arc<dyn Launcher>,
}

impl Guardian {
    pub fn new(launcher: Arc<dyn Launcher>, max_log_lines: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                max_log_lines,
                next_launch_id: AtomicU64::new(1),
            }),
            launcher,
        }
    }

    pub fn with_platform_launcher(max_log_lines: usize) -> Self {
        Self::new(platform_launcher(), max_log_lines)
    }

    pub fn launcher_name(&self) -> &'static str {
        self.launcher.name()
    }

    /// Add (or replace) a service definition.
    ///
    /// A new service starts out absent. Re-registering a service that is
    /// starting or running only replaces its definition: the live process
    /// keeps its handle so it can still be stopped, and the replacement
    /// takes effect on the next start. Observers attached before
    /// registration stay attached.
    pub async fn register_service(
        &self,
        name: impl Into<String>,
        executable: impl Into<String>,
        environment: Vec<String>,
    ) {
        let name = name.into();
        let executable = executable.into();
        let mut state = self.shared.lock().await;

        debug!(
            service = %name,
            executable = %executable,
            environment_vars = %environment.join(", "),
            "Registered new service"
        );

        let runtime = state.runtime.entry(name.clone()).or_default();
        if !runtime.is_absent() {
            warn!(service = %name, "Re-registered a service that is not stopped, keeping its process");
        }
        state.subscribers.entry(name.clone()).or_default();
        state.registered.insert(
            name.clone(),
            ServiceDefinition {
                name,
                executable,
                environment,
            },
        );
    }

    pub async fn registered_services(&self) -> Vec<String> {
        self.shared.lock().await.registered.keys().cloned().collect()
    }

    pub async fn set_timeout(&self, timeout: Duration) {
        self.shared.lock().await.spawn_timeout = Some(timeout);
    }

    pub async fn spawn_timeout(&self) -> Option<Duration> {
        self.shared.lock().await.spawn_timeout
    }

    /// Replace the process-wide default environment.
    pub async fn set_default_environment(&self, environment: Vec<String>) {
        self.shared.lock().await.default_environment = environment;
    }

    pub async fn default_environment(&self) -> Vec<String> {
        self.shared.lock().await.default_environment.clone()
    }

    /// Start one service, or every registered service for `"all"` / `""`.
    ///
    /// Returns the status of the started service, or of every registered
    /// service on the bulk path. There every service is attempted and
    /// failures come back as one [`AggregateError`].
    ///
    /// Each attempt runs on its own task, so dropping the returned future
    /// leaves the launch running to completion and its process tracked.
    pub async fn start_service(
        &self,
        name: &str,
        env: Vec<String>,
    ) -> Result<BTreeMap<String, ServiceStatus>> {
        if is_all(name) {
            return self.start_all(env).await;
        }
        let status = self.start_one(name, env).await?;
        Ok(BTreeMap::from([(name.to_string(), status)]))
    }

    async fn start_all(&self, env: Vec<String>) -> Result<BTreeMap<String, ServiceStatus>> {
        let attempts: Vec<_> = self
            .registered_services()
            .await
            .into_iter()
            .map(|name| {
                let task = self.spawn_start(name.clone(), env.clone());
                (name, task)
            })
            .collect();

        let mut failures = AggregateError::new(BulkAction::Start);
        for (name, task) in attempts {
            if let Err(e) = self.settle_start(&name, task.await).await {
                failures.push(name, e);
            }
        }
        failures.into_result()?;
        Ok(self.get_services_status(ALL_SERVICES).await)
    }

    async fn start_one(&self, name: &str, env: Vec<String>) -> Result<ServiceStatus> {
        let joined = self.spawn_start(name.to_string(), env).await;
        self.settle_start(name, joined).await
    }

    fn spawn_start(&self, name: String, env: Vec<String>) -> JoinHandle<Result<ServiceStatus>> {
        let guardian = self.clone();
        tokio::spawn(async move { guardian.launch_and_store(&name, env).await })
    }

    /// Turn a start task that died into an error and release its reservation.
    async fn settle_start(
        &self,
        name: &str,
        joined: std::result::Result<Result<ServiceStatus>, JoinError>,
    ) -> Result<ServiceStatus> {
        let e = match joined {
            Ok(result) => return result,
            Err(e) => e,
        };

        let mut state = self.shared.lock().await;
        if matches!(state.runtime.get(name), Some(RuntimeState::Starting)) {
            state.runtime.insert(name.to_string(), RuntimeState::Absent);
        }
        error!(service = %name, error = %e, "Start task failed");
        Err(GuardianError::StartAborted {
            service: name.to_string(),
            reason: e.to_string(),
        })
    }

    async fn launch_and_store(&self, name: &str, env: Vec<String>) -> Result<ServiceStatus> {
        let request = {
            let mut state = self.shared.lock().await;

            let definition = state
                .registered
                .get(name)
                .cloned()
                .ok_or_else(|| GuardianError::UnregisteredService(name.to_string()))?;

            if state.runtime.get(name).is_some_and(|r| !r.is_absent()) {
                return Err(GuardianError::AlreadyRunning(name.to_string()));
            }

            let timeout = state
                .spawn_timeout
                .ok_or(GuardianError::TimeoutNotConfigured)?;

            let env = effective_environment(
                env,
                &state.default_environment,
                &definition.environment,
            );
            state.runtime.insert(name.to_string(), RuntimeState::Starting);

            LaunchRequest {
                service: name.to_string(),
                executable: definition.executable,
                env,
                timeout,
                launch_id: self.shared.next_launch_id.fetch_add(1, Ordering::SeqCst),
            }
        };

        debug!(
            service = %name,
            executable = %request.executable,
            environment_vars = %request.env.join(", "),
            timeout = ?request.timeout,
            launcher = self.launcher.name(),
            "Starting service"
        );

        let events: Arc<dyn ProcessEvents> = self.shared.clone();
        let launched = self.launcher.launch(request, events).await;

        let mut state = self.shared.lock().await;
        match launched {
            Ok(handle) if handle.has_exited() => {
                state.runtime.insert(name.to_string(), RuntimeState::Absent);
                Err(GuardianError::ProcessExitedEarly(name.to_string()))
            }
            Ok(handle) => {
                info!(service = %name, pid = handle.pid, "Started service");
                let running = RuntimeState::Running(handle);
                let status = ServiceStatus::from_state(Some(&running));
                state.runtime.insert(name.to_string(), running);
                Ok(status)
            }
            Err(e) => {
                state.runtime.insert(name.to_string(), RuntimeState::Absent);
                warn!(service = %name, error = %e, "Failed to start service");
                Err(e)
            }
        }
    }

    /// Stop one service, or every registered service for `"all"` / `""`.
    pub async fn stop_service(&self, name: &str) -> Result<()> {
        if !is_all(name) {
            return self.stop_one(name).await;
        }

        let mut failures = AggregateError::new(BulkAction::Stop);
        for name in self.registered_services().await {
            if let Err(e) = self.stop_one(&name).await {
                failures.push(name, e);
            }
        }
        let result = failures.into_result();
        if let Err(e) = &result {
            warn!(error = %e, "Error stopping one or more services");
        }
        result
    }

    /// Stop every service that currently has a live process.
    pub async fn stop_running(&self) -> Result<()> {
        let running: Vec<String> = {
            let state = self.shared.lock().await;
            state
                .runtime
                .iter()
                .filter(|(_, r)| r.handle().is_some())
                .map(|(name, _)| name.clone())
                .collect()
        };

        let mut failures = AggregateError::new(BulkAction::Stop);
        for name in running {
            match self.stop_one(&name).await {
                Ok(()) | Err(GuardianError::NotRunning(_)) => {}
                Err(e) => failures.push(name, e),
            }
        }
        failures.into_result()
    }

    async fn stop_one(&self, name: &str) -> Result<()> {
        let handle = {
            let state = self.shared.lock().await;
            if !state.registered.contains_key(name) {
                return Err(GuardianError::UnregisteredService(name.to_string()));
            }
            state
                .runtime
                .get(name)
                .and_then(RuntimeState::handle)
                .cloned()
                .ok_or_else(|| GuardianError::NotRunning(name.to_string()))?
        };

        handle.request_kill();
        if let Err(e) = self.launcher.kill(name, &handle).await {
            handle.cancel_kill();
            warn!(
                service = %name,
                executable = %handle.executable,
                environment_vars = %handle.env.join(", "),
                error = %e,
                "Couldn't kill service"
            );
            return Err(e);
        }

        let mut state = self.shared.lock().await;
        let current = state
            .runtime
            .get(name)
            .and_then(RuntimeState::handle)
            .is_some_and(|h| h.launch_id == handle.launch_id);
        if current {
            state.runtime.insert(name.to_string(), RuntimeState::Absent);
        }
        info!(service = %name, pid = handle.pid, "Stopped service");
        Ok(())
    }

    /// Snapshot of one service, or of all registered services for `"all"` / `""`.
    pub async fn get_services_status(&self, name: &str) -> BTreeMap<String, ServiceStatus> {
        let state = self.shared.lock().await;
        if is_all(name) {
            return state
                .registered
                .keys()
                .map(|service| {
                    (
                        service.clone(),
                        ServiceStatus::from_state(state.runtime.get(service)),
                    )
                })
                .collect();
        }

        let mut statuses = BTreeMap::new();
        statuses.insert(
            name.to_string(),
            ServiceStatus::from_state(state.runtime.get(name)),
        );
        statuses
    }

    /// Buffer `line` for `service` and push it to the attached observers.
    pub async fn append_to_log(&self, service: &str, line: impl Into<String>) {
        self.shared.append(service, line.into()).await;
    }

    /// Attach a live observer. Unknown services are accepted.
    pub async fn add_log_client(&self, service: &str, sink: Box<dyn LogSink>) {
        let mut state = self.shared.lock().await;
        let subscribers = state.subscribers.entry(service.to_string()).or_default();
        subscribers.attach(sink);
        debug!(service = %service, clients = subscribers.len(), "Added log client");
    }

    /// Attach a channel-backed observer and return its receiving end.
    pub async fn subscribe(&self, service: &str) -> mpsc::UnboundedReceiver<String> {
        let (sink, rx) = ChannelSink::pair();
        self.add_log_client(service, Box::new(sink)).await;
        rx
    }

    /// Buffered lines of one service, oldest first.
    pub async fn log_lines(&self, service: &str) -> Vec<String> {
        let state = self.shared.lock().await;
        state
            .logs
            .get(service)
            .map(LogBuffer::lines)
            .unwrap_or_default()
    }

    /// Last `n` buffered lines of one service.
    pub async fn log_tail(&self, service: &str, n: usize) -> Vec<String> {
        let state = self.shared.lock().await;
        state
            .logs
            .get(service)
            .map(|buffer| buffer.tail(n))
            .unwrap_or_default()
    }

    /// Buffered lines of every service that has logged.
    pub async fn all_logs(&self) -> BTreeMap<String, Vec<String>> {
        let state = self.shared.lock().await;
        state
            .logs
            .iter()
            .map(|(name, buffer)| (name.clone(), buffer.lines()))
            .collect()
    }
}
