use super::{env_pairs, report_exit, spawn_output_readers, LaunchRequest, Launcher, ProcessEvents, ProcessHandle};
use crate::error::{GuardianError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Spawns the service executable as a direct child of the guardian.
///
/// The child gets exactly the requested environment, nothing inherited.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChildLauncher;

impl ChildLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Launcher for ChildLauncher {
    fn name(&self) -> &'static str {
        "child"
    }

    async fn launch(
        &self,
        request: LaunchRequest,
        events: Arc<dyn ProcessEvents>,
    ) -> Result<ProcessHandle> {
        let LaunchRequest {
            service,
            executable,
            env,
            timeout,
            launch_id,
        } = request;

        let mut cmd = Command::new(&executable);
        cmd.env_clear()
            .envs(env_pairs(&env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    service = %service,
                    executable = %executable,
                    environment_vars = %env.join(", "),
                    error = %e,
                    "Couldn't spawn process"
                );
                return Err(GuardianError::SpawnFailed { service, source: e });
            }
        };

        let Some(pid) = child.id() else {
            return Err(GuardianError::ProcessExitedEarly(service));
        };
        debug!(service = %service, pid, "Spawned child process");

        spawn_output_readers(&service, &mut child, &events);

        let handle = ProcessHandle::new(launch_id, pid, executable, env);
        let (exited_tx, exited_rx) = oneshot::channel::<()>();
        {
            let handle = handle.clone();
            let service = service.clone();
            tokio::spawn(async move {
                let outcome = match child.wait().await {
                    Ok(status) => status.to_string(),
                    Err(e) => format!("wait failed: {e}"),
                };
                report_exit(&service, &handle, &outcome, &events).await;
                let _ = exited_tx.send(());
            });
        }

        tokio::select! {
            _ = tokio::time::sleep(timeout) => {}
            _ = exited_rx => {}
        }

        if handle.has_exited() {
            return Err(GuardianError::ProcessExitedEarly(service));
        }
        Ok(handle)
    }

    async fn kill(&self, service: &str, handle: &ProcessHandle) -> Result<()> {
        let pid = libc::pid_t::try_from(handle.pid).map_err(|_| GuardianError::KillFailed {
            service: service.to_string(),
            reason: format!("pid {} out of range", handle.pid),
        })?;

        let rc = unsafe { libc::kill(pid, libc::SIGKILL) };
        if rc == 0 {
            debug!(service = %service, pid, "Sent SIGKILL");
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            debug!(service = %service, pid, "Process already gone");
            return Ok(());
        }
        Err(GuardianError::KillFailed {
            service: service.to_string(),
            reason: format!("could not kill unix process: {err}"),
        })
    }
}
