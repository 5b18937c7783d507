use super::{env_pairs, report_exit, spawn_output_readers, LaunchRequest, Launcher, ProcessEvents, ProcessHandle};
use crate::error::{GuardianError, Result};
use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, Process, ProcessStatus, ProcessesToUpdate, System};
use tokio::process::Command;
use tracing::{debug, info, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Runs the executable through a shell wrapper and tracks the real process
/// by scanning the process table for its image name.
///
/// The wrapper inherits the guardian's environment with the requested
/// entries layered on top.
#[derive(Debug, Clone)]
pub struct SnapshotLauncher {
    poll_interval: Duration,
}

impl SnapshotLauncher {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl Default for SnapshotLauncher {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

fn wrapper_command(executable: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd.exe");
        cmd.arg("/C").arg(executable);
        cmd
    }

    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("\"$0\"").arg(executable);
        cmd
    }
}

/// Image name the process table reports for `executable`.
pub fn image_name(executable: &str) -> OsString {
    let path = Path::new(executable);
    #[allow(unused_mut)]
    let mut image = path
        .file_name()
        .map(OsStr::to_os_string)
        .unwrap_or_else(|| OsString::from(executable));

    #[cfg(windows)]
    {
        if Path::new(&image).extension().is_none() {
            image.push(".exe");
        }
    }

    image
}

fn matches_image(process: &Process, image: &OsStr) -> bool {
    if process.name() == image {
        return true;
    }
    process
        .exe()
        .and_then(Path::file_name)
        .is_some_and(|name| name == image)
}

fn newest_match<'a>(system: &'a System, image: &OsStr) -> Option<&'a Process> {
    let own_pid = std::process::id();
    system
        .processes()
        .values()
        .filter(|p| p.pid().as_u32() != own_pid)
        .filter(|p| p.status() != ProcessStatus::Zombie)
        .filter(|p| matches_image(p, image))
        .max_by_key(|p| p.start_time())
}

/// Find the most recently started live process whose image is `image`.
pub fn find_process(image: &OsStr) -> Option<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    newest_match(&system, image).map(|p| p.pid().as_u32())
}

/// Whether `pid` is still present in the process table.
pub fn is_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .is_some_and(|p| p.status() != ProcessStatus::Zombie)
}

#[derive(Debug, PartialEq, Eq)]
enum KillOutcome {
    Killed(u32),
    NotFound,
    Refused(u32),
}

fn kill_by_image(image: &OsStr) -> KillOutcome {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    match newest_match(&system, image) {
        Some(process) if process.kill() => KillOutcome::Killed(process.pid().as_u32()),
        Some(process) => KillOutcome::Refused(process.pid().as_u32()),
        None => KillOutcome::NotFound,
    }
}

#[async_trait]
impl Launcher for SnapshotLauncher {
    fn name(&self) -> &'static str {
        "snapshot"
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

        info!(service = %service, executable = %executable, "Starting service");

        let mut cmd = wrapper_command(&executable);
        cmd.envs(env_pairs(&env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut wrapper = match cmd.spawn() {
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
        spawn_output_readers(&service, &mut wrapper, &events);

        tokio::time::sleep(timeout).await;

        let image = image_name(&executable);
        let lookup = image.clone();
        let found = tokio::task::spawn_blocking(move || find_process(&lookup))
            .await
            .ok()
            .flatten();

        let Some(pid) = found else {
            if let Err(e) = wrapper.start_kill() {
                debug!(service = %service, error = %e, "Wrapper already gone");
            }
            reap_wrapper(service.clone(), wrapper);
            return Err(GuardianError::SpawnTimedOut(service));
        };
        debug!(service = %service, pid, image = ?image, "Located service process");
        reap_wrapper(service.clone(), wrapper);

        let handle = ProcessHandle::new(launch_id, pid, executable, env);
        {
            let handle = handle.clone();
            let poll_interval = self.poll_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(poll_interval);
                loop {
                    interval.tick().await;
                    let alive = tokio::task::spawn_blocking(move || is_alive(pid))
                        .await
                        .unwrap_or(false);
                    if !alive {
                        break;
                    }
                }
                report_exit(&service, &handle, "process no longer running", &events).await;
            });
        }

        Ok(handle)
    }

    async fn kill(&self, service: &str, handle: &ProcessHandle) -> Result<()> {
        let image = image_name(&handle.executable);
        let outcome = tokio::task::spawn_blocking(move || kill_by_image(&image))
            .await
            .map_err(|e| GuardianError::KillFailed {
                service: service.to_string(),
                reason: e.to_string(),
            })?;

        match outcome {
            KillOutcome::Killed(pid) => {
                info!(service = %service, pid, "Stopping service");
                Ok(())
            }
            KillOutcome::NotFound => {
                debug!(service = %service, "Process not found, treating as stopped");
                Ok(())
            }
            KillOutcome::Refused(pid) => Err(GuardianError::KillFailed {
                service: service.to_string(),
                reason: format!("terminate request for pid {pid} was refused"),
            }),
        }
    }
}

fn reap_wrapper(service: String, mut wrapper: tokio::process::Child) {
    tokio::spawn(async move {
        match wrapper.wait().await {
            Ok(status) => debug!(service = %service, %status, "Shell wrapper exited"),
            Err(e) => warn!(service = %service, error = %e, "Failed to wait on shell wrapper"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_name_uses_file_name() {
        let image = image_name("/opt/guardian/bin/edged");
        #[cfg(not(windows))]
        assert_eq!(image, OsString::from("edged"));
        #[cfg(windows)]
        assert_eq!(image, OsString::from("edged.exe"));
    }

    #[test]
    fn unknown_image_is_not_found() {
        let image = OsString::from("guardian-no-such-image-7f3a");
        assert!(find_process(&image).is_none());
        assert_eq!(kill_by_image(&image), KillOutcome::NotFound);
    }

    #[test]
    fn own_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }
}
