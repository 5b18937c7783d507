use anyhow::Result;
use guardian::guardian::STOP_CONFIRMATION_DELAY;
use guardian::{Guardian, GuardianConfig, GuardianError, ALL_SERVICES};
use std::time::Duration;
use tracing::{error, info};

const DEFAULT_SPAWN_TIMEOUT: Duration = Duration::from_secs(5);
const FAILURE_LOG_TAIL: usize = 10;

pub(crate) async fn cmd_run(
    config: GuardianConfig,
    services: Vec<String>,
    timeout_secs: Option<u64>,
    follow: bool,
) -> Result<()> {
    let guardian = Guardian::new(config.launcher_kind().build(), config.max_log_lines);
    guardian
        .set_default_environment(config.default_environment())
        .await;
    for (name, service) in &config.services {
        guardian
            .register_service(name, &service.executable, service.environment.clone())
            .await;
    }

    let timeout = timeout_secs
        .map(Duration::from_secs)
        .or_else(|| config.spawn_timeout())
        .unwrap_or(DEFAULT_SPAWN_TIMEOUT);
    guardian.set_timeout(timeout).await;

    let targets = if services.is_empty() {
        guardian.registered_services().await
    } else {
        services.clone()
    };

    if follow {
        for name in &targets {
            let mut lines = guardian.subscribe(name).await;
            let name = name.clone();
            tokio::spawn(async move {
                while let Some(line) = lines.recv().await {
                    println!("[{name}] {line}");
                }
            });
        }
    }

    info!(
        launcher = guardian.launcher_name(),
        timeout = ?timeout,
        services = %targets.join(", "),
        "Guardian starting services"
    );

    if services.is_empty() {
        if let Err(e) = guardian.start_service(ALL_SERVICES, Vec::new()).await {
            report_start_failure(&guardian, ALL_SERVICES, &e).await;
        }
    } else {
        for name in &services {
            if let Err(e) = guardian.start_service(name, Vec::new()).await {
                report_start_failure(&guardian, name, &e).await;
            }
        }
    }

    print_status(&guardian).await;

    wait_for_shutdown().await?;

    info!("Stopping all services...");
    if let Err(e) = guardian.stop_running().await {
        error!(error = %e, "Failed to stop every service");
    }
    tokio::time::sleep(STOP_CONFIRMATION_DELAY).await;
    print_status(&guardian).await;

    info!("Guardian stopped");
    Ok(())
}

async fn report_start_failure(guardian: &Guardian, service: &str, err: &GuardianError) {
    let failures: Vec<(&str, &GuardianError)> = match err {
        GuardianError::Aggregate(agg) => agg
            .failures()
            .iter()
            .map(|(name, e)| (name.as_str(), e))
            .collect(),
        other => vec![(service, other)],
    };

    for (name, e) in failures {
        error!(service = %name, kind = e.kind(), error = %e, "Failed to start service");
        for line in guardian.log_tail(name, FAILURE_LOG_TAIL).await {
            eprintln!("  [{name}] {line}");
        }
    }
}

async fn print_status(guardian: &Guardian) {
    for (name, status) in guardian.get_services_status(ALL_SERVICES).await {
        match status.pid {
            Some(pid) if status.running => println!("{name:<12} running  pid {pid}"),
            _ => println!("{name:<12} stopped"),
        }
    }
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
