//! Subcommand implementations.
//!
//! Each command writes its human-facing output to the given writer so it
//! can be captured in tests; diagnostics go through `tracing`.

use std::future::Future;
use std::io::Write;
use std::path::Path;

use tracing::info;
use warden_monitor::{Daemon, DaemonStats, EvaluationMode, SAMPLE_CONFIG, WardenConfig};

use crate::error::{CliError, Result};

/// Loads and validates a config file, then prints what it defines.
pub fn check_config(path: &Path, out: &mut impl Write) -> Result<WardenConfig> {
    let config = WardenConfig::from_file(path)?;
    config.validate()?;

    writeln!(
        out,
        "{}: ok ({} monitors, {} channels, {} routes)",
        path.display(),
        config.monitors.len(),
        config.dispatch.channels.len(),
        config.dispatch.routes.len()
    )?;
    for monitor in &config.monitors {
        let definition = monitor.definition()?;
        let thresholds: Vec<String> = definition
            .tiers
            .iter()
            .map(|t| format!("{}>={}", t.severity, t.threshold))
            .collect();
        let window = match definition.evaluation {
            EvaluationMode::Count => format!(" window={}s", definition.window.as_secs()),
            EvaluationMode::Value => String::new(),
        };
        writeln!(
            out,
            "  {} [{}] tiers={}{} cooldown={}s interval={}s{}",
            definition.id,
            definition.kind,
            thresholds.join(","),
            window,
            definition.cooldown.as_secs(),
            definition.interval.as_secs(),
            if definition.enabled { "" } else { " (disabled)" }
        )?;
    }
    Ok(config)
}

/// Writes the sample config to `output`.
pub fn init_config(output: &Path, force: bool, out: &mut impl Write) -> Result<()> {
    if output.exists() && !force {
        return Err(CliError::OutputExists(output.to_path_buf()));
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| CliError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(output, SAMPLE_CONFIG).map_err(|source| CliError::Io {
        path: output.to_path_buf(),
        source,
    })?;

    writeln!(out, "Config written to {}", output.display())?;
    writeln!(out)?;
    writeln!(out, "Edit the monitors and channels, then run:")?;
    writeln!(out, "  wardend check-config --config {}", output.display())?;
    writeln!(out, "  wardend run --config {}", output.display())?;
    Ok(())
}

/// Runs `cycles` evaluation cycles without delivering alerts or touching
/// the state directory. Each alert is printed as one JSON line.
///
/// Returns the number of alerts that would have been sent.
pub async fn dry_run(path: &Path, cycles: u32, out: &mut impl Write) -> Result<usize> {
    let config = WardenConfig::from_file(path)?;
    let daemon = Daemon::from_config(&config, true)?;
    info!(monitors = daemon.registry().len(), cycles, "starting dry run");

    let mut total = 0;
    for cycle in 1..=cycles {
        let report = daemon.run_once().await;
        info!(
            cycle,
            monitors = report.monitors_run,
            failed = report.monitors_failed,
            events = report.events,
            alerts = report.alerts.len(),
            suppressed = report.suppressed,
            "dry-run cycle finished"
        );
        for alert in &report.alerts {
            writeln!(out, "{}", serde_json::to_string(alert)?)?;
        }
        total += report.alerts.len();
    }
    Ok(total)
}

/// Runs the daemon until `shutdown` resolves, then waits for it to persist
/// and stop.
pub async fn run<F>(path: &Path, shutdown: F) -> Result<DaemonStats>
where
    F: Future<Output = ()>,
{
    let config = WardenConfig::from_file(path)?;
    let daemon = Daemon::from_config(&config, false)?;
    info!(
        config = %path.display(),
        state_dir = %config.state_dir.display(),
        monitors = daemon.registry().len(),
        "starting wardend"
    );

    let running = daemon.run();
    tokio::pin!(running);
    tokio::pin!(shutdown);

    tokio::select! {
        result = &mut running => result?,
        () = &mut shutdown => {
            info!("shutdown requested");
            daemon.stop();
            running.await?;
        }
    }

    Ok(daemon.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const STATIC_CONFIG: &str = r#"
        [[monitors]]
        id = "daily_cost"
        kind = "cost_budget"
        tiers = [
            { threshold = 3.0, severity = "warning" },
            { threshold = 5.0, severity = "critical" },
        ]

        [monitors.source]
        type = "static"
        records = [{ key = "daily", value = 4.0 }]

        [[monitors]]
        id = "fw"
        kind = "firewall_blocks"
        enabled = false
        tiers = [{ threshold = 50, severity = "warning" }]

        [monitors.source]
        type = "static"
    "#;

    fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("warden.toml");
        let state = dir.join("state");
        let content = format!("state_dir = \"{}\"\n{body}", state.display());
        std::fs::write(&path, content).unwrap();
        path
    }

    mod check_config_tests {
        use super::*;

        #[test]
        fn lists_monitors() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_config(dir.path(), STATIC_CONFIG);
            let mut out = Vec::new();

            let config = check_config(&path, &mut out).unwrap();
            let text = String::from_utf8(out).unwrap();

            assert_eq!(config.monitors.len(), 2);
            assert!(text.contains("ok (2 monitors"));
            assert!(text.contains("daily_cost [cost_budget] tiers=warning>=3,critical>=5"));
            assert!(text.contains("fw [firewall_blocks]"));
            assert!(text.contains("(disabled)"));
        }

        #[test]
        fn rejects_invalid_tiers() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_config(
                dir.path(),
                r#"
                [[monitors]]
                id = "ssh"
                kind = "ssh_failures"
                tiers = [
                    { threshold = 10, severity = "warning" },
                    { threshold = 5, severity = "critical" },
                ]
                [monitors.source]
                type = "static"
                "#,
            );
            let err = check_config(&path, &mut Vec::new()).unwrap_err();
            assert!(matches!(err, CliError::Config(_)));
        }

        #[test]
        fn missing_file_is_config_error() {
            let dir = tempfile::tempdir().unwrap();
            let err = check_config(&dir.path().join("nope.toml"), &mut Vec::new()).unwrap_err();
            assert!(matches!(err, CliError::Config(_)));
        }
    }

    mod init_config_tests {
        use super::*;

        #[test]
        fn writes_sample_that_validates() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("etc").join("warden.toml");
            let mut out = Vec::new();

            init_config(&path, false, &mut out).unwrap();

            assert_eq!(std::fs::read_to_string(&path).unwrap(), SAMPLE_CONFIG);
            assert!(check_config(&path, &mut Vec::new()).is_ok());
            assert!(String::from_utf8(out).unwrap().contains("wardend run --config"));
        }

        #[test]
        fn refuses_to_overwrite_without_force() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("warden.toml");
            std::fs::write(&path, "# mine").unwrap();

            let err = init_config(&path, false, &mut Vec::new()).unwrap_err();
            assert!(matches!(err, CliError::OutputExists(_)));
            assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine");

            init_config(&path, true, &mut Vec::new()).unwrap();
            assert_eq!(std::fs::read_to_string(&path).unwrap(), SAMPLE_CONFIG);
        }
    }

    mod dry_run_tests {
        use super::*;

        #[tokio::test]
        async fn prints_alerts_and_writes_no_state() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_config(dir.path(), STATIC_CONFIG);
            let mut out = Vec::new();

            let alerts = dry_run(&path, 2, &mut out).await.unwrap();

            assert_eq!(alerts, 1);
            let text = String::from_utf8(out).unwrap();
            let line = text.lines().next().unwrap();
            let json: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(json["monitor_id"], "daily_cost");
            assert_eq!(json["severity"], "warning");
            assert!(!dir.path().join("state").exists());
        }
    }

    mod run_tests {
        use super::*;

        #[tokio::test]
        async fn runs_until_shutdown_and_persists() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_config(dir.path(), STATIC_CONFIG);

            let stats = run(&path, tokio::time::sleep(Duration::from_millis(200)))
                .await
                .unwrap();

            assert!(stats.cycles_run >= 1);
            assert_eq!(stats.alerts_sent, 1);
            assert!(stats.persists_ok >= 1);
            assert!(dir.path().join("state").join("engine-state.json").exists());
        }
    }
}
