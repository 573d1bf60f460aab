//! Chart installation through the helm CLI

use crate::{ApplyError, Result};
use stack_api::ChartInstallation;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

const DEFAULT_TIMEOUT: &str = "10m";

/// Runs `helm upgrade --install` with the chart's values piped on stdin
#[derive(Clone, Debug)]
pub struct HelmCli {
    binary: PathBuf,
    kube_context: Option<String>,
    timeout: String,
}

impl Default for HelmCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("helm"),
            kube_context: None,
            timeout: DEFAULT_TIMEOUT.to_string(),
        }
    }
}

impl HelmCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.kube_context = context;
        self
    }

    /// Command line for one release. Values are read from stdin (`--values -`).
    pub fn upgrade_args(&self, chart: &ChartInstallation) -> Vec<String> {
        let base: [&str; 10] = [
            "upgrade",
            "--install",
            &chart.release,
            &chart.chart,
            "--repo",
            &chart.repository,
            "--version",
            &chart.version,
            "--namespace",
            &chart.namespace,
        ];
        let mut args: Vec<String> = base.iter().map(|a| a.to_string()).collect();

        if chart.create_namespace {
            args.push("--create-namespace".to_string());
        }
        if let Some(context) = &self.kube_context {
            args.push("--kube-context".to_string());
            args.push(context.clone());
        }
        args.extend([
            "--wait".to_string(),
            "--timeout".to_string(),
            self.timeout.clone(),
            "--values".to_string(),
            "-".to_string(),
        ]);
        args
    }

    pub async fn upgrade_install(&self, chart: &ChartInstallation) -> Result<()> {
        let values = serde_yaml::to_string(&chart.values)?;
        let args = self.upgrade_args(chart);
        debug!("Running {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ApplyError::HelmUnavailable)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(values.as_bytes()).await.map_err(|e| ApplyError::Helm {
                release: chart.release.clone(),
                message: format!("failed to write values: {}", e),
            })?;
            // stdin is closed on drop so helm sees EOF
        }

        let output = child.wait_with_output().await.map_err(|e| ApplyError::Helm {
            release: chart.release.clone(),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure(&chart.release, stderr));
        }

        info!(
            release = %chart.release,
            namespace = %chart.namespace,
            version = %chart.version,
            "Chart installed"
        );
        Ok(())
    }
}

/// Credential failures reported by helm stop the whole deployment
fn classify_failure(release: &str, stderr: String) -> ApplyError {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("unauthorized") || lowered.contains("forbidden") {
        ApplyError::Unauthorized(format!("helm release {}: {}", release, stderr))
    } else {
        ApplyError::Helm {
            release: release.to_string(),
            message: stderr,
        }
    }
}
