use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DeviceType, PageConfig, RawReport};
use crate::config::{LightkeeperConfig, ARTIFACT_PREFIX, CHROME_FLAGS};
use crate::process::runner::{CommandSpec, ProcessRunner, RunError};

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("unsupported device '{0}'")]
    UnsupportedDevice(String),

    #[error("failed to start audit tool: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("audit tool exited with {}: {stderr}", exit_label(.exit_code))]
    ProcessFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("audit tool timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("audit report missing at {}: {source}", .path.display())]
    ArtifactMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audit report is malformed: {0}")]
    MalformedOutput(String),
}

fn exit_label(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("code {}", code),
        None => "no exit code (killed by signal)".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct InvokerSettings {
    pub binary: String,
    pub artifact_dir: PathBuf,
    pub timeout: Duration,
}

impl InvokerSettings {
    pub fn from_config(config: &LightkeeperConfig) -> Self {
        Self {
            binary: config.lighthouse_bin.clone(),
            artifact_dir: config.artifact_dir.clone(),
            timeout: config.audit_timeout,
        }
    }
}

/// Removes the report file when dropped, whichever way the audit ends.
struct ArtifactGuard {
    path: PathBuf,
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed audit artifact {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove audit artifact {:?}: {}", self.path, e),
        }
    }
}

/// Runs Lighthouse for one page and hands back its JSON report.
pub struct AuditInvoker<R> {
    runner: R,
    settings: InvokerSettings,
}

impl<R: ProcessRunner> AuditInvoker<R> {
    pub fn new(runner: R, settings: InvokerSettings) -> Self {
        Self { runner, settings }
    }

    pub fn settings(&self) -> &InvokerSettings {
        &self.settings
    }

    /// Fresh, collision-free report path for one invocation.
    pub fn artifact_path(&self) -> PathBuf {
        self.settings
            .artifact_dir
            .join(format!("{}{}.json", ARTIFACT_PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn build_command(
        &self,
        page: &PageConfig,
        output_path: &Path,
    ) -> Result<CommandSpec, InvokeError> {
        let device_flag = match &page.device {
            DeviceType::Mobile => "--form-factor=mobile",
            DeviceType::Desktop => "--preset=desktop",
            DeviceType::Unsupported(raw) => {
                return Err(InvokeError::UnsupportedDevice(raw.clone()));
            }
        };

        let mut args = vec![
            page.url.clone(),
            "--output=json".to_string(),
            format!("--output-path={}", output_path.display()),
            "--quiet".to_string(),
            format!("--chrome-flags={}", CHROME_FLAGS),
            device_flag.to_string(),
        ];
        if let Some(auth) = &page.auth {
            args.push(format!("--extra-headers={}", auth));
        }

        Ok(CommandSpec {
            program: self.settings.binary.clone(),
            args,
        })
    }

    pub async fn invoke(&self, page: &PageConfig) -> Result<RawReport, InvokeError> {
        let output_path = self.artifact_path();
        let command = self.build_command(page, &output_path)?;
        let _guard = ArtifactGuard {
            path: output_path.clone(),
        };

        info!("lighthouse running for {} with {}", page.url, page.device);

        let output = self
            .runner
            .run(&command, self.settings.timeout)
            .await
            .map_err(|e| match e {
                RunError::Spawn(source) => InvokeError::Spawn(source),
                RunError::Wait(source) => InvokeError::ProcessFailed {
                    exit_code: None,
                    stderr: source.to_string(),
                },
                RunError::TimedOut(limit) => InvokeError::Timeout {
                    secs: limit.as_secs(),
                },
            })?;

        if !output.success {
            return Err(InvokeError::ProcessFailed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        let bytes = tokio::fs::read(&output_path)
            .await
            .map_err(|source| InvokeError::ArtifactMissing {
                path: output_path.clone(),
                source,
            })?;

        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| InvokeError::MalformedOutput(e.to_string()))?;
        if !value.is_object() {
            return Err(InvokeError::MalformedOutput(
                "top-level value is not an object".to_string(),
            ));
        }

        Ok(RawReport(value))
    }
}
