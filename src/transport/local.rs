//! Local transport.
//!
//! Spawns commands directly on the control node, without any network
//! transport. Privilege escalation is applied by wrapping the command in
//! sudo/su/doas.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{CommandResult, ExecuteOptions, Transport, TransportError, TransportResult};

/// Transport executing commands on the current host.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    identifier: String,
}

impl LocalTransport {
    /// Create a new local transport.
    pub fn new() -> Self {
        Self {
            identifier: "local".to_string(),
        }
    }

    /// Build the command with options.
    fn build_command(&self, command: &str, options: &ExecuteOptions) -> Command {
        let mut cmd = if options.escalate {
            let escalate_method = options.escalate_method.as_deref().unwrap_or("sudo");
            let escalate_user = options.escalate_user.as_deref().unwrap_or("root");

            match escalate_method {
                "su" => {
                    let mut c = Command::new("su");
                    c.arg("-").arg(escalate_user).arg("-c").arg(command);
                    c
                }
                "doas" => {
                    let mut c = Command::new("doas");
                    c.arg("-u")
                        .arg(escalate_user)
                        .arg("sh")
                        .arg("-c")
                        .arg(command);
                    c
                }
                _ => {
                    let mut c = Command::new("sudo");
                    c.arg("-u").arg(escalate_user);
                    if options.escalate_password.is_some() {
                        c.arg("-S"); // Read password from stdin
                    }
                    c.arg("--").arg("sh").arg("-c").arg(command);
                    c
                }
            }
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };

        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        cmd
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn is_alive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> TransportResult<CommandResult> {
        let options = options.unwrap_or_default();
        debug!(command = %command, "Executing local command");

        let mut cmd = self.build_command(command, &options);

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::ExecutionFailed(format!("Failed to spawn process: {}", e))
        })?;

        if options.escalate {
            if let Some(password) = &options.escalate_password {
                if let Some(mut stdin) = child.stdin.take() {
                    stdin
                        .write_all(format!("{}\n", password).as_bytes())
                        .await
                        .map_err(|e| {
                            TransportError::ExecutionFailed(format!(
                                "Failed to write escalation password: {}",
                                e
                            ))
                        })?;
                }
            }
        }

        let output = if let Some(timeout_secs) = options.timeout {
            let timeout = tokio::time::Duration::from_secs(timeout_secs);
            match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(result) => result.map_err(|e| {
                    TransportError::ExecutionFailed(format!("Failed to wait for process: {}", e))
                })?,
                Err(_) => return Err(TransportError::Timeout(timeout_secs)),
            }
        } else {
            child.wait_with_output().await.map_err(|e| {
                TransportError::ExecutionFailed(format!("Failed to wait for process: {}", e))
            })?
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        trace!(exit_code = %exit_code, stdout_len = %stdout.len(), stderr_len = %stderr.len(), "Command completed");

        Ok(CommandResult::new(command, exit_code, stdout, stderr))
    }

    async fn close(&self) -> TransportResult<()> {
        // Nothing to release for local execution
        Ok(())
    }
}
