//! Transport layer for command execution against a target host.
//!
//! A [`Transport`] executes a command line and returns the raw exit status
//! and captured output. It never fails on a nonzero exit status — that is
//! the caller's decision. Connectivity problems (unreachable host, rejected
//! authentication, closed session) are [`TransportError`]s and are never
//! retried at this layer.
//!
//! Transports are pooled per target by the [`TransportFactory`] and reused
//! across sequential commands for the lifetime of the target. Handing them
//! out as `Arc<dyn Transport>` guarantees the underlying connection survives
//! every exit path of a command, including errors raised mid-command.

/// Local execution transport.
#[cfg(feature = "local")]
pub mod local;

/// SSH transport using russh.
#[cfg(feature = "russh")]
pub mod ssh;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::config::{Target, TransportKind};

/// Errors raised while reaching a host or dispatching a command.
///
/// A nonzero exit status is *not* an error here; it is reported through
/// [`CommandResult`].
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to establish the initial connection to the host.
    #[error("connection to '{host}' failed: {message}")]
    ConnectionFailed {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// Authentication was rejected by the remote host.
    #[error("authentication failed for '{user}@{host}': {message}")]
    AuthenticationFailed {
        /// Login user
        user: String,
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// Command dispatch failed (not to be confused with a nonzero exit).
    #[error("command dispatch failed: {0}")]
    ExecutionFailed(String),

    /// Connection or command timed out.
    #[error("timed out after {0} seconds")]
    Timeout(u64),

    /// Connection was closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Configuration is invalid or incomplete for this transport.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error during transport operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// The outcome of executing one command.
///
/// Immutable; produced per execution and owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// The command line that was executed, before escalation prefixes.
    pub command: String,
    /// Exit status of the command (0 indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// Convenience flag: `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a result from raw process output.
    pub fn new(
        command: impl Into<String>,
        exit_code: i32,
        stdout: String,
        stderr: String,
    ) -> Self {
        Self {
            command: command.into(),
            exit_code,
            stdout,
            stderr,
            success: exit_code == 0,
        }
    }

    /// Combined output, stderr after stdout.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Options for command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Environment variables to set.
    pub env: HashMap<String, String>,
    /// Timeout in seconds (None for no timeout).
    pub timeout: Option<u64>,
    /// Run the command with privilege escalation.
    pub escalate: bool,
    /// User to escalate to (default: root).
    pub escalate_user: Option<String>,
    /// Method for privilege escalation (sudo, su, doas).
    pub escalate_method: Option<String>,
    /// Password for the escalation prompt, written to stdin.
    pub escalate_password: Option<String>,
}

impl ExecuteOptions {
    /// Create new execute options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable privilege escalation.
    pub fn with_escalation(mut self, user: Option<String>) -> Self {
        self.escalate = true;
        self.escalate_user = user;
        self
    }
}

/// Uniform contract for executing commands against a host.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identifier for this transport (hostname or pool key).
    fn identifier(&self) -> &str;

    /// Check if the transport is still usable.
    async fn is_alive(&self) -> bool;

    /// Execute a command, returning its raw outcome.
    ///
    /// A nonzero exit status yields `Ok` with `success == false`; only
    /// connectivity problems yield `Err`.
    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> TransportResult<CommandResult>;

    /// Close the transport, releasing the underlying connection.
    async fn close(&self) -> TransportResult<()>;
}

/// Per-target transport registry.
///
/// Connections are established once per target and reused across sequential
/// commands. The registry never holds its lock across an await.
#[derive(Default)]
pub struct TransportFactory {
    registry: RwLock<HashMap<String, Arc<dyn Transport>>>,
}

impl TransportFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or establish) the transport for a target.
    pub async fn get(&self, target: &Target) -> TransportResult<Arc<dyn Transport>> {
        let key = target.pool_key();

        if let Some(existing) = self.registry.read().get(&key).cloned() {
            if existing.is_alive().await {
                return Ok(existing);
            }
            self.registry.write().remove(&key);
        }

        let transport = self.connect(target).await?;
        self.registry.write().insert(key, transport.clone());
        Ok(transport)
    }

    async fn connect(&self, target: &Target) -> TransportResult<Arc<dyn Transport>> {
        match target.shell.transport {
            TransportKind::Local => {
                #[cfg(feature = "local")]
                {
                    Ok(Arc::new(local::LocalTransport::new()))
                }
                #[cfg(not(feature = "local"))]
                {
                    Err(TransportError::InvalidConfig(
                        "local transport disabled; enable the 'local' feature".to_string(),
                    ))
                }
            }
            TransportKind::Ssh => {
                #[cfg(feature = "russh")]
                {
                    let transport = ssh::SshTransport::connect(&target.shell).await?;
                    Ok(Arc::new(transport))
                }
                #[cfg(not(feature = "russh"))]
                {
                    Err(TransportError::InvalidConfig(
                        "no SSH backend available; enable the 'russh' feature".to_string(),
                    ))
                }
            }
        }
    }

    /// Close and drop every pooled transport.
    pub async fn close_all(&self) -> TransportResult<()> {
        let transports: Vec<_> = {
            let mut registry = self.registry.write();
            registry.drain().map(|(_, t)| t).collect()
        };
        for transport in transports {
            let _ = transport.close().await;
        }
        Ok(())
    }

    /// Number of pooled transports.
    pub fn pooled(&self) -> usize {
        self.registry.read().len()
    }
}
