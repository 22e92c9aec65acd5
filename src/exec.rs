//! Command execution client.
//!
//! [`ExecClient`] wraps a [`Transport`] for one target: it joins argv-style
//! commands with proper shell quoting, escalates privileges when the
//! target's principal is not already root (decided once per target and
//! cached), and raises [`ExecError::CommandFailed`] on nonzero exit unless
//! the caller opts out. It performs no retries — retry policy belongs to
//! callers that know whether a command is idempotent.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::config::Target;
use crate::transport::{
    CommandResult, ExecuteOptions, Transport, TransportError, TransportFactory,
};

/// Errors raised while running commands through an [`ExecClient`].
#[derive(Error, Debug)]
pub enum ExecError {
    /// Transport-level failure; fatal and never retried here.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The command ran and exited nonzero.
    #[error(
        "command `{}` failed on '{host}' with exit code {}: {}",
        .result.command,
        .result.exit_code,
        .result.stderr.trim()
    )]
    CommandFailed {
        /// Target the command ran against.
        host: String,
        /// Full outcome of the failed command.
        result: CommandResult,
    },
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;

/// Privilege escalation policy for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sudo {
    /// Escalate only when the target's principal is not already root.
    #[default]
    Auto,
    /// Always escalate.
    Always,
    /// Never escalate.
    Never,
}

/// Per-call options for [`ExecClient::run_with`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Escalation policy (default: [`Sudo::Auto`]).
    pub sudo: Sudo,
    /// Do not raise [`ExecError::CommandFailed`] on nonzero exit.
    pub ignore_failure: bool,
    /// Timeout in seconds.
    pub timeout: Option<u64>,
}

impl RunOptions {
    /// Options that keep nonzero exits as data instead of errors.
    pub fn unchecked() -> Self {
        Self {
            ignore_failure: true,
            ..Self::default()
        }
    }

    /// Set the escalation policy.
    pub fn sudo(mut self, sudo: Sudo) -> Self {
        self.sudo = sudo;
        self
    }

    /// Set the timeout.
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }
}

/// Command client bound to one target.
#[derive(Clone)]
pub struct ExecClient {
    target: Arc<Target>,
    transport: Arc<dyn Transport>,
}

impl ExecClient {
    /// Acquire the target's transport from the factory and bind to it.
    pub async fn new(factory: &TransportFactory, target: Arc<Target>) -> ExecResult<Self> {
        let transport = factory.get(&target).await?;
        Ok(Self { target, transport })
    }

    /// Bind to an already-established transport.
    pub fn with_transport(target: Arc<Target>, transport: Arc<dyn Transport>) -> Self {
        Self { target, transport }
    }

    /// The target this client runs against.
    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    /// Run a command; nonzero exit raises [`ExecError::CommandFailed`].
    pub async fn run(&self, argv: &[&str]) -> ExecResult<CommandResult> {
        self.run_with(argv, RunOptions::default()).await
    }

    /// Run a command; nonzero exit is returned as data.
    pub async fn run_unchecked(&self, argv: &[&str]) -> ExecResult<CommandResult> {
        self.run_with(argv, RunOptions::unchecked()).await
    }

    /// Run a command with explicit options.
    pub async fn run_with(&self, argv: &[&str], options: RunOptions) -> ExecResult<CommandResult> {
        let command = shell_words::join(argv);
        let escalate = match options.sudo {
            Sudo::Always => true,
            Sudo::Never => false,
            Sudo::Auto => !self.is_privileged().await?,
        };

        debug!(
            target = %self.target.name,
            command = %command,
            escalate = %escalate,
            "Running command"
        );

        let exec_options = ExecuteOptions {
            escalate,
            timeout: options.timeout,
            ..ExecuteOptions::default()
        };
        let result = self.transport.execute(&command, Some(exec_options)).await?;

        if !result.success && !options.ignore_failure {
            return Err(ExecError::CommandFailed {
                host: self.target.name.clone(),
                result,
            });
        }
        Ok(result)
    }

    /// Whether the target's shell principal is root.
    ///
    /// Probed once per target with `id -u` and memoized on the target.
    pub async fn is_privileged(&self) -> ExecResult<bool> {
        self.target
            .privileged_cache()
            .get_or_try_init(|| async {
                let result = self.transport.execute("id -u", None).await?;
                let privileged = result.success && result.stdout.trim() == "0";
                debug!(target = %self.target.name, privileged = %privileged, "Probed principal");
                Ok::<_, ExecError>(privileged)
            })
            .await
            .copied()
    }
}
