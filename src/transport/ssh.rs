//! SSH transport.
//!
//! Remote command execution over SSH using the russh crate. Each command
//! runs on its own channel over a single pooled session; only exit status,
//! stdout, and stderr are observable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{Handle, Handler};
use russh::keys::key::PublicKey;
use russh::ChannelMsg;
use russh_keys::load_secret_key;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use super::{CommandResult, ExecuteOptions, Transport, TransportError, TransportResult};
use crate::config::ShellConfig;

/// Default connect timeout when the target does not configure one.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Wrapper around russh errors for the Handler trait.
#[derive(Debug)]
pub struct SshError(pub russh::Error);

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError(err)
    }
}

impl std::fmt::Display for SshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SSH error: {}", self.0)
    }
}

impl std::error::Error for SshError {}

/// Client handler for the SSH session.
struct ClientHandler {
    host: String,
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        // Test harness policy: accept the server key. The hosts driven by
        // this layer are short-lived lab machines, not production fleet.
        debug!(host = %self.host, "Accepting server host key");
        Ok(true)
    }
}

/// Transport executing commands over an SSH session.
pub struct SshTransport {
    identifier: String,
    /// Read lock: channel opens. Write lock: close only.
    handle: Arc<RwLock<Option<Handle<ClientHandler>>>>,
    connected: Arc<AtomicBool>,
}

impl SshTransport {
    /// Connect and authenticate against the configured shell endpoint.
    pub async fn connect(shell: &ShellConfig) -> TransportResult<Self> {
        let timeout = shell
            .connect_timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let identifier = format!("ssh://{}@{}:{}", shell.user, shell.host, shell.port);

        debug!(host = %shell.host, port = %shell.port, user = %shell.user, "Connecting via SSH");

        let mut config = russh::client::Config::default();
        config.inactivity_timeout = None;
        let config = Arc::new(config);

        let addr = format!("{}:{}", shell.host, shell.port);
        let socket = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::Timeout(timeout.as_secs()))?
            .map_err(|e| TransportError::ConnectionFailed {
                host: shell.host.clone(),
                message: format!("Failed to connect to {}: {}", addr, e),
            })?;

        socket
            .set_nodelay(true)
            .map_err(|e| TransportError::ConnectionFailed {
                host: shell.host.clone(),
                message: format!("Failed to set TCP_NODELAY: {}", e),
            })?;

        let handler = ClientHandler {
            host: shell.host.clone(),
        };
        let mut session = russh::client::connect_stream(config, socket, handler)
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                host: shell.host.clone(),
                message: format!("SSH handshake failed: {}", e),
            })?;

        Self::authenticate(&mut session, shell).await?;

        debug!(identifier = %identifier, "SSH connection established");

        Ok(Self {
            identifier,
            handle: Arc::new(RwLock::new(Some(session))),
            connected: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Authenticate with the identity file first, then password.
    async fn authenticate(
        session: &mut Handle<ClientHandler>,
        shell: &ShellConfig,
    ) -> TransportResult<()> {
        let auth_err = |message: String| TransportError::AuthenticationFailed {
            user: shell.user.clone(),
            host: shell.host.clone(),
            message,
        };

        if let Some(identity_file) = &shell.identity_file {
            let key_pair = load_secret_key(identity_file, shell.password.as_deref())
                .map_err(|e| {
                    auth_err(format!(
                        "Failed to load key {}: {}",
                        identity_file.display(),
                        e
                    ))
                })?;
            let authenticated = session
                .authenticate_publickey(&shell.user, Arc::new(key_pair))
                .await
                .map_err(|e| auth_err(format!("Key authentication failed: {}", e)))?;
            if authenticated {
                debug!(key = %identity_file.display(), "Authenticated using key");
                return Ok(());
            }
            warn!(key = %identity_file.display(), "Key rejected, trying password");
        }

        if let Some(password) = &shell.password {
            let authenticated = session
                .authenticate_password(&shell.user, password)
                .await
                .map_err(|e| auth_err(format!("Password authentication failed: {}", e)))?;
            if authenticated {
                debug!("Authenticated using password");
                return Ok(());
            }
        }

        Err(auth_err("All authentication methods rejected".to_string()))
    }

    /// Build the command string with escalation and environment prefixes.
    ///
    /// russh has no request_env, so environment variables are prepended as
    /// exports.
    fn build_command(command: &str, options: &ExecuteOptions) -> String {
        let mut parts = Vec::new();

        for (key, value) in &options.env {
            let escaped_value = value.replace('\'', "'\\''");
            parts.push(format!("export {}='{}'; ", key, escaped_value));
        }

        if options.escalate {
            let escalate_method = options.escalate_method.as_deref().unwrap_or("sudo");
            let escalate_user = options.escalate_user.as_deref().unwrap_or("root");

            match escalate_method {
                "su" => parts.push(format!("su - {} -c ", escalate_user)),
                "doas" => parts.push(format!("doas -u {} ", escalate_user)),
                _ => {
                    if options.escalate_password.is_some() {
                        parts.push(format!("sudo -S -u {} -- ", escalate_user));
                    } else {
                        parts.push(format!("sudo -u {} -- ", escalate_user));
                    }
                }
            }
        }

        parts.push(command.to_string());
        parts.concat()
    }
}

/// SSH reports exit status as u32; a missing or out-of-range status becomes
/// `i32::MAX` rather than wrapping.
fn exit_code_from_status(status: Option<u32>) -> i32 {
    status.map_or(i32::MAX, |s| i32::try_from(s).unwrap_or(i32::MAX))
}

#[async_trait]
impl Transport for SshTransport {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn is_alive(&self) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        self.handle.read().await.is_some()
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> TransportResult<CommandResult> {
        let options = options.unwrap_or_default();
        let full_command = Self::build_command(command, &options);

        trace!(command = %full_command, "Executing remote command");

        let execute_future = async {
            let handle_guard = self.handle.read().await;
            let handle: &Handle<ClientHandler> = handle_guard
                .as_ref()
                .ok_or(TransportError::ConnectionClosed)?;

            let mut channel = handle.channel_open_session().await.map_err(|e| {
                TransportError::ExecutionFailed(format!("Failed to open channel: {}", e))
            })?;

            drop(handle_guard);

            channel.exec(true, full_command).await.map_err(|e| {
                TransportError::ExecutionFailed(format!("Failed to execute command: {}", e))
            })?;

            if options.escalate {
                if let Some(password) = &options.escalate_password {
                    let password_data = format!("{}\n", password);
                    let mut cursor = tokio::io::BufReader::new(password_data.as_bytes());
                    channel.data(&mut cursor).await.map_err(|e| {
                        TransportError::ExecutionFailed(format!(
                            "Failed to write escalation password: {}",
                            e
                        ))
                    })?;
                }
            }

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut exit_code = None;

            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => {
                        stdout.extend_from_slice(data);
                    }
                    ChannelMsg::ExtendedData { ref data, ext } => {
                        // Extended data type 1 is stderr
                        if ext == 1 {
                            stderr.extend_from_slice(data);
                        }
                    }
                    ChannelMsg::ExitStatus { exit_status } => {
                        exit_code = Some(exit_status);
                    }
                    ChannelMsg::Eof => {
                        // Keep reading until the channel closes
                    }
                    ChannelMsg::Close => {
                        break;
                    }
                    _ => {}
                }
            }

            let _ = channel.eof().await;

            let exit_code = exit_code_from_status(exit_code);
            let stdout_str = String::from_utf8_lossy(&stdout).to_string();
            let stderr_str = String::from_utf8_lossy(&stderr).to_string();

            trace!(exit_code = %exit_code, "Command completed");

            Ok(CommandResult::new(command, exit_code, stdout_str, stderr_str))
        };

        if let Some(timeout_secs) = options.timeout {
            match tokio::time::timeout(Duration::from_secs(timeout_secs), execute_future).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout_secs)),
            }
        } else {
            execute_future.await
        }
    }

    async fn close(&self) -> TransportResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        let mut handle_guard = self.handle.write().await;
        if let Some(handle) = handle_guard.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
        }
        Ok(())
    }
}
