//! Target configuration.
//!
//! A [`Target`] describes one system under orchestration: the HTTP API it
//! exposes and the shell endpoint commands run against. It is created once
//! per run from configuration (the loading mechanism lives in the
//! surrounding framework) and is immutable afterwards, except for two
//! lazily-detected, write-once caches: whether the shell principal is
//! already privileged, and which init mechanism controls services on the
//! host. Keeping those caches on the `Target` itself means multiple targets
//! in one process never interfere.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use url::Url;

use crate::service::InitMechanism;

/// How commands reach the target host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Spawn commands directly on the control node.
    #[default]
    Local,
    /// Execute commands over a secure remote shell.
    Ssh,
}

/// HTTP API endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the target's API, e.g. `https://target.example.com/`.
    pub base_url: Url,
    /// Basic-auth username.
    pub username: String,
    /// Basic-auth password.
    pub password: String,
}

/// Shell endpoint for command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Transport used to reach the host.
    #[serde(default)]
    pub transport: TransportKind,
    /// Hostname or address for remote transports.
    pub host: String,
    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Private key file for SSH authentication.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Password for SSH authentication (or key passphrase).
    #[serde(default)]
    pub password: Option<String>,
    /// Connect timeout in seconds.
    #[serde(default)]
    pub connect_timeout: Option<u64>,
}

fn default_ssh_port() -> u16 {
    22
}

/// A host/service endpoint under orchestration.
#[derive(Debug, Deserialize)]
pub struct Target {
    /// Display name, used in logs and error messages.
    pub name: String,
    /// API endpoint descriptor.
    pub api: ApiConfig,
    /// Shell endpoint descriptor.
    pub shell: ShellConfig,
    #[serde(skip)]
    privileged: OnceCell<bool>,
    #[serde(skip)]
    init_mechanism: OnceCell<InitMechanism>,
}

impl Target {
    /// Start building a target.
    pub fn builder(name: impl Into<String>) -> TargetBuilder {
        TargetBuilder::new(name)
    }

    /// Key identifying this target's transport in the connection registry.
    pub fn pool_key(&self) -> String {
        match self.shell.transport {
            TransportKind::Local => "local".to_string(),
            TransportKind::Ssh => format!(
                "ssh://{}@{}:{}",
                self.shell.user, self.shell.host, self.shell.port
            ),
        }
    }

    /// Write-once cache: is the shell principal already root?
    pub(crate) fn privileged_cache(&self) -> &OnceCell<bool> {
        &self.privileged
    }

    /// Write-once cache: which init mechanism controls services here?
    pub(crate) fn init_mechanism_cache(&self) -> &OnceCell<InitMechanism> {
        &self.init_mechanism
    }
}

/// Builder for [`Target`].
pub struct TargetBuilder {
    name: String,
    base_url: Option<Url>,
    username: String,
    password: String,
    transport: TransportKind,
    host: String,
    port: u16,
    user: String,
    identity_file: Option<PathBuf>,
    shell_password: Option<String>,
    connect_timeout: Option<u64>,
}

impl TargetBuilder {
    fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            host: name.clone(),
            name,
            base_url: None,
            username: "admin".to_string(),
            password: "admin".to_string(),
            transport: TransportKind::Local,
            port: default_ssh_port(),
            user: whoami(),
            identity_file: None,
            shell_password: None,
            connect_timeout: None,
        }
    }

    /// Set the API base URL.
    pub fn api_url(mut self, url: Url) -> Self {
        self.base_url = Some(url);
        self
    }

    /// Set the API basic-auth credentials.
    pub fn api_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Use the local transport.
    pub fn local(mut self) -> Self {
        self.transport = TransportKind::Local;
        self
    }

    /// Use the SSH transport against the given host.
    pub fn ssh(mut self, host: impl Into<String>, user: impl Into<String>) -> Self {
        self.transport = TransportKind::Ssh;
        self.host = host.into();
        self.user = user.into();
        self
    }

    /// Set the SSH port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the SSH identity file.
    pub fn identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Set the SSH password (or key passphrase).
    pub fn shell_password(mut self, password: impl Into<String>) -> Self {
        self.shell_password = Some(password.into());
        self
    }

    /// Set the SSH connect timeout in seconds.
    pub fn connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout = Some(secs);
        self
    }

    /// Finish building. The API base URL defaults to `http://{host}/`.
    pub fn build(self) -> Arc<Target> {
        let base_url = self.base_url.unwrap_or_else(|| {
            // The host names accepted here always form a valid authority.
            Url::parse(&format!("http://{}/", self.host))
                .unwrap_or_else(|_| Url::parse("http://localhost/").unwrap())
        });
        Arc::new(Target {
            name: self.name,
            api: ApiConfig {
                base_url,
                username: self.username,
                password: self.password,
            },
            shell: ShellConfig {
                transport: self.transport,
                host: self.host,
                port: self.port,
                user: self.user,
                identity_file: self.identity_file,
                password: self.shell_password,
                connect_timeout: self.connect_timeout,
            },
            privileged: OnceCell::new(),
            init_mechanism: OnceCell::new(),
        })
    }
}

/// Get the current username.
fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_key_local() {
        let target = Target::builder("t1").local().build();
        assert_eq!(target.pool_key(), "local");
    }

    #[test]
    fn test_pool_key_ssh() {
        let target = Target::builder("t2")
            .ssh("example.com", "admin")
            .port(2222)
            .build();
        assert_eq!(target.pool_key(), "ssh://admin@example.com:2222");
    }

    #[test]
    fn test_default_api_url_from_host() {
        let target = Target::builder("t3").ssh("target.example.com", "admin").build();
        assert_eq!(target.api.base_url.as_str(), "http://target.example.com/");
    }

    #[test]
    fn test_deserialize_target() {
        let target: Target = serde_json::from_value(serde_json::json!({
            "name": "staging",
            "api": {
                "base_url": "https://staging.example.com/",
                "username": "admin",
                "password": "hunter2"
            },
            "shell": {
                "transport": "ssh",
                "host": "staging.example.com",
                "user": "deploy"
            }
        }))
        .unwrap();
        assert_eq!(target.shell.port, 22);
        assert_eq!(target.shell.transport, TransportKind::Ssh);
        assert!(target.privileged_cache().get().is_none());
    }
}
