//! Service lifecycle management.
//!
//! Hosts differ in which init mechanism controls their services. This module
//! probes the target once, memoizes the detected [`InitMechanism`] on the
//! target, and then exposes a uniform start/stop/restart/status contract
//! translated into the concrete syntax of the detected mechanism.
//!
//! The manager provides no locking of its own: callers are responsible for
//! serializing service-lifecycle mutations against a given host.

use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::exec::{ExecClient, ExecError, RunOptions, Sudo};
use crate::transport::CommandResult;

/// Errors raised while managing services.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Detection exhausted every known mechanism. Fatal, not retried.
    #[error("no supported init mechanism recognized on '{host}'")]
    MechanismUnrecognized {
        /// Target host
        host: String,
    },

    /// A single service action exited nonzero.
    #[error("failed to {action} unit '{unit}' on '{host}': {detail}")]
    ActionFailed {
        /// Target host
        host: String,
        /// The action that failed
        action: Action,
        /// Concrete unit name
        unit: String,
        /// Captured stderr (or stdout when stderr is empty)
        detail: String,
    },

    /// A batched restart aborted partway through.
    ///
    /// `restarted` lists the units already restarted before the failure, so
    /// the caller can attempt compensating action.
    #[error(
        "batch restart aborted on '{host}': unit '{failed_unit}' failed ({detail}); already restarted: [{}]",
        .restarted.join(", ")
    )]
    RestartBatch {
        /// Target host
        host: String,
        /// Units restarted before the abort, in order
        restarted: Vec<String>,
        /// The unit whose restart failed
        failed_unit: String,
        /// Captured stderr (or stdout when stderr is empty)
        detail: String,
    },

    /// Command execution failure underneath a service operation.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// A service lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start the service.
    Start,
    /// Stop the service.
    Stop,
    /// Restart the service.
    Restart,
    /// Query the service's state.
    Status,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Status => "status",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state service status.
///
/// `Unknown` means the mechanism's output was unparsable; it is never
/// silently coerced to `Inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// The service is running.
    Active,
    /// The service is stopped or has failed.
    Inactive,
    /// The mechanism's output could not be interpreted.
    Unknown,
}

/// Supported init mechanisms, probed in declaration order (most modern
/// first). Detection selects one variant and stores it as plain data on the
/// target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMechanism {
    /// systemd (`systemctl`)
    Systemd,
    /// OpenRC (`rc-service`)
    OpenRc,
    /// SysV init scripts (`service`)
    SysV,
}

impl InitMechanism {
    /// Fixed probe priority.
    pub const PROBE_ORDER: [InitMechanism; 3] =
        [InitMechanism::Systemd, InitMechanism::OpenRc, InitMechanism::SysV];

    /// Human-readable mechanism name.
    pub fn name(self) -> &'static str {
        match self {
            InitMechanism::Systemd => "systemd",
            InitMechanism::OpenRc => "openrc",
            InitMechanism::SysV => "sysv",
        }
    }

    /// Shell probe whose zero exit selects this mechanism.
    fn probe_command(self) -> &'static [&'static str] {
        match self {
            InitMechanism::Systemd => &["test", "-d", "/run/systemd/system"],
            InitMechanism::OpenRc => &["which", "rc-service"],
            InitMechanism::SysV => &["test", "-d", "/etc/init.d"],
        }
    }

    /// Command line for an action against one concrete unit.
    fn action_command(self, action: Action, unit: &str) -> Vec<String> {
        match self {
            InitMechanism::Systemd => {
                let verb = match action {
                    Action::Status => "is-active",
                    other => other.as_str(),
                };
                vec!["systemctl".to_string(), verb.to_string(), unit.to_string()]
            }
            InitMechanism::OpenRc => vec![
                "rc-service".to_string(),
                unit.to_string(),
                action.as_str().to_string(),
            ],
            InitMechanism::SysV => vec![
                "service".to_string(),
                unit.to_string(),
                action.as_str().to_string(),
            ],
        }
    }

    /// Translate a logical descriptor into the concrete unit names this
    /// mechanism expects.
    fn units(self, service: &ServiceDescriptor) -> Vec<String> {
        service
            .units
            .iter()
            .map(|unit| match self {
                InitMechanism::Systemd if !unit.contains('.') => format!("{}.service", unit),
                _ => unit.clone(),
            })
            .collect()
    }

    /// Interpret a status command's outcome.
    fn parse_status(self, result: &CommandResult) -> ServiceStatus {
        match self {
            InitMechanism::Systemd => match result.stdout.trim() {
                "active" => ServiceStatus::Active,
                "inactive" | "failed" => ServiceStatus::Inactive,
                _ => ServiceStatus::Unknown,
            },
            InitMechanism::OpenRc => {
                let stdout = result.stdout.to_lowercase();
                if stdout.contains("started") {
                    ServiceStatus::Active
                } else if stdout.contains("stopped") || stdout.contains("crashed") {
                    ServiceStatus::Inactive
                } else {
                    ServiceStatus::Unknown
                }
            }
            // LSB status exit codes: 0 running, 3 not running.
            InitMechanism::SysV => match result.exit_code {
                0 => ServiceStatus::Active,
                3 => ServiceStatus::Inactive,
                _ => ServiceStatus::Unknown,
            },
        }
    }
}

/// A logical service and the concrete units it maps to.
///
/// One logical name may expand to several concrete units (worker pools and
/// similar per-process-type suffixes). Static, read-only mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Logical service name.
    pub name: String,
    /// Concrete unit names, before mechanism-specific decoration.
    pub units: Vec<String>,
}

impl ServiceDescriptor {
    /// A descriptor whose single unit shares the logical name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            units: vec![name.clone()],
            name,
        }
    }

    /// Override the concrete unit set.
    pub fn with_units<I, S>(mut self, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.units = units.into_iter().map(Into::into).collect();
        self
    }
}

/// Uniform service-control surface over the detected init mechanism.
pub struct ServiceManager {
    exec: ExecClient,
}

impl ServiceManager {
    /// Create a manager driving services through the given client.
    pub fn new(exec: ExecClient) -> Self {
        Self { exec }
    }

    /// The init mechanism controlling this target's services.
    ///
    /// Probes each supported mechanism in fixed priority order on first use
    /// and memoizes the winner on the target; repeated calls never re-probe.
    pub async fn mechanism(&self) -> ServiceResult<InitMechanism> {
        self.exec
            .target()
            .init_mechanism_cache()
            .get_or_try_init(|| self.detect())
            .await
            .copied()
    }

    async fn detect(&self) -> ServiceResult<InitMechanism> {
        for mechanism in InitMechanism::PROBE_ORDER {
            let probe = mechanism.probe_command();
            let result = self
                .exec
                .run_with(probe, RunOptions::unchecked().sudo(Sudo::Never))
                .await?;
            if result.success {
                debug!(
                    target = %self.exec.target().name,
                    mechanism = %mechanism.name(),
                    "Detected init mechanism"
                );
                return Ok(mechanism);
            }
        }
        Err(ServiceError::MechanismUnrecognized {
            host: self.exec.target().name.clone(),
        })
    }

    /// Start every concrete unit of a service.
    pub async fn start(&self, service: &ServiceDescriptor) -> ServiceResult<()> {
        self.apply(service, Action::Start).await
    }

    /// Stop every concrete unit of a service.
    pub async fn stop(&self, service: &ServiceDescriptor) -> ServiceResult<()> {
        self.apply(service, Action::Stop).await
    }

    /// Restart every concrete unit of a service.
    pub async fn restart(&self, service: &ServiceDescriptor) -> ServiceResult<()> {
        self.apply(service, Action::Restart).await
    }

    /// Tri-state status of a service.
    ///
    /// For multi-unit services: `Active` when every unit is active,
    /// `Inactive` when every unit is inactive, otherwise `Unknown` (mixed or
    /// unparsable output).
    pub async fn status(&self, service: &ServiceDescriptor) -> ServiceResult<ServiceStatus> {
        let mechanism = self.mechanism().await?;
        let mut statuses = Vec::new();
        for unit in mechanism.units(service) {
            let result = self.run_action(mechanism, Action::Status, &unit).await?;
            statuses.push(mechanism.parse_status(&result));
        }
        let aggregated = if statuses.iter().all(|s| *s == ServiceStatus::Active) {
            ServiceStatus::Active
        } else if statuses.iter().all(|s| *s == ServiceStatus::Inactive) {
            ServiceStatus::Inactive
        } else {
            ServiceStatus::Unknown
        };
        Ok(aggregated)
    }

    /// Restart a set of logical services as one batch.
    ///
    /// Concrete units derived from the set are deduplicated and restarted in
    /// a stable (first-seen) order. The first failing unit aborts the batch;
    /// the error reports which units had already been restarted. On success
    /// the restarted unit names are returned in order.
    pub async fn restart_all(&self, services: &[ServiceDescriptor]) -> ServiceResult<Vec<String>> {
        let mechanism = self.mechanism().await?;

        let mut units: IndexSet<String> = IndexSet::new();
        for service in services {
            units.extend(mechanism.units(service));
        }

        let mut restarted: Vec<String> = Vec::with_capacity(units.len());
        for unit in &units {
            let result = self.run_action(mechanism, Action::Restart, unit).await?;
            if !result.success {
                warn!(
                    target = %self.exec.target().name,
                    unit = %unit,
                    restarted = ?restarted,
                    "Batch restart aborted"
                );
                return Err(ServiceError::RestartBatch {
                    host: self.exec.target().name.clone(),
                    restarted,
                    failed_unit: unit.clone(),
                    detail: failure_detail(&result),
                });
            }
            restarted.push(unit.clone());
        }
        Ok(restarted)
    }

    async fn apply(&self, service: &ServiceDescriptor, action: Action) -> ServiceResult<()> {
        let mechanism = self.mechanism().await?;
        for unit in mechanism.units(service) {
            let result = self.run_action(mechanism, action, &unit).await?;
            if !result.success {
                return Err(ServiceError::ActionFailed {
                    host: self.exec.target().name.clone(),
                    action,
                    unit,
                    detail: failure_detail(&result),
                });
            }
        }
        Ok(())
    }

    async fn run_action(
        &self,
        mechanism: InitMechanism,
        action: Action,
        unit: &str,
    ) -> ServiceResult<CommandResult> {
        let argv = mechanism.action_command(action, unit);
        let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
        // Nonzero exits are interpreted here, not raised as CommandFailed.
        let result = self.exec.run_with(&argv, RunOptions::unchecked()).await?;
        Ok(result)
    }
}

fn failure_detail(result: &CommandResult) -> String {
    let stderr = result.stderr.trim();
    if stderr.is_empty() {
        result.stdout.trim().to_string()
    } else {
        stderr.to_string()
    }
}
