//! # Taskwright - Remote Operations & Task Orchestration
//!
//! Taskwright drives a remote, service-oriented system through long-running,
//! server-side operations whose completion must be observed, not merely
//! triggered. It hides three axes of heterogeneity behind uniform contracts:
//!
//! - **Local vs. remote execution**: the [`transport`] layer runs a command
//!   line on the control node or over SSH and reports raw exit status and
//!   output; [`exec::ExecClient`] adds argv quoting, automatic privilege
//!   escalation, and typed failure on nonzero exit.
//! - **Divergent init systems**: [`service::ServiceManager`] detects which
//!   init mechanism controls a host's services (once per target, memoized)
//!   and translates a uniform start/stop/restart/status contract into the
//!   detected mechanism's syntax.
//! - **Asynchronous server-side work**: [`api::ApiClient`] recognizes
//!   operations that fan out into a graph of dependent tasks, and
//!   [`api::tasks::TaskTracker`] polls the growing graph to a terminal state,
//!   treating partial failure as overall failure.
//!
//! [`selectors::CompatibilitySelector`] gates checks on whether a known
//! defect is fixed in the target's reported version.
//!
//! ## Architecture Overview
//!
//! ```text
//! test logic ──► ExecClient ──► Transport (local | ssh) ──► target host
//!     │               ▲
//!     │               └── ServiceManager (init mechanism detection,
//!     │                                   batched restarts)
//!     └────────► ApiClient ──► target HTTP API
//!                     │
//!                     └── Operation::Deferred ──► TaskTracker ──► TaskGraphResult
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use taskwright::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> taskwright::Result<()> {
//!     let target = Target::builder("staging")
//!         .ssh("staging.example.com", "admin")
//!         .build();
//!
//!     let factory = TransportFactory::new();
//!     let exec = ExecClient::new(&factory, target.clone()).await?;
//!     let services = ServiceManager::new(exec.clone());
//!     services.restart(&ServiceDescriptor::new("httpd")).await?;
//!
//!     let api = ApiClient::new(target)?;
//!     let operation = api
//!         .post("api/v3/repositories/sync/", serde_json::json!({}))
//!         .await?;
//!     let graph = TaskTracker::new(&api)
//!         .await_completion(&operation, Duration::from_secs(600))
//!         .await?;
//!     println!("synced through {} tasks", graph.len());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod config;
pub mod error;
pub mod exec;
pub mod selectors;
pub mod service;
pub mod transport;

pub use error::{Error, Result};

pub mod prelude {
    //! Convenient re-exports of the most commonly needed types.

    pub use crate::api::tasks::{Task, TaskGraphResult, TaskState, TaskTracker, TrackerError};
    pub use crate::api::{ApiClient, ApiError, Operation, TaskRef};
    pub use crate::config::{Target, TargetBuilder, TransportKind};
    pub use crate::error::{Error, Result};
    pub use crate::exec::{ExecClient, ExecError, RunOptions, Sudo};
    pub use crate::selectors::{
        CompatibilityRule, CompatibilitySelector, DefectStatus, SelectorError,
    };
    pub use crate::service::{
        InitMechanism, ServiceDescriptor, ServiceError, ServiceManager, ServiceStatus,
    };
    pub use crate::transport::{
        CommandResult, ExecuteOptions, Transport, TransportError, TransportFactory,
    };
}
