//! Task graph tracking.
//!
//! A deferred operation resolves into one or more server-side tasks, each of
//! which may spawn further tasks that only become visible once the parent
//! progresses. The [`TaskTracker`] polls every discovered task until the
//! whole graph is terminal, sleeping with bounded exponential backoff
//! between rounds and honoring an external wall-clock deadline.
//!
//! Polling is a plain state machine over an explicit bookkeeping structure
//! (discovered identifiers, terminal results) rather than exception-driven
//! control flow; the graph's size is never assumed known up front.

use std::time::Duration;

use futures::future;
use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::{ApiClient, ApiError, Operation, TaskRef};

/// Default initial interval between polling rounds.
pub const DEFAULT_POLL_INITIAL: Duration = Duration::from_millis(500);

/// Default cap on the interval between polling rounds.
pub const DEFAULT_POLL_CAP: Duration = Duration::from_secs(5);

/// Observable state of a server-side task.
///
/// State is monotonic: a task never transitions out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Queued, not yet picked up.
    Waiting,
    /// In progress.
    Running,
    /// Finished successfully. Terminal.
    Succeeded,
    /// Finished with an error. Terminal.
    Failed,
    /// Canceled server-side. Terminal.
    Canceled,
}

impl TaskState {
    /// Whether no further transition can occur.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Canceled
        )
    }
}

/// A server-side task as observed through the status endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    /// Task identifier; filled from the polled reference when the status
    /// body does not repeat it.
    #[serde(default)]
    pub id: String,
    /// Current state.
    pub state: TaskState,
    /// Error detail reported for failed tasks.
    #[serde(default)]
    pub error: Option<Value>,
    /// References to tasks this one spawned, in spawn order.
    #[serde(default, alias = "child_tasks")]
    pub spawned_tasks: Vec<TaskRef>,
}

/// Aggregated outcome of a fully-succeeded task graph.
///
/// Emitted only once every discovered node is terminal; tasks appear in
/// breadth-first discovery order.
#[derive(Debug, Clone)]
pub struct TaskGraphResult {
    /// Every observed task, keyed by identifier, in discovery order.
    pub tasks: IndexMap<String, Task>,
}

impl TaskGraphResult {
    /// Number of observed nodes.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph had no tasks at all (synchronous operation).
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Errors raised while tracking a task graph.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// A task reached the `failed` terminal state.
    #[error(
        "task '{}' failed{}; observed terminal: [{}]; never observed terminal: [{}]",
        .task.id,
        .task.error.as_ref().map(|e| format!(": {}", e)).unwrap_or_default(),
        .observed.join(", "),
        .unobserved.join(", ")
    )]
    TaskFailed {
        /// The first failed node in breadth-first discovery order.
        task: Task,
        /// Identifiers observed reaching a terminal state.
        observed: Vec<String>,
        /// Identifiers never observed terminal due to the short-circuit.
        unobserved: Vec<String>,
    },

    /// A task reached the `canceled` terminal state.
    #[error(
        "task '{}' was canceled; observed terminal: [{}]; never observed terminal: [{}]",
        .task.id,
        .observed.join(", "),
        .unobserved.join(", ")
    )]
    TaskCanceled {
        /// The first canceled node in breadth-first discovery order.
        task: Task,
        /// Identifiers observed reaching a terminal state.
        observed: Vec<String>,
        /// Identifiers never observed terminal due to the short-circuit.
        unobserved: Vec<String>,
    },

    /// The deadline elapsed with nodes still pending.
    ///
    /// This signals an environment problem, not a logical rejection; the
    /// server-side tasks are not canceled.
    #[error(
        "timed out after {timeout:?} with tasks still pending: [{}]",
        .pending.join(", ")
    )]
    TaskTimeout {
        /// The deadline that was exceeded.
        timeout: Duration,
        /// Identifiers still pending when the deadline passed.
        pending: Vec<String>,
    },

    /// Failure observing task state through the API.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Result type for tracking operations.
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Explicit bookkeeping for a growing task graph.
///
/// `discovered` records every identifier ever seen, in breadth-first
/// discovery order; `terminal` holds observed terminal results. Pending
/// nodes are the difference. Children join the frontier only when their
/// parent is observed `succeeded` — before that they are invisible.
#[derive(Debug, Default)]
struct TaskGraph {
    discovered: IndexSet<String>,
    terminal: IndexMap<String, Task>,
}

impl TaskGraph {
    fn seed(refs: &[TaskRef]) -> Self {
        let mut graph = Self::default();
        for task_ref in refs {
            graph.discovered.insert(task_ref.as_str().to_string());
        }
        graph
    }

    /// Identifiers discovered but not yet observed terminal, in order.
    fn pending(&self) -> Vec<String> {
        self.discovered
            .iter()
            .filter(|id| !self.terminal.contains_key(*id))
            .cloned()
            .collect()
    }

    fn is_settled(&self) -> bool {
        self.discovered.len() == self.terminal.len()
    }

    /// Record one observation. Terminal states are recorded once and never
    /// overwritten; children of a succeeded task join the frontier.
    fn observe(&mut self, id: &str, task: Task) {
        if self.terminal.contains_key(id) {
            return;
        }
        if !task.state.is_terminal() {
            trace!(task = %id, state = ?task.state, "Task still pending");
            return;
        }
        if task.state == TaskState::Succeeded {
            for child in &task.spawned_tasks {
                if self.discovered.insert(child.as_str().to_string()) {
                    debug!(parent = %id, child = %child, "Discovered spawned task");
                }
            }
        }
        self.terminal.insert(id.to_string(), task);
    }

    /// First failed or canceled node in discovery order.
    fn first_failure(&self) -> Option<&Task> {
        self.discovered
            .iter()
            .filter_map(|id| self.terminal.get(id))
            .find(|task| matches!(task.state, TaskState::Failed | TaskState::Canceled))
    }

    fn observed_ids(&self) -> Vec<String> {
        self.terminal.keys().cloned().collect()
    }
}

/// Polls a deferred operation's task graph to completion.
pub struct TaskTracker<'a> {
    api: &'a ApiClient,
    poll_initial: Duration,
    poll_cap: Duration,
}

impl<'a> TaskTracker<'a> {
    /// Create a tracker with default poll pacing.
    pub fn new(api: &'a ApiClient) -> Self {
        Self {
            api,
            poll_initial: DEFAULT_POLL_INITIAL,
            poll_cap: DEFAULT_POLL_CAP,
        }
    }

    /// Override the initial and maximum interval between polling rounds.
    pub fn with_poll_interval(mut self, initial: Duration, cap: Duration) -> Self {
        self.poll_initial = initial;
        self.poll_cap = cap;
        self
    }

    /// Resolve an operation: poll every task it spawned (and every task
    /// those spawn, transitively) until the whole graph is terminal.
    ///
    /// A synchronous operation resolves immediately with an empty graph.
    /// Any `failed` or `canceled` node fails the graph; the in-flight
    /// polling round still finishes first so no request is orphaned.
    /// Exceeding `timeout` with nodes pending raises
    /// [`TrackerError::TaskTimeout`].
    pub async fn await_completion(
        &self,
        operation: &Operation,
        timeout: Duration,
    ) -> TrackerResult<TaskGraphResult> {
        self.wait_for(operation.task_refs(), timeout).await
    }

    /// Resolve a set of task references directly.
    pub async fn wait_for(
        &self,
        refs: &[TaskRef],
        timeout: Duration,
    ) -> TrackerResult<TaskGraphResult> {
        let deadline = Instant::now() + timeout;
        let mut graph = TaskGraph::seed(refs);
        let mut round: u32 = 0;

        loop {
            let pending = graph.pending();
            if pending.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                warn!(pending = ?pending, "Task polling deadline exceeded");
                return Err(TrackerError::TaskTimeout { timeout, pending });
            }

            trace!(round = %round, pending = %pending.len(), "Polling round");

            // Every status lookup in a round is issued together and fully
            // drained before the result is reported, so a failure partway
            // through never orphans an in-flight request. Observation order
            // follows discovery order, keeping child discovery deterministic.
            let observations = future::join_all(pending.iter().map(|id| async move {
                (id.as_str(), self.api.task_status(&TaskRef(id.clone())).await)
            }))
            .await;
            for (id, observation) in observations {
                graph.observe(id, observation?);
            }

            if let Some(failure) = graph.first_failure() {
                let task = failure.clone();
                let observed = graph.observed_ids();
                let unobserved = graph.pending();
                return Err(match task.state {
                    TaskState::Canceled => TrackerError::TaskCanceled {
                        task,
                        observed,
                        unobserved,
                    },
                    _ => TrackerError::TaskFailed {
                        task,
                        observed,
                        unobserved,
                    },
                });
            }

            if graph.is_settled() {
                break;
            }

            let delay = self
                .backoff(round)
                .min(deadline.saturating_duration_since(Instant::now()));
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            round = round.saturating_add(1);
        }

        debug!(tasks = %graph.terminal.len(), "Task graph settled");
        Ok(TaskGraphResult {
            tasks: graph.terminal,
        })
    }

    /// Bounded exponential backoff: `initial * 2^round`, capped.
    fn backoff(&self, round: u32) -> Duration {
        let factor = 2u32.saturating_pow(round.min(16));
        self.poll_initial.saturating_mul(factor).min(self.poll_cap)
    }
}
