//! Shared test helpers.

use std::sync::Once;

use async_trait::async_trait;
use parking_lot::Mutex;
use taskwright::transport::{
    CommandResult, ExecuteOptions, Transport, TransportResult,
};

static TRACING: Once = Once::new();

/// Route crate tracing to the test writer, honoring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A transport that records every dispatched command and answers from a
/// scripted rule table. The first rule whose needle is contained in the
/// command wins; unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedTransport {
    log: Mutex<Vec<String>>,
    rules: Mutex<Vec<Rule>>,
}

struct Rule {
    needle: String,
    exit_code: i32,
    stdout: String,
    stderr: String,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `needle` with the given outcome.
    pub fn respond(self, needle: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        self.rules.lock().push(Rule {
            needle: needle.to_string(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        });
        self
    }

    /// Every command dispatched so far, escalated ones prefixed with `sudo `.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// How many dispatched commands contain `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn identifier(&self) -> &str {
        "scripted"
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
        let logged = if options.escalate {
            format!("sudo {}", command)
        } else {
            command.to_string()
        };
        self.log.lock().push(logged);

        let rules = self.rules.lock();
        let rule = rules.iter().find(|r| command.contains(&r.needle));
        let result = match rule {
            Some(rule) => CommandResult::new(
                command,
                rule.exit_code,
                rule.stdout.clone(),
                rule.stderr.clone(),
            ),
            None => CommandResult::new(command, 0, String::new(), String::new()),
        };
        Ok(result)
    }

    async fn close(&self) -> TransportResult<()> {
        Ok(())
    }
}
