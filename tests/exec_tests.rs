//! Tests for the command execution client.

mod common;

use std::sync::Arc;

use common::ScriptedTransport;
use pretty_assertions::assert_eq;
use tokio_test::assert_ok;
use taskwright::config::Target;
use taskwright::exec::{ExecClient, ExecError, RunOptions, Sudo};
use taskwright::transport::TransportFactory;

fn scripted_client(transport: ScriptedTransport) -> (ExecClient, Arc<ScriptedTransport>) {
    common::init_tracing();
    let target = Target::builder("scripted").local().build();
    let transport = Arc::new(transport);
    let client = ExecClient::with_transport(target, transport.clone());
    (client, transport)
}

#[tokio::test]
async fn run_succeeds_on_local_transport() {
    common::init_tracing();
    let factory = TransportFactory::new();
    let target = Target::builder("local").local().build();
    let client = ExecClient::new(&factory, target).await.unwrap();

    let result = tokio_test::assert_ok!(
        client
            .run_with(&["echo", "hello world"], RunOptions::default().sudo(Sudo::Never))
            .await
    );
    assert!(result.success);
    assert!(result.stdout.contains("hello world"));
    assert_eq!(result.command, "echo 'hello world'");
}

#[tokio::test]
async fn run_raises_command_failed_with_exact_exit_and_output() {
    let factory = TransportFactory::new();
    let target = Target::builder("local").local().build();
    let client = ExecClient::new(&factory, target).await.unwrap();

    let err = client
        .run_with(
            &["sh", "-c", "echo oops >&2; exit 3"],
            RunOptions::default().sudo(Sudo::Never),
        )
        .await
        .unwrap_err();
    match err {
        ExecError::CommandFailed { host, result } => {
            assert_eq!(host, "local");
            assert_eq!(result.exit_code, 3);
            assert!(result.stderr.contains("oops"));
        }
        other => panic!("expected CommandFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn run_unchecked_returns_nonzero_exit_as_data() {
    let factory = TransportFactory::new();
    let target = Target::builder("local").local().build();
    let client = ExecClient::new(&factory, target).await.unwrap();

    let result = client
        .run_with(
            &["sh", "-c", "exit 7"],
            RunOptions::unchecked().sudo(Sudo::Never),
        )
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.exit_code, 7);
}

#[tokio::test]
async fn sudo_auto_escalates_for_unprivileged_principal() {
    let (client, transport) = scripted_client(ScriptedTransport::new().respond("id -u", 0, "1000\n", ""));

    client.run(&["systemctl", "restart", "httpd"]).await.unwrap();

    let commands = transport.commands();
    assert_eq!(commands[0], "id -u");
    assert_eq!(commands[1], "sudo systemctl restart httpd");
}

#[tokio::test]
async fn sudo_auto_skips_escalation_for_root_principal() {
    let (client, transport) = scripted_client(ScriptedTransport::new().respond("id -u", 0, "0\n", ""));

    client.run(&["systemctl", "restart", "httpd"]).await.unwrap();

    let commands = transport.commands();
    assert_eq!(commands[1], "systemctl restart httpd");
}

#[tokio::test]
async fn privilege_probe_runs_once_per_target() {
    let (client, transport) = scripted_client(ScriptedTransport::new().respond("id -u", 0, "1000\n", ""));

    client.run(&["true"]).await.unwrap();
    client.run(&["true"]).await.unwrap();
    client.run(&["true"]).await.unwrap();

    assert_eq!(transport.count_containing("id -u"), 1);
}

#[tokio::test]
async fn sudo_never_suppresses_escalation_without_probing() {
    let (client, transport) = scripted_client(ScriptedTransport::new());

    client
        .run_with(&["whoami"], RunOptions::default().sudo(Sudo::Never))
        .await
        .unwrap();

    assert_eq!(transport.commands(), vec!["whoami".to_string()]);
    assert_eq!(transport.count_containing("id -u"), 0);
}

#[tokio::test]
async fn sudo_always_escalates_without_probing() {
    let (client, transport) = scripted_client(ScriptedTransport::new());

    client
        .run_with(&["whoami"], RunOptions::default().sudo(Sudo::Always))
        .await
        .unwrap();

    assert_eq!(transport.commands(), vec!["sudo whoami".to_string()]);
}
