use std::time::{Duration, Instant};

use mcp_contract::core::errors::SessionError;
use mcp_contract::mcp::process::{ServerParameters, ServerProcess, StderrMode};
use mcp_contract::mcp::session::{Reply, Session, SessionOptions, SessionState};
use mcp_contract::scenario::{Outcome, Scenario, ScenarioDriver, SessionFactory};
use mcp_contract::verify::{ContractExpectations, ContractVerifier, Violation};

fn fixture(mode: &str) -> ServerParameters {
    ServerParameters::new(env!("CARGO_BIN_EXE_contract-fixture-server"), vec![])
        .with_var("FIXTURE_MODE", mode)
}

fn options(timeout: Duration) -> SessionOptions {
    SessionOptions::default().with_timeout(timeout)
}

async fn open(mode: &str) -> Session {
    Session::open(&fixture(mode), options(Duration::from_secs(10)))
        .await
        .unwrap_or_else(|e| panic!("fixture '{mode}' failed to open: {e}"))
}

/// Poll until the kernel has forgotten `pid`, i.e. it was killed and reaped.
#[cfg(target_os = "linux")]
async fn wait_for_exit(pid: u32) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if !std::path::Path::new(&format!("/proc/{pid}")).exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

fn driver(params: ServerParameters, timeout: Duration) -> ScenarioDriver {
    ScenarioDriver::new(
        SessionFactory::new(params, options(timeout)),
        ContractExpectations::default(),
    )
}

#[tokio::test]
async fn test_handshake_advertises_tools_and_resources() {
    let mut session = open("normal").await;
    assert_eq!(session.state(), SessionState::Ready);

    let init = session.initialize_result().unwrap();
    assert_eq!(init.server_info.as_ref().unwrap().name, "contract-fixture");
    assert!(ContractVerifier::default().check_capabilities(init).is_ok());

    let exit = session.close().await;
    assert_eq!(exit.and_then(|e| e.code), Some(0));
}

#[tokio::test]
async fn test_shell_listed_once_with_markers() {
    let mut session = open("normal").await;
    let verifier = ContractVerifier::default();

    let first = session.list_tools().await.unwrap().ok().unwrap();
    let second = session.list_tools().await.unwrap().ok().unwrap();
    let shell = verifier.check_required_tool(&first).unwrap();
    verifier.check_tool_description(shell).unwrap();
    verifier
        .check_idempotent("tools/list", &first, &second)
        .unwrap();

    session.close().await;
}

#[tokio::test]
async fn test_every_listed_resource_is_readable_markdown() {
    let mut session = open("normal").await;
    let verifier = ContractVerifier::default();

    let resources = session.list_resources().await.unwrap().ok().unwrap();
    assert_eq!(resources[0].uri, "biomcp://help");
    assert_eq!(resources.len(), 3);
    verifier.check_resource_inventory(&resources).unwrap();

    for resource in &resources {
        let contents = session
            .read_resource(&resource.uri)
            .await
            .unwrap()
            .ok()
            .unwrap();
        verifier
            .check_resource_contents(&resource.uri, &contents)
            .unwrap();
    }

    session.close().await;
}

#[tokio::test]
async fn test_unknown_resource_is_protocol_error_and_session_survives() {
    let mut session = open("normal").await;

    let reply = session
        .read_resource("biomcp://skill/not-a-real-resource")
        .await
        .unwrap();
    let error = reply.error().cloned().unwrap();
    assert_eq!(error.code, -32002);
    assert!(error.message.contains("Unknown resource:"));
    ContractVerifier::default()
        .check_unknown_resource_error(&error)
        .unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert!(matches!(session.ping().await, Ok(Reply::Ok(_))));
    session.close().await;
}

#[tokio::test]
async fn test_overview_only_lists_exactly_the_overview() {
    let mut session = open("overview-only").await;
    let resources = session.list_resources().await.unwrap().ok().unwrap();
    let pairs: Vec<_> = resources
        .iter()
        .map(|r| (r.uri.as_str(), r.name.as_str()))
        .collect();
    assert_eq!(pairs, vec![("biomcp://help", "BioMCP Overview")]);
    session.close().await;
}

#[tokio::test]
async fn test_overview_only_inventory_is_accepted() {
    let report = driver(fixture("overview-only"), Duration::from_secs(10))
        .run_selected(&[Scenario::ResourceInventory, Scenario::ReadEveryResource])
        .await;
    assert!(report.all_passed(), "{report:?}");
}

#[tokio::test]
async fn test_slow_server_times_out_and_poisons_session() {
    let params = fixture("slow").with_var("FIXTURE_DELAY_MS", "30000");
    let mut session = Session::open(&params, options(Duration::from_millis(300)))
        .await
        .unwrap();

    let started = Instant::now();
    let err = session.list_tools().await.unwrap_err();
    assert!(matches!(err, SessionError::Timeout { ref method, .. } if method == "tools/list"));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(session.state(), SessionState::Failed);

    assert!(matches!(
        session.list_resources().await,
        Err(SessionError::Poisoned(_))
    ));

    // Killed rather than waited for
    let started = Instant::now();
    session.close().await;
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_crashing_server_is_transport_error() {
    let mut session = open("crash").await;
    let err = session.list_resources().await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(_)), "{err}");
    assert_eq!(session.state(), SessionState::Failed);

    let exit = session.close().await;
    assert_eq!(exit.and_then(|e| e.code), Some(3));
}

#[tokio::test]
async fn test_garbage_output_is_transport_error() {
    let mut session = open("garbage").await;
    let err = session.list_tools().await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(_)), "{err}");
    session.close().await;
}

#[tokio::test]
async fn test_rejected_handshake() {
    let err = Session::open(&fixture("error-init"), options(Duration::from_secs(10)))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::HandshakeRejected(ref e) if e.code == -32603));
    assert!(!err.is_harness_fault());
}

#[tokio::test]
async fn test_unanswered_handshake_times_out() {
    let started = Instant::now();
    let err = Session::open(&fixture("silent-init"), options(Duration::from_millis(300)))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::Timeout { ref method, .. } if method == "initialize"));
    assert!(err.is_harness_fault());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_failed_handshake_kills_server() {
    let (process, streams) = ServerProcess::spawn(&fixture("silent-init")).unwrap();
    let pid = process.pid().unwrap();
    let mut session = Session::connect(streams, Some(process), options(Duration::from_millis(300)));

    let err = session.initialize().await.err().unwrap();
    assert!(matches!(err, SessionError::Timeout { .. }));
    assert_eq!(session.state(), SessionState::Failed);

    drop(session);
    assert!(wait_for_exit(pid).await, "server {pid} outlived its session");
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_dropping_session_without_close_reaps_server() {
    let session = open("normal").await;
    let pid = session.process().and_then(ServerProcess::pid).unwrap();

    drop(session);
    assert!(wait_for_exit(pid).await, "server {pid} outlived its session");
}

#[tokio::test]
async fn test_closed_session_rejects_calls() {
    let mut session = open("normal").await;
    let exit = session.close().await;
    assert_eq!(exit.and_then(|e| e.code), Some(0));

    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(session.ping().await, Err(SessionError::Closed)));
    assert_eq!(session.close().await, None);
}

#[tokio::test]
async fn test_missing_binary_is_launch_error() {
    let params = ServerParameters::new("/definitely/not/a/real/mcp-server", vec![]);
    let err = Session::open(&params, SessionOptions::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::Launch { .. }));
}

#[tokio::test]
async fn test_empty_command_is_configuration_error() {
    let params = ServerParameters::new("", vec![]);
    let err = Session::open(&params, SessionOptions::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::Configuration(_)));
}

#[tokio::test]
async fn test_doubled_prefix_is_reported() {
    let mut session = open("doubled-prefix").await;
    let resources = session.list_resources().await.unwrap().ok().unwrap();
    let violation = ContractVerifier::default()
        .check_resource_inventory(&resources)
        .unwrap_err();
    assert!(matches!(violation, Violation::DoubledNamePrefix { ref name, .. } if name == "Pattern: Pattern: Variant to Treatment"));
    session.close().await;
}

#[tokio::test]
async fn test_out_of_order_traffic_is_resequenced() {
    let mut session = open("out-of-order").await;
    let tools = session.list_tools().await.unwrap().ok().unwrap();
    assert!(tools.iter().any(|t| t.name == "shell"));
    let resources = session.list_resources().await.unwrap().ok().unwrap();
    assert_eq!(resources.len(), 3);
    session.close().await;
}

#[tokio::test]
async fn test_notifications_and_stderr_noise_are_ignored() {
    let params = fixture("chatty").with_stderr(StderrMode::Capture);
    let mut session = Session::open(&params, options(Duration::from_secs(10)))
        .await
        .unwrap();
    let resources = session.list_resources().await.unwrap().ok().unwrap();
    ContractVerifier::default()
        .check_resource_inventory(&resources)
        .unwrap();
    session.close().await;
}

#[tokio::test]
async fn test_paginated_listings_are_concatenated() {
    let mut session = open("paged").await;
    let tools = session.list_tools().await.unwrap().ok().unwrap();
    assert_eq!(tools.len(), 2);

    let resources = session.list_resources().await.unwrap().ok().unwrap();
    let uris: Vec<_> = resources.iter().map(|r| r.uri.as_str()).collect();
    assert_eq!(
        uris,
        vec![
            "biomcp://help",
            "biomcp://skill/variant-to-treatment",
            "biomcp://skill/trial-matching"
        ]
    );
    session.close().await;
}

#[tokio::test]
async fn test_content_length_replies_are_accepted() {
    let report = driver(fixture("content-length"), Duration::from_secs(10))
        .run_all()
        .await;
    assert!(report.all_passed(), "{report:?}");
}

#[tokio::test]
async fn test_full_suite_passes_against_conforming_server() {
    let report = driver(fixture("normal"), Duration::from_secs(10))
        .run_all()
        .await;
    assert_eq!(report.results.len(), Scenario::ALL.len());
    assert!(report.all_passed(), "{report:?}");
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_contract_breaks_fail_the_matching_scenario() {
    let cases = [
        ("missing-marker", Scenario::ShellDescriptionMarkers),
        ("wrong-mime", Scenario::ReadEveryResource),
        ("unknown-ok", Scenario::UnknownResourceError),
        ("no-resources-cap", Scenario::InitializeCapabilities),
        ("doubled-prefix", Scenario::ResourceInventory),
    ];
    for (mode, scenario) in cases {
        let result = driver(fixture(mode), Duration::from_secs(10))
            .run(scenario)
            .await;
        assert!(
            matches!(result.outcome, Outcome::ServerBroken(_)),
            "{mode}: {:?}",
            result.outcome
        );
    }
}

#[tokio::test]
async fn test_reference_markers_are_checked_when_configured() {
    let result = driver(fixture("normal"), Duration::from_secs(10))
        .with_reference(Some("# Some other document\n".to_string()))
        .run(Scenario::ShellDescriptionMarkers)
        .await;
    assert!(matches!(result.outcome, Outcome::ServerBroken(ref m) if m.contains("reference document")));
}

#[tokio::test]
async fn test_harness_failures_are_not_contract_failures() {
    let report = driver(fixture("crash"), Duration::from_secs(10))
        .run_selected(&[Scenario::InitializeCapabilities, Scenario::ListToolsShell])
        .await;
    assert!(report.results[0].outcome.is_pass());
    assert!(matches!(
        report.results[1].outcome,
        Outcome::HarnessFailure(_)
    ));
    assert_eq!(report.exit_code(), 2);
}
