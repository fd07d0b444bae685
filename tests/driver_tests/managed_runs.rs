//! Stories about MANAGED runs: launch, test, always tear down

use std::net::TcpListener;
use std::sync::Arc;

use t2_client::ClusterResource;
use t2_common::EXIT_CODE_CLUSTER_FAILED;
use t2_testdriver::config::{OperatingMode, TunnelConfig};

use super::fixtures::{
    run, toolbox, AtDelete, Container, FakeT2, RecordingTunnel, TeardownWitness, CLUSTER_ADDRESS,
    PUBLIC_KEY,
};

const TEMPLATE: &str = "name: ${CLUSTER_NAME}\npublicKeys: []\n";

const ACCESS_KUBECONFIG: &str = "\
# access to cluster c1
kubeconfig: |
  apiVersion: v1
  clusters:
  - name: c1
    cluster:
      server: https://10.0.0.1:6443
";

// =============================================================================
// Story: the test script's exit code is the run's exit code
// =============================================================================

#[tokio::test]
async fn story_managed_run_reports_test_result_and_tears_down() {
    let container = Container::new()
        .with_template(TEMPLATE)
        .with_test_script("echo running integration tests\nsleep 1\nexit 4\n");
    let t2 = FakeT2::new()
        .with_resource(ClusterResource::Access, ACCESS_KUBECONFIG)
        .with_resource(ClusterResource::StackableVersions, "operator: 0.1.0\n");

    let code = run(
        container.config(OperatingMode::Managed),
        toolbox(Some(t2.clone()), RecordingTunnel::default()),
    )
    .await;

    assert_eq!(code, 4);
    assert_eq!(t2.deleted(), vec!["c1"]);

    let submitted = t2.definitions();
    assert_eq!(submitted.len(), 1);
    assert!(submitted[0].contains("name: integration"));
    assert!(submitted[0].contains(PUBLIC_KEY));

    assert_eq!(container.read(container.paths.cluster_id_file()), "c1\n");
    assert_eq!(
        container.read(container.paths.cluster_ip_file()),
        format!("{}\n", CLUSTER_ADDRESS)
    );
    assert!(container
        .read(&container.paths.kubeconfig)
        .contains("server: https://10.0.0.1:6443"));
    assert_eq!(container.read(&container.files.stackable_versions), "operator: 0.1.0\n");
}

#[tokio::test]
async fn story_monitoring_brackets_the_test_window() {
    let container = Container::new()
        .with_template(TEMPLATE)
        .with_test_script("sleep 1\n");
    let t2 = FakeT2::new().with_resource(ClusterResource::Access, ACCESS_KUBECONFIG);

    let code = run(
        container.config(OperatingMode::Managed),
        toolbox(Some(t2), RecordingTunnel::default()),
    )
    .await;

    assert_eq!(code, 0);
    assert!(container
        .read(&container.files.pod_changes)
        .contains("pod-watch-started"));
    assert!(container
        .read(&container.files.ping_summary)
        .contains("total # of pings:"));
    assert!(container.read(&container.files.ping_log).contains("OK (42 bytes)."));
    assert_eq!(container.read(&container.files.event_list), "event-list\n");
}

#[tokio::test]
async fn story_output_of_the_test_script_is_kept() {
    let container = Container::new()
        .with_template(TEMPLATE)
        .with_test_script("echo to-stdout\necho to-stderr >&2\n");
    let t2 = FakeT2::new().with_resource(ClusterResource::Access, ACCESS_KUBECONFIG);

    let code = run(
        container.config(OperatingMode::Managed),
        toolbox(Some(t2), RecordingTunnel::default()),
    )
    .await;

    assert_eq!(code, 0);
    let output = container.read(&container.files.test_output);
    assert!(output.contains("to-stdout"));
    assert!(output.contains("to-stderr"));
}

// =============================================================================
// Story: failures still end with a teardown
// =============================================================================

#[tokio::test]
async fn story_failed_launch_is_torn_down_without_running_tests() {
    let container = Container::new()
        .with_template(TEMPLATE)
        .with_test_script("echo must-not-run\n");
    let t2 = FakeT2::new().failing_launch();

    let code = run(
        container.config(OperatingMode::Managed),
        toolbox(Some(t2.clone()), RecordingTunnel::default()),
    )
    .await;

    assert_eq!(code, EXIT_CODE_CLUSTER_FAILED);
    assert_eq!(t2.deleted(), vec!["c1"]);
    assert!(!container.read(&container.files.test_output).contains("must-not-run"));
}

#[tokio::test]
async fn story_missing_access_descriptor_is_torn_down() {
    let container = Container::new()
        .with_template(TEMPLATE)
        .with_test_script("echo must-not-run\n");
    let t2 = FakeT2::new();

    let code = run(
        container.config(OperatingMode::Managed),
        toolbox(Some(t2.clone()), RecordingTunnel::default()),
    )
    .await;

    assert_eq!(code, EXIT_CODE_CLUSTER_FAILED);
    assert_eq!(t2.deleted(), vec!["c1"]);
    assert!(container.read(&container.files.test_output).is_empty());
}

// =============================================================================
// Story: the API is reached through a tunnel
// =============================================================================

#[tokio::test]
async fn story_tunnel_rewrites_kubeconfig_and_uses_the_cluster_address() {
    // stands in for the local end of the forwarded port
    let local_end = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = local_end.local_addr().unwrap().port();
    let access = format!(
        "kubeconfig: |\n  apiVersion: v1\n  clusters:\n  - name: c1\n    cluster:\n      server: https://api.c1.internal:{}\n",
        port
    );
    let container = Container::new()
        .with_template(TEMPLATE)
        .with_test_script("exit 0\n");
    let t2 = FakeT2::new().with_resource(ClusterResource::Access, &access);
    let tunnel = RecordingTunnel::default();
    let mut config = container.config(OperatingMode::Managed);
    config.tunnel = Some(TunnelConfig {
        user: "core".to_string(),
    });

    let code = run(config, toolbox(Some(t2.clone()), tunnel.clone())).await;

    assert_eq!(code, 0);
    assert_eq!(t2.deleted(), vec!["c1"]);
    let requests = tunnel.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].jump_host, CLUSTER_ADDRESS);
    assert_eq!(requests[0].user, "core");
    assert_eq!(requests[0].endpoint.host, "api.c1.internal");
    assert_eq!(requests[0].endpoint.port, port);
    assert!(container
        .read(&container.paths.kubeconfig)
        .contains(&format!("https://127.0.0.1:{}", port)));
}

#[tokio::test]
async fn story_tunnel_and_monitoring_are_gone_before_the_cluster_is_deleted() {
    let local_end = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = local_end.local_addr().unwrap().port();
    let access = format!(
        "kubeconfig: |\n  apiVersion: v1\n  clusters:\n  - name: c1\n    cluster:\n      server: https://api.c1.internal:{}\n",
        port
    );
    let container = Container::new()
        .with_template(TEMPLATE)
        .with_test_script("sleep 1\n");
    let pid_file = container.root().join("tunnel.pid");
    let t2 = FakeT2::new().with_resource(ClusterResource::Access, &access);
    let witness = TeardownWitness::new(t2.clone(), &pid_file, &container.files.ping_summary);
    let mut tools = toolbox(None, RecordingTunnel::default().with_pid_file(&pid_file));
    tools.api = Some(Arc::new(witness.clone()));
    let mut config = container.config(OperatingMode::Managed);
    config.tunnel = Some(TunnelConfig {
        user: "core".to_string(),
    });

    let code = run(config, tools).await;

    assert_eq!(code, 0);
    assert!(pid_file.exists(), "tunnel helper never started");
    assert_eq!(
        witness.seen(),
        vec![AtDelete {
            tunnel_alive: false,
            summary_written: true,
        }]
    );
    assert_eq!(t2.deleted(), vec!["c1"]);
}
