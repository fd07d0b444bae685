//! Stories about runs without a cluster of their own

use std::fs;

use t2_common::EXIT_CODE_CLUSTER_FAILED;
use t2_testdriver::config::OperatingMode;

use super::fixtures::{run, toolbox, Container, RecordingTunnel};

#[tokio::test]
async fn story_none_mode_only_runs_the_tests() {
    let container = Container::new().with_test_script("echo plain\nexit 7\n");

    let code = run(
        container.config(OperatingMode::None),
        toolbox(None, RecordingTunnel::default()),
    )
    .await;

    assert_eq!(code, 7);
    assert!(container.read(&container.files.test_output).contains("plain"));
    assert!(container.read(&container.files.pod_changes).is_empty());
}

#[tokio::test]
async fn story_killed_test_script_reports_the_signal() {
    let container = Container::new().with_test_script("kill -KILL $$\n");

    let code = run(
        container.config(OperatingMode::None),
        toolbox(None, RecordingTunnel::default()),
    )
    .await;

    assert_eq!(code, 128 + 9);
}

#[tokio::test]
async fn story_existing_cluster_with_supplied_kubeconfig() {
    let container = Container::new().with_test_script("exit 0\n");
    fs::create_dir_all(container.paths.kubeconfig.parent().unwrap()).unwrap();
    fs::write(&container.paths.kubeconfig, "apiVersion: v1\n").unwrap();

    let code = run(
        container.config(OperatingMode::Existing),
        toolbox(None, RecordingTunnel::default()),
    )
    .await;

    assert_eq!(code, 0);
    assert!(container
        .read(&container.files.pod_changes)
        .contains("pod-watch-started"));
}

#[tokio::test]
async fn story_existing_cluster_via_access_script() {
    let container = Container::new().with_test_script("exit 0\n");
    let marker = container.root().join("access-granted");
    fs::write(
        &container.paths.access_file,
        format!("# cluster access\naccess_script: |\n  touch {}\n", marker.display()),
    )
    .unwrap();

    let code = run(
        container.config(OperatingMode::Existing),
        toolbox(None, RecordingTunnel::default()),
    )
    .await;

    assert_eq!(code, 0);
    assert!(marker.is_file());
    assert!(container.paths.access_script.is_file());
}

#[tokio::test]
async fn story_unusable_access_file_skips_the_tests() {
    let container = Container::new().with_test_script("echo must-not-run\n");
    fs::write(&container.paths.access_file, "nothing: useful\n").unwrap();

    let code = run(
        container.config(OperatingMode::Existing),
        toolbox(None, RecordingTunnel::default()),
    )
    .await;

    assert_eq!(code, EXIT_CODE_CLUSTER_FAILED);
    assert!(container.read(&container.files.test_output).is_empty());
}
