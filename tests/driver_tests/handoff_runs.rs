//! Stories about CREATE and DELETE: a cluster outlives the run

use std::fs;

use t2_client::ClusterResource;
use t2_common::EXIT_CODE_CLUSTER_FAILED;
use t2_testdriver::config::OperatingMode;

use super::fixtures::{run, toolbox, Container, FakeT2, RecordingTunnel};

const ACCESS: &str = "access_script: echo connect\n";

#[tokio::test]
async fn story_create_leaves_a_running_cluster_and_its_access_file() {
    let container = Container::new().with_template("publicKeys: []\n");
    let t2 = FakeT2::new().with_resource(ClusterResource::Access, ACCESS);

    let code = run(
        container.config(OperatingMode::Create),
        toolbox(Some(t2.clone()), RecordingTunnel::default()),
    )
    .await;

    assert_eq!(code, 0);
    assert!(t2.deleted().is_empty());
    assert_eq!(container.read(container.paths.target_access_file()), ACCESS);
    assert_eq!(container.read(container.paths.cluster_id_file()), "c1\n");
    assert!(container.read(container.paths.target_definition()).contains("publicKeys"));
}

#[tokio::test]
async fn story_create_without_access_file_tears_down() {
    let container = Container::new().with_template("publicKeys: []\n");
    let t2 = FakeT2::new();

    let code = run(
        container.config(OperatingMode::Create),
        toolbox(Some(t2.clone()), RecordingTunnel::default()),
    )
    .await;

    assert_eq!(code, EXIT_CODE_CLUSTER_FAILED);
    assert_eq!(t2.deleted(), vec!["c1"]);
}

#[tokio::test]
async fn story_delete_terminates_the_given_cluster() {
    let container = Container::new();
    let t2 = FakeT2::new();
    let mut config = container.config(OperatingMode::Delete);
    config.delete_cluster_id = Some("c9".to_string());

    let code = run(config, toolbox(Some(t2.clone()), RecordingTunnel::default())).await;

    assert_eq!(code, 0);
    assert_eq!(t2.deleted(), vec!["c9"]);
    assert!(t2.definitions().is_empty());
}

#[tokio::test]
async fn story_delete_picks_up_the_cluster_of_a_create_run() {
    let container = Container::new();
    fs::create_dir_all(&container.paths.work_dir).unwrap();
    fs::write(container.paths.cluster_id_file(), "c1\n").unwrap();
    let t2 = FakeT2::new();

    let code = run(
        container.config(OperatingMode::Delete),
        toolbox(Some(t2.clone()), RecordingTunnel::default()),
    )
    .await;

    assert_eq!(code, 0);
    assert_eq!(t2.deleted(), vec!["c1"]);
}
