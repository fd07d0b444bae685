//! Filesystem layout of the driver container
//!
//! Every location is resolved below a configurable root so the whole layout
//! can be redirected into a temporary directory.

use std::path::{Path, PathBuf};

/// Locations the driver reads from and writes to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverPaths {
    /// Root all container paths are resolved against
    pub root: PathBuf,
    /// Output folder volume (`/target`)
    pub target_dir: PathBuf,
    /// Cluster definition template (`/cluster.yaml`)
    pub definition_template: PathBuf,
    /// Test script (`/test.sh`)
    pub test_script: PathBuf,
    /// Kubeconfig used by kubectl (`/root/.kube/config`)
    pub kubeconfig: PathBuf,
    /// Cluster access descriptor (`/access.yaml`)
    pub access_file: PathBuf,
    /// Access script extracted from the descriptor (`/access.sh`)
    pub access_script: PathBuf,
    /// Marker that ends an interactive session (`/session_stopped`)
    pub session_stopped: PathBuf,
    /// Downloaded Stackable client script (`/tmp/stackable.sh`)
    pub downloaded_client_script: PathBuf,
    /// Downloaded SSH config (`/tmp/ssh-config`)
    pub downloaded_ssh_config: PathBuf,
    /// Installed Stackable client script (`/usr/bin/stackable`)
    pub client_script: PathBuf,
    /// SSH directory of the container user (`/root/.ssh`)
    pub ssh_dir: PathBuf,
    /// Cluster metadata directory (`.cluster`)
    pub work_dir: PathBuf,
}

impl DriverPaths {
    /// Resolve the layout below `root`.
    ///
    /// A relative `work_dir` is resolved against `root` as well.
    pub fn new(root: &Path, work_dir: &Path) -> Self {
        let at = |relative: &str| root.join(relative);
        Self {
            root: root.to_path_buf(),
            target_dir: at("target"),
            definition_template: at("cluster.yaml"),
            test_script: at("test.sh"),
            kubeconfig: at("root/.kube/config"),
            access_file: at("access.yaml"),
            access_script: at("access.sh"),
            session_stopped: at("session_stopped"),
            downloaded_client_script: at("tmp/stackable.sh"),
            downloaded_ssh_config: at("tmp/ssh-config"),
            client_script: at("usr/bin/stackable"),
            ssh_dir: at("root/.ssh"),
            work_dir: root.join(work_dir),
        }
    }

    /// Layout below `root` with the default working directory
    pub fn with_root(root: &Path) -> Self {
        Self::new(root, Path::new(".cluster"))
    }

    /// Generated private key
    pub fn private_key(&self) -> PathBuf {
        self.work_dir.join("key")
    }

    /// Generated public key
    pub fn public_key(&self) -> PathBuf {
        self.work_dir.join("key.pub")
    }

    /// Definition as submitted to the control plane
    pub fn cluster_definition(&self) -> PathBuf {
        self.work_dir.join("cluster.yaml")
    }

    /// Persisted cluster identifier
    pub fn cluster_id_file(&self) -> PathBuf {
        self.work_dir.join("uuid")
    }

    /// Persisted cluster address
    pub fn cluster_ip_file(&self) -> PathBuf {
        self.work_dir.join("ip")
    }

    /// Rendered definition copy for the user
    pub fn target_definition(&self) -> PathBuf {
        self.target_dir.join("cluster.yaml")
    }

    /// Access descriptor handed off in CREATE mode
    pub fn target_access_file(&self) -> PathBuf {
        self.target_dir.join("access.yaml")
    }

    /// SSH client config installed for the container user
    pub fn ssh_config(&self) -> PathBuf {
        self.ssh_dir.join("config")
    }

    /// Driver log inside the output folder
    pub fn driver_log(&self) -> PathBuf {
        self.target_dir.join(crate::output::DRIVER_LOG)
    }
}
