//! Shared fixtures for driver runs

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tokio::process::Command;

use t2_client::{ClusterApi, ClusterResource};
use t2_common::{ClusterRecord, ClusterState, Error, Result};
use t2_testdriver::config::{DriverConfig, LifecycleTimeouts, OperatingMode};
use t2_testdriver::definition::KeyPath;
use t2_testdriver::keygen::{public_key_path, KeyGenerator};
use t2_testdriver::monitor::{ClusterFileWatcher, HealthProbe, PingOutcome, PingSettings, WatchSpec};
use t2_testdriver::orchestrator::{Orchestrator, Toolbox};
use t2_testdriver::output::OutputFiles;
use t2_testdriver::paths::DriverPaths;
use t2_testdriver::script::ShellScriptRunner;
use t2_testdriver::template::EnvSubstRenderer;
use t2_testdriver::tunnel::{TunnelHelper, TunnelRequest};

/// Public address the scripted control plane reports
pub const CLUSTER_ADDRESS: &str = "203.0.113.10";

/// Public key line handed out by [`FakeKeys`]
pub const PUBLIC_KEY: &str = "ssh-rsa AAAAFAKE";

// =============================================================================
// Container layout
// =============================================================================

/// A temporary container root with an output folder
pub struct Container {
    _dir: tempfile::TempDir,
    pub paths: DriverPaths,
    pub files: OutputFiles,
}

impl Container {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = DriverPaths::with_root(dir.path());
        fs::create_dir_all(&paths.target_dir).unwrap();
        let files = OutputFiles::new(&paths.target_dir);
        Self {
            _dir: dir,
            paths,
            files,
        }
    }

    pub fn with_test_script(self, script: &str) -> Self {
        fs::write(&self.paths.test_script, script).unwrap();
        self
    }

    pub fn with_template(self, template: &str) -> Self {
        fs::write(&self.paths.definition_template, template).unwrap();
        self
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn config(&self, mode: OperatingMode) -> DriverConfig {
        DriverConfig {
            mode,
            interactive: false,
            ownership: None,
            control_plane: None,
            delete_cluster_id: None,
            timeouts: LifecycleTimeouts {
                launch: Duration::from_secs(10),
                terminate: Duration::from_secs(10),
                poll_interval: Duration::from_millis(20),
            },
            public_keys_path: KeyPath::default(),
            tunnel: None,
            paths: self.paths.clone(),
        }
    }

    pub fn read(&self, path: impl AsRef<Path>) -> String {
        fs::read_to_string(path).unwrap_or_default()
    }
}

// =============================================================================
// Scripted control plane
// =============================================================================

#[derive(Default)]
struct Plane {
    state: Option<ClusterState>,
    polls_until_running: u32,
    fail_launch: bool,
    definitions: Vec<String>,
    deleted: Vec<String>,
    resources: HashMap<&'static str, String>,
}

/// In-memory control plane with a single cluster `c1`
#[derive(Clone, Default)]
pub struct FakeT2 {
    plane: Arc<Mutex<Plane>>,
}

impl FakeT2 {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.plane.lock().unwrap().polls_until_running = 2;
        fake
    }

    /// Serve `content` for `resource`
    pub fn with_resource(self, resource: ClusterResource, content: &str) -> Self {
        self.plane
            .lock()
            .unwrap()
            .resources
            .insert(resource.as_str(), content.to_string());
        self
    }

    /// The launched cluster fails instead of reaching RUNNING
    pub fn failing_launch(self) -> Self {
        self.plane.lock().unwrap().fail_launch = true;
        self
    }

    pub fn definitions(&self) -> Vec<String> {
        self.plane.lock().unwrap().definitions.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.plane.lock().unwrap().deleted.clone()
    }

    fn record(id: &str, state: ClusterState, failed: bool) -> ClusterRecord {
        ClusterRecord {
            ipv4_address: Some(CLUSTER_ADDRESS.to_string()),
            ..ClusterRecord::new(id, state, failed)
        }
    }
}

#[async_trait]
impl ClusterApi for FakeT2 {
    async fn create(&self, definition: &str) -> Result<ClusterRecord> {
        let mut plane = self.plane.lock().unwrap();
        plane.definitions.push(definition.to_string());
        plane.state = Some(ClusterState::Launching);
        Ok(Self::record("c1", ClusterState::Launching, false))
    }

    async fn get(&self, id: &str) -> Result<ClusterRecord> {
        let mut plane = self.plane.lock().unwrap();
        let state = match plane.state {
            Some(ClusterState::Launching) if plane.fail_launch => {
                return Ok(Self::record(id, ClusterState::Failed, true));
            }
            Some(ClusterState::Launching) if plane.polls_until_running > 0 => {
                plane.polls_until_running -= 1;
                ClusterState::Launching
            }
            Some(ClusterState::Launching) => ClusterState::Running,
            Some(ClusterState::Terminating) => ClusterState::Terminated,
            Some(state) => state,
            None => return Err(Error::control_plane("get cluster", 404, "unknown cluster")),
        };
        plane.state = Some(state);
        Ok(Self::record(id, state, false))
    }

    async fn delete(&self, id: &str) -> Result<ClusterRecord> {
        let mut plane = self.plane.lock().unwrap();
        plane.deleted.push(id.to_string());
        plane.state = Some(ClusterState::Terminating);
        Ok(Self::record(id, ClusterState::Terminating, false))
    }

    async fn download_resource(&self, _id: &str, resource: ClusterResource) -> Result<String> {
        self.plane
            .lock()
            .unwrap()
            .resources
            .get(resource.as_str())
            .cloned()
            .ok_or_else(|| Error::control_plane("download resource", 404, "not found"))
    }

    async fn list(&self) -> Result<Vec<ClusterRecord>> {
        Ok(Vec::new())
    }
}

// =============================================================================
// Tool stand-ins
// =============================================================================

/// Writes a dummy key pair instead of calling ssh-keygen
pub struct FakeKeys;

#[async_trait]
impl KeyGenerator for FakeKeys {
    async fn generate(&self, private_key: &Path) -> Result<String> {
        fs::write(private_key, "-----BEGIN FAKE KEY-----\n")?;
        fs::write(public_key_path(private_key), format!("{}\n", PUBLIC_KEY))?;
        Ok(PUBLIC_KEY.to_string())
    }
}

/// A cluster that always answers
pub struct HealthyCluster;

#[async_trait]
impl HealthProbe for HealthyCluster {
    async fn probe(&self) -> PingOutcome {
        PingOutcome::Success { bytes: 42 }
    }
}

/// Shell commands standing in for kubectl watches and event dumps
pub struct ShellWatcher;

fn sh(name: &str, script: &str, output: &Path) -> WatchSpec {
    WatchSpec {
        name: name.to_string(),
        program: PathBuf::from("sh"),
        args: vec!["-c".to_string(), script.to_string()],
        output: output.to_path_buf(),
    }
}

impl ClusterFileWatcher for ShellWatcher {
    fn watches(&self, files: &OutputFiles) -> Vec<WatchSpec> {
        vec![sh("pods", "echo pod-watch-started; exec sleep 60", &files.pod_changes)]
    }

    fn snapshots(&self, files: &OutputFiles) -> Vec<WatchSpec> {
        vec![sh("events", "echo event-list", &files.event_list)]
    }
}

/// Records tunnel requests and keeps a sleeping process as the helper
#[derive(Clone, Default)]
pub struct RecordingTunnel {
    pub requests: Arc<Mutex<Vec<TunnelRequest>>>,
    pid_file: Option<PathBuf>,
}

impl RecordingTunnel {
    /// The helper writes its pid to `pid_file` before sleeping
    pub fn with_pid_file(mut self, pid_file: &Path) -> Self {
        self.pid_file = Some(pid_file.to_path_buf());
        self
    }
}

impl TunnelHelper for RecordingTunnel {
    fn command(&self, request: &TunnelRequest) -> Command {
        self.requests.lock().unwrap().push(request.clone());
        match &self.pid_file {
            Some(pid_file) => {
                let mut command = Command::new("sh");
                command
                    .arg("-c")
                    .arg(format!("echo $$ > {}; exec sleep 60", pid_file.display()));
                command
            }
            None => {
                let mut command = Command::new("sleep");
                command.arg("60");
                command
            }
        }
    }
}

/// What the container looked like when the cluster delete was requested
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AtDelete {
    pub tunnel_alive: bool,
    pub summary_written: bool,
}

/// Wraps [`FakeT2`] and inspects the container on delete
#[derive(Clone)]
pub struct TeardownWitness {
    inner: FakeT2,
    pid_file: PathBuf,
    ping_summary: PathBuf,
    seen: Arc<Mutex<Vec<AtDelete>>>,
}

impl TeardownWitness {
    pub fn new(inner: FakeT2, pid_file: &Path, ping_summary: &Path) -> Self {
        Self {
            inner,
            pid_file: pid_file.to_path_buf(),
            ping_summary: ping_summary.to_path_buf(),
            seen: Arc::default(),
        }
    }

    pub fn seen(&self) -> Vec<AtDelete> {
        self.seen.lock().unwrap().clone()
    }

    fn tunnel_alive(&self) -> bool {
        fs::read_to_string(&self.pid_file)
            .ok()
            .and_then(|pid| pid.trim().parse::<i32>().ok())
            .map(|pid| kill(Pid::from_raw(pid), None).is_ok())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ClusterApi for TeardownWitness {
    async fn create(&self, definition: &str) -> Result<ClusterRecord> {
        self.inner.create(definition).await
    }

    async fn get(&self, id: &str) -> Result<ClusterRecord> {
        self.inner.get(id).await
    }

    async fn delete(&self, id: &str) -> Result<ClusterRecord> {
        let summary = fs::read_to_string(&self.ping_summary).unwrap_or_default();
        let seen = AtDelete {
            tunnel_alive: self.tunnel_alive(),
            summary_written: summary.contains("total # of pings:"),
        };
        self.seen.lock().unwrap().push(seen);
        self.inner.delete(id).await
    }

    async fn download_resource(&self, id: &str, resource: ClusterResource) -> Result<String> {
        self.inner.download_resource(id, resource).await
    }

    async fn list(&self) -> Result<Vec<ClusterRecord>> {
        self.inner.list().await
    }
}

/// Tools for a run against `api`
pub fn toolbox(api: Option<FakeT2>, tunnel: RecordingTunnel) -> Toolbox {
    Toolbox {
        api: api.map(|api| Arc::new(api) as Arc<dyn ClusterApi>),
        keygen: Arc::new(FakeKeys),
        renderer: Arc::new(EnvSubstRenderer::with_lookup(|name| {
            (name == "CLUSTER_NAME").then(|| "integration".to_string())
        })),
        scripts: Arc::new(ShellScriptRunner),
        probe: Arc::new(HealthyCluster),
        watcher: Arc::new(ShellWatcher),
        tunnel: Arc::new(tunnel),
    }
}

/// Run the driver with fast ping settings
pub async fn run(config: DriverConfig, tools: Toolbox) -> i32 {
    Orchestrator::new(config, tools)
        .with_ping_settings(PingSettings {
            interval: Duration::from_millis(50),
            attempt_timeout: Duration::from_secs(1),
        })
        .run()
        .await
}
