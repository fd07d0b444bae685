//! Run sequencing per operating mode
//!
//! The orchestrator owns the exit code of a run. Its one hard rule: once a
//! cluster exists in MANAGED mode, teardown is attempted no matter what
//! failed in between. Monitoring and the tunnel are strictly nested inside
//! that window, so both are gone before the delete request goes out.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use t2_client::{ClusterApi, ClusterResource, T2Client};
use t2_common::{ClusterRecord, EXIT_CODE_CLUSTER_FAILED};

use crate::access::{install_kubeconfig, AccessDescriptor};
use crate::config::{DriverConfig, OperatingMode};
use crate::definition::inject_public_key;
use crate::keygen::{KeyGenerator, SshKeygen};
use crate::lifecycle::{self, PollConfig};
use crate::monitor::{
    ClusterFileWatcher, HealthProbe, KubectlProbe, KubectlWatcher, MonitorSupervisor,
    PingSettings,
};
use crate::output::{fix_ownership, set_owner, OutputFiles};
use crate::script::{
    log_script, wait_for_session_stop, ScriptRunner, ShellScriptRunner, SESSION_POLL_INTERVAL,
};
use crate::template::{EnvSubstRenderer, TemplateRenderer};
use crate::tunnel::{SshTunnel, TunnelHelper, TunnelManager};
use crate::{Error, Result};

/// External collaborators of a run
#[derive(Clone)]
pub struct Toolbox {
    /// Control plane, present in MANAGED, CREATE and DELETE
    pub api: Option<Arc<dyn ClusterApi>>,
    /// SSH key pair generation
    pub keygen: Arc<dyn KeyGenerator>,
    /// Cluster definition templating
    pub renderer: Arc<dyn TemplateRenderer>,
    /// Test and access script execution
    pub scripts: Arc<dyn ScriptRunner>,
    /// Liveness ping
    pub probe: Arc<dyn HealthProbe>,
    /// Watches and snapshots
    pub watcher: Arc<dyn ClusterFileWatcher>,
    /// Tunnel process
    pub tunnel: Arc<dyn TunnelHelper>,
}

impl Toolbox {
    /// The real thing: T2 over HTTP, ssh-keygen, envsubst, sh, kubectl, ssh
    pub fn system(config: &DriverConfig) -> Result<Self> {
        let api = match &config.control_plane {
            Some(cp) => Some(Arc::new(T2Client::new(&cp.url, &cp.token)?) as Arc<dyn ClusterApi>),
            None => None,
        };
        let paths = &config.paths;
        Ok(Self {
            api,
            keygen: Arc::new(SshKeygen),
            renderer: Arc::new(EnvSubstRenderer::from_env()),
            scripts: Arc::new(ShellScriptRunner),
            probe: Arc::new(KubectlProbe::new(&paths.kubeconfig)),
            watcher: Arc::new(KubectlWatcher::new(
                &paths.kubeconfig,
                &paths.client_script,
                paths.ssh_config(),
            )),
            tunnel: Arc::new(SshTunnel),
        })
    }
}

/// Drives one run of the test driver
pub struct Orchestrator {
    config: DriverConfig,
    tools: Toolbox,
    files: OutputFiles,
    ping: PingSettings,
}

impl Orchestrator {
    /// Orchestrator for a validated configuration
    pub fn new(config: DriverConfig, tools: Toolbox) -> Self {
        let files = OutputFiles::new(&config.paths.target_dir);
        Self {
            config,
            tools,
            files,
            ping: PingSettings::default(),
        }
    }

    /// Override the ping loop timing
    pub fn with_ping_settings(mut self, ping: PingSettings) -> Self {
        self.ping = ping;
        self
    }

    /// Execute the run and return the process exit code
    pub async fn run(&self) -> i32 {
        if let Some(owner) = self.config.ownership {
            fix_ownership(&self.config.paths.target_dir, owner);
        }
        if let Err(e) = self.files.reset(self.config.ownership) {
            error!(error = %e, "failed to initialize output files");
            return EXIT_CODE_CLUSTER_FAILED;
        }

        info!(mode = %self.config.mode, interactive = self.config.interactive, "starting T2 test driver");
        let code = match self.config.mode {
            OperatingMode::None => {
                info!("operating without any cluster");
                self.run_tests().await
            }
            OperatingMode::Existing => self.run_existing().await,
            OperatingMode::Managed => self.run_managed().await,
            OperatingMode::Create => self.run_create().await,
            OperatingMode::Delete => self.run_delete().await,
        };

        // the test script may have left files owned by root
        if let Some(owner) = self.config.ownership {
            fix_ownership(&self.config.paths.target_dir, owner);
        }
        info!(exit_code = code, "T2 test driver finished");
        code
    }

    fn api(&self) -> Result<&dyn ClusterApi> {
        self.tools
            .api
            .as_deref()
            .ok_or_else(|| Error::config(format!("cluster mode {} needs a control plane", self.config.mode)))
    }

    // =========================================================================
    // Modes
    // =========================================================================

    async fn run_existing(&self) -> i32 {
        info!("operating on an existing cluster");
        match self.connect_existing().await {
            Ok(()) => self.monitored_tests().await,
            Err(e) => {
                error!(error = %e, "cannot connect to the existing cluster");
                EXIT_CODE_CLUSTER_FAILED
            }
        }
    }

    async fn run_managed(&self) -> i32 {
        info!("launching a new managed cluster");
        let api = match self.api() {
            Ok(api) => api,
            Err(e) => {
                error!(error = %e, "cannot launch cluster");
                return EXIT_CODE_CLUSTER_FAILED;
            }
        };

        let mut cluster_id = None;
        let launched = self.launch(api, &mut cluster_id).await;
        // nothing to tear down when the cluster was never created
        let Some(cluster_id) = cluster_id else {
            return EXIT_CODE_CLUSTER_FAILED;
        };

        let outcome = match launched {
            Ok(running) => self.use_managed_cluster(api, &running).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            error!(cluster_id = %cluster_id, error = %e, "managed cluster run failed");
        }

        let teardown = self.teardown(api, &cluster_id).await;
        match (outcome, teardown) {
            (Ok(code), Ok(())) => code,
            _ => EXIT_CODE_CLUSTER_FAILED,
        }
    }

    async fn run_create(&self) -> i32 {
        info!("launching a new cluster (create only, not managed)");
        let api = match self.api() {
            Ok(api) => api,
            Err(e) => {
                error!(error = %e, "cannot launch cluster");
                return EXIT_CODE_CLUSTER_FAILED;
            }
        };

        let mut cluster_id = None;
        let launched = self.launch(api, &mut cluster_id).await;
        let Some(cluster_id) = cluster_id else {
            return EXIT_CODE_CLUSTER_FAILED;
        };

        let handed_off = match launched {
            Ok(running) => self.hand_off(api, &running).await,
            Err(e) => Err(e),
        };
        match handed_off {
            Ok(()) => {
                info!(cluster_id = %cluster_id, "cluster is running and handed off");
                0
            }
            Err(e) => {
                // an unusable cluster would only run up costs
                error!(cluster_id = %cluster_id, error = %e, "cluster cannot be handed off, tearing it down");
                let _ = self.teardown(api, &cluster_id).await;
                EXIT_CODE_CLUSTER_FAILED
            }
        }
    }

    async fn run_delete(&self) -> i32 {
        let api = match self.api() {
            Ok(api) => api,
            Err(e) => {
                error!(error = %e, "cannot delete cluster");
                return EXIT_CODE_CLUSTER_FAILED;
            }
        };
        let cluster_id = match self.cluster_to_delete() {
            Some(id) => id,
            None => {
                error!("no cluster ID given and none persisted");
                return EXIT_CODE_CLUSTER_FAILED;
            }
        };

        match self.teardown(api, &cluster_id).await {
            Ok(()) => 0,
            Err(_) => EXIT_CODE_CLUSTER_FAILED,
        }
    }

    // =========================================================================
    // Cluster lifecycle
    // =========================================================================

    /// Prepare the definition, create the cluster and wait until it runs.
    ///
    /// `cluster_id` is set as soon as the control plane accepted the
    /// definition, whatever happens afterwards.
    async fn launch(&self, api: &dyn ClusterApi, cluster_id: &mut Option<String>) -> Result<ClusterRecord> {
        let definition = self.prepare_definition().await.inspect_err(|e| {
            error!(error = %e, "failed to prepare cluster definition");
        })?;

        let config = PollConfig::launch(&self.config.timeouts);
        let running = lifecycle::launch(api, &definition, &config, |created| {
            self.persist(&self.config.paths.cluster_id_file(), &created.id);
            *cluster_id = Some(created.id.clone());
        })
        .await?;

        info!(cluster_id = %running.id, address = ?running.ipv4_address, "cluster is up and running");
        if let Some(ip) = &running.ipv4_address {
            self.persist(&self.config.paths.cluster_ip_file(), ip);
        }
        Ok(running)
    }

    async fn teardown(&self, api: &dyn ClusterApi, cluster_id: &str) -> Result<()> {
        info!(cluster_id = %cluster_id, "terminating the cluster");
        let config = PollConfig::terminate(&self.config.timeouts);
        match lifecycle::terminate(api, cluster_id, &config).await {
            Ok(_) => {
                info!(cluster_id = %cluster_id, "cluster is terminated");
                Ok(())
            }
            Err(e) => {
                error!(cluster_id = %cluster_id, error = %e, "cluster termination failed");
                Err(e)
            }
        }
    }

    fn cluster_to_delete(&self) -> Option<String> {
        if let Some(id) = &self.config.delete_cluster_id {
            return Some(id.clone());
        }
        let persisted = fs::read_to_string(self.config.paths.cluster_id_file()).ok()?;
        let id = persisted.trim();
        (!id.is_empty()).then(|| id.to_string())
    }

    /// Render the template, add a fresh public key and keep copies of the
    /// result in the working directory and the output folder
    async fn prepare_definition(&self) -> Result<String> {
        let paths = &self.config.paths;

        if paths.work_dir.exists() {
            fs::remove_dir_all(&paths.work_dir)?;
        }
        fs::create_dir_all(&paths.work_dir)?;

        let template = fs::read_to_string(&paths.definition_template)?;
        let rendered = self.tools.renderer.render(&template)?;
        fs::write(paths.target_definition(), &rendered)?;
        if let Some(owner) = self.config.ownership {
            set_owner(&paths.target_definition(), owner);
        }

        let public_key = self.tools.keygen.generate(&paths.private_key()).await?;
        let definition = inject_public_key(&rendered, &self.config.public_keys_path, &public_key)?;
        fs::write(paths.cluster_definition(), &definition)?;
        info!("cluster definition:\n\n{}", definition);
        Ok(definition)
    }

    fn persist(&self, path: &Path, value: &str) {
        if let Err(e) = fs::write(path, format!("{}\n", value)) {
            warn!(path = %path.display(), error = %e, "failed to persist cluster metadata");
        }
    }

    // =========================================================================
    // Cluster access
    // =========================================================================

    /// Fetch the cluster's resources; a missing resource is not fatal here
    async fn download_resources(&self, api: &dyn ClusterApi, cluster_id: &str) {
        let paths = &self.config.paths;
        let downloads = [
            (ClusterResource::StackableClientScript, paths.downloaded_client_script.as_path()),
            (ClusterResource::SshConfig, paths.downloaded_ssh_config.as_path()),
            (ClusterResource::StackableVersions, self.files.stackable_versions.as_path()),
            (ClusterResource::Access, paths.access_file.as_path()),
        ];

        for (resource, destination) in downloads {
            info!(%resource, "downloading cluster resource");
            let content = match api.download_resource(cluster_id, resource).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(%resource, error = %e, "cluster resource not available");
                    continue;
                }
            };
            let written = destination
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|()| fs::write(destination, content));
            if let Err(e) = written {
                warn!(%resource, path = %destination.display(), error = %e, "failed to store cluster resource");
            }
        }
    }

    fn install_client_script(&self) -> Result<()> {
        let paths = &self.config.paths;
        if !paths.downloaded_client_script.is_file() {
            info!("Stackable client script not available on this cluster");
            return Ok(());
        }
        if let Some(parent) = paths.client_script.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&paths.downloaded_client_script, &paths.client_script)?;
        fs::set_permissions(&paths.client_script, fs::Permissions::from_mode(0o755))?;
        info!(path = %paths.client_script.display(), "Stackable client script installed");
        Ok(())
    }

    fn configure_ssh(&self) -> Result<()> {
        let paths = &self.config.paths;
        if !paths.downloaded_ssh_config.is_file() {
            info!("SSH not configurable for this cluster");
            return Ok(());
        }
        fs::create_dir_all(&paths.ssh_dir)?;
        let install = |from: &Path, to: &Path, mode: u32| -> Result<()> {
            fs::copy(from, to)?;
            fs::set_permissions(to, fs::Permissions::from_mode(mode))?;
            Ok(())
        };
        install(&paths.downloaded_ssh_config, &paths.ssh_config(), 0o600)?;
        install(&paths.private_key(), &paths.ssh_dir.join("id_rsa"), 0o600)?;
        install(&paths.public_key(), &paths.ssh_dir.join("id_rsa.pub"), 0o644)?;
        info!("SSH configured to work directly with all cluster nodes");
        Ok(())
    }

    async fn connect_existing(&self) -> Result<()> {
        let paths = &self.config.paths;
        if paths.kubeconfig.is_file() {
            info!(path = %paths.kubeconfig.display(), "using the supplied kubeconfig");
            return Ok(());
        }
        info!(path = %paths.access_file.display(), "using the supplied cluster access file");
        AccessDescriptor::load(&paths.access_file)?
            .apply(paths, self.tools.scripts.as_ref())
            .await
    }

    /// Set up access to a freshly launched cluster, through the tunnel if
    /// one is configured
    async fn connect_managed(
        &self,
        api: &dyn ClusterApi,
        cluster: &ClusterRecord,
        tunnel: &mut TunnelManager,
    ) -> Result<()> {
        let paths = &self.config.paths;
        let descriptor = AccessDescriptor::load(&paths.access_file)?;

        let Some(settings) = &self.config.tunnel else {
            return descriptor.apply(paths, self.tools.scripts.as_ref()).await;
        };

        let kubeconfig = match descriptor {
            AccessDescriptor::Kubeconfig(kubeconfig) => kubeconfig,
            AccessDescriptor::Script(_) => {
                api.download_resource(&cluster.id, ClusterResource::Kubeconfig)
                    .await?
            }
        };
        let jump_host = cluster
            .ipv4_address
            .as_deref()
            .ok_or_else(|| Error::tunnel("cluster has no public address to tunnel through"))?;

        let opened = tunnel
            .open(&kubeconfig, &paths.private_key(), jump_host, &settings.user)
            .await?;
        install_kubeconfig(&paths.kubeconfig, &opened.kubeconfig)?;
        let (host, port) = opened.remote_address();
        info!(host, port, "cluster API reachable through the tunnel");
        Ok(())
    }

    async fn use_managed_cluster(&self, api: &dyn ClusterApi, cluster: &ClusterRecord) -> Result<i32> {
        self.download_resources(api, &cluster.id).await;
        if let Err(e) = self.install_client_script() {
            warn!(error = %e, "failed to install the Stackable client script");
        }
        if let Err(e) = self.configure_ssh() {
            warn!(error = %e, "failed to configure SSH");
        }

        let mut tunnel = TunnelManager::new(self.tools.tunnel.clone());
        let result = match self.connect_managed(api, cluster, &mut tunnel).await {
            Ok(()) => Ok(self.monitored_tests().await),
            Err(e) => Err(e),
        };
        tunnel.close().await;
        result
    }

    /// CREATE: make sure the consumer gets a usable access file
    async fn hand_off(&self, api: &dyn ClusterApi, cluster: &ClusterRecord) -> Result<()> {
        self.download_resources(api, &cluster.id).await;
        let paths = &self.config.paths;
        AccessDescriptor::load(&paths.access_file)?;
        fs::copy(&paths.access_file, paths.target_access_file())?;
        if let Some(owner) = self.config.ownership {
            set_owner(&paths.target_access_file(), owner);
        }
        info!(path = %paths.target_access_file().display(), "access file copied to the output folder");
        Ok(())
    }

    // =========================================================================
    // Test window
    // =========================================================================

    /// Run the tests or wait for the interactive session to end
    async fn run_tests(&self) -> i32 {
        let paths = &self.config.paths;
        if self.config.interactive {
            info!("interactive mode, stop the session to end the run");
            wait_for_session_stop(&paths.session_stopped, SESSION_POLL_INTERVAL).await;
            return 0;
        }

        log_script(&paths.test_script);
        info!("starting test script");
        match self
            .tools
            .scripts
            .run(&paths.test_script, Some(self.files.test_output.as_path()))
            .await
        {
            Ok(code) => {
                info!(exit_code = code, "test script terminated");
                code
            }
            Err(e) => {
                error!(error = %e, "test script could not be run");
                EXIT_CODE_CLUSTER_FAILED
            }
        }
    }

    /// Run the tests with monitoring around them, then take snapshots
    async fn monitored_tests(&self) -> i32 {
        let mut monitor = MonitorSupervisor::new(self.files.clone(), self.ping);
        info!("starting Kubernetes cluster monitoring");
        if let Err(e) = monitor.start(self.tools.watcher.as_ref(), self.tools.probe.clone()) {
            warn!(error = %e, "monitoring not started");
        }

        let code = self.run_tests().await;

        info!("stopping all background tasks");
        if let Some(summary) = monitor.stop().await {
            info!(pings = summary.total(), failed = summary.total() - summary.successes, "all background tasks are stopped");
        }

        monitor.snapshot(self.tools.watcher.as_ref()).await;
        code
    }
}
