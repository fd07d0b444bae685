//! Cluster access descriptors
//!
//! The control plane describes how to reach a cluster with a small YAML
//! document: a comment header, then a mapping with either an
//! `access_script` (shell to run) or a `kubeconfig` (to install).

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use serde_yaml::Value;
use tracing::{info, warn};

use crate::paths::DriverPaths;
use crate::script::ScriptRunner;
use crate::{Error, Result};

const ACCESS_SCRIPT_KEY: &str = "access_script";
const KUBECONFIG_KEY: &str = "kubeconfig";

/// How to reach a cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessDescriptor {
    /// Shell script that sets up access when executed
    Script(String),
    /// Kubeconfig to install
    Kubeconfig(String),
}

impl AccessDescriptor {
    /// Parse a descriptor; exactly one of the two keys must be present
    pub fn parse(text: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(text)
            .map_err(|e| Error::access_descriptor(format!("not valid YAML: {}", e)))?;
        if !doc.is_mapping() {
            return Err(Error::access_descriptor("expected a mapping"));
        }

        let field = |key: &str| -> Result<Option<String>> {
            match doc.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(_) => Err(Error::access_descriptor(format!("'{}' must be a string", key))),
            }
        };

        match (field(ACCESS_SCRIPT_KEY)?, field(KUBECONFIG_KEY)?) {
            (Some(script), None) => Ok(Self::Script(script)),
            (None, Some(kubeconfig)) => Ok(Self::Kubeconfig(kubeconfig)),
            (Some(_), Some(_)) => Err(Error::access_descriptor(format!(
                "'{}' and '{}' are mutually exclusive",
                ACCESS_SCRIPT_KEY, KUBECONFIG_KEY
            ))),
            (None, None) => Err(Error::access_descriptor(format!(
                "neither '{}' nor '{}' present",
                ACCESS_SCRIPT_KEY, KUBECONFIG_KEY
            ))),
        }
    }

    /// Read and parse the descriptor at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::access_descriptor(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    /// Set up local access: run the script or install the kubeconfig
    pub async fn apply(&self, paths: &DriverPaths, scripts: &dyn ScriptRunner) -> Result<()> {
        match self {
            Self::Script(script) => {
                info!(path = %paths.access_script.display(), "access file contains an access script, executing it");
                fs::write(&paths.access_script, script)?;
                fs::set_permissions(&paths.access_script, fs::Permissions::from_mode(0o755))?;
                let code = scripts.run(&paths.access_script, None).await?;
                if code != 0 {
                    warn!(exit_code = code, "access script failed");
                }
                Ok(())
            }
            Self::Kubeconfig(kubeconfig) => {
                install_kubeconfig(&paths.kubeconfig, kubeconfig)?;
                info!(path = %paths.kubeconfig.display(), "installed kubeconfig from access file");
                Ok(())
            }
        }
    }
}

/// Write `kubeconfig` to `path`, creating parent directories
pub fn install_kubeconfig(path: &Path, kubeconfig: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, kubeconfig)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}
