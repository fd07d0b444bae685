//! Remote cluster client
//!
//! Endpoints consumed:
//! - `POST   /api/clusters`                   create from a YAML definition
//! - `GET    /api/clusters`                   list all clusters
//! - `GET    /api/clusters/{id}`              current record
//! - `DELETE /api/clusters/{id}`              request termination
//! - `GET    /api/clusters/{id}/{resource}`   raw cluster resource

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder};
use tracing::debug;

use t2_common::{ClusterRecord, Error, Result, TOKEN_HEADER};

/// Upper bound for a single API round trip
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Resources the control plane serves per cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterResource {
    /// Shell script wrapping SSH access to the cluster nodes
    StackableClientScript,
    /// SSH client configuration for all nodes
    SshConfig,
    /// Version sheet of the installed Stackable components
    StackableVersions,
    /// Access descriptor (access script or kubeconfig)
    Access,
    /// Plain kubeconfig
    Kubeconfig,
}

impl ClusterResource {
    /// Path segment used by the API
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StackableClientScript => "stackable-client-script",
            Self::SshConfig => "ssh-config",
            Self::StackableVersions => "stackable-versions",
            Self::Access => "access",
            Self::Kubeconfig => "kubeconfig",
        }
    }
}

impl fmt::Display for ClusterResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations against the cluster management API
///
/// Abstracted so the lifecycle code can be driven by scripted responses.
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Submit a cluster definition (YAML) and return the new record
    async fn create(&self, definition: &str) -> Result<ClusterRecord>;

    /// Fetch the current record of a cluster
    async fn get(&self, id: &str) -> Result<ClusterRecord>;

    /// Request termination of a cluster
    async fn delete(&self, id: &str) -> Result<ClusterRecord>;

    /// Download a raw cluster resource as text
    async fn download_resource(&self, id: &str, resource: ClusterResource) -> Result<String>;

    /// List all clusters visible to the token
    async fn list(&self) -> Result<Vec<ClusterRecord>>;
}

/// [`ClusterApi`] over HTTP
#[derive(Clone)]
pub struct T2Client {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for T2Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("T2Client")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl T2Client {
    /// Create a client for the given base URL (e.g. `https://t2.stackable.tech`)
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_http_client(http, base_url, token))
    }

    /// Create a client around an existing reqwest client
    pub fn with_http_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Base URL all API paths are appended to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/clusters{}", self.base_url, path);
        debug!(%method, %url, "T2 API request");
        self.http
            .request(method, url)
            .header(TOKEN_HEADER, &self.token)
    }

    /// Send a request and return the body of a successful response
    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<String> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(operation, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(operation, format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("no reason").to_string()
            } else {
                body
            };
            return Err(Error::control_plane(operation, status.as_u16(), message));
        }

        Ok(body)
    }

    async fn send_record(&self, operation: &str, request: RequestBuilder) -> Result<ClusterRecord> {
        let body = self.send(operation, request).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl ClusterApi for T2Client {
    async fn create(&self, definition: &str) -> Result<ClusterRecord> {
        let request = self
            .request(Method::POST, "")
            .header(CONTENT_TYPE, "application/yaml")
            .body(definition.to_string());
        self.send_record("create cluster", request).await
    }

    async fn get(&self, id: &str) -> Result<ClusterRecord> {
        let request = self.request(Method::GET, &format!("/{}", id));
        self.send_record("get cluster", request).await
    }

    async fn delete(&self, id: &str) -> Result<ClusterRecord> {
        let request = self.request(Method::DELETE, &format!("/{}", id));
        self.send_record("delete cluster", request).await
    }

    async fn download_resource(&self, id: &str, resource: ClusterResource) -> Result<String> {
        let request = self.request(Method::GET, &format!("/{}/{}", id, resource));
        self.send(&format!("download {}", resource), request).await
    }

    async fn list(&self) -> Result<Vec<ClusterRecord>> {
        let body = self.send("list clusters", self.request(Method::GET, "")).await?;
        Ok(serde_json::from_str(&body)?)
    }
}
