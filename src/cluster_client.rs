use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::ClusterConfig;

// ─── Errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("{url} returned a body that is not JSON: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0} cannot be used as a base URL")]
    NotABase(Url),

    #[error("cannot read bearer token from {path}: {source}")]
    Token {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

// ─── Capabilities ────────────────────────────────────────────────

/// The three read-only queries telemetry needs from the cluster.
///
/// Implementations come pre-authenticated; every method returns the raw
/// JSON document and leaves interpretation to the telemetry sources.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Prometheus instant query (`/api/v1/query`).
    async fn instant_query(&self, promql: &str) -> Result<Value, ClusterError>;

    /// Current usage of every node (`metrics.k8s.io`).
    async fn node_metrics(&self) -> Result<Value, ClusterError>;

    /// One external metric series (`external.metrics.k8s.io`).
    async fn external_metric(
        &self,
        namespace: &str,
        metric: &str,
        label_selector: Option<&str>,
    ) -> Result<Value, ClusterError>;
}

// ─── HTTP implementation ─────────────────────────────────────────

/// `reqwest` client talking to Prometheus and the Kubernetes API server.
///
/// `reqwest::Client` is cheaply cloneable and pools connections, so one
/// instance serves every concurrent fetch.
#[derive(Clone)]
pub struct HttpClusterClient {
    http: reqwest::Client,
    prometheus: Url,
    api_server: Url,
    bearer: Option<String>,
}

impl HttpClusterClient {
    pub fn new(
        prometheus: Url,
        api_server: Url,
        bearer: Option<String>,
        accept_invalid_certs: bool,
    ) -> Result<Self, ClusterError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("faas-latency-probe/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(ClusterError::Build)?;

        Ok(Self {
            http,
            prometheus,
            api_server,
            bearer,
        })
    }

    /// Build from configuration, reading the bearer token file if one is set.
    pub fn from_config(config: &ClusterConfig) -> Result<Self, ClusterError> {
        let bearer = match &config.bearer_token_file {
            Some(path) => {
                let token = std::fs::read_to_string(path).map_err(|source| ClusterError::Token {
                    path: path.clone(),
                    source,
                })?;
                Some(token.trim().to_owned())
            }
            None => None,
        };

        Self::new(
            Url::parse(&config.prometheus_url)?,
            Url::parse(&config.api_server_url)?,
            bearer,
            config.accept_invalid_certs,
        )
    }

    async fn get_json(&self, url: Url) -> Result<Value, ClusterError> {
        let mut request = self.http.get(url.clone());
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|source| ClusterError::Transport {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClusterError::Status {
                url: url.to_string(),
                status,
            });
        }

        response.json().await.map_err(|source| ClusterError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

/// Append path segments to a base URL, keeping any path prefix it already has.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ClusterError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ClusterError::NotABase(base.clone()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn instant_query(&self, promql: &str) -> Result<Value, ClusterError> {
        let mut url = endpoint(&self.prometheus, &["api", "v1", "query"])?;
        url.query_pairs_mut().append_pair("query", promql);
        self.get_json(url).await
    }

    async fn node_metrics(&self) -> Result<Value, ClusterError> {
        let url = endpoint(&self.api_server, &["apis", "metrics.k8s.io", "v1beta1", "nodes"])?;
        self.get_json(url).await
    }

    async fn external_metric(
        &self,
        namespace: &str,
        metric: &str,
        label_selector: Option<&str>,
    ) -> Result<Value, ClusterError> {
        let mut url = endpoint(
            &self.api_server,
            &[
                "apis",
                "external.metrics.k8s.io",
                "v1beta1",
                "namespaces",
                namespace,
                metric,
            ],
        )?;
        if let Some(selector) = label_selector {
            url.query_pairs_mut().append_pair("labelSelector", selector);
        }
        self.get_json(url).await
    }
}
