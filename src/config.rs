//! Run configuration, loaded from a TOML file.
//!
//! Every field has a default so an empty file (or no file) is a valid
//! configuration. Validation is separate from parsing and reports every
//! problem at once.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::telemetry::{AutoscalerQuery, SourceKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", .0.join(", "))]
    Invalid(Vec<String>),
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub hooks: HooksConfig,
    pub sink: SinkConfig,
    pub telemetry: TelemetryConfig,
    pub cluster: ClusterConfig,
    pub observability: ObservabilityConfig,
}

/// HTTP hook surface for out-of-process load engines.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HooksConfig {
    pub bind_address: String,

    /// Started requests with no completion after this long are forgotten.
    pub pending_ttl_secs: u64,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:9400".to_string(),
            pending_ttl_secs: 300,
        }
    }
}

impl HooksConfig {
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }
}

/// Output file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkConfig {
    pub directory: PathBuf,

    /// File name is `<prefix>-<unix millis>.csv`.
    pub prefix: String,

    /// Records queued ahead of the writer before producers wait.
    pub channel_capacity: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            prefix: "result".to_string(),
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Upper bound on each source's fetch.
    pub timeout_ms: u64,

    pub enabled: Vec<SourceKind>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            enabled: SourceKind::ALL.to_vec(),
        }
    }
}

impl TelemetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Where the cluster lives and what to ask it about.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub prometheus_url: String,
    pub api_server_url: String,

    /// Pre-issued service-account token. Omit for unauthenticated access.
    pub bearer_token_file: Option<PathBuf>,

    pub accept_invalid_certs: bool,

    /// Namespace the function runs in.
    pub namespace: String,

    /// Function (deployment) name; pods are `<function>-*`.
    pub function: String,

    /// Replaces the default replica-count PromQL.
    pub replica_query: Option<String>,

    pub invocation_metric: String,

    /// Defaults to `function_name=<function>`.
    pub invocation_selector: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            prometheus_url: "http://127.0.0.1:9090".to_string(),
            api_server_url: "https://127.0.0.1:6443".to_string(),
            bearer_token_file: None,
            accept_invalid_certs: false,
            namespace: "openfaas-fn".to_string(),
            function: "pycon".to_string(),
            replica_query: None,
            invocation_metric: "gateway_function_invocation_per_second".to_string(),
            invocation_selector: None,
        }
    }
}

impl ClusterConfig {
    pub fn replica_query(&self) -> String {
        self.replica_query
            .clone()
            .unwrap_or_else(|| AutoscalerQuery::replica_query(&self.namespace, &self.function))
    }

    pub fn invocation_selector(&self) -> String {
        self.invocation_selector
            .clone()
            .unwrap_or_else(|| format!("function_name={}", self.function))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`.
    pub log_filter: String,

    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "faas_latency_probe=info,tower_http=info".to_string(),
            json_logs: false,
        }
    }
}

// ─── Loading & validation ────────────────────────────────────────

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProbeConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<ProbeConfig, ConfigError> {
    let config: ProbeConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.hooks.bind_address.trim().is_empty() {
            errors.push("hooks.bind_address must not be empty".to_string());
        }
        if self.hooks.pending_ttl_secs == 0 {
            errors.push("hooks.pending_ttl_secs must be > 0".to_string());
        }
        if self.sink.prefix.trim().is_empty() {
            errors.push("sink.prefix must not be empty".to_string());
        }
        if self.sink.prefix.contains(['/', '\\']) {
            errors.push("sink.prefix must not contain path separators".to_string());
        }
        if self.sink.channel_capacity == 0 {
            errors.push("sink.channel_capacity must be > 0".to_string());
        }
        if self.telemetry.timeout_ms == 0 {
            errors.push("telemetry.timeout_ms must be > 0".to_string());
        }
        for (key, value) in [
            ("cluster.prometheus_url", &self.cluster.prometheus_url),
            ("cluster.api_server_url", &self.cluster.api_server_url),
        ] {
            if let Err(e) = Url::parse(value) {
                errors.push(format!("{key} is not a valid URL ({e})"));
            }
        }
        if self.cluster.function.trim().is_empty() {
            errors.push("cluster.function must not be empty".to_string());
        }
        if self.cluster.namespace.trim().is_empty() {
            errors.push("cluster.namespace must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}
