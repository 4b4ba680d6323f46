//! Extension runtime configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::Result;

/// Extension runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRuntimeConfig {
    /// Run inline-code and remote-url extensions through the sandbox transport
    #[serde(default = "default_true")]
    pub sandbox_enabled: bool,

    /// Enforce capability checks (off = every check passes)
    #[serde(default = "default_true")]
    pub enforce_capabilities: bool,

    /// Allow loading extension modules from http(s) URLs
    #[serde(default)]
    pub allow_remote_urls: bool,

    /// Outbound HTTP policy for `http.fetch`
    #[serde(default)]
    pub egress: EgressConfig,
}

impl Default for ExtensionRuntimeConfig {
    fn default() -> Self {
        Self {
            sandbox_enabled: true,
            enforce_capabilities: true,
            allow_remote_urls: false,
            egress: EgressConfig::default(),
        }
    }
}

impl ExtensionRuntimeConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file; `.json` files are read as JSON,
    /// anything else as TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.egress.validate()
    }
}

/// Egress limits applied to extension HTTP requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressConfig {
    /// Timeout used when the extension does not ask for one (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Upper bound on any requested timeout (milliseconds)
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,

    /// Largest accepted response body
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,

    /// Optional proxy the request is rewritten through
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// Reject hostnames that resolve to non-public addresses
    #[serde(default = "default_true")]
    pub resolve_dns: bool,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            max_response_bytes: default_max_response_bytes(),
            proxy_url: None,
            resolve_dns: true,
        }
    }
}

impl EgressConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_ms == 0 || self.max_timeout_ms == 0 {
            return Err(crate::ExtensionError::Config(
                "egress timeouts must be greater than zero".to_string(),
            ));
        }
        if self.default_timeout_ms > self.max_timeout_ms {
            return Err(crate::ExtensionError::Config(format!(
                "egress default_timeout_ms ({}) exceeds max_timeout_ms ({})",
                self.default_timeout_ms, self.max_timeout_ms
            )));
        }
        if self.max_response_bytes == 0 {
            return Err(crate::ExtensionError::Config(
                "egress max_response_bytes must be greater than zero".to_string(),
            ));
        }
        if let Some(proxy) = &self.proxy_url {
            let parsed = url::Url::parse(proxy).map_err(|e| {
                crate::ExtensionError::Config(format!("invalid egress proxy URL '{}': {}", proxy, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(crate::ExtensionError::Config(format!(
                    "egress proxy must be http(s): {}",
                    proxy
                )));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    15_000 // 15 seconds
}

fn default_max_timeout_ms() -> u64 {
    60_000 // 1 minute
}

fn default_max_response_bytes() -> usize {
    2 * 1024 * 1024 // 2 MB
}
