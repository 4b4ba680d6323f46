//! Extension runtime error types.

use thiserror::Error;

use crate::capability::Capability;

/// Extension runtime errors.
#[derive(Error, Debug)]
pub enum ExtensionError {
    /// Invalid input supplied by an extension or the host.
    #[error("{0}")]
    Validation(String),

    /// A capability-gated call was made without the capability.
    #[error("Extension '{extension}' is not allowed to use '{capability}'")]
    CapabilityDenied {
        extension: String,
        capability: Capability,
    },

    /// The host did not supply the callback a call needs.
    #[error("host does not support {0}()")]
    Unsupported(String),

    /// Extension not found.
    #[error("Extension not found: {0}")]
    NotFound(String),

    /// Module could not be resolved or imported.
    #[error("Failed to load extension '{extension}': {message}")]
    Load { extension: String, message: String },

    /// Activation failed.
    #[error("Failed to activate extension '{extension}': {message}")]
    Activation { extension: String, message: String },

    /// One or more teardown steps failed.
    #[error("Teardown of extension '{extension}' failed: {}", failures.join("; "))]
    Teardown {
        extension: String,
        failures: Vec<String>,
    },

    /// A command or tool name is owned by another extension.
    #[error("{kind} '{name}' is already registered by '{owner}'")]
    NameConflict {
        kind: &'static str,
        name: String,
        owner: String,
    },

    /// A tool name is reserved by the host.
    #[error("Tool name '{0}' is reserved by the host")]
    ReservedName(String),

    /// Outbound request blocked by the egress policy.
    #[error("Blocked outbound request to '{host}': {reason}")]
    EgressBlocked { host: String, reason: String },

    /// Response body exceeded the configured cap.
    #[error("Response body exceeds limit of {limit} bytes")]
    ResponseTooLarge { limit: usize },

    /// Operation timed out.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Settings or extension storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtensionError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a capability-denied error.
    pub fn capability_denied(extension: impl Into<String>, capability: Capability) -> Self {
        Self::CapabilityDenied {
            extension: extension.into(),
            capability,
        }
    }

    /// Create an error for a host callback that was not supplied.
    pub fn unsupported(callback: impl Into<String>) -> Self {
        Self::Unsupported(callback.into())
    }

    /// Create a load error.
    pub fn load_error(extension: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load {
            extension: extension.into(),
            message: message.into(),
        }
    }

    /// Create an activation error.
    pub fn activation(extension: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Activation {
            extension: extension.into(),
            message: message.into(),
        }
    }

    /// Create an egress-blocked error.
    pub fn egress_blocked(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EgressBlocked {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from a capability gate.
    pub fn is_capability_denied(&self) -> bool {
        matches!(self, Self::CapabilityDenied { .. })
    }
}

impl From<serde_json::Error> for ExtensionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ExtensionError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<reqwest::Error> for ExtensionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// Result type alias for extension runtime operations.
pub type Result<T> = std::result::Result<T, ExtensionError>;

/// Collapse a list of step failures into one teardown error.
pub(crate) fn aggregate_failures(extension: &str, failures: Vec<String>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ExtensionError::Teardown {
            extension: extension.to_string(),
            failures,
        })
    }
}
