//! Runtime mode resolution.

use serde::{Deserialize, Serialize};

use crate::capability::TrustLevel;

/// Where extension code executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeMode {
    /// In-process, sharing the host's execution context.
    Host,
    /// Isolated execution context reached through the sandbox transport.
    SandboxIframe,
}

impl std::fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::SandboxIframe => write!(f, "sandbox-iframe"),
        }
    }
}

/// Trust levels that run sandboxed when the sandbox feature is on.
pub fn is_sandbox_candidate(trust: TrustLevel) -> bool {
    matches!(trust, TrustLevel::InlineCode | TrustLevel::RemoteUrl)
}

/// Pick the execution mode for a trust level.
pub fn resolve_mode(trust: TrustLevel, sandbox_enabled: bool) -> RuntimeMode {
    if sandbox_enabled && is_sandbox_candidate(trust) {
        RuntimeMode::SandboxIframe
    } else {
        RuntimeMode::Host
    }
}
