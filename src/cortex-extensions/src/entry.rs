//! Persisted extension entries and their status view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::{Capability, PermissionSet, TrustLevel, default_permissions, derive_trust};
use crate::mode::RuntimeMode;
use crate::source::ExtensionSource;

/// An installed extension, as persisted in settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredExtensionEntry {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub source: ExtensionSource,
    /// Derived once at install time
    pub trust: TrustLevel,
    pub permissions: PermissionSet,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredExtensionEntry {
    /// New enabled entry with trust and default permissions derived from
    /// `(id, source)`.
    pub fn new(id: impl Into<String>, name: impl Into<String>, source: ExtensionSource) -> Self {
        let id = id.into();
        let trust = derive_trust(&id, &source);
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            enabled: true,
            source,
            trust,
            permissions: default_permissions(trust),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Request to install (or reinstall) an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRequest {
    /// Explicit id; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub source: ExtensionSource,
}

impl InstallRequest {
    pub fn new(name: impl Into<String>, source: ExtensionSource) -> Self {
        Self {
            id: None,
            name: name.into(),
            source,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Generate a fresh extension id.
pub fn generate_extension_id() -> String {
    format!("ext-{}", uuid::Uuid::new_v4().simple())
}

/// Runtime state of an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionState {
    /// Enabled and activated
    Active,
    /// Enabled but not running, usually after an activation error
    Inactive,
    /// Disabled by the user
    Disabled,
}

impl std::fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// Status view of an installed extension. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub source: ExtensionSource,
    pub trust: TrustLevel,
    pub permissions: PermissionSet,
    pub granted_capabilities: Vec<Capability>,
    pub state: ExtensionState,
    /// Mode the extension runs (or would run) in
    pub runtime_mode: RuntimeMode,
    pub command_names: Vec<String>,
    pub tool_names: Vec<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExtensionStatus {
    pub fn is_active(&self) -> bool {
        self.state == ExtensionState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_derives_trust() {
        let entry = StoredExtensionEntry::new("x", "X", ExtensionSource::inline("code"));
        assert_eq!(entry.trust, TrustLevel::InlineCode);
        assert_eq!(entry.permissions, PermissionSet::restricted());
        assert!(entry.enabled);

        let builtin = StoredExtensionEntry::new("builtin.hello", "Hello", ExtensionSource::module("./hello.js"));
        assert_eq!(builtin.trust, TrustLevel::Builtin);
    }

    #[test]
    fn test_entry_serde_camel_case() {
        let entry = StoredExtensionEntry::new(
            "ext-1",
            "Remote",
            ExtensionSource::module("https://cdn.example.com/a.js"),
        );
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["trust"], "remote-url");
        assert_eq!(json["source"]["kind"], "module");
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["permissions"]["commandsRegister"], true);

        let back: StoredExtensionEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_generated_ids_unique() {
        let a = generate_extension_id();
        let b = generate_extension_id();
        assert!(a.starts_with("ext-"));
        assert_ne!(a, b);
    }
}
