//! Capability and trust model.
//!
//! Everything here is pure data and pure functions: capabilities form a
//! closed set, trust is derived from an entry's source, and permission sets
//! are plain values updated by copy.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ExtensionError;
use crate::source::{ExtensionSource, SourceKind};

/// Entry id prefix reserved for extensions shipped with the host.
pub const BUILTIN_ID_PREFIX: &str = "builtin.";

/// A host-defined permission unit gating one class of host-mediated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    CommandsRegister,
    ToolsRegister,
    AgentRead,
    AgentEventsRead,
    UiOverlay,
    UiWidget,
    UiToast,
    LlmComplete,
    HttpFetch,
    StorageReadWrite,
    ClipboardWrite,
    AgentContextWrite,
    AgentSteer,
    AgentFollowUp,
    SkillsRead,
    SkillsWrite,
    DownloadFile,
}

/// Static metadata and permission-field accessors for one capability.
pub struct CapabilityDescriptor {
    pub capability: Capability,
    pub tag: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    get: fn(&PermissionSet) -> bool,
    set: fn(&mut PermissionSet, bool),
}

impl std::fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("capability", &self.capability)
            .field("tag", &self.tag)
            .finish()
    }
}

/// Capability table in its fixed display order.
pub static CAPABILITY_TABLE: [CapabilityDescriptor; 17] = [
    CapabilityDescriptor {
        capability: Capability::CommandsRegister,
        tag: "commands.register",
        label: "Register commands",
        description: "Add slash commands to the host",
        get: |p| p.commands_register,
        set: |p, v| p.commands_register = v,
    },
    CapabilityDescriptor {
        capability: Capability::ToolsRegister,
        tag: "tools.register",
        label: "Register tools",
        description: "Expose tools the agent can call",
        get: |p| p.tools_register,
        set: |p, v| p.tools_register = v,
    },
    CapabilityDescriptor {
        capability: Capability::AgentRead,
        tag: "agent.read",
        label: "Read agent state",
        description: "Access the live agent, its messages and settings",
        get: |p| p.agent_read,
        set: |p, v| p.agent_read = v,
    },
    CapabilityDescriptor {
        capability: Capability::AgentEventsRead,
        tag: "agent.events.read",
        label: "Observe agent events",
        description: "Subscribe to agent lifecycle and streaming events",
        get: |p| p.agent_events_read,
        set: |p, v| p.agent_events_read = v,
    },
    CapabilityDescriptor {
        capability: Capability::UiOverlay,
        tag: "ui.overlay",
        label: "Show overlays",
        description: "Open full-screen overlays",
        get: |p| p.ui_overlay,
        set: |p, v| p.ui_overlay = v,
    },
    CapabilityDescriptor {
        capability: Capability::UiWidget,
        tag: "ui.widget",
        label: "Show widgets",
        description: "Place widgets next to the conversation",
        get: |p| p.ui_widget,
        set: |p, v| p.ui_widget = v,
    },
    CapabilityDescriptor {
        capability: Capability::UiToast,
        tag: "ui.toast",
        label: "Show toasts",
        description: "Display short notifications",
        get: |p| p.ui_toast,
        set: |p, v| p.ui_toast = v,
    },
    CapabilityDescriptor {
        capability: Capability::LlmComplete,
        tag: "llm.complete",
        label: "Call the LLM",
        description: "Request completions from the host's model",
        get: |p| p.llm_complete,
        set: |p, v| p.llm_complete = v,
    },
    CapabilityDescriptor {
        capability: Capability::HttpFetch,
        tag: "http.fetch",
        label: "Make HTTP requests",
        description: "Fetch public URLs through the host's egress policy",
        get: |p| p.http_fetch,
        set: |p, v| p.http_fetch = v,
    },
    CapabilityDescriptor {
        capability: Capability::StorageReadWrite,
        tag: "storage.readwrite",
        label: "Use storage",
        description: "Read and write the extension's own storage",
        get: |p| p.storage_read_write,
        set: |p, v| p.storage_read_write = v,
    },
    CapabilityDescriptor {
        capability: Capability::ClipboardWrite,
        tag: "clipboard.write",
        label: "Write clipboard",
        description: "Copy text to the clipboard",
        get: |p| p.clipboard_write,
        set: |p, v| p.clipboard_write = v,
    },
    CapabilityDescriptor {
        capability: Capability::AgentContextWrite,
        tag: "agent.context.write",
        label: "Inject agent context",
        description: "Add context to the agent's next turn",
        get: |p| p.agent_context_write,
        set: |p, v| p.agent_context_write = v,
    },
    CapabilityDescriptor {
        capability: Capability::AgentSteer,
        tag: "agent.steer",
        label: "Steer the agent",
        description: "Interrupt the running agent with a steering message",
        get: |p| p.agent_steer,
        set: |p, v| p.agent_steer = v,
    },
    CapabilityDescriptor {
        capability: Capability::AgentFollowUp,
        tag: "agent.followup",
        label: "Queue follow-ups",
        description: "Queue a follow-up message after the agent finishes",
        get: |p| p.agent_follow_up,
        set: |p, v| p.agent_follow_up = v,
    },
    CapabilityDescriptor {
        capability: Capability::SkillsRead,
        tag: "skills.read",
        label: "Read skills",
        description: "List and read installed skills",
        get: |p| p.skills_read,
        set: |p, v| p.skills_read = v,
    },
    CapabilityDescriptor {
        capability: Capability::SkillsWrite,
        tag: "skills.write",
        label: "Manage skills",
        description: "Install and uninstall skills",
        get: |p| p.skills_write,
        set: |p, v| p.skills_write = v,
    },
    CapabilityDescriptor {
        capability: Capability::DownloadFile,
        tag: "download.file",
        label: "Download files",
        description: "Offer files to the user as downloads",
        get: |p| p.download_file,
        set: |p, v| p.download_file = v,
    },
];

impl Capability {
    /// Every capability, in table order.
    pub const ALL: [Capability; 17] = [
        Self::CommandsRegister,
        Self::ToolsRegister,
        Self::AgentRead,
        Self::AgentEventsRead,
        Self::UiOverlay,
        Self::UiWidget,
        Self::UiToast,
        Self::LlmComplete,
        Self::HttpFetch,
        Self::StorageReadWrite,
        Self::ClipboardWrite,
        Self::AgentContextWrite,
        Self::AgentSteer,
        Self::AgentFollowUp,
        Self::SkillsRead,
        Self::SkillsWrite,
        Self::DownloadFile,
    ];

    /// Table entry for this capability.
    pub fn descriptor(self) -> &'static CapabilityDescriptor {
        let index = match self {
            Self::CommandsRegister => 0,
            Self::ToolsRegister => 1,
            Self::AgentRead => 2,
            Self::AgentEventsRead => 3,
            Self::UiOverlay => 4,
            Self::UiWidget => 5,
            Self::UiToast => 6,
            Self::LlmComplete => 7,
            Self::HttpFetch => 8,
            Self::StorageReadWrite => 9,
            Self::ClipboardWrite => 10,
            Self::AgentContextWrite => 11,
            Self::AgentSteer => 12,
            Self::AgentFollowUp => 13,
            Self::SkillsRead => 14,
            Self::SkillsWrite => 15,
            Self::DownloadFile => 16,
        };
        &CAPABILITY_TABLE[index]
    }

    /// Wire tag, e.g. `tools.register`.
    pub fn as_str(self) -> &'static str {
        self.descriptor().tag
    }

    /// Capabilities that let an extension push messages into the agent loop.
    pub fn is_agent_steering(self) -> bool {
        matches!(
            self,
            Self::AgentContextWrite | Self::AgentSteer | Self::AgentFollowUp
        )
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ExtensionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        CAPABILITY_TABLE
            .iter()
            .find(|d| d.tag == tag)
            .map(|d| d.capability)
            .ok_or_else(|| ExtensionError::validation(format!("Unknown capability: {}", tag)))
    }
}

impl Serialize for Capability {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        tag.parse().map_err(serde::de::Error::custom)
    }
}

/// How much the host trusts an extension's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustLevel {
    Builtin,
    LocalModule,
    InlineCode,
    RemoteUrl,
}

impl TrustLevel {
    /// Wire tag, e.g. `inline-code`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::LocalModule => "local-module",
            Self::InlineCode => "inline-code",
            Self::RemoteUrl => "remote-url",
        }
    }

    /// Whether this level receives the trusted default grant.
    pub fn is_trusted(self) -> bool {
        matches!(self, Self::Builtin | Self::LocalModule)
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustLevel {
    type Err = ExtensionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "builtin" => Ok(Self::Builtin),
            "local-module" => Ok(Self::LocalModule),
            "inline-code" => Ok(Self::InlineCode),
            "remote-url" => Ok(Self::RemoteUrl),
            other => Err(ExtensionError::validation(format!(
                "Unknown trust level: {}",
                other
            ))),
        }
    }
}

/// One flag per capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionSet {
    pub commands_register: bool,
    pub tools_register: bool,
    pub agent_read: bool,
    pub agent_events_read: bool,
    pub ui_overlay: bool,
    pub ui_widget: bool,
    pub ui_toast: bool,
    pub llm_complete: bool,
    pub http_fetch: bool,
    pub storage_read_write: bool,
    pub clipboard_write: bool,
    pub agent_context_write: bool,
    pub agent_steer: bool,
    pub agent_follow_up: bool,
    pub skills_read: bool,
    pub skills_write: bool,
    pub download_file: bool,
}

/// Capabilities granted to untrusted sources by default.
const RESTRICTED_GRANTS: [Capability; 8] = [
    Capability::CommandsRegister,
    Capability::UiOverlay,
    Capability::UiWidget,
    Capability::UiToast,
    Capability::StorageReadWrite,
    Capability::ClipboardWrite,
    Capability::DownloadFile,
    Capability::SkillsRead,
];

impl PermissionSet {
    /// Build a set by asking `f` about every capability.
    pub fn from_fn(mut f: impl FnMut(Capability) -> bool) -> Self {
        let mut set = Self::default();
        for descriptor in &CAPABILITY_TABLE {
            (descriptor.set)(&mut set, f(descriptor.capability));
        }
        set
    }

    /// Default grant for builtin and local-module extensions.
    pub fn trusted() -> Self {
        Self::from_fn(|cap| !cap.is_agent_steering())
    }

    /// Default grant for inline-code and remote-url extensions.
    pub fn restricted() -> Self {
        Self::from_fn(|cap| RESTRICTED_GRANTS.contains(&cap))
    }

    /// Everything allowed.
    pub fn all() -> Self {
        Self::from_fn(|_| true)
    }

    pub fn allows(&self, capability: Capability) -> bool {
        (capability.descriptor().get)(self)
    }

    /// Copy of this set with one flag changed.
    pub fn with(mut self, capability: Capability, allowed: bool) -> Self {
        (capability.descriptor().set)(&mut self, allowed);
        self
    }

    pub fn granted(&self) -> Vec<Capability> {
        CAPABILITY_TABLE
            .iter()
            .filter(|d| (d.get)(self))
            .map(|d| d.capability)
            .collect()
    }
}

/// Derive the trust level of an entry from its id and source.
pub fn derive_trust(entry_id: &str, source: &ExtensionSource) -> TrustLevel {
    match source.kind() {
        SourceKind::Inline | SourceKind::BlobUrl => TrustLevel::InlineCode,
        SourceKind::RemoteUrl => TrustLevel::RemoteUrl,
        SourceKind::LocalModule | SourceKind::Unsupported => {
            if entry_id.starts_with(BUILTIN_ID_PREFIX) {
                TrustLevel::Builtin
            } else {
                TrustLevel::LocalModule
            }
        }
    }
}

/// Default permission grant for a trust level.
pub fn default_permissions(trust: TrustLevel) -> PermissionSet {
    if trust.is_trusted() {
        PermissionSet::trusted()
    } else {
        PermissionSet::restricted()
    }
}

pub fn is_allowed(permissions: &PermissionSet, capability: Capability) -> bool {
    permissions.allows(capability)
}

pub fn set_allowed(
    permissions: &PermissionSet,
    capability: Capability,
    allowed: bool,
) -> PermissionSet {
    permissions.with(capability, allowed)
}

/// Granted capabilities in table order.
pub fn granted_capabilities(permissions: &PermissionSet) -> Vec<Capability> {
    permissions.granted()
}

pub fn describe_capability(capability: Capability) -> &'static str {
    capability.descriptor().description
}

pub fn describe_trust(trust: TrustLevel) -> &'static str {
    match trust {
        TrustLevel::Builtin => "Built-in extension shipped with the host",
        TrustLevel::LocalModule => "Local module bundled with the host",
        TrustLevel::InlineCode => "Inline code pasted by the user",
        TrustLevel::RemoteUrl => "Module loaded from a remote URL",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_all_order() {
        for (index, capability) in Capability::ALL.iter().enumerate() {
            assert_eq!(CAPABILITY_TABLE[index].capability, *capability);
            assert_eq!(capability.descriptor().capability, *capability);
        }
    }

    #[test]
    fn test_set_allowed_round_trip() {
        let bases = [
            PermissionSet::default(),
            PermissionSet::all(),
            PermissionSet::restricted(),
        ];
        for base in bases {
            for cap in Capability::ALL {
                assert!(is_allowed(&set_allowed(&base, cap, true), cap));
                assert!(!is_allowed(&set_allowed(&base, cap, false), cap));
            }
        }
    }

    #[test]
    fn test_set_allowed_only_touches_one_flag() {
        let base = PermissionSet::restricted();
        let updated = set_allowed(&base, Capability::HttpFetch, true);
        for cap in Capability::ALL {
            if cap != Capability::HttpFetch {
                assert_eq!(base.allows(cap), updated.allows(cap), "{}", cap);
            }
        }
        assert!(!base.allows(Capability::HttpFetch));
    }

    #[test]
    fn test_restricted_defaults() {
        let granted = granted_capabilities(&default_permissions(TrustLevel::InlineCode));
        for denied in [
            Capability::ToolsRegister,
            Capability::AgentRead,
            Capability::LlmComplete,
            Capability::HttpFetch,
        ] {
            assert!(!granted.contains(&denied), "{} must be denied", denied);
        }
        assert!(granted.contains(&Capability::UiToast));
        assert!(granted.contains(&Capability::StorageReadWrite));
        assert_eq!(
            default_permissions(TrustLevel::RemoteUrl),
            default_permissions(TrustLevel::InlineCode)
        );
    }

    #[test]
    fn test_trusted_defaults_withhold_steering() {
        let trusted = default_permissions(TrustLevel::LocalModule);
        assert!(trusted.allows(Capability::ToolsRegister));
        assert!(trusted.allows(Capability::HttpFetch));
        assert!(!trusted.allows(Capability::AgentSteer));
        assert!(!trusted.allows(Capability::AgentFollowUp));
        assert!(!trusted.allows(Capability::AgentContextWrite));
        assert_eq!(default_permissions(TrustLevel::Builtin), trusted);
    }

    #[test]
    fn test_granted_uses_table_order() {
        let set = PermissionSet::default()
            .with(Capability::DownloadFile, true)
            .with(Capability::CommandsRegister, true)
            .with(Capability::HttpFetch, true);
        assert_eq!(
            set.granted(),
            vec![
                Capability::CommandsRegister,
                Capability::HttpFetch,
                Capability::DownloadFile
            ]
        );
    }

    #[test]
    fn test_derive_trust() {
        assert_eq!(
            derive_trust("ext-1", &ExtensionSource::inline("code")),
            TrustLevel::InlineCode
        );
        assert_eq!(
            derive_trust("ext-1", &ExtensionSource::module("blob:null/abc")),
            TrustLevel::InlineCode
        );
        assert_eq!(
            derive_trust("ext-1", &ExtensionSource::module("https://x.dev/e.js")),
            TrustLevel::RemoteUrl
        );
        assert_eq!(
            derive_trust("builtin.snake", &ExtensionSource::module("./snake.js")),
            TrustLevel::Builtin
        );
        assert_eq!(
            derive_trust("ext-1", &ExtensionSource::module("./snake.js")),
            TrustLevel::LocalModule
        );
        // A builtin id cannot upgrade remote code.
        assert_eq!(
            derive_trust("builtin.x", &ExtensionSource::module("https://x.dev/e.js")),
            TrustLevel::RemoteUrl
        );
    }

    #[test]
    fn test_capability_parse_and_display() {
        for cap in Capability::ALL {
            assert_eq!(cap.to_string().parse::<Capability>().unwrap(), cap);
        }
        assert!("fs.write".parse::<Capability>().is_err());
    }

    #[test]
    fn test_permission_set_serde() {
        let json = serde_json::to_value(PermissionSet::restricted()).unwrap();
        assert_eq!(json["toolsRegister"], false);
        assert_eq!(json["storageReadWrite"], true);

        // Missing fields default to denied.
        let parsed: PermissionSet = serde_json::from_value(serde_json::json!({
            "uiToast": true
        }))
        .unwrap();
        assert_eq!(parsed.granted(), vec![Capability::UiToast]);
    }

    #[test]
    fn test_trust_parse() {
        assert_eq!("remote-url".parse::<TrustLevel>().unwrap(), TrustLevel::RemoteUrl);
        assert!("root".parse::<TrustLevel>().is_err());
        assert!(!describe_trust(TrustLevel::Builtin).is_empty());
        assert!(!describe_capability(Capability::AgentSteer).is_empty());
    }
}
