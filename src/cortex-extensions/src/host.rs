//! Host application contract.
//!
//! The runtime never talks to the agent, the LLM, the clipboard or the UI
//! directly. It goes through [`ExtensionHost`], whose methods all default to
//! "unsupported" so a host only implements what it actually offers.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::lifecycle::Subscription;
use crate::{ExtensionError, Result};

/// Read access to the live agent.
pub trait AgentHandle: Send + Sync {
    /// Serializable snapshot of the agent's state.
    fn snapshot(&self) -> serde_json::Value;
}

/// An event emitted by the agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Event type, e.g. `turn_start` or `message_update`
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event payload
    #[serde(default)]
    pub data: serde_json::Value,
}

impl AgentEvent {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

/// Callback invoked for every agent event.
pub type AgentEventHandler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// A message in an LLM completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub role: String,
    pub content: String,
}

impl CompletionMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// LLM completion request. Model selection is the host's business.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub messages: Vec<CompletionMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// LLM completion result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// A file offered to the user as a download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub filename: String,
    pub content: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Installed skill summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillSummary {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Skill to install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillInstall {
    pub name: String,
    pub markdown: String,
}

/// Full-screen overlay content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlaySpec {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
}

/// Widget placed next to the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetSpec {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub order: i32,
}

/// Services the host application offers to extensions.
///
/// Methods that act on behalf of an extension receive its id so the host
/// can attribute and clean up per-extension UI.
#[async_trait::async_trait]
pub trait ExtensionHost: Send + Sync {
    /// Tool names owned by the host itself.
    fn reserved_tool_names(&self) -> HashSet<String> {
        HashSet::new()
    }

    /// Pick up tools added or removed since the last refresh.
    async fn refresh_runtime_tools(&self) -> Result<()> {
        Ok(())
    }

    fn agent(&self) -> Result<Arc<dyn AgentHandle>> {
        Err(ExtensionError::unsupported("agent"))
    }

    fn subscribe_agent_events(&self, _handler: AgentEventHandler) -> Result<Subscription> {
        Err(ExtensionError::unsupported("onAgentEvent"))
    }

    async fn inject_context(&self, _extension_id: &str, _content: &str) -> Result<()> {
        Err(ExtensionError::unsupported("injectContext"))
    }

    async fn steer(&self, _extension_id: &str, _content: &str) -> Result<()> {
        Err(ExtensionError::unsupported("steer"))
    }

    async fn follow_up(&self, _extension_id: &str, _content: &str) -> Result<()> {
        Err(ExtensionError::unsupported("followUp"))
    }

    async fn complete(
        &self,
        _extension_id: &str,
        _request: CompletionRequest,
    ) -> Result<CompletionResponse> {
        Err(ExtensionError::unsupported("complete"))
    }

    async fn write_clipboard(&self, _text: &str) -> Result<()> {
        Err(ExtensionError::unsupported("writeText"))
    }

    async fn download_file(&self, _request: DownloadRequest) -> Result<()> {
        Err(ExtensionError::unsupported("download"))
    }

    async fn list_skills(&self) -> Result<Vec<SkillSummary>> {
        Err(ExtensionError::unsupported("skills.list"))
    }

    async fn read_skill(&self, _name: &str) -> Result<String> {
        Err(ExtensionError::unsupported("skills.read"))
    }

    async fn install_skill(&self, _extension_id: &str, _skill: SkillInstall) -> Result<()> {
        Err(ExtensionError::unsupported("skills.install"))
    }

    async fn uninstall_skill(&self, _extension_id: &str, _name: &str) -> Result<()> {
        Err(ExtensionError::unsupported("skills.uninstall"))
    }

    async fn show_overlay(&self, _extension_id: &str, _overlay: OverlaySpec) -> Result<()> {
        Err(ExtensionError::unsupported("overlay.show"))
    }

    async fn dismiss_overlay(&self, _extension_id: &str, _overlay_id: &str) -> Result<()> {
        Err(ExtensionError::unsupported("overlay.dismiss"))
    }

    async fn show_widget(&self, _extension_id: &str, _widget: WidgetSpec) -> Result<()> {
        Err(ExtensionError::unsupported("widget.show"))
    }

    async fn dismiss_widget(&self, _extension_id: &str, _widget_id: &str) -> Result<()> {
        Err(ExtensionError::unsupported("widget.dismiss"))
    }

    /// Remove every widget owned by an extension.
    async fn clear_widgets(&self, _extension_id: &str) -> Result<()> {
        Ok(())
    }

    async fn toast(&self, _extension_id: &str, _message: &str) -> Result<()> {
        Err(ExtensionError::unsupported("toast"))
    }
}

/// Host with no services beyond tool refresh. Used by headless runs and tests.
#[derive(Debug, Clone, Default)]
pub struct HeadlessHost {
    reserved: HashSet<String>,
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve host tool names.
    pub fn with_reserved_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved.extend(names.into_iter().map(Into::into));
        self
    }
}

#[async_trait::async_trait]
impl ExtensionHost for HeadlessHost {
    fn reserved_tool_names(&self) -> HashSet<String> {
        self.reserved.clone()
    }
}
