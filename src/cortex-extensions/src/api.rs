//! The API object handed to an extension's `activate`.
//!
//! Every member is gated on a [`Capability`]. The gate is checked before the
//! host callback runs, so a denied call has no side effects.

use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::capability::{Capability, PermissionSet};
use crate::egress::{HttpRequestOptions, HttpResponse};
use crate::host::{
    AgentEventHandler, AgentHandle, CompletionRequest, CompletionResponse, DownloadRequest,
    OverlaySpec, SkillInstall, SkillSummary, WidgetSpec,
};
use crate::lifecycle::Subscription;
use crate::{ExtensionError, Result};

/// Progress sink passed to a running tool.
pub type ToolUpdateSink = Arc<dyn Fn(Value) + Send + Sync>;

/// Tool body as written by an extension: `execute(params, signal, onUpdate)`.
pub type ToolExecuteFn = Arc<
    dyn Fn(Value, CancellationToken, Option<ToolUpdateSink>) -> BoxFuture<'static, Result<Value>>
        + Send
        + Sync,
>;

/// Tool body as the host calls it, with the tool call id first.
pub type RuntimeToolExecutor = Arc<
    dyn Fn(String, Value, CancellationToken, Option<ToolUpdateSink>) -> BoxFuture<'static, Result<Value>>
        + Send
        + Sync,
>;

/// Command handler; receives the raw argument string.
pub type CommandHandler = Arc<dyn Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A slash command registered by an extension.
#[derive(Clone)]
pub struct CommandSpec {
    pub description: String,
    pub handler: CommandHandler,
}

impl CommandSpec {
    pub fn new<F, Fut>(description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: CommandHandler = Arc::new(move |args| Box::pin(handler(args)));
        Self {
            description: description.into(),
            handler,
        }
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Tool definition as supplied by an extension.
#[derive(Clone, Default)]
pub struct ExtensionToolDefinition {
    pub label: Option<String>,
    pub description: String,
    /// JSON schema of the parameters
    pub parameters: Value,
    pub execute: Option<ToolExecuteFn>,
}

impl ExtensionToolDefinition {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_execute<F, Fut>(mut self, execute: F) -> Self
    where
        F: Fn(Value, CancellationToken, Option<ToolUpdateSink>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let execute: ToolExecuteFn = Arc::new(move |params, signal, on_update| {
            Box::pin(execute(params, signal, on_update))
        });
        self.execute = Some(execute);
        self
    }
}

impl std::fmt::Debug for ExtensionToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionToolDefinition")
            .field("label", &self.label)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("execute", &self.execute.is_some())
            .finish()
    }
}

/// A tool exposed to the agent on behalf of an extension.
#[derive(Clone)]
pub struct RuntimeTool {
    pub extension_id: String,
    pub name: String,
    pub label: String,
    pub description: String,
    pub parameters: Value,
    pub execute: RuntimeToolExecutor,
}

impl std::fmt::Debug for RuntimeTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeTool")
            .field("extension_id", &self.extension_id)
            .field("name", &self.name)
            .field("label", &self.label)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A command exposed to the user on behalf of an extension.
#[derive(Clone, Debug)]
pub struct RuntimeCommand {
    pub extension_id: String,
    pub name: String,
    pub spec: CommandSpec,
}

/// Host callbacks bound to a single extension.
///
/// Implementations own namespace bookkeeping and resource tracking for that
/// extension. Every method defaults to [`ExtensionError::Unsupported`].
#[async_trait::async_trait]
pub trait HostCallbacks: Send + Sync {
    async fn register_command(&self, _command: RuntimeCommand) -> Result<()> {
        Err(ExtensionError::unsupported("registerCommand"))
    }

    async fn register_tool(&self, _tool: RuntimeTool) -> Result<()> {
        Err(ExtensionError::unsupported("registerTool"))
    }

    async fn unregister_tool(&self, _name: &str) -> Result<()> {
        Err(ExtensionError::unsupported("unregisterTool"))
    }

    fn agent(&self) -> Result<Arc<dyn AgentHandle>> {
        Err(ExtensionError::unsupported("agent"))
    }

    fn subscribe_agent_events(&self, _handler: AgentEventHandler) -> Result<Subscription> {
        Err(ExtensionError::unsupported("onAgentEvent"))
    }

    async fn inject_context(&self, _content: &str) -> Result<()> {
        Err(ExtensionError::unsupported("injectContext"))
    }

    async fn steer(&self, _content: &str) -> Result<()> {
        Err(ExtensionError::unsupported("steer"))
    }

    async fn follow_up(&self, _content: &str) -> Result<()> {
        Err(ExtensionError::unsupported("followUp"))
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
        Err(ExtensionError::unsupported("complete"))
    }

    async fn http_fetch(&self, _url: &str, _options: HttpRequestOptions) -> Result<HttpResponse> {
        Err(ExtensionError::unsupported("fetch"))
    }

    async fn storage_get(&self, _key: &str) -> Result<Option<Value>> {
        Err(ExtensionError::unsupported("storage.get"))
    }

    async fn storage_set(&self, _key: &str, _value: Value) -> Result<()> {
        Err(ExtensionError::unsupported("storage.set"))
    }

    async fn storage_delete(&self, _key: &str) -> Result<()> {
        Err(ExtensionError::unsupported("storage.delete"))
    }

    async fn storage_keys(&self) -> Result<Vec<String>> {
        Err(ExtensionError::unsupported("storage.keys"))
    }

    async fn clipboard_write_text(&self, _text: &str) -> Result<()> {
        Err(ExtensionError::unsupported("writeText"))
    }

    async fn download(&self, _request: DownloadRequest) -> Result<()> {
        Err(ExtensionError::unsupported("download"))
    }

    async fn skills_list(&self) -> Result<Vec<SkillSummary>> {
        Err(ExtensionError::unsupported("skills.list"))
    }

    async fn skills_read(&self, _name: &str) -> Result<String> {
        Err(ExtensionError::unsupported("skills.read"))
    }

    async fn skills_install(&self, _skill: SkillInstall) -> Result<()> {
        Err(ExtensionError::unsupported("skills.install"))
    }

    async fn skills_uninstall(&self, _name: &str) -> Result<()> {
        Err(ExtensionError::unsupported("skills.uninstall"))
    }

    async fn overlay_show(&self, _overlay: OverlaySpec) -> Result<()> {
        Err(ExtensionError::unsupported("overlay.show"))
    }

    async fn overlay_dismiss(&self, _overlay_id: &str) -> Result<()> {
        Err(ExtensionError::unsupported("overlay.dismiss"))
    }

    async fn widget_show(&self, _widget: WidgetSpec) -> Result<()> {
        Err(ExtensionError::unsupported("widget.show"))
    }

    async fn widget_dismiss(&self, _widget_id: &str) -> Result<()> {
        Err(ExtensionError::unsupported("widget.dismiss"))
    }

    async fn toast(&self, _message: &str) -> Result<()> {
        Err(ExtensionError::unsupported("toast"))
    }
}

/// Permission snapshot plus the global enforcement switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityGate {
    permissions: PermissionSet,
    enforce: bool,
}

impl CapabilityGate {
    pub fn new(permissions: PermissionSet, enforce: bool) -> Self {
        Self {
            permissions,
            enforce,
        }
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    /// `false` when the kill-switch has disabled capability checks.
    pub fn is_enforced(&self) -> bool {
        self.enforce
    }

    pub fn allows(&self, capability: Capability) -> bool {
        !self.enforce || self.permissions.allows(capability)
    }

    pub fn assert_capability(&self, extension_id: &str, capability: Capability) -> Result<()> {
        if self.allows(capability) {
            Ok(())
        } else {
            tracing::debug!(
                extension = extension_id,
                capability = %capability,
                "Capability denied"
            );
            Err(ExtensionError::capability_denied(extension_id, capability))
        }
    }
}

struct ApiInner {
    extension_id: String,
    extension_name: String,
    gate: CapabilityGate,
    callbacks: Arc<dyn HostCallbacks>,
}

/// API surface passed to an extension's `activate`.
#[derive(Clone)]
pub struct ExtensionApi {
    inner: Arc<ApiInner>,
}

impl ExtensionApi {
    pub fn new(
        extension_id: impl Into<String>,
        extension_name: impl Into<String>,
        gate: CapabilityGate,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> Self {
        Self {
            inner: Arc::new(ApiInner {
                extension_id: extension_id.into(),
                extension_name: extension_name.into(),
                gate,
                callbacks,
            }),
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.inner.extension_id
    }

    pub fn extension_name(&self) -> &str {
        &self.inner.extension_name
    }

    pub fn gate(&self) -> &CapabilityGate {
        &self.inner.gate
    }

    pub fn is_allowed(&self, capability: Capability) -> bool {
        self.inner.gate.allows(capability)
    }

    pub fn assert_capability(&self, capability: Capability) -> Result<()> {
        self.inner
            .gate
            .assert_capability(&self.inner.extension_id, capability)
    }

    fn callbacks(&self) -> &dyn HostCallbacks {
        self.inner.callbacks.as_ref()
    }

    /// Register a slash command.
    pub async fn register_command(&self, name: &str, command: CommandSpec) -> Result<()> {
        self.assert_capability(Capability::CommandsRegister)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ExtensionError::validation("Command name must not be empty"));
        }
        self.callbacks()
            .register_command(RuntimeCommand {
                extension_id: self.extension_id().to_string(),
                name: name.to_string(),
                spec: command,
            })
            .await
    }

    /// Register a tool the agent can call.
    pub async fn register_tool(&self, name: &str, definition: ExtensionToolDefinition) -> Result<()> {
        self.assert_capability(Capability::ToolsRegister)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ExtensionError::validation("Tool name must not be empty"));
        }
        let Some(execute) = definition.execute else {
            return Err(ExtensionError::validation(format!(
                "Tool '{}' must define execute(params, signal, onUpdate); \
                 the legacy handler(args) shape is not supported",
                name
            )));
        };

        let executor: RuntimeToolExecutor =
            Arc::new(move |_call_id, params, signal, on_update| execute(params, signal, on_update));

        self.callbacks()
            .register_tool(RuntimeTool {
                extension_id: self.extension_id().to_string(),
                name: name.to_string(),
                label: definition.label.unwrap_or_else(|| name.to_string()),
                description: definition.description,
                parameters: definition.parameters,
                execute: executor,
            })
            .await
    }

    pub async fn unregister_tool(&self, name: &str) -> Result<()> {
        self.assert_capability(Capability::ToolsRegister)?;
        self.callbacks().unregister_tool(name.trim()).await
    }

    pub fn agent(&self) -> AgentApi<'_> {
        AgentApi { api: self }
    }

    pub fn llm(&self) -> LlmApi<'_> {
        LlmApi { api: self }
    }

    pub fn http(&self) -> HttpApi<'_> {
        HttpApi { api: self }
    }

    pub fn storage(&self) -> StorageApi<'_> {
        StorageApi { api: self }
    }

    pub fn skills(&self) -> SkillsApi<'_> {
        SkillsApi { api: self }
    }

    pub fn overlay(&self) -> OverlayApi<'_> {
        OverlayApi { api: self }
    }

    pub fn widget(&self) -> WidgetApi<'_> {
        WidgetApi { api: self }
    }

    pub async fn clipboard_write_text(&self, text: &str) -> Result<()> {
        self.assert_capability(Capability::ClipboardWrite)?;
        self.callbacks().clipboard_write_text(text).await
    }

    pub async fn download(&self, request: DownloadRequest) -> Result<()> {
        self.assert_capability(Capability::DownloadFile)?;
        if request.filename.trim().is_empty() {
            return Err(ExtensionError::validation("Download filename must not be empty"));
        }
        self.callbacks().download(request).await
    }

    pub async fn toast(&self, message: &str) -> Result<()> {
        self.assert_capability(Capability::UiToast)?;
        self.callbacks().toast(message).await
    }

    /// Subscribe to agent events. The returned subscription is released on
    /// teardown if the extension does not release it first.
    pub fn on_agent_event<F>(&self, handler: F) -> Result<Subscription>
    where
        F: Fn(&crate::host::AgentEvent) + Send + Sync + 'static,
    {
        self.assert_capability(Capability::AgentEventsRead)?;
        self.callbacks().subscribe_agent_events(Arc::new(handler))
    }
}

impl std::fmt::Debug for ExtensionApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionApi")
            .field("extension_id", &self.inner.extension_id)
            .field("extension_name", &self.inner.extension_name)
            .field("gate", &self.inner.gate)
            .finish()
    }
}

fn require_content(method: &str, content: &str) -> Result<()> {
    if content.trim().is_empty() {
        Err(ExtensionError::validation(format!(
            "{}() requires non-empty content",
            method
        )))
    } else {
        Ok(())
    }
}

/// `agent.*` members.
pub struct AgentApi<'a> {
    api: &'a ExtensionApi,
}

impl AgentApi<'_> {
    /// Direct agent access. Needs both `agent.read` and `agent.events.read`.
    pub fn raw(&self) -> Result<Arc<dyn AgentHandle>> {
        self.api.assert_capability(Capability::AgentRead)?;
        self.api.assert_capability(Capability::AgentEventsRead)?;
        self.api.callbacks().agent()
    }

    pub async fn inject_context(&self, content: &str) -> Result<()> {
        self.api.assert_capability(Capability::AgentContextWrite)?;
        require_content("injectContext", content)?;
        self.api.callbacks().inject_context(content).await
    }

    pub async fn steer(&self, content: &str) -> Result<()> {
        self.api.assert_capability(Capability::AgentSteer)?;
        require_content("steer", content)?;
        self.api.callbacks().steer(content).await
    }

    pub async fn follow_up(&self, content: &str) -> Result<()> {
        self.api.assert_capability(Capability::AgentFollowUp)?;
        require_content("followUp", content)?;
        self.api.callbacks().follow_up(content).await
    }
}

/// `llm.*` members.
pub struct LlmApi<'a> {
    api: &'a ExtensionApi,
}

impl LlmApi<'_> {
    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.api.assert_capability(Capability::LlmComplete)?;
        self.api.callbacks().complete(request).await
    }
}

/// `http.*` members.
pub struct HttpApi<'a> {
    api: &'a ExtensionApi,
}

impl HttpApi<'_> {
    pub async fn fetch(&self, url: &str, options: HttpRequestOptions) -> Result<HttpResponse> {
        self.api.assert_capability(Capability::HttpFetch)?;
        self.api.callbacks().http_fetch(url, options).await
    }
}

/// `storage.*` members. Keys are scoped to the extension by the host.
pub struct StorageApi<'a> {
    api: &'a ExtensionApi,
}

impl StorageApi<'_> {
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.api.assert_capability(Capability::StorageReadWrite)?;
        self.api.callbacks().storage_get(key).await
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.api.assert_capability(Capability::StorageReadWrite)?;
        self.api.callbacks().storage_set(key, value).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.api.assert_capability(Capability::StorageReadWrite)?;
        self.api.callbacks().storage_delete(key).await
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.api.assert_capability(Capability::StorageReadWrite)?;
        self.api.callbacks().storage_keys().await
    }
}

/// `skills.*` members.
pub struct SkillsApi<'a> {
    api: &'a ExtensionApi,
}

impl SkillsApi<'_> {
    pub async fn list(&self) -> Result<Vec<SkillSummary>> {
        self.api.assert_capability(Capability::SkillsRead)?;
        self.api.callbacks().skills_list().await
    }

    pub async fn read(&self, name: &str) -> Result<String> {
        self.api.assert_capability(Capability::SkillsRead)?;
        self.api.callbacks().skills_read(name).await
    }

    pub async fn install(&self, skill: SkillInstall) -> Result<()> {
        self.api.assert_capability(Capability::SkillsWrite)?;
        self.api.callbacks().skills_install(skill).await
    }

    pub async fn uninstall(&self, name: &str) -> Result<()> {
        self.api.assert_capability(Capability::SkillsWrite)?;
        self.api.callbacks().skills_uninstall(name).await
    }
}

/// `overlay.*` members.
pub struct OverlayApi<'a> {
    api: &'a ExtensionApi,
}

impl OverlayApi<'_> {
    pub async fn show(&self, overlay: OverlaySpec) -> Result<()> {
        self.api.assert_capability(Capability::UiOverlay)?;
        self.api.callbacks().overlay_show(overlay).await
    }

    pub async fn dismiss(&self, overlay_id: &str) -> Result<()> {
        self.api.assert_capability(Capability::UiOverlay)?;
        self.api.callbacks().overlay_dismiss(overlay_id).await
    }
}

/// `widget.*` members.
pub struct WidgetApi<'a> {
    api: &'a ExtensionApi,
}

impl WidgetApi<'_> {
    pub async fn show(&self, widget: WidgetSpec) -> Result<()> {
        self.api.assert_capability(Capability::UiWidget)?;
        self.api.callbacks().widget_show(widget).await
    }

    pub async fn dismiss(&self, widget_id: &str) -> Result<()> {
        self.api.assert_capability(Capability::UiWidget)?;
        self.api.callbacks().widget_dismiss(widget_id).await
    }
}
