//! Extension runtime manager - the main interface of the extension system.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::api::{
    CapabilityGate, ExtensionApi, HostCallbacks, RuntimeCommand, RuntimeTool, ToolUpdateSink,
};
use crate::backend::{ExecutionBackend, HostBackend, SandboxBackend, SandboxTransport};
use crate::capability::{Capability, granted_capabilities, is_allowed, set_allowed};
use crate::config::ExtensionRuntimeConfig;
use crate::egress::{EgressClient, HttpRequestOptions, HttpResponse, HttpTransport};
use crate::entry::{
    ExtensionState, ExtensionStatus, InstallRequest, StoredExtensionEntry, generate_extension_id,
};
use crate::error::aggregate_failures;
use crate::host::{
    AgentEventHandler, AgentHandle, CompletionRequest, CompletionResponse, DownloadRequest,
    ExtensionHost, HeadlessHost, OverlaySpec, SkillInstall, SkillSummary, WidgetSpec,
};
use crate::lifecycle::{LifecycleHandle, Subscription};
use crate::loader::{ExtensionLoader, LocalModuleCatalog, ModuleImporter, check_source_policy};
use crate::mode::{RuntimeMode, resolve_mode};
use crate::registry::{NameKind, NamespaceRegistry};
use crate::storage::ExtensionStorage;
use crate::store::{MemorySettingsStore, REGISTRY_KEY, SettingsStore};
use crate::{ExtensionError, Result};

/// Extension runtime manager.
///
/// The manager handles:
/// - Installing, enabling, reloading and uninstalling extensions
/// - Activation through the host or sandbox backend
/// - Tool and command namespace ownership
/// - Teardown of everything an extension registered
#[derive(Clone)]
pub struct ExtensionRuntimeManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: ExtensionRuntimeConfig,
    host: Arc<dyn ExtensionHost>,
    settings: Arc<dyn SettingsStore>,
    loader: ExtensionLoader,
    host_backend: HostBackend,
    sandbox_backend: SandboxBackend,
    egress: EgressClient,
    state: Mutex<ManagerState>,
}

#[derive(Default)]
struct ManagerState {
    /// Install order
    entries: Vec<StoredExtensionEntry>,
    loaded: HashMap<String, LoadedExtension>,
    last_errors: HashMap<String, String>,
    namespaces: NamespaceRegistry,
}

impl ManagerState {
    fn entry(&self, id: &str) -> Option<&StoredExtensionEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut StoredExtensionEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| ExtensionError::NotFound(id.to_string()))
    }
}

struct LoadedExtension {
    mode: RuntimeMode,
    bindings: Arc<EntryBindings>,
    handle: Arc<dyn LifecycleHandle>,
    inline_url: Option<String>,
}

/// Builder for [`ExtensionRuntimeManager`].
pub struct ExtensionRuntimeBuilder {
    config: ExtensionRuntimeConfig,
    host: Option<Arc<dyn ExtensionHost>>,
    settings: Option<Arc<dyn SettingsStore>>,
    catalog: LocalModuleCatalog,
    importer: Option<Arc<dyn ModuleImporter>>,
    sandbox: Option<Arc<dyn SandboxTransport>>,
    http_transport: Option<Arc<dyn HttpTransport>>,
    namespaces: NamespaceRegistry,
}

impl ExtensionRuntimeBuilder {
    pub fn new(config: ExtensionRuntimeConfig) -> Self {
        Self {
            config,
            host: None,
            settings: None,
            catalog: LocalModuleCatalog::new(),
            importer: None,
            sandbox: None,
            http_transport: None,
            namespaces: NamespaceRegistry::new(),
        }
    }

    pub fn host(mut self, host: Arc<dyn ExtensionHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn catalog(mut self, catalog: LocalModuleCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn importer(mut self, importer: Arc<dyn ModuleImporter>) -> Self {
        self.importer = Some(importer);
        self
    }

    pub fn sandbox(mut self, transport: Arc<dyn SandboxTransport>) -> Self {
        self.sandbox = Some(transport);
        self
    }

    pub fn http_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.http_transport = Some(transport);
        self
    }

    /// Start from a pre-populated namespace registry.
    pub fn namespaces(mut self, namespaces: NamespaceRegistry) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn build(self) -> Result<ExtensionRuntimeManager> {
        self.config.validate()?;

        let mut loader = ExtensionLoader::new(self.catalog).with_remote_urls(self.config.allow_remote_urls);
        if let Some(importer) = self.importer {
            loader = loader.with_importer(importer);
        }

        let egress = match self.http_transport {
            Some(transport) => EgressClient::new(self.config.egress.clone(), transport),
            None => EgressClient::with_reqwest(self.config.egress.clone())?,
        };

        let inner = ManagerInner {
            host: self.host.unwrap_or_else(|| Arc::new(HeadlessHost::new())),
            settings: self
                .settings
                .unwrap_or_else(|| Arc::new(MemorySettingsStore::new())),
            host_backend: HostBackend::new(loader.clone()),
            sandbox_backend: SandboxBackend::new(self.sandbox),
            loader,
            egress,
            state: Mutex::new(ManagerState {
                namespaces: self.namespaces,
                ..Default::default()
            }),
            config: self.config,
        };

        Ok(ExtensionRuntimeManager {
            inner: Arc::new(inner),
        })
    }
}

impl ExtensionRuntimeManager {
    pub fn builder(config: ExtensionRuntimeConfig) -> ExtensionRuntimeBuilder {
        ExtensionRuntimeBuilder::new(config)
    }

    pub fn config(&self) -> &ExtensionRuntimeConfig {
        &self.inner.config
    }

    // ========== Lifecycle ==========

    /// Load persisted entries and activate every enabled one.
    ///
    /// Activation failures are recorded per entry, not returned.
    pub async fn initialize(&self) -> Result<()> {
        let entries = self.inner.load_entries().await?;
        let enabled: Vec<_> = entries.iter().filter(|e| e.enabled).cloned().collect();

        {
            let mut state = self.inner.state.lock().await;
            state.entries = entries;
        }

        tracing::info!(count = enabled.len(), "Activating enabled extensions");
        for entry in enabled {
            // Failure is recorded as the entry's last error.
            let _ = self.inner.activate(entry).await;
        }
        Ok(())
    }

    /// Install an extension, or reinstall over an existing id.
    ///
    /// Succeeds once the entry is persisted; an activation failure is
    /// recorded as the entry's last error.
    pub async fn install(&self, request: InstallRequest) -> Result<String> {
        request.source.validate()?;
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(ExtensionError::validation("Extension name cannot be empty"));
        }
        let id = request
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_extension_id);

        if let Err(e) = self.inner.deactivate(&id).await {
            tracing::warn!(extension = %id, error = %e, "Teardown before reinstall failed");
        }

        let (entry, snapshot) = {
            let mut state = self.inner.state.lock().await;
            let mut entry = StoredExtensionEntry::new(id.clone(), name, request.source);
            match state.entries.iter().position(|e| e.id == id) {
                Some(index) => {
                    entry.created_at = state.entries[index].created_at;
                    state.entries[index] = entry.clone();
                }
                None => state.entries.push(entry.clone()),
            }
            state.last_errors.remove(&id);
            (entry, state.entries.clone())
        };
        self.inner.persist(&snapshot).await?;

        tracing::info!(
            extension = %id,
            trust = %entry.trust,
            source = %entry.source.describe(),
            "Installed extension"
        );

        // Failure is recorded as the entry's last error.
        let _ = self.inner.activate(entry).await;
        Ok(id)
    }

    /// Enable or disable an extension.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let (entry, snapshot) = {
            let mut state = self.inner.state.lock().await;
            let entry = state.entry_mut(id)?;
            if entry.enabled == enabled {
                return Ok(());
            }
            entry.enabled = enabled;
            entry.touch();
            let entry = entry.clone();
            if !enabled {
                state.last_errors.remove(id);
            }
            (entry, state.entries.clone())
        };
        self.inner.persist(&snapshot).await?;

        if enabled {
            tracing::info!(extension = id, "Enabling extension");
            self.inner.activate(entry).await
        } else {
            tracing::info!(extension = id, "Disabling extension");
            self.inner.deactivate(id).await
        }
    }

    /// Grant or revoke one capability. An active extension is reloaded.
    pub async fn set_capability(&self, id: &str, capability: Capability, allowed: bool) -> Result<()> {
        let (active, snapshot) = {
            let mut state = self.inner.state.lock().await;
            let entry = state.entry_mut(id)?;
            if is_allowed(&entry.permissions, capability) == allowed {
                return Ok(());
            }
            entry.permissions = set_allowed(&entry.permissions, capability, allowed);
            entry.touch();
            (state.loaded.contains_key(id), state.entries.clone())
        };
        self.inner.persist(&snapshot).await?;

        tracing::info!(
            extension = id,
            capability = %capability,
            allowed = allowed,
            "Updated extension capability"
        );

        if active { self.reload(id).await } else { Ok(()) }
    }

    /// Deactivate, then reactivate if enabled.
    pub async fn reload(&self, id: &str) -> Result<()> {
        let entry = {
            let state = self.inner.state.lock().await;
            state
                .entry(id)
                .cloned()
                .ok_or_else(|| ExtensionError::NotFound(id.to_string()))?
        };

        let teardown = self.inner.deactivate(id).await;
        if let Err(e) = &teardown {
            tracing::warn!(extension = id, error = %e, "Teardown during reload failed");
        }

        if entry.enabled {
            self.inner.activate(entry).await?;
        }
        teardown
    }

    /// Remove an extension and its storage. Every step runs even if an
    /// earlier one fails.
    pub async fn uninstall(&self, id: &str) -> Result<()> {
        {
            let state = self.inner.state.lock().await;
            if state.entry(id).is_none() {
                return Err(ExtensionError::NotFound(id.to_string()));
            }
        }

        let teardown = self.inner.deactivate(id).await;
        let cleared = ExtensionStorage::new(id, self.inner.settings.clone())
            .clear()
            .await;

        let snapshot = {
            let mut state = self.inner.state.lock().await;
            state.entries.retain(|e| e.id != id);
            state.last_errors.remove(id);
            state.entries.clone()
        };
        self.inner.persist(&snapshot).await?;

        tracing::info!(extension = id, "Uninstalled extension");
        cleared?;
        teardown
    }

    /// Deactivate every loaded extension.
    pub async fn shutdown(&self) -> Result<()> {
        let loaded: Vec<_> = {
            let mut state = self.inner.state.lock().await;
            state.loaded.drain().collect()
        };

        let mut failures = Vec::new();
        for (id, loaded) in loaded {
            if let Err(e) = self.inner.teardown(&id, loaded).await {
                tracing::warn!(extension = %id, error = %e, "Extension teardown failed");
                failures.push(e.to_string());
            }
        }
        aggregate_failures("*", failures)
    }

    // ========== Queries ==========

    /// Status of every installed extension, in install order.
    pub async fn list(&self) -> Vec<ExtensionStatus> {
        let state = self.inner.state.lock().await;
        state
            .entries
            .iter()
            .map(|entry| self.inner.status(&state, entry))
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<ExtensionStatus> {
        let state = self.inner.state.lock().await;
        state.entry(id).map(|entry| self.inner.status(&state, entry))
    }

    pub async fn last_error(&self, id: &str) -> Option<String> {
        self.inner.state.lock().await.last_errors.get(id).cloned()
    }

    /// Snapshot of the namespace registry.
    pub async fn namespaces(&self) -> NamespaceRegistry {
        self.inner.state.lock().await.namespaces.clone()
    }

    // ========== Tools and commands ==========

    /// Tools currently published by extensions.
    pub async fn runtime_tools(&self) -> Vec<RuntimeTool> {
        self.inner.state.lock().await.namespaces.tools()
    }

    pub async fn execute_tool(
        &self,
        name: &str,
        call_id: &str,
        params: Value,
        signal: CancellationToken,
        on_update: Option<ToolUpdateSink>,
    ) -> Result<Value> {
        let tool = {
            let state = self.inner.state.lock().await;
            state.namespaces.tool(name).cloned()
        };
        let tool = tool.ok_or_else(|| ExtensionError::validation(format!("Unknown tool '{}'", name)))?;

        tracing::debug!(tool = name, extension = %tool.extension_id, call_id = call_id, "Executing extension tool");
        (tool.execute)(call_id.to_string(), params, signal, on_update).await
    }

    /// Commands currently published by extensions.
    pub async fn commands(&self) -> Vec<RuntimeCommand> {
        self.inner.state.lock().await.namespaces.commands()
    }

    pub async fn execute_command(&self, name: &str, args: &str) -> Result<()> {
        let command = {
            let state = self.inner.state.lock().await;
            state.namespaces.command(name).cloned()
        };
        let command =
            command.ok_or_else(|| ExtensionError::validation(format!("Unknown command '{}'", name)))?;

        tracing::debug!(command = name, extension = %command.extension_id, "Executing extension command");
        (command.spec.handler)(args.to_string()).await
    }
}

impl std::fmt::Debug for ExtensionRuntimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRuntimeManager")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ManagerInner {
    async fn load_entries(&self) -> Result<Vec<StoredExtensionEntry>> {
        let Some(value) = self.settings.get(REGISTRY_KEY).await? else {
            return Ok(Vec::new());
        };
        let Value::Array(items) = value else {
            tracing::warn!("Ignoring malformed extension registry");
            return Ok(Vec::new());
        };

        let mut entries: Vec<StoredExtensionEntry> = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<StoredExtensionEntry>(item) {
                Ok(entry) if entries.iter().any(|e| e.id == entry.id) => {
                    tracing::warn!(extension = %entry.id, "Skipping duplicate extension entry");
                }
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(error = %e, "Skipping invalid extension entry"),
            }
        }
        Ok(entries)
    }

    async fn persist(&self, entries: &[StoredExtensionEntry]) -> Result<()> {
        self.settings
            .set(REGISTRY_KEY, serde_json::to_value(entries)?)
            .await
    }

    fn status(&self, state: &ManagerState, entry: &StoredExtensionEntry) -> ExtensionStatus {
        let loaded = state.loaded.get(&entry.id);
        let lifecycle = match (entry.enabled, loaded.is_some()) {
            (false, _) => ExtensionState::Disabled,
            (true, true) => ExtensionState::Active,
            (true, false) => ExtensionState::Inactive,
        };

        ExtensionStatus {
            id: entry.id.clone(),
            name: entry.name.clone(),
            enabled: entry.enabled,
            source: entry.source.clone(),
            trust: entry.trust,
            permissions: entry.permissions,
            granted_capabilities: granted_capabilities(&entry.permissions),
            state: lifecycle,
            runtime_mode: loaded
                .map(|l| l.mode)
                .unwrap_or_else(|| resolve_mode(entry.trust, self.config.sandbox_enabled)),
            command_names: state.namespaces.owned_by(NameKind::Command, &entry.id),
            tool_names: state.namespaces.owned_by(NameKind::Tool, &entry.id),
            last_error: state.last_errors.get(&entry.id).cloned(),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }

    /// Activate an entry, replacing any prior activation.
    ///
    /// Failures are recorded as the entry's last error and returned.
    async fn activate(self: &Arc<Self>, entry: StoredExtensionEntry) -> Result<()> {
        if let Err(e) = self.deactivate(&entry.id).await {
            tracing::warn!(extension = %entry.id, error = %e, "Teardown of previous activation failed");
        }

        match self.activate_fresh(&entry).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(extension = %entry.id, error = %e, "Failed to activate extension");
                self.state
                    .lock()
                    .await
                    .last_errors
                    .insert(entry.id.clone(), e.to_string());
                Err(e)
            }
        }
    }

    async fn activate_fresh(self: &Arc<Self>, entry: &StoredExtensionEntry) -> Result<()> {
        check_source_policy(&entry.id, &entry.source, self.config.allow_remote_urls)?;

        let mode = resolve_mode(entry.trust, self.config.sandbox_enabled);
        let gate = CapabilityGate::new(entry.permissions, self.config.enforce_capabilities);
        let bindings = Arc::new(EntryBindings {
            extension_id: entry.id.clone(),
            runtime: Arc::downgrade(self),
            host: self.host.clone(),
            egress: self.egress.clone(),
            storage: ExtensionStorage::new(&entry.id, self.settings.clone()),
            scope: std::sync::Mutex::new(ActivationScope::default()),
        });
        let api = ExtensionApi::new(&entry.id, &entry.name, gate, bindings.clone());

        {
            let mut state = self.state.lock().await;
            state
                .namespaces
                .set_reserved_tools(self.host.reserved_tool_names());
        }

        let backend: &dyn ExecutionBackend = match mode {
            RuntimeMode::Host => &self.host_backend,
            RuntimeMode::SandboxIframe => &self.sandbox_backend,
        };

        tracing::info!(
            extension = %entry.id,
            mode = %mode,
            trust = %entry.trust,
            enforced = gate.is_enforced(),
            "Activating extension"
        );

        let activated = match backend
            .activate(&entry.id, &entry.name, &entry.source, api)
            .await
        {
            Ok(activated) => activated,
            Err(e) => {
                if let Err(teardown) = self.release(&entry.id, &bindings, None, None).await {
                    tracing::warn!(
                        extension = %entry.id,
                        error = %teardown,
                        "Teardown after failed activation also failed"
                    );
                }
                return Err(e);
            }
        };

        let (published_tools, displaced) = {
            let mut state = self.state.lock().await;
            let published = bindings.commit(&mut state.namespaces);
            let displaced = state.loaded.insert(
                entry.id.clone(),
                LoadedExtension {
                    mode,
                    bindings: bindings.clone(),
                    handle: activated.handle,
                    inline_url: activated.inline_url,
                },
            );
            state.last_errors.remove(&entry.id);
            (published, displaced)
        };

        if let Some(displaced) = displaced
            && let Err(e) = self.teardown(&entry.id, displaced).await
        {
            tracing::warn!(extension = %entry.id, error = %e, "Teardown of displaced activation failed");
        }

        if published_tools && let Err(e) = self.host.refresh_runtime_tools().await {
            tracing::warn!(extension = %entry.id, error = %e, "Runtime tool refresh failed");
        }

        tracing::info!(extension = %entry.id, mode = %mode, "Activated extension");
        Ok(())
    }

    /// Tear down the loaded state of an extension, if any.
    async fn deactivate(&self, id: &str) -> Result<()> {
        let loaded = self.state.lock().await.loaded.remove(id);
        match loaded {
            Some(loaded) => {
                tracing::info!(extension = id, "Deactivating extension");
                self.teardown(id, loaded).await
            }
            None => Ok(()),
        }
    }

    async fn teardown(&self, id: &str, loaded: LoadedExtension) -> Result<()> {
        self.release(id, &loaded.bindings, Some(loaded.handle), loaded.inline_url)
            .await
    }

    /// Run every teardown step, collecting failures.
    async fn release(
        &self,
        id: &str,
        bindings: &EntryBindings,
        handle: Option<Arc<dyn LifecycleHandle>>,
        inline_url: Option<String>,
    ) -> Result<()> {
        let mut failures = Vec::new();

        if let Some(handle) = handle {
            match handle.deactivate().await {
                Ok(()) => {}
                Err(ExtensionError::Teardown { failures: inner, .. }) => failures.extend(inner),
                Err(e) => failures.push(format!("deactivate: {}", e)),
            }
        }

        if let Err(e) = self.host.clear_widgets(id).await {
            failures.push(format!("clear widgets: {}", e));
        }

        for subscription in bindings.close() {
            if let Err(e) = subscription.unsubscribe() {
                failures.push(format!("unsubscribe: {}", e));
            }
        }

        let removed_published_tools = {
            let mut state = self.state.lock().await;
            bindings.release_names(&mut state.namespaces)
        };

        if let Some(url) = inline_url
            && let Err(e) = self.loader.revoke_inline_url(&url).await
        {
            failures.push(format!("revoke {}: {}", url, e));
        }

        if removed_published_tools && let Err(e) = self.host.refresh_runtime_tools().await {
            failures.push(format!("refresh runtime tools: {}", e));
        }

        if !failures.is_empty() {
            tracing::warn!(extension = id, failures = failures.len(), "Extension teardown incomplete");
        }
        aggregate_failures(id, failures)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ScopePhase {
    /// Names are claimed but not yet visible to the host
    #[default]
    Activating,
    /// Registrations publish immediately
    Live,
    /// Torn down; registrations are refused
    Closed,
}

/// Everything an activation registered.
#[derive(Default)]
struct ActivationScope {
    phase: ScopePhase,
    tools: Vec<String>,
    commands: Vec<String>,
    pending_tools: Vec<RuntimeTool>,
    pending_commands: Vec<RuntimeCommand>,
    subscriptions: Vec<Arc<Subscription>>,
    published_tools: bool,
}

/// [`HostCallbacks`] bound to one activation of one extension.
struct EntryBindings {
    extension_id: String,
    runtime: Weak<ManagerInner>,
    host: Arc<dyn ExtensionHost>,
    egress: EgressClient,
    storage: ExtensionStorage,
    scope: std::sync::Mutex<ActivationScope>,
}

impl EntryBindings {
    fn scope(&self) -> std::sync::MutexGuard<'_, ActivationScope> {
        self.scope.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn runtime(&self) -> Result<Arc<ManagerInner>> {
        self.runtime
            .upgrade()
            .ok_or_else(|| ExtensionError::validation("Extension runtime has shut down"))
    }

    fn ensure_open(&self, scope: &ActivationScope) -> Result<()> {
        if scope.phase == ScopePhase::Closed {
            Err(ExtensionError::validation(format!(
                "Extension '{}' is no longer active",
                self.extension_id
            )))
        } else {
            Ok(())
        }
    }

    /// Publish pending registrations and go live. Returns whether any tools
    /// were published.
    fn commit(&self, namespaces: &mut NamespaceRegistry) -> bool {
        let mut scope = self.scope();
        if scope.phase != ScopePhase::Activating {
            return false;
        }
        scope.phase = ScopePhase::Live;

        for command in std::mem::take(&mut scope.pending_commands) {
            if let Err(e) = namespaces.publish_command(command) {
                tracing::warn!(extension = %self.extension_id, error = %e, "Dropping unpublishable command");
            }
        }

        let tools = std::mem::take(&mut scope.pending_tools);
        let any = !tools.is_empty();
        for tool in tools {
            if let Err(e) = namespaces.publish_tool(tool) {
                tracing::warn!(extension = %self.extension_id, error = %e, "Dropping unpublishable tool");
            }
        }
        scope.published_tools |= any;
        any
    }

    /// Refuse further registrations and hand back live subscriptions.
    fn close(&self) -> Vec<Arc<Subscription>> {
        let mut scope = self.scope();
        scope.phase = ScopePhase::Closed;
        std::mem::take(&mut scope.subscriptions)
    }

    /// Release every owned name. Returns whether a published tool was removed.
    fn release_names(&self, namespaces: &mut NamespaceRegistry) -> bool {
        let mut scope = self.scope();
        for name in std::mem::take(&mut scope.commands) {
            namespaces.release(NameKind::Command, &name, &self.extension_id);
        }
        let tools = std::mem::take(&mut scope.tools);
        for name in &tools {
            namespaces.release(NameKind::Tool, name, &self.extension_id);
        }
        scope.pending_commands.clear();
        scope.pending_tools.clear();
        scope.phase = ScopePhase::Closed;
        std::mem::take(&mut scope.published_tools) && !tools.is_empty()
    }
}

#[async_trait::async_trait]
impl HostCallbacks for EntryBindings {
    async fn register_command(&self, command: RuntimeCommand) -> Result<()> {
        let runtime = self.runtime()?;
        let mut state = runtime.state.lock().await;
        let mut scope = self.scope();
        self.ensure_open(&scope)?;

        state
            .namespaces
            .claim(NameKind::Command, &command.name, &self.extension_id)?;
        scope.commands.push(command.name.clone());
        tracing::debug!(extension = %self.extension_id, command = %command.name, "Registered extension command");

        match scope.phase {
            ScopePhase::Live => state.namespaces.publish_command(command),
            _ => {
                scope.pending_commands.push(command);
                Ok(())
            }
        }
    }

    async fn register_tool(&self, tool: RuntimeTool) -> Result<()> {
        let runtime = self.runtime()?;
        let live = {
            let mut state = runtime.state.lock().await;
            let mut scope = self.scope();
            self.ensure_open(&scope)?;

            state
                .namespaces
                .claim(NameKind::Tool, &tool.name, &self.extension_id)?;
            scope.tools.push(tool.name.clone());
            tracing::debug!(extension = %self.extension_id, tool = %tool.name, "Registered extension tool");

            if scope.phase == ScopePhase::Live {
                state.namespaces.publish_tool(tool)?;
                scope.published_tools = true;
                true
            } else {
                scope.pending_tools.push(tool);
                false
            }
        };

        if live && let Err(e) = runtime.host.refresh_runtime_tools().await {
            tracing::warn!(extension = %self.extension_id, error = %e, "Runtime tool refresh failed");
        }
        Ok(())
    }

    async fn unregister_tool(&self, name: &str) -> Result<()> {
        let runtime = self.runtime()?;
        let live = {
            let mut state = runtime.state.lock().await;
            let mut scope = self.scope();
            self.ensure_open(&scope)?;

            if !scope.tools.iter().any(|t| t == name) {
                return Err(ExtensionError::validation(format!(
                    "Tool '{}' is not registered by '{}'",
                    name, self.extension_id
                )));
            }
            state
                .namespaces
                .release(NameKind::Tool, name, &self.extension_id);
            scope.tools.retain(|t| t != name);
            scope.pending_tools.retain(|t| t.name != name);
            tracing::debug!(extension = %self.extension_id, tool = name, "Unregistered extension tool");

            scope.phase == ScopePhase::Live
        };

        if live && let Err(e) = runtime.host.refresh_runtime_tools().await {
            tracing::warn!(extension = %self.extension_id, error = %e, "Runtime tool refresh failed");
        }
        Ok(())
    }

    fn agent(&self) -> Result<Arc<dyn AgentHandle>> {
        self.host.agent()
    }

    fn subscribe_agent_events(&self, handler: AgentEventHandler) -> Result<Subscription> {
        self.ensure_open(&self.scope())?;
        let subscription = Arc::new(self.host.subscribe_agent_events(handler)?);

        {
            let mut scope = self.scope();
            if scope.phase == ScopePhase::Closed {
                drop(scope);
                subscription.unsubscribe()?;
                return Err(ExtensionError::validation(format!(
                    "Extension '{}' is no longer active",
                    self.extension_id
                )));
            }
            scope.subscriptions.push(subscription.clone());
        }

        Ok(Subscription::new(move || subscription.unsubscribe()))
    }

    async fn inject_context(&self, content: &str) -> Result<()> {
        self.host.inject_context(&self.extension_id, content).await
    }

    async fn steer(&self, content: &str) -> Result<()> {
        self.host.steer(&self.extension_id, content).await
    }

    async fn follow_up(&self, content: &str) -> Result<()> {
        self.host.follow_up(&self.extension_id, content).await
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.host.complete(&self.extension_id, request).await
    }

    async fn http_fetch(&self, url: &str, options: HttpRequestOptions) -> Result<HttpResponse> {
        self.egress.fetch(url, options).await
    }

    async fn storage_get(&self, key: &str) -> Result<Option<Value>> {
        self.storage.get(key).await
    }

    async fn storage_set(&self, key: &str, value: Value) -> Result<()> {
        self.storage.set(key, value).await
    }

    async fn storage_delete(&self, key: &str) -> Result<()> {
        self.storage.delete(key).await
    }

    async fn storage_keys(&self) -> Result<Vec<String>> {
        self.storage.keys().await
    }

    async fn clipboard_write_text(&self, text: &str) -> Result<()> {
        self.host.write_clipboard(text).await
    }

    async fn download(&self, request: DownloadRequest) -> Result<()> {
        self.host.download_file(request).await
    }

    async fn skills_list(&self) -> Result<Vec<SkillSummary>> {
        self.host.list_skills().await
    }

    async fn skills_read(&self, name: &str) -> Result<String> {
        self.host.read_skill(name).await
    }

    async fn skills_install(&self, skill: SkillInstall) -> Result<()> {
        self.host.install_skill(&self.extension_id, skill).await
    }

    async fn skills_uninstall(&self, name: &str) -> Result<()> {
        self.host.uninstall_skill(&self.extension_id, name).await
    }

    async fn overlay_show(&self, overlay: OverlaySpec) -> Result<()> {
        self.host.show_overlay(&self.extension_id, overlay).await
    }

    async fn overlay_dismiss(&self, overlay_id: &str) -> Result<()> {
        self.host.dismiss_overlay(&self.extension_id, overlay_id).await
    }

    async fn widget_show(&self, widget: WidgetSpec) -> Result<()> {
        self.host.show_widget(&self.extension_id, widget).await
    }

    async fn widget_dismiss(&self, widget_id: &str) -> Result<()> {
        self.host.dismiss_widget(&self.extension_id, widget_id).await
    }

    async fn toast(&self, message: &str) -> Result<()> {
        self.host.toast(&self.extension_id, message).await
    }
}
