//! Execution backends: in-process host mode and the sandbox transport.

use std::sync::Arc;

use crate::api::ExtensionApi;
use crate::lifecycle::LifecycleHandle;
use crate::loader::{ActivatedModule, ExtensionLoader};
use crate::mode::RuntimeMode;
use crate::source::ExtensionSource;
use crate::{ExtensionError, Result};

/// Everything a sandbox needs to start an extension instance.
#[derive(Debug, Clone)]
pub struct SandboxActivation {
    /// Unique per activation, so a reloaded extension never reuses a channel
    pub instance_id: uuid::Uuid,
    pub extension_id: String,
    pub extension_name: String,
    pub source: ExtensionSource,
    /// Host-side API the sandbox proxies calls into
    pub api: ExtensionApi,
}

/// Bridge to an isolated execution context.
#[async_trait::async_trait]
pub trait SandboxTransport: Send + Sync {
    async fn activate(&self, activation: SandboxActivation) -> Result<Arc<dyn LifecycleHandle>>;
}

/// Runs an extension in one runtime mode.
#[async_trait::async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn mode(&self) -> RuntimeMode;

    async fn activate(
        &self,
        extension_id: &str,
        extension_name: &str,
        source: &ExtensionSource,
        api: ExtensionApi,
    ) -> Result<ActivatedModule>;
}

/// In-process execution through the [`ExtensionLoader`].
#[derive(Debug, Clone)]
pub struct HostBackend {
    loader: ExtensionLoader,
}

impl HostBackend {
    pub fn new(loader: ExtensionLoader) -> Self {
        Self { loader }
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for HostBackend {
    fn mode(&self) -> RuntimeMode {
        RuntimeMode::Host
    }

    async fn activate(
        &self,
        extension_id: &str,
        _extension_name: &str,
        source: &ExtensionSource,
        api: ExtensionApi,
    ) -> Result<ActivatedModule> {
        self.loader.activate(extension_id, source, api).await
    }
}

/// Sandboxed execution through a host-supplied [`SandboxTransport`].
#[derive(Clone, Default)]
pub struct SandboxBackend {
    transport: Option<Arc<dyn SandboxTransport>>,
}

impl SandboxBackend {
    pub fn new(transport: Option<Arc<dyn SandboxTransport>>) -> Self {
        Self { transport }
    }

    pub fn is_available(&self) -> bool {
        self.transport.is_some()
    }
}

impl std::fmt::Debug for SandboxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxBackend")
            .field("available", &self.is_available())
            .finish()
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for SandboxBackend {
    fn mode(&self) -> RuntimeMode {
        RuntimeMode::SandboxIframe
    }

    async fn activate(
        &self,
        extension_id: &str,
        extension_name: &str,
        source: &ExtensionSource,
        api: ExtensionApi,
    ) -> Result<ActivatedModule> {
        let Some(transport) = &self.transport else {
            return Err(ExtensionError::activation(
                extension_id,
                "sandbox runtime is enabled but the host provides no sandbox transport",
            ));
        };

        let instance_id = uuid::Uuid::new_v4();
        tracing::debug!(
            extension = extension_id,
            instance = %instance_id,
            "Starting sandboxed extension"
        );

        let handle = transport
            .activate(SandboxActivation {
                instance_id,
                extension_id: extension_id.to_string(),
                extension_name: extension_name.to_string(),
                source: source.clone(),
                api,
            })
            .await?;

        Ok(ActivatedModule {
            handle,
            inline_url: None,
        })
    }
}
