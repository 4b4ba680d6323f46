//! # Cortex Extension Runtime
//!
//! A capability-gated runtime for user-installed extensions. Extensions are
//! modules exporting an `activate(api)` function; the API object they receive
//! checks every call against the extension's granted capabilities.
//!
//! ## Features
//!
//! - **Trust levels**: Builtin, local module, inline code and remote URL sources
//!   get different default permissions
//! - **Capability gate**: Each API surface requires an explicit grant
//! - **Execution modes**: Trusted code runs in-process, the rest goes through a
//!   host-provided sandbox transport
//! - **Namespaces**: Tool and command names are owned by one extension at a time
//! - **Teardown**: Deactivation releases every registration, even when steps fail
//! - **Egress**: Extension HTTP requests cannot reach loopback or private networks
//!
//! ## Example
//!
//! ```rust,ignore
//! use cortex_extensions::{
//!     ExtensionRuntimeConfig, ExtensionRuntimeManager, ExtensionSource, InstallRequest,
//!     LocalModuleCatalog, ModuleExports,
//! };
//!
//! #[tokio::main]
//! async fn main() -> cortex_extensions::Result<()> {
//!     let catalog = LocalModuleCatalog::new().with_module(
//!         "./hello.js",
//!         ModuleExports::new().with_activate(|api| async move {
//!             api.toast("hello").await
//!         }),
//!     );
//!
//!     let manager = ExtensionRuntimeManager::builder(ExtensionRuntimeConfig::default())
//!         .catalog(catalog)
//!         .build()?;
//!     manager.initialize().await?;
//!
//!     let id = manager
//!         .install(InstallRequest::new("Hello", ExtensionSource::module("./hello.js")))
//!         .await?;
//!     println!("{:?}", manager.get(&id).await);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod backend;
pub mod capability;
pub mod config;
pub mod egress;
pub mod entry;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod loader;
pub mod manager;
pub mod mode;
pub mod registry;
pub mod source;
pub mod storage;
pub mod store;

// Re-exports for convenience
pub use api::{
    CapabilityGate, CommandSpec, ExtensionApi, ExtensionToolDefinition, HostCallbacks,
    RuntimeCommand, RuntimeTool, ToolUpdateSink,
};
pub use backend::{ExecutionBackend, HostBackend, SandboxActivation, SandboxBackend, SandboxTransport};
pub use capability::{Capability, PermissionSet, TrustLevel};
pub use config::{EgressConfig, ExtensionRuntimeConfig};
pub use egress::{EgressClient, HttpRequestOptions, HttpResponse, HttpTransport};
pub use entry::{ExtensionState, ExtensionStatus, InstallRequest, StoredExtensionEntry};
pub use error::{ExtensionError, Result};
pub use host::{AgentEvent, AgentHandle, ExtensionHost, HeadlessHost};
pub use lifecycle::{Cleanup, LifecycleHandle, Subscription};
pub use loader::{ActivationOutput, ExtensionLoader, LocalModuleCatalog, ModuleExports, ModuleImporter};
pub use manager::{ExtensionRuntimeBuilder, ExtensionRuntimeManager};
pub use mode::RuntimeMode;
pub use registry::{NameKind, NamespaceRegistry};
pub use source::{ExtensionSource, SourceKind};
pub use storage::ExtensionStorage;
pub use store::{JsonFileSettingsStore, MemorySettingsStore, SettingsStore};
