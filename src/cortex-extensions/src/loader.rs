//! Extension module loading and activation.
//!
//! Local modules resolve against a host-curated [`LocalModuleCatalog`].
//! Inline code, blob URLs and remote URLs go through the host's
//! [`ModuleImporter`]. Remote URLs additionally need `allow_remote_urls`.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::api::ExtensionApi;
use crate::error::aggregate_failures;
use crate::lifecycle::{Cleanup, LifecycleHandle, run_cleanups_reversed};
use crate::source::{ExtensionSource, SourceKind};
use crate::{ExtensionError, Result};

/// Module `activate(api)` export.
pub type ActivateFn =
    Arc<dyn Fn(ExtensionApi) -> BoxFuture<'static, Result<ActivationOutput>> + Send + Sync>;

/// Module `deactivate()` export.
pub type DeactivateFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// What `activate` handed back.
#[derive(Debug, Default)]
pub enum ActivationOutput {
    #[default]
    Nothing,
    Cleanup(Cleanup),
    Cleanups(Vec<Cleanup>),
    /// Anything else. Rejected by the loader.
    Value(Value),
}

impl From<Cleanup> for ActivationOutput {
    fn from(cleanup: Cleanup) -> Self {
        Self::Cleanup(cleanup)
    }
}

impl From<Vec<Cleanup>> for ActivationOutput {
    fn from(cleanups: Vec<Cleanup>) -> Self {
        Self::Cleanups(cleanups)
    }
}

/// A single named module export.
#[derive(Clone)]
pub enum Export {
    Activate(ActivateFn),
    Deactivate(DeactivateFn),
    Value(Value),
}

impl Export {
    fn kind(&self) -> &'static str {
        match self {
            Self::Activate(_) => "activate function",
            Self::Deactivate(_) => "deactivate function",
            Self::Value(_) => "value",
        }
    }
}

impl std::fmt::Debug for Export {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// The export table of an extension module.
#[derive(Debug, Clone, Default)]
pub struct ModuleExports {
    exports: BTreeMap<String, Export>,
}

impl ModuleExports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Module exporting `activate`.
    pub fn with_activate<F, Fut, O>(self, f: F) -> Self
    where
        F: Fn(ExtensionApi) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
        O: Into<ActivationOutput> + 'static,
    {
        self.with_export("activate", Export::Activate(activate_fn(f)))
    }

    /// Module whose activate function is the default export.
    pub fn with_default<F, Fut, O>(self, f: F) -> Self
    where
        F: Fn(ExtensionApi) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
        O: Into<ActivationOutput> + 'static,
    {
        self.with_export("default", Export::Activate(activate_fn(f)))
    }

    pub fn with_deactivate<F, Fut>(self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let f: DeactivateFn = Arc::new(move || Box::pin(f()));
        self.with_export("deactivate", Export::Deactivate(f))
    }

    pub fn with_value(self, name: impl Into<String>, value: Value) -> Self {
        self.with_export(name, Export::Value(value))
    }

    pub fn with_export(mut self, name: impl Into<String>, export: Export) -> Self {
        self.exports.insert(name.into(), export);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Export> {
        self.exports.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }

    /// `activate`, falling back to `default`.
    fn resolve_activate(&self) -> Result<ActivateFn> {
        let (name, export) = match self.exports.get("activate") {
            Some(export) => ("activate", export),
            None => match self.exports.get("default") {
                Some(export) => ("default", export),
                None => {
                    return Err(ExtensionError::validation(
                        "Extension module must export an activate(api) function",
                    ));
                }
            },
        };
        match export {
            Export::Activate(f) => Ok(f.clone()),
            other => Err(ExtensionError::validation(format!(
                "Extension export '{}' must be an activate(api) function, found {}",
                name,
                other.kind()
            ))),
        }
    }

    fn resolve_deactivate(&self) -> Result<Option<DeactivateFn>> {
        match self.exports.get("deactivate") {
            None => Ok(None),
            Some(Export::Deactivate(f)) => Ok(Some(f.clone())),
            Some(other) => Err(ExtensionError::validation(format!(
                "Extension export 'deactivate' must be a function, found {}",
                other.kind()
            ))),
        }
    }
}

fn activate_fn<F, Fut, O>(f: F) -> ActivateFn
where
    F: Fn(ExtensionApi) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
    O: Into<ActivationOutput> + 'static,
{
    Arc::new(move |api| {
        let fut = f(api);
        Box::pin(async move { fut.await.map(Into::into) })
    })
}

impl From<()> for ActivationOutput {
    fn from(_: ()) -> Self {
        Self::Nothing
    }
}

/// Host-curated set of locally available extension modules.
#[derive(Debug, Clone, Default)]
pub struct LocalModuleCatalog {
    modules: BTreeMap<String, ModuleExports>,
}

impl LocalModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, specifier: impl Into<String>, exports: ModuleExports) -> Self {
        self.register(specifier, exports);
        self
    }

    pub fn register(&mut self, specifier: impl Into<String>, exports: ModuleExports) {
        self.modules.insert(specifier.into(), exports);
    }

    pub fn specifiers(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }

    pub fn resolve(&self, specifier: &str) -> Result<ModuleExports> {
        self.modules.get(specifier.trim()).cloned().ok_or_else(|| {
            let available = self.specifiers();
            ExtensionError::validation(format!(
                "Unknown local extension module '{}'. Available: {}",
                specifier,
                if available.is_empty() {
                    "(none)".to_string()
                } else {
                    available.join(", ")
                }
            ))
        })
    }
}

/// Host hook for dynamic module import.
#[async_trait::async_trait]
pub trait ModuleImporter: Send + Sync {
    /// Stage inline code and return a temporary `blob:` URL for it.
    async fn create_inline_url(&self, code: &str) -> Result<String>;

    /// Import a blob or remote module.
    async fn import(&self, specifier: &str) -> Result<ModuleExports>;

    /// Release a URL from [`create_inline_url`](Self::create_inline_url).
    async fn revoke_inline_url(&self, url: &str) -> Result<()>;
}

/// Result of a successful host-mode activation.
pub struct ActivatedModule {
    pub handle: Arc<dyn LifecycleHandle>,
    /// Staged inline URL that must be revoked at teardown
    pub inline_url: Option<String>,
}

impl std::fmt::Debug for ActivatedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivatedModule")
            .field("inline_url", &self.inline_url)
            .finish_non_exhaustive()
    }
}

/// Reject sources the runtime may not start in any mode.
///
/// Remote URLs fail closed unless `allow_remote_urls` is set.
pub fn check_source_policy(
    extension_id: &str,
    source: &ExtensionSource,
    allow_remote_urls: bool,
) -> Result<()> {
    if source.kind() == SourceKind::RemoteUrl && !allow_remote_urls {
        return Err(ExtensionError::load_error(
            extension_id,
            format!(
                "Remote extension URLs are disabled ({}); set allow_remote_urls to load them",
                source.describe()
            ),
        ));
    }
    Ok(())
}

/// Resolves, imports and activates extension modules in-process.
#[derive(Clone)]
pub struct ExtensionLoader {
    catalog: Arc<LocalModuleCatalog>,
    importer: Option<Arc<dyn ModuleImporter>>,
    allow_remote_urls: bool,
}

impl ExtensionLoader {
    pub fn new(catalog: LocalModuleCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
            importer: None,
            allow_remote_urls: false,
        }
    }

    pub fn with_importer(mut self, importer: Arc<dyn ModuleImporter>) -> Self {
        self.importer = Some(importer);
        self
    }

    pub fn with_remote_urls(mut self, allow: bool) -> Self {
        self.allow_remote_urls = allow;
        self
    }

    pub fn catalog(&self) -> &LocalModuleCatalog {
        &self.catalog
    }

    fn importer(&self) -> Result<&Arc<dyn ModuleImporter>> {
        self.importer
            .as_ref()
            .ok_or_else(|| ExtensionError::unsupported("import"))
    }

    /// Resolve a source to its exports, staging inline code if needed.
    pub async fn load(
        &self,
        extension_id: &str,
        source: &ExtensionSource,
    ) -> Result<(ModuleExports, Option<String>)> {
        let load_err = |e: ExtensionError| ExtensionError::load_error(extension_id, e.to_string());

        match (source.kind(), source) {
            (SourceKind::Inline, ExtensionSource::Inline { code }) => {
                let importer = self.importer().map_err(load_err)?;
                let url = importer.create_inline_url(code).await.map_err(load_err)?;
                match importer.import(&url).await {
                    Ok(exports) => Ok((exports, Some(url))),
                    Err(e) => {
                        self.revoke_quietly(extension_id, &url).await;
                        Err(load_err(e))
                    }
                }
            }
            (SourceKind::LocalModule, ExtensionSource::Module { specifier }) => {
                let exports = self.catalog.resolve(specifier).map_err(load_err)?;
                Ok((exports, None))
            }
            (SourceKind::BlobUrl, ExtensionSource::Module { specifier }) => {
                let importer = self.importer().map_err(load_err)?;
                let exports = importer.import(specifier).await.map_err(load_err)?;
                Ok((exports, None))
            }
            (SourceKind::RemoteUrl, ExtensionSource::Module { specifier }) => {
                check_source_policy(extension_id, source, self.allow_remote_urls)?;
                let importer = self.importer().map_err(load_err)?;
                let exports = importer.import(specifier).await.map_err(load_err)?;
                Ok((exports, None))
            }
            (kind, source) => Err(ExtensionError::load_error(
                extension_id,
                format!("Unsupported extension source ({}): {}", kind, source.describe()),
            )),
        }
    }

    /// Load a module and run its `activate(api)`.
    pub async fn activate(
        &self,
        extension_id: &str,
        source: &ExtensionSource,
        api: ExtensionApi,
    ) -> Result<ActivatedModule> {
        let (exports, inline_url) = self.load(extension_id, source).await?;

        match run_activate(extension_id, &exports, api).await {
            Ok(handle) => Ok(ActivatedModule {
                handle: Arc::new(handle),
                inline_url,
            }),
            Err(e) => {
                if let Some(url) = &inline_url {
                    self.revoke_quietly(extension_id, url).await;
                }
                Err(e)
            }
        }
    }

    pub async fn revoke_inline_url(&self, url: &str) -> Result<()> {
        self.importer()?.revoke_inline_url(url).await
    }

    async fn revoke_quietly(&self, extension_id: &str, url: &str) {
        if let Err(e) = self.revoke_inline_url(url).await {
            tracing::warn!(
                extension = extension_id,
                url = url,
                error = %e,
                "Failed to revoke inline extension URL"
            );
        }
    }
}

impl std::fmt::Debug for ExtensionLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionLoader")
            .field("catalog", &self.catalog.specifiers())
            .field("importer", &self.importer.is_some())
            .field("allow_remote_urls", &self.allow_remote_urls)
            .finish()
    }
}

async fn run_activate(
    extension_id: &str,
    exports: &ModuleExports,
    api: ExtensionApi,
) -> Result<ModuleHandle> {
    let activate = exports.resolve_activate()?;
    let deactivate = exports.resolve_deactivate()?;

    let cleanups = match activate(api).await? {
        ActivationOutput::Nothing => Vec::new(),
        ActivationOutput::Cleanup(cleanup) => vec![cleanup],
        ActivationOutput::Cleanups(cleanups) => cleanups,
        ActivationOutput::Value(value) => {
            return Err(ExtensionError::validation(format!(
                "activate() must return nothing, a cleanup function or an array of cleanup functions (got {})",
                value
            )));
        }
    };

    Ok(ModuleHandle::new(extension_id, cleanups, deactivate))
}

struct HandleState {
    cleanups: Vec<Cleanup>,
    deactivate: Option<DeactivateFn>,
}

/// Lifecycle handle for a host-mode extension.
pub struct ModuleHandle {
    extension_id: String,
    state: Mutex<Option<HandleState>>,
}

impl ModuleHandle {
    pub fn new(
        extension_id: impl Into<String>,
        cleanups: Vec<Cleanup>,
        deactivate: Option<DeactivateFn>,
    ) -> Self {
        Self {
            extension_id: extension_id.into(),
            state: Mutex::new(Some(HandleState {
                cleanups,
                deactivate,
            })),
        }
    }
}

#[async_trait::async_trait]
impl LifecycleHandle for ModuleHandle {
    async fn deactivate(&self) -> Result<()> {
        let Some(state) = self.state.lock().await.take() else {
            return Ok(());
        };

        let mut failures = Vec::new();
        run_cleanups_reversed(state.cleanups, &mut failures).await;
        if let Some(deactivate) = state.deactivate
            && let Err(e) = deactivate().await
        {
            failures.push(format!("deactivate(): {}", e));
        }

        aggregate_failures(&self.extension_id, failures)
    }
}
