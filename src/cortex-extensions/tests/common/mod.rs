//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cortex_extensions::egress::TransportRequest;
use cortex_extensions::host::AgentEventHandler;
use cortex_extensions::{
    AgentEvent, ExtensionError, ExtensionHost, ExtensionRuntimeConfig, ExtensionRuntimeManager,
    HttpResponse, HttpTransport, LocalModuleCatalog, ModuleExports, ModuleImporter, Result,
    Subscription,
};

/// Host that records every call it receives.
#[derive(Default)]
pub struct RecordingHost {
    reserved: HashSet<String>,
    pub refreshes: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
    pub fail_unsubscribe: AtomicBool,
    pub fail_refresh: AtomicBool,
    handlers: Arc<Mutex<HashMap<usize, AgentEventHandler>>>,
    next_handler: AtomicUsize,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_reserved_tools(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            reserved: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        })
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    /// Deliver an agent event to every live subscriber.
    pub fn emit(&self, event: AgentEvent) {
        let handlers: Vec<_> = self.handlers.lock().unwrap().values().cloned().collect();
        for handler in handlers {
            handler(&event);
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl ExtensionHost for RecordingHost {
    fn reserved_tool_names(&self) -> HashSet<String> {
        self.reserved.clone()
    }

    async fn refresh_runtime_tools(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(ExtensionError::validation("tool list is locked"));
        }
        Ok(())
    }

    fn subscribe_agent_events(&self, handler: AgentEventHandler) -> Result<Subscription> {
        let id = self.next_handler.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().unwrap().insert(id, handler);

        let handlers = self.handlers.clone();
        let fail = self.fail_unsubscribe.load(Ordering::SeqCst);
        Ok(Subscription::new(move || {
            handlers.lock().unwrap().remove(&id);
            if fail {
                Err(ExtensionError::validation("listener already detached"))
            } else {
                Ok(())
            }
        }))
    }

    async fn inject_context(&self, extension_id: &str, content: &str) -> Result<()> {
        self.record(format!("inject:{}:{}", extension_id, content));
        Ok(())
    }

    async fn toast(&self, extension_id: &str, message: &str) -> Result<()> {
        self.record(format!("toast:{}:{}", extension_id, message));
        Ok(())
    }

    async fn show_widget(
        &self,
        extension_id: &str,
        widget: cortex_extensions::host::WidgetSpec,
    ) -> Result<()> {
        self.record(format!("widget:{}:{}", extension_id, widget.id));
        Ok(())
    }

    async fn clear_widgets(&self, extension_id: &str) -> Result<()> {
        self.record(format!("clear_widgets:{}", extension_id));
        Ok(())
    }
}

/// Importer serving inline code from a fixed table of modules.
#[derive(Default)]
pub struct FakeImporter {
    inline_modules: Mutex<HashMap<String, ModuleExports>>,
    urls: Mutex<HashMap<String, String>>,
    pub revoked: Mutex<Vec<String>>,
    counter: AtomicUsize,
}

impl FakeImporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `code` evaluate to `exports` when imported.
    pub fn define(&self, code: &str, exports: ModuleExports) {
        self.inline_modules
            .lock()
            .unwrap()
            .insert(code.to_string(), exports);
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }

    pub fn live_urls(&self) -> usize {
        self.urls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ModuleImporter for FakeImporter {
    async fn create_inline_url(&self, code: &str) -> Result<String> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let url = format!("blob:cortex/{}", n);
        self.urls
            .lock()
            .unwrap()
            .insert(url.clone(), code.to_string());
        Ok(url)
    }

    async fn import(&self, specifier: &str) -> Result<ModuleExports> {
        let code = self
            .urls
            .lock()
            .unwrap()
            .get(specifier)
            .cloned()
            .ok_or_else(|| ExtensionError::validation(format!("cannot import {}", specifier)))?;
        self.inline_modules
            .lock()
            .unwrap()
            .get(&code)
            .cloned()
            .ok_or_else(|| ExtensionError::validation("SyntaxError: unexpected token"))
    }

    async fn revoke_inline_url(&self, url: &str) -> Result<()> {
        self.urls.lock().unwrap().remove(url);
        self.revoked.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Transport that answers every request with 200 and counts them.
#[derive(Default)]
pub struct CountingTransport {
    pub requests: Mutex<Vec<TransportRequest>>,
}

impl CountingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl HttpTransport for CountingTransport {
    async fn send(&self, request: TransportRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request);
        Ok(HttpResponse {
            status: 200,
            headers: Default::default(),
            body: "ok".to_string(),
        })
    }
}

/// Config that runs every extension in-process.
pub fn in_process_config() -> ExtensionRuntimeConfig {
    ExtensionRuntimeConfig {
        sandbox_enabled: false,
        ..Default::default()
    }
}

pub struct Harness {
    pub manager: ExtensionRuntimeManager,
    pub host: Arc<RecordingHost>,
    pub importer: Arc<FakeImporter>,
    pub transport: Arc<CountingTransport>,
}

/// Manager wired to recording doubles, running everything in-process.
pub fn harness(catalog: LocalModuleCatalog) -> Harness {
    harness_with(catalog, RecordingHost::new(), in_process_config())
}

pub fn harness_with(
    catalog: LocalModuleCatalog,
    host: Arc<RecordingHost>,
    config: ExtensionRuntimeConfig,
) -> Harness {
    let importer = FakeImporter::new();
    let transport = CountingTransport::new();
    let manager = ExtensionRuntimeManager::builder(config)
        .host(host.clone())
        .catalog(catalog)
        .importer(importer.clone())
        .http_transport(transport.clone())
        .build()
        .expect("manager should build");

    Harness {
        manager,
        host,
        importer,
        transport,
    }
}
