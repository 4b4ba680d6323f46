//! Edge case tests for the cortex-extensions crate.
//!
//! Covers egress policy, source handling, configuration parsing and
//! malformed persisted state.

mod common;

use std::sync::{Arc, Mutex};

use common::{CountingTransport, RecordingHost, harness, harness_with, in_process_config};
use cortex_extensions::egress::validate_target;
use cortex_extensions::store::REGISTRY_KEY;
use cortex_extensions::{
    Capability, EgressClient, EgressConfig, ExtensionApi, ExtensionError, ExtensionRuntimeConfig,
    ExtensionRuntimeManager, ExtensionSource, ExtensionState, HttpRequestOptions, InstallRequest,
    LocalModuleCatalog, MemorySettingsStore, ModuleExports, SettingsStore, TrustLevel,
};

// ============================================================================
// EGRESS EDGE CASE TESTS
// ============================================================================

mod egress_edge_cases {
    use super::*;

    #[tokio::test]
    async fn test_extension_cannot_reach_private_networks() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let r = results.clone();
        let module = ModuleExports::new().with_activate(move |api: ExtensionApi| {
            let r = r.clone();
            async move {
                for url in [
                    "http://127.0.0.1:9999/admin",
                    "http://10.0.0.5/",
                    "http://localhost:8080/",
                    "http://[::1]/",
                    "https://api.example.com/v1",
                ] {
                    let outcome = api.http().fetch(url, HttpRequestOptions::default()).await;
                    r.lock().unwrap().push((url, outcome));
                }
                Ok(())
            }
        });

        let h = harness(LocalModuleCatalog::new().with_module("./net.js", module));
        h.manager
            .install(InstallRequest::new("Net", ExtensionSource::module("./net.js")))
            .await
            .unwrap();

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 5);
        for (url, outcome) in &results[..4] {
            assert!(
                matches!(outcome, Err(ExtensionError::EgressBlocked { .. })),
                "{url} should be blocked, got {outcome:?}"
            );
        }
        assert_eq!(results[4].1.as_ref().unwrap().status, 200);
        // Only the public request reached the transport.
        assert_eq!(h.transport.count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_requires_capability() {
        let h = harness(LocalModuleCatalog::new());
        let code = "export function activate(api) { return api.http.fetch('https://example.com') }";
        h.importer.define(
            code,
            ModuleExports::new().with_activate(|api: ExtensionApi| async move {
                api.http()
                    .fetch("https://example.com", HttpRequestOptions::default())
                    .await
                    .map(|_| ())
            }),
        );

        let id = h
            .manager
            .install(InstallRequest::new("Fetcher", ExtensionSource::inline(code)))
            .await
            .unwrap();

        let status = h.manager.get(&id).await.unwrap();
        assert!(status.last_error.unwrap().contains("http.fetch"));
        assert_eq!(h.transport.count(), 0);
    }

    #[test]
    fn test_non_http_schemes_rejected() {
        for url in [
            "file:///etc/passwd",
            "ftp://example.com/",
            "javascript:alert(1)",
            "not a url",
        ] {
            assert!(validate_target(url).is_err(), "{url} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_blocked_targets_never_reach_transport() {
        let transport = CountingTransport::new();
        let client = EgressClient::new(EgressConfig::default(), transport.clone());

        for url in [
            "http://169.254.169.254/latest/meta-data/",
            "http://100.64.0.1/",
            "http://[fd00::1]/",
            "http://[::ffff:127.0.0.1]/",
            "http://0.0.0.0/",
        ] {
            let err = client
                .fetch(url, HttpRequestOptions::default())
                .await
                .unwrap_err();
            assert!(
                matches!(err, ExtensionError::EgressBlocked { .. }),
                "{url}: {err}"
            );
        }
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_clamped() {
        let transport = CountingTransport::new();
        let client = EgressClient::new(EgressConfig::default(), transport.clone());

        client
            .fetch(
                "https://example.com/",
                HttpRequestOptions::default().with_timeout_ms(10 * 60 * 1000),
            )
            .await
            .unwrap();

        let requests = transport.requests.lock().unwrap();
        assert_eq!(
            requests[0].timeout.as_millis() as u64,
            EgressConfig::default().max_timeout_ms
        );
    }
}

// ============================================================================
// RESPONSE SIZE EDGE CASE TESTS
// ============================================================================

mod response_size_edge_cases {
    use super::*;
    use cortex_extensions::HttpTransport;
    use cortex_extensions::egress::{ReqwestTransport, TransportRequest};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(response: String) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        addr
    }

    fn request(addr: SocketAddr, limit: usize) -> TransportRequest {
        let url = url::Url::parse(&format!("http://{}/", addr)).unwrap();
        TransportRequest {
            url: url.clone(),
            target: url,
            method: "GET".to_string(),
            headers: Default::default(),
            body: None,
            timeout: Duration::from_secs(5),
            max_response_bytes: limit,
        }
    }

    fn chunked(body: &str) -> String {
        let mut response = String::from(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
        );
        for chunk in body.as_bytes().chunks(25) {
            response.push_str(&format!("{:x}\r\n", chunk.len()));
            response.push_str(std::str::from_utf8(chunk).unwrap());
            response.push_str("\r\n");
        }
        response.push_str("0\r\n\r\n");
        response
    }

    #[tokio::test]
    async fn test_declared_length_over_limit_fails() {
        let body = "x".repeat(100);
        let addr = serve_once(format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        ))
        .await;

        let transport = ReqwestTransport::new(false).unwrap();
        let err = transport.send(request(addr, 10)).await.unwrap_err();
        assert!(
            matches!(err, ExtensionError::ResponseTooLarge { limit: 10 }),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn test_streamed_body_over_limit_fails() {
        let addr = serve_once(chunked(&"y".repeat(100))).await;

        let transport = ReqwestTransport::new(false).unwrap();
        let err = transport.send(request(addr, 10)).await.unwrap_err();
        assert!(
            matches!(err, ExtensionError::ResponseTooLarge { limit: 10 }),
            "unexpected error: {err}"
        );
        assert_eq!(err.to_string(), "Response body exceeds limit of 10 bytes");
    }

    #[tokio::test]
    async fn test_streamed_body_within_limit_is_returned() {
        let addr = serve_once(chunked(&"z".repeat(60))).await;

        let transport = ReqwestTransport::new(false).unwrap();
        let response = transport.send(request(addr, 100)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "z".repeat(60));
    }
}

// ============================================================================
// SOURCE EDGE CASE TESTS
// ============================================================================

mod source_edge_cases {
    use super::*;

    #[tokio::test]
    async fn test_remote_urls_fail_closed_by_default() {
        let h = harness(LocalModuleCatalog::new());
        let id = h
            .manager
            .install(InstallRequest::new(
                "Remote",
                ExtensionSource::module("https://cdn.example.com/ext.js"),
            ))
            .await
            .unwrap();

        let status = h.manager.get(&id).await.unwrap();
        assert_eq!(status.trust, TrustLevel::RemoteUrl);
        assert_eq!(status.state, ExtensionState::Inactive);
        assert!(status.last_error.unwrap().contains("allow_remote_urls"));
    }

    #[tokio::test]
    async fn test_builtin_prefix_grants_builtin_trust() {
        let module = ModuleExports::new().with_activate(|_api: ExtensionApi| async { Ok(()) });
        let h = harness(LocalModuleCatalog::new().with_module("./core.js", module));

        let id = h
            .manager
            .install(
                InstallRequest::new("Core", ExtensionSource::module("./core.js"))
                    .with_id("builtin.core"),
            )
            .await
            .unwrap();

        let status = h.manager.get(&id).await.unwrap();
        assert_eq!(status.trust, TrustLevel::Builtin);
        assert!(status.permissions.http_fetch);
        assert!(!status.permissions.agent_steer);
    }

    #[tokio::test]
    async fn test_unknown_local_module_lists_available() {
        let module = ModuleExports::new().with_activate(|_api: ExtensionApi| async { Ok(()) });
        let h = harness(LocalModuleCatalog::new().with_module("./known.js", module));

        let id = h
            .manager
            .install(InstallRequest::new("Lost", ExtensionSource::module("./unknown.js")))
            .await
            .unwrap();

        let error = h.manager.last_error(&id).await.unwrap();
        assert!(error.contains("./unknown.js"));
        assert!(error.contains("./known.js"));
    }

    #[tokio::test]
    async fn test_activate_export_must_be_function() {
        let module = ModuleExports::new().with_value("activate", serde_json::json!(42));
        let h = harness(LocalModuleCatalog::new().with_module("./value.js", module));

        let id = h
            .manager
            .install(InstallRequest::new("Value", ExtensionSource::module("./value.js")))
            .await
            .unwrap();

        assert!(h.manager.last_error(&id).await.unwrap().contains("activate"));
    }

    #[tokio::test]
    async fn test_legacy_tool_shape_rejected() {
        let module = ModuleExports::new().with_activate(|api: ExtensionApi| async move {
            api.register_tool(
                "legacy",
                cortex_extensions::ExtensionToolDefinition::new("No execute"),
            )
            .await
        });
        let h = harness(LocalModuleCatalog::new().with_module("./legacy.js", module));

        let id = h
            .manager
            .install(InstallRequest::new("Legacy", ExtensionSource::module("./legacy.js")))
            .await
            .unwrap();

        let error = h.manager.last_error(&id).await.unwrap();
        assert!(error.contains("execute(params, signal, onUpdate)"));
        assert!(h.manager.namespaces().await.tool_owners().is_empty());
    }

    #[tokio::test]
    async fn test_empty_inputs_rejected_before_persisting() {
        let h = harness(LocalModuleCatalog::new());

        assert!(
            h.manager
                .install(InstallRequest::new("", ExtensionSource::module("./a.js")))
                .await
                .is_err()
        );
        assert!(
            h.manager
                .install(InstallRequest::new("Blank", ExtensionSource::module("  ")))
                .await
                .is_err()
        );
        assert!(h.manager.list().await.is_empty());
    }
}

// ============================================================================
// CONFIG EDGE CASE TESTS
// ============================================================================

mod config_edge_cases {
    use super::*;

    #[test]
    fn test_config_defaults_from_empty_toml() {
        let config = ExtensionRuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, ExtensionRuntimeConfig::default());
        assert!(config.sandbox_enabled);
        assert!(config.enforce_capabilities);
        assert!(!config.allow_remote_urls);
    }

    #[test]
    fn test_config_overrides() {
        let config = ExtensionRuntimeConfig::from_toml_str(
            r#"
sandbox_enabled = false
allow_remote_urls = true

[egress]
default_timeout_ms = 5000
proxy_url = "https://proxy.example.com/fetch"
"#,
        )
        .unwrap();

        assert!(!config.sandbox_enabled);
        assert!(config.allow_remote_urls);
        assert_eq!(config.egress.default_timeout_ms, 5000);
        assert_eq!(
            config.egress.proxy_url.as_deref(),
            Some("https://proxy.example.com/fetch")
        );
    }

    #[test]
    fn test_config_invalid_toml() {
        assert!(ExtensionRuntimeConfig::from_toml_str("sandbox_enabled = ").is_err());
        assert!(ExtensionRuntimeConfig::from_toml_str("sandbox_enabled = \"yes\"").is_err());
    }

    #[test]
    fn test_config_default_timeout_above_max_rejected() {
        let result = ExtensionRuntimeConfig::from_toml_str(
            r#"
[egress]
default_timeout_ms = 90000
max_timeout_ms = 60000
"#,
        );
        assert!(result.is_err());
    }
}

// ============================================================================
// PERSISTED STATE EDGE CASE TESTS
// ============================================================================

mod persisted_state_edge_cases {
    use super::*;

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let store = Arc::new(MemorySettingsStore::new());
        let valid = serde_json::to_value(cortex_extensions::StoredExtensionEntry::new(
            "kept",
            "Kept",
            ExtensionSource::module("./kept.js"),
        ))
        .unwrap();
        store
            .set(
                REGISTRY_KEY,
                serde_json::json!([{"id": 7}, valid.clone(), "garbage", valid]),
            )
            .await
            .unwrap();

        let module = ModuleExports::new().with_activate(|_api: ExtensionApi| async { Ok(()) });
        let manager = ExtensionRuntimeManager::builder(in_process_config())
            .settings(store)
            .catalog(LocalModuleCatalog::new().with_module("./kept.js", module))
            .build()
            .unwrap();
        manager.initialize().await.unwrap();

        let listed = manager.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "kept");
        assert!(listed[0].is_active());
    }

    #[tokio::test]
    async fn test_registry_of_wrong_shape_is_ignored() {
        let store = Arc::new(MemorySettingsStore::new());
        store
            .set(REGISTRY_KEY, serde_json::json!({"not": "a list"}))
            .await
            .unwrap();

        let manager = ExtensionRuntimeManager::builder(in_process_config())
            .settings(store)
            .build()
            .unwrap();
        manager.initialize().await.unwrap();
        assert!(manager.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_permissions_persist_even_when_unenforced() {
        let config = ExtensionRuntimeConfig {
            sandbox_enabled: false,
            enforce_capabilities: false,
            ..Default::default()
        };
        let module = ModuleExports::new().with_activate(|_api: ExtensionApi| async { Ok(()) });
        let h = harness_with(
            LocalModuleCatalog::new().with_module("./m.js", module),
            RecordingHost::new(),
            config,
        );

        let id = h
            .manager
            .install(InstallRequest::new("M", ExtensionSource::module("./m.js")))
            .await
            .unwrap();
        h.manager
            .set_capability(&id, Capability::AgentSteer, true)
            .await
            .unwrap();

        let status = h.manager.get(&id).await.unwrap();
        assert!(status.permissions.agent_steer);
        assert!(status.granted_capabilities.contains(&Capability::AgentSteer));
    }
}
