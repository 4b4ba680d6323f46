//! Outbound HTTP mediation for extension `http.fetch` calls.
//!
//! Every request is validated before it reaches the network:
//!
//! - only `http` and `https` URLs
//! - no `localhost`, `*.localhost` or non-public IP literals
//! - timeouts clamped to the configured maximum
//! - response bodies capped at `max_response_bytes`
//!
//! When an egress proxy is configured the request is sent to
//! `<proxy>?target=<encoded url>` instead of the target itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::EgressConfig;
use crate::{ExtensionError, Result};

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD"];

/// Options an extension passes to `http.fetch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestOptions {
    /// HTTP method
    #[serde(default = "default_method")]
    pub method: String,
    /// Request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body
    #[serde(default)]
    pub body: Option<String>,
    /// Timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for HttpRequestOptions {
    fn default() -> Self {
        Self {
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: None,
        }
    }
}

impl HttpRequestOptions {
    pub fn post(body: impl Into<String>) -> Self {
        Self {
            method: "POST".to_string(),
            body: Some(body.into()),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// Response handed back to the extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: BTreeMap<String, String>,
    /// Response body
    pub body: String,
}

/// A request that passed validation.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// URL actually contacted (the proxy when one is configured)
    pub url: Url,
    /// URL the extension asked for
    pub target: Url,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
    pub max_response_bytes: usize,
}

/// Network layer behind [`EgressClient`].
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<HttpResponse>;
}

/// Validating HTTP client shared by every extension.
#[derive(Clone)]
pub struct EgressClient {
    config: EgressConfig,
    transport: Arc<dyn HttpTransport>,
}

impl EgressClient {
    pub fn new(config: EgressConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    /// Client backed by [`ReqwestTransport`].
    pub fn with_reqwest(config: EgressConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.resolve_dns)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn config(&self) -> &EgressConfig {
        &self.config
    }

    /// Validate and send a request on behalf of an extension.
    pub async fn fetch(&self, url: &str, options: HttpRequestOptions) -> Result<HttpResponse> {
        let request = self.prepare(url, options)?;
        tracing::debug!(
            url = %request.target,
            method = %request.method,
            timeout_ms = request.timeout.as_millis() as u64,
            "Extension egress request"
        );
        self.transport.send(request).await
    }

    /// Turn extension input into a validated [`TransportRequest`].
    pub fn prepare(&self, url: &str, options: HttpRequestOptions) -> Result<TransportRequest> {
        let target = validate_target(url)?;

        let method = options.method.trim().to_uppercase();
        if !ALLOWED_METHODS.contains(&method.as_str()) {
            return Err(ExtensionError::validation(format!(
                "Unsupported HTTP method: {}",
                options.method
            )));
        }

        let url = match &self.config.proxy_url {
            Some(proxy) => apply_proxy(&target, proxy)?,
            None => target.clone(),
        };

        Ok(TransportRequest {
            url,
            target,
            method,
            headers: options.headers,
            body: options.body,
            timeout: clamp_timeout(options.timeout_ms, &self.config),
            max_response_bytes: self.config.max_response_bytes,
        })
    }
}

impl std::fmt::Debug for EgressClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EgressClient")
            .field("config", &self.config)
            .finish()
    }
}

/// Parse a URL and reject anything that is not a public http(s) target.
pub fn validate_target(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ExtensionError::validation(format!("Invalid URL '{}': {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            tracing::warn!(scheme = scheme, url = raw, "Blocked non-HTTP extension request");
            return Err(ExtensionError::egress_blocked(
                url.host_str().unwrap_or_default(),
                format!("scheme '{}' is not allowed", scheme),
            ));
        }
    }

    let Some(host) = url.host() else {
        return Err(ExtensionError::validation(format!("URL has no host: {}", raw)));
    };

    let blocked = match host {
        url::Host::Domain(domain) => is_local_hostname(domain).then_some("local hostname"),
        url::Host::Ipv4(ip) => is_non_public_ipv4(ip).then_some("non-public address"),
        url::Host::Ipv6(ip) => is_non_public_ipv6(ip).then_some("non-public address"),
    };

    if let Some(reason) = blocked {
        let host = host.to_string();
        tracing::warn!(
            host = %host,
            url = raw,
            "Blocked private/localhost extension request (SSRF prevention)"
        );
        return Err(ExtensionError::egress_blocked(host, reason));
    }

    Ok(url)
}

/// `localhost` and anything under `.localhost`.
pub fn is_local_hostname(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    host == "localhost" || host.ends_with(".localhost")
}

pub fn is_non_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => is_non_public_ipv4(ip),
        IpAddr::V6(ip) => is_non_public_ipv6(ip),
    }
}

pub fn is_non_public_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()                              // 127.0.0.0/8
        || ip.is_private()                        // 10/8, 172.16/12, 192.168/16
        || ip.is_link_local()                     // 169.254.0.0/16
        || ip.is_unspecified()                    // 0.0.0.0
        || ip.is_broadcast()                      // 255.255.255.255
        || ip.is_multicast()                      // 224.0.0.0/4
        || ipv4_in_cidr(ip, [0, 0, 0, 0], 8)      // "this network"
        || ipv4_in_cidr(ip, [100, 64, 0, 0], 10) // CGNAT
}

pub fn is_non_public_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_non_public_ipv4(v4);
    }

    let first = ip.segments()[0];
    ip.is_loopback()                              // ::1
        || ip.is_unspecified()                    // ::
        || ip.is_multicast()                      // ff00::/8
        || (first & 0xfe00) == 0xfc00             // fc00::/7 unique local
        || (first & 0xffc0) == 0xfe80 // fe80::/10 link-local
}

fn ipv4_in_cidr(ip: Ipv4Addr, base: [u8; 4], prefix: u8) -> bool {
    let ip = u32::from(ip);
    let base = u32::from(Ipv4Addr::from(base));
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    (ip & mask) == (base & mask)
}

/// Requested timeout, or the default, never above the maximum.
pub fn clamp_timeout(requested_ms: Option<u64>, config: &EgressConfig) -> Duration {
    let ms = requested_ms
        .filter(|ms| *ms > 0)
        .unwrap_or(config.default_timeout_ms)
        .min(config.max_timeout_ms);
    Duration::from_millis(ms)
}

/// Rewrite a target URL to go through the egress proxy.
pub fn apply_proxy(target: &Url, proxy: &str) -> Result<Url> {
    let mut url = Url::parse(proxy)
        .map_err(|e| ExtensionError::Config(format!("invalid egress proxy URL '{}': {}", proxy, e)))?;
    url.query_pairs_mut().append_pair("target", target.as_str());
    Ok(url)
}

/// [`HttpTransport`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    resolve_dns: bool,
}

impl ReqwestTransport {
    pub fn new(resolve_dns: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            resolve_dns,
        })
    }

    /// Reject hostnames that resolve to non-public addresses.
    async fn check_dns(&self, target: &Url) -> Result<()> {
        let Some(url::Host::Domain(domain)) = target.host() else {
            return Ok(());
        };
        let port = target.port_or_known_default().unwrap_or(80);

        // Unresolvable hosts fail at connect time.
        let Ok(addrs) = tokio::net::lookup_host((domain, port)).await else {
            return Ok(());
        };

        for addr in addrs {
            if is_non_public_ip(addr.ip()) {
                tracing::warn!(
                    host = domain,
                    ip = %addr.ip(),
                    "Blocked extension request resolving to non-public address"
                );
                return Err(ExtensionError::egress_blocked(
                    domain,
                    format!("resolves to non-public address {}", addr.ip()),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<HttpResponse> {
        if self.resolve_dns {
            self.check_dns(&request.target).await?;
        }

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| ExtensionError::validation(format!("Invalid HTTP method: {}", e)))?;

        let mut req = self
            .client
            .request(method, request.url.clone())
            .timeout(request.timeout);
        for (key, value) in &request.headers {
            req = req.header(key, value);
        }
        if let Some(body) = request.body {
            req = req.body(body);
        }

        let mut response = req.send().await?;

        let limit = request.max_response_bytes;
        if let Some(length) = response.content_length()
            && length > limit as u64
        {
            return Err(ExtensionError::ResponseTooLarge { limit });
        }

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
            .collect();

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(ExtensionError::ResponseTooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}
