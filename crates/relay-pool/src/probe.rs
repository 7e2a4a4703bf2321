//! Node health probing
//!
//! A probe answers one question: does traffic routed through this node reach
//! the internet from an acceptable location? `IpApiProbe` answers it by asking
//! a geolocation service through the node's local listener.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, warn};

use crate::node::Node;

/// Geolocation endpoint queried through the node.
pub const PROBE_URL: &str = "http://ip-api.com/json";

/// Checks a running node end to end.
///
/// Returns a boxed future so the probe can be held as `Arc<dyn HealthProbe>`.
pub trait HealthProbe: Send + Sync {
    fn probe<'a>(
        &'a self,
        node: &'a Node,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

/// Probe that rejects nodes exiting in a blocked country.
#[derive(Debug, Clone)]
pub struct IpApiProbe {
    url: String,
    blocked_countries: Vec<String>,
}

impl IpApiProbe {
    pub fn new<S: AsRef<str>>(blocked_countries: &[S]) -> Self {
        Self {
            url: PROBE_URL.to_string(),
            blocked_countries: blocked_countries
                .iter()
                .map(|c| c.as_ref().to_ascii_uppercase())
                .collect(),
        }
    }

    /// Query a different endpoint. It must answer with ip-api style JSON.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn blocked_countries(&self) -> &[String] {
        &self.blocked_countries
    }

    async fn check(&self, node: &Node, timeout: Duration) -> Result<String, String> {
        let proxy_url = node.url().map_err(|e| e.to_string())?;
        let proxy = reqwest::Proxy::all(&proxy_url).map_err(|e| format!("bad proxy url: {e}"))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .build()
            .map_err(|e| format!("client build failed: {e}"))?;

        let body: serde_json::Value = client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| format!("request failed: {e}"))?
            .json()
            .await
            .map_err(|e| format!("invalid response body: {e}"))?;

        body["countryCode"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| "response has no countryCode".to_string())
    }
}

impl Default for IpApiProbe {
    fn default() -> Self {
        Self::new(&["CN"])
    }
}

impl HealthProbe for IpApiProbe {
    fn probe<'a>(
        &'a self,
        node: &'a Node,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            match self.check(node, timeout).await {
                Ok(country) if self.blocked_countries.contains(&country) => {
                    debug!(node = %node, country = %country, "node exits in blocked country");
                    false
                }
                Ok(country) => {
                    debug!(node = %node, country = %country, "probe passed");
                    true
                }
                Err(reason) => {
                    warn!(node = %node, reason = %reason, "probe failed");
                    false
                }
            }
        })
    }
}
