use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::control::{Proxy, ProxyConnector, ProxyControl, Toxic};

/// HTTP client for the Toxiproxy control API.
pub struct ToxiproxyClient {
    http: reqwest::Client,
    base_url: String,
}

impl ToxiproxyClient {
    /// `api_addr` is `host:port` of the control API, e.g. `localhost:8474`.
    pub fn new(api_addr: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: format!("http://{api_addr}"),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(response: reqwest::Response, action: &str) -> anyhow::Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("{action} failed with {status}: {body}")
    }
}

#[async_trait]
impl ProxyControl for ToxiproxyClient {
    async fn create_proxy(
        &self,
        name: &str,
        listen: &str,
        upstream: &str,
    ) -> anyhow::Result<Proxy> {
        let response = self
            .http
            .post(format!("{}/proxies", self.base_url))
            .json(&Proxy::new(name, listen, upstream))
            .send()
            .await
            .with_context(|| format!("Toxiproxy unreachable at {}", self.base_url))?;
        let proxy: Proxy = Self::check(response, &format!("create proxy {name}"))
            .await?
            .json()
            .await
            .context("Malformed proxy response")?;
        info!(
            name = %proxy.name,
            listen = %proxy.listen,
            upstream = %proxy.upstream,
            "Created proxy"
        );
        Ok(proxy)
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> anyhow::Result<Proxy> {
        let response = self
            .http
            .post(format!("{}/proxies/{name}", self.base_url))
            .json(&json!({ "enabled": enabled }))
            .send()
            .await
            .with_context(|| format!("Toxiproxy unreachable at {}", self.base_url))?;
        let proxy = Self::check(response, &format!("update proxy {name}"))
            .await?
            .json()
            .await
            .context("Malformed proxy response")?;
        Ok(proxy)
    }

    async fn add_toxic(&self, proxy: &str, toxic: &Toxic) -> anyhow::Result<Toxic> {
        let response = self
            .http
            .post(format!("{}/proxies/{proxy}/toxics", self.base_url))
            .json(toxic)
            .send()
            .await
            .with_context(|| format!("Toxiproxy unreachable at {}", self.base_url))?;
        let created = Self::check(response, &format!("add toxic {} to {proxy}", toxic.name))
            .await?
            .json()
            .await
            .context("Malformed toxic response")?;
        Ok(created)
    }

    async fn remove_toxic(&self, proxy: &str, toxic: &str) -> anyhow::Result<()> {
        let response = self
            .http
            .delete(format!("{}/proxies/{proxy}/toxics/{toxic}", self.base_url))
            .send()
            .await
            .with_context(|| format!("Toxiproxy unreachable at {}", self.base_url))?;
        Self::check(response, &format!("remove toxic {toxic} from {proxy}")).await?;
        Ok(())
    }

    async fn reset(&self) -> anyhow::Result<()> {
        let response = self
            .http
            .post(format!("{}/reset", self.base_url))
            .send()
            .await
            .with_context(|| format!("Toxiproxy unreachable at {}", self.base_url))?;
        Self::check(response, "reset").await?;
        Ok(())
    }
}

/// Connects [`ToxiproxyClient`]s to sidecars.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToxiproxyConnector;

impl ProxyConnector for ToxiproxyConnector {
    fn connect(&self, api_addr: &str) -> anyhow::Result<Arc<dyn ProxyControl>> {
        Ok(Arc::new(ToxiproxyClient::new(api_addr)?))
    }
}
