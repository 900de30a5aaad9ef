use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::Duration;

pub const DEFAULT_PUBLIC_IP_URL: &str = "https://api.ipify.org?format=json";

/// Where the caller's public IPv4 address comes from (used to scope ingress rules).
#[async_trait]
pub trait PublicAddressSource: Send + Sync {
    async fn public_ipv4(&self) -> Result<Ipv4Addr>;
}

#[derive(Deserialize)]
struct IpResponse {
    ip: String,
}

pub struct HttpPublicIp {
    client: Client,
    url: String,
}

impl HttpPublicIp {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        // Default reqwest client has no overall timeout.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let url = std::env::var("CLOUDRIG_PUBLIC_IP_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_PUBLIC_IP_URL.to_string());
        Self::new(url)
    }
}

#[async_trait]
impl PublicAddressSource for HttpPublicIp {
    async fn public_ipv4(&self) -> Result<Ipv4Addr> {
        tracing::debug!("[public_ip] GET {}", self.url);
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!("⚠️ [public_ip] {} returned {}", self.url, status.as_u16());
            return Err(anyhow::anyhow!(
                "public IP lookup failed: status={} body={}",
                status.as_u16(),
                text
            ));
        }
        let body: IpResponse = resp.json().await?;
        let ip = body
            .ip
            .trim()
            .parse::<Ipv4Addr>()
            .with_context(|| format!("public IP lookup returned '{}'", body.ip))?;
        tracing::info!("🌐 [public_ip] caller address is {}", ip);
        Ok(ip)
    }
}

/// Fixed address, for tests and for callers that already know it.
pub struct StaticPublicIp(pub Ipv4Addr);

#[async_trait]
impl PublicAddressSource for StaticPublicIp {
    async fn public_ipv4(&self) -> Result<Ipv4Addr> {
        Ok(self.0)
    }
}
