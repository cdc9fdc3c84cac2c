use crate::config::DEFAULT_EXPIRES;
use anyhow::Result;
use async_trait::async_trait;
use rsip::Transport;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// An upstream SIP peer (trunk/PBX) this server keeps an outbound
/// registration with. Read-only input from the gateway data store.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Gateway {
    /// Opaque stable identifier.
    #[serde(rename = "ref")]
    pub gw_ref: String,
    pub name: Option<String>,
    pub username: Option<String>,
    pub secret: Option<String>,
    /// Primary registrar host.
    pub host: String,
    pub transport: Option<String>,
    /// Requested registration lifetime in seconds.
    pub expires: Option<u32>,
    /// Additional registrar hosts under the same credentials.
    pub registries: Option<Vec<String>>,
}

impl Gateway {
    /// Primary gateway URI, `sip:<username>@<host>`. The cache key.
    /// None when the gateway carries no credentials.
    pub fn uri(&self) -> Option<String> {
        self.uri_for(&self.host)
    }

    /// Gateway URI for one of the additional registrar hosts.
    pub fn uri_for(&self, host: &str) -> Option<String> {
        self.username
            .as_ref()
            .map(|user| format!("sip:{}@{}", user, host))
    }

    pub fn transport(&self) -> Option<Transport> {
        match self.transport.as_deref() {
            Some(value) => parse_transport_token(value),
            None => Some(Transport::Udp),
        }
    }

    pub fn expires(&self) -> u32 {
        self.expires.unwrap_or(DEFAULT_EXPIRES)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.gw_ref)
    }
}

fn parse_transport_token(value: &str) -> Option<Transport> {
    match value.to_ascii_lowercase().as_str() {
        "udp" => Some(Transport::Udp),
        "tcp" => Some(Transport::Tcp),
        "tls" => Some(Transport::Tls),
        "ws" => Some(Transport::Ws),
        "wss" => Some(Transport::Wss),
        _ => None,
    }
}

/// Narrow read interface over the gateway data store. A non-Ok result
/// skips the whole registration pass without touching the cache.
#[async_trait]
pub trait GatewayStore: Send + Sync {
    async fn get_gateways(&self) -> Result<Vec<Gateway>>;
}

pub struct MemoryGatewayStore {
    gateways: RwLock<Vec<Gateway>>,
}

impl MemoryGatewayStore {
    pub fn new(gateways: Vec<Gateway>) -> Self {
        Self {
            gateways: RwLock::new(gateways),
        }
    }

    pub fn replace(&self, gateways: Vec<Gateway>) {
        *self.gateways.write().unwrap() = gateways;
    }
}

#[async_trait]
impl GatewayStore for MemoryGatewayStore {
    async fn get_gateways(&self) -> Result<Vec<Gateway>> {
        Ok(self.gateways.read().unwrap().clone())
    }
}
