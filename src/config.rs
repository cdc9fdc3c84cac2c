use crate::Result;
use serde::{Deserialize, Serialize};

const USER_AGENT: &str = "gwregistry";

/// Default requested registration lifetime when a gateway does not carry one.
pub const DEFAULT_EXPIRES: u32 = 3600;

/// Tick period and cache write-expiry, in minutes.
const DEFAULT_CHECK_EXPIRES_TIME: u64 = 1;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Public address to advertise in Contact/Via when listening on a
    /// private IP behind NAT.
    pub extern_addr: Option<String>,
    pub user_agent: Option<String>,
    /// Registration check period in minutes. Doubles as the cache
    /// write-expiry interval.
    pub check_expires_time: Option<u64>,
}

impl RegistryConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Error(format!("{}: {}", e, path)))
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(USER_AGENT)
    }

    pub fn check_expires_minutes(&self) -> u64 {
        self.check_expires_time.unwrap_or(DEFAULT_CHECK_EXPIRES_TIME)
    }
}
