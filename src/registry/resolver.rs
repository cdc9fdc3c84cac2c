use super::provider::SipProvider;
use crate::config::RegistryConfig;
use crate::{Error, Result};
use rsip::{HostWithPort, Transport};
use std::net::IpAddr;
use std::sync::Arc;

/// Resolves the local contact address for a transport: the listening
/// point's bound address, overridden by a configured external address and
/// by the `received`/`rport` values learned from NAT traversal.
pub struct AddressResolver {
    config: Arc<RegistryConfig>,
    provider: Arc<dyn SipProvider>,
}

impl AddressResolver {
    pub fn new(config: Arc<RegistryConfig>, provider: Arc<dyn SipProvider>) -> Self {
        Self { config, provider }
    }

    pub fn resolve(
        &self,
        transport: Transport,
        received: Option<&str>,
        rport: Option<u16>,
    ) -> Result<HostWithPort> {
        let lp = self
            .provider
            .listening_point(transport)
            .ok_or(Error::TransportUnavailable(transport))?;

        let host = if let Some(received) = received {
            parse_host(received)
        } else if let Some(extern_addr) = self.config.extern_addr.as_deref() {
            parse_host(extern_addr)
        } else {
            lp.addr.host
        };

        let port = match rport {
            Some(rport) => Some(rport.into()),
            None => lp.addr.port,
        };

        Ok(HostWithPort { host, port })
    }
}

fn parse_host(value: &str) -> rsip::Host {
    match value.parse::<IpAddr>() {
        Ok(ip) => rsip::Host::IpAddr(ip),
        Err(_) => rsip::Host::Domain(value.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host() {
        assert!(matches!(parse_host("10.0.0.5"), rsip::Host::IpAddr(_)));
        assert!(matches!(
            parse_host("pbx.example.com"),
            rsip::Host::Domain(_)
        ));
    }
}
