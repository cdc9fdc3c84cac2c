use super::common::MockSipProvider;
use crate::config::RegistryConfig;
use crate::registry::resolver::AddressResolver;
use crate::Error;
use rsip::Transport;
use std::sync::Arc;

fn resolver_with(config: RegistryConfig, provider: MockSipProvider) -> AddressResolver {
    AddressResolver::new(Arc::new(config), Arc::new(provider))
}

#[test]
fn test_resolves_bound_address() {
    let resolver = resolver_with(RegistryConfig::default(), MockSipProvider::new());
    let addr = resolver.resolve(Transport::Udp, None, None).unwrap();
    assert_eq!(addr.to_string(), "10.0.0.5:5060");
}

#[test]
fn test_extern_addr_override() {
    let config = RegistryConfig {
        extern_addr: Some("198.51.100.9".to_string()),
        ..Default::default()
    };
    let resolver = resolver_with(config, MockSipProvider::new());
    let addr = resolver.resolve(Transport::Udp, None, None).unwrap();
    assert_eq!(addr.to_string(), "198.51.100.9:5060");
}

#[test]
fn test_received_beats_extern_addr() {
    let config = RegistryConfig {
        extern_addr: Some("198.51.100.9".to_string()),
        ..Default::default()
    };
    let resolver = resolver_with(config, MockSipProvider::new());
    let addr = resolver
        .resolve(Transport::Udp, Some("203.0.113.7"), Some(40000))
        .unwrap();
    assert_eq!(addr.to_string(), "203.0.113.7:40000");
}

#[test]
fn test_rport_only_overrides_port() {
    let resolver = resolver_with(RegistryConfig::default(), MockSipProvider::new());
    let addr = resolver.resolve(Transport::Udp, None, Some(40000)).unwrap();
    assert_eq!(addr.to_string(), "10.0.0.5:40000");
}

#[test]
fn test_unbound_transport_fails() {
    let resolver = resolver_with(
        RegistryConfig::default(),
        MockSipProvider::with_listening_point(Transport::Udp, "10.0.0.5:5060"),
    );
    let result = resolver.resolve(Transport::Tls, None, None);
    assert!(matches!(
        result,
        Err(Error::TransportUnavailable(Transport::Tls))
    ));
}
