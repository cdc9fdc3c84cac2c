use super::{cache::RegistrationCache, provider::SipProvider};
use crate::Error;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hands built REGISTER requests to the SIP provider. Failures never
/// propagate: the cache entry is dropped and the next pass retries.
pub struct Dispatcher {
    provider: Arc<dyn SipProvider>,
    cache: Arc<RegistrationCache>,
}

impl Dispatcher {
    pub fn new(provider: Arc<dyn SipProvider>, cache: Arc<RegistrationCache>) -> Self {
        Self { provider, cache }
    }

    /// Send `request` on a new client transaction. `gateway_uri` is the
    /// full cache key for the target host, `gateway` its display name.
    pub async fn send(&self, request: rsip::Request, gateway_uri: &str, gateway: &str) {
        debug!(gateway = %gateway, "sending REGISTER: {}", request);

        if let Err(e) = self.provider.send_register(request).await {
            self.cache.invalidate(gateway_uri);
            match e {
                Error::TransportUnavailable(_)
                | Error::SipMessageError(_)
                | Error::DispatchError(_, _) => {
                    warn!(
                        gateway = %gateway,
                        error = %e,
                        "unable to register with gateway, verify network connectivity"
                    );
                }
                _ => warn!(gateway = %gateway, error = %e, "REGISTER dispatch failed"),
            }
        }
    }
}
