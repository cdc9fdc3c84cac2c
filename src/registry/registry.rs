use super::{
    builder::{RegisterRequestBuilder, GATEWAY_REF_HEADER},
    cache::{RegistrationCache, RegistrationEntry},
    dispatcher::Dispatcher,
    gateway::{Gateway, GatewayStore},
    provider::SipProvider,
};
use crate::config::{RegistryConfig, DEFAULT_EXPIRES};
use crate::{Error, Result};
use rsip::prelude::{HeadersExt, ToTypedHeader, UntypedHeader};
use rsip::{Header, Param, StatusCode, StatusCodeKind};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const INITIAL_DELAY: Duration = Duration::from_secs(10);

/// Public address observed by a registrar, from the `received`/`rport`
/// parameters it echoes in our Via.
#[derive(Debug, Clone)]
struct NatBinding {
    received: String,
    rport: Option<u16>,
}

/// Maintains outbound registrations with all configured gateways.
///
/// A periodic pass asks the cache which gateway URIs have gone stale and
/// re-REGISTERs them; the embedding SIP stack feeds responses back through
/// [`Registry::handle_register_response`]. All failures are absorbed per
/// gateway per pass.
pub struct Registry {
    config: Arc<RegistryConfig>,
    store: Arc<dyn GatewayStore>,
    cache: Arc<RegistrationCache>,
    builder: RegisterRequestBuilder,
    dispatcher: Dispatcher,
    nat_binding: RwLock<Option<NatBinding>>,
    cancel_token: CancellationToken,
}

impl Registry {
    pub fn new(
        config: RegistryConfig,
        store: Arc<dyn GatewayStore>,
        provider: Arc<dyn SipProvider>,
    ) -> Self {
        let config = Arc::new(config);
        let cache = Arc::new(RegistrationCache::new(config.check_expires_minutes()));
        let builder = RegisterRequestBuilder::new(config.clone(), provider.clone());
        let dispatcher = Dispatcher::new(provider, cache.clone());
        Self {
            config,
            store,
            cache,
            builder,
            dispatcher,
            nat_binding: RwLock::new(None),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Schedule the periodic registration pass. The first pass runs after a
    /// short settle delay, then every `check_expires_time` minutes.
    pub fn start(self: &Arc<Self>) {
        let registry = self.clone();
        let token = self.cancel_token.clone();
        let period = Duration::from_secs(self.config.check_expires_minutes() * 60);
        info!(period = ?period, "starting gateway registration loop");
        tokio::spawn(async move {
            select! {
                _ = token.cancelled() => {
                    info!("gateway registration loop cancelled");
                }
                _ = registry.run(period) => {}
            }
        });
    }

    /// Cancel future passes. In-flight REGISTER transactions are not
    /// cancelled; late responses still update the cache.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    async fn run(&self, period: Duration) {
        sleep(INITIAL_DELAY).await;
        loop {
            self.tick().await;
            sleep(period).await;
        }
    }

    /// One registration pass over every configured gateway. Never fails;
    /// anything that goes wrong is contained to the gateway it hit.
    pub async fn tick(&self) {
        let gateways = match self.store.get_gateways().await {
            Ok(gateways) => gateways,
            Err(e) => {
                warn!(error = %e, "gateway store unavailable, skipping registration pass");
                return;
            }
        };

        for gateway in gateways {
            if gateway.username.is_none() {
                continue;
            }
            self.check_gateway(&gateway).await;
        }
    }

    async fn check_gateway(&self, gateway: &Gateway) {
        let Some(primary_uri) = gateway.uri() else {
            return;
        };
        let expires = gateway.expires();

        if self.cache.is_expired(&primary_uri) {
            self.register_host(gateway, &gateway.host, expires).await;
        }

        // Additional registrars fire on the primary key's expiry, so the
        // whole group refreshes together.
        for host in gateway.registries.iter().flatten() {
            if self.cache.is_expired(&primary_uri) {
                self.register_host(gateway, host, expires).await;
            }
        }
    }

    async fn register_host(&self, gateway: &Gateway, host: &str, expires: u32) {
        let (Some(username), Some(uri)) = (gateway.username.as_deref(), gateway.uri_for(host))
        else {
            return;
        };
        let Some(transport) = gateway.transport() else {
            warn!(
                gateway = %gateway.display_name(),
                transport = ?gateway.transport,
                "unknown transport, skipping registration"
            );
            return;
        };

        let (received, rport) = self.current_nat_binding();
        let request = match self.builder.build_register(
            username,
            &gateway.gw_ref,
            host,
            transport,
            received.as_deref(),
            rport,
            expires,
        ) {
            Ok(request) => request,
            Err(Error::TransportUnavailable(transport)) => {
                error!(
                    gateway = %gateway.display_name(),
                    transport = %transport,
                    "no listening point for transport, skipping registration"
                );
                return;
            }
            Err(e) => {
                warn!(gateway = %gateway.display_name(), error = %e, "failed to build REGISTER");
                return;
            }
        };

        self.dispatcher
            .send(request, &uri, gateway.display_name())
            .await;
    }

    /// Feed a REGISTER response back into the registry, paired with the
    /// request that originated the transaction.
    pub async fn handle_register_response(
        &self,
        original: &rsip::Request,
        response: rsip::Response,
    ) -> Result<()> {
        let to_uri = original.to_header()?.uri()?;
        let username = to_uri
            .auth
            .as_ref()
            .map(|auth| auth.user.clone())
            .unwrap_or_default();
        let host = to_uri.host_with_port.host.to_string();
        let uri = format!("sip:{}@{}", username, host);
        let gw_ref = gateway_ref_of(original);

        match response.status_code {
            StatusCode::OK => {
                self.on_register_ok(&uri, &username, &host, original, &response)
                    .await;
                Ok(())
            }
            StatusCode::Unauthorized => {
                self.on_auth_challenge(original, &response, &uri, gw_ref.as_deref(), false)
                    .await
            }
            StatusCode::ProxyAuthenticationRequired => {
                self.on_auth_challenge(original, &response, &uri, gw_ref.as_deref(), true)
                    .await
            }
            ref code if matches!(code.kind(), StatusCodeKind::Provisional) => Ok(()),
            code => {
                self.cache.invalidate(&uri);
                warn!(
                    gateway_ref = ?gw_ref,
                    uri = %uri,
                    status = %code,
                    "registration rejected, retrying next pass"
                );
                Ok(())
            }
        }
    }

    /// Transaction timeout for an outstanding REGISTER: drop the entry and
    /// let the next pass retry.
    pub fn handle_register_timeout(&self, original: &rsip::Request) -> Result<()> {
        let to_uri = original.to_header()?.uri()?;
        let username = to_uri
            .auth
            .as_ref()
            .map(|auth| auth.user.clone())
            .unwrap_or_default();
        let uri = format!("sip:{}@{}", username, to_uri.host_with_port.host);
        self.cache.invalidate(&uri);
        warn!(uri = %uri, "REGISTER transaction timed out");
        Ok(())
    }

    async fn on_register_ok(
        &self,
        uri: &str,
        username: &str,
        host: &str,
        original: &rsip::Request,
        response: &rsip::Response,
    ) {
        self.learn_nat_binding(response);

        let granted = granted_expires(original, response);
        let expires = self.cache.effective_expires(granted);
        let ip = match resolve_host_ip(host).await {
            Ok(ip) => ip,
            Err(e) => {
                debug!(host = %host, error = %e, "keeping unresolved host in record");
                host.to_string()
            }
        };

        self.cache.put(
            uri,
            RegistrationEntry::new(username.to_string(), host.to_string(), ip, expires),
        );
        info!(uri = %uri, granted = granted, expires = expires, "gateway registration stored");
    }

    async fn on_auth_challenge(
        &self,
        original: &rsip::Request,
        response: &rsip::Response,
        uri: &str,
        gw_ref: Option<&str>,
        proxy: bool,
    ) -> Result<()> {
        if has_authorization(original) {
            self.cache.invalidate(uri);
            warn!(uri = %uri, "authentication rejected after credentials were sent");
            return Ok(());
        }

        let Some(challenge) = auth_challenge(response, proxy)? else {
            self.cache.invalidate(uri);
            warn!(uri = %uri, "challenge response carries no authenticate header");
            return Ok(());
        };

        let Some(gateway) = self.find_gateway(gw_ref, uri).await else {
            warn!(uri = %uri, gateway_ref = ?gw_ref, "no configured gateway for challenge");
            return Ok(());
        };
        let Some(username) = gateway.username.as_deref() else {
            return Ok(());
        };
        let secret = gateway.secret.as_deref().unwrap_or_default();

        let request = self
            .builder
            .with_authorization(original, &challenge, username, secret, proxy)?;
        self.dispatcher
            .send(request, uri, gateway.display_name())
            .await;
        Ok(())
    }

    async fn find_gateway(&self, gw_ref: Option<&str>, uri: &str) -> Option<Gateway> {
        let gateways = match self.store.get_gateways().await {
            Ok(gateways) => gateways,
            Err(e) => {
                warn!(error = %e, "gateway store unavailable during challenge");
                return None;
            }
        };
        gateways.into_iter().find(|gw| {
            gw_ref.map(|r| gw.gw_ref == r).unwrap_or(false)
                || gw.uri().as_deref() == Some(uri)
                || gw
                    .registries
                    .iter()
                    .flatten()
                    .any(|h| gw.uri_for(h).as_deref() == Some(uri))
        })
    }

    fn learn_nat_binding(&self, response: &rsip::Response) {
        let Ok(via) = response.via_header() else {
            return;
        };
        let Ok(typed) = via.typed() else {
            return;
        };

        let mut received = None;
        let mut rport = None;
        for param in &typed.params {
            match param {
                Param::Received(value) => received = Some(value.to_string()),
                Param::Other(name, Some(value))
                    if name.value().eq_ignore_ascii_case("rport") =>
                {
                    rport = value.value().parse::<u16>().ok();
                }
                _ => {}
            }
        }

        if let Some(received) = received {
            debug!(received = %received, rport = ?rport, "learned public address from Via");
            *self.nat_binding.write().unwrap() = Some(NatBinding { received, rport });
        }
    }

    fn current_nat_binding(&self) -> (Option<String>, Option<u16>) {
        match self.nat_binding.read().unwrap().as_ref() {
            Some(binding) => (Some(binding.received.clone()), binding.rport),
            None => (None, None),
        }
    }

    /// Current registration records, for operator views.
    pub fn snapshot(&self) -> Vec<RegistrationEntry> {
        self.cache.snapshot()
    }

    pub fn get_registration(&self, uri: &str) -> Option<RegistrationEntry> {
        self.cache.get_if_present(uri)
    }

    pub fn is_registered(&self, username: &str, host: &str) -> bool {
        !self.cache.is_expired(&format!("sip:{}@{}", username, host))
    }
}

fn gateway_ref_of(request: &rsip::Request) -> Option<String> {
    request.headers.iter().find_map(|header| match header {
        Header::Other(name, value) if name.eq_ignore_ascii_case(GATEWAY_REF_HEADER) => {
            Some(value.clone())
        }
        _ => None,
    })
}

fn has_authorization(request: &rsip::Request) -> bool {
    request
        .headers
        .iter()
        .any(|header| matches!(header, Header::Authorization(_) | Header::ProxyAuthorization(_)))
}

fn auth_challenge(
    response: &rsip::Response,
    proxy: bool,
) -> Result<Option<rsip::typed::WwwAuthenticate>> {
    if proxy {
        for header in response.headers.iter() {
            if let Header::ProxyAuthenticate(header) = header {
                return Ok(Some(header.typed()?.0));
            }
        }
        Ok(None)
    } else {
        match response.www_authenticate_header() {
            Some(header) => Ok(Some(header.typed()?)),
            None => Ok(None),
        }
    }
}

/// Lifetime the server actually granted: the Contact `expires` parameter
/// wins, then the Expires header, then whatever the request asked for.
fn granted_expires(original: &rsip::Request, response: &rsip::Response) -> u32 {
    if let Ok(contact) = response.contact_header() {
        if let Ok(typed) = contact.typed() {
            if let Some(expires) = typed.expires() {
                if let Ok(secs) = expires.seconds() {
                    return secs;
                }
            }
        }
    }
    if let Some(header) = response.expires_header() {
        if let Ok(secs) = header.value().parse::<u32>() {
            return secs;
        }
    }
    original
        .expires_header()
        .and_then(|header| header.value().parse::<u32>().ok())
        .unwrap_or(DEFAULT_EXPIRES)
}

async fn resolve_host_ip(host: &str) -> Result<String> {
    if host.parse::<std::net::IpAddr>().is_ok() {
        return Ok(host.to_string());
    }
    let mut addrs = tokio::net::lookup_host((host, 5060u16))
        .await
        .map_err(|e| Error::DnsResolutionError(e.to_string()))?;
    addrs
        .next()
        .map(|addr| addr.ip().to_string())
        .ok_or_else(|| Error::DnsResolutionError(format!("no address for {}", host)))
}
