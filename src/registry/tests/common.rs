use crate::config::RegistryConfig;
use crate::registry::gateway::MemoryGatewayStore;
use crate::registry::provider::{ListeningPoint, SipProvider};
use crate::registry::registry::Registry;
use crate::registry::{random_text, Gateway, GatewayStore};
use crate::{Error, Result};
use async_trait::async_trait;
use rsip::prelude::{HeadersExt, ToTypedHeader};
use rsip::{Header, Param, StatusCode, Transport};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

/// SIP provider double: records sent requests, serves configurable
/// listening points, and can be switched into a failing mode.
pub struct MockSipProvider {
    listening_points: Vec<ListeningPoint>,
    sent: Mutex<Vec<rsip::Request>>,
    fail_sends: AtomicBool,
}

impl MockSipProvider {
    pub fn new() -> Self {
        Self::with_listening_point(Transport::Udp, "10.0.0.5:5060")
    }

    pub fn with_listening_point(transport: Transport, addr: &str) -> Self {
        Self {
            listening_points: vec![ListeningPoint {
                transport,
                addr: rsip::HostWithPort::try_from(addr).expect("listening point addr"),
            }],
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub fn without_listening_points() -> Self {
        Self {
            listening_points: Vec::new(),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    pub fn sent_requests(&self) -> Vec<rsip::Request> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl SipProvider for MockSipProvider {
    fn listening_point(&self, transport: Transport) -> Option<ListeningPoint> {
        self.listening_points
            .iter()
            .find(|lp| lp.transport == transport)
            .cloned()
    }

    fn new_call_id(&self) -> rsip::headers::CallId {
        format!("{}@test.invalid", random_text(22)).into()
    }

    async fn send_register(&self, request: rsip::Request) -> Result<()> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(Error::TransportUnavailable(Transport::Udp));
        }
        self.sent.lock().unwrap().push(request);
        Ok(())
    }
}

/// Gateway store that can be flipped into an unavailable state.
pub struct FlakyGatewayStore {
    inner: MemoryGatewayStore,
    fail: AtomicBool,
}

impl FlakyGatewayStore {
    pub fn new(gateways: Vec<Gateway>) -> Self {
        Self {
            inner: MemoryGatewayStore::new(gateways),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl GatewayStore for FlakyGatewayStore {
    async fn get_gateways(&self) -> anyhow::Result<Vec<Gateway>> {
        if self.fail.load(Ordering::Relaxed) {
            anyhow::bail!("gateway store down");
        }
        self.inner.get_gateways().await
    }
}

pub fn test_gateway() -> Gateway {
    Gateway {
        gw_ref: "gw1".to_string(),
        name: Some("carrier-a".to_string()),
        username: Some("alice".to_string()),
        secret: Some("secret".to_string()),
        host: "pbx.example.com".to_string(),
        transport: Some("UDP".to_string()),
        expires: Some(3600),
        registries: None,
    }
}

pub fn create_test_registry(
    gateways: Vec<Gateway>,
) -> (Arc<Registry>, Arc<MockSipProvider>, Arc<FlakyGatewayStore>) {
    create_test_registry_with_config(RegistryConfig::default(), gateways)
}

pub fn create_test_registry_with_config(
    config: RegistryConfig,
    gateways: Vec<Gateway>,
) -> (Arc<Registry>, Arc<MockSipProvider>, Arc<FlakyGatewayStore>) {
    let provider = Arc::new(MockSipProvider::new());
    let store = Arc::new(FlakyGatewayStore::new(gateways));
    let registry = Arc::new(Registry::new(config, store.clone(), provider.clone()));
    (registry, provider, store)
}

/// Minimal response to `request`, the way a registrar would mirror the
/// transaction headers back.
pub fn response_for(
    request: &rsip::Request,
    status: StatusCode,
    expires: Option<u32>,
) -> rsip::Response {
    let mut headers = request.headers.clone();
    headers.retain(|h| {
        matches!(
            h,
            Header::Via(_) | Header::CallId(_) | Header::From(_) | Header::To(_) | Header::CSeq(_)
        )
    });
    if let Some(expires) = expires {
        headers.push(Header::Expires(expires.into()));
    }
    rsip::Response {
        status_code: status,
        version: rsip::Version::V2,
        headers,
        body: vec![],
    }
}

pub fn ok_response(request: &rsip::Request, granted: u32) -> rsip::Response {
    response_for(request, StatusCode::OK, Some(granted))
}

/// 200 OK whose top Via carries `received`/`rport`, as a NAT-aware
/// registrar reports them.
pub fn ok_response_with_nat(
    request: &rsip::Request,
    granted: u32,
    received: &str,
    rport: u16,
) -> rsip::Response {
    let mut response = ok_response(request, granted);
    let mut via = response
        .via_header()
        .expect("response via")
        .typed()
        .expect("typed via");
    via.params
        .push(Param::Received(rsip::param::Received::new(received.to_string())));
    via.params.push(Param::Other(
        rsip::param::OtherParam::new("rport"),
        Some(rsip::param::OtherParamValue::new(rport.to_string())),
    ));
    response.headers.unique_push(Header::Via(via.into()));
    response
}

pub fn unauthorized_response(request: &rsip::Request, realm: &str) -> rsip::Response {
    let mut response = response_for(request, StatusCode::Unauthorized, None);
    let challenge = rsip::typed::WwwAuthenticate {
        scheme: rsip::headers::auth::Scheme::Digest,
        realm: realm.to_string(),
        domain: None,
        nonce: random_text(16),
        opaque: None,
        stale: None,
        algorithm: Some(rsip::headers::auth::Algorithm::Md5),
        qop: Some(rsip::headers::auth::Qop::Auth),
        charset: None,
    };
    response
        .headers
        .push(Header::WwwAuthenticate(challenge.into()));
    response
}
