use super::{make_tag, make_via_branch, random_text, resolver::AddressResolver, CNONCE_LEN};
use crate::config::RegistryConfig;
use crate::registry::provider::SipProvider;
use crate::Result;
use rsip::headers::auth::AuthQop;
use rsip::prelude::{HeadersExt, ToTypedHeader};
use rsip::services::DigestGenerator;
use rsip::typed::{Authorization, ProxyAuthorization};
use rsip::{Header, Param, Transport};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Header name correlating REGISTER transactions back to their gateway.
pub const GATEWAY_REF_HEADER: &str = "X-Gateway-Ref";

const ALLOW_METHODS: [&str; 6] = ["INVITE", "ACK", "BYE", "CANCEL", "REGISTER", "OPTIONS"];

/// Builds GIN-style REGISTER requests (RFC 6140): one bulk registration
/// per gateway, marked by the valueless `bnc` Contact parameter and the
/// `gin` option tag in Require/Proxy-Require.
pub struct RegisterRequestBuilder {
    config: Arc<RegistryConfig>,
    provider: Arc<dyn SipProvider>,
    resolver: AddressResolver,
    cseq: AtomicU64,
}

impl RegisterRequestBuilder {
    pub fn new(config: Arc<RegistryConfig>, provider: Arc<dyn SipProvider>) -> Self {
        let resolver = AddressResolver::new(config.clone(), provider.clone());
        Self {
            config,
            provider,
            resolver,
            cseq: AtomicU64::new(0),
        }
    }

    fn next_cseq(&self) -> u64 {
        self.cseq.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build_register(
        &self,
        username: &str,
        gw_ref: &str,
        gw_host: &str,
        transport: Transport,
        received: Option<&str>,
        rport: Option<u16>,
        expires: u32,
    ) -> Result<rsip::Request> {
        let contact_addr = self.resolver.resolve(transport, received, rport)?;

        let request_uri = rsip::Uri {
            scheme: Some(rsip::Scheme::Sip),
            host_with_port: rsip::HostWithPort::try_from(gw_host)?,
            ..Default::default()
        };

        let aor = rsip::Uri {
            scheme: Some(rsip::Scheme::Sip),
            auth: Some(rsip::auth::Auth {
                user: username.to_string(),
                password: None,
            }),
            host_with_port: rsip::HostWithPort::try_from(gw_host)?,
            ..Default::default()
        };

        let via = rsip::typed::Via {
            version: rsip::Version::V2,
            transport,
            uri: rsip::Uri {
                host_with_port: contact_addr.clone(),
                ..Default::default()
            },
            params: vec![make_via_branch(), Param::Other("rport".into(), None)],
        };

        let from = rsip::typed::From {
            display_name: None,
            uri: aor.clone(),
            params: vec![],
        }
        .with_tag(make_tag());

        let to = rsip::typed::To {
            display_name: None,
            uri: aor.clone(),
            params: vec![],
        };

        // bnc carries no value; it marks the Contact as a bulk number
        // contact for the whole gateway.
        let contact = rsip::typed::Contact {
            display_name: None,
            uri: rsip::Uri {
                scheme: Some(rsip::Scheme::Sip),
                auth: Some(rsip::auth::Auth {
                    user: username.to_string(),
                    password: None,
                }),
                host_with_port: contact_addr,
                ..Default::default()
            },
            params: vec![Param::Other("bnc".into(), None)],
        };

        let mut headers: Vec<Header> = vec![
            Header::Via(via.into()),
            Header::CallId(self.provider.new_call_id()),
            Header::From(from.into()),
            Header::To(to.into()),
            Header::CSeq(format!("{} REGISTER", self.next_cseq()).into()),
            contact.into(),
            Header::Expires(expires.into()),
            Header::MaxForwards(70.into()),
            Header::ProxyRequire("gin".into()),
            Header::Require("gin".into()),
            Header::Supported("path".into()),
        ];
        for method in ALLOW_METHODS {
            headers.push(Header::Allow(method.into()));
        }
        headers.push(Header::UserAgent(self.config.user_agent().into()));
        headers.push(Header::Other(
            GATEWAY_REF_HEADER.to_string(),
            gw_ref.to_string(),
        ));

        Ok(rsip::Request {
            method: rsip::Method::Register,
            uri: request_uri,
            headers: headers.into(),
            body: vec![],
            version: rsip::Version::V2,
        })
    }

    /// Re-issue `original` with credentials answering `challenge`. Bumps
    /// CSeq and replaces the Via branch so the retry forms a new
    /// transaction.
    pub fn with_authorization(
        &self,
        original: &rsip::Request,
        challenge: &rsip::typed::WwwAuthenticate,
        username: &str,
        secret: &str,
        proxy: bool,
    ) -> Result<rsip::Request> {
        let mut request = original.clone();

        let auth_qop = AuthQop::Auth {
            cnonce: random_text(CNONCE_LEN),
            nc: 1,
        };

        let generator = DigestGenerator {
            username,
            password: secret,
            algorithm: challenge.algorithm.unwrap_or_default(),
            nonce: challenge.nonce.as_str(),
            method: &original.method,
            qop: Some(&auth_qop),
            uri: &original.uri,
            realm: challenge.realm.as_str(),
        };

        let auth = Authorization {
            scheme: challenge.scheme.clone(),
            username: username.to_string(),
            realm: challenge.realm.clone(),
            nonce: challenge.nonce.clone(),
            uri: original.uri.clone(),
            response: generator.compute(),
            algorithm: challenge.algorithm,
            opaque: challenge.opaque.clone(),
            qop: Some(auth_qop),
        };

        let mut via = request.via_header()?.typed()?;
        via.params.retain(|p| !matches!(p, Param::Branch(_)));
        via.params.push(make_via_branch());

        let next_seq = self.next_cseq();
        request.headers.retain(|h| {
            !matches!(
                h,
                Header::Via(_)
                    | Header::CSeq(_)
                    | Header::Authorization(_)
                    | Header::ProxyAuthorization(_)
            )
        });
        request.headers.unique_push(Header::Via(via.into()));
        request
            .headers
            .unique_push(Header::CSeq(format!("{} REGISTER", next_seq).into()));
        if proxy {
            request.headers.unique_push(ProxyAuthorization(auth).into());
        } else {
            request.headers.unique_push(auth.into());
        }

        Ok(request)
    }
}
