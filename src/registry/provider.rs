use crate::Result;
use async_trait::async_trait;
use rsip::Transport;

/// A (transport, IP, port) triple bound by the SIP stack.
#[derive(Debug, Clone)]
pub struct ListeningPoint {
    pub transport: Transport,
    pub addr: rsip::HostWithPort,
}

/// The slice of the SIP stack this subsystem consumes: mint identifiers,
/// look up listening points, and emit a REGISTER on a fresh client
/// transaction. Responses flow back through
/// `Registry::handle_register_response`, driven by the stack's response
/// listener.
#[async_trait]
pub trait SipProvider: Send + Sync {
    fn listening_point(&self, transport: Transport) -> Option<ListeningPoint>;

    fn new_call_id(&self) -> rsip::headers::CallId;

    /// Allocate a new client transaction for `request` and send it. Blocks
    /// only for the local transaction handoff, not the network round-trip.
    async fn send_register(&self, request: rsip::Request) -> Result<()>;
}
