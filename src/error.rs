use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("SIP message error: {0}")]
    SipMessageError(#[from] rsip::Error),

    #[error("no listening point bound for transport {0}")]
    TransportUnavailable(rsip::Transport),

    #[error("dispatch error for {0}: {1}")]
    DispatchError(String, String),

    #[error("gateway store unavailable: {0}")]
    DataStoreError(String),

    #[error("registration rejected: {0}")]
    RegistrationRejected(rsip::StatusCode),

    #[error("DNS resolution error: {0}")]
    DnsResolutionError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Error: {0}")]
    Error(String),
}
