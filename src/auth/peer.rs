use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer remote address is unavailable")]
    AddressUnavailable,

    #[error("invalid peer address: {0}")]
    InvalidAddress(String),
}

/// Identity bound into a connection once it is authorized
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    /// Subject DN of the peer certificate
    pub name: String,
    /// Authorized role that admitted the peer
    pub role: String,
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.role)
    }
}

/// Identity material a transport extracted from the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerPrincipal {
    /// X.509 certificate, by its subject DN
    X509 { subject: String },
    /// Anything that is not a certificate
    Other(String),
}

/// Security context of one inbound connection
pub trait ConnectionPeer: Send + Sync {
    fn remote_addr(&self) -> Result<SocketAddr, PeerError>;

    fn protocol_principals(&self) -> Vec<PeerPrincipal>;

    fn is_secure(&self) -> bool;

    fn set_authorized_id(&self, principal: Principal);

    fn authorized_id(&self) -> Option<Principal>;
}

/// Plain-data [`ConnectionPeer`] for transports that capture the handshake up
/// front
#[derive(Debug, Default)]
pub struct PeerContext {
    remote_addr: Option<SocketAddr>,
    secure: bool,
    principals: Vec<PeerPrincipal>,
    authorized: Mutex<Option<Principal>>,
}

impl PeerContext {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr: Some(remote_addr),
            ..Self::default()
        }
    }

    /// A peer whose address could not be determined
    pub fn unaddressed() -> Self {
        Self::default()
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_certificate(mut self, subject: impl Into<String>) -> Self {
        self.principals.push(PeerPrincipal::X509 {
            subject: subject.into(),
        });
        self
    }

    pub fn with_principal(mut self, principal: PeerPrincipal) -> Self {
        self.principals.push(principal);
        self
    }
}

impl ConnectionPeer for PeerContext {
    fn remote_addr(&self) -> Result<SocketAddr, PeerError> {
        self.remote_addr.ok_or(PeerError::AddressUnavailable)
    }

    fn protocol_principals(&self) -> Vec<PeerPrincipal> {
        self.principals.clone()
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    fn set_authorized_id(&self, principal: Principal) {
        *self.authorized.lock().unwrap_or_else(PoisonError::into_inner) = Some(principal);
    }

    fn authorized_id(&self) -> Option<Principal> {
        self.authorized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
