//! Role-based connection authorization
//!
//! A peer is admitted only when all of the following hold:
//! - the transport is secure
//! - the first protocol principal is an X.509 certificate
//! - the certificate subject carries at least one role in its OU
//! - one of those roles is configured as authorized

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::AuthError;
use super::dn::roles_from_dn;
use super::peer::{ConnectionPeer, PeerPrincipal, Principal};
use crate::bookie::StatusCode;
use crate::config::AuthConfig;

/// Why a peer was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unauthorized {
    #[error("connection is not secure")]
    InsecureConnection,

    #[error("peer presented no certificate")]
    NoCertificate,

    #[error("peer principal is not a certificate: {0}")]
    NotACertificate(String),

    #[error("certificate {subject} carries no role")]
    NoRole { subject: String },

    #[error("roles {roles:?} of {subject} are not authorized")]
    RoleNotAuthorized { subject: String, roles: Vec<String> },
}

impl Unauthorized {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::UnauthorizedAccess
    }
}

pub type AuthOutcome = Result<Principal, Unauthorized>;

type AuthCallback = Box<dyn FnOnce(AuthOutcome) + Send>;

/// Holds the authorized role set and hands out one provider per connection
#[derive(Debug, Clone)]
pub struct AuthzFactory {
    authorized_roles: Arc<BTreeSet<String>>,
}

impl AuthzFactory {
    pub fn init(config: &AuthConfig) -> Result<Self, AuthError> {
        let authorized_roles: BTreeSet<String> = config
            .authorized_roles
            .iter()
            .map(|role| role.trim())
            .filter(|role| !role.is_empty())
            .map(str::to_string)
            .collect();

        if authorized_roles.is_empty() {
            return Err(AuthError::NoAuthorizedRoles);
        }
        info!(roles = ?authorized_roles, "Authorization initialized");
        Ok(Self {
            authorized_roles: Arc::new(authorized_roles),
        })
    }

    pub fn authorized_roles(&self) -> &BTreeSet<String> {
        &self.authorized_roles
    }

    /// Bind a provider to `peer`. The peer's address is read here, so a peer
    /// that cannot report one fails now rather than at decision time.
    pub fn new_provider<F>(
        &self,
        peer: Arc<dyn ConnectionPeer>,
        callback: F,
    ) -> Result<AuthProvider, AuthError>
    where
        F: FnOnce(AuthOutcome) + Send + 'static,
    {
        let remote_addr = peer.remote_addr()?;
        debug!(%remote_addr, "Authorization provider created");
        Ok(AuthProvider {
            peer,
            remote_addr,
            authorized_roles: self.authorized_roles.clone(),
            callback: Box::new(callback),
        })
    }
}

/// Decides one connection. Consumed by [`AuthProvider::on_protocol_upgrade`],
/// so the callback runs exactly once.
pub struct AuthProvider {
    peer: Arc<dyn ConnectionPeer>,
    remote_addr: SocketAddr,
    authorized_roles: Arc<BTreeSet<String>>,
    callback: AuthCallback,
}

impl AuthProvider {
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn on_protocol_upgrade(self) {
        let remote_addr = self.remote_addr;
        let outcome = self.decide();

        match &outcome {
            Ok(principal) => {
                self.peer.set_authorized_id(principal.clone());
                info!(%remote_addr, %principal, "Peer authorized");
            }
            Err(reason) => warn!(%remote_addr, %reason, "Peer refused"),
        }

        let callback = self.callback;
        if catch_unwind(AssertUnwindSafe(move || callback(outcome))).is_err() {
            error!(%remote_addr, "Authorization callback panicked");
        }
    }

    fn decide(&self) -> AuthOutcome {
        if !self.peer.is_secure() {
            return Err(Unauthorized::InsecureConnection);
        }

        let principals = self.peer.protocol_principals();
        let subject = match principals.into_iter().next() {
            None => return Err(Unauthorized::NoCertificate),
            Some(PeerPrincipal::Other(other)) => return Err(Unauthorized::NotACertificate(other)),
            Some(PeerPrincipal::X509 { subject }) => subject,
        };

        let roles = roles_from_dn(&subject);
        if roles.is_empty() {
            return Err(Unauthorized::NoRole { subject });
        }

        let matched = roles
            .iter()
            .find(|role| self.authorized_roles.contains(role.as_str()))
            .cloned();
        match matched {
            Some(role) => Ok(Principal {
                role,
                name: subject,
            }),
            None => Err(Unauthorized::RoleNotAuthorized { subject, roles }),
        }
    }
}
