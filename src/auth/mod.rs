//! Connection authorization by certificate role

mod authz;
mod dn;
mod peer;

pub use authz::{AuthOutcome, AuthProvider, AuthzFactory, Unauthorized};
pub use dn::{ou_groups, parse_dn, roles_from_dn};
pub use peer::{ConnectionPeer, PeerContext, PeerError, PeerPrincipal, Principal};

use thiserror::Error;

/// Faults raised while setting authorization up, as opposed to a refusal
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no authorized roles configured")]
    NoAuthorizedRoles,

    #[error("cannot read peer: {0}")]
    Peer(#[from] PeerError),
}
