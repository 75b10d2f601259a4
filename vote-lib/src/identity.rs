use crate::crypto::PublicKey;
use crate::hash::IdentityId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity {0} not found")]
    NotFound(IdentityId),
    #[error("malformed key {key} for identity {identity}: {reason}")]
    MalformedKey {
        identity: IdentityId,
        key: String,
        reason: String,
    },
    #[error("identity lookup failed: {0}")]
    Unavailable(String),
}

impl IdentityError {
    pub fn is_transient(&self) -> bool {
        matches!(self, IdentityError::Unavailable(_))
    }
}

/// Source of the keys an identity was allowed to sign with at a given height.
pub trait IdentityOracle {
    fn active_signing_keys_at_height(
        &self,
        identity: &IdentityId,
        height: u32,
    ) -> Result<Vec<PublicKey>, IdentityError>;
}

impl<T: IdentityOracle + ?Sized> IdentityOracle for &T {
    fn active_signing_keys_at_height(
        &self,
        identity: &IdentityId,
        height: u32,
    ) -> Result<Vec<PublicKey>, IdentityError> {
        (**self).active_signing_keys_at_height(identity, height)
    }
}

impl<T: IdentityOracle + ?Sized> IdentityOracle for std::sync::Arc<T> {
    fn active_signing_keys_at_height(
        &self,
        identity: &IdentityId,
        height: u32,
    ) -> Result<Vec<PublicKey>, IdentityError> {
        (**self).active_signing_keys_at_height(identity, height)
    }
}

/// Signing keys of an identity the oracle does not know about are empty rather
/// than an error: voters without a registered identity still appear on rosters.
pub fn signing_keys_or_empty<I: IdentityOracle + ?Sized>(
    identities: &I,
    identity: &IdentityId,
    height: u32,
) -> Result<Vec<PublicKey>, IdentityError> {
    match identities.active_signing_keys_at_height(identity, height) {
        Err(IdentityError::NotFound(_)) => Ok(Vec::new()),
        other => other,
    }
}
