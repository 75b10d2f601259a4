use crate::crypto::CryptoError;
use crate::hash::IdentityId;
use crate::identity::IdentityError;
use thiserror::Error;

/// Reasons a ledger entry cannot be turned into a protocol record.
#[derive(Debug, Error)]
pub enum Error {
    #[error("expected {expected} external ids, found {found}")]
    ExternalIdCount { expected: usize, found: usize },

    #[error("external id {index} is malformed: {reason}")]
    MalformedExternalId { index: usize, reason: String },

    #[error("entry payload of {size} bytes exceeds {max}")]
    EntryTooLarge { size: usize, max: usize },

    #[error("invalid signature on {0}")]
    InvalidSignature(&'static str),

    #[error("initiator key is not an active key of identity {0}")]
    InactiveKey(IdentityId),

    #[error("invalid entry content: {0}")]
    Content(#[from] serde_json::Error),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl Error {
    /// Only identity lookups touch the network while parsing.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Identity(e) if e.is_transient())
    }
}
