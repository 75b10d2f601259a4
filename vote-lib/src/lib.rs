pub mod ballot;
pub mod crypto;
pub mod eligibility;
pub mod entry;
mod error;
pub mod hash;
pub mod identity;
pub mod proposal;
pub mod results;
pub mod utils;
pub mod vote;

#[cfg(any(test, feature = "test-api"))]
pub mod testing;

pub use entry::{Entry, EntryKind};
pub use error::Error;
pub use hash::{ChainId, EntryHash, Hash, IdentityId, VoterId};
