use crate::crypto::{self, PublicKey, Signature};
use crate::hash::{ChainId, EntryHash, Hash};
use crate::Error;

pub const VOTE_CHAIN_TAG: &str = "factom-vote";
pub const VOTE_COMMIT_TAG: &str = "factom-vote-commit";
pub const VOTE_REVEAL_TAG: &str = "factom-vote-reveal";
pub const REGISTRATION_CHAIN_TAG: &str = "factom-vote-registration";
pub const REGISTER_VOTE_TAG: &str = "Register Factom Vote";
pub const ELIGIBLE_VOTERS_TAG: &str = "factom-vote-eligible-voters";

/// Largest payload, external ids with their length prefixes plus content,
/// the ledger accepts in one entry.
pub const MAX_ENTRY_SIZE: usize = 10_240;

/// Chain every vote registration is published to.
pub const REGISTRATION_CHAIN_ID: &str =
    "a968e880ee3a7002f25ade15ae36a77c15f4dbc9d8c11fdd5fe86ba6af73a475";

/// Protocol records, keyed by the tag in the first external id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    VoteChain,
    VoteCommit,
    VoteReveal,
    RegistrationChain,
    RegisterVote,
    EligibleVoters,
}

impl EntryKind {
    pub const ALL: [EntryKind; 6] = [
        EntryKind::VoteChain,
        EntryKind::VoteCommit,
        EntryKind::VoteReveal,
        EntryKind::RegistrationChain,
        EntryKind::RegisterVote,
        EntryKind::EligibleVoters,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            EntryKind::VoteChain => VOTE_CHAIN_TAG,
            EntryKind::VoteCommit => VOTE_COMMIT_TAG,
            EntryKind::VoteReveal => VOTE_REVEAL_TAG,
            EntryKind::RegistrationChain => REGISTRATION_CHAIN_TAG,
            EntryKind::RegisterVote => REGISTER_VOTE_TAG,
            EntryKind::EligibleVoters => ELIGIBLE_VOTERS_TAG,
        }
    }

    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag().as_bytes() == tag)
    }
}

/// A ledger entry: external ids, opaque content and its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub chain_id: ChainId,
    pub hash: EntryHash,
    pub external_ids: Vec<Vec<u8>>,
    pub content: Vec<u8>,
}

impl Entry {
    /// Builds an entry for `chain_id`, computing its hash the way the ledger does.
    pub fn new(chain_id: ChainId, external_ids: Vec<Vec<u8>>, content: Vec<u8>) -> Self {
        let hash = Self::compute_hash(&chain_id, &external_ids, &content);
        Self {
            chain_id,
            hash,
            external_ids,
            content,
        }
    }

    /// Like [`Entry::new`], for bytes read off the wire: payloads above
    /// [`MAX_ENTRY_SIZE`] are rejected before hashing.
    pub fn checked(
        chain_id: ChainId,
        external_ids: Vec<Vec<u8>>,
        content: Vec<u8>,
    ) -> Result<Self, Error> {
        let size = Self::payload_size(&external_ids, &content);
        if size > MAX_ENTRY_SIZE {
            return Err(Error::EntryTooLarge {
                size,
                max: MAX_ENTRY_SIZE,
            });
        }
        Ok(Self::new(chain_id, external_ids, content))
    }

    pub fn payload_size(external_ids: &[Vec<u8>], content: &[u8]) -> usize {
        external_ids.iter().map(|id| id.len() + 2).sum::<usize>() + content.len()
    }

    /// First entry of a new chain; the chain id is derived from the external ids.
    pub fn first_of_chain(external_ids: Vec<Vec<u8>>, content: Vec<u8>) -> Self {
        Self::new(Self::chain_id_for(&external_ids), external_ids, content)
    }

    pub fn chain_id_for(external_ids: &[Vec<u8>]) -> ChainId {
        let digests = external_ids
            .iter()
            .map(|id| crypto::sha256(&[id.as_slice()]))
            .collect::<Vec<_>>();
        let parts = digests.iter().map(|d| d.as_bytes().as_slice()).collect::<Vec<_>>();
        crypto::sha256(&parts)
    }

    /// sha256(sha512(data) || data) over the marshalled entry.
    ///
    /// Length prefixes are two bytes wide; a payload within
    /// [`MAX_ENTRY_SIZE`] always fits them.
    fn compute_hash(chain_id: &ChainId, external_ids: &[Vec<u8>], content: &[u8]) -> EntryHash {
        let prefix = |len: usize| u16::try_from(len).unwrap_or(u16::MAX).to_be_bytes();
        let mut data = vec![0u8];
        data.extend_from_slice(chain_id.as_ref());
        let ext_len: usize = external_ids.iter().map(|id| id.len() + 2).sum();
        data.extend_from_slice(&prefix(ext_len));
        for id in external_ids {
            data.extend_from_slice(&prefix(id.len()));
            data.extend_from_slice(id);
        }
        data.extend_from_slice(content);
        let outer = crypto::sha512(&[data.as_slice()]);
        crypto::sha256(&[&outer[..], data.as_slice()])
    }

    pub fn tag(&self) -> Option<&[u8]> {
        self.external_ids.first().map(Vec::as_slice)
    }

    pub fn kind(&self) -> Option<EntryKind> {
        self.tag().and_then(EntryKind::from_tag)
    }

    pub(crate) fn expect_external_ids(&self, expected: usize) -> Result<(), Error> {
        match self.external_ids.len() {
            found if found == expected => Ok(()),
            found => Err(Error::ExternalIdCount { expected, found }),
        }
    }

    fn external_id(&self, index: usize) -> Result<&[u8], Error> {
        self.external_ids
            .get(index)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::MalformedExternalId {
                index,
                reason: "missing".to_string(),
            })
    }

    pub(crate) fn hash_at(&self, index: usize) -> Result<Hash, Error> {
        Hash::from_slice(self.external_id(index)?).map_err(|e| Error::MalformedExternalId {
            index,
            reason: e.to_string(),
        })
    }

    pub(crate) fn public_key_at(&self, index: usize) -> Result<PublicKey, Error> {
        PublicKey::from_slice(self.external_id(index)?).map_err(|e| {
            Error::MalformedExternalId {
                index,
                reason: e.to_string(),
            }
        })
    }

    pub(crate) fn signature_at(&self, index: usize) -> Result<Signature, Error> {
        Signature::from_slice(self.external_id(index)?).map_err(|e| {
            Error::MalformedExternalId {
                index,
                reason: e.to_string(),
            }
        })
    }

    /// Big endian unsigned integer of at most four bytes.
    pub(crate) fn u32_at(&self, index: usize) -> Result<u32, Error> {
        let bytes = self.external_id(index)?;
        if bytes.len() > 4 {
            return Err(Error::MalformedExternalId {
                index,
                reason: format!("{} bytes do not fit a 32 bit integer", bytes.len()),
            });
        }
        Ok(bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_dispatch() {
        assert_eq!(
            EntryKind::from_tag(b"Register Factom Vote"),
            Some(EntryKind::RegisterVote)
        );
        assert_eq!(
            EntryKind::from_tag(b"factom-vote-eligible-voters"),
            Some(EntryKind::EligibleVoters)
        );
        assert_eq!(EntryKind::from_tag(b"factom-vote "), None);
        for kind in EntryKind::ALL {
            assert_eq!(EntryKind::from_tag(kind.tag().as_bytes()), Some(kind));
        }
    }

    #[test]
    fn version_is_big_endian() {
        let entry = Entry::new(
            Hash::ZERO,
            vec![b"factom-vote".to_vec(), vec![0x01, 0x02], vec![0; 5]],
            Vec::new(),
        );
        assert_eq!(entry.u32_at(1).unwrap(), 0x0102);
        assert!(matches!(
            entry.u32_at(2),
            Err(Error::MalformedExternalId { index: 2, .. })
        ));
    }

    #[test]
    fn arity_is_exact() {
        let entry = Entry::first_of_chain(vec![b"factom-vote-reveal".to_vec()], Vec::new());
        assert!(matches!(
            entry.expect_external_ids(2),
            Err(Error::ExternalIdCount {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn oversized_payloads_are_rejected() {
        let ids = vec![b"factom-vote".to_vec()];
        let fits = vec![0; MAX_ENTRY_SIZE - 13];
        let entry = Entry::checked(Hash::ZERO, ids.clone(), fits.clone()).unwrap();
        assert_eq!(entry, Entry::new(Hash::ZERO, ids.clone(), fits));

        let external_id_over_u16 = vec![vec![7; 70_000]];
        assert!(matches!(
            Entry::checked(Hash::ZERO, external_id_over_u16, Vec::new()),
            Err(Error::EntryTooLarge {
                size: 70_002,
                max: MAX_ENTRY_SIZE
            })
        ));
        assert!(matches!(
            Entry::checked(Hash::ZERO, ids, vec![0; MAX_ENTRY_SIZE - 12]),
            Err(Error::EntryTooLarge { size, .. }) if size == MAX_ENTRY_SIZE + 1
        ));
    }

    #[test]
    fn chain_id_depends_on_every_external_id() {
        let a = Entry::chain_id_for(&[b"a".to_vec(), b"b".to_vec()]);
        let b = Entry::chain_id_for(&[b"a".to_vec(), b"c".to_vec()]);
        assert_ne!(a, b);
        let entry = Entry::first_of_chain(vec![b"a".to_vec(), b"b".to_vec()], b"x".to_vec());
        assert_eq!(entry.chain_id, a);
        assert_ne!(
            entry.hash,
            Entry::new(a, entry.external_ids.clone(), b"y".to_vec()).hash
        );
    }
}
