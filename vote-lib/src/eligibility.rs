use crate::crypto::{self, PublicKey, Signature};
use crate::entry::Entry;
use crate::hash::{ChainId, EntryHash, Hash, IdentityId, VoterId};
use crate::identity::{self, IdentityError, IdentityOracle};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EligibilityError {
    #[error("roster update {0} was already applied")]
    Replay(Hash),
}

/// First entry of an eligible voters chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibleVoterHeader {
    pub vote_initiator: IdentityId,
    pub nonce: Hash,
    pub initiator_key: PublicKey,
    pub initiator_signature: Signature,
}

impl EligibleVoterHeader {
    pub fn from_entry(entry: &Entry) -> Result<Self, Error> {
        entry.expect_external_ids(5)?;
        let header = Self {
            vote_initiator: entry.hash_at(1)?,
            nonce: entry.hash_at(2)?,
            initiator_key: entry.public_key_at(3)?,
            initiator_signature: entry.signature_at(4)?,
        };

        // the chain id is derived from the external ids, so it is not signed
        let payload = crypto::sha512(&[header.nonce.as_ref(), entry.content.as_slice()]);
        header
            .initiator_key
            .verify(&payload, &header.initiator_signature)
            .map_err(|_| Error::InvalidSignature("eligible voters header"))?;
        Ok(header)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterWeight {
    pub voter_id: VoterId,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibleVoter {
    pub voter_id: VoterId,
    pub weight: f64,
    pub block_height: u32,
    pub eligible_list: ChainId,
    pub entry_hash: EntryHash,
    #[serde(default, rename = "keys")]
    pub signing_keys: Vec<PublicKey>,
}

impl EligibleVoter {
    /// A zero weight record removes the voter from the list.
    pub fn is_tombstone(&self) -> bool {
        self.weight == 0.0
    }
}

/// A signed batch of roster changes.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibleVoterEntry {
    pub nonce: Hash,
    /// sha256(chain id || nonce || content), the replay filter key.
    pub content_hash: Hash,
    pub voters: Vec<EligibleVoter>,
}

impl EligibleVoterEntry {
    /// Parses a roster update, verified against the list header's key.
    pub fn from_entry(entry: &Entry, height: u32, signing_key: &PublicKey) -> Result<Self, Error> {
        entry.expect_external_ids(3)?;
        let nonce = entry.hash_at(1)?;
        let signature = entry.signature_at(2)?;

        let payload = crypto::sha512(&[
            entry.chain_id.as_ref(),
            nonce.as_ref(),
            entry.content.as_slice(),
        ]);
        signing_key
            .verify(&payload, &signature)
            .map_err(|_| Error::InvalidSignature("eligible voters update"))?;

        Self::parse(entry, height, nonce)
    }

    /// Initial roster carried by a header entry, if it has one. The header
    /// signature has already been checked by [`EligibleVoterHeader::from_entry`].
    pub fn from_header(
        entry: &Entry,
        height: u32,
        header: &EligibleVoterHeader,
    ) -> Result<Option<Self>, Error> {
        if entry.content.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Self::parse(entry, height, header.nonce).map(Some)
    }

    fn parse(entry: &Entry, height: u32, nonce: Hash) -> Result<Self, Error> {
        let weights: Vec<VoterWeight> = serde_json::from_slice(&entry.content)?;
        let voters = weights
            .into_iter()
            .map(|VoterWeight { voter_id, weight }| EligibleVoter {
                voter_id,
                weight,
                block_height: height,
                eligible_list: entry.chain_id,
                entry_hash: entry.hash,
                signing_keys: Vec::new(),
            })
            .collect();

        Ok(Self {
            nonce,
            content_hash: crypto::sha256(&[
                entry.chain_id.as_ref(),
                nonce.as_ref(),
                entry.content.as_slice(),
            ]),
            voters,
        })
    }

    /// Fills in each voter's signing keys as of the update's height.
    pub fn resolve_keys<I>(&mut self, identities: &I) -> Result<(), IdentityError>
    where
        I: IdentityOracle + ?Sized,
    {
        for voter in &mut self.voters {
            voter.signing_keys =
                identity::signing_keys_or_empty(identities, &voter.voter_id, voter.block_height)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EligibleList {
    pub chain_id: ChainId,
    pub header: EligibleVoterHeader,
    pub voters: HashMap<VoterId, EligibleVoter>,
    pub submitted_entries: HashSet<Hash>,
}

impl EligibleList {
    pub fn new(chain_id: ChainId, header: EligibleVoterHeader) -> Self {
        Self {
            chain_id,
            header,
            voters: HashMap::new(),
            submitted_entries: HashSet::new(),
        }
    }

    /// Rebuilds a list from stored voter records, oldest first.
    pub fn from_records<V, S>(
        chain_id: ChainId,
        header: EligibleVoterHeader,
        voters: V,
        submitted_entries: S,
    ) -> Self
    where
        V: IntoIterator<Item = EligibleVoter>,
        S: IntoIterator<Item = Hash>,
    {
        let mut list = Self::new(chain_id, header);
        voters.into_iter().for_each(|voter| list.fold_voter(voter));
        list.submitted_entries.extend(submitted_entries);
        list
    }

    /// Applies a roster update, returning how many records it carried.
    pub fn apply(&mut self, update: &EligibleVoterEntry) -> Result<usize, EligibilityError> {
        if !self.submitted_entries.insert(update.content_hash) {
            return Err(EligibilityError::Replay(update.content_hash));
        }
        update
            .voters
            .iter()
            .cloned()
            .for_each(|voter| self.fold_voter(voter));
        Ok(update.voters.len())
    }

    fn fold_voter(&mut self, voter: EligibleVoter) {
        if voter.is_tombstone() {
            self.voters.remove(&voter.voter_id);
        } else {
            self.voters.insert(voter.voter_id, voter);
        }
    }

    pub fn is_replay(&self, content_hash: &Hash) -> bool {
        self.submitted_entries.contains(content_hash)
    }

    pub fn is_eligible(&self, voter: &VoterId) -> bool {
        self.voters.contains_key(voter)
    }

    pub fn voter(&self, voter: &VoterId) -> Option<&EligibleVoter> {
        self.voters.get(voter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    fn voter(n: u8) -> VoterId {
        Hash::from([n; 32])
    }

    #[test]
    fn header_without_roster() {
        let initiator = TestIdentity::new(1);
        let entry = eligible_header_entry(&initiator, Hash::from([5; 32]), &[]);
        let header = EligibleVoterHeader::from_entry(&entry).unwrap();

        assert_eq!(header.vote_initiator, initiator.id);
        assert_eq!(header.nonce, Hash::from([5; 32]));
        assert_eq!(header.initiator_key, initiator.public_key());
        assert_eq!(
            EligibleVoterEntry::from_header(&entry, 3, &header).unwrap(),
            None
        );
    }

    #[test]
    fn header_with_roster() {
        let initiator = TestIdentity::new(1);
        let entry = eligible_header_entry(&initiator, Hash::from([5; 32]), &[(voter(7), 2.5)]);
        let header = EligibleVoterHeader::from_entry(&entry).unwrap();
        let roster = EligibleVoterEntry::from_header(&entry, 3, &header)
            .unwrap()
            .unwrap();

        assert_eq!(roster.voters.len(), 1);
        let first = &roster.voters[0];
        assert_eq!(first.voter_id, voter(7));
        assert_eq!(first.weight, 2.5);
        assert_eq!(first.block_height, 3);
        assert_eq!(first.eligible_list, entry.chain_id);
        assert_eq!(first.entry_hash, entry.hash);
    }

    #[test]
    fn header_signature_covers_the_nonce() {
        let initiator = TestIdentity::new(1);
        let mut entry = eligible_header_entry(&initiator, Hash::from([5; 32]), &[]);
        entry.external_ids[2] = vec![6; 32];
        assert!(matches!(
            EligibleVoterHeader::from_entry(&entry),
            Err(Error::InvalidSignature(_))
        ));
    }

    #[test]
    fn updates_are_bound_to_their_chain() {
        let initiator = TestIdentity::new(1);
        let list = Hash::from([3; 32]);
        let entry = eligible_update_entry(&list, &initiator, Hash::from([4; 32]), &[(voter(1), 1.0)]);
        assert!(EligibleVoterEntry::from_entry(&entry, 10, &initiator.public_key()).is_ok());

        let moved = Entry::new(
            Hash::from([9; 32]),
            entry.external_ids.clone(),
            entry.content.clone(),
        );
        assert!(matches!(
            EligibleVoterEntry::from_entry(&moved, 10, &initiator.public_key()),
            Err(Error::InvalidSignature(_))
        ));
        assert!(matches!(
            EligibleVoterEntry::from_entry(&entry, 10, &TestIdentity::new(2).public_key()),
            Err(Error::InvalidSignature(_))
        ));
    }

    #[test]
    fn add_then_remove_voter() {
        let initiator = TestIdentity::new(1);
        let header_entry = eligible_header_entry(&initiator, Hash::from([5; 32]), &[]);
        let header = EligibleVoterHeader::from_entry(&header_entry).unwrap();
        let mut list = EligibleList::new(header_entry.chain_id, header);

        let add = eligible_update_entry(
            &list.chain_id,
            &initiator,
            Hash::from([1; 32]),
            &[(voter(1), 1.0), (voter(2), 3.0)],
        );
        let add = EligibleVoterEntry::from_entry(&add, 10, &initiator.public_key()).unwrap();
        assert_eq!(list.apply(&add), Ok(2));
        assert!(list.is_eligible(&voter(1)));

        let remove = eligible_update_entry(
            &list.chain_id,
            &initiator,
            Hash::from([2; 32]),
            &[(voter(1), 0.0)],
        );
        let remove = EligibleVoterEntry::from_entry(&remove, 11, &initiator.public_key()).unwrap();
        assert_eq!(list.apply(&remove), Ok(1));
        assert!(!list.is_eligible(&voter(1)));
        assert_eq!(list.voter(&voter(2)).unwrap().weight, 3.0);

        assert_eq!(
            list.apply(&remove),
            Err(EligibilityError::Replay(remove.content_hash))
        );
        assert!(list.is_replay(&add.content_hash));
    }

    #[test]
    fn records_replay_in_order() {
        let initiator = TestIdentity::new(1);
        let header_entry = eligible_header_entry(&initiator, Hash::from([5; 32]), &[]);
        let header = EligibleVoterHeader::from_entry(&header_entry).unwrap();
        let list_id = header_entry.chain_id;

        let list = EligibleList::from_records(
            list_id,
            header,
            vec![
                eligible_voter(&list_id, voter(1), 1.0, 1),
                eligible_voter(&list_id, voter(2), 1.0, 1),
                eligible_voter(&list_id, voter(1), 0.0, 2),
                eligible_voter(&list_id, voter(2), 4.0, 3),
            ],
            vec![Hash::from([8; 32])],
        );

        assert!(!list.is_eligible(&voter(1)));
        assert_eq!(list.voter(&voter(2)).unwrap().weight, 4.0);
        assert!(list.is_replay(&Hash::from([8; 32])));
    }

    #[test]
    fn keys_resolve_through_the_oracle() {
        let initiator = TestIdentity::new(1);
        let registered = TestIdentity::new(2);
        let identities = StaticIdentities::default().with(&registered);
        let list = Hash::from([3; 32]);
        let entry = eligible_update_entry(
            &list,
            &initiator,
            Hash::from([4; 32]),
            &[(registered.id, 1.0), (voter(9), 1.0)],
        );
        let mut update = EligibleVoterEntry::from_entry(&entry, 10, &initiator.public_key()).unwrap();
        update.resolve_keys(&identities).unwrap();

        assert_eq!(update.voters[0].signing_keys, vec![registered.public_key()]);
        assert!(update.voters[1].signing_keys.is_empty());
    }
}
