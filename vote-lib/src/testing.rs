//! Builders for signed protocol entries and fixtures shared by the tests of
//! this crate and its dependents.

use crate::ballot::{RevealContent, VoteReveal};
use crate::crypto::{self, HmacAlgo, PublicKey};
use crate::eligibility::EligibleVoter;
use crate::entry::{
    Entry, ELIGIBLE_VOTERS_TAG, REGISTER_VOTE_TAG, REGISTRATION_CHAIN_ID, VOTE_CHAIN_TAG,
    VOTE_COMMIT_TAG, VOTE_REVEAL_TAG,
};
use crate::hash::{ChainId, Hash, IdentityId, VoterId};
use crate::identity::{IdentityError, IdentityOracle};
use crate::proposal::{
    PhaseHeights, ProposalContent, ProposalEntry, VoteConfig, VoteContent, VoteType,
};
use ed25519_consensus::SigningKey;
use serde_json::{json, Value};
use std::collections::HashMap;

/// An identity with a single ed25519 signing key derived from `seed`.
pub struct TestIdentity {
    pub id: IdentityId,
    signing: SigningKey,
}

impl TestIdentity {
    pub fn new(seed: u8) -> Self {
        Self {
            id: crypto::sha256(&[&b"identity"[..], &[seed][..]]),
            signing: SigningKey::from([seed; 32]),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(self.signing.verification_key().to_bytes())
    }

    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        self.signing.sign(payload).to_bytes().to_vec()
    }
}

/// Identity oracle backed by a fixed map, ignoring heights.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentities {
    keys: HashMap<IdentityId, Vec<PublicKey>>,
}

impl StaticIdentities {
    pub fn with(self, identity: &TestIdentity) -> Self {
        self.with_keys(identity.id, vec![identity.public_key()])
    }

    pub fn with_keys(mut self, identity: IdentityId, keys: Vec<PublicKey>) -> Self {
        self.keys.insert(identity, keys);
        self
    }
}

impl IdentityOracle for StaticIdentities {
    fn active_signing_keys_at_height(
        &self,
        identity: &IdentityId,
        _height: u32,
    ) -> Result<Vec<PublicKey>, IdentityError> {
        self.keys
            .get(identity)
            .cloned()
            .ok_or(IdentityError::NotFound(*identity))
    }
}

pub fn registration_chain() -> ChainId {
    Hash::from_hex(REGISTRATION_CHAIN_ID).unwrap_or_default()
}

/// Proposal document with permissive defaults: one option per ballot,
/// abstention allowed, no acceptance or winner criteria.
pub fn proposal_json(
    eligible_list: &ChainId,
    vote_type: VoteType,
    options: &[&str],
    [commit_start, commit_end, reveal_start, reveal_end]: [u32; 4],
) -> Value {
    json!({
        "proposal": {
            "title": "Test vote",
            "text": "",
            "externalRef": {"href": "", "hash": {"value": "", "algo": ""}}
        },
        "vote": {
            "phasesBlockHeights": {
                "commitStart": commit_start,
                "commitEnd": commit_end,
                "revealStart": reveal_start,
                "revealEnd": reveal_end
            },
            "eligibleVotersChainId": eligible_list.to_hex(),
            "type": u8::from(vote_type),
            "config": {
                "options": options,
                "allowAbstention": true,
                "computeResultsAgainst": "ALL_ELIGIBLE_VOTERS",
                "minOptions": 1,
                "maxOptions": 1,
                "acceptanceCriteria": {"minTurnout": {"weighted": 0, "unweighted": 0}},
                "winnerCriteria": {"minSupport": {}}
            }
        }
    })
}

/// First entry of a new vote chain, signed by `initiator`.
pub fn proposal_entry(initiator: &TestIdentity, document: &Value) -> Entry {
    let content = document.to_string().into_bytes();
    let signature = initiator.sign(&crypto::sha512(&[content.as_slice()]));
    Entry::first_of_chain(
        vec![
            VOTE_CHAIN_TAG.as_bytes().to_vec(),
            vec![1],
            initiator.id.as_bytes().to_vec(),
            initiator.public_key().as_bytes().to_vec(),
            signature,
        ],
        content,
    )
}

fn roster_content(roster: &[(VoterId, f64)]) -> Vec<u8> {
    Value::Array(
        roster
            .iter()
            .map(|(voter, weight)| json!({"voterId": voter.to_hex(), "weight": weight}))
            .collect(),
    )
    .to_string()
    .into_bytes()
}

/// First entry of an eligible voters chain. An empty roster leaves the
/// content empty.
pub fn eligible_header_entry(
    initiator: &TestIdentity,
    nonce: Hash,
    roster: &[(VoterId, f64)],
) -> Entry {
    let content = if roster.is_empty() {
        Vec::new()
    } else {
        roster_content(roster)
    };
    let signature = initiator.sign(&crypto::sha512(&[nonce.as_ref(), content.as_slice()]));
    Entry::first_of_chain(
        vec![
            ELIGIBLE_VOTERS_TAG.as_bytes().to_vec(),
            initiator.id.as_bytes().to_vec(),
            nonce.as_bytes().to_vec(),
            initiator.public_key().as_bytes().to_vec(),
            signature,
        ],
        content,
    )
}

pub fn eligible_update_entry(
    list: &ChainId,
    initiator: &TestIdentity,
    nonce: Hash,
    roster: &[(VoterId, f64)],
) -> Entry {
    let content = roster_content(roster);
    let signature = initiator.sign(&crypto::sha512(&[
        list.as_ref(),
        nonce.as_ref(),
        content.as_slice(),
    ]));
    Entry::new(
        *list,
        vec![
            ELIGIBLE_VOTERS_TAG.as_bytes().to_vec(),
            nonce.as_bytes().to_vec(),
            signature,
        ],
        content,
    )
}

/// Hex HMAC of the options as a voter would commit to them.
pub fn commitment(algo: HmacAlgo, secret: &[u8], options: &[&str]) -> String {
    let digest = algo
        .digest(secret, options.join(",").as_bytes())
        .expect("hmac accepts keys of any length");
    hex::encode(digest)
}

pub fn commit_entry(vote_chain: &ChainId, voter: &TestIdentity, commitment: &str) -> Entry {
    commit_entry_with_key(vote_chain, &voter.id, voter, commitment)
}

/// Commit for `voter` signed with the key of `signer`.
pub fn commit_entry_with_key(
    vote_chain: &ChainId,
    voter: &VoterId,
    signer: &TestIdentity,
    commitment: &str,
) -> Entry {
    let content = json!({ "commitment": commitment }).to_string().into_bytes();
    let signature = signer.sign(&crypto::sha512(&[vote_chain.as_ref(), content.as_slice()]));
    Entry::new(
        *vote_chain,
        vec![
            VOTE_COMMIT_TAG.as_bytes().to_vec(),
            voter.as_bytes().to_vec(),
            signer.public_key().as_bytes().to_vec(),
            signature,
        ],
        content,
    )
}

pub fn reveal_entry(
    vote_chain: &ChainId,
    voter: &VoterId,
    algo: HmacAlgo,
    secret: &[u8],
    options: &[&str],
) -> Entry {
    let content = json!({
        "vote": options,
        "secret": hex::encode(secret),
        "hmacAlgo": algo.as_str(),
    })
    .to_string()
    .into_bytes();
    Entry::new(
        *vote_chain,
        vec![VOTE_REVEAL_TAG.as_bytes().to_vec(), voter.as_bytes().to_vec()],
        content,
    )
}

pub fn registration_entry(vote_chain: &ChainId) -> Entry {
    Entry::new(
        registration_chain(),
        vec![
            REGISTER_VOTE_TAG.as_bytes().to_vec(),
            vote_chain.as_bytes().to_vec(),
        ],
        Vec::new(),
    )
}

/// Proposal fixture for result computations: up to ten options per ballot,
/// counted against all eligible voters, no criteria.
pub fn test_proposal(vote_type: VoteType, options: &[&str]) -> ProposalEntry {
    let initiator = TestIdentity::new(1);
    ProposalEntry {
        protocol_version: 1,
        proposal_chain: Hash::from([0xaa; 32]),
        vote_initiator: initiator.id,
        initiator_key: initiator.public_key(),
        initiator_signature: crypto::Signature::from([0; 64]),
        proposal: ProposalContent::default(),
        vote: VoteContent {
            phases_block_heights: PhaseHeights {
                commit_start: 10,
                commit_end: 20,
                reveal_start: 21,
                reveal_end: 30,
            },
            eligible_voters_chain_id: Hash::from([0xee; 32]),
            vote_type,
            config: VoteConfig {
                options: options.iter().map(|o| o.to_string()).collect(),
                allow_abstention: false,
                compute_results_against: "ALL_ELIGIBLE_VOTERS".to_string(),
                min_options: 1,
                max_options: 10,
                ..Default::default()
            },
        },
        block_height: 1,
        entry_hash: Hash::from([0xab; 32]),
    }
}

pub fn eligible_voter(list: &ChainId, voter: VoterId, weight: f64, height: u32) -> EligibleVoter {
    EligibleVoter {
        voter_id: voter,
        weight,
        block_height: height,
        eligible_list: *list,
        entry_hash: crypto::sha256(&[list.as_ref(), voter.as_ref(), &height.to_be_bytes()[..]]),
        signing_keys: Vec::new(),
    }
}

/// Reveal that skips the commitment check, for result computations.
pub fn test_reveal(vote_chain: &ChainId, voter: &VoterId, options: &[&str]) -> VoteReveal {
    VoteReveal {
        voter_id: *voter,
        vote_chain: *vote_chain,
        entry_hash: crypto::sha256(&[vote_chain.as_ref(), voter.as_ref(), options.join(",").as_bytes()]),
        block_height: 25,
        content: RevealContent {
            options: options.iter().map(|o| o.to_string()).collect(),
            secret: String::new(),
            hmac_algo: HmacAlgo::Sha256.as_str().to_string(),
        },
    }
}

pub fn assert_are_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-9, "{} is not close to {}", a, b);
}
