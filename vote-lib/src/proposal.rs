use crate::crypto::{self, PublicKey, Signature};
use crate::entry::Entry;
use crate::hash::{ChainId, EntryHash, IdentityId};
use crate::identity::IdentityOracle;
use crate::utils::serde::null_as_default;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum VoteType {
    Binary,
    Single,
    Irv,
}

#[derive(Debug, Error)]
#[error("unknown vote type {0}")]
pub struct UnknownVoteType(pub u8);

impl TryFrom<u8> for VoteType {
    type Error = UnknownVoteType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(VoteType::Binary),
            1 => Ok(VoteType::Single),
            2 => Ok(VoteType::Irv),
            other => Err(UnknownVoteType(other)),
        }
    }
}

impl From<VoteType> for u8 {
    fn from(vote_type: VoteType) -> Self {
        match vote_type {
            VoteType::Binary => 0,
            VoteType::Single => 1,
            VoteType::Irv => 2,
        }
    }
}

/// Population support and turnout are measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeBasis {
    AllEligibleVoters,
    ParticipantsOnly,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{0}' is not a supported 'computeResultsAgainst' value")]
pub struct UnsupportedComputeBasis(pub String);

impl ComputeBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeBasis::AllEligibleVoters => "ALL_ELIGIBLE_VOTERS",
            ComputeBasis::ParticipantsOnly => "PARTICIPANTS_ONLY",
        }
    }
}

impl FromStr for ComputeBasis {
    type Err = UnsupportedComputeBasis;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALL_ELIGIBLE_VOTERS" => Ok(ComputeBasis::AllEligibleVoters),
            "PARTICIPANTS_ONLY" => Ok(ComputeBasis::ParticipantsOnly),
            other => Err(UnsupportedComputeBasis(other.to_string())),
        }
    }
}

/// Where a vote stands at a given block height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Discussion,
    Commit,
    Reveal,
    Complete,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Discussion,
        Phase::Commit,
        Phase::Reveal,
        Phase::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Discussion => "discussion",
            Phase::Commit => "commit",
            Phase::Reveal => "reveal",
            Phase::Complete => "complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown vote status '{0}'")]
pub struct UnknownPhase(pub String);

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| UnknownPhase(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseHeights {
    pub commit_start: u32,
    pub commit_end: u32,
    #[serde(default)]
    pub reveal_start: u32,
    pub reveal_end: u32,
}

impl PhaseHeights {
    pub fn phase_at(&self, height: u32) -> Phase {
        if height < self.commit_start {
            Phase::Discussion
        } else if height <= self.commit_end {
            Phase::Commit
        } else if height <= self.reveal_end {
            Phase::Reveal
        } else {
            Phase::Complete
        }
    }

    pub fn is_commit_window(&self, height: u32) -> bool {
        (self.commit_start..=self.commit_end).contains(&height)
    }

    pub fn is_reveal_window(&self, height: u32) -> bool {
        (self.reveal_start..=self.reveal_end).contains(&height)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CriteriaWeights {
    #[serde(default)]
    pub weighted: f64,
    #[serde(default)]
    pub unweighted: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptanceCriteria {
    #[serde(default, deserialize_with = "null_as_default")]
    pub min_turnout: CriteriaWeights,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerCriteria {
    #[serde(default, deserialize_with = "null_as_default")]
    pub min_support: BTreeMap<String, CriteriaWeights>,
}

impl WinnerCriteria {
    pub const WILDCARD: &'static str = "*";

    /// Criteria for `option`, falling back to the wildcard entry.
    pub fn for_option(&self, option: &str) -> Option<&CriteriaWeights> {
        self.min_support
            .get(option)
            .or_else(|| self.min_support.get(Self::WILDCARD))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: Vec<String>,
    #[serde(default)]
    pub allow_abstention: bool,
    #[serde(default)]
    pub compute_results_against: String,
    #[serde(default)]
    pub min_options: usize,
    #[serde(default)]
    pub max_options: usize,
    #[serde(default, deserialize_with = "null_as_default")]
    pub acceptance_criteria: AcceptanceCriteria,
    #[serde(default, deserialize_with = "null_as_default")]
    pub winner_criteria: WinnerCriteria,
}

impl VoteConfig {
    pub fn compute_basis(&self) -> Result<ComputeBasis, UnsupportedComputeBasis> {
        self.compute_results_against.parse()
    }

    pub fn is_declared(&self, option: &str) -> bool {
        self.options.iter().any(|declared| declared == option)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteContent {
    pub phases_block_heights: PhaseHeights,
    pub eligible_voters_chain_id: ChainId,
    #[serde(rename = "type")]
    pub vote_type: VoteType,
    pub config: VoteConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefHash {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub algo: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRef {
    #[serde(default)]
    pub href: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hash: RefHash,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub external_ref: ExternalRef,
}

/// JSON content of the first entry of a vote chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalDocument {
    #[serde(default, deserialize_with = "null_as_default")]
    pub proposal: ProposalContent,
    pub vote: VoteContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalEntry {
    pub protocol_version: u32,
    pub proposal_chain: ChainId,
    pub vote_initiator: IdentityId,
    pub initiator_key: PublicKey,
    pub initiator_signature: Signature,
    pub proposal: ProposalContent,
    pub vote: VoteContent,
    pub block_height: u32,
    pub entry_hash: EntryHash,
}

impl ProposalEntry {
    /// Parses the first entry of a vote chain. The initiator key must sign the
    /// content and be one of the initiator's active keys at `height`.
    pub fn from_entry<I>(entry: &Entry, height: u32, identities: &I) -> Result<Self, Error>
    where
        I: IdentityOracle + ?Sized,
    {
        entry.expect_external_ids(5)?;
        let protocol_version = entry.u32_at(1)?;
        let vote_initiator = entry.hash_at(2)?;
        let initiator_key = entry.public_key_at(3)?;
        let initiator_signature = entry.signature_at(4)?;

        initiator_key
            .verify(
                &crypto::sha512(&[entry.content.as_slice()]),
                &initiator_signature,
            )
            .map_err(|_| Error::InvalidSignature("proposal"))?;

        let ProposalDocument { proposal, mut vote } = serde_json::from_slice(&entry.content)?;

        let keys = identities.active_signing_keys_at_height(&vote_initiator, height)?;
        if !keys.contains(&initiator_key) {
            return Err(Error::InactiveKey(vote_initiator));
        }

        let phases = &mut vote.phases_block_heights;
        if phases.reveal_start == 0 {
            phases.reveal_start = phases.commit_end.saturating_add(1);
        }

        Ok(Self {
            protocol_version,
            proposal_chain: entry.chain_id,
            vote_initiator,
            initiator_key,
            initiator_signature,
            proposal,
            vote,
            block_height: height,
            entry_hash: entry.hash,
        })
    }

    pub fn phases(&self) -> &PhaseHeights {
        &self.vote.phases_block_heights
    }

    pub fn config(&self) -> &VoteConfig {
        &self.vote.config
    }

    pub fn eligible_list(&self) -> &ChainId {
        &self.vote.eligible_voters_chain_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hash;
    use crate::identity::IdentityError;
    use crate::testing::*;
    use proptest::prelude::*;
    use test_strategy::proptest;

    fn setup() -> (TestIdentity, StaticIdentities, Entry) {
        let initiator = TestIdentity::new(1);
        let identities = StaticIdentities::default().with(&initiator);
        let document = proposal_json(
            &Hash::from([9; 32]),
            VoteType::Single,
            &["yes", "no"],
            [10, 20, 0, 30],
        );
        let entry = proposal_entry(&initiator, &document);
        (initiator, identities, entry)
    }

    #[test]
    fn parses_signed_proposal() {
        let (initiator, identities, entry) = setup();
        let proposal = ProposalEntry::from_entry(&entry, 5, &identities).unwrap();

        assert_eq!(proposal.proposal_chain, entry.chain_id);
        assert_eq!(proposal.vote_initiator, initiator.id);
        assert_eq!(proposal.protocol_version, 1);
        assert_eq!(proposal.vote.vote_type, VoteType::Single);
        assert_eq!(proposal.config().options, vec!["yes", "no"]);
        assert_eq!(proposal.eligible_list(), &Hash::from([9; 32]));
        // reveal start defaults to the block after the commit phase
        assert_eq!(proposal.phases().reveal_start, 21);
        assert_eq!(proposal.block_height, 5);
        assert_eq!(proposal.entry_hash, entry.hash);
    }

    #[test]
    fn rejects_tampered_content() {
        let (_, identities, mut entry) = setup();
        entry.content.push(b' ');
        assert!(matches!(
            ProposalEntry::from_entry(&entry, 5, &identities),
            Err(Error::InvalidSignature(_))
        ));
    }

    #[test]
    fn rejects_keys_unknown_to_the_oracle() {
        let (_, _, entry) = setup();
        let other = StaticIdentities::default().with(&TestIdentity::new(2));
        assert!(matches!(
            ProposalEntry::from_entry(&entry, 5, &other),
            Err(Error::Identity(IdentityError::NotFound(_)))
        ));

        let (initiator, _, entry) = setup();
        let rotated = StaticIdentities::default().with_keys(initiator.id, Vec::new());
        assert!(matches!(
            ProposalEntry::from_entry(&entry, 5, &rotated),
            Err(Error::InactiveKey(id)) if id == initiator.id
        ));
    }

    #[test]
    fn rejects_wrong_arity() {
        let (_, identities, mut entry) = setup();
        entry.external_ids.pop();
        assert!(matches!(
            ProposalEntry::from_entry(&entry, 5, &identities),
            Err(Error::ExternalIdCount {
                expected: 5,
                found: 4
            })
        ));
    }

    #[test]
    fn rejects_undecodable_content() {
        let initiator = TestIdentity::new(1);
        let identities = StaticIdentities::default().with(&initiator);
        let entry = proposal_entry(&initiator, &serde_json::json!({"proposal": {}}));
        assert!(matches!(
            ProposalEntry::from_entry(&entry, 5, &identities),
            Err(Error::Content(_))
        ));
    }

    #[test]
    fn parse_document_with_nulls() {
        let document: ProposalDocument = serde_json::from_str(
            r#"{
                "proposal": {"title": "Budget", "externalRef": null},
                "vote": {
                    "phasesBlockHeights": {"commitStart": 1, "commitEnd": 2, "revealStart": 3, "revealEnd": 4},
                    "eligibleVotersChainId": "a968e880ee3a7002f25ade15ae36a77c15f4dbc9d8c11fdd5fe86ba6af73a475",
                    "type": 2,
                    "config": {
                        "options": ["a", "b"],
                        "allowAbstention": false,
                        "computeResultsAgainst": "PARTICIPANTS_ONLY",
                        "minOptions": 1,
                        "maxOptions": 2,
                        "acceptanceCriteria": null,
                        "winnerCriteria": {"minSupport": {"*": {"weighted": 0.5}}}
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(document.proposal.title, "Budget");
        assert_eq!(document.proposal.external_ref, ExternalRef::default());
        assert_eq!(document.vote.vote_type, VoteType::Irv);
        let config = &document.vote.config;
        assert_eq!(config.compute_basis(), Ok(ComputeBasis::ParticipantsOnly));
        assert_eq!(config.acceptance_criteria, AcceptanceCriteria::default());
        assert_eq!(
            config.winner_criteria.for_option("a"),
            Some(&CriteriaWeights {
                weighted: 0.5,
                unweighted: 0.0
            })
        );
        assert!(serde_json::from_str::<VoteType>("3").is_err());
    }

    #[test]
    fn winner_criteria_prefer_the_named_option() {
        let criteria = WinnerCriteria {
            min_support: BTreeMap::from([
                ("*".to_string(), CriteriaWeights::default()),
                (
                    "a".to_string(),
                    CriteriaWeights {
                        weighted: 1.0,
                        unweighted: 1.0,
                    },
                ),
            ]),
        };
        assert_eq!(criteria.for_option("a").unwrap().weighted, 1.0);
        assert_eq!(criteria.for_option("b").unwrap().weighted, 0.0);
        assert_eq!(WinnerCriteria::default().for_option("a"), None);
    }

    #[test]
    fn unsupported_basis() {
        assert_eq!(
            "EVERYONE".parse::<ComputeBasis>(),
            Err(UnsupportedComputeBasis("EVERYONE".to_string()))
        );
    }

    fn phases() -> impl Strategy<Value = PhaseHeights> {
        (0..1_000u32, 0..100u32, 0..10u32, 0..100u32).prop_map(|(start, commit, gap, reveal)| {
            PhaseHeights {
                commit_start: start,
                commit_end: start + commit,
                reveal_start: start + commit + gap + 1,
                reveal_end: start + commit + gap + 1 + reveal,
            }
        })
    }

    #[proptest]
    fn phase_matches_windows(#[strategy(phases())] phases: PhaseHeights, #[strategy(0..1_300u32)] height: u32) {
        let phase = phases.phase_at(height);
        prop_assert_eq!(phase == Phase::Commit, phases.is_commit_window(height));
        if phases.is_reveal_window(height) {
            prop_assert_eq!(phase, Phase::Reveal);
        }
        prop_assert_eq!(phase == Phase::Complete, height > phases.reveal_end);
        prop_assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
    }
}
