//! Tallying revealed ballots into [`VoteStats`].
//!
//! Binary and single (approval) votes count every selected option once per
//! ballot; instant runoff votes eliminate the weakest options round by round.

mod irv;
mod stats;

pub use irv::compute_irv;
pub use stats::{compute_support, compute_vote_statistics, compute_winners};

use crate::ballot::VoteReveal;
use crate::eligibility::EligibleVoter;
use crate::hash::{ChainId, VoterId};
use crate::proposal::{ProposalEntry, UnsupportedComputeBasis, VoteConfig, VoteType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResultError {
    #[error(transparent)]
    UnsupportedComputeBasis(#[from] UnsupportedComputeBasis),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub count: u64,
    pub weight: f64,
}

impl Tally {
    pub fn add(&mut self, weight: f64) {
        self.count += 1;
        self.weight += weight;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOptionStats {
    pub option: String,
    #[serde(flatten)]
    pub tally: Tally,
    pub support: f64,
    pub weighted_support: f64,
}

impl VoteOptionStats {
    fn new(option: &str) -> Self {
        Self {
            option: option.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turnout {
    pub unweighted_turnout: f64,
    pub weighted_turnout: f64,
}

/// Denominators support ratios were computed against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportBase {
    pub count_denominator: u64,
    pub weight_denominator: f64,
}

/// Per option tallies of one instant runoff round.
pub type IrvRound = BTreeMap<String, Tally>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteStats {
    #[serde(rename = "chainId")]
    pub vote_chain: ChainId,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(rename = "total")]
    pub complete: Tally,
    pub voted: Tally,
    #[serde(rename = "abstain")]
    pub abstained: Tally,
    #[serde(rename = "options")]
    pub option_stats: BTreeMap<String, VoteOptionStats>,
    pub turnout: Turnout,
    pub support: SupportBase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub irv_rounds: Vec<IrvRound>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weighted_winners: Vec<VoteOptionStats>,
}

impl VoteStats {
    pub fn new(vote_chain: ChainId, options: &[String]) -> Self {
        Self {
            vote_chain,
            valid: false,
            invalid_reason: None,
            complete: Tally::default(),
            voted: Tally::default(),
            abstained: Tally::default(),
            option_stats: options
                .iter()
                .map(|option| (option.clone(), VoteOptionStats::new(option)))
                .collect(),
            turnout: Turnout::default(),
            support: SupportBase::default(),
            irv_rounds: Vec::new(),
            weighted_winners: Vec::new(),
        }
    }

    /// Result recorded for a vote whose computation failed.
    pub fn invalid(vote_chain: ChainId, reason: impl Into<String>) -> Self {
        Self {
            invalid_reason: Some(reason.into()),
            ..Self::new(vote_chain, &[])
        }
    }

    pub fn winners(&self) -> impl Iterator<Item = &str> {
        self.weighted_winners.iter().map(|w| w.option.as_str())
    }
}

/// A reveal that survived [`filter_invalid_votes`], with its voter's weight.
#[derive(Debug, Clone, Copy)]
pub struct ValidVote<'a> {
    pub reveal: &'a VoteReveal,
    pub weight: f64,
}

impl ValidVote<'_> {
    pub fn options(&self) -> &[String] {
        self.reveal.options()
    }
}

pub fn compute_result(
    proposal: &ProposalEntry,
    voters: &[EligibleVoter],
    reveals: &[VoteReveal],
) -> Result<VoteStats, ResultError> {
    let votes = filter_invalid_votes(proposal.config(), voters, reveals);
    match proposal.vote.vote_type {
        VoteType::Binary | VoteType::Single => compute_vote_statistics(proposal, voters, &votes),
        VoteType::Irv => compute_irv(proposal, voters, &votes),
    }
}

/// Keeps the first acceptable reveal of every eligible voter.
pub fn filter_invalid_votes<'a>(
    config: &VoteConfig,
    voters: &[EligibleVoter],
    reveals: &'a [VoteReveal],
) -> Vec<ValidVote<'a>> {
    let mut remaining: HashMap<&VoterId, f64> = voters
        .iter()
        .map(|voter| (&voter.voter_id, voter.weight))
        .collect();

    reveals
        .iter()
        .filter_map(|reveal| {
            let weight = *remaining.get(&reveal.voter_id)?;
            if !is_valid_selection(config, reveal.options()) {
                debug!(entry = %reveal.entry_hash, "ignoring reveal with an invalid selection");
                return None;
            }
            remaining.remove(&reveal.voter_id);
            Some(ValidVote { reveal, weight })
        })
        .collect()
}

fn is_valid_selection(config: &VoteConfig, options: &[String]) -> bool {
    if options.is_empty() && config.allow_abstention {
        return true;
    }
    (config.min_options..=config.max_options).contains(&options.len())
        && options.iter().all(|option| config.is_declared(option))
}

pub(crate) fn tally_voters(voters: &[EligibleVoter]) -> Tally {
    voters.iter().fold(Tally::default(), |mut tally, voter| {
        tally.add(voter.weight);
        tally
    })
}
