//! Persistence of vote protocol state.
//!
//! The repository is the only source of truth: the watcher rebuilds what it
//! needs from it for every entry and the query service only reads from it.

pub mod memory;
pub mod rows;

use rows::{Record, Row};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use vote_lib::ballot::{VoteCommit, VoteRegistration, VoteReveal};
use vote_lib::eligibility::{EligibleVoter, EligibleVoterHeader};
use vote_lib::proposal::ProposalEntry;
use vote_lib::results::VoteStats;
use vote_lib::{ChainId, EntryHash, Hash, VoterId};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("column {column} missing from {table}")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },

    #[error("malformed column {column} in {table}: {source}")]
    Column {
        table: &'static str,
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("vote {0} not found")]
    UnknownVote(ChainId),

    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Unavailable(_))
    }
}

/// A proposal as stored, with its registration once one is seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    pub proposal: ProposalEntry,
    #[serde(default)]
    pub registration: Option<VoteRegistration>,
}

impl VoteRecord {
    pub fn new(proposal: ProposalEntry) -> Self {
        Self {
            proposal,
            registration: None,
        }
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.proposal.proposal_chain
    }

    pub fn registered(&self) -> bool {
        self.registration.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibleListRecord {
    pub chain_id: ChainId,
    pub header: EligibleVoterHeader,
    pub block_height: u32,
    pub entry_hash: EntryHash,
}

/// Content hash of a roster update already applied to a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedEntry {
    pub eligible_list: ChainId,
    pub content_hash: Hash,
    pub block_height: u32,
}

pub trait Repository {
    fn is_vote_exist(&self, vote: &ChainId) -> Result<bool, RepositoryError>;
    fn is_eligible_list_exist(&self, list: &ChainId) -> Result<bool, RepositoryError>;
    fn is_repeated_entry_exist(
        &self,
        list: &ChainId,
        content_hash: &Hash,
    ) -> Result<bool, RepositoryError>;

    fn fetch_vote(&self, vote: &ChainId) -> Result<Option<VoteRecord>, RepositoryError>;
    fn fetch_votes(&self) -> Result<Vec<VoteRecord>, RepositoryError>;
    /// Votes whose reveal phase ends at `height`.
    fn fetch_votes_closing_at(&self, height: u32) -> Result<Vec<VoteRecord>, RepositoryError>;

    fn fetch_eligible_list(
        &self,
        list: &ChainId,
    ) -> Result<Option<EligibleListRecord>, RepositoryError>;
    /// The roster sorted by voter id: the latest record of every voter at or
    /// below `as_of` (or overall), leaving out voters whose latest record is a
    /// removal.
    fn fetch_eligible_voters(
        &self,
        list: &ChainId,
        as_of: Option<u32>,
    ) -> Result<Vec<EligibleVoter>, RepositoryError>;
    fn fetch_submitted_entries(&self, list: &ChainId) -> Result<Vec<Hash>, RepositoryError>;

    fn fetch_commit(
        &self,
        vote: &ChainId,
        voter: &VoterId,
    ) -> Result<Option<VoteCommit>, RepositoryError>;
    /// Commits sorted by voter id.
    fn fetch_commits(&self, vote: &ChainId) -> Result<Vec<VoteCommit>, RepositoryError>;
    fn fetch_reveal(
        &self,
        vote: &ChainId,
        voter: &VoterId,
    ) -> Result<Option<VoteReveal>, RepositoryError>;
    /// Reveals in ledger order.
    fn fetch_reveals(&self, vote: &ChainId) -> Result<Vec<VoteReveal>, RepositoryError>;

    fn fetch_result(&self, vote: &ChainId) -> Result<Option<VoteStats>, RepositoryError>;
    fn fetch_results(&self) -> Result<Vec<VoteStats>, RepositoryError>;

    fn highest_completed(&self) -> Result<Option<u32>, RepositoryError>;

    /// Writes every row or none of them. Rows replace earlier rows with the
    /// same table and key.
    fn insert_batch(&self, rows: Vec<Row>) -> Result<(), RepositoryError>;
    fn set_registered(&self, registration: &VoteRegistration) -> Result<(), RepositoryError>;
    fn insert_completed(&self, height: u32) -> Result<(), RepositoryError>;

    fn insert<R: Record>(&self, record: &R) -> Result<(), RepositoryError>
    where
        Self: Sized,
    {
        self.insert_batch(vec![record.to_row()?])
    }
}

macro_rules! forward_repository {
    ($($target:tt)*) => {
        impl<T: Repository + ?Sized> Repository for $($target)* {
            fn is_vote_exist(&self, vote: &ChainId) -> Result<bool, RepositoryError> {
                (**self).is_vote_exist(vote)
            }

            fn is_eligible_list_exist(&self, list: &ChainId) -> Result<bool, RepositoryError> {
                (**self).is_eligible_list_exist(list)
            }

            fn is_repeated_entry_exist(
                &self,
                list: &ChainId,
                content_hash: &Hash,
            ) -> Result<bool, RepositoryError> {
                (**self).is_repeated_entry_exist(list, content_hash)
            }

            fn fetch_vote(&self, vote: &ChainId) -> Result<Option<VoteRecord>, RepositoryError> {
                (**self).fetch_vote(vote)
            }

            fn fetch_votes(&self) -> Result<Vec<VoteRecord>, RepositoryError> {
                (**self).fetch_votes()
            }

            fn fetch_votes_closing_at(&self, height: u32) -> Result<Vec<VoteRecord>, RepositoryError> {
                (**self).fetch_votes_closing_at(height)
            }

            fn fetch_eligible_list(
                &self,
                list: &ChainId,
            ) -> Result<Option<EligibleListRecord>, RepositoryError> {
                (**self).fetch_eligible_list(list)
            }

            fn fetch_eligible_voters(
                &self,
                list: &ChainId,
                as_of: Option<u32>,
            ) -> Result<Vec<EligibleVoter>, RepositoryError> {
                (**self).fetch_eligible_voters(list, as_of)
            }

            fn fetch_submitted_entries(&self, list: &ChainId) -> Result<Vec<Hash>, RepositoryError> {
                (**self).fetch_submitted_entries(list)
            }

            fn fetch_commit(
                &self,
                vote: &ChainId,
                voter: &VoterId,
            ) -> Result<Option<VoteCommit>, RepositoryError> {
                (**self).fetch_commit(vote, voter)
            }

            fn fetch_commits(&self, vote: &ChainId) -> Result<Vec<VoteCommit>, RepositoryError> {
                (**self).fetch_commits(vote)
            }

            fn fetch_reveal(
                &self,
                vote: &ChainId,
                voter: &VoterId,
            ) -> Result<Option<VoteReveal>, RepositoryError> {
                (**self).fetch_reveal(vote, voter)
            }

            fn fetch_reveals(&self, vote: &ChainId) -> Result<Vec<VoteReveal>, RepositoryError> {
                (**self).fetch_reveals(vote)
            }

            fn fetch_result(&self, vote: &ChainId) -> Result<Option<VoteStats>, RepositoryError> {
                (**self).fetch_result(vote)
            }

            fn fetch_results(&self) -> Result<Vec<VoteStats>, RepositoryError> {
                (**self).fetch_results()
            }

            fn highest_completed(&self) -> Result<Option<u32>, RepositoryError> {
                (**self).highest_completed()
            }

            fn insert_batch(&self, rows: Vec<Row>) -> Result<(), RepositoryError> {
                (**self).insert_batch(rows)
            }

            fn set_registered(&self, registration: &VoteRegistration) -> Result<(), RepositoryError> {
                (**self).set_registered(registration)
            }

            fn insert_completed(&self, height: u32) -> Result<(), RepositoryError> {
                (**self).insert_completed(height)
            }
        }
    };
}

forward_repository!(&T);
forward_repository!(Arc<T>);
