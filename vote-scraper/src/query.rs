//! Read-only queries over the repository.

use crate::repository::{EligibleListRecord, Repository, RepositoryError, VoteRecord};
use itertools::Itertools;
use serde::Serialize;
use std::cmp::Ordering;
use std::str::FromStr;
use thiserror::Error;
use vote_lib::ballot::{VoteCommit, VoteReveal};
use vote_lib::eligibility::EligibleVoter;
use vote_lib::proposal::Phase;
use vote_lib::results::VoteStats;
use vote_lib::{ChainId, VoterId};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("cannot sort by '{column}', valid columns are: {valid}")]
    InvalidSort { column: String, valid: String },

    #[error("invalid sort order '{0}', expected 'asc' or 'desc'")]
    InvalidSortOrder(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

fn not_found(kind: &'static str, key: impl ToString) -> QueryError {
    QueryError::NotFound {
        kind,
        key: key.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Title,
    CommitStart,
    CommitEnd,
    RevealStart,
    RevealEnd,
    VoteInitiator,
    ChainId,
    BlockHeight,
}

impl SortColumn {
    pub const ALL: [SortColumn; 8] = [
        SortColumn::Title,
        SortColumn::CommitStart,
        SortColumn::CommitEnd,
        SortColumn::RevealStart,
        SortColumn::RevealEnd,
        SortColumn::VoteInitiator,
        SortColumn::ChainId,
        SortColumn::BlockHeight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortColumn::Title => "title",
            SortColumn::CommitStart => "commitStart",
            SortColumn::CommitEnd => "commitEnd",
            SortColumn::RevealStart => "revealStart",
            SortColumn::RevealEnd => "revealEnd",
            SortColumn::VoteInitiator => "voteInitiator",
            SortColumn::ChainId => "chainId",
            SortColumn::BlockHeight => "blockHeight",
        }
    }

    fn compare(&self, a: &VoteRecord, b: &VoteRecord) -> Ordering {
        let (pa, pb) = (&a.proposal, &b.proposal);
        match self {
            SortColumn::Title => pa.proposal.title.cmp(&pb.proposal.title),
            SortColumn::CommitStart => pa.phases().commit_start.cmp(&pb.phases().commit_start),
            SortColumn::CommitEnd => pa.phases().commit_end.cmp(&pb.phases().commit_end),
            SortColumn::RevealStart => pa.phases().reveal_start.cmp(&pb.phases().reveal_start),
            SortColumn::RevealEnd => pa.phases().reveal_end.cmp(&pb.phases().reveal_end),
            SortColumn::VoteInitiator => {
                pa.vote_initiator.as_bytes().cmp(pb.vote_initiator.as_bytes())
            }
            SortColumn::ChainId => pa.proposal_chain.as_bytes().cmp(pb.proposal_chain.as_bytes()),
            SortColumn::BlockHeight => pa.block_height.cmp(&pb.block_height),
        }
    }
}

impl FromStr for SortColumn {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|column| column.as_str() == s)
            .ok_or_else(|| QueryError::InvalidSort {
                column: s.to_string(),
                valid: Self::ALL.iter().map(SortColumn::as_str).join(", "),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(QueryError::InvalidSortOrder(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub column: SortColumn,
    pub order: SortOrder,
}

/// Parses comma separated columns and their orders, `asc` when an order is
/// left out.
pub fn parse_sort(sort: &str, order: &str) -> Result<Vec<SortKey>, QueryError> {
    let split = |s: &str| {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    };
    let columns = split(sort);
    let orders = split(order);
    if orders.len() > columns.len() {
        return Err(QueryError::InvalidSortOrder(order.to_string()));
    }

    columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            Ok(SortKey {
                column: column.parse::<SortColumn>()?,
                order: orders
                    .get(i)
                    .map(|o| o.parse::<SortOrder>())
                    .transpose()?
                    .unwrap_or_default(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Registered {
    #[default]
    Any,
    Yes,
    No,
}

#[derive(Debug, Clone, Default)]
pub struct ProposalFilter {
    pub registered: Registered,
    /// Leaves out completed votes.
    pub active: bool,
    pub status: Option<Phase>,
    pub title: Option<String>,
    pub vote_initiator: Option<String>,
    pub vote_chain: Option<String>,
    /// Hex substring of a voter on the current roster.
    pub voter: Option<String>,
    pub sort: Vec<SortKey>,
}

/// `limit` 0 returns everything after `offset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListInfo {
    pub total_count: usize,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub info: ListInfo,
}

impl<T> Listing<T> {
    fn paged(items: Vec<T>, page: Page) -> Self {
        let total_count = items.len();
        let take = if page.limit == 0 {
            usize::MAX
        } else {
            page.limit
        };
        Self {
            items: items.into_iter().skip(page.offset).take(take).collect(),
            info: ListInfo {
                total_count,
                offset: page.offset,
                limit: page.limit,
            },
        }
    }
}

fn contains(filter: &Option<String>, value: &str) -> bool {
    filter
        .as_deref()
        .map_or(true, |needle| value.contains(needle))
}

pub struct QueryService<R> {
    repository: R,
}

impl<R: Repository> QueryService<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    pub fn fetch_proposal(&self, chain: &ChainId) -> Result<VoteRecord, QueryError> {
        self.repository
            .fetch_vote(chain)?
            .ok_or_else(|| not_found("vote", chain))
    }

    pub fn list_proposals(
        &self,
        filter: &ProposalFilter,
        page: Page,
    ) -> Result<Listing<VoteRecord>, QueryError> {
        let height = self.repository.highest_completed()?.unwrap_or(0);

        let mut matching = Vec::new();
        for record in self.repository.fetch_votes()? {
            let proposal = &record.proposal;
            let phase = proposal.phases().phase_at(height);
            let keep = match filter.registered {
                Registered::Any => true,
                Registered::Yes => record.registered(),
                Registered::No => !record.registered(),
            } && !(filter.active && phase == Phase::Complete)
                && filter.status.map_or(true, |status| status == phase)
                && contains(&filter.title, &proposal.proposal.title)
                && contains(&filter.vote_initiator, &proposal.vote_initiator.to_hex())
                && contains(&filter.vote_chain, &proposal.proposal_chain.to_hex());
            if !keep {
                continue;
            }
            if let Some(voter) = &filter.voter {
                let roster = self
                    .repository
                    .fetch_eligible_voters(proposal.eligible_list(), None)?;
                if !roster.iter().any(|v| v.voter_id.to_hex().contains(voter.as_str())) {
                    continue;
                }
            }
            matching.push(record);
        }

        matching.sort_by(|a, b| {
            filter
                .sort
                .iter()
                .map(|key| match key.order {
                    SortOrder::Asc => key.column.compare(a, b),
                    SortOrder::Desc => key.column.compare(b, a),
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        Ok(Listing::paged(matching, page))
    }

    pub fn fetch_eligible_list(&self, list: &ChainId) -> Result<EligibleListRecord, QueryError> {
        self.repository
            .fetch_eligible_list(list)?
            .ok_or_else(|| not_found("eligible voter list", list))
    }

    /// The current roster, or the one a vote counts against when `as_of_vote`
    /// is given.
    pub fn fetch_eligible_voters(
        &self,
        list: &ChainId,
        page: Page,
        as_of_vote: Option<&ChainId>,
    ) -> Result<Listing<EligibleVoter>, QueryError> {
        self.fetch_eligible_list(list)?;
        let as_of = match as_of_vote {
            Some(vote) => Some(self.fetch_proposal(vote)?.proposal.phases().commit_start),
            None => None,
        };
        let voters = self.repository.fetch_eligible_voters(list, as_of)?;
        Ok(Listing::paged(voters, page))
    }

    pub fn fetch_commit(&self, vote: &ChainId, voter: &VoterId) -> Result<VoteCommit, QueryError> {
        self.repository
            .fetch_commit(vote, voter)?
            .ok_or_else(|| not_found("commit", format!("{}:{}", vote, voter)))
    }

    pub fn fetch_commits(
        &self,
        vote: &ChainId,
        page: Page,
    ) -> Result<Listing<VoteCommit>, QueryError> {
        self.fetch_proposal(vote)?;
        Ok(Listing::paged(self.repository.fetch_commits(vote)?, page))
    }

    pub fn fetch_reveal(&self, vote: &ChainId, voter: &VoterId) -> Result<VoteReveal, QueryError> {
        self.repository
            .fetch_reveal(vote, voter)?
            .ok_or_else(|| not_found("reveal", format!("{}:{}", vote, voter)))
    }

    pub fn fetch_reveals(
        &self,
        vote: &ChainId,
        page: Page,
    ) -> Result<Listing<VoteReveal>, QueryError> {
        self.fetch_proposal(vote)?;
        Ok(Listing::paged(self.repository.fetch_reveals(vote)?, page))
    }

    pub fn fetch_result(&self, vote: &ChainId) -> Result<VoteStats, QueryError> {
        self.repository
            .fetch_result(vote)?
            .ok_or_else(|| not_found("result", vote))
    }

    pub fn fetch_results(
        &self,
        valid_only: bool,
        page: Page,
    ) -> Result<Listing<VoteStats>, QueryError> {
        let results = self
            .repository
            .fetch_results()?
            .into_iter()
            .filter(|stats| !valid_only || stats.valid)
            .collect();
        Ok(Listing::paged(results, page))
    }
}
