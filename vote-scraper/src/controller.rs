//! Rebuilds a single vote straight from the ledger, without a catch-up.

use crate::ledger::{fetch_chain_entries, Fetcher, LedgerEntry, LedgerError};
use crate::repository::memory::InMemoryRepository;
use crate::repository::{Repository, RepositoryError};
use crate::watcher::{VoteWatcher, WatchError, WatcherConfig};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use vote_lib::ballot::{VoteCommit, VoteReveal};
use vote_lib::eligibility::EligibleVoter;
use vote_lib::identity::IdentityOracle;
use vote_lib::proposal::{Phase, ProposalEntry};
use vote_lib::results::{self, VoteStats};
use vote_lib::{ChainId, EntryKind};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Parse(#[from] vote_lib::Error),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("chain {0} has no entries")]
    EmptyChain(ChainId),

    #[error("chain {0} is not a vote chain")]
    NotAVote(ChainId),
}

/// A vote as found on the ledger, with its result as of the ledger head.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReport {
    pub proposal: ProposalEntry,
    pub head_height: u32,
    pub phase: Phase,
    pub eligible_voters: Vec<EligibleVoter>,
    pub commits: Vec<VoteCommit>,
    pub reveals: Vec<VoteReveal>,
    pub result: VoteStats,
}

pub struct Controller<F, I> {
    fetcher: F,
    identities: I,
}

impl<F, I> Controller<F, I>
where
    F: Fetcher,
    I: IdentityOracle,
{
    pub fn new(fetcher: F, identities: I) -> Self {
        Self {
            fetcher,
            identities,
        }
    }

    pub fn find_vote(&self, chain: &ChainId) -> Result<VoteReport, ControllerError> {
        let vote_entries = fetch_chain_entries(&self.fetcher, chain)?;
        let first = vote_entries
            .first()
            .ok_or(ControllerError::EmptyChain(*chain))?;
        if first.entry.kind() != Some(EntryKind::VoteChain) {
            return Err(ControllerError::NotAVote(*chain));
        }
        let proposal = ProposalEntry::from_entry(&first.entry, first.height, &self.identities)?;
        let list_entries = fetch_chain_entries(&self.fetcher, proposal.eligible_list())?;
        debug!(
            vote = %chain,
            vote_entries = vote_entries.len(),
            list_entries = list_entries.len(),
            "replaying vote"
        );

        // registrations live on their own chain and are not replayed
        let config = WatcherConfig {
            registration_chain: None,
            ..WatcherConfig::default()
        };
        let mut watcher = VoteWatcher::new(InMemoryRepository::new(), &self.identities, config);
        for LedgerEntry {
            entry,
            height,
            timestamp_ms,
        } in list_entries.iter().chain(&vote_entries)
        {
            match watcher.process_entry(entry, *height, *timestamp_ms, true) {
                Err(e) if e.is_transient() => return Err(e.into()),
                _ => {}
            }
        }
        watcher.process_old_entries()?;

        let repository = watcher.repository();
        let commit_start = proposal.phases().commit_start;
        let eligible_voters =
            repository.fetch_eligible_voters(proposal.eligible_list(), Some(commit_start))?;
        let commits = repository.fetch_commits(chain)?;
        let reveals = repository.fetch_reveals(chain)?;
        let result = results::compute_result(&proposal, &eligible_voters, &reveals)
            .unwrap_or_else(|e| {
                warn!(vote = %chain, error = %e, "cannot compute result");
                VoteStats::invalid(*chain, e.to_string())
            });

        let head_height = self.fetcher.fetch_dblock_head()?.height;
        let phase = proposal.phases().phase_at(head_height);
        info!(vote = %chain, %phase, valid = result.valid, "vote rebuilt");
        Ok(VoteReport {
            proposal,
            head_height,
            phase,
            eligible_voters,
            commits,
            reveals,
            result,
        })
    }
}
