//! Applies protocol entries, in ledger order, to the repository.

use crate::ledger::LedgerEntry;
use crate::repository::rows::{Record, Row};
use crate::repository::{EligibleListRecord, Repository, RepositoryError, SubmittedEntry, VoteRecord};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, debug_span, info, warn};
use vote_lib::ballot::{VoteCommit, VoteRegistration, VoteReveal};
use vote_lib::eligibility::{
    EligibilityError, EligibleList, EligibleVoterEntry, EligibleVoterHeader,
};
use vote_lib::entry::REGISTRATION_CHAIN_ID;
use vote_lib::identity::{IdentityError, IdentityOracle};
use vote_lib::proposal::ProposalEntry;
use vote_lib::vote::{Vote, VoteError};
use vote_lib::{ChainId, Entry, EntryKind, Hash};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("vote {0} does not exist")]
    MissingVote(ChainId),

    #[error("eligible voter list {0} does not exist")]
    MissingEligibleList(ChainId),

    #[error("vote {0} already exists")]
    VoteExists(ChainId),

    #[error("eligible voter list {0} already exists")]
    EligibleListExists(ChainId),

    #[error("vote registrations belong on chain {expected}, found one on {found}")]
    WrongRegistrationChain { expected: ChainId, found: ChainId },

    #[error(transparent)]
    Parse(#[from] vote_lib::Error),

    #[error(transparent)]
    Vote(#[from] VoteError),

    #[error(transparent)]
    Eligibility(#[from] EligibilityError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl WatchError {
    /// The entry depends on one that has not been seen yet.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WatchError::MissingVote(_) | WatchError::MissingEligibleList(_)
        )
    }

    /// The entry could not be checked because a backing service failed.
    pub fn is_transient(&self) -> bool {
        match self {
            WatchError::Parse(e) => e.is_transient(),
            WatchError::Identity(e) => e.is_transient(),
            WatchError::Repository(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            WatchError::VoteExists(_)
                | WatchError::EligibleListExists(_)
                | WatchError::Eligibility(EligibilityError::Replay(_))
                | WatchError::Vote(VoteError::RevealExists(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatcherConfig {
    /// Entries waiting on a missing vote or list beyond this are dropped.
    pub max_deferred: usize,
    /// Registrations are only accepted from this chain when set.
    pub registration_chain: Option<ChainId>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            max_deferred: 10_000,
            registration_chain: Hash::from_hex(REGISTRATION_CHAIN_ID).ok(),
        }
    }
}

pub struct VoteWatcher<R, I> {
    repository: R,
    identities: I,
    config: WatcherConfig,
    deferred: VecDeque<LedgerEntry>,
    dead_lettered: usize,
}

impl<R, I> VoteWatcher<R, I>
where
    R: Repository,
    I: IdentityOracle,
{
    pub fn new(repository: R, identities: I, config: WatcherConfig) -> Self {
        Self {
            repository,
            identities,
            config,
            deferred: VecDeque::new(),
            dead_lettered: 0,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Entries dropped, either because the deferred queue was full or
    /// because their dependency was still missing when retried.
    pub fn dead_lettered(&self) -> usize {
        self.dead_lettered
    }

    pub fn clear_deferred(&mut self) {
        self.deferred.clear();
    }

    /// Applies one entry. Returns whether the repository changed.
    ///
    /// A new entry that refers to a vote or list not seen yet is queued for
    /// [`VoteWatcher::process_old_entries`]; the error is still returned.
    pub fn process_entry(
        &mut self,
        entry: &Entry,
        height: u32,
        timestamp_ms: u64,
        is_new: bool,
    ) -> Result<bool, WatchError> {
        let kind = match entry.kind() {
            Some(kind) => kind,
            None => return Ok(false),
        };
        let _span = debug_span!("entry", height, entry = %entry.hash).entered();

        let result = match kind {
            EntryKind::VoteChain => self.open_vote(entry, height),
            EntryKind::VoteCommit => self.commit(entry, height),
            EntryKind::VoteReveal => self.reveal(entry, height),
            EntryKind::RegistrationChain => Ok(false),
            EntryKind::RegisterVote => self.register(entry, height),
            EntryKind::EligibleVoters if entry.external_ids.len() == 3 => {
                self.update_roster(entry, height)
            }
            EntryKind::EligibleVoters => self.open_eligible_list(entry, height),
        };

        match &result {
            Ok(changed) => debug!(?kind, changed, "processed entry"),
            Err(e) if e.is_retryable() => {
                debug!(?kind, error = %e, is_new, "entry depends on one not seen yet");
                if is_new {
                    self.defer(LedgerEntry {
                        entry: entry.clone(),
                        height,
                        timestamp_ms,
                    });
                }
            }
            Err(e) if e.is_duplicate() => warn!(?kind, error = %e, "ignoring repeated entry"),
            Err(e) if e.is_transient() => {}
            Err(e) => info!(?kind, error = %e, "rejected entry"),
        }
        result
    }

    fn defer(&mut self, entry: LedgerEntry) {
        if self.deferred.len() >= self.config.max_deferred {
            self.dead_lettered += 1;
            warn!(
                entry = %entry.entry.hash,
                height = entry.height,
                max = self.config.max_deferred,
                "deferred queue is full, dropping entry"
            );
            return;
        }
        self.deferred.push_back(entry);
    }

    /// Retries every deferred entry once. Entries that fail again are
    /// dropped, and those still missing a dependency are dead-lettered;
    /// only transient failures are returned.
    pub fn process_old_entries(&mut self) -> Result<usize, WatchError> {
        let mut changes = 0;
        while let Some(old) = self.deferred.pop_front() {
            match self.process_entry(&old.entry, old.height, old.timestamp_ms, false) {
                Ok(true) => changes += 1,
                Ok(false) => {}
                Err(e) if e.is_transient() => return Err(e),
                Err(e) if e.is_retryable() => {
                    self.dead_lettered += 1;
                    warn!(
                        entry = %old.entry.hash,
                        height = old.height,
                        error = %e,
                        "deferred entry still unresolved, dropping it"
                    );
                }
                Err(_) => {}
            }
        }
        Ok(changes)
    }

    /// Rebuilds a vote with the roster as of its commit start.
    pub fn load_vote(&self, chain_id: &ChainId) -> Result<Option<Vote>, WatchError> {
        let record = match self.repository.fetch_vote(chain_id)? {
            Some(record) => record,
            None => return Ok(None),
        };
        let list_id = *record.proposal.eligible_list();
        let list = self
            .repository
            .fetch_eligible_list(&list_id)?
            .ok_or(WatchError::MissingEligibleList(list_id))?;
        let voters = self
            .repository
            .fetch_eligible_voters(&list_id, Some(record.proposal.phases().commit_start))?;
        let submitted = self.repository.fetch_submitted_entries(&list_id)?;

        let registered = record.registered();
        let mut vote = Vote::new(
            record.proposal,
            EligibleList::from_records(list_id, list.header, voters, submitted),
        );
        vote.registered = registered;
        vote.commits = self
            .repository
            .fetch_commits(chain_id)?
            .into_iter()
            .map(|commit| (commit.voter_id, commit))
            .collect();
        vote.reveals = self
            .repository
            .fetch_reveals(chain_id)?
            .into_iter()
            .map(|reveal| (reveal.voter_id, reveal))
            .collect();
        Ok(Some(vote))
    }

    fn existing_vote(&self, chain_id: &ChainId) -> Result<Vote, WatchError> {
        self.load_vote(chain_id)?
            .ok_or(WatchError::MissingVote(*chain_id))
    }

    fn open_vote(&mut self, entry: &Entry, height: u32) -> Result<bool, WatchError> {
        if self.repository.is_vote_exist(&entry.chain_id)? {
            return Err(WatchError::VoteExists(entry.chain_id));
        }
        let proposal = ProposalEntry::from_entry(entry, height, &self.identities)?;
        let list = *proposal.eligible_list();
        if !self.repository.is_eligible_list_exist(&list)? {
            return Err(WatchError::MissingEligibleList(list));
        }

        info!(
            vote = %proposal.proposal_chain,
            title = %proposal.proposal.title,
            "new vote"
        );
        self.repository.insert(&VoteRecord::new(proposal))?;
        Ok(true)
    }

    fn commit(&mut self, entry: &Entry, height: u32) -> Result<bool, WatchError> {
        let mut vote = self.existing_vote(&entry.chain_id)?;
        let commit = VoteCommit::from_entry(entry, height)?;
        if vote
            .commits
            .get(&commit.voter_id)
            .map_or(false, |stored| stored.entry_hash == commit.entry_hash)
        {
            return Ok(false);
        }

        vote.add_commit(commit.clone(), height)?;
        self.repository.insert(&commit)?;
        Ok(true)
    }

    fn reveal(&mut self, entry: &Entry, height: u32) -> Result<bool, WatchError> {
        let mut vote = self.existing_vote(&entry.chain_id)?;
        let reveal = VoteReveal::from_entry(entry, height)?;
        if vote
            .reveals
            .get(&reveal.voter_id)
            .map_or(false, |stored| stored.entry_hash == reveal.entry_hash)
        {
            return Ok(false);
        }

        vote.add_reveal(reveal.clone(), height)?;
        self.repository.insert(&reveal)?;
        Ok(true)
    }

    fn register(&mut self, entry: &Entry, height: u32) -> Result<bool, WatchError> {
        if let Some(expected) = self.config.registration_chain {
            if entry.chain_id != expected {
                return Err(WatchError::WrongRegistrationChain {
                    expected,
                    found: entry.chain_id,
                });
            }
        }
        let registration = VoteRegistration::from_entry(entry, height)?;
        let record = self
            .repository
            .fetch_vote(&registration.vote_chain)?
            .ok_or(WatchError::MissingVote(registration.vote_chain))?;
        if record.registered() {
            return Ok(false);
        }

        info!(vote = %registration.vote_chain, "vote registered");
        self.repository.set_registered(&registration)?;
        Ok(true)
    }

    fn open_eligible_list(&mut self, entry: &Entry, height: u32) -> Result<bool, WatchError> {
        if self.repository.is_eligible_list_exist(&entry.chain_id)? {
            return Err(WatchError::EligibleListExists(entry.chain_id));
        }
        let header = EligibleVoterHeader::from_entry(entry)?;
        let roster = match EligibleVoterEntry::from_header(entry, height, &header)? {
            Some(mut roster) => {
                roster.resolve_keys(&self.identities)?;
                Some(roster)
            }
            None => None,
        };

        let mut rows = vec![EligibleListRecord {
            chain_id: entry.chain_id,
            header,
            block_height: height,
            entry_hash: entry.hash,
        }
        .to_row()?];
        if let Some(roster) = &roster {
            rows.extend(roster_rows(entry.chain_id, height, roster)?);
        }

        info!(
            list = %entry.chain_id,
            voters = roster.as_ref().map_or(0, |r| r.voters.len()),
            "new eligible voter list"
        );
        self.repository.insert_batch(rows)?;
        Ok(true)
    }

    fn update_roster(&mut self, entry: &Entry, height: u32) -> Result<bool, WatchError> {
        let list = self
            .repository
            .fetch_eligible_list(&entry.chain_id)?
            .ok_or(WatchError::MissingEligibleList(entry.chain_id))?;
        let mut update = EligibleVoterEntry::from_entry(entry, height, &list.header.initiator_key)?;
        if self
            .repository
            .is_repeated_entry_exist(&entry.chain_id, &update.content_hash)?
        {
            return Err(EligibilityError::Replay(update.content_hash).into());
        }
        update.resolve_keys(&self.identities)?;

        debug!(list = %entry.chain_id, voters = update.voters.len(), "roster update");
        self.repository
            .insert_batch(roster_rows(entry.chain_id, height, &update)?)?;
        Ok(true)
    }
}

/// Replay marker plus one row per voter record, removals included.
fn roster_rows(
    list: ChainId,
    height: u32,
    update: &EligibleVoterEntry,
) -> Result<Vec<Row>, RepositoryError> {
    let mut rows = vec![SubmittedEntry {
        eligible_list: list,
        content_hash: update.content_hash,
        block_height: height,
    }
    .to_row()?];
    for voter in &update.voters {
        rows.push(voter.to_row()?);
    }
    Ok(rows)
}
