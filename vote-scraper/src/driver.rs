//! Walks the ledger height by height and feeds every entry to the watcher.

use crate::ledger::{Fetcher, LedgerError};
use crate::repository::rows::Record;
use crate::repository::{Repository, RepositoryError};
use crate::watcher::{VoteWatcher, WatchError};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};
use vote_lib::identity::IdentityOracle;
use vote_lib::results::{self, VoteStats};

/// Heights between two progress lines in the log.
const PROGRESS_INTERVAL: u32 = 10;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("giving up on height {height} after {attempts} attempts")]
    GaveUp {
        height: u32,
        attempts: u32,
        #[source]
        source: Box<DriverError>,
    },
}

impl DriverError {
    /// Failures worth retrying the whole height for.
    pub fn is_transient(&self) -> bool {
        match self {
            DriverError::Ledger(_) => true,
            DriverError::Watch(e) => e.is_transient(),
            DriverError::Repository(e) => e.is_transient(),
            DriverError::GaveUp { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatchUpConfig {
    /// Wait before checking the head again once caught up.
    pub head_poll_ms: u64,
    /// Wait after a second check still finds nothing new.
    pub idle_ms: u64,
}

impl Default for CatchUpConfig {
    fn default() -> Self {
        Self {
            head_poll_ms: 3_000,
            idle_ms: 30_000,
        }
    }
}

pub trait RetryPolicy {
    /// Delay before retry number `attempt`, counting from 1. `None` gives up.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy for FixedBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt > max => None,
            _ => Some(self.delay),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if matches!(self.max_attempts, Some(max) if attempt > max) {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        Some(self.initial.saturating_mul(factor).min(self.max_delay))
    }
}

/// Stops the driver, waking it from any wait.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock() = true;
        condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Waits up to `delay`; returns whether shutdown was triggered.
    pub fn wait(&self, delay: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let mut triggered = flag.lock();
        condvar.wait_while_for(&mut triggered, |triggered| !*triggered, delay);
        *triggered
    }
}

pub struct CatchUp<F, R, I> {
    fetcher: F,
    watcher: VoteWatcher<R, I>,
    config: CatchUpConfig,
    retry: Box<dyn RetryPolicy + Send>,
    shutdown: Shutdown,
}

impl<F, R, I> CatchUp<F, R, I>
where
    F: Fetcher,
    R: Repository,
    I: IdentityOracle,
{
    pub fn new(
        fetcher: F,
        watcher: VoteWatcher<R, I>,
        config: CatchUpConfig,
        retry: Box<dyn RetryPolicy + Send>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            fetcher,
            watcher,
            config,
            retry,
            shutdown,
        }
    }

    pub fn watcher(&self) -> &VoteWatcher<R, I> {
        &self.watcher
    }

    /// First height not yet completed.
    pub fn next_height(&self) -> Result<u32, DriverError> {
        Ok(self
            .watcher
            .repository()
            .highest_completed()?
            .map_or(0, |height| height + 1))
    }

    /// Follows the ledger head until shut down.
    pub fn run(&mut self) -> Result<(), DriverError> {
        let head_poll = Duration::from_millis(self.config.head_poll_ms);
        let idle = Duration::from_millis(self.config.idle_ms);

        while !self.shutdown.is_triggered() {
            let next = self.next_height()?;
            let top = match self.with_retry(next, |this| this.head_height())? {
                Some(top) => top,
                None => break,
            };
            if next <= top {
                self.catch_up_to(top)?;
                continue;
            }

            if self.shutdown.wait(head_poll) {
                break;
            }
            match self.with_retry(next, |this| this.head_height())? {
                Some(top) if next > top => {
                    debug!(next, top, "waiting for new blocks");
                    if self.shutdown.wait(idle) {
                        break;
                    }
                }
                Some(_) => {}
                None => break,
            }
        }
        info!("catch-up stopped");
        Ok(())
    }

    /// Processes every height from the next one up to `target`. Returns the
    /// number of heights completed.
    pub fn catch_up_to(&mut self, target: u32) -> Result<u32, DriverError> {
        let start = self.next_height()?;
        let mut completed = 0;
        for height in start..=target {
            if self.with_retry(height, |this| this.process_height(height))?.is_none() {
                break;
            }
            completed += 1;
            if height % PROGRESS_INTERVAL == 0 || height == target {
                info!(
                    height,
                    target,
                    deferred_dropped = self.watcher.dead_lettered(),
                    "catch-up progress"
                );
            }
        }
        Ok(completed)
    }

    fn head_height(&mut self) -> Result<u32, DriverError> {
        Ok(self.fetcher.fetch_dblock_head()?.height)
    }

    /// Runs `op` until it succeeds, fails permanently or the policy gives
    /// up. `None` means shutdown interrupted a wait.
    fn with_retry<T>(
        &mut self,
        height: u32,
        mut op: impl FnMut(&mut Self) -> Result<T, DriverError>,
    ) -> Result<Option<T>, DriverError> {
        let mut attempts = 0;
        loop {
            let error = match op(self) {
                Ok(value) => return Ok(Some(value)),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };
            attempts += 1;
            let delay = match self.retry.next_delay(attempts) {
                Some(delay) => delay,
                None => {
                    return Err(DriverError::GaveUp {
                        height,
                        attempts,
                        source: Box::new(error),
                    })
                }
            };
            error!(height, attempts, ?delay, error = %error, "retrying height");
            if self.shutdown.wait(delay) {
                return Ok(None);
            }
        }
    }

    /// Applies one directory block, then settles deferred entries and votes
    /// closing at this height. Safe to repeat after a partial failure.
    pub fn process_height(&mut self, height: u32) -> Result<(), DriverError> {
        let _span = info_span!("height", height).entered();
        self.watcher.clear_deferred();

        let dblock = self.fetcher.fetch_dblock_by_height(height)?;
        for block_ref in dblock.user_entry_blocks() {
            let eblock = self.fetcher.fetch_eblock(&block_ref.key_mr)?;
            for hash in eblock.entries() {
                let entry = self.fetcher.fetch_entry(hash)?;
                match self
                    .watcher
                    .process_entry(&entry, height, dblock.timestamp_ms, true)
                {
                    Err(e) if e.is_transient() => return Err(e.into()),
                    _ => {}
                }
            }
        }

        self.watcher.process_old_entries()?;
        self.compute_results(height)?;
        self.watcher.repository().insert_completed(height)?;
        Ok(())
    }

    /// Stores the results of every vote whose reveal phase ends at `height`.
    fn compute_results(&self, height: u32) -> Result<usize, DriverError> {
        let repository = self.watcher.repository();
        let mut rows = Vec::new();
        for record in repository.fetch_votes_closing_at(height)? {
            let chain = *record.chain_id();
            let voters = repository.fetch_eligible_voters(
                record.proposal.eligible_list(),
                Some(record.proposal.phases().commit_start),
            )?;
            let reveals = repository.fetch_reveals(&chain)?;

            let stats = match results::compute_result(&record.proposal, &voters, &reveals) {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(vote = %chain, error = %e, "cannot compute result");
                    VoteStats::invalid(chain, e.to_string())
                }
            };
            info!(
                vote = %chain,
                valid = stats.valid,
                winners = ?stats.winners().collect::<Vec<_>>(),
                "vote complete"
            );
            rows.push(stats.to_row()?);
        }

        let count = rows.len();
        if count > 0 {
            repository.insert_batch(rows)?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedger;
    use crate::repository::memory::InMemoryRepository;
    use crate::watcher::WatcherConfig;
    use std::thread;
    use std::time::Instant;
    use vote_lib::crypto::HmacAlgo;
    use vote_lib::proposal::VoteType;
    use vote_lib::testing::*;
    use vote_lib::{ChainId, Entry, Hash};

    fn no_wait(max_attempts: Option<u32>) -> Box<dyn RetryPolicy + Send> {
        Box::new(FixedBackoff {
            delay: Duration::ZERO,
            max_attempts,
        })
    }

    fn driver<'a>(
        ledger: &'a MemoryLedger,
        repository: &'a InMemoryRepository,
        identities: StaticIdentities,
        retry: Box<dyn RetryPolicy + Send>,
    ) -> CatchUp<&'a MemoryLedger, &'a InMemoryRepository, StaticIdentities> {
        let watcher = VoteWatcher::new(repository, identities, WatcherConfig::default());
        CatchUp::new(
            ledger,
            watcher,
            CatchUpConfig {
                head_poll_ms: 1,
                idle_ms: 1,
            },
            retry,
            Shutdown::new(),
        )
    }

    /// A single vote: list at 0, proposal at 1, commit at 2, reveal at 4,
    /// closing at 5.
    fn single_vote_ledger() -> (MemoryLedger, StaticIdentities, ChainId) {
        let initiator = TestIdentity::new(1);
        let voter = TestIdentity::new(2);
        let identities = StaticIdentities::default().with(&initiator).with(&voter);
        let ledger = MemoryLedger::default();

        let list = eligible_header_entry(&initiator, Hash::from([9; 32]), &[(voter.id, 3.0)]);
        let document = proposal_json(&list.chain_id, VoteType::Single, &["a", "b"], [2, 3, 4, 5]);
        let vote = proposal_entry(&initiator, &document);
        let chain = vote.chain_id;

        ledger.push_block(vec![list]);
        ledger.push_block(vec![vote]);
        ledger.push_block(vec![commit_entry(
            &chain,
            &voter,
            &commitment(HmacAlgo::Md5, b"pepper", &["b"]),
        )]);
        ledger.push_block(Vec::new());
        ledger.push_block(vec![reveal_entry(&chain, &voter.id, HmacAlgo::Md5, b"pepper", &["b"])]);
        ledger.push_block(Vec::new());
        (ledger, identities, chain)
    }

    #[test]
    fn results_are_stored_when_the_reveal_phase_ends() {
        let (ledger, identities, chain) = single_vote_ledger();
        let repository = InMemoryRepository::new();
        let mut driver = driver(&ledger, &repository, identities, no_wait(None));

        assert_eq!(driver.catch_up_to(4).unwrap(), 5);
        assert_eq!(repository.fetch_result(&chain).unwrap(), None);

        assert_eq!(driver.catch_up_to(5).unwrap(), 1);
        let stats = repository.fetch_result(&chain).unwrap().unwrap();
        assert!(stats.valid);
        assert_eq!(stats.winners().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(repository.highest_completed().unwrap(), Some(5));
        assert_eq!(driver.next_height().unwrap(), 6);
    }

    #[test]
    fn entries_waiting_on_a_later_entry_of_the_same_block_resolve() {
        let initiator = TestIdentity::new(1);
        let identities = StaticIdentities::default().with(&initiator);
        let list = eligible_header_entry(&initiator, Hash::from([9; 32]), &[]);
        let vote = proposal_entry(
            &initiator,
            &proposal_json(&list.chain_id, VoteType::Binary, &["yes", "no"], [5, 6, 7, 8]),
        );
        let chain = vote.chain_id;
        let ledger = MemoryLedger::default();
        ledger.push_block(vec![vote, list]);

        let repository = InMemoryRepository::new();
        let mut driver = driver(&ledger, &repository, identities, no_wait(None));
        driver.process_height(0).unwrap();
        assert!(repository.is_vote_exist(&chain).unwrap());
        assert_eq!(driver.watcher().deferred(), 0);
    }

    #[test]
    fn failed_heights_are_retried_from_the_start() {
        let (ledger, identities, chain) = single_vote_ledger();
        ledger.fail_height(2, 2);
        ledger.fail_height(5, 1);
        let repository = InMemoryRepository::new();
        let mut driver = driver(&ledger, &repository, identities, no_wait(Some(3)));

        assert_eq!(driver.catch_up_to(5).unwrap(), 6);
        assert_eq!(repository.fetch_commits(&chain).unwrap().len(), 1);
        assert!(repository.fetch_result(&chain).unwrap().is_some());
    }

    #[test]
    fn retries_stop_at_the_attempt_bound() {
        let (ledger, identities, _) = single_vote_ledger();
        ledger.fail_height(1, 5);
        let repository = InMemoryRepository::new();
        let mut driver = driver(&ledger, &repository, identities, no_wait(Some(2)));

        match driver.catch_up_to(5) {
            Err(DriverError::GaveUp {
                height: 1,
                attempts: 3,
                ..
            }) => {}
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(repository.highest_completed().unwrap(), Some(0));
    }

    #[test]
    fn failed_computations_store_an_invalid_result() {
        let initiator = TestIdentity::new(1);
        let identities = StaticIdentities::default().with(&initiator);
        let list = eligible_header_entry(&initiator, Hash::from([9; 32]), &[]);
        let mut document = proposal_json(&list.chain_id, VoteType::Single, &["a"], [0, 0, 1, 1]);
        document["vote"]["config"]["computeResultsAgainst"] = "SOMEONE_ELSE".into();
        let vote = proposal_entry(&initiator, &document);
        let chain = vote.chain_id;

        let ledger = MemoryLedger::default();
        ledger.push_block(vec![list, vote]);
        ledger.push_block(Vec::new());
        let repository = InMemoryRepository::new();
        let mut driver = driver(&ledger, &repository, identities, no_wait(None));
        driver.catch_up_to(1).unwrap();

        let stats = repository.fetch_result(&chain).unwrap().unwrap();
        assert!(!stats.valid);
        assert!(stats.invalid_reason.is_some());
    }

    #[test]
    fn run_follows_the_head_until_shut_down() {
        let (ledger, identities, chain) = single_vote_ledger();
        let repository = InMemoryRepository::new();
        let mut driver = driver(&ledger, &repository, identities, no_wait(None));
        let shutdown = driver.shutdown.clone();

        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            shutdown.trigger();
        });
        driver.run().unwrap();
        stopper.join().unwrap();

        assert_eq!(repository.highest_completed().unwrap(), Some(5));
        assert!(repository.fetch_result(&chain).unwrap().is_some());
    }

    #[test]
    fn shutdown_interrupts_waits() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.wait(Duration::from_millis(1)));

        let trigger = shutdown.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.trigger();
        });
        let started = Instant::now();
        assert!(shutdown.wait(Duration::from_secs(60)));
        assert!(started.elapsed() < Duration::from_secs(30));
        handle.join().unwrap();
        assert!(shutdown.is_triggered());
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = ExponentialBackoff {
            initial: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            max_attempts: Some(5),
        };
        let delays = (1..=6)
            .map(|attempt| policy.next_delay(attempt).map(|d| d.as_secs()))
            .collect::<Vec<_>>();
        assert_eq!(
            delays,
            vec![Some(1), Some(2), Some(4), Some(5), Some(5), None]
        );
    }

    #[test]
    fn foreign_entries_do_not_stop_the_driver() {
        let ledger = MemoryLedger::default();
        ledger.push_block(vec![Entry::first_of_chain(
            vec![b"not a vote".to_vec()],
            b"{}".to_vec(),
        )]);
        let repository = InMemoryRepository::new();
        let mut driver = driver(&ledger, &repository, StaticIdentities::default(), no_wait(None));
        assert_eq!(driver.catch_up_to(0).unwrap(), 1);
    }
}
