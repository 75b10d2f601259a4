use super::rows::{Record, Row, Table};
use super::{EligibleListRecord, Repository, RepositoryError, SubmittedEntry, VoteRecord};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use vote_lib::ballot::{VoteCommit, VoteRegistration, VoteReveal};
use vote_lib::eligibility::EligibleVoter;
use vote_lib::results::VoteStats;
use vote_lib::{ChainId, Hash, VoterId};

#[derive(Debug, Clone)]
struct StoredRow {
    /// Write order, used to find the latest voter record at a height.
    seq: u64,
    row: Row,
}

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<Table, BTreeMap<String, StoredRow>>,
    completed: Option<u32>,
    seq: u64,
}

impl Tables {
    fn get(&self, table: Table, key: &str) -> Option<&Row> {
        self.rows
            .get(&table)
            .and_then(|rows| rows.get(key))
            .map(|stored| &stored.row)
    }

    fn scan(&self, table: Table) -> impl Iterator<Item = &StoredRow> {
        self.rows.get(&table).into_iter().flat_map(BTreeMap::values)
    }

    fn rows_where<'a>(
        &'a self,
        table: Table,
        column: &'a str,
        value: &'a Value,
    ) -> impl Iterator<Item = &'a StoredRow> + 'a {
        self.scan(table)
            .filter(move |stored| stored.row.column(column) == Some(value))
    }

    fn write(&mut self, row: Row) {
        self.seq += 1;
        let seq = self.seq;
        self.rows
            .entry(row.table())
            .or_default()
            .insert(row.key().to_string(), StoredRow { seq, row });
    }
}

fn decode<'a, R, I>(rows: I) -> Result<Vec<R>, RepositoryError>
where
    R: Record,
    I: IntoIterator<Item = &'a StoredRow>,
{
    rows.into_iter().map(|stored| R::from_row(&stored.row)).collect()
}

fn hash_value(hash: &Hash) -> Value {
    Value::String(hash.to_hex())
}

/// All tables behind one lock. Batches are applied under a single write
/// guard, so readers never observe part of a batch.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn fetch<R: Record>(&self, key: &str) -> Result<Option<R>, RepositoryError> {
        self.tables
            .read()
            .get(R::TABLE, key)
            .map(R::from_row)
            .transpose()
    }
}

impl Repository for InMemoryRepository {
    fn is_vote_exist(&self, vote: &ChainId) -> Result<bool, RepositoryError> {
        Ok(self.tables.read().get(Table::Proposals, &vote.to_hex()).is_some())
    }

    fn is_eligible_list_exist(&self, list: &ChainId) -> Result<bool, RepositoryError> {
        Ok(self
            .tables
            .read()
            .get(Table::EligibleLists, &list.to_hex())
            .is_some())
    }

    fn is_repeated_entry_exist(
        &self,
        list: &ChainId,
        content_hash: &Hash,
    ) -> Result<bool, RepositoryError> {
        let key = format!("{}:{}", list, content_hash);
        Ok(self
            .tables
            .read()
            .get(Table::EligibleSubmitted, &key)
            .is_some())
    }

    fn fetch_vote(&self, vote: &ChainId) -> Result<Option<VoteRecord>, RepositoryError> {
        self.fetch(&vote.to_hex())
    }

    fn fetch_votes(&self) -> Result<Vec<VoteRecord>, RepositoryError> {
        decode(self.tables.read().scan(Table::Proposals))
    }

    fn fetch_votes_closing_at(&self, height: u32) -> Result<Vec<VoteRecord>, RepositoryError> {
        let tables = self.tables.read();
        let height = Value::from(height);
        decode(tables.rows_where(Table::Proposals, "reveal_stop", &height))
    }

    fn fetch_eligible_list(
        &self,
        list: &ChainId,
    ) -> Result<Option<EligibleListRecord>, RepositoryError> {
        self.fetch(&list.to_hex())
    }

    fn fetch_eligible_voters(
        &self,
        list: &ChainId,
        as_of: Option<u32>,
    ) -> Result<Vec<EligibleVoter>, RepositoryError> {
        let tables = self.tables.read();
        let list = hash_value(list);
        let mut records = tables
            .rows_where(Table::EligibleVoters, "eligible_list", &list)
            .map(|stored| Ok((stored.seq, EligibleVoter::from_row(&stored.row)?)))
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        records.retain(|(_, voter)| as_of.map_or(true, |height| voter.block_height <= height));
        records.sort_by_key(|(seq, voter)| (voter.block_height, *seq));

        let mut latest: BTreeMap<VoterId, EligibleVoter> = BTreeMap::new();
        for (_, voter) in records {
            latest.insert(voter.voter_id, voter);
        }
        Ok(latest
            .into_values()
            .filter(|voter| !voter.is_tombstone())
            .collect())
    }

    fn fetch_submitted_entries(&self, list: &ChainId) -> Result<Vec<Hash>, RepositoryError> {
        let tables = self.tables.read();
        let list = hash_value(list);
        let entries: Vec<SubmittedEntry> =
            decode(tables.rows_where(Table::EligibleSubmitted, "eligible_list", &list))?;
        Ok(entries.into_iter().map(|entry| entry.content_hash).collect())
    }

    fn fetch_commit(
        &self,
        vote: &ChainId,
        voter: &VoterId,
    ) -> Result<Option<VoteCommit>, RepositoryError> {
        self.fetch(&format!("{}:{}", vote, voter))
    }

    fn fetch_commits(&self, vote: &ChainId) -> Result<Vec<VoteCommit>, RepositoryError> {
        let tables = self.tables.read();
        let vote = hash_value(vote);
        let mut commits: Vec<VoteCommit> =
            decode(tables.rows_where(Table::Commits, "vote_chain", &vote))?;
        commits.sort_by_key(|commit| commit.voter_id);
        Ok(commits)
    }

    fn fetch_reveal(
        &self,
        vote: &ChainId,
        voter: &VoterId,
    ) -> Result<Option<VoteReveal>, RepositoryError> {
        self.fetch(&format!("{}:{}", vote, voter))
    }

    fn fetch_reveals(&self, vote: &ChainId) -> Result<Vec<VoteReveal>, RepositoryError> {
        let tables = self.tables.read();
        let vote = hash_value(vote);
        let mut reveals = tables
            .rows_where(Table::Reveals, "vote_chain", &vote)
            .map(|stored| Ok((stored.seq, VoteReveal::from_row(&stored.row)?)))
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        reveals.sort_by_key(|(seq, reveal)| (reveal.block_height, *seq));
        Ok(reveals.into_iter().map(|(_, reveal)| reveal).collect())
    }

    fn fetch_result(&self, vote: &ChainId) -> Result<Option<VoteStats>, RepositoryError> {
        self.fetch(&vote.to_hex())
    }

    fn fetch_results(&self) -> Result<Vec<VoteStats>, RepositoryError> {
        decode(self.tables.read().scan(Table::Results))
    }

    fn highest_completed(&self) -> Result<Option<u32>, RepositoryError> {
        Ok(self.tables.read().completed)
    }

    fn insert_batch(&self, rows: Vec<Row>) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        for row in rows {
            tables.write(row);
        }
        Ok(())
    }

    fn set_registered(&self, registration: &VoteRegistration) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        let row = tables
            .get(Table::Proposals, &registration.vote_chain.to_hex())
            .ok_or(RepositoryError::UnknownVote(registration.vote_chain))?;
        let mut record = VoteRecord::from_row(row)?;
        record.registration = Some(registration.clone());
        let row = record.to_row()?;
        tables.write(row);
        Ok(())
    }

    fn insert_completed(&self, height: u32) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        tables.completed = tables.completed.max(Some(height));
        Ok(())
    }
}
