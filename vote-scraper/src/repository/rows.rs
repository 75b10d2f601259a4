//! Explicit mapping between protocol records and table rows.

use super::{EligibleListRecord, RepositoryError, SubmittedEntry, VoteRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use vote_lib::ballot::{CommitContent, RevealContent, VoteCommit, VoteReveal};
use vote_lib::eligibility::{EligibleVoter, EligibleVoterHeader};
use vote_lib::results::VoteStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Proposals,
    EligibleLists,
    EligibleVoters,
    EligibleSubmitted,
    Commits,
    Reveals,
    Results,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Proposals => "proposals",
            Table::EligibleLists => "eligible_list",
            Table::EligibleVoters => "eligible_voters",
            Table::EligibleSubmitted => "eligible_submitted",
            Table::Commits => "commits",
            Table::Reveals => "reveals",
            Table::Results => "vote_results",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    table: Table,
    key: String,
    columns: BTreeMap<&'static str, Value>,
}

impl Row {
    pub fn new(table: Table, key: impl Into<String>) -> Self {
        Self {
            table,
            key: key.into(),
            columns: BTreeMap::new(),
        }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn set<T>(&mut self, column: &'static str, value: &T) -> Result<&mut Self, RepositoryError>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(value).map_err(|source| RepositoryError::Column {
            table: self.table.name(),
            column,
            source,
        })?;
        self.columns.insert(column, value);
        Ok(self)
    }

    pub fn column(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn get<T: DeserializeOwned>(&self, column: &'static str) -> Result<T, RepositoryError> {
        let value = self
            .columns
            .get(column)
            .cloned()
            .ok_or(RepositoryError::MissingColumn {
                table: self.table.name(),
                column,
            })?;
        serde_json::from_value(value).map_err(|source| RepositoryError::Column {
            table: self.table.name(),
            column,
            source,
        })
    }
}

pub trait Record: Sized {
    const TABLE: Table;

    fn key(&self) -> String;
    fn to_row(&self) -> Result<Row, RepositoryError>;
    fn from_row(row: &Row) -> Result<Self, RepositoryError>;

    fn new_row(&self) -> Row {
        Row::new(Self::TABLE, self.key())
    }
}

impl Record for VoteRecord {
    const TABLE: Table = Table::Proposals;

    fn key(&self) -> String {
        self.proposal.proposal_chain.to_hex()
    }

    fn to_row(&self) -> Result<Row, RepositoryError> {
        let proposal = &self.proposal;
        let phases = proposal.phases();
        let mut row = self.new_row();
        row.set("chain_id", &proposal.proposal_chain)?
            .set("title", &proposal.proposal.title)?
            .set("vote_initiator", &proposal.vote_initiator)?
            .set("commit_start", &phases.commit_start)?
            .set("commit_stop", &phases.commit_end)?
            .set("reveal_start", &phases.reveal_start)?
            .set("reveal_stop", &phases.reveal_end)?
            .set("eligible_voter_chain", proposal.eligible_list())?
            .set("vote_type", &proposal.vote.vote_type)?
            .set("block_height", &proposal.block_height)?
            .set("registered", &self.registered())?
            .set("registration", &self.registration)?
            .set("proposal", proposal)?;
        Ok(row)
    }

    fn from_row(row: &Row) -> Result<Self, RepositoryError> {
        Ok(Self {
            proposal: row.get("proposal")?,
            registration: row.get("registration")?,
        })
    }
}

impl Record for EligibleListRecord {
    const TABLE: Table = Table::EligibleLists;

    fn key(&self) -> String {
        self.chain_id.to_hex()
    }

    fn to_row(&self) -> Result<Row, RepositoryError> {
        let mut row = self.new_row();
        row.set("chain_id", &self.chain_id)?
            .set("vote_initiator", &self.header.vote_initiator)?
            .set("nonce", &self.header.nonce)?
            .set("initiator_key", &self.header.initiator_key)?
            .set("initiator_signature", &self.header.initiator_signature)?
            .set("block_height", &self.block_height)?
            .set("entry_hash", &self.entry_hash)?;
        Ok(row)
    }

    fn from_row(row: &Row) -> Result<Self, RepositoryError> {
        Ok(Self {
            chain_id: row.get("chain_id")?,
            header: EligibleVoterHeader {
                vote_initiator: row.get("vote_initiator")?,
                nonce: row.get("nonce")?,
                initiator_key: row.get("initiator_key")?,
                initiator_signature: row.get("initiator_signature")?,
            },
            block_height: row.get("block_height")?,
            entry_hash: row.get("entry_hash")?,
        })
    }
}

impl Record for EligibleVoter {
    const TABLE: Table = Table::EligibleVoters;

    /// Every record is kept so the roster can be read as of any height.
    fn key(&self) -> String {
        format!("{}:{}:{}", self.eligible_list, self.voter_id, self.entry_hash)
    }

    fn to_row(&self) -> Result<Row, RepositoryError> {
        let mut row = self.new_row();
        row.set("voter_id", &self.voter_id)?
            .set("eligible_list", &self.eligible_list)?
            .set("weight", &self.weight)?
            .set("block_height", &self.block_height)?
            .set("entry_hash", &self.entry_hash)?
            .set("keys", &self.signing_keys)?;
        Ok(row)
    }

    fn from_row(row: &Row) -> Result<Self, RepositoryError> {
        Ok(Self {
            voter_id: row.get("voter_id")?,
            weight: row.get("weight")?,
            block_height: row.get("block_height")?,
            eligible_list: row.get("eligible_list")?,
            entry_hash: row.get("entry_hash")?,
            signing_keys: row.get("keys")?,
        })
    }
}

impl Record for SubmittedEntry {
    const TABLE: Table = Table::EligibleSubmitted;

    fn key(&self) -> String {
        format!("{}:{}", self.eligible_list, self.content_hash)
    }

    fn to_row(&self) -> Result<Row, RepositoryError> {
        let mut row = self.new_row();
        row.set("eligible_list", &self.eligible_list)?
            .set("repeat_hash", &self.content_hash)?
            .set("block_height", &self.block_height)?;
        Ok(row)
    }

    fn from_row(row: &Row) -> Result<Self, RepositoryError> {
        Ok(Self {
            eligible_list: row.get("eligible_list")?,
            content_hash: row.get("repeat_hash")?,
            block_height: row.get("block_height")?,
        })
    }
}

impl Record for VoteCommit {
    const TABLE: Table = Table::Commits;

    /// One commit per voter, a later commit overwrites the earlier one.
    fn key(&self) -> String {
        format!("{}:{}", self.vote_chain, self.voter_id)
    }

    fn to_row(&self) -> Result<Row, RepositoryError> {
        let mut row = self.new_row();
        row.set("voter_id", &self.voter_id)?
            .set("vote_chain", &self.vote_chain)?
            .set("voter_key", &self.voter_key)?
            .set("signature", &self.signature)?
            .set("entry_hash", &self.entry_hash)?
            .set("block_height", &self.block_height)?
            .set("commitment", &self.content.commitment)?;
        Ok(row)
    }

    fn from_row(row: &Row) -> Result<Self, RepositoryError> {
        Ok(Self {
            voter_id: row.get("voter_id")?,
            voter_key: row.get("voter_key")?,
            signature: row.get("signature")?,
            vote_chain: row.get("vote_chain")?,
            entry_hash: row.get("entry_hash")?,
            block_height: row.get("block_height")?,
            content: CommitContent {
                commitment: row.get("commitment")?,
            },
        })
    }
}

impl Record for VoteReveal {
    const TABLE: Table = Table::Reveals;

    fn key(&self) -> String {
        format!("{}:{}", self.vote_chain, self.voter_id)
    }

    fn to_row(&self) -> Result<Row, RepositoryError> {
        let mut row = self.new_row();
        row.set("voter_id", &self.voter_id)?
            .set("vote_chain", &self.vote_chain)?
            .set("entry_hash", &self.entry_hash)?
            .set("block_height", &self.block_height)?
            .set("vote", &self.content.options)?
            .set("secret", &self.content.secret)?
            .set("hmac_algo", &self.content.hmac_algo)?;
        Ok(row)
    }

    fn from_row(row: &Row) -> Result<Self, RepositoryError> {
        Ok(Self {
            voter_id: row.get("voter_id")?,
            vote_chain: row.get("vote_chain")?,
            entry_hash: row.get("entry_hash")?,
            block_height: row.get("block_height")?,
            content: RevealContent {
                options: row.get("vote")?,
                secret: row.get("secret")?,
                hmac_algo: row.get("hmac_algo")?,
            },
        })
    }
}

impl Record for VoteStats {
    const TABLE: Table = Table::Results;

    fn key(&self) -> String {
        self.vote_chain.to_hex()
    }

    fn to_row(&self) -> Result<Row, RepositoryError> {
        let mut row = self.new_row();
        row.set("chain_id", &self.vote_chain)?
            .set("valid", &self.valid)?
            .set("invalid_reason", &self.invalid_reason)?
            .set("stats", self)?;
        Ok(row)
    }

    fn from_row(row: &Row) -> Result<Self, RepositoryError> {
        row.get("stats")
    }
}
