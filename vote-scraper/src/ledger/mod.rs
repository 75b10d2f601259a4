//! Read access to the ledger: directory blocks, entry blocks and entries.

pub mod factomd;
#[cfg(any(test, feature = "test-api"))]
pub mod memory;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use vote_lib::{ChainId, Entry, EntryHash, Hash};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("request to factomd failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("factomd error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed factomd response: {0}")]
    Malformed(String),

    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },
}

/// Position of a chain's entry block inside a directory block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryBlockRef {
    pub chain_id: ChainId,
    pub key_mr: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryBlock {
    pub height: u32,
    pub timestamp_ms: u64,
    pub key_mr: Hash,
    pub entry_blocks: Vec<EntryBlockRef>,
}

impl DirectoryBlock {
    /// Entry blocks of user chains. The admin, entry credit and factoid
    /// blocks sit on reserved chains and never carry entries.
    pub fn user_entry_blocks(&self) -> impl Iterator<Item = &EntryBlockRef> {
        self.entry_blocks
            .iter()
            .filter(|block| !block.chain_id.is_minute_marker())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryBlock {
    pub key_mr: Hash,
    pub chain_id: ChainId,
    pub prev_key_mr: Hash,
    pub height: u32,
    pub entry_hashes: Vec<EntryHash>,
}

impl EntryBlock {
    pub fn is_first(&self) -> bool {
        self.prev_key_mr.is_zero()
    }

    /// Entry hashes without the minute markers interleaved with them.
    pub fn entries(&self) -> impl Iterator<Item = &EntryHash> {
        self.entry_hashes
            .iter()
            .filter(|hash| !hash.is_minute_marker())
    }
}

/// An entry together with the directory block it was recorded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub entry: Entry,
    pub height: u32,
    pub timestamp_ms: u64,
}

pub trait Fetcher {
    fn fetch_dblock_head(&self) -> Result<DirectoryBlock, LedgerError>;
    fn fetch_dblock_by_height(&self, height: u32) -> Result<DirectoryBlock, LedgerError>;
    fn fetch_eblock(&self, key_mr: &Hash) -> Result<EntryBlock, LedgerError>;
    fn fetch_entry(&self, hash: &EntryHash) -> Result<Entry, LedgerError>;
    /// Key merkle root of the newest entry block of `chain_id`.
    fn fetch_head_index_by_chain_id(&self, chain_id: &ChainId) -> Result<Hash, LedgerError>;
}

impl<T: Fetcher + ?Sized> Fetcher for &T {
    fn fetch_dblock_head(&self) -> Result<DirectoryBlock, LedgerError> {
        (**self).fetch_dblock_head()
    }

    fn fetch_dblock_by_height(&self, height: u32) -> Result<DirectoryBlock, LedgerError> {
        (**self).fetch_dblock_by_height(height)
    }

    fn fetch_eblock(&self, key_mr: &Hash) -> Result<EntryBlock, LedgerError> {
        (**self).fetch_eblock(key_mr)
    }

    fn fetch_entry(&self, hash: &EntryHash) -> Result<Entry, LedgerError> {
        (**self).fetch_entry(hash)
    }

    fn fetch_head_index_by_chain_id(&self, chain_id: &ChainId) -> Result<Hash, LedgerError> {
        (**self).fetch_head_index_by_chain_id(chain_id)
    }
}

impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    fn fetch_dblock_head(&self) -> Result<DirectoryBlock, LedgerError> {
        (**self).fetch_dblock_head()
    }

    fn fetch_dblock_by_height(&self, height: u32) -> Result<DirectoryBlock, LedgerError> {
        (**self).fetch_dblock_by_height(height)
    }

    fn fetch_eblock(&self, key_mr: &Hash) -> Result<EntryBlock, LedgerError> {
        (**self).fetch_eblock(key_mr)
    }

    fn fetch_entry(&self, hash: &EntryHash) -> Result<Entry, LedgerError> {
        (**self).fetch_entry(hash)
    }

    fn fetch_head_index_by_chain_id(&self, chain_id: &ChainId) -> Result<Hash, LedgerError> {
        (**self).fetch_head_index_by_chain_id(chain_id)
    }
}

/// Every entry of `chain_id`, oldest first, walking back from the chain head.
pub fn fetch_chain_entries<F>(fetcher: &F, chain_id: &ChainId) -> Result<Vec<LedgerEntry>, LedgerError>
where
    F: Fetcher + ?Sized,
{
    let mut blocks = Vec::new();
    let mut next = fetcher.fetch_head_index_by_chain_id(chain_id)?;
    while !next.is_zero() {
        let block = fetcher.fetch_eblock(&next)?;
        next = block.prev_key_mr;
        blocks.push(block);
    }

    let mut entries = Vec::new();
    for block in blocks.iter().rev() {
        let timestamp_ms = fetcher.fetch_dblock_by_height(block.height)?.timestamp_ms;
        for hash in block.entries() {
            entries.push(LedgerEntry {
                entry: fetcher.fetch_entry(hash)?,
                height: block.height,
                timestamp_ms,
            });
        }
    }
    Ok(entries)
}
