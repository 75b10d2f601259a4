//! A ledger kept in memory, one directory block per `push_block` call.

use super::{DirectoryBlock, EntryBlock, EntryBlockRef, Fetcher, LedgerError};
use parking_lot::RwLock;
use std::collections::HashMap;
use vote_lib::crypto;
use vote_lib::{ChainId, Entry, EntryHash, Hash};

pub const GENESIS_TIMESTAMP_MS: u64 = 1_500_000_000_000;
pub const BLOCK_TIME_MS: u64 = 600_000;

const ADMIN_CHAIN: u8 = 0x0a;

#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    dblocks: Vec<DirectoryBlock>,
    eblocks: HashMap<Hash, EntryBlock>,
    entries: HashMap<EntryHash, Entry>,
    heads: HashMap<ChainId, Hash>,
    failures: HashMap<u32, u32>,
}

fn reserved_chain(last: u8) -> ChainId {
    let mut bytes = [0u8; 32];
    bytes[31] = last;
    Hash::from(bytes)
}

impl MemoryLedger {
    /// Records `entries` in a new directory block and returns its height.
    /// Entries of one chain share an entry block, in the given order.
    pub fn push_block(&self, entries: Vec<Entry>) -> u32 {
        let mut inner = self.inner.write();
        let height = inner.dblocks.len() as u32;
        let height_bytes = height.to_be_bytes();

        let mut chains: Vec<(ChainId, Vec<EntryHash>)> = Vec::new();
        for entry in entries {
            match chains.iter_mut().find(|(chain, _)| *chain == entry.chain_id) {
                Some((_, hashes)) => hashes.push(entry.hash),
                None => chains.push((entry.chain_id, vec![entry.hash])),
            }
            inner.entries.insert(entry.hash, entry);
        }

        let admin = reserved_chain(ADMIN_CHAIN);
        let mut entry_blocks = vec![EntryBlockRef {
            chain_id: admin,
            key_mr: crypto::sha256(&[admin.as_ref(), &height_bytes[..]]),
        }];
        for (chain_id, mut entry_hashes) in chains {
            entry_hashes.push(reserved_chain(1));
            let prev_key_mr = inner.heads.get(&chain_id).copied().unwrap_or_default();
            let key_mr = crypto::sha256(&[chain_id.as_ref(), prev_key_mr.as_ref(), &height_bytes[..]]);
            inner.eblocks.insert(
                key_mr,
                EntryBlock {
                    key_mr,
                    chain_id,
                    prev_key_mr,
                    height,
                    entry_hashes,
                },
            );
            inner.heads.insert(chain_id, key_mr);
            entry_blocks.push(EntryBlockRef { chain_id, key_mr });
        }

        inner.dblocks.push(DirectoryBlock {
            height,
            timestamp_ms: GENESIS_TIMESTAMP_MS + u64::from(height) * BLOCK_TIME_MS,
            key_mr: crypto::sha256(&[&b"dblock"[..], &height_bytes[..]]),
            entry_blocks,
        });
        height
    }

    /// Makes the next `times` fetches of the directory block at `height` fail.
    pub fn fail_height(&self, height: u32, times: u32) {
        self.inner.write().failures.insert(height, times);
    }
}

impl Fetcher for MemoryLedger {
    fn fetch_dblock_head(&self) -> Result<DirectoryBlock, LedgerError> {
        self.inner
            .read()
            .dblocks
            .last()
            .cloned()
            .ok_or_else(|| LedgerError::NotFound {
                kind: "directory block",
                key: "head".to_string(),
            })
    }

    fn fetch_dblock_by_height(&self, height: u32) -> Result<DirectoryBlock, LedgerError> {
        let mut inner = self.inner.write();
        if let Some(remaining) = inner.failures.get_mut(&height).filter(|n| **n > 0) {
            *remaining -= 1;
            return Err(LedgerError::Rpc {
                code: -32000,
                message: format!("injected failure at height {}", height),
            });
        }
        inner
            .dblocks
            .get(height as usize)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound {
                kind: "directory block",
                key: height.to_string(),
            })
    }

    fn fetch_eblock(&self, key_mr: &Hash) -> Result<EntryBlock, LedgerError> {
        self.inner
            .read()
            .eblocks
            .get(key_mr)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound {
                kind: "entry block",
                key: key_mr.to_hex(),
            })
    }

    fn fetch_entry(&self, hash: &EntryHash) -> Result<Entry, LedgerError> {
        self.inner
            .read()
            .entries
            .get(hash)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound {
                kind: "entry",
                key: hash.to_hex(),
            })
    }

    fn fetch_head_index_by_chain_id(&self, chain_id: &ChainId) -> Result<Hash, LedgerError> {
        self.inner
            .read()
            .heads
            .get(chain_id)
            .copied()
            .ok_or_else(|| LedgerError::NotFound {
                kind: "chain",
                key: chain_id.to_hex(),
            })
    }
}
