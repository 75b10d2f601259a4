//! Factomd v2 JSON-RPC client.

use super::{DirectoryBlock, EntryBlock, EntryBlockRef, Fetcher, LedgerError};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;
use vote_lib::crypto::{self, PublicKey};
use vote_lib::identity::{IdentityError, IdentityOracle};
use vote_lib::{ChainId, Entry, EntryHash, Hash, IdentityId};

/// Prefix length of a base58 `idpub` identity key.
const IDPUB_PREFIX_LENGTH: usize = 3;
const IDPUB_CHECKSUM_LENGTH: usize = 4;

/// Returned by factomd when a chain or identity has no entries.
const MISSING_CHAIN_HEAD: i64 = -32009;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FactomdConfig {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
}

impl Default for FactomdConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8088,
            timeout_ms: 30_000,
        }
    }
}

impl FactomdConfig {
    pub fn url(&self) -> String {
        format!("http://{}:{}/v2", self.host, self.port)
    }
}

#[derive(Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct Heights {
    directoryblockheight: u32,
}

#[derive(Deserialize)]
struct DBlockResponse {
    dblock: RawDBlock,
}

#[derive(Deserialize)]
struct RawDBlock {
    header: RawDBlockHeader,
    dbentries: Vec<RawDBEntry>,
    #[serde(default)]
    keymr: Hash,
}

#[derive(Deserialize)]
struct RawDBlockHeader {
    /// Minutes since the unix epoch.
    timestamp: u64,
    dbheight: u32,
}

#[derive(Deserialize)]
struct RawDBEntry {
    chainid: ChainId,
    keymr: Hash,
}

#[derive(Deserialize)]
struct RawEBlock {
    header: RawEBlockHeader,
    entrylist: Vec<RawEBlockEntry>,
}

#[derive(Deserialize)]
struct RawEBlockHeader {
    chainid: ChainId,
    prevkeymr: Hash,
    dbheight: u32,
}

#[derive(Deserialize)]
struct RawEBlockEntry {
    entryhash: EntryHash,
}

#[derive(Deserialize)]
struct RawEntry {
    chainid: ChainId,
    content: String,
    extids: Vec<String>,
}

#[derive(Deserialize)]
struct ChainHead {
    chainhead: String,
}

#[derive(Deserialize)]
struct IdentityKeys {
    keys: Vec<String>,
}

pub struct FactomdClient {
    client: Client,
    url: String,
    request_id: AtomicU64,
}

impl FactomdClient {
    pub fn new(config: &FactomdConfig) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: config.url(),
            request_id: AtomicU64::new(0),
        })
    }

    fn call<P, T>(&self, method: &str, params: P) -> Result<T, LedgerError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "factomd request");
        let response: RpcResponse<T> = self
            .client
            .post(&self.url)
            .json(&RpcRequest {
                jsonrpc: "2.0",
                id,
                method,
                params,
            })
            .send()?
            .json()?;

        match response {
            RpcResponse {
                error: Some(RpcError { code, message }),
                ..
            } => Err(LedgerError::Rpc { code, message }),
            RpcResponse {
                result: Some(result),
                ..
            } => Ok(result),
            _ => Err(LedgerError::Malformed(format!(
                "{} returned neither a result nor an error",
                method
            ))),
        }
    }

    fn dblock(&self, height: u32) -> Result<DirectoryBlock, LedgerError> {
        let DBlockResponse { dblock } = self.call("dblock-by-height", json!({ "height": height }))?;
        Ok(DirectoryBlock {
            height: dblock.header.dbheight,
            timestamp_ms: dblock.header.timestamp * 60_000,
            key_mr: dblock.keymr,
            entry_blocks: dblock
                .dbentries
                .into_iter()
                .map(|e| EntryBlockRef {
                    chain_id: e.chainid,
                    key_mr: e.keymr,
                })
                .collect(),
        })
    }
}

impl Fetcher for FactomdClient {
    fn fetch_dblock_head(&self) -> Result<DirectoryBlock, LedgerError> {
        let heights: Heights = self.call("heights", json!({}))?;
        self.dblock(heights.directoryblockheight)
    }

    fn fetch_dblock_by_height(&self, height: u32) -> Result<DirectoryBlock, LedgerError> {
        self.dblock(height)
    }

    fn fetch_eblock(&self, key_mr: &Hash) -> Result<EntryBlock, LedgerError> {
        let eblock: RawEBlock = self.call("entry-block", json!({ "keymr": key_mr }))?;
        Ok(EntryBlock {
            key_mr: *key_mr,
            chain_id: eblock.header.chainid,
            prev_key_mr: eblock.header.prevkeymr,
            height: eblock.header.dbheight,
            entry_hashes: eblock.entrylist.into_iter().map(|e| e.entryhash).collect(),
        })
    }

    fn fetch_entry(&self, hash: &EntryHash) -> Result<Entry, LedgerError> {
        let raw: RawEntry = self.call("entry", json!({ "hash": hash }))?;
        let decode = |field: &str, value: &str| {
            hex::decode(value)
                .map_err(|e| LedgerError::Malformed(format!("entry {} {}: {}", hash, field, e)))
        };
        let external_ids = raw
            .extids
            .iter()
            .map(|id| decode("extid", id))
            .collect::<Result<Vec<_>, _>>()?;
        let entry = Entry::checked(raw.chainid, external_ids, decode("content", &raw.content)?)
            .map_err(|e| LedgerError::Malformed(format!("entry {}: {}", hash, e)))?;
        if entry.hash != *hash {
            return Err(LedgerError::Malformed(format!(
                "entry {} hashes to {}",
                hash, entry.hash
            )));
        }
        Ok(entry)
    }

    fn fetch_head_index_by_chain_id(&self, chain_id: &ChainId) -> Result<Hash, LedgerError> {
        let head: ChainHead = self.call("chain-head", json!({ "chainid": chain_id }))?;
        if head.chainhead.is_empty() {
            return Err(LedgerError::NotFound {
                kind: "chain",
                key: chain_id.to_hex(),
            });
        }
        head.chainhead
            .parse()
            .map_err(|e| LedgerError::Malformed(format!("chain head of {}: {}", chain_id, e)))
    }
}

impl IdentityOracle for FactomdClient {
    fn active_signing_keys_at_height(
        &self,
        identity: &IdentityId,
        height: u32,
    ) -> Result<Vec<PublicKey>, IdentityError> {
        let keys: IdentityKeys = self
            .call(
                "active-identity-keys",
                json!({ "chain_id": identity, "height": height }),
            )
            .map_err(|e| match e {
                LedgerError::Rpc {
                    code: MISSING_CHAIN_HEAD,
                    ..
                } => IdentityError::NotFound(*identity),
                other => IdentityError::Unavailable(other.to_string()),
            })?;

        keys.keys
            .iter()
            .map(|key| {
                decode_idpub(key).map_err(|reason| IdentityError::MalformedKey {
                    identity: *identity,
                    key: key.clone(),
                    reason,
                })
            })
            .collect()
    }
}

/// Decodes a base58check `idpub` key into its ed25519 public key.
pub fn decode_idpub(key: &str) -> Result<PublicKey, String> {
    let bytes = bs58::decode(key).into_vec().map_err(|e| e.to_string())?;
    let body_length = IDPUB_PREFIX_LENGTH + crypto::PUBLIC_KEY_LENGTH;
    if bytes.len() != body_length + IDPUB_CHECKSUM_LENGTH {
        return Err(format!(
            "expected {} bytes, found {}",
            body_length + IDPUB_CHECKSUM_LENGTH,
            bytes.len()
        ));
    }

    let (body, checksum) = bytes.split_at(body_length);
    let digest = crypto::sha256(&[crypto::sha256(&[body]).as_ref()]);
    if digest.as_bytes()[..IDPUB_CHECKSUM_LENGTH] != *checksum {
        return Err("checksum mismatch".to_string());
    }
    PublicKey::from_slice(&body[IDPUB_PREFIX_LENGTH..]).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDPUB_PREFIX: [u8; 3] = [0x03, 0x45, 0xef];

    fn encode_idpub(key: &PublicKey) -> String {
        let mut bytes = IDPUB_PREFIX.to_vec();
        bytes.extend_from_slice(key.as_bytes());
        let digest = crypto::sha256(&[crypto::sha256(&[bytes.as_slice()]).as_ref()]);
        bytes.extend_from_slice(&digest.as_bytes()[..4]);
        bs58::encode(bytes).into_string()
    }

    #[test]
    fn idpub_keys_decode() {
        let key = PublicKey::from([42; 32]);
        assert_eq!(decode_idpub(&encode_idpub(&key)).unwrap(), key);
    }

    #[test]
    fn idpub_checksum_is_checked() {
        let mut encoded = encode_idpub(&PublicKey::from([42; 32])).into_bytes();
        let last = encoded.len() - 1;
        encoded[last] = if encoded[last] == b'1' { b'2' } else { b'1' };
        let tampered = String::from_utf8(encoded).unwrap();
        assert!(decode_idpub(&tampered).is_err());
        assert!(decode_idpub("idpub").is_err());
    }

    #[test]
    fn parses_dblock_responses() {
        let raw = serde_json::json!({
            "dblock": {
                "header": {"version": 0, "timestamp": 25_000_000, "dbheight": 160_000},
                "dbentries": [{
                    "chainid": "000000000000000000000000000000000000000000000000000000000000000a",
                    "keymr": "a968e880ee3a7002f25ade15ae36a77c15f4dbc9d8c11fdd5fe86ba6af73a475"
                }],
                "keymr": "a968e880ee3a7002f25ade15ae36a77c15f4dbc9d8c11fdd5fe86ba6af73a475"
            },
            "rawdata": ""
        });
        let response: DBlockResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response.dblock.header.dbheight, 160_000);
        assert!(response.dblock.dbentries[0].chainid.is_minute_marker());
    }

    #[test]
    fn rpc_errors_are_surfaced() {
        let raw = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32009, "message": "Missing Chain Head"}
        });
        let response: RpcResponse<ChainHead> = serde_json::from_value(raw).unwrap();
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, MISSING_CHAIN_HEAD);
    }
}
