use crate::crypto::{self, CryptoError, HmacAlgo, PublicKey, Signature};
use crate::entry::Entry;
use crate::hash::{ChainId, EntryHash, VoterId};
use crate::utils::serde::null_as_default;
use crate::Error;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitContent {
    /// Hex encoded HMAC of the selected options.
    pub commitment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCommit {
    pub voter_id: VoterId,
    pub voter_key: PublicKey,
    pub signature: Signature,
    pub vote_chain: ChainId,
    pub entry_hash: EntryHash,
    pub block_height: u32,
    pub content: CommitContent,
}

impl VoteCommit {
    pub fn from_entry(entry: &Entry, height: u32) -> Result<Self, Error> {
        entry.expect_external_ids(4)?;
        let voter_id = entry.hash_at(1)?;
        let voter_key = entry.public_key_at(2)?;
        let signature = entry.signature_at(3)?;

        let payload = crypto::sha512(&[entry.chain_id.as_ref(), entry.content.as_slice()]);
        voter_key
            .verify(&payload, &signature)
            .map_err(|_| Error::InvalidSignature("vote commit"))?;

        Ok(Self {
            voter_id,
            voter_key,
            signature,
            vote_chain: entry.chain_id,
            entry_hash: entry.hash,
            block_height: height,
            content: serde_json::from_slice(&entry.content)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealContent {
    #[serde(rename = "vote", default, deserialize_with = "null_as_default")]
    pub options: Vec<String>,
    /// Hex encoded HMAC key.
    pub secret: String,
    pub hmac_algo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReveal {
    pub voter_id: VoterId,
    pub vote_chain: ChainId,
    pub entry_hash: EntryHash,
    pub block_height: u32,
    pub content: RevealContent,
}

impl VoteReveal {
    pub fn from_entry(entry: &Entry, height: u32) -> Result<Self, Error> {
        entry.expect_external_ids(2)?;
        Ok(Self {
            voter_id: entry.hash_at(1)?,
            vote_chain: entry.chain_id,
            entry_hash: entry.hash,
            block_height: height,
            content: serde_json::from_slice(&entry.content)?,
        })
    }

    pub fn options(&self) -> &[String] {
        &self.content.options
    }

    pub fn is_abstention(&self) -> bool {
        self.content.options.is_empty()
    }

    /// The message the commitment was computed over.
    pub fn message(&self) -> String {
        self.content.options.join(",")
    }

    /// Whether this reveal opens `commit`. Undecodable secrets, commitments
    /// and unknown algorithms are errors rather than mismatches.
    pub fn matches(&self, commit: &VoteCommit) -> Result<bool, CryptoError> {
        let algo: HmacAlgo = self.content.hmac_algo.parse()?;
        let key = hex::decode(&self.content.secret)?;
        let expected = hex::decode(&commit.content.commitment)?;
        Ok(algo.verify(&key, self.message().as_bytes(), &expected))
    }
}

/// Marks a vote chain as registered when published on the registration chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRegistration {
    pub vote_chain: ChainId,
    pub registration_chain: ChainId,
    pub entry_hash: EntryHash,
    pub block_height: u32,
}

impl VoteRegistration {
    pub fn from_entry(entry: &Entry, height: u32) -> Result<Self, Error> {
        entry.expect_external_ids(2)?;
        Ok(Self {
            vote_chain: entry.hash_at(1)?,
            registration_chain: entry.chain_id,
            entry_hash: entry.hash,
            block_height: height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hash;
    use crate::testing::*;
    use proptest::prelude::*;
    use test_strategy::proptest;

    const VOTE: Hash = Hash::ZERO;

    #[test]
    fn commit_signature_binds_the_vote_chain() {
        let voter = TestIdentity::new(4);
        let entry = commit_entry(&VOTE, &voter, "abcd");
        let commit = VoteCommit::from_entry(&entry, 12).unwrap();
        assert_eq!(commit.voter_id, voter.id);
        assert_eq!(commit.voter_key, voter.public_key());
        assert_eq!(commit.content.commitment, "abcd");
        assert_eq!(commit.block_height, 12);

        let moved = Entry::new(Hash::from([1; 32]), entry.external_ids, entry.content);
        assert!(matches!(
            VoteCommit::from_entry(&moved, 12),
            Err(Error::InvalidSignature(_))
        ));
    }

    #[test]
    fn reveal_parses_abstention() {
        let voter = TestIdentity::new(4);
        let entry = reveal_entry(&VOTE, &voter.id, HmacAlgo::Sha256, b"secret", &[]);
        let reveal = VoteReveal::from_entry(&entry, 20).unwrap();
        assert!(reveal.is_abstention());
        assert_eq!(reveal.message(), "");
        assert_eq!(reveal.content.secret, hex::encode(b"secret"));

        let null_vote = Entry::new(
            VOTE,
            entry.external_ids.clone(),
            br#"{"vote": null, "secret": "00", "hmacAlgo": "md5"}"#.to_vec(),
        );
        assert!(VoteReveal::from_entry(&null_vote, 20).unwrap().is_abstention());
    }

    #[test]
    fn reveal_content_must_decode() {
        let voter = TestIdentity::new(4);
        let entry = Entry::new(
            VOTE,
            vec![b"factom-vote-reveal".to_vec(), voter.id.as_bytes().to_vec()],
            b"{\"vote\": [\"a\"]".to_vec(),
        );
        assert!(matches!(
            VoteReveal::from_entry(&entry, 20),
            Err(Error::Content(_))
        ));
    }

    #[test]
    fn unsupported_algorithm_is_an_error() {
        let voter = TestIdentity::new(4);
        let commit = VoteCommit::from_entry(
            &commit_entry(&VOTE, &voter, &commitment(HmacAlgo::Sha256, b"k", &["a"])),
            1,
        )
        .unwrap();
        let mut reveal = VoteReveal::from_entry(
            &reveal_entry(&VOTE, &voter.id, HmacAlgo::Sha256, b"k", &["a"]),
            2,
        )
        .unwrap();
        assert_eq!(reveal.matches(&commit).unwrap(), true);

        reveal.content.hmac_algo = "sha3".to_string();
        assert!(matches!(
            reveal.matches(&commit),
            Err(CryptoError::UnsupportedHmac(_))
        ));
        reveal.content.hmac_algo = "sha256".to_string();
        reveal.content.secret = "not hex".to_string();
        assert!(matches!(reveal.matches(&commit), Err(CryptoError::Hex(_))));
    }

    #[test]
    fn registration_names_the_vote_chain() {
        let vote = Hash::from([6; 32]);
        let entry = registration_entry(&vote);
        let registration = VoteRegistration::from_entry(&entry, 3).unwrap();
        assert_eq!(registration.vote_chain, vote);
        assert_eq!(registration.registration_chain, registration_chain());
    }

    fn algo() -> impl Strategy<Value = HmacAlgo> {
        prop_oneof![
            Just(HmacAlgo::Sha256),
            Just(HmacAlgo::Sha512),
            Just(HmacAlgo::Sha1),
            Just(HmacAlgo::Md5),
        ]
    }

    fn options() -> impl Strategy<Value = Vec<String>> {
        proptest::collection::vec("[a-z]{1,3}", 0..4)
    }

    #[proptest]
    fn reveal_opens_only_its_commitment(
        #[strategy(algo())] algo: HmacAlgo,
        #[strategy(algo())] other_algo: HmacAlgo,
        #[strategy(proptest::collection::vec(any::<u8>(), 16..32))] secret: Vec<u8>,
        #[strategy(options())] options: Vec<String>,
        #[strategy(options())] other_options: Vec<String>,
    ) {
        let voter = TestIdentity::new(4);
        let selected = options.iter().map(String::as_str).collect::<Vec<_>>();
        let commit = VoteCommit::from_entry(
            &commit_entry(&VOTE, &voter, &commitment(algo, &secret, &selected)),
            1,
        )
        .unwrap();
        let reveal = |algo: HmacAlgo, secret: &[u8], options: &[String]| {
            let options = options.iter().map(String::as_str).collect::<Vec<_>>();
            VoteReveal::from_entry(&reveal_entry(&VOTE, &voter.id, algo, secret, &options), 2)
                .unwrap()
        };

        prop_assert!(reveal(algo, &secret, &options).matches(&commit).unwrap());
        prop_assert_eq!(
            reveal(algo, &secret, &other_options).matches(&commit).unwrap(),
            other_options.join(",") == options.join(",")
        );
        prop_assert_eq!(
            reveal(other_algo, &secret, &options).matches(&commit).unwrap(),
            other_algo == algo
        );
        let mut flipped = secret.clone();
        flipped[0] ^= 1;
        prop_assert!(!reveal(algo, &flipped, &options).matches(&commit).unwrap());
    }
}
