use crate::ballot::{VoteCommit, VoteReveal};
use crate::crypto::{CryptoError, PublicKey};
use crate::eligibility::{EligibleList, EligibleVoter};
use crate::hash::{ChainId, VoterId};
use crate::proposal::ProposalEntry;
use crate::results::{self, ResultError, VoteStats};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("commit phase starts at height {start}, commit seen at {height}")]
    CommitNotStarted { start: u32, height: u32 },
    #[error("commit phase ended at height {end}, commit seen at {height}")]
    CommitEnded { end: u32, height: u32 },
    #[error("reveal phase starts at height {start}, reveal seen at {height}")]
    RevealNotStarted { start: u32, height: u32 },
    #[error("reveal phase ended at height {end}, reveal seen at {height}")]
    RevealEnded { end: u32, height: u32 },
    #[error("{0} is not an eligible voter")]
    NotEligible(VoterId),
    #[error("{key} is not a signing key of voter {voter}")]
    UnknownVoterKey { voter: VoterId, key: PublicKey },
    #[error("no commit found for the reveal of {0}")]
    MissingCommit(VoterId),
    #[error("{0} already revealed, only one reveal is allowed")]
    RevealExists(VoterId),
    #[error("reveal of {0} does not match its commitment")]
    CommitmentMismatch(VoterId),
    #[error("cannot check the commitment: {0}")]
    Crypto(#[from] CryptoError),
}

/// A proposal with its roster and the ballots cast so far.
#[derive(Debug, Clone, PartialEq)]
pub struct Vote {
    pub registered: bool,
    pub proposal: ProposalEntry,
    pub eligible_list: EligibleList,
    pub commits: HashMap<VoterId, VoteCommit>,
    pub reveals: HashMap<VoterId, VoteReveal>,
}

impl Vote {
    pub fn new(proposal: ProposalEntry, eligible_list: EligibleList) -> Self {
        Self {
            registered: false,
            proposal,
            eligible_list,
            commits: HashMap::new(),
            reveals: HashMap::new(),
        }
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.proposal.proposal_chain
    }

    fn eligible_voter(&self, voter: &VoterId) -> Result<&EligibleVoter, VoteError> {
        self.eligible_list
            .voter(voter)
            .ok_or(VoteError::NotEligible(*voter))
    }

    /// Checks that `commit` may be recorded at `height` without recording it.
    pub fn check_commit(&self, commit: &VoteCommit, height: u32) -> Result<(), VoteError> {
        let phases = self.proposal.phases();
        if height < phases.commit_start {
            return Err(VoteError::CommitNotStarted {
                start: phases.commit_start,
                height,
            });
        }
        if height > phases.commit_end {
            return Err(VoteError::CommitEnded {
                end: phases.commit_end,
                height,
            });
        }

        let voter = self.eligible_voter(&commit.voter_id)?;
        if !voter.signing_keys.is_empty() && !voter.signing_keys.contains(&commit.voter_key) {
            return Err(VoteError::UnknownVoterKey {
                voter: commit.voter_id,
                key: commit.voter_key,
            });
        }
        Ok(())
    }

    /// Records `commit`, replacing an earlier commit of the same voter.
    pub fn add_commit(&mut self, commit: VoteCommit, height: u32) -> Result<(), VoteError> {
        self.check_commit(&commit, height)?;
        self.commits.insert(commit.voter_id, commit);
        Ok(())
    }

    pub fn check_reveal(&self, reveal: &VoteReveal, height: u32) -> Result<(), VoteError> {
        let phases = self.proposal.phases();
        if height < phases.reveal_start {
            return Err(VoteError::RevealNotStarted {
                start: phases.reveal_start,
                height,
            });
        }
        if height > phases.reveal_end {
            return Err(VoteError::RevealEnded {
                end: phases.reveal_end,
                height,
            });
        }

        self.eligible_voter(&reveal.voter_id)?;
        let commit = self
            .commits
            .get(&reveal.voter_id)
            .ok_or(VoteError::MissingCommit(reveal.voter_id))?;
        if self.reveals.contains_key(&reveal.voter_id) {
            return Err(VoteError::RevealExists(reveal.voter_id));
        }
        if !reveal.matches(commit)? {
            return Err(VoteError::CommitmentMismatch(reveal.voter_id));
        }
        Ok(())
    }

    pub fn add_reveal(&mut self, reveal: VoteReveal, height: u32) -> Result<(), VoteError> {
        self.check_reveal(&reveal, height)?;
        self.reveals.insert(reveal.voter_id, reveal);
        Ok(())
    }

    /// Tallies the reveals against the current roster.
    pub fn compute_result(&self) -> Result<VoteStats, ResultError> {
        let mut voters = self.eligible_list.voters.values().cloned().collect::<Vec<_>>();
        voters.sort_by_key(|voter| voter.voter_id);
        let mut reveals = self.reveals.values().cloned().collect::<Vec<_>>();
        reveals.sort_by_key(|reveal| (reveal.block_height, reveal.entry_hash));
        results::compute_result(&self.proposal, &voters, &reveals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::HmacAlgo;
    use crate::eligibility::{EligibleVoterEntry, EligibleVoterHeader};
    use crate::hash::Hash;
    use crate::proposal::VoteType;
    use crate::testing::*;

    struct Setup {
        vote: Vote,
        voters: Vec<TestIdentity>,
    }

    // commit 10..=20, reveal 21..=30, voters 11 and 12 on the roster
    fn setup() -> Setup {
        let initiator = TestIdentity::new(1);
        let voters = vec![TestIdentity::new(11), TestIdentity::new(12)];
        let identities = StaticIdentities::default()
            .with(&initiator)
            .with(&voters[0])
            .with(&voters[1]);

        let header_entry = eligible_header_entry(&initiator, Hash::from([5; 32]), &[]);
        let header = EligibleVoterHeader::from_entry(&header_entry).unwrap();
        let mut list = EligibleList::new(header_entry.chain_id, header);
        let update = eligible_update_entry(
            &list.chain_id,
            &initiator,
            Hash::from([6; 32]),
            &[(voters[0].id, 1.0), (voters[1].id, 2.0)],
        );
        let mut update = EligibleVoterEntry::from_entry(&update, 2, &initiator.public_key()).unwrap();
        update.resolve_keys(&identities).unwrap();
        list.apply(&update).unwrap();

        let document = proposal_json(&list.chain_id, VoteType::Single, &["yes", "no"], [10, 20, 21, 30]);
        let proposal = ProposalEntry::from_entry(&proposal_entry(&initiator, &document), 3, &identities).unwrap();
        Setup {
            vote: Vote::new(proposal, list),
            voters,
        }
    }

    fn commit(vote: &Vote, voter: &TestIdentity, secret: &[u8], options: &[&str]) -> VoteCommit {
        let entry = commit_entry(
            vote.chain_id(),
            voter,
            &commitment(HmacAlgo::Sha256, secret, options),
        );
        VoteCommit::from_entry(&entry, 0).unwrap()
    }

    fn reveal(vote: &Vote, voter: &TestIdentity, secret: &[u8], options: &[&str]) -> VoteReveal {
        let entry = reveal_entry(vote.chain_id(), &voter.id, HmacAlgo::Sha256, secret, options);
        VoteReveal::from_entry(&entry, 0).unwrap()
    }

    #[test]
    fn commits_only_inside_the_window() {
        let Setup { mut vote, voters } = setup();
        let c = commit(&vote, &voters[0], b"k", &["yes"]);

        assert!(matches!(
            vote.add_commit(c.clone(), 9),
            Err(VoteError::CommitNotStarted { start: 10, height: 9 })
        ));
        assert!(matches!(
            vote.add_commit(c.clone(), 21),
            Err(VoteError::CommitEnded { end: 20, height: 21 })
        ));
        vote.add_commit(c.clone(), 10).unwrap();
        vote.add_commit(c, 20).unwrap();
        assert_eq!(vote.commits.len(), 1);
    }

    #[test]
    fn later_commit_replaces_earlier() {
        let Setup { mut vote, voters } = setup();
        vote.add_commit(commit(&vote, &voters[0], b"k", &["yes"]), 10)
            .unwrap();
        vote.add_commit(commit(&vote, &voters[0], b"k", &["no"]), 11)
            .unwrap();

        assert!(matches!(
            vote.add_reveal(reveal(&vote, &voters[0], b"k", &["yes"]), 21),
            Err(VoteError::CommitmentMismatch(_))
        ));
        vote.add_reveal(reveal(&vote, &voters[0], b"k", &["no"]), 21)
            .unwrap();
    }

    #[test]
    fn commit_key_must_belong_to_the_voter() {
        let Setup { mut vote, voters } = setup();
        let imposter = TestIdentity::new(99);
        let entry = commit_entry_with_key(vote.chain_id(), &voters[0].id, &imposter, "00");
        let c = VoteCommit::from_entry(&entry, 10).unwrap();
        assert!(matches!(
            vote.add_commit(c, 10),
            Err(VoteError::UnknownVoterKey { .. })
        ));

        let outsider = commit(&vote, &imposter, b"k", &["yes"]);
        assert!(matches!(
            vote.add_commit(outsider, 10),
            Err(VoteError::NotEligible(_))
        ));
    }

    #[test]
    fn one_reveal_per_voter() {
        let Setup { mut vote, voters } = setup();
        assert!(matches!(
            vote.add_reveal(reveal(&vote, &voters[0], b"k", &["yes"]), 21),
            Err(VoteError::MissingCommit(_))
        ));

        vote.add_commit(commit(&vote, &voters[0], b"k", &["yes"]), 15)
            .unwrap();
        assert!(matches!(
            vote.add_reveal(reveal(&vote, &voters[0], b"k", &["yes"]), 20),
            Err(VoteError::RevealNotStarted { start: 21, height: 20 })
        ));
        assert!(matches!(
            vote.add_reveal(reveal(&vote, &voters[0], b"k", &["yes"]), 31),
            Err(VoteError::RevealEnded { end: 30, height: 31 })
        ));
        vote.add_reveal(reveal(&vote, &voters[0], b"k", &["yes"]), 30)
            .unwrap();
        assert!(matches!(
            vote.add_reveal(reveal(&vote, &voters[0], b"k", &["yes"]), 30),
            Err(VoteError::RevealExists(_))
        ));
    }

    #[test]
    fn tallies_revealed_ballots() {
        let Setup { mut vote, voters } = setup();
        vote.add_commit(commit(&vote, &voters[0], b"a", &["yes"]), 15)
            .unwrap();
        vote.add_commit(commit(&vote, &voters[1], b"b", &["no"]), 15)
            .unwrap();
        vote.add_reveal(reveal(&vote, &voters[0], b"a", &["yes"]), 25)
            .unwrap();
        vote.add_reveal(reveal(&vote, &voters[1], b"b", &["no"]), 25)
            .unwrap();

        let stats = vote.compute_result().unwrap();
        assert_eq!(stats.vote_chain, *vote.chain_id());
        assert_eq!(stats.voted.count, 2);
        assert_are_close(stats.voted.weight, 3.0);
        assert_eq!(stats.weighted_winners.len(), 1);
        assert_eq!(stats.weighted_winners[0].option, "no");
    }
}
