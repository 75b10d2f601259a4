use super::{compute_support, tally_voters, IrvRound, ResultError, Tally, ValidVote, VoteStats};
use crate::eligibility::EligibleVoter;
use crate::proposal::ProposalEntry;
use std::collections::BTreeSet;
use tracing::debug;

/// Instant runoff: every ballot counts for its highest ranked option still in
/// the race until one option holds a strict majority of the counted ballots.
pub fn compute_irv(
    proposal: &ProposalEntry,
    voters: &[EligibleVoter],
    votes: &[ValidVote<'_>],
) -> Result<VoteStats, ResultError> {
    let config = proposal.config();
    let mut stats = VoteStats::new(proposal.proposal_chain, &config.options);
    stats.complete = tally_voters(voters);
    for vote in votes {
        if vote.reveal.is_abstention() && config.allow_abstention {
            stats.abstained.add(vote.weight);
        }
        stats.voted.add(vote.weight);
    }

    let mut available: BTreeSet<&str> = config.options.iter().map(String::as_str).collect();
    let mut winner = None;
    while winner.is_none() && !available.is_empty() {
        let round = tally_round(&available, votes);
        let counted: u64 = round.values().map(|tally| tally.count).sum();
        let majority = counted / 2 + 1;

        winner = round
            .iter()
            .find(|(_, tally)| tally.count >= majority)
            .map(|(option, _)| option.clone());
        if winner.is_none() {
            let lowest = round
                .values()
                .map(|tally| tally.weight)
                .fold(f64::INFINITY, f64::min);
            available.retain(|option| round.get(*option).map_or(true, |t| t.weight != lowest));
        }
        stats.irv_rounds.push(round);
    }

    if let Some(last) = stats.irv_rounds.last() {
        for (option, tally) in last {
            if let Some(option_stats) = stats.option_stats.get_mut(option) {
                option_stats.tally = *tally;
            }
        }
    }
    compute_support(&mut stats, config)?;

    match winner.and_then(|option| stats.option_stats.get(&option)) {
        Some(option_stats) => stats.weighted_winners = vec![option_stats.clone()],
        None => debug!(vote = %proposal.proposal_chain, "instant runoff has no winner"),
    }
    Ok(stats)
}

fn tally_round(available: &BTreeSet<&str>, votes: &[ValidVote<'_>]) -> IrvRound {
    let mut round: IrvRound = available
        .iter()
        .map(|option| (option.to_string(), Tally::default()))
        .collect();
    for vote in votes {
        let choice = vote
            .options()
            .iter()
            .find(|option| available.contains(option.as_str()));
        if let Some(tally) = choice.and_then(|option| round.get_mut(option)) {
            tally.add(vote.weight);
        }
    }
    round
}
