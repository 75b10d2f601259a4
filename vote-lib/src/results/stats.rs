use super::{tally_voters, ResultError, SupportBase, Turnout, ValidVote, VoteStats};
use crate::eligibility::EligibleVoter;
use crate::proposal::{ComputeBasis, ProposalEntry, VoteConfig, WinnerCriteria};
use itertools::Itertools;

/// Tallies binary and single choice votes, then derives support and winners.
pub fn compute_vote_statistics(
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
        for option in vote.options().iter().unique() {
            if let Some(option_stats) = stats.option_stats.get_mut(option) {
                option_stats.tally.add(vote.weight);
            }
        }
        stats.voted.add(vote.weight);
    }

    compute_support(&mut stats, config)?;
    compute_winners(&mut stats, &config.winner_criteria);
    Ok(stats)
}

/// Fills in support ratios, turnout and validity.
pub fn compute_support(stats: &mut VoteStats, config: &VoteConfig) -> Result<(), ResultError> {
    let base = match config.compute_basis()? {
        ComputeBasis::AllEligibleVoters => stats.complete,
        ComputeBasis::ParticipantsOnly if config.allow_abstention => stats.voted,
        ComputeBasis::ParticipantsOnly => {
            let mut base = stats.voted;
            base.count += stats.abstained.count;
            base.weight += stats.abstained.weight;
            base
        }
    };
    stats.support = SupportBase {
        count_denominator: base.count,
        weight_denominator: base.weight,
    };

    if base.count != 0 && base.weight != 0.0 {
        for option in stats.option_stats.values_mut() {
            option.support = option.tally.count as f64 / base.count as f64;
            option.weighted_support = option.tally.weight / base.weight;
        }
    }

    if stats.complete.count == 0 || stats.complete.weight == 0.0 {
        stats.valid = false;
        stats.invalid_reason = Some("no eligible voting weight".to_string());
        return Ok(());
    }

    stats.turnout = Turnout {
        unweighted_turnout: stats.voted.count as f64 / stats.complete.count as f64,
        weighted_turnout: stats.voted.weight / stats.complete.weight,
    };
    let min = &config.acceptance_criteria.min_turnout;
    stats.valid = stats.turnout.weighted_turnout > min.weighted
        && stats.turnout.unweighted_turnout > min.unweighted;
    stats.invalid_reason = if stats.valid {
        None
    } else {
        Some(format!(
            "turnout {:.4} ({:.4} weighted) does not exceed the minimum of {} ({} weighted)",
            stats.turnout.unweighted_turnout,
            stats.turnout.weighted_turnout,
            min.unweighted,
            min.weighted
        ))
    };
    Ok(())
}

/// Options sharing the highest weight that also meet their support criteria.
pub fn compute_winners(stats: &mut VoteStats, criteria: &WinnerCriteria) {
    let max_weight = stats
        .option_stats
        .values()
        .map(|option| option.tally.weight)
        .fold(0.0, f64::max);
    if max_weight <= 0.0 {
        stats.weighted_winners.clear();
        return;
    }

    stats.weighted_winners = stats
        .option_stats
        .values()
        .filter(|option| option.tally.weight == max_weight)
        .filter(|option| {
            criteria
                .for_option(&option.option)
                .map_or(true, |min| {
                    option.support >= min.unweighted && option.weighted_support >= min.weighted
                })
        })
        .cloned()
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hash;
    use crate::proposal::{CriteriaWeights, VoteType};
    use crate::results::{Tally, VoteOptionStats};
    use crate::testing::*;
    use std::collections::BTreeMap;

    fn stats_with(options: &[(&str, u64, f64)]) -> VoteStats {
        let mut stats = VoteStats::new(Hash::ZERO, &[]);
        for (name, count, weight) in options {
            stats.option_stats.insert(
                name.to_string(),
                VoteOptionStats {
                    option: name.to_string(),
                    tally: Tally {
                        count: *count,
                        weight: *weight,
                    },
                    support: 0.5,
                    weighted_support: 0.5,
                },
            );
        }
        stats
    }

    #[test]
    fn ties_are_kept() {
        let mut stats = stats_with(&[("A", 1, 2.0), ("B", 2, 2.0), ("C", 3, 1.0)]);
        compute_winners(&mut stats, &WinnerCriteria::default());
        assert_eq!(stats.winners().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn named_criteria_override_the_wildcard() {
        let mut stats = stats_with(&[("A", 1, 2.0), ("B", 2, 2.0)]);
        let criteria = WinnerCriteria {
            min_support: BTreeMap::from([
                (
                    "*".to_string(),
                    CriteriaWeights {
                        weighted: 0.6,
                        unweighted: 0.0,
                    },
                ),
                ("B".to_string(), CriteriaWeights::default()),
            ]),
        };
        compute_winners(&mut stats, &criteria);
        assert_eq!(stats.winners().collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn nothing_wins_without_weight() {
        let mut stats = stats_with(&[("A", 0, 0.0), ("B", 0, 0.0)]);
        compute_winners(&mut stats, &WinnerCriteria::default());
        assert!(stats.weighted_winners.is_empty());
    }

    #[test]
    fn turnout_must_exceed_the_minimum() {
        let mut proposal = test_proposal(VoteType::Single, &["A"]);
        proposal.vote.config.acceptance_criteria.min_turnout = CriteriaWeights {
            weighted: 0.5,
            unweighted: 0.0,
        };
        let config = proposal.config();

        let mut stats = stats_with(&[("A", 1, 1.0)]);
        stats.complete = Tally {
            count: 2,
            weight: 2.0,
        };
        stats.voted = Tally {
            count: 1,
            weight: 1.0,
        };
        compute_support(&mut stats, config).unwrap();
        assert_are_close(stats.turnout.weighted_turnout, 0.5);
        assert!(!stats.valid);
        assert!(stats.invalid_reason.is_some());

        stats.voted.weight = 1.5;
        compute_support(&mut stats, config).unwrap();
        assert!(stats.valid);
        assert_eq!(stats.invalid_reason, None);
    }

    #[test]
    fn zero_denominator_leaves_support_untouched() {
        let mut proposal = test_proposal(VoteType::Single, &["A"]);
        proposal.vote.config.compute_results_against = "PARTICIPANTS_ONLY".to_string();

        let mut stats = stats_with(&[("A", 0, 0.0)]);
        stats.option_stats.get_mut("A").unwrap().support = 0.0;
        stats.complete = Tally {
            count: 3,
            weight: 3.0,
        };
        compute_support(&mut stats, proposal.config()).unwrap();
        assert_eq!(stats.support, SupportBase::default());
        assert_eq!(stats.option_stats["A"].support, 0.0);
        assert_eq!(stats.turnout.unweighted_turnout, 0.0);
        assert!(!stats.valid);
    }

    #[test]
    fn repeated_options_count_once() {
        let proposal = test_proposal(VoteType::Single, &["A", "B"]);
        let list = Hash::from([1; 32]);
        let voter = Hash::from([2; 32]);
        let voters = vec![eligible_voter(&list, voter, 1.0, 1)];
        let reveals = vec![test_reveal(&proposal.proposal_chain, &voter, &["A", "A"])];

        let votes = super::super::filter_invalid_votes(proposal.config(), &voters, &reveals);
        let stats = compute_vote_statistics(&proposal, &voters, &votes).unwrap();
        assert_eq!(stats.option_stats["A"].tally.count, 1);
        assert_eq!(stats.voted.count, 1);
    }
}
