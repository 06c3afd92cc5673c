mod config;

pub mod ballots;
pub mod builder;
pub mod impact;
pub mod manual;
pub mod store;
pub mod tiebreaker;

use log::{debug, info};

use std::{
    collections::{HashMap, HashSet},
    ops::AddAssign,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::Utc;

pub use crate::config::*;

// **** Private structures ****

#[derive(Eq, PartialEq, Debug, Clone, Copy, PartialOrd, Ord, Hash)]
struct VoteCount(u64);

impl VoteCount {
    const EMPTY: VoteCount = VoteCount(0);
    const ONE: VoteCount = VoteCount(1);
}

impl AddAssign for VoteCount {
    fn add_assign(&mut self, rhs: VoteCount) {
        self.0 += rhs.0;
    }
}

static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generates an opaque token for voters, ballots and vote slots.
pub fn fresh_id(kind: &str) -> String {
    let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let now = Utc::now();
    let seed = format!(
        "{}:{}:{}:{}",
        kind,
        seq,
        now.timestamp(),
        now.timestamp_subsec_nanos()
    );
    let mut digest = sha256::digest(seed.as_str());
    digest.truncate(32);
    digest
}

/// Counts the votes of all the ballots and ranks the candidates.
///
/// Null ballots are skipped entirely, as are the slots marked invalid. Candidates are keyed
/// by their full name. The ranking is by decreasing number of votes, candidates with the same
/// count being ordered by name.
pub fn compute_ranking(ballots: &[Ballot]) -> Vec<TallyEntry> {
    let mut tally: HashMap<String, VoteCount> = HashMap::new();
    for ballot in ballots.iter().filter(|b| !b.is_null) {
        for name in ballot.votes.iter().filter_map(|v| v.counted_name()) {
            *tally.entry(name).or_insert(VoteCount::EMPTY) += VoteCount::ONE;
        }
    }
    let mut ranking: Vec<TallyEntry> = tally
        .into_iter()
        .map(|(name, vc)| TallyEntry { name, votes: vc.0 })
        .collect();
    ranking.sort_by(|a, b| b.votes.cmp(&a.votes).then_with(|| a.name.cmp(&b.name)));
    debug!(
        "compute_ranking: {} ballots, ranking: {:?}",
        ballots.len(),
        ranking
    );
    ranking
}

/// From the ranking of the main tally, finds the delegates that are elected outright and the
/// candidates tied at the cutoff for the last seat.
///
/// The tied group includes every candidate sharing the cutoff count, even those ranked below
/// the number of seats.
pub fn extract_initial_tiebreaker_info(
    sorted_results: &[TallyEntry],
    seats_to_fill: u32,
) -> InitialTiebreakerInfo {
    if sorted_results.is_empty() || seats_to_fill == 0 {
        return InitialTiebreakerInfo::default();
    }
    let seats = seats_to_fill as usize;
    // With fewer candidates than seats, nobody sits at the cutoff.
    let cutoff_votes = sorted_results
        .get(seats - 1)
        .map(|r| r.votes)
        .unwrap_or(0);

    let confirmed_delegates: Vec<DelegateRecord> = sorted_results
        .iter()
        .take(seats)
        .filter(|r| r.votes > cutoff_votes)
        .enumerate()
        .map(|(idx, r)| DelegateRecord {
            name: r.name.clone(),
            position: (idx + 1) as u32,
            by_tiebreaker: false,
        })
        .collect();

    let tied_candidates: Vec<String> = sorted_results
        .iter()
        .filter(|r| r.votes == cutoff_votes)
        .map(|r| r.name.clone())
        .collect();

    let winners_needed = seats_to_fill - confirmed_delegates.len() as u32;
    debug!(
        "extract_initial_tiebreaker_info: cutoff: {} confirmed: {:?} tied: {:?} winners_needed: {}",
        cutoff_votes, confirmed_delegates, tied_candidates, winners_needed
    );
    InitialTiebreakerInfo {
        confirmed_delegates,
        tied_candidates,
        winners_needed,
    }
}

/// True when more candidates share the cutoff than there are seats left for them, that is
/// when only a runoff can decide.
pub fn has_tie(info: &InitialTiebreakerInfo) -> bool {
    info.winners_needed > 0 && info.tied_candidates.len() > info.winners_needed as usize
}

/// Decides one runoff round.
///
/// `sorted_results` is the tally of the round, restricted to the contested candidates and
/// sorted by decreasing votes.
pub fn compute_round_outcome(sorted_results: &[TallyEntry], winners_needed: u32) -> RoundOutcome {
    let resolved = |clear_winners: Vec<String>| RoundOutcome {
        clear_winners,
        still_tied: vec![],
        next_winners_needed: 0,
        is_resolved: true,
    };

    if sorted_results.is_empty() || winners_needed == 0 {
        return resolved(vec![]);
    }

    let needed = winners_needed as usize;
    // Room for everyone.
    if sorted_results.len() <= needed {
        return resolved(sorted_results.iter().map(|r| r.name.clone()).collect());
    }

    let cutoff_votes = sorted_results[needed - 1].votes;
    let has_bottom_tie = sorted_results[needed].votes == cutoff_votes;
    if !has_bottom_tie {
        return resolved(
            sorted_results
                .iter()
                .take(needed)
                .map(|r| r.name.clone())
                .collect(),
        );
    }

    let clear_winners: Vec<String> = sorted_results
        .iter()
        .take(needed)
        .filter(|r| r.votes > cutoff_votes)
        .map(|r| r.name.clone())
        .collect();
    let still_tied: Vec<String> = sorted_results
        .iter()
        .filter(|r| r.votes == cutoff_votes)
        .map(|r| r.name.clone())
        .collect();
    let next_winners_needed = winners_needed - clear_winners.len() as u32;
    debug!(
        "compute_round_outcome: cutoff {} clear: {:?} still tied: {:?}",
        cutoff_votes, clear_winners, still_tied
    );
    RoundOutcome {
        clear_winners,
        still_tied,
        next_winners_needed,
        is_resolved: false,
    }
}

/// Counts the ballots of a runoff round.
///
/// Every contested candidate starts at zero, votes for anybody else are ignored. Candidates
/// with the same count keep the order of `tied_candidates`.
pub fn tally_round_ballots(ballots: &[Ballot], tied_candidates: &[String]) -> Vec<TallyEntry> {
    let contested: HashSet<&str> = tied_candidates.iter().map(|s| s.as_str()).collect();
    let mut counts: HashMap<String, VoteCount> = tied_candidates
        .iter()
        .map(|name| (name.clone(), VoteCount::EMPTY))
        .collect();
    for ballot in ballots.iter() {
        for name in ballot.votes.iter().filter_map(|v| v.counted_name()) {
            if contested.contains(name.as_str()) {
                if let Some(vc) = counts.get_mut(&name) {
                    *vc += VoteCount::ONE;
                }
            }
        }
    }
    let mut sorted: Vec<TallyEntry> = tied_candidates
        .iter()
        .map(|name| TallyEntry {
            name: name.clone(),
            votes: counts.get(name).map(|vc| vc.0).unwrap_or(0),
        })
        .collect();
    sorted.sort_by(|a, b| b.votes.cmp(&a.votes));
    sorted
}

/// Statistics of the main ballots, as shown next to the results.
pub fn compute_statistics(
    ballots: &[Ballot],
    total_voters: usize,
    configuration: Option<&Configuration>,
) -> ScrutinyStats {
    let valid_ballots = ballots.iter().filter(|b| !b.is_null).count() as u64;
    let mut invalid_names: u64 = 0;
    let mut valid_votes: u64 = 0;
    for ballot in ballots.iter().filter(|b| !b.is_null) {
        for vote in ballot.votes.iter() {
            match &vote.person {
                Some(mark) if mark.is_invalid() => invalid_names += 1,
                Some(_) => valid_votes += 1,
                None => {}
            }
        }
    }
    let slots = configuration.map(|c| c.votes as u64).unwrap_or(0);
    let stats = ScrutinyStats {
        total_voters: total_voters as u64,
        total_ballots: ballots.len() as u64,
        null_ballots: ballots.len() as u64 - valid_ballots,
        valid_ballots,
        invalid_names,
        total_possible_votes: valid_ballots * slots,
        valid_votes,
    };
    info!("compute_statistics: {:?}", stats);
    stats
}

/// Builds the delegate table.
///
/// Once a tiebreaker has produced final delegates, they come first in position order and the
/// other candidates follow in ranking order. Without it, the delegates are those elected
/// outright plus the candidates at the cutoff when they all fit in the remaining seats.
pub fn result_rows(
    ranking: &[TallyEntry],
    final_delegates: Option<&[DelegateRecord]>,
    seats_to_fill: u32,
) -> Vec<ResultRow> {
    match final_delegates {
        Some(delegates) if !delegates.is_empty() => {
            let votes: HashMap<&str, u64> = ranking
                .iter()
                .map(|r| (r.name.as_str(), r.votes))
                .collect();
            let mut sorted_delegates: Vec<&DelegateRecord> = delegates.iter().collect();
            sorted_delegates.sort_by_key(|d| d.position);
            let elected: HashSet<&str> = delegates.iter().map(|d| d.name.as_str()).collect();

            let mut rows: Vec<ResultRow> = sorted_delegates
                .iter()
                .map(|d| ResultRow {
                    name: d.name.clone(),
                    votes: votes.get(d.name.as_str()).cloned().unwrap_or(0),
                    elected: true,
                    by_tiebreaker: d.by_tiebreaker,
                })
                .collect();
            rows.extend(
                ranking
                    .iter()
                    .filter(|r| !elected.contains(r.name.as_str()))
                    .map(|r| ResultRow {
                        name: r.name.clone(),
                        votes: r.votes,
                        elected: false,
                        by_tiebreaker: false,
                    }),
            );
            rows
        }
        _ => {
            let info = extract_initial_tiebreaker_info(ranking, seats_to_fill);
            let tie = has_tie(&info);
            let mut elected: HashSet<&str> = info
                .confirmed_delegates
                .iter()
                .map(|d| d.name.as_str())
                .collect();
            if !tie && info.winners_needed > 0 {
                elected.extend(info.tied_candidates.iter().map(|s| s.as_str()));
            }
            ranking
                .iter()
                .map(|r| ResultRow {
                    name: r.name.clone(),
                    votes: r.votes,
                    elected: elected.contains(r.name.as_str()),
                    by_tiebreaker: false,
                })
                .collect()
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn ranking_counts_and_sorts() {
        init();
        let mut ballots = vec![ballot(1, &["B"]), ballot(2, &["A", "A", "B"]), ballot(3, &["A"])];
        let expected = entries(&[("A", 3), ("B", 2)]);
        assert_eq!(compute_ranking(&ballots), expected);
        ballots.reverse();
        assert_eq!(compute_ranking(&ballots), expected);
    }

    #[test]
    fn ranking_skips_null_ballots_and_invalid_marks() {
        let mut spoiled = ballot(2, &["B", "B", "B"]);
        spoiled.is_null = true;
        let mut with_invalid = ballot(1, &["A"]);
        with_invalid.votes.push(invalid_vote());
        let ranking = compute_ranking(&[with_invalid, spoiled]);
        assert_eq!(ranking, entries(&[("A", 1)]));
    }

    #[test]
    fn ranking_breaks_equal_counts_by_name() {
        let ballots = vec![ballot(1, &["Zoe", "Ana"]), ballot(2, &["Luis"])];
        let ranking = compute_ranking(&ballots);
        assert_eq!(ranking, entries(&[("Ana", 1), ("Luis", 1), ("Zoe", 1)]));
    }

    // Known quirk: candidates are keyed by their full name, so homonyms are merged.
    #[test]
    fn ranking_merges_homonyms() {
        let mut first = person("Ana");
        first.last_name1 = "Garcia".to_string();
        first.id = "p1".to_string();
        let mut second = first.clone();
        second.id = "p2".to_string();
        second.location = "Sevilla".to_string();
        let b = Ballot {
            id: "b1".to_string(),
            number: 1,
            votes: vec![
                Vote {
                    id: "v1".to_string(),
                    person: Some(Mark::Candidate(first)),
                    is_null: false,
                },
                Vote {
                    id: "v2".to_string(),
                    person: Some(Mark::Candidate(second)),
                    is_null: false,
                },
            ],
            is_null: false,
            timestamp: Utc::now(),
        };
        assert_eq!(compute_ranking(&[b]), entries(&[("Ana Garcia", 2)]));
    }

    #[test]
    fn full_name_skips_blank_parts() {
        let p = Person {
            id: "1".to_string(),
            name: " Juan ".to_string(),
            last_name1: "".to_string(),
            last_name2: "López".to_string(),
            location: "Madrid".to_string(),
        };
        assert_eq!(p.full_name(), "Juan López");
    }

    #[test]
    fn initial_info_detects_tie() {
        let info =
            extract_initial_tiebreaker_info(&entries(&[("A", 10), ("B", 8), ("C", 8), ("D", 5)]), 2);
        assert_eq!(
            info.confirmed_delegates,
            vec![DelegateRecord {
                name: "A".to_string(),
                position: 1,
                by_tiebreaker: false
            }]
        );
        assert_eq!(info.tied_candidates, names(&["B", "C"]));
        assert_eq!(info.winners_needed, 1);
        assert!(has_tie(&info));
    }

    #[test]
    fn initial_info_includes_tied_candidates_below_the_seats() {
        let info = extract_initial_tiebreaker_info(
            &entries(&[("A", 9), ("B", 7), ("C", 7), ("D", 7), ("E", 1)]),
            3,
        );
        assert_eq!(info.confirmed_delegates.len(), 1);
        assert_eq!(info.tied_candidates, names(&["B", "C", "D"]));
        assert_eq!(info.winners_needed, 2);
    }

    #[test]
    fn initial_info_without_tie() {
        let info = extract_initial_tiebreaker_info(&entries(&[("A", 10), ("B", 8), ("C", 5)]), 2);
        assert_eq!(info.tied_candidates, names(&["B"]));
        assert_eq!(info.winners_needed, 1);
        assert!(!has_tie(&info));
    }

    #[test]
    fn initial_info_with_fewer_candidates_than_seats() {
        let info = extract_initial_tiebreaker_info(&entries(&[("A", 3), ("B", 2)]), 3);
        assert_eq!(info.confirmed_delegates.len(), 2);
        assert!(info.tied_candidates.is_empty());
        assert_eq!(info.winners_needed, 1);
        assert!(!has_tie(&info));
    }

    #[test]
    fn initial_info_empty_inputs() {
        assert_eq!(
            extract_initial_tiebreaker_info(&[], 3),
            InitialTiebreakerInfo::default()
        );
        assert_eq!(
            extract_initial_tiebreaker_info(&entries(&[("A", 1)]), 0),
            InitialTiebreakerInfo::default()
        );
    }

    #[test]
    fn outcome_clear_winner() {
        let outcome = compute_round_outcome(&entries(&[("B", 5), ("C", 2)]), 1);
        assert_eq!(outcome.clear_winners, names(&["B"]));
        assert!(outcome.still_tied.is_empty());
        assert_eq!(outcome.next_winners_needed, 0);
        assert!(outcome.is_resolved);
    }

    #[test]
    fn outcome_persistent_tie() {
        let outcome = compute_round_outcome(&entries(&[("B", 3), ("C", 3)]), 1);
        assert!(outcome.clear_winners.is_empty());
        assert_eq!(outcome.still_tied, names(&["B", "C"]));
        assert_eq!(outcome.next_winners_needed, 1);
        assert!(!outcome.is_resolved);
    }

    #[test]
    fn outcome_partial_resolution() {
        let outcome =
            compute_round_outcome(&entries(&[("B", 6), ("C", 3), ("D", 3), ("E", 1)]), 2);
        assert_eq!(outcome.clear_winners, names(&["B"]));
        assert_eq!(outcome.still_tied, names(&["C", "D"]));
        assert_eq!(outcome.next_winners_needed, 1);
        assert!(!outcome.is_resolved);
    }

    #[test]
    fn outcome_room_for_everyone() {
        let outcome = compute_round_outcome(&entries(&[("B", 0), ("C", 0)]), 2);
        assert_eq!(outcome.clear_winners, names(&["B", "C"]));
        assert!(outcome.is_resolved);
    }

    #[test]
    fn outcome_empty_results() {
        let outcome = compute_round_outcome(&[], 2);
        assert!(outcome.clear_winners.is_empty());
        assert_eq!(outcome.next_winners_needed, 0);
        assert!(outcome.is_resolved);
    }

    #[test]
    fn round_tally_only_counts_contested_candidates() {
        let tied = names(&["C", "B"]);
        let mut ballots = vec![ballot(1, &["B"]), ballot(2, &["A"]), ballot(3, &["B"])];
        ballots[1].votes.push(invalid_vote());
        let sorted = tally_round_ballots(&ballots, &tied);
        assert_eq!(sorted, entries(&[("B", 2), ("C", 0)]));
    }

    #[test]
    fn round_tally_keeps_tied_order_for_equal_counts() {
        let tied = names(&["C", "B"]);
        let ballots = vec![ballot(1, &["B"]), ballot(2, &["C"])];
        assert_eq!(
            tally_round_ballots(&ballots, &tied),
            entries(&[("C", 1), ("B", 1)])
        );
    }

    #[test]
    fn statistics_over_main_ballots() {
        let mut with_invalid = ballot(1, &["A"]);
        with_invalid.votes.push(invalid_vote());
        let ballots = vec![with_invalid, ballot(2, &["A", "B"]), null_ballot(3)];
        let config = Configuration {
            delegates: 2,
            votes: 2,
            ..Configuration::default()
        };
        let stats = compute_statistics(&ballots, 10, Some(&config));
        assert_eq!(
            stats,
            ScrutinyStats {
                total_voters: 10,
                total_ballots: 3,
                null_ballots: 1,
                valid_ballots: 2,
                invalid_names: 1,
                total_possible_votes: 4,
                valid_votes: 3,
            }
        );
    }

    #[test]
    fn result_rows_without_tiebreaker() {
        let ranking = entries(&[("A", 10), ("B", 8), ("C", 8), ("D", 5)]);
        let rows = result_rows(&ranking, None, 2);
        let elected: Vec<&str> = rows
            .iter()
            .filter(|r| r.elected)
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(elected, vec!["A"]);

        let rows = result_rows(&ranking, None, 3);
        assert_eq!(rows.iter().filter(|r| r.elected).count(), 3);
    }

    #[test]
    fn result_rows_with_final_delegates() {
        let ranking = entries(&[("A", 10), ("B", 8), ("C", 8), ("D", 5)]);
        let delegates = vec![
            DelegateRecord {
                name: "A".to_string(),
                position: 1,
                by_tiebreaker: false,
            },
            DelegateRecord {
                name: "C".to_string(),
                position: 2,
                by_tiebreaker: true,
            },
        ];
        let rows = result_rows(&ranking, Some(&delegates), 2);
        let order: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(order, vec!["A", "C", "B", "D"]);
        assert!(rows[1].by_tiebreaker);
        assert_eq!(rows[1].votes, 8);
        assert!(!rows[2].elected);
    }
}
