//! Keeps a tiebreaker consistent with the main ballots.
//!
//! A tiebreaker is only meaningful for the set of candidates that were tied when it started.
//! When an edit of the main ballots changes that set, the tiebreaker is discarded. Changes in
//! the counts that leave the set alone do not affect it.

use std::collections::HashSet;

use log::{debug, info};

use crate::ballots::BallotsChangedListener;
use crate::store::{ConfigurationSource, Notifier, TiebreakerStore};
use crate::{
    compute_ranking, extract_initial_tiebreaker_info, Ballot, TallyErrors, TiebreakerState,
};

pub const INVALIDATED_MESSAGE: &str =
    "The candidates tied at the cutoff have changed. The tiebreaker has been discarded.";

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ImpactVerdict {
    /// Nothing to check.
    NoTiebreaker,
    /// The same candidates are still tied; the tiebreaker stands.
    Unchanged,
    /// The tiebreaker was cleared.
    Invalidated {
        previous: Vec<String>,
        current: Vec<String>,
    },
}

/// The candidates a tiebreaker is about: the ones tied when its first round was played, or
/// the current tied set when no round has been finished yet.
pub fn reference_tied_set(state: &TiebreakerState) -> &[String] {
    match state.rounds.first() {
        Some(round) => &round.tied_candidates,
        None => &state.current_tied_candidates,
    }
}

/// Identifies a tiebreaker by its reference set, whatever the order of the names.
pub fn tiebreaker_key(state: &TiebreakerState) -> String {
    let mut names: Vec<&str> = reference_tied_set(state)
        .iter()
        .map(|s| s.as_str())
        .collect();
    names.sort_unstable();
    names.dedup();
    sha256::digest(names.join("\n").as_str())
}

/// Re-evaluates the stored tiebreaker against the new main ballots, using its
/// [`reference_tied_set`].
pub fn check_tiebreaker_impact<S, N>(
    store: &mut S,
    notifier: &mut N,
    ballots: &[Ballot],
) -> Result<ImpactVerdict, TallyErrors>
where
    S: TiebreakerStore + ConfigurationSource + ?Sized,
    N: Notifier + ?Sized,
{
    let state = match store.get_tiebreaker_data()? {
        Some(state) => state,
        None => return Ok(ImpactVerdict::NoTiebreaker),
    };
    let ranking = compute_ranking(ballots);
    let current = extract_initial_tiebreaker_info(&ranking, store.delegates()?).tied_candidates;
    let previous = reference_tied_set(&state).to_vec();

    let previous_set: HashSet<&String> = previous.iter().collect();
    let current_set: HashSet<&String> = current.iter().collect();
    if previous_set == current_set {
        debug!("check_tiebreaker_impact: tied set unchanged: {:?}", current);
        return Ok(ImpactVerdict::Unchanged);
    }

    info!(
        "check_tiebreaker_impact: tied set changed from {:?} to {:?}, clearing the tiebreaker",
        previous, current
    );
    store.clear_tiebreaker_data()?;
    notifier.notify(INVALIDATED_MESSAGE);
    Ok(ImpactVerdict::Invalidated { previous, current })
}

/// The subscriber to the ballot book that runs [`check_tiebreaker_impact`] after every change.
#[derive(Debug, Clone, Default)]
pub struct ImpactReevaluator<N> {
    notifier: N,
}

impl<N: Notifier> ImpactReevaluator<N> {
    pub fn new(notifier: N) -> ImpactReevaluator<N> {
        ImpactReevaluator { notifier }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }
}

impl<S, N> BallotsChangedListener<S> for ImpactReevaluator<N>
where
    S: TiebreakerStore + ConfigurationSource,
    N: Notifier,
{
    fn ballots_changed(
        &mut self,
        store: &mut S,
        ballots: &[Ballot],
    ) -> Result<ImpactVerdict, TallyErrors> {
        check_tiebreaker_impact(store, &mut self.notifier, ballots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BallotSource, MemoryStore, RecordingNotifier, StorageKey};
    use crate::test_util::*;
    use crate::tiebreaker::TiebreakerSession;
    use crate::Configuration;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// A tiebreaker between B and C with one round ballot cast.
    fn started_tiebreaker() -> MemoryStore {
        let mut store = MemoryStore::new();
        store
            .save_configuration(&Configuration {
                delegates: 2,
                votes: 1,
                ..Configuration::default()
            })
            .unwrap();
        store
            .replace_all_ballots(&ballots_with_counts(&[
                ("A", 10),
                ("B", 8),
                ("C", 8),
                ("D", 5),
            ]))
            .unwrap();
        let mut session = TiebreakerSession::open(&store).unwrap();
        session
            .save_round_ballot(&mut store, vec![vote_for("B")])
            .unwrap();
        store
    }

    #[test]
    fn changed_tied_set_clears_the_tiebreaker() {
        init();
        let mut store = started_tiebreaker();
        let mut notifier = RecordingNotifier::default();
        let ballots = ballots_with_counts(&[("A", 10), ("B", 8), ("C", 7), ("D", 8)]);
        let verdict = check_tiebreaker_impact(&mut store, &mut notifier, &ballots).unwrap();
        assert_eq!(
            verdict,
            ImpactVerdict::Invalidated {
                previous: names(&["B", "C"]),
                current: names(&["B", "D"]),
            }
        );
        assert!(!store.tiebreaker_exists());
        assert_eq!(store.get_tiebreaker_data().unwrap(), None);
        assert_eq!(notifier.messages, vec![INVALIDATED_MESSAGE.to_string()]);
    }

    #[test]
    fn same_tied_set_leaves_the_state_untouched() {
        let mut store = started_tiebreaker();
        let before = store.raw(StorageKey::Tiebreaker).map(|s| s.to_string());
        let mut notifier = RecordingNotifier::default();
        let ballots = ballots_with_counts(&[("A", 12), ("C", 9), ("B", 9), ("D", 1)]);
        let verdict = check_tiebreaker_impact(&mut store, &mut notifier, &ballots).unwrap();
        assert_eq!(verdict, ImpactVerdict::Unchanged);
        assert_eq!(
            store.raw(StorageKey::Tiebreaker).map(|s| s.to_string()),
            before
        );
        assert!(notifier.messages.is_empty());
    }

    #[test]
    fn compares_against_the_first_round() {
        let mut store = MemoryStore::new();
        store
            .save_configuration(&Configuration {
                delegates: 2,
                ..Configuration::default()
            })
            .unwrap();
        let ballots = ballots_with_counts(&[("A", 10), ("B", 8), ("C", 8), ("D", 8)]);
        store.replace_all_ballots(&ballots).unwrap();
        let mut session = TiebreakerSession::open(&store).unwrap();
        session
            .save_round_ballot(&mut store, vec![vote_for("B")])
            .unwrap();
        session
            .save_round_ballot(&mut store, vec![vote_for("C")])
            .unwrap();
        session.compute_results().unwrap();
        session.finish_round(&mut store).unwrap();
        assert_eq!(session.tied_candidates(), names(&["B", "C"]).as_slice());
        assert_eq!(
            reference_tied_set(session.state()),
            names(&["B", "C", "D"]).as_slice()
        );

        let key = tiebreaker_key(session.state());
        let mut other = session.state().clone();
        other.rounds[0].tied_candidates.reverse();
        assert_eq!(tiebreaker_key(&other), key);
        other.rounds[0].tied_candidates.pop();
        assert_ne!(tiebreaker_key(&other), key);

        // The round narrowed the tie to B and C, but the reference is still B, C and D.
        let mut notifier = RecordingNotifier::default();
        let verdict = check_tiebreaker_impact(&mut store, &mut notifier, &ballots).unwrap();
        assert_eq!(verdict, ImpactVerdict::Unchanged);
        assert!(store.tiebreaker_exists());
    }

    #[test]
    fn nothing_to_check_without_tiebreaker() {
        let mut store = MemoryStore::new();
        let mut notifier = RecordingNotifier::default();
        let verdict =
            check_tiebreaker_impact(&mut store, &mut notifier, &ballots_with_counts(&[("A", 1)]))
                .unwrap();
        assert_eq!(verdict, ImpactVerdict::NoTiebreaker);
        assert!(notifier.messages.is_empty());
    }
}
