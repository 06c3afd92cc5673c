//! The runoff process among the candidates tied at the cutoff.
//!
//! A session moves between three phases. In `Voting`, round ballots are cast. Computing the
//! results moves to `Results`, from where the round is either finished (the next round starts
//! in `Voting`, or the process ends in `Completed`) or abandoned with `back_to_voting`.
//! `restart` is available from every phase.
//!
//! Only the [`TiebreakerState`] is persisted. Every transition that changes it builds the whole
//! new state, writes it once through the [`TiebreakerStore`], and only then adopts it.

use chrono::Utc;
use log::{debug, info, warn};

use crate::builder::BallotDraft;
use crate::store::{BallotSource, ConfigurationSource, TiebreakerStore};
use crate::*;

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Phase {
    Voting,
    Results,
    Completed,
}

/// The tally of the round in progress and what it decides.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RoundResults {
    pub sorted: Vec<TallyEntry>,
    pub outcome: RoundOutcome,
}

/// The state a tiebreaker starts from, given the main results.
pub fn initial_state(main_results: &[TallyEntry], delegates: u32) -> TiebreakerState {
    let info = extract_initial_tiebreaker_info(main_results, delegates);
    TiebreakerState {
        confirmed_delegates: info.confirmed_delegates,
        rounds: vec![],
        final_delegates: None,
        completed: false,
        current_tied_candidates: info.tied_candidates,
        current_winners_needed: info.winners_needed,
        pending_ballots: vec![],
    }
}

/// The ranking of the main ballots currently stored.
pub fn build_main_results<S: BallotSource + ?Sized>(
    store: &S,
) -> Result<Vec<TallyEntry>, TallyErrors> {
    Ok(compute_ranking(&store.get_all_ballots()?))
}

fn delegates_from(names: &[String], first_position: usize) -> Vec<DelegateRecord> {
    names
        .iter()
        .enumerate()
        .map(|(idx, name)| DelegateRecord {
            name: name.clone(),
            position: (first_position + idx + 1) as u32,
            by_tiebreaker: true,
        })
        .collect()
}

fn renumber(ballots: &mut [Ballot]) {
    for (idx, b) in ballots.iter_mut().enumerate() {
        b.number = (idx + 1) as u32;
    }
}

#[derive(Debug, Clone)]
pub struct TiebreakerSession {
    state: TiebreakerState,
    phase: Phase,
    round_results: Option<RoundResults>,
    draft: BallotDraft,
}

impl TiebreakerSession {
    /// Resumes the stored tiebreaker, or prepares a fresh one from the main results.
    ///
    /// Nothing is written until the first transition.
    pub fn open<S>(store: &S) -> Result<TiebreakerSession, TallyErrors>
    where
        S: TiebreakerStore + BallotSource + ConfigurationSource,
    {
        let state = match store.get_tiebreaker_data()? {
            Some(state) => {
                info!(
                    "open: resuming tiebreaker at round {}",
                    state.rounds.len() + 1
                );
                state
            }
            None => {
                let main_results = build_main_results(store)?;
                initial_state(&main_results, store.delegates()?)
            }
        };
        Ok(TiebreakerSession::from_state(state))
    }

    pub fn from_state(state: TiebreakerState) -> TiebreakerSession {
        let phase = if state.completed {
            Phase::Completed
        } else {
            Phase::Voting
        };
        let draft = BallotDraft::new(state.current_winners_needed as usize);
        TiebreakerSession {
            state,
            phase,
            round_results: None,
            draft,
        }
    }

    pub fn state(&self) -> &TiebreakerState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn round_results(&self) -> Option<&RoundResults> {
        self.round_results.as_ref()
    }

    pub fn draft(&self) -> &BallotDraft {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut BallotDraft {
        &mut self.draft
    }

    pub fn current_round_number(&self) -> u32 {
        self.state.rounds.len() as u32 + 1
    }

    pub fn tied_candidates(&self) -> &[String] {
        &self.state.current_tied_candidates
    }

    pub fn winners_needed(&self) -> u32 {
        self.state.current_winners_needed
    }

    pub fn pending_ballots(&self) -> &[Ballot] {
        &self.state.pending_ballots
    }

    /// The ballots of all the completed rounds, in order.
    pub fn all_rounds_ballots(&self) -> Vec<&Ballot> {
        self.state
            .rounds
            .iter()
            .flat_map(|r| r.ballots.iter())
            .collect()
    }

    fn persist<S: TiebreakerStore + ?Sized>(
        &mut self,
        store: &mut S,
        new_state: TiebreakerState,
    ) -> Result<(), TallyErrors> {
        store.save_tiebreaker_data(&new_state)?;
        self.state = new_state;
        Ok(())
    }

    fn reset_draft(&mut self) {
        self.draft = BallotDraft::new(self.state.current_winners_needed as usize);
    }

    fn ensure_voting(&self) -> Result<(), TallyErrors> {
        match self.phase {
            Phase::Voting => Ok(()),
            Phase::Completed => Err(TallyErrors::TiebreakerCompleted),
            Phase::Results => Err(TallyErrors::NotVoting),
        }
    }

    /// Adds a ballot to the round in progress.
    ///
    /// The ballot must have exactly one filled slot per seat still open.
    pub fn save_round_ballot<S: TiebreakerStore + ?Sized>(
        &mut self,
        store: &mut S,
        votes: Vec<Vote>,
    ) -> Result<Ballot, TallyErrors> {
        self.ensure_voting()?;
        let slots = self.state.current_winners_needed as usize;
        if votes.len() != slots || !votes.iter().all(|v| v.is_filled()) {
            warn!(
                "save_round_ballot: rejecting ballot with {} slots ({} expected, all filled)",
                votes.len(),
                slots
            );
            return Err(TallyErrors::IncompleteBallot);
        }
        let ballot = Ballot {
            id: fresh_id("round-ballot"),
            number: self.state.pending_ballots.len() as u32 + 1,
            votes,
            is_null: false,
            timestamp: Utc::now(),
        };
        let mut new_state = self.state.clone();
        new_state.pending_ballots.push(ballot.clone());
        self.persist(store, new_state)?;
        debug!(
            "save_round_ballot: round {} now has {} ballots",
            self.current_round_number(),
            self.state.pending_ballots.len()
        );
        Ok(ballot)
    }

    /// Casts the draft as a round ballot and starts a fresh draft.
    pub fn submit_draft<S: TiebreakerStore + ?Sized>(
        &mut self,
        store: &mut S,
    ) -> Result<Ballot, TallyErrors> {
        if !self.draft.is_complete() {
            return Err(TallyErrors::IncompleteBallot);
        }
        let votes = self.draft.clone().into_round_votes();
        let ballot = self.save_round_ballot(store, votes)?;
        self.reset_draft();
        Ok(ballot)
    }

    /// Takes a pending ballot back into the draft for correction.
    pub fn edit_round_ballot<S: TiebreakerStore + ?Sized>(
        &mut self,
        store: &mut S,
        index: usize,
    ) -> Result<(), TallyErrors> {
        self.ensure_voting()?;
        let ballot = self
            .state
            .pending_ballots
            .get(index)
            .cloned()
            .ok_or_else(|| TallyErrors::UnknownBallot(format!("#{}", index + 1)))?;
        let mut new_state = self.state.clone();
        new_state.pending_ballots.remove(index);
        renumber(&mut new_state.pending_ballots);
        self.persist(store, new_state)?;
        self.draft =
            BallotDraft::from_votes(&ballot.votes, self.state.current_winners_needed as usize);
        Ok(())
    }

    pub fn delete_round_ballot<S: TiebreakerStore + ?Sized>(
        &mut self,
        store: &mut S,
        id: &str,
    ) -> Result<(), TallyErrors> {
        self.ensure_voting()?;
        if !self.state.pending_ballots.iter().any(|b| b.id == id) {
            return Err(TallyErrors::UnknownBallot(id.to_string()));
        }
        let mut new_state = self.state.clone();
        new_state.pending_ballots.retain(|b| b.id != id);
        renumber(&mut new_state.pending_ballots);
        self.persist(store, new_state)
    }

    /// Tallies the pending ballots among the contested candidates and decides the round.
    ///
    /// The history is not touched until the round is finished.
    pub fn compute_results(&mut self) -> Result<&RoundResults, TallyErrors> {
        if self.state.completed {
            return Err(TallyErrors::TiebreakerCompleted);
        }
        if self.state.pending_ballots.is_empty() {
            return Err(TallyErrors::NoPendingBallots);
        }
        let sorted = tally_round_ballots(
            &self.state.pending_ballots,
            &self.state.current_tied_candidates,
        );
        let outcome = compute_round_outcome(&sorted, self.state.current_winners_needed);
        info!(
            "compute_results: round {}: {:?} -> {:?}",
            self.current_round_number(),
            sorted,
            outcome
        );
        self.phase = Phase::Results;
        Ok(&*self.round_results.insert(RoundResults { sorted, outcome }))
    }

    /// Records the computed round and moves on: to the next round if a tie remains, to the
    /// end of the tiebreaker otherwise.
    pub fn finish_round<S: TiebreakerStore + ?Sized>(
        &mut self,
        store: &mut S,
    ) -> Result<(), TallyErrors> {
        let results = match (&self.phase, &self.round_results) {
            (Phase::Results, Some(r)) => r.clone(),
            _ => return Err(TallyErrors::NoComputedOutcome),
        };
        let RoundResults { sorted, outcome } = results;
        let winners_needed = self.state.current_winners_needed;

        let mut new_state = self.state.clone();
        new_state.rounds.push(RoundRecord {
            round_number: self.current_round_number(),
            tied_candidates: self.state.current_tied_candidates.clone(),
            winners_needed,
            ballots: self.state.pending_ballots.clone(),
            results: sorted,
            clear_winners: outcome.clear_winners.clone(),
            still_tied: outcome.still_tied.clone(),
            next_winners_needed: outcome.next_winners_needed,
            completed: outcome.is_resolved,
        });
        new_state.pending_ballots.clear();

        let confirmed_count = self.state.confirmed_delegates.len();
        if outcome.is_resolved {
            let winners: Vec<String> = outcome
                .clear_winners
                .iter()
                .chain(outcome.still_tied.iter())
                .take(winners_needed as usize)
                .cloned()
                .collect();
            let mut final_delegates = self.state.confirmed_delegates.clone();
            final_delegates.extend(delegates_from(&winners, confirmed_count));
            info!("finish_round: tiebreaker resolved: {:?}", final_delegates);
            new_state.final_delegates = Some(final_delegates);
            new_state.completed = true;
            new_state.current_tied_candidates = vec![];
            new_state.current_winners_needed = 0;
            self.persist(store, new_state)?;
            self.phase = Phase::Completed;
        } else {
            new_state
                .confirmed_delegates
                .extend(delegates_from(&outcome.clear_winners, confirmed_count));
            new_state.current_tied_candidates = outcome.still_tied;
            new_state.current_winners_needed = outcome.next_winners_needed;
            info!(
                "finish_round: still tied: {:?} for {} seats",
                new_state.current_tied_candidates, new_state.current_winners_needed
            );
            self.persist(store, new_state)?;
            self.phase = Phase::Voting;
        }
        self.round_results = None;
        self.reset_draft();
        Ok(())
    }

    /// Discards the computed results and the ballots of the round, which is voted again.
    pub fn back_to_voting<S: TiebreakerStore + ?Sized>(
        &mut self,
        store: &mut S,
    ) -> Result<(), TallyErrors> {
        if self.phase != Phase::Results {
            return Err(TallyErrors::NoComputedOutcome);
        }
        let mut new_state = self.state.clone();
        new_state.pending_ballots.clear();
        self.persist(store, new_state)?;
        self.round_results = None;
        self.phase = Phase::Voting;
        Ok(())
    }

    /// Throws away the whole tiebreaker and starts again from the current main results.
    pub fn restart<S>(&mut self, store: &mut S) -> Result<(), TallyErrors>
    where
        S: TiebreakerStore + BallotSource + ConfigurationSource,
    {
        let main_results = build_main_results(store)?;
        let fresh = initial_state(&main_results, store.delegates()?);
        info!(
            "restart: tied: {:?} for {} seats",
            fresh.current_tied_candidates, fresh.current_winners_needed
        );
        self.persist(store, fresh)?;
        self.round_results = None;
        self.phase = Phase::Voting;
        self.reset_draft();
        Ok(())
    }
}
