//! The main ballots of the election.
//!
//! All the changes go through a [`BallotBook`], which persists the whole list and then tells
//! its listener that the ballots changed.

use chrono::Utc;
use log::{debug, info, warn};

use crate::impact::ImpactVerdict;
use crate::store::{BallotSource, TiebreakerStore};
use crate::{fresh_id, Ballot, TallyErrors, Vote};

/// Reacts to every successful change of the main ballots.
pub trait BallotsChangedListener<S> {
    fn ballots_changed(
        &mut self,
        store: &mut S,
        ballots: &[Ballot],
    ) -> Result<ImpactVerdict, TallyErrors>;
}

pub struct BallotBook<S, L> {
    store: S,
    listener: L,
    unlocked: bool,
    last_verdict: Option<ImpactVerdict>,
}

impl<S, L> BallotBook<S, L>
where
    S: BallotSource + TiebreakerStore,
    L: BallotsChangedListener<S>,
{
    pub fn new(store: S, listener: L) -> BallotBook<S, L> {
        BallotBook {
            store,
            listener,
            unlocked: false,
            last_verdict: None,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// What the listener answered after the last change.
    pub fn last_verdict(&self) -> Option<&ImpactVerdict> {
        self.last_verdict.as_ref()
    }

    /// Cast ballots cannot be changed while a tiebreaker exists, unless explicitly unlocked.
    pub fn is_locked(&self) -> bool {
        !self.unlocked && self.store.tiebreaker_exists()
    }

    /// Allows the correction of cast ballots until the tiebreaker is invalidated.
    pub fn unlock(&mut self) -> Result<(), TallyErrors> {
        if !self.store.tiebreaker_exists() {
            warn!("unlock: no tiebreaker, nothing to unlock");
            return Err(TallyErrors::NoTiebreaker);
        }
        info!("unlock: editing of cast ballots allowed");
        self.unlocked = true;
        Ok(())
    }

    pub fn ballots(&self) -> Result<Vec<Ballot>, TallyErrors> {
        self.store.get_all_ballots()
    }

    pub fn next_ballot_number(&self) -> Result<u32, TallyErrors> {
        Ok(self.ballots()?.len() as u32 + 1)
    }

    pub fn valid_ballots(&self) -> Result<Vec<Ballot>, TallyErrors> {
        Ok(self.ballots()?.into_iter().filter(|b| !b.is_null).collect())
    }

    pub fn null_ballots(&self) -> Result<Vec<Ballot>, TallyErrors> {
        Ok(self.ballots()?.into_iter().filter(|b| b.is_null).collect())
    }

    /// Appends a ballot. Unfilled slots are dropped.
    pub fn cast_ballot(&mut self, votes: Vec<Vote>) -> Result<Ballot, TallyErrors> {
        self.append(compact(votes), false)
    }

    pub fn cast_null_ballot(&mut self) -> Result<Ballot, TallyErrors> {
        self.append(vec![], true)
    }

    fn append(&mut self, votes: Vec<Vote>, is_null: bool) -> Result<Ballot, TallyErrors> {
        let mut ballots = self.ballots()?;
        let ballot = Ballot {
            id: fresh_id("ballot"),
            number: ballots.len() as u32 + 1,
            votes,
            is_null,
            timestamp: Utc::now(),
        };
        ballots.push(ballot.clone());
        self.commit(ballots)?;
        debug!("append: ballot {} cast (null: {})", ballot.number, is_null);
        Ok(ballot)
    }

    /// Replaces the votes of a cast ballot, which becomes a valid ballot.
    pub fn update_ballot(&mut self, number: u32, votes: Vec<Vote>) -> Result<Ballot, TallyErrors> {
        self.check_unlocked()?;
        let mut ballots = self.ballots()?;
        let ballot = ballots
            .iter_mut()
            .find(|b| b.number == number)
            .ok_or_else(|| TallyErrors::UnknownBallot(format!("#{}", number)))?;
        ballot.votes = compact(votes);
        ballot.is_null = false;
        ballot.timestamp = Utc::now();
        let updated = ballot.clone();
        self.commit(ballots)?;
        Ok(updated)
    }

    /// Removes a ballot. The ballots after it move up one number.
    pub fn delete_ballot(&mut self, number: u32) -> Result<(), TallyErrors> {
        self.check_unlocked()?;
        let mut ballots = self.ballots()?;
        let before = ballots.len();
        ballots.retain(|b| b.number != number);
        if ballots.len() == before {
            return Err(TallyErrors::UnknownBallot(format!("#{}", number)));
        }
        for (idx, b) in ballots.iter_mut().enumerate() {
            b.number = (idx + 1) as u32;
        }
        self.commit(ballots)
    }

    pub fn replace_all(&mut self, ballots: Vec<Ballot>) -> Result<(), TallyErrors> {
        self.commit(ballots)
    }

    pub fn delete_all(&mut self) -> Result<(), TallyErrors> {
        self.store.delete_all_ballots()?;
        self.emit(&[])
    }

    fn check_unlocked(&self) -> Result<(), TallyErrors> {
        if self.is_locked() {
            warn!("check_unlocked: a tiebreaker exists, cast ballots are locked");
            return Err(TallyErrors::BallotsLocked);
        }
        Ok(())
    }

    fn commit(&mut self, ballots: Vec<Ballot>) -> Result<(), TallyErrors> {
        self.store.replace_all_ballots(&ballots)?;
        self.emit(&ballots)
    }

    fn emit(&mut self, ballots: &[Ballot]) -> Result<(), TallyErrors> {
        let verdict = self.listener.ballots_changed(&mut self.store, ballots)?;
        if let ImpactVerdict::Invalidated { .. } = verdict {
            self.unlocked = false;
        }
        self.last_verdict = Some(verdict);
        Ok(())
    }
}

fn compact(votes: Vec<Vote>) -> Vec<Vote> {
    votes.into_iter().filter(|v| v.is_filled()).collect()
}
