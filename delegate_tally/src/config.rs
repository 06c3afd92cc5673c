// ********* Input data structures ***********

use std::error::Error;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A person from the voter directory.
///
/// Every eligible voter is also an eligible candidate.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub name: String,
    #[serde(rename = "lastName1")]
    pub last_name1: String,
    #[serde(rename = "lastName2")]
    pub last_name2: String,
    #[serde(default)]
    pub location: String,
}

impl Person {
    /// The display name: first name and both surnames, trimmed and joined by single spaces.
    ///
    /// This string is also the key under which votes are counted. Two different people
    /// sharing the same three name parts end up counted as one candidate.
    pub fn full_name(&self) -> String {
        [&self.name, &self.last_name1, &self.last_name2]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<&str>>()
            .join(" ")
    }
}

/// The content of a filled vote slot.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Mark {
    /// A selected candidate.
    Candidate(Person),
    /// A slot deliberately spoiled by the voter. It is never counted for anyone, but it is
    /// reported in the invalid names statistic.
    Invalid { name: String },
}

impl Mark {
    pub fn display_name(&self) -> String {
        match self {
            Mark::Candidate(p) => p.full_name(),
            Mark::Invalid { name } => name.clone(),
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Mark::Invalid { .. })
    }
}

/// One slot of a ballot.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: String,
    pub person: Option<Mark>,
    #[serde(rename = "isNull", default)]
    pub is_null: bool,
}

impl Vote {
    /// A slot that is filled, either with a candidate or with an explicit invalid mark.
    pub fn is_filled(&self) -> bool {
        self.person.is_some()
    }

    /// The candidate name this vote counts for, if any.
    pub fn counted_name(&self) -> Option<String> {
        match &self.person {
            Some(Mark::Candidate(p)) if !self.is_null => Some(p.full_name()),
            _ => None,
        }
    }
}

/// One transcribed ballot sheet.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Ballot {
    pub id: String,
    /// Position in casting order, starting at 1.
    pub number: u32,
    pub votes: Vec<Vote>,
    #[serde(rename = "isNull", default)]
    pub is_null: bool,
    pub timestamp: DateTime<Utc>,
}

// ******** Output data structures *********

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct TallyEntry {
    pub name: String,
    pub votes: u64,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct DelegateRecord {
    pub name: String,
    /// Rank among the elected, starting at 1.
    pub position: u32,
    #[serde(rename = "byTiebreaker")]
    pub by_tiebreaker: bool,
}

/// What the main tally decides before any runoff.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct InitialTiebreakerInfo {
    pub confirmed_delegates: Vec<DelegateRecord>,
    pub tied_candidates: Vec<String>,
    pub winners_needed: u32,
}

/// The outcome of one runoff round.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundOutcome {
    pub clear_winners: Vec<String>,
    pub still_tied: Vec<String>,
    pub next_winners_needed: u32,
    pub is_resolved: bool,
}

/// A completed runoff round, as kept in the history.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRecord {
    pub round_number: u32,
    pub tied_candidates: Vec<String>,
    pub winners_needed: u32,
    pub ballots: Vec<Ballot>,
    pub results: Vec<TallyEntry>,
    pub clear_winners: Vec<String>,
    pub still_tied: Vec<String>,
    pub next_winners_needed: u32,
    pub completed: bool,
}

/// The persisted state of a tiebreaker.
///
/// At rest, either `completed` is false and `current_winners_needed > 0`, or `completed` is
/// true, `final_delegates` is set and `current_winners_needed` is 0.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TiebreakerState {
    pub confirmed_delegates: Vec<DelegateRecord>,
    /// Append-only while moving forward; only a restart clears it.
    pub rounds: Vec<RoundRecord>,
    pub final_delegates: Option<Vec<DelegateRecord>>,
    pub completed: bool,
    #[serde(default)]
    pub current_tied_candidates: Vec<String>,
    #[serde(default)]
    pub current_winners_needed: u32,
    /// Ballots cast in the round in progress, not tallied yet.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_ballots: Vec<Ballot>,
}

/// Statistics over the main ballots.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrutinyStats {
    pub total_voters: u64,
    pub total_ballots: u64,
    pub null_ballots: u64,
    pub valid_ballots: u64,
    pub invalid_names: u64,
    pub total_possible_votes: u64,
    pub valid_votes: u64,
}

/// A line of the final delegate table.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    pub name: String,
    pub votes: u64,
    pub elected: bool,
    pub by_tiebreaker: bool,
}

/// Errors that prevent an operation from completing.
///
/// None of them leaves a partially written state behind.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum TallyErrors {
    /// A round ballot has at least one slot left unset.
    IncompleteBallot,
    /// The round is not accepting ballots (results are displayed or the tiebreaker ended).
    NotVoting,
    NoPendingBallots,
    /// `finish_round` was called without computed results.
    NoComputedOutcome,
    TiebreakerCompleted,
    UnknownBallot(String),
    /// Cast ballots cannot be edited while a tiebreaker exists, unless unlocked.
    BallotsLocked,
    /// Only an existing tiebreaker can unlock the cast ballots.
    NoTiebreaker,
    MissingConfiguration,
    Storage(String),
}

impl Error for TallyErrors {}

impl Display for TallyErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TallyErrors::IncompleteBallot => write!(f, "every vote slot must be filled"),
            TallyErrors::NotVoting => write!(f, "the round is not accepting ballots"),
            TallyErrors::NoPendingBallots => write!(f, "no ballot has been cast in this round"),
            TallyErrors::NoComputedOutcome => write!(f, "the round results have not been computed"),
            TallyErrors::TiebreakerCompleted => write!(f, "the tiebreaker is already completed"),
            TallyErrors::UnknownBallot(id) => write!(f, "unknown ballot {}", id),
            TallyErrors::BallotsLocked => {
                write!(f, "ballots are locked while a tiebreaker is in progress")
            }
            TallyErrors::NoTiebreaker => write!(f, "there is no tiebreaker in progress"),
            TallyErrors::MissingConfiguration => write!(f, "the election is not configured"),
            TallyErrors::Storage(msg) => write!(f, "storage error: {}", msg),
        }
    }
}

// ********* Configuration **********

/// The election configuration. Only `delegates` drives the tally.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Number of delegate seats to fill.
    pub delegates: u32,
    /// Number of vote slots on a main ballot.
    #[serde(default)]
    pub votes: u32,
    #[serde(default)]
    pub electoral_area: Option<String>,
    #[serde(default)]
    pub election_date: Option<String>,
    #[serde(default)]
    pub election_type: Option<String>,
    #[serde(rename = "scrutineersNames", default)]
    pub scrutineers_names: Vec<String>,
    #[serde(default)]
    pub comments: Option<String>,
}
