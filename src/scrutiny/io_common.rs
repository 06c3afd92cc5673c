// Choices given on the command line.

use delegate_tally::builder::BallotDraft;
use delegate_tally::{Ballot, Person};

use crate::scrutiny::*;

pub const EMPTY_SLOT: &str = "_";
pub const INVALID_PREFIX: &str = "invalid:";
const DEFAULT_INVALID_LABEL: &str = "Invalid name";

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Choice {
    Empty,
    Invalid(String),
    Voter(Person),
}

/// Finds the voter designated by a choice, by id first and then by full name.
pub fn resolve_choice(voters: &[Person], choice: &str) -> TallyCliResult<Choice> {
    let choice = choice.trim();
    if choice == EMPTY_SLOT {
        return Ok(Choice::Empty);
    }
    if let Some(label) = choice.strip_prefix(INVALID_PREFIX) {
        let label = if label.trim().is_empty() {
            DEFAULT_INVALID_LABEL
        } else {
            label.trim()
        };
        return Ok(Choice::Invalid(label.to_string()));
    }
    let lowered = choice.to_lowercase();
    voters
        .iter()
        .find(|p| p.id == choice)
        .or_else(|| voters.iter().find(|p| p.full_name().to_lowercase() == lowered))
        .map(|p| Choice::Voter(p.clone()))
        .context(UnknownVoterSnafu { choice })
}

/// Fills the first slots of a draft with the given choices.
pub fn fill_draft(
    draft: &mut BallotDraft,
    voters: &[Person],
    choices: &[String],
) -> TallyCliResult<()> {
    if choices.len() > draft.len() {
        whatever!(
            "{} choices given for a ballot of {} slots",
            choices.len(),
            draft.len()
        );
    }
    for (idx, c) in choices.iter().enumerate() {
        match resolve_choice(voters, c)? {
            Choice::Empty => draft.clear(idx),
            Choice::Invalid(label) => draft.mark_invalid(idx, &label),
            Choice::Voter(p) => draft.select(idx, &p),
        }
    }
    Ok(())
}

/// The voters whose full name contains the search term, ignoring case.
pub fn search_voters<'a>(voters: &'a [Person], term: &str) -> Vec<&'a Person> {
    let term = term.to_lowercase();
    voters
        .iter()
        .filter(|p| p.full_name().to_lowercase().contains(&term))
        .collect()
}

pub fn ballot_line(ballot: &Ballot) -> String {
    if ballot.is_null {
        return format!("#{} null", ballot.number);
    }
    let names: Vec<String> = ballot
        .votes
        .iter()
        .map(|v| match &v.person {
            Some(mark) => mark.display_name(),
            None => EMPTY_SLOT.to_string(),
        })
        .collect();
    format!("#{} {}", ballot.number, names.join(", "))
}
