use crate::{fresh_id, Mark, Person, Vote};

/// The ballot being filled in, slot by slot.
///
/// ```
/// use delegate_tally::builder::BallotDraft;
/// use delegate_tally::Person;
///
/// let anna = Person {
///     id: "1".to_string(),
///     name: "Anna".to_string(),
///     last_name1: "Garcia".to_string(),
///     last_name2: "Lopez".to_string(),
///     location: "".to_string(),
/// };
/// let mut draft = BallotDraft::new(2);
/// draft.select(0, &anna);
/// assert!(!draft.is_complete());
/// draft.mark_invalid(1, "Invalid name");
/// assert!(draft.is_complete());
/// ```
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct BallotDraft {
    slots: Vec<Vote>,
}

impl BallotDraft {
    pub fn new(size: usize) -> BallotDraft {
        BallotDraft {
            slots: (0..size).map(|_| empty_vote()).collect(),
        }
    }

    /// Stages the votes of an existing ballot, padded with empty slots up to `size`.
    pub fn from_votes(votes: &[Vote], size: usize) -> BallotDraft {
        let mut slots = votes.to_vec();
        while slots.len() < size {
            slots.push(empty_vote());
        }
        BallotDraft { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn votes(&self) -> &[Vote] {
        &self.slots
    }

    /// Puts a candidate in a slot. Out of range slots are ignored.
    pub fn select(&mut self, index: usize, person: &Person) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.person = Some(Mark::Candidate(person.clone()));
            slot.is_null = false;
        }
    }

    /// Marks a slot as a deliberately invalid name.
    pub fn mark_invalid(&mut self, index: usize, label: &str) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.person = Some(Mark::Invalid {
                name: label.to_string(),
            });
            slot.is_null = true;
        }
    }

    pub fn clear(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.person = None;
            slot.is_null = false;
        }
    }

    /// True when every slot holds a candidate or an invalid mark.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|v| v.is_filled())
    }

    /// The votes of a runoff ballot: one per slot, fixed length.
    pub fn into_round_votes(self) -> Vec<Vote> {
        self.slots
    }

    /// The votes of a main ballot: the unfilled slots are dropped.
    pub fn into_main_votes(self) -> Vec<Vote> {
        self.slots.into_iter().filter(|v| v.is_filled()).collect()
    }
}

fn empty_vote() -> Vote {
    Vote {
        id: fresh_id("vote"),
        person: None,
        is_null: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::person;

    #[test]
    fn main_votes_drop_empty_slots() {
        let mut draft = BallotDraft::new(3);
        draft.select(1, &person("A"));
        let votes = draft.into_main_votes();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].counted_name(), Some("A".to_string()));
    }

    #[test]
    fn round_votes_keep_their_length() {
        let mut draft = BallotDraft::new(2);
        draft.select(0, &person("A"));
        draft.mark_invalid(1, "Invalid name");
        assert!(draft.is_complete());
        let votes = draft.into_round_votes();
        assert_eq!(votes.len(), 2);
        assert!(votes[1].is_null);
    }

    #[test]
    fn clearing_a_slot_makes_the_draft_incomplete() {
        let mut draft = BallotDraft::new(1);
        draft.mark_invalid(0, "x");
        draft.clear(0);
        assert!(!draft.is_complete());
        draft.select(5, &person("A"));
        assert_eq!(draft.len(), 1);
    }
}
