//! Persistence ports.
//!
//! The tally never talks to a storage medium directly. It reads and writes whole values
//! through the traits of this module, which are all implemented on top of a
//! [`KeyValueStore`]: a store only has to keep strings under a handful of keys.
//!
//! Values are sealed in an envelope carrying the SHA-256 digest of their canonical JSON
//! form. A value that cannot be parsed or whose digest does not match is reported as absent.

use log::{debug, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JSValue;
use std::collections::HashMap;

use crate::{Ballot, Configuration, Person, TallyErrors, TiebreakerState};

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum StorageKey {
    Voters,
    Configuration,
    Ballots,
    Tiebreaker,
    Backup,
}

impl StorageKey {
    /// The keys holding the data of the election in progress.
    pub const ACTIVE: [StorageKey; 4] = [
        StorageKey::Voters,
        StorageKey::Configuration,
        StorageKey::Ballots,
        StorageKey::Tiebreaker,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StorageKey::Voters => "voterList",
            StorageKey::Configuration => "configuration",
            StorageKey::Ballots => "ballots",
            StorageKey::Tiebreaker => "tieBreaker",
            StorageKey::Backup => "backup",
        }
    }
}

/// Whole-value storage. Every write replaces the previous value; the last writer wins.
pub trait KeyValueStore {
    fn get(&self, key: StorageKey) -> Result<Option<String>, TallyErrors>;
    fn set(&mut self, key: StorageKey, value: String) -> Result<(), TallyErrors>;
    fn remove(&mut self, key: StorageKey) -> Result<(), TallyErrors>;
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    data: JSValue,
    digest: String,
}

fn digest_of(data: &JSValue) -> Result<String, TallyErrors> {
    let canonical = serde_json::to_string(data).map_err(|e| TallyErrors::Storage(e.to_string()))?;
    Ok(sha256::digest(canonical.as_str()))
}

/// Serializes a value into a sealed envelope.
pub fn seal<T: Serialize>(data: &T) -> Result<String, TallyErrors> {
    let data = serde_json::to_value(data).map_err(|e| TallyErrors::Storage(e.to_string()))?;
    let digest = digest_of(&data)?;
    serde_json::to_string(&Envelope { data, digest }).map_err(|e| TallyErrors::Storage(e.to_string()))
}

/// Opens a sealed envelope. Returns None when the content is malformed or was altered.
pub fn unseal<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(e) => e,
        Err(e) => {
            warn!("unseal: malformed envelope: {}", e);
            return None;
        }
    };
    match digest_of(&envelope.data) {
        Ok(d) if d == envelope.digest => {}
        _ => {
            warn!("unseal: digest mismatch, discarding the stored value");
            return None;
        }
    }
    match serde_json::from_value(envelope.data) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("unseal: unexpected content: {}", e);
            None
        }
    }
}

pub fn read_value<S, T>(store: &S, key: StorageKey) -> Result<Option<T>, TallyErrors>
where
    S: KeyValueStore + ?Sized,
    T: DeserializeOwned,
{
    let raw = store.get(key)?;
    debug!(
        "read_value: key: {} present: {}",
        key.name(),
        raw.is_some()
    );
    Ok(raw.and_then(|r| unseal(r.as_str())))
}

pub fn write_value<S, T>(store: &mut S, key: StorageKey, value: &T) -> Result<(), TallyErrors>
where
    S: KeyValueStore + ?Sized,
    T: Serialize,
{
    let sealed = seal(value)?;
    store.set(key, sealed)
}

// ********* Ports **********

/// The main ballots, read and written as a whole list.
pub trait BallotSource {
    fn get_all_ballots(&self) -> Result<Vec<Ballot>, TallyErrors>;
    fn replace_all_ballots(&mut self, ballots: &[Ballot]) -> Result<(), TallyErrors>;
    fn delete_all_ballots(&mut self) -> Result<(), TallyErrors>;
}

/// The people eligible as candidates.
pub trait VoterDirectory {
    fn get_all_voters(&self) -> Result<Vec<Person>, TallyErrors>;
    fn replace_all_voters(&mut self, voters: &[Person]) -> Result<(), TallyErrors>;
}

pub trait ConfigurationSource {
    fn get_configuration(&self) -> Result<Option<Configuration>, TallyErrors>;
    fn save_configuration(&mut self, configuration: &Configuration) -> Result<(), TallyErrors>;

    /// The number of seats, zero when the election is not configured.
    fn delegates(&self) -> Result<u32, TallyErrors> {
        Ok(self.get_configuration()?.map(|c| c.delegates).unwrap_or(0))
    }
}

pub trait TiebreakerStore {
    fn save_tiebreaker_data(&mut self, state: &TiebreakerState) -> Result<(), TallyErrors>;
    /// The stored state. A missing or corrupted state reads as None.
    fn get_tiebreaker_data(&self) -> Result<Option<TiebreakerState>, TallyErrors>;
    fn clear_tiebreaker_data(&mut self) -> Result<(), TallyErrors>;

    fn tiebreaker_exists(&self) -> bool {
        matches!(self.get_tiebreaker_data(), Ok(Some(_)))
    }
}

/// Fire-and-forget messages for the user.
pub trait Notifier {
    fn notify(&mut self, message: &str);
}

impl<K: KeyValueStore> BallotSource for K {
    fn get_all_ballots(&self) -> Result<Vec<Ballot>, TallyErrors> {
        Ok(read_value(self, StorageKey::Ballots)?.unwrap_or_default())
    }

    fn replace_all_ballots(&mut self, ballots: &[Ballot]) -> Result<(), TallyErrors> {
        write_value(self, StorageKey::Ballots, &ballots)
    }

    fn delete_all_ballots(&mut self) -> Result<(), TallyErrors> {
        self.remove(StorageKey::Ballots)
    }
}

impl<K: KeyValueStore> VoterDirectory for K {
    fn get_all_voters(&self) -> Result<Vec<Person>, TallyErrors> {
        Ok(read_value(self, StorageKey::Voters)?.unwrap_or_default())
    }

    fn replace_all_voters(&mut self, voters: &[Person]) -> Result<(), TallyErrors> {
        write_value(self, StorageKey::Voters, &voters)
    }
}

impl<K: KeyValueStore> ConfigurationSource for K {
    fn get_configuration(&self) -> Result<Option<Configuration>, TallyErrors> {
        read_value(self, StorageKey::Configuration)
    }

    fn save_configuration(&mut self, configuration: &Configuration) -> Result<(), TallyErrors> {
        write_value(self, StorageKey::Configuration, configuration)
    }
}

impl<K: KeyValueStore> TiebreakerStore for K {
    fn save_tiebreaker_data(&mut self, state: &TiebreakerState) -> Result<(), TallyErrors> {
        write_value(self, StorageKey::Tiebreaker, state)
    }

    fn get_tiebreaker_data(&self) -> Result<Option<TiebreakerState>, TallyErrors> {
        read_value(self, StorageKey::Tiebreaker)
    }

    fn clear_tiebreaker_data(&mut self) -> Result<(), TallyErrors> {
        self.remove(StorageKey::Tiebreaker)
    }
}

// ********* Implementations **********

/// Keeps everything in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<StorageKey, String>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// The sealed content stored under a key.
    pub fn raw(&self, key: StorageKey) -> Option<&str> {
        self.values.get(&key).map(|s| s.as_str())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: StorageKey) -> Result<Option<String>, TallyErrors> {
        Ok(self.values.get(&key).cloned())
    }

    fn set(&mut self, key: StorageKey, value: String) -> Result<(), TallyErrors> {
        self.values.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: StorageKey) -> Result<(), TallyErrors> {
        self.values.remove(&key);
        Ok(())
    }
}

/// Keeps the notifications, mostly for tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    pub messages: Vec<String>,
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use crate::{DelegateRecord, RoundRecord};

    fn sample_state() -> TiebreakerState {
        TiebreakerState {
            confirmed_delegates: vec![DelegateRecord {
                name: "A".to_string(),
                position: 1,
                by_tiebreaker: false,
            }],
            rounds: vec![RoundRecord {
                round_number: 1,
                tied_candidates: names(&["B", "C", "D"]),
                winners_needed: 1,
                ballots: vec![ballot(1, &["B"])],
                results: entries(&[("B", 1), ("C", 1), ("D", 0)]),
                clear_winners: vec![],
                still_tied: names(&["B", "C"]),
                next_winners_needed: 1,
                completed: false,
            }],
            final_delegates: None,
            completed: false,
            current_tied_candidates: names(&["B", "C"]),
            current_winners_needed: 1,
            pending_ballots: vec![ballot(1, &["C"])],
        }
    }

    #[test]
    fn tiebreaker_state_round_trips() {
        let mut store = MemoryStore::new();
        assert!(!store.tiebreaker_exists());
        let state = sample_state();
        store.save_tiebreaker_data(&state).unwrap();
        assert!(store.tiebreaker_exists());
        assert_eq!(store.get_tiebreaker_data().unwrap(), Some(state));
        store.clear_tiebreaker_data().unwrap();
        assert!(!store.tiebreaker_exists());
        assert_eq!(store.get_tiebreaker_data().unwrap(), None);
    }

    #[test]
    fn persisted_shape_uses_camel_case() {
        let sealed = seal(&sample_state()).unwrap();
        let js: JSValue = serde_json::from_str(&sealed).unwrap();
        let data = &js["data"];
        assert!(data["confirmedDelegates"].is_array());
        assert_eq!(data["currentWinnersNeeded"], 1);
        assert_eq!(data["rounds"][0]["roundNumber"], 1);
        assert_eq!(data["confirmedDelegates"][0]["byTiebreaker"], false);
        assert!(data["pendingBallots"][0]["isNull"].is_boolean());
    }

    #[test]
    fn corrupted_state_reads_as_absent() {
        let mut store = MemoryStore::new();
        store
            .set(StorageKey::Tiebreaker, "{not json".to_string())
            .unwrap();
        assert_eq!(store.get_tiebreaker_data().unwrap(), None);
        assert!(!store.tiebreaker_exists());

        let sealed = seal(&sample_state()).unwrap().replace("\"B\"", "\"Z\"");
        store.set(StorageKey::Tiebreaker, sealed).unwrap();
        assert_eq!(store.get_tiebreaker_data().unwrap(), None);
    }

    #[test]
    fn missing_lists_read_as_empty() {
        let store = MemoryStore::new();
        assert!(store.get_all_ballots().unwrap().is_empty());
        assert!(store.get_all_voters().unwrap().is_empty());
        assert_eq!(store.get_configuration().unwrap(), None);
        assert_eq!(store.delegates().unwrap(), 0);
    }

    #[test]
    fn recording_notifier_keeps_messages() {
        let mut n = RecordingNotifier::default();
        n.notify("hello");
        assert_eq!(n.messages, vec!["hello".to_string()]);
    }
}
