// The workspace directory, one file per storage key.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use delegate_tally::impact::tiebreaker_key;
use delegate_tally::store::{KeyValueStore, StorageKey, TiebreakerStore};
use delegate_tally::TallyErrors;

use crate::scrutiny::*;

const UNLOCK_FLAG: &str = "ballots.unlocked";

fn file_name(key: StorageKey) -> &'static str {
    match key {
        StorageKey::Voters => "voters.json",
        StorageKey::Configuration => "configuration.json",
        StorageKey::Ballots => "ballots.json",
        StorageKey::Tiebreaker => "tiebreaker.json",
        StorageKey::Backup => "backup.json",
    }
}

fn storage_error(path: &Path, e: std::io::Error) -> TallyErrors {
    TallyErrors::Storage(format!("{}: {}", path.display(), e))
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens the workspace, creating the directory if needed.
    pub fn open(root: &str) -> TallyCliResult<FileStore> {
        fs::create_dir_all(root).context(IoSnafu {
            path: root.to_string(),
        })?;
        debug!("FileStore::open: workspace: {:?}", root);
        Ok(FileStore {
            root: PathBuf::from(root),
        })
    }

    fn path(&self, key: StorageKey) -> PathBuf {
        self.root.join(file_name(key))
    }

    /// Whether the cast ballots were unlocked for the tiebreaker currently stored.
    ///
    /// The flag holds the key of the tiebreaker it was set for, any other tiebreaker is locked.
    pub fn is_unlocked(&self) -> TallyCliResult<bool> {
        let p = self.root.join(UNLOCK_FLAG);
        let flag = match fs::read_to_string(&p) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(e).context(IoSnafu {
                    path: p.display().to_string(),
                })
            }
        };
        let state = self.get_tiebreaker_data().context(TallySnafu {})?;
        Ok(state.map_or(false, |s| tiebreaker_key(&s) == flag.trim()))
    }

    pub fn set_unlocked(&mut self, unlocked: bool) -> TallyCliResult<()> {
        let p = self.root.join(UNLOCK_FLAG);
        let res = if unlocked {
            let state = self
                .get_tiebreaker_data()
                .context(TallySnafu {})?
                .ok_or(TallyErrors::NoTiebreaker)
                .context(TallySnafu {})?;
            fs::write(&p, tiebreaker_key(&state))
        } else {
            match fs::remove_file(&p) {
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                x => x,
            }
        };
        res.context(IoSnafu {
            path: p.display().to_string(),
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: StorageKey) -> Result<Option<String>, TallyErrors> {
        let p = self.path(key);
        match fs::read_to_string(&p) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(&p, e)),
        }
    }

    /// Writes the whole value to a temporary file first, so that a reader never sees half of it.
    fn set(&mut self, key: StorageKey, value: String) -> Result<(), TallyErrors> {
        let p = self.path(key);
        let tmp = p.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(|e| storage_error(&tmp, e))?;
        fs::rename(&tmp, &p).map_err(|e| storage_error(&p, e))
    }

    fn remove(&mut self, key: StorageKey) -> Result<(), TallyErrors> {
        let p = self.path(key);
        match fs::remove_file(&p) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(&p, e)),
        }
    }
}
