//! Persisted analysis history: a JSON object keyed by
//! `<claimant>_<YYYYMMDDHHMMSS>`, owned by the shell. The scoring pipeline
//! never touches it, and the explanation credential is never written here.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::scoring::{RawClaimRecord, ScoredClaim};

/// One persisted analysis: the raw input, the verdict, and the optional
/// explanation attached after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub entrada: RawClaimRecord,
    pub resultado: ScoredClaim,
    pub explicacion_ia: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("failed to access history file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("an analysis with id '{0}' already exists")]
    Duplicate(String),
}

/// File-backed store with explicit load/append/clear operations. Every
/// mutation is written through immediately; the file is small and the
/// service processes one claim at a time.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    entries: BTreeMap<String, HistoryEntry>,
}

impl HistoryStore {
    /// Opens the store, starting empty when the file is missing, blank, or
    /// unreadable as JSON. A corrupt file is logged and treated as empty
    /// rather than blocking every analysis after it.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(error) => {
                    warn!(path = %path.display(), %error, "history file is corrupt; starting empty");
                    BTreeMap::new()
                }
            },
            Err(error) if error.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(HistoryError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<&HistoryEntry> {
        self.entries.get(id)
    }

    /// Stores a new analysis and returns its identifier.
    pub fn append(
        &mut self,
        claimant: &str,
        recorded_at: NaiveDateTime,
        entry: HistoryEntry,
    ) -> Result<String, HistoryError> {
        let id = format!("{claimant}_{}", recorded_at.format("%Y%m%d%H%M%S"));
        if self.entries.contains_key(&id) {
            return Err(HistoryError::Duplicate(id));
        }
        self.entries.insert(id.clone(), entry);
        self.save()?;
        Ok(id)
    }

    /// Attaches explanation prose to an existing analysis; `false` when the
    /// id is unknown.
    pub fn attach_explanation(&mut self, id: &str, text: String) -> Result<bool, HistoryError> {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.explicacion_ia = Some(text);
                self.save()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn clear(&mut self) -> Result<(), HistoryError> {
        self.entries.clear();
        self.save()
    }

    fn save(&self) -> Result<(), HistoryError> {
        let contents = serde_json::to_string_pretty(&self.entries)
            .expect("history entries always serialize");
        fs::write(&self.path, contents).map_err(|source| HistoryError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }
}
