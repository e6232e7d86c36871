use crate::error::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Last successful build of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCacheState {
    pub service: String,
    pub fingerprint: String,
    pub last_built_at: DateTime<Utc>,
}

/// One JSON record per service under `<state_dir>/cache/`.
///
/// Writes go through a temp file and a rename so a crash never leaves a
/// half-written record; concurrent writers for the same service are last-writer-wins.
#[derive(Debug, Clone)]
pub struct BuildCacheStore {
    dir: PathBuf,
}

impl BuildCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, service: &str) -> PathBuf {
        let safe_name = service.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{}.json", safe_name))
    }

    pub fn load(&self, service: &str) -> Result<Option<BuildCacheState>, CacheError> {
        let path = self.record_path(service);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Store { path, source }),
        };

        let state: BuildCacheState =
            serde_json::from_str(&content).map_err(|e| CacheError::Corrupt {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if state.service != service {
            return Err(CacheError::Corrupt {
                path,
                message: format!("record belongs to '{}'", state.service),
            });
        }
        Ok(Some(state))
    }

    pub fn save(&self, state: &BuildCacheState) -> Result<(), CacheError> {
        let path = self.record_path(&state.service);
        fs::create_dir_all(&self.dir).map_err(|source| CacheError::Store {
            path: self.dir.clone(),
            source,
        })?;

        let json = serde_json::to_string_pretty(state).map_err(|e| CacheError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
        fs::write(&tmp, json)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|source| CacheError::Store {
                path: path.clone(),
                source,
            })?;

        debug!(service = %state.service, record = %path.display(), "Saved build cache state");
        Ok(())
    }

    /// Returns whether a record existed.
    pub fn remove(&self, service: &str) -> Result<bool, CacheError> {
        let path = self.record_path(service);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Store { path, source }),
        }
    }

    /// All readable records, sorted by service; corrupt files are skipped.
    pub fn list(&self) -> Result<Vec<BuildCacheState>, CacheError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CacheError::Store {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut states: Vec<BuildCacheState> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .filter_map(|p| fs::read_to_string(&p).ok())
            .filter_map(|c| serde_json::from_str(&c).ok())
            .collect();
        states.sort_by(|a, b| a.service.cmp(&b.service));
        Ok(states)
    }

    /// Drops every record; returns how many were removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for state in self.list()? {
            if self.remove(&state.service)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
