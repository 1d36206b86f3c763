use std::{fs, io::ErrorKind, path::PathBuf};

use anyhow::{Context, Result};
use chrono::{DurationRound, Local, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

pub const CHECKPOINT_FILE: &str = "last_run.txt";

/// When the last successful incremental run finished.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub timestamp: NaiveDateTime,
}

pub struct CheckpointStore {
    path: PathBuf,
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::new(CHECKPOINT_FILE)
    }
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `None` when no incremental run has completed yet.
    pub fn load(&self) -> Result<Option<NaiveDateTime>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let checkpoint: Checkpoint = serde_json::from_str(&contents)
            .with_context(|| format!("malformed checkpoint in {}", self.path.display()))?;

        Ok(Some(checkpoint.timestamp))
    }

    /// Saves the current local time, to the microsecond, and returns it.
    pub fn save_now(&self) -> Result<NaiveDateTime> {
        let now = Local::now()
            .naive_local()
            .duration_trunc(TimeDelta::microseconds(1))?;
        self.save(now)?;
        Ok(now)
    }

    pub fn save(&self, timestamp: NaiveDateTime) -> Result<()> {
        let contents = serde_json::to_string(&Checkpoint { timestamp })?;
        fs::write(&self.path, contents)
            .with_context(|| format!("writing {}", self.path.display()))
    }
}
