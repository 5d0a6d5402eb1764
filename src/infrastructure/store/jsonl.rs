//! JSON-lines pipeline store
//!
//! Layout under the store directory:
//! - `runs/<run_id>.jsonl`: one record per log entry or status change
//! - `suggestions.jsonl`: one suggestion per line

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::models::{ImprovementSuggestion, RunStatus, StepLog, SuggestionStatus};
use crate::domain::ports::{PersistenceError, PipelineStore};

/// One line of a run file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunRecord {
    Entry { entry: StepLog },
    Status {
        status: RunStatus,
        timestamp: DateTime<Utc>,
    },
}

pub struct JsonlStore {
    root: PathBuf,
    /// Serializes writers; the files are append-only except for reviews.
    write_lock: Mutex<()>,
}

impl JsonlStore {
    /// Open a store rooted at `root`, creating its directories
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("runs")).await?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_path(&self, run_id: Uuid) -> PathBuf {
        self.root.join("runs").join(format!("{run_id}.jsonl"))
    }

    fn suggestions_path(&self) -> PathBuf {
        self.root.join("suggestions.jsonl")
    }

    async fn append_line<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_lines<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, PersistenceError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(PersistenceError::from))
            .collect()
    }

    /// All records of a run, in write order
    pub async fn read_run(&self, run_id: Uuid) -> Result<Vec<RunRecord>, PersistenceError> {
        Self::read_lines(&self.run_path(run_id)).await
    }

    pub async fn suggestions(&self) -> Result<Vec<ImprovementSuggestion>, PersistenceError> {
        Self::read_lines(&self.suggestions_path()).await
    }
}

#[async_trait]
impl PipelineStore for JsonlStore {
    async fn append_log_entry(&self, run_id: Uuid, entry: &StepLog) -> Result<(), PersistenceError> {
        let record = RunRecord::Entry {
            entry: entry.clone(),
        };
        self.append_line(&self.run_path(run_id), &record).await
    }

    async fn save_suggestion(&self, suggestion: &ImprovementSuggestion) -> Result<(), PersistenceError> {
        self.append_line(&self.suggestions_path(), suggestion).await
    }

    async fn update_run_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), PersistenceError> {
        let record = RunRecord::Status {
            status,
            timestamp: Utc::now(),
        };
        self.append_line(&self.run_path(run_id), &record).await
    }

    async fn update_suggestion_status(
        &self,
        id: Uuid,
        status: SuggestionStatus,
    ) -> Result<(), PersistenceError> {
        let path = self.suggestions_path();
        let _guard = self.write_lock.lock().await;

        let mut suggestions: Vec<ImprovementSuggestion> = Self::read_lines(&path).await?;
        let suggestion = suggestions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(PersistenceError::SuggestionNotFound(id))?;
        suggestion.status = status;

        let mut content = String::new();
        for suggestion in &suggestions {
            content.push_str(&serde_json::to_string(suggestion)?);
            content.push('\n');
        }
        let staging = path.with_extension("jsonl.tmp");
        fs::write(&staging, content).await?;
        fs::rename(&staging, &path).await?;
        Ok(())
    }
}
