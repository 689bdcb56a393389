use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{CleanserError, Result};
use crate::job::{JobOutcome, PipelineStage};

/// The job currently owned by the processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveJob {
    pub job_id: Uuid,
    pub input: PathBuf,
    pub stage: PipelineStage,
    pub started_at: DateTime<Utc>,
}

/// Point-in-time view written to `status.json` by the running watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub pid: u32,
    pub queue_depth: usize,
    pub active: Option<ActiveJob>,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Replace the file atomically so readers never see a partial write
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CleanserError::FileNotFound(format!(
                "{} (is the watcher running?)",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Human-readable form for the `status` command
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("Watcher:      {}", if self.running { "running" } else { "stopped" }),
            format!("PID:          {}", self.pid),
            format!("Queue depth:  {}", self.queue_depth),
        ];
        match &self.active {
            Some(job) => {
                lines.push(format!("Active job:   {}", job.input.display()));
                lines.push(format!("  Stage:      {}", job.stage));
                lines.push(format!("  Started:    {}", job.started_at.format("%Y-%m-%d %H:%M:%S UTC")));
            }
            None => lines.push("Active job:   none".to_string()),
        }
        lines.push(format!("Succeeded:    {}", self.jobs_succeeded));
        lines.push(format!("Failed:       {}", self.jobs_failed));
        if let Some(error) = &self.last_error {
            lines.push(format!("Last error:   {}", error));
        }
        lines.push(format!("Updated:      {}", self.updated_at.format("%Y-%m-%d %H:%M:%S UTC")));
        lines.join("\n")
    }
}

#[derive(Debug, Default)]
struct BoardState {
    active: Option<ActiveJob>,
    succeeded: u64,
    failed: u64,
    last_error: Option<String>,
}

/// Shared progress record updated by the processor and read by the status publisher
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<BoardState>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn job_started(&self, job_id: Uuid, input: &Path) {
        self.state().active = Some(ActiveJob {
            job_id,
            input: input.to_path_buf(),
            stage: PipelineStage::Detecting,
            started_at: Utc::now(),
        });
    }

    pub fn stage_changed(&self, stage: PipelineStage) {
        if let Some(job) = self.state().active.as_mut() {
            job.stage = stage;
        }
    }

    /// Clear the active job; cancelled jobs are not counted
    pub fn job_finished(&self, outcome: &JobOutcome) {
        let mut state = self.state();
        state.active = None;
        match outcome {
            JobOutcome::Succeeded { .. } => state.succeeded += 1,
            JobOutcome::Failed { .. } if outcome.is_cancelled() => {}
            JobOutcome::Failed { stage, reason, .. } => {
                state.failed += 1;
                state.last_error = Some(format!("{}: {}", stage, reason));
            }
        }
    }

    pub fn active(&self) -> Option<ActiveJob> {
        self.state().active.clone()
    }

    pub fn snapshot(&self, running: bool, queue_depth: usize) -> StatusSnapshot {
        let state = self.state();
        StatusSnapshot {
            running,
            pid: std::process::id(),
            queue_depth,
            active: state.active.clone(),
            jobs_succeeded: state.succeeded,
            jobs_failed: state.failed,
            last_error: state.last_error.clone(),
            updated_at: Utc::now(),
        }
    }
}
