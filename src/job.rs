use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CleanserError, Result};

/// Stages of one video job, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Detecting,
    Masking,
    Extracting,
    Repairing,
    Reassembling,
    Finalizing,
    Succeeded,
    Failed,
}

impl PipelineStage {
    /// Successor on the happy path, `None` for terminal stages
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Detecting => Some(Self::Masking),
            Self::Masking => Some(Self::Extracting),
            Self::Extracting => Some(Self::Repairing),
            Self::Repairing => Some(Self::Reassembling),
            Self::Reassembling => Some(Self::Finalizing),
            Self::Finalizing => Some(Self::Succeeded),
            Self::Succeeded | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detecting => "detecting",
            Self::Masking => "masking",
            Self::Extracting => "extracting",
            Self::Repairing => "repairing",
            Self::Reassembling => "reassembling",
            Self::Finalizing => "finalizing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One frame to repair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTask {
    /// 0-based position in the video
    pub index: usize,
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// A frame written back by the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairedFrame {
    pub index: usize,
    pub path: PathBuf,
}

/// Pair every extracted frame with a destination of the same name under `restored_dir`
pub fn build_frame_tasks(frames: &[PathBuf], restored_dir: &Path) -> Result<Vec<FrameTask>> {
    frames
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let name = source.file_name().ok_or_else(|| {
                CleanserError::Media(format!("Frame path without file name: {}", source.display()))
            })?;
            Ok(FrameTask {
                index,
                source: source.clone(),
                destination: restored_dir.join(name),
            })
        })
        .collect()
}

/// Terminal result of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded {
        output: PathBuf,
    },
    Failed {
        stage: PipelineStage,
        reason: String,
        kind: &'static str,
    },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Failed { kind, .. } if *kind == "cancelled")
    }
}

/// Per-job working directory, removed when dropped
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    removed: bool,
}

impl WorkDir {
    /// Create `<parent>/<stem>-<id>`
    pub async fn create(parent: &Path, stem: &str, id: Uuid) -> Result<Self> {
        let path = parent.join(format!("{}-{}", stem, id));
        tokio::fs::create_dir_all(&path).await?;
        debug!("Created work directory {}", path.display());
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join<P: AsRef<Path>>(&self, child: P) -> PathBuf {
        self.path.join(child)
    }

    /// Remove the directory now, reporting failures instead of swallowing them in `Drop`
    pub async fn cleanup(mut self) -> Result<()> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                debug!("Removed work directory {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove work directory {}: {}", self.path.display(), e);
            }
        }
    }
}

/// State of one video moving through the pipeline
#[derive(Debug)]
pub struct VideoJob {
    pub id: Uuid,
    pub input: PathBuf,
    pub work_dir: WorkDir,
    stage: PipelineStage,
    pub frames: Vec<FrameTask>,
}

impl VideoJob {
    pub fn new(id: Uuid, input: PathBuf, work_dir: WorkDir) -> Self {
        Self {
            id,
            input,
            work_dir,
            stage: PipelineStage::Detecting,
            frames: Vec::new(),
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Move to `to`, which must be the direct successor of the current stage
    pub fn advance(&mut self, to: PipelineStage) -> Result<()> {
        if self.stage.next() != Some(to) {
            return Err(CleanserError::Queue(format!(
                "Job {} cannot move from {} to {}",
                self.id, self.stage, to
            )));
        }
        info!("Job {} [{}] {} -> {}", self.id, self.file_name(), self.stage, to);
        self.stage = to;
        Ok(())
    }

    /// Jump to `Failed`, returning the stage the failure happened in
    pub fn fail(&mut self) -> PipelineStage {
        let failed_at = self.stage;
        self.stage = PipelineStage::Failed;
        failed_at
    }

    pub fn file_name(&self) -> String {
        self.input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input.display().to_string())
    }
}
