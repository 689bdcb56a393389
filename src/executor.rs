use image::ImageReader;
use indicatif::ProgressBar;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::InpaintConfig;
use crate::error::{CleanserError, Result};
use crate::inpaint::InpaintClient;
use crate::job::{FrameTask, RepairedFrame};

/// Runs inpaint calls for every frame of one video under a concurrency bound
pub struct FrameRepairExecutor {
    client: Arc<dyn InpaintClient>,
    concurrency: usize,
    max_retries: u32,
    retry_delay: Duration,
}

#[derive(Clone)]
struct FrameWorker {
    client: Arc<dyn InpaintClient>,
    mask: Arc<Vec<u8>>,
    expected_dimensions: Option<(u32, u32)>,
    max_retries: u32,
    retry_delay: Duration,
}

impl FrameWorker {
    async fn repair(&self, task: &FrameTask) -> Result<RepairedFrame> {
        let image = tokio::fs::read(&task.source).await?;

        let mut attempt = 0;
        let repaired = loop {
            match self.client.inpaint(image.clone(), self.mask.clone()).await {
                Ok(bytes) => break bytes,
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!("Frame {} attempt {} failed, retrying: {}", task.index, attempt, e);
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        if let Some((width, height)) = self.expected_dimensions {
            let undecodable = |e: String| {
                CleanserError::Inpaint(format!("Frame {} response is not a decodable image: {}", task.index, e))
            };
            let dimensions = ImageReader::new(Cursor::new(&repaired))
                .with_guessed_format()
                .map_err(|e| undecodable(e.to_string()))?
                .into_dimensions()
                .map_err(|e| undecodable(e.to_string()))?;
            if dimensions != (width, height) {
                return Err(CleanserError::Inpaint(format!(
                    "Frame {} came back as {}x{}, expected {}x{}",
                    task.index, dimensions.0, dimensions.1, width, height
                )));
            }
        }

        // Overwrites any earlier attempt at the same frame
        tokio::fs::write(&task.destination, &repaired).await?;
        debug!("Repaired frame {} -> {}", task.index, task.destination.display());

        Ok(RepairedFrame {
            index: task.index,
            path: task.destination.clone(),
        })
    }
}

impl FrameRepairExecutor {
    pub fn new(client: Arc<dyn InpaintClient>, config: &InpaintConfig) -> Self {
        Self::with_limits(client, config.workers, config.max_retries, config.retry_delay())
    }

    pub fn with_limits(
        client: Arc<dyn InpaintClient>,
        concurrency: usize,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            max_retries,
            retry_delay,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Repair every task, returning the frames sorted by index or the first failure
    ///
    /// The first failing frame cancels the remaining work: nothing new is
    /// dispatched and in-flight calls are dropped at their next await point.
    pub async fn repair_all(
        &self,
        tasks: Vec<FrameTask>,
        mask: Arc<Vec<u8>>,
        expected_dimensions: Option<(u32, u32)>,
        cancel: &CancellationToken,
        progress: &ProgressBar,
    ) -> Result<Vec<RepairedFrame>> {
        let total = tasks.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let token = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let worker = FrameWorker {
            client: self.client.clone(),
            mask,
            expected_dimensions,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
        };
        let mut join_set: JoinSet<Result<RepairedFrame>> = JoinSet::new();

        for task in tasks {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let worker = worker.clone();
            let token = token.clone();
            let progress = progress.clone();
            join_set.spawn(async move {
                let _permit = permit;
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(CleanserError::Cancelled),
                    result = worker.repair(&task) => result,
                };
                match &result {
                    Ok(_) => progress.inc(1),
                    Err(e) if !e.is_cancelled() => {
                        error!("Frame {} failed: {}", task.index, e);
                        token.cancel();
                    }
                    Err(_) => {}
                }
                result
            });
        }

        let mut repaired = Vec::with_capacity(total);
        let mut first_error: Option<CleanserError> = None;

        while let Some(joined) = join_set.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => Err(CleanserError::Inpaint(format!("Frame worker panicked: {}", e))),
            };

            match result {
                Ok(frame) => repaired.push(frame),
                Err(e) => {
                    let replace = match &first_error {
                        None => true,
                        Some(current) => current.is_cancelled() && !e.is_cancelled(),
                    };
                    if replace {
                        first_error = Some(e);
                    }
                    token.cancel();
                    join_set.abort_all();
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if repaired.len() != total {
            return Err(CleanserError::Cancelled);
        }

        repaired.sort_by_key(|frame| frame.index);
        Ok(repaired)
    }
}
