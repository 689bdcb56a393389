use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{CleanserError, Result};
use crate::executor::FrameRepairExecutor;
use crate::inpaint::{HttpInpaintClient, InpaintClient};
use crate::job::{FrameTask, JobOutcome, PipelineStage, VideoJob, WorkDir, build_frame_tasks};
use crate::mask::{Detection, MaskDetector};
use crate::media::{MediaAdapter, MediaAdapterFactory, MediaInfo};
use crate::status::StatusBoard;

// Typed hand-offs between stages

struct Masked {
    info: MediaInfo,
    mask_png: Arc<Vec<u8>>,
}

struct Extracted {
    info: MediaInfo,
    mask_png: Arc<Vec<u8>>,
    audio: Option<PathBuf>,
    restored_dir: PathBuf,
}

struct Repaired {
    info: MediaInfo,
    audio: Option<PathBuf>,
    restored_dir: PathBuf,
}

struct Reassembled {
    staged_output: PathBuf,
}

/// Drives one video through detect, mask, extract, repair, reassemble and finalize
pub struct VideoProcessor {
    config: Config,
    media: Arc<dyn MediaAdapter>,
    inpaint: Arc<dyn InpaintClient>,
    detector: MaskDetector,
    executor: FrameRepairExecutor,
    status: StatusBoard,
    show_progress: bool,
}

impl VideoProcessor {
    pub fn new(
        config: Config,
        media: Arc<dyn MediaAdapter>,
        inpaint: Arc<dyn InpaintClient>,
        status: StatusBoard,
    ) -> Self {
        let detector = MaskDetector::new(media.clone(), config.mask.clone());
        let executor = FrameRepairExecutor::new(inpaint.clone(), &config.inpaint);

        Self {
            config,
            media,
            inpaint,
            detector,
            executor,
            status,
            show_progress: false,
        }
    }

    /// Build a processor backed by ffmpeg and the HTTP inpainting client
    pub fn from_config(config: Config, status: StatusBoard) -> Result<Self> {
        let media = MediaAdapterFactory::create_adapter(config.media.clone());
        let inpaint: Arc<dyn InpaintClient> = Arc::new(HttpInpaintClient::new(&config.inpaint)?);
        Ok(Self::new(config, media, inpaint, status))
    }

    /// Show a frame progress bar while repairing
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn media(&self) -> Arc<dyn MediaAdapter> {
        self.media.clone()
    }

    pub fn inpaint(&self) -> Arc<dyn InpaintClient> {
        self.inpaint.clone()
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    /// Process one video to a terminal outcome
    ///
    /// On success the cleaned video is in the output directory and the input
    /// is deleted. On failure the input is left untouched and nothing is left
    /// in the output or temp directories.
    pub async fn process(&self, input: &Path, cancel: &CancellationToken) -> JobOutcome {
        let id = Uuid::new_v4();
        self.status.job_started(id, input);
        info!("Job {} started for {}", id, input.display());

        let outcome = match self.start_job(id, input).await {
            Ok(mut job) => {
                let result = self.run_stages(&mut job, cancel).await;
                let failed_at = result.is_err().then(|| job.fail());

                let VideoJob { work_dir, .. } = job;
                if let Err(e) = work_dir.cleanup().await {
                    warn!("Job {}: failed to remove work directory: {}", id, e);
                }

                match (result, failed_at) {
                    (Ok(output), _) => JobOutcome::Succeeded { output },
                    (Err(e), stage) => Self::failed(stage.unwrap_or(PipelineStage::Detecting), e),
                }
            }
            Err(e) => Self::failed(PipelineStage::Detecting, e),
        };

        match &outcome {
            JobOutcome::Succeeded { output } => {
                info!("Job {} succeeded: {} -> {}", id, input.display(), output.display());
            }
            JobOutcome::Failed { stage, reason, .. } if outcome.is_cancelled() => {
                warn!("Job {} cancelled during {}: {}", id, stage, reason);
            }
            JobOutcome::Failed { stage, reason, kind } => {
                error!("Job {} failed during {} ({}): {}", id, stage, kind, reason);
            }
        }

        self.status.job_finished(&outcome);
        outcome
    }

    fn failed(stage: PipelineStage, e: CleanserError) -> JobOutcome {
        JobOutcome::Failed {
            stage,
            reason: e.to_string(),
            kind: e.kind(),
        }
    }

    async fn start_job(&self, id: Uuid, input: &Path) -> Result<VideoJob> {
        let metadata = fs::metadata(input)
            .await
            .map_err(|_| CleanserError::FileNotFound(input.display().to_string()))?;
        if !metadata.is_file() {
            return Err(CleanserError::FileNotFound(input.display().to_string()));
        }

        let stem = Self::file_stem(input)?;
        let work_dir = WorkDir::create(&self.config.paths.temp_dir, &stem, id).await?;
        Ok(VideoJob::new(id, input.to_path_buf(), work_dir))
    }

    async fn run_stages(&self, job: &mut VideoJob, cancel: &CancellationToken) -> Result<PathBuf> {
        let detection = self.detect_stage(job, cancel).await?;

        self.enter(job, PipelineStage::Masking, cancel)?;
        let masked = self.mask_stage(job, detection).await?;

        self.enter(job, PipelineStage::Extracting, cancel)?;
        let extracted = self.extract_stage(job, masked, cancel).await?;

        self.enter(job, PipelineStage::Repairing, cancel)?;
        let repaired = self.repair_stage(job, extracted, cancel).await?;

        self.enter(job, PipelineStage::Reassembling, cancel)?;
        let reassembled = self.reassemble_stage(job, repaired, cancel).await?;

        // Finalizing commits the output and is not interrupted
        self.enter(job, PipelineStage::Finalizing, cancel)?;
        let output = self.finalize_stage(job, reassembled).await?;

        job.advance(PipelineStage::Succeeded)?;
        self.status.stage_changed(PipelineStage::Succeeded);
        Ok(output)
    }

    fn enter(&self, job: &mut VideoJob, stage: PipelineStage, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(CleanserError::Cancelled);
        }
        job.advance(stage)?;
        self.status.stage_changed(stage);
        Ok(())
    }

    async fn detect_stage(&self, job: &VideoJob, cancel: &CancellationToken) -> Result<Detection> {
        let sample_dir = job.work_dir.join("samples");
        cancellable(cancel, self.detector.detect(&job.input, &sample_dir)).await
    }

    async fn mask_stage(&self, job: &VideoJob, detection: Detection) -> Result<Masked> {
        let Detection { info, mask } = detection;

        if mask.repair_pixel_count() == 0 {
            return Err(CleanserError::Detection("Repair mask is empty".to_string()));
        }

        let mask_png = mask.to_png()?;
        let mask_path = job.work_dir.join("mask.png");
        fs::write(&mask_path, &mask_png).await?;
        debug!(
            "Mask {}x{} with {} repair pixels written to {}",
            mask.width(),
            mask.height(),
            mask.repair_pixel_count(),
            mask_path.display()
        );

        Ok(Masked {
            info,
            mask_png: Arc::new(mask_png),
        })
    }

    async fn extract_stage(
        &self,
        job: &mut VideoJob,
        masked: Masked,
        cancel: &CancellationToken,
    ) -> Result<Extracted> {
        let Masked { info, mask_png } = masked;
        let frame_dir = job.work_dir.join("frames");
        let restored_dir = job.work_dir.join("restored");

        let frames = cancellable(cancel, self.media.extract_frames(&job.input, &info, &frame_dir)).await?;
        let audio = cancellable(cancel, self.media.extract_audio(&job.input, &info, job.work_dir.path())).await?;

        fs::create_dir_all(&restored_dir).await?;
        job.frames = build_frame_tasks(&frames, &restored_dir)?;
        info!("Job {}: {} frames to repair", job.id, job.frames.len());

        Ok(Extracted {
            info,
            mask_png,
            audio,
            restored_dir,
        })
    }

    async fn repair_stage(
        &self,
        job: &VideoJob,
        extracted: Extracted,
        cancel: &CancellationToken,
    ) -> Result<Repaired> {
        let Extracted {
            info,
            mask_png,
            audio,
            restored_dir,
        } = extracted;
        let tasks: Vec<FrameTask> = job.frames.clone();

        let progress = self.progress_bar(tasks.len() as u64);
        let result = self.executor
            .repair_all(tasks, mask_png, Some((info.width, info.height)), cancel, &progress)
            .await;
        progress.finish_and_clear();

        let repaired = result?;
        info!(
            "Job {}: repaired {} frames with {} workers",
            job.id,
            repaired.len(),
            self.executor.concurrency()
        );

        Ok(Repaired {
            info,
            audio,
            restored_dir,
        })
    }

    async fn reassemble_stage(
        &self,
        job: &VideoJob,
        repaired: Repaired,
        cancel: &CancellationToken,
    ) -> Result<Reassembled> {
        let staged_output = job.work_dir.join(format!("output.{}", self.output_extension()));
        let staged_output = cancellable(
            cancel,
            self.media.mux(
                &repaired.restored_dir,
                repaired.audio.as_deref(),
                repaired.info.frame_rate,
                &staged_output,
            ),
        )
        .await?;

        Ok(Reassembled { staged_output })
    }

    async fn finalize_stage(&self, job: &VideoJob, reassembled: Reassembled) -> Result<PathBuf> {
        let preferred = self.output_path_for(&job.input)?;
        if let Some(parent) = preferred.parent() {
            fs::create_dir_all(parent).await?;
        }
        let output = unclaimed_path(&preferred).await?;
        if output != preferred {
            warn!(
                "{} already exists, writing {} instead",
                preferred.display(),
                output.display()
            );
        }

        if let Err(e) = move_file(&reassembled.staged_output, &output).await {
            if fs::remove_file(&output).await.is_ok() {
                debug!("Removed partial output {}", output.display());
            }
            return Err(e);
        }

        if let Err(e) = fs::remove_file(&job.input).await {
            warn!("Output committed but input {} could not be removed: {}", job.input.display(), e);
        }

        Ok(output)
    }

    /// `<output_dir>/<subdir relative to input_dir>/<stem><suffix>.<ext>`
    pub fn output_path_for(&self, input: &Path) -> Result<PathBuf> {
        let paths = &self.config.paths;
        let stem = Self::file_stem(input)?;
        let file_name = format!("{}{}.{}", stem, paths.output_suffix, self.output_extension());

        let input_root = std::fs::canonicalize(&paths.input_dir).unwrap_or_else(|_| paths.input_dir.clone());
        let parent = input.parent().unwrap_or_else(|| Path::new(""));
        let parent = std::fs::canonicalize(parent).unwrap_or_else(|_| parent.to_path_buf());

        let relative = pathdiff::diff_paths(&parent, &input_root)
            .filter(|rel| rel.components().all(|c| matches!(c, Component::Normal(_))))
            .unwrap_or_default();

        Ok(paths.output_dir.join(relative).join(file_name))
    }

    fn output_extension(&self) -> &str {
        self.config.paths.output_extension.trim_start_matches('.')
    }

    fn file_stem(input: &Path) -> Result<String> {
        input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CleanserError::Config(format!("Invalid video filename: {}", input.display())))
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames ({eta})")
        {
            progress.set_style(style.progress_chars("#>-"));
        }
        progress
    }
}

/// Run `future` unless `cancel` fires first; dropping the future kills any child process
async fn cancellable<T>(cancel: &CancellationToken, future: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CleanserError::Cancelled),
        result = future => result,
    }
}

/// `path` if free, else the first free `<stem>_<n>.<ext>` beside it
async fn unclaimed_path(path: &Path) -> Result<PathBuf> {
    if !fs::try_exists(path).await? {
        return Ok(path.to_path_buf());
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let extension = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();

    let mut n = 1u32;
    loop {
        let candidate = parent.join(format!("{}_{}{}", stem, n, extension));
        if !fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Rename, falling back to copy + delete across filesystems
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!("Rename {} -> {} failed ({}), copying", from.display(), to.display(), e);
            fs::copy(from, to).await?;
            fs::remove_file(from).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::Rect;
    use crate::testing::{StubInpaint, StubMedia, frame_png, media_info, test_config};
    use std::time::Duration;

    fn is_empty_dir(path: &Path) -> bool {
        !path.exists() || std::fs::read_dir(path).unwrap().next().is_none()
    }

    fn processor(config: Config, media: StubMedia, inpaint: StubInpaint) -> VideoProcessor {
        VideoProcessor::new(config, Arc::new(media), Arc::new(inpaint), StatusBoard::new())
    }

    #[tokio::test]
    async fn test_scenario_black_inpainter_cleans_video() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let input = config.paths.input_dir.join("clip.mp4");
        std::fs::write(&input, b"source video").unwrap();

        let media = StubMedia::new(media_info(640, 360, 10.0, 30), 30)
            .with_patch(Rect::new(0, 0, 128, 36));
        let processor = processor(config.clone(), media, StubInpaint::black(640, 360));

        let outcome = processor.process(&input, &CancellationToken::new()).await;

        let expected = config.paths.output_dir.join("clip_cleaned.mp4");
        assert_eq!(outcome, JobOutcome::Succeeded { output: expected.clone() });
        let manifest = std::fs::read_to_string(&expected).unwrap();
        assert!(manifest.contains("frames=30"));
        assert!(manifest.contains("size=640x360"));
        assert!(manifest.contains("duration_secs=1.000"));
        assert!(manifest.contains("all_black=true"));
        assert!(!input.exists());
        assert!(is_empty_dir(&config.paths.temp_dir));
        assert_eq!(processor.status().snapshot(false, 0).jobs_succeeded, 1);
    }

    #[tokio::test]
    async fn test_scenario_server_error_on_frame_three_fails_job() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let input = config.paths.input_dir.join("clip.mp4");
        std::fs::write(&input, b"source video").unwrap();

        let patch = Rect::new(0, 0, 13, 4);
        let media = StubMedia::new(media_info(64, 36, 2.0, 10), 20).with_patch(patch);
        let inpaint = StubInpaint::black(64, 36)
            .with_delay(Duration::from_millis(5))
            .failing_on(frame_png(64, 36, 3, Some(patch)));
        let processor = processor(config.clone(), media, inpaint);

        let outcome = processor.process(&input, &CancellationToken::new()).await;

        match outcome {
            JobOutcome::Failed { stage, kind, .. } => {
                assert_eq!(stage, PipelineStage::Repairing);
                assert_eq!(kind, "inpaint");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(std::fs::read(&input).unwrap(), b"source video");
        assert!(is_empty_dir(&config.paths.output_dir));
        assert!(is_empty_dir(&config.paths.temp_dir));
        assert_eq!(processor.status().snapshot(false, 0).jobs_failed, 1);
    }

    #[tokio::test]
    async fn test_output_keeps_relative_subdirectory() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let nested = config.paths.input_dir.join("season1");
        std::fs::create_dir_all(&nested).unwrap();
        let input = nested.join("ep01.mp4");
        std::fs::write(&input, b"source video").unwrap();

        let media = StubMedia::new(media_info(32, 18, 1.0, 5), 3);
        let processor = processor(config.clone(), media, StubInpaint::black(32, 18));

        let outcome = processor.process(&input, &CancellationToken::new()).await;
        assert_eq!(
            outcome,
            JobOutcome::Succeeded {
                output: config.paths.output_dir.join("season1").join("ep01_cleaned.mp4"),
            }
        );
    }

    #[tokio::test]
    async fn test_same_stem_inputs_get_distinct_outputs() {
        let root = tempfile::tempdir().unwrap();
        let mut config = test_config(root.path());
        config.watch.extensions = vec!["mp4".to_string(), "mov".to_string()];
        let first = config.paths.input_dir.join("clip.mp4");
        let second = config.paths.input_dir.join("clip.mov");
        std::fs::write(&first, b"first").unwrap();
        std::fs::write(&second, b"second").unwrap();

        let media = StubMedia::new(media_info(32, 18, 1.0, 5), 3);
        let processor = processor(config.clone(), media, StubInpaint::black(32, 18));
        let cancel = CancellationToken::new();

        let out_dir = &config.paths.output_dir;
        assert_eq!(
            processor.process(&first, &cancel).await,
            JobOutcome::Succeeded { output: out_dir.join("clip_cleaned.mp4") }
        );
        let first_output = std::fs::read(out_dir.join("clip_cleaned.mp4")).unwrap();

        assert_eq!(
            processor.process(&second, &cancel).await,
            JobOutcome::Succeeded { output: out_dir.join("clip_cleaned_1.mp4") }
        );
        assert_eq!(std::fs::read_dir(out_dir).unwrap().count(), 2);
        assert_eq!(std::fs::read(out_dir.join("clip_cleaned.mp4")).unwrap(), first_output);
        assert!(!first.exists());
        assert!(!second.exists());
    }

    #[tokio::test]
    async fn test_mux_failure_fails_in_reassembling() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let input = config.paths.input_dir.join("clip.mp4");
        std::fs::write(&input, b"source video").unwrap();

        let media = StubMedia::new(media_info(32, 18, 1.0, 5), 3).failing_mux();
        let processor = processor(config.clone(), media, StubInpaint::black(32, 18));

        let outcome = processor.process(&input, &CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed { stage: PipelineStage::Reassembling, kind: "media", .. }
        ));
        assert_eq!(std::fs::read(&input).unwrap(), b"source video");
        assert!(is_empty_dir(&config.paths.output_dir));
        assert!(is_empty_dir(&config.paths.temp_dir));
    }

    #[tokio::test]
    async fn test_probe_failure_fails_in_detecting() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let input = config.paths.input_dir.join("broken.mp4");
        std::fs::write(&input, b"not a video").unwrap();

        let media = StubMedia::new(media_info(32, 18, 1.0, 5), 3).failing_probe();
        let processor = processor(config.clone(), media, StubInpaint::black(32, 18));

        let outcome = processor.process(&input, &CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed { stage: PipelineStage::Detecting, kind: "media", .. }
        ));
        assert!(input.exists());
        assert!(is_empty_dir(&config.paths.temp_dir));
    }

    #[tokio::test]
    async fn test_missing_input_fails_without_work_dir() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let media = StubMedia::new(media_info(32, 18, 1.0, 5), 3);
        let processor = processor(config.clone(), media, StubInpaint::black(32, 18));

        let outcome = processor
            .process(&config.paths.input_dir.join("gone.mp4"), &CancellationToken::new())
            .await;
        assert!(matches!(outcome, JobOutcome::Failed { kind: "file_not_found", .. }));
        assert!(is_empty_dir(&config.paths.temp_dir));
    }

    #[tokio::test]
    async fn test_cancelled_job_leaves_input() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let input = config.paths.input_dir.join("clip.mp4");
        std::fs::write(&input, b"source video").unwrap();

        let media = StubMedia::new(media_info(32, 18, 1.0, 5), 3);
        let processor = processor(config.clone(), media, StubInpaint::black(32, 18));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = processor.process(&input, &cancel).await;
        assert!(outcome.is_cancelled());
        assert!(input.exists());
        assert!(is_empty_dir(&config.paths.output_dir));
        assert!(is_empty_dir(&config.paths.temp_dir));
    }
}
