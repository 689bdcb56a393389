// Media adapter over the external ffmpeg/ffprobe tools
//
// - Commands: command builders for every invocation the pipeline needs
// - Ffmpeg: the adapter implementation used in production

pub mod commands;
pub mod ffmpeg;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use commands::*;
pub use ffmpeg::*;

use crate::config::MediaConfig;
use crate::error::Result;

/// Rational frame rate as reported by ffprobe (`30000/1001`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Parse `num/den` or a plain number
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let rate = match raw.split_once('/') {
            Some((num, den)) => Self::new(num.trim().parse().ok()?, den.trim().parse().ok()?),
            None => {
                let value: f64 = raw.parse().ok()?;
                Self::new((value * 1000.0).round() as u32, 1000)
            }
        };
        (rate.num > 0 && rate.den > 0).then_some(rate)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Stream metadata needed by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub has_audio: bool,
}

/// Operations the pipeline delegates to the external media tool
#[async_trait]
pub trait MediaAdapter: Send + Sync {
    /// Read duration, resolution, frame rate and audio presence
    async fn probe(&self, video_path: &Path) -> Result<MediaInfo>;

    /// Extract up to `count` frames evenly spaced over the duration
    async fn sample_frames(
        &self,
        video_path: &Path,
        info: &MediaInfo,
        count: usize,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>>;

    /// Extract every frame into `output_dir`, returned in index order
    async fn extract_frames(
        &self,
        video_path: &Path,
        info: &MediaInfo,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>>;

    /// Copy the audio track out, `None` when the video has no audio
    async fn extract_audio(
        &self,
        video_path: &Path,
        info: &MediaInfo,
        output_dir: &Path,
    ) -> Result<Option<PathBuf>>;

    /// Reassemble `%06d.png` frames and optional audio into `output_path`
    async fn mux(
        &self,
        frame_dir: &Path,
        audio_path: Option<&Path>,
        frame_rate: FrameRate,
        output_path: &Path,
    ) -> Result<PathBuf>;

    /// Check that the external tools can be executed
    async fn check_availability(&self) -> Result<()>;
}

/// Factory for creating media adapter instances
pub struct MediaAdapterFactory;

impl MediaAdapterFactory {
    /// Create the default media adapter implementation (FFmpeg-based)
    pub fn create_adapter(config: MediaConfig) -> Arc<dyn MediaAdapter> {
        Arc::new(ffmpeg::FfmpegAdapter::new(config))
    }
}
