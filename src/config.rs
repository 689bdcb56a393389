use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CleanserError, Result};
use crate::mask::Corner;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub watch: WatchConfig,
    pub mask: MaskConfig,
    pub inpaint: InpaintConfig,
    pub media: MediaConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory scanned for new videos
    pub input_dir: PathBuf,
    /// Directory receiving cleaned videos
    pub output_dir: PathBuf,
    /// Parent of the per-job working directories
    pub temp_dir: PathBuf,
    /// Logs and the status file live here
    pub state_dir: PathBuf,
    /// Appended to the source file stem when naming the output
    pub output_suffix: String,
    /// Container extension of the output file
    pub output_extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Delay between two scans of the input directory
    pub poll_interval_ms: u64,
    /// File extensions (without dot) that qualify as videos
    pub extensions: Vec<String>,
    /// Consecutive scan failures before an operator alarm is raised
    pub alarm_after_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// Number of frames sampled across the video for detection
    pub sample_frames: usize,
    /// Watermark width as a fraction of the frame width
    pub width_ratio: f64,
    /// Watermark height as a fraction of the frame height
    pub height_ratio: f64,
    /// Corners that carry a watermark
    pub corners: CornerMode,
    /// Extra pixels added around each corner rectangle
    pub pad_px: u32,
    /// Upper bound for the area of a single corner rectangle relative to the frame
    pub max_area_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CornerMode {
    /// Top-left corner only
    Lt,
    /// Bottom-right corner only
    Rb,
    /// Both corners, the mask is the union of the two rectangles
    #[serde(alias = "both")]
    LtRb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InpaintConfig {
    /// Inpainting endpoint URL (multipart POST)
    pub endpoint: String,
    /// Maximum number of concurrent frame repairs for one video
    pub workers: usize,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Extra attempts per frame before the frame counts as failed
    pub max_retries: u32,
    /// Pause between two attempts on the same frame
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub ffmpeg_path: String,
    /// Path to ffprobe binary
    pub ffprobe_path: String,
    /// Encoder used when reassembling repaired frames
    pub video_codec: String,
    /// Pixel format of the reassembled video
    pub pixel_format: String,
    /// Encoder used for the audio track of the output
    pub audio_codec: String,
    /// Additional encoding options appended before the output path
    /// Common options: ["-preset", "medium", "-crf", "18"]
    pub encode_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of debug, info, warn, error
    pub level: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("videos_in"),
            output_dir: PathBuf::from("videos_out"),
            temp_dir: PathBuf::from("videos_temp"),
            state_dir: PathBuf::from(".vidcleanser"),
            output_suffix: "_cleaned".to_string(),
            output_extension: "mp4".to_string(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            extensions: vec!["mp4".to_string()],
            alarm_after_failures: 5,
        }
    }
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            sample_frames: 10,
            width_ratio: 0.20,
            height_ratio: 0.10,
            corners: CornerMode::LtRb,
            pad_px: 0,
            max_area_ratio: 0.25,
        }
    }
}

impl Default for InpaintConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/inpaint".to_string(),
            workers: 3,
            timeout_secs: 30,
            max_retries: 0,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            video_codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            audio_codec: "aac".to_string(),
            encode_options: vec![
                // "-preset".to_string(), "medium".to_string(),
                // "-crf".to_string(), "18".to_string(),
            ],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CornerMode {
    pub fn corners(self) -> Vec<Corner> {
        match self {
            Self::Lt => vec![Corner::TopLeft],
            Self::Rb => vec![Corner::BottomRight],
            Self::LtRb => vec![Corner::TopLeft, Corner::BottomRight],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "lt",
            Self::Rb => "rb",
            Self::LtRb => "lt_rb",
        }
    }
}

impl FromStr for CornerMode {
    type Err = CleanserError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lt" | "top-left" => Ok(Self::Lt),
            "rb" | "bottom-right" => Ok(Self::Rb),
            "lt_rb" | "both" => Ok(Self::LtRb),
            _ => Err(CleanserError::Config(format!(
                "Invalid corner mode '{}'. Valid modes: lt, rb, lt_rb",
                s
            ))),
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Case-insensitive extension check
    pub fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.extensions
                    .iter()
                    .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

impl InpaintConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CleanserError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| CleanserError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CleanserError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| CleanserError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let paths = &self.paths;
        if paths.input_dir.as_os_str().is_empty() {
            return Err(CleanserError::Config("paths.input_dir must not be empty".to_string()));
        }
        if paths.output_dir.as_os_str().is_empty() {
            return Err(CleanserError::Config("paths.output_dir must not be empty".to_string()));
        }
        if paths.input_dir == paths.output_dir {
            return Err(CleanserError::Config(
                "paths.input_dir and paths.output_dir must differ".to_string(),
            ));
        }
        if paths.output_extension.trim_start_matches('.').is_empty() {
            return Err(CleanserError::Config("paths.output_extension must not be empty".to_string()));
        }

        if self.watch.poll_interval_ms < 50 {
            return Err(CleanserError::Config("watch.poll_interval_ms must be at least 50".to_string()));
        }
        if self.watch.extensions.is_empty() {
            return Err(CleanserError::Config("watch.extensions must list at least one extension".to_string()));
        }

        let mask = &self.mask;
        if !(2..=100).contains(&mask.sample_frames) {
            return Err(CleanserError::Config("mask.sample_frames must be between 2 and 100".to_string()));
        }
        for (name, ratio) in [("width_ratio", mask.width_ratio), ("height_ratio", mask.height_ratio)] {
            if !(ratio > 0.0 && ratio < 1.0) {
                return Err(CleanserError::Config(format!("mask.{} must be between 0 and 1", name)));
            }
        }
        if !(mask.max_area_ratio > 0.0 && mask.max_area_ratio <= 1.0) {
            return Err(CleanserError::Config("mask.max_area_ratio must be in (0, 1]".to_string()));
        }
        if mask.width_ratio * mask.height_ratio > mask.max_area_ratio {
            return Err(CleanserError::Config(format!(
                "mask area {:.3} exceeds mask.max_area_ratio {:.3}",
                mask.width_ratio * mask.height_ratio,
                mask.max_area_ratio
            )));
        }

        let inpaint = &self.inpaint;
        if !(1..=10).contains(&inpaint.workers) {
            return Err(CleanserError::Config("inpaint.workers must be between 1 and 10".to_string()));
        }
        if inpaint.timeout_secs == 0 {
            return Err(CleanserError::Config("inpaint.timeout_secs must be positive".to_string()));
        }
        if !(inpaint.endpoint.starts_with("http://") || inpaint.endpoint.starts_with("https://")) {
            return Err(CleanserError::Config(format!(
                "inpaint.endpoint must be an http(s) URL, got '{}'",
                inpaint.endpoint
            )));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(CleanserError::Config(format!(
                    "Invalid log level '{}'. Valid levels: trace, debug, info, warn, error",
                    other
                )));
            }
        }

        Ok(())
    }

    /// Status file written by the running watcher
    pub fn status_file(&self) -> PathBuf {
        self.paths.state_dir.join("status.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.paths.state_dir.join("log")
    }
}
