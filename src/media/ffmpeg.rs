use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::MediaConfig;
use crate::error::{CleanserError, Result};
use super::{EncodingOptions, FrameRate, MediaAdapter, MediaCommandBuilder, MediaInfo};

/// ffprobe `-of json` output
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse ffprobe JSON into the metadata the pipeline needs
pub fn parse_probe_output(json: &str) -> Result<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| CleanserError::Media(format!("Unreadable ffprobe output: {}", e)))?;

    let video = probe.streams.iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| CleanserError::Media("No video stream found".to_string()))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(CleanserError::Media("Video stream has no resolution".to_string())),
    };

    let frame_rate = video.r_frame_rate.as_deref()
        .and_then(FrameRate::parse)
        .or_else(|| video.avg_frame_rate.as_deref().and_then(FrameRate::parse))
        .ok_or_else(|| CleanserError::Media("Video stream has no frame rate".to_string()))?;

    let duration = probe.format.as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| *d > 0.0)
        .ok_or_else(|| CleanserError::Media("Video has no duration".to_string()))?;

    let has_audio = probe.streams.iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(MediaInfo {
        duration,
        width,
        height,
        frame_rate,
        has_audio,
    })
}

/// Timestamps of `count` samples spread evenly over `duration`
pub fn sample_timestamps(duration: f64, count: usize) -> Vec<f64> {
    if count == 0 || duration <= 0.0 {
        return Vec::new();
    }
    (0..count)
        .map(|i| duration * (i as f64 + 0.5) / count as f64)
        .collect()
}

/// List `*.png` files of a directory sorted by name
pub async fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_png = path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("png"))
            .unwrap_or(false);
        if is_png {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

/// Media adapter backed by the ffmpeg and ffprobe binaries
pub struct FfmpegAdapter {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl FfmpegAdapter {
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.ffmpeg_path, &config.ffprobe_path);

        Self {
            config,
            command_builder,
        }
    }

    fn encoding(&self) -> EncodingOptions {
        EncodingOptions {
            video_codec: self.config.video_codec.clone(),
            pixel_format: self.config.pixel_format.clone(),
            audio_codec: self.config.audio_codec.clone(),
            extra_options: self.config.encode_options.clone(),
        }
    }
}

#[async_trait]
impl MediaAdapter for FfmpegAdapter {
    async fn probe(&self, video_path: &Path) -> Result<MediaInfo> {
        let stdout = self.command_builder.probe(video_path).execute_capture().await?;
        let info = parse_probe_output(&stdout)?;

        info!(
            "Probed {}: {}x{} @ {} fps, {:.2}s, audio: {}",
            video_path.display(),
            info.width,
            info.height,
            info.frame_rate,
            info.duration,
            info.has_audio
        );
        Ok(info)
    }

    async fn sample_frames(
        &self,
        video_path: &Path,
        info: &MediaInfo,
        count: usize,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(output_dir).await?;

        let mut samples = Vec::with_capacity(count);
        for (i, seconds) in sample_timestamps(info.duration, count).into_iter().enumerate() {
            let sample_path = output_dir.join(format!("sample_{:03}.png", i));
            let command = self.command_builder.sample_frame(video_path, seconds, sample_path.as_path());

            // A failed sample only reduces the evidence available to detection
            match command.execute().await {
                Ok(()) if fs::metadata(&sample_path).await.map(|m| m.len() > 0).unwrap_or(false) => {
                    samples.push(sample_path);
                }
                Ok(()) => warn!("Sampling at {:.3}s produced no frame", seconds),
                Err(e) => warn!("Sampling at {:.3}s failed: {}", seconds, e),
            }
        }

        debug!("Sampled {}/{} frames from {}", samples.len(), count, video_path.display());
        Ok(samples)
    }

    async fn extract_frames(
        &self,
        video_path: &Path,
        info: &MediaInfo,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(output_dir).await?;

        info!("Extracting frames from {} to {}", video_path.display(), output_dir.display());
        self.command_builder
            .extract_frames(video_path, info.frame_rate, output_dir)
            .execute()
            .await?;

        let frames = list_frames(output_dir).await?;
        if frames.is_empty() {
            return Err(CleanserError::Media(format!(
                "Frame extraction produced no frames for {}",
                video_path.display()
            )));
        }

        info!("Extracted {} frames", frames.len());
        Ok(frames)
    }

    async fn extract_audio(
        &self,
        video_path: &Path,
        info: &MediaInfo,
        output_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        if !info.has_audio {
            debug!("{} has no audio track", video_path.display());
            return Ok(None);
        }

        fs::create_dir_all(output_dir).await?;
        let audio_path = output_dir.join("audio.mka");

        info!("Extracting audio from {} to {}", video_path.display(), audio_path.display());
        self.command_builder
            .extract_audio(video_path, audio_path.as_path())
            .execute()
            .await?;

        Ok(Some(audio_path))
    }

    async fn mux(
        &self,
        frame_dir: &Path,
        audio_path: Option<&Path>,
        frame_rate: FrameRate,
        output_path: &Path,
    ) -> Result<PathBuf> {
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        info!("Reassembling {} into {}", frame_dir.display(), output_path.display());
        self.command_builder
            .mux(frame_dir, audio_path, frame_rate, output_path, &self.encoding())
            .execute()
            .await?;

        let written = fs::metadata(output_path).await.map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(CleanserError::Media(format!(
                "Reassembly left no output at {}",
                output_path.display()
            )));
        }

        info!("Reassembly completed ({} bytes)", written);
        Ok(output_path.to_path_buf())
    }

    async fn check_availability(&self) -> Result<()> {
        self.command_builder.ffmpeg_version().execute().await
            .map_err(|e| CleanserError::Media(format!("ffmpeg not available: {}", e)))?;
        self.command_builder.ffprobe_version().execute().await
            .map_err(|e| CleanserError::Media(format!("ffprobe not available: {}", e)))?;

        info!("ffmpeg and ffprobe are available");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE_WITH_AUDIO: &str = r#"{
        "programs": [],
        "streams": [
            {"codec_type": "video", "width": 640, "height": 360, "r_frame_rate": "30/1", "avg_frame_rate": "30/1", "duration": "10.000000"},
            {"codec_type": "audio", "r_frame_rate": "0/0", "avg_frame_rate": "0/0", "duration": "10.005333"}
        ],
        "format": {"duration": "10.005333"}
    }"#;

    #[test]
    fn test_parse_probe_output_with_audio() {
        let info = parse_probe_output(PROBE_WITH_AUDIO).unwrap();
        assert_eq!(info.width, 640);
        assert_eq!(info.height, 360);
        assert_eq!(info.frame_rate, FrameRate::new(30, 1));
        assert!(info.has_audio);
        assert!((info.duration - 10.005333).abs() < 1e-6);
    }

    #[test]
    fn test_parse_probe_output_falls_back_to_stream_duration() {
        let json = r#"{"streams": [{"codec_type": "video", "width": 1152, "height": 1760, "r_frame_rate": "0/0", "avg_frame_rate": "24000/1001", "duration": "5.5"}]}"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.frame_rate, FrameRate::new(24000, 1001));
        assert_eq!(info.duration, 5.5);
        assert!(!info.has_audio);
    }

    #[test]
    fn test_parse_probe_output_requires_video_stream() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "3.0"}}"#;
        assert!(matches!(parse_probe_output(json), Err(CleanserError::Media(_))));
        assert!(matches!(parse_probe_output("not json"), Err(CleanserError::Media(_))));
    }

    #[test]
    fn test_sample_timestamps_are_evenly_spaced() {
        let stamps = sample_timestamps(10.0, 5);
        assert_eq!(stamps, vec![1.0, 3.0, 5.0, 7.0, 9.0]);
        assert!(sample_timestamps(0.0, 5).is_empty());
        assert!(sample_timestamps(10.0, 0).is_empty());
    }

    #[tokio::test]
    async fn test_list_frames_sorted_png_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["000002.png", "000001.png", "audio.mka", "000010.png"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let frames = list_frames(dir.path()).await.unwrap();
        let names: Vec<_> = frames.iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["000001.png", "000002.png", "000010.png"]);
    }
}
