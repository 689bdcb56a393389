use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::error::{CleanserError, Result};
use super::FrameRate;

/// File name pattern of extracted and repaired frames
pub const FRAME_PATTERN: &str = "%06d.png";

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Only print errors
    pub fn quiet(self) -> Self {
        self.arg("-hide_banner").arg("-loglevel").arg("error")
    }

    /// Seek to a position (seconds) before the next input
    pub fn seek(self, seconds: f64) -> Self {
        self.arg("-ss").arg(format!("{:.3}", seconds))
    }

    /// Limit the number of output video frames
    pub fn frames(self, count: u32) -> Self {
        self.arg("-frames:v").arg(count.to_string())
    }

    /// Input frame rate for image sequences
    pub fn framerate(self, rate: FrameRate) -> Self {
        self.arg("-framerate").arg(rate.to_string())
    }

    /// Select a stream for the output
    pub fn map<S: Into<String>>(self, spec: S) -> Self {
        self.arg("-map").arg(spec)
    }

    /// Set video codec
    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Copy audio stream
    pub fn copy_audio(self) -> Self {
        self.audio_codec("copy")
    }

    /// Disable video
    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    /// Disable audio
    pub fn no_audio(self) -> Self {
        self.arg("-an")
    }

    /// Add video filter
    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Pixel format of the encoded output
    pub fn pixel_format<S: Into<String>>(self, format: S) -> Self {
        self.arg("-pix_fmt").arg(format)
    }

    /// Execute the command, discarding stdout
    pub async fn execute(&self) -> Result<()> {
        self.execute_capture().await.map(|_| ())
    }

    /// Execute the command and return its stdout
    pub async fn execute_capture(&self) -> Result<String> {
        debug!("Executing media command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CleanserError::Media(format!(
                "Failed to execute {}: {}",
                self.binary_path, e
            )))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CleanserError::Media(format!(
                "{} failed ({}): {}",
                self.description,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Builder for the ffmpeg/ffprobe invocations used by the pipeline
#[derive(Debug, Clone)]
pub struct MediaCommandBuilder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S1: Into<String>, S2: Into<String>>(ffmpeg_path: S1, ffprobe_path: S2) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Build stream/format probe command (JSON output)
    pub fn probe<P: AsRef<Path>>(&self, video_path: P) -> MediaCommand {
        MediaCommand::new(&self.ffprobe_path, "Probe")
            .args(["-v", "error"])
            .args([
                "-show_entries",
                "stream=codec_type,width,height,r_frame_rate,avg_frame_rate,duration:format=duration",
            ])
            .args(["-of", "json"])
            .output(video_path)
    }

    /// Build single-frame sampling command
    pub fn sample_frame<P: AsRef<Path>>(&self, video_path: P, seconds: f64, output_path: P) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, format!("Frame sampling at {:.3}s", seconds))
            .quiet()
            .overwrite()
            .seek(seconds)
            .input(video_path)
            .frames(1)
            .output(output_path)
    }

    /// Build full frame extraction command writing `%06d.png` into `output_dir`
    pub fn extract_frames<P: AsRef<Path>>(&self, video_path: P, frame_rate: FrameRate, output_dir: P) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, "Frame extraction")
            .quiet()
            .overwrite()
            .input(video_path)
            .video_filter(format!("fps={}", frame_rate))
            .arg("-f").arg("image2")
            .output(output_dir.as_ref().join(FRAME_PATTERN))
    }

    /// Build audio extraction command (stream copy into Matroska audio)
    pub fn extract_audio<P: AsRef<Path>>(&self, video_path: P, audio_path: P) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, "Audio extraction")
            .quiet()
            .overwrite()
            .input(video_path)
            .no_video()
            .copy_audio()
            .output(audio_path)
    }

    /// Build reassembly command from `%06d.png` frames plus optional audio
    pub fn mux(
        &self,
        frame_dir: &Path,
        audio_path: Option<&Path>,
        frame_rate: FrameRate,
        output_path: &Path,
        encoding: &EncodingOptions,
    ) -> MediaCommand {
        let mut cmd = MediaCommand::new(&self.ffmpeg_path, "Video reassembly")
            .quiet()
            .overwrite()
            .framerate(frame_rate)
            .input(frame_dir.join(FRAME_PATTERN));

        if let Some(audio) = audio_path {
            cmd = cmd.input(audio).map("0:v:0").map("1:a:0");
        }

        cmd = cmd
            .video_codec(&encoding.video_codec)
            .pixel_format(&encoding.pixel_format);

        cmd = match audio_path {
            Some(_) => cmd.audio_codec(&encoding.audio_codec).arg("-shortest"),
            None => cmd.no_audio(),
        };

        // Add user-specified additional options
        for option in &encoding.extra_options {
            cmd = cmd.arg(option);
        }

        cmd.output(output_path)
    }

    /// Build version check command for ffmpeg
    pub fn ffmpeg_version(&self) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, "ffmpeg version check").arg("-version")
    }

    /// Build version check command for ffprobe
    pub fn ffprobe_version(&self) -> MediaCommand {
        MediaCommand::new(&self.ffprobe_path, "ffprobe version check").arg("-version")
    }
}

/// Encoder settings used when reassembling a video
#[derive(Debug, Clone)]
pub struct EncodingOptions {
    pub video_codec: String,
    pub pixel_format: String,
    pub audio_codec: String,
    pub extra_options: Vec<String>,
}
