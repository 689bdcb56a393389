//! In-process stand-ins for ffmpeg and the inpainting service used by unit tests.

use async_trait::async_trait;
use image::{GrayImage, ImageFormat, Luma};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, CornerMode};
use crate::error::{CleanserError, Result};
use crate::inpaint::InpaintClient;
use crate::mask::Rect;
use crate::media::{FrameRate, MediaAdapter, MediaInfo, list_frames};

/// Config rooted in `root` with only the input directory created; top-left corner, 5 samples
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.input_dir = root.join("in");
    config.paths.output_dir = root.join("out");
    config.paths.temp_dir = root.join("temp");
    config.paths.state_dir = root.join("state");
    config.watch.poll_interval_ms = 50;
    config.mask.corners = CornerMode::Lt;
    config.mask.sample_frames = 5;
    std::fs::create_dir_all(&config.paths.input_dir).unwrap();
    config
}

pub(crate) fn media_info(width: u32, height: u32, duration: f64, fps: u32) -> MediaInfo {
    MediaInfo {
        duration,
        width,
        height,
        frame_rate: FrameRate::new(fps, 1),
        has_audio: false,
    }
}

pub(crate) fn png_bytes(image: &GrayImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
    bytes
}

pub(crate) fn solid_png(width: u32, height: u32, value: u8) -> Vec<u8> {
    png_bytes(&GrayImage::from_pixel(width, height, Luma([value])))
}

/// Frame content that differs per index, with an optional static watermark patch
pub(crate) fn frame_image(width: u32, height: u32, index: usize, patch: Option<Rect>) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        if patch.is_some_and(|rect| rect.contains(x, y)) {
            Luma([235])
        } else {
            Luma([(((x * 13 + y * 7) as usize + index * 31) % 200) as u8 + 20])
        }
    })
}

pub(crate) fn frame_png(width: u32, height: u32, index: usize, patch: Option<Rect>) -> Vec<u8> {
    png_bytes(&frame_image(width, height, index, patch))
}

/// Write `count` frames named `000001.png`.. into `dir`
pub(crate) fn write_frames(dir: &Path, count: usize, width: u32, height: u32, patch: Option<Rect>) -> Vec<PathBuf> {
    std::fs::create_dir_all(dir).unwrap();
    (0..count)
        .map(|index| {
            let path = dir.join(format!("{:06}.png", index + 1));
            std::fs::write(&path, frame_png(width, height, index, patch)).unwrap();
            path
        })
        .collect()
}

/// Media adapter producing synthetic PNG frames; `mux` writes a text manifest
pub(crate) struct StubMedia {
    info: MediaInfo,
    frame_count: usize,
    max_samples: Option<usize>,
    patch: Option<Rect>,
    delay: Duration,
    fail_probe: bool,
    fail_mux: bool,
    sampled: AtomicUsize,
    events: Arc<Mutex<Vec<String>>>,
}

impl StubMedia {
    pub(crate) fn new(info: MediaInfo, frame_count: usize) -> Self {
        Self {
            info,
            frame_count,
            max_samples: None,
            patch: None,
            delay: Duration::ZERO,
            fail_probe: false,
            fail_mux: false,
            sampled: AtomicUsize::new(0),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn with_patch(mut self, patch: Rect) -> Self {
        self.patch = Some(patch);
        self
    }

    pub(crate) fn with_max_samples(mut self, max: usize) -> Self {
        self.max_samples = Some(max);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn failing_probe(mut self) -> Self {
        self.fail_probe = true;
        self
    }

    pub(crate) fn failing_mux(mut self) -> Self {
        self.fail_mux = true;
        self
    }

    pub(crate) fn sampled_count(&self) -> usize {
        self.sampled.load(Ordering::SeqCst)
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl MediaAdapter for StubMedia {
    async fn probe(&self, video_path: &Path) -> Result<MediaInfo> {
        let name = video_path.file_name().unwrap_or_default().to_string_lossy().into_owned();
        self.record(format!("probe:{}", name));
        tokio::time::sleep(self.delay).await;
        if self.fail_probe {
            return Err(CleanserError::Media(format!("Cannot probe {}", name)));
        }
        Ok(self.info.clone())
    }

    async fn sample_frames(
        &self,
        _video_path: &Path,
        info: &MediaInfo,
        count: usize,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(output_dir)?;
        let count = self.max_samples.map_or(count, |max| count.min(max));
        let mut samples = Vec::with_capacity(count);
        for i in 0..count {
            let path = output_dir.join(format!("sample_{:03}.png", i));
            std::fs::write(&path, frame_png(info.width, info.height, 1000 + i, self.patch))?;
            samples.push(path);
        }
        self.sampled.fetch_add(samples.len(), Ordering::SeqCst);
        Ok(samples)
    }

    async fn extract_frames(
        &self,
        _video_path: &Path,
        info: &MediaInfo,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        tokio::time::sleep(self.delay).await;
        Ok(write_frames(output_dir, self.frame_count, info.width, info.height, self.patch))
    }

    async fn extract_audio(
        &self,
        _video_path: &Path,
        _info: &MediaInfo,
        _output_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        Ok(None)
    }

    async fn mux(
        &self,
        frame_dir: &Path,
        _audio_path: Option<&Path>,
        frame_rate: FrameRate,
        output_path: &Path,
    ) -> Result<PathBuf> {
        if self.fail_mux {
            return Err(CleanserError::Media("ffmpeg exited with status 1: encoder failed".to_string()));
        }
        let frames = list_frames(frame_dir).await?;
        let mut all_black = true;
        let mut size = (0, 0);
        for frame in &frames {
            let image = image::open(frame)?.to_luma8();
            size = image.dimensions();
            all_black &= image.pixels().all(|p| p.0[0] == 0);
        }
        let manifest = format!(
            "frames={}\nframe_rate={}\nsize={}x{}\nduration_secs={:.3}\nall_black={}\n",
            frames.len(),
            frame_rate,
            size.0,
            size.1,
            frames.len() as f64 / frame_rate.as_f64(),
            all_black
        );
        std::fs::write(output_path, manifest)?;
        self.record("mux".to_string());
        Ok(output_path.to_path_buf())
    }

    async fn check_availability(&self) -> Result<()> {
        Ok(())
    }
}

/// Inpainter returning a solid black image, optionally failing for one exact input
pub(crate) struct StubInpaint {
    response: Vec<u8>,
    fail_on: Option<Vec<u8>>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: AtomicUsize,
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StubInpaint {
    pub(crate) fn black(width: u32, height: u32) -> Self {
        Self {
            response: solid_png(width, height, 0),
            fail_on: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn failing_on(mut self, image: Vec<u8>) -> Self {
        self.fail_on = Some(image);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InpaintClient for StubInpaint {
    async fn inpaint(&self, image: Vec<u8>, _mask: Arc<Vec<u8>>) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(self.in_flight.clone());
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        if self.fail_on.as_ref() == Some(&image) {
            return Err(CleanserError::Inpaint(
                "Service returned 500 Internal Server Error: injected failure".to_string(),
            ));
        }
        Ok(self.response.clone())
    }

    async fn check_availability(&self) -> Result<()> {
        Ok(())
    }
}
