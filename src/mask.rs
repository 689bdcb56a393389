//! Corner watermark detection and repair mask generation.
//!
//! The watermark is assumed to occupy a fixed fraction of the frame anchored
//! to a known corner, so detection validates the footprint against sampled
//! frames instead of localizing the mark. The resulting mask is reused for
//! every frame of the video.

use image::{GrayImage, ImageFormat, Luma};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::MaskConfig;
use crate::error::{CleanserError, Result};
use crate::media::{MediaAdapter, MediaInfo};

/// Fewer readable samples than this fails detection
pub const MIN_SAMPLES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Corner {
    TopLeft,
    BottomRight,
}

impl Corner {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TopLeft => "lt",
            Self::BottomRight => "rb",
        }
    }
}

impl fmt::Display for Corner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0 && self.height > 0 && self.right() <= width && self.bottom() <= height
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{},{})", self.x, self.y, self.width, self.height)
    }
}

/// One detected watermark area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CornerRegion {
    pub corner: Corner,
    pub rect: Rect,
    /// Temporal consistency of the patch across samples, 1.0 = static
    pub confidence: f64,
}

/// Rectangle of `ratio × frame` anchored at `corner`, grown by `pad_px` and clamped to the frame
pub fn corner_rect(
    corner: Corner,
    frame_width: u32,
    frame_height: u32,
    width_ratio: f64,
    height_ratio: f64,
    pad_px: u32,
) -> Rect {
    let width = ((frame_width as f64 * width_ratio).round() as u32)
        .saturating_add(pad_px)
        .clamp(1, frame_width.max(1));
    let height = ((frame_height as f64 * height_ratio).round() as u32)
        .saturating_add(pad_px)
        .clamp(1, frame_height.max(1));

    match corner {
        Corner::TopLeft => Rect::new(0, 0, width, height),
        Corner::BottomRight => Rect::new(frame_width - width, frame_height - height, width, height),
    }
}

/// Mean similarity of the rectangle between consecutive samples
pub fn consistency_score(samples: &[GrayImage], rect: Rect) -> f64 {
    if samples.len() < 2 || rect.area() == 0 {
        return 1.0;
    }

    let mut total = 0.0;
    for pair in samples.windows(2) {
        let mut diff: u64 = 0;
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                let a = pair[0].get_pixel(x, y).0[0] as i32;
                let b = pair[1].get_pixel(x, y).0[0] as i32;
                diff += (a - b).unsigned_abs() as u64;
            }
        }
        total += 1.0 - diff as f64 / (rect.area() as f64 * 255.0);
    }

    (total / (samples.len() - 1) as f64).clamp(0.0, 1.0)
}

/// Binary mask at source resolution: 255 = repair, 0 = keep
#[derive(Debug, Clone)]
pub struct RepairMask {
    regions: Vec<CornerRegion>,
    image: GrayImage,
}

impl RepairMask {
    pub const REPAIR: u8 = 255;
    pub const KEEP: u8 = 0;

    pub fn from_regions(width: u32, height: u32, regions: Vec<CornerRegion>) -> Self {
        let mut image = GrayImage::from_pixel(width, height, Luma([Self::KEEP]));
        for region in &regions {
            let rect = region.rect;
            for y in rect.y..rect.bottom().min(height) {
                for x in rect.x..rect.right().min(width) {
                    image.put_pixel(x, y, Luma([Self::REPAIR]));
                }
            }
        }
        Self { regions, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn regions(&self) -> &[CornerRegion] {
        &self.regions
    }

    pub fn is_repair(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y).0[0] == Self::REPAIR
    }

    pub fn repair_pixel_count(&self) -> usize {
        self.image.pixels().filter(|p| p.0[0] == Self::REPAIR).count()
    }

    /// Bounding box of all repair pixels
    pub fn repair_bounds(&self) -> Option<Rect> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, pixel) in self.image.enumerate_pixels() {
            if pixel.0[0] != Self::REPAIR {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        bounds.map(|(x0, y0, x1, y1)| Rect::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1))
    }

    /// PNG encoding sent to the inpainting service
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }
}

/// Output of the detecting stage
#[derive(Debug, Clone)]
pub struct Detection {
    pub info: MediaInfo,
    pub mask: RepairMask,
}

pub struct MaskDetector {
    media: Arc<dyn MediaAdapter>,
    config: MaskConfig,
}

impl MaskDetector {
    pub fn new(media: Arc<dyn MediaAdapter>, config: MaskConfig) -> Self {
        Self { media, config }
    }

    /// Probe the video, sample frames into `sample_dir` and build the repair mask
    pub async fn detect(&self, video_path: &Path, sample_dir: &Path) -> Result<Detection> {
        let info = self.media.probe(video_path).await?;

        let sample_paths = self.media
            .sample_frames(video_path, &info, self.config.sample_frames, sample_dir)
            .await?;

        let (width, height) = (info.width, info.height);
        let samples = tokio::task::spawn_blocking(move || load_samples(&sample_paths, width, height))
            .await
            .map_err(|e| CleanserError::Detection(format!("Sample decoding task failed: {}", e)))?;

        if samples.len() < MIN_SAMPLES {
            return Err(CleanserError::Detection(format!(
                "Only {} readable sample frames in {} (need {})",
                samples.len(),
                video_path.display(),
                MIN_SAMPLES
            )));
        }

        let regions = self.locate_regions(&samples, width, height)?;
        for region in &regions {
            info!(
                "Corner {} watermark region {} consistency {:.3}",
                region.corner, region.rect, region.confidence
            );
        }

        let mask = RepairMask::from_regions(width, height, regions);
        Ok(Detection { info, mask })
    }

    /// Compute the configured corner rectangles and check their invariants
    pub fn locate_regions(&self, samples: &[GrayImage], width: u32, height: u32) -> Result<Vec<CornerRegion>> {
        let frame_area = width as f64 * height as f64;
        let mut regions = Vec::new();

        for corner in self.config.corners.corners() {
            let rect = corner_rect(
                corner,
                width,
                height,
                self.config.width_ratio,
                self.config.height_ratio,
                self.config.pad_px,
            );

            if !rect.fits_within(width, height) {
                return Err(CleanserError::Detection(format!(
                    "Corner {} rectangle {} exceeds frame {}x{}",
                    corner, rect, width, height
                )));
            }
            let area_ratio = rect.area() as f64 / frame_area;
            if area_ratio > self.config.max_area_ratio + f64::EPSILON {
                return Err(CleanserError::Detection(format!(
                    "Corner {} rectangle {} covers {:.3} of the frame (max {:.3})",
                    corner, rect, area_ratio, self.config.max_area_ratio
                )));
            }

            regions.push(CornerRegion {
                corner,
                rect,
                confidence: consistency_score(samples, rect),
            });
        }

        Ok(regions)
    }
}

fn load_samples(paths: &[PathBuf], width: u32, height: u32) -> Vec<GrayImage> {
    let mut samples = Vec::with_capacity(paths.len());
    for path in paths {
        match image::open(path) {
            Ok(decoded) => {
                let gray = decoded.to_luma8();
                if gray.dimensions() == (width, height) {
                    samples.push(gray);
                } else {
                    warn!(
                        "Sample {} is {}x{}, expected {}x{}",
                        path.display(),
                        gray.width(),
                        gray.height(),
                        width,
                        height
                    );
                }
            }
            Err(e) => warn!("Unreadable sample {}: {}", path.display(), e),
        }
    }
    samples
}
