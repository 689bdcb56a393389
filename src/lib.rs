//! VidCleanser - Corner Watermark Removal Service
//!
//! Watches a directory for videos, detects the corner watermark area, repairs
//! every frame through an external inpainting service and reassembles the
//! cleaned video with ffmpeg.

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod inpaint;
pub mod job;
pub mod mask;
pub mod media;
pub mod processor;
pub mod setup;
pub mod status;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;
