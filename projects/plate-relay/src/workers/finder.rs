// Plate finder: locates the bright plate region in a frame
//
// Only the central horizontal band is searched. The bounding box of every
// pixel brighter than the threshold is the candidate; candidates outside the
// size limits are ignored.

use crate::pipeline::{Outputs, Processor, StageContext};
use crate::workers::types::{unexpected, Job, Rect};
use anyhow::{bail, Result};
use image::{imageops, RgbImage};
use serde::Deserialize;
use std::sync::Arc;

pub const CHANNEL_COORDS: &str = "coords";
pub const CHANNEL_CROP: &str = "crop";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FinderConfig {
    /// Height of the searched band, as a fraction of the frame height.
    pub y_crop_ratio: f32,
    pub brightness_threshold: u8,
    pub min_width: u32,
    pub min_height: u32,
    /// Widest accepted plate, as a fraction of the frame width.
    pub max_width_ratio: f32,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            y_crop_ratio: 0.5,
            brightness_threshold: 200,
            min_width: 24,
            min_height: 8,
            max_width_ratio: 0.8,
        }
    }
}

impl FinderConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.y_crop_ratio > 0.0 && self.y_crop_ratio <= 1.0) {
            bail!("y_crop_ratio must be in (0, 1], got {}", self.y_crop_ratio);
        }
        if !(self.max_width_ratio > 0.0 && self.max_width_ratio <= 1.0) {
            bail!("max_width_ratio must be in (0, 1], got {}", self.max_width_ratio);
        }
        Ok(())
    }
}

pub struct PlateFinder {
    config: FinderConfig,
}

impl PlateFinder {
    pub fn new(config: FinderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the plate rectangle in full-frame coordinates, if any.
    pub fn locate(&self, frame: &RgbImage) -> Option<Rect> {
        let (width, height) = frame.dimensions();
        let band = ((height as f32) * self.config.y_crop_ratio) as u32;
        let top = (height - band.min(height)) / 2;
        let bottom = top + band;

        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        for y in top..bottom {
            for x in 0..width {
                if luma(frame.get_pixel(x, y).0) >= self.config.brightness_threshold {
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }
        if min_x == u32::MAX {
            return None;
        }

        let rect = Rect::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1);
        let max_width = ((width as f32) * self.config.max_width_ratio) as u32;
        if rect.w < self.config.min_width || rect.h < self.config.min_height || rect.w > max_width {
            tracing::trace!("Discarding candidate {:?}", rect);
            return None;
        }
        Some(rect)
    }
}

impl Processor<Job> for PlateFinder {
    fn process(&mut self, job: Job, ctx: &StageContext<'_>) -> Result<Outputs<Job>> {
        let frame = match job {
            Job::Frame(frame) => frame,
            other => return Err(unexpected(ctx.name(), &other)),
        };

        let Some(rect) = self.locate(&frame) else {
            return Ok(Outputs::none());
        };
        let crop = imageops::crop_imm(&*frame, rect.x, rect.y, rect.w, rect.h).to_image();

        Ok(Outputs::none()
            .emit(CHANNEL_COORDS, Job::Overlay(rect))
            .emit(CHANNEL_CROP, Job::Crop(Arc::new(crop))))
    }
}

/// ITU-R BT.601 luma.
pub fn luma([r, g, b]: [u8; 3]) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}
