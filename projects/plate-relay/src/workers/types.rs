use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Frames are shared between channels and recipients, never copied.
pub type Frame = Arc<RgbImage>;

/// Axis-aligned rectangle in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Clamps the rectangle to an image of `width` x `height`.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let w = self.w.min(width - x);
        let h = self.h.min(height - y);
        if w == 0 || h == 0 {
            None
        } else {
            Some(Rect { x, y, w, h })
        }
    }
}

/// What the lookup stage knows about a plate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateInfo {
    pub plate: String,
    pub known: bool,
    pub stolen: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    pub seen_at: DateTime<Utc>,
}

/// Every payload kind that travels between the plate stages.
#[derive(Debug, Clone)]
pub enum Job {
    Frame(Frame),
    /// Highlight to draw on a future frame.
    Overlay(Rect),
    Crop(Frame),
    Text(String),
    Plate(PlateInfo),
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Frame(_) => "frame",
            Job::Overlay(_) => "overlay",
            Job::Crop(_) => "crop",
            Job::Text(_) => "text",
            Job::Plate(_) => "plate",
        }
    }
}

pub fn unexpected(stage: &str, job: &Job) -> anyhow::Error {
    anyhow::anyhow!("{} cannot handle a {} job", stage, job.kind())
}
