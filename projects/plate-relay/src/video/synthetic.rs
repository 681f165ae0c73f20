use super::FrameProvider;
use anyhow::{bail, Result};
use image::{Rgb, RgbImage};
use serde::Deserialize;

const PLATE_COLOR: Rgb<u8> = Rgb([235, 235, 235]);
const GLYPH_COLOR: Rgb<u8> = Rgb([20, 20, 20]);
const GLYPH_SLOTS: u32 = 6;

/// Shape of the generated stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    /// Stop after this many frames; `None` runs forever.
    pub frames: Option<usize>,
    pub plate_width: u32,
    pub plate_height: u32,
    /// Horizontal pixels the plate moves per frame.
    pub step: u32,
    /// Frames between two different plate patterns.
    pub pattern_every: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            frames: Some(300),
            plate_width: 120,
            plate_height: 40,
            step: 8,
            pattern_every: 30,
        }
    }
}

/// Generates frames with a bright plate-like box sliding across a dark
/// gradient. Deterministic, so runs are reproducible without a camera.
pub struct SyntheticFrameProvider {
    config: SyntheticConfig,
    index: usize,
}

impl SyntheticFrameProvider {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        if config.plate_width + 2 >= config.width || config.plate_height + 2 >= config.height {
            bail!(
                "Plate {}x{} does not fit into a {}x{} frame",
                config.plate_width,
                config.plate_height,
                config.width,
                config.height
            );
        }
        if config.plate_width < GLYPH_SLOTS * 2 {
            bail!("Plate width {} is too small", config.plate_width);
        }
        Ok(Self { config, index: 0 })
    }

    /// Top-left corner of the plate in frame `index`.
    pub fn plate_origin(&self, index: usize) -> (u32, u32) {
        let c = &self.config;
        let travel = (c.width - c.plate_width) as usize;
        let x = (index * c.step as usize) % travel;
        let y = c.height / 2 - c.plate_height / 2;
        (x as u32, y)
    }

    pub fn render(&self, index: usize) -> RgbImage {
        let c = &self.config;
        let (w, h) = (c.width, c.height);
        let mut frame = RgbImage::from_fn(w, h, |x, y| {
            Rgb([30 + (x * 60 / w) as u8, 30 + (y * 60 / h) as u8, 50])
        });

        let (px, py) = self.plate_origin(index);
        for y in py..py + c.plate_height {
            for x in px..px + c.plate_width {
                frame.put_pixel(x, y, PLATE_COLOR);
            }
        }

        // Dark glyph bars; the pattern changes every `pattern_every` frames.
        let seed = index / c.pattern_every.max(1);
        let slot_w = c.plate_width / GLYPH_SLOTS;
        let bar_w = (slot_w / 2).max(1);
        let margin = c.plate_height / 5;
        for slot in 0..GLYPH_SLOTS {
            let level = ((seed * 7 + slot as usize * 13) % 5) as u32 + 1;
            let bar_h = (c.plate_height - 2 * margin) * level / 5;
            let bx = px + slot * slot_w + (slot_w - bar_w) / 2;
            let by = py + c.plate_height - margin - bar_h;
            for y in by..by + bar_h {
                for x in bx..bx + bar_w {
                    frame.put_pixel(x, y, GLYPH_COLOR);
                }
            }
        }

        frame
    }
}

impl FrameProvider for SyntheticFrameProvider {
    fn start(&mut self) -> Result<()> {
        self.index = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if let Some(limit) = self.config.frames {
            if self.index >= limit {
                return Ok(None);
            }
        }
        let frame = self.render(self.index);
        self.index += 1;
        Ok(Some(frame))
    }
}
