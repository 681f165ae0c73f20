// Frame feed: source stage of the plate pipeline
//
// Pulls one frame per loop iteration from a `FrameProvider` and publishes it
// twice: untouched on `raw`, and with the latest highlight drawn on
// `processed`. Highlights arrive as `Overlay` jobs, typically fed back from
// the plate finder.

use crate::pipeline::{Outputs, Processor, StageContext};
use crate::video::FrameProvider;
use crate::workers::types::{unexpected, Job, Rect};
use anyhow::Result;
use image::{Rgb, RgbImage};
use serde::Deserialize;
use std::sync::Arc;

pub const CHANNEL_RAW: &str = "raw";
pub const CHANNEL_PROCESSED: &str = "processed";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Frames a highlight stays on screen without a fresh one; 0 disables.
    pub cache_highlight_for: usize,
    pub border_color: [u8; 3],
    pub border_width: u32,
    /// Stop after this many frames.
    pub max_frames: Option<usize>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            cache_highlight_for: 0,
            border_color: [255, 0, 255],
            border_width: 2,
            max_frames: None,
        }
    }
}

pub struct FrameFeed {
    provider: Box<dyn FrameProvider>,
    config: FeedConfig,
    cached_highlight: Option<Rect>,
    cached_count: usize,
    emitted: usize,
}

impl FrameFeed {
    pub fn new(provider: Box<dyn FrameProvider>, config: FeedConfig) -> Self {
        Self {
            provider,
            config,
            cached_highlight: None,
            cached_count: 0,
            emitted: 0,
        }
    }

    /// Picks the highlight for this frame, refreshing or aging the cache.
    fn highlight(&mut self, fresh: Option<Rect>) -> Option<Rect> {
        if self.config.cache_highlight_for == 0 {
            return fresh;
        }

        if let Some(rect) = fresh {
            self.cached_highlight = Some(rect);
            self.cached_count = 0;
            return fresh;
        }

        let cached = self.cached_highlight?;
        self.cached_count += 1;
        if self.cached_count == self.config.cache_highlight_for {
            self.cached_highlight = None;
            self.cached_count = 0;
        }
        Some(cached)
    }

    fn produce(&mut self, overlay: Option<Rect>, ctx: &StageContext<'_>) -> Result<Outputs<Job>> {
        if let Some(max) = self.config.max_frames {
            if self.emitted >= max {
                ctx.request_stop();
                return Ok(Outputs::none());
            }
        }

        let Some(frame) = self.provider.next_frame()? else {
            tracing::info!("{}: end of stream after {} frames", ctx.name(), self.emitted);
            ctx.request_stop();
            return Ok(Outputs::none());
        };
        self.emitted += 1;

        let raw = Arc::new(frame);
        let processed = match self.highlight(overlay) {
            Some(rect) => {
                let mut copy = (*raw).clone();
                let [r, g, b] = self.config.border_color;
                draw_rectangle(&mut copy, rect, Rgb([r, g, b]), self.config.border_width);
                Arc::new(copy)
            }
            None => raw.clone(),
        };

        Ok(Outputs::none()
            .emit(CHANNEL_RAW, Job::Frame(raw))
            .emit(CHANNEL_PROCESSED, Job::Frame(processed)))
    }
}

impl Processor<Job> for FrameFeed {
    fn on_starting(&mut self, _ctx: &StageContext<'_>) -> Result<()> {
        self.emitted = 0;
        self.cached_highlight = None;
        self.cached_count = 0;
        self.provider.start()
    }

    fn process(&mut self, job: Job, ctx: &StageContext<'_>) -> Result<Outputs<Job>> {
        match job {
            Job::Overlay(rect) => self.produce(Some(rect), ctx),
            other => Err(unexpected(ctx.name(), &other)),
        }
    }

    fn idle(&mut self, ctx: &StageContext<'_>) -> Result<Outputs<Job>> {
        self.produce(None, ctx)
    }

    fn on_stopped(&mut self, _ctx: &StageContext<'_>) -> Result<()> {
        self.provider.stop()
    }
}

/// Draws the outline of `rect`, `thickness` pixels wide, clipped to the image.
pub fn draw_rectangle(image: &mut RgbImage, rect: Rect, color: Rgb<u8>, thickness: u32) {
    let Some(rect) = rect.clamp_to(image.width(), image.height()) else {
        return;
    };
    let t = thickness.max(1);
    for y in rect.y..rect.y + rect.h {
        for x in rect.x..rect.x + rect.w {
            let on_border = x < rect.x + t
                || y < rect.y + t
                || x + t >= rect.x + rect.w
                || y + t >= rect.y + rect.h;
            if on_border {
                image.put_pixel(x, y, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::tests::with_context;
    use crate::video::synthetic::{SyntheticConfig, SyntheticFrameProvider};

    fn feed(config: FeedConfig, frames: usize) -> FrameFeed {
        let provider = SyntheticFrameProvider::new(SyntheticConfig {
            frames: Some(frames),
            ..Default::default()
        })
        .unwrap();
        FrameFeed::new(Box::new(provider), config)
    }

    #[test]
    fn test_draw_rectangle_outlines_only() {
        let mut image = RgbImage::new(10, 10);
        let color = Rgb([255, 0, 255]);
        draw_rectangle(&mut image, Rect::new(2, 2, 6, 6), color, 1);
        assert_eq!(image.get_pixel(2, 2), &color);
        assert_eq!(image.get_pixel(7, 7), &color);
        assert_eq!(image.get_pixel(4, 4), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_rectangle_clips_to_image() {
        let mut image = RgbImage::new(10, 10);
        draw_rectangle(&mut image, Rect::new(8, 8, 10, 10), Rgb([1, 2, 3]), 1);
        assert_eq!(image.get_pixel(9, 9), &Rgb([1, 2, 3]));
        draw_rectangle(&mut image, Rect::new(20, 20, 5, 5), Rgb([1, 2, 3]), 1);
    }

    #[test]
    fn test_highlight_cache_expires() {
        let mut feed = feed(
            FeedConfig {
                cache_highlight_for: 2,
                ..Default::default()
            },
            10,
        );
        let rect = Rect::new(1, 1, 5, 5);
        assert_eq!(feed.highlight(Some(rect)), Some(rect));
        assert_eq!(feed.highlight(None), Some(rect));
        assert_eq!(feed.highlight(None), Some(rect));
        assert_eq!(feed.highlight(None), None);
    }

    #[test]
    fn test_no_cache_passes_through() {
        let mut feed = feed(FeedConfig::default(), 10);
        let rect = Rect::new(1, 1, 5, 5);
        assert_eq!(feed.highlight(Some(rect)), Some(rect));
        assert_eq!(feed.highlight(None), None);
    }

    #[test]
    fn test_idle_emits_raw_and_processed_until_end_of_stream() {
        let mut feed = feed(FeedConfig::default(), 2);
        let (started, _) = with_context("feed", |ctx| feed.on_starting(ctx));
        started.unwrap();

        for _ in 0..2 {
            let (outputs, stopped) = with_context("feed", |ctx| feed.idle(ctx));
            let outputs = outputs.unwrap();
            assert!(!stopped);
            match (outputs.get(CHANNEL_RAW), outputs.get(CHANNEL_PROCESSED)) {
                (Some(Job::Frame(raw)), Some(Job::Frame(processed))) => {
                    assert!(Arc::ptr_eq(raw, processed));
                }
                _ => panic!("expected a frame on both channels"),
            }
        }

        let (outputs, stopped) = with_context("feed", |ctx| feed.idle(ctx));
        assert!(outputs.unwrap().is_empty());
        assert!(stopped);
    }

    #[test]
    fn test_overlay_is_drawn_on_processed_only() {
        let mut feed = feed(FeedConfig::default(), 5);
        with_context("feed", |ctx| feed.on_starting(ctx)).0.unwrap();

        let rect = Rect::new(0, 0, 10, 10);
        let (outputs, _) = with_context("feed", |ctx| feed.process(Job::Overlay(rect), ctx));
        let outputs = outputs.unwrap();
        let Some(Job::Frame(raw)) = outputs.get(CHANNEL_RAW) else {
            panic!("missing raw frame");
        };
        let Some(Job::Frame(processed)) = outputs.get(CHANNEL_PROCESSED) else {
            panic!("missing processed frame");
        };
        assert_eq!(processed.get_pixel(0, 0), &Rgb([255, 0, 255]));
        assert_ne!(raw.get_pixel(0, 0), &Rgb([255, 0, 255]));
    }

    #[test]
    fn test_max_frames_stops_the_feed() {
        let mut feed = feed(
            FeedConfig {
                max_frames: Some(1),
                ..Default::default()
            },
            10,
        );
        with_context("feed", |ctx| feed.on_starting(ctx)).0.unwrap();
        assert!(!with_context("feed", |ctx| feed.idle(ctx)).1);
        assert!(with_context("feed", |ctx| feed.idle(ctx)).1);
    }

    #[test]
    fn test_rejects_frame_jobs() {
        let mut feed = feed(FeedConfig::default(), 1);
        let frame = Arc::new(RgbImage::new(1, 1));
        let (outputs, _) = with_context("feed", |ctx| feed.process(Job::Frame(frame), ctx));
        assert!(outputs.is_err());
    }
}
