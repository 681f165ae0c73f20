// Plate pipeline: the collaborator stages and their wiring
//
// feed.raw -> finder, feed.processed -> display, finder.coords -> feed,
// finder.crop -> ocr, ocr.text -> lookup, lookup.plate_info -> display.
// finder -> feed closes a cycle; overlays reach the feed asynchronously.

pub mod display;
pub mod feed;
pub mod finder;
pub mod lookup;
pub mod ocr;
pub mod types;

use crate::pipeline::{Pipeline, Stage, StageError};
use crate::run_config::RunConfig;
use crate::video::FrameProvider;
use anyhow::Result;
use display::FrameDisplay;
use feed::FrameFeed;
use finder::PlateFinder;
use lookup::PlateLookup;
use ocr::{SignatureRecognizer, TextReader};
use std::path::PathBuf;

pub use types::{Frame, Job, PlateInfo, Rect};

pub const FEED: &str = "feed";
pub const FINDER: &str = "finder";
pub const OCR: &str = "ocr";
pub const LOOKUP: &str = "lookup";
pub const DISPLAY: &str = "display";

/// Creates the five plate stages, registered source first, and links them.
/// Nothing is started.
pub fn build_pipeline(
    config: &RunConfig,
    provider: Box<dyn FrameProvider>,
    output_dir: PathBuf,
    plates_csv: Option<PathBuf>,
) -> Result<Pipeline<Job>> {
    let stages = &config.stages;
    let mut pipeline = Pipeline::new();

    pipeline.add(Stage::new(
        FEED,
        FrameFeed::new(provider, config.feed.clone()),
        stages.feed.to_options(),
    ))?;
    pipeline.add(Stage::new(
        FINDER,
        PlateFinder::new(config.finder.clone())?,
        stages.finder.to_options(),
    ))?;
    pipeline.add(Stage::new(
        OCR,
        TextReader::new(Box::new(SignatureRecognizer::new(config.ocr.clone())?)),
        stages.ocr.to_options(),
    ))?;
    pipeline.add(Stage::new(
        LOOKUP,
        PlateLookup::new(plates_csv),
        stages.lookup.to_options(),
    ))?;
    pipeline.add(Stage::new(
        DISPLAY,
        FrameDisplay::new(output_dir, config.display.clone()),
        stages.display.to_options(),
    ))?;

    link_stages(&pipeline)?;
    Ok(pipeline)
}

fn link_stages(pipeline: &Pipeline<Job>) -> Result<(), StageError> {
    // Video feed -> plate finder | display
    pipeline.link(FEED, feed::CHANNEL_RAW, FINDER)?;
    pipeline.link(FEED, feed::CHANNEL_PROCESSED, DISPLAY)?;

    // Plate finder -> video feed | OCR
    pipeline.link(FINDER, finder::CHANNEL_COORDS, FEED)?;
    pipeline.link(FINDER, finder::CHANNEL_CROP, OCR)?;

    pipeline.link(OCR, ocr::CHANNEL_TEXT, LOOKUP)?;
    pipeline.link(LOOKUP, lookup::CHANNEL_PLATE_INFO, DISPLAY)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::tests::wait_until;
    use crate::pipeline::StageState;
    use crate::video::synthetic::{SyntheticConfig, SyntheticFrameProvider};
    use std::fs;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::tempdir;

    fn synthetic(frames: usize) -> Box<dyn FrameProvider> {
        Box::new(
            SyntheticFrameProvider::new(SyntheticConfig {
                frames: Some(frames),
                ..Default::default()
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_wiring_matches_demo_topology() {
        let dir = tempdir().unwrap();
        let pipeline =
            build_pipeline(&RunConfig::default(), synthetic(1), dir.path().to_path_buf(), None).unwrap();

        let names: Vec<&str> = pipeline.stages().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec![FEED, FINDER, OCR, LOOKUP, DISPLAY]);

        let finder = pipeline.get(FINDER).unwrap();
        assert_eq!(finder.channels(), vec!["main", "coords", "crop"]);
        let display = pipeline.get(DISPLAY).unwrap();
        assert!(display.linked().is_empty());
    }

    #[test]
    fn test_synthetic_run_produces_frames_and_plates() {
        let dir = tempdir().unwrap();
        let mut config = RunConfig::default();
        config.display.save_every = 5;
        let pipeline =
            build_pipeline(&config, synthetic(20), dir.path().to_path_buf(), None).unwrap();

        pipeline.start_all().unwrap();
        let feed = pipeline.get(FEED).unwrap().clone();
        let lookup = pipeline.get(LOOKUP).unwrap().clone();
        let display = pipeline.get(DISPLAY).unwrap().clone();

        assert!(wait_until(|| feed.state() == StageState::Stopped));
        assert!(wait_until(|| lookup.stats().delivered.load(Ordering::Relaxed) > 0));
        assert!(wait_until(|| display.mailbox().is_empty()));
        std::thread::sleep(Duration::from_millis(100));
        pipeline.shutdown_all().unwrap();

        assert!(dir.path().join("frames").join("frame_000000.png").exists());
        let plates: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("plates.json")).unwrap())
                .unwrap();
        let plates = plates.as_array().unwrap();
        assert!(!plates.is_empty());
        assert_eq!(plates[0]["known"], false);
        assert_eq!(plates[0]["plate"].as_str().unwrap().len(), 7);

        let progress = pipeline.to_progress_json();
        assert_eq!(progress["active_stages"], 0);
    }
}
