use crate::pipeline::{Outputs, Processor, StageContext};
use crate::workers::types::{unexpected, Job, PlateInfo};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Write every Nth frame; 0 writes none.
    pub save_every: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { save_every: 10 }
    }
}

/// Sink stage: saves sampled frames as PNG and collects plate sightings
/// into `plates.json` when it stops.
pub struct FrameDisplay {
    output_dir: PathBuf,
    config: DisplayConfig,
    frames_seen: usize,
    frames_written: usize,
    plates: Vec<PlateInfo>,
}

impl FrameDisplay {
    pub fn new(output_dir: PathBuf, config: DisplayConfig) -> Self {
        Self {
            output_dir,
            config,
            frames_seen: 0,
            frames_written: 0,
            plates: Vec::new(),
        }
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.output_dir.join("frames")
    }

    pub fn plates_path(&self) -> PathBuf {
        self.output_dir.join("plates.json")
    }
}

impl Processor<Job> for FrameDisplay {
    fn on_starting(&mut self, _ctx: &StageContext<'_>) -> Result<()> {
        self.frames_seen = 0;
        self.frames_written = 0;
        self.plates.clear();
        let frames_dir = self.frames_dir();
        fs::create_dir_all(&frames_dir)
            .with_context(|| format!("Failed to create {:?}", frames_dir))?;
        Ok(())
    }

    fn process(&mut self, job: Job, ctx: &StageContext<'_>) -> Result<Outputs<Job>> {
        match job {
            Job::Frame(frame) => {
                let index = self.frames_seen;
                self.frames_seen += 1;
                if self.config.save_every == 0 || index % self.config.save_every != 0 {
                    return Ok(Outputs::none());
                }

                let filename = format!("frame_{:06}.png", index);
                let path = self.frames_dir().join(&filename);
                if let Err(e) = frame.save(&path) {
                    tracing::warn!("Failed to write frame image {}: {}", filename, e);
                } else {
                    self.frames_written += 1;
                }
            }
            Job::Plate(info) => {
                tracing::info!(
                    "Plate {} (known: {}, stolen: {})",
                    info.plate,
                    info.known,
                    info.stolen
                );
                self.plates.push(info);
            }
            other => return Err(unexpected(ctx.name(), &other)),
        }
        Ok(Outputs::none())
    }

    fn on_stopped(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.plates)?;
        fs::write(self.plates_path(), json)?;
        tracing::info!(
            "{}: {} frames seen, {} written, {} plates recorded",
            ctx.name(),
            self.frames_seen,
            self.frames_written,
            self.plates.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::tests::with_context;
    use chrono::Utc;
    use image::RgbImage;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_writes_every_nth_frame_and_plates_json() {
        let dir = tempdir().unwrap();
        let mut display = FrameDisplay::new(dir.path().to_path_buf(), DisplayConfig { save_every: 2 });
        with_context("display", |ctx| display.on_starting(ctx)).0.unwrap();

        let frame = Arc::new(RgbImage::new(4, 4));
        for _ in 0..5 {
            let job = Job::Frame(frame.clone());
            with_context("display", |ctx| display.process(job, ctx)).0.unwrap();
        }
        let plate = PlateInfo {
            plate: "ABC123".into(),
            known: false,
            stolen: false,
            vin: None,
            year: None,
            seen_at: Utc::now(),
        };
        with_context("display", |ctx| display.process(Job::Plate(plate), ctx)).0.unwrap();
        with_context("display", |ctx| display.on_stopped(ctx)).0.unwrap();

        let frames_dir = dir.path().join("frames");
        assert!(frames_dir.join("frame_000000.png").exists());
        assert!(!frames_dir.join("frame_000001.png").exists());
        assert!(frames_dir.join("frame_000004.png").exists());

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("plates.json")).unwrap()).unwrap();
        assert_eq!(json[0]["plate"], "ABC123");
        assert!(json[0].get("vin").is_none());
    }

    #[test]
    fn test_rejects_text_jobs() {
        let dir = tempdir().unwrap();
        let mut display = FrameDisplay::new(dir.path().to_path_buf(), DisplayConfig::default());
        let (outputs, _) = with_context("display", |ctx| display.process(Job::Text("x".into()), ctx));
        assert!(outputs.is_err());
    }
}
