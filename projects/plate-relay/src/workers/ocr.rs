// Text reader: turns plate crops into plate text
//
// Recognition sits behind `Recognizer` so a real OCR engine can replace the
// built-in signature reader without touching the stage.

use crate::pipeline::{Outputs, Processor, StageContext};
use crate::workers::types::{unexpected, Job};
use anyhow::{bail, Result};
use image::{imageops, imageops::FilterType, RgbImage};
use serde::Deserialize;

pub const CHANNEL_TEXT: &str = "text";

/// Characters that can appear on a plate. No I, O or Q.
pub const PLATE_ALPHABET: &str = "0123456789ABCDEFGHJKLMNPRSTUVWXYZ";

pub trait Recognizer: Send {
    /// Reads the text of one plate crop; `None` when nothing legible.
    fn recognize(&mut self, crop: &RgbImage) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub text_length: u32,
    /// Crops narrower than this are not worth reading.
    pub min_crop_width: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            text_length: 7,
            min_crop_width: 16,
        }
    }
}

/// Deterministic stand-in for OCR: squeezes the crop into one row of
/// `text_length` cells and maps each cell's brightness onto the alphabet.
/// The same plate always reads the same.
pub struct SignatureRecognizer {
    config: OcrConfig,
}

impl SignatureRecognizer {
    pub fn new(config: OcrConfig) -> Result<Self> {
        if config.text_length == 0 {
            bail!("text_length must be positive");
        }
        Ok(Self { config })
    }
}

impl Recognizer for SignatureRecognizer {
    fn recognize(&mut self, crop: &RgbImage) -> Result<Option<String>> {
        if crop.width() < self.config.min_crop_width || crop.height() == 0 {
            return Ok(None);
        }

        let gray = imageops::grayscale(crop);
        let cells = imageops::resize(&gray, self.config.text_length, 1, FilterType::Triangle);
        let alphabet = PLATE_ALPHABET.as_bytes();
        let text = cells
            .pixels()
            .map(|p| alphabet[p.0[0] as usize * alphabet.len() / 256] as char)
            .collect();
        Ok(Some(text))
    }
}

pub struct TextReader {
    recognizer: Box<dyn Recognizer>,
}

impl TextReader {
    pub fn new(recognizer: Box<dyn Recognizer>) -> Self {
        Self { recognizer }
    }
}

impl Processor<Job> for TextReader {
    fn process(&mut self, job: Job, ctx: &StageContext<'_>) -> Result<Outputs<Job>> {
        let crop = match job {
            Job::Crop(crop) => crop,
            other => return Err(unexpected(ctx.name(), &other)),
        };

        let text = self.recognizer.recognize(&crop)?;
        if let Some(text) = &text {
            tracing::debug!("{}: read {}", ctx.name(), text);
        }
        Ok(Outputs::none().emit_opt(CHANNEL_TEXT, text.map(Job::Text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::tests::with_context;
    use crate::video::synthetic::{SyntheticConfig, SyntheticFrameProvider};
    use crate::workers::finder::{FinderConfig, PlateFinder};
    use image::Rgb;
    use std::sync::Arc;

    fn plate_crop(index: usize) -> RgbImage {
        let provider = SyntheticFrameProvider::new(SyntheticConfig::default()).unwrap();
        let finder = PlateFinder::new(FinderConfig::default()).unwrap();
        let frame = provider.render(index);
        let rect = finder.locate(&frame).unwrap();
        imageops::crop_imm(&frame, rect.x, rect.y, rect.w, rect.h).to_image()
    }

    #[test]
    fn test_reading_is_stable_for_same_pattern() {
        let mut recognizer = SignatureRecognizer::new(OcrConfig::default()).unwrap();
        let first = recognizer.recognize(&plate_crop(0)).unwrap().unwrap();
        let again = recognizer.recognize(&plate_crop(1)).unwrap().unwrap();

        assert_eq!(first.len(), 7);
        assert_eq!(first, again);
        assert!(first.chars().all(|c| PLATE_ALPHABET.contains(c)));
    }

    #[test]
    fn test_uniform_crop_reads_one_character() {
        let mut recognizer = SignatureRecognizer::new(OcrConfig::default()).unwrap();
        let white = RgbImage::from_pixel(40, 10, Rgb([255, 255, 255]));
        let black = RgbImage::from_pixel(40, 10, Rgb([0, 0, 0]));
        assert_eq!(recognizer.recognize(&white).unwrap().unwrap(), "ZZZZZZZ");
        assert_eq!(recognizer.recognize(&black).unwrap().unwrap(), "0000000");
    }

    #[test]
    fn test_narrow_crop_emits_nothing() {
        let recognizer = SignatureRecognizer::new(OcrConfig::default()).unwrap();
        let mut reader = TextReader::new(Box::new(recognizer));
        let crop = Arc::new(RgbImage::new(4, 4));

        let (outputs, _) = with_context("ocr", |ctx| reader.process(Job::Crop(crop), ctx));
        let outputs = outputs.unwrap();

        assert_eq!(outputs.len(), 1);
        assert!(outputs.get(CHANNEL_TEXT).is_none());
    }

    #[test]
    fn test_reader_emits_text() {
        let recognizer = SignatureRecognizer::new(OcrConfig::default()).unwrap();
        let mut reader = TextReader::new(Box::new(recognizer));
        let crop = Arc::new(plate_crop(0));

        let (outputs, _) = with_context("ocr", |ctx| reader.process(Job::Crop(crop), ctx));
        assert!(matches!(outputs.unwrap().get(CHANNEL_TEXT), Some(Job::Text(t)) if t.len() == 7));
    }
}
