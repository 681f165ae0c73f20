use super::FrameProvider;
use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Plays back the still images of a directory, in file name order.
pub struct DirectoryFrameProvider {
    root: PathBuf,
    looping: bool,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl DirectoryFrameProvider {
    pub fn new(root: impl AsRef<Path>, looping: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(anyhow!("Frames directory NOT FOUND at: {:?}", root));
        }

        Ok(Self {
            root,
            looping,
            files: Vec::new(),
            cursor: 0,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.files.len()
    }
}

pub fn list_frames(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| IMAGE_EXTENSIONS.contains(&s.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}

impl FrameProvider for DirectoryFrameProvider {
    fn start(&mut self) -> Result<()> {
        self.files = list_frames(&self.root);
        self.cursor = 0;
        if self.files.is_empty() {
            return Err(anyhow!("No image files found under {:?}", self.root));
        }
        tracing::info!(
            "DirectoryFrameProvider: {} frames under {:?} (looping={})",
            self.files.len(),
            self.root,
            self.looping
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.cursor >= self.files.len() {
            if !self.looping || self.files.is_empty() {
                return Ok(None);
            }
            self.cursor = 0;
        }

        let path = &self.files[self.cursor];
        self.cursor += 1;
        let frame = image::open(path)
            .with_context(|| format!("Failed to decode frame at: {:?}", path))?
            .to_rgb8();
        Ok(Some(frame))
    }

    fn stop(&mut self) -> Result<()> {
        self.files.clear();
        self.cursor = 0;
        Ok(())
    }
}
