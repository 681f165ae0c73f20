pub mod directory_reader;
pub mod synthetic;

use anyhow::Result;
use image::RgbImage;

pub use directory_reader::DirectoryFrameProvider;
pub use synthetic::SyntheticFrameProvider;

/// A source of frames for the feed stage.
///
/// `start` and `stop` run on the feed's thread, around its loop.
pub trait FrameProvider: Send {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Next frame, or `None` at the end of the stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}
