use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON run configuration (stage options and collaborator settings)
    #[arg(long, env = "PLATE_RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory of still frames to play back; synthetic frames when omitted
    #[arg(long, env = "PLATE_RELAY_FRAMES_DIR")]
    pub frames_dir: Option<PathBuf>,

    /// Play the frames directory in a loop
    #[arg(long, default_value_t = false)]
    pub looping: bool,

    /// Root directory for output artifacts
    #[arg(long, env = "PLATE_RELAY_OUTPUT_DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// CSV registry with a plate,stolen,vin,year header
    #[arg(long, env = "PLATE_RELAY_PLATES_CSV")]
    pub plates_csv: Option<PathBuf>,

    /// Stop the feed after this many frames
    #[arg(long)]
    pub max_frames: Option<usize>,

    /// Stop the whole pipeline after this many seconds
    #[arg(long)]
    pub duration_secs: Option<u64>,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
