mod cli;

use anyhow::Result;
use cli::Args;
use indicatif::{ProgressBar, ProgressStyle};
use plate_relay::pipeline::StageState;
use plate_relay::run_config::RunConfig;
use plate_relay::video::{DirectoryFrameProvider, FrameProvider, SyntheticFrameProvider};
use plate_relay::workers::{build_pipeline, FEED};
use std::time::{Duration, Instant};

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if args.max_frames.is_some() {
        config.feed.max_frames = args.max_frames;
    }

    let provider: Box<dyn FrameProvider> = match &args.frames_dir {
        Some(dir) => Box::new(DirectoryFrameProvider::new(dir, args.looping)?),
        None => Box::new(SyntheticFrameProvider::new(config.synthetic.clone())?),
    };

    let pipeline = build_pipeline(&config, provider, args.output_dir.clone(), args.plates_csv.clone())?;
    let feed = pipeline
        .get(FEED)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Pipeline has no {} stage", FEED))?;

    pipeline.start_all()?;
    tracing::info!("Writing results to {:?}", args.output_dir);

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );

    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        if !matches!(feed.state(), StageState::Running | StageState::StopRequested) {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::info!("Time limit reached");
            break;
        }

        let summary: Vec<String> = pipeline
            .snapshots()
            .iter()
            .map(|s| format!("{} {}/{}", s.name, s.processed, s.queued))
            .collect();
        pb.set_message(summary.join("  "));
        pb.tick();
        std::thread::sleep(Duration::from_millis(200));
    }
    pb.finish_with_message("Done");

    let result = pipeline.shutdown_all();
    tracing::info!("Final progress: {}", pipeline.to_progress_json());
    result?;

    Ok(())
}
