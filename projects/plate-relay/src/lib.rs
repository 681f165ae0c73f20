pub mod pipeline;
pub mod run_config;
pub mod video;
pub mod workers;
