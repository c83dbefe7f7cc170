use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cfg = live_visualizer::config::Config::parse();
    if cfg.list_devices {
        live_visualizer::audio::list_input_devices()?;
        return Ok(());
    }

    live_visualizer::app::run(cfg)
}
