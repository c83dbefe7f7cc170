use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "live-visualizer", version, about = "Live-coding, audio-reactive terminal visuals")]
pub struct Config {
    /// Module script to watch; created with the default module if missing.
    #[arg(long)]
    pub script: Option<PathBuf>,

    #[arg(long)]
    pub device: Option<String>,

    #[arg(long, default_value_t = 60)]
    pub fps: u32,

    #[arg(long, default_value_t = false)]
    pub list_devices: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub sync_updates: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub hud: bool,
}
