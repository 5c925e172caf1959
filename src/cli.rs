use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::departure::Language;

#[derive(Parser, Debug)]
#[command(
    name = "terminal-announcer",
    version,
    about = "Multi-language voice announcements for bus terminal departures"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, value_name = "PATH", help = "Departure/operator snapshot (overrides config)")]
    pub store: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Announce(AnnounceArgs),
    Watch(WatchArgs),
    TestTts(TestTtsArgs),
    Cache(CacheArgs),
    Backends(BackendsArgs),
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct AnnounceArgs {
    #[arg(long, help = "Departure id")]
    pub departure: String,

    #[arg(long, help = "Override the operator's repeat count (1-10)")]
    pub repeat: Option<u8>,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[arg(long, help = "Announce every boarding transition even if automatic mode is off")]
    pub manual: bool,
}

#[derive(Args, Debug)]
pub struct TestTtsArgs {
    #[arg(long, help = "Text to synthesize")]
    pub text: Option<String>,

    #[arg(long, value_enum, default_value = "english", help = "Language of the text")]
    pub language: Language,

    #[arg(long, help = "Use this operator's voice settings")]
    pub operator: Option<String>,

    #[arg(long, value_name = "PATH", help = "Save audio to file")]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Skip playback")]
    pub no_play: bool,
}

#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Drop every cached clip for an operator, in both tiers.
    Clear {
        #[arg(long)]
        operator: String,
    },
    /// Remove expired entries now.
    Sweep,
    /// Print the local cache directory.
    Path,
}

#[derive(Args, Debug)]
pub struct BackendsArgs {
    #[arg(long, help = "Output as JSON")]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[arg(long, help = "Show current config as JSON")]
    pub show: bool,

    #[arg(long, help = "Create default config file")]
    pub init: bool,

    #[arg(long, help = "Validate configuration")]
    pub validate: bool,
}
