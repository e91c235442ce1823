pub mod config;
pub mod server;
pub mod client;
pub mod request;
pub mod response;
pub mod api;
pub mod playlist;
pub mod transcode;
pub mod frame;
pub mod store;
pub mod producer;
pub mod broadcast;
pub mod utils;

use arg::Args;

#[derive(Debug, Args)]
pub struct ArgParse {
    #[arg(short = "c", long = "config")]
    /// Configuration file path (JSON), merged under any explicit flags
    pub config_file: Option<String>,
    #[arg(short = "g", long = "gen")]
    /// Generate a config file with default values at the --config path
    pub gen: bool,
    #[arg(short = "p", long = "port")]
    /// Port to listen on
    pub port: Option<u16>,
    #[arg(long = "host")]
    /// Address to bind to
    pub host: Option<String>,
    #[arg(short = "d", long = "directory")]
    /// Directory holding the MP3 files to broadcast
    pub directory: Option<String>,
    #[arg(short = "n", long = "name")]
    /// Station name sent in the icy-name header
    pub name: Option<String>,
    #[arg(short = "r", long = "random")]
    /// Pick the next track uniformly at random instead of round-robin
    pub random: bool,
    #[arg(long = "gap")]
    /// Silence between tracks in milliseconds
    pub gap_ms: Option<u64>,
    #[arg(long = "normalize")]
    /// Transcode every track to the standard bitrate/sample rate before airing
    pub normalize: bool,
    #[arg(long = "debug")]
    /// Enable debug logging
    pub debug: bool
}
