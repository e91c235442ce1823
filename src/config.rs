use std::path::{Path, PathBuf};
use anyhow::Result;

use serde::{Serialize, Deserialize};
use tracing::{error, info};

use crate::ArgParse;

// Sane defaults for CastRadio
const PORT: u16                = 8090;
const HOST: &str               = "0.0.0.0";
const NAME: &str               = "CastRadio";
const GAP_MS: u64              = 500;
const STANDARD_BITRATE: &str   = "128k";
const STANDARD_SAMPLERATE: &str = "44100";
const CACHE_DIR: &str          = ".cache";
const CACHE_TTL_MINUTES: u64   = 10;
const META_INTERVAL: usize     = 8192;

pub const SERVER_ID: &str      = "CastRadio 0.1.0";

const MAX_CLIENTS: usize       = 400;
const HEADER_TIMEOUT: u64      = 15000;
const HTTP_MAX_LEN: usize      = 8192;

/// Server configuration, merged from a JSON file and command line flags.
/// Flags win over file values.
#[derive(Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_val_port")]
    pub port: u16,
    #[serde(default = "default_val_host")]
    pub host: String,
    /// Directory walked recursively for .mp3 files on every track selection
    #[serde(default = "default_val_directory")]
    pub directory: PathBuf,
    /// Station name, also sent as the icy-name header
    #[serde(default = "default_val_name")]
    pub name: String,
    #[serde(default)]
    pub random: bool,
    #[serde(default)]
    pub debug: bool,
    /// Silence between tracks in milliseconds
    #[serde(default = "default_val_gap_ms")]
    pub gap_ms: u64,
    /// Transcode every track to the standard bitrate/sample rate before airing
    #[serde(default)]
    pub normalize: bool,
    /// Target bitrate handed to the transcoder, e.g. "128k"
    #[serde(default = "default_val_standard_bitrate")]
    pub standard_bitrate: String,
    /// Target sample rate handed to the transcoder, e.g. "44100"
    #[serde(default = "default_val_standard_sample_rate")]
    pub standard_sample_rate: String,
    #[serde(default = "default_val_cache_dir")]
    pub cache_dir: PathBuf,
    /// Minutes a cached transcode may sit unused before the sweeper deletes it.
    /// 0 disables sweeping entirely.
    #[serde(default = "default_val_cache_ttl_minutes")]
    pub cache_ttl_minutes: u64,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub notice1: String,
    #[serde(default)]
    pub notice2: String,
    /// Number of audio bytes between inline metadata blocks for clients
    /// that asked for them
    /// https://thecodeartist.blogspot.com/2013/02/shoutcast-internet-radio-protocol.html
    #[serde(default = "default_val_meta_interval", rename = "meta_interval")]
    pub metaint: usize,
    /// Predefined limits that the server shall not surpass
    #[serde(default = "default_val_limits")]
    pub limits: Limits
}

#[derive(Serialize, Deserialize)]
pub struct Limits {
    /// Max number of concurrent connections
    #[serde(default = "default_val_limit_clients")]
    pub clients: usize,
    /// Max time in millis we wait for a client to send its header
    #[serde(default = "default_val_limit_header_timeout")]
    pub header_timeout: u64,
    /// Max http request size in bytes we are willing to accept
    #[serde(default = "default_val_limit_http_max_len")]
    pub http_max_len: usize
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            port: default_val_port(),
            host: default_val_host(),
            directory: default_val_directory(),
            name: default_val_name(),
            random: false,
            debug: false,
            gap_ms: default_val_gap_ms(),
            normalize: false,
            standard_bitrate: default_val_standard_bitrate(),
            standard_sample_rate: default_val_standard_sample_rate(),
            cache_dir: default_val_cache_dir(),
            cache_ttl_minutes: default_val_cache_ttl_minutes(),
            genre: String::new(),
            url: String::new(),
            notice1: String::new(),
            notice2: String::new(),
            metaint: default_val_meta_interval(),
            limits: default_val_limits()
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            clients: default_val_limit_clients(),
            header_timeout: default_val_limit_header_timeout(),
            http_max_len: default_val_limit_http_max_len()
        }
    }
}

fn default_val_port() -> u16 { PORT }
fn default_val_host() -> String { HOST.to_owned() }
fn default_val_directory() -> PathBuf { PathBuf::from(".") }
fn default_val_name() -> String { NAME.to_owned() }
fn default_val_gap_ms() -> u64 { GAP_MS }
fn default_val_standard_bitrate() -> String { STANDARD_BITRATE.to_owned() }
fn default_val_standard_sample_rate() -> String { STANDARD_SAMPLERATE.to_owned() }
fn default_val_cache_dir() -> PathBuf { PathBuf::from(CACHE_DIR) }
fn default_val_cache_ttl_minutes() -> u64 { CACHE_TTL_MINUTES }
fn default_val_meta_interval() -> usize { META_INTERVAL }
fn default_val_limits() -> Limits { Limits::default() }

fn default_val_limit_clients() -> usize { MAX_CLIENTS }
fn default_val_limit_header_timeout() -> u64 { HEADER_TIMEOUT }
fn default_val_limit_http_max_len() -> usize { HTTP_MAX_LEN }

impl Settings {
    pub fn load(config_path: &str) -> Self {
        match std::fs::read_to_string(config_path) {
            Ok(v) => {
                match Self::from_string(&v) {
                    Ok(v) => {
                        info!("Loaded configuration from {}", config_path);
                        v
                    },
                    Err(e) => {
                        error!("Loading config file {} failed: {}", config_path, e);
                        std::process::exit(1);
                    }
                }
            },
            Err(e) => {
                error!("Reading config file {} failed: {}", config_path, e);
                std::process::exit(1);
            }
        }
    }

    pub fn from_string(config: &str) -> Result<Self> {
        Ok(serde_json::from_str::<Settings>(config)?)
    }

    /// Explicit command line flags override whatever the file said
    pub fn merge_args(&mut self, args: &ArgParse) {
        if let Some(v) = args.port { self.port = v; }
        if let Some(v) = args.host.as_ref() { self.host = v.clone(); }
        if let Some(v) = args.directory.as_ref() { self.directory = PathBuf::from(v); }
        if let Some(v) = args.name.as_ref() { self.name = v.clone(); }
        if let Some(v) = args.gap_ms { self.gap_ms = v; }
        if args.random { self.random = true; }
        if args.normalize { self.normalize = true; }
        if args.debug { self.debug = true; }

        if let Ok(abs) = std::fs::canonicalize(&self.directory) {
            self.directory = abs;
        }
    }

    pub fn create_default(config_path: &str) {
        let settings = serde_json::to_string_pretty(&Self::default())
            .expect("Can't serialize server settings");
        match std::fs::write(config_path, settings) {
            Ok(_) => info!("Default config file written to {}", config_path),
            Err(e) => error!("Creating default config at {} failed: {}", config_path, e)
        }
    }

    /// Method to verify if current settings are sane returning number of errors found
    pub fn verify(&self) -> usize {
        let mut errors = 0;

        if !Path::new(&self.directory).is_dir() {
            error!("Music directory {} does not exist or is not a directory.", self.directory.display());
            errors += 1;
        }

        if self.metaint == 0 {
            error!("meta_interval can't be 0.");
            errors += 1;
        }

        if self.limits.clients == 0 {
            error!("limits.clients can't be 0.");
            errors += 1;
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.port, 8090);
        assert_eq!(s.host, "0.0.0.0");
        assert_eq!(s.gap_ms, 500);
        assert_eq!(s.standard_bitrate, "128k");
        assert_eq!(s.standard_sample_rate, "44100");
        assert_eq!(s.cache_ttl_minutes, 10);
        assert_eq!(s.metaint, 8192);
        assert!(!s.random);
        assert!(!s.normalize);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s = Settings::from_string(r#"{"port": 9000, "name": "Late Night"}"#).unwrap();
        assert_eq!(s.port, 9000);
        assert_eq!(s.name, "Late Night");
        assert_eq!(s.metaint, 8192);
        assert_eq!(s.gap_ms, 500);
    }

    #[test]
    fn flags_override_file_values() {
        let mut s = Settings::from_string(r#"{"port": 9000, "random": false}"#).unwrap();
        let args = crate::ArgParse {
            config_file: None,
            gen: false,
            port: Some(9400),
            host: None,
            directory: None,
            name: Some("Flagged".to_owned()),
            random: true,
            gap_ms: None,
            normalize: false,
            debug: false
        };
        s.merge_args(&args);
        assert_eq!(s.port, 9400);
        assert_eq!(s.name, "Flagged");
        assert!(s.random);
    }
}
