//! Configuration resolution for the terminal bridge.
//!
//! Every value follows a three-tier priority:
//!
//! 1. **Parameter** - Explicitly provided value (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TERMINAL_LISTEN_PORT` | 8080 | HTTP listen port |
//! | `TERMINAL_RECORDING_DIR` | `./data/terminal-recordings` | Recording directory |
//! | `TERMINAL_INVENTORY` | `./data/inventory.json` | Host and credential inventory |
//! | `SSH_CONNECT_TIMEOUT` | 10s | SSH dial timeout in seconds |
//! | `SSH_COMPRESSION` | false | Offer zlib compression |
//! | `TERMINAL_IDLE_TIMEOUT` | 300s | WebSocket inactivity deadline in seconds |
//! | `TERMINAL_OUTPUT_QUEUE` | 64 | Output chunks buffered per session |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default HTTP listen port
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Default recording directory
pub const DEFAULT_RECORDING_DIR: &str = "./data/terminal-recordings";

/// Default inventory file
pub const DEFAULT_INVENTORY_PATH: &str = "./data/inventory.json";

/// Default SSH dial timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default WebSocket inactivity deadline in seconds
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Default output queue depth in chunks
pub const DEFAULT_OUTPUT_QUEUE: usize = 64;

pub const LISTEN_PORT_ENV_VAR: &str = "TERMINAL_LISTEN_PORT";
pub const RECORDING_DIR_ENV_VAR: &str = "TERMINAL_RECORDING_DIR";
pub const INVENTORY_ENV_VAR: &str = "TERMINAL_INVENTORY";
pub const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";
pub const IDLE_TIMEOUT_ENV_VAR: &str = "TERMINAL_IDLE_TIMEOUT";
pub const OUTPUT_QUEUE_ENV_VAR: &str = "TERMINAL_OUTPUT_QUEUE";

/// Fully resolved settings for one server process.
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    pub listen_port: u16,
    pub recording_dir: PathBuf,
    pub inventory_path: PathBuf,
    pub connect_timeout: Duration,
    pub compression: bool,
    pub idle_timeout: Duration,
    pub output_queue: usize,
}

impl TerminalConfig {
    /// Resolve every setting from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            listen_port: resolve_listen_port(None),
            recording_dir: resolve_recording_dir(None),
            inventory_path: resolve_inventory_path(None),
            connect_timeout: Duration::from_secs(resolve_connect_timeout(None)),
            compression: resolve_compression(None),
            idle_timeout: Duration::from_secs(resolve_idle_timeout(None)),
            output_queue: resolve_output_queue(None),
        }
    }
}

/// Parameter, then parsable environment value, then default.
fn resolve<T: FromStr>(param: Option<T>, env_var: &str, default: T) -> T {
    if let Some(value) = param {
        return value;
    }

    if let Ok(raw) = env::var(env_var)
        && let Ok(value) = raw.trim().parse::<T>()
    {
        return value;
    }

    default
}

pub fn resolve_listen_port(port_param: Option<u16>) -> u16 {
    resolve(port_param, LISTEN_PORT_ENV_VAR, DEFAULT_LISTEN_PORT)
}

pub fn resolve_recording_dir(dir_param: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = dir_param {
        return dir;
    }

    match env::var(RECORDING_DIR_ENV_VAR) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DEFAULT_RECORDING_DIR),
    }
}

pub fn resolve_inventory_path(path_param: Option<PathBuf>) -> PathBuf {
    if let Some(path) = path_param {
        return path;
    }

    match env::var(INVENTORY_ENV_VAR) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_INVENTORY_PATH),
    }
}

/// SSH dial timeout in seconds. Zero is rejected in favour of the default.
pub fn resolve_connect_timeout(timeout_param: Option<u64>) -> u64 {
    match resolve(timeout_param, CONNECT_TIMEOUT_ENV_VAR, DEFAULT_CONNECT_TIMEOUT_SECS) {
        0 => DEFAULT_CONNECT_TIMEOUT_SECS,
        secs => secs,
    }
}

/// Inactivity deadline in seconds. Zero is rejected in favour of the default.
pub fn resolve_idle_timeout(timeout_param: Option<u64>) -> u64 {
    match resolve(timeout_param, IDLE_TIMEOUT_ENV_VAR, DEFAULT_IDLE_TIMEOUT_SECS) {
        0 => DEFAULT_IDLE_TIMEOUT_SECS,
        secs => secs,
    }
}

/// Output queue depth; a zero-capacity channel is not allowed by tokio.
pub fn resolve_output_queue(queue_param: Option<usize>) -> usize {
    match resolve(queue_param, OUTPUT_QUEUE_ENV_VAR, DEFAULT_OUTPUT_QUEUE) {
        0 => DEFAULT_OUTPUT_QUEUE,
        depth => depth,
    }
}

/// Resolve the compression setting with priority: parameter -> env var -> default (false)
pub fn resolve_compression(compress_param: Option<bool>) -> bool {
    if let Some(compress) = compress_param {
        return compress;
    }

    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    false
}
