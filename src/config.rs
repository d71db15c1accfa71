// src/config.rs
use dotenv::dotenv;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

pub struct Config {
    pub listen: SocketAddr,
    pub state_file: PathBuf,
    pub tmp_dir: PathBuf,
    pub max_status: Option<usize>,
    pub fanout: FanoutConfig,
}

/// Timing of the per-viewer delivery loop.
#[derive(Debug, Clone, Copy)]
pub struct FanoutConfig {
    pub tick: Duration,
    /// Idle ticks before a keepalive is pushed.
    pub keepalive_ticks: u32,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            keepalive_ticks: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let state_file = PathBuf::from(
            env::var("LIVEMAP_STATE_FILE")
                .map_err(|_| Error::Config("LIVEMAP_STATE_FILE is not set".into()))?,
        );
        let tmp_dir = match env::var("LIVEMAP_TMP_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => default_tmp_dir(&state_file),
        };

        let defaults = FanoutConfig::default();
        let tick_ms: u64 = parse_var("LIVEMAP_TICK_MS")?
            .unwrap_or(defaults.tick.as_millis() as u64);

        Ok(Config {
            listen: parse_var::<SocketAddr>("LIVEMAP_LISTEN")?
                .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080))),
            state_file,
            tmp_dir,
            max_status: parse_var("LIVEMAP_MAX_STATUS")?,
            fanout: FanoutConfig {
                tick: Duration::from_millis(tick_ms.max(1)),
                keepalive_ticks: parse_var::<u32>("LIVEMAP_KEEPALIVE_TICKS")?
                    .unwrap_or(defaults.keepalive_ticks)
                    .max(1),
            },
        })
    }
}

// Renames are only atomic within one filesystem, so stay next to the state file.
fn default_tmp_dir(state_file: &Path) -> PathBuf {
    match state_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tmp_dir_defaults_to_state_file_parent() {
        assert_eq!(
            default_tmp_dir(Path::new("/var/lib/livemap/state.json")),
            PathBuf::from("/var/lib/livemap")
        );
        assert_eq!(default_tmp_dir(Path::new("state.json")), PathBuf::from("."));
    }
}
