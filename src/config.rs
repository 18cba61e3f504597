//! Runtime configuration.
//!
//! Every field has a default, so an empty TOML document (or no document at
//! all) yields a usable configuration:
//!
//! ```toml
//! cache_images = true
//!
//! [limits]
//! max_chain_blocks = 10000
//! yield_interval = 10
//! watchdog_interval = 100
//! max_entries = 4096
//! ```

use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;

/// Bounds applied to every traversal over untrusted container data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum number of linked blocks followed in one block chain.
    pub max_chain_blocks: usize,
    /// Yield to other threads every this many iterations.
    pub yield_interval: usize,
    /// Refresh the liveness watchdog every this many iterations.
    pub watchdog_interval: usize,
    /// Maximum number of directory entries loaded from one container.
    pub max_entries: usize,
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            max_chain_blocks: 10_000,
            yield_interval: 10,
            watchdog_interval: 100,
            max_entries: 4_096,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub limits: Limits,
    /// Share parsed containers through the process-wide image broker.
    pub cache_images: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            limits: Limits::default(),
            cache_images: true,
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> io::Result<Config> {
        toml::from_str(text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Config> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_limits() {
        let config = Config::from_toml_str(
            "cache_images = false\n[limits]\nmax_chain_blocks = 50\n",
        )
        .unwrap();
        assert!(!config.cache_images);
        assert_eq!(config.limits.max_chain_blocks, 50);
        assert_eq!(config.limits.yield_interval, 10);
    }

    #[test]
    fn test_malformed_document() {
        let error = Config::from_toml_str("limits = 3").unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }
}
