//! CLI configuration.
//!
//! Sources, lowest priority first: built-in defaults, `plumb.toml` in the
//! working directory (or the file given with `--config`), then `PLUMB_*`
//! environment variables such as `PLUMB_GIT_DIR` or `PLUMB_OFS_DELTA`.

use plumb_odb::{CompressionLevel, OdbOptions};
use plumb_protocol::FetchOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Configuration file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "plumb.toml";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "PLUMB";

/// Configuration for the plumb CLI.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Git directory holding `objects/`.
    pub git_dir: PathBuf,
    /// Log level used when no `-v` flag is given.
    pub log_level: String,
    /// `User-Agent` and `agent=` capability for fetches.
    pub agent: String,
    /// zlib level for loose objects.
    pub compression: CompressionLevel,
    /// Ask for side-band when fetching.
    pub side_band: bool,
    /// Ask for ofs-delta packs when fetching.
    pub ofs_delta: bool,
    /// Accept thin packs when fetching.
    pub thin_pack: bool,
    /// `have` lines per batch.
    pub have_batch_size: usize,
    /// Resolved pack entries kept in memory.
    pub delta_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        let odb = OdbOptions::default();
        let fetch = FetchOptions::default();
        Self {
            git_dir: PathBuf::from(".git"),
            log_level: "warn".to_string(),
            agent: fetch.agent,
            compression: odb.compression,
            side_band: fetch.side_band,
            ofs_delta: fetch.ofs_delta,
            thin_pack: true,
            have_batch_size: fetch.have_batch_size,
            delta_cache_size: odb.delta_cache_size,
        }
    }
}

impl Config {
    /// Loads the configuration from `path` (or `plumb.toml`) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        Self::load_with_env(path, config::Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with_env(
        path: Option<&Path>,
        env: config::Environment,
    ) -> Result<Self, config::ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        config::Config::builder()
            .add_source(file)
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Object database options.
    pub fn odb_options(&self) -> OdbOptions {
        OdbOptions {
            compression: self.compression,
            delta_cache_size: self.delta_cache_size,
        }
    }

    /// Fetch options; shallow settings come from the command line.
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            agent: self.agent.clone(),
            side_band: self.side_band,
            ofs_delta: self.ofs_delta,
            thin_pack: self.thin_pack,
            have_batch_size: self.have_batch_size,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(Config::load_with_env(Some(&missing), env(&[])).is_err());

        let config = Config::load_with_env(None, env(&[])).unwrap();
        assert!(!config.ofs_delta);
        assert!(config.side_band);
        assert_eq!(config.have_batch_size, 32);
    }

    #[test]
    fn test_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plumb.toml");
        std::fs::write(
            &path,
            "git_dir = \"/srv/repo.git\"\ncompression = \"best\"\nofs_delta = true\nhave_batch_size = 8\n",
        )
        .unwrap();

        let config = Config::load_with_env(Some(&path), env(&[])).unwrap();
        assert_eq!(config.git_dir, PathBuf::from("/srv/repo.git"));
        assert_eq!(config.compression, CompressionLevel::Best);
        assert!(config.ofs_delta);
        assert_eq!(config.have_batch_size, 8);
        assert_eq!(config.delta_cache_size, 256);

        let config = Config::load_with_env(
            Some(&path),
            env(&[("PLUMB_HAVE_BATCH_SIZE", "64"), ("PLUMB_AGENT", "ci-bot")]),
        )
        .unwrap();
        assert_eq!(config.have_batch_size, 64);
        assert_eq!(config.agent, "ci-bot");
        assert!(config.ofs_delta);
    }

    #[test]
    fn test_option_conversion() {
        let config = Config {
            compression: CompressionLevel::Fast,
            delta_cache_size: 16,
            ofs_delta: true,
            ..Default::default()
        };
        let odb = config.odb_options();
        assert_eq!(odb.compression, CompressionLevel::Fast);
        assert_eq!(odb.delta_cache_size, 16);

        let fetch = config.fetch_options();
        assert!(fetch.ofs_delta);
        assert!(fetch.thin_pack);
        assert_eq!(fetch.agent, config.agent);
    }
}
