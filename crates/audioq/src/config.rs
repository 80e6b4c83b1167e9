//! Configuration of the orchestration core.
//!
//! The configuration is read from a TOML file. Every key has a default, so an empty file (or
//! no file at all) is a valid configuration. Durations use the humantime format (`30s`, `5m`).
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::common::manager::info::ManagerType;
use crate::common::utils::time::humantime_serde;
use crate::resources::{ResourceMap, ResourceSet};

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub tokens: TokenConfig,
    pub remote: RemoteConfig,
    /// Added to the resources requested by every analysis script.
    pub base_resources: ResourceSet,
    /// Floor for every evaluated resource.
    pub minimum_resources: ResourceMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub manager: ManagerType,
    /// Run batch system commands on this host through `ssh`.
    pub ssh_target: Option<String>,
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Extra directives passed to `qsub`/`sbatch`, e.g. `-q qprod`.
    pub additional_args: Vec<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            manager: ManagerType::Pbs,
            ssh_target: None,
            command_timeout: Duration::from_secs(30),
            additional_args: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    pub pool_size: usize,
    /// How long a claimed item stays reserved for a single worker.
    #[serde(with = "humantime_serde")]
    pub lease: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Maximum number of items that may be queued or running on the cluster at once.
    pub max_in_flight: Option<usize>,
    #[serde(with = "humantime_serde")]
    pub reconcile_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            lease: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(5),
            max_in_flight: None,
            reconcile_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenConfig {
    /// Hex encoded key shared with the web API that verifies the tokens.
    pub secret_key: Option<String>,
    #[serde(with = "humantime_serde")]
    pub download_ttl: Duration,
    /// Added to the walltime of an item to get the lifetime of its status hook token.
    #[serde(with = "humantime_serde")]
    pub hook_slack: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            download_ttl: Duration::from_secs(60 * 60),
            hook_slack: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Directory on the cluster under which per item working directories are created.
    pub root: PathBuf,
    /// Base URL of the web API, used for downloads and status hooks.
    pub api_url: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/tmp/audioq"),
            api_url: "http://localhost:3000".to_string(),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("audioq").join(CONFIG_FILE_NAME))
}

impl Config {
    pub fn parse(data: &str) -> crate::Result<Config> {
        let config: Config = toml::from_str(data)?;
        Ok(config)
    }

    /// Loads the configuration from `path`, or from the default location if it exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path().filter(|path| path.is_file()) {
                Some(path) => path,
                None => {
                    log::debug!("No configuration file found, using defaults");
                    return Ok(Config::default());
                }
            },
        };
        log::debug!("Reading configuration from {}", path.display());
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("Cannot read configuration file {}", path.display()))?;
        Config::parse(&data)
            .with_context(|| format!("Invalid configuration file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::common::manager::info::ManagerType;
    use crate::config::Config;
    use crate::resources::{Polynomial, ResourceValue, ScalingProperty};

    #[test]
    fn parse_empty_config() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn parse_full_config() {
        let config = Config::parse(
            r#"
base_resources = { walltime = { coefficients = [2.0, 300.0], property = "duration" } }
minimum_resources = { ncpus = 1, mem = 1073741824 }

[queue]
manager = "slurm"
ssh_target = "login.cluster"
command_timeout = "1m"
additional_args = ["--partition=short"]

[worker]
pool_size = 8
lease = "10m"
poll_interval = "2s"
max_in_flight = 100
reconcile_interval = "30s"

[tokens]
secret_key = "00ff"
download_ttl = "2h"
hook_slack = "30m"

[remote]
root = "/scratch/audioq"
api_url = "https://api.example.org"
"#,
        )
        .unwrap();

        assert_eq!(config.queue.manager, ManagerType::Slurm);
        assert_eq!(config.queue.ssh_target.as_deref(), Some("login.cluster"));
        assert_eq!(config.queue.command_timeout, Duration::from_secs(60));
        assert_eq!(config.queue.additional_args, vec!["--partition=short"]);
        assert_eq!(config.worker.pool_size, 8);
        assert_eq!(config.worker.lease, Duration::from_secs(600));
        assert_eq!(config.worker.max_in_flight, Some(100));
        assert_eq!(config.worker.reconcile_interval, Duration::from_secs(30));
        assert_eq!(config.tokens.secret_key.as_deref(), Some("00ff"));
        assert_eq!(config.tokens.download_ttl, Duration::from_secs(7200));
        assert_eq!(config.tokens.hook_slack, Duration::from_secs(1800));
        assert_eq!(config.remote.root, PathBuf::from("/scratch/audioq"));
        assert_eq!(
            config.base_resources.walltime,
            Some(ResourceValue::Polynomial(Polynomial::new(
                vec![2.0, 300.0],
                ScalingProperty::Duration
            )))
        );
        assert_eq!(config.minimum_resources.ncpus, Some(1));
        assert_eq!(config.minimum_resources.mem, Some(1 << 30));
    }

    #[test]
    fn parse_partial_section_keeps_defaults() {
        let config = Config::parse("[worker]\npool_size = 2\n").unwrap();
        assert_eq!(config.worker.pool_size, 2);
        assert_eq!(config.worker.lease, Duration::from_secs(300));
    }

    #[test]
    fn parse_unknown_key() {
        assert!(Config::parse("[worker]\nthreads = 2\n").is_err());
    }

    #[test]
    fn parse_invalid_duration() {
        assert!(Config::parse("[queue]\ncommand_timeout = \"soon\"\n").is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[queue]\nmanager = \"pbs\"").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.queue.manager, ManagerType::Pbs);
    }

    #[test]
    fn load_missing_file() {
        assert!(Config::load(Some(&PathBuf::from("/nonexistent/audioq.toml"))).is_err());
    }
}
