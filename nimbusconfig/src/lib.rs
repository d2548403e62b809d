#![forbid(unsafe_code)]
use std::{
    io,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use log::LevelFilter;
use log4rs::{
    append::rolling_file::{
        policy::compound::{
            roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
        },
        RollingFileAppender,
    },
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
    Config,
};

pub const DEFAULT_LOGFILE_NAME: &str = "nimbus.debug.log";
pub const DEFAULT_NETWORK_STATS_INTERVAL: Duration = Duration::from_millis(1000);
const LOG_ROLL_WINDOW: u32 = 3;
const LOG_SIZE_LIMIT: u64 = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown chain '{0}', expected one of main, test, dev")]
    UnknownChain(String),
    #[error("could not determine a data directory")]
    NoDataDir,
    #[error("io error. {0}")]
    Io(#[from] io::Error),
    #[error("log config error. {0}")]
    Log(#[from] log4rs::config::runtime::ConfigErrors),
    #[error("log roller error. {0}")]
    LogRoller(String),
}

/// Configuration for one set of ledger stores.
#[derive(Clone, Debug)]
pub struct NimbusConfig {
    pub chain: ChainType,
    /// How often the network statistics are polled.
    pub network_stats_interval: Duration,
    /// Refresh every cached account whenever the head hash changes.
    pub refresh_accounts_on_head_change: bool,
    /// The directory where the logfile is created. Defaults to ~/.nimbus (or the platform data dir).
    pub data_dir: Option<PathBuf>,
    /// The filename of the logfile. This will be created in the `data_dir`.
    pub logfile_name: PathBuf,
}

impl NimbusConfig {
    pub fn create(chain: ChainType, dir: Option<PathBuf>) -> NimbusConfig {
        NimbusConfig {
            chain,
            network_stats_interval: DEFAULT_NETWORK_STATS_INTERVAL,
            refresh_accounts_on_head_change: true,
            data_dir: dir,
            logfile_name: DEFAULT_LOGFILE_NAME.into(),
        }
    }

    pub fn set_data_dir(&mut self, dir_str: String) {
        self.data_dir = Some(PathBuf::from(dir_str));
    }

    /// Build the Logging config
    pub fn get_log_config(&self) -> Result<Config, ConfigError> {
        let fixed_window_roller = FixedWindowRoller::builder()
            .build(
                &format!("{}{{}}", self.get_log_path()?.display()),
                LOG_ROLL_WINDOW,
            )
            .map_err(|e| ConfigError::LogRoller(e.to_string()))?;
        let size_trigger = SizeTrigger::new(LOG_SIZE_LIMIT);
        let compound_policy =
            CompoundPolicy::new(Box::new(size_trigger), Box::new(fixed_window_roller));

        Ok(Config::builder()
            .appender(
                Appender::builder()
                    .filter(Box::new(ThresholdFilter::new(LevelFilter::Info)))
                    .build(
                        "logfile",
                        Box::new(
                            RollingFileAppender::builder()
                                .encoder(Box::new(PatternEncoder::new("{d} {l}::{m}{n}")))
                                .build(self.get_log_path()?, Box::new(compound_policy))?,
                        ),
                    ),
            )
            .build(
                Root::builder()
                    .appender("logfile")
                    .build(LevelFilter::Debug),
            )?)
    }

    /// Resolves the data directory, creating it if needed.
    pub fn get_data_dir(&self) -> Result<Box<Path>, ConfigError> {
        let mut data_location = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => {
                let mut base = if cfg!(any(target_os = "macos", target_os = "windows")) {
                    dirs::data_dir().ok_or(ConfigError::NoDataDir)?
                } else {
                    dirs::home_dir().ok_or(ConfigError::NoDataDir)?
                };
                base.push(".nimbus");
                base
            }
        };
        if self.data_dir.is_none() {
            match self.chain {
                ChainType::Mainnet => {}
                ChainType::Testnet => data_location.push("test"),
                ChainType::Devnet => data_location.push("dev"),
            }
        }

        std::fs::create_dir_all(&data_location).map_err(|e| {
            log::error!("Couldn't create data directory {:?}: {}", data_location, e);
            e
        })?;

        Ok(data_location.into_boxed_path())
    }

    pub fn get_log_path(&self) -> Result<Box<Path>, ConfigError> {
        let mut log_path = self.get_data_dir()?.into_path_buf();
        log_path.push(&self.logfile_name);

        Ok(log_path.into_boxed_path())
    }
}

impl Default for NimbusConfig {
    fn default() -> Self {
        Self::create(ChainType::Mainnet, None)
    }
}

/// Network whose genesis the remote client is configured for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainType {
    Mainnet,
    Testnet,
    Devnet,
}

impl ChainType {
    /// Name of the genesis configuration the client should load.
    pub fn genesis_name(&self) -> &'static str {
        match self {
            ChainType::Mainnet => "main",
            ChainType::Testnet => "test",
            ChainType::Devnet => "dev",
        }
    }
}

impl std::fmt::Display for ChainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.genesis_name())
    }
}

impl FromStr for ChainType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" | "mainnet" => Ok(ChainType::Mainnet),
            "test" | "testnet" => Ok(ChainType::Testnet),
            "dev" | "devnet" => Ok(ChainType::Devnet),
            other => Err(ConfigError::UnknownChain(other.to_string())),
        }
    }
}
