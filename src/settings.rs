use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pwrstat;

// The following define where the server listens and how it reaches pwrstat.
const HOST: &str = "0.0.0.0"; // Every interface.
const PORT: u16 = 7977;
const WORKERS: usize = 4; // Requests handled at once.

pub const DEFAULT_CONFIG: &str = "pwrstat-serve.toml";
const ENV_PREFIX: &str = "PWRSTAT_";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub path: PathBuf,
    /// Run pwrstat as the current user instead of elevating to root.
    pub noroot: bool,
    pub workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            host: HOST.to_string(),
            port: PORT,
            path: PathBuf::from(pwrstat::DEFAULT_PATH),
            noroot: false,
            workers: WORKERS,
        }
    }
}

/// Command line values. Anything left unset falls through to the file,
/// environment or defaults.
#[derive(clap::Args, Serialize, Debug, Default, Clone)]
pub struct Overrides {
    /// Host for the server to listen on.
    #[clap(long, value_parser)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port for the server to listen on.
    #[clap(long, value_parser)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Path to the pwrstat executable.
    #[clap(long, value_parser)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Execute pwrstat without elevating to root.
    #[clap(long, value_parser)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub noroot: bool,

    /// Number of requests handled at once.
    #[clap(long, value_parser)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Figment(#[from] figment::Error),
    #[error("workers must be at least 1")]
    NoWorkers,
}

impl Settings {
    /// Defaults, then the TOML file, then `PWRSTAT_*` variables, then the
    /// command line. A missing file is not an error.
    pub fn load(config: &Path, overrides: &Overrides) -> Result<Settings, SettingsError> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config))
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(overrides))
            .extract()?;

        if settings.workers == 0 {
            return Err(SettingsError::NoWorkers);
        }
        Ok(settings)
    }

    /// `host:port`, bracketing IPv6 hosts.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
