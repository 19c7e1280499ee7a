//! Settings taken from the environment.

use std::{env, ffi::OsString};

use elf32_loader::{PageSize, ParsePageSizeError};
use elf32_loader_params::{ENV_LOG_LEVEL, ENV_PAGE_SIZE};
use log::LevelFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Config {
    pub(crate) log_level: LevelFilter,
    pub(crate) page_size: PageSize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LevelFilter::Info,
            page_size: PageSize::DEFAULT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("{var} is not valid UTF-8")]
    NotUnicode { var: &'static str },
    #[error("{var}: unknown log level '{value}'")]
    LogLevel { var: &'static str, value: String },
    #[error("{var}: {source}")]
    PageSize {
        var: &'static str,
        source: ParsePageSizeError,
    },
}

impl Config {
    pub(crate) fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var_os(var))
    }

    /// Builds the configuration from `lookup`, which returns the value of an
    /// environment variable if it is set.
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup_str(&lookup, ENV_LOG_LEVEL)? {
            config.log_level = value
                .parse()
                .map_err(|_unknown| ConfigError::LogLevel {
                    var: ENV_LOG_LEVEL,
                    value,
                })?;
        }
        if let Some(value) = lookup_str(&lookup, ENV_PAGE_SIZE)? {
            config.page_size = value.parse().map_err(|source| ConfigError::PageSize {
                var: ENV_PAGE_SIZE,
                source,
            })?;
        }

        Ok(config)
    }
}

fn lookup_str<F>(lookup: &F, var: &'static str) -> Result<Option<String>, ConfigError>
where
    F: Fn(&str) -> Option<OsString>,
{
    lookup(var)
        .map(|value| {
            value
                .into_string()
                .map_err(|_value| ConfigError::NotUnicode { var })
        })
        .transpose()
}
