//! Process configuration from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `GAMIFY_REGISTRY_NAME` | `players` |
//! | `GAMIFY_MAX_CONFLICT_RETRIES` | `3` |
//! | `DATABASE_URL` | unset (in-memory store) |

use thiserror::Error;

use crate::command_dispatcher::DEFAULT_MAX_CONFLICT_RETRIES;

pub const DEFAULT_REGISTRY_NAME: &str = "players";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must not be empty")]
    Empty { var: &'static str },

    #[error("{var}={value:?} is not a valid {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamifyConfig {
    pub registry_name: String,
    pub max_conflict_retries: u32,
    pub database_url: Option<String>,
}

impl Default for GamifyConfig {
    fn default() -> Self {
        Self {
            registry_name: DEFAULT_REGISTRY_NAME.to_string(),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            database_url: None,
        }
    }
}

impl GamifyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(name) = lookup("GAMIFY_REGISTRY_NAME") {
            let name = name.trim();
            if name.is_empty() {
                return Err(ConfigError::Empty {
                    var: "GAMIFY_REGISTRY_NAME",
                });
            }
            config.registry_name = name.to_string();
        }

        if let Some(raw) = lookup("GAMIFY_MAX_CONFLICT_RETRIES") {
            config.max_conflict_retries =
                raw.trim().parse().map_err(|_| ConfigError::Invalid {
                    var: "GAMIFY_MAX_CONFLICT_RETRIES",
                    value: raw.clone(),
                    expected: "non-negative integer",
                })?;
        }

        config.database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        Ok(config)
    }
}
