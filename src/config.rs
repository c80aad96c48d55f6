//! Server configuration from command-line arguments.

use std::net::SocketAddr;
use thiserror::Error;

/// Address the server listens on when `--addr` is not given.
pub const DEFAULT_ADDR: &str = "0.0.0.0:6379";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address to bind the listener to
    pub addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 6379)),
        }
    }
}

/// What the binary should do after reading its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliAction {
    Serve(Config),
    Help,
    Version,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid listen address '{0}'")]
    InvalidAddr(String),

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

impl Config {
    /// Parses arguments, excluding the program name.
    pub fn from_args<I, S>(args: I) -> Result<CliAction, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Config::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_ref() {
                "--addr" | "-a" => {
                    let value = args
                        .next()
                        .ok_or_else(|| ConfigError::MissingValue(arg.as_ref().to_string()))?;
                    let value = value.as_ref();
                    config.addr = value
                        .parse()
                        .map_err(|_| ConfigError::InvalidAddr(value.to_string()))?;
                }
                "--help" | "-h" => return Ok(CliAction::Help),
                "--version" | "-v" => return Ok(CliAction::Version),
                other => return Err(ConfigError::UnknownArgument(other.to_string())),
            }
        }

        Ok(CliAction::Serve(config))
    }
}
