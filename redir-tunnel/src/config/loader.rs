//! Configuration loading from arguments and environment variables

use tracing::debug;

use super::types::{LogFormat, TunnelConfig};
use crate::error::ConfigError;

/// Positional argument synopsis printed with usage errors
pub const USAGE_ARGS: &str = "<proxy port> <tunnel port>";

/// Override the log level (trace, debug, info, warn, error)
pub const ENV_LOG_LEVEL: &str = "REDIR_TUNNEL_LOG_LEVEL";

/// Override the log format (text, json)
pub const ENV_LOG_FORMAT: &str = "REDIR_TUNNEL_LOG_FORMAT";

/// Override the upstream CONNECT timeout in seconds
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "REDIR_TUNNEL_CONNECT_TIMEOUT_SECS";

impl TunnelConfig {
    /// Parse `<proxy port> <tunnel port>` (program name already stripped).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingArgument` on a wrong argument count and
    /// `ConfigError::InvalidArgument` when a port is not a `u16`.
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<S> = args.into_iter().collect();
        if args.len() != 2 {
            return Err(ConfigError::MissingArgument(
                "Not enough arguments provided".into(),
            ));
        }

        let proxy_port: u16 = args[0].as_ref().parse().map_err(|_| {
            ConfigError::InvalidArgument("Proxy port could not be parsed as a uint16".into())
        })?;
        let tunnel_port: u16 = args[1].as_ref().parse().map_err(|_| {
            ConfigError::InvalidArgument("Tunnel port could not be parsed as a uint16".into())
        })?;

        let config = Self::new(proxy_port, tunnel_port);
        config.validate()?;
        Ok(config)
    }

    /// Parse arguments, then apply environment overrides.
    ///
    /// Environment variables:
    /// - `REDIR_TUNNEL_LOG_LEVEL`: Override log level
    /// - `REDIR_TUNNEL_LOG_FORMAT`: Override log format
    /// - `REDIR_TUNNEL_CONNECT_TIMEOUT_SECS`: Override the CONNECT timeout
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing, an override or validation fails.
    pub fn from_args_with_env<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::from_args(args)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EnvError` for an unparsable value, or
    /// `ConfigError::ValidationError` if the result is invalid.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log.level = level;
            debug!("Log level overridden to {}", self.log.level);
        }

        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.log.format = format.parse::<LogFormat>().map_err(|_| ConfigError::EnvError {
                name: ENV_LOG_FORMAT.into(),
                reason: format!("Invalid log format: {format}"),
            })?;
            debug!("Log format overridden to {}", self.log.format);
        }

        if let Some(secs) = lookup(ENV_CONNECT_TIMEOUT_SECS) {
            self.upstream.connect_timeout_secs =
                secs.parse().map_err(|_| ConfigError::EnvError {
                    name: ENV_CONNECT_TIMEOUT_SECS.into(),
                    reason: format!("Invalid number: {secs}"),
                })?;
            debug!(
                "Connect timeout overridden to {}s",
                self.upstream.connect_timeout_secs
            );
        }

        // Re-validate after overrides
        self.validate()
    }
}
