use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

pub const DEFAULT_FANIN_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub fanin_timeout_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("FANIN_TIMEOUT_MS must be a positive integer")]
    InvalidFaninTimeout,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
        let bind_port = env::var("BIND_PORT")
            .ok()
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);
        let fanin_timeout_ms = env::var("FANIN_TIMEOUT_MS")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(|value| {
                value
                    .parse::<u64>()
                    .ok()
                    .filter(|millis| *millis > 0)
                    .ok_or(ConfigError::InvalidFaninTimeout)
            })
            .transpose()?
            .unwrap_or(DEFAULT_FANIN_TIMEOUT_MS);

        let config = Self {
            bind_addr,
            bind_port,
            fanin_timeout_ms,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }

    pub fn fanin_timeout(&self) -> Duration {
        Duration::from_millis(self.fanin_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    // Tests mutate process-wide environment variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        env::remove_var("BIND_ADDR");
        env::remove_var("BIND_PORT");
        env::remove_var("FANIN_TIMEOUT_MS");
    }

    #[test]
    fn parse_defaults() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|err| err.into_inner());
        clear_env();

        let config = Config::from_env().expect("config should parse");
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.fanin_timeout(), Duration::from_millis(5_000));
    }

    #[test]
    fn fanin_timeout_parses_when_valid() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|err| err.into_inner());
        clear_env();
        env::set_var("FANIN_TIMEOUT_MS", "250");

        let config = Config::from_env().expect("config should parse");
        assert_eq!(config.fanin_timeout(), Duration::from_millis(250));
        clear_env();
    }

    #[test]
    fn zero_fanin_timeout_fails() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|err| err.into_inner());
        clear_env();
        env::set_var("FANIN_TIMEOUT_MS", "0");

        let err = Config::from_env().expect_err("expected invalid timeout error");
        assert!(matches!(err, ConfigError::InvalidFaninTimeout));
        clear_env();
    }

    #[test]
    fn invalid_port_fails() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|err| err.into_inner());
        clear_env();
        env::set_var("BIND_PORT", "not-a-port");

        let err = Config::from_env().expect_err("expected invalid port error");
        assert!(matches!(err, ConfigError::InvalidPort));
        clear_env();
    }

    #[test]
    fn invalid_bind_addr_fails() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|err| err.into_inner());
        clear_env();
        env::set_var("BIND_ADDR", "not an address");

        let err = Config::from_env().expect_err("expected invalid socket error");
        assert!(matches!(err, ConfigError::InvalidSocket));
        clear_env();
    }
}
