use crate::error::{AdbError, AdbResult};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5037;

/// Environment variable naming the ADB server host.
pub const ENV_SERVER_ADDRESS: &str = "ANDROID_ADB_SERVER_ADDRESS";
/// Environment variable naming the ADB server port.
pub const ENV_SERVER_PORT: &str = "ANDROID_ADB_SERVER_PORT";

/// Where the ADB server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbConfig {
    pub host: String,
    pub port: u16,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl AdbConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Build a config from `ANDROID_ADB_SERVER_ADDRESS` / `ANDROID_ADB_SERVER_PORT`,
    /// falling back to the defaults for unset variables.
    pub fn from_env() -> AdbResult<Self> {
        Self::from_vars(
            std::env::var(ENV_SERVER_ADDRESS).ok(),
            std::env::var(ENV_SERVER_PORT).ok(),
        )
    }

    fn from_vars(host: Option<String>, port: Option<String>) -> AdbResult<Self> {
        let mut config = Self::default();
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            config.host = host.trim().to_string();
        }
        if let Some(port) = port.filter(|p| !p.trim().is_empty()) {
            config.port = port.trim().parse().map_err(|_| {
                AdbError::assertion(format!("invalid {} value: {:?}", ENV_SERVER_PORT, port))
            })?;
        }
        Ok(config)
    }

    /// `host:port` suitable for `TcpStream::connect`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
