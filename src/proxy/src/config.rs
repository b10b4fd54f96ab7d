use crate::error::{Error, Result};
use crate::protocol::mysql::charset;

use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration file shape: everything lives under `[server]`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(alias = "Server")]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionPolicy {
    /// Semaphore-backed: the accept loop waits for a free slot.
    #[default]
    Blocking,
    /// Atomic cap: connections over the limit are closed immediately.
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// host:port the proxy listens on.
    #[serde(default)]
    pub listen: String,
    /// host:port of the upstream MySQL.
    #[serde(default, alias = "dbaddr")]
    pub addr: String,
    /// Credentials required from downstream clients, reused upstream.
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub passwd: String,
    /// Default database for clients that connect without one.
    #[serde(default, alias = "dbname")]
    pub schema: String,
    #[serde(default = "default_collation")]
    pub collation: String,
    /// Version banner advertised in the server greeting.
    #[serde(default = "default_server_version")]
    pub server_version: String,
    #[serde(default = "default_max_client")]
    pub max_client: usize,
    #[serde(default)]
    pub admission: AdmissionPolicy,
    #[serde(default = "default_max_conn_num")]
    pub max_conn_num: u32,
    #[serde(default = "default_max_idle_conn")]
    pub max_idle_conn: u32,
    /// Backend session expiry in seconds; zero disables expiry.
    #[serde(default)]
    pub max_life_time: u64,
    /// Deadline in seconds for the first downstream read after accept.
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    /// Per-write deadline in seconds; zero disables it.
    #[serde(default)]
    pub write_timeout: u64,
    /// Surface upstream warning counts on prepare as errors.
    #[serde(default)]
    pub strict: bool,
}

fn default_collation() -> String {
    charset::DEFAULT_COLLATION_NAME.to_string()
}

fn default_server_version() -> String {
    "5.7.0-igo".to_string()
}

fn default_max_client() -> usize {
    512
}

fn default_max_conn_num() -> u32 {
    16
}

fn default_max_idle_conn() -> u32 {
    4
}

fn default_read_timeout() -> u64 {
    30
}

impl Config {
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.server.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.listen.is_empty() {
            return Err(Error::Config("listen is not set".into()));
        }
        if self.addr.is_empty() {
            return Err(Error::Config("addr is not set".into()));
        }
        if self.user.is_empty() {
            return Err(Error::Config("user is not set".into()));
        }
        if self.max_conn_num == 0 {
            return Err(Error::Config("maxConnNum must be positive".into()));
        }
        if self.max_idle_conn > self.max_conn_num {
            return Err(Error::Config(format!(
                "maxIdleConn ({}) exceeds maxConnNum ({})",
                self.max_idle_conn, self.max_conn_num
            )));
        }
        if charset::collation_id(&self.collation).is_none() {
            return Err(Error::UnknownCollation(self.collation.clone()));
        }
        Ok(())
    }

    pub fn collation_id(&self) -> u8 {
        charset::collation_id(&self.collation).unwrap_or(charset::DEFAULT_COLLATION_ID)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_life_time)
    }
}
