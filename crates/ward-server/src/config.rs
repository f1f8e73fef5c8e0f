use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};
use ward_core::{RetryPolicy, STATION_CHANNEL};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Dashboard socket settings
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Retry policy for every storage call
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Storage validation
        if self.storage.url.trim().is_empty() {
            return Err("storage.url must not be empty".into());
        }
        if self.storage.request_timeout_ms == 0 {
            return Err("storage.request_timeout_ms must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Retry validations
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be > 0".into());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err("retry.base_delay_ms must be <= retry.max_delay_ms".into());
        }
        // Realtime validations
        if self.realtime.send_timeout_ms == 0 {
            return Err("realtime.send_timeout_ms must be > 0".into());
        }
        if self.realtime.station_channel.trim().is_empty() {
            return Err("realtime.station_channel must not be empty".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.realtime.send_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Origins allowed to call the API from a browser.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_body_limit() -> usize {
    1024 * 1024
}
fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".into(),
        "http://127.0.0.1:3000".into(),
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            cors_origins: default_cors_origins(),
        }
    }
}

/// PostgREST storage endpoint.
///
/// `url` is the project base (e.g. `https://<project>.supabase.co`); tables are reached under
/// `/rest/v1/`. The key can be supplied through `WARD__STORAGE__API_KEY`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_storage_url() -> String {
    "http://localhost:54321".into()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: default_storage_url(),
            api_key: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Channel every nurse-station socket joins.
    #[serde(default = "default_station_channel")]
    pub station_channel: String,
    /// Bound on one socket send before the connection is pruned.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Outbound queue depth per socket.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

fn default_station_channel() -> String {
    STATION_CHANNEL.into()
}
fn default_send_timeout_ms() -> u64 {
    1_500
}
fn default_outbound_buffer() -> usize {
    32
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            station_channel: default_station_channel(),
            send_timeout_ms: default_send_timeout_ms(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "ward.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., WARD__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("WARD")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
