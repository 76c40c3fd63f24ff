use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Single apikey/apisecret pair, usually supplied through the environment
    #[serde(default)]
    pub messenger: Option<MessengerConfig>,
    /// Additional applications, usually supplied through a config file
    #[serde(default)]
    pub messengers: Vec<MessengerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Upper bound for a published message body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Outbound queue depth per connection
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
    /// Connection timeout in seconds (reaped if no activity)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Cleanup task interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Seconds between server pings; pong replies count as activity
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DeliveryConfig {
    /// Upper bound for handing a message to one connection
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessengerConfig {
    pub apikey: String,
    pub apisecret: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_channel_buffer() -> usize {
    32
}

fn default_connection_timeout() -> u64 {
    120 // 2 minutes
}

fn default_cleanup_interval() -> u64 {
    60 // 1 minute
}

fn default_ping_interval() -> u64 {
    30
}

fn default_send_timeout_ms() -> u64 {
    1000
}

fn default_max_concurrent_sends() -> usize {
    100
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // THUNDER_SERVER__PORT, THUNDER_MESSENGER__APIKEY, ...
            .add_source(
                Environment::with_prefix("THUNDER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Every configured application, the single `messenger` entry first
    pub fn all_messengers(&self) -> impl Iterator<Item = &MessengerConfig> {
        self.messenger.iter().chain(self.messengers.iter())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            channel_buffer: default_channel_buffer(),
            connection_timeout: default_connection_timeout(),
            cleanup_interval: default_cleanup_interval(),
            ping_interval: default_ping_interval(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout_ms(),
            max_concurrent_sends: default_max_concurrent_sends(),
        }
    }
}
