//! Environment-driven configuration, loaded once at startup and injected
//! constructor-style. No ambient singletons.

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Listen address for the invocation surface.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
}

/// Relational store connection.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Postgres connection URL (with service credentials)
    pub url: String,
    /// Pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Spotify OAuth2 client-credentials pair.
#[derive(Debug, Deserialize, Clone)]
pub struct SpotifyConfig {
    /// OAuth2 client id
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
}

/// Genius API access.
#[derive(Debug, Deserialize, Clone)]
pub struct GeniusConfig {
    /// Bearer access token
    pub access_token: String,
}

/// Discogs API access.
#[derive(Debug, Deserialize, Clone)]
pub struct DiscogsConfig {
    /// Consumer key
    pub consumer_key: String,
    /// Consumer secret
    pub consumer_secret: String,
}

/// Internal invocation transport used by the scheduler.
#[derive(Debug, Deserialize, Clone)]
pub struct InvokerConfig {
    /// Base URL the scheduler posts component ticks to
    pub base_url: String,
    /// Bearer token required on the invocation surface, when set
    #[serde(default)]
    pub bearer_token: Option<String>,
}

/// The immutable application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Invocation surface listen address
    pub server: ServerConfig,
    /// Relational store
    pub database: DatabaseConfig,
    /// Spotify credentials
    pub spotify: SpotifyConfig,
    /// Genius credentials
    pub genius: GeniusConfig,
    /// Discogs credentials
    pub discogs: DiscogsConfig,
    /// Internal invocation transport
    pub invoker: InvokerConfig,
}

fn default_max_connections() -> u32 {
    10
}

impl AppConfig {
    /// Loads configuration from the environment, e.g.
    /// `TUNEWORK__DATABASE__URL` or `TUNEWORK__SPOTIFY__CLIENT_ID`.
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.max_connections", 10)?
            .set_default("invoker.base_url", "http://127.0.0.1:8080")?
            .add_source(Environment::with_prefix("TUNEWORK").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
