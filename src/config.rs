// Runtime configuration, built once at startup from environment variables.
// Every knob the service recognizes lives here; components receive an
// immutable clone and never read the environment themselves.

use dotenv::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("REQUIRE_API_KEY is enabled but API_KEY is not set")]
    MissingApiKey,

    #[error("invalid BSV_NETWORK value: {0} (expected mainnet or testnet)")]
    InvalidNetwork(String),
}

/// Which chain the node follows. Selects the Base58Check version byte used
/// when deriving and validating P2PKH addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// Version byte prepended to the pubkey hash before Base58Check encoding.
    pub fn version_byte(&self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet => 0x6f,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
        }
    }
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            other => Err(ConfigError::InvalidNetwork(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Node JSON-RPC
    pub rpc_host: String,
    pub rpc_port: u16,
    pub rpc_user: String,
    pub rpc_password: String,
    pub rpc_timeout: Duration,

    // Node ZMQ publishers
    pub zmq_rawtx: String,
    pub zmq_hashblock: String,

    // Store
    pub mongodb_url: String,
    pub mongodb_db: String,

    // REST surface
    pub api_host: String,
    pub api_port: u16,
    pub require_api_key: bool,
    pub api_key: Option<String>,

    pub network: Network,

    // Confirmation lifecycle
    pub archive_threshold: i64,
    pub confirmation_batch_size: i64,
    pub rpc_concurrency: usize,

    // Historical backfill
    pub max_history_per_address: usize,
    pub woc_url: String,
    pub woc_api_key: Option<String>,
    pub woc_rate_limit_ms: u64,

    pub max_tx_size_bytes: usize,

    // Webhook dispatch
    pub enable_webhooks: bool,
    pub webhook_batch_size: i64,
    pub webhook_processing_interval: Duration,
    pub webhook_timeout: Duration,
    pub webhook_max_retries: i64,
    pub webhook_cleanup_days: i64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let network: Network = env_or("BSV_NETWORK", "mainnet").parse()?;

        let require_api_key = env_bool("REQUIRE_API_KEY", false);
        let api_key = env::var("API_KEY").ok().filter(|k| !k.is_empty());
        if require_api_key && api_key.is_none() {
            return Err(ConfigError::MissingApiKey);
        }

        let woc_url = env::var("WOC_URL").unwrap_or_else(|_| {
            format!("https://api.whatsonchain.com/v1/bsv/{}", network.as_str())
        });

        Ok(Self {
            rpc_host: env_or("SVNODE_RPC_HOST", "127.0.0.1"),
            rpc_port: env_parse("SVNODE_RPC_PORT", 8332),
            rpc_user: env_or("SVNODE_RPC_USER", "bitcoin"),
            rpc_password: env_or("SVNODE_RPC_PASSWORD", ""),
            rpc_timeout: Duration::from_secs(5),

            zmq_rawtx: env_or("SVNODE_ZMQ_RAWTX", "tcp://127.0.0.1:28332"),
            zmq_hashblock: env_or("SVNODE_ZMQ_HASHBLOCK", "tcp://127.0.0.1:28333"),

            mongodb_url: env_or("MONGODB_URL", "mongodb://127.0.0.1:27017"),
            mongodb_db: env_or("MONGODB_DB", "bsv_monitor"),

            api_host: env_or("API_HOST", "0.0.0.0"),
            api_port: env_parse("API_PORT", 3000),
            require_api_key,
            api_key,

            network,

            archive_threshold: env_parse("AUTO_ARCHIVE_AFTER", 144),
            confirmation_batch_size: env_parse("CONFIRMATION_BATCH_SIZE", 100),
            rpc_concurrency: env_parse("RPC_CONCURRENCY", 4),

            max_history_per_address: env_parse("MAX_HISTORY_PER_ADDRESS", 500),
            woc_url,
            woc_api_key: env::var("WOC_API_KEY").ok().filter(|k| !k.is_empty()),
            woc_rate_limit_ms: env_parse("WOC_RATE_LIMIT_MS", 1000),

            max_tx_size_bytes: env_parse("MAX_TX_SIZE_BYTES", 4 * 1024 * 1024),

            enable_webhooks: env_bool("ENABLE_WEBHOOKS", true),
            webhook_batch_size: env_parse("WEBHOOK_BATCH_SIZE", 10),
            webhook_processing_interval: Duration::from_millis(env_parse(
                "WEBHOOK_PROCESSING_INTERVAL",
                5000,
            )),
            webhook_timeout: Duration::from_millis(env_parse("WEBHOOK_TIMEOUT", 10000)),
            webhook_max_retries: env_parse("WEBHOOK_MAX_RETRIES", 5),
            webhook_cleanup_days: env_parse("WEBHOOK_CLEANUP_DAYS", 7),
        })
    }

    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}", self.rpc_host, self.rpc_port)
    }
}
