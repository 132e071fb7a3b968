//! Environment configuration for the facilitator.
//!
//! Every setting comes from an environment variable with a sensible default;
//! `.env` files are honored by the binary entrypoint. A variable that is set
//! but malformed is a startup error rather than a silent fallback.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use solana_keypair::Keypair;
use url::Url;

use crate::types::{Address, Network};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8402;
pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
/// USDC mint on Solana mainnet.
pub const DEFAULT_USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const DEFAULT_USDC_DECIMALS: u8 = 6;
/// Micro-lamports per compute unit. Matches the original service default;
/// under mainnet congestion a production deployment wants this higher, or
/// its transactions starve.
pub const DEFAULT_MAX_COMPUTE_UNIT_PRICE: u64 = 5;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {name}: {reason}")]
    InvalidVar { name: &'static str, reason: String },
    #[error("Invalid FACILITATOR_PRIVATE_KEY: {0}")]
    InvalidKey(String),
}

/// Static facilitator settings, loaded once at startup.
#[derive(Clone)]
pub struct Config {
    host: IpAddr,
    port: u16,
    solana_rpc_url: Url,
    solana_network: Network,
    usdc_mint: Address,
    usdc_decimals: u8,
    facilitator_private_key: Option<String>,
    max_compute_unit_price: u64,
    default_timeout_seconds: u64,
    log_level: String,
}

// The secret key never appears in logs or debug output.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("solana_rpc_url", &self.solana_rpc_url.as_str())
            .field("solana_network", &self.solana_network)
            .field("usdc_mint", &self.usdc_mint)
            .field("usdc_decimals", &self.usdc_decimals)
            .field(
                "facilitator_private_key",
                &self.facilitator_private_key.as_ref().map(|_| "<redacted>"),
            )
            .field("max_compute_unit_price", &self.max_compute_unit_price)
            .field("default_timeout_seconds", &self.default_timeout_seconds)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Config {
            host: parse_var(&lookup, "HOST", IpAddr::from_str(DEFAULT_HOST).unwrap())?,
            port: parse_var(&lookup, "PORT", DEFAULT_PORT)?,
            solana_rpc_url: parse_var(
                &lookup,
                "SOLANA_RPC_URL",
                Url::parse(DEFAULT_RPC_URL).unwrap(),
            )?,
            solana_network: parse_var(&lookup, "SOLANA_NETWORK", Network::Solana)?,
            usdc_mint: parse_var(
                &lookup,
                "USDC_MINT",
                Address::from_str(DEFAULT_USDC_MINT).unwrap(),
            )?,
            usdc_decimals: parse_var(&lookup, "USDC_DECIMALS", DEFAULT_USDC_DECIMALS)?,
            facilitator_private_key: lookup("FACILITATOR_PRIVATE_KEY").filter(|s| !s.is_empty()),
            max_compute_unit_price: parse_var(
                &lookup,
                "MAX_COMPUTE_UNIT_PRICE",
                DEFAULT_MAX_COMPUTE_UNIT_PRICE,
            )?,
            default_timeout_seconds: parse_var(
                &lookup,
                "DEFAULT_TIMEOUT_SECONDS",
                DEFAULT_TIMEOUT_SECONDS,
            )?,
            log_level: lookup("LOG_LEVEL")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn rpc_url(&self) -> &Url {
        &self.solana_rpc_url
    }

    pub fn network(&self) -> Network {
        self.solana_network
    }

    pub fn mint(&self) -> Address {
        self.usdc_mint
    }

    pub fn decimals(&self) -> u8 {
        self.usdc_decimals
    }

    pub fn max_compute_unit_price(&self) -> u64 {
        self.max_compute_unit_price
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Parse the configured fee-payer secret key, a base58-encoded 64-byte
    /// Ed25519 keypair. `Ok(None)` when no key is configured; the payment
    /// endpoints then answer 503 instead of failing startup.
    pub fn keypair(&self) -> Result<Option<Keypair>, ConfigError> {
        let Some(encoded) = &self.facilitator_private_key else {
            return Ok(None);
        };
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
        let keypair =
            Keypair::try_from(bytes.as_slice()).map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
        Ok(Some(keypair))
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidVar {
            name,
            reason: e.to_string(),
        }),
    }
}
