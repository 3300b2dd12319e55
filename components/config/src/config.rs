use anyhow::{anyhow, Context};
use dotenv::dotenv;
use std::{env, fmt, str::FromStr, time::Duration};

pub const DEFAULT_TRANSFER_AMOUNT_WEI: &str = "1000000000000000000";
pub const DEFAULT_GAS_LIMIT: u64 = 21000;
pub const DEFAULT_BLOCK_NUMBER: u64 = 5671788;
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

#[derive(Clone, Default)]
pub struct Config {
    pub http_rpc_url: String,
    pub sender_private_key: String,
    pub recipient_address: String,
    /// Decimal or `0x` hex, in wei.
    pub transfer_amount_wei: String,
    /// Hex encoded, may be empty.
    pub transfer_data: String,
    pub gas_limit: u64,
    pub block_number: u64,
    pub expected_chain_id: Option<u64>,
    pub rpc_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub dry_run: bool,
}

impl Config {
    pub fn new_from_env() -> anyhow::Result<Config> {
        if dotenv().is_err() {
            log::debug!("No .env file found, reading configuration from the environment only");
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key/value source. `new_from_env` feeds it the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> anyhow::Result<String> {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| anyhow!("{} must be set", key))
        };

        let http_rpc_url = required("ETH_RPC_URL")?;
        let sender_private_key = required("SENDER_PRIVATE_KEY")?;
        let recipient_address = required("RECIPIENT_ADDRESS")?;

        let transfer_amount_wei = lookup("TRANSFER_AMOUNT_WEI")
            .unwrap_or_else(|| DEFAULT_TRANSFER_AMOUNT_WEI.to_string());
        let transfer_data = lookup("TRANSFER_DATA").unwrap_or_default();

        let gas_limit = parse_or(&lookup, "GAS_LIMIT", DEFAULT_GAS_LIMIT)?;
        let block_number = parse_or(&lookup, "BLOCK_NUMBER", DEFAULT_BLOCK_NUMBER)?;
        let expected_chain_id = match lookup("EXPECTED_CHAIN_ID") {
            Some(value) => Some(
                value
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("EXPECTED_CHAIN_ID is not a number: {}", value))?,
            ),
            None => None,
        };
        let rpc_timeout_secs = parse_or(&lookup, "RPC_TIMEOUT_SECS", DEFAULT_RPC_TIMEOUT_SECS)?;
        let max_attempts = parse_or(&lookup, "MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        let retry_delay_secs = parse_or(&lookup, "RETRY_DELAY_SECS", DEFAULT_RETRY_DELAY_SECS)?;
        let dry_run = parse_or(&lookup, "DRY_RUN", false)?;

        if max_attempts == 0 {
            return Err(anyhow!("MAX_ATTEMPTS must be at least 1"));
        }

        Ok(Config {
            http_rpc_url,
            sender_private_key,
            recipient_address,
            transfer_amount_wei,
            transfer_data,
            gas_limit,
            block_number,
            expected_chain_id,
            rpc_timeout_secs,
            max_attempts,
            retry_delay_secs,
            dry_run,
        })
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {}", key, value)),
        None => Ok(default),
    }
}

// the private key must never end up in logs
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("http_rpc_url", &self.http_rpc_url)
            .field("sender_private_key", &"<redacted>")
            .field("recipient_address", &self.recipient_address)
            .field("transfer_amount_wei", &self.transfer_amount_wei)
            .field("transfer_data", &self.transfer_data)
            .field("gas_limit", &self.gas_limit)
            .field("block_number", &self.block_number)
            .field("expected_chain_id", &self.expected_chain_id)
            .field("rpc_timeout_secs", &self.rpc_timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}
