use spendcomp_core::wallet::{validate_classic_address, MAX_PRIZE_WALLETS};
use spendcomp_core::{CoreError, Credential, PrizeWalletConfig, Result, UserId};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

const MAX_POLL_INTERVAL_SECS: u64 = 3600;
const MAX_SWEEP_INTERVAL_SECS: u64 = 3600;
const MAX_DEPOSIT_TIMEOUT_MINS: u64 = 24 * 60;
const MAX_RETENTION_HOURS: u64 = 30 * 24;

/// Telegram bot token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct BotToken(String);

impl BotToken {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() || !token.contains(':') {
            return Err(CoreError::config(
                "BOT_TOKEN must look like <bot id>:<secret>",
            ));
        }
        Ok(Self(token))
    }

    /// Only for building Bot API request URLs.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BotToken(***)")
    }
}

/// Fee collection wallet. Only its address is used.
#[derive(Debug, Clone)]
pub struct FeeWallet {
    pub address: String,
    pub credential: Option<Credential>,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: BotToken,
    pub admin_id: UserId,
    pub fee_wallet: FeeWallet,
    pub prize_wallets: Vec<PrizeWalletConfig>,
    pub xrpl_rpc_url: String,
    pub telegram_api_url: String,
    pub poll_interval: Duration,
    pub deposit_timeout: chrono::Duration,
    pub sweep_interval: Duration,
    pub retention: chrono::Duration,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &str| {
            get(key).ok_or_else(|| CoreError::config(format!("{} is not set", key)))
        };

        let token = BotToken::new(require("BOT_TOKEN")?)?;

        let admin_id = require("ADMIN_ID")?
            .parse::<UserId>()
            .map_err(|_| CoreError::config("ADMIN_ID must be a numeric user id"))?;

        let fee_address = require("FEE_WALLET_ADDRESS")?;
        validate_classic_address(&fee_address)
            .map_err(|e| CoreError::config(format!("FEE_WALLET_ADDRESS: {}", e)))?;
        let fee_credential = get("FEE_WALLET_SECRET")
            .map(Credential::new)
            .transpose()
            .map_err(|e| CoreError::config(format!("FEE_WALLET_SECRET: {}", e)))?;

        let mut prize_wallets = Vec::new();
        for n in 1..=MAX_PRIZE_WALLETS {
            let address_key = format!("PRIZE_WALLET_{}_ADDRESS", n);
            let secret_key = format!("PRIZE_WALLET_{}_SECRET", n);
            match (get(&address_key), get(&secret_key)) {
                (Some(address), Some(secret)) => {
                    let wallet = PrizeWalletConfig::new(address, secret)
                        .map_err(|e| CoreError::config(format!("PRIZE_WALLET_{}: {}", n, e)))?;
                    prize_wallets.push(wallet);
                }
                (None, None) => {}
                (Some(_), None) => {
                    return Err(CoreError::config(format!(
                        "{} is set but {} is not",
                        address_key, secret_key
                    )))
                }
                (None, Some(_)) => {
                    return Err(CoreError::config(format!(
                        "{} is set but {} is not",
                        secret_key, address_key
                    )))
                }
            }
        }

        let config = Self {
            token,
            admin_id,
            fee_wallet: FeeWallet {
                address: fee_address,
                credential: fee_credential,
            },
            prize_wallets,
            xrpl_rpc_url: get("XRPL_RPC_URL")
                .unwrap_or_else(|| spendcomp_core::ledger::xrpl::DEFAULT_RPC_URL.to_string()),
            telegram_api_url: get("TELEGRAM_API_URL")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string()),
            poll_interval: Duration::from_secs(bounded(
                &get,
                "POLL_INTERVAL_SECS",
                12,
                MAX_POLL_INTERVAL_SECS,
            )?),
            deposit_timeout: span(
                "DEPOSIT_TIMEOUT_MINS",
                bounded(&get, "DEPOSIT_TIMEOUT_MINS", 60, MAX_DEPOSIT_TIMEOUT_MINS)?,
                chrono::Duration::try_minutes,
            )?,
            sweep_interval: Duration::from_secs(bounded(
                &get,
                "SWEEP_INTERVAL_SECS",
                30,
                MAX_SWEEP_INTERVAL_SECS,
            )?),
            retention: span(
                "RETENTION_HOURS",
                bounded(&get, "RETENTION_HOURS", 24, MAX_RETENTION_HOURS)?,
                chrono::Duration::try_hours,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prize_wallets.is_empty() {
            tracing::warn!("No prize wallets configured; every duration selection will fail");
        }

        if !self.xrpl_rpc_url.starts_with("http://") && !self.xrpl_rpc_url.starts_with("https://") {
            return Err(CoreError::config(format!(
                "XRPL_RPC_URL must be an http(s) URL, got '{}'",
                self.xrpl_rpc_url
            )));
        }

        if !self.telegram_api_url.starts_with("http://")
            && !self.telegram_api_url.starts_with("https://")
        {
            return Err(CoreError::config(format!(
                "TELEGRAM_API_URL must be an http(s) URL, got '{}'",
                self.telegram_api_url
            )));
        }

        Ok(())
    }
}

/// Reads a positive integer no larger than `max`.
fn bounded<G>(get: &G, key: &str, default: u64, max: u64) -> Result<u64>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u64>() {
            Ok(value) if (1..=max).contains(&value) => Ok(value),
            _ => Err(CoreError::config(format!(
                "{} must be an integer between 1 and {}, got '{}'",
                key, max, raw
            ))),
        },
    }
}

fn span(
    key: &str,
    value: u64,
    unit: fn(i64) -> Option<chrono::Duration>,
) -> Result<chrono::Duration> {
    i64::try_from(value)
        .ok()
        .and_then(unit)
        .ok_or_else(|| CoreError::config(format!("{} is out of range", key)))
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spendcomp")
}
