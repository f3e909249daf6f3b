use crate::error::{CoreError, Result};
use std::fmt;

/// Upper bound on configured prize wallets (`PRIZE_WALLET_1` .. `PRIZE_WALLET_20`).
pub const MAX_PRIZE_WALLETS: usize = 20;

const BASE58_ALPHABET: &str = "rpshnaf39wBUDNEGHJKLM4PQRST7VWXYZ2bcdeCg65jkm8oFqi1tuvAxyz";

/// Signing secret for a ledger account. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        let secret = secret.trim();
        if !secret.starts_with('s') || secret.len() < 16 {
            return Err(CoreError::config(
                "Wallet secret must be a family seed starting with 's'",
            ));
        }
        Ok(Self(secret.to_string()))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Checks the shape of a classic XRPL account address.
pub fn validate_classic_address(address: &str) -> Result<()> {
    if !address.starts_with('r') {
        return Err(CoreError::InvalidAddress(format!(
            "'{}' must start with 'r'",
            address
        )));
    }

    if !(25..=35).contains(&address.len()) {
        return Err(CoreError::InvalidAddress(format!(
            "'{}' has invalid length {}",
            address,
            address.len()
        )));
    }

    if let Some(c) = address.chars().find(|c| !BASE58_ALPHABET.contains(*c)) {
        return Err(CoreError::InvalidAddress(format!(
            "'{}' contains invalid character '{}'",
            address, c
        )));
    }

    Ok(())
}

#[derive(Debug, Clone)]
pub struct PrizeWalletConfig {
    pub address: String,
    pub credential: Credential,
}

impl PrizeWalletConfig {
    pub fn new(address: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let config = Self {
            address: address.into().trim().to_string(),
            credential: Credential::new(secret)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_classic_address(&self.address)
    }
}
