use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Telegram-style chat identifier. Groups are negative.
pub type ChatId = i64;
/// Telegram-style user identifier.
pub type UserId = i64;

pub const DROPS_PER_XRP: u64 = 1_000_000;

/// Native XRP amount in drops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Drops(u64);

impl Drops {
    pub const ZERO: Drops = Drops(0);

    pub const fn from_drops(drops: u64) -> Self {
        Self(drops)
    }

    pub const fn from_xrp(xrp: u64) -> Self {
        Self(xrp * DROPS_PER_XRP)
    }

    pub fn to_drops(self) -> u64 {
        self.0
    }

    pub fn to_xrp(self) -> f64 {
        self.0 as f64 / DROPS_PER_XRP as f64
    }

    pub fn saturating_add(self, other: Drops) -> Drops {
        Drops(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Drops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / DROPS_PER_XRP;
        let frac = self.0 % DROPS_PER_XRP;
        if frac == 0 {
            write!(f, "{}", whole)
        } else {
            let frac = format!("{:06}", frac);
            write!(f, "{}.{}", whole, frac.trim_end_matches('0'))
        }
    }
}

impl FromStr for Drops {
    type Err = CoreError;

    /// Parses the ledger's string encoding of a native amount (integer drops).
    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(Drops)
            .map_err(|e| CoreError::ledger(format!("Invalid drops amount '{}': {}", s, e)))
    }
}

/// The subset of a ledger transaction the deposit monitor inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub hash: Option<String>,
    pub tx_type: String,
    pub destination: Option<String>,
    pub destination_tag: Option<u32>,
    /// Native amount delivered; `None` for issued-currency transfers.
    pub amount: Option<Drops>,
    pub validated: bool,
    pub succeeded: bool,
}

impl LedgerTransaction {
    pub fn is_payment(&self) -> bool {
        self.tx_type == "Payment"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_display() {
        assert_eq!(Drops::from_xrp(50).to_string(), "50");
        assert_eq!(Drops::from_drops(49_900_000).to_string(), "49.9");
        assert_eq!(Drops::from_drops(1).to_string(), "0.000001");
        assert_eq!(Drops::ZERO.to_string(), "0");
    }

    #[test]
    fn test_drops_parse() {
        let drops: Drops = "50000000".parse().unwrap();
        assert_eq!(drops, Drops::from_xrp(50));
        assert_eq!(drops.to_xrp(), 50.0);
        assert!("12.5".parse::<Drops>().is_err());
        assert!("".parse::<Drops>().is_err());
    }

    #[test]
    fn test_drops_ordering_against_threshold() {
        let threshold = Drops::from_xrp(50);
        assert!(Drops::from_drops(49_999_999) < threshold);
        assert!(Drops::from_drops(50_000_000) >= threshold);
    }
}
