use crate::{CompetitionError, Result};
use serde::{Deserialize, Serialize};
use spendcomp_core::Drops;

/// One trade attributed to a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TradeActivity {
    Buy { spent: Drops, tokens: f64 },
    Sell { tokens: f64 },
}

impl TradeActivity {
    pub fn validate(&self) -> Result<()> {
        let tokens = match self {
            TradeActivity::Buy { tokens, .. } | TradeActivity::Sell { tokens } => *tokens,
        };
        if !tokens.is_finite() || tokens < 0.0 {
            return Err(CompetitionError::usage(format!(
                "Invalid token quantity: {}",
                tokens
            )));
        }
        Ok(())
    }
}

/// Running totals for one participant. Rows are created on first trade
/// and never removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantStats {
    pub spent: Drops,
    pub bought: f64,
    pub sold: f64,
    pub trades: u32,
}

impl ParticipantStats {
    pub fn apply(&mut self, activity: &TradeActivity) {
        match activity {
            TradeActivity::Buy { spent, tokens } => {
                self.spent = self.spent.saturating_add(*spent);
                self.bought += tokens;
            }
            TradeActivity::Sell { tokens } => {
                self.sold += tokens;
            }
        }
        self.trades = self.trades.saturating_add(1);
    }

    /// Tokens still held out of what was bought during the competition.
    pub fn net_tokens(&self) -> f64 {
        self.bought - self.sold
    }
}
