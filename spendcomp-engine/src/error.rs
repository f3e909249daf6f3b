use crate::competition::Phase;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompetitionError>;

#[derive(Error, Debug)]
pub enum CompetitionError {
    #[error("Core error: {0}")]
    Core(#[from] spendcomp_core::CoreError),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Usage(String),

    #[error("Competition not found: {0}")]
    NotFound(String),

    #[error("No free prize wallet! Max {capacity} competitions.")]
    PoolExhausted { capacity: usize },

    #[error("Cannot {action} competition {id} in phase {phase}")]
    InvalidTransition {
        id: String,
        phase: Phase,
        action: &'static str,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CompetitionError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Errors caused by the invoker rather than by the bot; safe to echo
    /// back verbatim.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_) | Self::Usage(_) | Self::NotFound(_) | Self::PoolExhausted { .. }
        )
    }
}
