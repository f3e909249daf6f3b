//! Competition lifecycle engine
//!
//! Competitions move through setup, deposit and play phases under the
//! [`LifecycleController`]. Each record lives behind its own lock in the
//! [`CompetitionRegistry`]; deposit monitors poll the ledger for the funding
//! payment and are supervised so they can be cancelled.

pub mod competition;
pub mod controller;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod participant;
pub mod registry;

pub use competition::{Competition, CompetitionId, Phase};
pub use controller::{
    Abandoned, ActivateOutcome, Binding, ChatKind, CompetitionSummary, ControllerSettings,
    Created, DurationOutcome, Invoker, LifecycleController, RestoreReport, SetupOutcome,
    SweepReport, DEFAULT_DURATIONS,
};
pub use error::{CompetitionError, Result};
pub use monitor::{MonitorOutcome, MonitorSettings, MonitorSupervisor, FUNDING_THRESHOLD};
pub use notify::{Action, Button, Notifier, OutboundMessage, RecordingNotifier};
pub use participant::{ParticipantStats, TradeActivity};
pub use registry::{CompetitionRegistry, SharedCompetition};
