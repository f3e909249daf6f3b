use crate::participant::{ParticipantStats, TradeActivity};
use crate::{CompetitionError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use spendcomp_core::{ChatId, Drops, UserId, WalletHandle};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    AwaitingDuration,
    AwaitingDeposit,
    Funded,
    Active,
    Settled,
    Abandoned,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::AwaitingDuration => "awaiting_duration",
            Phase::AwaitingDeposit => "awaiting_deposit",
            Phase::Funded => "funded",
            Phase::Active => "active",
            Phase::Settled => "settled",
            Phase::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Settled | Phase::Abandoned)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<group id>_<creation unix millis>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompetitionId(String);

impl CompetitionId {
    pub fn new(group_id: ChatId, created_at: DateTime<Utc>) -> Self {
        Self(format!("{}_{}", group_id, created_at.timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CompetitionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CompetitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competition {
    id: CompetitionId,
    issuer: String,
    group_id: ChatId,
    admin_id: UserId,
    phase: Phase,
    created_at: DateTime<Utc>,
    duration_seconds: Option<u64>,
    prize_wallet: Option<WalletHandle>,
    pool_amount: Drops,
    participants: HashMap<String, ParticipantStats>,
    deposit_deadline: Option<DateTime<Utc>>,
    funded_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    close_reason: Option<String>,
}

impl Competition {
    pub fn new(
        id: CompetitionId,
        issuer: impl Into<String>,
        group_id: ChatId,
        admin_id: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            issuer: issuer.into(),
            group_id,
            admin_id,
            phase: Phase::Setup,
            created_at,
            duration_seconds: None,
            prize_wallet: None,
            pool_amount: Drops::ZERO,
            participants: HashMap::new(),
            deposit_deadline: None,
            funded_at: None,
            started_at: None,
            ends_at: None,
            closed_at: None,
            close_reason: None,
        }
    }

    pub fn id(&self) -> &CompetitionId {
        &self.id
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn group_id(&self) -> ChatId {
        self.group_id
    }

    pub fn admin_id(&self) -> UserId {
        self.admin_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn duration_seconds(&self) -> Option<u64> {
        self.duration_seconds
    }

    pub fn duration_minutes(&self) -> Option<u32> {
        self.duration_seconds.map(|s| (s / 60) as u32)
    }

    pub fn prize_wallet(&self) -> Option<&WalletHandle> {
        self.prize_wallet.as_ref()
    }

    pub fn dest_tag(&self) -> Option<u32> {
        self.prize_wallet.as_ref().map(WalletHandle::dest_tag)
    }

    pub fn pool_amount(&self) -> Drops {
        self.pool_amount
    }

    pub fn participants(&self) -> &HashMap<String, ParticipantStats> {
        &self.participants
    }

    pub fn deposit_deadline(&self) -> Option<DateTime<Utc>> {
        self.deposit_deadline
    }

    pub fn funded_at(&self) -> Option<DateTime<Utc>> {
        self.funded_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.ends_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn close_reason(&self) -> Option<&str> {
        self.close_reason.as_deref()
    }

    fn invalid(&self, action: &'static str) -> CompetitionError {
        CompetitionError::InvalidTransition {
            id: self.id.to_string(),
            phase: self.phase,
            action,
        }
    }

    /// SETUP -> AWAITING_DURATION. Re-opening the menu is allowed.
    pub fn open_duration_menu(&mut self) -> Result<()> {
        match self.phase {
            Phase::Setup => {
                self.phase = Phase::AwaitingDuration;
                tracing::info!("Competition {} awaiting duration", self.id);
                Ok(())
            }
            Phase::AwaitingDuration => Ok(()),
            _ => Err(self.invalid("open duration menu for")),
        }
    }

    /// Records the chosen duration and wallet binding and moves to
    /// AWAITING_DEPOSIT. The binding is set once and never replaced.
    pub fn bind_wallet(
        &mut self,
        wallet: WalletHandle,
        duration_seconds: u64,
        deposit_deadline: DateTime<Utc>,
    ) -> Result<()> {
        if !matches!(self.phase, Phase::Setup | Phase::AwaitingDuration)
            || self.prize_wallet.is_some()
        {
            return Err(self.invalid("bind a wallet to"));
        }

        tracing::info!(
            "Competition {} bound to wallet {} with tag {}",
            self.id,
            wallet.address(),
            wallet.dest_tag()
        );

        self.prize_wallet = Some(wallet);
        self.duration_seconds = Some(duration_seconds);
        self.deposit_deadline = Some(deposit_deadline);
        self.phase = Phase::AwaitingDeposit;
        Ok(())
    }

    /// AWAITING_DEPOSIT -> FUNDED.
    pub fn confirm_deposit(&mut self, amount: Drops, now: DateTime<Utc>) -> Result<()> {
        if self.phase != Phase::AwaitingDeposit {
            return Err(self.invalid("confirm a deposit for"));
        }

        self.pool_amount = amount;
        self.funded_at = Some(now);
        self.phase = Phase::Funded;

        tracing::info!("Competition {} funded with {} XRP", self.id, amount);
        Ok(())
    }

    /// FUNDED -> ACTIVE. Returns the scheduled end.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if self.phase != Phase::Funded {
            return Err(self.invalid("activate"));
        }
        let seconds = self
            .duration_seconds
            .ok_or_else(|| self.invalid("activate (no duration)"))?;

        let ends_at = now + Duration::seconds(seconds as i64);
        self.started_at = Some(now);
        self.ends_at = Some(ends_at);
        self.phase = Phase::Active;

        tracing::info!("Competition {} started, ends at {}", self.id, ends_at);
        Ok(ends_at)
    }

    /// ACTIVE -> SETTLED. Hands back the wallet binding for release.
    pub fn settle(&mut self, now: DateTime<Utc>) -> Result<Option<WalletHandle>> {
        if self.phase != Phase::Active {
            return Err(self.invalid("settle"));
        }

        self.phase = Phase::Settled;
        self.closed_at = Some(now);
        tracing::info!("Competition {} settled", self.id);
        Ok(self.prize_wallet.take())
    }

    /// Any open phase -> ABANDONED. Hands back the wallet binding, if any,
    /// for release; a second call fails, so the binding comes back once.
    pub fn abandon(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<WalletHandle>> {
        if self.phase.is_terminal() {
            return Err(self.invalid("abandon"));
        }

        let reason = reason.into();
        tracing::warn!("Competition {} abandoned: {}", self.id, reason);

        self.phase = Phase::Abandoned;
        self.closed_at = Some(now);
        self.close_reason = Some(reason);
        Ok(self.prize_wallet.take())
    }

    pub fn record_trade(
        &mut self,
        participant: &str,
        activity: &TradeActivity,
    ) -> Result<&ParticipantStats> {
        if self.phase != Phase::Active {
            return Err(self.invalid("record a trade for"));
        }

        let stats = self
            .participants
            .entry(participant.to_string())
            .or_default();
        stats.apply(activity);
        Ok(stats)
    }

    pub fn deposit_expired(&self, now: DateTime<Utc>) -> bool {
        self.phase == Phase::AwaitingDeposit
            && self.deposit_deadline.map_or(false, |deadline| now >= deadline)
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.phase == Phase::Active && self.ends_at.map_or(false, |end| now >= end)
    }

    pub fn is_evictable(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.phase.is_terminal()
            && self
                .closed_at
                .map_or(false, |closed| now >= closed + retention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spendcomp_core::{PrizeWalletConfig, WalletPool};

    fn handle() -> WalletHandle {
        let pool = WalletPool::with_tag_seed(
            vec![PrizeWalletConfig::new(
                "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh",
                "sEdTM1uX8pu2do5XvTnutH6HsouMaM2",
            )
            .unwrap()],
            4242,
        )
        .unwrap();
        pool.acquire().unwrap()
    }

    fn competition() -> Competition {
        let now = Utc::now();
        Competition::new(CompetitionId::new(-100123, now), "rISSUERXYZ", -100123, 7, now)
    }

    #[test]
    fn test_id_format() {
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(CompetitionId::new(-100123, at).as_str(), "-100123_1700000000123");
    }

    #[test]
    fn test_full_lifecycle() {
        let mut comp = competition();
        let now = Utc::now();
        assert_eq!(comp.phase(), Phase::Setup);

        comp.open_duration_menu().unwrap();
        comp.open_duration_menu().unwrap();
        assert_eq!(comp.phase(), Phase::AwaitingDuration);

        comp.bind_wallet(handle(), 30 * 60, now + Duration::hours(1))
            .unwrap();
        assert_eq!(comp.phase(), Phase::AwaitingDeposit);
        assert_eq!(comp.dest_tag(), Some(4242));
        assert_eq!(comp.duration_minutes(), Some(30));

        comp.confirm_deposit(Drops::from_xrp(50), now).unwrap();
        assert_eq!(comp.phase(), Phase::Funded);
        assert_eq!(comp.pool_amount(), Drops::from_xrp(50));
        assert!(comp.confirm_deposit(Drops::from_xrp(99), now).is_err());
        assert_eq!(comp.pool_amount(), Drops::from_xrp(50));

        let ends_at = comp.activate(now).unwrap();
        assert_eq!(ends_at, now + Duration::minutes(30));
        assert!(!comp.has_ended(now));
        assert!(comp.has_ended(ends_at));

        let released = comp.settle(ends_at).unwrap();
        assert_eq!(released.map(|h| h.dest_tag()), Some(4242));
        assert_eq!(comp.phase(), Phase::Settled);
        assert!(comp.prize_wallet().is_none());
    }

    #[test]
    fn test_binding_is_set_once() {
        let mut comp = competition();
        let deadline = Utc::now() + Duration::hours(1);
        comp.bind_wallet(handle(), 60 * 60, deadline).unwrap();

        let err = comp.bind_wallet(handle(), 90 * 60, deadline).unwrap_err();
        assert!(matches!(err, CompetitionError::InvalidTransition { .. }));
        assert_eq!(comp.duration_minutes(), Some(60));
        assert_eq!(comp.dest_tag(), Some(4242));
    }

    #[test]
    fn test_out_of_order_transitions_are_rejected() {
        let mut comp = competition();
        let now = Utc::now();
        assert!(comp.confirm_deposit(Drops::from_xrp(50), now).is_err());
        assert!(comp.activate(now).is_err());
        assert!(comp.settle(now).is_err());
        assert!(comp
            .record_trade("alice", &TradeActivity::Sell { tokens: 1.0 })
            .is_err());
        assert_eq!(comp.phase(), Phase::Setup);
    }

    #[test]
    fn test_abandon_returns_binding_once() {
        let mut comp = competition();
        let now = Utc::now();
        comp.bind_wallet(handle(), 30 * 60, now).unwrap();
        assert!(comp.deposit_expired(now));

        let released = comp.abandon("deposit window expired", now).unwrap();
        assert!(released.is_some());
        assert_eq!(comp.phase(), Phase::Abandoned);
        assert_eq!(comp.close_reason(), Some("deposit window expired"));
        assert!(comp.abandon("again", now).is_err());
        assert!(!comp.deposit_expired(now));
    }

    #[test]
    fn test_participants_created_lazily() {
        let mut comp = competition();
        let now = Utc::now();
        comp.bind_wallet(handle(), 30 * 60, now + Duration::hours(1))
            .unwrap();
        comp.confirm_deposit(Drops::from_xrp(50), now).unwrap();
        comp.activate(now).unwrap();

        assert!(comp.participants().is_empty());
        comp.record_trade(
            "alice",
            &TradeActivity::Buy {
                spent: Drops::from_xrp(5),
                tokens: 100.0,
            },
        )
        .unwrap();
        let stats = comp
            .record_trade("alice", &TradeActivity::Sell { tokens: 40.0 })
            .unwrap();
        assert_eq!(stats.trades, 2);
        assert_eq!(comp.participants().len(), 1);
    }

    #[test]
    fn test_eviction_window() {
        let mut comp = competition();
        let now = Utc::now();
        assert!(!comp.is_evictable(now, Duration::hours(1)));

        comp.abandon("cancelled by admin", now).unwrap();
        assert!(!comp.is_evictable(now, Duration::hours(1)));
        assert!(comp.is_evictable(now + Duration::hours(1), Duration::hours(1)));
    }

    #[test]
    fn test_snapshot_round_trip_keeps_binding() {
        let mut comp = competition();
        comp.bind_wallet(handle(), 30 * 60, Utc::now()).unwrap();

        let json = serde_json::to_string(&comp).unwrap();
        assert!(json.contains("\"awaiting_deposit\""));
        assert!(!json.contains("sEdTM"));

        let restored: Competition = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.prize_wallet(), comp.prize_wallet());
        assert_eq!(restored.phase(), Phase::AwaitingDeposit);
    }
}
