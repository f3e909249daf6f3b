use crate::competition::{Competition, CompetitionId, Phase};
use crate::monitor::{self, MonitorOutcome, MonitorSettings, MonitorSupervisor};
use crate::notify::{Action, Notifier, OutboundMessage};
use crate::participant::{ParticipantStats, TradeActivity};
use crate::registry::{CompetitionRegistry, SharedCompetition};
use crate::{CompetitionError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use spendcomp_core::{
    ChatId, CompetitionStore, Drops, LedgerInquiry, Storage, StoredCompetition, UserId,
    WalletHandle, WalletPool,
};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub const DEFAULT_DURATIONS: [u32; 3] = [30, 60, 90];

const NOT_ADMIN: &str = "Only admin can use this command!";
const NOT_GROUP: &str = "Please use this command in a group!";
const CREATE_USAGE: &str = "Usage: /comp rTOKEN_ISSUER_ADDRESS";

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub admin_id: UserId,
    pub durations_minutes: Vec<u32>,
    /// How long a bound wallet waits for its funding deposit.
    pub deposit_timeout: Duration,
    /// How long settled or abandoned competitions stay queryable.
    pub retention: Duration,
    pub monitor: MonitorSettings,
}

impl ControllerSettings {
    pub fn new(admin_id: UserId) -> Self {
        Self {
            admin_id,
            durations_minutes: DEFAULT_DURATIONS.to_vec(),
            deposit_timeout: Duration::minutes(60),
            retention: Duration::hours(24),
            monitor: MonitorSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn is_group(&self) -> bool {
        matches!(self, ChatKind::Group | ChatKind::Supergroup)
    }
}

/// Who sent a command, and from where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invoker {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub id: CompetitionId,
    pub issuer: String,
    pub group_id: ChatId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    Prompted {
        id: CompetitionId,
        durations: Vec<u32>,
    },
    AlreadyConfigured {
        id: CompetitionId,
        phase: Phase,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub id: CompetitionId,
    pub minutes: u32,
    pub address: String,
    pub dest_tag: u32,
    pub threshold: Drops,
    pub deposit_deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurationOutcome {
    Bound(Binding),
    AlreadyConfigured { id: CompetitionId, phase: Phase },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivateOutcome {
    Started {
        id: CompetitionId,
        group_id: ChatId,
        issuer: String,
        ends_at: DateTime<Utc>,
    },
    AlreadyStarted {
        id: CompetitionId,
        phase: Phase,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abandoned {
    pub id: CompetitionId,
    pub group_id: ChatId,
    pub released_wallet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompetitionSummary {
    pub id: CompetitionId,
    pub issuer: String,
    pub group_id: ChatId,
    pub phase: Phase,
    pub duration_minutes: Option<u32>,
    pub wallet_address: Option<String>,
    pub dest_tag: Option<u32>,
    pub pool_amount: Drops,
    pub participants: usize,
    pub created_at: DateTime<Utc>,
    pub deposit_deadline: Option<DateTime<Utc>>,
    pub funded_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
}

impl From<&Competition> for CompetitionSummary {
    fn from(comp: &Competition) -> Self {
        Self {
            id: comp.id().clone(),
            issuer: comp.issuer().to_string(),
            group_id: comp.group_id(),
            phase: comp.phase(),
            duration_minutes: comp.duration_minutes(),
            wallet_address: comp.prize_wallet().map(|w| w.address().to_string()),
            dest_tag: comp.dest_tag(),
            pool_amount: comp.pool_amount(),
            participants: comp.participants().len(),
            created_at: comp.created_at(),
            deposit_deadline: comp.deposit_deadline(),
            funded_at: comp.funded_at(),
            started_at: comp.started_at(),
            ends_at: comp.ends_at(),
            close_reason: comp.close_reason().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: Vec<CompetitionId>,
    pub settled: Vec<CompetitionId>,
    pub evicted: Vec<CompetitionId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub monitors: usize,
    pub abandoned: usize,
}

struct Inner {
    settings: ControllerSettings,
    registry: CompetitionRegistry,
    pool: Arc<WalletPool>,
    ledger: Arc<dyn LedgerInquiry>,
    notifier: Arc<dyn Notifier>,
    storage: Option<Arc<Storage>>,
    monitors: MonitorSupervisor,
}

/// Drives competitions through their phases. Cheap to clone; clones share
/// the same registry, pool and monitors.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

impl LifecycleController {
    pub fn new(
        settings: ControllerSettings,
        pool: Arc<WalletPool>,
        ledger: Arc<dyn LedgerInquiry>,
        notifier: Arc<dyn Notifier>,
        storage: Option<Arc<Storage>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                registry: CompetitionRegistry::new(),
                pool,
                ledger,
                notifier,
                storage,
                monitors: MonitorSupervisor::new(),
            }),
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.inner.settings
    }

    pub fn pool(&self) -> &WalletPool {
        &self.inner.pool
    }

    pub fn active_monitors(&self) -> usize {
        self.inner.monitors.active()
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        user_id == self.inner.settings.admin_id
    }

    fn authorize(&self, invoker: &Invoker) -> Result<()> {
        if !self.is_admin(invoker.user_id) {
            tracing::warn!("Rejected admin action from user {}", invoker.user_id);
            return Err(CompetitionError::unauthorized(NOT_ADMIN));
        }
        Ok(())
    }

    fn lookup(&self, id: &CompetitionId) -> Result<SharedCompetition> {
        self.inner
            .registry
            .get(id)
            .ok_or_else(|| CompetitionError::NotFound(id.to_string()))
    }

    /// Writes the record's snapshot. Failures are logged; the in-memory
    /// record stays authoritative.
    async fn persist(&self, comp: &Competition) {
        let Some(storage) = &self.inner.storage else {
            return;
        };

        let snapshot = match serde_json::to_string(comp) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!("Failed to serialize competition {}: {}", comp.id(), e);
                return;
            }
        };

        let record = StoredCompetition {
            id: comp.id().to_string(),
            group_id: comp.group_id(),
            phase: comp.phase().as_str().to_string(),
            snapshot,
            updated_at: Utc::now(),
        };

        if let Err(e) = CompetitionStore::new(storage).save(&record).await {
            tracing::error!("Failed to persist competition {}: {}", comp.id(), e);
        }
    }

    async fn forget(&self, id: &CompetitionId) {
        self.inner.registry.remove(id);
        if let Some(storage) = &self.inner.storage {
            if let Err(e) = CompetitionStore::new(storage).delete(id.as_str()).await {
                tracing::error!("Failed to delete competition {}: {}", id, e);
            }
        }
    }

    fn release_wallet(&self, id: &CompetitionId, wallet: Option<WalletHandle>) -> Result<()> {
        let Some(wallet) = wallet else {
            return Ok(());
        };

        if !self.inner.pool.release(&wallet) {
            tracing::error!(
                "Prize wallet {} (tag {}) was not bound when competition {} released it",
                wallet.address(),
                wallet.dest_tag(),
                id
            );
            return Err(CompetitionError::internal(format!(
                "prize wallet for competition {} was already released",
                id
            )));
        }
        Ok(())
    }

    async fn send(&self, message: OutboundMessage) {
        let chat_id = message.chat_id;
        if let Err(e) = self.inner.notifier.notify(message).await {
            tracing::warn!("Failed to notify chat {}: {}", chat_id, e);
        }
    }

    /// `create-competition(issuer_address)`.
    pub async fn create(&self, invoker: &Invoker, issuer: Option<&str>) -> Result<Created> {
        self.authorize(invoker)?;

        if !invoker.chat_kind.is_group() {
            return Err(CompetitionError::usage(NOT_GROUP));
        }

        let issuer = issuer
            .map(str::trim)
            .filter(|issuer| issuer.starts_with('r'))
            .ok_or_else(|| CompetitionError::usage(CREATE_USAGE))?;

        let group_id = invoker.chat_id;
        let mut created_at = Utc::now();
        let shared = loop {
            let id = CompetitionId::new(group_id, created_at);
            let comp = Competition::new(id, issuer, group_id, invoker.user_id, created_at);
            if let Some(shared) = self.inner.registry.try_insert(comp) {
                break shared;
            }
            created_at += Duration::milliseconds(1);
        };

        let comp = shared.lock().await;
        self.persist(&comp).await;
        tracing::info!(
            "Created competition {} for issuer {} in group {}",
            comp.id(),
            issuer,
            group_id
        );

        Ok(Created {
            id: comp.id().clone(),
            issuer: issuer.to_string(),
            group_id,
        })
    }

    /// Opens the duration menu for the admin.
    pub async fn begin_setup(&self, invoker: &Invoker, id: &CompetitionId) -> Result<SetupOutcome> {
        self.authorize(invoker)?;
        let shared = self.lookup(id)?;
        let mut comp = shared.lock().await;

        match comp.phase() {
            Phase::Setup => {
                comp.open_duration_menu()?;
                self.persist(&comp).await;
            }
            Phase::AwaitingDuration => {}
            phase => {
                return Ok(SetupOutcome::AlreadyConfigured {
                    id: id.clone(),
                    phase,
                })
            }
        }

        Ok(SetupOutcome::Prompted {
            id: id.clone(),
            durations: self.inner.settings.durations_minutes.clone(),
        })
    }

    /// `select-duration(competition_id, minutes)`: binds a prize wallet and
    /// starts the deposit monitor. Repeated delivery is a no-op.
    pub async fn select_duration(
        &self,
        invoker: &Invoker,
        id: &CompetitionId,
        minutes: u32,
    ) -> Result<DurationOutcome> {
        self.authorize(invoker)?;

        let durations = &self.inner.settings.durations_minutes;
        if !durations.contains(&minutes) {
            let options: Vec<_> = durations.iter().map(u32::to_string).collect();
            return Err(CompetitionError::usage(format!(
                "Duration must be one of: {} minutes",
                options.join(", ")
            )));
        }

        let shared = self.lookup(id)?;
        let mut comp = shared.lock().await;

        match comp.phase() {
            Phase::Setup | Phase::AwaitingDuration => {}
            phase => {
                tracing::info!(
                    "Ignoring duplicate duration selection for competition {} ({})",
                    id,
                    phase
                );
                return Ok(DurationOutcome::AlreadyConfigured {
                    id: id.clone(),
                    phase,
                });
            }
        }

        let wallet = self.inner.pool.acquire().ok_or_else(|| {
            tracing::warn!("No free prize wallet for competition {}", id);
            CompetitionError::PoolExhausted {
                capacity: self.inner.pool.capacity(),
            }
        })?;

        let deadline = Utc::now() + self.inner.settings.deposit_timeout;
        if let Err(e) = comp.bind_wallet(wallet.clone(), u64::from(minutes) * 60, deadline) {
            if let Err(release) = self.release_wallet(id, Some(wallet)) {
                tracing::error!(
                    "Unbinding competition {} after failed setup: {}",
                    id,
                    release
                );
            }
            return Err(e);
        }
        self.persist(&comp).await;
        self.start_monitor(id.clone(), shared.clone());

        Ok(DurationOutcome::Bound(Binding {
            id: id.clone(),
            minutes,
            address: wallet.address().to_string(),
            dest_tag: wallet.dest_tag(),
            threshold: self.inner.settings.monitor.threshold,
            deposit_deadline: deadline,
        }))
    }

    fn start_monitor(&self, id: CompetitionId, shared: SharedCompetition) {
        let this = self.clone();
        let ledger = self.inner.ledger.clone();
        let settings = self.inner.settings.monitor.clone();

        self.inner
            .monitors
            .spawn(id.clone(), move |cancel| async move {
                let outcome = monitor::watch_deposit(shared.clone(), ledger, settings, cancel).await;
                this.on_monitor_exit(&id, &shared, outcome).await;
            });
    }

    async fn on_monitor_exit(
        &self,
        id: &CompetitionId,
        shared: &SharedCompetition,
        outcome: MonitorOutcome,
    ) {
        match outcome {
            MonitorOutcome::Funded { amount } => {
                let admin_id = {
                    let comp = shared.lock().await;
                    self.persist(&comp).await;
                    comp.admin_id()
                };

                self.send(
                    OutboundMessage::text(
                        admin_id,
                        format!(
                            "Competition {} received {} XRP. Press START to begin.",
                            id, amount
                        ),
                    )
                    .with_button("START", Action::Start(id.clone())),
                )
                .await;
            }
            MonitorOutcome::Cancelled => {
                tracing::debug!("Deposit monitor for competition {} cancelled", id);
            }
            MonitorOutcome::PhaseLeft(phase) => {
                tracing::debug!(
                    "Deposit monitor for competition {} stopped in phase {}",
                    id,
                    phase
                );
            }
        }
    }

    /// FUNDED -> ACTIVE on the admin's go.
    pub async fn activate(&self, invoker: &Invoker, id: &CompetitionId) -> Result<ActivateOutcome> {
        self.authorize(invoker)?;
        let shared = self.lookup(id)?;
        let mut comp = shared.lock().await;

        match comp.phase() {
            Phase::Funded => {
                let ends_at = comp.activate(Utc::now())?;
                self.persist(&comp).await;
                Ok(ActivateOutcome::Started {
                    id: id.clone(),
                    group_id: comp.group_id(),
                    issuer: comp.issuer().to_string(),
                    ends_at,
                })
            }
            phase @ (Phase::Active | Phase::Settled) => Ok(ActivateOutcome::AlreadyStarted {
                id: id.clone(),
                phase,
            }),
            phase => Err(CompetitionError::usage(format!(
                "Competition {} is not funded yet (phase: {})",
                id, phase
            ))),
        }
    }

    /// Closes a competition that has not settled, stopping its monitor and
    /// releasing its wallet.
    pub async fn abandon(
        &self,
        invoker: &Invoker,
        id: &CompetitionId,
        reason: &str,
    ) -> Result<Abandoned> {
        self.authorize(invoker)?;
        let shared = self.lookup(id)?;

        let (group_id, wallet) = {
            let mut comp = shared.lock().await;
            if comp.phase().is_terminal() {
                return Err(CompetitionError::usage(format!(
                    "Competition {} is already closed ({})",
                    id,
                    comp.phase()
                )));
            }

            self.inner.monitors.cancel(id);
            let wallet = comp.abandon(reason, Utc::now())?;
            self.persist(&comp).await;
            (comp.group_id(), wallet)
        };

        // The record is already closed, so a refused release is only logged.
        let address = wallet.as_ref().map(|w| w.address().to_string());
        let released_wallet = match self.release_wallet(id, wallet) {
            Ok(()) => address,
            Err(e) => {
                tracing::error!("Abandoning competition {}: {}", id, e);
                None
            }
        };

        Ok(Abandoned {
            id: id.clone(),
            group_id,
            released_wallet,
        })
    }

    /// Accumulates one trade for a participant of an active competition.
    pub async fn record_trade(
        &self,
        id: &CompetitionId,
        participant: &str,
        activity: TradeActivity,
    ) -> Result<ParticipantStats> {
        activity.validate()?;
        if participant.trim().is_empty() {
            return Err(CompetitionError::usage("Participant id cannot be empty"));
        }

        let shared = self.lookup(id)?;
        let mut comp = shared.lock().await;
        if comp.phase() != Phase::Active {
            return Err(CompetitionError::usage(format!(
                "Competition {} is not active (phase: {})",
                id,
                comp.phase()
            )));
        }

        let stats = comp.record_trade(participant, &activity)?.clone();
        self.persist(&comp).await;
        Ok(stats)
    }

    pub async fn status(&self, id: &CompetitionId) -> Result<CompetitionSummary> {
        let shared = self.lookup(id)?;
        let comp = shared.lock().await;
        Ok(CompetitionSummary::from(&*comp))
    }

    pub async fn list(&self) -> Vec<CompetitionSummary> {
        let mut summaries = Vec::new();
        for (_, shared) in self.inner.registry.entries() {
            summaries.push(CompetitionSummary::from(&*shared.lock().await));
        }
        summaries
    }

    /// Applies the time-based rules: deposit timeout, end of an active
    /// competition, and eviction of closed records.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let threshold = self.inner.settings.monitor.threshold;

        for (id, shared) in self.inner.registry.entries() {
            let mut comp = shared.lock().await;

            if comp.deposit_expired(now) {
                self.inner.monitors.cancel(&id);
                let wallet = match comp.abandon("deposit window expired", now) {
                    Ok(wallet) => wallet,
                    Err(e) => {
                        tracing::error!("Failed to expire competition {}: {}", id, e);
                        continue;
                    }
                };
                self.persist(&comp).await;
                let group_id = comp.group_id();
                drop(comp);

                if let Err(e) = self.release_wallet(&id, wallet) {
                    tracing::error!("Expiry of competition {}: {}", id, e);
                }
                self.send(OutboundMessage::text(
                    group_id,
                    format!(
                        "Competition {} cancelled: no deposit of at least {} XRP arrived in time.",
                        id, threshold
                    ),
                ))
                .await;
                report.expired.push(id);
            } else if comp.has_ended(now) {
                let wallet = match comp.settle(now) {
                    Ok(wallet) => wallet,
                    Err(e) => {
                        tracing::error!("Failed to settle competition {}: {}", id, e);
                        continue;
                    }
                };
                self.persist(&comp).await;
                let group_id = comp.group_id();
                let participants = comp.participants().len();
                drop(comp);

                if let Err(e) = self.release_wallet(&id, wallet) {
                    tracing::error!("Settlement of competition {}: {}", id, e);
                }
                self.send(OutboundMessage::text(
                    group_id,
                    format!(
                        "Competition {} has ended with {} participant(s).",
                        id, participants
                    ),
                ))
                .await;
                report.settled.push(id);
            } else if comp.is_evictable(now, self.inner.settings.retention) {
                drop(comp);
                self.forget(&id).await;
                tracing::info!("Evicted competition {}", id);
                report.evicted.push(id);
            }
        }

        report
    }

    pub fn spawn_sweeper(&self, every: std::time::Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let report = this.sweep(Utc::now()).await;
                if report != SweepReport::default() {
                    tracing::info!(
                        "Sweep: {} expired, {} settled, {} evicted",
                        report.expired.len(),
                        report.settled.len(),
                        report.evicted.len()
                    );
                }
            }
        })
    }

    /// Reloads persisted competitions, reclaims their wallet bindings and
    /// restarts deposit monitors.
    pub async fn restore(&self) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();
        let Some(storage) = &self.inner.storage else {
            return Ok(report);
        };

        let stored = CompetitionStore::new(storage).list().await?;
        for record in stored {
            let mut comp: Competition = match serde_json::from_str(&record.snapshot) {
                Ok(comp) => comp,
                Err(e) => {
                    tracing::warn!("Skipping unreadable competition {}: {}", record.id, e);
                    continue;
                }
            };

            let mut restart_monitor = false;
            if !comp.phase().is_terminal() {
                if let Some(wallet) = comp.prize_wallet().cloned() {
                    if self.inner.pool.reclaim(&wallet).is_none() {
                        tracing::warn!(
                            "Prize wallet {} unavailable for restored competition {}",
                            wallet.address(),
                            comp.id()
                        );
                        // The pool never held this binding, so nothing to release.
                        if let Err(e) = comp.abandon("prize wallet unavailable after restart", Utc::now()) {
                            tracing::error!("Failed to abandon competition {}: {}", comp.id(), e);
                        }
                        self.persist(&comp).await;
                        report.abandoned += 1;
                    } else if comp.phase() == Phase::AwaitingDeposit {
                        restart_monitor = true;
                    }
                }
            }

            let id = comp.id().clone();
            let Some(shared) = self.inner.registry.try_insert(comp) else {
                tracing::warn!("Competition {} already loaded", id);
                continue;
            };
            if restart_monitor {
                self.start_monitor(id, shared);
                report.monitors += 1;
            }
            report.restored += 1;
        }

        tracing::info!(
            "Restored {} competitions ({} monitors restarted, {} abandoned)",
            report.restored,
            report.monitors,
            report.abandoned
        );
        Ok(report)
    }

    /// Stops every deposit monitor.
    pub async fn shutdown(&self) {
        self.inner.monitors.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use spendcomp_core::{InMemoryLedger, PrizeWalletConfig};
    use std::time::Duration as StdDuration;

    const ADMIN: UserId = 42;
    const GROUP: ChatId = -100123;
    const WALLETS: [&str; 2] = [
        "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh",
        "rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe",
    ];

    struct Harness {
        controller: LifecycleController,
        ledger: Arc<InMemoryLedger>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness_with(wallets: usize, storage: Option<Arc<Storage>>) -> Harness {
        let configs = WALLETS[..wallets]
            .iter()
            .map(|a| PrizeWalletConfig::new(*a, "sEdTM1uX8pu2do5XvTnutH6HsouMaM2").unwrap())
            .collect();
        let pool = Arc::new(WalletPool::with_tag_seed(configs, 1000).unwrap());
        let ledger = Arc::new(InMemoryLedger::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let mut settings = ControllerSettings::new(ADMIN);
        settings.monitor.poll_interval = StdDuration::from_millis(5);

        let controller = LifecycleController::new(
            settings,
            pool,
            ledger.clone(),
            notifier.clone(),
            storage,
        );
        Harness {
            controller,
            ledger,
            notifier,
        }
    }

    fn harness(wallets: usize) -> Harness {
        harness_with(wallets, None)
    }

    fn admin_in_group() -> Invoker {
        Invoker {
            user_id: ADMIN,
            chat_id: GROUP,
            chat_kind: ChatKind::Supergroup,
        }
    }

    fn admin_in_private() -> Invoker {
        Invoker {
            user_id: ADMIN,
            chat_id: ADMIN,
            chat_kind: ChatKind::Private,
        }
    }

    async fn wait_for_phase(controller: &LifecycleController, id: &CompetitionId, phase: Phase) {
        tokio::time::timeout(StdDuration::from_secs(5), async {
            loop {
                if controller.status(id).await.unwrap().phase == phase {
                    return;
                }
                tokio::time::sleep(StdDuration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("competition {} never reached {}", id, phase));
    }

    async fn bound(h: &Harness) -> Binding {
        let created = h
            .controller
            .create(&admin_in_group(), Some("rISSUERXYZ"))
            .await
            .unwrap();
        match h
            .controller
            .select_duration(&admin_in_private(), &created.id, 30)
            .await
            .unwrap()
        {
            DurationOutcome::Bound(binding) => binding,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_rules() {
        let h = harness(1);
        let stranger = Invoker {
            user_id: 7,
            ..admin_in_group()
        };

        let err = h.controller.create(&stranger, Some("rISSUER")).await.unwrap_err();
        assert!(matches!(err, CompetitionError::Unauthorized(_)));

        let err = h
            .controller
            .create(&admin_in_private(), Some("rISSUER"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), NOT_GROUP);

        for bad in [None, Some("ISSUER"), Some("")] {
            let err = h.controller.create(&admin_in_group(), bad).await.unwrap_err();
            assert_eq!(err.to_string(), CREATE_USAGE);
        }
        assert!(h.controller.list().await.is_empty());

        let created = h
            .controller
            .create(&admin_in_group(), Some("rISSUERXYZ"))
            .await
            .unwrap();
        assert!(created.id.as_str().starts_with("-100123_"));
        let status = h.controller.status(&created.id).await.unwrap();
        assert_eq!(status.phase, Phase::Setup);
        assert_eq!(status.wallet_address, None);
        assert_eq!(h.controller.pool().available(), 1);
    }

    #[tokio::test]
    async fn test_ids_unique_within_same_millisecond() {
        let h = harness(1);
        let mut ids = std::collections::HashSet::new();
        for _ in 0..20 {
            let created = h
                .controller
                .create(&admin_in_group(), Some("rISSUER"))
                .await
                .unwrap();
            assert!(ids.insert(created.id));
        }
    }

    #[tokio::test]
    async fn test_non_admin_cannot_change_anything() {
        let h = harness(1);
        let created = h
            .controller
            .create(&admin_in_group(), Some("rISSUER"))
            .await
            .unwrap();
        let stranger = Invoker {
            user_id: 7,
            chat_id: 7,
            chat_kind: ChatKind::Private,
        };

        assert!(matches!(
            h.controller.begin_setup(&stranger, &created.id).await,
            Err(CompetitionError::Unauthorized(_))
        ));
        assert!(matches!(
            h.controller.select_duration(&stranger, &created.id, 30).await,
            Err(CompetitionError::Unauthorized(_))
        ));
        assert!(matches!(
            h.controller.abandon(&stranger, &created.id, "nope").await,
            Err(CompetitionError::Unauthorized(_))
        ));

        let status = h.controller.status(&created.id).await.unwrap();
        assert_eq!(status.phase, Phase::Setup);
        assert_eq!(h.controller.pool().available(), 1);
        assert_eq!(h.controller.active_monitors(), 0);
    }

    #[tokio::test]
    async fn test_setup_menu_and_duration_validation() {
        let h = harness(1);
        let created = h
            .controller
            .create(&admin_in_group(), Some("rISSUER"))
            .await
            .unwrap();

        let outcome = h
            .controller
            .begin_setup(&admin_in_group(), &created.id)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SetupOutcome::Prompted {
                id: created.id.clone(),
                durations: vec![30, 60, 90]
            }
        );
        let status = h.controller.status(&created.id).await.unwrap();
        assert_eq!(status.phase, Phase::AwaitingDuration);

        let err = h
            .controller
            .select_duration(&admin_in_private(), &created.id, 45)
            .await
            .unwrap_err();
        assert!(matches!(err, CompetitionError::Usage(_)));

        let missing = CompetitionId::from("-1_0");
        assert!(matches!(
            h.controller.select_duration(&admin_in_private(), &missing, 30).await,
            Err(CompetitionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_funding_scenario() {
        let h = harness(1);
        let binding = bound(&h).await;
        assert_eq!(binding.minutes, 30);
        assert_eq!(binding.address, WALLETS[0]);
        assert_eq!(binding.threshold, Drops::from_xrp(50));

        let status = h.controller.status(&binding.id).await.unwrap();
        assert_eq!(status.phase, Phase::AwaitingDeposit);
        assert_eq!(status.dest_tag, Some(binding.dest_tag));
        assert_eq!(h.controller.active_monitors(), 1);

        // right tag, not enough
        h.ledger.push(
            WALLETS[0],
            InMemoryLedger::payment(WALLETS[0], Some(binding.dest_tag), Drops::from_drops(49_900_000)),
        );
        // enough, wrong tag
        h.ledger.push(
            WALLETS[0],
            InMemoryLedger::payment(WALLETS[0], Some(binding.dest_tag + 1), Drops::from_xrp(500)),
        );
        let polls = h.ledger.query_count();
        tokio::time::timeout(StdDuration::from_secs(5), async {
            while h.ledger.query_count() < polls + 3 {
                tokio::time::sleep(StdDuration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let status = h.controller.status(&binding.id).await.unwrap();
        assert_eq!(status.phase, Phase::AwaitingDeposit);
        assert_eq!(status.pool_amount, Drops::ZERO);

        h.ledger.push(
            WALLETS[0],
            InMemoryLedger::payment(WALLETS[0], Some(binding.dest_tag), Drops::from_xrp(50)),
        );
        wait_for_phase(&h.controller, &binding.id, Phase::Funded).await;

        let status = h.controller.status(&binding.id).await.unwrap();
        assert_eq!(status.pool_amount, Drops::from_xrp(50));
        assert_eq!(status.pool_amount.to_xrp(), 50.0);
        assert_eq!(status.dest_tag, Some(binding.dest_tag));

        tokio::time::timeout(StdDuration::from_secs(5), async {
            while h.notifier.sent().is_empty() {
                tokio::time::sleep(StdDuration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, ADMIN);
        assert_eq!(sent[0].buttons[0].action, Action::Start(binding.id.clone()));
        assert_eq!(h.controller.active_monitors(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_duration_selection_binds_once() {
        let h = harness(2);
        let created = h
            .controller
            .create(&admin_in_group(), Some("rISSUER"))
            .await
            .unwrap();

        let invoker = admin_in_private();
        let (a, b) = tokio::join!(
            h.controller.select_duration(&invoker, &created.id, 30),
            h.controller.select_duration(&invoker, &created.id, 60),
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let bound = outcomes
            .iter()
            .filter(|o| matches!(o, DurationOutcome::Bound(_)))
            .count();
        assert_eq!(bound, 1);
        assert!(outcomes.iter().any(|o| matches!(
            o,
            DurationOutcome::AlreadyConfigured {
                phase: Phase::AwaitingDeposit,
                ..
            }
        )));
        assert_eq!(h.controller.pool().available(), 1);

        let again = h
            .controller
            .select_duration(&invoker, &created.id, 90)
            .await
            .unwrap();
        assert!(matches!(again, DurationOutcome::AlreadyConfigured { .. }));
        assert_eq!(h.controller.pool().available(), 1);
    }

    #[tokio::test]
    async fn test_pool_of_one_with_concurrent_selections() {
        let h = harness(1);
        let first = h
            .controller
            .create(&admin_in_group(), Some("rISSUER"))
            .await
            .unwrap();
        let second = h
            .controller
            .create(&admin_in_group(), Some("rISSUER"))
            .await
            .unwrap();
        for id in [&first.id, &second.id] {
            h.controller.begin_setup(&admin_in_group(), id).await.unwrap();
        }

        let invoker = admin_in_private();
        let (a, b) = tokio::join!(
            h.controller.select_duration(&invoker, &first.id, 30),
            h.controller.select_duration(&invoker, &second.id, 30),
        );

        let (winner, loser) = match (a, b) {
            (Ok(DurationOutcome::Bound(_)), Err(e)) => (first.id.clone(), (second.id.clone(), e)),
            (Err(e), Ok(DurationOutcome::Bound(_))) => (second.id.clone(), (first.id.clone(), e)),
            other => panic!("expected exactly one binding, got {:?}", other),
        };
        assert!(matches!(loser.1, CompetitionError::PoolExhausted { capacity: 1 }));
        assert!(loser.1.is_user_facing());

        assert_eq!(
            h.controller.status(&winner).await.unwrap().phase,
            Phase::AwaitingDeposit
        );
        assert_eq!(
            h.controller.status(&loser.0).await.unwrap().phase,
            Phase::AwaitingDuration
        );

        // capacity frees up, retry succeeds
        h.controller
            .abandon(&invoker, &winner, "cancelled by admin")
            .await
            .unwrap();
        let retry = h
            .controller
            .select_duration(&invoker, &loser.0, 30)
            .await
            .unwrap();
        assert!(matches!(retry, DurationOutcome::Bound(_)));
    }

    #[tokio::test]
    async fn test_abandon_stops_monitor_and_releases_once() {
        let h = harness(1);
        let binding = bound(&h).await;
        assert_eq!(h.controller.pool().available(), 0);

        let abandoned = h
            .controller
            .abandon(&admin_in_private(), &binding.id, "cancelled by admin")
            .await
            .unwrap();
        assert_eq!(abandoned.group_id, GROUP);
        assert_eq!(abandoned.released_wallet.as_deref(), Some(WALLETS[0]));
        assert_eq!(h.controller.pool().available(), 1);

        tokio::time::timeout(StdDuration::from_secs(5), async {
            while h.controller.active_monitors() > 0 {
                tokio::time::sleep(StdDuration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let err = h
            .controller
            .abandon(&admin_in_private(), &binding.id, "again")
            .await
            .unwrap_err();
        assert!(matches!(err, CompetitionError::Usage(_)));
        assert_eq!(h.controller.pool().available(), 1);

        // a late deposit no longer changes anything
        h.ledger.push(
            WALLETS[0],
            InMemoryLedger::payment(WALLETS[0], Some(binding.dest_tag), Drops::from_xrp(50)),
        );
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        let status = h.controller.status(&binding.id).await.unwrap();
        assert_eq!(status.phase, Phase::Abandoned);
        assert_eq!(status.pool_amount, Drops::ZERO);
    }

    #[tokio::test]
    async fn test_abandon_succeeds_when_wallet_already_unbound() {
        let h = harness(1);
        let binding = bound(&h).await;

        // Free the binding behind the controller's back.
        let handle: WalletHandle = serde_json::from_value(serde_json::json!({
            "address": binding.address,
            "dest_tag": binding.dest_tag,
        }))
        .unwrap();
        assert!(h.controller.pool().release(&handle));

        let abandoned = h
            .controller
            .abandon(&admin_in_private(), &binding.id, "cancelled by admin")
            .await
            .unwrap();
        assert_eq!(abandoned.group_id, GROUP);
        assert_eq!(abandoned.released_wallet, None);
        assert_eq!(h.controller.pool().available(), 1);

        let status = h.controller.status(&binding.id).await.unwrap();
        assert_eq!(status.phase, Phase::Abandoned);
        assert_eq!(status.wallet_address, None);
    }

    #[tokio::test]
    async fn test_activation_and_trades() {
        let h = harness(1);
        let binding = bound(&h).await;
        let admin = admin_in_private();

        let err = h.controller.activate(&admin, &binding.id).await.unwrap_err();
        assert!(matches!(err, CompetitionError::Usage(_)));
        let err = h
            .controller
            .record_trade(&binding.id, "alice", TradeActivity::Sell { tokens: 1.0 })
            .await
            .unwrap_err();
        assert!(matches!(err, CompetitionError::Usage(_)));

        h.ledger.push(
            WALLETS[0],
            InMemoryLedger::payment(WALLETS[0], Some(binding.dest_tag), Drops::from_xrp(60)),
        );
        wait_for_phase(&h.controller, &binding.id, Phase::Funded).await;

        let started = h.controller.activate(&admin, &binding.id).await.unwrap();
        let ActivateOutcome::Started { group_id, ends_at, .. } = started else {
            panic!("expected start");
        };
        assert_eq!(group_id, GROUP);
        assert!(ends_at > Utc::now() + Duration::minutes(29));

        let again = h.controller.activate(&admin, &binding.id).await.unwrap();
        assert!(matches!(
            again,
            ActivateOutcome::AlreadyStarted {
                phase: Phase::Active,
                ..
            }
        ));

        h.controller
            .record_trade(
                &binding.id,
                "alice",
                TradeActivity::Buy {
                    spent: Drops::from_xrp(5),
                    tokens: 100.0,
                },
            )
            .await
            .unwrap();
        let stats = h
            .controller
            .record_trade(&binding.id, "alice", TradeActivity::Sell { tokens: 25.0 })
            .await
            .unwrap();
        assert_eq!(stats.spent, Drops::from_xrp(5));
        assert_eq!(stats.net_tokens(), 75.0);
        assert_eq!(h.controller.status(&binding.id).await.unwrap().participants, 1);
    }

    #[tokio::test]
    async fn test_sweep_expires_settles_and_evicts() {
        let h = harness(2);
        let waiting = bound(&h).await;
        let running = bound(&h).await;
        let admin = admin_in_private();

        h.ledger.push(
            WALLETS[1],
            InMemoryLedger::payment(WALLETS[1], Some(running.dest_tag), Drops::from_xrp(50)),
        );
        wait_for_phase(&h.controller, &running.id, Phase::Funded).await;
        h.controller.activate(&admin, &running.id).await.unwrap();
        assert_eq!(h.controller.pool().available(), 0);

        let report = h.controller.sweep(Utc::now()).await;
        assert_eq!(report, SweepReport::default());

        let later = Utc::now() + Duration::minutes(61);
        let report = h.controller.sweep(later).await;
        assert_eq!(report.expired, vec![waiting.id.clone()]);
        assert_eq!(report.settled, vec![running.id.clone()]);
        assert_eq!(h.controller.pool().available(), 2);

        let status = h.controller.status(&waiting.id).await.unwrap();
        assert_eq!(status.phase, Phase::Abandoned);
        assert_eq!(status.close_reason.as_deref(), Some("deposit window expired"));
        assert_eq!(
            h.controller.status(&running.id).await.unwrap().phase,
            Phase::Settled
        );
        assert!(h.notifier.sent().iter().any(|m| m.chat_id == GROUP));

        let report = h.controller.sweep(later + Duration::hours(25)).await;
        assert_eq!(report.evicted.len(), 2);
        assert!(h.controller.list().await.is_empty());
        assert!(matches!(
            h.controller.status(&waiting.id).await,
            Err(CompetitionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_rebinds_and_restarts_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("competitions.db");

        let (binding, setup_id) = {
            let storage = Arc::new(Storage::new(&db_path).await.unwrap());
            let h = harness_with(2, Some(storage));
            let binding = bound(&h).await;
            let setup = h
                .controller
                .create(&admin_in_group(), Some("rOTHER"))
                .await
                .unwrap();
            h.controller.shutdown().await;
            (binding, setup.id)
        };

        let storage = Arc::new(Storage::new(&db_path).await.unwrap());
        let h = harness_with(2, Some(storage));
        let report = h.controller.restore().await.unwrap();
        assert_eq!(
            report,
            RestoreReport {
                restored: 2,
                monitors: 1,
                abandoned: 0
            }
        );
        assert_eq!(h.controller.pool().available(), 1);
        assert_eq!(
            h.controller.status(&setup_id).await.unwrap().phase,
            Phase::Setup
        );

        h.ledger.push(
            WALLETS[0],
            InMemoryLedger::payment(WALLETS[0], Some(binding.dest_tag), Drops::from_xrp(50)),
        );
        wait_for_phase(&h.controller, &binding.id, Phase::Funded).await;

        // the next binding on the reclaimed wallet gets a fresh tag
        h.controller
            .abandon(&admin_in_private(), &binding.id, "done")
            .await
            .unwrap();
        let next = h
            .controller
            .select_duration(&admin_in_private(), &setup_id, 60)
            .await
            .unwrap();
        let DurationOutcome::Bound(next) = next else {
            panic!("expected binding");
        };
        assert_eq!(next.address, WALLETS[0]);
        assert_ne!(next.dest_tag, binding.dest_tag);
    }

    #[tokio::test]
    async fn test_restore_abandons_when_wallet_removed() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let binding = {
            let h = harness_with(2, Some(storage.clone()));
            bound(&h).await;
            let second = bound(&h).await;
            h.controller.shutdown().await;
            second
        };
        assert_eq!(binding.address, WALLETS[1]);

        // only the first wallet is configured now
        let h = harness_with(1, Some(storage));
        let report = h.controller.restore().await.unwrap();
        assert_eq!(report.restored, 2);
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.monitors, 1);

        let status = h.controller.status(&binding.id).await.unwrap();
        assert_eq!(status.phase, Phase::Abandoned);
        assert_eq!(h.controller.pool().available(), 0);
    }
}
