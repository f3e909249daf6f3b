use crate::competition::{CompetitionId, Phase};
use crate::registry::SharedCompetition;
use chrono::Utc;
use parking_lot::Mutex;
use spendcomp_core::{Drops, LedgerInquiry, LedgerTransaction, WalletHandle};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(12);
pub const FUNDING_THRESHOLD: Drops = Drops::from_xrp(50);

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub threshold: Drops,
    /// How many recent transactions to inspect per poll.
    pub history_limit: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            threshold: FUNDING_THRESHOLD,
            history_limit: 20,
        }
    }
}

/// Whether `tx` funds the competition bound to `wallet`.
pub fn qualifies(tx: &LedgerTransaction, wallet: &WalletHandle, threshold: Drops) -> bool {
    tx.is_payment()
        && tx.validated
        && tx.succeeded
        && tx.destination.as_deref() == Some(wallet.address())
        && tx.destination_tag == Some(wallet.dest_tag())
        && tx.amount.map_or(false, |amount| amount >= threshold)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Funded { amount: Drops },
    Cancelled,
    PhaseLeft(Phase),
}

/// Polls the ledger until a qualifying deposit moves the competition to
/// FUNDED, the competition leaves AWAITING_DEPOSIT, or `cancel` fires.
/// Dropping the sender half of `cancel` also stops the watch.
pub async fn watch_deposit(
    record: SharedCompetition,
    ledger: Arc<dyn LedgerInquiry>,
    settings: MonitorSettings,
    mut cancel: oneshot::Receiver<()>,
) -> MonitorOutcome {
    loop {
        let (id, wallet) = {
            let comp = record.lock().await;
            match (comp.phase(), comp.prize_wallet()) {
                (Phase::AwaitingDeposit, Some(wallet)) => (comp.id().clone(), wallet.clone()),
                (phase, _) => return MonitorOutcome::PhaseLeft(phase),
            }
        };

        let polled = tokio::select! {
            _ = &mut cancel => return MonitorOutcome::Cancelled,
            result = ledger.account_transactions(wallet.address(), settings.history_limit) => result,
        };

        match polled {
            Ok(txs) => {
                if let Some(amount) = txs
                    .iter()
                    .find(|tx| qualifies(tx, &wallet, settings.threshold))
                    .and_then(|tx| tx.amount)
                {
                    let mut comp = record.lock().await;
                    if comp.phase() != Phase::AwaitingDeposit || comp.prize_wallet() != Some(&wallet)
                    {
                        return MonitorOutcome::PhaseLeft(comp.phase());
                    }
                    return match comp.confirm_deposit(amount, Utc::now()) {
                        Ok(()) => MonitorOutcome::Funded { amount },
                        Err(e) => {
                            tracing::error!("Deposit for competition {} not recorded: {}", id, e);
                            MonitorOutcome::PhaseLeft(comp.phase())
                        }
                    };
                }

                tracing::debug!(
                    "No qualifying deposit yet for competition {} ({} txs inspected)",
                    id,
                    txs.len()
                );
            }
            Err(e) => {
                tracing::warn!("Ledger inquiry for competition {} failed: {}", id, e);
            }
        }

        tokio::select! {
            _ = &mut cancel => return MonitorOutcome::Cancelled,
            _ = tokio::time::sleep(settings.poll_interval) => {}
        }
    }
}

struct MonitorTask {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Deposit monitor tasks keyed by competition.
#[derive(Default)]
pub struct MonitorSupervisor {
    tasks: Mutex<HashMap<CompetitionId, MonitorTask>>,
}

impl MonitorSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` for `id`, cancelling any monitor already running for it.
    pub fn spawn<F, Fut>(&self, id: CompetitionId, task: F)
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel, cancelled) = oneshot::channel();
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, t| !t.handle.is_finished());

        if let Some(previous) = tasks.remove(&id) {
            tracing::warn!("Replacing running deposit monitor for competition {}", id);
            let _ = previous.cancel.send(());
        }

        let handle = tokio::spawn(task(cancelled));
        tracing::debug!("Started deposit monitor for competition {}", id);
        tasks.insert(id, MonitorTask { cancel, handle });
    }

    /// Signals the monitor for `id` to stop. Returns whether one was running.
    pub fn cancel(&self, id: &CompetitionId) -> bool {
        let Some(task) = self.tasks.lock().remove(id) else {
            return false;
        };
        let running = !task.handle.is_finished();
        let _ = task.cancel.send(());
        if running {
            tracing::info!("Cancelled deposit monitor for competition {}", id);
        }
        running
    }

    pub fn is_running(&self, id: &CompetitionId) -> bool {
        self.tasks
            .lock()
            .get(id)
            .map_or(false, |t| !t.handle.is_finished())
    }

    pub fn active(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, t| !t.handle.is_finished());
        tasks.len()
    }

    /// Cancels every monitor and waits for them to exit.
    pub async fn shutdown(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain().map(|(_, t)| t).collect();
        for task in tasks {
            let _ = task.cancel.send(());
            if let Err(e) = task.handle.await {
                tracing::warn!("Deposit monitor ended abnormally: {}", e);
            }
        }
    }
}
