use crate::error::{CoreError, Result};
use crate::wallet::{Credential, PrizeWalletConfig, MAX_PRIZE_WALLETS};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Destination tags are kept below 10^8.
pub const TAG_MODULUS: u32 = 100_000_000;

/// A binding of one prize wallet to one competition. Cheap to clone and
/// safe to show in chat; it never carries the signing credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletHandle {
    address: String,
    dest_tag: u32,
}

impl WalletHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn dest_tag(&self) -> u32 {
        self.dest_tag
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletStatus {
    pub address: String,
    pub available: bool,
    pub bound_tag: Option<u32>,
}

struct PoolEntry {
    address: String,
    // Signing key for payouts; nothing signs yet.
    #[allow(dead_code)]
    credential: Credential,
    available: bool,
    bound_tag: Option<u32>,
    next_tag: u32,
}

impl PoolEntry {
    fn bind(&mut self, tag: u32) -> WalletHandle {
        self.available = false;
        self.bound_tag = Some(tag);
        self.next_tag = (tag + 1) % TAG_MODULUS;
        WalletHandle {
            address: self.address.clone(),
            dest_tag: tag,
        }
    }
}

/// Fixed set of prize wallets, each bound to at most one competition.
pub struct WalletPool {
    entries: Mutex<Vec<PoolEntry>>,
}

impl WalletPool {
    pub fn new(configs: Vec<PrizeWalletConfig>) -> Result<Self> {
        let seed = (Utc::now().timestamp_millis().rem_euclid(TAG_MODULUS as i64)) as u32;
        Self::with_tag_seed(configs, seed)
    }

    /// Builds a pool whose per-wallet tag sequences start at `seed`.
    pub fn with_tag_seed(configs: Vec<PrizeWalletConfig>, seed: u32) -> Result<Self> {
        if configs.len() > MAX_PRIZE_WALLETS {
            return Err(CoreError::config(format!(
                "At most {} prize wallets are supported, got {}",
                MAX_PRIZE_WALLETS,
                configs.len()
            )));
        }

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(configs.len());
        for config in configs {
            config.validate()?;
            if !seen.insert(config.address.clone()) {
                return Err(CoreError::config(format!(
                    "Prize wallet {} is configured twice",
                    config.address
                )));
            }
            entries.push(PoolEntry {
                address: config.address,
                credential: config.credential,
                available: true,
                bound_tag: None,
                next_tag: seed % TAG_MODULUS,
            });
        }

        Ok(Self {
            entries: Mutex::new(entries),
        })
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn available(&self) -> usize {
        self.entries.lock().iter().filter(|e| e.available).count()
    }

    /// Binds the first free wallet and assigns it the next tag in its
    /// sequence. `None` means the pool is full.
    pub fn acquire(&self) -> Option<WalletHandle> {
        let mut entries = self.entries.lock();
        let entry = entries.iter_mut().find(|e| e.available)?;
        let tag = entry.next_tag;
        let handle = entry.bind(tag);

        tracing::info!(
            "Bound prize wallet {} with destination tag {}",
            handle.address,
            handle.dest_tag
        );
        Some(handle)
    }

    /// Frees the wallet behind `handle`. Returns `false` without touching
    /// the pool if the wallet is already free or bound under another tag.
    pub fn release(&self, handle: &WalletHandle) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.iter_mut().find(|e| e.address == handle.address) else {
            tracing::warn!("Release of unknown prize wallet {}", handle.address);
            return false;
        };

        if entry.available || entry.bound_tag != Some(handle.dest_tag) {
            tracing::debug!(
                "Ignoring release of prize wallet {} (tag {}): not bound under that tag",
                handle.address,
                handle.dest_tag
            );
            return false;
        }

        entry.available = true;
        entry.bound_tag = None;
        tracing::info!("Released prize wallet {}", handle.address);
        true
    }

    /// Re-establishes a binding recorded before a restart. Fails if the
    /// address is no longer configured or is already bound.
    pub fn reclaim(&self, handle: &WalletHandle) -> Option<WalletHandle> {
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.address == handle.address && e.available)?;
        Some(entry.bind(handle.dest_tag % TAG_MODULUS))
    }

    pub fn status(&self) -> Vec<WalletStatus> {
        self.entries
            .lock()
            .iter()
            .map(|e| WalletStatus {
                address: e.address.clone(),
                available: e.available,
                bound_tag: e.bound_tag,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESSES: [&str; 3] = [
        "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh",
        "rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe",
        "rGWrZyQqhTp9Xu7G5Pkayo7bXjH4k4QYpf",
    ];

    fn configs(n: usize) -> Vec<PrizeWalletConfig> {
        ADDRESSES[..n]
            .iter()
            .map(|a| PrizeWalletConfig::new(*a, "sEdTM1uX8pu2do5XvTnutH6HsouMaM2").unwrap())
            .collect()
    }

    #[test]
    fn test_exhaustion_and_reuse() {
        for n in 1..=3 {
            let pool = WalletPool::new(configs(n)).unwrap();
            let handles: Vec<_> = (0..n).map(|_| pool.acquire().unwrap()).collect();
            assert!(pool.acquire().is_none());
            assert_eq!(pool.available(), 0);

            assert!(pool.release(&handles[n - 1]));
            assert!(pool.acquire().is_some());
        }
    }

    #[test]
    fn test_empty_pool() {
        let pool = WalletPool::new(Vec::new()).unwrap();
        assert_eq!(pool.capacity(), 0);
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn test_no_wallet_bound_twice() {
        let pool = WalletPool::new(configs(3)).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        let addresses: HashSet<_> = [&a, &b, &c].iter().map(|h| h.address().to_string()).collect();
        assert_eq!(addresses.len(), 3);
    }

    #[test]
    fn test_release_is_idempotent() {
        let pool = WalletPool::new(configs(1)).unwrap();
        let handle = pool.acquire().unwrap();
        assert!(pool.release(&handle));
        assert!(!pool.release(&handle));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_stale_handle_cannot_release_new_binding() {
        let pool = WalletPool::new(configs(1)).unwrap();
        let old = pool.acquire().unwrap();
        assert!(pool.release(&old));

        let current = pool.acquire().unwrap();
        assert_eq!(current.address(), old.address());
        assert_ne!(current.dest_tag(), old.dest_tag());

        assert!(!pool.release(&old));
        assert_eq!(
            pool.status()[0].bound_tag,
            Some(current.dest_tag()),
            "stale release must leave the new binding in place"
        );
    }

    #[test]
    fn test_tags_follow_per_wallet_sequence() {
        let pool = WalletPool::with_tag_seed(configs(1), TAG_MODULUS - 1).unwrap();
        let first = pool.acquire().unwrap();
        assert_eq!(first.dest_tag(), TAG_MODULUS - 1);
        pool.release(&first);

        let second = pool.acquire().unwrap();
        assert_eq!(second.dest_tag(), 0);
    }

    #[test]
    fn test_reclaim_restores_binding() {
        let pool = WalletPool::with_tag_seed(configs(2), 10).unwrap();
        let handle = pool.acquire().unwrap();

        let fresh = WalletPool::with_tag_seed(configs(2), 10).unwrap();
        let restored = fresh.reclaim(&handle).unwrap();
        assert_eq!(restored, handle);
        assert!(fresh.reclaim(&handle).is_none());

        // the next binding on that wallet never reuses the restored tag
        fresh.release(&restored);
        let next = fresh.acquire().unwrap();
        assert_eq!(next.address(), handle.address());
        assert_eq!(next.dest_tag(), handle.dest_tag() + 1);
    }

    #[test]
    fn test_rejects_duplicate_and_oversized_config() {
        let mut dup = configs(1);
        dup.extend(configs(1));
        assert!(WalletPool::new(dup).is_err());

        let many = (0..=MAX_PRIZE_WALLETS).flat_map(|_| configs(1)).collect();
        assert!(WalletPool::new(many).is_err());
    }
}
