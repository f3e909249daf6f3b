use crate::competition::{Competition, CompetitionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A record behind its own lock; every mutation of one competition is
/// serialized through it.
pub type SharedCompetition = Arc<Mutex<Competition>>;

/// Owns every competition record.
#[derive(Default)]
pub struct CompetitionRegistry {
    records: RwLock<HashMap<CompetitionId, SharedCompetition>>,
}

impl CompetitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `competition` unless its id is taken.
    pub fn try_insert(&self, competition: Competition) -> Option<SharedCompetition> {
        let mut records = self.records.write();
        if records.contains_key(competition.id()) {
            return None;
        }
        let id = competition.id().clone();
        let shared = Arc::new(Mutex::new(competition));
        records.insert(id, shared.clone());
        Some(shared)
    }

    pub fn get(&self, id: &CompetitionId) -> Option<SharedCompetition> {
        self.records.read().get(id).cloned()
    }

    pub fn remove(&self, id: &CompetitionId) -> Option<SharedCompetition> {
        self.records.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Point-in-time copy of the handles, sorted by id.
    pub fn entries(&self) -> Vec<(CompetitionId, SharedCompetition)> {
        let mut entries: Vec<_> = self
            .records
            .read()
            .iter()
            .map(|(id, shared)| (id.clone(), shared.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
