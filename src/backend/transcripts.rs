use std::collections::BTreeMap;
use std::sync::Arc;

use crate::app::TranscriptMap;
use crate::models::Entity;
use crate::sync::ReplicaChange;
use crate::transcript::accumulate;

/// Per-server pane transcripts, recomputed only for servers a change touched.
#[derive(Debug, Default)]
pub struct TranscriptCache {
    panes: TranscriptMap,
}

impl TranscriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the cache in line with `replica` after `change`.
    /// Returns false when nothing needed recomputing.
    pub fn apply(&mut self, change: &ReplicaChange, replica: &BTreeMap<String, Entity>) -> bool {
        match change {
            ReplicaChange::None => false,
            ReplicaChange::Replaced => {
                self.rebuild(replica);
                true
            }
            ReplicaChange::Entities { changed, removed } => {
                if changed.is_empty() && removed.is_empty() {
                    return false;
                }
                let panes = Arc::make_mut(&mut self.panes);
                for id in changed {
                    if let Some(entity) = replica.get(id) {
                        panes.insert(id.clone(), Arc::new(accumulate(&entity.data_history)));
                    }
                }
                for id in removed {
                    panes.remove(id);
                }
                true
            }
        }
    }

    pub fn rebuild(&mut self, replica: &BTreeMap<String, Entity>) {
        let panes = replica
            .iter()
            .map(|(id, entity)| (id.clone(), Arc::new(accumulate(&entity.data_history))))
            .collect();
        self.panes = Arc::new(panes);
    }

    pub fn snapshot(&self) -> TranscriptMap {
        Arc::clone(&self.panes)
    }
}
