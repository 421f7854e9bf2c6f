//! Resolved weeks keyed by (target, week).
//!
//! Every committed write bumps the generation and evicts what it touched
//! before the write returns. A reader records the generation before loading
//! and inserts with [`ResolvedWeekCache::insert_if`], which refuses the insert
//! when a write happened in between, so a stale result is never stored.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::calendar::IsoWeek;
use crate::model::{ResolvedSlot, ScheduleTarget};

type Key = (ScheduleTarget, IsoWeek);

#[derive(Debug, Default)]
struct State {
    generation: u64,
    weeks: HashMap<Key, Arc<Vec<ResolvedSlot>>>,
}

#[derive(Debug, Default)]
pub struct ResolvedWeekCache {
    state: RwLock<State>,
}

impl ResolvedWeekCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub fn get(&self, target: &ScheduleTarget, week: IsoWeek) -> Option<Arc<Vec<ResolvedSlot>>> {
        self.state.read().weeks.get(&(target.clone(), week)).cloned()
    }

    /// Store a result computed from data read at `generation`. Returns false
    /// (and stores nothing) if a write has been acknowledged since.
    pub fn insert_if(
        &self,
        generation: u64,
        target: ScheduleTarget,
        week: IsoWeek,
        slots: Arc<Vec<ResolvedSlot>>,
    ) -> bool {
        let mut state = self.state.write();
        if state.generation != generation {
            trace!(schedule = %target, week = %week, "discarding stale resolution");
            return false;
        }
        state.weeks.insert((target, week), slots);
        true
    }

    /// Evict every target's view of one week.
    pub fn invalidate_week(&self, week: IsoWeek) {
        let mut state = self.state.write();
        state.generation += 1;
        state.weeks.retain(|(_, cached), _| *cached != week);
    }

    /// Evict everything. Base timetable writes recur in every week.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.generation += 1;
        state.weeks.clear();
    }

    pub fn len(&self) -> usize {
        self.state.read().weeks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
