//! In-process store. Readers see the last committed snapshot; a write
//! transaction holds the writer mutex and works on a private copy that
//! replaces the snapshot on commit.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use parking_lot::{Mutex, MutexGuard, RwLock};

use super::{PublishStore, ScheduleStore, StoreTransaction};
use crate::calendar::{DateRange, IsoWeek};
use crate::error::StoreResult;
use crate::model::{
    Audience, BlockId, ClassId, EntryId, NewEntry, NewSubstitution, ScheduleTarget,
    SubstitutionEntry, SubstitutionId, TimetableEntry,
};
use crate::publish::{PublishRecord, PublishStatus};

#[derive(Debug, Clone, Default)]
struct Snapshot {
    entries: BTreeMap<EntryId, TimetableEntry>,
    substitutions: BTreeMap<SubstitutionId, SubstitutionEntry>,
    next_entry_id: i64,
    next_substitution_id: i64,
}

impl Snapshot {
    fn sorted_entries(&self, keep: impl Fn(&TimetableEntry) -> bool) -> Vec<TimetableEntry> {
        let mut entries: Vec<TimetableEntry> =
            self.entries.values().filter(|e| keep(e)).cloned().collect();
        entries.sort_by_key(|e| (e.day_of_week, e.period, e.id));
        entries
    }
}

#[derive(Default)]
pub struct MemoryStore {
    committed: RwLock<Snapshot>,
    writer: Mutex<()>,
    publish: RwLock<BTreeMap<(IsoWeek, Audience), PublishRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScheduleStore for MemoryStore {
    fn entries_for(
        &self,
        target: &ScheduleTarget,
        _week: IsoWeek,
    ) -> StoreResult<Vec<TimetableEntry>> {
        Ok(self.committed.read().sorted_entries(|e| target.owns(e)))
    }

    fn class_entries(&self, classes: &[ClassId]) -> StoreResult<Vec<TimetableEntry>> {
        Ok(self
            .committed
            .read()
            .sorted_entries(|e| classes.contains(&e.class_id)))
    }

    fn substitutions_for(
        &self,
        target: &ScheduleTarget,
        range: DateRange,
    ) -> StoreResult<Vec<SubstitutionEntry>> {
        let snapshot = self.committed.read();
        let concerns = |sub: &SubstitutionEntry| match target {
            ScheduleTarget::Class(class) => sub.class_id == *class,
            ScheduleTarget::Teacher(teacher) => {
                sub.kind.new_teacher() == Some(teacher)
                    || snapshot.entries.values().any(|e| {
                        e.teacher_id == *teacher
                            && e.class_id == sub.class_id
                            && e.day_of_week == sub.day_of_week()
                            && e.period == sub.period
                    })
            }
        };
        Ok(snapshot
            .substitutions
            .values()
            .filter(|s| range.contains(s.date) && concerns(s))
            .cloned()
            .collect())
    }

    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        let guard = self.writer.lock();
        let staged = self.committed.read().clone();
        Ok(Box::new(MemoryTransaction {
            store: self,
            _guard: guard,
            staged,
        }))
    }
}

impl PublishStore for MemoryStore {
    fn get_status(&self, week: IsoWeek) -> StoreResult<PublishStatus> {
        let records = self.publish.read();
        let flag = |audience| {
            records
                .get(&(week, audience))
                .is_some_and(|r: &PublishRecord| r.published)
        };
        Ok(PublishStatus {
            student: flag(Audience::Student),
            teacher: flag(Audience::Teacher),
        })
    }

    fn record(&self, week: IsoWeek, audience: Audience) -> StoreResult<Option<PublishRecord>> {
        Ok(self.publish.read().get(&(week, audience)).cloned())
    }

    fn set_status(&self, record: &PublishRecord) -> StoreResult<Option<PublishRecord>> {
        let mut records = self.publish.write();
        let key = (record.week, record.audience);
        let previous = records.get(&key).cloned();
        if previous.as_ref().is_some_and(|r| r.published) != record.published {
            records.insert(key, record.clone());
        }
        Ok(previous)
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    _guard: MutexGuard<'a, ()>,
    staged: Snapshot,
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn entry(&mut self, id: EntryId) -> StoreResult<Option<TimetableEntry>> {
        Ok(self.staged.entries.get(&id).cloned())
    }

    fn block(&mut self, id: &BlockId) -> StoreResult<Vec<TimetableEntry>> {
        Ok(self
            .staged
            .sorted_entries(|e| e.block_id.as_ref() == Some(id)))
    }

    fn entries_on_day(&mut self, day_of_week: u8) -> StoreResult<Vec<TimetableEntry>> {
        Ok(self
            .staged
            .sorted_entries(move |e| e.day_of_week == day_of_week))
    }

    fn substitution(&mut self, id: SubstitutionId) -> StoreResult<Option<SubstitutionEntry>> {
        Ok(self.staged.substitutions.get(&id).cloned())
    }

    fn substitutions_on(&mut self, date: NaiveDate) -> StoreResult<Vec<SubstitutionEntry>> {
        Ok(self
            .staged
            .substitutions
            .values()
            .filter(|s| s.date == date)
            .cloned()
            .collect())
    }

    fn substitutions_since(&mut self, from: NaiveDate) -> StoreResult<Vec<SubstitutionEntry>> {
        Ok(self
            .staged
            .substitutions
            .values()
            .filter(|s| s.date >= from)
            .cloned()
            .collect())
    }

    fn insert_entry(&mut self, entry: NewEntry) -> StoreResult<TimetableEntry> {
        self.staged.next_entry_id += 1;
        let stored = entry.with_id(EntryId(self.staged.next_entry_id));
        self.staged.entries.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn delete_entry(&mut self, id: EntryId) -> StoreResult<bool> {
        Ok(self.staged.entries.remove(&id).is_some())
    }

    fn insert_substitution(
        &mut self,
        substitution: NewSubstitution,
    ) -> StoreResult<SubstitutionEntry> {
        self.staged.next_substitution_id += 1;
        let stored = substitution.with_id(SubstitutionId(self.staged.next_substitution_id));
        self.staged.substitutions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn delete_substitution(&mut self, id: SubstitutionId) -> StoreResult<bool> {
        Ok(self.staged.substitutions.remove(&id).is_some())
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            store,
            _guard,
            staged,
        } = *self;
        *store.committed.write() = staged;
        drop(_guard);
        Ok(())
    }
}
