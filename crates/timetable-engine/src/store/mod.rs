//! Persistence contracts and the bundled backends.
//!
//! Reads go straight to committed data. Every write goes through a
//! [`StoreTransaction`], which the [`Planner`](crate::planner::Planner) holds
//! across the conflict check and the mutation it guards, so two concurrent
//! saves can never both pass the check. Dropping a transaction without
//! committing rolls it back.

use chrono::NaiveDate;

use crate::calendar::{DateRange, IsoWeek};
use crate::error::StoreResult;
use crate::model::{
    Audience, BlockId, ClassId, EntryId, NewEntry, NewSubstitution, ScheduleTarget,
    SubstitutionEntry, SubstitutionId, TimetableEntry,
};
use crate::publish::{PublishRecord, PublishStatus};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Base timetable and substitution storage.
pub trait ScheduleStore: Send + Sync {
    /// Base entries of a target's plan for `week`, ordered by day, period, id.
    ///
    /// The base timetable recurs weekly; backends with dated validity may use
    /// `week` to filter.
    fn entries_for(&self, target: &ScheduleTarget, week: IsoWeek)
        -> StoreResult<Vec<TimetableEntry>>;

    /// Every base entry of the given classes.
    fn class_entries(&self, classes: &[ClassId]) -> StoreResult<Vec<TimetableEntry>>;

    /// Substitutions dated inside `range` that concern `target`. For a class
    /// that is the class's own substitutions; for a teacher, the ones that
    /// bring the teacher in or touch a lesson the teacher normally gives.
    /// Returning a superset is allowed; the resolver filters again.
    fn substitutions_for(
        &self,
        target: &ScheduleTarget,
        range: DateRange,
    ) -> StoreResult<Vec<SubstitutionEntry>>;

    /// Open a write transaction. Blocks until no other write transaction is
    /// open (bounded by the backend's busy timeout).
    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction + '_>>;
}

/// Serialized read-check-write unit of work.
pub trait StoreTransaction {
    fn entry(&mut self, id: EntryId) -> StoreResult<Option<TimetableEntry>>;

    fn block(&mut self, id: &BlockId) -> StoreResult<Vec<TimetableEntry>>;

    /// Every base entry on one weekday, any class.
    fn entries_on_day(&mut self, day_of_week: u8) -> StoreResult<Vec<TimetableEntry>>;

    fn substitution(&mut self, id: SubstitutionId) -> StoreResult<Option<SubstitutionEntry>>;

    /// Every substitution on one date, any class.
    fn substitutions_on(&mut self, date: NaiveDate) -> StoreResult<Vec<SubstitutionEntry>>;

    /// Every substitution dated on or after `from`, any class.
    fn substitutions_since(&mut self, from: NaiveDate) -> StoreResult<Vec<SubstitutionEntry>>;

    fn insert_entry(&mut self, entry: NewEntry) -> StoreResult<TimetableEntry>;

    /// Returns whether a row was deleted.
    fn delete_entry(&mut self, id: EntryId) -> StoreResult<bool>;

    fn insert_substitution(&mut self, substitution: NewSubstitution)
        -> StoreResult<SubstitutionEntry>;

    fn delete_substitution(&mut self, id: SubstitutionId) -> StoreResult<bool>;

    fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Publish flag storage.
pub trait PublishStore: Send + Sync {
    fn get_status(&self, week: IsoWeek) -> StoreResult<PublishStatus>;

    fn record(&self, week: IsoWeek, audience: Audience) -> StoreResult<Option<PublishRecord>>;

    /// Store `record` unless the stored flag already equals
    /// `record.published`. The read and the write are one atomic step, so
    /// two racing transitions cannot both apply. Returns the record in effect
    /// before the call.
    fn set_status(&self, record: &PublishRecord) -> StoreResult<Option<PublishRecord>>;
}
