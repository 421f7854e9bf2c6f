//! The service facade editors and readers talk to.
//!
//! Every write runs the same pipeline:
//!
//! 1. validate the request,
//! 2. open a store transaction,
//! 3. look up the rows an edit or delete names (`NotFound` if missing),
//! 4. run the conflict gate against the data inside that transaction,
//! 5. mutate and commit,
//! 6. evict affected cache entries,
//! 7. hand one [`AuditEvent`] to the sink.
//!
//! Any error before the commit drops the transaction, which rolls it back.
//! Reads go through the publish gate and the resolved-week cache.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::audit::{AuditAction, AuditEvent, AuditSink, TracingAuditSink};
use crate::cache::ResolvedWeekCache;
use crate::calendar::{IsoWeek, SchoolCalendar};
use crate::clock::{Clock, SystemClock};
use crate::conflict::{
    check_entry, check_restored, check_substitution, ConflictReport, ProposedEntry,
    ProposedSubstitution,
};
use crate::error::{Result, TimetableError};
use crate::location::{self, Location};
use crate::model::{
    day_of_week, validate_day, validate_period_range, Access, Actor, Audience, BlockId, ClassId,
    EntryDraft, EntryId, Exclusion, ResolvedSlot, ScheduleTarget, SubstitutionDraft,
    SubstitutionEntry, SubstitutionId, TeacherId, TimetableEntry,
};
use crate::overlay::{resolve_week, WeekSource};
use crate::publish::{PublishStateMachine, PublishStatus, Transition};
use crate::store::{PublishStore, ScheduleStore, StoreTransaction};

/// One target's week as a reader sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekView {
    pub target: ScheduleTarget,
    pub week: IsoWeek,
    pub audience: Audience,
    /// True when the week is unpublished for this audience and the reader is
    /// not privileged; `slots` is then empty.
    pub blocked: bool,
    pub slots: Vec<ResolvedSlot>,
}

pub struct Planner<S, A = TracingAuditSink, C = SystemClock> {
    store: S,
    calendar: SchoolCalendar,
    audit: A,
    clock: C,
    cache: ResolvedWeekCache,
}

impl<S> Planner<S>
where
    S: ScheduleStore + PublishStore,
{
    /// A planner that audits through `tracing` and reads the system clock.
    pub fn new(store: S, calendar: SchoolCalendar) -> Self {
        Self {
            store,
            calendar,
            audit: TracingAuditSink,
            clock: SystemClock,
            cache: ResolvedWeekCache::new(),
        }
    }
}

impl<S, A, C> Planner<S, A, C>
where
    S: ScheduleStore + PublishStore,
    A: AuditSink,
    C: Clock,
{
    pub fn with_audit<A2: AuditSink>(self, audit: A2) -> Planner<S, A2, C> {
        Planner {
            store: self.store,
            calendar: self.calendar,
            audit,
            clock: self.clock,
            cache: self.cache,
        }
    }

    pub fn with_clock<C2: Clock>(self, clock: C2) -> Planner<S, A, C2> {
        Planner {
            store: self.store,
            calendar: self.calendar,
            audit: self.audit,
            clock,
            cache: self.cache,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn calendar(&self) -> &SchoolCalendar {
        &self.calendar
    }

    pub fn cache(&self) -> &ResolvedWeekCache {
        &self.cache
    }

    // ── Base timetable writes ──────────────────────────────────────────

    /// Book a class with one teacher in one room for a range of periods.
    ///
    /// A multi-period draft is stored as one row per period sharing a fresh
    /// block id. When `draft.replaces` names an entry or block, those rows are
    /// ignored by the conflict check and deleted in the same transaction.
    ///
    /// # Errors
    ///
    /// - `Validation` for a malformed draft.
    /// - `NotFound` when the replaced entry or block does not exist.
    /// - `Conflict` when any period would double-book the class, the teacher
    ///   or the room, either against the base timetable or against an
    ///   upcoming substitution that brings that teacher or room in. Nothing
    ///   is written.
    pub fn save_entry(&self, actor: &Actor, draft: EntryDraft) -> Result<Vec<TimetableEntry>> {
        draft.validate()?;
        let block_id = (draft.start_period < draft.end_period).then(BlockId::generate);

        let mut tx = self.store.begin()?;
        let replaced = match &draft.replaces {
            None => Vec::new(),
            Some(Exclusion::Entry(id)) => vec![tx
                .entry(*id)?
                .ok_or_else(|| TimetableError::not_found("entry", id))?],
            Some(Exclusion::Block(block)) => {
                let rows = tx.block(block)?;
                if rows.is_empty() {
                    return Err(TimetableError::not_found("block", block));
                }
                rows
            }
        };

        let existing = tx.entries_on_day(draft.day_of_week)?;
        let upcoming = tx.substitutions_since(self.today())?;
        let report = check_entry(&ProposedEntry::from(&draft), &existing, &upcoming);
        if !report.is_empty() {
            debug!(class = %draft.class_id, collisions = report.len(), "entry rejected");
            return Err(TimetableError::Conflict(report));
        }

        for row in &replaced {
            tx.delete_entry(row.id)?;
        }
        let mut saved = Vec::with_capacity(usize::from(draft.end_period - draft.start_period) + 1);
        for row in draft.rows(block_id) {
            saved.push(tx.insert_entry(row)?);
        }
        tx.commit()?;

        self.cache.clear();
        self.emit(
            AuditAction::SaveEntry,
            actor,
            format!(
                "class {} day {} periods {}-{}",
                draft.class_id, draft.day_of_week, draft.start_period, draft.end_period
            ),
            (!replaced.is_empty()).then(|| to_json(&replaced)).flatten(),
            to_json(&saved),
        );
        Ok(saved)
    }

    /// Delete one base entry. Other rows of its block stay.
    pub fn delete_entry(&self, actor: &Actor, id: EntryId) -> Result<TimetableEntry> {
        let mut tx = self.store.begin()?;
        let entry = tx
            .entry(id)?
            .ok_or_else(|| TimetableError::not_found("entry", id))?;
        tx.delete_entry(id)?;
        tx.commit()?;

        self.cache.clear();
        self.emit(
            AuditAction::DeleteEntry,
            actor,
            format!("entry {}", id),
            to_json(&entry),
            None,
        );
        Ok(entry)
    }

    /// Delete every row of a block.
    pub fn delete_block(&self, actor: &Actor, block: &BlockId) -> Result<Vec<TimetableEntry>> {
        let mut tx = self.store.begin()?;
        let rows = tx.block(block)?;
        if rows.is_empty() {
            return Err(TimetableError::not_found("block", block));
        }
        for row in &rows {
            tx.delete_entry(row.id)?;
        }
        tx.commit()?;

        self.cache.clear();
        self.emit(
            AuditAction::DeleteBlock,
            actor,
            format!("block {}", block),
            to_json(&rows),
            None,
        );
        Ok(rows)
    }

    // ── Substitution writes ────────────────────────────────────────────

    /// Apply a substitution to a range of periods of one class on one date,
    /// stored as one row per period.
    ///
    /// # Errors
    ///
    /// - `Validation` for a malformed draft (weekend date, bad periods,
    ///   missing required field).
    /// - `NotFound` when the replaced substitution does not exist.
    /// - `Conflict` when the class already has another substitution on a
    ///   period, or the introduced teacher or room is effectively taken, or
    ///   an edit uncovers a base lesson whose teacher or room is now taken.
    pub fn save_substitution(
        &self,
        actor: &Actor,
        draft: SubstitutionDraft,
    ) -> Result<Vec<SubstitutionEntry>> {
        draft.validate()?;

        let mut tx = self.store.begin()?;
        let replaced = match draft.replaces {
            None => None,
            Some(id) => Some(
                tx.substitution(id)?
                    .ok_or_else(|| TimetableError::not_found("substitution", id))?,
            ),
        };

        let entries = tx.entries_on_day(day_of_week(draft.date))?;
        let substitutions = tx.substitutions_on(draft.date)?;
        let report = check_substitution(
            &ProposedSubstitution::from(&draft),
            &entries,
            &substitutions,
        );
        if !report.is_empty() {
            debug!(
                class = %draft.class_id,
                date = %draft.date,
                collisions = report.len(),
                "substitution rejected"
            );
            return Err(TimetableError::Conflict(report));
        }

        if let Some(old) = &replaced {
            tx.delete_substitution(old.id)?;
        }
        let mut saved = Vec::new();
        for row in draft.rows() {
            saved.push(tx.insert_substitution(row)?);
        }
        if let Some(old) = &replaced {
            restore_gate(&mut *tx, old)?;
        }
        tx.commit()?;

        self.cache.invalidate_week(IsoWeek::from_date(draft.date));
        if let Some(old) = &replaced {
            self.cache.invalidate_week(IsoWeek::from_date(old.date));
        }
        self.emit(
            AuditAction::SaveSubstitution,
            actor,
            substitution_subject(&draft.class_id, draft.date, draft.start_period, draft.end_period),
            replaced.as_ref().and_then(to_json),
            to_json(&saved),
        );
        Ok(saved)
    }

    /// Remove one substitution row, bringing back the lesson it overlaid.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the substitution does not exist.
    /// - `Conflict` when the returning lesson's teacher or room is taken by
    ///   another class on that date (for example a cover that relied on the
    ///   cancellation). Nothing is deleted.
    pub fn delete_substitution(
        &self,
        actor: &Actor,
        id: SubstitutionId,
    ) -> Result<SubstitutionEntry> {
        let mut tx = self.store.begin()?;
        let sub = tx
            .substitution(id)?
            .ok_or_else(|| TimetableError::not_found("substitution", id))?;
        tx.delete_substitution(id)?;
        restore_gate(&mut *tx, &sub)?;
        tx.commit()?;

        self.cache.invalidate_week(IsoWeek::from_date(sub.date));
        self.emit(
            AuditAction::DeleteSubstitution,
            actor,
            format!("substitution {}", id),
            to_json(&sub),
            None,
        );
        Ok(sub)
    }

    // ── Publishing ─────────────────────────────────────────────────────

    /// Make `audience`'s view of `week` visible. Publishing a published week
    /// succeeds without touching the stored record or emitting an event.
    pub fn publish(&self, actor: &Actor, week: IsoWeek, audience: Audience) -> Result<Transition> {
        let transition =
            PublishStateMachine::new(&self.store).publish(week, audience, actor, self.clock.now())?;
        self.audit_transition(AuditAction::Publish, &transition);
        Ok(transition)
    }

    pub fn unpublish(
        &self,
        actor: &Actor,
        week: IsoWeek,
        audience: Audience,
    ) -> Result<Transition> {
        let transition = PublishStateMachine::new(&self.store).unpublish(
            week,
            audience,
            actor,
            self.clock.now(),
        )?;
        self.audit_transition(AuditAction::Unpublish, &transition);
        Ok(transition)
    }

    pub fn publish_status(&self, week: IsoWeek) -> Result<PublishStatus> {
        PublishStateMachine::new(&self.store).status(week)
    }

    // ── Reads ──────────────────────────────────────────────────────────

    /// The resolved week of `target` as a reader with `access` may see it.
    ///
    /// Public readers get an empty, blocked view unless the week is published
    /// for the target's audience.
    pub fn week(&self, access: Access, target: &ScheduleTarget, week: IsoWeek) -> Result<WeekView> {
        let audience = target.audience();
        let visible = PublishStateMachine::new(&self.store).is_visible(access, week, audience)?;
        let slots = if visible {
            self.resolved(target, week)?.as_ref().clone()
        } else {
            debug!(schedule = %target, week = %week, "week not published");
            Vec::new()
        };
        Ok(WeekView {
            target: target.clone(),
            week,
            audience,
            blocked: !visible,
            slots,
        })
    }

    /// What `teacher` is doing at `at`.
    pub fn locate_teacher(
        &self,
        access: Access,
        teacher: &TeacherId,
        at: DateTime<Utc>,
    ) -> Result<Location> {
        let target = ScheduleTarget::Teacher(teacher.clone());
        location::locate(&self.calendar, teacher, at, |week| {
            self.week(access, &target, week)
        })
    }

    /// [`locate_teacher`](Self::locate_teacher) at the clock's current time.
    pub fn locate_teacher_now(&self, access: Access, teacher: &TeacherId) -> Result<Location> {
        self.locate_teacher(access, teacher, self.clock.now())
    }

    /// Dry-run the base timetable gate. Writes nothing.
    pub fn check_entry(&self, proposal: &ProposedEntry) -> Result<ConflictReport> {
        validate_day(proposal.day_of_week)?;
        validate_period_range(proposal.start_period, proposal.end_period)?;
        let mut tx = self.store.begin()?;
        let existing = tx.entries_on_day(proposal.day_of_week)?;
        let upcoming = tx.substitutions_since(self.today())?;
        Ok(check_entry(proposal, &existing, &upcoming))
    }

    /// Dry-run the substitution gate. Writes nothing.
    pub fn check_substitution(&self, draft: &SubstitutionDraft) -> Result<ConflictReport> {
        draft.validate()?;
        let mut tx = self.store.begin()?;
        let entries = tx.entries_on_day(day_of_week(draft.date))?;
        let substitutions = tx.substitutions_on(draft.date)?;
        Ok(check_substitution(
            &ProposedSubstitution::from(draft),
            &entries,
            &substitutions,
        ))
    }

    // ── Helpers ────────────────────────────────────────────────────────

    /// Today in school-local time.
    fn today(&self) -> NaiveDate {
        self.calendar.local_date(self.clock.now())
    }

    fn resolved(&self, target: &ScheduleTarget, week: IsoWeek) -> Result<Arc<Vec<ResolvedSlot>>> {
        if let Some(hit) = self.cache.get(target, week) {
            return Ok(hit);
        }
        let generation = self.cache.generation();
        let source = self.load_week(target, week)?;
        let slots = Arc::new(resolve_week(&self.calendar, target, week, &source));
        self.cache
            .insert_if(generation, target.clone(), week, Arc::clone(&slots));
        Ok(slots)
    }

    fn load_week(&self, target: &ScheduleTarget, week: IsoWeek) -> Result<WeekSource> {
        let entries = self.store.entries_for(target, week)?;
        let substitutions = self.store.substitutions_for(target, week.school_days())?;

        let mut classes: Vec<ClassId> = substitutions.iter().map(|s| s.class_id.clone()).collect();
        classes.sort();
        classes.dedup();
        let overlaid = if classes.is_empty() {
            Vec::new()
        } else {
            self.store.class_entries(&classes)?
        };

        Ok(WeekSource {
            entries,
            substitutions,
            overlaid,
        })
    }

    fn audit_transition(&self, action: AuditAction, transition: &Transition) {
        if !transition.changed {
            return;
        }
        let record = &transition.record;
        self.emit(
            action,
            &record.actor,
            format!("week {} {}", record.week, record.audience),
            transition.previous.as_ref().and_then(to_json),
            to_json(record),
        );
    }

    fn emit(
        &self,
        action: AuditAction,
        actor: &Actor,
        target: String,
        before: Option<Value>,
        after: Option<Value>,
    ) {
        self.audit.record(&AuditEvent {
            action,
            actor: actor.clone(),
            target,
            before,
            after,
            at: self.clock.now(),
        });
    }
}

/// Reject a write whose removal of `removed` brings back a lesson that now
/// double-books a teacher or room. Runs after the mutation, inside `tx`.
fn restore_gate(tx: &mut (dyn StoreTransaction + '_), removed: &SubstitutionEntry) -> Result<()> {
    let entries = tx.entries_on_day(removed.day_of_week())?;
    let substitutions = tx.substitutions_on(removed.date)?;
    let report = check_restored(
        &removed.class_id,
        removed.date,
        [removed.period],
        &entries,
        &substitutions,
    );
    if !report.is_empty() {
        debug!(
            substitution = %removed.id,
            collisions = report.len(),
            "restored lesson would double-book"
        );
        return Err(TimetableError::Conflict(report));
    }
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

fn substitution_subject(class: &ClassId, date: NaiveDate, start: u8, end: u8) -> String {
    format!("class {} on {} periods {}-{}", class, date, start, end)
}
