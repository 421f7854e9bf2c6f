//! Layer dated substitutions onto the recurring base timetable.
//!
//! For one schedule target and ISO week, [`resolve_week`] produces the ordered,
//! non-overlapping list of [`ResolvedSlot`]s that every renderer (dashboard,
//! iCal feed, PDF) consumes.
//!
//! Resolution runs in two passes:
//!
//! 1. Substitutions are indexed by `(date, period)` and walked in period
//!    order. Consecutive periods whose substitutions are identical in kind,
//!    comment, introduced teacher, subject and room (and belong to the same
//!    class) are fused into one *run*. Every period a run consumes is marked.
//! 2. Base entries on unconsumed periods go through
//!    [`merge_blocks`](crate::block::merge_blocks) and become `Regular` slots.
//!
//! A malformed row (unknown period, weekend date, duplicate booking) is
//! logged and dropped; it never prevents the rest of the week from rendering.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::block::{merge_blocks, Block};
use crate::calendar::{IsoWeek, SchoolCalendar};
use crate::model::{
    day_of_week, ClassId, Counterpart, OriginalLesson, Provenance, ResolvedSlot, ScheduleTarget,
    SlotKind, SubstitutionEntry, SubstitutionKind, TeacherId, TimetableEntry, SCHOOL_DAYS,
};

/// Everything the resolver reads for one (target, week).
#[derive(Debug, Clone, Default)]
pub struct WeekSource {
    /// Base entries belonging to the target.
    pub entries: Vec<TimetableEntry>,
    /// Substitutions dated inside the week that may concern the target.
    pub substitutions: Vec<SubstitutionEntry>,
    /// Base entries of the classes named by `substitutions`, used to inherit
    /// fields from the lesson a substitution replaces. May overlap `entries`.
    pub overlaid: Vec<TimetableEntry>,
}

/// Base lessons keyed by (class, day, period).
type LessonIndex<'a> = HashMap<(ClassId, u8, u8), &'a TimetableEntry>;

/// Substitutions fused into one visual unit when all of these match on
/// consecutive periods.
#[derive(Debug, PartialEq, Eq)]
struct RunKey<'a> {
    class: &'a ClassId,
    kind: &'a SubstitutionKind,
    comment: Option<&'a str>,
}

impl<'a> RunKey<'a> {
    fn of(sub: &'a SubstitutionEntry) -> Self {
        Self {
            class: &sub.class_id,
            kind: &sub.kind,
            comment: sub.comment.as_deref(),
        }
    }
}

/// A maximal sequence of identical substitutions on consecutive periods.
#[derive(Debug, Clone)]
pub struct SubstitutionRun<'a> {
    pub date: NaiveDate,
    pub start_period: u8,
    pub end_period: u8,
    /// In period order. Never empty.
    pub members: Vec<&'a SubstitutionEntry>,
}

impl<'a> SubstitutionRun<'a> {
    pub fn head(&self) -> &'a SubstitutionEntry {
        self.members[0]
    }
}

/// Resolve the effective week of `target`.
///
/// The result is sorted by day, then start period, and no two slots on the
/// same day overlap.
pub fn resolve_week(
    calendar: &SchoolCalendar,
    target: &ScheduleTarget,
    week: IsoWeek,
    source: &WeekSource,
) -> Vec<ResolvedSlot> {
    let lessons = index_lessons(source);
    let substitutions = index_substitutions(calendar, target, week, source, &lessons);
    let runs = build_runs(&substitutions);

    let mut consumed: HashSet<(u8, u8)> = HashSet::new();
    let mut slots = Vec::with_capacity(runs.len() + source.entries.len());

    for run in &runs {
        let day = day_of_week(run.date);
        for period in run.start_period..=run.end_period {
            consumed.insert((day, period));
        }
        slots.push(run_slot(target, run, &lessons));
    }

    let regular = remaining_entries(calendar, target, source, &consumed);
    for block in merge_blocks(&regular) {
        match block_slot(target, week, &block) {
            Some(slot) => slots.push(slot),
            None => warn!(day = block.day_of_week, "dropping block on a non-school day"),
        }
    }

    slots.sort_by_key(|s| (s.day_of_week, s.start_period));
    debug!(
        schedule = %target,
        week = %week,
        runs = runs.len(),
        slots = slots.len(),
        "resolved week"
    );
    slots
}

/// Group an already indexed, period-ordered substitution map into runs.
///
/// Exposed for callers that need the runs themselves (e.g. to report how a
/// merged slot was formed).
pub fn build_runs<'a>(
    substitutions: &BTreeMap<(NaiveDate, u8), &'a SubstitutionEntry>,
) -> Vec<SubstitutionRun<'a>> {
    let mut consumed: HashSet<(NaiveDate, u8)> = HashSet::new();
    let mut runs = Vec::new();

    for (&(date, period), &sub) in substitutions {
        if consumed.contains(&(date, period)) {
            continue;
        }
        consumed.insert((date, period));

        let key = RunKey::of(sub);
        let mut run = SubstitutionRun {
            date,
            start_period: period,
            end_period: period,
            members: vec![sub],
        };

        let mut next = period + 1;
        while let Some(&candidate) = substitutions.get(&(date, next)) {
            if consumed.contains(&(date, next)) || RunKey::of(candidate) != key {
                break;
            }
            consumed.insert((date, next));
            run.members.push(candidate);
            run.end_period = next;
            next += 1;
        }

        runs.push(run);
    }

    runs
}

fn index_lessons(source: &WeekSource) -> LessonIndex<'_> {
    let mut lessons: LessonIndex<'_> = HashMap::new();
    for entry in source.entries.iter().chain(source.overlaid.iter()) {
        lessons
            .entry((entry.class_id.clone(), entry.day_of_week, entry.period))
            .and_modify(|existing| {
                if entry.id < existing.id {
                    *existing = entry;
                }
            })
            .or_insert(entry);
    }
    lessons
}

/// Whether a substitution shows up in the target's plan.
///
/// A class sees its own substitutions. A teacher sees the ones that bring
/// them in and the ones that change a lesson they normally teach.
fn concerns(target: &ScheduleTarget, sub: &SubstitutionEntry, lessons: &LessonIndex<'_>) -> bool {
    match target {
        ScheduleTarget::Class(class) => sub.class_id == *class,
        ScheduleTarget::Teacher(teacher) => {
            sub.kind.new_teacher() == Some(teacher)
                || lessons
                    .get(&(sub.class_id.clone(), sub.day_of_week(), sub.period))
                    .is_some_and(|lesson| lesson.teacher_id == *teacher)
        }
    }
}

/// Whether a substitution puts a teacher target to work on its period (as
/// opposed to freeing them). Always true for class targets.
fn occupies(target: &ScheduleTarget, sub: &SubstitutionEntry, lessons: &LessonIndex<'_>) -> bool {
    match target {
        ScheduleTarget::Class(_) => true,
        ScheduleTarget::Teacher(teacher) => match &sub.kind {
            SubstitutionKind::Raumaenderung { .. } => lessons
                .get(&(sub.class_id.clone(), sub.day_of_week(), sub.period))
                .is_some_and(|lesson| lesson.teacher_id == *teacher),
            kind => kind.new_teacher() == Some(teacher),
        },
    }
}

fn index_substitutions<'a>(
    calendar: &SchoolCalendar,
    target: &ScheduleTarget,
    week: IsoWeek,
    source: &'a WeekSource,
    lessons: &LessonIndex<'_>,
) -> BTreeMap<(NaiveDate, u8), &'a SubstitutionEntry> {
    let mut ordered: Vec<&SubstitutionEntry> = source.substitutions.iter().collect();
    ordered.sort_by_key(|s| (s.date, s.period, s.id));

    let mut index: BTreeMap<(NaiveDate, u8), &SubstitutionEntry> = BTreeMap::new();
    for sub in ordered {
        if !week.contains(sub.date) {
            debug!(substitution = %sub.id, date = %sub.date, "substitution outside week");
            continue;
        }
        if !concerns(target, sub, lessons) {
            continue;
        }
        if sub.day_of_week() > SCHOOL_DAYS {
            warn!(
                substitution = %sub.id,
                date = %sub.date,
                "dropping substitution dated on a weekend"
            );
            continue;
        }
        if !calendar.has_period(sub.period) {
            warn!(
                substitution = %sub.id,
                date = %sub.date,
                period = sub.period,
                "dropping substitution: period has no time window"
            );
            continue;
        }
        if let Some(&kept) = index.get(&(sub.date, sub.period)) {
            // A teacher freed by one class's change may be brought in by
            // another's on the same period; the one that occupies them shows.
            if occupies(target, sub, lessons) && !occupies(target, kept, lessons) {
                debug!(
                    substitution = %sub.id,
                    replaces = %kept.id,
                    date = %sub.date,
                    period = sub.period,
                    "substitution occupying the teacher takes the period"
                );
                index.insert((sub.date, sub.period), sub);
                continue;
            }
            warn!(
                substitution = %sub.id,
                kept = %kept.id,
                date = %sub.date,
                period = sub.period,
                "dropping substitution: period already substituted"
            );
            continue;
        }
        index.insert((sub.date, sub.period), sub);
    }
    index
}

/// The base lesson a run replaces: the first period of the run that has one.
fn original_lesson<'a>(
    run: &SubstitutionRun<'_>,
    lessons: &LessonIndex<'a>,
) -> Option<&'a TimetableEntry> {
    let head = run.head();
    let day = day_of_week(run.date);
    (run.start_period..=run.end_period)
        .find_map(|period| lessons.get(&(head.class_id.clone(), day, period)).copied())
}

fn run_slot(
    target: &ScheduleTarget,
    run: &SubstitutionRun<'_>,
    lessons: &LessonIndex<'_>,
) -> ResolvedSlot {
    let head = run.head();
    let original = match head.kind {
        SubstitutionKind::Sonderevent { .. } => None,
        _ => original_lesson(run, lessons),
    };

    let (subject, teacher, room) = match &head.kind {
        SubstitutionKind::Vertretung {
            new_teacher_id,
            new_subject_id,
            new_room_id,
        } => (
            new_subject_id
                .clone()
                .or_else(|| original.map(|o| o.subject_id.clone())),
            Some(new_teacher_id.clone()),
            new_room_id
                .clone()
                .or_else(|| original.map(|o| o.room_id.clone())),
        ),
        SubstitutionKind::Raumaenderung { new_room_id } => (
            original.map(|o| o.subject_id.clone()),
            original.map(|o| o.teacher_id.clone()),
            Some(new_room_id.clone()),
        ),
        // A cancelled lesson occupies neither a teacher nor a room.
        SubstitutionKind::Entfall => (original.map(|o| o.subject_id.clone()), None, None),
        SubstitutionKind::Sonderevent {
            new_teacher_id,
            new_subject_id,
            new_room_id,
        } => (
            new_subject_id.clone(),
            new_teacher_id.clone(),
            new_room_id.clone(),
        ),
    };

    ResolvedSlot {
        date: run.date,
        day_of_week: day_of_week(run.date),
        start_period: run.start_period,
        end_period: run.end_period,
        kind: head.kind.slot_kind(),
        counterpart: counterpart(target, teacher.as_ref(), &head.class_id),
        subject,
        teacher,
        class: Some(head.class_id.clone()),
        room,
        comment: head.comment.clone(),
        original: original.map(|o| OriginalLesson {
            entry_id: o.id,
            subject: o.subject_id.clone(),
            teacher: o.teacher_id.clone(),
            room: o.room_id.clone(),
        }),
        provenance: Provenance::Substitutions(run.members.iter().map(|s| s.id).collect()),
    }
}

fn counterpart(
    target: &ScheduleTarget,
    teacher: Option<&TeacherId>,
    class: &ClassId,
) -> Option<Counterpart> {
    match target {
        ScheduleTarget::Class(_) => teacher.cloned().map(Counterpart::Teacher),
        ScheduleTarget::Teacher(_) => Some(Counterpart::Class(class.clone())),
    }
}

/// Target-owned entries on periods no substitution consumed. A second entry
/// on an already taken period violates the write-time invariant; it is
/// dropped so the output never overlaps.
fn remaining_entries<'a>(
    calendar: &SchoolCalendar,
    target: &ScheduleTarget,
    source: &'a WeekSource,
    consumed: &HashSet<(u8, u8)>,
) -> Vec<&'a TimetableEntry> {
    let mut ordered: Vec<&TimetableEntry> = source
        .entries
        .iter()
        .filter(|entry| target.owns(entry))
        .collect();
    ordered.sort_by_key(|e| (e.day_of_week, e.period, e.id));

    let mut taken: HashSet<(u8, u8)> = HashSet::new();
    let mut remaining = Vec::with_capacity(ordered.len());
    for entry in ordered {
        let key = (entry.day_of_week, entry.period);
        if consumed.contains(&key) {
            continue;
        }
        if !calendar.has_period(entry.period) {
            warn!(
                entry = %entry.id,
                period = entry.period,
                "dropping entry: period has no time window"
            );
            continue;
        }
        if !taken.insert(key) {
            warn!(
                entry = %entry.id,
                day = entry.day_of_week,
                period = entry.period,
                "dropping entry: period already booked for this plan"
            );
            continue;
        }
        remaining.push(entry);
    }
    remaining
}

fn block_slot(target: &ScheduleTarget, week: IsoWeek, block: &Block<'_>) -> Option<ResolvedSlot> {
    let head = block.head();
    let date = week.date_of(block.day_of_week).ok()?;
    let comment = block.entries.iter().find_map(|e| e.comment.clone());

    Some(ResolvedSlot {
        date,
        day_of_week: block.day_of_week,
        start_period: block.start_period,
        end_period: block.end_period,
        kind: SlotKind::Regular,
        subject: Some(head.subject_id.clone()),
        teacher: Some(head.teacher_id.clone()),
        class: Some(head.class_id.clone()),
        counterpart: counterpart(target, Some(&head.teacher_id), &head.class_id),
        room: Some(head.room_id.clone()),
        comment,
        original: None,
        provenance: Provenance::Entries(block.entries.iter().map(|e| e.id).collect()),
    })
}
