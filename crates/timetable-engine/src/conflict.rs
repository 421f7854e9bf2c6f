//! Detect double-booked classes, teachers and rooms before a write commits.
//!
//! Checks are period-by-period: a proposal spanning periods 3-5 collides if
//! any one of those periods collides, and every colliding
//! (resource, day, period) tuple is reported so the caller can fix the whole
//! request at once. Nothing is resolved automatically.
//!
//! Two gates exist:
//!
//! - [`check_entry`] for the recurring base timetable, against other base
//!   entries on the same weekday and against the teachers and rooms that
//!   upcoming substitutions bring in on that weekday.
//! - [`check_substitution`] for dated substitutions, against the *effective*
//!   occupancy of that date: base entries with every substitution applied.
//!   A cancelled lesson (Entfall) frees its class, teacher and room for the
//!   date; a cover (Vertretung) frees the original teacher; a room change
//!   frees the original room; a special event frees the whole lesson it
//!   replaces.
//!
//! Removing a substitution brings the overlaid base lesson back;
//! [`check_restored`] checks that lesson against the same effective
//! occupancy.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{
    day_of_week, ClassId, EntryDraft, EntryId, Exclusion, RoomId, SubstitutionDraft,
    SubstitutionEntry, SubstitutionId, SubstitutionKind, TeacherId, TimetableEntry,
};

/// The kind of resource a collision is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Class,
    Teacher,
    Room,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Class => "class",
            ResourceKind::Teacher => "teacher",
            ResourceKind::Room => "room",
        })
    }
}

/// The stored row already holding a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "source", content = "id", rename_all = "lowercase")]
pub enum Booking {
    Entry(EntryId),
    Substitution(SubstitutionId),
}

impl fmt::Display for Booking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Booking::Entry(id) => write!(f, "entry {}", id),
            Booking::Substitution(id) => write!(f, "substitution {}", id),
        }
    }
}

/// One resource held twice on one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collision {
    pub resource: ResourceKind,
    pub resource_id: String,
    pub day_of_week: u8,
    /// Set for substitution checks, which are about one calendar date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub period: u8,
    pub existing: Booking,
}

/// Every collision a proposed write would cause. Empty means the write may
/// commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub collisions: Vec<Collision>,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.collisions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.collisions.len()
    }

    /// Collisions on one kind of resource.
    pub fn on(&self, resource: ResourceKind) -> impl Iterator<Item = &Collision> {
        self.collisions.iter().filter(move |c| c.resource == resource)
    }

    fn push(
        &mut self,
        resource: ResourceKind,
        resource_id: &str,
        day_of_week: u8,
        date: Option<NaiveDate>,
        period: u8,
        existing: Booking,
    ) {
        self.collisions.push(Collision {
            resource,
            resource_id: resource_id.to_string(),
            day_of_week,
            date,
            period,
            existing,
        });
    }

    fn finish(mut self) -> Self {
        self.collisions.sort_by(|a, b| {
            (a.period, a.resource, &a.resource_id, a.existing).cmp(&(
                b.period,
                b.resource,
                &b.resource_id,
                b.existing,
            ))
        });
        self.collisions.dedup();
        self
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.collisions.is_empty() {
            return f.write_str("no collisions");
        }
        for (i, c) in self.collisions.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            match c.date {
                Some(date) => write!(
                    f,
                    "{} {} already booked on {} period {} ({})",
                    c.resource, c.resource_id, date, c.period, c.existing
                )?,
                None => write!(
                    f,
                    "{} {} already booked on day {} period {} ({})",
                    c.resource, c.resource_id, c.day_of_week, c.period, c.existing
                )?,
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Base timetable gate
// ---------------------------------------------------------------------------

/// A base-timetable booking to be checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedEntry {
    pub class_id: ClassId,
    pub teacher_id: TeacherId,
    pub room_id: RoomId,
    pub day_of_week: u8,
    pub start_period: u8,
    pub end_period: u8,
    /// The entry or block being edited in place; it never collides with its
    /// own replacement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Exclusion>,
}

impl From<&EntryDraft> for ProposedEntry {
    fn from(draft: &EntryDraft) -> Self {
        Self {
            class_id: draft.class_id.clone(),
            teacher_id: draft.teacher_id.clone(),
            room_id: draft.room_id.clone(),
            day_of_week: draft.day_of_week,
            start_period: draft.start_period,
            end_period: draft.end_period,
            exclude: draft.replaces.clone(),
        }
    }
}

/// Check a proposed base entry against existing entries and dated
/// substitutions.
///
/// `existing` may contain entries of any day; only the proposal's weekday is
/// considered. `substitutions` are the ones still ahead; a substitution on
/// the proposal's weekday and periods collides when it brings in the
/// proposed teacher or room. The proposal's own class is skipped there,
/// since its substitution overlays the new lesson on that date.
pub fn check_entry(
    proposal: &ProposedEntry,
    existing: &[TimetableEntry],
    substitutions: &[SubstitutionEntry],
) -> ConflictReport {
    let mut report = ConflictReport::default();
    let day = proposal.day_of_week;

    for entry in existing {
        if entry.day_of_week != day
            || entry.period < proposal.start_period
            || entry.period > proposal.end_period
        {
            continue;
        }
        if proposal
            .exclude
            .as_ref()
            .is_some_and(|exclusion| exclusion.excludes(entry))
        {
            continue;
        }

        let booking = Booking::Entry(entry.id);
        if entry.class_id == proposal.class_id {
            report.push(
                ResourceKind::Class,
                entry.class_id.as_str(),
                day,
                None,
                entry.period,
                booking,
            );
        }
        if entry.teacher_id == proposal.teacher_id {
            report.push(
                ResourceKind::Teacher,
                entry.teacher_id.as_str(),
                day,
                None,
                entry.period,
                booking,
            );
        }
        if entry.room_id == proposal.room_id {
            report.push(
                ResourceKind::Room,
                entry.room_id.as_str(),
                day,
                None,
                entry.period,
                booking,
            );
        }
    }

    for sub in substitutions {
        if sub.day_of_week() != day
            || sub.period < proposal.start_period
            || sub.period > proposal.end_period
            || sub.class_id == proposal.class_id
        {
            continue;
        }
        let booking = Booking::Substitution(sub.id);
        if sub.kind.new_teacher() == Some(&proposal.teacher_id) {
            report.push(
                ResourceKind::Teacher,
                proposal.teacher_id.as_str(),
                day,
                Some(sub.date),
                sub.period,
                booking,
            );
        }
        if sub.kind.new_room() == Some(&proposal.room_id) {
            report.push(
                ResourceKind::Room,
                proposal.room_id.as_str(),
                day,
                Some(sub.date),
                sub.period,
                booking,
            );
        }
    }

    report.finish()
}

// ---------------------------------------------------------------------------
// Substitution gate
// ---------------------------------------------------------------------------

/// A dated substitution to be checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedSubstitution {
    pub class_id: ClassId,
    pub date: NaiveDate,
    pub start_period: u8,
    pub end_period: u8,
    pub kind: SubstitutionKind,
    /// The substitution being edited in place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<SubstitutionId>,
}

impl From<&SubstitutionDraft> for ProposedSubstitution {
    fn from(draft: &SubstitutionDraft) -> Self {
        Self {
            class_id: draft.class_id.clone(),
            date: draft.date,
            start_period: draft.start_period,
            end_period: draft.end_period,
            kind: draft.kind.clone(),
            exclude: draft.replaces,
        }
    }
}

/// Who effectively holds what on one dated period.
#[derive(Debug, Clone)]
struct Occupant<'a> {
    class: &'a ClassId,
    teacher: Option<&'a TeacherId>,
    room: Option<&'a RoomId>,
    booking: Booking,
}

/// What a substitution occupies given the base lesson it overlays.
fn substituted<'a>(
    kind: &'a SubstitutionKind,
    lesson: Option<&'a TimetableEntry>,
) -> (Option<&'a TeacherId>, Option<&'a RoomId>) {
    match kind {
        SubstitutionKind::Vertretung {
            new_teacher_id,
            new_room_id,
            ..
        } => (
            Some(new_teacher_id),
            new_room_id.as_ref().or(lesson.map(|l| &l.room_id)),
        ),
        SubstitutionKind::Raumaenderung { new_room_id } => {
            (lesson.map(|l| &l.teacher_id), Some(new_room_id))
        }
        SubstitutionKind::Entfall => (None, None),
        SubstitutionKind::Sonderevent {
            new_teacher_id,
            new_room_id,
            ..
        } => (new_teacher_id.as_ref(), new_room_id.as_ref()),
    }
}

/// Effective occupancy of one dated period: base entries with substitutions
/// applied. A class with a substitution on the period is represented by the
/// substitution only.
fn occupancy<'a>(
    day: u8,
    date: NaiveDate,
    period: u8,
    entries: &'a [TimetableEntry],
    substitutions: &'a [SubstitutionEntry],
    exclude: Option<SubstitutionId>,
) -> Vec<Occupant<'a>> {
    let lessons: BTreeMap<&ClassId, &TimetableEntry> = entries
        .iter()
        .filter(|e| e.day_of_week == day && e.period == period)
        .map(|e| (&e.class_id, e))
        .collect();

    let subs: Vec<&SubstitutionEntry> = substitutions
        .iter()
        .filter(|s| s.date == date && s.period == period && Some(s.id) != exclude)
        .collect();

    let mut occupants = Vec::new();
    for entry in entries
        .iter()
        .filter(|e| e.day_of_week == day && e.period == period)
    {
        if subs.iter().any(|s| s.class_id == entry.class_id) {
            continue;
        }
        occupants.push(Occupant {
            class: &entry.class_id,
            teacher: Some(&entry.teacher_id),
            room: Some(&entry.room_id),
            booking: Booking::Entry(entry.id),
        });
    }
    for sub in subs {
        let lesson = lessons.get(&sub.class_id).copied();
        let (teacher, room) = substituted(&sub.kind, lesson);
        occupants.push(Occupant {
            class: &sub.class_id,
            teacher,
            room,
            booking: Booking::Substitution(sub.id),
        });
    }
    occupants
}

/// Check a proposed substitution against the effective occupancy of its date.
///
/// `entries` are the base entries (any class) and `substitutions` the stored
/// substitutions (any class); rows for other days are ignored. The proposal
/// replaces its own class's base lesson, so that lesson never collides.
pub fn check_substitution(
    proposal: &ProposedSubstitution,
    entries: &[TimetableEntry],
    substitutions: &[SubstitutionEntry],
) -> ConflictReport {
    let mut report = ConflictReport::default();
    let date = proposal.date;
    let day = day_of_week(date);

    for period in proposal.start_period..=proposal.end_period {
        let own_lesson = entries.iter().find(|e| {
            e.class_id == proposal.class_id && e.day_of_week == day && e.period == period
        });
        let lesson = match proposal.kind {
            SubstitutionKind::Sonderevent { .. } => None,
            _ => own_lesson,
        };
        let (teacher, room) = substituted(&proposal.kind, lesson);

        for occupant in occupancy(day, date, period, entries, substitutions, proposal.exclude) {
            let own_class = *occupant.class == proposal.class_id;
            if own_class && matches!(occupant.booking, Booking::Entry(_)) {
                continue;
            }
            if own_class {
                report.push(
                    ResourceKind::Class,
                    proposal.class_id.as_str(),
                    day,
                    Some(date),
                    period,
                    occupant.booking,
                );
            }
            if let (Some(wanted), Some(held)) = (teacher, occupant.teacher) {
                if wanted == held {
                    report.push(
                        ResourceKind::Teacher,
                        wanted.as_str(),
                        day,
                        Some(date),
                        period,
                        occupant.booking,
                    );
                }
            }
            if let (Some(wanted), Some(held)) = (room, occupant.room) {
                if wanted == held {
                    report.push(
                        ResourceKind::Room,
                        wanted.as_str(),
                        day,
                        Some(date),
                        period,
                        occupant.booking,
                    );
                }
            }
        }
    }

    report.finish()
}

/// Check the base lessons that come back when substitutions of `class` on
/// `date` are removed.
///
/// `entries` and `substitutions` describe the date after the removal. A
/// period still overlaid by another substitution of the class, or without a
/// base lesson, is fine. Otherwise the lesson's teacher and room must not be
/// effectively held by another class.
pub fn check_restored(
    class: &ClassId,
    date: NaiveDate,
    periods: impl IntoIterator<Item = u8>,
    entries: &[TimetableEntry],
    substitutions: &[SubstitutionEntry],
) -> ConflictReport {
    let mut report = ConflictReport::default();
    let day = day_of_week(date);

    for period in periods {
        let overlaid = substitutions
            .iter()
            .any(|s| s.class_id == *class && s.date == date && s.period == period);
        if overlaid {
            continue;
        }
        let Some(lesson) = entries
            .iter()
            .find(|e| e.class_id == *class && e.day_of_week == day && e.period == period)
        else {
            continue;
        };

        for occupant in occupancy(day, date, period, entries, substitutions, None) {
            if occupant.class == class {
                continue;
            }
            if occupant.teacher == Some(&lesson.teacher_id) {
                report.push(
                    ResourceKind::Teacher,
                    lesson.teacher_id.as_str(),
                    day,
                    Some(date),
                    period,
                    occupant.booking,
                );
            }
            if occupant.room == Some(&lesson.room_id) {
                report.push(
                    ResourceKind::Room,
                    lesson.room_id.as_str(),
                    day,
                    Some(date),
                    period,
                    occupant.booking,
                );
            }
        }
    }

    report.finish()
}
