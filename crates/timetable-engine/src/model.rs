//! Core records: base timetable entries, dated substitutions and resolved slots.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TimetableError};

/// First teaching period of a day.
pub const FIRST_PERIOD: u8 = 1;
/// Last teaching period of a day.
pub const LAST_PERIOD: u8 = 10;
/// Monday..=Friday, numbered from 1.
pub const SCHOOL_DAYS: u8 = 5;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// School class, e.g. `7a`.
    ClassId
);
string_id!(
    /// Teacher short code, e.g. `MUE`.
    TeacherId
);
string_id!(SubjectId);
string_id!(RoomId);
string_id!(
    /// Shared by every period row of one multi-period session.
    BlockId
);

impl BlockId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubstitutionId(pub i64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SubstitutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The already-authorized person performing a write. Recorded in audit events
/// and publish records; the engine never checks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(pub String);

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read privilege of the caller, decided outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    /// Planners and admins: always see the live schedule.
    Privileged,
    /// Students and teachers viewing their own plan: gated by publish state.
    Public,
}

/// One of the two independently publishable projections of a week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Student,
    Teacher,
}

impl Audience {
    pub const ALL: [Audience; 2] = [Audience::Student, Audience::Teacher];

    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Student => "student",
            Audience::Teacher => "teacher",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Audience {
    type Err = TimetableError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "student" => Ok(Audience::Student),
            "teacher" => Ok(Audience::Teacher),
            other => Err(TimetableError::Validation(format!(
                "unknown audience '{}', expected student or teacher",
                other
            ))),
        }
    }
}

/// Whose week is being resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum ScheduleTarget {
    Class(ClassId),
    Teacher(TeacherId),
}

impl ScheduleTarget {
    /// Class plans are published to students, teacher plans to teachers.
    pub fn audience(&self) -> Audience {
        match self {
            ScheduleTarget::Class(_) => Audience::Student,
            ScheduleTarget::Teacher(_) => Audience::Teacher,
        }
    }

    /// Whether a base entry belongs to this target's plan.
    pub fn owns(&self, entry: &TimetableEntry) -> bool {
        match self {
            ScheduleTarget::Class(class) => entry.class_id == *class,
            ScheduleTarget::Teacher(teacher) => entry.teacher_id == *teacher,
        }
    }
}

impl fmt::Display for ScheduleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleTarget::Class(id) => write!(f, "class {}", id),
            ScheduleTarget::Teacher(id) => write!(f, "teacher {}", id),
        }
    }
}

/// Day of week (1 = Monday) for a calendar date.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().number_from_monday() as u8
}

pub(crate) fn validate_day(day: u8) -> Result<()> {
    if (1..=SCHOOL_DAYS).contains(&day) {
        Ok(())
    } else {
        Err(TimetableError::Validation(format!(
            "day_of_week {} outside 1..={}",
            day, SCHOOL_DAYS
        )))
    }
}

pub(crate) fn validate_period(period: u8) -> Result<()> {
    if (FIRST_PERIOD..=LAST_PERIOD).contains(&period) {
        Ok(())
    } else {
        Err(TimetableError::Validation(format!(
            "period {} outside {}..={}",
            period, FIRST_PERIOD, LAST_PERIOD
        )))
    }
}

pub(crate) fn validate_period_range(start: u8, end: u8) -> Result<()> {
    validate_period(start)?;
    validate_period(end)?;
    if start > end {
        return Err(TimetableError::Validation(format!(
            "period range {}-{} is inverted",
            start, end
        )));
    }
    Ok(())
}

fn validate_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TimetableError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Base timetable
// ---------------------------------------------------------------------------

/// A base-timetable row before it has been assigned an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub class_id: ClassId,
    pub teacher_id: TeacherId,
    pub subject_id: SubjectId,
    pub room_id: RoomId,
    pub day_of_week: u8,
    pub period: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<BlockId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl NewEntry {
    pub fn with_id(self, id: EntryId) -> TimetableEntry {
        TimetableEntry {
            id,
            class_id: self.class_id,
            teacher_id: self.teacher_id,
            subject_id: self.subject_id,
            room_id: self.room_id,
            day_of_week: self.day_of_week,
            period: self.period,
            block_id: self.block_id,
            comment: self.comment,
        }
    }
}

/// One period of the recurring weekly timetable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimetableEntry {
    pub id: EntryId,
    pub class_id: ClassId,
    pub teacher_id: TeacherId,
    pub subject_id: SubjectId,
    pub room_id: RoomId,
    pub day_of_week: u8,
    pub period: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<BlockId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

// ---------------------------------------------------------------------------
// Substitutions
// ---------------------------------------------------------------------------

/// What a substitution does to the lesson it overlays. Each variant carries
/// exactly the fields its kind requires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SubstitutionKind {
    /// Another teacher covers the lesson.
    Vertretung {
        new_teacher_id: TeacherId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_subject_id: Option<SubjectId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_room_id: Option<RoomId>,
    },
    /// The lesson takes place in another room.
    #[serde(rename = "Raumänderung")]
    Raumaenderung { new_room_id: RoomId },
    /// The lesson is cancelled.
    Entfall,
    /// A special event replacing whatever the class would normally have.
    Sonderevent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_teacher_id: Option<TeacherId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_subject_id: Option<SubjectId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_room_id: Option<RoomId>,
    },
}

impl SubstitutionKind {
    /// The stored type tag.
    pub fn label(&self) -> &'static str {
        match self {
            SubstitutionKind::Vertretung { .. } => "Vertretung",
            SubstitutionKind::Raumaenderung { .. } => "Raumänderung",
            SubstitutionKind::Entfall => "Entfall",
            SubstitutionKind::Sonderevent { .. } => "Sonderevent",
        }
    }

    pub fn slot_kind(&self) -> SlotKind {
        match self {
            SubstitutionKind::Vertretung { .. } => SlotKind::Vertretung,
            SubstitutionKind::Raumaenderung { .. } => SlotKind::Raumaenderung,
            SubstitutionKind::Entfall => SlotKind::Entfall,
            SubstitutionKind::Sonderevent { .. } => SlotKind::Sonderevent,
        }
    }

    pub fn new_teacher(&self) -> Option<&TeacherId> {
        match self {
            SubstitutionKind::Vertretung { new_teacher_id, .. } => Some(new_teacher_id),
            SubstitutionKind::Sonderevent { new_teacher_id, .. } => new_teacher_id.as_ref(),
            _ => None,
        }
    }

    pub fn new_subject(&self) -> Option<&SubjectId> {
        match self {
            SubstitutionKind::Vertretung { new_subject_id, .. }
            | SubstitutionKind::Sonderevent { new_subject_id, .. } => new_subject_id.as_ref(),
            _ => None,
        }
    }

    pub fn new_room(&self) -> Option<&RoomId> {
        match self {
            SubstitutionKind::Vertretung { new_room_id, .. }
            | SubstitutionKind::Sonderevent { new_room_id, .. } => new_room_id.as_ref(),
            SubstitutionKind::Raumaenderung { new_room_id } => Some(new_room_id),
            SubstitutionKind::Entfall => None,
        }
    }

    /// Rebuild a kind from its flat stored form (type tag plus loose columns).
    ///
    /// # Errors
    /// Returns `TimetableError::Validation` for an unknown tag or when a field
    /// the kind requires is missing.
    pub fn from_parts(
        tag: &str,
        new_teacher_id: Option<TeacherId>,
        new_subject_id: Option<SubjectId>,
        new_room_id: Option<RoomId>,
    ) -> Result<Self> {
        match tag {
            "Vertretung" => {
                let new_teacher_id = new_teacher_id.ok_or_else(|| {
                    TimetableError::Validation("Vertretung requires new_teacher_id".to_string())
                })?;
                Ok(SubstitutionKind::Vertretung {
                    new_teacher_id,
                    new_subject_id,
                    new_room_id,
                })
            }
            "Raumänderung" | "Raumaenderung" => {
                let new_room_id = new_room_id.ok_or_else(|| {
                    TimetableError::Validation("Raumänderung requires new_room_id".to_string())
                })?;
                Ok(SubstitutionKind::Raumaenderung { new_room_id })
            }
            "Entfall" => Ok(SubstitutionKind::Entfall),
            "Sonderevent" => Ok(SubstitutionKind::Sonderevent {
                new_teacher_id,
                new_subject_id,
                new_room_id,
            }),
            other => Err(TimetableError::Validation(format!(
                "unknown substitution type '{}'",
                other
            ))),
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(teacher) = self.new_teacher() {
            validate_id("new_teacher_id", teacher.as_str())?;
        }
        if let Some(subject) = self.new_subject() {
            validate_id("new_subject_id", subject.as_str())?;
        }
        if let Some(room) = self.new_room() {
            validate_id("new_room_id", room.as_str())?;
        }
        Ok(())
    }
}

/// A substitution row before it has been assigned an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSubstitution {
    pub date: NaiveDate,
    pub period: u8,
    pub class_id: ClassId,
    #[serde(flatten)]
    pub kind: SubstitutionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl NewSubstitution {
    pub fn with_id(self, id: SubstitutionId) -> SubstitutionEntry {
        SubstitutionEntry {
            id,
            date: self.date,
            period: self.period,
            class_id: self.class_id,
            kind: self.kind,
            comment: self.comment,
        }
    }
}

/// An ad-hoc change to one period of one class on one calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstitutionEntry {
    pub id: SubstitutionId,
    pub date: NaiveDate,
    pub period: u8,
    pub class_id: ClassId,
    #[serde(flatten)]
    pub kind: SubstitutionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl SubstitutionEntry {
    pub fn day_of_week(&self) -> u8 {
        day_of_week(self.date)
    }
}

// ---------------------------------------------------------------------------
// Write requests
// ---------------------------------------------------------------------------

/// What an in-place edit replaces. Excluded rows are ignored by the conflict
/// check and deleted in the same transaction as the insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Exclusion {
    Entry(EntryId),
    Block(BlockId),
}

impl Exclusion {
    pub fn excludes(&self, entry: &TimetableEntry) -> bool {
        match self {
            Exclusion::Entry(id) => entry.id == *id,
            Exclusion::Block(block) => entry.block_id.as_ref() == Some(block),
        }
    }
}

/// A planner's request to book one class with one teacher in one room for a
/// contiguous range of periods on one weekday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDraft {
    pub class_id: ClassId,
    pub teacher_id: TeacherId,
    pub subject_id: SubjectId,
    pub room_id: RoomId,
    pub day_of_week: u8,
    pub start_period: u8,
    pub end_period: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<Exclusion>,
}

impl EntryDraft {
    pub fn validate(&self) -> Result<()> {
        validate_id("class_id", self.class_id.as_str())?;
        validate_id("teacher_id", self.teacher_id.as_str())?;
        validate_id("subject_id", self.subject_id.as_str())?;
        validate_id("room_id", self.room_id.as_str())?;
        validate_day(self.day_of_week)?;
        validate_period_range(self.start_period, self.end_period)
    }

    /// One row per period; a multi-period draft shares `block_id`.
    pub fn rows(&self, block_id: Option<BlockId>) -> Vec<NewEntry> {
        (self.start_period..=self.end_period)
            .map(|period| NewEntry {
                class_id: self.class_id.clone(),
                teacher_id: self.teacher_id.clone(),
                subject_id: self.subject_id.clone(),
                room_id: self.room_id.clone(),
                day_of_week: self.day_of_week,
                period,
                block_id: block_id.clone(),
                comment: self.comment.clone(),
            })
            .collect()
    }
}

/// A planner's request to apply one substitution to a contiguous range of
/// periods of one class on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstitutionDraft {
    pub date: NaiveDate,
    pub start_period: u8,
    pub end_period: u8,
    pub class_id: ClassId,
    #[serde(flatten)]
    pub kind: SubstitutionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<SubstitutionId>,
}

impl SubstitutionDraft {
    pub fn validate(&self) -> Result<()> {
        validate_id("class_id", self.class_id.as_str())?;
        validate_day(day_of_week(self.date)).map_err(|_| {
            TimetableError::Validation(format!("{} is not a school day", self.date))
        })?;
        validate_period_range(self.start_period, self.end_period)?;
        self.kind.validate()
    }

    pub fn rows(&self) -> Vec<NewSubstitution> {
        (self.start_period..=self.end_period)
            .map(|period| NewSubstitution {
                date: self.date,
                period,
                class_id: self.class_id.clone(),
                kind: self.kind.clone(),
                comment: self.comment.clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Resolved output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotKind {
    Regular,
    Vertretung,
    #[serde(rename = "Raumänderung")]
    Raumaenderung,
    Entfall,
    Sonderevent,
}

/// The "other side" of a lesson from the viewer's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Counterpart {
    Teacher(TeacherId),
    Class(ClassId),
}

/// The base lesson a substitution run replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalLesson {
    pub entry_id: EntryId,
    pub subject: SubjectId,
    pub teacher: TeacherId,
    pub room: RoomId,
}

/// Which stored rows produced a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "ids", rename_all = "lowercase")]
pub enum Provenance {
    Entries(Vec<EntryId>),
    Substitutions(Vec<SubstitutionId>),
}

/// What occupies one day/period range of a resolved week.
///
/// `None` fields are unknown or deliberately cleared (an Entfall occupies no
/// room and no teacher); renderers decide how to show them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSlot {
    pub date: NaiveDate,
    pub day_of_week: u8,
    pub start_period: u8,
    pub end_period: u8,
    pub kind: SlotKind,
    pub subject: Option<SubjectId>,
    pub teacher: Option<TeacherId>,
    pub class: Option<ClassId>,
    pub counterpart: Option<Counterpart>,
    pub room: Option<RoomId>,
    pub comment: Option<String>,
    pub original: Option<OriginalLesson>,
    pub provenance: Provenance,
}

impl ResolvedSlot {
    pub fn covers(&self, day_of_week: u8, period: u8) -> bool {
        self.day_of_week == day_of_week && (self.start_period..=self.end_period).contains(&period)
    }

    pub fn overlaps(&self, other: &ResolvedSlot) -> bool {
        self.day_of_week == other.day_of_week
            && self.start_period <= other.end_period
            && other.start_period <= self.end_period
    }

    pub fn period_count(&self) -> u8 {
        self.end_period - self.start_period + 1
    }
}
