//! "Where is teacher X right now?"
//!
//! A read-through of the resolver: the instant is converted to school-local
//! (week, day, period) coordinates, the teacher's week is resolved and the
//! slot covering that period is classified. Nothing is stored; the caller
//! supplies the instant (usually from a [`Clock`](crate::clock::Clock)).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::{IsoWeek, SchoolCalendar, SlotCoordinates};
use crate::error::Result;
use crate::model::{ResolvedSlot, SlotKind, TeacherId};
use crate::planner::WeekView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationStatus {
    /// Regular lesson.
    Unterricht,
    Vertretung,
    #[serde(rename = "Raumänderung")]
    Raumaenderung,
    Entfall,
    Sonderevent,
    /// Inside teaching hours with nothing to teach.
    Freistunde,
    /// Weekend, or between/outside every period window.
    OutsideTeachingHours,
    /// The teacher's week is not visible to this reader.
    Unpublished,
}

impl From<SlotKind> for LocationStatus {
    fn from(kind: SlotKind) -> Self {
        match kind {
            SlotKind::Regular => LocationStatus::Unterricht,
            SlotKind::Vertretung => LocationStatus::Vertretung,
            SlotKind::Raumaenderung => LocationStatus::Raumaenderung,
            SlotKind::Entfall => LocationStatus::Entfall,
            SlotKind::Sonderevent => LocationStatus::Sonderevent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub teacher: TeacherId,
    pub at: DateTime<Utc>,
    pub status: LocationStatus,
    pub coordinates: Option<SlotCoordinates>,
    /// The covering slot, when there is one.
    pub slot: Option<ResolvedSlot>,
}

/// Locate `teacher` at `at`.
///
/// `week_of` resolves the teacher's (publish-gated) view of a week; it is only
/// called when the instant falls inside a period window on a school day.
///
/// A teacher whose lesson is covered by someone else is reported as
/// [`Freistunde`](LocationStatus::Freistunde), with the covering slot attached.
///
/// # Errors
/// Propagates whatever `week_of` returns.
pub fn locate<F>(
    calendar: &SchoolCalendar,
    teacher: &TeacherId,
    at: DateTime<Utc>,
    week_of: F,
) -> Result<Location>
where
    F: FnOnce(IsoWeek) -> Result<WeekView>,
{
    let mut location = Location {
        teacher: teacher.clone(),
        at,
        status: LocationStatus::OutsideTeachingHours,
        coordinates: None,
        slot: None,
    };

    let Some(coordinates) = calendar.coordinates_at(at) else {
        return Ok(location);
    };
    location.coordinates = Some(coordinates);

    let view = week_of(coordinates.week)?;
    if view.blocked {
        location.status = LocationStatus::Unpublished;
        return Ok(location);
    }

    match view
        .slots
        .into_iter()
        .find(|slot| slot.covers(coordinates.day_of_week, coordinates.period))
    {
        // A lesson handed to another teacher leaves this one free; the slot
        // stays attached so the caller can see who covers it.
        Some(slot) if slot.teacher.as_ref().is_some_and(|t| t != teacher) => {
            location.status = LocationStatus::Freistunde;
            location.slot = Some(slot);
        }
        Some(slot) => {
            location.status = slot.kind.into();
            location.slot = Some(slot);
        }
        None => location.status = LocationStatus::Freistunde,
    }
    Ok(location)
}
