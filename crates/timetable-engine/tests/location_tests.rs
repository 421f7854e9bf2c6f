//! Tests for the teacher location lookup.

use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use timetable_engine::audit::MemoryAuditSink;
use timetable_engine::calendar::{IsoWeek, SchoolCalendar};
use timetable_engine::clock::FixedClock;
use timetable_engine::location::LocationStatus;
use timetable_engine::model::{
    Access, Actor, Audience, ClassId, EntryDraft, RoomId, SubjectId, SubstitutionDraft,
    SubstitutionKind, TeacherId,
};
use timetable_engine::planner::Planner;
use timetable_engine::store::MemoryStore;

/// Monday 2026-03-02, 10:00 in Berlin (UTC+1): inside period 3.
fn monday_period_three() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

fn planner() -> Planner<MemoryStore, Arc<MemoryAuditSink>, FixedClock> {
    let planner = Planner::new(MemoryStore::new(), SchoolCalendar::default())
        .with_audit(Arc::new(MemoryAuditSink::new()))
        .with_clock(FixedClock(monday_period_three()));
    planner
        .save_entry(
            &Actor::new("admin"),
            EntryDraft {
                class_id: ClassId::new("7a"),
                teacher_id: TeacherId::new("T1"),
                subject_id: SubjectId::new("MAT"),
                room_id: RoomId::new("R1"),
                day_of_week: 1,
                start_period: 3,
                end_period: 4,
                comment: None,
                replaces: None,
            },
        )
        .unwrap();
    planner
}

fn t1() -> TeacherId {
    TeacherId::new("T1")
}

#[test]
fn teacher_in_regular_lesson() {
    let planner = planner();

    let location = planner.locate_teacher_now(Access::Privileged, &t1()).unwrap();

    assert_eq!(location.status, LocationStatus::Unterricht);
    let coordinates = location.coordinates.unwrap();
    assert_eq!(coordinates.week, IsoWeek::new(2026, 10).unwrap());
    assert_eq!((coordinates.day_of_week, coordinates.period), (1, 3));
    assert_eq!(location.slot.unwrap().room, Some(RoomId::new("R1")));
}

#[test]
fn free_period_inside_teaching_hours() {
    let planner = planner();
    // 08:10 local: period 1.
    let at = Utc.with_ymd_and_hms(2026, 3, 2, 7, 10, 0).unwrap();

    let location = planner.locate_teacher(Access::Privileged, &t1(), at).unwrap();

    assert_eq!(location.status, LocationStatus::Freistunde);
    assert!(location.slot.is_none());
}

#[test]
fn break_between_periods_is_outside_teaching_hours() {
    let planner = planner();
    // 10:42 local: between period 3 (ends 10:40) and period 4 (starts 10:45).
    let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 42, 0).unwrap();

    let location = planner.locate_teacher(Access::Privileged, &t1(), at).unwrap();

    assert_eq!(location.status, LocationStatus::OutsideTeachingHours);
    assert!(location.coordinates.is_none());
}

#[test]
fn weekend_is_outside_teaching_hours() {
    let planner = planner();
    let saturday = Utc.with_ymd_and_hms(2026, 3, 7, 9, 0, 0).unwrap();

    let location = planner.locate_teacher(Access::Privileged, &t1(), saturday).unwrap();

    assert_eq!(location.status, LocationStatus::OutsideTeachingHours);
}

#[test]
fn cancelled_lesson_is_reported_as_entfall() {
    let planner = planner();
    planner
        .save_substitution(
            &Actor::new("admin"),
            SubstitutionDraft {
                date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                start_period: 3,
                end_period: 3,
                class_id: ClassId::new("7a"),
                kind: SubstitutionKind::Entfall,
                comment: None,
                replaces: None,
            },
        )
        .unwrap();

    let location = planner.locate_teacher_now(Access::Privileged, &t1()).unwrap();

    assert_eq!(location.status, LocationStatus::Entfall);
}

#[test]
fn covered_teacher_is_free_and_cover_is_in_class() {
    let planner = planner();
    planner
        .save_substitution(
            &Actor::new("admin"),
            SubstitutionDraft {
                date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                start_period: 3,
                end_period: 3,
                class_id: ClassId::new("7a"),
                kind: SubstitutionKind::Vertretung {
                    new_teacher_id: TeacherId::new("T2"),
                    new_subject_id: None,
                    new_room_id: None,
                },
                comment: None,
                replaces: None,
            },
        )
        .unwrap();

    let away = planner.locate_teacher_now(Access::Privileged, &t1()).unwrap();
    assert_eq!(away.status, LocationStatus::Freistunde);
    assert_eq!(away.slot.unwrap().teacher, Some(TeacherId::new("T2")));

    let cover = planner
        .locate_teacher_now(Access::Privileged, &TeacherId::new("T2"))
        .unwrap();
    assert_eq!(cover.status, LocationStatus::Vertretung);
    assert_eq!(cover.slot.unwrap().class, Some(ClassId::new("7a")));
}

#[test]
fn public_reader_needs_published_teacher_week() {
    let planner = planner();

    let hidden = planner.locate_teacher_now(Access::Public, &t1()).unwrap();
    assert_eq!(hidden.status, LocationStatus::Unpublished);
    assert!(hidden.slot.is_none());

    planner
        .publish(
            &Actor::new("admin"),
            IsoWeek::new(2026, 10).unwrap(),
            Audience::Teacher,
        )
        .unwrap();
    let visible = planner.locate_teacher_now(Access::Public, &t1()).unwrap();
    assert_eq!(visible.status, LocationStatus::Unterricht);
}

#[test]
fn summer_time_shifts_utc_offset() {
    let planner = planner();
    // Monday 2026-06-01, 10:00 in Berlin is 08:00 UTC (UTC+2).
    let at = Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap();

    let location = planner.locate_teacher(Access::Privileged, &t1(), at).unwrap();

    assert_eq!(location.status, LocationStatus::Unterricht);
    assert_eq!(location.coordinates.unwrap().period, 3);
}
