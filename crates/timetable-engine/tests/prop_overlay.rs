//! Property-based tests for week resolution using proptest.
//!
//! These check invariants that must hold for *any* mix of base entries and
//! substitutions, including defective data the write path would have refused.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use timetable_engine::calendar::{IsoWeek, SchoolCalendar};
use timetable_engine::model::{
    BlockId, ClassId, EntryId, Provenance, RoomId, ScheduleTarget, SubjectId, SubstitutionEntry,
    SubstitutionId, SubstitutionKind, TeacherId, TimetableEntry,
};
use timetable_engine::overlay::{resolve_week, WeekSource};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

const CLASSES: [&str; 2] = ["7a", "8b"];
const TEACHERS: [&str; 3] = ["T1", "T2", "T3"];
const ROOMS: [&str; 2] = ["R1", "R2"];

fn week() -> IsoWeek {
    IsoWeek::new(2026, 10).unwrap()
}

fn arb_entry() -> impl Strategy<Value = (usize, usize, usize, u8, u8, Option<u8>)> {
    (0..CLASSES.len(), 0..TEACHERS.len(), 0..ROOMS.len(), 1u8..=5, 1u8..=10, proptest::option::of(0u8..3))
}

fn arb_kind() -> impl Strategy<Value = SubstitutionKind> {
    prop_oneof![
        (0..TEACHERS.len()).prop_map(|t| SubstitutionKind::Vertretung {
            new_teacher_id: TeacherId::new(TEACHERS[t]),
            new_subject_id: None,
            new_room_id: None,
        }),
        (0..ROOMS.len()).prop_map(|r| SubstitutionKind::Raumaenderung {
            new_room_id: RoomId::new(ROOMS[r]),
        }),
        Just(SubstitutionKind::Entfall),
        Just(SubstitutionKind::Sonderevent {
            new_teacher_id: None,
            new_subject_id: Some(SubjectId::new("Ausflug")),
            new_room_id: None,
        }),
    ]
}

/// Day offsets 0..7 include the weekend on purpose.
fn arb_substitution() -> impl Strategy<Value = (usize, i64, u8, SubstitutionKind, bool)> {
    (0..CLASSES.len(), 0i64..7, 1u8..=10, arb_kind(), any::<bool>())
}

fn build_source(
    entries: Vec<(usize, usize, usize, u8, u8, Option<u8>)>,
    subs: Vec<(usize, i64, u8, SubstitutionKind, bool)>,
) -> WeekSource {
    let entries: Vec<TimetableEntry> = entries
        .into_iter()
        .enumerate()
        .map(|(i, (c, t, r, day, period, block))| TimetableEntry {
            id: EntryId(i as i64 + 1),
            class_id: ClassId::new(CLASSES[c]),
            teacher_id: TeacherId::new(TEACHERS[t]),
            subject_id: SubjectId::new("MAT"),
            room_id: RoomId::new(ROOMS[r]),
            day_of_week: day,
            period,
            block_id: block.map(|b| BlockId::new(format!("b{}", b))),
            comment: None,
        })
        .collect();

    let monday = week().monday();
    let substitutions: Vec<SubstitutionEntry> = subs
        .into_iter()
        .enumerate()
        .map(|(i, (c, offset, period, kind, commented))| SubstitutionEntry {
            id: SubstitutionId(i as i64 + 1),
            date: monday + Duration::days(offset),
            period,
            class_id: ClassId::new(CLASSES[c]),
            kind,
            comment: commented.then(|| "note".to_string()),
        })
        .collect();

    WeekSource {
        overlaid: entries.clone(),
        entries,
        substitutions,
    }
}

fn arb_target() -> impl Strategy<Value = ScheduleTarget> {
    prop_oneof![
        (0..CLASSES.len()).prop_map(|c| ScheduleTarget::Class(ClassId::new(CLASSES[c]))),
        (0..TEACHERS.len()).prop_map(|t| ScheduleTarget::Teacher(TeacherId::new(TEACHERS[t]))),
    ]
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// No two slots of one day overlap, and the output is sorted.
    #[test]
    fn slots_never_overlap(
        entries in proptest::collection::vec(arb_entry(), 0..30),
        subs in proptest::collection::vec(arb_substitution(), 0..15),
        target in arb_target(),
    ) {
        let source = build_source(entries, subs);
        let slots = resolve_week(&SchoolCalendar::default(), &target, week(), &source);

        for (i, a) in slots.iter().enumerate() {
            prop_assert!(a.start_period <= a.end_period);
            prop_assert!((1..=5).contains(&a.day_of_week), "weekend slot: {:?}", a);
            for b in &slots[i + 1..] {
                prop_assert!(!a.overlaps(b), "overlap: {:?} / {:?}", a, b);
            }
        }
        for pair in slots.windows(2) {
            prop_assert!(
                (pair[0].day_of_week, pair[0].start_period)
                    <= (pair[1].day_of_week, pair[1].start_period)
            );
        }
    }

    /// A run spans exactly its members' periods, and every member carries
    /// the same class, kind and comment.
    #[test]
    fn runs_are_homogeneous(
        entries in proptest::collection::vec(arb_entry(), 0..20),
        subs in proptest::collection::vec(arb_substitution(), 0..20),
        target in arb_target(),
    ) {
        let source = build_source(entries, subs);
        let by_id: HashMap<SubstitutionId, &SubstitutionEntry> =
            source.substitutions.iter().map(|s| (s.id, s)).collect();
        let slots = resolve_week(&SchoolCalendar::default(), &target, week(), &source);

        for slot in &slots {
            let Provenance::Substitutions(ids) = &slot.provenance else { continue };
            let members: Vec<&SubstitutionEntry> = ids.iter().map(|id| by_id[id]).collect();
            prop_assert_eq!(members.len(), slot.period_count() as usize);

            let periods: Vec<u8> = members.iter().map(|m| m.period).collect();
            let expected: Vec<u8> = (slot.start_period..=slot.end_period).collect();
            prop_assert_eq!(periods, expected);

            let head = members[0];
            for m in &members[1..] {
                prop_assert_eq!(&m.class_id, &head.class_id);
                prop_assert_eq!(&m.kind, &head.kind);
                prop_assert_eq!(&m.comment, &head.comment);
                prop_assert_eq!(m.date, slot.date);
            }
        }
    }

    /// Every slot date lies inside the requested week on a school day.
    #[test]
    fn slot_dates_match_their_weekday(
        entries in proptest::collection::vec(arb_entry(), 0..20),
        subs in proptest::collection::vec(arb_substitution(), 0..10),
        target in arb_target(),
    ) {
        let source = build_source(entries, subs);
        let slots = resolve_week(&SchoolCalendar::default(), &target, week(), &source);
        let range = week().school_days();

        for slot in &slots {
            prop_assert!(range.contains(slot.date));
            prop_assert_eq!(slot.date, week().date_of(slot.day_of_week).unwrap());
        }
    }
}

#[test]
fn weekday_offsets_used_above_start_on_monday() {
    assert_eq!(week().monday(), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
}
