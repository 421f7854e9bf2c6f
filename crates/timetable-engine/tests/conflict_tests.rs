//! Tests for the double-booking gates.

use chrono::NaiveDate;
use timetable_engine::conflict::{
    check_entry, check_restored, check_substitution, Booking, ProposedEntry,
    ProposedSubstitution, ResourceKind,
};
use timetable_engine::model::{
    BlockId, ClassId, EntryId, Exclusion, RoomId, SubjectId, SubstitutionEntry, SubstitutionId,
    SubstitutionKind, TeacherId, TimetableEntry,
};

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

fn entry(id: i64, class: &str, teacher: &str, room: &str, day: u8, period: u8) -> TimetableEntry {
    TimetableEntry {
        id: EntryId(id),
        class_id: ClassId::new(class),
        teacher_id: TeacherId::new(teacher),
        subject_id: SubjectId::new("MAT"),
        room_id: RoomId::new(room),
        day_of_week: day,
        period,
        block_id: None,
        comment: None,
    }
}

fn proposal(class: &str, teacher: &str, room: &str, day: u8, start: u8, end: u8) -> ProposedEntry {
    ProposedEntry {
        class_id: ClassId::new(class),
        teacher_id: TeacherId::new(teacher),
        room_id: RoomId::new(room),
        day_of_week: day,
        start_period: start,
        end_period: end,
        exclude: None,
    }
}

fn sub(id: i64, period: u8, class: &str, kind: SubstitutionKind) -> SubstitutionEntry {
    SubstitutionEntry {
        id: SubstitutionId(id),
        date: monday(),
        period,
        class_id: ClassId::new(class),
        kind,
        comment: None,
    }
}

fn proposed_sub(class: &str, start: u8, end: u8, kind: SubstitutionKind) -> ProposedSubstitution {
    ProposedSubstitution {
        class_id: ClassId::new(class),
        date: monday(),
        start_period: start,
        end_period: end,
        kind,
        exclude: None,
    }
}

fn vertretung(teacher: &str) -> SubstitutionKind {
    SubstitutionKind::Vertretung {
        new_teacher_id: TeacherId::new(teacher),
        new_subject_id: None,
        new_room_id: None,
    }
}

// ---------------------------------------------------------------------------
// Base entries
// ---------------------------------------------------------------------------

#[test]
fn busy_teacher_is_reported() {
    // T1 teaches 8b on Monday p3 in R1; proposing T1 for 7a in R2.
    let existing = vec![entry(1, "8b", "T1", "R1", 1, 3)];

    let report = check_entry(&proposal("7a", "T1", "R2", 1, 3, 3), &existing, &[]);

    assert_eq!(report.len(), 1);
    let c = &report.collisions[0];
    assert_eq!(c.resource, ResourceKind::Teacher);
    assert_eq!(c.resource_id, "T1");
    assert_eq!(c.period, 3);
    assert_eq!(c.existing, Booking::Entry(EntryId(1)));
}

#[test]
fn every_resource_and_period_is_listed() {
    let existing = vec![
        entry(1, "7a", "T9", "R9", 1, 3),
        entry(2, "8b", "T1", "R1", 1, 4),
    ];

    let report = check_entry(&proposal("7a", "T1", "R1", 1, 3, 4), &existing, &[]);

    assert_eq!(report.on(ResourceKind::Class).count(), 1);
    assert_eq!(report.on(ResourceKind::Teacher).count(), 1);
    assert_eq!(report.on(ResourceKind::Room).count(), 1);
    let periods: Vec<u8> = report.collisions.iter().map(|c| c.period).collect();
    assert_eq!(periods, vec![3, 4, 4]);
}

#[test]
fn other_day_and_period_do_not_collide() {
    let existing = vec![
        entry(1, "7a", "T1", "R1", 2, 3),
        entry(2, "7a", "T1", "R1", 1, 5),
    ];

    let report = check_entry(&proposal("7a", "T1", "R1", 1, 3, 4), &existing, &[]);

    assert!(report.is_empty(), "unexpected: {}", report);
}

#[test]
fn excluded_entry_never_collides_with_itself() {
    let existing = vec![entry(1, "7a", "T1", "R1", 1, 3)];
    let mut p = proposal("7a", "T1", "R1", 1, 3, 3);
    p.exclude = Some(Exclusion::Entry(EntryId(1)));

    assert!(check_entry(&p, &existing, &[]).is_empty());
}

#[test]
fn excluded_block_covers_all_its_rows() {
    let mut a = entry(1, "7a", "T1", "R1", 1, 3);
    let mut b = entry(2, "7a", "T1", "R1", 1, 4);
    a.block_id = Some(BlockId::new("blk"));
    b.block_id = Some(BlockId::new("blk"));
    let mut p = proposal("7a", "T1", "R1", 1, 3, 4);
    p.exclude = Some(Exclusion::Block(BlockId::new("blk")));

    assert!(check_entry(&p, &[a, b], &[]).is_empty());
}

#[test]
fn report_display_names_resource_and_period() {
    let existing = vec![entry(1, "8b", "T1", "R1", 1, 3)];
    let report = check_entry(&proposal("7a", "T1", "R2", 1, 3, 3), &existing, &[]);

    let text = report.to_string();
    assert!(text.contains("teacher T1"), "{}", text);
    assert!(text.contains("period 3"), "{}", text);
}

#[test]
fn upcoming_cover_blocks_base_entry_teacher_and_room() {
    let entries = vec![entry(1, "8b", "T1", "R1", 1, 3)];
    let subs = vec![sub(
        5,
        3,
        "8b",
        SubstitutionKind::Vertretung {
            new_teacher_id: TeacherId::new("T2"),
            new_subject_id: None,
            new_room_id: Some(RoomId::new("R5")),
        },
    )];

    let report = check_entry(&proposal("7c", "T2", "R5", 1, 2, 4), &entries, &subs);

    assert_eq!(report.len(), 2, "{}", report);
    for collision in &report.collisions {
        assert_eq!(collision.existing, Booking::Substitution(SubstitutionId(5)));
        assert_eq!(collision.date, Some(monday()));
        assert_eq!(collision.period, 3);
    }
}

#[test]
fn substitution_only_blocks_what_it_brings_in() {
    // The Entfall frees T1; a room change keeps the class's own teacher,
    // which the base check already covers.
    let entries = vec![entry(1, "8b", "T1", "R1", 1, 3)];
    let subs = vec![
        sub(5, 3, "8b", SubstitutionKind::Entfall),
        sub(
            6,
            3,
            "9c",
            SubstitutionKind::Raumaenderung {
                new_room_id: RoomId::new("R7"),
            },
        ),
    ];

    assert!(check_entry(&proposal("7c", "T9", "R9", 1, 3, 3), &entries, &subs).is_empty());
    let report = check_entry(&proposal("7c", "T9", "R7", 1, 3, 3), &entries, &subs);
    assert_eq!(report.on(ResourceKind::Room).count(), 1);
}

#[test]
fn substitutions_of_other_weekdays_or_own_class_are_ignored() {
    let subs = vec![sub(5, 3, "7a", vertretung("T2")), sub(6, 3, "8b", vertretung("T2"))];

    // Monday substitutions against a Tuesday proposal.
    assert!(check_entry(&proposal("7c", "T2", "R9", 2, 3, 3), &[], &subs).is_empty());
    // 7a's own cover overlays the new 7a lesson on that date.
    let report = check_entry(&proposal("7a", "T2", "R9", 1, 3, 3), &[], &subs);
    assert_eq!(report.len(), 1);
    assert_eq!(report.collisions[0].existing, Booking::Substitution(SubstitutionId(6)));
}

// ---------------------------------------------------------------------------
// Substitutions
// ---------------------------------------------------------------------------

#[test]
fn own_lesson_is_replaced_not_collided() {
    let entries = vec![entry(1, "7a", "T1", "R1", 1, 3)];

    let report = check_substitution(&proposed_sub("7a", 3, 3, vertretung("T2")), &entries, &[]);

    assert!(report.is_empty(), "unexpected: {}", report);
}

#[test]
fn second_substitution_for_same_class_period_collides() {
    let subs = vec![sub(5, 3, "7a", SubstitutionKind::Entfall)];

    let report = check_substitution(&proposed_sub("7a", 3, 3, vertretung("T2")), &[], &subs);

    assert_eq!(report.on(ResourceKind::Class).count(), 1);
    assert_eq!(
        report.collisions[0].existing,
        Booking::Substitution(SubstitutionId(5))
    );
}

#[test]
fn covering_teacher_busy_elsewhere_collides() {
    let entries = vec![
        entry(1, "7a", "T1", "R1", 1, 3),
        entry(2, "8b", "T2", "R2", 1, 3),
    ];

    let report = check_substitution(&proposed_sub("7a", 3, 3, vertretung("T2")), &entries, &[]);

    let teacher: Vec<_> = report.on(ResourceKind::Teacher).collect();
    assert_eq!(teacher.len(), 1);
    assert_eq!(teacher[0].date, Some(monday()));
    assert_eq!(teacher[0].existing, Booking::Entry(EntryId(2)));
}

#[test]
fn entfall_frees_teacher_for_cover_elsewhere() {
    // 8b's lesson with T2 is cancelled, so T2 may cover 7a.
    let entries = vec![
        entry(1, "7a", "T1", "R1", 1, 3),
        entry(2, "8b", "T2", "R2", 1, 3),
    ];
    let subs = vec![sub(5, 3, "8b", SubstitutionKind::Entfall)];

    let report = check_substitution(&proposed_sub("7a", 3, 3, vertretung("T2")), &entries, &subs);

    assert!(report.is_empty(), "unexpected: {}", report);
}

#[test]
fn vertretung_frees_original_teacher() {
    // T1 is covered in 7a, so T1 may cover 8b.
    let entries = vec![
        entry(1, "7a", "T1", "R1", 1, 3),
        entry(2, "8b", "T2", "R2", 1, 3),
    ];
    let subs = vec![sub(5, 3, "7a", vertretung("T3"))];

    let report = check_substitution(&proposed_sub("8b", 3, 3, vertretung("T1")), &entries, &subs);

    assert!(report.is_empty(), "unexpected: {}", report);
}

#[test]
fn room_change_into_occupied_room_collides() {
    let entries = vec![
        entry(1, "7a", "T1", "R1", 1, 3),
        entry(2, "8b", "T2", "R2", 1, 3),
    ];
    let kind = SubstitutionKind::Raumaenderung {
        new_room_id: RoomId::new("R2"),
    };

    let report = check_substitution(&proposed_sub("7a", 3, 3, kind), &entries, &[]);

    assert_eq!(report.on(ResourceKind::Room).count(), 1);
    assert_eq!(report.on(ResourceKind::Teacher).count(), 0);
}

#[test]
fn excluded_substitution_is_ignored() {
    let subs = vec![sub(5, 3, "7a", SubstitutionKind::Entfall)];
    let mut p = proposed_sub("7a", 3, 3, vertretung("T2"));
    p.exclude = Some(SubstitutionId(5));

    assert!(check_substitution(&p, &[], &subs).is_empty());
}

#[test]
fn entries_of_other_weekdays_are_ignored() {
    let entries = vec![entry(2, "8b", "T2", "R2", 2, 3)];

    let report = check_substitution(&proposed_sub("7a", 3, 3, vertretung("T2")), &entries, &[]);

    assert!(report.is_empty());
}

// ---------------------------------------------------------------------------
// Restored lessons
// ---------------------------------------------------------------------------

#[test]
fn restored_lesson_collides_with_cover_that_took_its_teacher() {
    // 8b's Entfall is gone; T2 still covers 7a.
    let entries = vec![
        entry(1, "7a", "T1", "R1", 1, 3),
        entry(2, "8b", "T2", "R2", 1, 3),
    ];
    let remaining = vec![sub(6, 3, "7a", vertretung("T2"))];

    let report = check_restored(&ClassId::new("8b"), monday(), [3], &entries, &remaining);

    assert_eq!(report.len(), 1);
    assert_eq!(report.collisions[0].resource, ResourceKind::Teacher);
    assert_eq!(report.collisions[0].existing, Booking::Substitution(SubstitutionId(6)));
}

#[test]
fn restored_lesson_is_fine_when_still_overlaid_or_absent() {
    let entries = vec![
        entry(1, "7a", "T1", "R1", 1, 3),
        entry(2, "8b", "T2", "R2", 1, 3),
    ];
    let remaining = vec![
        sub(6, 3, "7a", vertretung("T2")),
        sub(7, 3, "8b", SubstitutionKind::Entfall),
    ];

    let b8 = ClassId::new("8b");

    // Another 8b row still cancels the lesson.
    assert!(check_restored(&b8, monday(), [3], &entries, &remaining).is_empty());
    // 8b has no lesson on period 4.
    assert!(check_restored(&b8, monday(), [4], &entries, &remaining[..1]).is_empty());
    // Nothing else holds T1 or R1.
    assert!(check_restored(&ClassId::new("7a"), monday(), [3], &entries, &[]).is_empty());
}
