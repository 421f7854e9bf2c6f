//! # timetable-engine
//!
//! Substitution-aware weekly timetables for schools.
//!
//! Given a recurring base timetable and dated ad-hoc substitutions (cover,
//! room change, cancellation, special event), the engine computes the
//! effective week of a class or a teacher, guards every write against
//! double-booking a class, teacher or room, and gates what students and
//! teachers may see through a per-week publish flag.
//!
//! ## Modules
//!
//! - [`model`] — Entries, substitutions, drafts and resolved slots
//! - [`calendar`] — ISO weeks and the school's period time grid
//! - [`block`] — Merge multi-period sessions into blocks
//! - [`overlay`] — Layer substitutions onto the base timetable
//! - [`conflict`] — Double-booking detection for entries and substitutions
//! - [`publish`] — Per-(week, audience) publish state machine
//! - [`location`] — Where a teacher is at a given instant
//! - [`planner`] — Transactional write pipeline and gated reads
//! - [`cache`] — Resolved weeks keyed by (target, week)
//! - [`store`] — Persistence traits, in-memory and SQLite backends
//! - [`audit`] — Audit events and sinks
//! - [`clock`] — Injectable time source
//! - [`error`] — Error types

pub mod audit;
pub mod block;
pub mod cache;
pub mod calendar;
pub mod clock;
pub mod conflict;
pub mod error;
pub mod location;
pub mod model;
pub mod overlay;
pub mod planner;
pub mod publish;
pub mod store;

pub use audit::{AuditAction, AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use calendar::{IsoWeek, SchoolCalendar};
pub use clock::{Clock, FixedClock, SystemClock};
pub use conflict::{check_entry, check_restored, check_substitution, ConflictReport, ProposedEntry};
pub use error::{StoreError, TimetableError};
pub use location::{Location, LocationStatus};
pub use model::{
    Access, Actor, Audience, EntryDraft, ResolvedSlot, ScheduleTarget, SlotKind,
    SubstitutionDraft, SubstitutionKind,
};
pub use overlay::resolve_week;
pub use planner::{Planner, WeekView};
pub use publish::{PublishStateMachine, PublishStatus};
pub use store::MemoryStore;
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
