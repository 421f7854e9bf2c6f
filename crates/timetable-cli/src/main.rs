//! `timetable` CLI — edit, resolve and publish a school timetable stored in
//! SQLite.
//!
//! ## Usage
//!
//! ```sh
//! # Book 7a with T1 for a double period on Monday
//! timetable entry add --class 7a --teacher T1 --subject MAT --room R1 --day 1 --periods 3-4
//!
//! # T2 covers 7a's third period on 2 March
//! timetable sub add --date 2026-03-02 --periods 3 --class 7a --type Vertretung --teacher T2
//!
//! # Resolve a week (JSON on stdout)
//! timetable week --class 7a --week 2026-W10
//!
//! # Make the student view visible, then read it as a student would
//! timetable publish --week 2026-W10 --audience student
//! timetable week --class 7a --week 2026-W10 --public
//!
//! # Where is T1 right now?
//! timetable where --teacher T1
//!
//! # Load entries and substitutions from a JSON dataset
//! timetable import -i dataset.json
//! ```
//!
//! Logs go to stderr; set `RUST_LOG=debug` (or `RUST_LOG=timetable::audit=info`
//! for audit records only) to see them.

use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use timetable_engine::conflict::ProposedEntry;
use timetable_engine::model::{
    Access, Actor, Audience, BlockId, ClassId, EntryDraft, EntryId, Exclusion, RoomId,
    ScheduleTarget, SubjectId, SubstitutionDraft, SubstitutionId, SubstitutionKind, TeacherId,
};
use timetable_engine::{IsoWeek, Planner, SchoolCalendar, SqliteStore, TimetableError};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Exit status for retryable failures (EX_TEMPFAIL).
const EXIT_RETRY: i32 = 75;

#[derive(Parser)]
#[command(
    name = "timetable",
    version,
    about = "Substitution-aware school timetable CLI"
)]
struct Cli {
    /// SQLite database file (created if missing)
    #[arg(long, env = "TIMETABLE_DB", default_value = "timetable.db", global = true)]
    db: PathBuf,

    /// School calendar JSON (timezone and period grid); built-in grid if omitted
    #[arg(long, global = true)]
    calendar: Option<PathBuf>,

    /// Who is making the change, recorded in audit events
    #[arg(long, env = "TIMETABLE_ACTOR", default_value = "cli", global = true)]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add or delete base timetable entries
    Entry {
        #[command(subcommand)]
        action: EntryAction,
    },
    /// Add or delete dated substitutions
    Sub {
        #[command(subcommand)]
        action: SubAction,
    },
    /// Resolve the effective week of a class or teacher
    Week {
        #[command(flatten)]
        target: TargetArgs,
        /// ISO week, e.g. 2026-W10 (current week if omitted)
        #[arg(long)]
        week: Option<String>,
        /// Read as a student/teacher would: unpublished weeks come back empty
        #[arg(long)]
        public: bool,
    },
    /// Publish a week for one audience
    Publish {
        #[arg(long)]
        week: String,
        /// student or teacher
        #[arg(long)]
        audience: String,
    },
    /// Withdraw a published week
    Unpublish {
        #[arg(long)]
        week: String,
        #[arg(long)]
        audience: String,
    },
    /// Show both audience flags of a week
    Status {
        #[arg(long)]
        week: String,
    },
    /// Where a teacher is at an instant
    Where {
        #[arg(long)]
        teacher: String,
        /// RFC 3339 instant (now if omitted)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        #[arg(long)]
        public: bool,
    },
    /// Dry-run the double-booking check for a base entry (exit 1 on collisions)
    Check {
        #[command(flatten)]
        lesson: LessonArgs,
        /// Entry being edited in place
        #[arg(long, conflicts_with = "exclude_block")]
        exclude_entry: Option<i64>,
        /// Block being edited in place
        #[arg(long)]
        exclude_block: Option<String>,
    },
    /// Import entries, substitutions and publish flags from a JSON dataset
    Import {
        /// Input file (reads from stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,
    },
}

#[derive(Subcommand)]
enum EntryAction {
    /// Book a class with a teacher in a room
    Add {
        #[command(flatten)]
        lesson: LessonArgs,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        comment: Option<String>,
        /// Replace this entry in place
        #[arg(long, conflicts_with = "replace_block")]
        replace_entry: Option<i64>,
        /// Replace every row of this block in place
        #[arg(long)]
        replace_block: Option<String>,
    },
    /// Delete one entry or a whole block
    Delete {
        #[arg(long, required_unless_present = "block", conflicts_with = "block")]
        id: Option<i64>,
        #[arg(long)]
        block: Option<String>,
    },
}

#[derive(Subcommand)]
enum SubAction {
    /// Apply a substitution to a range of periods
    Add {
        #[arg(long)]
        date: NaiveDate,
        /// A period (3) or range (3-4)
        #[arg(long)]
        periods: String,
        #[arg(long)]
        class: String,
        /// Vertretung, Raumänderung, Entfall or Sonderevent
        #[arg(long = "type")]
        kind: String,
        #[arg(long)]
        teacher: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        room: Option<String>,
        #[arg(long)]
        comment: Option<String>,
        /// Replace this substitution in place
        #[arg(long)]
        replace: Option<i64>,
    },
    /// Delete one substitution
    Delete {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct TargetArgs {
    #[arg(long)]
    class: Option<String>,
    #[arg(long)]
    teacher: Option<String>,
}

impl TargetArgs {
    fn target(&self) -> Result<ScheduleTarget> {
        match (&self.class, &self.teacher) {
            (Some(class), None) => Ok(ScheduleTarget::Class(ClassId::new(class.as_str()))),
            (None, Some(teacher)) => Ok(ScheduleTarget::Teacher(TeacherId::new(teacher.as_str()))),
            _ => bail!("pass exactly one of --class or --teacher"),
        }
    }
}

#[derive(Args)]
struct LessonArgs {
    #[arg(long)]
    class: String,
    #[arg(long)]
    teacher: String,
    #[arg(long)]
    room: String,
    /// 1 = Monday .. 5 = Friday
    #[arg(long)]
    day: u8,
    /// A period (3) or range (3-4)
    #[arg(long)]
    periods: String,
}

/// Shape of an `import` file. Every section is optional.
#[derive(Debug, Default, Deserialize)]
struct Dataset {
    #[serde(default)]
    entries: Vec<EntryDraft>,
    #[serde(default)]
    substitutions: Vec<SubstitutionDraft>,
    #[serde(default)]
    publish: Vec<PublishRequest>,
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    week: String,
    audience: Audience,
}

#[derive(Debug, Serialize)]
struct ImportSummary {
    entries: usize,
    substitutions: usize,
    published: usize,
}

type CliPlanner = Planner<SqliteStore>;

fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        eprintln!("Error: {:#}", err);
        let retryable = err
            .downcast_ref::<TimetableError>()
            .is_some_and(TimetableError::is_retryable);
        process::exit(if retryable { EXIT_RETRY } else { 1 });
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let planner = open_planner(&cli)?;
    let actor = Actor::new(cli.actor.as_str());

    match cli.command {
        Commands::Entry { action } => match action {
            EntryAction::Add {
                lesson,
                subject,
                comment,
                replace_entry,
                replace_block,
            } => {
                let (start_period, end_period) = parse_periods(&lesson.periods)?;
                let replaces = match (replace_entry, replace_block) {
                    (Some(id), _) => Some(Exclusion::Entry(EntryId(id))),
                    (None, Some(block)) => Some(Exclusion::Block(BlockId::new(block))),
                    (None, None) => None,
                };
                let draft = EntryDraft {
                    class_id: ClassId::new(lesson.class),
                    teacher_id: TeacherId::new(lesson.teacher),
                    subject_id: SubjectId::new(subject),
                    room_id: RoomId::new(lesson.room),
                    day_of_week: lesson.day,
                    start_period,
                    end_period,
                    comment,
                    replaces,
                };
                let saved = planner
                    .save_entry(&actor, draft)
                    .context("Failed to save entry")?;
                print_json(&saved)?;
            }
            EntryAction::Delete { id, block } => match (id, block) {
                (Some(id), _) => {
                    let deleted = planner
                        .delete_entry(&actor, EntryId(id))
                        .context("Failed to delete entry")?;
                    print_json(&deleted)?;
                }
                (None, Some(block)) => {
                    let deleted = planner
                        .delete_block(&actor, &BlockId::new(block))
                        .context("Failed to delete block")?;
                    print_json(&deleted)?;
                }
                (None, None) => bail!("pass --id or --block"),
            },
        },
        Commands::Sub { action } => match action {
            SubAction::Add {
                date,
                periods,
                class,
                kind,
                teacher,
                subject,
                room,
                comment,
                replace,
            } => {
                let (start_period, end_period) = parse_periods(&periods)?;
                let kind = SubstitutionKind::from_parts(
                    &kind,
                    teacher.map(TeacherId::new),
                    subject.map(SubjectId::new),
                    room.map(RoomId::new),
                )?;
                let draft = SubstitutionDraft {
                    date,
                    start_period,
                    end_period,
                    class_id: ClassId::new(class),
                    kind,
                    comment,
                    replaces: replace.map(SubstitutionId),
                };
                let saved = planner
                    .save_substitution(&actor, draft)
                    .context("Failed to save substitution")?;
                print_json(&saved)?;
            }
            SubAction::Delete { id } => {
                let deleted = planner
                    .delete_substitution(&actor, SubstitutionId(id))
                    .context("Failed to delete substitution")?;
                print_json(&deleted)?;
            }
        },
        Commands::Week {
            target,
            week,
            public,
        } => {
            let target = target.target()?;
            let week = match week {
                Some(raw) => parse_week(&raw)?,
                None => current_week(&planner),
            };
            let view = planner
                .week(access(public), &target, week)
                .with_context(|| format!("Failed to resolve {} for {}", target, week))?;
            print_json(&view)?;
        }
        Commands::Publish { week, audience } => {
            let week = parse_week(&week)?;
            let audience: Audience = audience.parse()?;
            let transition = planner.publish(&actor, week, audience)?;
            print_json(&transition)?;
        }
        Commands::Unpublish { week, audience } => {
            let week = parse_week(&week)?;
            let audience: Audience = audience.parse()?;
            let transition = planner.unpublish(&actor, week, audience)?;
            print_json(&transition)?;
        }
        Commands::Status { week } => {
            let status = planner.publish_status(parse_week(&week)?)?;
            print_json(&status)?;
        }
        Commands::Where {
            teacher,
            at,
            public,
        } => {
            let teacher = TeacherId::new(teacher);
            let location = match at {
                Some(at) => planner.locate_teacher(access(public), &teacher, at)?,
                None => planner.locate_teacher_now(access(public), &teacher)?,
            };
            print_json(&location)?;
        }
        Commands::Check {
            lesson,
            exclude_entry,
            exclude_block,
        } => {
            let (start_period, end_period) = parse_periods(&lesson.periods)?;
            let exclude = match (exclude_entry, exclude_block) {
                (Some(id), _) => Some(Exclusion::Entry(EntryId(id))),
                (None, Some(block)) => Some(Exclusion::Block(BlockId::new(block))),
                (None, None) => None,
            };
            let proposal = ProposedEntry {
                class_id: ClassId::new(lesson.class),
                teacher_id: TeacherId::new(lesson.teacher),
                room_id: RoomId::new(lesson.room),
                day_of_week: lesson.day,
                start_period,
                end_period,
                exclude,
            };
            let report = planner.check_entry(&proposal)?;
            print_json(&report)?;
            if !report.is_empty() {
                process::exit(1);
            }
        }
        Commands::Import { input } => {
            let json = read_input(input.as_deref())?;
            let dataset: Dataset =
                serde_json::from_str(&json).context("Failed to parse dataset JSON")?;
            let summary = import(&planner, &actor, dataset)?;
            print_json(&summary)?;
        }
    }

    Ok(())
}

fn open_planner(cli: &Cli) -> Result<CliPlanner> {
    let calendar = match &cli.calendar {
        Some(path) => SchoolCalendar::from_file(path)
            .with_context(|| format!("Failed to load calendar: {}", path.display()))?,
        None => SchoolCalendar::default(),
    };
    let store = SqliteStore::open(&cli.db)
        .with_context(|| format!("Failed to open database: {}", cli.db.display()))?;
    debug!(db = %cli.db.display(), timezone = %calendar.timezone, "opened timetable");
    Ok(Planner::new(store, calendar))
}

fn import(planner: &CliPlanner, actor: &Actor, dataset: Dataset) -> Result<ImportSummary> {
    let mut summary = ImportSummary {
        entries: 0,
        substitutions: 0,
        published: 0,
    };

    for (i, draft) in dataset.entries.into_iter().enumerate() {
        let rows = planner
            .save_entry(actor, draft)
            .with_context(|| format!("Failed to import entry #{}", i + 1))?;
        summary.entries += rows.len();
    }
    for (i, draft) in dataset.substitutions.into_iter().enumerate() {
        let rows = planner
            .save_substitution(actor, draft)
            .with_context(|| format!("Failed to import substitution #{}", i + 1))?;
        summary.substitutions += rows.len();
    }
    for request in dataset.publish {
        let week = parse_week(&request.week)?;
        if planner.publish(actor, week, request.audience)?.changed {
            summary.published += 1;
        }
    }

    info!(
        entries = summary.entries,
        substitutions = summary.substitutions,
        published = summary.published,
        "import finished"
    );
    Ok(summary)
}

fn access(public: bool) -> Access {
    if public {
        Access::Public
    } else {
        Access::Privileged
    }
}

fn current_week(planner: &CliPlanner) -> IsoWeek {
    let today = Utc::now()
        .with_timezone(&planner.calendar().timezone)
        .date_naive();
    IsoWeek::from_date(today)
}

/// Parse `3` or `3-4`.
fn parse_periods(raw: &str) -> Result<(u8, u8)> {
    let parse = |s: &str| -> Result<u8> {
        s.trim()
            .parse::<u8>()
            .with_context(|| format!("Invalid period: '{}'", s))
    };
    match raw.split_once('-') {
        Some((start, end)) => Ok((parse(start)?, parse(end)?)),
        None => {
            let period = parse(raw)?;
            Ok((period, period))
        }
    }
}

/// Parse `2026-W10` (the `W` may be lower case).
fn parse_week(raw: &str) -> Result<IsoWeek> {
    let Some((year, week)) = raw.split_once(['W', 'w']) else {
        bail!("Invalid week '{}', expected e.g. 2026-W10", raw);
    };
    let year: i32 = year
        .trim_end_matches('-')
        .parse()
        .with_context(|| format!("Invalid year in week '{}'", raw))?;
    let week: u32 = week
        .parse()
        .with_context(|| format!("Invalid week number in '{}'", raw))?;
    Ok(IsoWeek::new(year, week)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn read_input(path: Option<&str>) -> Result<String> {
    match path {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path))
        }
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            Ok(buf)
        }
    }
}
