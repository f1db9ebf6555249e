//! The maintenance repair pipeline.
//!
//! Runs the fix-up steps a damaged database needs in a fixed order and
//! reports what each step did. A failed step is recorded and the pipeline
//! moves on, so one broken table does not hide damage elsewhere.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::Serialize;

use crate::{
    Error, db, reconciler,
    stores::sqlite::{SQLiteOccurrenceStore, SQLiteTemplateStore},
};

/// How a single repair step ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepStatus {
    /// The step completed and left nothing behind.
    Ok,
    /// The step completed but found damage it is not allowed to fix on its
    /// own.
    Degraded(String),
    /// The step could not complete.
    Failed(String),
}

/// The outcome of one repair step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    /// The step's name, stable for scripting against the JSON output.
    pub name: &'static str,
    /// How the step ended.
    #[serde(flatten)]
    pub status: StepStatus,
    /// How many rows the step changed or flagged.
    pub rows_affected: usize,
}

impl StepReport {
    fn ok(name: &'static str, rows_affected: usize) -> Self {
        Self {
            name,
            status: StepStatus::Ok,
            rows_affected,
        }
    }

    fn failed(name: &'static str, error: Error) -> Self {
        Self {
            name,
            status: StepStatus::Failed(error.to_string()),
            rows_affected: 0,
        }
    }
}

/// The outcome of a whole repair run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Per-step outcomes, in execution order.
    pub steps: Vec<StepReport>,
}

impl RepairReport {
    /// Whether every step completed, degraded or not.
    pub fn succeeded(&self) -> bool {
        self.steps
            .iter()
            .all(|step| !matches!(step.status, StepStatus::Failed(_)))
    }

    /// Whether every step completed and found nothing wrong.
    pub fn is_clean(&self) -> bool {
        self.steps
            .iter()
            .all(|step| step.status == StepStatus::Ok)
    }
}

/// Run every repair step against the database behind `connection`.
///
/// Steps run in order: `schema` recreates any missing tables, `deduplicate`
/// removes duplicate occurrences, and `orphans` flags occurrences whose
/// template is gone. Orphans are never deleted here; the step degrades
/// instead so the operator can decide.
pub fn run_repair(connection: Connection) -> RepairReport {
    let mut report = RepairReport::default();

    let schema = match db::initialize(&connection) {
        Ok(()) => StepReport::ok("schema", 0),
        Err(error) => StepReport::failed("schema", error),
    };
    report.steps.push(schema);

    let connection = Arc::new(Mutex::new(connection));
    let templates = SQLiteTemplateStore::new(Arc::clone(&connection));
    let mut occurrences = SQLiteOccurrenceStore::new(connection);

    let mut orphaned = None;
    let deduplicate = match reconciler::reconcile(&templates, &mut occurrences, None) {
        Ok(pass) => {
            orphaned = Some(pass.orphaned);
            StepReport::ok("deduplicate", pass.rows_deleted)
        }
        Err(error) => StepReport::failed("deduplicate", error),
    };
    report.steps.push(deduplicate);

    // Detection already happened during deduplication unless that step
    // failed, in which case it is retried on its own.
    let detected = match orphaned {
        Some(ids) => Ok(ids),
        None => reconciler::reconcile(&templates, &mut occurrences, None)
            .map(|pass| pass.orphaned),
    };
    let orphans = match detected {
        Ok(ids) if ids.is_empty() => StepReport::ok("orphans", 0),
        Ok(ids) => StepReport {
            name: "orphans",
            status: StepStatus::Degraded(format!(
                "{} occurrence(s) reference deleted templates",
                ids.len()
            )),
            rows_affected: ids.len(),
        },
        Err(error) => StepReport::failed("orphans", error),
    };
    report.steps.push(orphans);

    for step in &report.steps {
        match &step.status {
            StepStatus::Ok => {
                tracing::info!("repair step {} ok ({} row(s))", step.name, step.rows_affected)
            }
            StepStatus::Degraded(detail) => {
                tracing::warn!("repair step {} degraded: {detail}", step.name)
            }
            StepStatus::Failed(detail) => {
                tracing::error!("repair step {} failed: {detail}", step.name)
            }
        }
    }

    report
}

#[cfg(test)]
mod repair_tests {
    use rusqlite::Connection;
    use time::{Date, Month};

    use crate::{
        models::{Origin, RecurrenceRule, RecurringTemplate},
        stores::{OccurrenceStore, TemplateStore, sqlite::create_stores},
    };

    use super::{StepStatus, run_repair};

    fn date(year: i32, month: Month, day: u8) -> Date {
        Date::from_calendar_date(year, month, day).unwrap()
    }

    #[test]
    fn all_steps_pass_on_a_fresh_database() {
        let report = run_repair(Connection::open_in_memory().unwrap());

        assert!(report.succeeded());
        assert!(report.is_clean());
        let names: Vec<_> = report.steps.iter().map(|step| step.name).collect();
        assert_eq!(names, vec!["schema", "deduplicate", "orphans"]);
    }

    #[test]
    fn deduplicate_step_counts_removed_rows() {
        let db = tempfile::NamedTempFile::new().unwrap();
        let (mut templates, mut occurrences) =
            create_stores(Connection::open(db.path()).unwrap()).unwrap();
        let template = templates
            .create(RecurringTemplate::build(
                10.0,
                1,
                1,
                RecurrenceRule::Monthly { day: 15 },
                date(2025, Month::January, 1),
            ))
            .unwrap();
        let due = date(2025, Month::January, 15);
        occurrences.insert_missing(&template, &[due]).unwrap();
        occurrences
            .raw_insert_for_test(template.id(), due, 10.0, 1, Origin::Generated)
            .unwrap();
        drop((templates, occurrences));

        let report = run_repair(Connection::open(db.path()).unwrap());

        assert!(report.succeeded());
        let dedup = &report.steps[1];
        assert_eq!(dedup.status, StepStatus::Ok);
        assert_eq!(dedup.rows_affected, 1);

        // A second run finds nothing left to fix.
        let second = run_repair(Connection::open(db.path()).unwrap());
        assert!(second.is_clean());
        assert_eq!(second.steps[1].rows_affected, 0);
    }

    #[test]
    fn orphans_degrade_the_run_without_being_deleted() {
        let db = tempfile::NamedTempFile::new().unwrap();
        let (mut templates, mut occurrences) =
            create_stores(Connection::open(db.path()).unwrap()).unwrap();
        let template = templates
            .create(RecurringTemplate::build(
                10.0,
                1,
                1,
                RecurrenceRule::Monthly { day: 15 },
                date(2025, Month::January, 1),
            ))
            .unwrap();
        occurrences
            .insert_missing(&template, &[date(2025, Month::January, 15)])
            .unwrap();
        templates.delete(template.id()).unwrap();
        drop(templates);

        let report = run_repair(Connection::open(db.path()).unwrap());

        assert!(report.succeeded());
        assert!(!report.is_clean());
        let orphans = &report.steps[2];
        assert!(matches!(orphans.status, StepStatus::Degraded(_)));
        assert_eq!(orphans.rows_affected, 1);
        assert_eq!(occurrences.count().unwrap(), 1);
    }
}
