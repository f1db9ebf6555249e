//! Cadencier is the recurring-transaction core of a personal-finance app.
//!
//! A [RecurringTemplate](models::RecurringTemplate) describes a repeating
//! financial obligation (e.g., monthly rent on the 1st). This library derives
//! concrete dated [Occurrence](models::Occurrence) rows from templates for a
//! requested date window ([generator]), removes the duplicate and orphaned
//! rows that uncoordinated generation runs leave behind ([reconciler]), and
//! coordinates both so that at most one run is in flight per template at any
//! time ([engine]).
//!
//! Persistence goes through the store traits in [stores], with SQLite
//! implementations in [stores::sqlite]. The `reconcile` and `repair` binaries
//! expose the maintenance operations for out-of-band use.

#![warn(missing_docs)]

pub mod db;
pub mod engine;
pub mod generator;
pub mod models;
pub mod reconciler;
pub mod repair;
pub mod stores;

pub use db::initialize as initialize_db;
pub use engine::{Engine, RetryPolicy};
pub use generator::{GenerationOutcome, due_dates, generate};
pub use reconciler::{ReconcileReport, reconcile, remove_orphans};

use time::Date;

use crate::models::DatabaseID;

/// The errors that may occur in the library.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// A recurrence rule failed validation (e.g., day-of-month outside 1-31
    /// or a zero-day interval).
    ///
    /// This is a configuration error: the caller must fix the template, the
    /// operation is never retried and nothing is generated.
    #[error("invalid recurrence rule: {0}")]
    InvalidRecurrenceRule(String),

    /// A template was given an end date earlier than its start date.
    #[error("end date {0} is before start date {1}")]
    EndDateBeforeStartDate(Date, Date),

    /// A generation or reconciliation run was requested while another run for
    /// the same template was already in flight.
    ///
    /// Only returned by the non-waiting engine entry points; the waiting ones
    /// queue behind the in-flight run instead of surfacing this.
    #[error("another generation or reconciliation run is in flight for template {0}")]
    GenerationInFlight(DatabaseID),

    /// The requested resource could not be found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// Tried to update a template that does not exist.
    #[error("tried to update a template that is not in the database")]
    UpdateMissingTemplate,

    /// Tried to delete a template that does not exist.
    #[error("tried to delete a template that is not in the database")]
    DeleteMissingTemplate,

    /// Tried to delete an occurrence that does not exist.
    #[error("tried to delete an occurrence that is not in the database")]
    DeleteMissingOccurrence,

    /// An occurrence for the same template and due date already exists.
    ///
    /// The `(template_id, due_date)` pair is the uniqueness rule that keeps
    /// generation idempotent, so a second row for the pair is rejected.
    #[error("an occurrence for this template and due date already exists")]
    DuplicateOccurrence,

    /// A foreign key did not refer to a valid template.
    #[error("the template ID does not refer to a valid template")]
    InvalidTemplateReference,

    /// An unhandled/unexpected SQL error.
    ///
    /// This is the retryable storage failure class: the engine retries it
    /// with bounded backoff before surfacing it.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock.
    #[error("could not acquire the database lock")]
    DatabaseLockError,
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            // Code 787 occurs when a FOREIGN KEY constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(_))
                if sql_error.extended_code == 787 =>
            {
                Error::InvalidTemplateReference
            }
            // Code 2067 occurs when a UNIQUE constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067 && desc.contains("occurrence") =>
            {
                Error::DuplicateOccurrence
            }
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl Error {
    /// Whether the engine should retry the failed operation.
    ///
    /// Only storage failures are retryable; configuration errors surface to
    /// the caller unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::SqlError(_) | Error::DatabaseLockError)
    }
}
