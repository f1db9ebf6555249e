//! Coordinates generation and reconciliation runs.
//!
//! The stores enforce correctness for a single call, but the app fires
//! generation from several places at once (app launch, a template edit, a
//! background refresh). The [Engine] serialises those runs per template with
//! an async lock, and retries the transient storage failures SQLite reports
//! when the file is briefly locked by another process.

use std::{
    collections::HashMap,
    ops::Range,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use time::Date;
use tokio::sync::Mutex as AsyncMutex;

use crate::{
    Error,
    generator::{self, GenerationOutcome},
    models::DatabaseID,
    reconciler::{self, ReconcileReport},
    stores::{OccurrenceStore, TemplateStore},
};

/// How transient storage errors are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry. Each further retry doubles it.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, completed_attempts: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(completed_attempts.saturating_sub(1))
    }
}

/// Run `operation`, retrying transient storage errors with exponential
/// backoff. Validation and not-found errors are returned immediately.
async fn with_retry<R, F>(policy: &RetryPolicy, mut operation: F) -> Result<R, Error>
where
    F: FnMut() -> Result<R, Error>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation() {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempts < policy.max_attempts => {
                tracing::warn!("attempt {attempts} failed, retrying: {error}");
                tokio::time::sleep(policy.delay_for(attempts)).await;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Serialises occurrence generation and reconciliation per template.
///
/// Cloning the engine is cheap and every clone shares the same lock table,
/// so clones handed to different tasks still exclude each other.
#[derive(Debug, Clone)]
pub struct Engine<T, O> {
    templates: T,
    occurrences: O,
    locks: Arc<StdMutex<HashMap<DatabaseID, Arc<AsyncMutex<()>>>>>,
    retry: RetryPolicy,
}

impl<T, O> Engine<T, O>
where
    T: TemplateStore + Clone,
    O: OccurrenceStore + Clone,
{
    /// Create an engine over the given stores with the default retry policy.
    pub fn new(templates: T, occurrences: O) -> Self {
        Self {
            templates,
            occurrences,
            locks: Arc::new(StdMutex::new(HashMap::new())),
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn lock_for(&self, template_id: DatabaseID) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();

        Arc::clone(locks.entry(template_id).or_default())
    }

    /// Generate the occurrences due for one template within `range`,
    /// waiting for any in-flight run for the same template to finish first.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::NotFound] if `template_id` does not refer to a template,
    /// - [Error::InvalidRecurrenceRule] if the template's rule is malformed,
    /// - or [Error::SqlError] if a storage error persists through retries.
    pub async fn generate(
        &self,
        template_id: DatabaseID,
        range: Range<Date>,
    ) -> Result<GenerationOutcome, Error> {
        let lock = self.lock_for(template_id);
        let _guard = lock.lock().await;

        self.generate_locked(template_id, range).await
    }

    /// Like [Engine::generate], but fails fast with
    /// [Error::GenerationInFlight] instead of waiting when another run for
    /// the same template is in progress.
    pub async fn try_generate(
        &self,
        template_id: DatabaseID,
        range: Range<Date>,
    ) -> Result<GenerationOutcome, Error> {
        let lock = self.lock_for(template_id);
        let Ok(_guard) = lock.try_lock() else {
            return Err(Error::GenerationInFlight(template_id));
        };

        self.generate_locked(template_id, range).await
    }

    async fn generate_locked(
        &self,
        template_id: DatabaseID,
        range: Range<Date>,
    ) -> Result<GenerationOutcome, Error> {
        let templates = self.templates.clone();
        let mut occurrences = self.occurrences.clone();

        with_retry(&self.retry, move || {
            generator::generate(&templates, &mut occurrences, template_id, range.clone())
        })
        .await
    }

    /// Generate occurrences within `range` for every template active at the
    /// start of the range, one template at a time. Returns the summed
    /// outcome.
    ///
    /// # Errors
    /// Returns the first error any per-template run produces. Templates
    /// processed before the failure keep their inserted rows.
    pub async fn generate_window(&self, range: Range<Date>) -> Result<GenerationOutcome, Error> {
        let active = self.templates.list_active(range.start)?;

        let mut total = GenerationOutcome::default();
        for template in active {
            let outcome = self.generate(template.id(), range.clone()).await?;
            total.dates_due += outcome.dates_due;
            total.rows_inserted += outcome.rows_inserted;
        }

        Ok(total)
    }

    /// Run a reconciliation pass, excluding concurrent generation for the
    /// templates in scope.
    ///
    /// A scoped pass takes that template's lock. A full pass takes every
    /// known template's lock in ascending ID order, so it cannot deadlock
    /// against another full pass.
    ///
    /// # Errors
    /// Returns an [Error::SqlError] if a storage error persists through
    /// retries.
    pub async fn reconcile(&self, scope: Option<DatabaseID>) -> Result<ReconcileReport, Error> {
        let mut guards = Vec::new();

        match scope {
            Some(template_id) => {
                guards.push(self.lock_for(template_id).lock_owned().await);
            }
            None => {
                let mut ids = self.templates.ids()?;
                ids.sort_unstable();
                for template_id in ids {
                    guards.push(self.lock_for(template_id).lock_owned().await);
                }
            }
        }

        let templates = self.templates.clone();
        let mut occurrences = self.occurrences.clone();

        with_retry(&self.retry, move || {
            reconciler::reconcile(&templates, &mut occurrences, scope)
        })
        .await
    }
}
