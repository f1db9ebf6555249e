//! Defines the occurrence store trait.

use std::ops::RangeInclusive;

use time::Date;

use crate::{
    Error,
    models::{DatabaseID, Occurrence, RecurringTemplate},
};

/// Handles the creation and retrieval of occurrences.
pub trait OccurrenceStore {
    /// Insert one occurrence per date in `due_dates` that is not already
    /// covered by an occurrence of `template`, copying amount and account
    /// from the template. Returns the newly inserted rows.
    ///
    /// The check-before-insert must be atomic with respect to other calls for
    /// the same template: implementers run the whole batch inside a single
    /// database transaction. Existing rows are never mutated.
    fn insert_missing(
        &mut self,
        template: &RecurringTemplate,
        due_dates: &[Date],
    ) -> Result<Vec<Occurrence>, Error>;

    /// Retrieve an occurrence from the store.
    ///
    /// # Errors
    /// Returns [Error::NotFound] if `id` does not refer to an occurrence.
    fn get(&self, id: DatabaseID) -> Result<Occurrence, Error>;

    /// Retrieve occurrences from the store in the way defined by `query`.
    fn get_query(&self, query: OccurrenceQuery) -> Result<Vec<Occurrence>, Error>;

    /// Overwrite an occurrence's amount and mark it as user-edited.
    ///
    /// Edited rows are immutable to template updates and win duplicate
    /// tie-breaks during reconciliation.
    ///
    /// # Errors
    /// Returns [Error::NotFound] if `id` does not refer to an occurrence.
    fn mark_edited(&mut self, id: DatabaseID, amount: f64) -> Result<Occurrence, Error>;

    /// Delete an occurrence.
    ///
    /// # Errors
    /// Returns [Error::DeleteMissingOccurrence] if `id` does not refer to an
    /// occurrence.
    fn delete(&mut self, id: DatabaseID) -> Result<(), Error>;

    /// The total number of occurrences in the store.
    fn count(&self) -> Result<usize, Error>;
}

/// Defines how occurrences should be fetched from
/// [OccurrenceStore::get_query].
#[derive(Debug, Default)]
pub struct OccurrenceQuery {
    /// Include only occurrences owned by this template.
    pub template_id: Option<DatabaseID>,
    /// Include occurrences with a due date within `date_range` (inclusive).
    pub date_range: Option<RangeInclusive<Date>>,
    /// Orders occurrences by due date. None returns occurrences in the order
    /// they are stored.
    pub sort_date: Option<SortOrder>,
}

/// The order to sort occurrences in an [OccurrenceQuery].
#[derive(Debug)]
pub enum SortOrder {
    /// Sort in order of increasing value.
    Ascending,
    /// Sort in order of decreasing value.
    Descending,
}
