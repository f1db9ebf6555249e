//! Defines the template store trait.

use time::Date;

use crate::{
    Error,
    models::{DatabaseID, RecurringTemplate, TemplateBuilder, TemplateUpdate},
};

/// Handles the creation and retrieval of recurring templates.
///
/// This is a persistence boundary: referential integrity of the opaque
/// account and category references is deferred to the services that own them.
pub trait TemplateStore {
    /// Validate `builder` and create a new template in the store.
    ///
    /// # Errors
    /// Returns [Error::InvalidRecurrenceRule] or
    /// [Error::EndDateBeforeStartDate] if the builder fails validation, or
    /// [Error::SqlError] if there is an unexpected SQL error.
    fn create(&mut self, builder: TemplateBuilder) -> Result<RecurringTemplate, Error>;

    /// Retrieve a template from the store.
    ///
    /// # Errors
    /// Returns [Error::NotFound] if `id` does not refer to a template.
    fn get(&self, id: DatabaseID) -> Result<RecurringTemplate, Error>;

    /// Retrieve the templates whose end date has not passed as of `as_of`.
    fn list_active(&self, as_of: Date) -> Result<Vec<RecurringTemplate>, Error>;

    /// The IDs of every template in the store.
    ///
    /// Used by the reconciler to decide which occurrences are orphaned.
    fn ids(&self) -> Result<Vec<DatabaseID>, Error>;

    /// Apply a partial update to a template.
    ///
    /// Amount and account changes are propagated to the template's
    /// system-generated occurrences dated strictly after `as_of`. Occurrences
    /// on or before `as_of`, and rows the user has edited, are never
    /// rewritten.
    ///
    /// # Errors
    /// Returns [Error::UpdateMissingTemplate] if `id` does not refer to a
    /// template.
    fn update(
        &mut self,
        id: DatabaseID,
        update: TemplateUpdate,
        as_of: Date,
    ) -> Result<RecurringTemplate, Error>;

    /// Delete a template.
    ///
    /// Existing occurrences are left in place as financial history; only
    /// future generation stops. The rows become orphans that the reconciler
    /// reports.
    ///
    /// # Errors
    /// Returns [Error::DeleteMissingTemplate] if `id` does not refer to a
    /// template.
    fn delete(&mut self, id: DatabaseID) -> Result<(), Error>;
}
