//! Implements a SQLite backed template store.

use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Row};
use time::{Date, OffsetDateTime};

use crate::{
    Error,
    db::{CreateTable, MapRow},
    models::{DatabaseID, RecurrenceRule, RecurringTemplate, TemplateBuilder, TemplateUpdate},
    stores::TemplateStore,
};

const TEMPLATE_COLUMNS: &str =
    "id, owner_id, description, amount, category_id, account_id, rule, start_date, end_date, created_at";

/// Stores recurring templates in a SQLite database.
#[derive(Debug, Clone)]
pub struct SQLiteTemplateStore {
    connection: Arc<Mutex<Connection>>,
}

impl SQLiteTemplateStore {
    /// Create a new store for the SQLite `connection`.
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }
}

impl TemplateStore for SQLiteTemplateStore {
    /// Create a new template in the database.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::InvalidRecurrenceRule] or [Error::EndDateBeforeStartDate] if
    ///   the builder fails validation,
    /// - or [Error::SqlError] if there is some other SQL error.
    fn create(&mut self, builder: TemplateBuilder) -> Result<RecurringTemplate, Error> {
        builder.validate()?;

        let rule_json = serde_json::to_string(&builder.rule)
            .map_err(|error| Error::InvalidRecurrenceRule(error.to_string()))?;
        let created_at = OffsetDateTime::now_utc().date();

        let template = self
            .connection
            .lock()
            .unwrap()
            .prepare(&format!(
                "INSERT INTO recurring_template
                    (owner_id, description, amount, category_id, account_id, rule, start_date, end_date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 RETURNING {TEMPLATE_COLUMNS}"
            ))?
            .query_row(
                (
                    builder.owner_id,
                    &builder.description,
                    builder.amount,
                    builder.category_id,
                    builder.account_id,
                    &rule_json,
                    builder.start_date,
                    builder.end_date,
                    created_at,
                ),
                Self::map_row,
            )?;

        Ok(template)
    }

    /// Retrieve a template in the database by its `id`.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::NotFound] if `id` does not refer to a valid template,
    /// - or [Error::SqlError] if there is some other SQL error.
    fn get(&self, id: DatabaseID) -> Result<RecurringTemplate, Error> {
        let template = self
            .connection
            .lock()
            .unwrap()
            .prepare(&format!(
                "SELECT {TEMPLATE_COLUMNS} FROM recurring_template WHERE id = :id"
            ))?
            .query_row(&[(":id", &id)], Self::map_row)?;

        Ok(template)
    }

    /// Retrieve the templates whose end date is unset or on/after `as_of`.
    ///
    /// # Errors
    /// This function will return an [Error::SqlError] if there is an SQL
    /// error.
    fn list_active(&self, as_of: Date) -> Result<Vec<RecurringTemplate>, Error> {
        self.connection
            .lock()
            .unwrap()
            .prepare(&format!(
                "SELECT {TEMPLATE_COLUMNS} FROM recurring_template
                 WHERE end_date IS NULL OR end_date >= :as_of
                 ORDER BY id ASC"
            ))?
            .query_map(&[(":as_of", &as_of)], Self::map_row)?
            .map(|maybe_template| maybe_template.map_err(Error::SqlError))
            .collect()
    }

    fn ids(&self) -> Result<Vec<DatabaseID>, Error> {
        self.connection
            .lock()
            .unwrap()
            .prepare("SELECT id FROM recurring_template ORDER BY id ASC")?
            .query_map([], |row| row.get(0))?
            .map(|maybe_id| maybe_id.map_err(Error::SqlError))
            .collect()
    }

    /// Apply a partial update to a template.
    ///
    /// Amount and account changes are written through to the template's
    /// system-generated occurrences dated strictly after `as_of`; rows on or
    /// before `as_of` and user-edited rows are left untouched. Both writes
    /// happen in one database transaction.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::UpdateMissingTemplate] if `id` does not refer to a valid
    ///   template,
    /// - [Error::EndDateBeforeStartDate] if the new end date precedes the
    ///   template's start date,
    /// - or [Error::SqlError] if there is some other SQL error.
    fn update(
        &mut self,
        id: DatabaseID,
        update: TemplateUpdate,
        as_of: Date,
    ) -> Result<RecurringTemplate, Error> {
        let connection = self.connection.lock().unwrap();
        let tx = connection.unchecked_transaction()?;

        let existing = tx
            .prepare(&format!(
                "SELECT {TEMPLATE_COLUMNS} FROM recurring_template WHERE id = :id"
            ))?
            .query_row(&[(":id", &id)], Self::map_row)
            .map_err(|error| match error {
                rusqlite::Error::QueryReturnedNoRows => Error::UpdateMissingTemplate,
                error => error.into(),
            })?;

        let amount = update.amount.unwrap_or(existing.amount());
        let description = update
            .description
            .unwrap_or_else(|| existing.description().to_string());
        let account_id = update.account_id.unwrap_or(existing.account_id());
        let end_date = match update.end_date {
            Some(end_date) => end_date,
            None => existing.end_date(),
        };

        if let Some(end_date) = end_date
            && end_date < existing.start_date()
        {
            return Err(Error::EndDateBeforeStartDate(
                end_date,
                existing.start_date(),
            ));
        }

        tx.execute(
            "UPDATE recurring_template
             SET amount = ?1, description = ?2, account_id = ?3, end_date = ?4
             WHERE id = ?5",
            (amount, &description, account_id, end_date, id),
        )?;

        if update.amount.is_some() || update.account_id.is_some() {
            let rows = tx.execute(
                "UPDATE occurrence SET amount = ?1, account_id = ?2
                 WHERE template_id = ?3 AND due_date > ?4 AND origin = 'generated'",
                (amount, account_id, id, as_of),
            )?;
            tracing::debug!("template {id} update propagated to {rows} future occurrence(s)");
        }

        tx.commit()?;

        Ok(RecurringTemplate::new_unchecked(
            existing.id(),
            existing.owner_id(),
            description,
            amount,
            existing.category_id(),
            account_id,
            *existing.rule(),
            existing.start_date(),
            end_date,
            existing.created_at(),
        ))
    }

    /// Delete a template, leaving its occurrences in place.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::DeleteMissingTemplate] if `id` does not refer to a valid
    ///   template,
    /// - or [Error::SqlError] if there is some other SQL error.
    fn delete(&mut self, id: DatabaseID) -> Result<(), Error> {
        let rows_deleted = self
            .connection
            .lock()
            .unwrap()
            .execute("DELETE FROM recurring_template WHERE id = ?1", (id,))?;

        if rows_deleted == 0 {
            return Err(Error::DeleteMissingTemplate);
        }

        Ok(())
    }
}

impl CreateTable for SQLiteTemplateStore {
    fn create_table(connection: &Connection) -> Result<(), rusqlite::Error> {
        connection.execute(
            "CREATE TABLE IF NOT EXISTS recurring_template (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id INTEGER NOT NULL,
                    description TEXT NOT NULL,
                    amount REAL NOT NULL,
                    category_id INTEGER,
                    account_id INTEGER NOT NULL,
                    rule TEXT NOT NULL,
                    start_date TEXT NOT NULL,
                    end_date TEXT,
                    created_at TEXT NOT NULL
                    )",
            (),
        )?;

        // Ensure the sequence starts at 1
        connection.execute(
            "INSERT OR IGNORE INTO sqlite_sequence (name, seq) VALUES ('recurring_template', 0)",
            (),
        )?;

        Ok(())
    }
}

impl MapRow for SQLiteTemplateStore {
    type ReturnType = RecurringTemplate;

    fn map_row_with_offset(row: &Row, offset: usize) -> Result<Self::ReturnType, rusqlite::Error> {
        let id = row.get(offset)?;
        let owner_id = row.get(offset + 1)?;
        let description = row.get(offset + 2)?;
        let amount = row.get(offset + 3)?;
        let category_id = row.get(offset + 4)?;
        let account_id = row.get(offset + 5)?;

        let rule_json: String = row.get(offset + 6)?;
        let rule: RecurrenceRule = serde_json::from_str(&rule_json).map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                offset + 6,
                rusqlite::types::Type::Text,
                Box::new(error),
            )
        })?;

        let start_date = row.get(offset + 7)?;
        let end_date = row.get(offset + 8)?;
        let created_at = row.get(offset + 9)?;

        Ok(RecurringTemplate::new_unchecked(
            id,
            owner_id,
            description,
            amount,
            category_id,
            account_id,
            rule,
            start_date,
            end_date,
            created_at,
        ))
    }
}

#[cfg(test)]
mod sqlite_template_store_tests {
    use rusqlite::Connection;
    use time::{Date, Month};

    use crate::{
        Error,
        models::{Origin, RecurrenceRule, RecurringTemplate, TemplateUpdate},
        stores::{
            OccurrenceQuery, OccurrenceStore, TemplateStore,
            sqlite::{SQLiteOccurrenceStore, SQLiteTemplateStore, create_stores},
        },
    };

    fn get_stores() -> (SQLiteTemplateStore, SQLiteOccurrenceStore) {
        let conn = Connection::open_in_memory().unwrap();
        create_stores(conn).unwrap()
    }

    fn date(year: i32, month: Month, day: u8) -> Date {
        Date::from_calendar_date(year, month, day).unwrap()
    }

    #[test]
    fn create_succeeds() {
        let (mut store, _) = get_stores();

        let template = store
            .create(
                RecurringTemplate::build(
                    -1200.0,
                    1,
                    1,
                    RecurrenceRule::Monthly { day: 1 },
                    date(2025, Month::January, 1),
                )
                .description("Rent"),
            )
            .unwrap();

        assert!(template.id() > 0);
        assert_eq!(template.amount(), -1200.0);
        assert_eq!(template.description(), "Rent");
        assert_eq!(template.rule(), &RecurrenceRule::Monthly { day: 1 });
        assert_eq!(template.end_date(), None);
    }

    #[test]
    fn create_fails_on_invalid_rule() {
        let (mut store, _) = get_stores();

        let result = store.create(RecurringTemplate::build(
            10.0,
            1,
            1,
            RecurrenceRule::Monthly { day: 0 },
            date(2025, Month::January, 1),
        ));

        assert!(matches!(result, Err(Error::InvalidRecurrenceRule(_))));
    }

    #[test]
    fn get_round_trips_rule() {
        let (mut store, _) = get_stores();
        let inserted = store
            .create(
                RecurringTemplate::build(
                    8000.0,
                    2,
                    1,
                    RecurrenceRule::EveryDays { interval: 14 },
                    date(2025, Month::March, 3),
                )
                .end_date(date(2025, Month::December, 31)),
            )
            .unwrap();

        let selected = store.get(inserted.id()).unwrap();

        assert_eq!(inserted, selected);
    }

    #[test]
    fn get_fails_on_invalid_id() {
        let (store, _) = get_stores();

        let result = store.get(1337);

        assert_eq!(result, Err(Error::NotFound));
    }

    #[test]
    fn list_active_excludes_ended_templates() {
        let (mut store, _) = get_stores();
        let active = store
            .create(RecurringTemplate::build(
                10.0,
                1,
                1,
                RecurrenceRule::Monthly { day: 5 },
                date(2025, Month::January, 1),
            ))
            .unwrap();
        let open_ended = store
            .create(RecurringTemplate::build(
                20.0,
                1,
                1,
                RecurrenceRule::Monthly { day: 6 },
                date(2025, Month::January, 1),
            ))
            .unwrap();
        store
            .create(
                RecurringTemplate::build(
                    30.0,
                    1,
                    1,
                    RecurrenceRule::Monthly { day: 7 },
                    date(2025, Month::January, 1),
                )
                .end_date(date(2025, Month::May, 31)),
            )
            .unwrap();

        let got = store.list_active(date(2025, Month::June, 1)).unwrap();

        let got_ids: Vec<_> = got.iter().map(|template| template.id()).collect();
        assert_eq!(got_ids, vec![active.id(), open_ended.id()]);
    }

    #[test]
    fn update_rewrites_future_generated_occurrences_only() {
        let (mut templates, mut occurrences) = get_stores();
        let template = templates
            .create(RecurringTemplate::build(
                100.0,
                1,
                1,
                RecurrenceRule::Monthly { day: 15 },
                date(2025, Month::January, 1),
            ))
            .unwrap();
        let inserted = occurrences
            .insert_missing(
                &template,
                &[
                    date(2025, Month::May, 15),
                    date(2025, Month::June, 15),
                    date(2025, Month::July, 15),
                ],
            )
            .unwrap();
        // A user-edited row in the future must also survive the update.
        occurrences.mark_edited(inserted[2].id(), 42.0).unwrap();

        let updated = templates
            .update(
                template.id(),
                TemplateUpdate {
                    amount: Some(250.0),
                    ..Default::default()
                },
                date(2025, Month::June, 1),
            )
            .unwrap();

        assert_eq!(updated.amount(), 250.0);

        let rows = occurrences
            .get_query(OccurrenceQuery {
                template_id: Some(template.id()),
                ..Default::default()
            })
            .unwrap();
        let by_date: Vec<(Date, f64, Origin)> = rows
            .iter()
            .map(|row| (row.due_date(), row.amount(), row.origin()))
            .collect();

        assert!(
            by_date.contains(&(date(2025, Month::May, 15), 100.0, Origin::Generated)),
            "past occurrence was rewritten: {by_date:?}"
        );
        assert!(
            by_date.contains(&(date(2025, Month::June, 15), 250.0, Origin::Generated)),
            "future generated occurrence was not updated: {by_date:?}"
        );
        assert!(
            by_date.contains(&(date(2025, Month::July, 15), 42.0, Origin::Edited)),
            "user-edited occurrence was rewritten: {by_date:?}"
        );
    }

    #[test]
    fn update_fails_on_missing_template() {
        let (mut store, _) = get_stores();

        let result = store.update(
            999,
            TemplateUpdate {
                amount: Some(1.0),
                ..Default::default()
            },
            date(2025, Month::June, 1),
        );

        assert_eq!(result, Err(Error::UpdateMissingTemplate));
    }

    #[test]
    fn update_rejects_end_date_before_start() {
        let (mut store, _) = get_stores();
        let template = store
            .create(RecurringTemplate::build(
                10.0,
                1,
                1,
                RecurrenceRule::Monthly { day: 1 },
                date(2025, Month::June, 1),
            ))
            .unwrap();

        let result = store.update(
            template.id(),
            TemplateUpdate {
                end_date: Some(Some(date(2025, Month::January, 1))),
                ..Default::default()
            },
            date(2025, Month::June, 1),
        );

        assert_eq!(
            result,
            Err(Error::EndDateBeforeStartDate(
                date(2025, Month::January, 1),
                date(2025, Month::June, 1)
            ))
        );
    }

    #[test]
    fn delete_leaves_occurrences_behind() {
        let (mut templates, mut occurrences) = get_stores();
        let template = templates
            .create(RecurringTemplate::build(
                10.0,
                1,
                1,
                RecurrenceRule::Monthly { day: 1 },
                date(2025, Month::January, 1),
            ))
            .unwrap();
        occurrences
            .insert_missing(&template, &[date(2025, Month::February, 1)])
            .unwrap();

        templates.delete(template.id()).unwrap();

        assert_eq!(templates.get(template.id()), Err(Error::NotFound));
        assert_eq!(occurrences.count().unwrap(), 1);
    }

    #[test]
    fn delete_fails_on_missing_template() {
        let (mut store, _) = get_stores();

        let result = store.delete(404);

        assert_eq!(result, Err(Error::DeleteMissingTemplate));
    }
}
