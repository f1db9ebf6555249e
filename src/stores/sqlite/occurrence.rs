//! Implements a SQLite backed occurrence store.

use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Row, params_from_iter, types::Value};
use time::Date;

use crate::{
    Error,
    db::{CreateTable, MapRow},
    models::{DatabaseID, Occurrence, Origin, RecurringTemplate},
    stores::{
        OccurrenceStore,
        occurrence::{OccurrenceQuery, SortOrder},
    },
};

const OCCURRENCE_COLUMNS: &str = "id, template_id, due_date, amount, account_id, origin";

/// Stores occurrences in a SQLite database.
///
/// The `occurrence` table deliberately carries no foreign key to
/// `recurring_template`: deleting a template must not cascade into deleting
/// the financial history derived from it. Uniqueness of
/// `(template_id, due_date)` is likewise not a table constraint, because
/// databases migrated from older app versions contain duplicates that the
/// reconciler owns; new writes go through [OccurrenceStore::insert_missing],
/// which enforces the rule transactionally.
#[derive(Debug, Clone)]
pub struct SQLiteOccurrenceStore {
    connection: Arc<Mutex<Connection>>,
}

impl SQLiteOccurrenceStore {
    /// Create a new store for the SQLite `connection`.
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    /// Insert a row without the `(template_id, due_date)` check, recreating
    /// the duplicates found in databases from old app versions.
    #[cfg(test)]
    pub(crate) fn raw_insert_for_test(
        &mut self,
        template_id: DatabaseID,
        due_date: Date,
        amount: f64,
        account_id: DatabaseID,
        origin: Origin,
    ) -> Result<DatabaseID, Error> {
        let id = self.connection.lock().unwrap().query_row(
            "INSERT INTO occurrence (template_id, due_date, amount, account_id, origin)
             VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
            (template_id, due_date, amount, account_id, origin.as_str()),
            |row| row.get(0),
        )?;

        Ok(id)
    }
}

impl OccurrenceStore for SQLiteOccurrenceStore {
    /// Insert one occurrence per due date that the template does not already
    /// cover.
    ///
    /// The whole batch runs inside a single database transaction, so a
    /// concurrent run for the same template sees either none or all of the
    /// inserts and the `(template_id, due_date)` check cannot race.
    ///
    /// # Errors
    /// Returns an [Error::SqlError] if there is an unexpected SQL error.
    fn insert_missing(
        &mut self,
        template: &RecurringTemplate,
        due_dates: &[Date],
    ) -> Result<Vec<Occurrence>, Error> {
        let connection = self.connection.lock().unwrap();

        let tx = connection.unchecked_transaction()?;
        let mut inserted = Vec::new();

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO occurrence (template_id, due_date, amount, account_id, origin)
                 SELECT ?1, ?2, ?3, ?4, ?5
                 WHERE NOT EXISTS (
                    SELECT 1 FROM occurrence WHERE template_id = ?1 AND due_date = ?2
                 )
                 RETURNING {OCCURRENCE_COLUMNS}"
            ))?;

            for due_date in due_dates {
                let maybe_occurrence = stmt.query_row(
                    (
                        template.id(),
                        due_date,
                        template.amount(),
                        template.account_id(),
                        Origin::Generated.as_str(),
                    ),
                    Self::map_row,
                );

                match maybe_occurrence {
                    Ok(occurrence) => inserted.push(occurrence),
                    // No row returned means the date was already covered.
                    Err(rusqlite::Error::QueryReturnedNoRows) => {}
                    Err(error) => return Err(error.into()),
                }
            }
        }

        tx.commit()?;

        Ok(inserted)
    }

    /// Retrieve an occurrence in the database by its `id`.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::NotFound] if `id` does not refer to a valid occurrence,
    /// - or [Error::SqlError] if there is some other SQL error.
    fn get(&self, id: DatabaseID) -> Result<Occurrence, Error> {
        let occurrence = self
            .connection
            .lock()
            .unwrap()
            .prepare(&format!(
                "SELECT {OCCURRENCE_COLUMNS} FROM occurrence WHERE id = :id"
            ))?
            .query_row(&[(":id", &id)], Self::map_row)?;

        Ok(occurrence)
    }

    /// Query for occurrences in the database.
    ///
    /// # Errors
    /// This function will return an [Error::SqlError] if there is an SQL
    /// error.
    fn get_query(&self, filter: OccurrenceQuery) -> Result<Vec<Occurrence>, Error> {
        let mut query_string_parts =
            vec![format!("SELECT {OCCURRENCE_COLUMNS} FROM occurrence")];
        let mut where_clause_parts = vec![];
        let mut query_parameters = vec![];

        if let Some(template_id) = filter.template_id {
            where_clause_parts.push(format!("template_id = ?{}", query_parameters.len() + 1));
            query_parameters.push(Value::Integer(template_id));
        }

        if let Some(date_range) = filter.date_range {
            where_clause_parts.push(format!(
                "due_date BETWEEN ?{} AND ?{}",
                query_parameters.len() + 1,
                query_parameters.len() + 2,
            ));
            query_parameters.push(Value::Text(date_range.start().to_string()));
            query_parameters.push(Value::Text(date_range.end().to_string()));
        }

        if !where_clause_parts.is_empty() {
            query_string_parts.push(String::from("WHERE ") + &where_clause_parts.join(" AND "));
        }

        match filter.sort_date {
            Some(SortOrder::Ascending) => {
                query_string_parts.push("ORDER BY due_date ASC".to_string())
            }
            Some(SortOrder::Descending) => {
                query_string_parts.push("ORDER BY due_date DESC".to_string())
            }
            None => {}
        }

        let query_string = query_string_parts.join(" ");
        let params = params_from_iter(query_parameters.iter());

        self.connection
            .lock()
            .unwrap()
            .prepare(&query_string)?
            .query_map(params, Self::map_row)?
            .map(|maybe_occurrence| maybe_occurrence.map_err(Error::SqlError))
            .collect()
    }

    /// Overwrite an occurrence's amount and mark it as user-edited.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::NotFound] if `id` does not refer to a valid occurrence,
    /// - or [Error::SqlError] if there is some other SQL error.
    fn mark_edited(&mut self, id: DatabaseID, amount: f64) -> Result<Occurrence, Error> {
        let occurrence = self
            .connection
            .lock()
            .unwrap()
            .prepare(&format!(
                "UPDATE occurrence SET amount = ?1, origin = ?2 WHERE id = ?3
                 RETURNING {OCCURRENCE_COLUMNS}"
            ))?
            .query_row((amount, Origin::Edited.as_str(), id), Self::map_row)?;

        Ok(occurrence)
    }

    /// Delete an occurrence by its `id`.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::DeleteMissingOccurrence] if `id` does not refer to a valid
    ///   occurrence,
    /// - or [Error::SqlError] if there is some other SQL error.
    fn delete(&mut self, id: DatabaseID) -> Result<(), Error> {
        let rows_deleted = self
            .connection
            .lock()
            .unwrap()
            .execute("DELETE FROM occurrence WHERE id = ?1", (id,))?;

        if rows_deleted == 0 {
            return Err(Error::DeleteMissingOccurrence);
        }

        Ok(())
    }

    /// Get the total number of occurrences in the database.
    ///
    /// # Errors
    /// This function will return an [Error::SqlError] if there is some SQL
    /// error.
    fn count(&self) -> Result<usize, Error> {
        self.connection
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(id) FROM occurrence;", [], |row| {
                row.get::<_, i64>(0).map(|count| count as usize)
            })
            .map_err(|error| error.into())
    }
}

impl CreateTable for SQLiteOccurrenceStore {
    fn create_table(connection: &Connection) -> Result<(), rusqlite::Error> {
        connection.execute(
            "CREATE TABLE IF NOT EXISTS occurrence (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    template_id INTEGER NOT NULL,
                    due_date TEXT NOT NULL,
                    amount REAL NOT NULL,
                    account_id INTEGER NOT NULL,
                    origin TEXT NOT NULL DEFAULT 'generated'
                    )",
            (),
        )?;

        // Ensure the sequence starts at 1
        connection.execute(
            "INSERT OR IGNORE INTO sqlite_sequence (name, seq) VALUES ('occurrence', 0)",
            (),
        )?;

        Ok(())
    }
}

impl MapRow for SQLiteOccurrenceStore {
    type ReturnType = Occurrence;

    fn map_row_with_offset(row: &Row, offset: usize) -> Result<Self::ReturnType, rusqlite::Error> {
        let id = row.get(offset)?;
        let template_id = row.get(offset + 1)?;
        let due_date = row.get(offset + 2)?;
        let amount = row.get(offset + 3)?;
        let account_id = row.get(offset + 4)?;

        let raw_origin: String = row.get(offset + 5)?;
        let origin = Origin::from_str(&raw_origin).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                offset + 5,
                rusqlite::types::Type::Text,
                format!("unknown occurrence origin {raw_origin:?}").into(),
            )
        })?;

        Ok(Occurrence::new_unchecked(
            id,
            template_id,
            due_date,
            amount,
            account_id,
            origin,
        ))
    }
}
