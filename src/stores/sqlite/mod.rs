//! SQLite-backed implementations of the store traits.

pub mod occurrence;
pub mod template;

pub use occurrence::SQLiteOccurrenceStore;
pub use template::SQLiteTemplateStore;

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::{Error, db::initialize};

/// Creates the SQLite store pair over a shared connection.
///
/// This function will modify the database by adding the tables for the domain
/// models if they do not exist. Both stores share one connection behind a
/// mutex, which is what gives concurrent generation runs for different
/// templates serial, per-row consistency.
pub fn create_stores(
    connection: Connection,
) -> Result<(SQLiteTemplateStore, SQLiteOccurrenceStore), Error> {
    initialize(&connection)?;

    let connection = Arc::new(Mutex::new(connection));
    let template_store = SQLiteTemplateStore::new(connection.clone());
    let occurrence_store = SQLiteOccurrenceStore::new(connection);

    Ok((template_store, occurrence_store))
}
