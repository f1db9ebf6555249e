//! Contains traits and implementations for objects that store the domain
//! [models](crate::models).

mod occurrence;
mod template;

pub mod sqlite;

pub use occurrence::{OccurrenceQuery, OccurrenceStore, SortOrder};
pub use template::TemplateStore;
