//! This module defines the domain data types.

pub use occurrence::{Occurrence, Origin};
pub use template::{RecurrenceRule, RecurringTemplate, TemplateBuilder, TemplateUpdate};

mod occurrence;
mod template;

/// Alias for the integer type used for mapping to database IDs.
pub type DatabaseID = i64;
