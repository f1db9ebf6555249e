//! This file defines the `Occurrence` type, one concrete dated transaction
//! derived from a recurring template.

use serde::{Deserialize, Serialize};
use time::Date;

use crate::models::DatabaseID;

/// How an occurrence came to exist.
///
/// The reconciler uses this to break ties: a row the user has touched always
/// wins over a system-generated duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Created by the occurrence generator.
    Generated,
    /// Edited by the user after generation.
    Edited,
}

impl Origin {
    /// The value stored in the database's `origin` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Generated => "generated",
            Origin::Edited => "edited",
        }
    }

    /// Parse the database representation back into an [Origin].
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "generated" => Some(Origin::Generated),
            "edited" => Some(Origin::Edited),
            _ => None,
        }
    }
}

/// One concrete dated transaction derived from a [RecurringTemplate]
/// (crate::models::RecurringTemplate).
///
/// The amount and account are copied from the template at generation time and
/// may diverge if the row is later edited independently. For a given
/// `(template_id, due_date)` pair at most one occurrence should exist; the
/// reconciler enforces this.
///
/// IDs are allocated by an `AUTOINCREMENT` column, so a lower ID always means
/// an earlier-created row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    id: DatabaseID,
    template_id: DatabaseID,
    due_date: Date,
    amount: f64,
    account_id: DatabaseID,
    origin: Origin,
}

impl Occurrence {
    /// Create an occurrence from parts that have already been validated.
    ///
    /// Intended for store implementations mapping database rows back into the
    /// domain type.
    pub fn new_unchecked(
        id: DatabaseID,
        template_id: DatabaseID,
        due_date: Date,
        amount: f64,
        account_id: DatabaseID,
        origin: Origin,
    ) -> Self {
        Self {
            id,
            template_id,
            due_date,
            amount,
            account_id,
            origin,
        }
    }

    /// The ID of the occurrence.
    pub fn id(&self) -> DatabaseID {
        self.id
    }

    /// The template this occurrence was derived from.
    ///
    /// The referenced template may no longer exist; such occurrences are
    /// orphans and are surfaced, not deleted, by the reconciler.
    pub fn template_id(&self) -> DatabaseID {
        self.template_id
    }

    /// The date the occurrence is due.
    pub fn due_date(&self) -> Date {
        self.due_date
    }

    /// The signed amount, copied from the template at generation time.
    pub fn amount(&self) -> f64 {
        self.amount
    }

    /// The account the occurrence posts against.
    pub fn account_id(&self) -> DatabaseID {
        self.account_id
    }

    /// Whether this row is system-generated or user-edited.
    pub fn origin(&self) -> Origin {
        self.origin
    }
}
