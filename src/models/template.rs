//! This file defines the `RecurringTemplate` type, the definition of a
//! repeating financial obligation, and the recurrence rule it is pinned to.

use serde::{Deserialize, Serialize};
use time::{Date, Weekday};

use crate::{Error, models::DatabaseID};

/// When and how often a template produces occurrences.
///
/// The rule is anchored by the template's start date: a weekly rule fires on
/// the first matching weekday on or after the start date and every 7 days
/// after that, a day-interval rule counts whole days from the start date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frequency", rename_all = "snake_case")]
pub enum RecurrenceRule {
    /// Fires once a month on `day`.
    ///
    /// In months with fewer days than `day`, the occurrence is clamped to the
    /// last day of that month. It never rolls over into the next month.
    Monthly {
        /// The anchor day of the month, 1 through 31.
        day: u8,
    },
    /// Fires every week on `weekday`.
    Weekly {
        /// The anchor weekday.
        weekday: Weekday,
    },
    /// Fires every `interval` days, counted from the template's start date.
    EveryDays {
        /// Days between occurrences, at least 1.
        interval: u32,
    },
}

impl RecurrenceRule {
    /// Check that the rule's parameters are usable.
    ///
    /// # Errors
    /// Returns [Error::InvalidRecurrenceRule] if the day of the month is
    /// outside 1-31 or the day interval is zero.
    pub fn validate(&self) -> Result<(), Error> {
        match *self {
            RecurrenceRule::Monthly { day } if day == 0 || day > 31 => Err(
                Error::InvalidRecurrenceRule(format!("day of month must be 1-31, got {day}")),
            ),
            RecurrenceRule::EveryDays { interval } if interval == 0 => Err(
                Error::InvalidRecurrenceRule("day interval must be at least 1".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// A user-defined recurring financial obligation, e.g. a monthly salary.
///
/// Templates own the [Occurrence](crate::models::Occurrence) rows derived
/// from them, but loosely: deleting a template stops future generation and
/// leaves already-generated occurrences in place as financial history.
///
/// To create a new template, use [RecurringTemplate::build]. Amount and rule
/// changes only affect occurrences generated afterwards; rows that already
/// exist are never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringTemplate {
    id: DatabaseID,
    owner_id: DatabaseID,
    description: String,
    amount: f64,
    category_id: Option<DatabaseID>,
    account_id: DatabaseID,
    rule: RecurrenceRule,
    start_date: Date,
    end_date: Option<Date>,
    created_at: Date,
}

impl RecurringTemplate {
    /// Create a new template.
    ///
    /// Shortcut for [TemplateBuilder::new] for discoverability.
    pub fn build(
        amount: f64,
        account_id: DatabaseID,
        owner_id: DatabaseID,
        rule: RecurrenceRule,
        start_date: Date,
    ) -> TemplateBuilder {
        TemplateBuilder::new(amount, account_id, owner_id, rule, start_date)
    }

    /// Create a template from parts that have already been validated.
    ///
    /// Intended for store implementations mapping database rows back into the
    /// domain type; everyone else should go through [TemplateBuilder].
    #[allow(clippy::too_many_arguments)]
    pub fn new_unchecked(
        id: DatabaseID,
        owner_id: DatabaseID,
        description: String,
        amount: f64,
        category_id: Option<DatabaseID>,
        account_id: DatabaseID,
        rule: RecurrenceRule,
        start_date: Date,
        end_date: Option<Date>,
        created_at: Date,
    ) -> Self {
        Self {
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
        }
    }

    /// The ID of the template.
    pub fn id(&self) -> DatabaseID {
        self.id
    }

    /// The ID of the user that owns this template.
    pub fn owner_id(&self) -> DatabaseID {
        self.owner_id
    }

    /// A text description of the obligation.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The signed amount copied onto each generated occurrence.
    pub fn amount(&self) -> f64 {
        self.amount
    }

    /// An opaque reference to the category service, if set.
    pub fn category_id(&self) -> Option<DatabaseID> {
        self.category_id
    }

    /// An opaque reference to the account the occurrences post against.
    pub fn account_id(&self) -> DatabaseID {
        self.account_id
    }

    /// The recurrence rule.
    pub fn rule(&self) -> &RecurrenceRule {
        &self.rule
    }

    /// The date the obligation starts; no occurrence is due before it.
    pub fn start_date(&self) -> Date {
        self.start_date
    }

    /// The date the obligation ends (inclusive), if it ends at all.
    pub fn end_date(&self) -> Option<Date> {
        self.end_date
    }

    /// The date the template was created.
    pub fn created_at(&self) -> Date {
        self.created_at
    }

    /// Whether the template still produces occurrences as of `date`.
    pub fn is_active(&self, date: Date) -> bool {
        match self.end_date {
            Some(end) => end >= date,
            None => true,
        }
    }
}

/// Builder for creating a new [RecurringTemplate].
///
/// Finalize the builder by passing it to
/// [TemplateStore::create](crate::stores::TemplateStore::create).
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateBuilder {
    /// The signed amount copied onto each generated occurrence.
    pub amount: f64,
    /// The account the occurrences post against.
    pub account_id: DatabaseID,
    /// The user that owns the template.
    pub owner_id: DatabaseID,
    /// The recurrence rule.
    pub rule: RecurrenceRule,
    /// The date the obligation starts.
    pub start_date: Date,
    /// A text description of the obligation.
    pub description: String,
    /// An opaque category reference.
    pub category_id: Option<DatabaseID>,
    /// The date the obligation ends (inclusive).
    pub end_date: Option<Date>,
}

impl TemplateBuilder {
    /// Create a builder for a template with the required fields set.
    pub fn new(
        amount: f64,
        account_id: DatabaseID,
        owner_id: DatabaseID,
        rule: RecurrenceRule,
        start_date: Date,
    ) -> Self {
        Self {
            amount,
            account_id,
            owner_id,
            rule,
            start_date,
            description: String::new(),
            category_id: None,
            end_date: None,
        }
    }

    /// Set the description for the template.
    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Set the category for the template.
    pub fn category(mut self, category_id: Option<DatabaseID>) -> Self {
        self.category_id = category_id;
        self
    }

    /// Set the end date (inclusive) for the template.
    pub fn end_date(mut self, end_date: Date) -> Self {
        self.end_date = Some(end_date);
        self
    }

    /// Check that the builder describes a well-formed template.
    ///
    /// # Errors
    /// Returns [Error::InvalidRecurrenceRule] for an unusable rule and
    /// [Error::EndDateBeforeStartDate] if the end date precedes the start
    /// date.
    pub fn validate(&self) -> Result<(), Error> {
        self.rule.validate()?;

        if let Some(end_date) = self.end_date
            && end_date < self.start_date
        {
            return Err(Error::EndDateBeforeStartDate(end_date, self.start_date));
        }

        Ok(())
    }
}

/// A partial update to an existing template.
///
/// Fields left as `None` are unchanged. Updates apply to the template and to
/// its future-dated, system-generated occurrences only; past occurrences and
/// user-edited rows are immutable history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateUpdate {
    /// Replace the template amount.
    pub amount: Option<f64>,
    /// Replace the description.
    pub description: Option<String>,
    /// Replace the account reference.
    pub account_id: Option<DatabaseID>,
    /// Replace the end date. `Some(None)` clears it.
    pub end_date: Option<Option<Date>>,
}

impl TemplateUpdate {
    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.amount.is_none()
            && self.description.is_none()
            && self.account_id.is_none()
            && self.end_date.is_none()
    }
}
