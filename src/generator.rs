//! The occurrence generator.
//!
//! Given a template and a half-open date range `[start, end)`, the generator
//! enumerates the dates on which an occurrence is due and inserts a row for
//! every due date the template does not already cover. Generation never
//! mutates existing rows, which is what makes repeated or abandoned runs
//! safe: a partial run leaves rows the `(template, due date)` check simply
//! skips on the next pass.

use std::{cmp::min, ops::Range};

use serde::Serialize;
use time::{Date, Duration, Month, Weekday};

use crate::{
    Error,
    models::{DatabaseID, RecurrenceRule, RecurringTemplate},
    stores::{OccurrenceStore, TemplateStore},
};

/// What a generation run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GenerationOutcome {
    /// How many dates were due within the requested range.
    pub dates_due: usize,
    /// How many occurrence rows were actually inserted. Less than
    /// `dates_due` when earlier runs already covered some dates.
    pub rows_inserted: usize,
}

/// Enumerate the ordered dates on which `template` is due within the
/// half-open range `[range.start, range.end)`.
///
/// The result is clipped to the template's start date and, when set, its
/// (inclusive) end date. A monthly rule anchored past the length of a target
/// month clamps to that month's last day rather than rolling into the next
/// month.
///
/// # Errors
/// Returns [Error::InvalidRecurrenceRule] if the template's rule fails
/// validation. Nothing is generated from a malformed rule.
pub fn due_dates(template: &RecurringTemplate, range: Range<Date>) -> Result<Vec<Date>, Error> {
    template.rule().validate()?;

    let mut end = range.end;
    if let Some(template_end) = template.end_date() {
        // The template end date is inclusive; the range end is not.
        let cap = template_end.next_day().unwrap_or(template_end);
        end = min(end, cap);
    }

    let lower = range.start.max(template.start_date());
    if lower >= end {
        return Ok(Vec::new());
    }

    let dates = match *template.rule() {
        RecurrenceRule::Monthly { day } => monthly_dates(day, template.start_date(), lower, end),
        RecurrenceRule::Weekly { weekday } => {
            let anchor = align_to_weekday(template.start_date(), weekday);
            stepped_dates(anchor, 7, lower, end)
        }
        RecurrenceRule::EveryDays { interval } => {
            stepped_dates(template.start_date(), i64::from(interval), lower, end)
        }
    };

    Ok(dates)
}

/// Generate occurrences for `template_id` over the half-open `range`.
///
/// For each due date not already covered by an existing occurrence of the
/// template, one row is created with amount and account copied from the
/// template as of now. Running this twice over the same range leaves the
/// store in the same state as running it once.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `template_id` does not refer to a valid template,
/// - [Error::InvalidRecurrenceRule] if the stored rule is malformed (nothing
///   is written in that case),
/// - or [Error::SqlError] if there is an unexpected SQL error.
pub fn generate<T, O>(
    templates: &T,
    occurrences: &mut O,
    template_id: DatabaseID,
    range: Range<Date>,
) -> Result<GenerationOutcome, Error>
where
    T: TemplateStore,
    O: OccurrenceStore,
{
    let template = templates.get(template_id)?;
    let due = due_dates(&template, range)?;
    let inserted = occurrences.insert_missing(&template, &due)?;

    tracing::debug!(
        "template {template_id}: {} date(s) due, {} row(s) inserted",
        due.len(),
        inserted.len()
    );

    Ok(GenerationOutcome {
        dates_due: due.len(),
        rows_inserted: inserted.len(),
    })
}

/// The due day for a monthly rule in a given month, clamped to the month's
/// last day.
fn clamp_to_month(year: i32, month: Month, day: u8) -> Date {
    let last_day = time::util::days_in_year_month(year, month);

    // `day` has been validated to 1..=31, so the clamped value is always a
    // real calendar date.
    Date::from_calendar_date(year, month, day.min(last_day))
        .expect("clamped day of month is a valid date")
}

fn monthly_dates(day: u8, start: Date, lower: Date, end: Date) -> Vec<Date> {
    let mut dates = Vec::new();
    let mut year = lower.year();
    let mut month = lower.month();

    loop {
        let due = clamp_to_month(year, month, day);
        if due >= end {
            break;
        }

        if due >= lower && due >= start {
            dates.push(due);
        }

        (year, month) = match month {
            Month::December => (year + 1, Month::January),
            other => (year, other.next()),
        };
    }

    dates
}

/// The first date on or after `start` that falls on `weekday`.
fn align_to_weekday(start: Date, weekday: Weekday) -> Date {
    let days_ahead = i64::from(
        (weekday.number_days_from_monday() + 7 - start.weekday().number_days_from_monday()) % 7,
    );

    start.saturating_add(Duration::days(days_ahead))
}

/// Dates `anchor + k * interval_days` intersected with `[lower, end)`.
fn stepped_dates(anchor: Date, interval_days: i64, lower: Date, end: Date) -> Vec<Date> {
    let step = Duration::days(interval_days);

    let mut current = if anchor >= lower {
        anchor
    } else {
        let days_behind = (lower - anchor).whole_days();
        let steps = days_behind.div_euclid(interval_days)
            + i64::from(days_behind.rem_euclid(interval_days) != 0);
        anchor.saturating_add(Duration::days(steps * interval_days))
    };

    let mut dates = Vec::new();
    while current < end {
        dates.push(current);
        match current.checked_add(step) {
            Some(next) => current = next,
            None => break,
        }
    }

    dates
}

#[cfg(test)]
mod due_date_tests {
    use time::{Date, Month, Weekday};

    use crate::{
        Error,
        models::{RecurrenceRule, RecurringTemplate},
    };

    use super::due_dates;

    fn date(year: i32, month: Month, day: u8) -> Date {
        Date::from_calendar_date(year, month, day).unwrap()
    }

    fn template(rule: RecurrenceRule, start: Date, end: Option<Date>) -> RecurringTemplate {
        RecurringTemplate::new_unchecked(
            1,
            1,
            "test".to_string(),
            8000.0,
            None,
            1,
            rule,
            start,
            end,
            start,
        )
    }

    #[test]
    fn monthly_day_31_clamps_to_last_day_of_shorter_month() {
        let template = template(
            RecurrenceRule::Monthly { day: 31 },
            date(2025, Month::January, 1),
            None,
        );

        let got = due_dates(
            &template,
            date(2025, Month::April, 1)..date(2025, Month::May, 1),
        )
        .unwrap();

        assert_eq!(got, vec![date(2025, Month::April, 30)]);
    }

    #[test]
    fn monthly_day_31_in_february() {
        let template = template(
            RecurrenceRule::Monthly { day: 31 },
            date(2023, Month::January, 1),
            None,
        );

        let non_leap = due_dates(
            &template,
            date(2023, Month::February, 1)..date(2023, Month::March, 1),
        )
        .unwrap();
        let leap = due_dates(
            &template,
            date(2024, Month::February, 1)..date(2024, Month::March, 1),
        )
        .unwrap();

        assert_eq!(non_leap, vec![date(2023, Month::February, 28)]);
        assert_eq!(leap, vec![date(2024, Month::February, 29)]);
    }

    #[test]
    fn monthly_day_15_over_two_month_window() {
        let template = template(
            RecurrenceRule::Monthly { day: 15 },
            date(2025, Month::January, 1),
            None,
        );

        let got = due_dates(
            &template,
            date(2025, Month::November, 1)..date(2026, Month::January, 1),
        )
        .unwrap();

        assert_eq!(
            got,
            vec![date(2025, Month::November, 15), date(2025, Month::December, 15)]
        );
    }

    #[test]
    fn template_end_date_clips_the_range() {
        let template = template(
            RecurrenceRule::Monthly { day: 15 },
            date(2025, Month::January, 1),
            Some(date(2025, Month::November, 30)),
        );

        let got = due_dates(
            &template,
            date(2025, Month::November, 1)..date(2026, Month::January, 1),
        )
        .unwrap();

        assert_eq!(got, vec![date(2025, Month::November, 15)]);
    }

    #[test]
    fn end_date_is_inclusive() {
        let template = template(
            RecurrenceRule::Monthly { day: 15 },
            date(2025, Month::January, 1),
            Some(date(2025, Month::November, 15)),
        );

        let got = due_dates(
            &template,
            date(2025, Month::November, 1)..date(2026, Month::January, 1),
        )
        .unwrap();

        assert_eq!(got, vec![date(2025, Month::November, 15)]);
    }

    #[test]
    fn no_dates_before_template_start() {
        let template = template(
            RecurrenceRule::Monthly { day: 15 },
            date(2025, Month::June, 20),
            None,
        );

        let got = due_dates(
            &template,
            date(2025, Month::June, 1)..date(2025, Month::August, 1),
        )
        .unwrap();

        // June's day 15 predates the template, July's does not.
        assert_eq!(got, vec![date(2025, Month::July, 15)]);
    }

    #[test]
    fn weekly_steps_seven_days_from_anchor() {
        // 2025-01-01 is a Wednesday; the first Friday on or after it is
        // 2025-01-03.
        let template = template(
            RecurrenceRule::Weekly {
                weekday: Weekday::Friday,
            },
            date(2025, Month::January, 1),
            None,
        );

        let got = due_dates(
            &template,
            date(2025, Month::January, 1)..date(2025, Month::February, 1),
        )
        .unwrap();

        assert_eq!(
            got,
            vec![
                date(2025, Month::January, 3),
                date(2025, Month::January, 10),
                date(2025, Month::January, 17),
                date(2025, Month::January, 24),
                date(2025, Month::January, 31),
            ]
        );
    }

    #[test]
    fn weekly_alignment_when_range_starts_mid_cycle() {
        let template = template(
            RecurrenceRule::Weekly {
                weekday: Weekday::Friday,
            },
            date(2025, Month::January, 1),
            None,
        );

        // The range opens between two Fridays; the stepping must stay on the
        // anchor's 7-day grid rather than re-anchoring on the range start.
        let got = due_dates(
            &template,
            date(2025, Month::January, 5)..date(2025, Month::January, 18),
        )
        .unwrap();

        assert_eq!(
            got,
            vec![date(2025, Month::January, 10), date(2025, Month::January, 17)]
        );
    }

    #[test]
    fn every_days_counts_from_start_date() {
        let template = template(
            RecurrenceRule::EveryDays { interval: 10 },
            date(2025, Month::January, 1),
            None,
        );

        let got = due_dates(
            &template,
            date(2025, Month::January, 12)..date(2025, Month::February, 2),
        )
        .unwrap();

        assert_eq!(
            got,
            vec![
                date(2025, Month::January, 21),
                date(2025, Month::January, 31),
            ]
        );
    }

    #[test]
    fn empty_range_yields_nothing() {
        let template = template(
            RecurrenceRule::Monthly { day: 1 },
            date(2025, Month::January, 1),
            None,
        );

        let start = date(2025, Month::March, 1);
        let got = due_dates(&template, start..start).unwrap();

        assert!(got.is_empty());
    }

    #[test]
    fn malformed_rule_is_a_configuration_error() {
        let template = template(
            RecurrenceRule::EveryDays { interval: 0 },
            date(2025, Month::January, 1),
            None,
        );

        let result = due_dates(
            &template,
            date(2025, Month::January, 1)..date(2025, Month::February, 1),
        );

        assert!(matches!(result, Err(Error::InvalidRecurrenceRule(_))));
    }
}
