//! The reconciler.
//!
//! Repairs the damage uncoordinated generation runs leave behind: duplicate
//! occurrences for one `(template, due date)` pair, and occurrences whose
//! parent template has been deleted. Duplicates are removed; orphans are only
//! reported, because erasing financial history is a decision the caller has
//! to make explicitly (see [remove_orphans]).

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use time::Date;

use crate::{
    Error,
    models::{DatabaseID, Occurrence, Origin},
    stores::{OccurrenceQuery, OccurrenceStore, TemplateStore},
};

/// What a reconciliation pass found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// How many `(template, due date)` groups held more than one occurrence.
    pub groups_affected: usize,
    /// How many duplicate rows were deleted.
    pub rows_deleted: usize,
    /// IDs of occurrences whose parent template no longer exists. These are
    /// left in place for the caller to decide about.
    pub orphaned: Vec<DatabaseID>,
}

impl ReconcileReport {
    /// Whether any inconsistency remains after the pass.
    ///
    /// Duplicates found by the pass have already been deleted; only orphans
    /// survive it, so they are what decides cleanliness.
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty()
    }
}

/// Remove duplicate occurrences and detect orphans.
///
/// Occurrences are grouped by `(template_id, due_date)`; in every group with
/// more than one member exactly one row is kept and the rest are deleted.
/// The keeper is the user-edited row if one exists, otherwise the
/// earliest-created (lowest ID) row. Running the pass twice with no
/// intervening writes deletes zero rows the second time.
///
/// `scope` restricts the pass to one template's occurrences; `None` scans
/// the whole store.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an unexpected SQL error. A
/// failed pass never leaves a group without its keeper: rows are deleted one
/// at a time and the keeper is never among them.
pub fn reconcile<T, O>(
    templates: &T,
    occurrences: &mut O,
    scope: Option<DatabaseID>,
) -> Result<ReconcileReport, Error>
where
    T: TemplateStore,
    O: OccurrenceStore,
{
    let rows = occurrences.get_query(OccurrenceQuery {
        template_id: scope,
        ..Default::default()
    })?;

    let mut groups: BTreeMap<(DatabaseID, Date), Vec<Occurrence>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.template_id(), row.due_date()))
            .or_default()
            .push(row);
    }

    let known_templates: HashSet<DatabaseID> = templates.ids()?.into_iter().collect();

    let mut report = ReconcileReport::default();

    for ((template_id, due_date), mut group) in groups {
        if group.len() > 1 {
            let keeper_id = keeper(&group).id();

            tracing::info!(
                "template {template_id} has {} occurrences for {due_date}, keeping {keeper_id}",
                group.len(),
            );

            report.groups_affected += 1;
            for row in &group {
                if row.id() != keeper_id {
                    occurrences.delete(row.id())?;
                    report.rows_deleted += 1;
                }
            }

            group.retain(|row| row.id() == keeper_id);
        }

        if !known_templates.contains(&template_id) {
            report.orphaned.extend(group.iter().map(Occurrence::id));
        }
    }

    report.orphaned.sort_unstable();

    Ok(report)
}

/// Delete the orphaned occurrences of templates that no longer exist.
///
/// This is the caller-decided counterpart to the detection in [reconcile]:
/// it erases history, so it never runs implicitly. Returns the number of
/// rows deleted.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an unexpected SQL error.
pub fn remove_orphans<T, O>(
    templates: &T,
    occurrences: &mut O,
    scope: Option<DatabaseID>,
) -> Result<usize, Error>
where
    T: TemplateStore,
    O: OccurrenceStore,
{
    let known_templates: HashSet<DatabaseID> = templates.ids()?.into_iter().collect();
    let rows = occurrences.get_query(OccurrenceQuery {
        template_id: scope,
        ..Default::default()
    })?;

    let mut rows_deleted = 0;
    for row in rows {
        if !known_templates.contains(&row.template_id()) {
            occurrences.delete(row.id())?;
            rows_deleted += 1;
        }
    }

    if rows_deleted > 0 {
        tracing::info!("removed {rows_deleted} orphaned occurrence(s)");
    }

    Ok(rows_deleted)
}

/// The row to keep out of a duplicate group: user edits take priority, then
/// the earliest-created row.
fn keeper(group: &[Occurrence]) -> &Occurrence {
    let edited = group
        .iter()
        .filter(|row| row.origin() == Origin::Edited)
        .min_by_key(|row| row.id());

    match edited {
        Some(row) => row,
        None => group
            .iter()
            .min_by_key(|row| row.id())
            .expect("duplicate groups are never empty"),
    }
}
