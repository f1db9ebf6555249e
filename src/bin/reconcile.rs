use std::process::ExitCode;

use clap::Parser;
use rusqlite::Connection;
use serde::Serialize;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use cadencier::{
    Error,
    models::DatabaseID,
    reconcile, remove_orphans,
    reconciler::ReconcileReport,
    stores::sqlite::create_stores,
};

/// Remove duplicate occurrences and report occurrences whose recurring
/// template has been deleted.
///
/// Exits with status 0 when the database is consistent after the pass, and
/// status 1 when orphaned occurrences remain.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// Reconcile only the occurrences of this template.
    #[arg(long)]
    template_id: Option<DatabaseID>,

    /// Also delete occurrences whose template no longer exists.
    #[arg(long)]
    delete_orphans: bool,

    /// Print the report as JSON instead of human-readable text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Output {
    #[serde(flatten)]
    report: ReconcileReport,
    orphans_deleted: usize,
}

fn main() -> ExitCode {
    setup_logging();

    let args = Args::parse();

    let output = match run(&args) {
        Ok(output) => output,
        Err(error) => {
            tracing::error!("reconciliation failed: {error}");
            return ExitCode::from(2);
        }
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).expect("report serializes to JSON")
        );
    } else {
        println!(
            "{} duplicate group(s) found, {} row(s) deleted",
            output.report.groups_affected, output.report.rows_deleted
        );
        if output.orphans_deleted > 0 {
            println!("{} orphaned occurrence(s) deleted", output.orphans_deleted);
        }
        for id in &output.report.orphaned {
            println!("orphaned occurrence left in place: {id}");
        }
    }

    if output.report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run(args: &Args) -> Result<Output, Error> {
    let connection = Connection::open(&args.db_path)?;
    let (templates, mut occurrences) = create_stores(connection)?;

    let mut report = reconcile(&templates, &mut occurrences, args.template_id)?;

    let mut orphans_deleted = 0;
    if args.delete_orphans && !report.orphaned.is_empty() {
        orphans_deleted = remove_orphans(&templates, &mut occurrences, args.template_id)?;
        report.orphaned.clear();
    }

    Ok(Output {
        report,
        orphans_deleted,
    })
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(stderr_log.with_filter(filter))
        .init();
}
