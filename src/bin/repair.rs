use std::process::ExitCode;

use clap::Parser;
use rusqlite::Connection;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use cadencier::repair::{StepStatus, run_repair};

/// Run the full maintenance pipeline against a database: recreate missing
/// tables, remove duplicate occurrences and flag orphaned ones.
///
/// Exits with status 0 when every step passed cleanly, status 1 when a step
/// found damage it is not allowed to fix (orphans), and status 2 when a
/// step failed outright.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// Print the report as JSON instead of human-readable text.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    setup_logging();

    let args = Args::parse();

    let connection = match Connection::open(&args.db_path) {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not open {}: {error}", args.db_path);
            return ExitCode::from(2);
        }
    };

    let report = run_repair(connection);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).expect("report serializes to JSON")
        );
    } else {
        for step in &report.steps {
            match &step.status {
                StepStatus::Ok => {
                    println!("{}: ok ({} row(s) affected)", step.name, step.rows_affected)
                }
                StepStatus::Degraded(detail) => println!("{}: degraded, {detail}", step.name),
                StepStatus::Failed(detail) => println!("{}: FAILED, {detail}", step.name),
            }
        }
    }

    if !report.succeeded() {
        ExitCode::from(2)
    } else if !report.is_clean() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
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
