#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for testing and running a mailbox migration

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use mailbox_migrator::{
    Action, CancellationToken, DEFAULT_CHUNK_SIZE, Folder, MigrationRequest, MigrationResponse,
    Migrator, SqliteStore,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mail-migrate")]
#[command(about = "Copy messages from an IMAP mailbox into a local database")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and list the available folders
    Test,

    /// Migrate messages
    Migrate {
        /// Folder to migrate (repeatable, default INBOX)
        #[arg(long = "folder")]
        folders: Vec<String>,

        /// Only messages on or after this date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        since: Option<NaiveDate>,

        /// Only messages on or before this date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        until: Option<NaiveDate>,

        /// Stop after this many messages
        #[arg(long)]
        max: Option<usize>,

        /// Messages fetched per round trip
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Database URL, e.g. sqlite://migrated.db
        #[arg(long, env = "MIGRATION_DATABASE_URL")]
        database: Option<String>,
    },
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("Invalid date '{s}': {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Loaded before parsing so MIGRATION_DATABASE_URL can come from .env.
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let response = match &args.command {
        Command::Test => cmd_test().await,
        Command::Migrate {
            folders,
            since,
            until,
            max,
            chunk_size,
            database,
        } => match MigrationRequest::from_env(Action::Migrate) {
            Ok(mut request) => {
                if !folders.is_empty() {
                    request.folders = folders.iter().map(|f| Folder::from(f.as_str())).collect();
                }
                request.date_from = *since;
                request.date_to = *until;
                request.max_messages = *max;
                cmd_migrate(&request, *chunk_size, database.as_deref()).await?
            }
            Err(e) => e.into(),
        },
    };

    print_response(&args, &response)?;
    if response.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_test() -> MigrationResponse {
    match MigrationRequest::from_env(Action::Test) {
        Ok(request) => Migrator::new().run(&request).await.into(),
        Err(e) => e.into(),
    }
}

async fn cmd_migrate(
    request: &MigrationRequest,
    chunk_size: usize,
    database: Option<&str>,
) -> anyhow::Result<MigrationResponse> {
    let cancel = CancellationToken::new();
    let mut migrator = Migrator::new()
        .with_chunk_size(chunk_size)
        .with_cancellation(cancel.clone());

    if let Some(url) = database {
        let store = SqliteStore::connect(url).await?;
        store.migrate().await?;
        migrator = migrator.with_store(Arc::new(store));
    } else {
        info!("No database given, messages will be parsed but not stored");
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, finishing the current chunk");
            cancel.cancel();
        }
    });

    Ok(migrator.run(request).await.into())
}

fn print_response(args: &Args, response: &MigrationResponse) -> anyhow::Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    match response {
        MigrationResponse::Mailboxes { mailboxes, .. } => {
            for mailbox in mailboxes {
                println!("{mailbox}");
            }
        }
        MigrationResponse::Counters(counters) => {
            println!("Processed: {}", counters.processed);
            println!("Imported:  {}", counters.imported);
            println!("Failed:    {}", counters.failed);
        }
        MigrationResponse::Error { error } => eprintln!("Error: {error}"),
    }
    Ok(())
}

