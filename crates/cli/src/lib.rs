pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "relatedrec",
    about = "Related-product recommendation operator CLI",
    long_about = "Apply migrations, ingest computed partitions, import catalog data, and inspect configuration.",
    after_help = "Examples:\n  relatedrec migrate\n  relatedrec ingest --bucket ecomm-order-items\n  relatedrec watch\n  relatedrec config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Ingest the latest completed run of a bucket, or the run of one sentinel")]
    Ingest {
        #[arg(long, help = "Bucket to ingest from")]
        bucket: String,
        #[arg(long, help = "Key of the `_SUCCESS` sentinel to ingest instead of the latest run")]
        sentinel: Option<String>,
    },
    #[command(about = "Poll the configured buckets and ingest each new run until interrupted")]
    Watch,
    #[command(about = "Upsert catalog products from a JSON-lines file")]
    ImportCatalog {
        #[arg(long)]
        file: PathBuf,
    },
    #[command(about = "Upsert customer colour preferences from a JSON-lines file")]
    ImportCustomers {
        #[arg(long)]
        file: PathBuf,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Ingest { bucket, sentinel } => commands::ingest::run(&bucket, sentinel.as_deref()),
        Command::Watch => commands::ingest::watch(),
        Command::ImportCatalog { file } => commands::import::catalog(&file),
        Command::ImportCustomers { file } => commands::import::customers(&file),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
