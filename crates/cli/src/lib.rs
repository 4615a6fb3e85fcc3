pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "signoff",
    about = "Signoff operator CLI",
    long_about = "Operate the approval store: migrations, demo fixtures, config inspection, \
                  readiness checks, flow listing and document numbering.",
    after_help = "Examples:\n  signoff doctor --json\n  \
                  signoff flows --business-type quotation\n  signoff number QT"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo directory, default approval flows and sample documents")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity and schema readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List approval flows with their ordered nodes")]
    Flows {
        #[arg(long, help = "Only flows for this business type (e.g. quotation, report)")]
        business_type: Option<String>,
    },
    #[command(about = "Issue the next document number for a prefix")]
    Number {
        #[arg(help = "Upper-case prefix such as QT, CT or RP")]
        prefix: String,
        #[arg(long, help = "Issue for this day (YYYY-MM-DD) instead of today")]
        date: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Flows { business_type } => commands::flows::run(business_type.as_deref()),
        Command::Number { prefix, date } => commands::number::run(&prefix, date.as_deref()),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
