pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "concierge",
    about = "Concierge operator CLI",
    long_about = "Check runtime readiness, apply migrations, inspect configuration, and run offline conversations.",
    after_help = "Examples:\n  concierge doctor --json\n  concierge config\n  concierge chat \"search hotels\" \"Seattle\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, classifier readiness, dialogs, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run a scripted offline conversation and print the transcript as JSON")]
    Chat {
        #[arg(required = true, help = "User messages, sent in order")]
        messages: Vec<String>,
        #[arg(long, help = "Seed for greeting selection")]
        seed: Option<u64>,
        #[arg(long, help = "Local hour (0-23) used for the time-of-day greeting")]
        hour: Option<u32>,
        #[arg(long, help = "Skip the welcome dialog before the first message")]
        no_welcome: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Chat { messages, seed, hour, no_welcome } => {
            commands::chat::run(commands::chat::ChatOptions {
                messages,
                seed,
                hour,
                welcome: !no_welcome,
            })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
