pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "intake",
    about = "Workshop intake assistant operator CLI",
    long_about = "Inspect configuration, check readiness, prepare the session database, and rehearse conversations on the console.",
    after_help = "Examples:\n  intake doctor --json\n  intake config\n  intake chat --name Ana"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending session-store migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, messaging credentials, record sink and session store")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Talk to the dialogue engine on the console; `/id` picks an option")]
    Chat {
        #[arg(long, default_value = "5511900000000", help = "Contact id used for the session")]
        contact: String,
        #[arg(long, default_value = "", help = "Profile name shown in the greeting")]
        name: String,
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
            let (exit_code, output) = commands::doctor::run(json);
            commands::CommandResult { exit_code, output }
        }
        Command::Chat { contact, name } => commands::chat::run(&contact, &name),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
