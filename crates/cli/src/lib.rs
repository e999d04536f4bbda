pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "tutorbot",
    about = "Tutorbot operator CLI",
    long_about = "Inspect configuration, check readiness, and exercise the response normalizer offline.",
    after_help = "Examples:\n  tutorbot doctor --json\n  tutorbot config\n  tutorbot normalize reply.txt --problem \"Solve 2x + 5 = 15\"\n  tutorbot clean-ocr \"2 × 3 − 1\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, LLM credential readiness, and OCR binary presence")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run a saved provider response through the normalization cascade")]
    Normalize {
        #[arg(help = "File holding the raw provider response")]
        file: PathBuf,
        #[arg(long, default_value = "", help = "Original problem text to attach to the solution")]
        problem: String,
        #[arg(long, default_value = "offline", help = "Provider name to attach to the solution")]
        provider: String,
    },
    #[command(name = "clean-ocr", about = "Apply OCR character normalization to a text")]
    CleanOcr {
        #[arg(help = "Text as extracted by OCR")]
        text: String,
    },
    #[command(about = "Print the solution prompt sent to the provider for a problem")]
    Prompt {
        #[arg(help = "Problem text")]
        problem: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Normalize { file, problem, provider } => {
            commands::normalize::run(&file, &problem, &provider)
        }
        Command::CleanOcr { text } => commands::clean_ocr::run(&text),
        Command::Prompt { problem } => commands::prompt::run(&problem),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
