//! Conductor CLI: the main entry point.
//!
//! Commands:
//! - `run`: Orchestrate a goal and stream progress
//! - `analyze`: Score a goal's complexity without running it
//! - `classify`: Classify an error message
//! - `lessons`: Review, approve, reject or archive lessons
//! - `workflows`: List stored workflow templates
//! - `config`: Show or initialize configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "conductor",
    about = "Conductor — autonomous task orchestration with continuous learning",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Orchestrate a goal end to end
    Run {
        /// The goal, in plain language
        #[arg(required = true, num_args = 1..)]
        goal: Vec<String>,

        /// Proceed past critical pre-flight risks that have no mitigation
        #[arg(long)]
        confirm_risks: bool,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Score a goal's complexity without running it
    Analyze {
        #[arg(required = true, num_args = 1..)]
        goal: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Classify an error message and show the suggested fix
    Classify {
        /// Raw error text
        error: String,

        /// Exit code of the failed command
        #[arg(short, long, allow_negative_numbers = true)]
        exit_code: Option<i32>,

        #[arg(long)]
        json: bool,
    },

    /// Manage learned lessons
    Lessons {
        #[command(subcommand)]
        action: LessonAction,
    },

    /// Manage stored workflow templates
    Workflows {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum LessonAction {
    /// List lessons, optionally filtered by status
    List {
        /// proposed, approved, rejected or archived
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Show one lesson with its evidence
    Show { id: String },
    /// Approve a proposed lesson
    Approve { id: String },
    /// Reject a proposed lesson
    Reject {
        id: String,
        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Archive a lesson
    Archive { id: String },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// List stored workflows
    List,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Write a default config file and create the data directories
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            goal,
            confirm_risks,
            json,
        } => commands::run::run(goal.join(" "), confirm_risks, json).await?,
        Commands::Analyze { goal, json } => commands::analyze::run(goal.join(" "), json).await?,
        Commands::Classify {
            error,
            exit_code,
            json,
        } => commands::classify::run(error, exit_code, json).await?,
        Commands::Lessons { action } => match action {
            LessonAction::List { status } => commands::lessons::list(status).await?,
            LessonAction::Show { id } => commands::lessons::show(id).await?,
            LessonAction::Approve { id } => commands::lessons::approve(id).await?,
            LessonAction::Reject { id, reason } => commands::lessons::reject(id, reason).await?,
            LessonAction::Archive { id } => commands::lessons::archive(id).await?,
        },
        Commands::Workflows { action } => match action {
            WorkflowAction::List => commands::workflows::list().await?,
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Init { force } => commands::config_cmd::init(force).await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
    }

    Ok(())
}
