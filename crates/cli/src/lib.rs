pub mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "budgex",
    about = "Budget execution ledger CLI",
    long_about = "Operate the budget execution ledger: migrations, readiness checks, \
                  coherence sweeps, execution reporting, and demo fixtures.",
    after_help = "Examples:\n  budgex doctor --json\n  budgex check --year 2026\n  budgex waterfall --year 2026 --by direction"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load a deterministic demo fiscal year with a fully validated chain")]
    Seed,
    #[command(about = "Validate configuration and database readiness checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Run the coherence battery over one fiscal year")]
    Check {
        #[arg(long, help = "Fiscal year to sweep")]
        year: i32,
        #[arg(long, help = "Only check for budget overruns")]
        quick: bool,
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Render the dotation/engagement/liquidation/payment waterfall")]
    Waterfall {
        #[arg(long, help = "Fiscal year to report on")]
        year: i32,
        #[arg(long, value_enum, help = "Roll lines up by an organizational dimension")]
        by: Option<RollupBy>,
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RollupBy {
    Direction,
    Mission,
    Objectif,
    Nomenclature,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("BUDGEX_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    // Humans read stdout; diagnostics go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Check { year, quick, json } => commands::check::run(year, quick, json),
        Command::Waterfall { year, by, json } => commands::waterfall::run(year, by, json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
