use clap::{Parser, Subcommand};
use std::path::PathBuf;
use teamcalc::cli;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "teamcalc")]
#[command(about = "Per-team calculation rules over CSV data")]
#[command(long_about = "teamcalc - restricted-formula calculations for team datasets

Each team is configured by a YAML file under <config-dir>/teams/ naming its
data source, expected columns and an ordered list of calculation rules.
Rules are arithmetic over columns (+ - * / % **, parentheses, numbers) or
aggregates SUM/MEAN/COUNT/MIN/MAX/STD/VAR(column), optionally grouped.

EXAMPLES:
  teamcalc teams
  teamcalc check \"quantity * unit_price\"
  teamcalc validate sales_a
  teamcalc calculate sales_a --json")]
#[command(version)]
struct Cli {
    /// Directory holding app.yaml and teams/*.yaml
    #[arg(long, global = true, env = "TEAMCALC_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Root for relative data paths (defaults to the config directory's parent)
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    /// Show debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured teams
    Teams,

    /// Check whether a formula is allowed
    Check {
        /// Formula text, e.g. "a + b" or "SUM(revenue)"
        formula: String,
    },

    /// Validate a team's data against its data format and rules
    Validate {
        /// Team id (file name under teams/)
        team: String,
    },

    /// Apply a team's calculation rules and print the results
    Calculate {
        /// Team id (file name under teams/)
        team: String,

        /// Emit results as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "teamcalc=debug" } else { "teamcalc=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Teams => cli::teams(cli.config_dir)?,
        Commands::Check { formula } => cli::check(formula)?,
        Commands::Validate { team } => cli::validate(cli.config_dir, cli.data_root, team)?,
        Commands::Calculate { team, json } => {
            cli::calculate(cli.config_dir, cli.data_root, team, json)?
        }
    }
    Ok(())
}
