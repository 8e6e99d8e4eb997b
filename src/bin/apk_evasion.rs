//! apk-evasion: black-box evasion attacks against APK malware classifiers
//!
//! The attacker sees only the classifier's label and score. For each detected
//! artifact it derives candidate manipulations, drops those that break the
//! rebuild, probes which feature categories the model reacts to, and searches
//! the remaining space within a query budget.
//!
//! ## Commands
//!
//! - **attack**: attack artifacts and write one result record per input
//! - **classify**: score artifacts with the configured classifier
//! - **features**: extract (and cache) artifact features
//! - **config**: print the effective configuration
//!
//! ## Example Usage
//!
//! ```bash
//! apk-evasion attack ./malware --goodware ./goodware \
//!     --classifier "python3 drebin.py" --extractor "python3 extract.py" \
//!     --decode "apktool d -f {input} -o {output}" --build "apktool b {input} -o {output}" \
//!     --sign "apksigner sign --ks debug.ks {input}" \
//!     --query-budget 100 -j 4 --output results.json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod evasion_cli;

use evasion_cli::{
    attack::AttackCmd,
    classify::{ClassifyCmd, FeaturesCmd},
    config::ConfigCmd,
    paths::EvasionPaths,
};

#[derive(Parser)]
#[command(
    name = "apk-evasion",
    author,
    version,
    about = "Black-box problem-space evasion attacks against APK malware classifiers"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base directory for config, caches and logs (default: $APK_EVASION_HOME or ~/.apk-evasion)
    #[arg(long, global = true)]
    home: Option<std::path::PathBuf>,

    /// Output as JSON instead of human-readable format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (debug logging)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Attack detected artifacts within a query budget
    Attack(AttackCmd),

    /// Classify artifacts with the configured classifier
    Classify(ClassifyCmd),

    /// Extract the features of artifacts
    Features(FeaturesCmd),

    /// Print the effective configuration
    Config(ConfigCmd),
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    let Cli {
        command,
        home,
        json,
        verbose,
    } = Cli::parse();
    init_tracing(verbose);
    let paths = EvasionPaths::new(home);

    match command {
        Commands::Attack(cmd) => cmd.execute(&paths, json),
        Commands::Classify(cmd) => cmd.execute(&paths, json),
        Commands::Features(cmd) => cmd.execute(&paths, json),
        Commands::Config(cmd) => cmd.execute(&paths),
    }
}
