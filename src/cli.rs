//! Command line interface.
//!
//! [`Cli`] carries the subcommands ([`Command`]: run, demo, status) and the
//! global flags that override `linker-search.toml`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::SearchConfig;
use crate::generator::ClosingStrategy;

/// Stochastic linker search with capacity-limited simulation scheduling.
#[derive(Debug, Parser)]
#[command(name = "linker-search", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (default: ./linker-search.toml if present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Simulations allowed on the facility at once.
    #[arg(long, global = true)]
    pub capacity: Option<usize>,

    /// How the closing rule of each candidate is chosen.
    #[arg(long, global = true)]
    pub closing: Option<ClosingStrategy>,

    /// RNG seed for reproducible generation.
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// No log output and no progress spinner.
    #[arg(short, long, global = true, default_value_t = false)]
    pub quiet: bool,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a search against the configured facility and scripts.
    Run {
        /// Run directory (overrides `run_dir`).
        #[arg(long)]
        run_dir: Option<PathBuf>,
    },

    /// Run a short search on the built-in simulated backends.
    Demo {
        #[arg(long, default_value = "runs/demo")]
        run_dir: PathBuf,
    },

    /// Summarize the result log of a run.
    Status {
        #[arg(long)]
        run_dir: Option<PathBuf>,

        /// Result log name (defaults to the configured mode).
        #[arg(long)]
        mode: Option<String>,

        /// Print the summary as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

impl Cli {
    /// Apply the global overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, config: &mut SearchConfig) {
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        if let Some(closing) = self.closing {
            config.search.closing = closing;
        }
        if let Some(seed) = self.seed {
            config.search.seed = Some(seed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["linker-search", "run", "--run-dir", "/scratch/a"]);
        match cli.command {
            Command::Run { run_dir } => assert_eq!(run_dir, Some(PathBuf::from("/scratch/a"))),
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "linker-search",
            "--capacity",
            "4",
            "--closing",
            "best-metric",
            "--seed",
            "9",
            "-vv",
            "demo",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.closing, Some(ClosingStrategy::BestMetric));
        assert!(matches!(cli.command, Command::Demo { ref run_dir } if run_dir == &PathBuf::from("runs/demo")));

        let mut config = SearchConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.capacity, 4);
        assert_eq!(config.search.closing, ClosingStrategy::BestMetric);
        assert_eq!(config.search.seed, Some(9));
    }

    #[test]
    fn cli_parses_status_subcommand() {
        let cli = Cli::parse_from(["linker-search", "status", "--mode", "uniform", "--json"]);
        match cli.command {
            Command::Status { run_dir, mode, json } => {
                assert!(run_dir.is_none());
                assert_eq!(mode.as_deref(), Some("uniform"));
                assert!(json);
            }
            _ => panic!("expected Status command"),
        }
    }

    #[test]
    fn overrides_leave_unset_values_alone() {
        let cli = Cli::parse_from(["linker-search", "status"]);
        let mut config = SearchConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.capacity, 10);
        assert_eq!(config.search.seed, None);
    }

    #[test]
    fn closing_values_match_config_names() {
        for (value, expected) in [
            ("uniform", ClosingStrategy::Uniform),
            ("best-metric", ClosingStrategy::BestMetric),
            ("estimator", ClosingStrategy::Estimator),
        ] {
            let cli = Cli::parse_from(["linker-search", "--closing", value, "status"]);
            assert_eq!(cli.closing, Some(expected));
            assert_eq!(expected.to_string(), value);
        }
        assert!(Cli::try_parse_from(["linker-search", "--closing", "widest", "status"]).is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
