use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod completion;
mod config;
mod dispatch;
mod git_ops;
mod helpers;
mod render;

use dispatch::run_cli;

#[derive(Parser, Debug)]
#[command(name = "sitectl", version)]
#[command(about = "Addon-aware upgrades for a learning-platform site", long_about = None)]
struct Cli {
    /// Site config; falls back to $SITECTL_CONFIG, then ./sitectl.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Move the site to another branch and/or repository.
    Upgrade {
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        repository: Option<String>,
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Pull the current branch, restore catalog addons, migrate the database.
    Update {
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Convert a submodule checkout to the modular repository layout.
    Migrate {
        #[arg(long)]
        branch: Option<String>,
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Remove uncatalogued addons and update the rest for a branch.
    UpgradeAddons {
        #[arg(long)]
        branch: Option<u32>,
    },
    /// Show which addons a branch would leave behind.
    Preflight {
        #[arg(long)]
        branch: String,
    },
    /// Compute an addon action plan, and optionally queue or apply it.
    Plan {
        #[arg(value_enum)]
        kind: PlanKind,
        #[arg(long)]
        branch: Option<u32>,
        #[arg(long, conflicts_with = "apply")]
        queue: bool,
        #[arg(long)]
        apply: bool,
    },
    /// Check that a release may upgrade straight to a branch.
    CheckBranch {
        #[arg(long)]
        release: String,
        #[arg(long)]
        branch: String,
    },
    Block {
        #[arg(long, value_enum)]
        kind: Option<CliBlockKind>,
    },
    Unblock {
        #[arg(long, value_enum)]
        kind: Option<CliBlockKind>,
    },
    /// List installed addons and their state on disk.
    Addons {
        #[arg(long = "type")]
        addon_type: Option<String>,
    },
    /// List recorded upgrade, update, and migration runs.
    Runs {
        /// Print the run metadata as JSON.
        #[arg(long)]
        json: bool,
    },
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum PlanKind {
    Missing,
    Updates,
    Removals,
    Unsatisfied,
    Required,
    BranchUpgrade,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliBlockKind {
    Maintenance,
    AccessDenied,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliCompletionShell {
    Bash,
    Zsh,
    Fish,
    Powershell,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("SITECTL_LOG")
                .unwrap_or_else(|_| "sitectl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    run_cli(Cli::parse())
}
