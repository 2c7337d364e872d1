//! Clap derive structures for the `flowly` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// flowly -- run and exercise switch flow agents
#[derive(Debug, Parser)]
#[command(
    name = "flowly",
    version,
    about = "Run switch flow agents against a line-oriented control protocol",
    long_about = "An event-driven agent runner for switch flow programming.\n\n\
        Agents react to interface state changes and flow programming acks,\n\
        and are driven by a simple control protocol:\n\
        <name> (add|delete) <ipv4> <interface>",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file path (default: platform config dir)
    #[arg(long, env = "FLOWLY_CONFIG_PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Output format for summaries and diagnostics
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run an agent against the simulated fabric
    #[command(alias = "r")]
    Run(RunArgs),

    /// Validate a control script without running an agent
    #[command(alias = "lint")]
    Check(CheckArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Control stream source: stdin, tcp://HOST:PORT, or a file path
    /// (overrides the config file)
    #[arg(long, short = 'c')]
    pub control: Option<String>,

    /// Priority for control-stream flow entries (overrides config)
    #[arg(long, short = 'p')]
    pub priority: Option<u16>,

    /// Skip installing the default drop-all-IPv4 entry at startup
    #[arg(long)]
    pub no_default_flow: bool,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Control script to validate
    pub script: PathBuf,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the resolved config file path
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
