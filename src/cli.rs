//! CLI argument parsing for the rota-solver binary.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "rota-solver",
    about = "Constraint-programming scheduler for home-care visit rosters"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Solve a problem file with the baseline single-pass solver
    SolveSingleStep(SolveArgs),
    /// Run the full three-stage pipeline against a problem file
    SolveThreeStep(SolveArgs),
    /// Generate a synthetic instance and run the pipeline on it
    SolveBenchmark(BenchmarkArgs),
    /// Check a human planner's schedule against the solver
    Estimate(EstimateArgs),
    /// Answer travel-time queries over stdin/stdout
    RoutingServer(RoutingServerArgs),
}

#[derive(Args)]
pub struct CommonArgs {
    /// Routing engine base URL; Haversine estimates are used without one
    #[arg(long)]
    pub maps: Option<String>,

    /// Half-width of each visit's time window, in seconds
    #[arg(long, default_value_t = 5400)]
    pub visit_time_window: i64,

    /// How far interior breaks may slide, in seconds
    #[arg(long, default_value_t = 900)]
    pub break_time_window: i64,

    /// Slack tolerated at shift boundaries, in seconds
    #[arg(long, default_value_t = 900)]
    pub begin_end_shift_time_extension: i64,

    /// Wall-clock limit per solver stage, in seconds
    #[arg(long)]
    pub opt_time_limit: Option<u64>,

    /// Stop a stage after this many seconds without improvement
    #[arg(long)]
    pub no_progress_time_limit: Option<u64>,

    /// Wall-clock budget of the refinement stage, in seconds
    #[arg(long)]
    pub post_opt_time_limit: Option<u64>,

    /// Console output style: txt, json or log
    #[arg(long, default_value = "txt")]
    pub console_format: String,

    /// Seed for scenario sampling and randomised search steps
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

#[derive(Args)]
pub struct SolveArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Problem file (JSON)
    #[arg(long)]
    pub problem: PathBuf,

    /// Previous solution file used as a warm start
    #[arg(long)]
    pub solution: Option<PathBuf>,

    /// Where to write the GEXF schedule graph
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// First stage strategy: teams, soft-time-windows or none
    #[arg(long)]
    pub first_stage: Option<String>,

    /// Third stage strategy: distance, vehicle-reduction, delay-reduction
    /// or none
    #[arg(long)]
    pub third_stage: Option<String>,
}

#[derive(Args)]
pub struct BenchmarkArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long, default_value_t = 20)]
    pub service_users: usize,

    #[arg(long, default_value_t = 40)]
    pub visits: usize,

    #[arg(long, default_value_t = 8)]
    pub carers: usize,

    /// Where to write the GEXF schedule graph
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct EstimateArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Problem file (JSON)
    #[arg(long)]
    pub problem: PathBuf,

    /// The human planner's schedule to estimate
    #[arg(long)]
    pub solution: PathBuf,

    /// Where to write the GEXF schedule graph
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct RoutingServerArgs {
    /// Routing engine base URL; Haversine estimates are used without one
    #[arg(long)]
    pub maps: Option<String>,
}
