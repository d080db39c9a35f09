//! rota-solver - constraint-programming scheduler for home-care rosters.
//!
//! Loads a problem file, warms the travel-time cache from the routing
//! engine, runs the configured solver pipeline and writes the schedule.

mod cli;
mod config;
mod engine;
mod services;
mod solver;
mod types;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{ConsoleFormat, SolverConfig};
use services::location_cache::LocationCache;
use services::routing::{create_routing_service, RoutingService};
use solver::estimate::{EstimateSolver, HumanPlannerSchedule};
use solver::problem_data::ProblemData;
use solver::single_step::SingleStepSolver;
use solver::three_step::{
    assignment_to_solution, solution_to_seed_routes, ThreeStepSchedulingWorker,
};
use solver::validator::RouteValidator;
use types::{Problem, Solution};

/// A configuration mistake the user can fix; reported with exit code 1.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct UsageError(String);

fn main() -> ExitCode {
    match std::panic::catch_unwind(run) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(error)) => {
            eprintln!("error: {:#}", error);
            ExitCode::from(classify_error(&error))
        }
        Err(_) => {
            eprintln!("error: unhandled panic");
            ExitCode::from(3)
        }
    }
}

fn classify_error(error: &anyhow::Error) -> u8 {
    let is_application_error = error.downcast_ref::<UsageError>().is_some()
        || error.downcast_ref::<types::ProblemError>().is_some()
        || error.downcast_ref::<std::io::Error>().is_some();
    if is_application_error {
        1
    } else {
        2
    }
}

fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = cli::Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(dispatch(cli))
}

async fn dispatch(cli: cli::Cli) -> Result<()> {
    match cli.command {
        cli::Command::SolveSingleStep(args) => solve_single_step(args).await,
        cli::Command::SolveThreeStep(args) => solve_three_step(args).await,
        cli::Command::SolveBenchmark(args) => solve_benchmark(args).await,
        cli::Command::Estimate(args) => estimate(args).await,
        cli::Command::RoutingServer(args) => {
            let routing = create_routing_service(args.maps).await;
            services::routing_server::run(routing.as_ref()).await
        }
    }
}

async fn solve_single_step(args: cli::SolveArgs) -> Result<()> {
    let _guard = init_tracing(parse_console_format(&args.common)?);
    let config = solver_config(&args.common, args.first_stage.as_deref(), args.third_stage.as_deref())?;
    let (problem, warm_start) = load_problem(&args.problem, args.solution.as_deref())?;
    let data = prepare_data(problem, &args.common).await?;

    let cancel = Arc::new(AtomicBool::new(false));
    spawn_cancel_listener(Arc::clone(&cancel));

    let (data, solution) = tokio::task::spawn_blocking(move || {
        let seeds = warm_start.map(|mut previous| {
            let validator = RouteValidator::new(config.shift_adjustment, config.visit_time_window);
            validator.repair(&mut previous, data.problem(), data.cache());
            solution_to_seed_routes(&data, &previous)
        });
        let result = SingleStepSolver::solve(&data, &config, seeds.as_deref(), cancel)
            .map(|assignment| assignment_to_solution(&data, &assignment))
            .ok_or_else(|| {
                anyhow::Error::new(UsageError("no feasible schedule found".to_string()))
            });
        (data, result)
    })
    .await
    .context("solver task failed")?;

    let solution: Solution = solution?;
    finish(&data, &solution, args.output.as_deref())
}

async fn solve_three_step(args: cli::SolveArgs) -> Result<()> {
    let _guard = init_tracing(parse_console_format(&args.common)?);
    let config = solver_config(&args.common, args.first_stage.as_deref(), args.third_stage.as_deref())?;
    let (problem, warm_start) = load_problem(&args.problem, args.solution.as_deref())?;
    let data = prepare_data(problem, &args.common).await?;

    let cancel = Arc::new(AtomicBool::new(false));
    spawn_cancel_listener(Arc::clone(&cancel));

    let (data, solution) = tokio::task::spawn_blocking(move || {
        let worker = ThreeStepSchedulingWorker::new(&data, &config, cancel);
        let result = worker.run(warm_start);
        (data, result)
    })
    .await
    .context("solver task failed")?;

    let solution = solution?;
    finish(&data, &solution, args.output.as_deref())
}

async fn solve_benchmark(args: cli::BenchmarkArgs) -> Result<()> {
    let _guard = init_tracing(parse_console_format(&args.common)?);
    let config = solver_config(&args.common, None, None)?;

    let spec = solver::benchmark::BenchmarkSpec {
        service_users: args.service_users,
        visits: args.visits,
        carers: args.carers,
        seed: args.common.seed.max(1),
        ..Default::default()
    };
    info!(
        visits = spec.visits,
        carers = spec.carers,
        "generated benchmark instance"
    );
    let problem = solver::benchmark::generate_problem(&spec);
    let data = prepare_data(problem, &args.common).await?;

    let cancel = Arc::new(AtomicBool::new(false));
    spawn_cancel_listener(Arc::clone(&cancel));

    let (data, solution) = tokio::task::spawn_blocking(move || {
        let worker = ThreeStepSchedulingWorker::new(&data, &config, cancel);
        let result = worker.run(None);
        (data, result)
    })
    .await
    .context("solver task failed")?;

    let solution = solution?;
    finish(&data, &solution, args.output.as_deref())
}

async fn estimate(args: cli::EstimateArgs) -> Result<()> {
    let _guard = init_tracing(parse_console_format(&args.common)?);
    let config = solver_config(&args.common, None, None)?;
    let (problem, planner_solution) = load_problem(&args.problem, Some(args.solution.as_path()))?;
    let mut planner_solution =
        planner_solution.context("estimate requires a planner solution")?;
    let data = prepare_data(problem, &args.common).await?;

    planner_solution.update_from(data.problem());
    let planner = HumanPlannerSchedule::from_solution(&planner_solution);
    if planner.is_empty() {
        warn!("planner solution contains no resolvable assignments");
    }

    let cancel = Arc::new(AtomicBool::new(false));
    spawn_cancel_listener(Arc::clone(&cancel));

    let (data, solution) = tokio::task::spawn_blocking(move || {
        let solver = EstimateSolver::new(planner);
        let result = solver
            .solve(&data, &config, cancel)
            .map(|assignment| assignment_to_solution(&data, &assignment))
            .ok_or_else(|| {
                anyhow::Error::new(UsageError(
                    "planner schedule could not be completed".to_string(),
                ))
            });
        (data, result)
    })
    .await
    .context("solver task failed")?;

    let solution = solution?;
    finish(&data, &solution, args.output.as_deref())
}

/// Read and restrict the problem to its schedule day; optionally read a
/// previous solution alongside it.
fn load_problem(
    problem_path: &Path,
    solution_path: Option<&Path>,
) -> Result<(Problem, Option<Solution>)> {
    let raw = std::fs::read_to_string(problem_path)
        .with_context(|| format!("cannot read problem file {}", problem_path.display()))?;
    let problem = Problem::from_json(&raw)?;
    let date = problem
        .schedule_date()
        .ok_or_else(|| UsageError("problem contains no visits".to_string()))?;
    let problem = problem.for_date(date);
    problem.check_admissibility(date);

    let solution = match solution_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read solution file {}", path.display()))?;
            Some(Solution::from_json(&raw)?)
        }
        None => None,
    };
    Ok((problem, solution))
}

/// Warm the travel-time cache and derive the solver view.
async fn prepare_data(problem: Problem, common: &cli::CommonArgs) -> Result<ProblemData> {
    let engine_url = common
        .maps
        .clone()
        .or_else(|| std::env::var("ROUTING_ENGINE_URL").ok());
    let routing: Box<dyn RoutingService> = create_routing_service(engine_url).await;

    let locations: Vec<types::Location> = problem
        .visits()
        .iter()
        .filter_map(|visit| visit.location())
        .collect();
    let mut cache = LocationCache::new(locations);
    let pairs = cache.compute_all(routing.as_ref()).await?;
    info!(
        locations = cache.len(),
        pairs, "travel-time matrix ready"
    );

    ProblemData::new(problem, cache)
}

/// Print the schedule and write the GEXF graph when requested.
fn finish(data: &ProblemData, solution: &Solution, output: Option<&Path>) -> Result<()> {
    info!(
        scheduled_visits = solution.visits().len(),
        total_visits = data.problem().visits().len(),
        "schedule complete"
    );

    if let Some(path) = output {
        let gexf = services::gexf::write_solution(data.problem(), solution, data.cache());
        std::fs::write(path, gexf)
            .with_context(|| format!("cannot write output file {}", path.display()))?;
        info!("schedule graph written to {}", path.display());
    }

    println!("{}", solution.to_json()?);
    Ok(())
}

/// Read control commands from stdin; `cancel` aborts the running solve at
/// its next decision point.
fn spawn_cancel_listener(token: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(command) => {
                    let command = command.trim().to_ascii_lowercase();
                    if command == "cancel" || command == "stop" {
                        info!("cancellation requested");
                        token.store(true, Ordering::Relaxed);
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
}

fn parse_console_format(common: &cli::CommonArgs) -> Result<ConsoleFormat> {
    common
        .console_format
        .parse()
        .map_err(|message: String| UsageError(message).into())
}

fn solver_config(
    common: &cli::CommonArgs,
    first_stage: Option<&str>,
    third_stage: Option<&str>,
) -> Result<SolverConfig> {
    let mut config = SolverConfig {
        visit_time_window: chrono::Duration::seconds(common.visit_time_window),
        break_time_window: chrono::Duration::seconds(common.break_time_window),
        shift_adjustment: chrono::Duration::seconds(common.begin_end_shift_time_extension),
        opt_time_limit: common.opt_time_limit.map(StdDuration::from_secs),
        no_progress_time_limit: common.no_progress_time_limit.map(StdDuration::from_secs),
        post_opt_time_limit: common.post_opt_time_limit.map(StdDuration::from_secs),
        seed: common.seed,
        ..Default::default()
    };
    if let Some(value) = first_stage {
        config.first_stage = value
            .parse()
            .map_err(|message: String| UsageError(message))?;
    }
    if let Some(value) = third_stage {
        config.third_stage = value
            .parse()
            .map_err(|message: String| UsageError(message))?;
    }
    Ok(config)
}

fn init_tracing(format: ConsoleFormat) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );

    match format {
        ConsoleFormat::Txt => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            None
        }
        ConsoleFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
            None
        }
        ConsoleFormat::Log => {
            let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string());
            std::fs::create_dir_all(&logs_dir).ok();
            let file_appender =
                RollingFileAppender::new(Rotation::DAILY, &logs_dir, "rota-solver.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
            Some(guard)
        }
    }
}
