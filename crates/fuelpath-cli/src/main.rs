use clap::{Parser, Subcommand};
use fuelpath_model::io::{Format, ScenarioFile, load_scenario};
use fuelpath_model::{
    Formulator, GeneratorParameters, NetworkRecipe, Outcome, ParameterSpec, Scenario, SensitivityDriver,
    SensitivityEntry, SensitivityTable, Solution,
};
use fuelpath_solver::{Backend, GoodLpAdapter, SolveStatus, SolverError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "fuelpath")]
#[command(about = "Least-cost aircraft routing with refueling stops", long_about = None)]
struct Cli {
    /// Increase log output (-v info, -vv debug). RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a scenario file for errors
    Check {
        /// The scenario file (.toml or .json)
        file: PathBuf,
    },
    /// Find the cheapest route for a scenario
    Solve {
        /// The scenario file (.toml or .json)
        file: PathBuf,
        /// Time limit in seconds, overrides the file
        #[arg(short, long)]
        time_limit: Option<f64>,
        /// Solver backend (microlp, highs), overrides the file
        #[arg(short, long)]
        backend: Option<Backend>,
        /// Print the solution as JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-solve the scenario for every value in its [[sweep]] tables
    Sweep {
        /// The scenario file (.toml or .json)
        file: PathBuf,
        /// Solver backend (microlp, highs), overrides the file
        #[arg(short, long)]
        backend: Option<Backend>,
        /// Run iterations on all cores (needs the `parallel` feature)
        #[arg(short, long)]
        parallel: bool,
        /// Print the entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate a random acyclic scenario
    Generate {
        /// Number of nodes including start and destination
        #[arg(short, long, default_value_t = 20)]
        size: usize,
        /// Random seed
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Every node index divisible by this is a refueling point
        #[arg(short, long, default_value_t = 5)]
        refuel_interval: usize,
        /// Output file (.toml or .json). Prints TOML to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{}", message);
    std::process::exit(1);
}

fn load(file: &Path) -> (ScenarioFile, Scenario) {
    let scenario_file = match load_scenario(file) {
        Ok(f) => f,
        Err(e) => fail(format!("Error loading {}: {}", file.display(), e)),
    };
    let scenario = match scenario_file.scenario() {
        Ok(s) => s,
        Err(e) => fail(format!("Error in {}: {}", file.display(), e)),
    };
    (scenario_file, scenario)
}

fn adapter(backend: Backend) -> GoodLpAdapter {
    match GoodLpAdapter::with_backend(backend) {
        Ok(a) => a,
        Err(e) => fail(format!("Solver error: {}", e)),
    }
}

/// Reject a backend this build cannot run without starting a solver environment
fn ensure_available(backend: Backend) -> Result<(), SolverError> {
    if backend.is_available() {
        Ok(())
    } else {
        Err(SolverError::Unavailable(backend.name()))
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Check { file } => check(&file),
        Commands::Solve {
            file,
            time_limit,
            backend,
            json,
        } => {
            let (scenario_file, mut scenario) = load(&file);
            if let Some(secs) = time_limit {
                match Duration::try_from_secs_f64(secs) {
                    Ok(limit) => scenario.options.time_limit = Some(limit),
                    Err(_) => fail(format!("Invalid time limit: {}", secs)),
                }
            }
            let mut adapter = adapter(backend.unwrap_or(scenario_file.solver.backend));

            let solution = match scenario.solve(&mut adapter) {
                Ok(s) => s,
                Err(e) => fail(format!("Solve error: {}", e)),
            };

            if json {
                match serde_json::to_string_pretty(&solution) {
                    Ok(text) => println!("{}", text),
                    Err(e) => fail(format!("Error writing JSON: {}", e)),
                }
                if !solution.is_feasible() {
                    std::process::exit(1);
                }
            } else {
                println!("Scenario: {}", file.display());
                println!("Solver: {}", adapter.backend().name());
                println!();
                print_solution(&solution);
            }
        }
        Commands::Sweep {
            file,
            backend,
            parallel,
            json,
        } => {
            let (scenario_file, scenario) = load(&file);
            let specs = match scenario_file.sweep_specs() {
                Ok(s) => s,
                Err(e) => fail(format!("Error in {}: {}", file.display(), e)),
            };
            if specs.is_empty() {
                fail(format!("{} has no [[sweep]] entries", file.display()));
            }
            let backend = backend.unwrap_or(scenario_file.solver.backend);
            if let Err(e) = ensure_available(backend) {
                fail(format!("Solver error: {}", e));
            }

            let table: SensitivityTable = if parallel {
                run_parallel(&scenario, &specs, backend)
            } else {
                SensitivityDriver::new(adapter(backend)).run(&scenario, &specs).collect()
            };

            if json {
                match serde_json::to_string_pretty(&table.entries) {
                    Ok(text) => println!("{}", text),
                    Err(e) => fail(format!("Error writing JSON: {}", e)),
                }
            } else {
                print_table(&table);
            }
        }
        Commands::Generate {
            size,
            seed,
            refuel_interval,
            output,
        } => {
            let params = GeneratorParameters {
                size,
                refuel_interval,
                ..GeneratorParameters::default()
            };
            let scenario = match Scenario::generated(NetworkRecipe::new(params, seed)) {
                Ok(s) => s,
                Err(e) => fail(format!("Generator error: {}", e)),
            };
            let scenario_file = ScenarioFile::from_scenario(&scenario);

            let format = match &output {
                Some(path) => match Format::from_path(path) {
                    Ok(f) => f,
                    Err(e) => fail(e),
                },
                None => Format::Toml,
            };
            let text = match format {
                Format::Toml => scenario_file.to_toml_string().map_err(|e| e.to_string()),
                Format::Json => scenario_file.to_json_string().map_err(|e| e.to_string()),
            };
            let text = match text {
                Ok(t) => t,
                Err(e) => fail(format!("Error serializing scenario: {}", e)),
            };

            match output {
                Some(path) => {
                    if let Err(e) = std::fs::write(&path, text) {
                        fail(format!("Error writing {}: {}", path.display(), e));
                    }
                    info!(path = %path.display(), size, seed, "scenario written");
                    eprintln!("✓ wrote {}", path.display());
                }
                None => print!("{}", text),
            }
        }
    }
}

fn check(file: &Path) {
    let (scenario_file, scenario) = load(file);

    let formulation = match Formulator::new(scenario.options.formulation).build(&scenario.network, &scenario.aircraft)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("✗ {} has errors:", file.display());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };
    let specs = match scenario_file.sweep_specs() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("✗ {} has errors:", file.display());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };

    let model = &formulation.model;
    println!("✓ {} is valid", file.display());
    println!("  {}", scenario.network.summary());
    println!(
        "  {} variables ({} integer), {} constraints",
        model.num_variables(),
        model.num_integer_variables(),
        model.num_constraints()
    );
    println!("  {} sweep parameters", specs.len());
    if formulation.is_disconnected() {
        println!("  warning: the destination cannot be reached from the start");
    }
}

#[cfg(feature = "parallel")]
fn run_parallel(scenario: &Scenario, specs: &[ParameterSpec], backend: Backend) -> SensitivityTable {
    let make_adapter = || GoodLpAdapter::with_backend(backend).unwrap_or_default();
    fuelpath_model::run_parallel(scenario, specs, make_adapter, &fuelpath_model::CancelToken::new())
        .into_iter()
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn run_parallel(scenario: &Scenario, specs: &[ParameterSpec], backend: Backend) -> SensitivityTable {
    tracing::warn!("built without the `parallel` feature, running sequentially");
    SensitivityDriver::new(adapter(backend)).run(scenario, specs).collect()
}

fn print_solution(solution: &Solution) {
    let Some(objective) = solution.objective else {
        match solution.status {
            SolveStatus::Infeasible => {
                println!("Status: INFEASIBLE");
                println!("No route reaches the destination within the fuel limits.");
            }
            SolveStatus::Unbounded => {
                println!("Status: UNBOUNDED");
                println!("The problem has no finite optimal solution.");
            }
            SolveStatus::TimedOut => {
                println!("Status: TIMED OUT");
                println!("The time limit elapsed before a route was found.");
            }
            SolveStatus::Optimal => println!("Status: OPTIMAL"),
        }
        std::process::exit(1);
    };

    println!("Status: {}", solution.status);
    println!("Objective: {:.2}", objective.total);
    println!("  Distance:      {:10.2}", objective.distance);
    println!("  Arc cost:      {:10.2}", objective.arc_cost);
    println!("  Refuel cost:   {:10.2}", objective.refuel_cost);
    println!();
    println!("Route:");
    println!("  {:12} {:>12} {:>12} {:>12}", "node", "arrival", "refuel", "departure");
    for point in &solution.path {
        println!(
            "  {:12} {:12.2} {:12.2} {:12.2}",
            point.node, point.arrival_fuel, point.refuel, point.departure_fuel
        );
    }

    if !solution.refuels.is_empty() {
        println!();
        println!("Refueling stops:");
        for stop in &solution.refuels {
            println!("  {:12} {:10.2} units, cost {:.2}", stop.node, stop.amount, stop.cost);
        }
    }
}

fn describe(entry: &SensitivityEntry) -> String {
    match &entry.outcome {
        Outcome::Failed(reason) => format!("FAILED      {}", reason),
        Outcome::Solved(solution) => match (solution.objective_value(), entry.change_pct) {
            (Some(objective), Some(pct)) => format!("{:11} {:12.2} ({:+.2}%)", solution.status, objective, pct),
            (Some(objective), None) => format!("{:11} {:12.2}", solution.status, objective),
            (None, _) => solution.status.to_string(),
        },
    }
}

fn print_table(table: &SensitivityTable) {
    println!("Sweep: {} runs", table.entries.len());
    for entry in &table.entries {
        println!("  {:32} {:>10}  {}", entry.parameter.to_string(), entry.value.to_string(), describe(entry));
    }

    let boundaries = table.feasibility_boundaries();
    if !boundaries.is_empty() {
        println!();
        println!("Feasibility changes:");
        for entry in boundaries {
            let state = if entry.is_feasible() { "feasible" } else { "infeasible" };
            println!("  {} = {} becomes {}", entry.parameter, entry.value, state);
        }
    }
}
