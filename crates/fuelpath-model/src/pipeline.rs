use std::time::Duration;

use fuelpath_solver::{RawSolverResult, SolverAdapter, SolverError};
use thiserror::Error;
use tracing::info;

use crate::aircraft::AircraftParameters;
use crate::formulator::{FormulationError, FormulationOptions, Formulator};
use crate::generator::{GeneratorError, NetworkRecipe};
use crate::interpreter::{InterpretationError, Interpreter};
use crate::network::Network;
use crate::solution::Solution;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Formulation(#[from] FormulationError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Interpretation(#[from] InterpretationError),
}

/// Everything that shapes a single solve besides the network and aircraft
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveOptions {
    pub formulation: FormulationOptions,
    pub time_limit: Option<Duration>,
    /// Relative tolerance used by the interpreter
    pub tolerance: f64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            formulation: FormulationOptions::default(),
            time_limit: None,
            tolerance: 1e-6,
        }
    }
}

/// Network, aircraft and options: one complete set of solve inputs
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub network: Network,
    pub aircraft: AircraftParameters,
    pub options: SolveOptions,
    /// How `network` was generated, if it was. Sweeping a generator parameter
    /// rebuilds the network from this
    pub recipe: Option<NetworkRecipe>,
}

impl Scenario {
    pub fn new(network: Network, aircraft: AircraftParameters) -> Self {
        Self {
            network,
            aircraft,
            options: SolveOptions::default(),
            recipe: None,
        }
    }

    /// Generate the network and take the matching aircraft
    pub fn generated(recipe: NetworkRecipe) -> Result<Self, GeneratorError> {
        Ok(Self {
            network: recipe.build()?,
            aircraft: recipe.params.aircraft(),
            options: SolveOptions::default(),
            recipe: Some(recipe),
        })
    }

    pub fn solve<S: SolverAdapter + ?Sized>(&self, adapter: &mut S) -> Result<Solution, PipelineError> {
        solve(&self.network, &self.aircraft, adapter, &self.options)
    }
}

/// Formulate, solve and interpret. The model is built fresh on every call.
pub fn solve<S: SolverAdapter + ?Sized>(
    network: &Network,
    aircraft: &AircraftParameters,
    adapter: &mut S,
    options: &SolveOptions,
) -> Result<Solution, PipelineError> {
    let formulation = Formulator::new(options.formulation).build(network, aircraft)?;

    let raw = if formulation.is_disconnected() {
        info!("destination unreachable from start, skipping solver");
        RawSolverResult::infeasible(Duration::ZERO)
    } else {
        adapter.solve(&formulation.model, options.time_limit)?
    };

    let solution = Interpreter::new(options.tolerance).interpret(&formulation, &raw)?;
    info!(
        solver = adapter.name(),
        status = %solution.status,
        objective = solution.objective_value(),
        route = %solution.node_ids().join(" -> "),
        "route solved"
    );
    Ok(solution)
}
