//! Sensitivity analysis: re-solve the route under one varied parameter at a time.
//!
//! Each iteration is the pure transformation `(base scenario, delta) -> solution`
//! and never reuses a previous model, so iterations can be tested on their own
//! or run in parallel.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fuelpath_solver::SolverAdapter;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::generator::GeneratorError;
use crate::network::RefuelStation;
use crate::pipeline::{PipelineError, Scenario};
use crate::solution::Solution;

/// An input that can be varied between runs
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "parameter", rename_all = "snake_case"))]
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    Capacity,
    Reserve,
    InitialFuel,
    BurnRate,
    DistanceWeight,
    RefuelWeight,
    ArcCost { from: String, to: String },
    ArcDistance { from: String, to: String },
    ArcFuelBurn { from: String, to: String },
    RefuelUnitCost { node: String },
    RefuelStopCost { node: String },
    /// Flag: add (with zero costs) or remove the refueling station at a node
    RefuelAvailable { node: String },
    /// Flag: `false` removes the node and its arcs from the network
    NodeAvailable { node: String },
    /// Solver time limit in seconds
    TimeLimit,
    /// Generator node count. This and the following generator parameters
    /// rebuild the network from the scenario's recipe
    NetworkSize,
    /// Generator cost per unit of fuel burned
    Psi,
    /// Generator single-hop burn bound
    InitialUpperBound,
    /// Generator spacing of refueling points
    RefuelInterval,
}


impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Capacity => f.write_str("capacity"),
            Parameter::Reserve => f.write_str("reserve"),
            Parameter::InitialFuel => f.write_str("initial_fuel"),
            Parameter::BurnRate => f.write_str("burn_rate"),
            Parameter::DistanceWeight => f.write_str("distance_weight"),
            Parameter::RefuelWeight => f.write_str("refuel_weight"),
            Parameter::ArcCost { from, to } => write!(f, "arc_cost[{}->{}]", from, to),
            Parameter::ArcDistance { from, to } => write!(f, "arc_distance[{}->{}]", from, to),
            Parameter::ArcFuelBurn { from, to } => write!(f, "arc_fuel_burn[{}->{}]", from, to),
            Parameter::RefuelUnitCost { node } => write!(f, "refuel_unit_cost[{}]", node),
            Parameter::RefuelStopCost { node } => write!(f, "refuel_stop_cost[{}]", node),
            Parameter::RefuelAvailable { node } => write!(f, "refuel_available[{}]", node),
            Parameter::NodeAvailable { node } => write!(f, "node_available[{}]", node),
            Parameter::TimeLimit => f.write_str("time_limit"),
            Parameter::NetworkSize => f.write_str("network_size"),
            Parameter::Psi => f.write_str("psi"),
            Parameter::InitialUpperBound => f.write_str("initial_upper_bound"),
            Parameter::RefuelInterval => f.write_str("refuel_interval"),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterValue {
    Number(f64),
    Flag(bool),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Number(v) => write!(f, "{}", v),
            ParameterValue::Flag(b) => write!(f, "{}", b),
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Number(v)
    }
}

impl From<bool> for ParameterValue {
    fn from(b: bool) -> Self {
        ParameterValue::Flag(b)
    }
}

/// One parameter and the ordered values to try for it
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub parameter: Parameter,
    pub values: Vec<ParameterValue>,
}

impl ParameterSpec {
    pub fn new(parameter: Parameter, values: impl IntoIterator<Item = impl Into<ParameterValue>>) -> Self {
        Self {
            parameter,
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubstitutionError {
    #[error("No arc {from} -> {to} in the network")]
    UnknownArc { from: String, to: String },
    #[error("No node {0} in the network")]
    UnknownNode(String),
    #[error("Node {0} is not a refueling point")]
    NotARefuelPoint(String),
    #[error("Parameter {parameter} expects a {expected} value")]
    ValueType { parameter: String, expected: &'static str },
    #[error("Parameter {0} needs a generated network")]
    NotGenerated(String),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensitivityError {
    #[error(transparent)]
    Substitution(#[from] SubstitutionError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Copy `base` and substitute `value` for `parameter`
pub fn apply(base: &Scenario, parameter: &Parameter, value: &ParameterValue) -> Result<Scenario, SubstitutionError> {
    let mut scenario = base.clone();

    let number = || match value {
        ParameterValue::Number(v) => Ok(*v),
        ParameterValue::Flag(_) => Err(SubstitutionError::ValueType {
            parameter: parameter.to_string(),
            expected: "numeric",
        }),
    };
    let count = || match value {
        ParameterValue::Number(v) if *v >= 0.0 && v.fract() == 0.0 && *v <= u32::MAX as f64 => Ok(*v as usize),
        _ => Err(SubstitutionError::ValueType {
            parameter: parameter.to_string(),
            expected: "whole number",
        }),
    };
    let flag = || match value {
        ParameterValue::Flag(b) => Ok(*b),
        ParameterValue::Number(_) => Err(SubstitutionError::ValueType {
            parameter: parameter.to_string(),
            expected: "boolean",
        }),
    };
    let unknown_arc = |from: &str, to: &str| SubstitutionError::UnknownArc {
        from: from.to_string(),
        to: to.to_string(),
    };

    match parameter {
        Parameter::Capacity => scenario.aircraft.capacity = number()?,
        Parameter::Reserve => scenario.aircraft.reserve = number()?,
        Parameter::InitialFuel => scenario.aircraft.initial_fuel = Some(number()?),
        Parameter::BurnRate => scenario.aircraft.burn_rate = Some(number()?),
        Parameter::DistanceWeight => scenario.options.formulation.weights.distance = number()?,
        Parameter::RefuelWeight => scenario.options.formulation.weights.refuel = number()?,
        Parameter::ArcCost { from, to } => {
            let v = number()?;
            scenario.network.arc_mut(from, to).ok_or_else(|| unknown_arc(from, to))?.cost = Some(v);
        }
        Parameter::ArcDistance { from, to } => {
            let v = number()?;
            scenario.network.arc_mut(from, to).ok_or_else(|| unknown_arc(from, to))?.distance = v;
        }
        Parameter::ArcFuelBurn { from, to } => {
            let v = number()?;
            scenario.network.arc_mut(from, to).ok_or_else(|| unknown_arc(from, to))?.fuel_burn = Some(v);
        }
        Parameter::RefuelUnitCost { node } | Parameter::RefuelStopCost { node } => {
            let v = number()?;
            let target = scenario
                .network
                .node_mut(node)
                .ok_or_else(|| SubstitutionError::UnknownNode(node.clone()))?;
            let station = target
                .refuel
                .as_mut()
                .ok_or_else(|| SubstitutionError::NotARefuelPoint(node.clone()))?;
            if matches!(parameter, Parameter::RefuelUnitCost { .. }) {
                station.unit_cost = v;
            } else {
                station.stop_cost = v;
            }
        }
        Parameter::RefuelAvailable { node } => {
            let available = flag()?;
            let target = scenario
                .network
                .node_mut(node)
                .ok_or_else(|| SubstitutionError::UnknownNode(node.clone()))?;
            match (available, target.refuel.is_some()) {
                (true, false) => target.refuel = Some(RefuelStation::default()),
                (false, true) => target.refuel = None,
                _ => {}
            }
        }
        Parameter::NodeAvailable { node } => {
            if scenario.network.node(node).is_none() {
                return Err(SubstitutionError::UnknownNode(node.clone()));
            }
            if !flag()? {
                scenario.network.remove_node(node);
            }
        }
        Parameter::TimeLimit => {
            let secs = number()?;
            let limit = Duration::try_from_secs_f64(secs).map_err(|_| SubstitutionError::ValueType {
                parameter: parameter.to_string(),
                expected: "non-negative seconds",
            })?;
            scenario.options.time_limit = Some(limit);
        }
        Parameter::NetworkSize | Parameter::Psi | Parameter::InitialUpperBound | Parameter::RefuelInterval => {
            let mut recipe = scenario
                .recipe
                .ok_or_else(|| SubstitutionError::NotGenerated(parameter.to_string()))?;
            match parameter {
                Parameter::NetworkSize => recipe.params.size = count()?,
                Parameter::RefuelInterval => recipe.params.refuel_interval = count()?,
                Parameter::Psi => recipe.params.psi = number()?,
                _ => recipe.params.initial_upper_bound = number()?,
            }
            scenario.network = recipe.build()?;
            scenario.recipe = Some(recipe);
            debug!(parameter = %parameter, seed = recipe.seed, "regenerated network");
        }
    }

    Ok(scenario)
}

/// Solve `base` with one parameter substituted
pub fn evaluate<S: SolverAdapter + ?Sized>(
    base: &Scenario,
    parameter: &Parameter,
    value: &ParameterValue,
    adapter: &mut S,
) -> Result<Solution, SensitivityError> {
    let scenario = apply(base, parameter, value)?;
    Ok(scenario.solve(adapter)?)
}

/// Result of one sweep iteration
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The pipeline ran. The solution may still be infeasible
    Solved(Solution),
    /// The iteration could not be solved, e.g. invalid parameters
    Failed(String),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityEntry {
    pub parameter: Parameter,
    pub value: ParameterValue,
    pub outcome: Outcome,
    /// Percentage change of the objective relative to the base scenario
    pub change_pct: Option<f64>,
}

impl SensitivityEntry {
    pub fn solution(&self) -> Option<&Solution> {
        match &self.outcome {
            Outcome::Solved(solution) => Some(solution),
            Outcome::Failed(_) => None,
        }
    }

    pub fn objective_value(&self) -> Option<f64> {
        self.solution().and_then(Solution::objective_value)
    }

    pub fn is_feasible(&self) -> bool {
        self.solution().is_some_and(Solution::is_feasible)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }
}

fn entry<S: SolverAdapter + ?Sized>(
    base: &Scenario,
    parameter: &Parameter,
    value: &ParameterValue,
    adapter: &mut S,
    baseline: Option<f64>,
) -> SensitivityEntry {
    info!(parameter = %parameter, value = %value, "sensitivity iteration");
    let outcome = match evaluate(base, parameter, value, adapter) {
        Ok(solution) => Outcome::Solved(solution),
        Err(e) => {
            warn!(parameter = %parameter, value = %value, error = %e, "iteration failed");
            Outcome::Failed(e.to_string())
        }
    };

    let change_pct = match (&outcome, baseline) {
        (Outcome::Solved(solution), Some(base)) if base != 0.0 => solution
            .objective_value()
            .map(|objective| (objective - base) / base * 100.0),
        _ => None,
    };

    SensitivityEntry {
        parameter: parameter.clone(),
        value: *value,
        outcome,
        change_pct,
    }
}

fn baseline_objective<S: SolverAdapter + ?Sized>(base: &Scenario, adapter: &mut S) -> Option<f64> {
    match base.solve(adapter) {
        Ok(solution) => solution.objective_value(),
        Err(e) => {
            warn!(error = %e, "base scenario failed, percentage changes are unavailable");
            None
        }
    }
}

/// Coarse cancellation shared between a sweep and whoever wants to stop it.
/// A cancelled sweep finishes the iteration in flight and starts no more.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(std::sync::Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Runs sweeps with one owned solver adapter
pub struct SensitivityDriver<S> {
    adapter: S,
    cancel: CancelToken,
}

impl<S: SolverAdapter> SensitivityDriver<S> {
    pub fn new(adapter: S) -> Self {
        Self {
            adapter,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Lazily evaluate every value of every spec, in order.
    /// Calling `run` again restarts the sweep from scratch.
    pub fn run<'a>(&'a mut self, base: &'a Scenario, specs: &'a [ParameterSpec]) -> Sweep<'a, S> {
        Sweep {
            adapter: &mut self.adapter,
            base,
            specs,
            spec: 0,
            value: 0,
            cancel: self.cancel.clone(),
            baseline: None,
        }
    }
}

/// Iterator over sweep entries, see [`SensitivityDriver::run`]
pub struct Sweep<'a, S> {
    adapter: &'a mut S,
    base: &'a Scenario,
    specs: &'a [ParameterSpec],
    spec: usize,
    value: usize,
    cancel: CancelToken,
    /// Base objective, solved on the first iteration
    baseline: Option<Option<f64>>,
}

impl<'a, S: SolverAdapter> Sweep<'a, S> {
    fn next_delta(&mut self) -> Option<(&'a Parameter, &'a ParameterValue)> {
        let specs: &'a [ParameterSpec] = self.specs;
        loop {
            let spec = specs.get(self.spec)?;
            if let Some(value) = spec.values.get(self.value) {
                self.value += 1;
                return Some((&spec.parameter, value));
            }
            self.spec += 1;
            self.value = 0;
        }
    }
}

impl<S: SolverAdapter> Iterator for Sweep<'_, S> {
    type Item = SensitivityEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancel.is_cancelled() {
            debug!("sweep cancelled");
            return None;
        }
        let (parameter, value) = self.next_delta()?;
        let baseline = match self.baseline {
            Some(baseline) => baseline,
            None => {
                let baseline = baseline_objective(self.base, &mut *self.adapter);
                self.baseline = Some(baseline);
                baseline
            }
        };
        Some(entry(self.base, parameter, value, &mut *self.adapter, baseline))
    }
}

/// Evaluate a sweep on the rayon pool, one adapter per worker.
/// Entries come back in the same order as the sequential sweep.
#[cfg(feature = "parallel")]
pub fn run_parallel<S, F>(
    base: &Scenario,
    specs: &[ParameterSpec],
    make_adapter: F,
    cancel: &CancelToken,
) -> Vec<SensitivityEntry>
where
    S: SolverAdapter,
    F: Fn() -> S + Sync + Send,
{
    use rayon::prelude::*;

    let deltas: Vec<(&Parameter, &ParameterValue)> = specs
        .iter()
        .flat_map(|spec| spec.values.iter().map(move |v| (&spec.parameter, v)))
        .collect();
    let baseline = baseline_objective(base, &mut make_adapter());

    let entries: Vec<Option<SensitivityEntry>> = deltas
        .par_iter()
        .map_init(&make_adapter, |adapter, &(parameter, value)| {
            if cancel.is_cancelled() {
                None
            } else {
                Some(entry(base, parameter, value, adapter, baseline))
            }
        })
        .collect();
    entries.into_iter().flatten().collect()
}

/// Collected sweep entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensitivityTable {
    pub entries: Vec<SensitivityEntry>,
}

impl FromIterator<SensitivityEntry> for SensitivityTable {
    fn from_iter<I: IntoIterator<Item = SensitivityEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl SensitivityTable {
    pub fn for_parameter<'a>(&'a self, parameter: &'a Parameter) -> impl Iterator<Item = &'a SensitivityEntry> + 'a {
        self.entries.iter().filter(move |e| &e.parameter == parameter)
    }

    /// Entries whose feasibility differs from the previous value of the same parameter
    pub fn feasibility_boundaries(&self) -> Vec<&SensitivityEntry> {
        let mut boundaries = Vec::new();
        let mut last: Vec<(&Parameter, bool)> = Vec::new();
        for e in &self.entries {
            let feasible = e.is_feasible();
            match last.iter_mut().find(|(p, _)| *p == &e.parameter) {
                Some((_, previous)) => {
                    if *previous != feasible {
                        boundaries.push(e);
                    }
                    *previous = feasible;
                }
                None => last.push((&e.parameter, feasible)),
            }
        }
        boundaries
    }
}
