use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use good_lp::solvers::microlp::microlp;
use good_lp::{constraint, variable, Expression, ProblemVariables, ResolutionError, Solution, SolverModel};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::problem::{ConstraintOp, MilpModel, ModelCheckError, VarKind};
use crate::solution::RawSolverResult;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Invalid model: {0}")]
    InvalidModel(#[from] ModelCheckError),
    #[error("Solver backend error: {0}")]
    Backend(String),
    #[error("Solver backend {0} is not available in this build")]
    Unavailable(&'static str),
}

/// Boundary to an external MILP engine.
///
/// Implementations take `&mut self` so a non-reentrant engine is never shared
/// between concurrent solves; parallel callers own one adapter each.
pub trait SolverAdapter {
    /// Short backend name for logs and reports
    fn name(&self) -> &str;

    /// Solve `model`, returning within roughly `time_limit` when one is given.
    ///
    /// An engine without a native limit may leave the timed-out search running
    /// in the background. It must hold at most one such search at a time and
    /// finish it before starting the next solve.
    fn solve(&mut self, model: &MilpModel, time_limit: Option<Duration>) -> Result<RawSolverResult, SolverError>;
}

impl<T: SolverAdapter + ?Sized> SolverAdapter for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn solve(&mut self, model: &MilpModel, time_limit: Option<Duration>) -> Result<RawSolverResult, SolverError> {
        (**self).solve(model, time_limit)
    }
}

/// Engines reachable through `good_lp`
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Pure-Rust branch and bound, always compiled in
    #[default]
    Microlp,
    /// HiGHS, requires the `highs` feature
    Highs,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Backend::Microlp => "microlp",
            Backend::Highs => "highs",
        }
    }

    pub fn is_available(self) -> bool {
        match self {
            Backend::Microlp => true,
            Backend::Highs => cfg!(feature = "highs"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "microlp" => Ok(Backend::Microlp),
            "highs" => Ok(Backend::Highs),
            other => Err(format!("unknown solver backend '{}'", other)),
        }
    }
}

static GLOBAL_ENVIRONMENT: SolverEnvironment = SolverEnvironment::new();

/// Reference-counted solver environment.
///
/// Every adapter holds one guard on the process-wide environment for its
/// lifetime. The environment is brought up when the first guard is taken and
/// torn down when the last one drops, so no solver state survives between
/// unrelated adapters.
#[derive(Debug)]
pub struct SolverEnvironment {
    live: AtomicUsize,
}

impl SolverEnvironment {
    const fn new() -> Self {
        Self {
            live: AtomicUsize::new(0),
        }
    }

    /// The environment shared by every adapter in this process
    pub fn global() -> &'static SolverEnvironment {
        &GLOBAL_ENVIRONMENT
    }

    pub fn acquire(&'static self, backend: Backend) -> EnvironmentGuard {
        let previous = self.live.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            info!(backend = backend.name(), "solver environment initialised");
        }
        EnvironmentGuard {
            backend,
            environment: self,
        }
    }

    /// Number of live guards
    pub fn active(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct EnvironmentGuard {
    backend: Backend,
    environment: &'static SolverEnvironment,
}

impl Drop for EnvironmentGuard {
    fn drop(&mut self) {
        let previous = self.environment.live.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            info!(backend = self.backend.name(), "solver environment torn down");
        }
    }
}

/// [`SolverAdapter`] backed by `good_lp`.
///
/// A microlp solve that hits its time limit keeps running on its worker
/// thread. The adapter joins that thread before its next solve, so at most one
/// abandoned search is alive per adapter. One still running when the adapter
/// drops is left to finish on its own.
#[derive(Debug)]
pub struct GoodLpAdapter {
    backend: Backend,
    abandoned: Option<JoinHandle<()>>,
    _environment: EnvironmentGuard,
}

impl Default for GoodLpAdapter {
    fn default() -> Self {
        Self {
            backend: Backend::Microlp,
            abandoned: None,
            _environment: SolverEnvironment::global().acquire(Backend::Microlp),
        }
    }
}

impl GoodLpAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(backend: Backend) -> Result<Self, SolverError> {
        if !backend.is_available() {
            return Err(SolverError::Unavailable(backend.name()));
        }
        Ok(Self {
            backend,
            abandoned: None,
            _environment: SolverEnvironment::global().acquire(backend),
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Wait for the search left behind by the last timed-out solve
    fn join_abandoned(&mut self) {
        if let Some(handle) = self.abandoned.take() {
            debug!("waiting for the abandoned microlp search");
            if handle.join().is_err() {
                warn!("abandoned microlp search panicked");
            }
        }
    }

    /// microlp has no time limit of its own, so a limited solve runs on a
    /// worker thread and is abandoned when the limit elapses.
    fn solve_microlp_limited(&mut self, model: &MilpModel, limit: Duration) -> Result<RawSolverResult, SolverError> {
        let start = Instant::now();
        let (tx, rx) = mpsc::channel();
        let owned = model.clone();

        let handle = std::thread::Builder::new()
            .name("fuelpath-microlp".to_string())
            .spawn(move || {
                // the receiver is gone once the limit has elapsed
                let _ = tx.send(solve_microlp(&owned));
            })
            .map_err(|e| SolverError::Backend(format!("cannot spawn solver thread: {}", e)))?;

        match rx.recv_timeout(limit) {
            Ok(result) => {
                let _ = handle.join();
                result
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(limit_ms = limit.as_millis() as u64, "microlp hit the time limit");
                self.abandoned = Some(handle);
                Ok(RawSolverResult::timed_out(None, start.elapsed()))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(SolverError::Backend("solver thread exited without a result".to_string()))
            }
        }
    }
}

impl SolverAdapter for GoodLpAdapter {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn solve(&mut self, model: &MilpModel, time_limit: Option<Duration>) -> Result<RawSolverResult, SolverError> {
        model.check()?;
        self.join_abandoned();
        debug!(
            backend = self.backend.name(),
            variables = model.num_variables(),
            integers = model.num_integer_variables(),
            constraints = model.num_constraints(),
            "submitting model"
        );

        let result = match (self.backend, time_limit) {
            (Backend::Microlp, None) => solve_microlp(model),
            (Backend::Microlp, Some(limit)) => self.solve_microlp_limited(model, limit),
            (Backend::Highs, limit) => solve_highs(model, limit),
        }?;

        info!(
            backend = self.backend.name(),
            status = %result.status,
            objective = result.objective_value,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "solve finished"
        );
        Ok(result)
    }
}

/// Translate a [`MilpModel`] into `good_lp` variables and objective
fn translate(model: &MilpModel) -> (ProblemVariables, Vec<good_lp::Variable>, Expression) {
    let mut vars = ProblemVariables::new();
    let mut handles = Vec::with_capacity(model.num_variables());

    for v in &model.variables {
        let mut def = variable().name(v.name.clone());
        def = match v.kind {
            VarKind::Binary => def.binary(),
            VarKind::Integer => def.integer(),
            VarKind::Continuous => def,
        };
        if v.kind != VarKind::Binary {
            if v.lower.is_finite() {
                def = def.min(v.lower);
            }
            if v.upper.is_finite() {
                def = def.max(v.upper);
            }
        }
        handles.push(vars.add(def));
    }

    let mut objective = Expression::with_capacity(model.objective.terms.len());
    for &(var, coef) in &model.objective.terms {
        objective.add_mul(coef, handles[var]);
    }

    (vars, handles, objective)
}

fn to_constraints(model: &MilpModel, handles: &[good_lp::Variable]) -> Vec<good_lp::Constraint> {
    model
        .constraints
        .iter()
        .map(|c| {
            let mut lhs = Expression::with_capacity(c.terms.len());
            for &(var, coef) in &c.terms {
                lhs.add_mul(coef, handles[var]);
            }
            match c.op {
                ConstraintOp::Le => constraint::leq(lhs, c.rhs),
                ConstraintOp::Ge => constraint::geq(lhs, c.rhs),
                ConstraintOp::Eq => constraint::eq(lhs, c.rhs),
            }
        })
        .collect()
}

fn solve_microlp(model: &MilpModel) -> Result<RawSolverResult, SolverError> {
    let start = Instant::now();
    let (vars, handles, objective) = translate(model);
    let mut problem = vars.minimise(objective).using(microlp);
    for c in to_constraints(model, &handles) {
        problem = problem.with(c);
    }

    match problem.solve() {
        Ok(solution) => {
            let values: Vec<f64> = handles.iter().map(|&h| solution.value(h)).collect();
            let objective = model.objective_value(&values);
            Ok(RawSolverResult::optimal(values, objective, start.elapsed()))
        }
        Err(e) => map_resolution_error(e, start.elapsed()),
    }
}

#[cfg(feature = "highs")]
fn solve_highs(model: &MilpModel, time_limit: Option<Duration>) -> Result<RawSolverResult, SolverError> {
    use good_lp::solvers::highs::highs;

    let start = Instant::now();
    let (vars, handles, objective) = translate(model);
    let mut problem = vars.minimise(objective).using(highs).set_verbose(false);
    if let Some(limit) = time_limit {
        problem = problem.set_time_limit(limit.as_secs_f64());
    }
    for c in to_constraints(model, &handles) {
        problem = problem.with(c);
    }

    match problem.solve() {
        Ok(solution) => {
            let values: Vec<f64> = handles.iter().map(|&h| solution.value(h)).collect();
            let objective = model.objective_value(&values);
            let elapsed = start.elapsed();
            // HiGHS hands back its incumbent when it stops on the limit
            if time_limit.is_some_and(|limit| elapsed >= limit) {
                Ok(RawSolverResult::timed_out(Some((values, objective)), elapsed))
            } else {
                Ok(RawSolverResult::optimal(values, objective, elapsed))
            }
        }
        Err(e) => map_resolution_error(e, start.elapsed()),
    }
}

#[cfg(not(feature = "highs"))]
fn solve_highs(_model: &MilpModel, _time_limit: Option<Duration>) -> Result<RawSolverResult, SolverError> {
    Err(SolverError::Unavailable(Backend::Highs.name()))
}

fn map_resolution_error(e: ResolutionError, elapsed: Duration) -> Result<RawSolverResult, SolverError> {
    match e {
        ResolutionError::Infeasible => Ok(RawSolverResult::infeasible(elapsed)),
        ResolutionError::Unbounded => Ok(RawSolverResult::unbounded(elapsed)),
        other => Err(SolverError::Backend(other.to_string())),
    }
}
