use std::time::Duration;

/// What an external solver returned for a [`crate::MilpModel`]
#[derive(Debug, Clone)]
pub struct RawSolverResult {
    /// Solution status
    pub status: SolveStatus,
    /// One value per model variable. `None` when the solver produced no assignment
    pub values: Option<Vec<f64>>,
    /// Objective value at `values`, as evaluated on the model
    pub objective_value: Option<f64>,
    /// Wall-clock time spent in the solver
    pub elapsed: Duration,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// An optimal solution was found
    Optimal,
    /// The problem is infeasible (no solution exists)
    Infeasible,
    /// The problem is unbounded
    Unbounded,
    /// The time limit elapsed; any values are the best found, not proven optimal
    TimedOut,
}

impl SolveStatus {
    pub fn is_optimal(self) -> bool {
        self == SolveStatus::Optimal
    }
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SolveStatus::Optimal => "OPTIMAL",
            SolveStatus::Infeasible => "INFEASIBLE",
            SolveStatus::Unbounded => "UNBOUNDED",
            SolveStatus::TimedOut => "TIMED OUT",
        };
        f.pad(s)
    }
}

impl RawSolverResult {
    pub fn optimal(values: Vec<f64>, objective_value: f64, elapsed: Duration) -> Self {
        Self {
            status: SolveStatus::Optimal,
            values: Some(values),
            objective_value: Some(objective_value),
            elapsed,
        }
    }

    pub fn infeasible(elapsed: Duration) -> Self {
        Self {
            status: SolveStatus::Infeasible,
            values: None,
            objective_value: None,
            elapsed,
        }
    }

    pub fn unbounded(elapsed: Duration) -> Self {
        Self {
            status: SolveStatus::Unbounded,
            values: None,
            objective_value: None,
            elapsed,
        }
    }

    /// A timed-out solve, optionally carrying the incumbent
    pub fn timed_out(incumbent: Option<(Vec<f64>, f64)>, elapsed: Duration) -> Self {
        let (values, objective_value) = match incumbent {
            Some((values, objective)) => (Some(values), Some(objective)),
            None => (None, None),
        };
        Self {
            status: SolveStatus::TimedOut,
            values,
            objective_value,
            elapsed,
        }
    }

    /// Value of a single variable, if the solver produced an assignment
    pub fn value(&self, var: crate::VarId) -> Option<f64> {
        self.values.as_ref().and_then(|v| v.get(var).copied())
    }
}
