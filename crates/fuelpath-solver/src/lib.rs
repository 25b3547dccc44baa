mod adapter;
mod problem;
mod solution;

pub use adapter::{Backend, EnvironmentGuard, GoodLpAdapter, SolverAdapter, SolverEnvironment, SolverError};
pub use problem::{Constraint, ConstraintOp, MilpModel, ModelCheckError, Objective, VarId, VarKind, Variable};
pub use solution::{RawSolverResult, SolveStatus};
