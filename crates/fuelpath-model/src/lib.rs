pub mod aircraft;
pub mod formulator;
pub mod generator;
pub mod interpreter;
pub mod network;
pub mod pipeline;
pub mod sensitivity;
pub mod solution;

#[cfg(feature = "serde")]
pub mod io;

pub use aircraft::AircraftParameters;
pub use formulator::{
    Formulation, FormulationError, FormulationOptions, Formulator, ObjectiveWeights, RefuelPolicy, VariableIndex,
};
pub use generator::{GeneratorError, GeneratorParameters, NetworkRecipe, generate};
pub use interpreter::{InterpretationError, Interpreter};
pub use network::{Arc, ModelError, Network, NetworkSummary, Node, NodeAttributes, NodeRole, RefuelStation};
pub use pipeline::{PipelineError, Scenario, SolveOptions, solve};
pub use sensitivity::{
    CancelToken, Outcome, Parameter, ParameterSpec, ParameterValue, SensitivityDriver, SensitivityEntry,
    SensitivityError, SensitivityTable, SubstitutionError, Sweep, apply, evaluate,
};

#[cfg(feature = "parallel")]
pub use sensitivity::run_parallel;

pub use solution::{ObjectiveBreakdown, PathPoint, RefuelStop, Solution};
