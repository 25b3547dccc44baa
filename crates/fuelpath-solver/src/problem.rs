use thiserror::Error;

/// Index of a variable inside a [`MilpModel`]
pub type VarId = usize;

/// A mixed integer linear program in minimisation form
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct MilpModel {
    /// Decision variables, addressed by [`VarId`]
    pub variables: Vec<Variable>,
    /// Objective function (always minimised)
    pub objective: Objective,
    /// Constraints
    pub constraints: Vec<Constraint>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Name for diagnostics, e.g. `x[s->m]`
    pub name: String,
    pub kind: VarKind,
    pub lower: f64,
    pub upper: f64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// Integer variable restricted to {0, 1}
    Binary,
    /// General integer variable
    Integer,
    /// Real-valued variable
    Continuous,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct Objective {
    /// Sparse coefficients `(variable, coefficient)`
    pub terms: Vec<(VarId, f64)>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Constraint {
    /// Name/label for the constraint (for diagnostics)
    pub name: String,
    /// Sparse coefficients `(variable, coefficient)`
    pub terms: Vec<(VarId, f64)>,
    /// Comparison operator
    pub op: ConstraintOp,
    /// Right-hand side value
    pub rhs: f64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    /// Less than or equal (<=)
    Le,
    /// Greater than or equal (>=)
    Ge,
    /// Equal (=)
    Eq,
}

/// Structural problems found by [`MilpModel::check`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelCheckError {
    #[error("Variable {name} has invalid bounds [{lower}, {upper}]")]
    InvalidBounds { name: String, lower: f64, upper: f64 },
    #[error("{owner} references unknown variable index {index}")]
    UnknownVariable { owner: String, index: VarId },
    #[error("{0} has a non-finite coefficient or right-hand side")]
    NonFinite(String),
}

impl MilpModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binary(&mut self, name: impl Into<String>) -> VarId {
        self.add_variable(name, VarKind::Binary, 0.0, 1.0)
    }

    pub fn add_continuous(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> VarId {
        self.add_variable(name, VarKind::Continuous, lower, upper)
    }

    pub fn add_variable(&mut self, name: impl Into<String>, kind: VarKind, lower: f64, upper: f64) -> VarId {
        self.variables.push(Variable {
            name: name.into(),
            kind,
            lower,
            upper,
        });
        self.variables.len() - 1
    }

    /// Add `coefficient * var` to the objective
    pub fn add_objective_term(&mut self, var: VarId, coefficient: f64) {
        if coefficient != 0.0 {
            self.objective.terms.push((var, coefficient));
        }
    }

    pub fn add_constraint(&mut self, name: impl Into<String>, terms: Vec<(VarId, f64)>, op: ConstraintOp, rhs: f64) {
        self.constraints.push(Constraint {
            name: name.into(),
            terms,
            op,
            rhs,
        });
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Number of binary and integer variables
    pub fn num_integer_variables(&self) -> usize {
        self.variables
            .iter()
            .filter(|v| v.kind != VarKind::Continuous)
            .count()
    }

    /// Evaluate the objective at the given assignment
    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.objective
            .terms
            .iter()
            .map(|&(var, coef)| coef * values.get(var).copied().unwrap_or(0.0))
            .sum()
    }

    /// Verify bounds, indices and coefficients before handing the model to a solver
    pub fn check(&self) -> Result<(), ModelCheckError> {
        for v in &self.variables {
            if v.lower.is_nan() || v.upper.is_nan() || v.lower > v.upper {
                return Err(ModelCheckError::InvalidBounds {
                    name: v.name.clone(),
                    lower: v.lower,
                    upper: v.upper,
                });
            }
        }

        let n = self.variables.len();
        for &(var, coef) in &self.objective.terms {
            if var >= n {
                return Err(ModelCheckError::UnknownVariable {
                    owner: "objective".to_string(),
                    index: var,
                });
            }
            if !coef.is_finite() {
                return Err(ModelCheckError::NonFinite("objective".to_string()));
            }
        }

        for c in &self.constraints {
            if !c.rhs.is_finite() {
                return Err(ModelCheckError::NonFinite(c.name.clone()));
            }
            for &(var, coef) in &c.terms {
                if var >= n {
                    return Err(ModelCheckError::UnknownVariable {
                        owner: c.name.clone(),
                        index: var,
                    });
                }
                if !coef.is_finite() {
                    return Err(ModelCheckError::NonFinite(c.name.clone()));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_small_model() {
        let mut model = MilpModel::new();
        let x = model.add_binary("x");
        let y = model.add_continuous("y", 0.0, 10.0);
        model.add_objective_term(x, 3.0);
        model.add_objective_term(y, 1.0);
        model.add_objective_term(y, 0.0);
        model.add_constraint("link", vec![(y, 1.0), (x, -10.0)], ConstraintOp::Le, 0.0);

        assert_eq!(model.num_variables(), 2);
        assert_eq!(model.num_constraints(), 1);
        assert_eq!(model.num_integer_variables(), 1);
        assert_eq!(model.objective.terms.len(), 2, "zero coefficients are dropped");
        assert_eq!(model.objective_value(&[1.0, 4.0]), 7.0);
        assert!(model.check().is_ok());
    }

    #[test]
    fn test_check_rejects_inverted_bounds() {
        let mut model = MilpModel::new();
        model.add_continuous("f", 5.0, 1.0);

        assert!(matches!(model.check(), Err(ModelCheckError::InvalidBounds { .. })));
    }

    #[test]
    fn test_check_rejects_unknown_variable() {
        let mut model = MilpModel::new();
        model.add_binary("x");
        model.add_constraint("bad", vec![(3, 1.0)], ConstraintOp::Eq, 1.0);

        assert_eq!(
            model.check(),
            Err(ModelCheckError::UnknownVariable {
                owner: "bad".to_string(),
                index: 3
            })
        );
    }

    #[test]
    fn test_check_rejects_non_finite_rhs() {
        let mut model = MilpModel::new();
        let x = model.add_binary("x");
        model.add_constraint("inf", vec![(x, 1.0)], ConstraintOp::Le, f64::INFINITY);

        assert!(matches!(model.check(), Err(ModelCheckError::NonFinite(_))));
    }
}
