use fuelpath_solver::SolveStatus;

/// A route solution in domain terms
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub status: SolveStatus,
    /// Nodes from start to destination. Empty when no route was found
    pub path: Vec<PathPoint>,
    /// Refueling stops along `path`, in flight order
    pub refuels: Vec<RefuelStop>,
    /// Objective recomputed from the path. `None` when there is no path
    pub objective: Option<ObjectiveBreakdown>,
}

/// Fuel state at one node of the route
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct PathPoint {
    pub node: String,
    /// Fuel on landing. For the start node this is the initial fuel
    pub arrival_fuel: f64,
    /// Fuel taken on at this node
    pub refuel: f64,
    /// Fuel on take-off. Equal to the arrival fuel at the destination
    pub departure_fuel: f64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct RefuelStop {
    pub node: String,
    pub amount: f64,
    /// Unit cost times amount plus the stop cost, before weighting
    pub cost: f64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveBreakdown {
    /// Sum of arc distances along the path
    pub distance: f64,
    /// Sum of arc costs along the path
    pub arc_cost: f64,
    /// Sum of refueling costs along the path
    pub refuel_cost: f64,
    /// Weighted objective: `w_distance * arc_cost + w_refuel * refuel_cost`
    pub total: f64,
    /// Objective value reported by the solver
    pub solver_objective: Option<f64>,
}

impl Solution {
    /// A solution with no route, e.g. for an infeasible model
    pub fn without_path(status: SolveStatus) -> Self {
        Self {
            status,
            path: Vec::new(),
            refuels: Vec::new(),
            objective: None,
        }
    }

    pub fn infeasible() -> Self {
        Self::without_path(SolveStatus::Infeasible)
    }

    /// A route was found, optimal or not
    pub fn is_feasible(&self) -> bool {
        !self.path.is_empty()
    }

    pub fn objective_value(&self) -> Option<f64> {
        self.objective.map(|o| o.total)
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.path.iter().map(|p| p.node.as_str()).collect()
    }

    pub fn total_refuel(&self) -> f64 {
        self.refuels.iter().map(|r| r.amount).sum()
    }
}
