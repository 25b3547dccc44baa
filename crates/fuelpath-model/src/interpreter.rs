use fuelpath_solver::{RawSolverResult, SolveStatus};
use thiserror::Error;
use tracing::{debug, warn};

use crate::formulator::Formulation;
use crate::network::RefuelStation;
use crate::solution::{ObjectiveBreakdown, PathPoint, RefuelStop, Solution};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpretationError {
    #[error("Broken path at {node}: {reason}")]
    BrokenPath { node: String, reason: String },
    #[error("Fuel at {node} drops to {level}, below the reserve {reserve}")]
    FuelViolation { node: String, level: f64, reserve: f64 },
    #[error("Fuel at {node} reaches {level}, above the capacity {capacity}")]
    CapacityExceeded { node: String, level: f64, capacity: f64 },
    #[error("Solver reported {status} with {found} values, expected {expected}")]
    MissingValues {
        status: SolveStatus,
        expected: usize,
        found: usize,
    },
}

/// Threshold above which a binary counts as selected
const SELECTED: f64 = 0.5;

/// Maps raw solver output back to a route and checks it independently
#[derive(Debug, Clone, Copy)]
pub struct Interpreter {
    /// Relative tolerance for fuel checks, scaled by `max(1, capacity)`
    tolerance: f64,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self { tolerance: 1e-6 }
    }
}

impl Interpreter {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    pub fn interpret(&self, f: &Formulation<'_>, raw: &RawSolverResult) -> Result<Solution, InterpretationError> {
        let values = match (raw.status, raw.values.as_deref()) {
            (SolveStatus::Infeasible | SolveStatus::Unbounded, _) => {
                return Ok(Solution::without_path(raw.status));
            }
            (SolveStatus::TimedOut, None) => return Ok(Solution::without_path(raw.status)),
            (status, None) => {
                return Err(InterpretationError::MissingValues {
                    status,
                    expected: f.model.num_variables(),
                    found: 0,
                });
            }
            (status, Some(values)) if values.len() != f.model.num_variables() => {
                return Err(InterpretationError::MissingValues {
                    status,
                    expected: f.model.num_variables(),
                    found: values.len(),
                });
            }
            (_, Some(values)) => values,
        };

        let arcs = self.follow_path(f, values)?;
        let (path, refuels) = self.fuel_profile(f, values, &arcs)?;

        let weights = f.options.weights;
        let arc_cost: f64 = arcs.iter().map(|&a| f.costs[a]).sum();
        let distance: f64 = arcs.iter().map(|&a| f.network.arcs[a].distance).sum();
        let refuel_cost: f64 = refuels.iter().map(|r| r.cost).sum();
        let total = weights.distance * arc_cost + weights.refuel * refuel_cost;

        if let Some(reported) = raw.objective_value {
            if (reported - total).abs() > self.slack(total.abs()) {
                warn!(reported, recomputed = total, "solver objective differs from the recomputed route cost");
            }
        }

        Ok(Solution {
            status: raw.status,
            path,
            refuels,
            objective: Some(ObjectiveBreakdown {
                distance,
                arc_cost,
                refuel_cost,
                total,
                solver_objective: raw.objective_value,
            }),
        })
    }

    fn slack(&self, scale: f64) -> f64 {
        self.tolerance * scale.max(1.0)
    }

    /// Follow selected arcs from the start to the destination.
    /// Returns the arc positions in flight order.
    fn follow_path(&self, f: &Formulation<'_>, values: &[f64]) -> Result<Vec<usize>, InterpretationError> {
        let selected = |a: usize| values[f.vars.arcs[a]] > SELECTED;
        let node_id = |n: usize| f.network.nodes[n].id.clone();

        let mut visited = vec![false; f.network.nodes.len()];
        let mut arcs = Vec::new();
        let mut current = f.start;
        visited[current] = true;

        while current != f.destination {
            let mut leaving = f.outgoing[current].iter().copied().filter(|&a| selected(a));
            let Some(arc) = leaving.next() else {
                return Err(InterpretationError::BrokenPath {
                    node: node_id(current),
                    reason: "no selected arc leaves this node".to_string(),
                });
            };
            if leaving.next().is_some() {
                return Err(InterpretationError::BrokenPath {
                    node: node_id(current),
                    reason: "more than one selected arc leaves this node".to_string(),
                });
            }

            let next = f.heads[arc];
            if visited[next] {
                return Err(InterpretationError::BrokenPath {
                    node: node_id(next),
                    reason: "node visited twice".to_string(),
                });
            }
            visited[next] = true;
            arcs.push(arc);
            current = next;
        }

        let stray = (0..f.network.arcs.len()).filter(|&a| selected(a)).count() - arcs.len();
        if stray > 0 {
            warn!(stray, "selected arcs outside the route are ignored");
        }
        debug!(legs = arcs.len(), "reconstructed route");
        Ok(arcs)
    }

    /// Recompute fuel along the route from burns and refuel decisions only
    fn fuel_profile(
        &self,
        f: &Formulation<'_>,
        values: &[f64],
        arcs: &[usize],
    ) -> Result<(Vec<PathPoint>, Vec<RefuelStop>), InterpretationError> {
        let capacity = f.aircraft.capacity;
        let reserve = f.aircraft.reserve;
        let slack = self.slack(capacity);

        let refuel_at = |n: usize| -> f64 {
            let amount = f.vars.refuel[n].map(|v| values[v]).unwrap_or(0.0);
            if amount > slack { amount } else { 0.0 }
        };
        // a zero-amount stop only counts when it is charged for
        let stopped_at = |n: usize, amount: f64, station: RefuelStation| -> bool {
            amount > 0.0 || (station.stop_cost > 0.0 && f.vars.stop[n].is_some_and(|v| values[v] > SELECTED))
        };

        let mut path = Vec::with_capacity(arcs.len() + 1);
        let mut refuels = Vec::new();

        let mut visit = |n: usize, arrival: f64| -> Result<f64, InterpretationError> {
            let node = &f.network.nodes[n];
            let below_reserve = |level: f64| InterpretationError::FuelViolation {
                node: node.id.clone(),
                level,
                reserve,
            };
            // the start may hold less than the reserve before it refuels
            let arrival = if n == f.start {
                arrival
            } else if arrival < reserve - slack {
                return Err(below_reserve(arrival));
            } else {
                arrival.max(reserve)
            };

            let amount = refuel_at(n);
            let departure = arrival + amount;
            if departure < reserve - slack {
                return Err(below_reserve(departure));
            }
            if departure > capacity + slack {
                return Err(InterpretationError::CapacityExceeded {
                    node: node.id.clone(),
                    level: departure,
                    capacity,
                });
            }
            let departure = departure.max(reserve).min(capacity);

            if let Some(station) = node.refuel.filter(|&station| stopped_at(n, amount, station)) {
                refuels.push(RefuelStop {
                    node: node.id.clone(),
                    amount,
                    cost: station.cost_of(amount),
                });
            }
            path.push(PathPoint {
                node: node.id.clone(),
                arrival_fuel: arrival,
                refuel: amount,
                departure_fuel: departure,
            });
            Ok(departure)
        };

        let mut fuel = visit(f.start, f.aircraft.initial_fuel())?;
        for &a in arcs {
            fuel = visit(f.heads[a], fuel - f.burns[a])?;
        }

        Ok((path, refuels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aircraft::AircraftParameters;
    use crate::formulator::Formulator;
    use crate::network::{Network, NodeAttributes};
    use std::time::Duration;

    fn line() -> Network {
        let mut network = Network::new();
        network.add_node("s", NodeAttributes::start());
        network.add_node("m", NodeAttributes::waypoint().with_refuel(5.0, 0.0));
        network.add_node("t", NodeAttributes::destination());
        network.add_arc("s", "m", 100.0, 100.0);
        network.add_arc("m", "t", 100.0, 100.0);
        network
    }

    /// Assignment selecting the given arcs and refueling `refuel` at `m`
    fn assignment(f: &Formulation<'_>, arcs: &[usize], refuel: f64) -> Vec<f64> {
        let mut values = vec![0.0; f.model.num_variables()];
        for &a in arcs {
            values[f.vars.arcs[a]] = 1.0;
        }
        if let (Some(r), Some(y)) = (f.vars.refuel[1], f.vars.stop[1]) {
            values[r] = refuel;
            values[y] = if refuel > 0.0 { 1.0 } else { 0.0 };
        }
        values
    }

    fn optimal(values: Vec<f64>, objective: f64) -> RawSolverResult {
        RawSolverResult::optimal(values, objective, Duration::ZERO)
    }

    #[test]
    fn test_reconstructs_path_and_fuel() {
        let network = line();
        let aircraft = AircraftParameters::new(150.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        let raw = optimal(assignment(&f, &[0, 1], 100.0), 700.0);
        let solution = Interpreter::default().interpret(&f, &raw).unwrap();

        assert_eq!(solution.node_ids(), vec!["s", "m", "t"]);
        assert_eq!(solution.path[1].arrival_fuel, 50.0);
        assert_eq!(solution.path[1].refuel, 100.0);
        assert_eq!(solution.path[1].departure_fuel, 150.0);
        assert_eq!(solution.path[2].arrival_fuel, 50.0);
        assert_eq!(solution.refuels.len(), 1);
        assert_eq!(solution.refuels[0].cost, 500.0);

        let objective = solution.objective.unwrap();
        assert_eq!(objective.distance, 200.0);
        assert_eq!(objective.refuel_cost, 500.0);
        assert_eq!(objective.total, 700.0);
    }

    #[test]
    fn test_infeasible_has_no_path() {
        let network = line();
        let aircraft = AircraftParameters::new(150.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        let solution = Interpreter::default()
            .interpret(&f, &RawSolverResult::infeasible(Duration::ZERO))
            .unwrap();

        assert_eq!(solution.status, SolveStatus::Infeasible);
        assert!(!solution.is_feasible());
        assert!(solution.objective.is_none());
    }

    #[test]
    fn test_timed_out_without_incumbent() {
        let network = line();
        let aircraft = AircraftParameters::new(150.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        let solution = Interpreter::default()
            .interpret(&f, &RawSolverResult::timed_out(None, Duration::from_secs(1)))
            .unwrap();

        assert_eq!(solution.status, SolveStatus::TimedOut);
        assert!(!solution.is_feasible());
    }

    #[test]
    fn test_timed_out_incumbent_is_flagged() {
        let network = line();
        let aircraft = AircraftParameters::new(250.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        let raw = RawSolverResult::timed_out(Some((assignment(&f, &[0, 1], 0.0), 200.0)), Duration::from_secs(1));
        let solution = Interpreter::default().interpret(&f, &raw).unwrap();

        assert_eq!(solution.status, SolveStatus::TimedOut);
        assert_eq!(solution.objective_value(), Some(200.0));
    }

    #[test]
    fn test_broken_path() {
        let network = line();
        let aircraft = AircraftParameters::new(250.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        let raw = optimal(assignment(&f, &[0], 0.0), 100.0);
        let err = Interpreter::default().interpret(&f, &raw).unwrap_err();

        assert!(matches!(err, InterpretationError::BrokenPath { ref node, .. } if node == "m"));
    }

    #[test]
    fn test_revisit_is_broken_path() {
        let mut network = line();
        network.add_arc("m", "s", 10.0, 10.0);
        network.add_arc("s", "t", 500.0, 500.0);
        let aircraft = AircraftParameters::new(250.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        // s -> m -> s loops back instead of reaching t
        let raw = optimal(assignment(&f, &[0, 2], 0.0), 110.0);
        let err = Interpreter::default().interpret(&f, &raw).unwrap_err();

        assert!(matches!(err, InterpretationError::BrokenPath { ref node, .. } if node == "s"));
    }

    #[test]
    fn test_fuel_violation_detected() {
        let network = line();
        let aircraft = AircraftParameters::new(150.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        // both legs selected but no refuel at m: lands at t with -50
        let raw = optimal(assignment(&f, &[0, 1], 0.0), 200.0);
        let err = Interpreter::default().interpret(&f, &raw).unwrap_err();

        assert_eq!(
            err,
            InterpretationError::FuelViolation {
                node: "t".to_string(),
                level: -50.0,
                reserve: 0.0
            }
        );
    }

    #[test]
    fn test_overfill_detected() {
        let network = line();
        let aircraft = AircraftParameters::new(150.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        let raw = optimal(assignment(&f, &[0, 1], 140.0), 900.0);
        let err = Interpreter::default().interpret(&f, &raw).unwrap_err();

        assert!(matches!(err, InterpretationError::CapacityExceeded { ref node, .. } if node == "m"));
    }

    #[test]
    fn test_optimal_without_values() {
        let network = line();
        let aircraft = AircraftParameters::new(150.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        let raw = RawSolverResult {
            status: SolveStatus::Optimal,
            values: Some(vec![1.0]),
            objective_value: Some(0.0),
            elapsed: Duration::ZERO,
        };
        let err = Interpreter::default().interpret(&f, &raw).unwrap_err();

        assert!(matches!(err, InterpretationError::MissingValues { found: 1, .. }));
    }

    #[test]
    fn test_numerical_slack_is_snapped() {
        let network = line();
        let aircraft = AircraftParameters::new(150.0).with_reserve(50.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        let raw = optimal(assignment(&f, &[0, 1], 100.0 - 1e-9), 500.0);
        let solution = Interpreter::default().interpret(&f, &raw).unwrap();

        assert_eq!(solution.path.last().unwrap().arrival_fuel, 50.0);
    }

    #[test]
    fn test_idle_stop_at_free_station_is_not_reported() {
        let mut network = line();
        network.node_mut("m").unwrap().refuel = Some(RefuelStation::default());
        let aircraft = AircraftParameters::new(250.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        let mut values = assignment(&f, &[0, 1], 0.0);
        values[f.vars.stop[1].unwrap()] = 1.0;
        let solution = Interpreter::default().interpret(&f, &optimal(values, 200.0)).unwrap();

        assert!(solution.refuels.is_empty());
        assert_eq!(solution.path[1].refuel, 0.0);
    }

    #[test]
    fn test_idle_stop_with_stop_cost_is_reported() {
        let mut network = line();
        network.node_mut("m").unwrap().refuel = Some(RefuelStation {
            unit_cost: 5.0,
            stop_cost: 30.0,
        });
        let aircraft = AircraftParameters::new(250.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        let mut values = assignment(&f, &[0, 1], 0.0);
        values[f.vars.stop[1].unwrap()] = 1.0;
        let solution = Interpreter::default().interpret(&f, &optimal(values, 230.0)).unwrap();

        assert_eq!(solution.refuels.len(), 1);
        assert_eq!(solution.refuels[0].amount, 0.0);
        assert_eq!(solution.refuels[0].cost, 30.0);
    }
}
