use std::collections::VecDeque;

use fuelpath_solver::{ConstraintOp, MilpModel, VarId};
use thiserror::Error;
use tracing::debug;

use crate::aircraft::AircraftParameters;
use crate::network::{ModelError, Network, NodeRole};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulationError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Arc {from} -> {to} has no fuel burn and no burn rate is configured")]
    MissingFuelBurn { from: String, to: String },
}

/// Weights of the two objective components
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveWeights {
    /// Weight on the summed arc cost
    #[cfg_attr(feature = "serde", serde(default = "default_weight"))]
    pub distance: f64,
    /// Weight on refueling cost (unit and stop costs)
    #[cfg_attr(feature = "serde", serde(default = "default_weight"))]
    pub refuel: f64,
}

#[cfg(feature = "serde")]
fn default_weight() -> f64 {
    1.0
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            distance: 1.0,
            refuel: 1.0,
        }
    }
}

/// How much fuel is taken on at a refueling stop
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefuelPolicy {
    /// The amount is a free decision; with a positive unit cost the optimum takes
    /// exactly the deficit needed to finish the route
    #[default]
    Minimum,
    /// Every stop fills the tank to capacity
    TopOff,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FormulationOptions {
    #[cfg_attr(feature = "serde", serde(default))]
    pub weights: ObjectiveWeights,
    #[cfg_attr(feature = "serde", serde(default))]
    pub refuel_policy: RefuelPolicy,
}

/// Solver variables belonging to each arc and node
#[derive(Debug, Clone)]
pub struct VariableIndex {
    /// Arc selection binary, by arc position
    pub arcs: Vec<VarId>,
    /// Departure fuel level, by node position
    pub fuel: Vec<VarId>,
    /// Refuel amount, for refueling points other than the destination
    pub refuel: Vec<Option<VarId>>,
    /// Refuel stop binary, alongside `refuel`
    pub stop: Vec<Option<VarId>>,
}

/// A MILP model together with everything needed to read its solution back
#[derive(Debug, Clone)]
pub struct Formulation<'a> {
    pub network: &'a Network,
    pub aircraft: &'a AircraftParameters,
    pub options: FormulationOptions,
    pub model: MilpModel,
    pub vars: VariableIndex,
    /// Resolved fuel burn per arc
    pub burns: Vec<f64>,
    /// Resolved objective cost per arc
    pub costs: Vec<f64>,
    /// Arc positions leaving each node
    pub outgoing: Vec<Vec<usize>>,
    /// Arc positions entering each node
    pub incoming: Vec<Vec<usize>>,
    /// Node position each arc leaves from
    pub tails: Vec<usize>,
    /// Node position each arc leads to
    pub heads: Vec<usize>,
    pub start: usize,
    pub destination: usize,
}

impl Formulation<'_> {
    /// True when the destination cannot be reached from the start along any
    /// arcs, so the model has no solution regardless of fuel. Flow rows with
    /// no arcs are never emitted, so callers check this before solving.
    pub fn is_disconnected(&self) -> bool {
        let mut seen = vec![false; self.network.nodes.len()];
        let mut queue = VecDeque::from([self.start]);
        seen[self.start] = true;
        while let Some(node) = queue.pop_front() {
            if node == self.destination {
                return false;
            }
            for &a in &self.outgoing[node] {
                let next = self.heads[a];
                if !seen[next] {
                    seen[next] = true;
                    queue.push_back(next);
                }
            }
        }
        true
    }
}

/// Builds the refueling route MILP.
///
/// Constraint families and their big-M values (`C` capacity, `R` reserve,
/// `b` burn of the arc):
///
/// * fuel balance `fuel[j] <= fuel[i] - b + refuel[j]` when the arc is
///   selected, `M = C - R + b`
/// * fuel floor `fuel[j] >= fuel[i] - b + refuel[j]` when selected,
///   `M = max(0, 2(C - R) - b)` into a refueling point and
///   `M = max(0, C - R - b)` otherwise. Together with the balance this makes
///   departure fuel exactly arrival plus refuel on the route
/// * arrival reserve `fuel[i] - b >= R` when selected; the bound on `fuel[i]`
///   already covers the inactive case, so no M is needed
/// * no overfill `fuel[i] - b + refuel[j] <= C` when selected,
///   `M = max(0, C - R - b)`
/// * refuel link `refuel[n] <= (C - R) * stop[n]`
pub struct Formulator {
    options: FormulationOptions,
}

impl Default for Formulator {
    fn default() -> Self {
        Self::new(FormulationOptions::default())
    }
}

impl Formulator {
    pub fn new(options: FormulationOptions) -> Self {
        Self { options }
    }

    pub fn build<'a>(
        &self,
        network: &'a Network,
        aircraft: &'a AircraftParameters,
    ) -> Result<Formulation<'a>, FormulationError> {
        network.validate()?;
        aircraft.check().map_err(FormulationError::InvalidParameters)?;
        self.check_weights()?;

        let index = network.index();
        let n_nodes = network.nodes.len();
        let capacity = aircraft.capacity;
        let reserve = aircraft.reserve;
        let headroom = capacity - reserve;

        let mut burns = Vec::with_capacity(network.arcs.len());
        let mut costs = Vec::with_capacity(network.arcs.len());
        let mut outgoing = vec![Vec::new(); n_nodes];
        let mut incoming = vec![Vec::new(); n_nodes];
        let mut tails = Vec::with_capacity(network.arcs.len());
        let mut heads = Vec::with_capacity(network.arcs.len());
        for (a, arc) in network.arcs.iter().enumerate() {
            let burn = arc
                .fuel_burn
                .or_else(|| aircraft.burn_for(arc.distance))
                .ok_or_else(|| FormulationError::MissingFuelBurn {
                    from: arc.from.clone(),
                    to: arc.to.clone(),
                })?;
            burns.push(burn);
            costs.push(arc.cost());
            // validate() guarantees both endpoints exist
            let (i, j) = (index[arc.from.as_str()], index[arc.to.as_str()]);
            outgoing[i].push(a);
            incoming[j].push(a);
            tails.push(i);
            heads.push(j);
        }

        let start = network
            .nodes
            .iter()
            .position(|n| n.role == NodeRole::Start)
            .ok_or(ModelError::NoStartOrDestination)?;
        let destination = network
            .nodes
            .iter()
            .position(|n| n.role == NodeRole::Destination)
            .ok_or(ModelError::NoStartOrDestination)?;

        let mut model = MilpModel::new();

        // Variables
        let arc_vars: Vec<VarId> = network
            .arcs
            .iter()
            .map(|arc| model.add_binary(format!("x[{}->{}]", arc.from, arc.to)))
            .collect();
        let fuel_vars: Vec<VarId> = network
            .nodes
            .iter()
            .map(|node| model.add_continuous(format!("fuel[{}]", node.id), reserve, capacity))
            .collect();
        let mut refuel_vars = vec![None; n_nodes];
        let mut stop_vars = vec![None; n_nodes];
        for (n, node) in network.nodes.iter().enumerate() {
            if node.refuel.is_some() && n != destination {
                refuel_vars[n] = Some(model.add_continuous(format!("refuel[{}]", node.id), 0.0, headroom));
                stop_vars[n] = Some(model.add_binary(format!("stop[{}]", node.id)));
            }
        }

        // Flow conservation
        for (n, node) in network.nodes.iter().enumerate() {
            let out_terms: Vec<(VarId, f64)> = outgoing[n].iter().map(|&a| (arc_vars[a], 1.0)).collect();
            let in_terms: Vec<(VarId, f64)> = incoming[n].iter().map(|&a| (arc_vars[a], 1.0)).collect();

            if n == start {
                if !out_terms.is_empty() {
                    model.add_constraint(format!("flow_out[{}]", node.id), out_terms, ConstraintOp::Eq, 1.0);
                }
                if !in_terms.is_empty() {
                    model.add_constraint(format!("flow_in[{}]", node.id), in_terms, ConstraintOp::Eq, 0.0);
                }
            } else if n == destination {
                if !in_terms.is_empty() {
                    model.add_constraint(format!("flow_in[{}]", node.id), in_terms, ConstraintOp::Eq, 1.0);
                }
                if !out_terms.is_empty() {
                    model.add_constraint(format!("flow_out[{}]", node.id), out_terms, ConstraintOp::Eq, 0.0);
                }
            } else {
                if out_terms.is_empty() && in_terms.is_empty() {
                    continue;
                }
                let balance: Vec<(VarId, f64)> = in_terms
                    .iter()
                    .copied()
                    .chain(out_terms.iter().map(|&(v, _)| (v, -1.0)))
                    .collect();
                model.add_constraint(format!("flow_balance[{}]", node.id), balance, ConstraintOp::Eq, 0.0);
                if !in_terms.is_empty() {
                    model.add_constraint(format!("visit_once[{}]", node.id), in_terms, ConstraintOp::Le, 1.0);
                }
            }
        }

        // Departure fuel at the start
        let mut start_terms = vec![(fuel_vars[start], 1.0)];
        if let Some(r) = refuel_vars[start] {
            start_terms.push((r, -1.0));
        }
        model.add_constraint("initial_fuel", start_terms, ConstraintOp::Eq, aircraft.initial_fuel());

        // Fuel along selected arcs
        for (a, arc) in network.arcs.iter().enumerate() {
            let (i, j) = (tails[a], heads[a]);
            let x = arc_vars[a];
            let burn = burns[a];
            let label = format!("{}->{}", arc.from, arc.to);

            let big_m = headroom + burn;
            let mut balance = vec![(fuel_vars[j], 1.0), (fuel_vars[i], -1.0), (x, big_m)];
            if let Some(r) = refuel_vars[j] {
                balance.push((r, -1.0));
            }
            model.add_constraint(format!("fuel_balance[{}]", label), balance, ConstraintOp::Le, big_m - burn);

            let refuel_room = if refuel_vars[j].is_some() { headroom } else { 0.0 };
            let big_m = (headroom + refuel_room - burn).max(0.0);
            let mut floor = vec![(fuel_vars[j], 1.0), (fuel_vars[i], -1.0), (x, -big_m)];
            if let Some(r) = refuel_vars[j] {
                floor.push((r, -1.0));
            }
            model.add_constraint(format!("fuel_floor[{}]", label), floor, ConstraintOp::Ge, -big_m - burn);

            if burn > 0.0 {
                model.add_constraint(
                    format!("arrival_reserve[{}]", label),
                    vec![(fuel_vars[i], 1.0), (x, -burn)],
                    ConstraintOp::Ge,
                    reserve,
                );
            }

            if let Some(r) = refuel_vars[j] {
                let big_m = (headroom - burn).max(0.0);
                model.add_constraint(
                    format!("no_overfill[{}]", label),
                    vec![(fuel_vars[i], 1.0), (r, 1.0), (x, big_m)],
                    ConstraintOp::Le,
                    capacity + burn + big_m,
                );
            }
        }

        // Refueling stops
        for (n, node) in network.nodes.iter().enumerate() {
            let (Some(r), Some(y)) = (refuel_vars[n], stop_vars[n]) else {
                continue;
            };
            model.add_constraint(
                format!("refuel_link[{}]", node.id),
                vec![(r, 1.0), (y, -headroom)],
                ConstraintOp::Le,
                0.0,
            );
            if n != start {
                let mut visited = vec![(y, 1.0)];
                visited.extend(incoming[n].iter().map(|&a| (arc_vars[a], -1.0)));
                model.add_constraint(format!("stop_if_visited[{}]", node.id), visited, ConstraintOp::Le, 0.0);
            }
            if self.options.refuel_policy == RefuelPolicy::TopOff {
                model.add_constraint(
                    format!("top_off[{}]", node.id),
                    vec![(fuel_vars[n], 1.0), (y, -capacity)],
                    ConstraintOp::Ge,
                    0.0,
                );
            }
        }

        // Objective
        let weights = self.options.weights;
        for (a, &x) in arc_vars.iter().enumerate() {
            model.add_objective_term(x, weights.distance * costs[a]);
        }
        for (n, node) in network.nodes.iter().enumerate() {
            let (Some(station), Some(r), Some(y)) = (node.refuel, refuel_vars[n], stop_vars[n]) else {
                continue;
            };
            model.add_objective_term(r, weights.refuel * station.unit_cost);
            model.add_objective_term(y, weights.refuel * station.stop_cost);
        }

        debug!(
            nodes = n_nodes,
            arcs = network.arcs.len(),
            variables = model.num_variables(),
            constraints = model.num_constraints(),
            "formulated refueling model"
        );

        Ok(Formulation {
            network,
            aircraft,
            options: self.options,
            model,
            vars: VariableIndex {
                arcs: arc_vars,
                fuel: fuel_vars,
                refuel: refuel_vars,
                stop: stop_vars,
            },
            burns,
            costs,
            outgoing,
            incoming,
            tails,
            heads,
            start,
            destination,
        })
    }

    fn check_weights(&self) -> Result<(), FormulationError> {
        let w = self.options.weights;
        for (name, value) in [("distance weight", w.distance), ("refuel weight", w.refuel)] {
            if !value.is_finite() || value < 0.0 {
                return Err(FormulationError::InvalidParameters(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NodeAttributes;

    fn line(refuel_at_mid: bool) -> Network {
        let mut network = Network::new();
        network.add_node("s", NodeAttributes::start());
        let mid = if refuel_at_mid {
            NodeAttributes::waypoint().with_refuel(5.0, 0.0)
        } else {
            NodeAttributes::waypoint()
        };
        network.add_node("m", mid);
        network.add_node("t", NodeAttributes::destination());
        network.add_arc("s", "m", 100.0, 100.0);
        network.add_arc("m", "t", 100.0, 100.0);
        network
    }

    fn constraint<'m>(model: &'m MilpModel, name: &str) -> Option<&'m fuelpath_solver::Constraint> {
        model.constraints.iter().find(|c| c.name == name)
    }

    #[test]
    fn test_variables_per_arc_and_node() {
        let network = line(false);
        let aircraft = AircraftParameters::new(250.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        assert_eq!(f.vars.arcs.len(), 2);
        assert_eq!(f.vars.fuel.len(), 3);
        assert!(f.vars.refuel.iter().all(Option::is_none));
        assert_eq!(f.model.num_variables(), 5);
        assert_eq!(f.model.num_integer_variables(), 2);

        let fuel_s = &f.model.variables[f.vars.fuel[0]];
        assert_eq!((fuel_s.lower, fuel_s.upper), (0.0, 250.0));
    }

    #[test]
    fn test_flow_constraints() {
        let network = line(false);
        let aircraft = AircraftParameters::new(250.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        let out_s = constraint(&f.model, "flow_out[s]").unwrap();
        assert_eq!(out_s.op, ConstraintOp::Eq);
        assert_eq!(out_s.rhs, 1.0);
        let in_t = constraint(&f.model, "flow_in[t]").unwrap();
        assert_eq!(in_t.rhs, 1.0);
        assert!(constraint(&f.model, "flow_balance[m]").is_some());
        assert!(constraint(&f.model, "visit_once[m]").is_some());
        // no arcs enter the start, so no empty row is emitted
        assert!(constraint(&f.model, "flow_in[s]").is_none());
    }

    #[test]
    fn test_big_m_values() {
        let network = line(true);
        let aircraft = AircraftParameters::new(150.0).with_reserve(10.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        // M = C - R + b = 150 - 10 + 100
        let balance = constraint(&f.model, "fuel_balance[s->m]").unwrap();
        let x = f.vars.arcs[0];
        assert!(balance.terms.contains(&(x, 240.0)));
        assert_eq!(balance.rhs, 140.0);

        // M = max(0, C - R - b) = 40
        let overfill = constraint(&f.model, "no_overfill[s->m]").unwrap();
        assert!(overfill.terms.contains(&(x, 40.0)));
        assert_eq!(overfill.rhs, 150.0 + 100.0 + 40.0);

        // into a refueling point M = 2(C - R) - b = 180
        let floor = constraint(&f.model, "fuel_floor[s->m]").unwrap();
        assert_eq!(floor.op, ConstraintOp::Ge);
        assert!(floor.terms.contains(&(x, -180.0)));
        assert_eq!(floor.rhs, -280.0);

        // otherwise M = C - R - b = 40
        let floor = constraint(&f.model, "fuel_floor[m->t]").unwrap();
        assert!(floor.terms.contains(&(f.vars.arcs[1], -40.0)));
        assert_eq!(floor.rhs, -140.0);
    }

    fn two_free_stations() -> Network {
        let mut network = Network::new();
        network.add_node("s", NodeAttributes::start());
        network.add_node("a", NodeAttributes::waypoint().with_refuel(0.0, 0.0));
        network.add_node("b", NodeAttributes::waypoint().with_refuel(0.0, 0.0));
        network.add_node("t", NodeAttributes::destination());
        network.add_arc("s", "a", 40.0, 40.0);
        network.add_arc("a", "b", 40.0, 40.0);
        network.add_arc("b", "t", 40.0, 40.0);
        network
    }

    /// Names of the bounds and rows `values` breaks
    fn violations(model: &MilpModel, values: &[f64]) -> Vec<String> {
        let mut broken = Vec::new();
        for (v, var) in model.variables.iter().enumerate() {
            if values[v] < var.lower - 1e-9 || values[v] > var.upper + 1e-9 {
                broken.push(var.name.clone());
            }
        }
        for c in &model.constraints {
            let lhs: f64 = c.terms.iter().map(|&(v, k)| k * values[v]).sum();
            let ok = match c.op {
                ConstraintOp::Le => lhs <= c.rhs + 1e-9,
                ConstraintOp::Ge => lhs >= c.rhs - 1e-9,
                ConstraintOp::Eq => (lhs - c.rhs).abs() <= 1e-9,
            };
            if !ok {
                broken.push(c.name.clone());
            }
        }
        broken
    }

    #[test]
    fn test_departure_fuel_is_arrival_plus_refuel() {
        let network = two_free_stations();
        let aircraft = AircraftParameters::new(100.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        let mut values = vec![0.0; f.model.num_variables()];
        for &x in &f.vars.arcs {
            values[x] = 1.0;
        }
        let (a, b) = (1, 2);
        let stops = [(a, 40.0), (b, 40.0)];
        for (n, amount) in stops {
            values[f.vars.refuel[n].unwrap()] = amount;
            values[f.vars.stop[n].unwrap()] = 1.0;
        }
        for (n, level) in [100.0, 100.0, 100.0, 60.0].into_iter().enumerate() {
            values[f.vars.fuel[n]] = level;
        }
        assert!(violations(&f.model, &values).is_empty());

        // a departure level below arrival plus refuel would let the next stop
        // overfill the real tank (60 + 80 at b)
        values[f.vars.fuel[a]] = 60.0;
        values[f.vars.refuel[b].unwrap()] = 80.0;
        assert_eq!(violations(&f.model, &values), ["fuel_floor[s->a]"]);
    }

    #[test]
    fn test_refuel_variables_only_at_stations() {
        let network = line(true);
        let aircraft = AircraftParameters::new(150.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();

        assert!(f.vars.refuel[1].is_some());
        assert!(f.vars.stop[1].is_some());
        assert!(f.vars.refuel[0].is_none());
        assert!(constraint(&f.model, "refuel_link[m]").is_some());
        assert!(constraint(&f.model, "stop_if_visited[m]").is_some());
        assert!(constraint(&f.model, "top_off[m]").is_none());
    }

    #[test]
    fn test_top_off_policy_adds_fill_constraint() {
        let network = line(true);
        let aircraft = AircraftParameters::new(150.0);
        let options = FormulationOptions {
            refuel_policy: RefuelPolicy::TopOff,
            ..FormulationOptions::default()
        };
        let f = Formulator::new(options).build(&network, &aircraft).unwrap();

        assert!(constraint(&f.model, "top_off[m]").is_some());
    }

    #[test]
    fn test_objective_weights() {
        let network = line(true);
        let aircraft = AircraftParameters::new(150.0);
        let options = FormulationOptions {
            weights: ObjectiveWeights {
                distance: 2.0,
                refuel: 3.0,
            },
            ..FormulationOptions::default()
        };
        let f = Formulator::new(options).build(&network, &aircraft).unwrap();

        let x = f.vars.arcs[0];
        let r = f.vars.refuel[1].unwrap();
        assert!(f.model.objective.terms.contains(&(x, 200.0)));
        assert!(f.model.objective.terms.contains(&(r, 15.0)));
    }

    #[test]
    fn test_capacity_below_reserve() {
        let network = line(false);
        let aircraft = AircraftParameters::new(100.0).with_reserve(120.0).with_initial_fuel(100.0);
        let err = Formulator::default().build(&network, &aircraft).unwrap_err();
        assert!(matches!(err, FormulationError::InvalidParameters(_)));
    }

    #[test]
    fn test_initial_fuel_above_capacity() {
        let network = line(false);
        let aircraft = AircraftParameters::new(100.0).with_initial_fuel(150.0);
        let err = Formulator::default().build(&network, &aircraft).unwrap_err();
        assert!(matches!(err, FormulationError::InvalidParameters(_)));
    }

    #[test]
    fn test_invalid_network_surfaces_model_error() {
        let mut network = line(false);
        network.add_node("m", NodeAttributes::waypoint());
        let err = Formulator::default()
            .build(&network, &AircraftParameters::new(100.0))
            .unwrap_err();
        assert_eq!(err, FormulationError::Model(ModelError::DuplicateNode("m".to_string())));
    }

    #[test]
    fn test_burn_rate_fills_missing_burn() {
        let mut network = line(false);
        network.add_arc("s", "t", 180.0, None);

        let err = Formulator::default()
            .build(&network, &AircraftParameters::new(250.0))
            .unwrap_err();
        assert_eq!(
            err,
            FormulationError::MissingFuelBurn {
                from: "s".to_string(),
                to: "t".to_string()
            }
        );

        let aircraft = AircraftParameters::new(250.0).with_burn_rate(0.5);
        let f = Formulator::default().build(&network, &aircraft).unwrap();
        assert_eq!(f.burns, vec![100.0, 100.0, 90.0]);
    }

    #[test]
    fn test_disconnected_network() {
        let mut network = Network::new();
        network.add_node("s", NodeAttributes::start());
        network.add_node("m", NodeAttributes::waypoint());
        network.add_node("t", NodeAttributes::destination());
        network.add_arc("s", "m", 10.0, 10.0);
        network.add_arc("t", "m", 10.0, 10.0);

        let aircraft = AircraftParameters::new(100.0);
        let f = Formulator::default().build(&network, &aircraft).unwrap();
        assert!(f.is_disconnected());

        let connected = line(false);
        let f = Formulator::default().build(&connected, &aircraft).unwrap();
        assert!(!f.is_disconnected());
    }
}
