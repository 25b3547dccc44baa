use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Duplicate node: {0}")]
    DuplicateNode(String),
    #[error("Arc {from} -> {to} references an unknown node")]
    DanglingArc { from: String, to: String },
    #[error("Network needs exactly one start and one destination, and they must differ")]
    NoStartOrDestination,
    #[error("More than one node is marked as {role}")]
    AmbiguousRole { role: NodeRole },
    #[error("Invalid arc {from} -> {to}: {reason}")]
    InvalidArc { from: String, to: String, reason: String },
    #[error("Invalid refueling station at {0}: costs must be finite and non-negative")]
    InvalidStation(String),
}

/// Role a node plays in the route
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeRole {
    #[default]
    Waypoint,
    Start,
    Destination,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Waypoint => f.write_str("waypoint"),
            NodeRole::Start => f.write_str("start"),
            NodeRole::Destination => f.write_str("destination"),
        }
    }
}

/// Refueling facility at a node
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RefuelStation {
    /// Cost per unit of fuel taken on
    #[cfg_attr(feature = "serde", serde(default))]
    pub unit_cost: f64,
    /// Fixed cost charged once per stop
    #[cfg_attr(feature = "serde", serde(default))]
    pub stop_cost: f64,
}

impl RefuelStation {
    pub fn new(unit_cost: f64, stop_cost: f64) -> Self {
        Self { unit_cost, stop_cost }
    }

    /// Cost of taking on `amount` units in one stop
    pub fn cost_of(&self, amount: f64) -> f64 {
        self.unit_cost * amount + self.stop_cost
    }
}

/// Attributes supplied when adding a node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeAttributes {
    pub role: NodeRole,
    pub coordinates: Option<(f64, f64)>,
    pub refuel: Option<RefuelStation>,
}

impl NodeAttributes {
    pub fn waypoint() -> Self {
        Self::default()
    }

    pub fn start() -> Self {
        Self {
            role: NodeRole::Start,
            ..Self::default()
        }
    }

    pub fn destination() -> Self {
        Self {
            role: NodeRole::Destination,
            ..Self::default()
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.coordinates = Some((x, y));
        self
    }

    pub fn with_refuel(mut self, unit_cost: f64, stop_cost: f64) -> Self {
        self.refuel = Some(RefuelStation::new(unit_cost, stop_cost));
        self
    }
}

/// An airport or waypoint
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub role: NodeRole,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub coordinates: Option<(f64, f64)>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub refuel: Option<RefuelStation>,
}

impl Node {
    pub fn is_refuel_point(&self) -> bool {
        self.refuel.is_some()
    }
}

/// A directed flight leg
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Arc {
    pub from: String,
    pub to: String,
    pub distance: f64,
    /// Fuel needed to fly the leg. When absent it is derived from the aircraft burn rate
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub fuel_burn: Option<f64>,
    /// Objective cost of the leg. Defaults to the distance
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub cost: Option<f64>,
}

impl Arc {
    /// Set an objective cost other than the distance
    pub fn with_cost(&mut self, cost: f64) -> &mut Self {
        self.cost = Some(cost);
        self
    }

    pub fn cost(&self) -> f64 {
        self.cost.unwrap_or(self.distance)
    }

    pub fn connects(&self, from: &str, to: &str) -> bool {
        self.from == from && self.to == to
    }
}

/// Node and arc counts for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkSummary {
    pub nodes: usize,
    pub arcs: usize,
    pub refuel_points: usize,
}

impl fmt::Display for NetworkSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes ({} refueling points), {} arcs",
            self.nodes, self.refuel_points, self.arcs
        )
    }
}

/// Directed network of nodes and flight legs.
///
/// Nothing is checked on insertion; call [`Network::validate`] once the
/// network is complete.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Network {
    #[cfg_attr(feature = "serde", serde(default))]
    pub nodes: Vec<Node>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub arcs: Vec<Arc>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: impl Into<String>, attributes: NodeAttributes) -> &mut Node {
        self.nodes.push(Node {
            id: id.into(),
            role: attributes.role,
            coordinates: attributes.coordinates,
            refuel: attributes.refuel,
        });
        let last = self.nodes.len() - 1;
        &mut self.nodes[last]
    }

    /// Add a directed arc. No reverse arc is created.
    pub fn add_arc(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        distance: f64,
        fuel_burn: impl Into<Option<f64>>,
    ) -> &mut Arc {
        self.arcs.push(Arc {
            from: from.into(),
            to: to.into(),
            distance,
            fuel_burn: fuel_burn.into(),
            cost: None,
        });
        let last = self.arcs.len() - 1;
        &mut self.arcs[last]
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let mut seen = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(ModelError::DuplicateNode(node.id.clone()));
            }
            if let Some(station) = &node.refuel {
                let ok = |v: f64| v.is_finite() && v >= 0.0;
                if !ok(station.unit_cost) || !ok(station.stop_cost) {
                    return Err(ModelError::InvalidStation(node.id.clone()));
                }
            }
        }

        let start = self.single_with_role(NodeRole::Start)?;
        let destination = self.single_with_role(NodeRole::Destination)?;
        match (start, destination) {
            (Some(s), Some(t)) if s.id != t.id => {}
            _ => return Err(ModelError::NoStartOrDestination),
        }

        for arc in &self.arcs {
            if !seen.contains(arc.from.as_str()) || !seen.contains(arc.to.as_str()) {
                return Err(ModelError::DanglingArc {
                    from: arc.from.clone(),
                    to: arc.to.clone(),
                });
            }
            let invalid = |reason: &str| ModelError::InvalidArc {
                from: arc.from.clone(),
                to: arc.to.clone(),
                reason: reason.to_string(),
            };
            if arc.from == arc.to {
                return Err(invalid("self loop"));
            }
            if !arc.distance.is_finite() || arc.distance < 0.0 {
                return Err(invalid("distance must be finite and non-negative"));
            }
            if arc.fuel_burn.is_some_and(|b| !b.is_finite() || b < 0.0) {
                return Err(invalid("fuel burn must be finite and non-negative"));
            }
            if arc.cost.is_some_and(|c| !c.is_finite() || c < 0.0) {
                return Err(invalid("cost must be finite and non-negative"));
            }
        }

        Ok(())
    }

    fn single_with_role(&self, role: NodeRole) -> Result<Option<&Node>, ModelError> {
        let mut found = self.nodes.iter().filter(|n| n.role == role);
        let first = found.next();
        if found.next().is_some() {
            return Err(ModelError::AmbiguousRole { role });
        }
        Ok(first)
    }

    pub fn start(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.role == NodeRole::Start)
    }

    pub fn destination(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.role == NodeRole::Destination)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Map from node id to position in [`Network::nodes`]
    pub fn index(&self) -> HashMap<&str, usize> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect()
    }

    pub fn arc(&self, from: &str, to: &str) -> Option<&Arc> {
        self.arcs.iter().find(|a| a.connects(from, to))
    }

    pub fn arc_mut(&mut self, from: &str, to: &str) -> Option<&mut Arc> {
        self.arcs.iter_mut().find(|a| a.connects(from, to))
    }

    pub fn arcs_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Arc> + 'a {
        self.arcs.iter().filter(move |a| a.from == id)
    }

    pub fn arcs_into<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Arc> + 'a {
        self.arcs.iter().filter(move |a| a.to == id)
    }

    /// Remove a node together with every arc touching it
    pub fn remove_node(&mut self, id: &str) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.id != id);
        if self.nodes.len() == before {
            return false;
        }
        self.arcs.retain(|a| a.from != id && a.to != id);
        true
    }

    pub fn summary(&self) -> NetworkSummary {
        NetworkSummary {
            nodes: self.nodes.len(),
            arcs: self.arcs.len(),
            refuel_points: self.nodes.iter().filter(|n| n.is_refuel_point()).count(),
        }
    }
}
