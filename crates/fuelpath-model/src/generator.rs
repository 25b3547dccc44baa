//! Random acyclic test networks.
//!
//! Nodes are `s, 1, .., n-2, t` in topological order with an arc from every
//! node to every later one. Longer hops burn more fuel, drawn from a band that
//! grows with the number of nodes skipped.

use rand::{Rng, SeedableRng, rngs::StdRng};
use thiserror::Error;
use tracing::debug;

use crate::aircraft::AircraftParameters;
use crate::network::{Network, NodeAttributes};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeneratorError {
    #[error("Network size must be at least 2, got {0}")]
    TooSmall(usize),
    #[error("Refueling interval must be at least 1")]
    ZeroInterval,
    #[error("Invalid generator parameter: {0}")]
    InvalidParameter(String),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorParameters {
    /// Number of nodes including start and destination
    pub size: usize,
    /// Cost per unit of fuel burned on an arc
    pub psi: f64,
    /// Upper end of the fuel burn band for a single hop, before the 0.9 factor
    pub initial_upper_bound: f64,
    /// Every node whose index is a multiple of this is a refueling point
    pub refuel_interval: usize,
    pub unit_cost: f64,
    pub stop_cost: f64,
    /// Tank capacity of the aircraft returned by [`GeneratorParameters::aircraft`]
    pub fuel_capacity: f64,
}

impl Default for GeneratorParameters {
    fn default() -> Self {
        Self {
            size: 20,
            psi: 1600.0 / 18000.0,
            initial_upper_bound: 6000.0,
            refuel_interval: 5,
            unit_cost: 0.0,
            stop_cost: 100.0,
            fuel_capacity: 26000.0,
        }
    }
}

impl GeneratorParameters {
    /// Aircraft matching the generated fuel scale: full tank, no reserve
    pub fn aircraft(&self) -> AircraftParameters {
        AircraftParameters::new(self.fuel_capacity)
    }

    fn check(&self) -> Result<(), GeneratorError> {
        if self.size < 2 {
            return Err(GeneratorError::TooSmall(self.size));
        }
        if self.refuel_interval == 0 {
            return Err(GeneratorError::ZeroInterval);
        }
        for (name, v) in [
            ("psi", self.psi),
            ("initial_upper_bound", self.initial_upper_bound),
            ("unit_cost", self.unit_cost),
            ("stop_cost", self.stop_cost),
            ("fuel_capacity", self.fuel_capacity),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(GeneratorError::InvalidParameter(format!(
                    "{} must be finite and non-negative, got {}",
                    name, v
                )));
            }
        }
        Ok(())
    }

    /// Burn band `(lower, upper)` for a hop that skips `k - 1` nodes
    fn burn_band(&self, k: usize) -> (f64, f64) {
        let rate = 0.9 * self.initial_upper_bound;
        let mut lower = rate;
        let mut upper = rate;
        for _ in 1..k {
            upper = rate + lower;
            lower = 0.9 * upper;
        }
        (lower, upper)
    }
}

/// Generator parameters plus the seed: enough to rebuild a network exactly
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NetworkRecipe {
    #[cfg_attr(feature = "serde", serde(default))]
    pub seed: u64,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub params: GeneratorParameters,
}

impl NetworkRecipe {
    pub fn new(params: GeneratorParameters, seed: u64) -> Self {
        Self { seed, params }
    }

    pub fn build(&self) -> Result<Network, GeneratorError> {
        generate(&self.params, self.seed)
    }
}

fn node_id(i: usize, size: usize) -> String {
    match i {
        0 => "s".to_string(),
        i if i == size - 1 => "t".to_string(),
        i => i.to_string(),
    }
}

/// Generate a network. The same parameters and seed always give the same network.
pub fn generate(params: &GeneratorParameters, seed: u64) -> Result<Network, GeneratorError> {
    params.check()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let n = params.size;

    let mut network = Network::new();
    for i in 0..n {
        let attributes = match i {
            0 => NodeAttributes::start(),
            i if i == n - 1 => NodeAttributes::destination(),
            _ => NodeAttributes::waypoint(),
        };
        let attributes = if i % params.refuel_interval == 0 {
            attributes.with_refuel(params.unit_cost, params.stop_cost)
        } else {
            attributes
        };
        network.add_node(node_id(i, n), attributes);
    }

    for i in 0..n {
        for j in i + 1..n {
            let (lower, upper) = params.burn_band(j - i);
            let burn = rng.gen_range(lower..=upper).round();
            let cost = (rng.gen_range(0.95..=1.05) * params.psi * burn).round();
            network.add_arc(node_id(i, n), node_id(j, n), burn, burn).with_cost(cost);
        }
    }

    debug!(seed, summary = %network.summary(), "generated network");
    Ok(network)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> GeneratorParameters {
        GeneratorParameters {
            size: 7,
            ..GeneratorParameters::default()
        }
    }

    #[test]
    fn test_generate_shape() {
        let network = generate(&small(), 1).unwrap();
        network.validate().unwrap();

        let ids: Vec<_> = network.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["s", "1", "2", "3", "4", "5", "t"]);
        // complete DAG: one arc per ordered pair
        assert_eq!(network.arcs.len(), 7 * 6 / 2);
        assert!(network.arcs.iter().all(|a| a.distance == a.fuel_burn.unwrap()));
    }

    #[test]
    fn test_refuel_points() {
        let network = generate(&small(), 1).unwrap();
        let refuel: Vec<_> = network
            .nodes
            .iter()
            .filter(|n| n.is_refuel_point())
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(refuel, ["s", "5"]);
        assert_eq!(network.node("5").unwrap().refuel.unwrap().stop_cost, 100.0);
    }

    #[test]
    fn test_burn_band_grows() {
        let params = GeneratorParameters::default();
        let (lower, upper) = params.burn_band(1);
        assert!((lower - 5400.0).abs() < 1e-9);
        assert_eq!(lower, upper);

        let (lower, upper) = params.burn_band(2);
        assert!((upper - 10800.0).abs() < 1e-9);
        assert!((lower - 9720.0).abs() < 1e-9);

        let (lower3, _) = params.burn_band(3);
        assert!(lower3 > upper);
    }

    #[test]
    fn test_single_hop_costs() {
        let params = small();
        let network = generate(&params, 42).unwrap();
        let arc = network.arc("s", "1").unwrap();
        assert_eq!(arc.fuel_burn, Some(5400.0));

        // 0.95..1.05 times psi * 5400 = 480
        let cost = arc.cost();
        assert!((456.0..=504.0).contains(&cost), "cost {}", cost);
    }

    #[test]
    fn test_seed_is_reproducible() {
        assert_eq!(generate(&small(), 9).unwrap(), generate(&small(), 9).unwrap());
    }

    #[test]
    fn test_recipe_rebuilds_the_same_network() {
        let recipe = NetworkRecipe::new(small(), 9);
        assert_eq!(recipe.build().unwrap(), generate(&small(), 9).unwrap());

        let larger = NetworkRecipe::new(GeneratorParameters { size: 12, ..small() }, 9);
        assert_eq!(larger.build().unwrap().nodes.len(), 12);
    }

    #[test]
    fn test_invalid_parameters() {
        let too_small = GeneratorParameters {
            size: 1,
            ..GeneratorParameters::default()
        };
        assert_eq!(generate(&too_small, 0), Err(GeneratorError::TooSmall(1)));

        let no_interval = GeneratorParameters {
            refuel_interval: 0,
            ..GeneratorParameters::default()
        };
        assert_eq!(generate(&no_interval, 0), Err(GeneratorError::ZeroInterval));
    }
}
