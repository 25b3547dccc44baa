//! Scenario files.
//!
//! A scenario file holds a network, the aircraft, objective weights, solver
//! settings and an optional list of sweep parameters. TOML and JSON are both
//! accepted, chosen by file extension. A `[generator]` table records how the
//! network was generated; with no `[[nodes]]` the network is generated from it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fuelpath_solver::Backend;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aircraft::AircraftParameters;
use crate::formulator::{FormulationOptions, ObjectiveWeights, RefuelPolicy};
use crate::generator::{GeneratorError, NetworkRecipe};
use crate::network::{Arc, Network, Node};
use crate::pipeline::{Scenario, SolveOptions};
use crate::sensitivity::{Parameter, ParameterSpec, ParameterValue};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported scenario file '{0}', expected .toml or .json")]
    UnsupportedFormat(String),
    #[error("Invalid solver settings: {0}")]
    Solver(String),
    #[error("Invalid sweep entry '{parameter}': {reason}")]
    Sweep { parameter: String, reason: String },
    #[error("Invalid generator settings: {0}")]
    Generator(#[from] GeneratorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
}

impl Format {
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
            Some("toml") => Ok(Format::Toml),
            Some("json") => Ok(Format::Json),
            _ => Err(LoadError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<f64>,
    #[serde(default)]
    pub refuel_policy: RefuelPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
}

/// One `[[sweep]]` table. `from`/`to` name an arc, `node` names a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepEntry {
    pub parameter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub values: Vec<ParameterValue>,
}

impl TryFrom<&SweepEntry> for ParameterSpec {
    type Error = LoadError;

    fn try_from(entry: &SweepEntry) -> Result<Self, Self::Error> {
        let invalid = |reason: &str| LoadError::Sweep {
            parameter: entry.parameter.clone(),
            reason: reason.to_string(),
        };
        let arc = || match (&entry.from, &entry.to) {
            (Some(from), Some(to)) => Ok((from.clone(), to.clone())),
            _ => Err(invalid("arc parameters need 'from' and 'to'")),
        };
        let node = || entry.node.clone().ok_or_else(|| invalid("node parameters need 'node'"));

        let parameter = match entry.parameter.as_str() {
            "capacity" => Parameter::Capacity,
            "reserve" => Parameter::Reserve,
            "initial_fuel" => Parameter::InitialFuel,
            "burn_rate" => Parameter::BurnRate,
            "distance_weight" => Parameter::DistanceWeight,
            "refuel_weight" => Parameter::RefuelWeight,
            "arc_cost" => arc().map(|(from, to)| Parameter::ArcCost { from, to })?,
            "arc_distance" => arc().map(|(from, to)| Parameter::ArcDistance { from, to })?,
            "arc_fuel_burn" => arc().map(|(from, to)| Parameter::ArcFuelBurn { from, to })?,
            "refuel_unit_cost" => Parameter::RefuelUnitCost { node: node()? },
            "refuel_stop_cost" => Parameter::RefuelStopCost { node: node()? },
            "refuel_available" => Parameter::RefuelAvailable { node: node()? },
            "node_available" => Parameter::NodeAvailable { node: node()? },
            "time_limit" => Parameter::TimeLimit,
            "network_size" => Parameter::NetworkSize,
            "psi" => Parameter::Psi,
            "initial_upper_bound" => Parameter::InitialUpperBound,
            "refuel_interval" => Parameter::RefuelInterval,
            _ => return Err(invalid("unknown parameter")),
        };
        if entry.values.is_empty() {
            return Err(invalid("no values given"));
        }
        Ok(ParameterSpec {
            parameter,
            values: entry.values.clone(),
        })
    }
}

/// On-disk form of a [`Scenario`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioFile {
    pub aircraft: AircraftParameters,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub arcs: Vec<Arc>,
    #[serde(default)]
    pub objective: ObjectiveWeights,
    #[serde(default)]
    pub solver: SolverSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<NetworkRecipe>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sweep: Vec<SweepEntry>,
}

impl ScenarioFile {
    pub fn parse(text: &str, format: Format) -> Result<Self, LoadError> {
        Ok(match format {
            Format::Toml => toml::from_str(text)?,
            Format::Json => serde_json::from_str(text)?,
        })
    }

    pub fn from_scenario(scenario: &Scenario) -> Self {
        Self {
            aircraft: scenario.aircraft.clone(),
            nodes: scenario.network.nodes.clone(),
            arcs: scenario.network.arcs.clone(),
            objective: scenario.options.formulation.weights,
            solver: SolverSettings {
                backend: Backend::default(),
                time_limit_secs: scenario.options.time_limit.map(|d| d.as_secs_f64()),
                refuel_policy: scenario.options.formulation.refuel_policy,
                tolerance: Some(scenario.options.tolerance),
            },
            generator: scenario.recipe,
            sweep: Vec::new(),
        }
    }

    pub fn scenario(&self) -> Result<Scenario, LoadError> {
        let time_limit = self
            .solver
            .time_limit_secs
            .map(|secs| {
                Duration::try_from_secs_f64(secs)
                    .map_err(|_| LoadError::Solver(format!("time_limit_secs must be a non-negative number, got {}", secs)))
            })
            .transpose()?;
        let defaults = SolveOptions::default();
        let network = match &self.generator {
            Some(recipe) if self.nodes.is_empty() => recipe.build()?,
            _ => Network {
                nodes: self.nodes.clone(),
                arcs: self.arcs.clone(),
            },
        };

        Ok(Scenario {
            network,
            aircraft: self.aircraft.clone(),
            options: SolveOptions {
                formulation: FormulationOptions {
                    weights: self.objective,
                    refuel_policy: self.solver.refuel_policy,
                },
                time_limit,
                tolerance: self.solver.tolerance.unwrap_or(defaults.tolerance),
            },
            recipe: self.generator,
        })
    }

    pub fn sweep_specs(&self) -> Result<Vec<ParameterSpec>, LoadError> {
        self.sweep.iter().map(ParameterSpec::try_from).collect()
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Read a scenario file, picking the format from its extension
pub fn load_scenario(path: impl AsRef<Path>) -> Result<ScenarioFile, LoadError> {
    let path = path.as_ref();
    let format = Format::from_path(path)?;
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ScenarioFile::parse(&text, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NodeRole;

    const SCENARIO: &str = r#"
[aircraft]
capacity = 250
reserve = 10

[[nodes]]
id = "s"
role = "start"

[[nodes]]
id = "m"
refuel = { unit_cost = 5 }

[[nodes]]
id = "t"
role = "destination"

[[arcs]]
from = "s"
to = "m"
distance = 100
fuel_burn = 100

[[arcs]]
from = "m"
to = "t"
distance = 100
fuel_burn = 100
cost = 80

[objective]
refuel = 2

[solver]
time_limit_secs = 30
refuel_policy = "top_off"

[[sweep]]
parameter = "capacity"
values = [100, 150.5]

[[sweep]]
parameter = "refuel_available"
node = "m"
values = [true, false]
"#;

    #[test]
    fn test_parse_toml() {
        let file = ScenarioFile::parse(SCENARIO, Format::Toml).unwrap();
        let scenario = file.scenario().unwrap();

        assert_eq!(scenario.aircraft.capacity, 250.0);
        assert_eq!(scenario.aircraft.reserve, 10.0);
        assert_eq!(scenario.aircraft.initial_fuel, None);
        assert_eq!(scenario.network.nodes[0].role, NodeRole::Start);
        assert_eq!(scenario.network.node("m").unwrap().refuel.unwrap().unit_cost, 5.0);
        assert_eq!(scenario.network.arc("m", "t").unwrap().cost(), 80.0);
        assert_eq!(scenario.options.formulation.weights.distance, 1.0);
        assert_eq!(scenario.options.formulation.weights.refuel, 2.0);
        assert_eq!(scenario.options.formulation.refuel_policy, RefuelPolicy::TopOff);
        assert_eq!(scenario.options.time_limit, Some(Duration::from_secs(30)));
        scenario.network.validate().unwrap();
    }

    #[test]
    fn test_sweep_specs() {
        let file = ScenarioFile::parse(SCENARIO, Format::Toml).unwrap();
        let specs = file.sweep_specs().unwrap();

        assert_eq!(specs[0].parameter, Parameter::Capacity);
        assert_eq!(
            specs[0].values,
            vec![ParameterValue::Number(100.0), ParameterValue::Number(150.5)]
        );
        assert_eq!(specs[1].parameter, Parameter::RefuelAvailable { node: "m".to_string() });
        assert_eq!(specs[1].values, vec![ParameterValue::Flag(true), ParameterValue::Flag(false)]);
    }

    #[test]
    fn test_sweep_entry_errors() {
        let entry = SweepEntry {
            parameter: "arc_cost".to_string(),
            from: Some("s".to_string()),
            to: None,
            node: None,
            values: vec![ParameterValue::Number(1.0)],
        };
        assert!(matches!(ParameterSpec::try_from(&entry), Err(LoadError::Sweep { .. })));

        let unknown = SweepEntry {
            parameter: "wind".to_string(),
            ..entry
        };
        assert!(matches!(ParameterSpec::try_from(&unknown), Err(LoadError::Sweep { .. })));
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "aircraft": { "capacity": 100, "initial_fuel": 60 },
            "nodes": [
                { "id": "s", "role": "start" },
                { "id": "t", "role": "destination" }
            ],
            "arcs": [ { "from": "s", "to": "t", "distance": 50 } ]
        }"#;
        let scenario = ScenarioFile::parse(json, Format::Json).unwrap().scenario().unwrap();
        assert_eq!(scenario.aircraft.initial_fuel, Some(60.0));
        assert_eq!(scenario.network.arcs[0].fuel_burn, None);
        assert_eq!(scenario.options, SolveOptions::default());
    }

    #[test]
    fn test_negative_time_limit() {
        let text = "[aircraft]\ncapacity = 10\n[solver]\ntime_limit_secs = -1\n";
        let file = ScenarioFile::parse(text, Format::Toml).unwrap();
        assert!(matches!(file.scenario(), Err(LoadError::Solver(_))));
    }

    #[test]
    fn test_generator_table_builds_the_network() {
        let text = r#"
[aircraft]
capacity = 26000

[generator]
seed = 7
size = 8
refuel_interval = 3

[[sweep]]
parameter = "network_size"
values = [6, 10]

[[sweep]]
parameter = "time_limit"
values = [0.5]
"#;
        let file = ScenarioFile::parse(text, Format::Toml).unwrap();
        let scenario = file.scenario().unwrap();
        let recipe = scenario.recipe.unwrap();

        assert_eq!(recipe.seed, 7);
        assert_eq!(recipe.params.size, 8);
        assert_eq!(recipe.params.stop_cost, 100.0);
        assert_eq!(scenario.network, recipe.build().unwrap());
        assert!(scenario.network.node("3").unwrap().is_refuel_point());

        let specs = file.sweep_specs().unwrap();
        assert_eq!(specs[0].parameter, Parameter::NetworkSize);
        assert_eq!(specs[1].parameter, Parameter::TimeLimit);

        // written files keep both the nodes and the recipe
        let written = ScenarioFile::from_scenario(&scenario).to_toml_string().unwrap();
        let reloaded = ScenarioFile::parse(&written, Format::Toml).unwrap().scenario().unwrap();
        assert_eq!(reloaded, scenario);
    }

    #[test]
    fn test_invalid_generator_table() {
        let text = "[aircraft]\ncapacity = 10\n[generator]\nsize = 1\n";
        let file = ScenarioFile::parse(text, Format::Toml).unwrap();
        assert!(matches!(
            file.scenario(),
            Err(LoadError::Generator(GeneratorError::TooSmall(1)))
        ));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(Format::from_path(Path::new("a/b.TOML")).unwrap(), Format::Toml);
        assert_eq!(Format::from_path(Path::new("b.json")).unwrap(), Format::Json);
        assert!(matches!(
            Format::from_path(Path::new("b.yaml")),
            Err(LoadError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_write_then_load() {
        let file = ScenarioFile::parse(SCENARIO, Format::Toml).unwrap();
        let scenario = file.scenario().unwrap();

        let written = ScenarioFile::from_scenario(&scenario).to_toml_string().unwrap();
        let reloaded = ScenarioFile::parse(&written, Format::Toml).unwrap().scenario().unwrap();
        assert_eq!(reloaded, scenario);
    }
}
