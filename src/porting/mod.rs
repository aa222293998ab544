//! porting - JSON Input and Output
//!
//! Reads a simulation definition from the two-section JSON document
//! (`network` and `simulation`) and writes the collected result states back
//! out. Unknown platform, type or model strings are rejected with an
//! actionable message.

use crate::config::CfdConfig;
use crate::error::{PortingError, PortingResult};
use crate::hybrid::LbmSimulator;
use crate::network::{Network, Opening};
use crate::simulation::{Platform, SimType, Simulation, SimulationResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

//======================================== Input =========================================

#[derive(Debug, Deserialize)]
struct Document {
    network: NetworkDoc,
    simulation: SimulationDoc,
}

#[derive(Debug, Deserialize)]
struct NetworkDoc {
    nodes: Vec<NodeDoc>,
    channels: Vec<ChannelDoc>,
    #[serde(default)]
    modules: Vec<ModuleDoc>,
}

#[derive(Debug, Deserialize)]
struct NodeDoc {
    x: f64,
    y: f64,
    #[serde(default)]
    ground: bool,
    #[serde(default)]
    sink: bool,
}

#[derive(Debug, Deserialize)]
struct ChannelDoc {
    node1: usize,
    node2: usize,
    width: f64,
    height: f64,
    #[serde(default)]
    length: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModuleDoc {
    pos_x: f64,
    pos_y: f64,
    size_x: f64,
    size_y: f64,
    stl_file: String,
    #[serde(rename = "Openings")]
    openings: Vec<OpeningDoc>,
    #[serde(default)]
    char_phys_length: Option<f64>,
    #[serde(default)]
    char_phys_velocity: Option<f64>,
    #[serde(default)]
    resolution: Option<usize>,
    #[serde(default)]
    tau: Option<f64>,
    #[serde(default)]
    epsilon: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OpeningDoc {
    node: usize,
    normal: NormalDoc,
    width: f64,
}

#[derive(Debug, Deserialize)]
struct NormalDoc {
    x: f64,
    y: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulationDoc {
    platform: String,
    #[serde(rename = "type")]
    sim_type: String,
    fluids: Vec<FluidDoc>,
    #[serde(default)]
    droplets: Vec<DropletDoc>,
    #[serde(default)]
    species: Vec<SpeciesDoc>,
    #[serde(default)]
    mixtures: Vec<MixtureDoc>,
    #[serde(default)]
    pumps: Vec<PumpDoc>,
    resistance_model: String,
    #[serde(default)]
    mixing_model: Option<String>,
    #[serde(default)]
    fixtures: Vec<FixtureDoc>,
    #[serde(default)]
    active_fixture: usize,
}

#[derive(Debug, Deserialize)]
struct FluidDoc {
    #[serde(default)]
    name: String,
    density: f64,
    viscosity: f64,
    concentration: f64,
}

#[derive(Debug, Deserialize)]
struct DropletDoc {
    fluid: usize,
    volume: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeciesDoc {
    diffusivity: f64,
    saturation_concentration: f64,
}

#[derive(Debug, Deserialize)]
struct MixtureDoc {
    species: Vec<usize>,
    concentrations: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PumpDoc {
    channel: usize,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta_p: Option<f64>,
    #[serde(default)]
    flow_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixtureDoc {
    #[serde(default)]
    phase: Option<usize>,
    #[serde(default)]
    big_droplet_injections: Vec<DropletInjectionDoc>,
    #[serde(default)]
    mixture_injections: Vec<MixtureInjectionDoc>,
}

#[derive(Debug, Deserialize)]
struct DropletInjectionDoc {
    droplet: usize,
    channel: usize,
    t0: f64,
    pos: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MixtureInjectionDoc {
    mixture: usize,
    channel: usize,
    t0: f64,
    #[serde(default)]
    permanent: bool,
}

/// Build a network from the `network` section of a document
fn network_from_doc(doc: &NetworkDoc) -> PortingResult<Network> {
    let mut network = Network::new();
    for node in &doc.nodes {
        let id = network
            .add_node(node.x, node.y, node.ground)
            .map_err(|e| PortingError::invalid(e.to_string()))?;
        if node.sink {
            network
                .set_sink(id)
                .map_err(|e| PortingError::invalid(e.to_string()))?;
        }
    }
    for channel in &doc.channels {
        network
            .add_channel(
                channel.node1,
                channel.node2,
                channel.width,
                channel.height,
                channel.length,
            )
            .map_err(|e| PortingError::invalid(e.to_string()))?;
    }
    for module in &doc.modules {
        let openings = module
            .openings
            .iter()
            .map(|o| Opening::new(o.node, (o.normal.x, o.normal.y), o.width))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PortingError::invalid(e.to_string()))?;
        network
            .add_module(
                (module.pos_x, module.pos_y),
                (module.size_x, module.size_y),
                module.stl_file.clone(),
                openings,
            )
            .map_err(|e| PortingError::invalid(e.to_string()))?;
    }
    Ok(network)
}

/// Parse a complete simulation from a JSON document
pub fn simulation_from_json(json: &str) -> PortingResult<Simulation> {
    let doc: Document = serde_json::from_str(json)?;
    let network = network_from_doc(&doc.network)?;
    let mut simulation = Simulation::new(network);
    let sim = &doc.simulation;

    match sim.platform.as_str() {
        "continuous" => simulation.set_platform(Platform::Continuous),
        "bigDroplet" => simulation.set_platform(Platform::BigDroplet),
        "mixing" => simulation.set_platform(Platform::Mixing),
        other => {
            return Err(PortingError::invalid(format!(
                "platform '{other}' is invalid; use continuous, bigDroplet or mixing"
            )))
        }
    }
    match sim.sim_type.as_str() {
        "1D" => simulation.set_type(SimType::Abstract),
        "hybrid" => simulation.set_type(SimType::Hybrid),
        "CFD" => simulation.set_type(SimType::Cfd),
        other => {
            return Err(PortingError::invalid(format!(
                "simulation type '{other}' is invalid; use 1D, hybrid or CFD"
            )))
        }
    }

    if sim.fluids.is_empty() {
        return Err(PortingError::invalid("define at least one fluid"));
    }
    for fluid in &sim.fluids {
        simulation.add_fluid(fluid.viscosity, fluid.density, fluid.concentration);
    }
    for droplet in &sim.droplets {
        simulation.add_droplet(droplet.fluid, droplet.volume);
    }
    for species in &sim.species {
        simulation.add_species(species.diffusivity, species.saturation_concentration);
    }
    for mixture in &sim.mixtures {
        if mixture.species.len() != mixture.concentrations.len() {
            return Err(PortingError::invalid(
                "provide as many concentrations as species in a mixture",
            ));
        }
        let concentrations = mixture
            .species
            .iter()
            .copied()
            .zip(mixture.concentrations.iter().copied())
            .collect();
        simulation.add_mixture(concentrations);
    }

    for pump in &sim.pumps {
        match pump.kind.as_str() {
            "PumpPressure" => {
                let pressure = pump.delta_p.ok_or_else(|| {
                    PortingError::invalid(format!(
                        "set 'deltaP' for the pressure pump on channel {}",
                        pump.channel
                    ))
                })?;
                simulation
                    .network_mut()
                    .set_pressure_pump(pump.channel, pressure)
                    .map_err(|e| PortingError::invalid(e.to_string()))?;
            }
            "PumpFlowrate" => {
                let flow_rate = pump.flow_rate.ok_or_else(|| {
                    PortingError::invalid(format!(
                        "set 'flowRate' for the flow-rate pump on channel {}",
                        pump.channel
                    ))
                })?;
                simulation
                    .network_mut()
                    .set_flow_rate_pump(pump.channel, flow_rate)
                    .map_err(|e| PortingError::invalid(e.to_string()))?;
            }
            other => {
                return Err(PortingError::invalid(format!(
                    "pump type '{other}' is invalid; use PumpPressure or PumpFlowrate"
                )))
            }
        }
    }

    match sim.resistance_model.as_str() {
        "1D" => simulation.set_rectangular_resistance_model(),
        "Poiseuille" => simulation.set_poiseuille_resistance_model(),
        other => {
            return Err(PortingError::invalid(format!(
                "resistance model '{other}' is invalid; use 1D or Poiseuille"
            )))
        }
    }
    match sim.mixing_model.as_deref() {
        Some("Instantaneous") => simulation.set_instantaneous_mixing(),
        Some("Diffusion") => simulation.set_diffusive_mixing(10),
        Some(other) => {
            return Err(PortingError::invalid(format!(
                "mixing model '{other}' is invalid; use Instantaneous or Diffusion"
            )))
        }
        None => {}
    }

    if !sim.fixtures.is_empty() {
        let fixture = sim.fixtures.get(sim.active_fixture).ok_or_else(|| {
            PortingError::invalid(format!(
                "the active fixture {} does not exist",
                sim.active_fixture
            ))
        })?;
        if let Some(phase) = fixture.phase {
            simulation.set_continuous_phase(phase);
        }
        for injection in &fixture.big_droplet_injections {
            simulation.add_droplet_injection(
                injection.droplet,
                injection.channel,
                injection.t0,
                injection.pos,
            );
        }
        for injection in &fixture.mixture_injections {
            simulation.add_mixture_injection(
                injection.mixture,
                injection.channel,
                injection.t0,
                injection.permanent,
            );
        }
    } else {
        simulation.set_continuous_phase(0);
    }

    // CFD settings ride on the module definitions.
    for (module_id, module) in doc.network.modules.iter().enumerate() {
        let mut config = CfdConfig::default();
        if let Some(l) = module.char_phys_length {
            config.char_phys_length = l;
        }
        if let Some(u) = module.char_phys_velocity {
            config.char_phys_velocity = u;
        }
        if let Some(n) = module.resolution {
            config.resolution = n;
        }
        if let Some(tau) = module.tau {
            config.relaxation_time = tau;
        }
        if let Some(eps) = module.epsilon {
            config.tolerance = eps;
        }
        let theta = crate::config::constants::DEFAULT_THETA;
        simulation.add_cfd_simulator(Box::new(LbmSimulator::new(module_id, config, theta)));
    }

    Ok(simulation)
}

/// Read a simulation from a JSON file
pub fn simulation_from_file(path: &str) -> PortingResult<Simulation> {
    let json = std::fs::read_to_string(path).map_err(|e| PortingError::File {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    simulation_from_json(&json)
}

//======================================== Output ========================================

#[derive(Debug, Serialize)]
struct ResultDoc {
    nodes: Vec<NodeResult>,
    channels: Vec<ChannelResult>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    droplets: HashMap<usize, Vec<DropletResult>>,
    #[serde(rename = "mixturePositions", skip_serializing_if = "HashMap::is_empty")]
    mixture_positions: HashMap<usize, HashMap<usize, Vec<MixturePositionResult>>>,
}

#[derive(Debug, Serialize)]
struct NodeResult {
    id: usize,
    pressure: f64,
}

#[derive(Debug, Serialize)]
struct ChannelResult {
    id: usize,
    #[serde(rename = "flowRate")]
    flow_rate: f64,
}

#[derive(Debug, Serialize)]
struct DropletResult {
    id: usize,
    boundaries: Vec<BoundaryResult>,
    channels: Vec<usize>,
}

#[derive(Debug, Serialize)]
struct BoundaryResult {
    #[serde(rename = "channelId")]
    channel_id: usize,
    position: f64,
    #[serde(rename = "volumeTowards1")]
    volume_towards_1: bool,
}

#[derive(Debug, Serialize)]
struct MixturePositionResult {
    #[serde(rename = "mixtureId")]
    mixture_id: usize,
    position1: f64,
    position2: f64,
}

/// Serialize the result of a simulation to a JSON string
pub fn result_to_json(result: &SimulationResult) -> PortingResult<String> {
    let Some(last) = result.last_state() else {
        return Err(PortingError::invalid("the simulation produced no states"));
    };

    let mut nodes: Vec<NodeResult> = last
        .pressures
        .iter()
        .map(|(&id, &pressure)| NodeResult { id, pressure })
        .collect();
    nodes.sort_by_key(|n| n.id);
    let mut channels: Vec<ChannelResult> = last
        .flow_rates
        .iter()
        .map(|(&id, &flow_rate)| ChannelResult { id, flow_rate })
        .collect();
    channels.sort_by_key(|c| c.id);

    let mut droplets: HashMap<usize, Vec<DropletResult>> = HashMap::new();
    let mut mixture_positions: HashMap<usize, HashMap<usize, Vec<MixturePositionResult>>> =
        HashMap::new();
    for state in &result.states {
        if !state.droplet_positions.is_empty() {
            let mut entries: Vec<DropletResult> = state
                .droplet_positions
                .iter()
                .map(|(&id, position)| DropletResult {
                    id,
                    boundaries: position
                        .boundaries
                        .iter()
                        .map(|&(channel_id, position, towards_a)| BoundaryResult {
                            channel_id,
                            position,
                            // The output counts volume direction towards the
                            // second node.
                            volume_towards_1: !towards_a,
                        })
                        .collect(),
                    channels: position.channels.clone(),
                })
                .collect();
            entries.sort_by_key(|d| d.id);
            droplets.insert(state.id, entries);
        }
        if !state.mixture_positions.is_empty() {
            let per_channel = state
                .mixture_positions
                .iter()
                .map(|(&channel, segments)| {
                    (
                        channel,
                        segments
                            .iter()
                            .map(|s| MixturePositionResult {
                                mixture_id: s.mixture_id,
                                position1: s.position_1,
                                position2: s.position_2,
                            })
                            .collect(),
                    )
                })
                .collect();
            mixture_positions.insert(state.id, per_channel);
        }
    }

    let doc = ResultDoc {
        nodes,
        channels,
        droplets,
        mixture_positions,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "network": {
            "nodes": [
                {"x": 0.0, "y": 0.0, "ground": true},
                {"x": 0.001, "y": 0.0},
                {"x": 0.002, "y": 0.0}
            ],
            "channels": [
                {"node1": 0, "node2": 1, "width": 1e-4, "height": 3e-5},
                {"node1": 1, "node2": 2, "width": 1e-4, "height": 3e-5},
                {"node1": 2, "node2": 0, "width": 1e-4, "height": 3e-5}
            ]
        },
        "simulation": {
            "platform": "continuous",
            "type": "1D",
            "fluids": [
                {"name": "water", "density": 1000.0, "viscosity": 1e-3, "concentration": 1.0}
            ],
            "pumps": [
                {"channel": 2, "type": "PumpPressure", "deltaP": 1000.0}
            ],
            "resistanceModel": "1D",
            "fixtures": [{"phase": 0}],
            "activeFixture": 0
        }
    }"#;

    #[test]
    fn parses_minimal_document() {
        let simulation = simulation_from_json(MINIMAL).unwrap();
        assert_eq!(simulation.network().nodes().len(), 3);
        assert_eq!(simulation.network().edges().len(), 3);
    }

    #[test]
    fn rejects_unknown_platform() {
        let json = MINIMAL.replace("continuous", "quantum");
        assert!(simulation_from_json(&json).is_err());
    }

    #[test]
    fn rejects_pressure_pump_without_value() {
        let json = MINIMAL.replace(r#""deltaP": 1000.0"#, r#""flowRate": 1e-9"#);
        assert!(simulation_from_json(&json).is_err());
    }

    #[test]
    fn simulate_and_serialize() {
        let mut simulation = simulation_from_json(MINIMAL).unwrap();
        simulation.simulate().unwrap();
        let json = result_to_json(simulation.result()).unwrap();
        assert!(json.contains("\"nodes\""));
        assert!(json.contains("\"channels\""));
    }
}
