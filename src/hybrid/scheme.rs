//! hybrid/scheme.rs - The Hybrid Fixed-Point Iteration
//!
//! Orchestrates the exchange between the nodal solver and the CFD adapters.
//! Opening roles are fixed before the iteration starts: per module and
//! neighbouring ungrounded group, one opening exports pressure and supplies
//! that group's datum; all other openings exchange pressure against flow
//! rate and re-enter the nodal system as equivalent resistances over the
//! module's internal approximation network.

use crate::config::{constants, HybridConfig};
use crate::error::{ChipflowError, Result, SimulationError};
use crate::hybrid::CfdSimulator;
use crate::network::{EdgeKind, Network};
use crate::nodal;
use crate::resistance::{PoiseuilleResistance, ResistanceModel};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

/// Relaxation strategies of the hybrid scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeVariant {
    /// One global relaxation factor
    Naive,
    /// Per-opening factor, decreased on oscillation and increased on
    /// monotone progress
    Adaptive,
}

/// Outcome of a hybrid solve
#[derive(Debug, Clone)]
pub struct HybridOutcome {
    /// Whether the convergence test passed within the iteration budget
    pub converged: bool,
    /// Iterations actually performed
    pub iterations: usize,
    /// Final maximum relative residual at the openings
    pub residual: f64,
}

/// The damped fixed-point iteration between nodal analysis and CFD adapters
pub struct HybridScheme {
    config: HybridConfig,
    variant: SchemeVariant,
    alphas: HashMap<usize, f64>,
    previous_deltas: HashMap<usize, f64>,
    pushed_pressures: HashMap<usize, f64>,
    pushed_flows: HashMap<usize, f64>,
    read_pressures: HashMap<usize, f64>,
    read_flows: HashMap<usize, f64>,
    /// Openings exporting pressure, keyed by module id
    pressure_exports: HashMap<usize, HashSet<usize>>,
}

impl HybridScheme {
    /// Create a scheme with the given configuration and variant
    pub fn new(config: HybridConfig, variant: SchemeVariant) -> Self {
        Self {
            config,
            variant,
            alphas: HashMap::new(),
            previous_deltas: HashMap::new(),
            pushed_pressures: HashMap::new(),
            pushed_flows: HashMap::new(),
            read_pressures: HashMap::new(),
            read_flows: HashMap::new(),
            pressure_exports: HashMap::new(),
        }
    }

    /// Fix the opening roles and seed the internal approximation networks.
    ///
    /// Per module, every neighbouring group that has no ground node receives
    /// its pressure datum from this module; the eligible opening with the
    /// smallest node id is designated. The module's CFD port edges are seeded
    /// with the Poiseuille resistance of a straight channel of the opening
    /// cross-section.
    pub fn initialize(
        &mut self,
        network: &mut Network,
        simulators: &mut [Box<dyn CfdSimulator>],
        viscosity: f64,
    ) -> Result<()> {
        network.rebuild_groups();
        let poiseuille = PoiseuilleResistance::new(viscosity);

        for simulator in simulators.iter_mut() {
            let module = network.module(simulator.module_id())?.clone();
            let mut exports: HashSet<usize> = HashSet::new();
            for group in network.groups() {
                if group.grounded {
                    continue;
                }
                let candidate = module
                    .openings
                    .iter()
                    .map(|o| o.node_id)
                    .filter(|n| group.node_ids.contains(n))
                    .min();
                if let Some(node_id) = candidate {
                    exports.insert(node_id);
                }
            }
            self.pressure_exports.insert(module.id, exports.clone());
            simulator.set_pressure_export(&exports);

            for &port in &module.port_edges {
                let edge = network.edge(port)?;
                let (a, b) = (edge.node_a, edge.node_b);
                let opening = module
                    .opening_at(a)
                    .expect("port endpoints are opening nodes");
                let length = network.node(a)?.distance_to(network.node(b)?);
                let stand_in = crate::network::Channel {
                    cross_section: crate::network::CrossSection::Rectangular {
                        width: opening.width,
                        height: opening.height,
                    },
                    length,
                    resistance: 0.0,
                    droplet_resistance: 0.0,
                };
                let resistance = poiseuille.channel_resistance(&stand_in)?;
                set_port_resistance(network, port, resistance)?;
            }

            for opening in &module.openings {
                self.alphas
                    .insert(opening.node_id, self.config.relaxation_factor);
            }
        }
        network.rebuild_groups();
        Ok(())
    }

    /// Run the fixed-point iteration to convergence or the iteration cap.
    ///
    /// Exhausting the cap is reported as a non-converged outcome, not an
    /// error; the last computed state remains in the network.
    pub fn solve(
        &mut self,
        network: &mut Network,
        simulators: &mut [Box<dyn CfdSimulator>],
    ) -> Result<HybridOutcome> {
        let mut stable = 0usize;
        let mut residual = f64::INFINITY;

        for iteration in 0..self.config.max_iterations {
            // 1. Nodal solve with the current equivalent resistances and the
            //    relaxed pressure data at the export openings.
            let imposed = self.datum_pressures();
            nodal::solve_network(network, &imposed).map_err(ChipflowError::from)?;

            // 2. Push relaxed 1D values into the adapters and run them.
            for simulator in simulators.iter_mut() {
                let module_id = simulator.module_id();
                let exports = self.pressure_exports[&module_id].clone();
                let module = network.module(module_id)?.clone();

                let mut flow_targets = HashMap::new();
                let mut pressure_targets = HashMap::new();
                for opening in &module.openings {
                    let node = opening.node_id;
                    let alpha = self.alphas[&node];
                    if exports.contains(&node) {
                        let raw = inflow_from_network(network, node);
                        let value = relax(self.pushed_flows.get(&node).copied(), raw, alpha);
                        self.pushed_flows.insert(node, value);
                        flow_targets.insert(node, value);
                    } else {
                        let raw = network.node(node)?.pressure;
                        let value = relax(self.pushed_pressures.get(&node).copied(), raw, alpha);
                        self.pushed_pressures.insert(node, value);
                        pressure_targets.insert(node, value);
                    }
                }
                simulator.set_flow_rates(&flow_targets);
                simulator.set_pressures(&pressure_targets);
                simulator.solve()?;
            }

            // 3. Read back, relax, and measure the residual.
            let mut max_change: f64 = 0.0;
            for simulator in simulators.iter_mut() {
                let pressures = simulator.read_pressures();
                let flows = simulator.read_flow_rates();
                for (&node, &p) in &pressures {
                    let alpha = self.alphas.get(&node).copied().unwrap_or(1.0);
                    let old = self.read_pressures.get(&node).copied();
                    let value = relax(old, p, alpha);
                    max_change = max_change.max(relative_change(old, value));
                    self.track_delta(node, old, value);
                    self.read_pressures.insert(node, value);
                }
                for (&node, &q) in &flows {
                    let alpha = self.alphas.get(&node).copied().unwrap_or(1.0);
                    let old = self.read_flows.get(&node).copied();
                    let value = relax(old, q, alpha);
                    max_change = max_change.max(relative_change(old, value));
                    self.read_flows.insert(node, value);
                }
            }
            residual = max_change;

            // 4. Insert the equivalent resistances for the next nodal solve.
            for simulator in simulators.iter() {
                self.update_port_resistances(network, simulator.module_id())?;
            }

            debug!("hybrid iteration {iteration}: residual {residual:.3e}");

            let adapters_converged = simulators.iter().all(|s| s.has_converged());
            if residual < self.config.tolerance && adapters_converged {
                stable += 1;
                if stable >= self.config.stable_iterations {
                    return Ok(HybridOutcome {
                        converged: true,
                        iterations: iteration + 1,
                        residual,
                    });
                }
            } else {
                stable = 0;
            }
        }

        let error = SimulationError::DidNotConverge {
            max_iterations: self.config.max_iterations,
            residual,
        };
        warn!("{error}");
        Ok(HybridOutcome {
            converged: false,
            iterations: self.config.max_iterations,
            residual,
        })
    }

    /// The datum pressures applied to groups without a ground node
    fn datum_pressures(&self) -> HashMap<usize, f64> {
        let mut imposed = HashMap::new();
        for exports in self.pressure_exports.values() {
            for &node in exports {
                let datum = self.read_pressures.get(&node).copied().unwrap_or(0.0);
                imposed.insert(node, datum);
            }
        }
        imposed
    }

    /// Recompute the star resistances of a module from the CFD results
    fn update_port_resistances(&self, network: &mut Network, module_id: usize) -> Result<()> {
        let module = network.module(module_id)?.clone();
        let reference = module.reference_node;
        let p_ref = self
            .read_pressures
            .get(&reference)
            .copied()
            .unwrap_or_else(|| {
                network
                    .node(reference)
                    .map(|n| n.pressure)
                    .unwrap_or_default()
            });
        for &port in &module.port_edges {
            let edge = network.edge(port)?;
            let other = if edge.node_a == reference {
                Some(edge.node_b)
            } else if edge.node_b == reference {
                Some(edge.node_a)
            } else {
                None
            };
            let Some(opening) = other else {
                // Ports not incident to the reference are retired from the
                // approximation once CFD results exist.
                if !self.read_flows.is_empty() {
                    set_port_resistance(network, port, 1e30)?;
                }
                continue;
            };
            let p_open = self
                .pushed_pressures
                .get(&opening)
                .copied()
                .unwrap_or_else(|| {
                    network
                        .node(opening)
                        .map(|n| n.pressure)
                        .unwrap_or_default()
                });
            let q = self.read_flows.get(&opening).copied().unwrap_or(0.0);
            if q.abs() > f64::MIN_POSITIVE {
                let resistance = ((p_open - p_ref) / q).abs();
                if resistance.is_finite() && resistance > 0.0 {
                    set_port_resistance(network, port, resistance)?;
                }
            }
        }
        Ok(())
    }

    fn track_delta(&mut self, node: usize, old: Option<f64>, new: f64) {
        let delta = new - old.unwrap_or(new);
        if self.variant == SchemeVariant::Adaptive {
            if let Some(&previous) = self.previous_deltas.get(&node) {
                let alpha = self.alphas.entry(node).or_insert(self.config.relaxation_factor);
                if previous * delta < 0.0 {
                    *alpha = (*alpha * 0.5).max(constants::MIN_RELAXATION_FACTOR);
                } else if previous * delta > 0.0 {
                    *alpha = (*alpha * 1.1).min(1.0);
                }
            }
        }
        self.previous_deltas.insert(node, delta);
    }

    /// Equivalent resistance reported for an opening, for consistency checks
    pub fn equivalent_resistance(&self, network: &Network, module_id: usize, opening: usize) -> Option<f64> {
        let module = network.module(module_id).ok()?;
        let reference = module.reference_node;
        for &port in &module.port_edges {
            let edge = network.edge(port).ok()?;
            let pair = (edge.node_a, edge.node_b);
            if pair == (reference, opening) || pair == (opening, reference) {
                return edge.resistance();
            }
        }
        None
    }
}

fn set_port_resistance(
    network: &mut Network,
    edge_id: usize,
    value: f64,
) -> Result<()> {
    let edge = network.edge_mut(edge_id).map_err(ChipflowError::from)?;
    if let EdgeKind::CfdPort { resistance, .. } = &mut edge.kind {
        *resistance = value;
    }
    Ok(())
}

fn relax(old: Option<f64>, raw: f64, alpha: f64) -> f64 {
    match old {
        Some(previous) => (1.0 - alpha) * previous + alpha * raw,
        None => raw,
    }
}

fn relative_change(old: Option<f64>, new: f64) -> f64 {
    match old {
        Some(previous) => {
            let scale = previous.abs().max(new.abs()).max(f64::MIN_POSITIVE);
            (new - previous).abs() / scale
        }
        None => f64::INFINITY,
    }
}

/// Net 1D flow into an opening node, excluding the module's own port edges
fn inflow_from_network(network: &Network, node: usize) -> f64 {
    let mut inflow = 0.0;
    for edge in network.edges() {
        match edge.kind {
            EdgeKind::Channel(_)
            | EdgeKind::PressurePump { .. }
            | EdgeKind::FlowRatePump { .. } => {
                let q = edge.raw_flow_rate();
                if edge.node_b == node {
                    inflow += q;
                } else if edge.node_a == node {
                    inflow -= q;
                }
            }
            _ => {}
        }
    }
    inflow
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relaxation_blends_towards_raw_value() {
        assert_eq!(relax(None, 2.0, 0.5), 2.0);
        assert_eq!(relax(Some(0.0), 2.0, 0.5), 1.0);
        assert_eq!(relax(Some(1.0), 1.0, 0.25), 1.0);
    }

    #[test]
    fn relative_change_is_scale_free() {
        let change = relative_change(Some(100.0), 101.0);
        assert!((change - 1.0 / 101.0).abs() < 1e-12);
        assert_eq!(relative_change(None, 1.0), f64::INFINITY);
    }
}
