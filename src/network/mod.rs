//! network - The Microfluidic Network Graph
//!
//! The network is a directed multigraph of nodes and edges, plus the CFD
//! modules that replace selected sub-regions with mesh-based flow domains.
//! Nodes, edges, modules and groups live in contiguous stores keyed by their
//! index; all cross-references are ids.
//!
//! Once a simulation has started the network is frozen: structural changes
//! fail with [`NetworkError::NetworkFrozen`], while solver state (pressures,
//! flow rates, resistances) remains writable.

pub mod edge;
pub mod module;
pub mod node;

pub use edge::{Channel, CrossSection, Edge, EdgeKind, Membrane, Tank};
pub use module::{CfdModule, Opening};
pub use node::Node;

use crate::error::{NetworkError, NetworkResult};
use std::collections::HashMap;

/// Geometric tolerance used when matching opening nodes to module boundaries
const BOUNDARY_TOLERANCE: f64 = 1e-9;

/// A maximal connected 1D sub-network; the unit of nodal analysis.
///
/// CFD port edges are included so that the equivalent resistances standing in
/// for a module interior join the 1D parts they bridge into one solvable
/// system.
#[derive(Debug, Clone)]
pub struct Group {
    /// Unique identifier of this group
    pub id: usize,
    /// Nodes belonging to this group
    pub node_ids: Vec<usize>,
    /// Channels, pumps and CFD ports belonging to this group
    pub edge_ids: Vec<usize>,
    /// Whether the group contains at least one ground node
    pub grounded: bool,
    /// Opening nodes through which the group meets CFD modules
    pub opening_nodes: Vec<usize>,
}

/// The microfluidic network graph
#[derive(Debug, Clone, Default)]
pub struct Network {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    modules: Vec<CfdModule>,
    groups: Vec<Group>,
    frozen: bool,
}

impl Network {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_mutable(&self) -> NetworkResult<()> {
        if self.frozen {
            Err(NetworkError::NetworkFrozen)
        } else {
            Ok(())
        }
    }

    /// Freeze the network; subsequent structural changes fail
    pub fn freeze(&mut self) {
        self.frozen = true;
        self.rebuild_groups();
    }

    /// Whether the network is frozen
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    //======================================= Nodes ======================================

    /// Add a node at the given position; returns its id
    pub fn add_node(&mut self, x: f64, y: f64, ground: bool) -> NetworkResult<usize> {
        self.ensure_mutable()?;
        let id = self.nodes.len();
        self.nodes.push(Node::new(id, x, y, ground));
        Ok(id)
    }

    /// Mark a node as a droplet sink
    pub fn set_sink(&mut self, node_id: usize) -> NetworkResult<()> {
        self.ensure_mutable()?;
        self.node_mut(node_id)?.sink = true;
        Ok(())
    }

    /// Mark a node as a ground node
    pub fn set_ground(&mut self, node_id: usize) -> NetworkResult<()> {
        self.ensure_mutable()?;
        self.node_mut(node_id)?.ground = true;
        Ok(())
    }

    /// Access a node by id
    pub fn node(&self, node_id: usize) -> NetworkResult<&Node> {
        self.nodes.get(node_id).ok_or(NetworkError::UnknownId {
            entity: "node",
            id: node_id,
        })
    }

    pub(crate) fn node_mut(&mut self, node_id: usize) -> NetworkResult<&mut Node> {
        self.nodes.get_mut(node_id).ok_or(NetworkError::UnknownId {
            entity: "node",
            id: node_id,
        })
    }

    /// All nodes of the network
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Write a solved pressure to a node
    pub(crate) fn set_pressure(&mut self, node_id: usize, pressure: f64) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.pressure = pressure;
        }
    }

    //======================================= Edges ======================================

    fn push_edge(&mut self, node_a: usize, node_b: usize, kind: EdgeKind) -> NetworkResult<usize> {
        self.node(node_a)?;
        self.node(node_b)?;
        // Tanks and CFD ports must be unique per node pair; channels, pumps
        // and membranes may be parallel.
        let unique = matches!(kind, EdgeKind::Tank(_) | EdgeKind::CfdPort { .. });
        if unique {
            let duplicate = self.edges.iter().any(|e| {
                std::mem::discriminant(&e.kind) == std::mem::discriminant(&kind)
                    && ((e.node_a == node_a && e.node_b == node_b)
                        || (e.node_a == node_b && e.node_b == node_a))
            });
            if duplicate {
                return Err(NetworkError::invalid_geometry(format!(
                    "duplicate edge of the same kind between nodes {node_a} and {node_b}"
                )));
            }
        }
        let id = self.edges.len();
        self.edges.push(Edge::new(id, node_a, node_b, kind));
        Ok(id)
    }

    /// Add a rectangular channel. A `length` of `None` or `Some(0.0)` derives
    /// the length from the endpoint coordinates.
    pub fn add_channel(
        &mut self,
        node_a: usize,
        node_b: usize,
        width: f64,
        height: f64,
        length: Option<f64>,
    ) -> NetworkResult<usize> {
        self.ensure_mutable()?;
        let cross_section = CrossSection::Rectangular { width, height };
        self.add_channel_with_cross_section(node_a, node_b, cross_section, length)
    }

    /// Add a circular channel
    pub fn add_circular_channel(
        &mut self,
        node_a: usize,
        node_b: usize,
        radius: f64,
        length: Option<f64>,
    ) -> NetworkResult<usize> {
        self.ensure_mutable()?;
        self.add_channel_with_cross_section(node_a, node_b, CrossSection::Circular { radius }, length)
    }

    fn add_channel_with_cross_section(
        &mut self,
        node_a: usize,
        node_b: usize,
        cross_section: CrossSection,
        length: Option<f64>,
    ) -> NetworkResult<usize> {
        cross_section.validate()?;
        let derived = self.node(node_a)?.distance_to(self.node(node_b)?);
        let length = match length {
            Some(l) if l > 0.0 => l,
            Some(l) if l < 0.0 => {
                return Err(NetworkError::invalid_geometry(format!(
                    "channel length {l} must not be negative"
                )))
            }
            _ => derived,
        };
        if length <= 0.0 || !length.is_finite() {
            return Err(NetworkError::invalid_geometry(format!(
                "channel between nodes {node_a} and {node_b} has non-positive length"
            )));
        }
        self.push_edge(
            node_a,
            node_b,
            EdgeKind::Channel(Channel {
                cross_section,
                length,
                resistance: 0.0,
                droplet_resistance: 0.0,
            }),
        )
    }

    /// Add a pump imposing the pressure difference `p_b - p_a` in Pa
    pub fn add_pressure_pump(
        &mut self,
        node_a: usize,
        node_b: usize,
        pressure: f64,
    ) -> NetworkResult<usize> {
        self.ensure_mutable()?;
        self.push_edge(node_a, node_b, EdgeKind::PressurePump { pressure })
    }

    /// Add a pump imposing a volumetric flow rate from `node_a` to `node_b`
    pub fn add_flow_rate_pump(
        &mut self,
        node_a: usize,
        node_b: usize,
        flow_rate: f64,
    ) -> NetworkResult<usize> {
        self.ensure_mutable()?;
        self.push_edge(node_a, node_b, EdgeKind::FlowRatePump { flow_rate })
    }

    /// Replace an existing channel with a pressure pump, keeping its id
    pub fn set_pressure_pump(&mut self, edge_id: usize, pressure: f64) -> NetworkResult<()> {
        self.ensure_mutable()?;
        let edge = self.edge_mut(edge_id)?;
        edge.kind = EdgeKind::PressurePump { pressure };
        Ok(())
    }

    /// Replace an existing channel with a flow-rate pump, keeping its id
    pub fn set_flow_rate_pump(&mut self, edge_id: usize, flow_rate: f64) -> NetworkResult<()> {
        self.ensure_mutable()?;
        let edge = self.edge_mut(edge_id)?;
        edge.kind = EdgeKind::FlowRatePump { flow_rate };
        Ok(())
    }

    /// Add a porous membrane between two nodes. The membrane must form a
    /// triangle with exactly one channel and one tank over the same node
    /// pair, which is checked by [`Network::validate`].
    pub fn add_membrane(
        &mut self,
        node_a: usize,
        node_b: usize,
        width: f64,
        height: f64,
        length: f64,
        pore_radius: f64,
        porosity: f64,
    ) -> NetworkResult<usize> {
        self.ensure_mutable()?;
        if width <= 0.0 || height <= 0.0 || length <= 0.0 {
            return Err(NetworkError::invalid_geometry(
                "membrane dimensions must be positive",
            ));
        }
        if pore_radius <= 0.0 || !(0.0..=1.0).contains(&porosity) {
            return Err(NetworkError::invalid_geometry(
                "membrane pore radius must be positive and porosity in [0, 1]",
            ));
        }
        self.push_edge(
            node_a,
            node_b,
            EdgeKind::Membrane(Membrane {
                width,
                height,
                length,
                pore_radius,
                porosity,
                channel_id: None,
                tank_id: None,
            }),
        )
    }

    /// Add a tank between two nodes
    pub fn add_tank(
        &mut self,
        node_a: usize,
        node_b: usize,
        width: f64,
        height: f64,
        length: f64,
    ) -> NetworkResult<usize> {
        self.ensure_mutable()?;
        if width <= 0.0 || height <= 0.0 || length <= 0.0 {
            return Err(NetworkError::invalid_geometry(
                "tank dimensions must be positive",
            ));
        }
        self.push_edge(node_a, node_b, EdgeKind::Tank(Tank { width, height, length }))
    }

    /// Access an edge by id
    pub fn edge(&self, edge_id: usize) -> NetworkResult<&Edge> {
        self.edges.get(edge_id).ok_or(NetworkError::UnknownId {
            entity: "edge",
            id: edge_id,
        })
    }

    pub(crate) fn edge_mut(&mut self, edge_id: usize) -> NetworkResult<&mut Edge> {
        self.edges.get_mut(edge_id).ok_or(NetworkError::UnknownId {
            entity: "edge",
            id: edge_id,
        })
    }

    /// All edges of the network
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Pressure drop `p_a - p_b` over an edge in Pa
    pub fn pressure_drop(&self, edge_id: usize) -> NetworkResult<f64> {
        let edge = self.edge(edge_id)?;
        Ok(self.node(edge.node_a)?.pressure - self.node(edge.node_b)?.pressure)
    }

    /// Write a solved flow rate to an edge
    pub(crate) fn store_flow_rate(&mut self, edge_id: usize, flow_rate: f64) {
        if let Some(edge) = self.edges.get_mut(edge_id) {
            edge.set_flow_rate(flow_rate);
        }
    }

    /// Channels and pumps incident to a node
    pub fn reach(&self, node_id: usize) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| {
                (e.is_channel() || e.is_pump()) && (e.node_a == node_id || e.node_b == node_id)
            })
            .collect()
    }

    /// Channels incident to a node
    pub fn channels_at(&self, node_id: usize) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| e.is_channel() && (e.node_a == node_id || e.node_b == node_id))
            .collect()
    }

    //====================================== Modules =====================================

    /// Add a CFD module. Every opening node must lie on the module boundary;
    /// the module interior is bridged by CFD port edges used as the initial
    /// approximation in hybrid simulations.
    pub fn add_module(
        &mut self,
        position: (f64, f64),
        size: (f64, f64),
        stl_file: impl Into<String>,
        openings: Vec<Opening>,
    ) -> NetworkResult<usize> {
        self.ensure_mutable()?;
        let id = self.modules.len();
        let mut module = CfdModule::new(id, position, size, stl_file.into(), openings)?;
        for opening in &module.openings {
            let node = self.node(opening.node_id)?;
            if !module.contains_on_boundary(node.position, BOUNDARY_TOLERANCE) {
                return Err(NetworkError::invalid_geometry(format!(
                    "opening node {} does not lie on the boundary of module {id}",
                    opening.node_id
                )));
            }
        }
        // Fully connected approximation network between the openings.
        let opening_nodes: Vec<usize> = module.openings.iter().map(|o| o.node_id).collect();
        for (i, &a) in opening_nodes.iter().enumerate() {
            for &b in opening_nodes.iter().skip(i + 1) {
                let port = self.push_edge(
                    a,
                    b,
                    EdgeKind::CfdPort {
                        module_id: id,
                        resistance: 0.0,
                    },
                )?;
                module.port_edges.push(port);
            }
        }
        self.modules.push(module);
        Ok(id)
    }

    /// Access a module by id
    pub fn module(&self, module_id: usize) -> NetworkResult<&CfdModule> {
        self.modules.get(module_id).ok_or(NetworkError::UnknownId {
            entity: "module",
            id: module_id,
        })
    }

    /// All CFD modules of the network
    pub fn modules(&self) -> &[CfdModule] {
        &self.modules
    }

    //====================================== Groups ======================================

    /// Recompute the connected 1D groups of the network
    pub fn rebuild_groups(&mut self) {
        let mut visited = vec![false; self.nodes.len()];
        let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();
        for edge in &self.edges {
            let conducts = edge.is_channel()
                || edge.is_pump()
                || matches!(edge.kind, EdgeKind::CfdPort { .. });
            if conducts {
                adjacency.entry(edge.node_a).or_default().push(edge.id);
                adjacency.entry(edge.node_b).or_default().push(edge.id);
            }
        }
        let opening_nodes: Vec<usize> = self
            .modules
            .iter()
            .flat_map(|m| m.openings.iter().map(|o| o.node_id))
            .collect();

        self.groups.clear();
        for start in 0..self.nodes.len() {
            if visited[start] || !adjacency.contains_key(&start) {
                continue;
            }
            let mut stack = vec![start];
            visited[start] = true;
            let mut node_ids = Vec::new();
            let mut edge_ids = Vec::new();
            let mut seen_edges = vec![false; self.edges.len()];
            while let Some(node_id) = stack.pop() {
                node_ids.push(node_id);
                if let Some(incident) = adjacency.get(&node_id) {
                    for &edge_id in incident {
                        if !seen_edges[edge_id] {
                            seen_edges[edge_id] = true;
                            edge_ids.push(edge_id);
                        }
                        let other = self.edges[edge_id].opposite(node_id);
                        if !visited[other] {
                            visited[other] = true;
                            stack.push(other);
                        }
                    }
                }
            }
            node_ids.sort_unstable();
            edge_ids.sort_unstable();
            let grounded = node_ids.iter().any(|&n| self.nodes[n].ground);
            let openings = node_ids
                .iter()
                .copied()
                .filter(|n| opening_nodes.contains(n))
                .collect();
            let id = self.groups.len();
            self.groups.push(Group {
                id,
                node_ids,
                edge_ids,
                grounded,
                opening_nodes: openings,
            });
        }
    }

    /// The connected 1D groups; valid after [`Network::rebuild_groups`] or
    /// [`Network::freeze`]
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    //===================================== Validation ===================================

    /// Check completeness of the network: no dangling nodes, a reachable
    /// pressure reference, and resolved membrane triangles.
    pub fn validate(&mut self) -> NetworkResult<()> {
        for node in &self.nodes {
            let connected = self.edges.iter().any(|e| e.node_a == node.id || e.node_b == node.id);
            if !connected {
                return Err(NetworkError::incomplete(format!(
                    "node {} is not connected to any edge",
                    node.id
                )));
            }
        }
        if !self.nodes.iter().any(|n| n.ground) && self.modules.is_empty() {
            return Err(NetworkError::incomplete(
                "the network has no ground node and no CFD module to supply a reference",
            ));
        }
        self.resolve_membranes()?;
        Ok(())
    }

    /// Resolve the channel and tank partner of every membrane edge.
    /// A membrane must share its node pair with exactly one channel and one
    /// tank, forming a triangle.
    fn resolve_membranes(&mut self) -> NetworkResult<()> {
        let mut assignments = Vec::new();
        for edge in &self.edges {
            if let EdgeKind::Membrane(_) = edge.kind {
                let pair = (edge.node_a.min(edge.node_b), edge.node_a.max(edge.node_b));
                let mut channel_ids = Vec::new();
                let mut tank_ids = Vec::new();
                for other in &self.edges {
                    let other_pair = (other.node_a.min(other.node_b), other.node_a.max(other.node_b));
                    if other_pair != pair {
                        continue;
                    }
                    match other.kind {
                        EdgeKind::Channel(_) => channel_ids.push(other.id),
                        EdgeKind::Tank(_) => tank_ids.push(other.id),
                        _ => {}
                    }
                }
                if channel_ids.len() != 1 || tank_ids.len() != 1 {
                    return Err(NetworkError::incomplete(format!(
                        "membrane {} must form a triangle with exactly one channel and one tank \
                         (found {} channels, {} tanks)",
                        edge.id,
                        channel_ids.len(),
                        tank_ids.len()
                    )));
                }
                assignments.push((edge.id, channel_ids[0], tank_ids[0]));
            }
        }
        for (membrane_id, channel_id, tank_id) in assignments {
            if let EdgeKind::Membrane(membrane) = &mut self.edges[membrane_id].kind {
                membrane.channel_id = Some(channel_id);
                membrane.tank_id = Some(tank_id);
            }
        }
        Ok(())
    }

    /// Compute and store the resistance of every channel with the given
    /// model. Resistances are solver state and may be updated on a frozen
    /// network.
    pub fn apply_resistance_model(
        &mut self,
        model: &dyn crate::resistance::ResistanceModel,
    ) -> NetworkResult<()> {
        let updates: Vec<(usize, f64)> = self
            .edges
            .iter()
            .filter_map(|e| e.as_channel().map(|c| (e.id, c.clone())))
            .map(|(id, channel)| Ok((id, model.channel_resistance(&channel)?)))
            .collect::<NetworkResult<_>>()?;
        for (id, resistance) in updates {
            if let Some(channel) = self.edges[id].as_channel_mut() {
                channel.resistance = resistance;
            }
        }
        Ok(())
    }

    /// All membrane edge ids
    pub fn membrane_ids(&self) -> Vec<usize> {
        self.edges
            .iter()
            .filter(|e| matches!(e.kind, EdgeKind::Membrane(_)))
            .map(|e| e.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_network() -> (Network, usize, usize) {
        let mut network = Network::new();
        let a = network.add_node(0.0, 0.0, true).unwrap();
        let b = network.add_node(1e-3, 0.0, false).unwrap();
        (network, a, b)
    }

    #[test]
    fn derives_channel_length_from_positions() {
        let (mut network, a, b) = two_node_network();
        let c = network.add_channel(a, b, 100e-6, 30e-6, None).unwrap();
        let channel = network.edge(c).unwrap().as_channel().unwrap();
        assert!((channel.length - 1e-3).abs() < 1e-15);
    }

    #[test]
    fn frozen_network_rejects_mutation() {
        let (mut network, a, b) = two_node_network();
        network.add_channel(a, b, 100e-6, 30e-6, None).unwrap();
        network.freeze();
        let err = network.add_node(2e-3, 0.0, false).unwrap_err();
        assert!(matches!(err, NetworkError::NetworkFrozen));
    }

    #[test]
    fn groups_split_at_missing_edges() {
        let mut network = Network::new();
        let a = network.add_node(0.0, 0.0, true).unwrap();
        let b = network.add_node(1e-3, 0.0, false).unwrap();
        let c = network.add_node(2e-3, 0.0, false).unwrap();
        let d = network.add_node(3e-3, 0.0, false).unwrap();
        network.add_channel(a, b, 100e-6, 30e-6, None).unwrap();
        network.add_channel(c, d, 100e-6, 30e-6, None).unwrap();
        network.rebuild_groups();
        assert_eq!(network.groups().len(), 2);
        assert!(network.groups()[0].grounded);
        assert!(!network.groups()[1].grounded);
    }

    #[test]
    fn membrane_requires_triangle() {
        let (mut network, a, b) = two_node_network();
        network
            .add_membrane(a, b, 100e-6, 100e-6, 1e-3, 1e-7, 0.5)
            .unwrap();
        assert!(network.validate().is_err());
        network.add_channel(a, b, 100e-6, 100e-6, None).unwrap();
        network.add_tank(a, b, 1e-3, 1e-3, 1e-3).unwrap();
        assert!(network.validate().is_ok());
        let membrane_id = network.membrane_ids()[0];
        if let EdgeKind::Membrane(m) = &network.edge(membrane_id).unwrap().kind {
            assert!(m.channel_id.is_some() && m.tank_id.is_some());
        } else {
            panic!("expected membrane edge");
        }
    }

    #[test]
    fn duplicate_tank_between_same_nodes_is_rejected() {
        let (mut network, a, b) = two_node_network();
        network.add_tank(a, b, 1e-3, 1e-3, 1e-3).unwrap();
        assert!(network.add_tank(a, b, 1e-3, 1e-3, 1e-3).is_err());
    }
}
