//! nodal.rs - Modified Nodal Analysis of 1D Groups
//!
//! Solves, per group, a linear system for the pressures at non-ground nodes
//! and the branch flows through pressure pumps. Resistive edges (channels
//! and CFD ports) contribute conductance stamps, flow-rate pumps contribute
//! source terms, and each pressure pump introduces one extra unknown and one
//! constraint equation enforcing its potential difference.
//!
//! Groups without a ground node obtain their pressure datum from externally
//! imposed reference pressures at their openings; a group with neither fails
//! with [`NodalError::UnderspecifiedGroup`].

use crate::error::{NodalError, NodalResult};
use crate::network::{EdgeKind, Group, Network};
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;

/// Solve every group of the network. `imposed_pressures` carries externally
/// fixed node pressures (e.g. CFD-returned reference values at module
/// openings) in addition to the ground nodes.
pub fn solve_network(
    network: &mut Network,
    imposed_pressures: &HashMap<usize, f64>,
) -> NodalResult<()> {
    if network.groups().is_empty() {
        network.rebuild_groups();
    }
    let groups: Vec<Group> = network.groups().to_vec();
    for group in &groups {
        solve_group(network, group, imposed_pressures)?;
    }
    propagate_membrane_flows(network);
    Ok(())
}

/// Solve a single group and write pressures and flow rates into the network
pub fn solve_group(
    network: &mut Network,
    group: &Group,
    imposed_pressures: &HashMap<usize, f64>,
) -> NodalResult<()> {
    // Fixed-potential nodes: ground nodes sit at 0 Pa, imposed references at
    // their supplied value.
    let mut fixed: HashMap<usize, f64> = HashMap::new();
    for &node_id in &group.node_ids {
        let node = network.node(node_id).expect("group references valid node");
        if node.ground {
            fixed.insert(node_id, 0.0);
        } else if let Some(&p) = imposed_pressures.get(&node_id) {
            fixed.insert(node_id, p);
        }
    }
    if fixed.is_empty() {
        return Err(NodalError::UnderspecifiedGroup { group_id: group.id });
    }

    let unknown_nodes: Vec<usize> = group
        .node_ids
        .iter()
        .copied()
        .filter(|n| !fixed.contains_key(n))
        .collect();
    let node_index: HashMap<usize, usize> = unknown_nodes
        .iter()
        .enumerate()
        .map(|(i, &n)| (n, i))
        .collect();

    let pressure_pumps: Vec<usize> = group
        .edge_ids
        .iter()
        .copied()
        .filter(|&e| {
            matches!(
                network.edge(e).expect("group references valid edge").kind,
                EdgeKind::PressurePump { .. }
            )
        })
        .collect();

    let n = unknown_nodes.len();
    let m = pressure_pumps.len();
    let size = n + m;
    let mut a = DMatrix::<f64>::zeros(size, size);
    let mut b = DVector::<f64>::zeros(size);

    for &edge_id in &group.edge_ids {
        let edge = network.edge(edge_id).expect("group references valid edge");
        match edge.kind {
            EdgeKind::Channel(_) | EdgeKind::CfdPort { .. } => {
                let resistance = edge.resistance().unwrap_or(f64::INFINITY);
                if !resistance.is_finite() || resistance <= 0.0 {
                    continue;
                }
                let g = 1.0 / resistance;
                for (this, other) in [(edge.node_a, edge.node_b), (edge.node_b, edge.node_a)] {
                    if let Some(&i) = node_index.get(&this) {
                        a[(i, i)] += g;
                        if let Some(&j) = node_index.get(&other) {
                            a[(i, j)] -= g;
                        } else {
                            b[i] += g * fixed[&other];
                        }
                    }
                }
            }
            EdgeKind::FlowRatePump { flow_rate } => {
                if let Some(&i) = node_index.get(&edge.node_a) {
                    b[i] -= flow_rate;
                }
                if let Some(&i) = node_index.get(&edge.node_b) {
                    b[i] += flow_rate;
                }
            }
            _ => {}
        }
    }

    for (k, &pump_id) in pressure_pumps.iter().enumerate() {
        let edge = network.edge(pump_id).expect("group references valid edge");
        let row = n + k;
        let pressure = match edge.kind {
            EdgeKind::PressurePump { pressure } => pressure,
            _ => unreachable!("pressure_pumps only holds pressure pumps"),
        };
        // Branch flow from node_a to node_b enters the KCL rows.
        if let Some(&i) = node_index.get(&edge.node_a) {
            a[(i, row)] += 1.0;
        }
        if let Some(&i) = node_index.get(&edge.node_b) {
            a[(i, row)] -= 1.0;
        }
        // Constraint: p_b - p_a = pressure.
        b[row] = pressure;
        match node_index.get(&edge.node_b) {
            Some(&j) => a[(row, j)] += 1.0,
            None => b[row] -= fixed[&edge.node_b],
        }
        match node_index.get(&edge.node_a) {
            Some(&j) => a[(row, j)] -= 1.0,
            None => b[row] += fixed[&edge.node_a],
        }
    }

    let x = if size > 0 {
        a.lu()
            .solve(&b)
            .ok_or(NodalError::SingularSystem { group_id: group.id })?
    } else {
        DVector::zeros(0)
    };

    for (&node_id, &i) in &node_index {
        network.set_pressure(node_id, x[i]);
    }
    for (&node_id, &p) in &fixed {
        network.set_pressure(node_id, p);
    }

    // Derived flow rates.
    for &edge_id in &group.edge_ids {
        let edge = network.edge(edge_id).expect("group references valid edge");
        let (node_a, node_b) = (edge.node_a, edge.node_b);
        match edge.kind {
            EdgeKind::Channel(_) | EdgeKind::CfdPort { .. } => {
                let resistance = edge.resistance().unwrap_or(f64::INFINITY);
                let flow = if resistance.is_finite() && resistance > 0.0 {
                    let pa = network.node(node_a).expect("valid node").pressure;
                    let pb = network.node(node_b).expect("valid node").pressure;
                    (pa - pb) / resistance
                } else {
                    0.0
                };
                network.store_flow_rate(edge_id, flow);
            }
            EdgeKind::FlowRatePump { flow_rate } => {
                network.store_flow_rate(edge_id, flow_rate);
            }
            EdgeKind::PressurePump { .. } => {
                let k = pressure_pumps.iter().position(|&p| p == edge_id).unwrap();
                network.store_flow_rate(edge_id, x[n + k]);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Membranes report the flow of their companion channel
fn propagate_membrane_flows(network: &mut Network) {
    let pairs: Vec<(usize, usize)> = network
        .edges()
        .iter()
        .filter_map(|e| match &e.kind {
            EdgeKind::Membrane(m) => m.channel_id.map(|c| (e.id, c)),
            _ => None,
        })
        .collect();
    for (membrane_id, channel_id) in pairs {
        let flow = network
            .edge(channel_id)
            .ok()
            .map(|e| e.raw_flow_rate())
            .unwrap_or(0.0);
        network.store_flow_rate(membrane_id, flow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::resistance::{RectangularResistance, ResistanceModel};
    use approx::assert_relative_eq;

    fn apply_resistances(network: &mut Network, viscosity: f64) {
        let model = RectangularResistance::new(viscosity);
        let updates: Vec<(usize, f64)> = network
            .edges()
            .iter()
            .filter_map(|e| {
                e.as_channel()
                    .map(|c| (e.id, model.channel_resistance(c).unwrap()))
            })
            .collect();
        for (id, r) in updates {
            if let Some(channel) = network.edge_mut(id).unwrap().as_channel_mut() {
                channel.resistance = r;
            }
        }
    }

    /// A single channel driven by a pressure pump carries `dp / R`
    #[test]
    fn series_channel_flow() {
        let mut network = Network::new();
        let ground = network.add_node(0.0, 0.0, true).unwrap();
        let inlet = network.add_node(0.0, 1e-3, false).unwrap();
        let outlet = network.add_node(1e-3, 1e-3, false).unwrap();
        network.add_pressure_pump(ground, inlet, 1000.0).unwrap();
        let c = network.add_channel(inlet, outlet, 100e-6, 30e-6, None).unwrap();
        let c_back = network
            .add_channel(outlet, ground, 100e-6, 30e-6, Some(1e-3))
            .unwrap();
        apply_resistances(&mut network, 1e-3);
        network.rebuild_groups();
        solve_network(&mut network, &HashMap::new()).unwrap();

        let r = network.edge(c).unwrap().resistance().unwrap();
        let expected = 1000.0 / (2.0 * r);
        assert_relative_eq!(
            network.edge(c).unwrap().flow_rate().unwrap(),
            expected,
            max_relative = 1e-10
        );
        assert_relative_eq!(
            network.edge(c_back).unwrap().flow_rate().unwrap(),
            expected,
            max_relative = 1e-10
        );
        assert_relative_eq!(
            network.node(inlet).unwrap().pressure,
            1000.0,
            max_relative = 1e-12
        );
    }

    /// Kirchhoff's current law at an interior node
    #[test]
    fn flow_conservation_at_junction() {
        let mut network = Network::new();
        let ground = network.add_node(0.0, 0.0, true).unwrap();
        let a = network.add_node(0.0, 1e-3, false).unwrap();
        let b = network.add_node(1e-3, 1e-3, false).unwrap();
        network.add_flow_rate_pump(ground, a, 3e-11).unwrap();
        let c1 = network.add_channel(a, b, 100e-6, 30e-6, Some(1e-3)).unwrap();
        let c2 = network.add_channel(b, ground, 100e-6, 30e-6, Some(1e-3)).unwrap();
        let c3 = network.add_channel(b, ground, 100e-6, 30e-6, Some(2e-3)).unwrap();
        apply_resistances(&mut network, 1e-3);
        network.rebuild_groups();
        solve_network(&mut network, &HashMap::new()).unwrap();

        let q1 = network.edge(c1).unwrap().flow_rate().unwrap();
        let q2 = network.edge(c2).unwrap().flow_rate().unwrap();
        let q3 = network.edge(c3).unwrap().flow_rate().unwrap();
        assert_relative_eq!(q1, 3e-11, max_relative = 1e-12);
        assert_relative_eq!(q1, q2 + q3, max_relative = 1e-12);
        // The shorter channel takes twice the flow of the channel with
        // twice the length.
        assert_relative_eq!(q2, 2.0 * q3, max_relative = 1e-10);
    }

    /// An isolated group without any reference fails
    #[test]
    fn underspecified_group_is_reported() {
        let mut network = Network::new();
        let a = network.add_node(0.0, 0.0, false).unwrap();
        let b = network.add_node(1e-3, 0.0, false).unwrap();
        network.add_channel(a, b, 100e-6, 30e-6, None).unwrap();
        network.rebuild_groups();
        let err = solve_network(&mut network, &HashMap::new()).unwrap_err();
        assert!(matches!(err, NodalError::UnderspecifiedGroup { .. }));
    }

    /// An imposed reference pressure substitutes for a ground node
    #[test]
    fn imposed_reference_fixes_datum() {
        let mut network = Network::new();
        let a = network.add_node(0.0, 0.0, false).unwrap();
        let b = network.add_node(1e-3, 0.0, false).unwrap();
        let c = network.add_channel(a, b, 100e-6, 30e-6, None).unwrap();
        apply_resistances(&mut network, 1e-3);
        network.rebuild_groups();
        let imposed = HashMap::from([(a, 500.0)]);
        solve_network(&mut network, &imposed).unwrap();
        assert_relative_eq!(network.node(a).unwrap().pressure, 500.0);
        assert_relative_eq!(network.node(b).unwrap().pressure, 500.0);
        assert_relative_eq!(network.edge(c).unwrap().flow_rate().unwrap(), 0.0);
    }
}
