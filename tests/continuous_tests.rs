//! tests/continuous_tests.rs
//!
//! End-to-end tests of the continuous platform: nodal analysis over
//! pressure- and flow-driven networks, direction independence, and the
//! conservation properties of the solved flow field.

use approx::assert_relative_eq;
use chipflow::network::Network;
use chipflow::simulation::{Platform, Simulation};

/// The canonical three-inlet network: three pressure pumps at 1000 Pa
/// through identical channels merging towards a grounded outlet.
fn three_inlet_simulation() -> (Simulation, Vec<usize>, Vec<usize>) {
    let mut network = Network::new();
    let n0 = network.add_node(0.0, 0.0, true).unwrap();
    let n1 = network.add_node(1e-3, 2e-3, false).unwrap();
    let n2 = network.add_node(1e-3, 1e-3, false).unwrap();
    let n3 = network.add_node(1e-3, 0.0, false).unwrap();
    let n4 = network.add_node(2e-3, 2e-3, false).unwrap();
    let n5 = network.add_node(2e-3, 1e-3, false).unwrap();
    let n6 = network.add_node(2e-3, 0.0, false).unwrap();
    let n7 = network.add_node(3e-3, 1e-3, true).unwrap();

    let pressure = 1e3;
    let p0 = network.add_pressure_pump(n0, n1, pressure).unwrap();
    let p1 = network.add_pressure_pump(n0, n2, pressure).unwrap();
    let p2 = network.add_pressure_pump(n0, n3, pressure).unwrap();

    let w = 100e-6;
    let h = 100e-6;
    let l = Some(1000e-6);
    let c1 = network.add_channel(n1, n4, w, h, l).unwrap();
    let c2 = network.add_channel(n2, n5, w, h, l).unwrap();
    let c3 = network.add_channel(n3, n6, w, h, l).unwrap();
    let c4 = network.add_channel(n4, n5, w, h, l).unwrap();
    let c5 = network.add_channel(n6, n5, w, h, l).unwrap();
    let c6 = network.add_channel(n5, n7, w, h, l).unwrap();

    let mut simulation = Simulation::new(network);
    simulation.set_platform(Platform::Continuous);
    let fluid = simulation.add_fluid(1e-3, 997.0, 1.0);
    simulation.set_continuous_phase(fluid);
    simulation.set_rectangular_resistance_model();
    (
        simulation,
        vec![n0, n1, n2, n3, n4, n5, n6, n7],
        vec![p0, p1, p2, c1, c2, c3, c4, c5, c6],
    )
}

/// All pressures and flow rates of the three-inlet network match the
/// analytical reference
#[test]
fn three_inlet_network_reference_values() {
    let (mut simulation, nodes, edges) = three_inlet_simulation();
    let result = simulation.simulate().unwrap();
    let state = result.last_state().unwrap();

    let expected_pressures = [
        0.0,
        1000.0,
        1000.0,
        1000.0,
        833.333333,
        666.666667,
        833.333333,
        0.0,
    ];
    for (node, expected) in nodes.iter().zip(expected_pressures) {
        assert_relative_eq!(state.pressures[node], expected, epsilon = 5e-6);
    }

    // Middle branch carries twice the outer branch flow; the outlet carries
    // the sum.
    let outlet = state.flow_rates[&edges[8]];
    assert_relative_eq!(outlet, 2.35871603e-9, max_relative = 1e-6);
    assert_relative_eq!(state.flow_rates[&edges[4]], outlet / 2.0, max_relative = 1e-9);
    assert_relative_eq!(state.flow_rates[&edges[3]], outlet / 4.0, max_relative = 1e-9);
    assert_relative_eq!(state.flow_rates[&edges[5]], outlet / 4.0, max_relative = 1e-9);
}

/// For every interior node the inflows balance the outflows
#[test]
fn flow_is_conserved_at_every_node() {
    let (mut simulation, nodes, _) = three_inlet_simulation();
    simulation.simulate().unwrap();
    let state = simulation.result().last_state().unwrap().clone();

    let network = simulation.network();
    let q_ref = state.flow_rates.values().fold(0.0f64, |a, q| a.max(q.abs()));
    for &node in &nodes {
        if network.node(node).unwrap().ground {
            continue;
        }
        let mut balance = 0.0;
        for edge in network.edges() {
            let q = state.flow_rates.get(&edge.id).copied().unwrap_or(0.0);
            if edge.node_a == node {
                balance -= q;
            } else if edge.node_b == node {
                balance += q;
            }
        }
        assert!(
            balance.abs() <= 1e-12 * q_ref,
            "node {node} violates conservation: residual {balance:.3e}"
        );
    }
}

/// Around every closed loop the signed pressure drops sum to zero
#[test]
fn pressure_drops_sum_to_zero_around_loops() {
    let (mut simulation, nodes, _) = three_inlet_simulation();
    let result = simulation.simulate().unwrap();
    let state = result.last_state().unwrap();
    let p = |i: usize| state.pressures[&nodes[i]];

    // Loop n1 -> n4 -> n5 -> n2 -> (pump) -> n1 via the shared source n0.
    let drop_c1 = p(1) - p(4);
    let drop_c4 = p(4) - p(5);
    let drop_c2 = p(2) - p(5);
    let p_max = 1000.0;
    assert!((drop_c1 + drop_c4 - drop_c2).abs() <= 1e-9 * p_max);
}

/// Reversing the direction of every channel flips the flow signs but keeps
/// the pressures
#[test]
fn channel_direction_does_not_change_the_solution() {
    let build = |swap: bool| {
        let mut network = Network::new();
        let n_in = network.add_node(0.0, 0.0, false).unwrap();
        let n_mid = network.add_node(1e-3, 0.0, false).unwrap();
        let n_gnd = network.add_node(2e-3, 0.0, true).unwrap();
        let (c1, c2) = if swap {
            (
                network.add_channel(n_mid, n_in, 100e-6, 30e-6, Some(1e-3)).unwrap(),
                network.add_channel(n_gnd, n_mid, 100e-6, 30e-6, Some(1e-3)).unwrap(),
            )
        } else {
            (
                network.add_channel(n_in, n_mid, 100e-6, 30e-6, Some(1e-3)).unwrap(),
                network.add_channel(n_mid, n_gnd, 100e-6, 30e-6, Some(1e-3)).unwrap(),
            )
        };
        network.add_pressure_pump(n_gnd, n_in, 1000.0).unwrap();
        let mut simulation = Simulation::new(network);
        simulation.set_platform(Platform::Continuous);
        let fluid = simulation.add_fluid(1e-3, 1e3, 1.0);
        simulation.set_continuous_phase(fluid);
        simulation.set_rectangular_resistance_model();
        simulation.simulate().unwrap();
        let state = simulation.result().last_state().unwrap().clone();
        (state, [n_in, n_mid, n_gnd], [c1, c2])
    };

    let (forward, f_nodes, f_edges) = build(false);
    let (reversed, r_nodes, r_edges) = build(true);

    for (a, b) in f_nodes.iter().zip(r_nodes.iter()) {
        assert_relative_eq!(forward.pressures[a], reversed.pressures[b], epsilon = 1e-9);
    }
    for (a, b) in f_edges.iter().zip(r_edges.iter()) {
        assert_relative_eq!(
            forward.flow_rates[a],
            -reversed.flow_rates[b],
            epsilon = 1e-20
        );
    }
}

/// A flow-rate pump imposes its rate exactly along a series chain
#[test]
fn flow_rate_pump_drives_series_chain() {
    let mut network = Network::new();
    let ground = network.add_node(0.0, 0.0, true).unwrap();
    let a = network.add_node(1e-3, 0.0, false).unwrap();
    let b = network.add_node(2e-3, 0.0, false).unwrap();
    network.add_flow_rate_pump(ground, a, 3e-11).unwrap();
    let c1 = network.add_channel(a, b, 100e-6, 30e-6, Some(1e-3)).unwrap();
    let c2 = network.add_channel(b, ground, 100e-6, 30e-6, Some(1e-3)).unwrap();

    let mut simulation = Simulation::new(network);
    simulation.set_platform(Platform::Continuous);
    let fluid = simulation.add_fluid(1e-3, 1e3, 1.0);
    simulation.set_continuous_phase(fluid);
    simulation.set_rectangular_resistance_model();
    let result = simulation.simulate().unwrap();
    let state = result.last_state().unwrap();

    assert_relative_eq!(state.flow_rates[&c1], 3e-11, max_relative = 1e-12);
    assert_relative_eq!(state.flow_rates[&c2], 3e-11, max_relative = 1e-12);
}

/// State ids are contiguous from zero with non-decreasing times
#[test]
fn state_ids_are_contiguous_and_ordered() {
    let (mut simulation, _, _) = three_inlet_simulation();
    let result = simulation.simulate().unwrap();
    for (i, state) in result.states.iter().enumerate() {
        assert_eq!(state.id, i);
    }
    assert!(result.states.windows(2).all(|w| w[0].time <= w[1].time));
}
