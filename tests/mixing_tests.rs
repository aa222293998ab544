//! tests/mixing_tests.rs
//!
//! End-to-end tests of the mixing platform: instantaneous merging at a
//! junction, species mass conservation, and the diffusive model's
//! cross-section profiles at a T-junction.

use approx::assert_relative_eq;
use chipflow::config::TimeConfig;
use chipflow::network::Network;
use chipflow::simulation::{Platform, Simulation};
use std::collections::HashMap;

const W: f64 = 100e-6;
const H: f64 = 100e-6;
const L: f64 = 1000e-6;

/// Two inlets at equal flow feeding a common outlet channel
fn t_junction() -> (Simulation, [usize; 3], usize) {
    let mut network = Network::new();
    let ground = network.add_node(3e-3, 0.0, true).unwrap();
    let in_a = network.add_node(0.0, 1e-3, false).unwrap();
    let in_b = network.add_node(0.0, -1e-3, false).unwrap();
    let junction = network.add_node(1e-3, 0.0, false).unwrap();

    network.add_flow_rate_pump(ground, in_a, 1e-9).unwrap();
    network.add_flow_rate_pump(ground, in_b, 1e-9).unwrap();
    let ca = network.add_channel(in_a, junction, W, H, Some(L)).unwrap();
    let cb = network.add_channel(in_b, junction, W, H, Some(L)).unwrap();
    let out = network.add_channel(junction, ground, W, H, Some(L)).unwrap();

    let mut simulation = Simulation::new(network);
    simulation.set_platform(Platform::Mixing);
    let fluid = simulation.add_fluid(1e-3, 1e3, 0.0);
    simulation.set_continuous_phase(fluid);
    simulation.set_rectangular_resistance_model();
    simulation.set_time_config(TimeConfig::new(1e-3, 1e-2, 4e-2).unwrap());
    (simulation, [ca, cb, out], ground)
}

/// Equal inflows at concentrations 1 and 0 merge to 0.5
#[test]
fn instantaneous_merge_halves_concentration() {
    let (mut simulation, [ca, cb, out], _) = t_junction();
    simulation.set_instantaneous_mixing();
    let species = simulation.add_species(1e-9, 1.0);
    let hot = simulation.add_mixture(HashMap::from([(species, 1.0)]));
    let cold = simulation.add_mixture(HashMap::from([(species, 0.0)]));
    simulation.add_mixture_injection(hot, ca, 0.0, true);
    simulation.add_mixture_injection(cold, cb, 0.0, true);

    simulation.simulate().unwrap();
    let state = simulation.result().last_state().unwrap().clone();

    let segments = state
        .mixture_positions
        .get(&out)
        .expect("the outlet should carry mixture slugs");
    assert!(!segments.is_empty());
    for segment in segments {
        let mixture = simulation.mixtures().mixture(segment.mixture_id).unwrap();
        assert_relative_eq!(mixture.concentration(species), 0.5, epsilon = 1e-7);
    }
}

/// The outlet keeps receiving the merged mixture while both inlets feed
#[test]
fn outlet_fills_completely_over_time() {
    let (mut simulation, [ca, cb, out], _) = t_junction();
    simulation.set_instantaneous_mixing();
    let species = simulation.add_species(1e-9, 1.0);
    let hot = simulation.add_mixture(HashMap::from([(species, 1.0)]));
    simulation.add_mixture_injection(hot, ca, 0.0, true);
    simulation.add_mixture_injection(hot, cb, 0.0, true);

    simulation.simulate().unwrap();
    let state = simulation.result().last_state().unwrap().clone();
    let segments = &state.mixture_positions[&out];

    // After several residence times the outlet is fully covered.
    let covered: f64 = segments.iter().map(|s| s.position_2 - s.position_1).sum();
    assert_relative_eq!(covered, 1.0, epsilon = 1e-9);
    for segment in segments {
        let mixture = simulation.mixtures().mixture(segment.mixture_id).unwrap();
        assert_relative_eq!(mixture.concentration(species), 1.0, epsilon = 1e-9);
    }
}

/// The diffusive model reproduces the analytic step-profile projection at a
/// T-junction
#[test]
fn diffusive_t_junction_profile() {
    let (mut simulation, [ca, cb, out], _) = t_junction();
    simulation.set_diffusive_mixing(10);
    // Diffusivity chosen for a channel Peclet number of about 30.
    let species = simulation.add_species(4.4e-10, 1.0);
    let low = simulation.add_mixture(HashMap::from([(species, 0.0)]));
    let high = simulation.add_mixture(HashMap::from([(species, 1.0)]));
    simulation.add_mixture_injection(low, ca, 0.0, true);
    simulation.add_mixture_injection(high, cb, 0.0, true);

    simulation.simulate().unwrap();
    let state = simulation.result().last_state().unwrap().clone();
    let segments = &state.mixture_positions[&out];
    assert!(!segments.is_empty());

    // The slug entering the outlet carries the merged cross-section profile:
    // flat 0 over the first half, flat 1 over the second.
    let entry = segments
        .iter()
        .min_by(|a, b| a.position_1.total_cmp(&b.position_1))
        .unwrap();
    let mixture = simulation.mixtures().mixture(entry.mixture_id).unwrap();
    let profile = mixture
        .profiles
        .get(&species)
        .expect("diffusive mixtures carry profiles");

    let pi = std::f64::consts::PI;
    assert_relative_eq!(profile.a0, 0.5, epsilon = 1e-7);
    // Step profile 0 -> 1 at the channel centerline.
    assert_relative_eq!(profile.coefficients[0], -2.0 / pi, epsilon = 1e-6);
    assert_relative_eq!(profile.coefficients[1], 0.0, epsilon = 1e-6);
    assert_relative_eq!(profile.coefficients[2], 2.0 / (3.0 * pi), epsilon = 1e-6);

    // The width-integrated concentration equals a0: the cosine modes carry
    // no net mass.
    let n = 1000;
    let integral: f64 = (0..n)
        .map(|i| profile.evaluate((i as f64 + 0.5) / n as f64) / n as f64)
        .sum();
    assert_relative_eq!(integral, profile.a0, epsilon = 1e-6);
}

/// At steady state the species inventory of every channel matches its
/// feed concentration, so the junction neither creates nor destroys mass
#[test]
fn steady_state_inventory_balances() {
    let (mut simulation, [ca, cb, out], _) = t_junction();
    simulation.set_instantaneous_mixing();
    let species = simulation.add_species(1e-9, 1.0);
    let hot = simulation.add_mixture(HashMap::from([(species, 1.0)]));
    let cold = simulation.add_mixture(HashMap::from([(species, 0.0)]));
    simulation.add_mixture_injection(hot, ca, 0.0, true);
    simulation.add_mixture_injection(cold, cb, 0.0, true);

    simulation.simulate().unwrap();
    let state = simulation.result().last_state().unwrap().clone();

    let inventory = |channel: usize| -> f64 {
        state
            .mixture_positions
            .get(&channel)
            .map(|segments| {
                segments
                    .iter()
                    .map(|s| {
                        let c = simulation
                            .mixtures()
                            .mixture(s.mixture_id)
                            .unwrap()
                            .concentration(species);
                        c * (s.position_2 - s.position_1) * W * H * L
                    })
                    .sum::<f64>()
            })
            .unwrap_or(0.0)
    };

    let channel_volume = W * H * L;
    // The hot inlet is full of concentration 1, the cold inlet carries
    // nothing, and the outlet holds the 0.5 blend over its full length.
    assert_relative_eq!(inventory(ca), channel_volume, max_relative = 1e-9);
    assert_relative_eq!(inventory(cb), 0.0, epsilon = 1e-24);
    assert_relative_eq!(inventory(out), 0.5 * channel_volume, max_relative = 1e-9);
}
