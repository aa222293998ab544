//! tests/membrane_tests.rs
//!
//! Tests of the membrane/tank transfer: mass moves from a channel slug into
//! the adjacent tank, total species mass is conserved, the exchange
//! approaches the equilibrium concentration, and hydraulic queries on tanks
//! are rejected.

use approx::assert_relative_eq;
use chipflow::membrane::{self, TankContents};
use chipflow::mixing::{InstantaneousMixingModel, MixingModel, MixtureStore};
use chipflow::network::{EdgeKind, Network};
use std::collections::HashMap;

const W: f64 = 100e-6;
const H: f64 = 100e-6;
const L: f64 = 1000e-6;

/// A channel with a membrane-coupled tank over the same node pair
fn membrane_setup() -> (Network, usize, usize) {
    let mut network = Network::new();
    let a = network.add_node(0.0, 0.0, true).unwrap();
    let b = network.add_node(L, 0.0, false).unwrap();
    let channel = network.add_channel(a, b, W, H, Some(L)).unwrap();
    network
        .add_membrane(a, b, W, 1e-5, L, 1e-7, 0.5)
        .unwrap();
    let tank = network.add_tank(a, b, 1e-3, 1e-3, L).unwrap();
    network.validate().unwrap();
    (network, channel, tank)
}

/// The decay time scale of the exchange, from the membrane geometry
fn relaxation_scale(network: &Network) -> f64 {
    let membrane_id = network.membrane_ids()[0];
    let EdgeKind::Membrane(membrane) = &network.edge(membrane_id).unwrap().kind else {
        panic!("expected a membrane edge");
    };
    membrane::membrane_resistance(membrane, 1e-3, membrane.area())
}

/// Mass leaving the channel slug accumulates in the tank, conserving the
/// total
#[test]
fn transfer_conserves_species_mass() {
    let (network, channel, tank) = membrane_setup();
    let mut store = MixtureStore::new();
    let species = store.add_species(4.4e-10, 10.0);
    let loaded = store.add_mixture(HashMap::from([(species, 1.0)]));

    let mut model = InstantaneousMixingModel::new();
    model.place_segment(channel, loaded, 0.0, 1.0);
    let mut tanks = TankContents::new();

    let slug_volume = W * H * L;
    let tank_volume = 1e-3 * 1e-3 * L;
    let initial_mass = 1.0 * slug_volume;

    let dt = 0.01 * relaxation_scale(&network);
    for _ in 0..200 {
        membrane::transfer(&network, &mut store, &mut model, &mut tanks, 1e-3, dt).unwrap();
    }

    let channel_concentration = store
        .mixture(model.segments(channel)[0].mixture_id)
        .unwrap()
        .concentration(species);
    let tank_concentration = tanks[&tank][&species];
    let total = channel_concentration * slug_volume + tank_concentration * tank_volume;

    assert!(tank_concentration > 0.0, "the tank should have been loaded");
    assert!(channel_concentration < 1.0, "the channel should have drained");
    assert_relative_eq!(total, initial_mass, max_relative = 1e-9);
}

/// Long exposure drives channel and tank towards a shared equilibrium
#[test]
fn transfer_approaches_equilibrium() {
    let (network, channel, tank) = membrane_setup();
    let mut store = MixtureStore::new();
    let species = store.add_species(4.4e-10, 10.0);
    let loaded = store.add_mixture(HashMap::from([(species, 1.0)]));

    let mut model = InstantaneousMixingModel::new();
    model.place_segment(channel, loaded, 0.0, 1.0);
    let mut tanks = TankContents::new();

    let dt = 0.01 * relaxation_scale(&network);
    let mut previous_tank = 0.0;
    for _ in 0..5000 {
        membrane::transfer(&network, &mut store, &mut model, &mut tanks, 1e-3, dt).unwrap();
        let current = tanks[&tank][&species];
        assert!(current >= previous_tank - 1e-15, "tank loading is monotone");
        previous_tank = current;
    }

    let channel_concentration = store
        .mixture(model.segments(channel)[0].mixture_id)
        .unwrap()
        .concentration(species);
    let tank_concentration = tanks[&tank][&species];

    // At equilibrium the concentration difference has decayed away.
    assert!(
        (channel_concentration - tank_concentration).abs() < 0.05 * channel_concentration,
        "channel at {channel_concentration:.4}, tank at {tank_concentration:.4}"
    );
}

/// Reading a flow rate from a tank edge is an illegal query
#[test]
fn tank_flow_rate_query_is_rejected() {
    let (network, _, tank) = membrane_setup();
    let error = network.edge(tank).unwrap().flow_rate().unwrap_err();
    assert!(error.to_string().contains("Illegal query"));
}

/// A membrane without its channel and tank partners fails validation
#[test]
fn incomplete_membrane_triangle_is_rejected() {
    let mut network = Network::new();
    let a = network.add_node(0.0, 0.0, true).unwrap();
    let b = network.add_node(L, 0.0, false).unwrap();
    network.add_channel(a, b, W, H, Some(L)).unwrap();
    network.add_membrane(a, b, W, 1e-5, L, 1e-7, 0.5).unwrap();
    // No tank: the triangle is incomplete.
    assert!(network.validate().is_err());
}
