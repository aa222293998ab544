//! simulation/state.rs - Simulation States and Results
//!
//! A state is one snapshot of the simulation: pressures, flow rates,
//! droplet positions, mixture positions and the VTK files written by the
//! CFD modules at that instant. The result collects the states in
//! chronological order.

use crate::droplet::{Droplet, DropletState};
use crate::mixing::MixtureSegment;
use crate::network::Network;
use std::collections::HashMap;
use std::path::PathBuf;

/// Snapshot of a droplet's position inside the network
#[derive(Debug, Clone)]
pub struct DropletPosition {
    /// Boundaries as `(channel id, position, volume towards node A)`
    pub boundaries: Vec<(usize, f64, bool)>,
    /// Channels fully occupied by the droplet
    pub channels: Vec<usize>,
}

impl DropletPosition {
    /// Capture the position of a droplet
    pub fn of(droplet: &Droplet) -> Self {
        Self {
            boundaries: droplet
                .boundaries
                .iter()
                .map(|b| (b.channel_id, b.position, b.volume_towards_a))
                .collect(),
            channels: droplet.occupied_channels.clone(),
        }
    }
}

/// One snapshot of the simulation
#[derive(Debug, Clone)]
pub struct State {
    /// Sequential id of the state, starting at 0
    pub id: usize,
    /// Simulation time of the snapshot in s
    pub time: f64,
    /// Pressure per node id in Pa
    pub pressures: HashMap<usize, f64>,
    /// Flow rate per edge id in m^3/s
    pub flow_rates: HashMap<usize, f64>,
    /// Positions of the droplets currently in the network
    pub droplet_positions: HashMap<usize, DropletPosition>,
    /// Mixture slugs per channel id
    pub mixture_positions: HashMap<usize, Vec<MixtureSegment>>,
    /// Mixture feeding the upstream end per channel id
    pub filled_edges: HashMap<usize, usize>,
    /// VTK master files per CFD module id
    pub vtk_files: HashMap<usize, PathBuf>,
}

/// The collected outcome of a simulation run
#[derive(Debug, Clone, Default)]
pub struct SimulationResult {
    /// States in chronological order; ids are contiguous from 0
    pub states: Vec<State>,
    /// Fluid serving as the continuous phase
    pub continuous_phase_id: usize,
    /// Set when the hybrid scheme exhausted its iteration budget
    pub did_not_converge: bool,
}

impl SimulationResult {
    /// Append a state captured from the current solver outputs
    pub fn capture(
        &mut self,
        time: f64,
        network: &Network,
        droplets: &[Droplet],
        mixture_positions: HashMap<usize, Vec<MixtureSegment>>,
        filled_edges: HashMap<usize, usize>,
        vtk_files: HashMap<usize, PathBuf>,
    ) {
        let pressures = network.nodes().iter().map(|n| (n.id, n.pressure)).collect();
        let flow_rates = network
            .edges()
            .iter()
            .filter_map(|e| e.flow_rate().ok().map(|q| (e.id, q)))
            .collect();
        let droplet_positions = droplets
            .iter()
            .filter(|d| d.state == DropletState::Network)
            .map(|d| (d.id, DropletPosition::of(d)))
            .collect();
        let id = self.states.len();
        self.states.push(State {
            id,
            time,
            pressures,
            flow_rates,
            droplet_positions,
            mixture_positions,
            filled_edges,
            vtk_files,
        });
    }

    /// The final state, if any was written
    pub fn last_state(&self) -> Option<&State> {
        self.states.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_ids_are_contiguous() {
        let mut network = Network::new();
        let a = network.add_node(0.0, 0.0, true).unwrap();
        let b = network.add_node(1e-3, 0.0, false).unwrap();
        network.add_channel(a, b, 100e-6, 30e-6, None).unwrap();

        let mut result = SimulationResult::default();
        for i in 0..3 {
            result.capture(
                i as f64,
                &network,
                &[],
                HashMap::new(),
                HashMap::new(),
                HashMap::new(),
            );
        }
        for (i, state) in result.states.iter().enumerate() {
            assert_eq!(state.id, i);
        }
        assert!(result
            .states
            .windows(2)
            .all(|w| w[0].time <= w[1].time));
    }
}
