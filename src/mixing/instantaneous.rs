//! mixing/instantaneous.rs - Instantaneous Mixing Model
//!
//! Treats every slug as perfectly mixed over the channel cross-section.
//! Slugs advect with the mean channel velocity; at every node the arriving
//! mixtures combine into a flow-weighted average that feeds the downstream
//! channels, split by their flow shares.

use crate::error::NetworkResult;
use crate::mixing::{MixingModel, MixtureSegment, MixtureStore};
use crate::network::{EdgeKind, Network};
use std::collections::HashMap;

/// Spans shorter than this fraction of a channel are dropped
const MIN_SPAN: f64 = 1e-12;

/// The instantaneous (perfectly cross-mixed) transport model
#[derive(Debug, Clone, Default)]
pub struct InstantaneousMixingModel {
    /// Slugs per channel in node-A coordinates, sorted by position
    segments: HashMap<usize, Vec<MixtureSegment>>,
    /// Mixture feeding the upstream end of a channel: (mixture, permanent)
    overrides: HashMap<usize, (usize, bool)>,
}

impl InstantaneousMixingModel {
    /// Create an empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a node-A position to flow coordinates
    fn to_flow(position: f64, forward: bool) -> f64 {
        if forward {
            position
        } else {
            1.0 - position
        }
    }

    /// Convert a flow coordinate back to node-A coordinates
    fn from_flow(u: f64, forward: bool) -> f64 {
        if forward {
            u
        } else {
            1.0 - u
        }
    }
}

impl MixingModel for InstantaneousMixingModel {
    fn inject(&mut self, channel_id: usize, mixture_id: usize, permanent: bool) {
        self.overrides.insert(channel_id, (mixture_id, permanent));
    }

    fn place_segment(
        &mut self,
        channel_id: usize,
        mixture_id: usize,
        position_1: f64,
        position_2: f64,
    ) {
        let entry = self.segments.entry(channel_id).or_default();
        entry.push(MixtureSegment {
            mixture_id,
            position_1: position_1.min(position_2),
            position_2: position_1.max(position_2),
        });
        entry.sort_by(|a, b| a.position_1.total_cmp(&b.position_1));
    }

    fn replace_segment_mixture(&mut self, channel_id: usize, index: usize, mixture_id: usize) {
        if let Some(segments) = self.segments.get_mut(&channel_id) {
            if let Some(segment) = segments.get_mut(index) {
                segment.mixture_id = mixture_id;
            }
        }
    }

    fn update(&mut self, network: &Network, store: &mut MixtureStore, dt: f64) -> NetworkResult<()> {
        // Advection distance and orientation per channel.
        let mut motion: HashMap<usize, (f64, bool)> = HashMap::new();
        for edge in network.edges() {
            if let Some(channel) = edge.as_channel() {
                let q = edge.raw_flow_rate();
                let distance = (q.abs() / channel.area()) * dt / channel.length;
                motion.insert(edge.id, (distance.min(1.0), q >= 0.0));
            }
        }

        // Advect in flow coordinates without clipping, so the matter that
        // crossed the outlet during this step stays visible.
        let mut advected: HashMap<usize, Vec<(usize, f64, f64)>> = HashMap::new();
        for (&channel_id, &(distance, forward)) in &motion {
            let mut slugs: Vec<(usize, f64, f64)> = self
                .segments
                .get(&channel_id)
                .map(|segments| {
                    segments
                        .iter()
                        .map(|s| {
                            let u1 = Self::to_flow(s.position_2, forward).min(Self::to_flow(s.position_1, forward));
                            let u2 = Self::to_flow(s.position_2, forward).max(Self::to_flow(s.position_1, forward));
                            (s.mixture_id, u1 + distance, u2 + distance)
                        })
                        .collect()
                })
                .unwrap_or_default();
            slugs.sort_by(|a, b| a.1.total_cmp(&b.1));
            advected.insert(channel_id, slugs);
        }

        // The mixture leaving each channel: whatever occupies the span that
        // crossed the outlet face during this step.
        let mut outlet_mixture: HashMap<usize, Option<usize>> = HashMap::new();
        for (&channel_id, slugs) in &advected {
            let (distance, _) = motion[&channel_id];
            let sample = 1.0 + distance / 2.0;
            let hit = slugs
                .iter()
                .find(|(_, u1, u2)| *u1 <= sample && sample < *u2)
                .map(|(m, _, _)| *m);
            outlet_mixture.insert(channel_id, hit);
        }

        // Flow-weighted combination of the arrivals at every node.
        let mut inflows: HashMap<usize, Vec<(Option<usize>, f64)>> = HashMap::new();
        for edge in network.edges() {
            let q = edge.raw_flow_rate();
            if q == 0.0 {
                continue;
            }
            let downstream = if q > 0.0 { edge.node_b } else { edge.node_a };
            match edge.kind {
                EdgeKind::Channel(_) => {
                    let mixture = outlet_mixture.get(&edge.id).copied().flatten();
                    inflows.entry(downstream).or_default().push((mixture, q.abs()));
                }
                EdgeKind::PressurePump { .. } | EdgeKind::FlowRatePump { .. } => {
                    // Pumps deliver plain carrier fluid.
                    inflows.entry(downstream).or_default().push((None, q.abs()));
                }
                _ => {}
            }
        }
        let mut node_mixture: HashMap<usize, Option<usize>> = HashMap::new();
        for (&node, arrivals) in &inflows {
            let mixture = if arrivals.iter().all(|(m, _)| m.is_none()) {
                None
            } else {
                let weighted: Vec<(usize, f64)> = arrivals
                    .iter()
                    .map(|(m, q)| match m {
                        Some(id) => (*id, *q),
                        None => (CARRIER_SENTINEL, *q),
                    })
                    .collect();
                Some(combine_with_carrier(store, &weighted)?)
            };
            node_mixture.insert(node, mixture);
        }

        // Fill the inlet gap of every channel and clip to the channel.
        for (&channel_id, slugs) in &mut advected {
            let (distance, forward) = motion[&channel_id];
            let edge = network.edge(channel_id)?;
            let upstream = if forward { edge.node_a } else { edge.node_b };

            let fill = match self.overrides.get(&channel_id) {
                Some(&(mixture, _)) => Some(mixture),
                None => node_mixture.get(&upstream).copied().flatten(),
            };
            // A one-shot override yields once upstream matter arrives.
            if let Some(&(_, permanent)) = self.overrides.get(&channel_id) {
                if !permanent {
                    if let Some(Some(_)) = node_mixture.get(&upstream) {
                        self.overrides.remove(&channel_id);
                    }
                }
            }

            if distance > 0.0 {
                if let Some(mixture) = fill {
                    let extended = slugs
                        .first_mut()
                        .filter(|(m, u1, _)| *m == mixture && (*u1 - distance).abs() < MIN_SPAN)
                        .map(|slug| {
                            slug.1 = 0.0;
                        })
                        .is_some();
                    if !extended {
                        slugs.insert(0, (mixture, 0.0, distance));
                    }
                }
            }

            let mut segments: Vec<MixtureSegment> = slugs
                .iter()
                .filter_map(|&(mixture, u1, u2)| {
                    let u1 = u1.clamp(0.0, 1.0);
                    let u2 = u2.clamp(0.0, 1.0);
                    if u2 - u1 < MIN_SPAN {
                        return None;
                    }
                    let a = Self::from_flow(u1, forward);
                    let b = Self::from_flow(u2, forward);
                    Some(MixtureSegment {
                        mixture_id: mixture,
                        position_1: a.min(b),
                        position_2: a.max(b),
                    })
                })
                .collect();
            segments.sort_by(|a, b| a.position_1.total_cmp(&b.position_1));
            self.segments.insert(channel_id, segments);
        }
        Ok(())
    }

    fn segments(&self, channel_id: usize) -> Vec<MixtureSegment> {
        self.segments.get(&channel_id).cloned().unwrap_or_default()
    }

    fn inlet_mixtures(&self) -> HashMap<usize, usize> {
        self.overrides
            .iter()
            .map(|(&channel, &(mixture, _))| (channel, mixture))
            .collect()
    }
}

/// Stands in for pure carrier fluid in weighted combinations
const CARRIER_SENTINEL: usize = usize::MAX;

fn combine_with_carrier(
    store: &mut MixtureStore,
    weighted: &[(usize, f64)],
) -> NetworkResult<usize> {
    let total: f64 = weighted.iter().map(|(_, q)| q).sum();
    let mut concentrations: HashMap<usize, f64> = HashMap::new();
    if total > 0.0 {
        for &(mixture_id, q) in weighted {
            if mixture_id == CARRIER_SENTINEL {
                continue;
            }
            let mixture = store.mixture(mixture_id)?.clone();
            for (&species, &c) in &mixture.concentrations {
                *concentrations.entry(species).or_insert(0.0) += q * c / total;
            }
        }
    }
    Ok(store.add_mixture(concentrations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixing::channel_species_mass;
    use approx::assert_relative_eq;

    /// Two equal inflows at concentrations 1 and 0 merge to 0.5
    #[test]
    fn equal_merge_halves_concentration() {
        let mut network = Network::new();
        let ground = network.add_node(0.0, 0.0, true).unwrap();
        let in_a = network.add_node(0.0, 1e-3, false).unwrap();
        let in_b = network.add_node(0.0, -1e-3, false).unwrap();
        let junction = network.add_node(1e-3, 0.0, false).unwrap();
        let ca = network.add_channel(in_a, junction, 100e-6, 100e-6, Some(1e-3)).unwrap();
        let cb = network.add_channel(in_b, junction, 100e-6, 100e-6, Some(1e-3)).unwrap();
        let out = network.add_channel(junction, ground, 100e-6, 100e-6, Some(1e-3)).unwrap();
        // Impose a hand-made flow field: both inlets feed the outlet.
        network.store_flow_rate(ca, 1e-9);
        network.store_flow_rate(cb, 1e-9);
        network.store_flow_rate(out, 2e-9);

        let mut store = MixtureStore::new();
        let species = store.add_species(1e-9, 1.0);
        let hot = store.add_mixture(HashMap::from([(species, 1.0)]));
        let cold = store.add_mixture(HashMap::from([(species, 0.0)]));

        let mut model = InstantaneousMixingModel::new();
        model.place_segment(ca, hot, 0.0, 1.0);
        model.place_segment(cb, cold, 0.0, 1.0);
        model.inject(ca, hot, true);
        model.inject(cb, cold, true);

        // One second at 0.1 mm/s mean velocity moves a tenth of a channel.
        model.update(&network, &mut store, 0.5).unwrap();

        let merged = model.segments(out);
        assert_eq!(merged.len(), 1, "one merged slug should enter the outlet");
        let mixture = store.mixture(merged[0].mixture_id).unwrap();
        assert_relative_eq!(mixture.concentration(species), 0.5, epsilon = 1e-7);
    }

    /// A slug travelling through a straight channel keeps its mass
    #[test]
    fn slug_mass_is_conserved_in_transit() {
        let mut network = Network::new();
        let ground = network.add_node(0.0, 0.0, true).unwrap();
        let a = network.add_node(1e-3, 0.0, false).unwrap();
        let b = network.add_node(2e-3, 0.0, false).unwrap();
        let c1 = network.add_channel(ground, a, 100e-6, 100e-6, Some(1e-3)).unwrap();
        let c2 = network.add_channel(a, b, 100e-6, 100e-6, Some(1e-3)).unwrap();
        network.store_flow_rate(c1, 1e-9);
        network.store_flow_rate(c2, 1e-9);

        let mut store = MixtureStore::new();
        let species = store.add_species(1e-9, 1.0);
        let dye = store.add_mixture(HashMap::from([(species, 2.0)]));

        let mut model = InstantaneousMixingModel::new();
        model.place_segment(c1, dye, 0.2, 0.4);
        let before = channel_species_mass(&network, &model, &store, species);

        // v = 0.1 m/s, dt chosen so the slug crosses the junction.
        for _ in 0..8 {
            model.update(&network, &mut store, 1e-3).unwrap();
        }
        let after = channel_species_mass(&network, &model, &store, species);
        assert_relative_eq!(before, after, max_relative = 1e-9);
    }

    /// Reversed flow moves slugs towards node A
    #[test]
    fn reversed_channel_flips_direction() {
        let mut network = Network::new();
        let a = network.add_node(0.0, 0.0, true).unwrap();
        let b = network.add_node(1e-3, 0.0, false).unwrap();
        let c = network.add_channel(a, b, 100e-6, 100e-6, Some(1e-3)).unwrap();
        network.store_flow_rate(c, -1e-9);

        let mut store = MixtureStore::new();
        let species = store.add_species(1e-9, 1.0);
        let dye = store.add_mixture(HashMap::from([(species, 1.0)]));

        let mut model = InstantaneousMixingModel::new();
        model.place_segment(c, dye, 0.4, 0.6);
        model.update(&network, &mut store, 1e-3).unwrap();

        let slugs = model.segments(c);
        assert_eq!(slugs.len(), 1);
        assert!(slugs[0].position_1 < 0.4, "slug should move towards node A");
    }
}
