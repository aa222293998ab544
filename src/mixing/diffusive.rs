//! mixing/diffusive.rs - Diffusive Mixing Model
//!
//! Resolves the cross-channel concentration profile of every species as a
//! truncated Fourier cosine series. Slugs advect like in the instantaneous
//! model; along a channel the cosine modes decay analytically with the
//! channel Peclet number, at merging nodes the upstream profiles are
//! assembled section-wise in flow-share order and re-projected onto the
//! cosine basis, and at splitting nodes each downstream channel receives the
//! re-projected restriction of the merged profile to its flow-share
//! interval.

use crate::error::NetworkResult;
use crate::mixing::{MixingModel, MixtureSegment, MixtureStore, Profile};
use crate::network::{EdgeKind, Network};
use std::collections::HashMap;

/// Spans shorter than this fraction of a channel are dropped
const MIN_SPAN: f64 = 1e-12;

/// Simpson sub-intervals per smooth section during re-projection
const QUADRATURE_INTERVALS: usize = 128;

/// The diffusive (cross-profile resolving) transport model
#[derive(Debug, Clone)]
pub struct DiffusiveMixingModel {
    /// Number of cosine modes kept in every profile
    modes: usize,
    segments: HashMap<usize, Vec<MixtureSegment>>,
    overrides: HashMap<usize, (usize, bool)>,
}

impl DiffusiveMixingModel {
    /// Create a model resolving the given number of cosine modes
    pub fn new(modes: usize) -> Self {
        Self {
            modes,
            segments: HashMap::new(),
            overrides: HashMap::new(),
        }
    }

    /// Number of cosine modes kept in every profile
    pub fn modes(&self) -> usize {
        self.modes
    }

    fn to_flow(position: f64, forward: bool) -> f64 {
        if forward {
            position
        } else {
            1.0 - position
        }
    }

    fn from_flow(u: f64, forward: bool) -> f64 {
        if forward {
            u
        } else {
            1.0 - u
        }
    }

    /// The decayed version of a mixture after traversing a channel
    fn decay_through_channel(
        &self,
        store: &mut MixtureStore,
        mixture_id: usize,
        flow: f64,
        height: f64,
    ) -> NetworkResult<usize> {
        let mixture = store.mixture(mixture_id)?.clone();
        if mixture.profiles.is_empty() {
            return Ok(mixture_id);
        }
        let mut profiles = HashMap::new();
        for (&species_id, profile) in &mixture.profiles {
            let diffusivity = store.species(species_id)?.diffusivity;
            let peclet = if diffusivity > 0.0 && height > 0.0 {
                flow.abs() / (height * diffusivity)
            } else {
                0.0
            };
            profiles.insert(species_id, profile.decayed(1.0, peclet));
        }
        let concentrations = profiles
            .iter()
            .map(|(&s, p)| (s, p.a0))
            .collect();
        Ok(store.add_mixture_with_profiles(concentrations, profiles))
    }
}

impl MixingModel for DiffusiveMixingModel {
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
        let mut motion: HashMap<usize, (f64, bool)> = HashMap::new();
        for edge in network.edges() {
            if let Some(channel) = edge.as_channel() {
                let q = edge.raw_flow_rate();
                let distance = (q.abs() / channel.area()) * dt / channel.length;
                motion.insert(edge.id, (distance.min(1.0), q >= 0.0));
            }
        }

        let mut advected: HashMap<usize, Vec<(usize, f64, f64)>> = HashMap::new();
        for (&channel_id, &(distance, forward)) in &motion {
            let mut slugs: Vec<(usize, f64, f64)> = self
                .segments
                .get(&channel_id)
                .map(|segments| {
                    segments
                        .iter()
                        .map(|s| {
                            let a = Self::to_flow(s.position_1, forward);
                            let b = Self::to_flow(s.position_2, forward);
                            (s.mixture_id, a.min(b) + distance, a.max(b) + distance)
                        })
                        .collect()
                })
                .unwrap_or_default();
            slugs.sort_by(|a, b| a.1.total_cmp(&b.1));
            advected.insert(channel_id, slugs);
        }

        // Profiles arriving at the nodes, decayed over their channel.
        let mut outlet_mixture: HashMap<usize, Option<usize>> = HashMap::new();
        for (&channel_id, slugs) in &advected {
            let (distance, _) = motion[&channel_id];
            let sample = 1.0 + distance / 2.0;
            let hit = slugs
                .iter()
                .find(|(_, u1, u2)| *u1 <= sample && sample < *u2)
                .map(|(m, _, _)| *m);
            let decayed = match hit {
                Some(mixture_id) => {
                    let edge = network.edge(channel_id)?;
                    let channel = edge.as_channel().expect("motion only tracks channels");
                    Some(self.decay_through_channel(
                        store,
                        mixture_id,
                        edge.raw_flow_rate(),
                        channel.height(),
                    )?)
                }
                None => None,
            };
            outlet_mixture.insert(channel_id, decayed);
        }

        // Assemble the merged profile per node, in flow-share order of the
        // arriving channels (ascending edge id).
        let mut inflows: HashMap<usize, Vec<(Option<usize>, f64)>> = HashMap::new();
        let mut outflow_channels: HashMap<usize, Vec<usize>> = HashMap::new();
        for edge in network.edges() {
            let q = edge.raw_flow_rate();
            if q == 0.0 {
                continue;
            }
            let downstream = if q > 0.0 { edge.node_b } else { edge.node_a };
            let upstream = if q > 0.0 { edge.node_a } else { edge.node_b };
            match edge.kind {
                EdgeKind::Channel(_) => {
                    let mixture = outlet_mixture.get(&edge.id).copied().flatten();
                    inflows.entry(downstream).or_default().push((mixture, q.abs()));
                    outflow_channels.entry(upstream).or_default().push(edge.id);
                }
                EdgeKind::PressurePump { .. } | EdgeKind::FlowRatePump { .. } => {
                    inflows.entry(downstream).or_default().push((None, q.abs()));
                }
                _ => {}
            }
        }

        let mut node_merged: HashMap<usize, Option<usize>> = HashMap::new();
        for (&node, arrivals) in &inflows {
            if arrivals.iter().all(|(m, _)| m.is_none()) {
                node_merged.insert(node, None);
                continue;
            }
            let merged = merge_profiles(store, arrivals, self.modes)?;
            node_merged.insert(node, Some(merged));
        }

        // Split the merged profile over the outgoing channels by flow share.
        let mut inlet_fill: HashMap<usize, usize> = HashMap::new();
        for (&node, channels) in &outflow_channels {
            let Some(&Some(merged)) = node_merged.get(&node) else {
                continue;
            };
            let mut ordered = channels.clone();
            ordered.sort_unstable();
            let total: f64 = ordered
                .iter()
                .map(|&c| network.edge(c).map(|e| e.raw_flow_rate().abs()).unwrap_or(0.0))
                .sum();
            if total <= 0.0 {
                continue;
            }
            if ordered.len() == 1 {
                inlet_fill.insert(ordered[0], merged);
                continue;
            }
            let mut offset = 0.0;
            for &channel_id in &ordered {
                let share = network.edge(channel_id)?.raw_flow_rate().abs() / total;
                let restricted = restrict_profile(store, merged, offset, share, self.modes)?;
                inlet_fill.insert(channel_id, restricted);
                offset += share;
            }
        }

        // Fill inlets and clip, as in the instantaneous model.
        for (&channel_id, slugs) in &mut advected {
            let (distance, forward) = motion[&channel_id];
            let fill = match self.overrides.get(&channel_id) {
                Some(&(mixture, _)) => Some(mixture),
                None => inlet_fill.get(&channel_id).copied(),
            };
            if let Some(&(_, permanent)) = self.overrides.get(&channel_id) {
                if !permanent && inlet_fill.contains_key(&channel_id) {
                    self.overrides.remove(&channel_id);
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

/// Composite Simpson integral of `f` over `[a, b]`
fn simpson(a: f64, b: f64, f: impl Fn(f64) -> f64) -> f64 {
    let n = QUADRATURE_INTERVALS;
    let h = (b - a) / n as f64;
    let mut sum = f(a) + f(b);
    for i in 1..n {
        let x = a + i as f64 * h;
        sum += if i % 2 == 0 { 2.0 * f(x) } else { 4.0 * f(x) };
    }
    sum * h / 3.0
}

/// Project a function on [0, 1] onto the cosine basis, integrating each
/// smooth section separately so discontinuities at section boundaries do not
/// degrade the quadrature
fn project(sections: &[(f64, f64)], f: &dyn Fn(f64) -> f64, modes: usize) -> Profile {
    let a0 = sections
        .iter()
        .map(|&(a, b)| simpson(a, b, f))
        .sum::<f64>();
    let coefficients = (1..=modes)
        .map(|n| {
            let k = n as f64 * std::f64::consts::PI;
            2.0 * sections
                .iter()
                .map(|&(a, b)| simpson(a, b, |xi| f(xi) * (k * xi).cos()))
                .sum::<f64>()
        })
        .collect();
    Profile { a0, coefficients }
}

/// Merge the arriving mixtures of a node into one re-projected profile per
/// species. Each arrival contributes a stretched copy of its profile over
/// its flow share of the outlet width.
fn merge_profiles(
    store: &mut MixtureStore,
    arrivals: &[(Option<usize>, f64)],
    modes: usize,
) -> NetworkResult<usize> {
    let total: f64 = arrivals.iter().map(|(_, q)| q).sum();
    let mut species_ids: Vec<usize> = Vec::new();
    let mut resolved: Vec<(Option<crate::mixing::Mixture>, f64)> = Vec::new();
    for (mixture, q) in arrivals {
        let mixture = match mixture {
            Some(id) => {
                let m = store.mixture(*id)?.clone();
                for &s in m.profiles.keys().chain(m.concentrations.keys()) {
                    if !species_ids.contains(&s) {
                        species_ids.push(s);
                    }
                }
                Some(m)
            }
            None => None,
        };
        resolved.push((mixture, *q));
    }
    species_ids.sort_unstable();

    let mut boundaries = vec![0.0];
    for (_, q) in &resolved {
        let last = *boundaries.last().expect("seeded with 0.0");
        boundaries.push(last + q / total);
    }

    let mut profiles = HashMap::new();
    let mut concentrations = HashMap::new();
    for &species in &species_ids {
        let sections: Vec<(f64, f64)> = boundaries.windows(2).map(|w| (w[0], w[1])).collect();
        let resolved_ref = &resolved;
        let boundaries_ref = &boundaries;
        let merged = move |xi: f64| -> f64 {
            // Locate the section and evaluate its stretched profile.
            for (i, (mixture, _)) in resolved_ref.iter().enumerate() {
                let (a, b) = (boundaries_ref[i], boundaries_ref[i + 1]);
                if xi >= a && (xi < b || i == resolved_ref.len() - 1) {
                    return match mixture {
                        Some(m) => match m.profiles.get(&species) {
                            Some(profile) => profile.evaluate((xi - a) / (b - a).max(f64::MIN_POSITIVE)),
                            None => m.concentration(species),
                        },
                        None => 0.0,
                    };
                }
            }
            0.0
        };
        let profile = project(&sections, &merged, modes);
        concentrations.insert(species, profile.a0);
        profiles.insert(species, profile);
    }
    Ok(store.add_mixture_with_profiles(concentrations, profiles))
}

/// Restrict a profile to the interval `[offset, offset + share]` and
/// re-project it onto the cosine basis. The restriction is not
/// re-normalized.
fn restrict_profile(
    store: &mut MixtureStore,
    mixture_id: usize,
    offset: f64,
    share: f64,
    modes: usize,
) -> NetworkResult<usize> {
    let mixture = store.mixture(mixture_id)?.clone();
    let mut profiles = HashMap::new();
    let mut concentrations = HashMap::new();
    for (&species, profile) in &mixture.profiles {
        let restricted = |xi: f64| profile.evaluate(offset + share * xi);
        let projected = project(&[(0.0, 1.0)], &restricted, modes);
        concentrations.insert(species, projected.a0);
        profiles.insert(species, projected);
    }
    for (&species, &c) in &mixture.concentrations {
        concentrations.entry(species).or_insert(c);
    }
    Ok(store.add_mixture_with_profiles(concentrations, profiles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Merging flat 0 and 1 at equal shares gives the analytic step-profile
    /// coefficients
    #[test]
    fn t_junction_projection_matches_reference() {
        let mut store = MixtureStore::new();
        let s = store.add_species(1e-9, 1.0);
        let zero = store.add_mixture_with_profiles(
            HashMap::from([(s, 0.0)]),
            HashMap::from([(s, Profile::flat(0.0, 5))]),
        );
        let one = store.add_mixture_with_profiles(
            HashMap::from([(s, 1.0)]),
            HashMap::from([(s, Profile::flat(1.0, 5))]),
        );
        let merged = merge_profiles(&mut store, &[(Some(zero), 1e-9), (Some(one), 1e-9)], 5).unwrap();
        let profile = &store.mixture(merged).unwrap().profiles[&s];

        assert_relative_eq!(profile.a0, 0.5, epsilon = 1e-9);
        // a_n = -2 sin(n pi / 2) / (n pi) for a step from 0 to 1 at 1/2.
        let pi = std::f64::consts::PI;
        assert_relative_eq!(profile.coefficients[0], -2.0 / pi, epsilon = 1e-9);
        assert_relative_eq!(profile.coefficients[1], 0.0, epsilon = 1e-9);
        assert_relative_eq!(profile.coefficients[2], 2.0 / (3.0 * pi), epsilon = 1e-9);
    }

    /// The width-integrated concentration equals a0 exactly: cosine modes
    /// carry no net mass
    #[test]
    fn cosine_modes_carry_no_mass() {
        let profile = Profile {
            a0: 0.7,
            coefficients: vec![0.4, -0.2, 0.1],
        };
        let integral = simpson(0.0, 1.0, |xi| profile.evaluate(xi));
        assert_relative_eq!(integral, 0.7, epsilon = 1e-12);
    }

    /// Splitting a symmetric profile in half preserves total mass across the
    /// two restrictions
    #[test]
    fn split_preserves_mass_for_equal_shares() {
        let mut store = MixtureStore::new();
        let s = store.add_species(1e-9, 1.0);
        let pi = std::f64::consts::PI;
        let parent = store.add_mixture_with_profiles(
            HashMap::from([(s, 0.5)]),
            HashMap::from([(
                s,
                Profile {
                    a0: 0.5,
                    coefficients: vec![-2.0 / pi, 0.0, 2.0 / (3.0 * pi)],
                },
            )]),
        );
        let left = restrict_profile(&mut store, parent, 0.0, 0.5, 3).unwrap();
        let right = restrict_profile(&mut store, parent, 0.5, 0.5, 3).unwrap();
        let a0_left = store.mixture(left).unwrap().profiles[&s].a0;
        let a0_right = store.mixture(right).unwrap().profiles[&s].a0;
        // Halves weighted by their equal shares must reproduce the parent
        // mean.
        assert_relative_eq!(0.5 * (a0_left + a0_right), 0.5, epsilon = 1e-6);
    }
}
