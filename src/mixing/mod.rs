//! mixing - Species and Mixture Transport
//!
//! Propagates species concentrations along channels using the solved flow
//! field. Two interchangeable models share one contract: advance mixture
//! positions over a time step and produce new mixtures at nodes where
//! several inflows meet. The instantaneous model treats every slug as
//! perfectly mixed over the cross-section; the diffusive model resolves the
//! cross-channel profile as a truncated Fourier cosine series.

pub mod diffusive;
pub mod instantaneous;

pub use diffusive::DiffusiveMixingModel;
pub use instantaneous::InstantaneousMixingModel;

use crate::error::{NetworkError, NetworkResult};
use crate::network::Network;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// A dissolved species
#[derive(Debug, Clone)]
pub struct Species {
    /// Unique identifier of the species
    pub id: usize,
    /// Diffusion coefficient in m^2/s
    pub diffusivity: f64,
    /// Saturation concentration in g/m^3
    pub saturation_concentration: f64,
}

/// Cross-channel concentration profile as a truncated Fourier cosine series
/// `c(xi) = a0 + sum a_n cos(n pi xi)` over the normalized coordinate
/// `xi` in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    /// Constant term; equals the width-averaged concentration
    pub a0: f64,
    /// Cosine coefficients `a_1 .. a_M`
    pub coefficients: Vec<f64>,
}

impl Profile {
    /// A flat profile at the given concentration
    pub fn flat(concentration: f64, modes: usize) -> Self {
        Self {
            a0: concentration,
            coefficients: vec![0.0; modes],
        }
    }

    /// Evaluate the profile at `xi` in [0, 1]
    pub fn evaluate(&self, xi: f64) -> f64 {
        let mut value = self.a0;
        for (n, a) in self.coefficients.iter().enumerate() {
            value += a * ((n + 1) as f64 * std::f64::consts::PI * xi).cos();
        }
        value
    }

    /// Axial decay over the travelled fraction `x / l` of a channel at the
    /// given Peclet number. Underflowing exponentials clamp to zero.
    pub fn decayed(&self, travelled: f64, peclet: f64) -> Self {
        if peclet <= 0.0 {
            return Self::flat(self.a0, self.coefficients.len());
        }
        let coefficients = self
            .coefficients
            .iter()
            .enumerate()
            .map(|(n, a)| {
                let k = ((n + 1) as f64 * std::f64::consts::PI).powi(2);
                let factor = (-k * travelled / peclet).exp();
                if factor.is_normal() {
                    a * factor
                } else {
                    0.0
                }
            })
            .collect();
        Self {
            a0: self.a0,
            coefficients,
        }
    }
}

/// A mixture: per-species concentrations carried by the continuous phase.
/// Immutable once registered in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Mixture {
    /// Unique identifier of the mixture
    pub id: usize,
    /// Concentration per species id in g/m^3
    pub concentrations: HashMap<usize, f64>,
    /// Cross-section profiles per species, populated by the diffusive model
    pub profiles: HashMap<usize, Profile>,
}

impl Mixture {
    /// Concentration of a species, zero if absent
    pub fn concentration(&self, species_id: usize) -> f64 {
        self.concentrations.get(&species_id).copied().unwrap_or(0.0)
    }
}

/// Owns species and mixtures. New mixtures are deduplicated by a content
/// hash so identical compositions share one id.
#[derive(Debug, Clone, Default)]
pub struct MixtureStore {
    species: Vec<Species>,
    mixtures: Vec<Mixture>,
    hashes: HashMap<u64, usize>,
}

impl MixtureStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a species; returns its id
    pub fn add_species(&mut self, diffusivity: f64, saturation_concentration: f64) -> usize {
        let id = self.species.len();
        self.species.push(Species {
            id,
            diffusivity,
            saturation_concentration,
        });
        id
    }

    /// Access a species
    pub fn species(&self, id: usize) -> NetworkResult<&Species> {
        self.species.get(id).ok_or(NetworkError::UnknownId {
            entity: "species",
            id,
        })
    }

    /// All registered species
    pub fn all_species(&self) -> &[Species] {
        &self.species
    }

    /// Register a mixture, reusing an existing identical one
    pub fn add_mixture(&mut self, concentrations: HashMap<usize, f64>) -> usize {
        self.add_mixture_with_profiles(concentrations, HashMap::new())
    }

    /// Register a mixture carrying cross-section profiles
    pub fn add_mixture_with_profiles(
        &mut self,
        concentrations: HashMap<usize, f64>,
        profiles: HashMap<usize, Profile>,
    ) -> usize {
        let hash = content_hash(&concentrations, &profiles);
        if let Some(&id) = self.hashes.get(&hash) {
            if self.mixtures[id].concentrations == concentrations
                && self.mixtures[id].profiles == profiles
            {
                return id;
            }
        }
        let id = self.mixtures.len();
        self.mixtures.push(Mixture {
            id,
            concentrations,
            profiles,
        });
        self.hashes.insert(hash, id);
        id
    }

    /// Access a mixture
    pub fn mixture(&self, id: usize) -> NetworkResult<&Mixture> {
        self.mixtures.get(id).ok_or(NetworkError::UnknownId {
            entity: "mixture",
            id,
        })
    }

    /// All registered mixtures
    pub fn mixtures(&self) -> &[Mixture] {
        &self.mixtures
    }

    /// Flow-weighted combination of mixtures, the junction mixing rule:
    /// `c_k = sum_i Q_i c_ik / sum_i Q_i`
    pub fn combine(&mut self, inflows: &[(usize, f64)]) -> NetworkResult<usize> {
        let total: f64 = inflows.iter().map(|(_, q)| q.abs()).sum();
        let mut concentrations: HashMap<usize, f64> = HashMap::new();
        if total > 0.0 {
            for &(mixture_id, q) in inflows {
                let mixture = self.mixture(mixture_id)?.clone();
                for (&species, &c) in &mixture.concentrations {
                    *concentrations.entry(species).or_insert(0.0) += q.abs() * c / total;
                }
            }
        }
        Ok(self.add_mixture(concentrations))
    }
}

fn content_hash(concentrations: &HashMap<usize, f64>, profiles: &HashMap<usize, Profile>) -> u64 {
    let mut hasher = DefaultHasher::new();
    let mut keys: Vec<_> = concentrations.keys().copied().collect();
    keys.sort_unstable();
    for key in keys {
        key.hash(&mut hasher);
        concentrations[&key].to_bits().hash(&mut hasher);
    }
    let mut keys: Vec<_> = profiles.keys().copied().collect();
    keys.sort_unstable();
    for key in keys {
        key.hash(&mut hasher);
        let profile = &profiles[&key];
        profile.a0.to_bits().hash(&mut hasher);
        for a in &profile.coefficients {
            a.to_bits().hash(&mut hasher);
        }
    }
    hasher.finish()
}

/// One slug of a mixture inside a channel. Positions are fractions of the
/// channel length measured from node A, with `position_1 <= position_2`.
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureSegment {
    /// The mixture occupying the slug
    pub mixture_id: usize,
    /// Upstream end of the slug
    pub position_1: f64,
    /// Downstream end of the slug
    pub position_2: f64,
}

impl MixtureSegment {
    /// Length fraction covered by the slug
    pub fn span(&self) -> f64 {
        self.position_2 - self.position_1
    }
}

/// Shared contract of the mixing models
pub trait MixingModel {
    /// Start feeding a mixture into a channel at its upstream end.
    /// Permanent injections persist; one-shot injections last until they are
    /// replaced by another injection or by mixtures arriving from upstream.
    fn inject(&mut self, channel_id: usize, mixture_id: usize, permanent: bool);

    /// Place a slug directly, e.g. as an initial condition
    fn place_segment(&mut self, channel_id: usize, mixture_id: usize, position_1: f64, position_2: f64);

    /// Swap the mixture of the slug at `index` in a channel, e.g. after a
    /// membrane exchanged mass with it
    fn replace_segment_mixture(&mut self, channel_id: usize, index: usize, mixture_id: usize);

    /// Advance all mixture positions by the given time step
    fn update(&mut self, network: &Network, store: &mut MixtureStore, dt: f64) -> NetworkResult<()>;

    /// Current slugs per channel, sorted by position
    fn segments(&self, channel_id: usize) -> Vec<MixtureSegment>;

    /// Channels with the mixture currently feeding their upstream end
    fn inlet_mixtures(&self) -> HashMap<usize, usize>;
}

/// Total mass of a species over all channel slugs, in g
pub fn channel_species_mass(
    network: &Network,
    model: &dyn MixingModel,
    store: &MixtureStore,
    species_id: usize,
) -> f64 {
    let mut mass = 0.0;
    for edge in network.edges() {
        if let Some(channel) = edge.as_channel() {
            for segment in model.segments(edge.id) {
                if let Ok(mixture) = store.mixture(segment.mixture_id) {
                    mass += mixture.concentration(species_id) * channel.volume() * segment.span();
                }
            }
        }
    }
    mass
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identical_mixtures_are_deduplicated() {
        let mut store = MixtureStore::new();
        let s = store.add_species(1e-9, 1.0);
        let a = store.add_mixture(HashMap::from([(s, 1.0)]));
        let b = store.add_mixture(HashMap::from([(s, 1.0)]));
        let c = store.add_mixture(HashMap::from([(s, 2.0)]));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn combine_weights_by_flow() {
        let mut store = MixtureStore::new();
        let s = store.add_species(1e-9, 1.0);
        let hot = store.add_mixture(HashMap::from([(s, 1.0)]));
        let cold = store.add_mixture(HashMap::from([(s, 0.0)]));
        let merged = store.combine(&[(hot, 1e-9), (cold, 3e-9)]).unwrap();
        assert_relative_eq!(
            store.mixture(merged).unwrap().concentration(s),
            0.25,
            max_relative = 1e-12
        );
    }

    #[test]
    fn profile_decay_leaves_mean_unchanged() {
        let profile = Profile {
            a0: 0.5,
            coefficients: vec![0.3, -0.1],
        };
        let decayed = profile.decayed(1.0, 30.0);
        assert_eq!(decayed.a0, 0.5);
        assert!(decayed.coefficients[0].abs() < 0.3);
        assert!(decayed.coefficients[1].abs() < 0.1);
    }

    #[test]
    fn profile_evaluation_at_walls() {
        let profile = Profile {
            a0: 1.0,
            coefficients: vec![0.5],
        };
        assert_relative_eq!(profile.evaluate(0.0), 1.5, max_relative = 1e-12);
        assert_relative_eq!(profile.evaluate(1.0), 0.5, max_relative = 1e-12);
    }
}
