//! membrane.rs - Membrane and Tank Mass Transfer
//!
//! Transports species mass between a channel and its adjacent tank across a
//! porous membrane. Per species and time step the concentration change
//! follows `dc/dt = -P c` with permeability `P = 1/R_m`, integrated with a
//! fourth-order Runge-Kutta step. The membrane resistance derives from pore
//! geometry, scaled to the area of the slug currently in contact.

use crate::error::{NetworkResult, NetworkError};
use crate::mixing::{MixingModel, MixtureStore};
use crate::network::{EdgeKind, Membrane, Network};
use std::collections::HashMap;

/// Concentration change over one time step by an adapted Runge-Kutta 4
/// integration of `dc/dt = -P c` evaluated at the current concentration
/// difference
pub fn concentration_change(resistance: f64, time_step: f64, concentration_difference: f64) -> f64 {
    let permeability = 1.0 / resistance;
    let f = |c: f64| permeability * c;
    let k1 = time_step * f(concentration_difference);
    let k2 = time_step * f(concentration_difference + k1 / 2.0);
    let k3 = time_step * f(concentration_difference + k2 / 2.0);
    let k4 = time_step * f(concentration_difference + k3);
    (k1 + 2.0 * k2 + 2.0 * k3 + k4) / 6.0
}

/// Membrane resistance over the given contact area:
/// `R_m = 3 mu d / (N pi r^4)` with `N` the pore count over the area and
/// `d` the membrane thickness
pub fn membrane_resistance(membrane: &Membrane, viscosity: f64, contact_area: f64) -> f64 {
    let pores = membrane.pore_count(contact_area);
    if pores <= 0.0 {
        return f64::INFINITY;
    }
    3.0 * viscosity * membrane.height / (pores * std::f64::consts::PI * membrane.pore_radius.powi(4))
}

/// Tank contents per tank edge id and species id, in g/m^3
pub type TankContents = HashMap<usize, HashMap<usize, f64>>;

/// Advance every membrane of the network by one time step: mass leaves the
/// channel slugs in contact and accumulates in the tank, or vice versa when
/// the tank is richer.
pub fn transfer(
    network: &Network,
    store: &mut MixtureStore,
    mixing: &mut dyn MixingModel,
    tanks: &mut TankContents,
    viscosity: f64,
    dt: f64,
) -> NetworkResult<()> {
    for membrane_id in network.membrane_ids() {
        let membrane = match &network.edge(membrane_id)?.kind {
            EdgeKind::Membrane(m) => m.clone(),
            _ => continue,
        };
        let (Some(channel_id), Some(tank_id)) = (membrane.channel_id, membrane.tank_id) else {
            return Err(NetworkError::incomplete(format!(
                "membrane {membrane_id} has unresolved channel or tank; validate the network first"
            )));
        };
        let channel = network
            .edge(channel_id)?
            .as_channel()
            .expect("membrane channel partner is a channel")
            .clone();
        let tank_volume = match &network.edge(tank_id)?.kind {
            EdgeKind::Tank(tank) => tank.volume(),
            _ => continue,
        };

        let segments = mixing.segments(channel_id);
        let species_ids: Vec<usize> = store.all_species().iter().map(|s| s.id).collect();
        for (index, segment) in segments.iter().enumerate() {
            let contact_area = membrane.area() * segment.span();
            if contact_area <= 0.0 {
                continue;
            }
            let resistance = membrane_resistance(&membrane, viscosity, contact_area);
            if !resistance.is_finite() {
                continue;
            }
            let slug_volume = channel.volume() * segment.span();
            let mixture = store.mixture(segment.mixture_id)?.clone();
            let mut updated = mixture.concentrations.clone();
            let mut changed = false;
            for &species in &species_ids {
                let c_channel = mixture.concentration(species);
                let c_tank = tanks
                    .get(&tank_id)
                    .and_then(|m| m.get(&species))
                    .copied()
                    .unwrap_or(0.0);
                let difference = c_channel - c_tank;
                if difference == 0.0 {
                    continue;
                }
                let delta = concentration_change(resistance, dt, difference);
                let delta = if difference > 0.0 {
                    delta.min(difference)
                } else {
                    delta.max(difference)
                };
                *updated.entry(species).or_insert(0.0) -= delta;
                let mass = delta * slug_volume;
                let tank_entry = tanks.entry(tank_id).or_default().entry(species).or_insert(0.0);
                *tank_entry += mass / tank_volume;
                changed = true;
            }
            if changed {
                let new_mixture = store.add_mixture(updated);
                mixing.replace_segment_mixture(channel_id, index, new_mixture);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// RK4 of dc/dt = -P c over one step reproduces the series expansion of
    /// the exponential decay
    #[test]
    fn rk4_matches_exponential_decay() {
        let resistance = 2.0;
        let dt = 0.1;
        let c0 = 1.0;
        let change = concentration_change(resistance, dt, c0);
        let exact = c0 * (1.0 - (-dt / resistance).exp());
        assert_relative_eq!(change, exact, max_relative = 1e-6);
    }

    #[test]
    fn resistance_scales_inversely_with_area() {
        let membrane = Membrane {
            width: 1e-3,
            height: 1e-4,
            length: 1e-3,
            pore_radius: 1e-7,
            porosity: 0.5,
            channel_id: None,
            tank_id: None,
        };
        let small = membrane_resistance(&membrane, 1e-3, 1e-8);
        let large = membrane_resistance(&membrane, 1e-3, 2e-8);
        assert_relative_eq!(small, 2.0 * large, max_relative = 1e-12);
    }
}
