//! resistance.rs - Hydraulic Resistance Models
//!
//! Maps channel geometry and fluid viscosity to a hydraulic resistance.
//! Two models are provided: a plain Poiseuille estimate and the rectangular
//! duct correction used for shallow microchannels. Both are injected into
//! the simulation at configuration time through the [`ResistanceModel`]
//! trait, which also covers the extra resistance contributed by droplets.

use crate::error::{NetworkError, NetworkResult};
use crate::network::{Channel, CrossSection};

/// Maps channel geometry and viscosity to hydraulic resistance in Pa s/m^3
pub trait ResistanceModel {
    /// Resistance of an empty channel
    fn channel_resistance(&self, channel: &Channel) -> NetworkResult<f64>;

    /// Additional resistance contributed by a droplet occupying the length
    /// fraction `occupied` of the channel
    fn droplet_resistance(
        &self,
        channel: &Channel,
        occupied: f64,
        droplet_viscosity: f64,
    ) -> NetworkResult<f64> {
        let base = self.channel_resistance(channel)?;
        Ok(base * occupied.clamp(0.0, 1.0) * droplet_viscosity / self.viscosity())
    }

    /// Viscosity of the continuous phase in Pa s
    fn viscosity(&self) -> f64;
}

fn check_dimensions(channel: &Channel) -> NetworkResult<()> {
    if channel.length <= 0.0 || !channel.length.is_finite() {
        return Err(NetworkError::invalid_geometry(format!(
            "channel length {} must be positive and finite",
            channel.length
        )));
    }
    channel.cross_section.validate()
}

/// Plain Poiseuille resistance: `mu * L / A^2` for rectangular channels and
/// `8 * mu * L / (pi * r^4)` for circular ones.
#[derive(Debug, Clone, Copy)]
pub struct PoiseuilleResistance {
    viscosity: f64,
}

impl PoiseuilleResistance {
    /// Create the model for a continuous phase of the given viscosity
    pub fn new(viscosity: f64) -> Self {
        Self { viscosity }
    }
}

impl ResistanceModel for PoiseuilleResistance {
    fn channel_resistance(&self, channel: &Channel) -> NetworkResult<f64> {
        check_dimensions(channel)?;
        let resistance = match channel.cross_section {
            CrossSection::Rectangular { .. } => {
                let area = channel.area();
                self.viscosity * channel.length / (area * area)
            }
            CrossSection::Circular { radius } => {
                8.0 * self.viscosity * channel.length / (std::f64::consts::PI * radius.powi(4))
            }
        };
        Ok(resistance)
    }

    fn viscosity(&self) -> f64 {
        self.viscosity
    }
}

/// Rectangular duct resistance with the Bahrami aspect-ratio correction:
/// `R = a * mu * L / (w * h^3)` with
/// `a = 12 / (1 - 192 h / (pi^5 w) * tanh(pi w / (2 h)))`, where `h <= w`
/// (width and height swap otherwise). Circular channels fall back to the
/// Poiseuille expression.
#[derive(Debug, Clone, Copy)]
pub struct RectangularResistance {
    viscosity: f64,
}

impl RectangularResistance {
    /// Create the model for a continuous phase of the given viscosity
    pub fn new(viscosity: f64) -> Self {
        Self { viscosity }
    }

    fn aspect_factor(height: f64, width: f64) -> f64 {
        let pi = std::f64::consts::PI;
        let correction = 192.0 * height / (pi.powi(5) * width) * (pi * width / (2.0 * height)).tanh();
        12.0 / (1.0 - correction)
    }
}

impl ResistanceModel for RectangularResistance {
    fn channel_resistance(&self, channel: &Channel) -> NetworkResult<f64> {
        check_dimensions(channel)?;
        let resistance = match channel.cross_section {
            CrossSection::Rectangular { width, height } => {
                let (w, h) = if height > width {
                    (height, width)
                } else {
                    (width, height)
                };
                Self::aspect_factor(h, w) * self.viscosity * channel.length / (w * h.powi(3))
            }
            CrossSection::Circular { radius } => {
                8.0 * self.viscosity * channel.length / (std::f64::consts::PI * radius.powi(4))
            }
        };
        Ok(resistance)
    }

    fn viscosity(&self) -> f64 {
        self.viscosity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rectangular_channel(width: f64, height: f64, length: f64) -> Channel {
        Channel {
            cross_section: CrossSection::Rectangular { width, height },
            length,
            resistance: 0.0,
            droplet_resistance: 0.0,
        }
    }

    /// The reference value for a 100 um x 30 um x 1 mm channel in water
    #[test]
    fn rectangular_resistance_of_shallow_channel() {
        let model = RectangularResistance::new(1e-3);
        let channel = rectangular_channel(100e-6, 30e-6, 1000e-6);
        let resistance = model.channel_resistance(&channel).unwrap();
        assert_relative_eq!(resistance, 5.4749e12, max_relative = 1e-4);
    }

    /// A square duct has the well-known factor of about 28.46
    #[test]
    fn square_duct_factor() {
        let model = RectangularResistance::new(1e-3);
        let channel = rectangular_channel(100e-6, 100e-6, 1000e-6);
        let resistance = model.channel_resistance(&channel).unwrap();
        assert_relative_eq!(resistance, 2.8264e11, max_relative = 1e-4);
    }

    /// Swapping width and height must not change the resistance
    #[test]
    fn rectangular_resistance_is_symmetric() {
        let model = RectangularResistance::new(1e-3);
        let a = model
            .channel_resistance(&rectangular_channel(100e-6, 30e-6, 1e-3))
            .unwrap();
        let b = model
            .channel_resistance(&rectangular_channel(30e-6, 100e-6, 1e-3))
            .unwrap();
        assert_relative_eq!(a, b, max_relative = 1e-12);
    }

    #[test]
    fn poiseuille_circular_channel() {
        let model = PoiseuilleResistance::new(1e-3);
        let channel = Channel {
            cross_section: CrossSection::Circular { radius: 50e-6 },
            length: 1e-3,
            resistance: 0.0,
            droplet_resistance: 0.0,
        };
        let expected = 8.0 * 1e-3 * 1e-3 / (std::f64::consts::PI * 50e-6f64.powi(4));
        assert_relative_eq!(
            model.channel_resistance(&channel).unwrap(),
            expected,
            max_relative = 1e-12
        );
    }

    #[test]
    fn rejects_invalid_geometry() {
        let model = RectangularResistance::new(1e-3);
        let channel = rectangular_channel(0.0, 30e-6, 1e-3);
        assert!(model.channel_resistance(&channel).is_err());
        let channel = rectangular_channel(100e-6, 30e-6, -1.0);
        assert!(model.channel_resistance(&channel).is_err());
    }

    /// A droplet three times as viscous as the carrier occupying 15 % of a
    /// channel adds 45 % of the channel resistance
    #[test]
    fn droplet_resistance_scales_with_occupation_and_viscosity() {
        let model = RectangularResistance::new(1e-3);
        let channel = rectangular_channel(100e-6, 30e-6, 1e-3);
        let base = model.channel_resistance(&channel).unwrap();
        let extra = model.droplet_resistance(&channel, 0.15, 3e-3).unwrap();
        assert_relative_eq!(extra, base * 0.45, max_relative = 1e-12);
    }
}
