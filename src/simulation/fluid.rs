//! simulation/fluid.rs - Fluids and Injections
//!
//! Fluids are the bulk phases of a simulation; injections schedule droplets
//! and mixtures to enter the network at a given time.

/// A bulk fluid phase
#[derive(Debug, Clone)]
pub struct Fluid {
    /// Unique identifier of the fluid
    pub id: usize,
    /// Dynamic viscosity in Pa s
    pub viscosity: f64,
    /// Density in kg/m^3
    pub density: f64,
    /// Concentration of the fluid itself, between 0.0 and 1.0
    pub concentration: f64,
    /// Optional display name
    pub name: String,
}

/// A scheduled droplet injection
#[derive(Debug, Clone)]
pub struct DropletInjection {
    /// Unique identifier of the injection
    pub id: usize,
    /// The droplet to inject
    pub droplet_id: usize,
    /// Channel receiving the droplet
    pub channel_id: usize,
    /// Injection time in s
    pub time: f64,
    /// Position of the droplet center along the channel, in [0, 1]
    pub position: f64,
    /// Whether the injection has been performed
    pub performed: bool,
}

/// A scheduled mixture injection
#[derive(Debug, Clone)]
pub struct MixtureInjection {
    /// Unique identifier of the injection
    pub id: usize,
    /// The mixture to feed
    pub mixture_id: usize,
    /// Channel receiving the mixture at its upstream end
    pub channel_id: usize,
    /// Injection time in s
    pub time: f64,
    /// Permanent injections keep feeding; one-shot injections yield to
    /// upstream arrivals
    pub permanent: bool,
    /// Whether the injection has been performed
    pub performed: bool,
}

/// Volume-weighted blend of two fluids, used when droplets merge
pub fn mix_fluids(id: usize, a: &Fluid, volume_a: f64, b: &Fluid, volume_b: f64) -> Fluid {
    let total = volume_a + volume_b;
    let (wa, wb) = if total > 0.0 {
        (volume_a / total, volume_b / total)
    } else {
        (0.5, 0.5)
    };
    Fluid {
        id,
        viscosity: wa * a.viscosity + wb * b.viscosity,
        density: wa * a.density + wb * b.density,
        concentration: wa * a.concentration + wb * b.concentration,
        name: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mixing_weights_by_volume() {
        let a = Fluid {
            id: 0,
            viscosity: 1e-3,
            density: 1000.0,
            concentration: 0.0,
            name: String::new(),
        };
        let b = Fluid {
            id: 1,
            viscosity: 3e-3,
            density: 900.0,
            concentration: 1.0,
            name: String::new(),
        };
        let mixed = mix_fluids(2, &a, 1e-9, &b, 3e-9);
        assert_relative_eq!(mixed.viscosity, 2.5e-3, max_relative = 1e-12);
        assert_relative_eq!(mixed.density, 925.0, max_relative = 1e-12);
        assert_relative_eq!(mixed.concentration, 0.75, max_relative = 1e-12);
    }
}
