//! lbm/units.rs - Lattice Unit Conversion
//!
//! Converts between physical and lattice units. The conversion is fixed by
//! the resolution (lattice points per characteristic length) and the lattice
//! relaxation time, which together determine the time step through the
//! kinematic viscosity.

/// Square of the lattice speed of sound for D2Q9
pub const CS2: f64 = 1.0 / 3.0;

/// Conversion between physical and lattice units
#[derive(Debug, Clone, Copy)]
pub struct UnitConverter {
    dx: f64,
    dt: f64,
    density: f64,
}

impl UnitConverter {
    /// Derive the conversion from resolution and relaxation time
    pub fn new(
        resolution: usize,
        relaxation_time: f64,
        char_phys_length: f64,
        kinematic_viscosity: f64,
        density: f64,
    ) -> Self {
        let dx = char_phys_length / resolution as f64;
        let lattice_viscosity = (relaxation_time - 0.5) * CS2;
        let dt = lattice_viscosity * dx * dx / kinematic_viscosity;
        Self { dx, dt, density }
    }

    /// Lattice spacing in m
    pub fn spacing(&self) -> f64 {
        self.dx
    }

    /// Physical time per lattice step in s
    pub fn time_step(&self) -> f64 {
        self.dt
    }

    /// Convert a physical velocity in m/s to lattice units
    pub fn lattice_velocity(&self, u: f64) -> f64 {
        u * self.dt / self.dx
    }

    /// Convert a lattice velocity to m/s
    pub fn phys_velocity(&self, u: f64) -> f64 {
        u * self.dx / self.dt
    }

    /// Convert a physical pressure in Pa to a lattice density around 1
    pub fn lattice_density(&self, pressure: f64) -> f64 {
        let factor = self.dx / self.dt;
        1.0 + pressure / (CS2 * self.density * factor * factor)
    }

    /// Convert a lattice density to a physical pressure in Pa
    pub fn phys_pressure(&self, rho: f64) -> f64 {
        let factor = self.dx / self.dt;
        (rho - 1.0) * CS2 * self.density * factor * factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pressure_round_trip() {
        let converter = UnitConverter::new(20, 0.932, 1e-4, 1e-6, 1e3);
        let rho = converter.lattice_density(120.0);
        assert_relative_eq!(converter.phys_pressure(rho), 120.0, max_relative = 1e-12);
    }

    #[test]
    fn velocity_round_trip() {
        let converter = UnitConverter::new(20, 0.932, 1e-4, 1e-6, 1e3);
        let u = converter.lattice_velocity(0.05);
        assert_relative_eq!(converter.phys_velocity(u), 0.05, max_relative = 1e-12);
    }
}
