//! lbm/lattice.rs - D2Q9 Lattice Boltzmann Kernel
//!
//! A BGK collide-and-stream kernel on a D2Q9 lattice with half-way
//! bounce-back walls and equilibrium in-/outlet cells. An additional
//! advection-diffusion lattice rides on the fluid velocity field for species
//! transport inside a CFD domain.

/// Number of discrete velocities
pub const Q: usize = 9;

/// Discrete velocity components
pub const CX: [i64; Q] = [0, 1, 0, -1, 0, 1, -1, -1, 1];
pub const CY: [i64; Q] = [0, 0, 1, 0, -1, 1, 1, -1, -1];

/// Lattice weights
pub const WEIGHTS: [f64; Q] = [
    4.0 / 9.0,
    1.0 / 9.0,
    1.0 / 9.0,
    1.0 / 9.0,
    1.0 / 9.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
];

/// Opposite direction of each discrete velocity
pub const OPPOSITE: [usize; Q] = [0, 3, 4, 1, 2, 7, 8, 5, 6];

/// Material index of cells outside the fluid domain
pub const MAT_NONE: u8 = 0;
/// Material index of bulk fluid cells
pub const MAT_BULK: u8 = 1;
/// Material index of wall cells
pub const MAT_WALL: u8 = 2;
/// Material index of the first opening; opening `k` is `MAT_OPENING + k`
pub const MAT_OPENING: u8 = 3;

/// Equilibrium populations for the given density and velocity
pub fn equilibrium(rho: f64, ux: f64, uy: f64) -> [f64; Q] {
    let usqr = 1.5 * (ux * ux + uy * uy);
    let mut feq = [0.0; Q];
    for q in 0..Q {
        let cu = 3.0 * (CX[q] as f64 * ux + CY[q] as f64 * uy);
        feq[q] = WEIGHTS[q] * rho * (1.0 + cu + 0.5 * cu * cu - usqr);
    }
    feq
}

/// A D2Q9 fluid lattice over a material map
#[derive(Debug, Clone)]
pub struct Lattice {
    nx: usize,
    ny: usize,
    omega: f64,
    material: Vec<u8>,
    f: Vec<[f64; Q]>,
}

impl Lattice {
    /// Create a lattice at rest over the given material map
    pub fn new(nx: usize, ny: usize, omega: f64, material: Vec<u8>) -> Self {
        assert_eq!(material.len(), nx * ny, "material map must cover the grid");
        let rest = equilibrium(1.0, 0.0, 0.0);
        Self {
            nx,
            ny,
            omega,
            material,
            f: vec![rest; nx * ny],
        }
    }

    /// Grid extent
    pub fn extent(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    /// Flat cell index
    pub fn index(&self, i: usize, j: usize) -> usize {
        j * self.nx + i
    }

    /// Material map of the lattice
    pub fn material(&self) -> &[u8] {
        &self.material
    }

    /// Density at a cell
    pub fn density(&self, cell: usize) -> f64 {
        self.f[cell].iter().sum()
    }

    /// Velocity at a cell
    pub fn velocity(&self, cell: usize) -> (f64, f64) {
        let rho = self.density(cell);
        if rho <= 0.0 {
            return (0.0, 0.0);
        }
        let mut ux = 0.0;
        let mut uy = 0.0;
        for q in 0..Q {
            ux += CX[q] as f64 * self.f[cell][q];
            uy += CY[q] as f64 * self.f[cell][q];
        }
        (ux / rho, uy / rho)
    }

    /// Overwrite a cell with equilibrium populations
    pub fn set_equilibrium(&mut self, cell: usize, rho: f64, ux: f64, uy: f64) {
        self.f[cell] = equilibrium(rho, ux, uy);
    }

    /// Impose a velocity at a cell, keeping its current density
    pub fn impose_velocity(&mut self, cell: usize, ux: f64, uy: f64) {
        let rho = self.density(cell);
        self.set_equilibrium(cell, rho, ux, uy);
    }

    /// Impose a density at a cell, keeping its current velocity
    pub fn impose_density(&mut self, cell: usize, rho: f64) {
        let (ux, uy) = self.velocity(cell);
        self.set_equilibrium(cell, rho, ux, uy);
    }

    /// One BGK collide-and-stream step with half-way bounce-back walls
    pub fn collide_and_stream(&mut self) {
        // Collide in place on fluid and opening cells.
        for cell in 0..self.f.len() {
            let mat = self.material[cell];
            if mat == MAT_NONE || mat == MAT_WALL {
                continue;
            }
            let rho = self.density(cell);
            let (ux, uy) = self.velocity(cell);
            let feq = equilibrium(rho, ux, uy);
            for q in 0..Q {
                self.f[cell][q] += self.omega * (feq[q] - self.f[cell][q]);
            }
        }
        // Stream with bounce-back at walls and the domain hull.
        let mut next = self.f.clone();
        for j in 0..self.ny {
            for i in 0..self.nx {
                let cell = self.index(i, j);
                let mat = self.material[cell];
                if mat == MAT_NONE || mat == MAT_WALL {
                    continue;
                }
                for q in 1..Q {
                    let ni = i as i64 + CX[q];
                    let nj = j as i64 + CY[q];
                    match self.neighbor(ni, nj) {
                        Some(neighbor) => next[neighbor][q] = self.f[cell][q],
                        None => next[cell][OPPOSITE[q]] = self.f[cell][q],
                    }
                }
            }
        }
        self.f = next;
    }

    /// The streamable neighbor cell, or `None` if the direction hits a wall
    /// or leaves the domain
    fn neighbor(&self, i: i64, j: i64) -> Option<usize> {
        if i < 0 || j < 0 || i >= self.nx as i64 || j >= self.ny as i64 {
            return None;
        }
        let cell = self.index(i as usize, j as usize);
        match self.material[cell] {
            MAT_NONE | MAT_WALL => None,
            _ => Some(cell),
        }
    }

    /// Average kinetic energy over the bulk, the convergence signal
    pub fn average_energy(&self) -> f64 {
        let mut energy = 0.0;
        let mut count = 0usize;
        for cell in 0..self.f.len() {
            if self.material[cell] == MAT_BULK {
                let (ux, uy) = self.velocity(cell);
                energy += 0.5 * (ux * ux + uy * uy);
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            energy / count as f64
        }
    }

    /// Cells carrying the given material index
    pub fn cells_of_material(&self, mat: u8) -> Vec<usize> {
        (0..self.f.len())
            .filter(|&c| self.material[c] == mat)
            .collect()
    }
}

/// An advection-diffusion lattice transporting one species concentration on
/// the velocity field of a fluid lattice
#[derive(Debug, Clone)]
pub struct AdLattice {
    omega: f64,
    g: Vec<[f64; Q]>,
}

impl AdLattice {
    /// Create a species lattice at zero concentration
    pub fn new(fluid: &Lattice, omega: f64) -> Self {
        Self {
            omega,
            g: vec![[0.0; Q]; fluid.f.len()],
        }
    }

    /// Concentration at a cell
    pub fn concentration(&self, cell: usize) -> f64 {
        self.g[cell].iter().sum()
    }

    /// Impose a concentration at a cell, in equilibrium with the carrier
    /// velocity
    pub fn impose_concentration(&mut self, fluid: &Lattice, cell: usize, concentration: f64) {
        let (ux, uy) = fluid.velocity(cell);
        self.g[cell] = equilibrium(concentration, ux, uy);
    }

    /// One collide-and-stream step on the carrier velocity field.
    /// Walls reflect (zero flux).
    pub fn collide_and_stream(&mut self, fluid: &Lattice) {
        for cell in 0..self.g.len() {
            let mat = fluid.material[cell];
            if mat == MAT_NONE || mat == MAT_WALL {
                continue;
            }
            let c = self.concentration(cell);
            let (ux, uy) = fluid.velocity(cell);
            let geq = equilibrium(c, ux, uy);
            for q in 0..Q {
                self.g[cell][q] += self.omega * (geq[q] - self.g[cell][q]);
            }
        }
        let mut next = self.g.clone();
        let (nx, ny) = (fluid.nx, fluid.ny);
        for j in 0..ny {
            for i in 0..nx {
                let cell = fluid.index(i, j);
                let mat = fluid.material[cell];
                if mat == MAT_NONE || mat == MAT_WALL {
                    continue;
                }
                for q in 1..Q {
                    let ni = i as i64 + CX[q];
                    let nj = j as i64 + CY[q];
                    match fluid.neighbor(ni, nj) {
                        Some(neighbor) => next[neighbor][q] = self.g[cell][q],
                        None => next[cell][OPPOSITE[q]] = self.g[cell][q],
                    }
                }
            }
        }
        self.g = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn equilibrium_sums_to_density() {
        let feq = equilibrium(1.2, 0.05, -0.02);
        let rho: f64 = feq.iter().sum();
        assert_relative_eq!(rho, 1.2, max_relative = 1e-12);
    }

    #[test]
    fn equilibrium_momentum_matches_velocity() {
        let feq = equilibrium(1.0, 0.08, 0.03);
        let mut ux = 0.0;
        let mut uy = 0.0;
        for q in 0..Q {
            ux += CX[q] as f64 * feq[q];
            uy += CY[q] as f64 * feq[q];
        }
        assert_relative_eq!(ux, 0.08, max_relative = 1e-12);
        assert_relative_eq!(uy, 0.03, max_relative = 1e-12);
    }

    #[test]
    fn closed_box_conserves_mass() {
        let nx = 8;
        let ny = 8;
        let mut material = vec![MAT_BULK; nx * ny];
        for i in 0..nx {
            material[i] = MAT_WALL;
            material[(ny - 1) * nx + i] = MAT_WALL;
        }
        for j in 0..ny {
            material[j * nx] = MAT_WALL;
            material[j * nx + nx - 1] = MAT_WALL;
        }
        let mut lattice = Lattice::new(nx, ny, 1.0, material);
        let cell = lattice.index(3, 3);
        lattice.set_equilibrium(cell, 1.1, 0.0, 0.0);
        let mass_before: f64 = lattice
            .cells_of_material(MAT_BULK)
            .iter()
            .map(|&c| lattice.density(c))
            .sum();
        for _ in 0..20 {
            lattice.collide_and_stream();
        }
        let mass_after: f64 = lattice
            .cells_of_material(MAT_BULK)
            .iter()
            .map(|&c| lattice.density(c))
            .sum();
        assert_relative_eq!(mass_before, mass_after, max_relative = 1e-10);
    }

    #[test]
    fn rest_lattice_has_zero_energy() {
        let lattice = Lattice::new(4, 4, 1.0, vec![MAT_BULK; 16]);
        assert_eq!(lattice.average_energy(), 0.0);
    }
}
