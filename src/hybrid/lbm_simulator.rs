//! hybrid/lbm_simulator.rs - LBM-Backed CFD Adapter
//!
//! Wraps one lattice Boltzmann sub-domain over a single CFD module. The
//! adapter voxelizes the module's STL outline, installs velocity or pressure
//! boundaries at the openings according to their coupling role, and exposes
//! plane-integrated pressures and flow rates back to the hybrid scheme.

use crate::config::CfdConfig;
use crate::error::{CfdError, CfdResult};
use crate::hybrid::CfdSimulator;
use crate::lbm::lattice::{MAT_BULK, MAT_NONE, MAT_OPENING, MAT_WALL};
use crate::lbm::{AdLattice, Lattice, UnitConverter, ValueTracer, VtkWriter};
use crate::mesh::read_outline;
use crate::network::{CfdModule, Network, Opening};
use log::info;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Geometric slack when locating opening cells, in lattice spacings
const OPENING_BAND: f64 = 1.1;

/// A lattice Boltzmann solver over one CFD module
pub struct LbmSimulator {
    module_id: usize,
    config: CfdConfig,
    theta: usize,
    module: Option<CfdModule>,
    lattice: Option<Lattice>,
    converter: Option<UnitConverter>,
    tracer: ValueTracer,
    pressure_exports: HashSet<usize>,
    target_flows: HashMap<usize, f64>,
    target_pressures: HashMap<usize, f64>,
    opening_cells: HashMap<usize, Vec<usize>>,
    opening_centers: HashMap<usize, (f64, f64)>,
    species: Vec<SpeciesLattice>,
    target_concentrations: HashMap<usize, HashMap<usize, f64>>,
    vtk: Option<VtkWriter>,
    step: usize,
}

impl LbmSimulator {
    /// Create an adapter for the given module
    pub fn new(module_id: usize, config: CfdConfig, theta: usize) -> Self {
        let tracer = ValueTracer::new(config.tracer_window, config.tolerance);
        Self {
            module_id,
            config,
            theta,
            module: None,
            lattice: None,
            converter: None,
            tracer,
            pressure_exports: HashSet::new(),
            target_flows: HashMap::new(),
            target_pressures: HashMap::new(),
            opening_cells: HashMap::new(),
            opening_centers: HashMap::new(),
            species: Vec::new(),
            target_concentrations: HashMap::new(),
            vtk: None,
            step: 0,
        }
    }

    /// Couple a species into the domain with its diffusivity in m^2/s.
    /// One advection-diffusion lattice is maintained per species.
    pub fn add_species(&mut self, species_id: usize, diffusivity: f64) {
        self.species.push(SpeciesLattice {
            species_id,
            diffusivity,
            lattice: None,
        });
    }

    /// Target inflow concentrations per opening node and species
    pub fn set_concentrations(&mut self, concentrations: HashMap<usize, HashMap<usize, f64>>) {
        self.target_concentrations = concentrations;
    }

    /// Mean concentration of a species over an opening
    pub fn read_concentration(&self, species_id: usize, opening: usize) -> Option<f64> {
        let cells = self.opening_cells.get(&opening)?;
        let ad = self
            .species
            .iter()
            .find(|s| s.species_id == species_id)
            .and_then(|s| s.lattice.as_ref())?;
        if cells.is_empty() {
            return None;
        }
        let total: f64 = cells.iter().map(|&c| ad.concentration(c)).sum();
        Some(total / cells.len() as f64)
    }

    fn module_ref(&self) -> &CfdModule {
        self.module.as_ref().expect("prepare() builds the module")
    }

    /// Apply the boundary values for one sub-step
    fn set_boundary_values(&mut self) {
        let module = self.module.as_ref().expect("prepared").clone();
        let converter = *self.converter.as_ref().expect("prepared");
        let lattice = self.lattice.as_mut().expect("prepared");
        for (k, opening) in module.openings.iter().enumerate() {
            let cells = match self.opening_cells.get(&opening.node_id) {
                Some(c) => c.clone(),
                None => continue,
            };
            let mat = MAT_OPENING + k as u8;
            debug_assert!(cells.iter().all(|&c| lattice.material()[c] == mat));
            if self.pressure_exports.contains(&opening.node_id) {
                // Velocity boundary with a Poiseuille profile over the
                // opening width; positive flow points into the domain.
                let q = self.target_flows.get(&opening.node_id).copied().unwrap_or(0.0);
                let mean = q / (opening.width * opening.height);
                let u_max = converter.lattice_velocity(1.5 * mean);
                let center = self.opening_centers[&opening.node_id];
                for &cell in &cells {
                    let offset = lateral_offset(lattice, &converter, &module, opening, center, cell);
                    let shape = 1.0 - (2.0 * offset / opening.width).powi(2);
                    let u = u_max * shape.max(0.0);
                    lattice.impose_velocity(cell, u * opening.normal.0, u * opening.normal.1);
                }
            } else {
                let p = self
                    .target_pressures
                    .get(&opening.node_id)
                    .copied()
                    .unwrap_or(0.0);
                let rho = converter.lattice_density(p);
                for &cell in &cells {
                    lattice.impose_density(cell, rho);
                }
            }
        }
    }

    /// Apply concentration boundaries: Dirichlet where flow enters the
    /// domain, zero-gradient where it leaves
    fn set_species_boundary_values(&mut self) {
        if self.species.is_empty() {
            return;
        }
        let module = self.module.as_ref().expect("prepared").clone();
        let flows = self.read_flow_rates();
        let lattice = self.lattice.as_ref().expect("prepared");
        for opening in &module.openings {
            let cells = match self.opening_cells.get(&opening.node_id) {
                Some(c) => c.clone(),
                None => continue,
            };
            let inflow = flows.get(&opening.node_id).copied().unwrap_or(0.0) >= 0.0;
            for species in &mut self.species {
                let Some(ad) = species.lattice.as_mut() else {
                    continue;
                };
                if inflow {
                    let c0 = self
                        .target_concentrations
                        .get(&opening.node_id)
                        .and_then(|m| m.get(&species.species_id))
                        .copied()
                        .unwrap_or(0.0);
                    for &cell in &cells {
                        ad.impose_concentration(lattice, cell, c0);
                    }
                } else {
                    // Zero gradient: copy the concentration of the interior
                    // neighbour along the opening normal.
                    let (nx, _) = lattice.extent();
                    let di = opening.normal.0.round() as i64;
                    let dj = opening.normal.1.round() as i64;
                    for &cell in &cells {
                        let i = (cell % nx) as i64 + di;
                        let j = (cell / nx) as i64 + dj;
                        if i >= 0 && j >= 0 {
                            let interior = j as usize * nx + i as usize;
                            if interior < lattice.material().len()
                                && lattice.material()[interior] != MAT_NONE
                                && lattice.material()[interior] != MAT_WALL
                            {
                                let c = ad.concentration(interior);
                                ad.impose_concentration(lattice, cell, c);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// One advection-diffusion lattice coupled into the domain
struct SpeciesLattice {
    species_id: usize,
    diffusivity: f64,
    lattice: Option<AdLattice>,
}

fn lateral_offset(
    lattice: &Lattice,
    converter: &UnitConverter,
    module: &CfdModule,
    opening: &Opening,
    center: (f64, f64),
    cell: usize,
) -> f64 {
    let (nx, _) = lattice.extent();
    let dx = converter.spacing();
    let i = cell % nx;
    let j = cell / nx;
    let x = module.position.0 + (i as f64 + 0.5) * dx;
    let y = module.position.1 + (j as f64 + 0.5) * dx;
    (x - center.0) * opening.tangent.0 + (y - center.1) * opening.tangent.1
}

impl CfdSimulator for LbmSimulator {
    fn module_id(&self) -> usize {
        self.module_id
    }

    fn set_pressure_export(&mut self, openings: &HashSet<usize>) {
        self.pressure_exports = openings.clone();
    }

    fn prepare(&mut self, network: &Network, dyn_viscosity: f64, density: f64) -> CfdResult<()> {
        let module = network
            .module(self.module_id)
            .map_err(|_| CfdError::GeometryOutOfBounds {
                module_id: self.module_id,
            })?
            .clone();

        // Every opening node must sit on the module boundary.
        for opening in &module.openings {
            let node = network.node(opening.node_id).map_err(|_| CfdError::OrphanOpening {
                module_id: self.module_id,
                node_id: opening.node_id,
            })?;
            if !module.contains_on_boundary(node.position, 1e-9) {
                return Err(CfdError::OrphanOpening {
                    module_id: self.module_id,
                    node_id: opening.node_id,
                });
            }
        }

        let outline = read_outline(&module.stl_file)?;
        let (min, max) = outline.bounds();
        let slack = 1e-9;
        if min.0 < module.position.0 - slack
            || min.1 < module.position.1 - slack
            || max.0 > module.position.0 + module.size.0 + slack
            || max.1 > module.position.1 + module.size.1 + slack
        {
            return Err(CfdError::GeometryOutOfBounds {
                module_id: self.module_id,
            });
        }

        let converter = UnitConverter::new(
            self.config.resolution,
            self.config.relaxation_time,
            self.config.char_phys_length,
            dyn_viscosity / density,
            density,
        );
        let dx = converter.spacing();
        let nx = (module.size.0 / dx).round() as usize;
        let ny = (module.size.1 / dx).round() as usize;

        // Voxelize: bulk inside the outline, walls on the rim of the fluid
        // region, opening materials along each opening segment.
        let mut material = vec![MAT_NONE; nx * ny];
        for j in 0..ny {
            for i in 0..nx {
                let x = module.position.0 + (i as f64 + 0.5) * dx;
                let y = module.position.1 + (j as f64 + 0.5) * dx;
                if outline.contains((x, y)) {
                    material[j * nx + i] = MAT_BULK;
                }
            }
        }
        let bulk_snapshot = material.clone();
        for j in 0..ny {
            for i in 0..nx {
                if bulk_snapshot[j * nx + i] != MAT_NONE {
                    continue;
                }
                let mut touches_bulk = false;
                for (di, dj) in [(1i64, 0i64), (-1, 0), (0, 1), (0, -1)] {
                    let ni = i as i64 + di;
                    let nj = j as i64 + dj;
                    if ni >= 0 && nj >= 0 && (ni as usize) < nx && (nj as usize) < ny {
                        if bulk_snapshot[nj as usize * nx + ni as usize] == MAT_BULK {
                            touches_bulk = true;
                        }
                    }
                }
                if touches_bulk {
                    material[j * nx + i] = MAT_WALL;
                }
            }
        }

        self.opening_cells.clear();
        self.opening_centers.clear();
        for opening in &module.openings {
            let node = network.node(opening.node_id).expect("opening node checked above");
            self.opening_centers.insert(opening.node_id, node.position);
        }
        for (k, opening) in module.openings.iter().enumerate() {
            let center = self.opening_centers[&opening.node_id];
            let half_width = opening.width / 2.0;
            let mut cells = Vec::new();
            for j in 0..ny {
                for i in 0..nx {
                    let cell = j * nx + i;
                    if material[cell] == MAT_NONE {
                        continue;
                    }
                    let x = module.position.0 + (i as f64 + 0.5) * dx;
                    let y = module.position.1 + (j as f64 + 0.5) * dx;
                    let along = (x - center.0) * opening.tangent.0 + (y - center.1) * opening.tangent.1;
                    let across = (x - center.0) * opening.normal.0 + (y - center.1) * opening.normal.1;
                    if along.abs() <= half_width && across.abs() <= OPENING_BAND * dx {
                        material[cell] = MAT_OPENING + k as u8;
                        cells.push(cell);
                    }
                }
            }
            if cells.is_empty() {
                return Err(CfdError::OrphanOpening {
                    module_id: self.module_id,
                    node_id: opening.node_id,
                });
            }
            self.opening_cells.insert(opening.node_id, cells);
        }

        let omega = 1.0 / self.config.relaxation_time;
        let lattice = Lattice::new(nx, ny, omega, material);

        for species in &mut self.species {
            let omega_ad = match self.config.ad_relaxation_time {
                Some(tau) => 1.0 / tau,
                None => {
                    let d_lattice = species.diffusivity * converter.time_step()
                        / (converter.spacing() * converter.spacing());
                    1.0 / (3.0 * d_lattice + 0.5)
                }
            };
            species.lattice = Some(AdLattice::new(&lattice, omega_ad));
        }

        if self.config.vtk_interval > 0 {
            self.vtk = Some(VtkWriter::new(
                self.config.vtk_dir.clone(),
                format!("module_{}", self.module_id),
            ));
        }

        info!(
            "prepared CFD module {} on a {}x{} lattice (dx = {dx:.3e} m)",
            self.module_id, nx, ny
        );
        self.lattice = Some(lattice);
        self.converter = Some(converter);
        self.module = Some(module);
        self.tracer.reset();
        self.step = 0;
        Ok(())
    }

    fn set_flow_rates(&mut self, flow_rates: &HashMap<usize, f64>) {
        for (&node, &q) in flow_rates {
            self.target_flows.insert(node, q);
        }
    }

    fn set_pressures(&mut self, pressures: &HashMap<usize, f64>) {
        for (&node, &p) in pressures {
            self.target_pressures.insert(node, p);
        }
    }

    fn solve(&mut self) -> CfdResult<()> {
        for _ in 0..self.theta {
            self.set_boundary_values();
            self.set_species_boundary_values();
            {
                let lattice = self.lattice.as_mut().expect("prepare() before solve()");
                lattice.collide_and_stream();
            }
            let lattice = self.lattice.as_ref().expect("prepared");
            for species in &mut self.species {
                if let Some(ad) = species.lattice.as_mut() {
                    ad.collide_and_stream(lattice);
                }
            }
            self.tracer.take_value(lattice.average_energy());
            self.step += 1;
            if let Some(vtk) = &mut self.vtk {
                if self.config.vtk_interval > 0 && self.step % self.config.vtk_interval == 0 {
                    let converter = self.converter.as_ref().expect("prepared");
                    vtk.write_snapshot(lattice, converter, self.step as f64)?;
                }
            }
        }
        Ok(())
    }

    fn read_pressures(&self) -> HashMap<usize, f64> {
        let mut pressures = HashMap::new();
        let (Some(lattice), Some(converter)) = (&self.lattice, &self.converter) else {
            return pressures;
        };
        for opening in &self.module_ref().openings {
            if let Some(cells) = self.opening_cells.get(&opening.node_id) {
                if cells.is_empty() {
                    continue;
                }
                let mean: f64 = cells
                    .iter()
                    .map(|&c| converter.phys_pressure(lattice.density(c)))
                    .sum::<f64>()
                    / cells.len() as f64;
                pressures.insert(opening.node_id, mean);
            }
        }
        pressures
    }

    fn read_flow_rates(&self) -> HashMap<usize, f64> {
        let mut flows = HashMap::new();
        let (Some(lattice), Some(converter)) = (&self.lattice, &self.converter) else {
            return flows;
        };
        let dx = converter.spacing();
        for opening in &self.module_ref().openings {
            if let Some(cells) = self.opening_cells.get(&opening.node_id) {
                let mut flux = 0.0;
                for &cell in cells {
                    let (ux, uy) = lattice.velocity(cell);
                    let inward = converter.phys_velocity(ux) * opening.normal.0
                        + converter.phys_velocity(uy) * opening.normal.1;
                    flux += inward * dx * opening.height;
                }
                flows.insert(opening.node_id, flux);
            }
        }
        flows
    }

    fn has_converged(&self) -> bool {
        self.tracer.has_converged()
    }

    fn vtk_master(&self) -> Option<PathBuf> {
        self.vtk.as_ref().map(|w| w.master_path())
    }
}
