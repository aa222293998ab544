//! simulation - Event-Driven Simulation Control
//!
//! The simulation owns the fluids, species, mixtures, droplets, injections
//! and state history, drives the flow solvers (nodal or hybrid) and advances
//! the scalar transport layers through a discrete event loop. Events at the
//! same instant are applied in a fixed category order with ties broken by
//! ascending entity id.

pub mod events;
pub mod fluid;
pub mod state;

pub use events::{Event, EventKind};
pub use fluid::{mix_fluids, DropletInjection, Fluid, MixtureInjection};
pub use state::{DropletPosition, SimulationResult, State};

use crate::config::{HybridConfig, TimeConfig};
use crate::droplet::{DropletState, DropletTracker};
use crate::error::{ChipflowError, NetworkError, Result, SimulationError};
use crate::hybrid::{CfdSimulator, HybridScheme, SchemeVariant};
use crate::membrane::{self, TankContents};
use crate::mixing::{MixingModel, MixtureStore};
use crate::network::Network;
use crate::nodal;
use crate::resistance::{PoiseuilleResistance, RectangularResistance, ResistanceModel};
use log::info;
use std::collections::HashMap;
use std::path::PathBuf;

/// The microfluidic platform being simulated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    /// A single continuous fluid
    #[default]
    Continuous,
    /// Droplets filling the channel cross-section
    BigDroplet,
    /// Multiple miscible fluids
    Mixing,
}

/// The abstraction level of the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimType {
    /// Pure 1D abstraction
    #[default]
    Abstract,
    /// 1D abstraction coupled with CFD sub-domains
    Hybrid,
    /// CFD sub-domains only
    Cfd,
}

/// Which resistance model the simulation builds at start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ResistanceChoice {
    #[default]
    Rectangular,
    Poiseuille,
}

/// Conducts a simulation and owns every parameter necessary for it
pub struct Simulation {
    platform: Platform,
    sim_type: SimType,
    network: Network,
    fluids: Vec<Fluid>,
    continuous_phase: Option<usize>,
    resistance_choice: ResistanceChoice,
    mixing_model: Option<Box<dyn MixingModel>>,
    store: MixtureStore,
    tracker: DropletTracker,
    droplet_injections: Vec<DropletInjection>,
    mixture_injections: Vec<MixtureInjection>,
    tanks: TankContents,
    time_config: TimeConfig,
    hybrid_config: HybridConfig,
    scheme_variant: SchemeVariant,
    simulators: Vec<Box<dyn CfdSimulator>>,
    result: SimulationResult,
    time: f64,
}

impl Simulation {
    /// Create a simulation over the given network
    pub fn new(network: Network) -> Self {
        Self {
            platform: Platform::default(),
            sim_type: SimType::default(),
            network,
            fluids: Vec::new(),
            continuous_phase: None,
            resistance_choice: ResistanceChoice::default(),
            mixing_model: None,
            store: MixtureStore::new(),
            tracker: DropletTracker::new(),
            droplet_injections: Vec::new(),
            mixture_injections: Vec::new(),
            tanks: TankContents::new(),
            time_config: TimeConfig::default(),
            hybrid_config: HybridConfig::default(),
            scheme_variant: SchemeVariant::Naive,
            simulators: Vec::new(),
            result: SimulationResult::default(),
            time: 0.0,
        }
    }

    //===================================== Setup ========================================

    /// Set the simulated platform
    pub fn set_platform(&mut self, platform: Platform) {
        self.platform = platform;
    }

    /// Set the abstraction level
    pub fn set_type(&mut self, sim_type: SimType) {
        self.sim_type = sim_type;
    }

    /// Access the network
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Mutable access to the network, for setup
    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    /// Register a fluid; returns its id
    pub fn add_fluid(&mut self, viscosity: f64, density: f64, concentration: f64) -> usize {
        let id = self.fluids.len();
        self.fluids.push(Fluid {
            id,
            viscosity,
            density,
            concentration,
            name: String::new(),
        });
        id
    }

    /// Access a fluid
    pub fn fluid(&self, id: usize) -> Result<&Fluid> {
        self.fluids
            .get(id)
            .ok_or(ChipflowError::Network(NetworkError::UnknownId {
                entity: "fluid",
                id,
            }))
    }

    /// All fluids, including ones created by droplet merging
    pub fn fluids(&self) -> &[Fluid] {
        &self.fluids
    }

    /// Choose the carrier fluid
    pub fn set_continuous_phase(&mut self, fluid_id: usize) {
        self.continuous_phase = Some(fluid_id);
    }

    /// Use the rectangular-duct resistance model ("1D")
    pub fn set_rectangular_resistance_model(&mut self) {
        self.resistance_choice = ResistanceChoice::Rectangular;
    }

    /// Use the plain Poiseuille resistance model
    pub fn set_poiseuille_resistance_model(&mut self) {
        self.resistance_choice = ResistanceChoice::Poiseuille;
    }

    /// Use the instantaneous mixing model
    pub fn set_instantaneous_mixing(&mut self) {
        self.mixing_model = Some(Box::new(crate::mixing::InstantaneousMixingModel::new()));
    }

    /// Use the diffusive mixing model with the given number of cosine modes
    pub fn set_diffusive_mixing(&mut self, modes: usize) {
        self.mixing_model = Some(Box::new(crate::mixing::DiffusiveMixingModel::new(modes)));
    }

    /// Select the relaxation variant of the hybrid scheme
    pub fn set_scheme_variant(&mut self, variant: SchemeVariant) {
        self.scheme_variant = variant;
    }

    /// Set the time control
    pub fn set_time_config(&mut self, config: TimeConfig) {
        self.time_config = config;
    }

    /// Set the hybrid coupling parameters
    pub fn set_hybrid_config(&mut self, config: HybridConfig) {
        self.hybrid_config = config;
    }

    /// Register a species; returns its id
    pub fn add_species(&mut self, diffusivity: f64, saturation_concentration: f64) -> usize {
        self.store.add_species(diffusivity, saturation_concentration)
    }

    /// Register a mixture from species-concentration pairs; returns its id
    pub fn add_mixture(&mut self, concentrations: HashMap<usize, f64>) -> usize {
        self.store.add_mixture(concentrations)
    }

    /// Access the mixture store
    pub fn mixtures(&self) -> &MixtureStore {
        &self.store
    }

    /// Schedule a mixture to feed a channel from the given time
    pub fn add_mixture_injection(
        &mut self,
        mixture_id: usize,
        channel_id: usize,
        time: f64,
        permanent: bool,
    ) -> usize {
        let id = self.mixture_injections.len();
        self.mixture_injections.push(MixtureInjection {
            id,
            mixture_id,
            channel_id,
            time,
            permanent,
            performed: false,
        });
        id
    }

    /// Register a droplet of the given fluid and volume; returns its id
    pub fn add_droplet(&mut self, fluid_id: usize, volume: f64) -> usize {
        self.tracker.add_droplet(fluid_id, volume)
    }

    /// Access the droplet tracker
    pub fn droplets(&self) -> &DropletTracker {
        &self.tracker
    }

    /// Schedule a droplet injection
    pub fn add_droplet_injection(
        &mut self,
        droplet_id: usize,
        channel_id: usize,
        time: f64,
        position: f64,
    ) -> usize {
        let id = self.droplet_injections.len();
        self.droplet_injections.push(DropletInjection {
            id,
            droplet_id,
            channel_id,
            time,
            position,
            performed: false,
        });
        id
    }

    /// Attach a CFD simulator for a module
    pub fn add_cfd_simulator(&mut self, simulator: Box<dyn CfdSimulator>) {
        self.simulators.push(simulator);
    }

    /// Concentration of a species in a tank, in g/m^3
    pub fn tank_concentration(&self, tank_edge_id: usize, species_id: usize) -> f64 {
        self.tanks
            .get(&tank_edge_id)
            .and_then(|m| m.get(&species_id))
            .copied()
            .unwrap_or(0.0)
    }

    /// The collected result of the last [`Simulation::simulate`] call
    pub fn result(&self) -> &SimulationResult {
        &self.result
    }

    //==================================== Execution =====================================

    fn resistance_model(&self) -> Result<Box<dyn ResistanceModel>> {
        let phase = self.continuous_phase.ok_or_else(|| {
            ChipflowError::Simulation(SimulationError::SetupIncomplete {
                reason: String::from("no continuous phase set"),
            })
        })?;
        let viscosity = self.fluid(phase)?.viscosity;
        Ok(match self.resistance_choice {
            ResistanceChoice::Rectangular => Box::new(RectangularResistance::new(viscosity)),
            ResistanceChoice::Poiseuille => Box::new(PoiseuilleResistance::new(viscosity)),
        })
    }

    /// Solve the flow field with the configured abstraction level
    fn solve_flow(&mut self, scheme: &mut Option<HybridScheme>) -> Result<()> {
        match scheme {
            Some(scheme) => {
                let outcome = scheme.solve(&mut self.network, &mut self.simulators)?;
                if !outcome.converged {
                    self.result.did_not_converge = true;
                }
            }
            None => {
                nodal::solve_network(&mut self.network, &HashMap::new())?;
            }
        }
        Ok(())
    }

    fn vtk_files(&self) -> HashMap<usize, PathBuf> {
        self.simulators
            .iter()
            .filter_map(|s| s.vtk_master().map(|p| (s.module_id(), p)))
            .collect()
    }

    fn capture_state(&mut self) {
        let mixture_positions = match &self.mixing_model {
            Some(model) => self
                .network
                .edges()
                .iter()
                .filter(|e| e.is_channel())
                .map(|e| (e.id, model.segments(e.id)))
                .filter(|(_, segments)| !segments.is_empty())
                .collect(),
            None => HashMap::new(),
        };
        let filled_edges = self
            .mixing_model
            .as_ref()
            .map(|m| m.inlet_mixtures())
            .unwrap_or_default();
        self.result.capture(
            self.time,
            &self.network,
            self.tracker.droplets(),
            mixture_positions,
            filled_edges,
            self.vtk_files(),
        );
    }

    /// Run the simulation to completion
    pub fn simulate(&mut self) -> Result<&SimulationResult> {
        self.result = SimulationResult::default();
        self.result.continuous_phase_id = self.continuous_phase.unwrap_or(0);
        self.time = 0.0;

        if self.platform == Platform::BigDroplet
            && !self.network.nodes().iter().any(|n| n.sink)
        {
            return Err(ChipflowError::Network(NetworkError::incomplete(
                "the droplet platform requires at least one sink node",
            )));
        }
        self.network.validate().map_err(ChipflowError::from)?;

        let model = self.resistance_model()?;
        self.network.freeze();
        self.network
            .apply_resistance_model(model.as_ref())
            .map_err(ChipflowError::from)?;

        // Hybrid and CFD runs prepare their sub-domain solvers up front.
        let mut scheme = None;
        if !self.simulators.is_empty() && self.sim_type != SimType::Abstract {
            let phase = self.fluid(self.continuous_phase.unwrap_or(0))?.clone();
            for simulator in &mut self.simulators {
                simulator.prepare(&self.network, phase.viscosity, phase.density)?;
            }
            let mut hybrid = HybridScheme::new(self.hybrid_config, self.scheme_variant);
            hybrid.initialize(&mut self.network, &mut self.simulators, phase.viscosity)?;
            scheme = Some(hybrid);
        }

        info!(
            "starting {:?}/{:?} simulation with {} nodes and {} edges",
            self.platform,
            self.sim_type,
            self.network.nodes().len(),
            self.network.edges().len()
        );

        match self.platform {
            Platform::Continuous => {
                self.solve_flow(&mut scheme)?;
                self.capture_state();
            }
            Platform::BigDroplet => self.simulate_droplets(model.as_ref(), &mut scheme)?,
            Platform::Mixing => self.simulate_mixing(&mut scheme)?,
        }
        Ok(&self.result)
    }

    /// Event loop of the droplet platform: states are written at every event
    fn simulate_droplets(
        &mut self,
        model: &dyn ResistanceModel,
        scheme: &mut Option<HybridScheme>,
    ) -> Result<()> {
        self.solve_flow(scheme)?;
        self.capture_state();

        loop {
            self.tracker
                .update_resistances(&mut self.network, model, &self.fluids)?;
            self.solve_flow(scheme)?;
            self.tracker.update_boundary_flows(&self.network)?;

            let mut candidates = Vec::new();
            // Droplets torn across two downstream channels split before
            // anything else moves.
            for droplet_id in self.tracker.find_split_candidates(&self.network)? {
                candidates.push(Event::new(self.time, EventKind::DropletSplit { droplet_id }));
            }
            if let Some((dt, droplet_id)) = self.tracker.time_to_next_event(&self.network)? {
                candidates.push(Event::new(
                    self.time + dt,
                    EventKind::BoundaryArrival { droplet_id },
                ));
            }
            for injection in &self.droplet_injections {
                if !injection.performed {
                    candidates.push(Event::new(
                        injection.time,
                        EventKind::DropletInjection {
                            injection_id: injection.id,
                        },
                    ));
                }
            }
            let droplets_pending = self
                .tracker
                .droplets()
                .iter()
                .any(|d| d.state == DropletState::Network)
                || self.droplet_injections.iter().any(|i| !i.performed);
            if !droplets_pending {
                break;
            }
            candidates.push(Event::new(self.time_config.max_end_time, EventKind::MaxTime));

            let Some(event) = events::next_event(&candidates) else {
                break;
            };
            let dt = (event.time - self.time).max(0.0);
            self.tracker.advance(&self.network, dt)?;
            self.time = event.time;

            match event.kind {
                EventKind::BoundaryArrival { .. } => {
                    let merges = self.tracker.process_arrivals(&self.network)?;
                    for candidate in merges {
                        let (a, b) = candidate.droplet_ids;
                        let (fluid_a, volume_a, fluid_b, volume_b) = {
                            let da = self.tracker.droplet(a)?;
                            let db = self.tracker.droplet(b)?;
                            (da.fluid_id, da.volume, db.fluid_id, db.volume)
                        };
                        let mixed = mix_fluids(
                            self.fluids.len(),
                            &self.fluids[fluid_a],
                            volume_a,
                            &self.fluids[fluid_b],
                            volume_b,
                        );
                        self.fluids.push(mixed);
                        let merged_fluid = self.fluids.len() - 1;
                        self.tracker
                            .merge_droplets(&self.network, candidate, merged_fluid)?;
                    }
                    self.tracker.release_waits(&self.network)?;
                }
                EventKind::DropletSplit { droplet_id } => {
                    self.tracker.split_droplet(&self.network, droplet_id)?;
                }
                EventKind::DropletInjection { injection_id } => {
                    let injection = self.droplet_injections[injection_id].clone();
                    self.tracker.inject(
                        &self.network,
                        injection.droplet_id,
                        injection.channel_id,
                        injection.position,
                    )?;
                    self.droplet_injections[injection_id].performed = true;
                }
                EventKind::MaxTime => {
                    self.tracker
                        .update_resistances(&mut self.network, model, &self.fluids)?;
                    self.solve_flow(scheme)?;
                    self.capture_state();
                    break;
                }
                _ => {}
            }

            // The event changed the hydraulics; re-solve before recording.
            self.tracker
                .update_resistances(&mut self.network, model, &self.fluids)?;
            self.solve_flow(scheme)?;
            self.tracker.update_boundary_flows(&self.network)?;
            self.capture_state();

            if self.time >= self.time_config.max_end_time {
                break;
            }
        }
        Ok(())
    }

    /// Fixed-step loop of the mixing platform with write and injection
    /// events
    fn simulate_mixing(&mut self, scheme: &mut Option<HybridScheme>) -> Result<()> {
        if self.mixing_model.is_none() {
            self.set_instantaneous_mixing();
        }
        let phase = self.fluid(self.continuous_phase.unwrap_or(0))?.clone();

        // Mixtures do not feed back into the hydraulics; one solve suffices.
        self.solve_flow(scheme)?;
        self.capture_state();

        let mut next_write = self.time_config.write_interval;
        loop {
            let mut candidates = Vec::new();
            for injection in &self.mixture_injections {
                if !injection.performed {
                    candidates.push(Event::new(
                        injection.time,
                        EventKind::MixtureInjection {
                            injection_id: injection.id,
                        },
                    ));
                }
            }
            if !self.time_config.event_based_writing {
                candidates.push(Event::new(next_write, EventKind::Write));
            }
            candidates.push(Event::new(self.time_config.max_end_time, EventKind::MaxTime));
            let Some(event) = events::next_event(&candidates) else {
                break;
            };

            // March to the event time in fixed steps.
            let mut model = self.mixing_model.take().expect("mixing model configured");
            while self.time < event.time - 1e-15 {
                let dt = self.time_config.time_step.min(event.time - self.time);
                model.update(&self.network, &mut self.store, dt)?;
                membrane::transfer(
                    &self.network,
                    &mut self.store,
                    model.as_mut(),
                    &mut self.tanks,
                    phase.viscosity,
                    dt,
                )?;
                self.time += dt;
            }
            self.mixing_model = Some(model);

            match event.kind {
                EventKind::MixtureInjection { injection_id } => {
                    let injection = self.mixture_injections[injection_id].clone();
                    if let Some(model) = &mut self.mixing_model {
                        model.inject(injection.channel_id, injection.mixture_id, injection.permanent);
                    }
                    self.mixture_injections[injection_id].performed = true;
                    if self.time_config.event_based_writing {
                        self.capture_state();
                    }
                }
                EventKind::Write => {
                    self.capture_state();
                    next_write += self.time_config.write_interval;
                }
                EventKind::MaxTime => {
                    self.capture_state();
                    break;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Print the pressures and flow rates of the final state
    pub fn print_results(&self) {
        let Some(state) = self.result.last_state() else {
            println!("no simulation results");
            return;
        };
        println!("state {} at t = {:.6} s", state.id, state.time);
        let mut nodes: Vec<_> = state.pressures.iter().collect();
        nodes.sort_by_key(|(id, _)| **id);
        for (id, pressure) in nodes {
            println!("  node {id}: {pressure:.6} Pa");
        }
        let mut edges: Vec<_> = state.flow_rates.iter().collect();
        edges.sort_by_key(|(id, _)| **id);
        for (id, flow) in edges {
            println!("  edge {id}: {flow:.6e} m^3/s");
        }
    }
}
