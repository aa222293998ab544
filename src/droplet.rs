//! droplet.rs - Droplet Boundary Tracking
//!
//! Droplets are discrete volumes of a second phase advected through the
//! channels. Each droplet is represented by one or two boundaries (positions
//! along a channel) plus the list of channels it occupies completely.
//! Boundaries move with the slip-corrected mean channel velocity; when a
//! boundary reaches a channel end it emits an event at the node, where the
//! droplet picks the strongest outflow, waits on occupied channels, merges
//! with droplets arriving simultaneously, sinks, or gets trapped. A droplet
//! whose boundaries end up in two distinct downstream channels of one node
//! is split into two children proportional to the downstream flow shares.

use crate::error::{NetworkError, NetworkResult};
use crate::network::Network;
use crate::resistance::ResistanceModel;
use crate::simulation::fluid::Fluid;
use std::collections::HashMap;

/// Slip factor of droplet boundaries relative to the mean channel velocity
pub const SLIP_FACTOR: f64 = 1.28;

/// Positions closer to a channel end than this count as arrived
const END_TOLERANCE: f64 = 1e-9;

/// Lifecycle state of a droplet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropletState {
    /// Scheduled for injection, not yet in the network
    Injection,
    /// Flowing through the network
    Network,
    /// Stuck at a node whose outlets carry no flow
    Trapped,
    /// Left the network through a sink node
    Sink,
}

/// State of a single droplet boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryState {
    /// Moving freely
    Normal,
    /// Waiting for the node occupation to clear before entering
    WaitInflow,
    /// Waiting for a blocking droplet to vacate the selected channel
    WaitOutflow,
}

/// One interface of a droplet inside a channel
#[derive(Debug, Clone)]
pub struct DropletBoundary {
    /// Channel the boundary lies in
    pub channel_id: usize,
    /// Position along the channel in [0, 1], measured from node A
    pub position: f64,
    /// True if the droplet body extends towards node A of the channel
    pub volume_towards_a: bool,
    /// Flow rate governing the boundary motion; negative values move the
    /// boundary towards the droplet interior
    pub flow_rate: f64,
    /// Wait state of the boundary
    pub state: BoundaryState,
}

impl DropletBoundary {
    /// The node the droplet body touches through this boundary
    pub fn reference_node(&self, network: &Network) -> NetworkResult<usize> {
        let edge = network.edge(self.channel_id)?;
        Ok(if self.volume_towards_a {
            edge.node_a
        } else {
            edge.node_b
        })
    }

    /// The node on the far side of the boundary
    pub fn opposite_node(&self, network: &Network) -> NetworkResult<usize> {
        let edge = network.edge(self.channel_id)?;
        Ok(if self.volume_towards_a {
            edge.node_b
        } else {
            edge.node_a
        })
    }

    /// Length fraction of the channel covered between the boundary and its
    /// reference node
    pub fn covered_fraction(&self) -> f64 {
        if self.volume_towards_a {
            self.position
        } else {
            1.0 - self.position
        }
    }

    /// Whether the boundary leads the droplet (moves away from the body)
    fn is_leading(&self, channel_flow: f64) -> bool {
        (channel_flow >= 0.0) == self.volume_towards_a
    }
}

/// A discrete second-phase volume in the network
#[derive(Debug, Clone)]
pub struct Droplet {
    /// Unique identifier of the droplet
    pub id: usize,
    /// Fluid the droplet consists of
    pub fluid_id: usize,
    /// Volume in m^3
    pub volume: f64,
    /// Lifecycle state
    pub state: DropletState,
    /// The boundaries delimiting the droplet; usually one or two, briefly
    /// more right after a merge
    pub boundaries: Vec<DropletBoundary>,
    /// Channels completely filled by the droplet
    pub occupied_channels: Vec<usize>,
    /// Droplets this droplet was merged from
    pub merged_from: Vec<usize>,
}

impl Droplet {
    /// Whether the droplet has boundaries in two distinct channels
    pub fn is_at_bifurcation(&self) -> bool {
        self.boundaries.len() == 2 && self.boundaries[0].channel_id != self.boundaries[1].channel_id
    }

    /// Whether the droplet lies inside a single channel
    pub fn is_inside_single_channel(&self) -> bool {
        self.occupied_channels.is_empty()
            && self.boundaries.len() == 2
            && self.boundaries[0].channel_id == self.boundaries[1].channel_id
    }

    /// Length fraction the droplet covers of the given channel
    pub fn fraction_of_channel(&self, channel_id: usize) -> f64 {
        if self.occupied_channels.contains(&channel_id) {
            return 1.0;
        }
        let in_channel: Vec<&DropletBoundary> = self
            .boundaries
            .iter()
            .filter(|b| b.channel_id == channel_id)
            .collect();
        match in_channel.len() {
            2 => (in_channel[0].position - in_channel[1].position).abs(),
            1 => in_channel[0].covered_fraction(),
            _ => 0.0,
        }
    }

    /// Volume of the droplet accounted for by boundaries and occupied
    /// channels, for invariant checks
    pub fn tracked_volume(&self, network: &Network) -> NetworkResult<f64> {
        let mut volume = 0.0;
        let mut seen: Vec<usize> = Vec::new();
        for boundary in &self.boundaries {
            if seen.contains(&boundary.channel_id) {
                continue;
            }
            seen.push(boundary.channel_id);
            let channel = network
                .edge(boundary.channel_id)?
                .as_channel()
                .ok_or_else(|| {
                    NetworkError::illegal_query(boundary.channel_id, "droplet boundary outside a channel")
                })?
                .clone();
            volume += self.fraction_of_channel(boundary.channel_id) * channel.volume();
        }
        for &channel_id in &self.occupied_channels {
            let channel = network
                .edge(channel_id)?
                .as_channel()
                .ok_or_else(|| {
                    NetworkError::illegal_query(channel_id, "occupied edge is not a channel")
                })?
                .clone();
            volume += channel.volume();
        }
        Ok(volume)
    }
}

/// A merge detected at a node: both droplets arrived simultaneously
#[derive(Debug, Clone, Copy)]
pub struct MergeCandidate {
    /// The node at which the boundaries met
    pub node_id: usize,
    /// The two droplets to merge
    pub droplet_ids: (usize, usize),
}

/// Owns the droplets of a simulation and advances their boundaries
#[derive(Debug, Clone, Default)]
pub struct DropletTracker {
    droplets: Vec<Droplet>,
}

impl DropletTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a droplet; returns its id
    pub fn add_droplet(&mut self, fluid_id: usize, volume: f64) -> usize {
        let id = self.droplets.len();
        self.droplets.push(Droplet {
            id,
            fluid_id,
            volume,
            state: DropletState::Injection,
            boundaries: Vec::new(),
            occupied_channels: Vec::new(),
            merged_from: Vec::new(),
        });
        id
    }

    /// Access a droplet
    pub fn droplet(&self, id: usize) -> NetworkResult<&Droplet> {
        self.droplets.get(id).ok_or(NetworkError::UnknownId {
            entity: "droplet",
            id,
        })
    }

    /// All droplets, including sunk and trapped ones
    pub fn droplets(&self) -> &[Droplet] {
        &self.droplets
    }

    /// Droplets currently inside the network
    pub fn active_droplets(&self) -> impl Iterator<Item = &Droplet> {
        self.droplets
            .iter()
            .filter(|d| d.state == DropletState::Network)
    }

    /// Place a droplet into a channel around the given position
    pub fn inject(
        &mut self,
        network: &Network,
        droplet_id: usize,
        channel_id: usize,
        position: f64,
    ) -> NetworkResult<()> {
        let channel = network
            .edge(channel_id)?
            .as_channel()
            .ok_or_else(|| NetworkError::illegal_query(channel_id, "droplets can only be injected into channels"))?
            .clone();
        let droplet = self
            .droplets
            .get_mut(droplet_id)
            .ok_or(NetworkError::UnknownId {
                entity: "droplet",
                id: droplet_id,
            })?;
        let half_length = droplet.volume / channel.volume() / 2.0;
        if position - half_length < 0.0 || position + half_length > 1.0 {
            return Err(NetworkError::invalid_geometry(format!(
                "droplet {droplet_id} does not fit into channel {channel_id} at position {position}"
            )));
        }
        droplet.boundaries = vec![
            DropletBoundary {
                channel_id,
                position: position - half_length,
                volume_towards_a: false,
                flow_rate: 0.0,
                state: BoundaryState::Normal,
            },
            DropletBoundary {
                channel_id,
                position: position + half_length,
                volume_towards_a: true,
                flow_rate: 0.0,
                state: BoundaryState::Normal,
            },
        ];
        droplet.state = DropletState::Network;
        Ok(())
    }

    /// Add the droplet resistance contributions to the channels
    pub fn update_resistances(
        &self,
        network: &mut Network,
        model: &dyn ResistanceModel,
        fluids: &[Fluid],
    ) -> NetworkResult<()> {
        let channel_ids: Vec<usize> = network
            .edges()
            .iter()
            .filter(|e| e.is_channel())
            .map(|e| e.id)
            .collect();
        let mut extra: HashMap<usize, f64> = channel_ids.iter().map(|&c| (c, 0.0)).collect();
        for droplet in self.active_droplets() {
            let viscosity = fluids
                .get(droplet.fluid_id)
                .map(|f| f.viscosity)
                .unwrap_or(model.viscosity());
            let mut touched: Vec<usize> = droplet
                .boundaries
                .iter()
                .map(|b| b.channel_id)
                .chain(droplet.occupied_channels.iter().copied())
                .collect();
            touched.sort_unstable();
            touched.dedup();
            for channel_id in touched {
                let fraction = droplet.fraction_of_channel(channel_id);
                if fraction <= 0.0 {
                    continue;
                }
                let channel = network
                    .edge(channel_id)?
                    .as_channel()
                    .expect("droplets only touch channels")
                    .clone();
                *extra.entry(channel_id).or_insert(0.0) +=
                    model.droplet_resistance(&channel, fraction, viscosity)?;
            }
        }
        for (channel_id, resistance) in extra {
            if let Some(channel) = network.edge_mut(channel_id)?.as_channel_mut() {
                channel.droplet_resistance = resistance;
            }
        }
        Ok(())
    }

    /// Update the boundary flow rates from the channel flow field. Droplets
    /// spanning a node move all boundaries with the average of their channel
    /// flow magnitudes, which keeps the droplet volume constant.
    pub fn update_boundary_flows(&mut self, network: &Network) -> NetworkResult<()> {
        for droplet in &mut self.droplets {
            if droplet.state != DropletState::Network {
                continue;
            }
            let channel_flows: Vec<f64> = droplet
                .boundaries
                .iter()
                .map(|b| network.edge(b.channel_id).map(|e| e.raw_flow_rate()))
                .collect::<Result<_, _>>()?;
            let magnitude = if droplet.is_inside_single_channel() {
                channel_flows.first().map(|q| q.abs()).unwrap_or(0.0)
            } else {
                let sum: f64 = channel_flows.iter().map(|q| q.abs()).sum();
                sum / channel_flows.len().max(1) as f64
            };
            for (boundary, &q) in droplet.boundaries.iter_mut().zip(&channel_flows) {
                if boundary.state != BoundaryState::Normal {
                    boundary.flow_rate = 0.0;
                    continue;
                }
                boundary.flow_rate = magnitude * q.signum();
            }
        }
        Ok(())
    }

    /// Time until the next boundary reaches a channel end and the droplet it
    /// belongs to, if any boundary is moving. Droplets whose boundary
    /// channels all carry zero flow are trapped.
    pub fn time_to_next_event(&mut self, network: &Network) -> NetworkResult<Option<(f64, usize)>> {
        let mut next: Option<(f64, usize)> = None;
        for droplet in &mut self.droplets {
            if droplet.state != DropletState::Network {
                continue;
            }
            let all_still = droplet
                .boundaries
                .iter()
                .all(|b| b.flow_rate == 0.0 && b.state == BoundaryState::Normal);
            if all_still && !droplet.boundaries.is_empty() {
                droplet.state = DropletState::Trapped;
                continue;
            }
            for boundary in &droplet.boundaries {
                if boundary.state != BoundaryState::Normal || boundary.flow_rate == 0.0 {
                    continue;
                }
                let channel = network
                    .edge(boundary.channel_id)?
                    .as_channel()
                    .expect("boundaries live in channels")
                    .clone();
                let speed =
                    SLIP_FACTOR * boundary.flow_rate.abs() / channel.area() / channel.length;
                let distance = if boundary.flow_rate >= 0.0 {
                    1.0 - boundary.position
                } else {
                    boundary.position
                };
                let time = distance / speed;
                let closer = next.map_or(true, |(t, _)| time < t);
                if closer {
                    next = Some((time, droplet.id));
                }
            }
        }
        Ok(next)
    }

    /// Move every boundary by the given time step
    pub fn advance(&mut self, network: &Network, dt: f64) -> NetworkResult<()> {
        for droplet in &mut self.droplets {
            if droplet.state != DropletState::Network {
                continue;
            }
            for boundary in &mut droplet.boundaries {
                if boundary.state != BoundaryState::Normal || boundary.flow_rate == 0.0 {
                    continue;
                }
                let channel = network
                    .edge(boundary.channel_id)?
                    .as_channel()
                    .expect("boundaries live in channels")
                    .clone();
                let speed =
                    SLIP_FACTOR * boundary.flow_rate.abs() / channel.area() / channel.length;
                let delta = speed * dt * boundary.flow_rate.signum();
                boundary.position = (boundary.position + delta).clamp(0.0, 1.0);
            }
        }
        Ok(())
    }

    /// Handle all boundaries that reached a channel end. Returns merge
    /// candidates for simultaneous arrivals; the caller mixes the fluids and
    /// completes the merge.
    pub fn process_arrivals(&mut self, network: &Network) -> NetworkResult<Vec<MergeCandidate>> {
        // Collect arrivals: (droplet, boundary index, node, leading?).
        let mut arrivals: Vec<(usize, usize, usize, bool)> = Vec::new();
        for droplet in &self.droplets {
            if droplet.state != DropletState::Network {
                continue;
            }
            for (b_index, boundary) in droplet.boundaries.iter().enumerate() {
                if boundary.state != BoundaryState::Normal {
                    continue;
                }
                let at_end = boundary.position <= END_TOLERANCE
                    || boundary.position >= 1.0 - END_TOLERANCE;
                if !at_end {
                    continue;
                }
                let edge = network.edge(boundary.channel_id)?;
                let arrived_node = if boundary.position >= 1.0 - END_TOLERANCE {
                    edge.node_b
                } else {
                    edge.node_a
                };
                // Only count boundaries that were moving towards this end.
                let moving_to_b = boundary.flow_rate > 0.0;
                if (arrived_node == edge.node_b) != moving_to_b {
                    continue;
                }
                let leading = boundary.is_leading(edge.raw_flow_rate());
                arrivals.push((droplet.id, b_index, arrived_node, leading));
            }
        }

        // Simultaneous leading arrivals of two droplets at one node merge.
        let mut merges: Vec<MergeCandidate> = Vec::new();
        for i in 0..arrivals.len() {
            for j in (i + 1)..arrivals.len() {
                let (d1, _, n1, lead1) = arrivals[i];
                let (d2, _, n2, lead2) = arrivals[j];
                if n1 == n2 && d1 != d2 && lead1 && lead2 {
                    merges.push(MergeCandidate {
                        node_id: n1,
                        droplet_ids: (d1, d2),
                    });
                }
            }
        }
        let merging: Vec<usize> = merges
            .iter()
            .flat_map(|m| [m.droplet_ids.0, m.droplet_ids.1])
            .collect();

        // Deterministic order: ascending droplet id; boundaries of one
        // droplet from the back so index-shifting removals stay valid.
        arrivals.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
        for (droplet_id, b_index, node_id, leading) in arrivals {
            if merging.contains(&droplet_id) {
                continue;
            }
            if leading {
                self.handle_leading_arrival(network, droplet_id, b_index, node_id)?;
            } else {
                self.handle_trailing_arrival(network, droplet_id, b_index, node_id)?;
            }
        }
        Ok(merges)
    }

    fn handle_leading_arrival(
        &mut self,
        network: &Network,
        droplet_id: usize,
        b_index: usize,
        node_id: usize,
    ) -> NetworkResult<()> {
        let node = network.node(node_id)?.clone();
        let own_channels: Vec<usize> = {
            let droplet = &self.droplets[droplet_id];
            droplet
                .boundaries
                .iter()
                .map(|b| b.channel_id)
                .chain(droplet.occupied_channels.iter().copied())
                .collect()
        };

        // Candidate outlets: channels carrying flow away from the node, not
        // already part of this droplet.
        let mut candidates: Vec<(usize, f64)> = Vec::new();
        for edge in network.channels_at(node_id) {
            if own_channels.contains(&edge.id) {
                continue;
            }
            let q = edge.raw_flow_rate();
            let outgoing = (edge.node_a == node_id && q > 0.0) || (edge.node_b == node_id && q < 0.0);
            if outgoing {
                candidates.push((edge.id, q.abs()));
            }
        }
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let Some(&(target, _)) = candidates.first() else {
            // No outlet carries flow away from this node.
            let droplet = &mut self.droplets[droplet_id];
            if node.sink {
                droplet.state = DropletState::Sink;
            } else {
                droplet.state = DropletState::Trapped;
            }
            return Ok(());
        };

        // A sink node absorbs the droplet even when flow continues past it.
        if node.sink {
            self.droplets[droplet_id].state = DropletState::Sink;
            return Ok(());
        }

        // Entering a channel fully occupied by another droplet blocks.
        let blocked = self
            .droplets
            .iter()
            .any(|d| d.id != droplet_id && d.state == DropletState::Network && d.occupied_channels.contains(&target));
        if blocked {
            self.droplets[droplet_id].boundaries[b_index].state = BoundaryState::WaitOutflow;
            return Ok(());
        }

        let old_channel = self.droplets[droplet_id].boundaries[b_index].channel_id;
        let target_edge = network.edge(target)?;
        let enters_at_a = target_edge.node_a == node_id;

        let droplet = &mut self.droplets[droplet_id];
        let other_in_same_channel = droplet
            .boundaries
            .iter()
            .enumerate()
            .any(|(i, b)| i != b_index && b.channel_id == old_channel);
        if !other_in_same_channel {
            // The leading boundary traversed the whole channel while the
            // body extends further back; the channel is now fully occupied.
            droplet.occupied_channels.push(old_channel);
        }
        let boundary = &mut droplet.boundaries[b_index];
        boundary.channel_id = target;
        boundary.position = if enters_at_a { 0.0 } else { 1.0 };
        boundary.volume_towards_a = enters_at_a;
        boundary.flow_rate = 0.0;
        Ok(())
    }

    fn handle_trailing_arrival(
        &mut self,
        network: &Network,
        droplet_id: usize,
        b_index: usize,
        node_id: usize,
    ) -> NetworkResult<()> {
        // The body continues into an adjacent droplet channel; follow it.
        let old_channel = self.droplets[droplet_id].boundaries[b_index].channel_id;
        let continuation: Option<usize> = {
            let droplet = &self.droplets[droplet_id];
            let mut body: Vec<usize> = droplet
                .occupied_channels
                .iter()
                .copied()
                .chain(
                    droplet
                        .boundaries
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != b_index)
                        .map(|(_, b)| b.channel_id),
                )
                .collect();
            body.sort_unstable();
            body.dedup();
            body.into_iter()
                .filter(|&c| c != old_channel)
                .find(|&c| {
                    network
                        .edge(c)
                        .map(|e| e.node_a == node_id || e.node_b == node_id)
                        .unwrap_or(false)
                })
        };
        let Some(next_channel) = continuation else {
            // The body ends here; the boundary has nothing left to delimit.
            self.droplets[droplet_id].boundaries.remove(b_index);
            return Ok(());
        };

        // A body longer than its branch cannot retreat: the continuation is
        // still completely filled by this droplet. While the junction keeps
        // feeding another outlet, the rear interface lands there instead and
        // the droplet is about to be torn apart (see
        // [`DropletTracker::split_droplet`]).
        if self.droplets[droplet_id]
            .occupied_channels
            .contains(&next_channel)
        {
            let own: Vec<usize> = {
                let droplet = &self.droplets[droplet_id];
                droplet
                    .boundaries
                    .iter()
                    .map(|b| b.channel_id)
                    .chain(droplet.occupied_channels.iter().copied())
                    .collect()
            };
            let mut alternates: Vec<(usize, f64)> = Vec::new();
            for edge in network.channels_at(node_id) {
                if own.contains(&edge.id) {
                    continue;
                }
                let q = edge.raw_flow_rate();
                let outgoing =
                    (edge.node_a == node_id && q > 0.0) || (edge.node_b == node_id && q < 0.0);
                let foreign = self.droplets.iter().any(|d| {
                    d.id != droplet_id
                        && d.state == DropletState::Network
                        && d.occupied_channels.contains(&edge.id)
                });
                if outgoing && !foreign {
                    alternates.push((edge.id, q.abs()));
                }
            }
            alternates.sort_by(|x, y| y.1.total_cmp(&x.1).then(x.0.cmp(&y.0)));
            if let Some(&(target, _)) = alternates.first() {
                let enters_at_a = network.edge(target)?.node_a == node_id;
                let boundary = &mut self.droplets[droplet_id].boundaries[b_index];
                boundary.channel_id = target;
                boundary.position = if enters_at_a { 0.0 } else { 1.0 };
                // The landed interface is the front of the wedge growing
                // into the outlet; its matter stays towards the junction.
                boundary.volume_towards_a = enters_at_a;
                boundary.flow_rate = 0.0;
                return Ok(());
            }
        }

        // Waiting applies when the continuation is still blocked by a
        // foreign droplet sitting on the node.
        let node_occupied = self.droplets.iter().any(|d| {
            d.id != droplet_id
                && d.state == DropletState::Network
                && d.occupied_channels.contains(&next_channel)
        });
        if node_occupied {
            self.droplets[droplet_id].boundaries[b_index].state = BoundaryState::WaitInflow;
            return Ok(());
        }

        let enters_at_a = network.edge(next_channel)?.node_a == node_id;
        let droplet = &mut self.droplets[droplet_id];
        droplet.occupied_channels.retain(|&c| c != next_channel);
        let boundary = &mut droplet.boundaries[b_index];
        boundary.channel_id = next_channel;
        boundary.position = if enters_at_a { 0.0 } else { 1.0 };
        // The body lies ahead of a trailing boundary.
        boundary.volume_towards_a = !enters_at_a;
        boundary.flow_rate = 0.0;
        Ok(())
    }

    /// Release wait states whose blocker has moved on
    pub fn release_waits(&mut self, network: &Network) -> NetworkResult<()> {
        let occupied: Vec<(usize, Vec<usize>)> = self
            .droplets
            .iter()
            .filter(|d| d.state == DropletState::Network)
            .map(|d| (d.id, d.occupied_channels.clone()))
            .collect();
        for droplet in &mut self.droplets {
            if droplet.state != DropletState::Network {
                continue;
            }
            for boundary in &mut droplet.boundaries {
                if boundary.state == BoundaryState::Normal {
                    continue;
                }
                let node = boundary.opposite_node(network)?;
                let blocked = occupied.iter().any(|(other, channels)| {
                    *other != droplet.id
                        && channels.iter().any(|&c| {
                            network
                                .edge(c)
                                .map(|e| e.node_a == node || e.node_b == node)
                                .unwrap_or(false)
                        })
                });
                if !blocked {
                    boundary.state = BoundaryState::Normal;
                }
            }
        }
        Ok(())
    }

    /// Complete a merge: the combined droplet takes over the outer
    /// boundaries of its parents and their occupied channels, and grows a
    /// fresh head into the strongest outflow of the meeting node. The
    /// parents leave the network.
    pub fn merge_droplets(
        &mut self,
        network: &Network,
        candidate: MergeCandidate,
        mixed_fluid_id: usize,
    ) -> NetworkResult<usize> {
        let (a, b) = candidate.droplet_ids;
        let volume = self.droplet(a)?.volume + self.droplet(b)?.volume;
        let merged_id = self.add_droplet(mixed_fluid_id, volume);

        let mut boundaries = Vec::new();
        let mut occupied = Vec::new();
        let mut parent_channels = Vec::new();
        for &parent in [a, b].iter() {
            let droplet = &self.droplets[parent];
            for boundary in &droplet.boundaries {
                parent_channels.push(boundary.channel_id);
                let at_meeting_point = boundary.position <= END_TOLERANCE
                    || boundary.position >= 1.0 - END_TOLERANCE;
                if !at_meeting_point {
                    boundaries.push(boundary.clone());
                }
            }
            occupied.extend(droplet.occupied_channels.iter().copied());
            parent_channels.extend(droplet.occupied_channels.iter().copied());
        }
        occupied.sort_unstable();
        occupied.dedup();

        // Re-anchor the front in the strongest outflow of the node.
        let mut candidates: Vec<(usize, f64)> = Vec::new();
        for edge in network.channels_at(candidate.node_id) {
            if parent_channels.contains(&edge.id) {
                continue;
            }
            let q = edge.raw_flow_rate();
            let outgoing = (edge.node_a == candidate.node_id && q > 0.0)
                || (edge.node_b == candidate.node_id && q < 0.0);
            if outgoing {
                candidates.push((edge.id, q.abs()));
            }
        }
        candidates.sort_by(|x, y| y.1.total_cmp(&x.1).then(x.0.cmp(&y.0)));
        if let Some(&(target, _)) = candidates.first() {
            let enters_at_a = network.edge(target)?.node_a == candidate.node_id;
            boundaries.push(DropletBoundary {
                channel_id: target,
                position: if enters_at_a { 0.0 } else { 1.0 },
                volume_towards_a: enters_at_a,
                flow_rate: 0.0,
                state: BoundaryState::Normal,
            });
        }

        let merged = &mut self.droplets[merged_id];
        merged.state = DropletState::Network;
        merged.boundaries = boundaries;
        merged.occupied_channels = occupied;
        merged.merged_from = vec![a, b];

        for parent in [a, b] {
            self.droplets[parent].state = DropletState::Sink;
            self.droplets[parent].boundaries.clear();
            self.droplets[parent].occupied_channels.clear();
        }
        Ok(merged_id)
    }

    /// Where a droplet is being forced apart: a boundary together with a
    /// second droplet channel (another boundary's channel or a fully
    /// occupied one), both carrying flow away from the node they share
    fn split_site(
        &self,
        network: &Network,
        droplet: &Droplet,
    ) -> NetworkResult<Option<(usize, usize, usize)>> {
        for (b_index, boundary) in droplet.boundaries.iter().enumerate() {
            let mut others: Vec<usize> = droplet
                .boundaries
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != b_index)
                .map(|(_, b)| b.channel_id)
                .chain(droplet.occupied_channels.iter().copied())
                .collect();
            others.sort_unstable();
            others.dedup();
            for other in others {
                if other == boundary.channel_id {
                    continue;
                }
                let Some(node) = shared_node(network, boundary.channel_id, other)? else {
                    continue;
                };
                if flows_away(network, boundary.channel_id, node)?
                    && flows_away(network, other, node)?
                {
                    return Ok(Some((b_index, other, node)));
                }
            }
        }
        Ok(None)
    }

    /// Droplets whose boundaries have landed in two distinct outgoing
    /// channels of one node; each must be split before it moves on
    pub fn find_split_candidates(&self, network: &Network) -> NetworkResult<Vec<usize>> {
        let mut candidates = Vec::new();
        for droplet in self.active_droplets() {
            if droplet
                .boundaries
                .iter()
                .any(|b| b.state != BoundaryState::Normal)
            {
                continue;
            }
            if self.split_site(network, droplet)?.is_some() {
                candidates.push(droplet.id);
            }
        }
        Ok(candidates)
    }

    /// Lay a fresh child slug at the `node_id` entry of a channel,
    /// extending downstream
    fn lay_slug_child(
        &mut self,
        network: &Network,
        fluid_id: usize,
        volume: f64,
        channel_id: usize,
        node_id: usize,
    ) -> NetworkResult<usize> {
        let edge = network.edge(channel_id)?;
        let channel = edge
            .as_channel()
            .expect("children are laid into channels")
            .clone();
        let enters_at_a = edge.node_a == node_id;
        let length_fraction = (volume / channel.volume()).min(1.0);
        let (rear_position, front_position) = if enters_at_a {
            (0.0, length_fraction)
        } else {
            (1.0, 1.0 - length_fraction)
        };
        let rear = DropletBoundary {
            channel_id,
            position: rear_position,
            volume_towards_a: !enters_at_a,
            flow_rate: 0.0,
            state: BoundaryState::Normal,
        };
        let front = DropletBoundary {
            channel_id,
            position: front_position,
            volume_towards_a: enters_at_a,
            flow_rate: 0.0,
            state: BoundaryState::Normal,
        };
        let child_id = self.add_droplet(fluid_id, volume);
        let child = &mut self.droplets[child_id];
        child.state = DropletState::Network;
        child.boundaries = vec![rear, front];
        Ok(child_id)
    }

    /// Split a droplet whose boundaries were forced into two distinct
    /// downstream channels. The children's volumes are proportional to the
    /// downstream flow shares; the parent leaves the network.
    pub fn split_droplet(
        &mut self,
        network: &Network,
        droplet_id: usize,
    ) -> NetworkResult<(usize, usize)> {
        let droplet = self.droplet(droplet_id)?.clone();
        let Some((b_index, other_channel, node_id)) = self.split_site(network, &droplet)? else {
            return Err(NetworkError::invalid_geometry(format!(
                "droplet {droplet_id} has no boundaries in two distinct downstream channels"
            )));
        };
        let boundary = droplet.boundaries[b_index].clone();
        let q_b = network.edge(boundary.channel_id)?.raw_flow_rate().abs();
        let q_o = network.edge(other_channel)?.raw_flow_rate().abs();
        let total = q_b + q_o;
        let share = if total > 0.0 { q_b / total } else { 0.5 };
        let volume_b = droplet.volume * share;
        let volume_o = droplet.volume - volume_b;

        let first = self.lay_slug_child(
            network,
            droplet.fluid_id,
            volume_b,
            boundary.channel_id,
            node_id,
        )?;

        // The remainder: either the opposite boundary alone, or the body
        // that continues through the fully occupied channel.
        let second = if droplet.occupied_channels.contains(&other_channel) {
            let rest: Vec<DropletBoundary> = droplet
                .boundaries
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != b_index)
                .map(|(_, b)| b.clone())
                .collect();
            let channel = network
                .edge(other_channel)?
                .as_channel()
                .expect("occupied edges are channels")
                .clone();
            // Volume the rest of the body already holds past the occupied
            // channel.
            let mut beyond = 0.0;
            let mut seen: Vec<usize> = Vec::new();
            for b in &rest {
                if seen.contains(&b.channel_id) {
                    continue;
                }
                seen.push(b.channel_id);
                let downstream = network
                    .edge(b.channel_id)?
                    .as_channel()
                    .expect("boundaries live in channels")
                    .clone();
                let pair: Vec<&DropletBoundary> =
                    rest.iter().filter(|x| x.channel_id == b.channel_id).collect();
                let fraction = if pair.len() == 2 {
                    (pair[0].position - pair[1].position).abs()
                } else {
                    pair[0].covered_fraction()
                };
                beyond += fraction * downstream.volume();
            }
            let needed = ((volume_o - beyond) / channel.volume()).clamp(0.0, 1.0);
            let enters_at_a = network.edge(other_channel)?.node_a == node_id;
            let rear = DropletBoundary {
                channel_id: other_channel,
                position: if enters_at_a { 1.0 - needed } else { needed },
                volume_towards_a: !enters_at_a,
                flow_rate: 0.0,
                state: BoundaryState::Normal,
            };
            let mut occupied = droplet.occupied_channels.clone();
            occupied.retain(|&c| c != other_channel);
            let child_id = self.add_droplet(droplet.fluid_id, volume_o);
            let child = &mut self.droplets[child_id];
            child.state = DropletState::Network;
            child.boundaries = rest;
            child.boundaries.push(rear);
            child.occupied_channels = occupied;
            child_id
        } else {
            let other_boundary = droplet
                .boundaries
                .iter()
                .find(|b| b.channel_id == other_channel)
                .expect("the split site references a boundary channel")
                .clone();
            self.lay_slug_child(
                network,
                droplet.fluid_id,
                volume_o,
                other_boundary.channel_id,
                node_id,
            )?
        };

        let parent = &mut self.droplets[droplet_id];
        parent.state = DropletState::Sink;
        parent.boundaries.clear();
        parent.occupied_channels.clear();
        Ok((first, second))
    }
}

/// The node two channels have in common, if any
fn shared_node(network: &Network, first: usize, second: usize) -> NetworkResult<Option<usize>> {
    let a = network.edge(first)?;
    let b = network.edge(second)?;
    for node in [a.node_a, a.node_b] {
        if node == b.node_a || node == b.node_b {
            return Ok(Some(node));
        }
    }
    Ok(None)
}

/// Whether a channel carries flow away from the given node
fn flows_away(network: &Network, channel_id: usize, node_id: usize) -> NetworkResult<bool> {
    let edge = network.edge(channel_id)?;
    let q = edge.raw_flow_rate();
    Ok((edge.node_a == node_id && q > 0.0) || (edge.node_b == node_id && q < 0.0))
}
