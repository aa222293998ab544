//! network/edge.rs - Edges of the Network Graph
//!
//! Every connection between two nodes is an edge. The concrete behavior of
//! an edge is captured by a tagged sum: channels conduct flow through a
//! hydraulic resistance, pumps impose a pressure difference or a flow rate,
//! membranes mediate species transfer towards tanks, tanks hold mixture
//! state without hydraulic flow, and CFD ports stand in for the interior of
//! a CFD module during nodal analysis.

use crate::error::{NetworkError, NetworkResult};

/// Cross-section of a channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CrossSection {
    /// Rectangular cross-section given by width and height in m
    Rectangular { width: f64, height: f64 },
    /// Circular cross-section given by radius in m
    Circular { radius: f64 },
}

impl CrossSection {
    /// Cross-sectional area in m^2
    pub fn area(&self) -> f64 {
        match *self {
            CrossSection::Rectangular { width, height } => width * height,
            CrossSection::Circular { radius } => std::f64::consts::PI * radius * radius,
        }
    }

    /// Validate that all dimensions are positive and finite
    pub fn validate(&self) -> NetworkResult<()> {
        let ok = match *self {
            CrossSection::Rectangular { width, height } => {
                width > 0.0 && height > 0.0 && width.is_finite() && height.is_finite()
            }
            CrossSection::Circular { radius } => radius > 0.0 && radius.is_finite(),
        };
        if ok {
            Ok(())
        } else {
            Err(NetworkError::invalid_geometry(format!(
                "channel cross-section {self:?} must have positive, finite dimensions"
            )))
        }
    }
}

/// A channel conducting flow between two nodes
#[derive(Debug, Clone)]
pub struct Channel {
    /// Cross-section of the channel
    pub cross_section: CrossSection,
    /// Length of the channel in m
    pub length: f64,
    /// Resistance of the empty channel in Pa s/m^3, set by the resistance model
    pub resistance: f64,
    /// Additional resistance contributed by droplets currently in the channel
    pub droplet_resistance: f64,
}

impl Channel {
    /// Total hydraulic resistance including droplet contributions
    pub fn total_resistance(&self) -> f64 {
        self.resistance + self.droplet_resistance
    }

    /// Cross-sectional area in m^2
    pub fn area(&self) -> f64 {
        self.cross_section.area()
    }

    /// Volume of the channel in m^3
    pub fn volume(&self) -> f64 {
        self.area() * self.length
    }

    /// Width of the cross-section; the diameter for circular channels
    pub fn width(&self) -> f64 {
        match self.cross_section {
            CrossSection::Rectangular { width, .. } => width,
            CrossSection::Circular { radius } => 2.0 * radius,
        }
    }

    /// Height of the cross-section; the diameter for circular channels
    pub fn height(&self) -> f64 {
        match self.cross_section {
            CrossSection::Rectangular { height, .. } => height,
            CrossSection::Circular { radius } => 2.0 * radius,
        }
    }
}

/// A porous membrane between a channel and a tank
#[derive(Debug, Clone)]
pub struct Membrane {
    /// Width of the membrane in m
    pub width: f64,
    /// Height of the membrane in m
    pub height: f64,
    /// Length of the membrane in m
    pub length: f64,
    /// Radius of the pores in m
    pub pore_radius: f64,
    /// Porosity of the membrane, between 0.0 and 1.0
    pub porosity: f64,
    /// The channel edge this membrane is attached to, resolved at validation
    pub channel_id: Option<usize>,
    /// The tank edge this membrane is attached to, resolved at validation
    pub tank_id: Option<usize>,
}

impl Membrane {
    /// Contact area of the membrane in m^2
    pub fn area(&self) -> f64 {
        self.width * self.length
    }

    /// Number of pores over the given contact area in m^2
    pub fn pore_count(&self, area: f64) -> f64 {
        (self.porosity * area) / (std::f64::consts::PI * self.pore_radius * self.pore_radius)
    }
}

/// A reservoir holding mixture state without hydraulic flow
#[derive(Debug, Clone)]
pub struct Tank {
    /// Width of the tank in m
    pub width: f64,
    /// Height of the tank in m
    pub height: f64,
    /// Length of the tank in m
    pub length: f64,
}

impl Tank {
    /// Volume of the tank in m^3
    pub fn volume(&self) -> f64 {
        self.width * self.height * self.length
    }
}

/// The behavior of an edge
#[derive(Debug, Clone)]
pub enum EdgeKind {
    /// A channel with hydraulic resistance
    Channel(Channel),
    /// A pump imposing a fixed pressure difference in Pa
    PressurePump { pressure: f64 },
    /// A pump imposing a fixed volumetric flow rate in m^3/s
    FlowRatePump { flow_rate: f64 },
    /// A porous membrane towards a tank; hydraulically non-conductive
    Membrane(Membrane),
    /// A reservoir with mixture state but no flow
    Tank(Tank),
    /// A stand-in resistance for a path through a CFD module interior
    CfdPort { module_id: usize, resistance: f64 },
}

/// An edge between two nodes of the network
#[derive(Debug, Clone)]
pub struct Edge {
    /// Unique identifier of this edge
    pub id: usize,
    /// Node at one end of the edge
    pub node_a: usize,
    /// Node at the other end of the edge
    pub node_b: usize,
    /// Concrete behavior of the edge
    pub kind: EdgeKind,
    flow_rate: f64,
}

impl Edge {
    pub(crate) fn new(id: usize, node_a: usize, node_b: usize, kind: EdgeKind) -> Self {
        Self {
            id,
            node_a,
            node_b,
            kind,
            flow_rate: 0.0,
        }
    }

    /// The hydraulic resistance this edge contributes to nodal analysis.
    /// Pumps, membranes and tanks do not conduct.
    pub fn resistance(&self) -> Option<f64> {
        match &self.kind {
            EdgeKind::Channel(channel) => Some(channel.total_resistance()),
            EdgeKind::CfdPort { resistance, .. } => Some(*resistance),
            EdgeKind::PressurePump { .. }
            | EdgeKind::FlowRatePump { .. }
            | EdgeKind::Membrane(_)
            | EdgeKind::Tank(_) => None,
        }
    }

    /// Volumetric flow rate through the edge in m^3/s.
    /// Tanks carry no flow; querying them is an error.
    pub fn flow_rate(&self) -> NetworkResult<f64> {
        match &self.kind {
            EdgeKind::Tank(_) => Err(NetworkError::illegal_query(
                self.id,
                "tanks carry mixture state but no hydraulic flow",
            )),
            _ => Ok(self.flow_rate),
        }
    }

    /// Flow rate without the tank check, for solver-internal bookkeeping
    pub(crate) fn raw_flow_rate(&self) -> f64 {
        self.flow_rate
    }

    pub(crate) fn set_flow_rate(&mut self, flow_rate: f64) {
        self.flow_rate = flow_rate;
    }

    /// The node opposite to the given endpoint
    pub fn opposite(&self, node_id: usize) -> usize {
        if node_id == self.node_a {
            self.node_b
        } else {
            self.node_a
        }
    }

    /// Whether this edge is a channel
    pub fn is_channel(&self) -> bool {
        matches!(self.kind, EdgeKind::Channel(_))
    }

    /// Whether this edge is a pressure or flow-rate pump
    pub fn is_pump(&self) -> bool {
        matches!(
            self.kind,
            EdgeKind::PressurePump { .. } | EdgeKind::FlowRatePump { .. }
        )
    }

    /// The channel payload, if this edge is a channel
    pub fn as_channel(&self) -> Option<&Channel> {
        match &self.kind {
            EdgeKind::Channel(channel) => Some(channel),
            _ => None,
        }
    }

    /// Mutable channel payload, if this edge is a channel
    pub fn as_channel_mut(&mut self) -> Option<&mut Channel> {
        match &mut self.kind {
            EdgeKind::Channel(channel) => Some(channel),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangular_area() {
        let cs = CrossSection::Rectangular {
            width: 100e-6,
            height: 30e-6,
        };
        assert!((cs.area() - 3e-9).abs() < 1e-24);
    }

    #[test]
    fn rejects_non_positive_dimensions() {
        let cs = CrossSection::Rectangular {
            width: 0.0,
            height: 30e-6,
        };
        assert!(cs.validate().is_err());
        let cs = CrossSection::Circular { radius: -1e-6 };
        assert!(cs.validate().is_err());
    }

    #[test]
    fn tank_flow_rate_is_illegal() {
        let edge = Edge::new(
            0,
            0,
            1,
            EdgeKind::Tank(Tank {
                width: 1e-3,
                height: 1e-3,
                length: 1e-3,
            }),
        );
        assert!(edge.flow_rate().is_err());
    }
}
