//! network/module.rs - CFD Modules and Openings
//!
//! A CFD module is a rectangular sub-region of the network whose interior is
//! resolved by a lattice Boltzmann solver instead of the 1D abstraction.
//! Openings bind the module to the surrounding network: each opening pairs a
//! boundary node with a unit normal pointing into the fluid domain.

use crate::error::{NetworkError, NetworkResult};

/// Tolerance for the unit-length check of opening normals
const NORMAL_TOLERANCE: f64 = 1e-9;

/// Default opening height in m when none is given
const DEFAULT_OPENING_HEIGHT: f64 = 1e-4;

/// The interface between a CFD module and the 1D network at one node
#[derive(Debug, Clone)]
pub struct Opening {
    /// The network node this opening corresponds to
    pub node_id: usize,
    /// Unit normal pointing into the fluid domain
    pub normal: (f64, f64),
    /// The normal rotated 90 degrees counter-clockwise
    pub tangent: (f64, f64),
    /// Width of the opening in m
    pub width: f64,
    /// Height of the opening in m
    pub height: f64,
}

impl Opening {
    /// Create an opening with a validated unit normal
    pub fn new(node_id: usize, normal: (f64, f64), width: f64) -> NetworkResult<Self> {
        Self::with_height(node_id, normal, width, DEFAULT_OPENING_HEIGHT)
    }

    /// Create an opening with an explicit height
    pub fn with_height(
        node_id: usize,
        normal: (f64, f64),
        width: f64,
        height: f64,
    ) -> NetworkResult<Self> {
        let norm = (normal.0 * normal.0 + normal.1 * normal.1).sqrt();
        if (norm - 1.0).abs() > NORMAL_TOLERANCE {
            return Err(NetworkError::invalid_geometry(format!(
                "opening normal ({}, {}) at node {node_id} is not a unit vector",
                normal.0, normal.1
            )));
        }
        if width <= 0.0 || height <= 0.0 {
            return Err(NetworkError::invalid_geometry(format!(
                "opening at node {node_id} must have positive width and height"
            )));
        }
        Ok(Self {
            node_id,
            normal,
            tangent: (-normal.1, normal.0),
            width,
            height,
        })
    }
}

/// A rectangular CFD sub-domain of the network
#[derive(Debug, Clone)]
pub struct CfdModule {
    /// Unique identifier of this module
    pub id: usize,
    /// Position of the bottom-left corner in m
    pub position: (f64, f64),
    /// Extent of the module in m
    pub size: (f64, f64),
    /// Path to the STL file describing the fluid domain
    pub stl_file: String,
    /// Openings binding the module boundary to the 1D network
    pub openings: Vec<Opening>,
    /// Opening node that anchors the internal approximation network and
    /// supplies the pressure datum of an ungrounded neighbouring group
    pub reference_node: usize,
    /// CFD port edges standing in for the module interior in nodal analysis
    pub port_edges: Vec<usize>,
}

impl CfdModule {
    pub(crate) fn new(
        id: usize,
        position: (f64, f64),
        size: (f64, f64),
        stl_file: String,
        openings: Vec<Opening>,
    ) -> NetworkResult<Self> {
        if openings.is_empty() {
            return Err(NetworkError::invalid_geometry(format!(
                "CFD module {id} must have at least one opening"
            )));
        }
        if size.0 <= 0.0 || size.1 <= 0.0 {
            return Err(NetworkError::invalid_geometry(format!(
                "CFD module {id} must have a positive extent"
            )));
        }
        let reference_node = openings.iter().map(|o| o.node_id).min().unwrap_or(0);
        Ok(Self {
            id,
            position,
            size,
            stl_file,
            openings,
            reference_node,
            port_edges: Vec::new(),
        })
    }

    /// The opening bound to the given node, if any
    pub fn opening_at(&self, node_id: usize) -> Option<&Opening> {
        self.openings.iter().find(|o| o.node_id == node_id)
    }

    /// Whether a point lies on the boundary of the module rectangle
    pub fn contains_on_boundary(&self, point: (f64, f64), tolerance: f64) -> bool {
        let (x0, y0) = self.position;
        let (x1, y1) = (x0 + self.size.0, y0 + self.size.1);
        let inside_x = point.0 >= x0 - tolerance && point.0 <= x1 + tolerance;
        let inside_y = point.1 >= y0 - tolerance && point.1 <= y1 + tolerance;
        let on_vertical = (point.0 - x0).abs() <= tolerance || (point.0 - x1).abs() <= tolerance;
        let on_horizontal = (point.1 - y0).abs() <= tolerance || (point.1 - y1).abs() <= tolerance;
        inside_x && inside_y && (on_vertical || on_horizontal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_tangent_is_ccw_rotation() {
        let opening = Opening::new(3, (1.0, 0.0), 1e-4).unwrap();
        assert_eq!(opening.tangent, (0.0, 1.0));
        let opening = Opening::new(3, (0.0, -1.0), 1e-4).unwrap();
        assert_eq!(opening.tangent, (1.0, 0.0));
    }

    #[test]
    fn rejects_non_unit_normal() {
        assert!(Opening::new(0, (1.0, 1.0), 1e-4).is_err());
    }

    #[test]
    fn boundary_test_accepts_edge_points() {
        let module = CfdModule::new(
            0,
            (1.75e-3, 0.75e-3),
            (5e-4, 5e-4),
            String::from("cross.stl"),
            vec![Opening::new(5, (1.0, 0.0), 1e-4).unwrap()],
        )
        .unwrap();
        assert!(module.contains_on_boundary((1.75e-3, 1e-3), 1e-12));
        assert!(!module.contains_on_boundary((2e-3, 1e-3), 1e-12));
    }
}
