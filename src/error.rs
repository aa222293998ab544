//! error.rs - Domain-Specific Error Types
//!
//! This module provides the error types surfaced by the simulator core.
//! Errors are grouped by subsystem (network construction, nodal analysis,
//! CFD domains, simulation control, porting) and folded into a single
//! top-level error for callers that do not care about the origin.

use thiserror::Error;

/// Main error type for the chipflow library
#[derive(Error, Debug)]
pub enum ChipflowError {
    /// Errors raised while building or validating the network graph
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Errors raised by the nodal analysis solver
    #[error("Nodal analysis error: {0}")]
    Nodal(#[from] NodalError),

    /// Errors raised by a CFD sub-domain
    #[error("CFD error: {0}")]
    Cfd(#[from] CfdError),

    /// Errors raised during simulation control flow
    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationError),

    /// Errors raised while reading or writing simulation documents
    #[error("Porting error: {0}")]
    Porting(#[from] PortingError),
}

/// Errors raised while building or validating the network graph
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Negative or zero channel dimensions, or a malformed opening normal
    #[error("Invalid geometry: {reason}")]
    InvalidGeometry { reason: String },

    /// Dangling nodes, disconnected ground, or a missing sink for the droplet platform
    #[error("Network incomplete: {reason}")]
    NetworkIncomplete { reason: String },

    /// Structural mutation was attempted after the simulation has started
    #[error("The network is frozen; structural changes are not allowed once a simulation has started")]
    NetworkFrozen,

    /// A query that is not defined for the edge kind, e.g. flow rate of a tank
    #[error("Illegal query on edge {edge_id}: {reason}")]
    IllegalQuery { edge_id: usize, reason: String },

    /// Referenced entity does not exist
    #[error("Unknown {entity} id {id}")]
    UnknownId { entity: &'static str, id: usize },
}

/// Errors raised by the nodal analysis solver
#[derive(Error, Debug)]
pub enum NodalError {
    /// A group has neither a ground node nor an externally imposed reference pressure
    #[error("Group {group_id} has no pressure reference; add a ground node or couple the group to a CFD module")]
    UnderspecifiedGroup { group_id: usize },

    /// The conductance matrix of a group could not be factorized
    #[error("The nodal system of group {group_id} is singular; check for isolated subgraphs or zero resistances")]
    SingularSystem { group_id: usize },
}

/// Errors raised by a CFD sub-domain
#[derive(Error, Debug)]
pub enum CfdError {
    /// The STL geometry exceeds the module's declared rectangle
    #[error("The STL mesh of module {module_id} exceeds its declared bounds")]
    GeometryOutOfBounds { module_id: usize },

    /// An opening references a node that does not lie on the module boundary
    #[error("Opening at node {node_id} of module {module_id} does not lie on the module boundary")]
    OrphanOpening { module_id: usize, node_id: usize },

    /// The STL file could not be read
    #[error("Failed to read STL file '{path}': {reason}")]
    StlRead { path: String, reason: String },

    /// A VTK snapshot could not be written
    #[error("Failed to write VTK snapshot '{path}': {reason}")]
    VtkWrite { path: String, reason: String },
}

/// Errors raised during simulation control flow
#[derive(Error, Debug)]
pub enum SimulationError {
    /// The hybrid fixed-point iteration exhausted its iteration budget.
    /// The last computed state is still available; see the warning flag on the result.
    #[error("Hybrid scheme did not converge within {max_iterations} iterations (residual {residual:.3e})")]
    DidNotConverge { max_iterations: usize, residual: f64 },

    /// The simulation is not fully specified
    #[error("Simulation setup incomplete: {reason}")]
    SetupIncomplete { reason: String },
}

/// Errors raised while reading or writing simulation documents
#[derive(Error, Debug)]
pub enum PortingError {
    /// The document could not be parsed as JSON
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O error
    #[error("File error for '{path}': {reason}")]
    File { path: String, reason: String },

    /// A required field is missing or has an unsupported value
    #[error("Invalid definition: {reason}")]
    InvalidDefinition { reason: String },
}

/// Convenient result type for chipflow operations
pub type Result<T> = std::result::Result<T, ChipflowError>;

/// Convenient result type for network operations
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

/// Convenient result type for nodal analysis operations
pub type NodalResult<T> = std::result::Result<T, NodalError>;

/// Convenient result type for CFD operations
pub type CfdResult<T> = std::result::Result<T, CfdError>;

/// Convenient result type for porting operations
pub type PortingResult<T> = std::result::Result<T, PortingError>;

impl NetworkError {
    /// Create an invalid geometry error
    pub fn invalid_geometry(reason: impl Into<String>) -> Self {
        Self::InvalidGeometry { reason: reason.into() }
    }

    /// Create a network incomplete error
    pub fn incomplete(reason: impl Into<String>) -> Self {
        Self::NetworkIncomplete { reason: reason.into() }
    }

    /// Create an illegal query error
    pub fn illegal_query(edge_id: usize, reason: impl Into<String>) -> Self {
        Self::IllegalQuery { edge_id, reason: reason.into() }
    }
}

impl PortingError {
    /// Create an invalid definition error
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidDefinition { reason: reason.into() }
    }
}
