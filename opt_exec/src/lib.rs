//! # Optimizer library.
//!
//! This library allows other crates in the workspace (and the executable's
//! tests and benches) to access items defined inside the optimizer crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Reverse-mode automatic differentiation tape
pub mod ad;

/// The hinge model - the optimizable racing line, its segment chain and collision grid
pub mod model;

/// Track import - reads waypoint CSV files and builds the segment chain
pub mod track;

/// Visualisation export - flattens the model into drawable line pieces
pub mod viz;
