//! Parameters structure for the hinge model optimizer

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the hinge model and its optimization loop.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    // ---- COLLISION BOARD ----

    /// Width of the collision board.
    ///
    /// Units: cells
    pub board_width: u32,

    /// Height of the collision board.
    ///
    /// Units: cells
    pub board_height: u32,

    /// Side length of one collision zone square.
    ///
    /// Units: meters
    pub collision_zone_side: f64,

    // ---- PHYSICAL LIMITS ----

    /// Maximum centrifugal force the line may demand of the car.
    ///
    /// Units: meters/second^2 (per unit mass)
    pub max_centrifugal_force: f64,

    /// Maximum longitudinal acceleration between neighbouring hinges.
    ///
    /// Units: meters/second^2
    pub max_acceleration: f64,

    // ---- OPTIMIZATION ----

    /// Gradient descent step factor. The per-variable step is the raw
    /// gradient scaled by `alpha / hinge_count`.
    pub alpha: f64,

    /// Weight of the self-intersection penalty term.
    pub collision_weight: f64,

    // ---- TRACK IMPORT ----

    /// Scale applied to waypoint heading deltas.
    ///
    /// Units: radians per raw angle unit
    pub angle_factor: f64,

    /// Scale applied to waypoint left/right boundary distances.
    pub bound_factor: f64,

    /// Scale applied to waypoint step lengths.
    pub forward_factor: f64,

    /// Minimum accumulated step length between sampled stations.
    ///
    /// Units: meters
    pub band_separation: f64,

    /// Speed assigned to freshly spawned hinges.
    ///
    /// Units: meters/second
    pub initial_speed: f64,

    // ---- EXEC CYCLE ----

    /// Optimization steps run per processing cycle.
    pub optimizations_per_cycle: u32,

    /// Score below which the model is considered converged and is saved.
    pub score_threshold: f64,

    /// Maximum number of processing cycles before giving up.
    pub max_cycles: u64,

    /// Cycle period between visualisation snapshots.
    pub snapshot_period_cycles: u64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            board_width: 64,
            board_height: 64,
            collision_zone_side: 10.0,
            max_centrifugal_force: 10.0,
            max_acceleration: 5.0,
            alpha: 0.01,
            collision_weight: 1.0,
            angle_factor: 1.0,
            bound_factor: 1.0,
            forward_factor: 1.0,
            band_separation: 5.0,
            initial_speed: 10.0,
            optimizations_per_cycle: 10,
            score_threshold: 1e-3,
            max_cycles: 10_000,
            snapshot_period_cycles: 100,
        }
    }
}
