//! Differentiable node protocol
//!
//! Every element of the hinge model takes part in a fixed three-phase
//! protocol, run once per optimization step:
//!
//! 1. [`Node::declare_variables`] — register every free scalar owned by the
//!    node as a differentiation target on the tape.
//! 2. [`Node::accumulate_score`] — add the node's local contribution to the
//!    shared running score. Pure aggregators contribute nothing.
//! 3. [`Node::apply_gradient`] — update the node's free variables from the
//!    adjoints computed by the reverse sweep.
//!
//! Invoked on the model root each phase visits every node exactly once, in a
//! fixed order. Running the score or apply phase on a recording that the
//! declare phase has not seen is a programming error and raises a fatal
//! error.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
use super::params::Params;
use crate::ad::{Scalar, Tape};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Context handed to each node during the score phase.
///
/// Carries the tape handles of the neighbouring hinges, which form the local
/// curvature and acceleration context. A missing neighbour (open chain
/// endpoint) simply disables the terms that need it.
pub struct ScoreCtx<'a> {
    pub params: &'a Params,
    pub previous: Option<HingeRec>,
    pub next: Option<HingeRec>,
}

/// The tape handles of one hinge's declared variables and derived position,
/// valid for a single recording.
#[derive(Clone, Copy)]
pub struct HingeRec {
    /// Tape generation this recording belongs to.
    pub generation: u64,

    /// Free variable: signed lateral offset from the reference position.
    pub crossposition: Scalar,

    /// Free variable: target speed.
    pub speed: Scalar,

    /// Derived position, `reference + lateral_direction * crossposition`.
    pub pos_x: Scalar,
    pub pos_y: Scalar,

    /// Fixed longitudinal ordering key along the track.
    ///
    /// Units: meters
    pub forward: f64,
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A participant in the three-phase differentiation protocol.
pub trait Node {
    /// Declare this node's free scalars as differentiation targets.
    fn declare_variables(&mut self, tape: &mut Tape);

    /// Add this node's local contribution to the running score `acc`.
    fn accumulate_score(&self, tape: &mut Tape, ctx: &ScoreCtx, acc: &mut Scalar);

    /// Gradient-descent update of this node's free variables, scaled by
    /// `normalization`.
    fn apply_gradient(&mut self, tape: &Tape, normalization: f64);
}
