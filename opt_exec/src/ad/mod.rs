//! # Automatic differentiation module
//!
//! A minimal scalar reverse-mode engine behind a narrow interface: declare
//! variables, record operations, run the reverse sweep, read gradients. The
//! rest of the software only ever talks to [`Tape`] and [`Scalar`], so the
//! engine could be swapped out without touching the model.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod tape;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use self::tape::*;
