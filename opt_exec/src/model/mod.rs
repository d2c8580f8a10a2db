//! # Hinge model
//!
//! The top-level optimizable model of a racing line. The model owns the
//! collision grid and the segment chain, and runs the three-phase
//! differentiation protocol (declare, score, apply) over them once per
//! [`HingeModel::optimize`] call.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod chain;
pub mod collision;
pub mod node;
pub mod params;
pub mod persist;
pub mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::Vector2;

// Internal
use crate::ad::{Scalar, Tape};
use chain::{Chain, SegmentId};
use collision::{Aabb, CollisionGrid};
use node::{HingeRec, Node, ScoreCtx};
pub use params::Params;
use util::raise_error;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The top-level model: collision grid, segment chain and the fixed
/// optimization parameters.
pub struct HingeModel {
    params: Params,
    grid: CollisionGrid,
    chain: Chain,

    /// Head of the hinge chain, set by the track import.
    first_hinge: Option<SegmentId>,

    /// Score observed at the first and most recent optimization call.
    /// Telemetry only.
    first_last_score: Option<(f64, f64)>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl HingeModel {
    /// Create an empty model over a `board_width x board_height` cell
    /// collision board.
    ///
    /// An empty board or non-positive cell side is a broken configuration
    /// and raises a fatal error.
    pub fn new(params: Params) -> Self {
        if params.board_width == 0
            || params.board_height == 0
            || params.collision_zone_side <= 0.0
        {
            raise_error!("Collision board configuration is invalid");
        }

        let grid = CollisionGrid::new(
            params.board_width,
            params.board_height,
            params.collision_zone_side,
        );

        Self {
            params,
            grid,
            chain: Chain::new(),
            first_hinge: None,
            first_last_score: None,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut Chain {
        &mut self.chain
    }

    pub fn grid(&self) -> &CollisionGrid {
        &self.grid
    }

    pub fn first_hinge(&self) -> Option<SegmentId> {
        self.first_hinge
    }

    pub fn set_first_hinge(&mut self, id: SegmentId) {
        self.first_hinge = id.into();
    }

    pub fn first_last_score(&self) -> Option<(f64, f64)> {
        self.first_last_score
    }

    /// Number of hinges reachable from the head.
    pub fn hinge_count(&self) -> usize {
        match self.first_hinge {
            Some(first) => self.chain.hinge_walk(first).count(),
            None => 0,
        }
    }

    /// Register every band segment's bounding extent with the collision
    /// grid. Called once, after the track import has built the chain.
    pub fn finalise_import(&mut self) {
        for (id, segment) in self.chain.iter() {
            if segment.is_hinge() {
                continue;
            }
            if let Some((a, b)) = self.chain.line_piece(id) {
                // The track itself must fit the board; only registration
                // extents may overhang it
                self.grid.cell_of(&a);
                self.grid.cell_of(&b);

                self.grid.register_segment(id, &Aabb::from_points(a, b), false);
            }
        }
    }

    /// Run one optimization step and return the score observed before the
    /// gradient update.
    ///
    /// One call is one full pass of the three-phase protocol: reset the
    /// tape, declare every hinge's free variables, accumulate the scalar
    /// objective, run the reverse sweep, and move every variable opposite
    /// its gradient. Plain batch gradient descent; callers invoke this
    /// repeatedly to converge.
    pub fn optimize(&mut self, tape: &mut Tape) -> f64 {
        let acc = self.record_score(tape);
        let score = tape.value(acc);

        tape.backward(acc);

        let normalization = self.params.alpha / self.hinge_count().max(1) as f64;
        self.apply_gradient(tape, normalization);

        self.first_last_score = match self.first_last_score {
            None => Some((score, score)),
            Some((first, _)) => Some((first, score)),
        };

        score
    }

    /// Evaluate the current score without updating any variable.
    pub fn compute_score(&mut self, tape: &mut Tape) -> f64 {
        let acc = self.record_score(tape);
        tape.value(acc)
    }

    /// Reset the tape and run the declare and score phases, returning the
    /// recorded objective.
    fn record_score(&mut self, tape: &mut Tape) -> Scalar {
        tape.clear();
        self.refresh_moving_registrations();

        self.declare_variables(tape);

        let mut acc = tape.constant(0.0);
        let ctx = ScoreCtx {
            params: &self.params,
            previous: None,
            next: None,
        };
        self.accumulate_score(tape, &ctx, &mut acc);

        acc
    }

    /// Re-register every hinge segment with the grid, covering the full
    /// lateral travel range of both endpoints so broad-phase stays valid as
    /// crosspositions move within a recording.
    fn refresh_moving_registrations(&mut self) {
        self.grid.clear_moving();

        for (id, segment) in self.chain.iter() {
            let hinge = match segment.as_hinge() {
                Some(h) => h,
                None => continue,
            };
            let next = match segment.next() {
                Some(n) => n,
                None => continue,
            };
            let next_hinge = match self.chain.get(next).as_hinge() {
                Some(h) => h,
                None => continue,
            };

            let aabb = Aabb::from_points(hinge.zero_position(), next_hinge.zero_position())
                .inflate(hinge.width().max(next_hinge.width()));
            self.grid.register_segment(id, &aabb, true);
        }
    }

    /// Tape handles of a hinge's recording, if the segment is a hinge that
    /// has been through the declare phase.
    fn rec_of(&self, id: Option<SegmentId>) -> Option<HingeRec> {
        self.chain.get(id?).as_hinge()?.rec()
    }

    /// The endpoints of a segment's line piece as tape expressions: hinge
    /// endpoints differentiate through their crossposition, band endpoints
    /// are constants.
    fn endpoint_exprs(
        &self,
        tape: &mut Tape,
        id: SegmentId,
    ) -> Option<((Scalar, Scalar), (Scalar, Scalar))> {
        let next = self.chain.get(id).next()?;

        let mut expr_of = |tape: &mut Tape, sid: SegmentId| match self.chain.get(sid).as_hinge() {
            Some(h) => {
                let rec = h.rec()?;
                Some((rec.pos_x, rec.pos_y))
            }
            None => {
                let p = self.chain.position(sid);
                Some((tape.constant(p.x), tape.constant(p.y)))
            }
        };

        let a = expr_of(tape, id)?;
        let b = expr_of(tape, next)?;
        Some((a, b))
    }

    /// Broad-phase candidate selection plus exact-test confirmation, adding
    /// a penalty for every confirmed crossing.
    ///
    /// The penalty is a differentiable straddle measure (product of signed
    /// endpoint areas), positive exactly while the segments cross, so the
    /// gradient pushes them apart. A crossing racing line is physically
    /// invalid and must be driven to zero.
    fn accumulate_collision_score(&self, tape: &mut Tape, acc: &mut Scalar) {
        for (id, segment) in self.chain.iter() {
            if !segment.is_hinge() {
                continue;
            }
            let (p1, p2) = match self.chain.line_piece(id) {
                Some(l) => l,
                None => continue,
            };

            let aabb = Aabb::from_points(p1, p2);
            for candidate in self.grid.candidates(&aabb) {
                if candidate == id {
                    continue;
                }
                // Neighbouring line pieces share an endpoint and never
                // properly cross; skip them outright.
                if segment.next() == Some(candidate) || segment.previous() == Some(candidate) {
                    continue;
                }
                // Count hinge/hinge pairs once.
                if self.chain.get(candidate).is_hinge() && candidate < id {
                    continue;
                }

                if !self.chain.segments_intersect(id, candidate) {
                    continue;
                }

                let (a1, a2) = match self.endpoint_exprs(tape, id) {
                    Some(e) => e,
                    None => continue,
                };
                let (b1, b2) = match self.endpoint_exprs(tape, candidate) {
                    Some(e) => e,
                    None => continue,
                };

                if let Some(penalty) = record_crossing_penalty(
                    tape,
                    a1,
                    a2,
                    b1,
                    b2,
                    self.params.collision_weight,
                ) {
                    *acc = tape.add(*acc, penalty);
                }
            }
        }
    }
}

impl Node for HingeModel {
    /// Declare phase: every segment of the arena, in arena order.
    fn declare_variables(&mut self, tape: &mut Tape) {
        for id in 0..self.chain.len() {
            self.chain.get_mut(id).declare_variables(tape);
        }
    }

    /// Score phase: every segment's local terms, then the model-level
    /// collision term. The model itself contributes nothing else.
    fn accumulate_score(&self, tape: &mut Tape, ctx: &ScoreCtx, acc: &mut Scalar) {
        for (id, segment) in self.chain.iter() {
            let segment_ctx = ScoreCtx {
                params: ctx.params,
                previous: self.rec_of(segment.previous()),
                next: self.rec_of(segment.next()),
            };
            segment.accumulate_score(tape, &segment_ctx, acc);
        }

        self.accumulate_collision_score(tape, acc);
    }

    /// Apply phase: every segment of the arena, in arena order.
    fn apply_gradient(&mut self, tape: &Tape, normalization: f64) {
        for id in 0..self.chain.len() {
            self.chain.get_mut(id).apply_gradient(tape, normalization);
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Record the straddle penalty for a confirmed crossing of segments
/// `a1 -> a2` and `b1 -> b2`.
///
/// With `s1, s2` the signed areas of b's endpoints against a (and `t1, t2`
/// the converse), a proper crossing has both products negative, so
/// `relu(-s1 s2) + relu(-t1 t2)` is positive exactly while the segments
/// cross. Normalized by the current squared segment lengths to stay
/// scale-free.
fn record_crossing_penalty(
    tape: &mut Tape,
    a1: (Scalar, Scalar),
    a2: (Scalar, Scalar),
    b1: (Scalar, Scalar),
    b2: (Scalar, Scalar),
    weight: f64,
) -> Option<Scalar> {
    let len_a_sq = (tape.value(a2.0) - tape.value(a1.0)).powi(2)
        + (tape.value(a2.1) - tape.value(a1.1)).powi(2);
    let len_b_sq = (tape.value(b2.0) - tape.value(b1.0)).powi(2)
        + (tape.value(b2.1) - tape.value(b1.1)).powi(2);
    let norm = len_a_sq * len_b_sq;
    if norm <= f64::EPSILON {
        return None;
    }

    let s1 = record_signed_area(tape, a1, a2, b1);
    let s2 = record_signed_area(tape, a1, a2, b2);
    let t1 = record_signed_area(tape, b1, b2, a1);
    let t2 = record_signed_area(tape, b1, b2, a2);

    let s_prod = tape.mul(s1, s2);
    let t_prod = tape.mul(t1, t2);
    let s_neg = tape.neg(s_prod);
    let t_neg = tape.neg(t_prod);
    let s_pen = tape.relu(s_neg);
    let t_pen = tape.relu(t_neg);
    let sum = tape.add(s_pen, t_pen);

    let scale = tape.constant(weight / norm);
    Some(tape.mul(scale, sum))
}

/// Record the signed area of the triple (p, q, r):
/// `cross(q - p, r - p)`.
fn record_signed_area(
    tape: &mut Tape,
    p: (Scalar, Scalar),
    q: (Scalar, Scalar),
    r: (Scalar, Scalar),
) -> Scalar {
    let qx = tape.sub(q.0, p.0);
    let qy = tape.sub(q.1, p.1);
    let rx = tape.sub(r.0, p.0);
    let ry = tape.sub(r.1, p.1);
    let lhs = tape.mul(qx, ry);
    let rhs = tape.mul(qy, rx);
    tape.sub(lhs, rhs)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    /// Build a straight N-hinge chain along +x at the centre of the board,
    /// with the given constant speed.
    fn straight_model(n: usize, speed: f64, params: Params) -> HingeModel {
        let mut model = HingeModel::new(params);

        let y = model.params().board_height as f64 * model.params().collision_zone_side / 2.0;
        let x0 = model.params().board_width as f64 * model.params().collision_zone_side / 4.0;

        let mut prev = None;
        for i in 0..n {
            let id = model.chain_mut().add_hinge(
                Vector2::new(x0 + i as f64 * 10.0, y),
                Vector2::new(0.0, 1.0),
                5.0,
                i as f64 * 10.0,
            );
            model
                .chain_mut()
                .get_mut(id)
                .as_hinge_mut()
                .unwrap()
                .set_speed(speed);

            if let Some(p) = prev {
                model.chain_mut().link_forward(p, id);
            } else {
                model.set_first_hinge(id);
            }
            prev = Some(id);
        }

        model.finalise_import();
        model
    }

    fn set_speed(model: &mut HingeModel, id: SegmentId, speed: f64) {
        model
            .chain_mut()
            .get_mut(id)
            .as_hinge_mut()
            .unwrap()
            .set_speed(speed);
    }

    #[test]
    fn test_straight_feasible_chain_scores_zero() {
        let mut model = straight_model(5, 5.0, Params::default());
        let mut tape = Tape::new();

        assert_eq!(model.compute_score(&mut tape), 0.0);
    }

    #[test]
    fn test_score_is_additive_over_hinges() {
        // Two independent acceleration violations must sum exactly.
        let params = Params {
            max_acceleration: 1.0,
            ..Params::default()
        };
        let mut tape = Tape::new();

        // Chain with only the middle hinge too fast
        let mut model = straight_model(5, 5.0, params.clone());
        let ids: Vec<_> = model
            .chain()
            .hinge_walk(model.first_hinge().unwrap())
            .collect();

        set_speed(&mut model, ids[1], 10.0);
        let one_violation = model.compute_score(&mut tape);
        assert!(one_violation > 0.0);

        // Same chain with a second, identical violation far away
        set_speed(&mut model, ids[3], 10.0);
        let two_violations = model.compute_score(&mut tape);

        // The two local terms are symmetric so the total must double,
        // modulo the shared terms between hinges 1..3 which are identical
        // in both setups.
        let mut reference = straight_model(5, 5.0, params);
        set_speed(&mut reference, ids[3], 10.0);
        let other_violation = reference.compute_score(&mut tape);

        assert!((two_violations - (one_violation + other_violation)).abs() < 1e-9);
    }

    #[test]
    fn test_gradient_moves_excess_speed_down() {
        // Middle hinge far above the acceleration limit relative to its
        // neighbours; huge centrifugal limit so no competing gradient.
        let params = Params {
            max_centrifugal_force: 1e12,
            max_acceleration: 0.5,
            alpha: 0.1,
            ..Params::default()
        };
        let mut model = straight_model(5, 5.0, params);
        let ids: Vec<_> = model
            .chain()
            .hinge_walk(model.first_hinge().unwrap())
            .collect();
        set_speed(&mut model, ids[2], 50.0);

        let mut tape = Tape::new();
        let before = model.optimize(&mut tape);
        assert!(before > 0.0);

        let speed_after = model.chain().get(ids[2]).as_hinge().unwrap().speed();
        assert!(speed_after < 50.0);

        // Recomputing the score after the step must show improvement
        let after = model.compute_score(&mut tape);
        assert!(after < before);
    }

    #[test]
    fn test_edge_hugging_track_scores_without_panic() {
        // A feasible chain within one half-width of the board edge: the
        // inflated registration extents overhang the board and must be
        // clamped, not treated as a fatal out-of-board position.
        let mut model = HingeModel::new(Params::default());

        let mut prev = None;
        for i in 0..4 {
            let id = model.chain_mut().add_hinge(
                Vector2::new(100.0 + i as f64 * 10.0, 2.0),
                Vector2::new(0.0, 1.0),
                5.0,
                i as f64 * 10.0,
            );
            model
                .chain_mut()
                .get_mut(id)
                .as_hinge_mut()
                .unwrap()
                .set_speed(5.0);
            if let Some(p) = prev {
                model.chain_mut().link_forward(p, id);
            } else {
                model.set_first_hinge(id);
            }
            prev = Some(id);
        }
        model.finalise_import();

        let mut tape = Tape::new();
        assert_eq!(model.compute_score(&mut tape), 0.0);
    }

    #[test]
    fn test_collision_penalty_on_crossing_line() {
        // A four-hinge zig-zag whose first and last pieces cross.
        let params = Params {
            max_centrifugal_force: 1e12,
            max_acceleration: 1e12,
            ..Params::default()
        };
        let mut model = HingeModel::new(params);

        let positions = [
            Vector2::new(100.0, 100.0),
            Vector2::new(110.0, 100.0),
            Vector2::new(110.0, 110.0),
            Vector2::new(105.0, 95.0),
        ];

        let mut prev = None;
        for (i, p) in positions.iter().enumerate() {
            let id = model
                .chain_mut()
                .add_hinge(*p, Vector2::new(0.0, 1.0), 5.0, i as f64 * 10.0);
            if let Some(pr) = prev {
                model.chain_mut().link_forward(pr, id);
            } else {
                model.set_first_hinge(id);
            }
            prev = Some(id);
        }
        model.finalise_import();

        let mut tape = Tape::new();
        let score = model.compute_score(&mut tape);
        assert!(score > 0.0);
    }

    #[test]
    fn test_first_last_score_tracking() {
        let params = Params {
            max_acceleration: 0.5,
            ..Params::default()
        };
        let mut model = straight_model(3, 5.0, params);
        let ids: Vec<_> = model
            .chain()
            .hinge_walk(model.first_hinge().unwrap())
            .collect();
        set_speed(&mut model, ids[1], 20.0);

        let mut tape = Tape::new();
        assert!(model.first_last_score().is_none());

        let first = model.optimize(&mut tape);
        let second = model.optimize(&mut tape);

        let (f, l) = model.first_last_score().unwrap();
        assert_eq!(f, first);
        assert_eq!(l, second);
    }
}
