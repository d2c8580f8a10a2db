//! Track geometry chain
//!
//! The chain is a doubly linked sequence of positioned segments: fixed
//! left/right boundary samples ([`BandSegment`]) and optimizable waypoints
//! ([`Hinge`]). Segments are stored in an arena and linked by optional
//! indices, so end-of-chain and loop-closure are explicit comparisons
//! rather than pointer games.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::Vector2;

// Internal
use super::node::{HingeRec, Node, ScoreCtx};
use crate::ad::{Scalar, Tape};
use util::raise_error;

// ---------------------------------------------------------------------------
// TYPES
// ---------------------------------------------------------------------------

/// Index of a segment within the chain arena.
pub type SegmentId = usize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Arena of chain segments.
#[derive(Default)]
pub struct Chain {
    segments: Vec<Segment>,
}

/// A positioned chain element with at most one `next` and one `previous`
/// neighbour.
pub struct Segment {
    pub(crate) kind: SegmentKind,
    next: Option<SegmentId>,
    previous: Option<SegmentId>,
}

/// A fixed track-boundary sample. Carries no free variables.
pub struct BandSegment {
    position: Vector2<f64>,
}

/// An optimizable waypoint on the racing line.
pub struct Hinge {
    /// Fixed reference position on the track centre line.
    zero_position: Vector2<f64>,

    /// Fixed lateral unit direction along which `crossposition` acts.
    crossposition_vector: Vector2<f64>,

    /// Fixed half track width.
    ///
    /// Units: meters
    width: f64,

    /// Fixed longitudinal ordering key along the track.
    ///
    /// Units: meters
    forward: f64,

    /// Free variable: signed lateral offset from `zero_position`.
    ///
    /// Units: meters
    crossposition: f64,

    /// Free variable: target speed at this waypoint.
    ///
    /// Units: meters/second
    speed: f64,

    /// Tape handles of the current recording, set by the declare phase.
    rec: Option<HingeRec>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

pub enum SegmentKind {
    Band(BandSegment),
    Hinge(Hinge),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_band(&mut self, position: Vector2<f64>) -> SegmentId {
        self.push(SegmentKind::Band(BandSegment { position }))
    }

    pub fn add_hinge(
        &mut self,
        zero_position: Vector2<f64>,
        crossposition_vector: Vector2<f64>,
        width: f64,
        forward: f64,
    ) -> SegmentId {
        self.push(SegmentKind::Hinge(Hinge {
            zero_position,
            crossposition_vector,
            width,
            forward,
            crossposition: 0.0,
            speed: 0.0,
            rec: None,
        }))
    }

    fn push(&mut self, kind: SegmentKind) -> SegmentId {
        let id = self.segments.len();
        self.segments.push(Segment {
            kind,
            next: None,
            previous: None,
        });
        id
    }

    /// Set the bidirectional link `a -> b`.
    ///
    /// Relinking a segment towards a diverging target would leave the chain
    /// inconsistent, and fails in debug builds.
    pub fn link_forward(&mut self, a: SegmentId, b: SegmentId) {
        if let Some(n) = self.segments[a].next {
            debug_assert_eq!(n, b, "segment {} relinked towards a diverging target", a);
        }
        self.segments[a].next = Some(b);
        self.segments[b].previous = Some(a);
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, id: SegmentId) -> &Segment {
        &self.segments[id]
    }

    pub fn get_mut(&mut self, id: SegmentId) -> &mut Segment {
        &mut self.segments[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = (SegmentId, &Segment)> {
        self.segments.iter().enumerate()
    }

    /// Current derived position of a segment.
    pub fn position(&self, id: SegmentId) -> Vector2<f64> {
        self.segments[id].position()
    }

    /// The directed line piece a segment forms with its `next` neighbour, or
    /// `None` at the chain tail.
    pub fn line_piece(&self, id: SegmentId) -> Option<(Vector2<f64>, Vector2<f64>)> {
        let next = self.segments[id].next?;
        Some((self.position(id), self.position(next)))
    }

    /// Exact 2-D crossing test between the line pieces of two segments.
    ///
    /// This is the ground-truth check, run only on pairs the collision grid
    /// flags as candidates.
    pub fn segments_intersect(&self, s1: SegmentId, s2: SegmentId) -> bool {
        let (a1, a2) = match self.line_piece(s1) {
            Some(l) => l,
            None => return false,
        };
        let (b1, b2) = match self.line_piece(s2) {
            Some(l) => l,
            None => return false,
        };

        // Proper crossing: each segment's endpoints straddle the other's
        // supporting line.
        let d1 = ccw(&a1, &a2, &b1);
        let d2 = ccw(&a1, &a2, &b2);
        let d3 = ccw(&b1, &b2, &a1);
        let d4 = ccw(&b1, &b2, &a2);

        d1 * d2 < 0.0 && d3 * d4 < 0.0
    }

    /// Iterate hinge ids from `first`, following `next` until the chain end
    /// or until `first` is revisited (closed loop).
    pub fn hinge_walk(&self, first: SegmentId) -> HingeWalk {
        HingeWalk {
            chain: self,
            first,
            current: Some(first),
        }
    }
}

impl Segment {
    pub fn next(&self) -> Option<SegmentId> {
        self.next
    }

    pub fn previous(&self) -> Option<SegmentId> {
        self.previous
    }

    pub fn position(&self) -> Vector2<f64> {
        match &self.kind {
            SegmentKind::Band(b) => b.position,
            SegmentKind::Hinge(h) => h.position(),
        }
    }

    pub fn is_hinge(&self) -> bool {
        matches!(self.kind, SegmentKind::Hinge(_))
    }

    pub fn as_hinge(&self) -> Option<&Hinge> {
        match &self.kind {
            SegmentKind::Hinge(h) => Some(h),
            SegmentKind::Band(_) => None,
        }
    }

    pub fn as_hinge_mut(&mut self) -> Option<&mut Hinge> {
        match &mut self.kind {
            SegmentKind::Hinge(h) => Some(h),
            SegmentKind::Band(_) => None,
        }
    }
}

impl Hinge {
    /// Derived position: `reference + lateral_direction * crossposition`.
    pub fn position(&self) -> Vector2<f64> {
        self.zero_position + self.crossposition_vector * self.crossposition
    }

    pub fn zero_position(&self) -> Vector2<f64> {
        self.zero_position
    }

    pub fn crossposition_vector(&self) -> Vector2<f64> {
        self.crossposition_vector
    }

    pub fn crossposition(&self) -> f64 {
        self.crossposition
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn forward(&self) -> f64 {
        self.forward
    }

    pub fn set_crossposition(&mut self, crossposition: f64) {
        self.crossposition = crossposition;
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
    }

    /// Tape handles of the current recording, or `None` before the first
    /// declare phase.
    pub fn rec(&self) -> Option<HingeRec> {
        self.rec
    }

    /// Get the recording handles, raising a fatal error if the declare phase
    /// has not run on this tape.
    fn current_rec(&self, tape: &Tape) -> HingeRec {
        match self.rec {
            Some(rec) if rec.generation == tape.generation() => rec,
            _ => raise_error!("Hinge visited by score/apply phase before variable declaration"),
        }
    }
}

impl Node for Segment {
    fn declare_variables(&mut self, tape: &mut Tape) {
        let hinge = match self.as_hinge_mut() {
            Some(h) => h,
            None => return,
        };

        let crossposition = tape.var(hinge.crossposition);
        let speed = tape.var(hinge.speed);

        // Record the derived position so downstream terms differentiate
        // through the crossposition.
        let zx = tape.constant(hinge.zero_position.x);
        let zy = tape.constant(hinge.zero_position.y);
        let cvx = tape.constant(hinge.crossposition_vector.x);
        let cvy = tape.constant(hinge.crossposition_vector.y);
        let off_x = tape.mul(cvx, crossposition);
        let off_y = tape.mul(cvy, crossposition);
        let pos_x = tape.add(zx, off_x);
        let pos_y = tape.add(zy, off_y);

        hinge.rec = Some(HingeRec {
            generation: tape.generation(),
            crossposition,
            speed,
            pos_x,
            pos_y,
            forward: hinge.forward,
        });
    }

    fn accumulate_score(&self, tape: &mut Tape, ctx: &ScoreCtx, acc: &mut Scalar) {
        let hinge = match self.as_hinge() {
            Some(h) => h,
            None => return,
        };
        let rec = hinge.current_rec(tape);

        // Centrifugal term needs both neighbours for the local curvature.
        if let (Some(prev), Some(next)) = (ctx.previous, ctx.next) {
            if let Some(curvature) = record_curvature(tape, &prev, &rec, &next) {
                let speed_sq = tape.square(rec.speed);
                let force = tape.mul(speed_sq, curvature);
                let limit = tape.constant(ctx.params.max_centrifugal_force);
                let excess = tape.sub(force, limit);
                let gated = tape.relu(excess);
                let penalty = tape.square(gated);
                *acc = tape.add(*acc, penalty);
            }
        }

        // Longitudinal acceleration implied by the speed difference to the
        // next hinge: a = (v_next^2 - v^2) / (2 ds).
        if let Some(next) = ctx.next {
            let ds = 2.0 * (next.forward - rec.forward);
            if ds > f64::EPSILON {
                let v_sq = tape.square(rec.speed);
                let vn_sq = tape.square(next.speed);
                let dv = tape.sub(vn_sq, v_sq);
                let ds = tape.constant(ds);
                let accel = tape.div(dv, ds);
                let accel_mag = tape.abs(accel);
                let limit = tape.constant(ctx.params.max_acceleration);
                let excess = tape.sub(accel_mag, limit);
                let gated = tape.relu(excess);
                let penalty = tape.square(gated);
                *acc = tape.add(*acc, penalty);
            }
        }

        // Soft bound keeping the crossposition within the half track width.
        let offset = tape.abs(rec.crossposition);
        let limit = tape.constant(hinge.width);
        let excess = tape.sub(offset, limit);
        let gated = tape.relu(excess);
        let penalty = tape.square(gated);
        *acc = tape.add(*acc, penalty);
    }

    fn apply_gradient(&mut self, tape: &Tape, normalization: f64) {
        let hinge = match self.as_hinge_mut() {
            Some(h) => h,
            None => return,
        };
        let rec = hinge.current_rec(tape);

        hinge.crossposition -= tape.grad(rec.crossposition) * normalization;
        hinge.speed -= tape.grad(rec.speed) * normalization;

        // Target speed is non-negative by definition.
        if hinge.speed < 0.0 {
            hinge.speed = 0.0;
        }
    }
}

// ---------------------------------------------------------------------------
// ITERATORS
// ---------------------------------------------------------------------------

/// Iterator over the hinge chain, see [`Chain::hinge_walk`].
pub struct HingeWalk<'a> {
    chain: &'a Chain,
    first: SegmentId,
    current: Option<SegmentId>,
}

impl<'a> Iterator for HingeWalk<'a> {
    type Item = SegmentId;

    fn next(&mut self) -> Option<SegmentId> {
        let id = self.current?;

        self.current = match self.chain.get(id).next() {
            // Loop closure: stop before revisiting the head
            Some(n) if n == self.first => None,
            n => n,
        };

        Some(id)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Signed area orientation of the triple (p, q, r).
fn ccw(p: &Vector2<f64>, q: &Vector2<f64>, r: &Vector2<f64>) -> f64 {
    (q.x - p.x) * (r.y - p.y) - (q.y - p.y) * (r.x - p.x)
}

/// Record the local curvature at hinge `b` from the circumscribed circle of
/// the neighbour positions: `k = 2 |cross(b - a, c - b)| / (|ab| |bc| |ac|)`.
///
/// Degenerate geometry (coincident neighbours) would divide by zero; a
/// perfectly straight chain has zero curvature anyway, so the term is simply
/// skipped by returning `None`.
fn record_curvature(
    tape: &mut Tape,
    a: &HingeRec,
    b: &HingeRec,
    c: &HingeRec,
) -> Option<Scalar> {
    let (ax, ay) = (tape.value(a.pos_x), tape.value(a.pos_y));
    let (bx, by) = (tape.value(b.pos_x), tape.value(b.pos_y));
    let (cx, cy) = (tape.value(c.pos_x), tape.value(c.pos_y));

    let lab = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt();
    let lbc = ((cx - bx).powi(2) + (cy - by).powi(2)).sqrt();
    let lac = ((cx - ax).powi(2) + (cy - ay).powi(2)).sqrt();
    if lab * lbc * lac <= f64::EPSILON {
        return None;
    }

    let abx = tape.sub(b.pos_x, a.pos_x);
    let aby = tape.sub(b.pos_y, a.pos_y);
    let bcx = tape.sub(c.pos_x, b.pos_x);
    let bcy = tape.sub(c.pos_y, b.pos_y);
    let acx = tape.sub(c.pos_x, a.pos_x);
    let acy = tape.sub(c.pos_y, a.pos_y);

    let cross_lhs = tape.mul(abx, bcy);
    let cross_rhs = tape.mul(aby, bcx);
    let cross = tape.sub(cross_lhs, cross_rhs);
    let cross_mag = tape.abs(cross);

    let lab = record_norm(tape, abx, aby);
    let lbc = record_norm(tape, bcx, bcy);
    let lac = record_norm(tape, acx, acy);

    let two = tape.constant(2.0);
    let num = tape.mul(two, cross_mag);
    let lab_lbc = tape.mul(lab, lbc);
    let denom = tape.mul(lab_lbc, lac);

    Some(tape.div(num, denom))
}

/// Record the euclidian norm of a vector expression.
fn record_norm(tape: &mut Tape, x: Scalar, y: Scalar) -> Scalar {
    let x_sq = tape.square(x);
    let y_sq = tape.square(y);
    let sum = tape.add(x_sq, y_sq);
    tape.sqrt(sum)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn simple_hinge(chain: &mut Chain, x: f64) -> SegmentId {
        chain.add_hinge(
            Vector2::new(x, 0.0),
            Vector2::new(0.0, 1.0),
            1.0,
            x,
        )
    }

    #[test]
    fn test_link_forward_is_bidirectional() {
        let mut chain = Chain::new();
        let a = simple_hinge(&mut chain, 0.0);
        let b = simple_hinge(&mut chain, 1.0);

        chain.link_forward(a, b);

        assert_eq!(chain.get(a).next(), Some(b));
        assert_eq!(chain.get(b).previous(), Some(a));
    }

    #[test]
    fn test_hinge_position_derivation() {
        let mut chain = Chain::new();
        let id = chain.add_hinge(
            Vector2::new(2.0, 3.0),
            Vector2::new(0.0, 1.0),
            1.5,
            0.0,
        );

        chain
            .get_mut(id)
            .as_hinge_mut()
            .unwrap()
            .set_crossposition(0.5);

        assert_eq!(chain.position(id), Vector2::new(2.0, 3.5));
    }

    #[test]
    fn test_segments_intersect_crossing() {
        let mut chain = Chain::new();
        let a1 = chain.add_band(Vector2::new(0.0, 0.0));
        let a2 = chain.add_band(Vector2::new(2.0, 2.0));
        let b1 = chain.add_band(Vector2::new(0.0, 2.0));
        let b2 = chain.add_band(Vector2::new(2.0, 0.0));

        chain.link_forward(a1, a2);
        chain.link_forward(b1, b2);

        assert!(chain.segments_intersect(a1, b1));
    }

    #[test]
    fn test_segments_intersect_disjoint() {
        let mut chain = Chain::new();
        let a1 = chain.add_band(Vector2::new(0.0, 0.0));
        let a2 = chain.add_band(Vector2::new(1.0, 0.0));
        let b1 = chain.add_band(Vector2::new(0.0, 1.0));
        let b2 = chain.add_band(Vector2::new(1.0, 1.0));

        chain.link_forward(a1, a2);
        chain.link_forward(b1, b2);

        assert!(!chain.segments_intersect(a1, b1));
        // Tail segments have no line piece
        assert!(!chain.segments_intersect(a2, b2));
    }

    #[test]
    fn test_hinge_walk_open_chain() {
        let mut chain = Chain::new();
        let ids: Vec<_> = (0..4).map(|i| simple_hinge(&mut chain, i as f64)).collect();
        for w in ids.windows(2) {
            chain.link_forward(w[0], w[1]);
        }

        let walked: Vec<_> = chain.hinge_walk(ids[0]).collect();
        assert_eq!(walked, ids);
    }

    #[test]
    fn test_hinge_walk_closed_loop() {
        let mut chain = Chain::new();
        let ids: Vec<_> = (0..4).map(|i| simple_hinge(&mut chain, i as f64)).collect();
        for w in ids.windows(2) {
            chain.link_forward(w[0], w[1]);
        }
        chain.link_forward(ids[3], ids[0]);

        let walked: Vec<_> = chain.hinge_walk(ids[0]).collect();
        assert_eq!(walked, ids);
    }

    #[test]
    fn test_curvature_straight_line_is_degenerate_free() {
        let mut tape = Tape::new();
        let mut chain = Chain::new();
        let ids: Vec<_> = (0..3).map(|i| simple_hinge(&mut chain, i as f64)).collect();
        for w in ids.windows(2) {
            chain.link_forward(w[0], w[1]);
        }

        for &id in &ids {
            chain.get_mut(id).declare_variables(&mut tape);
        }

        let recs: Vec<_> = ids
            .iter()
            .map(|&id| chain.get(id).as_hinge().unwrap().rec().unwrap())
            .collect();

        let k = record_curvature(&mut tape, &recs[0], &recs[1], &recs[2]).unwrap();
        assert_eq!(tape.value(k), 0.0);
    }
}
