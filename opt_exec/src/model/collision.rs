//! Spatial collision grid
//!
//! A uniform grid of square zones covering the board. Each zone tracks the
//! segments whose bounding extent overlaps its square, answering the
//! broad-phase "does this pair need an exact intersection test" question
//! without the O(n^2) all-pairs scan.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::Vector2;
use std::collections::BTreeSet;

// Internal
use super::chain::SegmentId;
use util::raise_error;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug)]
pub struct Aabb {
    pub min: Vector2<f64>,
    pub max: Vector2<f64>,
}

/// A fixed axis-aligned square cell of the grid.
pub struct CollisionZone {
    /// Position of the zone's lower corner.
    position: Vector2<f64>,

    /// Side length of the zone's square.
    ///
    /// Units: meters
    side: f64,

    /// Segments registered once at import time (boundary bands).
    fixed_segments: BTreeSet<SegmentId>,

    /// Segments re-registered every optimization call (hinge pieces).
    moving_segments: BTreeSet<SegmentId>,
}

/// The uniform grid of collision zones.
pub struct CollisionGrid {
    /// Zones in row-major order, `width * height` cells.
    zones: Vec<CollisionZone>,

    /// Number of cells along the x axis.
    width: u32,

    /// Number of cells along the y axis.
    height: u32,

    /// Cell side length.
    ///
    /// Units: meters
    side: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Aabb {
    /// Bounding box of two points.
    pub fn from_points(a: Vector2<f64>, b: Vector2<f64>) -> Self {
        Self {
            min: Vector2::new(a.x.min(b.x), a.y.min(b.y)),
            max: Vector2::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// Grow the box by `margin` on every side.
    pub fn inflate(&self, margin: f64) -> Self {
        Self {
            min: self.min - Vector2::new(margin, margin),
            max: self.max + Vector2::new(margin, margin),
        }
    }

    /// Extend the box to cover another.
    pub fn merge(&self, other: &Aabb) -> Self {
        Self {
            min: Vector2::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Vector2::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }
}

impl CollisionZone {
    fn new(position: Vector2<f64>, side: f64) -> Self {
        Self {
            position,
            side,
            fixed_segments: BTreeSet::new(),
            moving_segments: BTreeSet::new(),
        }
    }

    /// Cheap axis-aligned overlap check between the queried bounding region
    /// and this zone's square. Candidate selection only, not the exact test.
    pub fn collides(&self, aabb: &Aabb) -> bool {
        aabb.max.x >= self.position.x
            && aabb.min.x <= self.position.x + self.side
            && aabb.max.y >= self.position.y
            && aabb.min.y <= self.position.y + self.side
    }

    /// Register a segment with this zone. Registration is a back-reference,
    /// never ownership.
    fn register_segment(&mut self, id: SegmentId, moving: bool) {
        if moving {
            self.moving_segments.insert(id);
        } else {
            self.fixed_segments.insert(id);
        }
    }

    pub fn registered_segments(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.fixed_segments
            .iter()
            .chain(self.moving_segments.iter())
            .copied()
    }

    /// Position of the zone's lower corner.
    pub fn position(&self) -> Vector2<f64> {
        self.position
    }
}

impl CollisionGrid {
    /// Create a grid of `width * height` empty zones with the given cell
    /// side length.
    pub fn new(width: u32, height: u32, side: f64) -> Self {
        let mut zones = Vec::with_capacity((width * height) as usize);

        for x in 0..width {
            for y in 0..height {
                zones.push(CollisionZone::new(
                    Vector2::new(x as f64 * side, y as f64 * side),
                    side,
                ));
            }
        }

        Self {
            zones,
            width,
            height,
            side,
        }
    }

    /// Map a position to its owning cell.
    ///
    /// A position outside `[0, width) x [0, height)` cells means the track
    /// does not fit the configured board, which is a fatal configuration
    /// error.
    pub fn cell_of(&self, position: &Vector2<f64>) -> (u32, u32) {
        let x = (position.x / self.side).floor();
        let y = (position.y / self.side).floor();

        if x < 0.0 || x >= self.width as f64 || y < 0.0 || y >= self.height as f64 {
            raise_error!(
                "Position ({}, {}) lies outside the configured collision board",
                position.x,
                position.y
            );
        }

        (x as u32, y as u32)
    }

    /// Map a position to the nearest cell, clamping to the board edge.
    ///
    /// Registration extents may legitimately overhang the board (hinge
    /// extents are inflated by the lateral travel range), so unlike
    /// [`CollisionGrid::cell_of`] this never fails.
    fn cell_of_clamped(&self, position: &Vector2<f64>) -> (u32, u32) {
        let x = (position.x / self.side).floor().max(0.0) as u32;
        let y = (position.y / self.side).floor().max(0.0) as u32;

        (x.min(self.width - 1), y.min(self.height - 1))
    }

    fn zone_index(&self, x: u32, y: u32) -> usize {
        (x * self.height + y) as usize
    }

    /// Register a segment with every zone its bounding extent overlaps. The
    /// extent is clamped to the board, so only its on-board part registers.
    pub fn register_segment(&mut self, id: SegmentId, aabb: &Aabb, moving: bool) {
        let (x0, y0) = self.cell_of_clamped(&aabb.min);
        let (x1, y1) = self.cell_of_clamped(&aabb.max);

        for x in x0..=x1 {
            for y in y0..=y1 {
                let idx = self.zone_index(x, y);
                if self.zones[idx].collides(aabb) {
                    self.zones[idx].register_segment(id, moving);
                }
            }
        }
    }

    /// Drop all moving-segment registrations, ahead of a re-registration
    /// pass.
    pub fn clear_moving(&mut self) {
        for zone in self.zones.iter_mut() {
            zone.moving_segments.clear();
        }
    }

    /// All registered segments of zones whose square the queried bounding
    /// region overlaps. Broad-phase candidates only; the exact intersection
    /// test decides.
    pub fn candidates(&self, aabb: &Aabb) -> BTreeSet<SegmentId> {
        let mut out = BTreeSet::new();

        let (x0, y0) = self.cell_of(&aabb.min);
        let (x1, y1) = self.cell_of(&aabb.max);

        for x in x0..=x1 {
            for y in y0..=y1 {
                let zone = &self.zones[self.zone_index(x, y)];
                if zone.collides(aabb) {
                    out.extend(zone.registered_segments());
                }
            }
        }

        out
    }

    pub fn zones(&self) -> impl Iterator<Item = &CollisionZone> {
        self.zones.iter()
    }

    /// Cell side length.
    pub fn side(&self) -> f64 {
        self.side
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cell_of() {
        let grid = CollisionGrid::new(4, 4, 10.0);

        assert_eq!(grid.cell_of(&Vector2::new(0.0, 0.0)), (0, 0));
        assert_eq!(grid.cell_of(&Vector2::new(9.9, 10.0)), (0, 1));
        assert_eq!(grid.cell_of(&Vector2::new(35.0, 25.0)), (3, 2));
    }

    #[test]
    #[should_panic]
    fn test_cell_of_outside_board_is_fatal() {
        let grid = CollisionGrid::new(4, 4, 10.0);
        grid.cell_of(&Vector2::new(40.0, 0.0));
    }

    #[test]
    fn test_registration_covers_spanning_segment() {
        let mut grid = CollisionGrid::new(4, 4, 10.0);

        // Segment spanning cells (0,0) through (2,0)
        let aabb = Aabb::from_points(Vector2::new(1.0, 1.0), Vector2::new(25.0, 2.0));
        grid.register_segment(7, &aabb, false);

        let probe = Aabb::from_points(Vector2::new(15.0, 1.0), Vector2::new(16.0, 2.0));
        assert!(grid.candidates(&probe).contains(&7));
    }

    #[test]
    fn test_registration_clamps_overhanging_extent() {
        let mut grid = CollisionGrid::new(4, 4, 10.0);

        // Inflated extent overhanging the lower board edge
        let aabb = Aabb::from_points(Vector2::new(2.0, 2.0), Vector2::new(4.0, 4.0)).inflate(5.0);
        grid.register_segment(9, &aabb, true);

        let probe = Aabb::from_points(Vector2::new(1.0, 1.0), Vector2::new(2.0, 2.0));
        assert!(grid.candidates(&probe).contains(&9));
    }

    #[test]
    fn test_disjoint_regions_share_no_candidates() {
        let mut grid = CollisionGrid::new(4, 4, 10.0);

        let aabb = Aabb::from_points(Vector2::new(1.0, 1.0), Vector2::new(2.0, 2.0));
        grid.register_segment(3, &aabb, false);

        let probe = Aabb::from_points(Vector2::new(31.0, 31.0), Vector2::new(32.0, 32.0));
        assert!(grid.candidates(&probe).is_empty());
    }

    #[test]
    fn test_clear_moving_keeps_fixed() {
        let mut grid = CollisionGrid::new(4, 4, 10.0);

        let aabb = Aabb::from_points(Vector2::new(1.0, 1.0), Vector2::new(2.0, 2.0));
        grid.register_segment(1, &aabb, false);
        grid.register_segment(2, &aabb, true);

        grid.clear_moving();

        let candidates = grid.candidates(&aabb);
        assert!(candidates.contains(&1));
        assert!(!candidates.contains(&2));
    }
}
