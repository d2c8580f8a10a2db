//! # Visualisation export
//!
//! Flattens the model into a list of coloured line pieces which the session
//! can serialise to JSON for offline plotting. The racing line is coloured by
//! hinge speed, the track boundaries are drawn white and the collision zone
//! edges dark grey.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Serialize;

// Internal
use crate::model::HingeModel;
use util::maths::{clamp, lin_map};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Colour of track boundary bands.
const BAND_COLOR: [u8; 3] = [255, 255, 255];

/// Colour of collision zone edges.
const ZONE_COLOR: [u8; 3] = [32, 32, 32];

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One coloured line piece of the visualisation.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct VizObject {
    /// Endpoints of the line piece.
    pub points: [[f64; 2]; 2],

    /// RGB colour.
    pub color: [u8; 3],
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Flatten the model into drawable line pieces.
pub fn snapshot(model: &HingeModel) -> Vec<VizObject> {
    let mut objects = Vec::new();

    // Speed range over the chain, for the racing line colour ramp
    let (min_speed, max_speed) = speed_range(model);

    for (id, segment) in model.chain().iter() {
        let (a, b) = match model.chain().line_piece(id) {
            Some(l) => l,
            None => continue,
        };

        let color = match segment.as_hinge() {
            Some(hinge) => speed_color(hinge.speed(), min_speed, max_speed),
            None => BAND_COLOR,
        };

        objects.push(VizObject {
            points: [[a.x, a.y], [b.x, b.y]],
            color,
        });
    }

    // Two leading edges per zone draw the full grid without doubled lines
    let side = model.grid().side();
    for zone in model.grid().zones() {
        let p = zone.position();

        objects.push(VizObject {
            points: [[p.x, p.y], [p.x + side, p.y]],
            color: ZONE_COLOR,
        });
        objects.push(VizObject {
            points: [[p.x, p.y], [p.x, p.y + side]],
            color: ZONE_COLOR,
        });
    }

    objects
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Minimum and maximum hinge speed over the chain.
fn speed_range(model: &HingeModel) -> (f64, f64) {
    let mut range: Option<(f64, f64)> = None;

    for (_, segment) in model.chain().iter() {
        if let Some(hinge) = segment.as_hinge() {
            let speed = hinge.speed();
            range = Some(match range {
                Some((min, max)) => (min.min(speed), max.max(speed)),
                None => (speed, speed),
            });
        }
    }

    range.unwrap_or((0.0, 0.0))
}

/// Map a speed onto a blue (slow) to red (fast) ramp.
fn speed_color(speed: f64, min: f64, max: f64) -> [u8; 3] {
    if max - min <= f64::EPSILON {
        return [255, 0, 0];
    }

    let t = clamp(&lin_map((min, max), (0.0, 1.0), speed), &0.0, &1.0);
    [(t * 255.0) as u8, 0, ((1.0 - t) * 255.0) as u8]
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::Params;
    use nalgebra::Vector2;

    #[test]
    fn test_snapshot_covers_chain_and_grid() {
        let params = Params {
            board_width: 4,
            board_height: 4,
            collision_zone_side: 100.0,
            ..Params::default()
        };
        let mut model = HingeModel::new(params);

        let a = model.chain_mut().add_hinge(
            Vector2::new(100.0, 100.0),
            Vector2::new(0.0, 1.0),
            5.0,
            0.0,
        );
        let b = model.chain_mut().add_hinge(
            Vector2::new(110.0, 100.0),
            Vector2::new(0.0, 1.0),
            5.0,
            10.0,
        );
        model.chain_mut().link_forward(a, b);
        model.set_first_hinge(a);

        let objects = snapshot(&model);

        // One hinge line piece plus two edges for each of the 16 zones
        assert_eq!(objects.len(), 1 + 2 * 16);
    }

    #[test]
    fn test_speed_color_ramp_endpoints() {
        assert_eq!(speed_color(0.0, 0.0, 10.0), [0, 0, 255]);
        assert_eq!(speed_color(10.0, 0.0, 10.0), [255, 0, 0]);
        // Degenerate range falls back to red
        assert_eq!(speed_color(5.0, 5.0, 5.0), [255, 0, 0]);
    }

    #[test]
    fn test_snapshot_serialises_to_json() {
        let object = VizObject {
            points: [[0.0, 0.0], [1.0, 2.0]],
            color: [255, 0, 0],
        };

        let json = serde_json::to_string(&object).unwrap();
        assert!(json.contains("\"points\""));
        assert!(json.contains("\"color\""));
    }
}
