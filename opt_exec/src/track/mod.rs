//! # Track import
//!
//! Reads a track description as a CSV file of waypoints and builds the
//! model's segment chain from it. Each waypoint is a heading change plus a
//! step length and the distances to the left/right track boundary. Steps are
//! fused together until they cover at least the configured band separation,
//! at which point a boundary band pair and an optimizable hinge are spawned.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::info;
use nalgebra::Vector2;
use serde::Deserialize;
use std::f64::consts::FRAC_PI_4;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

// Internal
use crate::model::chain::SegmentId;
use crate::model::HingeModel;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One waypoint of the track description.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct Waypoint {
    /// Step length from the previous waypoint, in raw track units.
    pub forward: f64,

    /// Heading change at this waypoint, in raw track units.
    pub angle: f64,

    /// Distance to the left track boundary, in raw track units.
    pub left: f64,

    /// Distance to the right track boundary, in raw track units.
    pub right: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An error that occurs while reading a track file.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("Cannot open the track file: {0}")]
    IoError(std::io::Error),

    #[error("Cannot parse the track file: {0}")]
    CsvError(csv::Error),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Read a track waypoint list from a CSV file with a
/// `forward,angle,left,right` header.
pub fn read_track_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Waypoint>, TrackError> {
    info!("Loading track from {:?}", path.as_ref());

    let file = std::fs::File::open(path).map_err(TrackError::IoError)?;
    read_track(file)
}

/// Read a track waypoint list from any CSV source.
pub fn read_track<R: Read>(source: R) -> Result<Vec<Waypoint>, TrackError> {
    let mut reader = csv::Reader::from_reader(source);

    let mut waypoints = Vec::new();
    for record in reader.deserialize() {
        waypoints.push(record.map_err(TrackError::CsvError)?);
    }

    Ok(waypoints)
}

/// Build the model's segment chain from a waypoint list.
///
/// The virtual pen starts at `start` heading pi/4 and walks the waypoints:
/// step along the current heading, then turn by the waypoint's delta. Step
/// lengths are scaled by `forward_factor`, turn deltas by `angle_factor` and
/// boundary distances by `bound_factor`; the fuse and the station run in raw
/// waypoint units. Once the fused length exceeds `band_separation` the pen
/// spawns one band on each boundary and one hinge on the centre line, linked
/// to the previously spawned triple, and the spawning waypoint's length is
/// carried into the next fuse interval. The hinge chain head is set to the
/// first spawned hinge and the boundary bands are registered with the
/// collision grid.
pub fn build_chain(model: &mut HingeModel, waypoints: &[Waypoint], start: Vector2<f64>) {
    let params = model.params().clone();

    let mut position = start;
    let mut heading = FRAC_PI_4;
    let mut station = 0.0;
    let mut fuse = 0.0;

    let mut prev: Option<SpawnedTriple> = None;
    let mut hinge_count = 0usize;

    for waypoint in waypoints {
        position += Vector2::new(heading.cos(), heading.sin())
            * (waypoint.forward * params.forward_factor);
        heading += waypoint.angle * params.angle_factor;

        if fuse > params.band_separation {
            // Carry the spawning step into the next interval
            fuse = waypoint.forward;

            // Lateral unit direction, pointing towards the left boundary
            let lateral = Vector2::new(-heading.sin(), heading.cos());
            let left_extent = waypoint.left * params.bound_factor;
            let right_extent = waypoint.right * params.bound_factor;

            let left = model.chain_mut().add_band(position + lateral * left_extent);
            let right = model
                .chain_mut()
                .add_band(position - lateral * right_extent);

            let zero_position = position + lateral * ((left_extent - right_extent) / 2.0);
            let hinge = model.chain_mut().add_hinge(
                zero_position,
                lateral,
                (left_extent + right_extent) / 2.0,
                station,
            );
            if let Some(h) = model.chain_mut().get_mut(hinge).as_hinge_mut() {
                h.set_speed(params.initial_speed);
            }
            hinge_count += 1;

            if let Some(p) = prev {
                model.chain_mut().link_forward(p.left, left);
                model.chain_mut().link_forward(p.right, right);
                model.chain_mut().link_forward(p.hinge, hinge);
            } else {
                model.set_first_hinge(hinge);
            }

            prev = Some(SpawnedTriple { left, right, hinge });
        } else {
            fuse += waypoint.forward;
        }

        station += waypoint.forward;
    }

    model.finalise_import();

    info!(
        "Track import done: {} waypoints fused into {} hinges",
        waypoints.len(),
        hinge_count
    );
}

// ---------------------------------------------------------------------------
// PRIVATE DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Segment ids of the most recently spawned band pair and hinge.
#[derive(Clone, Copy)]
struct SpawnedTriple {
    left: SegmentId,
    right: SegmentId,
    hinge: SegmentId,
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
