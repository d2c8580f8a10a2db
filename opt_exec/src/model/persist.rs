//! Hinge state persistence codec
//!
//! Binary format: one `(crossposition: f64 LE, speed: f64 LE)` pair per
//! hinge, in chain-walk order from the head (following `next` until the
//! chain end or until the head is revisited). Reads are all-or-nothing: a
//! record-count mismatch in either direction fails the whole load.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::info;
use std::fs;
use std::path::Path;
use thiserror::Error;

// Internal
use super::HingeModel;
use util::raise_error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Size of one hinge record on disk: two little-endian f64s.
const RECORD_SIZE: usize = 16;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An error that occurs while persisting or loading hinge state.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("An IO operation failed: {0}")]
    IoError(std::io::Error),

    #[error("The model has no hinges to persist")]
    EmptyModel,

    #[error("File length {0} is not a whole number of hinge records")]
    MalformedFile(usize),

    #[error("The file contains too many hinges (expected {expected}, found {found})")]
    TooManyRecords { expected: usize, found: usize },

    #[error("The file doesn't contain all the hinges (expected {expected}, found {found})")]
    TooFewRecords { expected: usize, found: usize },
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Write the model's hinge state to the given path.
pub fn save_hinge_model<P: AsRef<Path>>(
    path: P,
    model: &HingeModel,
) -> Result<(), PersistError> {
    let first = match model.first_hinge() {
        Some(f) => f,
        None => return Err(PersistError::EmptyModel),
    };

    let mut buf: Vec<u8> = Vec::new();

    for id in model.chain().hinge_walk(first) {
        let hinge = match model.chain().get(id).as_hinge() {
            Some(h) => h,
            None => raise_error!("Hinge chain is linked through a non-hinge segment"),
        };

        buf.extend_from_slice(&hinge.crossposition().to_le_bytes());
        buf.extend_from_slice(&hinge.speed().to_le_bytes());
    }

    fs::write(&path, buf).map_err(PersistError::IoError)?;

    info!("Saved hinge model to {:?}", path.as_ref());
    Ok(())
}

/// Load hinge state from the given path into an already built model.
///
/// The model's chain must contain exactly as many hinges as the file has
/// records.
pub fn read_hinge_model<P: AsRef<Path>>(
    path: P,
    model: &mut HingeModel,
) -> Result<(), PersistError> {
    info!("Reading hinges from {:?}", path.as_ref());

    let bytes = fs::read(&path).map_err(PersistError::IoError)?;

    if bytes.len() % RECORD_SIZE != 0 {
        return Err(PersistError::MalformedFile(bytes.len()));
    }
    let found = bytes.len() / RECORD_SIZE;

    let first = match model.first_hinge() {
        Some(f) => f,
        None => return Err(PersistError::EmptyModel),
    };
    let hinge_ids: Vec<_> = model.chain().hinge_walk(first).collect();
    let expected = hinge_ids.len();

    if found > expected {
        return Err(PersistError::TooManyRecords { expected, found });
    }
    if found < expected {
        return Err(PersistError::TooFewRecords { expected, found });
    }

    for (i, id) in hinge_ids.into_iter().enumerate() {
        let offset = i * RECORD_SIZE;
        let crossposition = read_f64_le(&bytes[offset..offset + 8]);
        let speed = read_f64_le(&bytes[offset + 8..offset + 16]);

        let hinge = match model.chain_mut().get_mut(id).as_hinge_mut() {
            Some(h) => h,
            None => raise_error!("Hinge chain is linked through a non-hinge segment"),
        };
        hinge.set_crossposition(crossposition);
        hinge.set_speed(speed);
    }

    info!("Model reading done ({} hinges)", expected);
    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Decode one little-endian f64 from an 8-byte slice.
fn read_f64_le(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    f64::from_le_bytes(buf)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::Params;
    use nalgebra::Vector2;

    fn chain_model(n: usize) -> HingeModel {
        let mut model = HingeModel::new(Params::default());
        let mut prev = None;
        for i in 0..n {
            let id = model.chain_mut().add_hinge(
                Vector2::new(100.0 + i as f64 * 10.0, 100.0),
                Vector2::new(0.0, 1.0),
                5.0,
                i as f64 * 10.0,
            );
            if let Some(p) = prev {
                model.chain_mut().link_forward(p, id);
            } else {
                model.set_first_hinge(id);
            }
            prev = Some(id);
        }
        model
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("raceline_persist_{}_{}", std::process::id(), name));
        p
    }

    #[test]
    fn test_round_trip_is_bit_exact() {
        let mut model = chain_model(5);
        let ids: Vec<_> = model
            .chain()
            .hinge_walk(model.first_hinge().unwrap())
            .collect();

        for (i, &id) in ids.iter().enumerate() {
            let h = model.chain_mut().get_mut(id).as_hinge_mut().unwrap();
            h.set_crossposition(0.1 * i as f64 - 0.25);
            h.set_speed(3.0 + i as f64 * 0.125);
        }

        let path = temp_path("round_trip");
        save_hinge_model(&path, &model).unwrap();

        let mut fresh = chain_model(5);
        read_hinge_model(&path, &mut fresh).unwrap();
        std::fs::remove_file(&path).ok();

        for (i, &id) in ids.iter().enumerate() {
            let original = model.chain().get(id).as_hinge().unwrap();
            let loaded = fresh.chain().get(id).as_hinge().unwrap();
            assert_eq!(
                original.crossposition().to_bits(),
                loaded.crossposition().to_bits(),
                "crossposition of hinge {} not bit-exact",
                i
            );
            assert_eq!(original.speed().to_bits(), loaded.speed().to_bits());
        }
    }

    #[test]
    fn test_too_many_records_fails() {
        let model = chain_model(5);
        let path = temp_path("too_many");
        save_hinge_model(&path, &model).unwrap();

        let mut short = chain_model(3);
        let result = read_hinge_model(&path, &mut short);
        std::fs::remove_file(&path).ok();

        assert!(matches!(
            result,
            Err(PersistError::TooManyRecords {
                expected: 3,
                found: 5
            })
        ));
    }

    #[test]
    fn test_too_few_records_fails() {
        let model = chain_model(3);
        let path = temp_path("too_few");
        save_hinge_model(&path, &model).unwrap();

        let mut long = chain_model(5);
        let result = read_hinge_model(&path, &mut long);
        std::fs::remove_file(&path).ok();

        assert!(matches!(
            result,
            Err(PersistError::TooFewRecords {
                expected: 5,
                found: 3
            })
        ));
    }

    #[test]
    fn test_malformed_file_fails() {
        let path = temp_path("malformed");
        std::fs::write(&path, [0u8; 17]).unwrap();

        let mut model = chain_model(1);
        let result = read_hinge_model(&path, &mut model);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(PersistError::MalformedFile(17))));
    }

    #[test]
    fn test_closed_loop_walk_terminates() {
        let mut model = chain_model(4);
        let ids: Vec<_> = model
            .chain()
            .hinge_walk(model.first_hinge().unwrap())
            .collect();
        model.chain_mut().link_forward(ids[3], ids[0]);

        let path = temp_path("closed_loop");
        save_hinge_model(&path, &model).unwrap();

        let metadata = std::fs::metadata(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(metadata.len(), 4 * RECORD_SIZE as u64);
    }
}
