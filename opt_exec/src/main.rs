//! Main optimizer executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise the session and logger
//!     - Load the optimizer parameters
//!     - Import the track and build the hinge model
//!     - Optionally restore a previously saved hinge model
//!     - Main loop:
//!         - Run a batch of optimization steps
//!         - Periodically save a visualisation snapshot to the session
//!         - Stop and save the model once the score drops below the
//!           convergence threshold
//!
//! # Modules
//!
//! All modules (e.g. the optimizer) shall meet the following requirements:
//!     1. Provide a public struct implementing the `util::module::State` trait.
//!

// ---------------------------------------------------------------------------
// USE MODULES FROM LIBRARY
// ---------------------------------------------------------------------------

use opt_lib::{
    model::{
        persist::{read_hinge_model, save_hinge_model},
        state::Optim,
        HingeModel,
    },
    track, viz,
};

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{debug, info, warn};
use nalgebra::Vector2;
use std::env;

// Internal
use util::{
    logger::{logger_init, LevelFilter},
    module::State,
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// File name of the converged hinge model within the session directory.
const MODEL_FILE_NAME: &str = "hinge_model.dat";

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("opt_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Racing Line Optimizer Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- PROCESS ARGUMENTS ----

    // Collect all arguments
    let args: Vec<String> = env::args().collect();

    debug!("CLI arguments: {:?}", args);

    // One argument is the track file, an optional second is a previously
    // saved hinge model to restore.
    let (track_path, model_path) = match args.len() {
        2 => (&args[1], None),
        3 => (&args[1], Some(&args[2])),
        n => {
            return Err(eyre!(
                "Expected one or two arguments (track file, optional saved model), found {}",
                n - 1
            ))
        }
    };

    // ---- INITIALISE MODULES ----

    info!("Initialising modules...");

    let mut optim = Optim::default();

    optim
        .init("optim.toml", &session)
        .wrap_err("Failed to initialise Optim")?;
    info!("Optim init complete");

    info!("Module initialisation complete\n");

    // ---- IMPORT TRACK ----

    let waypoints =
        track::read_track_csv(track_path).wrap_err("Failed to read the track file")?;

    // The import pen starts at the board centre, leaving the track room to
    // wind in every direction
    let track_start = {
        let p = optim.params();
        Vector2::new(
            p.board_width as f64 * p.collision_zone_side / 2.0,
            p.board_height as f64 * p.collision_zone_side / 2.0,
        )
    };

    let mut model = HingeModel::new(optim.params().clone());
    track::build_chain(&mut model, &waypoints, track_start);

    if model.hinge_count() == 0 {
        return Err(eyre!(
            "The track produced no hinges, is band_separation larger than the track?"
        ));
    }

    // ---- RESTORE SAVED MODEL ----

    if let Some(path) = model_path {
        read_hinge_model(path, &mut model).wrap_err("Failed to restore the saved hinge model")?;
    }

    optim.attach_model(model);

    // Log the starting score so runs are comparable
    if let Some(model) = optim.model_mut() {
        let mut tape = opt_lib::ad::Tape::new();
        let score = model.compute_score(&mut tape);
        info!("Initial score: {}", score);
    }

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let params = optim.params().clone();
    let mut num_cycles: u64 = 0;
    let mut converged = false;

    loop {
        // Optim processing
        let output = match optim.proc(&()) {
            Ok((o, r)) => {
                debug!(
                    "Cycle {}: score {} after {} steps",
                    num_cycles, o.score, r.steps_run
                );
                o
            }
            Err(e) => return Err(e).wrap_err("Error during Optim processing"),
        };

        // ---- SNAPSHOTS ----

        if params.snapshot_period_cycles > 0 && num_cycles % params.snapshot_period_cycles == 0 {
            info!("Cycle {}: score {}", num_cycles, output.score);

            if let Some(model) = optim.model() {
                let snapshot = viz::snapshot(model);
                if let Err(e) =
                    session.save(format!("viz/snapshot_{:08}.json", num_cycles), &snapshot)
                {
                    warn!("Could not save visualisation snapshot: {}", e);
                }
            }
        }

        // ---- CONVERGENCE ----

        if output.score < params.score_threshold {
            info!(
                "Converged at cycle {} with score {}",
                num_cycles, output.score
            );
            converged = true;
            break;
        }

        num_cycles += 1;
        if num_cycles >= params.max_cycles {
            warn!(
                "Reached the cycle limit ({}) without convergence, last score {}",
                params.max_cycles, output.score
            );
            break;
        }
    }

    // ---- SAVE RESULT ----

    if converged {
        let model = optim
            .model()
            .ok_or_else(|| eyre!("Model disappeared after convergence"))?;

        let mut path = session.session_root.clone();
        path.push(MODEL_FILE_NAME);

        save_hinge_model(&path, model).wrap_err("Failed to save the converged hinge model")?;
    }

    if let Some((first, last)) = optim.model().and_then(|m| m.first_last_score()) {
        info!("Score went from {} to {}", first, last);
    }

    // ---- SHUTDOWN ----

    info!("End of execution");

    Ok(())
}
