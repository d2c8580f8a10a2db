//! Optimizer module state
//!
//! Wraps the hinge model and its tape behind the cyclic module interface so
//! the executable can drive it like any other module: `init` to load
//! parameters, `proc` to run a batch of optimization steps.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::info;
use thiserror::Error;

// Internal
use super::{HingeModel, Params};
use crate::ad::Tape;
use util::{module, params, session::Session};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Optimizer module state.
#[derive(Default)]
pub struct Optim {
    /// Optimizer parameters, populated during init.
    params: Params,

    /// The model under optimization. Attached after init by the track
    /// import.
    model: Option<HingeModel>,

    /// Tape reused across optimization steps.
    tape: Tape,

    /// Total optimization steps run since init.
    steps_run: u64,
}

/// Output of one processing cycle.
#[derive(Clone, Copy, Debug)]
pub struct OptimOutput {
    /// Score observed at the last optimization step of the cycle.
    pub score: f64,
}

/// Status of the optimizer module.
#[derive(Clone, Copy, Debug)]
pub struct OptimStatus {
    /// Total optimization steps run since init.
    pub steps_run: u64,

    /// Score observed at the first and most recent optimization step.
    pub first_last_score: Option<(f64, f64)>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An error that can occur during optimizer processing.
#[derive(Debug, Error)]
pub enum OptimError {
    #[error("Processing was attempted before a model was attached")]
    NoModel,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Optim {
    /// Hand the built model to the module.
    pub fn attach_model(&mut self, model: HingeModel) {
        self.model = Some(model);
    }

    pub fn model(&self) -> Option<&HingeModel> {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> Option<&mut HingeModel> {
        self.model.as_mut()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn tape_mut(&mut self) -> &mut Tape {
        &mut self.tape
    }
}

impl module::State for Optim {
    type InitData = &'static str;
    type InitError = params::LoadError;

    type InputData = ();
    type OutputData = OptimOutput;
    type StatusReport = OptimStatus;
    type ProcError = OptimError;

    /// Initialise the optimizer module.
    ///
    /// Expects the path to the module's parameter file relative to the
    /// software's parameter directory.
    fn init(&mut self, init_data: Self::InitData, _session: &Session) -> Result<(), Self::InitError> {
        self.params = params::load(init_data)?;

        info!("Optimizer initialised");

        Ok(())
    }

    /// Run `optimizations_per_cycle` optimization steps on the attached
    /// model.
    fn proc(
        &mut self,
        _input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let model = match self.model.as_mut() {
            Some(m) => m,
            None => return Err(OptimError::NoModel),
        };

        // With an empty batch the reported score is the current one, so a
        // non-converged model is never mistaken for converged
        let mut score = if self.params.optimizations_per_cycle == 0 {
            model.compute_score(&mut self.tape)
        } else {
            0.0
        };

        for _ in 0..self.params.optimizations_per_cycle {
            score = model.optimize(&mut self.tape);
            self.steps_run += 1;
        }

        Ok((
            OptimOutput { score },
            OptimStatus {
                steps_run: self.steps_run,
                first_last_score: model.first_last_score(),
            },
        ))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::chain::SegmentId;
    use nalgebra::Vector2;
    use util::module::State;

    fn test_model(params: Params) -> HingeModel {
        let mut model = HingeModel::new(params);
        let mut prev: Option<SegmentId> = None;
        for i in 0..4 {
            let id = model.chain_mut().add_hinge(
                Vector2::new(100.0 + i as f64 * 10.0, 100.0),
                Vector2::new(0.0, 1.0),
                5.0,
                i as f64 * 10.0,
            );
            model
                .chain_mut()
                .get_mut(id)
                .as_hinge_mut()
                .unwrap()
                .set_speed(if i == 1 { 20.0 } else { 5.0 });
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

    #[test]
    fn test_proc_without_model_fails() {
        let mut optim = Optim::default();
        assert!(matches!(optim.proc(&()), Err(OptimError::NoModel)));
    }

    #[test]
    fn test_proc_runs_configured_batch() {
        let params = Params {
            max_acceleration: 0.5,
            optimizations_per_cycle: 7,
            ..Params::default()
        };

        let mut optim = Optim {
            params: params.clone(),
            ..Optim::default()
        };
        optim.attach_model(test_model(params));

        let (output, status) = optim.proc(&()).unwrap();
        assert_eq!(status.steps_run, 7);
        assert!(output.score >= 0.0);

        let (_, status) = optim.proc(&()).unwrap();
        assert_eq!(status.steps_run, 14);
        assert!(status.first_last_score.is_some());
    }

    #[test]
    fn test_empty_batch_reports_current_score() {
        let params = Params {
            max_acceleration: 0.5,
            optimizations_per_cycle: 0,
            ..Params::default()
        };

        let mut optim = Optim {
            params: params.clone(),
            ..Optim::default()
        };
        optim.attach_model(test_model(params));

        // The model has an acceleration violation, so the reported score
        // must be positive even though no step runs
        let (output, status) = optim.proc(&()).unwrap();
        assert_eq!(status.steps_run, 0);
        assert!(output.score > 0.0);
    }
}
