//! Host environment utility functions

use std::path::PathBuf;
use thiserror::Error;

/// The environment variable pointing at the software root directory.
pub const SW_ROOT_ENV_VAR: &str = "RACELINE_SW_ROOT";

/// Errors associated with the host environment.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("The software root environment variable (RACELINE_SW_ROOT) is not set")]
    SwRootNotSet,
}

/// Get the software root directory from the environment.
///
/// All parameter files and session directories are resolved relative to this
/// root.
pub fn get_raceline_sw_root() -> Result<PathBuf, HostError> {
    match std::env::var(SW_ROOT_ENV_VAR) {
        Ok(p) => Ok(PathBuf::from(p)),
        Err(_) => Err(HostError::SwRootNotSet),
    }
}
