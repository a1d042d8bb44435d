use std::fs;
use std::path::Path;
use crate::error::TrackError;
use crate::track::{validate, TrackDefinition};

pub fn load_tracks_from_json(path: &Path) -> Result<TrackDefinition, TrackError> {
    let content = fs::read_to_string(path).map_err(|source| TrackError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| TrackError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load and check the topology. This is the coordinator's "load topology" step.
pub fn load_validated(path: &Path) -> Result<TrackDefinition, TrackError> {
    let definition = load_tracks_from_json(path)?;
    validate(&definition)?;
    Ok(definition)
}
