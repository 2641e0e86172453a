use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration problems. These abort the whole run; per-subject
/// failures inside a stage are captured in `StageOutcome` instead and
/// never surface as errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("input directory not found: {0}")]
    InputRootMissing(PathBuf),

    #[error("no subject directories found in {0}")]
    NoSubjects(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {path}: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
