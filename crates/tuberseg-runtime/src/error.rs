use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no container runtime found; need Docker, Apptainer, or Singularity")]
    NoRuntime,

    #[error("bind source does not exist on host: {0}")]
    MissingBindSource(PathBuf),

    #[error("failed to pull image {image}: {detail}")]
    Pull { image: String, detail: String },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The container process exited non-zero. Carries the full rendered
    /// command, the exit code (None when killed by a signal), and captured
    /// stderr when output capture was requested. Tool output is never
    /// interpreted beyond this.
    #[error("container execution failed: `{command}` exited with {code:?}: {stderr}")]
    Invocation {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}
