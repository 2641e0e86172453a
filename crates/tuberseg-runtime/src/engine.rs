use crate::error::RuntimeError;
use crate::request::ContainerRun;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// The container engines we know how to drive, in detection preference
/// order. Apptainer and Singularity share a CLI surface and differ only
/// in binary name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Docker,
    Apptainer,
    Singularity,
}

impl Engine {
    pub fn binary(self) -> &'static str {
        match self {
            Engine::Docker => "docker",
            Engine::Apptainer => "apptainer",
            Engine::Singularity => "singularity",
        }
    }

    /// Arguments that prove the engine is installed and usable.
    /// `docker ps` also verifies the daemon is reachable; the HPC
    /// engines are daemonless so a version probe suffices.
    fn probe_args(self) -> &'static [&'static str] {
        match self {
            Engine::Docker => &["ps"],
            Engine::Apptainer | Engine::Singularity => &["--version"],
        }
    }

    fn is_usable(self) -> bool {
        Command::new(self.binary())
            .args(self.probe_args())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.binary())
    }
}

/// A detected container engine. Translates engine-agnostic
/// [`ContainerRun`] requests into engine-specific command lines and
/// executes them.
#[derive(Debug, Clone, Copy)]
pub struct ContainerRuntime {
    engine: Engine,
}

impl ContainerRuntime {
    /// Probe for an engine in fixed preference order: Docker first,
    /// then Apptainer, then Singularity.
    pub fn detect() -> Result<Self, RuntimeError> {
        for engine in [Engine::Docker, Engine::Apptainer, Engine::Singularity] {
            if engine.is_usable() {
                info!("using container runtime: {engine}");
                return Ok(Self { engine });
            }
            debug!("container runtime not usable: {engine}");
        }
        Err(RuntimeError::NoRuntime)
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Make sure an image is present locally before the per-subject
    /// loop starts, so a pull failure surfaces once instead of per
    /// subject. The HPC engines pull transparently on first `run`, so
    /// for them this is a no-op.
    pub fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.engine != Engine::Docker {
            debug!("{} pulls {image} on first use", self.engine);
            return Ok(());
        }

        let inspected = Command::new("docker")
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if inspected {
            debug!("image already present: {image}");
            return Ok(());
        }

        info!("pulling image {image}");
        let output = Command::new("docker")
            .args(["pull", image])
            .output()
            .map_err(|source| RuntimeError::Spawn {
                command: format!("docker pull {image}"),
                source,
            })?;
        if !output.status.success() {
            return Err(RuntimeError::Pull {
                image: image.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// Render a request into the full argument vector for this engine,
    /// binary included. Pure; the invocation path and the tests share
    /// it so what is asserted is what runs.
    pub fn command_line(&self, run: &ContainerRun) -> Vec<String> {
        let mut argv: Vec<String> = Vec::new();
        match self.engine {
            Engine::Docker => {
                argv.extend(["docker", "run", "--rm"].map(String::from));
                if run.gpu {
                    argv.extend(["--gpus", "all"].map(String::from));
                }
                for bind in &run.binds {
                    let mut spec = format!("{}:{}", bind.host.display(), bind.container);
                    if bind.read_only {
                        spec.push_str(":ro");
                    }
                    argv.push("-v".to_string());
                    argv.push(spec);
                }
                if let Some(dir) = &run.workdir {
                    argv.push("-w".to_string());
                    argv.push(dir.clone());
                }
                argv.push(run.image.clone());
            }
            Engine::Apptainer | Engine::Singularity => {
                argv.push(self.engine.binary().to_string());
                argv.push("run".to_string());
                if run.gpu {
                    argv.push("--nv".to_string());
                }
                if run.writable_tmpfs {
                    argv.push("--writable-tmpfs".to_string());
                }
                if let Some(dir) = &run.workdir {
                    argv.push("--pwd".to_string());
                    argv.push(dir.clone());
                }
                for bind in &run.binds {
                    // Bind mounts are read-only by default under these
                    // engines in many site configs; we pass no mode and
                    // rely on the default semantics, matching how the
                    // images were built to be driven.
                    argv.push("--bind".to_string());
                    argv.push(format!("{}:{}", bind.host.display(), bind.container));
                }
                argv.push(format!("docker://{}", run.image));
            }
        }
        argv
    }

    /// Execute a request. Bind sources are checked on the host first so
    /// a typo fails with a path, not an opaque engine error. With
    /// capture enabled stdout/stderr are collected and stderr is
    /// attached to any failure; otherwise the child inherits our
    /// streams for live tool output.
    pub fn invoke(&self, run: &ContainerRun) -> Result<(), RuntimeError> {
        for bind in &run.binds {
            if !bind.host.exists() {
                return Err(RuntimeError::MissingBindSource(bind.host.clone()));
            }
        }

        let argv = self.command_line(run);
        let rendered = argv.join(" ");
        debug!("invoking: {rendered}");

        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);

        if run.capture {
            let output = command.output().map_err(|source| RuntimeError::Spawn {
                command: rendered.clone(),
                source,
            })?;
            if !output.status.success() {
                return Err(RuntimeError::Invocation {
                    command: rendered,
                    code: output.status.code(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
        } else {
            let status = command.status().map_err(|source| RuntimeError::Spawn {
                command: rendered.clone(),
                source,
            })?;
            if !status.success() {
                warn!("container exited with {:?}", status.code());
                return Err(RuntimeError::Invocation {
                    command: rendered,
                    code: status.code(),
                    stderr: String::new(),
                });
            }
        }
        Ok(())
    }
}
