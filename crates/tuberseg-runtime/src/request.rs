use std::path::{Path, PathBuf};

/// One host-to-container path binding. The container path carries no
/// engine syntax; access-mode suffixes are added at translation time.
#[derive(Debug, Clone)]
pub struct Bind {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Bind {
    pub fn read_only(host: &Path, container: &str) -> Self {
        Self {
            host: host.to_path_buf(),
            container: container.to_string(),
            read_only: true,
        }
    }

    pub fn read_write(host: &Path, container: &str) -> Self {
        Self {
            host: host.to_path_buf(),
            container: container.to_string(),
            read_only: false,
        }
    }
}

/// A single engine-agnostic container invocation. Immutable once built;
/// the detected runtime translates it to engine-specific syntax.
#[derive(Debug, Clone)]
pub struct ContainerRun {
    pub image: String,
    pub binds: Vec<Bind>,
    pub gpu: bool,
    pub workdir: Option<String>,
    /// Writable in-memory overlay for tools that write temp files while
    /// running under an engine whose root filesystem is read-only.
    pub writable_tmpfs: bool,
    pub capture: bool,
}

impl ContainerRun {
    pub fn new(image: &str) -> Self {
        Self {
            image: image.to_string(),
            binds: Vec::new(),
            gpu: false,
            workdir: None,
            writable_tmpfs: false,
            capture: true,
        }
    }

    pub fn bind_ro(mut self, host: &Path, container: &str) -> Self {
        self.binds.push(Bind::read_only(host, container));
        self
    }

    pub fn bind_rw(mut self, host: &Path, container: &str) -> Self {
        self.binds.push(Bind::read_write(host, container));
        self
    }

    pub fn gpu(mut self, enabled: bool) -> Self {
        self.gpu = enabled;
        self
    }

    pub fn workdir(mut self, dir: &str) -> Self {
        self.workdir = Some(dir.to_string());
        self
    }

    pub fn writable_tmpfs(mut self) -> Self {
        self.writable_tmpfs = true;
        self
    }
}
