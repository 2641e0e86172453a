use crate::config::ensure_dir;
use anyhow::{Context, Result};
use chrono::Local;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Per-run logging context: a console layer plus a timestamped log file
/// under `logs/`. Constructed exactly once per process, before any other
/// component runs; nothing mutates logger state after this point.
pub struct RunLog {
    pub log_path: PathBuf,
}

impl RunLog {
    pub fn init(name: &str, logs_dir: &Path) -> Result<Self> {
        ensure_dir(logs_dir)?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let log_path = logs_dir.join(format!("{}_{}.log", name, timestamp));
        let file = File::create(&log_path)
            .with_context(|| format!("failed to create log file {}", log_path.display()))?;
        let handle = Arc::new(Mutex::new(file));

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let console_layer = tracing_subscriber::fmt::layer().with_target(false);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(move || LogFileWriter(handle.clone()));

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .context("logging already initialized")?;

        Ok(Self { log_path })
    }
}

struct LogFileWriter(Arc<Mutex<File>>);

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.lock() {
            Ok(mut file) => file.write(buf),
            // A poisoned lock only drops log lines, never the run.
            Err(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.0.lock() {
            Ok(mut file) => file.flush(),
            Err(_) => Ok(()),
        }
    }
}
