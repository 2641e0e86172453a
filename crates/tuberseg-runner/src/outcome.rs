use crate::stages::StageDefinition;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use tuberseg_core::format_elapsed;
use tuberseg_runtime::RuntimeError;

/// Why a single subject failed within a stage. Precondition,
/// invocation, postcondition, and cheap-path failures stay distinct so
/// reports can say which gate a subject missed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    MissingInput {
        detail: String,
    },
    Invocation {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    NoOutput {
        detail: String,
    },
    Copy {
        detail: String,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::MissingInput { detail } => write!(f, "missing input: {detail}"),
            FailureReason::Invocation { code, stderr, .. } => {
                write!(f, "container exited with {code:?}")?;
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            FailureReason::NoOutput { detail } => write!(f, "no output produced: {detail}"),
            FailureReason::Copy { detail } => write!(f, "copy failed: {detail}"),
        }
    }
}

impl From<RuntimeError> for FailureReason {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Invocation {
                command,
                code,
                stderr,
            } => FailureReason::Invocation {
                command,
                code,
                stderr,
            },
            RuntimeError::Spawn { command, source } => FailureReason::Invocation {
                command,
                code: None,
                stderr: source.to_string(),
            },
            RuntimeError::MissingBindSource(path) => FailureReason::MissingInput {
                detail: format!("bind source not found: {}", path.display()),
            },
            RuntimeError::Pull { image, detail } => FailureReason::Invocation {
                command: format!("pull {image}"),
                code: None,
                stderr: detail,
            },
            err @ RuntimeError::NoRuntime => FailureReason::MissingInput {
                detail: err.to_string(),
            },
        }
    }
}

/// Result of processing one subject. `duration` is the container
/// invocation time only; cheap paths (validation, direct copies)
/// carry `None` so averages reflect container work.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub subject: String,
    pub duration: Option<Duration>,
    pub failure: Option<FailureReason>,
}

impl StageOutcome {
    pub fn success(subject: &str, duration: Option<Duration>) -> Self {
        Self {
            subject: subject.to_string(),
            duration,
            failure: None,
        }
    }

    pub fn failure(subject: &str, reason: FailureReason) -> Self {
        Self {
            subject: subject.to_string(),
            duration: None,
            failure: Some(reason),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Per-stage summary, written as JSON to `logs/stage_<N>_report.json`
/// by the stage process and read back by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: usize,
    pub name: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedSubject>,
    pub avg_container_secs: Option<u64>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedSubject {
    pub subject: String,
    pub reason: FailureReason,
}

impl StageReport {
    pub fn from_outcomes(stage: &StageDefinition, outcomes: &[StageOutcome]) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        let failed = outcomes
            .iter()
            .filter_map(|o| {
                o.failure.as_ref().map(|reason| FailedSubject {
                    subject: o.subject.clone(),
                    reason: reason.clone(),
                })
            })
            .collect();

        let timed: Vec<u64> = outcomes
            .iter()
            .filter(|o| o.succeeded())
            .filter_map(|o| o.duration.map(|d| d.as_secs()))
            .collect();
        let avg_container_secs = if timed.is_empty() {
            None
        } else {
            Some(timed.iter().sum::<u64>() / timed.len() as u64)
        };

        Self {
            stage: stage.index,
            name: stage.name.to_string(),
            total: outcomes.len(),
            succeeded,
            failed,
            avg_container_secs,
            generated_at: Utc::now(),
        }
    }

    /// Stage-level tolerance policy: the stage counts as passed when at
    /// least one subject made it through. A stage where every subject
    /// failed halts the pipeline.
    pub fn exit_ok(&self) -> bool {
        self.succeeded > 0
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid report {}", path.display()))
    }

    pub fn log_summary(&self) {
        info!("stage {} ({}) complete", self.stage, self.name);
        info!("  total subjects: {}", self.total);
        info!("  successful: {}", self.succeeded);
        info!("  failed: {}", self.failed.len());
        if let Some(secs) = self.avg_container_secs {
            info!(
                "  average container time: {}",
                format_elapsed(Duration::from_secs(secs))
            );
        }
        for entry in &self.failed {
            info!("  - {}: {}", entry.subject, entry.reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageDefinition;
    use std::path::PathBuf;

    fn stage() -> StageDefinition {
        StageDefinition {
            index: 1,
            name: "skull-strip",
            output_dir: PathBuf::from("/tmp/out"),
        }
    }

    #[test]
    fn partial_failure_still_passes_the_stage() {
        // Subjects A and C succeed, B fails: the stage must report
        // success so the pipeline advances with the surviving subjects.
        let outcomes = vec![
            StageOutcome::success("A", Some(Duration::from_secs(60))),
            StageOutcome::failure(
                "B",
                FailureReason::NoOutput {
                    detail: "0 NIfTI files".to_string(),
                },
            ),
            StageOutcome::success("C", Some(Duration::from_secs(120))),
        ];
        let report = StageReport::from_outcomes(&stage(), &outcomes);
        assert!(report.exit_ok());
        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].subject, "B");
        assert_eq!(report.avg_container_secs, Some(90));
    }

    #[test]
    fn all_failed_stage_does_not_pass() {
        let outcomes = vec![StageOutcome::failure(
            "A",
            FailureReason::MissingInput {
                detail: "no NIfTI files".to_string(),
            },
        )];
        let report = StageReport::from_outcomes(&stage(), &outcomes);
        assert!(!report.exit_ok());
        assert_eq!(report.avg_container_secs, None);
    }

    #[test]
    fn untimed_successes_are_excluded_from_the_average() {
        // Direct-copy successes carry no duration; only container runs
        // should feed the average.
        let outcomes = vec![
            StageOutcome::success("A", None),
            StageOutcome::success("B", Some(Duration::from_secs(30))),
        ];
        let report = StageReport::from_outcomes(&stage(), &outcomes);
        assert_eq!(report.avg_container_secs, Some(30));
    }

    #[test]
    fn every_runtime_error_keeps_its_failure_class() {
        let pull = FailureReason::from(RuntimeError::Pull {
            image: "lab/segment:latest".to_string(),
            detail: "registry unreachable".to_string(),
        });
        match pull {
            FailureReason::Invocation { command, code, stderr } => {
                assert!(command.contains("lab/segment:latest"));
                assert_eq!(code, None);
                assert_eq!(stderr, "registry unreachable");
            }
            other => panic!("expected Invocation, got {:?}", other),
        }

        match FailureReason::from(RuntimeError::NoRuntime) {
            FailureReason::MissingInput { detail } => assert!(detail.contains("Docker")),
            other => panic!("expected MissingInput, got {:?}", other),
        }
    }

    #[test]
    fn report_round_trips_through_json() {
        let outcomes = vec![
            StageOutcome::success("A", Some(Duration::from_secs(10))),
            StageOutcome::failure(
                "B",
                FailureReason::Invocation {
                    command: "docker run --rm img".to_string(),
                    code: Some(137),
                    stderr: "oom".to_string(),
                },
            ),
        ];
        let report = StageReport::from_outcomes(&stage(), &outcomes);

        let path = std::env::temp_dir().join(format!(
            "tuberseg_report_{}_{}.json",
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        report.write(&path).expect("write report");
        let loaded = StageReport::load(&path).expect("load report");
        assert_eq!(loaded.stage, report.stage);
        assert_eq!(loaded.succeeded, 1);
        match &loaded.failed[0].reason {
            FailureReason::Invocation { code, .. } => assert_eq!(*code, Some(137)),
            other => panic!("expected Invocation, got {:?}", other),
        }
        let _ = fs::remove_file(path);
    }
}
