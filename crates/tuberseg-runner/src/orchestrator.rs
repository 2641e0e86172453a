//! The pipeline driver: runs each stage as a subprocess of this same
//! executable so that a crashing stage never takes the orchestrator
//! down, and assembles a run report from the stage report files.

use crate::outcome::StageReport;
use crate::stages::{stage_definitions, stage_output_complete, StageDefinition};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Instant;
use tracing::{error, info, warn};
use tuberseg_core::{format_elapsed, ProjectLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageStatus {
    Succeeded,
    Skipped,
    Failed,
    Interrupted,
}

#[derive(Debug, Serialize)]
pub struct StageRun {
    pub stage: usize,
    pub name: &'static str,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<StageReport>,
}

#[derive(Debug, Serialize)]
pub struct PipelineRunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageRun>,
}

/// How the whole pipeline run ended, with its process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    Completed,
    Failed,
    Interrupted,
}

impl PipelineExit {
    pub fn code(self) -> i32 {
        match self {
            PipelineExit::Completed => 0,
            PipelineExit::Failed => 1,
            PipelineExit::Interrupted => 130,
        }
    }
}

/// A stage is skippable when it already has output and nothing forces a
/// rerun. Stage 0 always reruns: it is cheap and revalidates the raw
/// input against the naming convention.
fn should_skip(force: bool, stage: &StageDefinition) -> bool {
    !force && stage.index > 0 && stage_output_complete(&stage.output_dir)
}

pub fn run_pipeline(
    layout: &ProjectLayout,
    start_from: usize,
    force: bool,
) -> Result<(PipelineExit, PipelineRunReport)> {
    let exe = std::env::current_exe().context("failed to resolve own executable")?;
    run_pipeline_with(layout, start_from, force, |stage| {
        let mut command = Command::new(&exe);
        command
            .arg("run-stage")
            .arg("--stage")
            .arg(stage.index.to_string())
            .arg("--project-root")
            .arg(&layout.project_root);
        command
    })
}

/// Pipeline driver with the stage command injected: `stage_command`
/// builds the subprocess that runs one stage. `run_pipeline` plugs in
/// the real `run-stage` re-invocation.
pub fn run_pipeline_with<F>(
    layout: &ProjectLayout,
    start_from: usize,
    force: bool,
    mut stage_command: F,
) -> Result<(PipelineExit, PipelineRunReport)>
where
    F: FnMut(&StageDefinition) -> Command,
{
    let started_at = Utc::now();
    let clock = Instant::now();

    info!("tuber segmentation pipeline");
    info!("project root: {}", layout.project_root.display());
    if start_from > 0 {
        info!("starting from stage {}", start_from);
    }
    if force {
        info!("force: rerunning stages with existing output");
    }

    let mut exit = PipelineExit::Completed;
    let mut stages: Vec<StageRun> = Vec::with_capacity(5);

    for stage in stage_definitions(layout) {
        if stage.index < start_from {
            info!("stage {} ({}): skipped (--start-from)", stage.index, stage.name);
            stages.push(StageRun {
                stage: stage.index,
                name: stage.name,
                status: StageStatus::Skipped,
                report: None,
            });
            continue;
        }
        if should_skip(force, &stage) {
            info!(
                "stage {} ({}): output already present at {}, skipping",
                stage.index,
                stage.name,
                stage.output_dir.display()
            );
            stages.push(StageRun {
                stage: stage.index,
                name: stage.name,
                status: StageStatus::Skipped,
                report: None,
            });
            continue;
        }

        info!("stage {} ({}): running", stage.index, stage.name);

        // Drop any report from a previous run before spawning, so a
        // stage that dies without writing one is not misread.
        let report_path = layout.stage_report_path(stage.index);
        let _ = fs::remove_file(&report_path);

        let status = stage_command(&stage)
            .status()
            .with_context(|| format!("failed to spawn stage {}", stage.index))?;

        let report = load_report(&report_path);

        if status.success() {
            stages.push(StageRun {
                stage: stage.index,
                name: stage.name,
                status: StageStatus::Succeeded,
                report,
            });
            continue;
        }

        match status.code() {
            // Killed by a signal: treat as an interrupt, not a stage
            // failure, and stop without touching later stages.
            None => {
                warn!("stage {} ({}) interrupted", stage.index, stage.name);
                stages.push(StageRun {
                    stage: stage.index,
                    name: stage.name,
                    status: StageStatus::Interrupted,
                    report,
                });
                exit = PipelineExit::Interrupted;
            }
            Some(code) => {
                error!(
                    "stage {} ({}) failed with exit code {}, halting pipeline",
                    stage.index, stage.name, code
                );
                stages.push(StageRun {
                    stage: stage.index,
                    name: stage.name,
                    status: StageStatus::Failed,
                    report,
                });
                exit = PipelineExit::Failed;
            }
        }
        break;
    }

    let report = PipelineRunReport {
        started_at,
        finished_at: Utc::now(),
        stages,
    };
    write_pipeline_report(layout, &report);
    log_pipeline_summary(&report, exit);
    info!("total time: {}", format_elapsed(clock.elapsed()));
    Ok((exit, report))
}

/// Stage reports are best effort across the subprocess boundary: a
/// missing or malformed file downgrades the summary, never the run.
fn load_report(path: &Path) -> Option<StageReport> {
    if !path.exists() {
        return None;
    }
    match StageReport::load(path) {
        Ok(report) => Some(report),
        Err(err) => {
            warn!("unreadable stage report {}: {err:#}", path.display());
            None
        }
    }
}

fn write_pipeline_report(layout: &ProjectLayout, report: &PipelineRunReport) {
    let path = layout.logs_dir.join("pipeline_report.json");
    match serde_json::to_string_pretty(report) {
        Ok(json) => {
            if let Err(err) = fs::write(&path, json) {
                warn!("failed to write {}: {err}", path.display());
            }
        }
        Err(err) => warn!("failed to serialize pipeline report: {err}"),
    }
}

fn log_pipeline_summary(report: &PipelineRunReport, exit: PipelineExit) {
    info!("pipeline summary:");
    for run in &report.stages {
        match (&run.status, &run.report) {
            (StageStatus::Succeeded, Some(r)) => info!(
                "  stage {} ({}): succeeded ({}/{} subjects)",
                run.stage, run.name, r.succeeded, r.total
            ),
            (status, _) => info!("  stage {} ({}): {:?}", run.stage, run.name, status),
        }
    }
    match exit {
        PipelineExit::Completed => info!("pipeline completed"),
        PipelineExit::Failed => error!("pipeline failed"),
        PipelineExit::Interrupted => warn!("pipeline interrupted"),
    }
}
