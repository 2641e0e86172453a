pub mod aggregate;
pub mod combine;
pub mod orchestrator;
pub mod outcome;
pub mod prepare;
pub mod register;
pub mod segment;
pub mod skull_strip;
pub mod stages;

pub use orchestrator::{run_pipeline, run_pipeline_with, PipelineExit, PipelineRunReport};
pub use outcome::{FailureReason, StageOutcome, StageReport};
pub use stages::{stage_definitions, stage_name, stage_output_complete, StageDefinition};

use anyhow::{bail, Result};
use tuberseg_core::{ProjectLayout, Settings};
use tuberseg_runtime::{ContainerRuntime, GpuMode};

/// Run one stage in the current process: execute it over all its
/// subjects, write its report JSON under `logs/`, and log the summary.
/// Stages 1..4 detect the container runtime here; stage 0 is pure
/// filesystem work.
pub fn execute_stage(
    index: usize,
    layout: &ProjectLayout,
    settings: &Settings,
    gpu: GpuMode,
) -> Result<StageReport> {
    let report = match index {
        0 => prepare::run(layout)?,
        1..=4 => {
            let runtime = ContainerRuntime::detect()?;
            match index {
                1 => skull_strip::run(layout, settings, &runtime)?,
                2 => combine::run(layout, settings, &runtime)?,
                3 => register::run(layout, settings, &runtime)?,
                _ => segment::run(layout, settings, &runtime, gpu)?,
            }
        }
        _ => bail!("no such stage: {index}"),
    };
    report.write(&layout.stage_report_path(index))?;
    report.log_summary();
    Ok(report)
}
