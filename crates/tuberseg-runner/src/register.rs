//! Stage 3: bias correction, resampling and MNI registration with ANTs.

use crate::outcome::{FailureReason, StageReport};
use crate::stages::{run_over_subjects, stage_definitions, timed_invoke};
use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use tuberseg_core::naming::find_nifti_files;
use tuberseg_core::subjects::discover_subjects;
use tuberseg_core::{ensure_dir, ProjectLayout, Settings};
use tuberseg_runtime::{ContainerRun, ContainerRuntime};

pub fn run(
    layout: &ProjectLayout,
    settings: &Settings,
    runtime: &ContainerRuntime,
) -> Result<StageReport> {
    let stage = stage_definitions(layout)[3].clone();
    let input_base = layout.combined_dir();
    info!(
        "MNI registration: {} -> {}",
        input_base.display(),
        stage.output_dir.display()
    );

    let subjects = discover_subjects(&input_base)?;
    runtime.ensure_image(&settings.images.register)?;

    let outcomes = run_over_subjects(&stage, &subjects, |subject| {
        register_subject(
            runtime,
            &settings.images.register,
            &input_base.join(subject),
            &stage.output_dir.join(subject),
        )
    });
    Ok(StageReport::from_outcomes(&stage, &outcomes))
}

fn register_subject(
    runtime: &ContainerRuntime,
    image: &str,
    input_dir: &Path,
    output_dir: &Path,
) -> Result<Option<Duration>, FailureReason> {
    ensure_dir(output_dir).map_err(|e| FailureReason::Copy {
        detail: e.to_string(),
    })?;

    let inputs = find_nifti_files(input_dir);
    if inputs.is_empty() {
        return Err(FailureReason::MissingInput {
            detail: "no NIfTI files found".to_string(),
        });
    }
    info!("  input files: {}", inputs.len());
    info!("  running ANTs registration container (this may take 10-30 minutes)...");

    // The container's entrypoint and MNI template sit at the image
    // root, and it creates temp directories relative to the workdir.
    let run = ContainerRun::new(image)
        .bind_ro(input_dir, "/input")
        .bind_rw(output_dir, "/output")
        .workdir("/")
        .writable_tmpfs();
    let duration = timed_invoke(runtime, &run)?;

    let outputs = find_nifti_files(output_dir).len();
    info!("  output files: {}", outputs);
    if outputs == 0 {
        return Err(FailureReason::NoOutput {
            detail: "no registered files generated".to_string(),
        });
    }
    Ok(Some(duration))
}
