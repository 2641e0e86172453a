//! Stage 1: skull stripping with SynthStrip. Produces skull-stripped
//! volumes plus brain masks consumed by the T2 combination stage.

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
    let stage = stage_definitions(layout)[1].clone();
    let input_base = layout.mri_files_dir();
    let mask_base = layout.masks_dir();
    info!(
        "skull stripping: {} -> {} (masks to {})",
        input_base.display(),
        stage.output_dir.display(),
        mask_base.display()
    );

    let subjects = discover_subjects(&input_base)?;
    runtime.ensure_image(&settings.images.skull_strip)?;

    let outcomes = run_over_subjects(&stage, &subjects, |subject| {
        strip_subject(
            runtime,
            &settings.images.skull_strip,
            &input_base.join(subject),
            &stage.output_dir.join(subject),
            &mask_base.join(subject),
        )
    });
    Ok(StageReport::from_outcomes(&stage, &outcomes))
}

fn strip_subject(
    runtime: &ContainerRuntime,
    image: &str,
    input_dir: &Path,
    output_dir: &Path,
    mask_dir: &Path,
) -> Result<Option<Duration>, FailureReason> {
    ensure_dir(output_dir).map_err(|e| FailureReason::Copy {
        detail: e.to_string(),
    })?;
    ensure_dir(mask_dir).map_err(|e| FailureReason::Copy {
        detail: e.to_string(),
    })?;

    let inputs = find_nifti_files(input_dir);
    if inputs.is_empty() {
        return Err(FailureReason::MissingInput {
            detail: "no NIfTI files found".to_string(),
        });
    }
    info!("  input files: {}", inputs.len());

    // SynthStrip runs on CPU.
    let run = ContainerRun::new(image)
        .bind_ro(input_dir, "/input")
        .bind_rw(output_dir, "/output")
        .bind_rw(mask_dir, "/masks");
    let duration = timed_invoke(runtime, &run)?;

    let stripped = find_nifti_files(output_dir).len();
    let masks = find_nifti_files(mask_dir).len();
    info!("  output files: {} skull-stripped, {} masks", stripped, masks);
    if stripped == 0 {
        return Err(FailureReason::NoOutput {
            detail: "no skull-stripped files generated".to_string(),
        });
    }
    Ok(Some(duration))
}
