//! Stage 4: tuber segmentation and burden quantification with the
//! TSCCNN3D model. The only GPU-capable stage; afterwards the
//! per-subject volume results are merged into one table.

use crate::aggregate::aggregate_volume_results;
use crate::outcome::{FailureReason, StageReport};
use crate::stages::{run_over_subjects, stage_definitions, timed_invoke};
use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use tuberseg_core::naming::{count_sequences, find_nifti_files};
use tuberseg_core::subjects::discover_subjects;
use tuberseg_core::{ensure_dir, ProjectLayout, Settings};
use tuberseg_runtime::{ContainerRun, ContainerRuntime, GpuMode};

pub fn run(
    layout: &ProjectLayout,
    settings: &Settings,
    runtime: &ContainerRuntime,
    gpu: GpuMode,
) -> Result<StageReport> {
    let stage = stage_definitions(layout)[4].clone();
    let input_base = layout.preprocessed_dir();
    info!(
        "tuber segmentation: {} -> {}",
        input_base.display(),
        stage.output_dir.display()
    );

    let use_gpu = gpu.resolve();
    let subjects = discover_subjects(&input_base)?;
    runtime.ensure_image(&settings.images.segment)?;

    let outcomes = run_over_subjects(&stage, &subjects, |subject| {
        segment_subject(
            runtime,
            &settings.images.segment,
            use_gpu,
            &input_base.join(subject),
            &stage.output_dir.join(subject),
        )
    });

    aggregate_volume_results(&layout.results_dir)?;
    Ok(StageReport::from_outcomes(&stage, &outcomes))
}

fn segment_subject(
    runtime: &ContainerRuntime,
    image: &str,
    use_gpu: bool,
    input_dir: &Path,
    output_dir: &Path,
) -> Result<Option<Duration>, FailureReason> {
    ensure_dir(output_dir).map_err(|e| FailureReason::Copy {
        detail: e.to_string(),
    })?;

    // Segmentation needs the full sequence set, unlike earlier stages.
    let counts = count_sequences(input_dir);
    info!("  sequences: {}", counts);
    if !counts.has_all() {
        let missing: Vec<String> = counts.missing().iter().map(ToString::to_string).collect();
        return Err(FailureReason::MissingInput {
            detail: format!("missing sequences: {}", missing.join(", ")),
        });
    }

    if use_gpu {
        info!("  running with GPU acceleration...");
    } else {
        info!("  running on CPU...");
    }

    let run = ContainerRun::new(image)
        .bind_ro(input_dir, "/input")
        .bind_rw(output_dir, "/output")
        .workdir("/app")
        .gpu(use_gpu);
    let duration = timed_invoke(runtime, &run)?;

    let seg_count = segmentation_files(output_dir);
    info!("  segmentation files: {}", seg_count);
    if seg_count == 0 {
        return Err(FailureReason::NoOutput {
            detail: "no segmentation files generated".to_string(),
        });
    }
    Ok(Some(duration))
}

/// Count output NIfTI files that look like segmentations.
fn segmentation_files(output_dir: &Path) -> usize {
    find_nifti_files(output_dir)
        .iter()
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_lowercase().contains("seg"))
                .unwrap_or(false)
        })
        .count()
}
