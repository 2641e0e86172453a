//! Stage 2: T2 combination with NiftyMIC. Subjects with multiple T2
//! sequences get a super-resolution combination run; everyone else has
//! their files copied straight through. The split is decided for all
//! subjects before any container starts so the log states the plan up
//! front and the image is only pulled when someone actually needs it.

use crate::outcome::{FailureReason, StageOutcome, StageReport};
use crate::stages::{stage_definitions, timed_invoke, StageDefinition};
use anyhow::Result;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use tuberseg_core::naming::{count_sequences, find_nifti_files};
use tuberseg_core::subjects::discover_subjects;
use tuberseg_core::{ensure_dir, format_elapsed, ProjectLayout, Settings};
use tuberseg_runtime::{ContainerRun, ContainerRuntime};

pub fn run(
    layout: &ProjectLayout,
    settings: &Settings,
    runtime: &ContainerRuntime,
) -> Result<StageReport> {
    let stage = stage_definitions(layout)[2].clone();
    let input_base = layout.skull_stripped_dir();
    let mask_base = layout.masks_dir();
    info!(
        "T2 combination: {} -> {}",
        input_base.display(),
        stage.output_dir.display()
    );

    let subjects = discover_subjects(&input_base)?;

    let mut to_combine: Vec<String> = Vec::new();
    let mut to_copy: Vec<String> = Vec::new();
    for subject in &subjects {
        if needs_combination(&input_base.join(subject)) {
            info!("  {}: multiple T2 sequences, will combine", subject);
            to_combine.push(subject.clone());
        } else {
            info!("  {}: single T2 sequence, will copy", subject);
            to_copy.push(subject.clone());
        }
    }
    info!(
        "subjects needing combination: {}, direct copy: {}",
        to_combine.len(),
        to_copy.len()
    );

    if !to_combine.is_empty() {
        runtime.ensure_image(&settings.images.combine_t2)?;
    }

    let total = subjects.len();
    let mut outcomes: Vec<StageOutcome> = Vec::with_capacity(total);

    for subject in &to_copy {
        log_progress(&stage, outcomes.len() + 1, total, subject, "copy");
        match copy_subject(&input_base.join(subject), &stage.output_dir.join(subject)) {
            Ok(()) => outcomes.push(StageOutcome::success(subject, None)),
            Err(reason) => {
                warn!("  {} failed: {}", subject, reason);
                outcomes.push(StageOutcome::failure(subject, reason));
            }
        }
    }

    for subject in &to_combine {
        log_progress(&stage, outcomes.len() + 1, total, subject, "combine");
        let result = combine_subject(
            runtime,
            &settings.images.combine_t2,
            &input_base.join(subject),
            &mask_base.join(subject),
            &stage.output_dir.join(subject),
        );
        match result {
            Ok(duration) => {
                info!("  {} combined in {}", subject, format_elapsed(duration));
                outcomes.push(StageOutcome::success(subject, Some(duration)));
            }
            Err(reason) => {
                warn!("  {} failed: {}", subject, reason);
                outcomes.push(StageOutcome::failure(subject, reason));
            }
        }
    }

    Ok(StageReport::from_outcomes(&stage, &outcomes))
}

fn log_progress(stage: &StageDefinition, current: usize, total: usize, subject: &str, mode: &str) {
    info!(
        "[{}] processing subject {}/{}: {} ({})",
        stage.name, current, total, subject, mode
    );
}

fn needs_combination(input_dir: &Path) -> bool {
    count_sequences(input_dir).t2 > 1
}

fn copy_subject(input_dir: &Path, output_dir: &Path) -> Result<(), FailureReason> {
    ensure_dir(output_dir).map_err(|e| FailureReason::Copy {
        detail: e.to_string(),
    })?;
    let files = find_nifti_files(input_dir);
    if files.is_empty() {
        return Err(FailureReason::MissingInput {
            detail: "no NIfTI files to copy".to_string(),
        });
    }
    for file in &files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        fs::copy(file, output_dir.join(&name)).map_err(|e| FailureReason::Copy {
            detail: format!("{}: {}", name, e),
        })?;
    }
    Ok(())
}

fn combine_subject(
    runtime: &ContainerRuntime,
    image: &str,
    input_dir: &Path,
    mask_dir: &Path,
    output_dir: &Path,
) -> Result<std::time::Duration, FailureReason> {
    ensure_dir(output_dir).map_err(|e| FailureReason::Copy {
        detail: e.to_string(),
    })?;
    info!("  running NiftyMIC container (this may take 10-30 minutes)...");

    // NiftyMIC's entrypoint lives in /app and writes temp directories
    // relative to it, hence the workdir and the scratch overlay.
    let run = ContainerRun::new(image)
        .bind_ro(input_dir, "/input")
        .bind_ro(mask_dir, "/masks")
        .bind_rw(output_dir, "/output")
        .workdir("/app")
        .writable_tmpfs();
    let duration = timed_invoke(runtime, &run)?;

    if find_nifti_files(output_dir).is_empty() {
        return Err(FailureReason::NoOutput {
            detail: "no combined files generated".to_string(),
        });
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tuberseg_combine_{}_{}_{}",
            tag,
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    #[test]
    fn single_t2_subject_takes_the_copy_path() {
        let dir = temp_dir("single");
        fs::write(dir.join("s_T2_axial.nii"), b"x").expect("file");
        fs::write(dir.join("s_T1_sag.nii"), b"x").expect("file");
        assert!(!needs_combination(&dir));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn multiple_t2_subject_needs_combination() {
        let dir = temp_dir("multi");
        fs::write(dir.join("s_T2_axial.nii"), b"x").expect("file");
        fs::write(dir.join("s_T2_coronal.nii"), b"x").expect("file");
        assert!(needs_combination(&dir));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn copy_path_moves_every_nifti_and_fails_on_empty_input() {
        let input = temp_dir("copy_in");
        let output = temp_dir("copy_out");
        fs::write(input.join("s_T1_sag.nii"), b"x").expect("file");
        fs::write(input.join("s_T2_axial.nii.gz"), b"x").expect("file");
        fs::write(input.join("notes.txt"), b"x").expect("file");

        copy_subject(&input, &output).expect("copy");
        assert_eq!(find_nifti_files(&output).len(), 2);

        let empty = temp_dir("copy_empty");
        match copy_subject(&empty, &output) {
            Err(FailureReason::MissingInput { .. }) => {}
            other => panic!("expected MissingInput, got {:?}", other),
        }
        for d in [input, output, empty] {
            let _ = fs::remove_dir_all(d);
        }
    }
}
