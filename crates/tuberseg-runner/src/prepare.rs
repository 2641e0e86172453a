//! Stage 0: organize raw NIfTI files into per-subject preprocessing
//! folders, validating the naming convention and the presence of all
//! three sequence types.

use crate::outcome::{FailureReason, StageReport};
use crate::stages::{run_over_subjects, stage_definitions};
use anyhow::Result;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use tuberseg_core::naming::{count_sequences, filename_matches_convention, find_nifti_files};
use tuberseg_core::subjects::discover_subjects;
use tuberseg_core::{ensure_dir, ProjectLayout};

pub fn run(layout: &ProjectLayout) -> Result<StageReport> {
    let stage = stage_definitions(layout)[0].clone();
    info!("data preparation: {} -> {}", layout.input_dir.display(), stage.output_dir.display());

    let subjects = discover_subjects(&layout.input_dir)?;
    let outcomes = run_over_subjects(&stage, &subjects, |subject| {
        prepare_subject(
            subject,
            &layout.input_dir.join(subject),
            &stage.output_dir.join(subject),
        )
    });
    Ok(StageReport::from_outcomes(&stage, &outcomes))
}

fn prepare_subject(
    subject: &str,
    input_dir: &Path,
    output_dir: &Path,
) -> Result<Option<Duration>, FailureReason> {
    ensure_dir(output_dir).map_err(|e| FailureReason::Copy {
        detail: e.to_string(),
    })?;

    let files = find_nifti_files(input_dir);
    if files.is_empty() {
        return Err(FailureReason::MissingInput {
            detail: "no NIfTI files found".to_string(),
        });
    }
    info!("  found {} NIfTI file(s)", files.len());

    let mut copied = 0usize;
    let mut skipped = 0usize;
    for file in &files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if filename_matches_convention(&name, subject) {
            fs::copy(file, output_dir.join(&name)).map_err(|e| FailureReason::Copy {
                detail: format!("{}: {}", name, e),
            })?;
            copied += 1;
        } else {
            warn!("  skipping {} (invalid naming convention)", name);
            skipped += 1;
        }
    }
    info!("  copied {} valid file(s), skipped {}", copied, skipped);

    // Validate against what actually landed in the output directory.
    let counts = count_sequences(output_dir);
    info!("  sequences: {}", counts);
    if !counts.has_all() {
        let missing: Vec<String> = counts.missing().iter().map(ToString::to_string).collect();
        return Err(FailureReason::MissingInput {
            detail: format!("missing sequences: {}", missing.join(", ")),
        });
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tuberseg_core::Settings;

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "tuberseg_prepare_{}_{}_{}",
            tag,
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&root).expect("temp root");
        root
    }

    fn seed_subject(input_root: &Path, subject: &str, files: &[&str]) {
        let dir = input_root.join(subject);
        fs::create_dir_all(&dir).expect("subject dir");
        for name in files {
            fs::write(dir.join(name), b"nifti").expect("file");
        }
    }

    #[test]
    fn complete_subject_passes_and_files_land_in_output() {
        let root = temp_root("complete");
        let layout = ProjectLayout::from_project_root(&root, &Settings::default());
        layout.ensure_directories().expect("layout");
        seed_subject(
            &layout.input_dir,
            "Case001",
            &[
                "Case001_T1_sag.nii",
                "Case001_T2_axial.nii",
                "Case001_FLAIR_cor.nii.gz",
            ],
        );

        let report = run(&layout).expect("stage");
        assert!(report.exit_ok());
        assert_eq!(report.succeeded, 1);
        assert_eq!(
            find_nifti_files(&layout.mri_files_dir().join("Case001")).len(),
            3
        );
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn invalid_names_are_skipped_but_valid_files_still_copy() {
        let root = temp_root("invalid");
        let layout = ProjectLayout::from_project_root(&root, &Settings::default());
        layout.ensure_directories().expect("layout");
        seed_subject(
            &layout.input_dir,
            "Case001",
            &[
                "Case001_T1_sag.nii",
                "Case001_T2_axial.nii",
                "Case001_FLAIR_cor.nii",
                "scan_without_prefix.nii",
            ],
        );

        let report = run(&layout).expect("stage");
        assert_eq!(report.succeeded, 1);
        let copied = find_nifti_files(&layout.mri_files_dir().join("Case001"));
        assert_eq!(copied.len(), 3);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn subject_missing_a_sequence_fails_but_keeps_its_valid_files() {
        let root = temp_root("missingseq");
        let layout = ProjectLayout::from_project_root(&root, &Settings::default());
        layout.ensure_directories().expect("layout");
        seed_subject(
            &layout.input_dir,
            "Case001",
            &["Case001_T1_sag.nii", "Case001_T2_axial.nii"],
        );
        seed_subject(
            &layout.input_dir,
            "Case002",
            &[
                "Case002_T1_sag.nii",
                "Case002_T2_axial.nii",
                "Case002_FLAIR_cor.nii",
            ],
        );

        let report = run(&layout).expect("stage");
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].subject, "Case001");
        match &report.failed[0].reason {
            FailureReason::MissingInput { detail } => assert!(detail.contains("FLAIR")),
            other => panic!("expected MissingInput, got {:?}", other),
        }
        // Partial data is still staged for inspection.
        assert_eq!(
            find_nifti_files(&layout.mri_files_dir().join("Case001")).len(),
            2
        );
        let _ = fs::remove_dir_all(root);
    }
}
