use crate::outcome::{FailureReason, StageOutcome};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tuberseg_core::ProjectLayout;

pub const STAGE_NAMES: [&str; 5] = ["prepare", "skull-strip", "combine-t2", "register", "segment"];

pub fn stage_name(index: usize) -> Option<&'static str> {
    STAGE_NAMES.get(index).copied()
}

/// One stage of the fixed linear chain. The output directory doubles as
/// the stage's checkpoint marker for resumption.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    pub index: usize,
    pub name: &'static str,
    pub output_dir: PathBuf,
}

pub fn stage_definitions(layout: &ProjectLayout) -> [StageDefinition; 5] {
    let dirs = [
        layout.mri_files_dir(),
        layout.skull_stripped_dir(),
        layout.combined_dir(),
        layout.preprocessed_dir(),
        layout.results_dir.clone(),
    ];
    std::array::from_fn(|index| StageDefinition {
        index,
        name: STAGE_NAMES[index],
        output_dir: dirs[index].clone(),
    })
}

/// The resumption predicate: a stage's output is complete when its
/// output directory exists and holds at least one NON-EMPTY
/// subdirectory. Empty subject directories left behind by a crash do
/// not count.
pub fn stage_output_complete(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .any(|e| {
            fs::read_dir(e.path())
                .map(|mut sub| sub.next().is_some())
                .unwrap_or(false)
        })
}

/// Run a container for one subject, timing just the invocation.
pub(crate) fn timed_invoke(
    runtime: &tuberseg_runtime::ContainerRuntime,
    run: &tuberseg_runtime::ContainerRun,
) -> Result<Duration, FailureReason> {
    let started = std::time::Instant::now();
    runtime.invoke(run).map_err(FailureReason::from)?;
    Ok(started.elapsed())
}

/// Shared per-subject loop: sequential, sorted order, one failure never
/// stops the rest. The closure returns the container duration when one
/// ran, `None` for cheap paths.
pub(crate) fn run_over_subjects<F>(
    stage: &StageDefinition,
    subjects: &[String],
    mut per_subject: F,
) -> Vec<StageOutcome>
where
    F: FnMut(&str) -> Result<Option<Duration>, FailureReason>,
{
    let total = subjects.len();
    let mut outcomes = Vec::with_capacity(total);
    for (i, subject) in subjects.iter().enumerate() {
        info!(
            "[{}] processing subject {}/{}: {}",
            stage.name,
            i + 1,
            total,
            subject
        );
        match per_subject(subject) {
            Ok(duration) => {
                if let Some(d) = duration {
                    info!("  {} completed in {}", subject, tuberseg_core::format_elapsed(d));
                } else {
                    info!("  {} completed", subject);
                }
                outcomes.push(StageOutcome::success(subject, duration));
            }
            Err(reason) => {
                warn!("  {} failed: {}", subject, reason);
                outcomes.push(StageOutcome::failure(subject, reason));
            }
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuberseg_core::Settings;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tuberseg_stages_{}_{}_{}",
            tag,
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    #[test]
    fn five_stages_with_distinct_output_dirs() {
        let root = temp_dir("defs");
        let layout = ProjectLayout::from_project_root(&root, &Settings::default());
        let stages = stage_definitions(&layout);
        assert_eq!(stages.len(), 5);
        for (i, stage) in stages.iter().enumerate() {
            assert_eq!(stage.index, i);
        }
        for (i, a) in stages.iter().enumerate() {
            for b in stages.iter().skip(i + 1) {
                assert_ne!(a.output_dir, b.output_dir);
            }
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_directory_is_not_complete() {
        let dir = temp_dir("missing");
        let _ = fs::remove_dir_all(&dir);
        assert!(!stage_output_complete(&dir));
    }

    #[test]
    fn empty_directory_is_not_complete() {
        let dir = temp_dir("empty");
        assert!(!stage_output_complete(&dir));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn empty_subdirectory_is_not_complete() {
        // A crash can leave a created-but-unfilled subject directory;
        // that must not mark the stage done.
        let dir = temp_dir("emptysub");
        fs::create_dir_all(dir.join("Case001")).expect("subdir");
        assert!(!stage_output_complete(&dir));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn loose_files_do_not_count() {
        let dir = temp_dir("files");
        fs::write(dir.join("volume_results.txt"), b"x").expect("file");
        assert!(!stage_output_complete(&dir));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn one_populated_subdirectory_is_complete() {
        let dir = temp_dir("done");
        fs::create_dir_all(dir.join("Case001")).expect("subdir");
        fs::create_dir_all(dir.join("Case002")).expect("subdir");
        fs::write(dir.join("Case002").join("Case002_T1_sag.nii"), b"x").expect("file");
        assert!(stage_output_complete(&dir));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn per_subject_failures_do_not_stop_the_loop() {
        let stage = StageDefinition {
            index: 0,
            name: "prepare",
            output_dir: PathBuf::from("/tmp/out"),
        };
        let subjects = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let outcomes = run_over_subjects(&stage, &subjects, |subject| {
            if subject == "B" {
                Err(FailureReason::MissingInput {
                    detail: "no files".to_string(),
                })
            } else {
                Ok(None)
            }
        });
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].succeeded());
        assert!(!outcomes[1].succeeded());
        assert!(outcomes[2].succeeded());
    }
}
