use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const SETTINGS_FILE: &str = "tuberseg.yaml";

const DEFAULT_INPUT_DIR: &str = "TSC_MRI_SUB";
const DEFAULT_SKULL_STRIP_IMAGE: &str =
    "ivansanchezfernandez/skull_strip_and_create_masks_with_synthstrip";
const DEFAULT_COMBINE_T2_IMAGE: &str = "ivansanchezfernandez/combine_t2_files_with_niftymic";
const DEFAULT_REGISTER_IMAGE: &str =
    "ivansanchezfernandez/bias_correct_resample_and_register_to_mni_with_ants";
const DEFAULT_SEGMENT_IMAGE: &str =
    "ivansanchezfernandez/segment_tubers_and_quantify_tuber_burden_with_tsccnn3d_dropout";

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))
}

/// Optional per-project overrides loaded from `tuberseg.yaml` at the
/// project root. A missing file means all defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub input_dir: String,
    pub images: Images,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Images {
    pub skull_strip: String,
    pub combine_t2: String,
    pub register: String,
    pub segment: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input_dir: DEFAULT_INPUT_DIR.to_string(),
            images: Images::default(),
        }
    }
}

impl Default for Images {
    fn default() -> Self {
        Self {
            skull_strip: DEFAULT_SKULL_STRIP_IMAGE.to_string(),
            combine_t2: DEFAULT_COMBINE_T2_IMAGE.to_string(),
            register: DEFAULT_REGISTER_IMAGE.to_string(),
            segment: DEFAULT_SEGMENT_IMAGE.to_string(),
        }
    }
}

impl Settings {
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let path = project_root.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Settings { path, source })
    }

    /// Stage images in stage order 1..4 (stage 0 runs no container).
    pub fn stage_images(&self) -> [(&'static str, &str); 4] {
        [
            ("skull-strip", self.images.skull_strip.as_str()),
            ("combine-t2", self.images.combine_t2.as_str()),
            ("register", self.images.register.as_str()),
            ("segment", self.images.segment.as_str()),
        ]
    }
}

/// Fixed filesystem layout relative to a project root. The layout doubles
/// as the pipeline's checkpoint state: a stage is complete exactly when
/// its output directory holds at least one non-empty subject subdirectory.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    pub project_root: PathBuf,
    pub input_dir: PathBuf,
    pub preprocessing_dir: PathBuf,
    pub results_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl ProjectLayout {
    pub fn from_project_root(project_root: &Path, settings: &Settings) -> Self {
        let project_root = project_root
            .canonicalize()
            .unwrap_or_else(|_| project_root.to_path_buf());
        let preprocessing_dir = project_root.join("preprocessing");
        Self {
            input_dir: project_root.join(&settings.input_dir),
            preprocessing_dir,
            results_dir: project_root.join("results"),
            logs_dir: project_root.join("logs"),
            project_root,
        }
    }

    pub fn mri_files_dir(&self) -> PathBuf {
        self.preprocessing_dir.join("MRI_files")
    }

    pub fn skull_stripped_dir(&self) -> PathBuf {
        self.preprocessing_dir.join("skull_stripped_MRIs")
    }

    pub fn masks_dir(&self) -> PathBuf {
        self.preprocessing_dir.join("masks")
    }

    pub fn combined_dir(&self) -> PathBuf {
        self.preprocessing_dir.join("combined_MRIs")
    }

    pub fn preprocessed_dir(&self) -> PathBuf {
        self.preprocessing_dir.join("preprocessed_MRIs")
    }

    pub fn stage_report_path(&self, stage_index: usize) -> PathBuf {
        self.logs_dir.join(format!("stage_{}_report.json", stage_index))
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.mri_files_dir(),
            self.skull_stripped_dir(),
            self.masks_dir(),
            self.combined_dir(),
            self.preprocessed_dir(),
            self.results_dir.clone(),
            self.logs_dir.clone(),
        ] {
            ensure_dir(&dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "tuberseg_config_{}_{}_{}",
            tag,
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&root).expect("temp root");
        root
    }

    #[test]
    fn settings_default_when_file_absent() {
        let root = temp_root("absent");
        let settings = Settings::load(&root).expect("defaults");
        assert_eq!(settings.input_dir, DEFAULT_INPUT_DIR);
        assert_eq!(settings.images.skull_strip, DEFAULT_SKULL_STRIP_IMAGE);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn settings_partial_override_keeps_other_defaults() {
        let root = temp_root("partial");
        fs::write(
            root.join(SETTINGS_FILE),
            "input_dir: scans\nimages:\n  segment: example/custom_segmenter\n",
        )
        .expect("write settings");
        let settings = Settings::load(&root).expect("parse");
        assert_eq!(settings.input_dir, "scans");
        assert_eq!(settings.images.segment, "example/custom_segmenter");
        assert_eq!(settings.images.register, DEFAULT_REGISTER_IMAGE);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn settings_unknown_key_is_an_error() {
        let root = temp_root("unknown");
        fs::write(root.join(SETTINGS_FILE), "input_root: scans\n").expect("write settings");
        assert!(Settings::load(&root).is_err());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn layout_stage_output_dirs_are_pairwise_distinct() {
        let root = temp_root("layout");
        let layout = ProjectLayout::from_project_root(&root, &Settings::default());
        let dirs = [
            layout.mri_files_dir(),
            layout.skull_stripped_dir(),
            layout.combined_dir(),
            layout.preprocessed_dir(),
            layout.results_dir.clone(),
        ];
        for (i, a) in dirs.iter().enumerate() {
            for b in dirs.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn ensure_directories_is_idempotent() {
        let root = temp_root("ensure");
        let layout = ProjectLayout::from_project_root(&root, &Settings::default());
        layout.ensure_directories().expect("first");
        layout.ensure_directories().expect("second");
        assert!(layout.masks_dir().is_dir());
        assert!(layout.logs_dir.is_dir());
        let _ = fs::remove_dir_all(root);
    }
}
