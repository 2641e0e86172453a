use crate::error::ConfigError;
use std::fs;
use std::path::Path;
use tracing::info;

/// Enumerate subject directories under an input root, sorted by name.
/// Hidden entries are skipped. An absent root or an empty listing is a
/// fatal configuration error, never a silent empty batch.
pub fn discover_subjects(input_root: &Path) -> Result<Vec<String>, ConfigError> {
    if !input_root.exists() {
        return Err(ConfigError::InputRootMissing(input_root.to_path_buf()));
    }

    let entries = fs::read_dir(input_root).map_err(|source| ConfigError::Io {
        path: input_root.to_path_buf(),
        source,
    })?;

    let mut subjects: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| !name.starts_with('.'))
        .collect();
    subjects.sort();

    if subjects.is_empty() {
        return Err(ConfigError::NoSubjects(input_root.to_path_buf()));
    }

    info!("discovered {} subject(s) in {}", subjects.len(), input_root.display());
    Ok(subjects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "tuberseg_subjects_{}_{}_{}",
            tag,
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&root).expect("temp root");
        root
    }

    #[test]
    fn subjects_are_sorted_and_hidden_entries_skipped() {
        let root = temp_root("sorted");
        for name in ["Case003", "Case001", "Case002", ".DS_Store_dir"] {
            fs::create_dir_all(root.join(name)).expect("subject dir");
        }
        fs::write(root.join("stray_file.txt"), b"x").expect("stray file");

        let subjects = discover_subjects(&root).expect("discover");
        assert_eq!(subjects, vec!["Case001", "Case002", "Case003"]);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_root_is_a_configuration_error() {
        let root = temp_root("missing");
        let _ = fs::remove_dir_all(&root);
        match discover_subjects(&root) {
            Err(ConfigError::InputRootMissing(p)) => assert_eq!(p, root),
            other => panic!("expected InputRootMissing, got {:?}", other),
        }
    }

    #[test]
    fn empty_root_is_a_configuration_error() {
        let root = temp_root("empty");
        match discover_subjects(&root) {
            Err(ConfigError::NoSubjects(p)) => assert_eq!(p, root),
            other => panic!("expected NoSubjects, got {:?}", other),
        }
        let _ = fs::remove_dir_all(root);
    }
}
