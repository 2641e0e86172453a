use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// MRI sequence types the pipeline recognizes in file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    T1,
    T2,
    Flair,
}

impl Sequence {
    pub const ALL: [Sequence; 3] = [Sequence::T1, Sequence::T2, Sequence::Flair];

    /// The token a file name must contain to classify as this sequence,
    /// e.g. `Case001_T2_axial.nii`.
    fn token(self) -> &'static str {
        match self {
            Sequence::T1 => "_T1_",
            Sequence::T2 => "_T2_",
            Sequence::Flair => "_FLAIR_",
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Sequence::T1 => "T1",
            Sequence::T2 => "T2",
            Sequence::Flair => "FLAIR",
        };
        f.write_str(label)
    }
}

pub fn is_nifti(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".nii") || name.ends_with(".nii.gz")
}

pub fn sequence_of(filename: &str) -> Option<Sequence> {
    Sequence::ALL
        .into_iter()
        .find(|seq| filename.contains(seq.token()))
}

/// Naming convention check: `<subject>_` prefix plus at least one
/// sequence token somewhere in the name.
pub fn filename_matches_convention(filename: &str, subject: &str) -> bool {
    filename.starts_with(&format!("{}_", subject)) && sequence_of(filename).is_some()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCounts {
    pub t1: usize,
    pub t2: usize,
    pub flair: usize,
}

impl SequenceCounts {
    pub fn has_all(&self) -> bool {
        self.t1 > 0 && self.t2 > 0 && self.flair > 0
    }

    pub fn missing(&self) -> Vec<Sequence> {
        let mut missing = Vec::new();
        if self.t1 == 0 {
            missing.push(Sequence::T1);
        }
        if self.t2 == 0 {
            missing.push(Sequence::T2);
        }
        if self.flair == 0 {
            missing.push(Sequence::Flair);
        }
        missing
    }
}

impl fmt::Display for SequenceCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T1={}, T2={}, FLAIR={}", self.t1, self.t2, self.flair)
    }
}

/// Count NIfTI files per sequence type in a directory (non-recursive).
/// A missing directory counts as empty.
pub fn count_sequences(dir: &Path) -> SequenceCounts {
    let mut counts = SequenceCounts::default();
    for file in find_nifti_files(dir) {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match sequence_of(&name) {
            Some(Sequence::T1) => counts.t1 += 1,
            Some(Sequence::T2) => counts.t2 += 1,
            Some(Sequence::Flair) => counts.flair += 1,
            None => {}
        }
    }
    counts
}

/// All NIfTI files directly under `dir`, sorted by path. Missing or
/// unreadable directories yield an empty list.
pub fn find_nifti_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_nifti(p))
        .collect();
    files.sort();
    files
}
