use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::LoadError;

/// Ordered class names, index-aligned with the model's output vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    labels: Vec<String>,
}

impl Vocabulary {
    pub fn new(labels: Vec<String>) -> Result<Self, LoadError> {
        if labels.is_empty() {
            return Err(LoadError::EmptyVocabulary);
        }
        let mut seen = HashSet::with_capacity(labels.len());
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(LoadError::DuplicateLabel(label.clone()));
            }
        }
        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

/// Reads one label per line. Blank lines are skipped.
pub fn load_vocabulary(file_path: &Path) -> Result<Vocabulary, LoadError> {
    if !file_path.exists() {
        return Err(LoadError::VocabularyNotFound(file_path.to_path_buf()));
    }
    let reader = BufReader::new(File::open(file_path)?);

    let mut labels = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let name = line.trim();
        if !name.is_empty() {
            labels.push(name.to_string());
        }
    }

    Vocabulary::new(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_labels(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_preserves_order_and_trims() {
        let file = write_labels("adenocarcinoma\n  benign \r\n\nsquamous_cell\n");
        let vocab = load_vocabulary(file.path()).unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(
            vocab.iter().collect::<Vec<_>>(),
            vec!["adenocarcinoma", "benign", "squamous_cell"]
        );
        assert_eq!(vocab.get(1), Some("benign"));
        assert_eq!(vocab.get(3), None);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.txt");
        match load_vocabulary(&path) {
            Err(LoadError::VocabularyNotFound(p)) => assert_eq!(p, path),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_empty_file_is_rejected() {
        let file = write_labels("\n \n");
        assert!(matches!(
            load_vocabulary(file.path()),
            Err(LoadError::EmptyVocabulary)
        ));
    }

    #[test]
    fn test_duplicate_labels_are_rejected() {
        let file = write_labels("cat\ndog\ncat\n");
        match load_vocabulary(file.path()) {
            Err(LoadError::DuplicateLabel(label)) => assert_eq!(label, "cat"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
