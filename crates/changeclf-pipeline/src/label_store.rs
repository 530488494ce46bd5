//! Labeled before/after pairs for supervised training.
//!
//! On disk, each example is a sub-directory named by its identifier:
//!
//! ```text
//! <label_dir>/<name>/input.png    before image
//! <label_dir>/<name>/output.png   after image
//! <label_dir>/<name>/label.json   `true` or `false`
//! ```
//!
//! Dot-prefixed entries are ignored. A missing or corrupt file is fatal.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use changeclf_core::{ChangeClfError, Result};
use changeclf_model::ImagePair;

/// File name of the before image inside an example directory.
pub const BEFORE_FILE: &str = "input.png";
/// File name of the after image inside an example directory.
pub const AFTER_FILE: &str = "output.png";
/// File name of the JSON boolean label inside an example directory.
pub const LABEL_FILE: &str = "label.json";

/// One labeled pair.
#[derive(Debug, Clone)]
pub struct LabeledExample {
    pub name: String,
    pub pair: ImagePair,
    /// Whether the pipeline visibly changed the image.
    pub changed: bool,
}

/// A corpus of labeled pairs addressed by name.
pub trait LabelSource {
    /// All example names, in a stable order.
    fn names(&self) -> Result<Vec<String>>;

    /// Load one example.
    fn load(&self, name: &str) -> Result<LabeledExample>;
}

/// Directory-backed label store.
#[derive(Debug, Clone)]
pub struct LabelStore {
    root: PathBuf,
}

impl LabelStore {
    /// Open the store rooted at `root`, which must be an existing directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ChangeClfError::LabelStore(format!(
                "label directory not found: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_image(&self, name: &str, file: &str) -> Result<image::DynamicImage> {
        let path = self.root.join(name).join(file);
        image::open(&path).map_err(|e| {
            ChangeClfError::LabelStore(format!("Failed to read {}: {e}", path.display()))
        })
    }
}

impl LabelSource for LabelStore {
    fn names(&self) -> Result<Vec<String>> {
        let names = visible_entries(&self.root)?
            .into_iter()
            .filter(|name| self.root.join(name).is_dir())
            .collect();
        Ok(names)
    }

    fn load(&self, name: &str) -> Result<LabeledExample> {
        let before = self.read_image(name, BEFORE_FILE)?;
        let after = self.read_image(name, AFTER_FILE)?;

        let label_path = self.root.join(name).join(LABEL_FILE);
        let raw = std::fs::read_to_string(&label_path).map_err(|e| {
            ChangeClfError::LabelStore(format!("Failed to read {}: {e}", label_path.display()))
        })?;
        let changed: bool = serde_json::from_str(&raw).map_err(|e| {
            ChangeClfError::LabelStore(format!("Failed to parse {}: {e}", label_path.display()))
        })?;

        Ok(LabeledExample {
            name: name.to_string(),
            pair: ImagePair::new(before, after),
            changed,
        })
    }
}

/// In-memory label store, for programmatic corpora and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLabelStore {
    examples: BTreeMap<String, LabeledExample>,
}

impl MemoryLabelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an example.
    pub fn insert(&mut self, example: LabeledExample) {
        self.examples.insert(example.name.clone(), example);
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

impl LabelSource for MemoryLabelStore {
    fn names(&self) -> Result<Vec<String>> {
        Ok(self.examples.keys().cloned().collect())
    }

    fn load(&self, name: &str) -> Result<LabeledExample> {
        self.examples
            .get(name)
            .cloned()
            .ok_or_else(|| ChangeClfError::LabelStore(format!("unknown example: {name}")))
    }
}

/// Sorted names of the non-hidden entries of `dir`.
///
/// Entries whose names are not valid UTF-8 are skipped with a warning.
pub(crate) fn visible_entries(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        match entry.file_name().into_string() {
            Ok(name) if name.starts_with('.') => {}
            Ok(name) => names.push(name),
            Err(raw) => tracing::warn!(entry = ?raw, "Skipping non UTF-8 entry"),
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_example(root: &Path, name: &str, label: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        RgbImage::from_pixel(20, 20, Rgb([10, 20, 30]))
            .save(dir.join(BEFORE_FILE))
            .unwrap();
        RgbImage::from_pixel(20, 20, Rgb([200, 20, 30]))
            .save(dir.join(AFTER_FILE))
            .unwrap();
        std::fs::write(dir.join(LABEL_FILE), label).unwrap();
    }

    #[test]
    fn test_open_missing_dir_fails() {
        let result = LabelStore::open("/nonexistent/change_labeled");
        assert!(matches!(result, Err(ChangeClfError::LabelStore(_))));
    }

    #[test]
    fn test_names_skip_hidden_and_files() {
        let dir = tempfile::tempdir().unwrap();
        write_example(dir.path(), "b", "true");
        write_example(dir.path(), "a", "false");
        write_example(dir.path(), ".ipynb_checkpoints", "true");
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let store = LabelStore::open(dir.path()).unwrap();
        assert_eq!(store.names().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_load_example() {
        let dir = tempfile::tempdir().unwrap();
        write_example(dir.path(), "ex1", "true\n");
        let store = LabelStore::open(dir.path()).unwrap();

        let example = store.load("ex1").unwrap();
        assert_eq!(example.name, "ex1");
        assert!(example.changed);
        assert!(example.pair.same_dimensions());
    }

    #[test]
    fn test_corrupt_label_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_example(dir.path(), "ex1", "maybe");
        let store = LabelStore::open(dir.path()).unwrap();
        assert!(matches!(store.load("ex1"), Err(ChangeClfError::LabelStore(_))));
    }

    #[test]
    fn test_missing_image_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_example(dir.path(), "ex1", "false");
        std::fs::remove_file(dir.path().join("ex1").join(AFTER_FILE)).unwrap();
        let store = LabelStore::open(dir.path()).unwrap();
        assert!(store.load("ex1").is_err());
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryLabelStore::new();
        assert!(store.is_empty());
        let img = image::DynamicImage::ImageRgb8(RgbImage::new(16, 16));
        store.insert(LabeledExample {
            name: "only".to_string(),
            pair: ImagePair::new(img.clone(), img),
            changed: false,
        });
        assert_eq!(store.len(), 1);
        assert_eq!(store.names().unwrap(), vec!["only".to_string()]);
        assert!(!store.load("only").unwrap().changed);
        assert!(store.load("missing").is_err());
    }
}
