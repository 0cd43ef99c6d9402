//! Locating referenced assemblies on disk.
//!
//! Base classes frequently live in other assemblies. To report inherited
//! members the way reflection does, those assemblies have to be loaded too;
//! the resolver finds them by simple name inside user-supplied directories.

use crate::image::AssemblyImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

const ASSEMBLY_EXTENSIONS: [&str; 2] = ["dll", "exe"];

/// Finds and caches referenced assemblies by name
#[derive(Debug, Default)]
pub struct AssemblyResolver {
    search_dirs: Vec<PathBuf>,
    /// lower-cased file stem -> candidate path
    index: Option<HashMap<String, PathBuf>>,
    loaded: HashMap<String, Option<Rc<AssemblyImage>>>,
}

impl AssemblyResolver {
    /// Creates a resolver with no search directories
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a directory to search (recursively) for referenced assemblies
    pub fn search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self.index = None;
        self
    }

    /// Adds several search directories
    pub fn search_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_dirs.extend(dirs.into_iter().map(Into::into));
        self.index = None;
        self
    }

    /// Makes an already loaded image resolvable by its name
    pub fn register(&mut self, image: Rc<AssemblyImage>) {
        self.loaded
            .insert(image.name().to_lowercase(), Some(image));
    }

    /// Returns the assembly called `name`, loading it on first use.
    ///
    /// Failures are cached: an assembly that cannot be found or parsed is
    /// reported once and then treated as absent.
    pub fn resolve(&mut self, name: &str) -> Option<Rc<AssemblyImage>> {
        let key = name.to_lowercase();
        if let Some(cached) = self.loaded.get(&key) {
            return cached.clone();
        }

        let image = self.load(&key, name);
        self.loaded.insert(key, image.clone());
        image
    }

    fn load(&mut self, key: &str, name: &str) -> Option<Rc<AssemblyImage>> {
        let path = self.index().get(key).cloned();
        let Some(path) = path else {
            debug!("Referenced assembly '{}' not found in search paths", name);
            return None;
        };

        match AssemblyImage::from_path(&path) {
            Ok(image) => {
                debug!("Resolved '{}' to {}", name, path.display());
                Some(Rc::new(image))
            }
            Err(e) if e.is_recoverable() => {
                debug!("Skipping {}: {}", path.display(), e);
                None
            }
            Err(e) => {
                warn!("Failed to load referenced assembly {}: {}", path.display(), e);
                None
            }
        }
    }

    fn index(&mut self) -> &HashMap<String, PathBuf> {
        let dirs = &self.search_dirs;
        self.index.get_or_insert_with(|| build_index(dirs))
    }
}

fn build_index(dirs: &[PathBuf]) -> HashMap<String, PathBuf> {
    let mut index = HashMap::new();
    for dir in dirs {
        for entry in WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || !is_assembly_file(path) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                // first directory listed wins
                index
                    .entry(stem.to_lowercase())
                    .or_insert_with(|| path.to_path_buf());
            }
        }
    }
    trace!("Indexed {} candidate assemblies", index.len());
    index
}

fn is_assembly_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ASSEMBLY_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}
