//! Class names and their static description records.
//!
//! The catalog is loaded from a JSON data file at startup:
//!
//! ```json
//! {
//!   "classes": ["Hibiscus", "Rose"],
//!   "info": {
//!     "Rose": {"Description": "...", "Appearance": "...", "Uses": "...", "Care": "..."}
//!   }
//! }
//! ```
//!
//! The position of a name in `classes` is the classifier output index it
//! stands for.

use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read class catalog {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse class catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("class catalog lists no classes")]
    Empty,
    #[error("class {0:?} is listed more than once")]
    Duplicate(String),
}

/// Static description of a class, returned alongside a prediction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassInfo {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Appearance")]
    pub appearance: String,
    #[serde(rename = "Uses")]
    pub uses: String,
    #[serde(rename = "Care")]
    pub care: String,
}

#[derive(Deserialize)]
struct CatalogFile {
    classes: Vec<String>,
    #[serde(default)]
    info: HashMap<String, ClassInfo>,
}

/// Ordered class names plus the info records known for them. Immutable once built.
#[derive(Debug, Clone)]
pub struct ClassCatalog {
    names: Vec<String>,
    info: HashMap<String, ClassInfo>,
}

impl ClassCatalog {
    pub fn new(
        names: Vec<String>,
        mut info: HashMap<String, ClassInfo>,
    ) -> Result<Self, CatalogError> {
        if names.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(CatalogError::Duplicate(name.clone()));
            }
        }

        info.retain(|name, _| {
            let known = seen.contains(name.as_str());
            if !known {
                log::warn!("Ignoring info record for unknown class {name:?}");
            }
            known
        });

        for name in names.iter().filter(|name| !info.contains_key(*name)) {
            log::warn!("Class {name:?} has no info record");
        }

        Ok(Self { names, info })
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Self::new(file.classes, file.info)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json_str(&json)?;
        log::info!(
            "Loaded {} classes from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Name of the class at classifier output `index`.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn info(&self, name: &str) -> Option<&ClassInfo> {
        self.info.get(name)
    }
}
