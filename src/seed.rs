//! Bulk data loading from a JSON array of element records.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::element::Element;
use crate::store::{SqliteElementStore, StoreError};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read seed file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse seed file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reads a seed file holding a JSON array of elements.
pub fn load_seed_file(path: impl AsRef<Path>) -> Result<Vec<Element>, SeedError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| SeedError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| SeedError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Loads a seed file into the store. Returns the number of new records.
pub fn seed_store(store: &SqliteElementStore, path: impl AsRef<Path>) -> Result<usize, SeedError> {
    let elements = load_seed_file(&path)?;
    let inserted = store.import(&elements)?;
    tracing::info!(
        path = %path.as_ref().display(),
        records = elements.len(),
        inserted,
        "Seeded element store"
    );
    Ok(inserted)
}
