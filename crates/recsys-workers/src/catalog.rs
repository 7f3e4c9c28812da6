//! Static movie metadata and popularity list
//!
//! Both files are produced by the batch preprocessing job and read once at
//! startup.

use crate::error::CatalogError;
use crate::types::MovieMetadata;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Title used when a movie has no metadata entry
pub const UNKNOWN_TITLE: &str = "Unknown";

#[derive(Debug, Clone, Default)]
pub struct MovieCatalog {
    metadata: HashMap<u64, MovieMetadata>,
    /// Most popular first
    popular: Vec<u64>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CatalogError> {
    let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.display().to_string(),
        source,
    })?;

    serde_json::from_str(&contents).map_err(|source| CatalogError::Parse {
        path: path.display().to_string(),
        source,
    })
}

impl MovieCatalog {
    pub fn new(metadata: HashMap<u64, MovieMetadata>, popular: Vec<u64>) -> Self {
        Self { metadata, popular }
    }

    /// Load `{ "<movieId>": {"title": ..., "genres": ...} }` and `[movieId, ...]`
    pub fn load(
        metadata_path: impl AsRef<Path>,
        popular_path: impl AsRef<Path>,
    ) -> Result<Self, CatalogError> {
        let raw: HashMap<String, MovieMetadata> = read_json(metadata_path.as_ref())?;
        let popular: Vec<u64> = read_json(popular_path.as_ref())?;

        let mut metadata = HashMap::with_capacity(raw.len());
        for (key, entry) in raw {
            match key.parse::<u64>() {
                Ok(id) => {
                    metadata.insert(id, entry);
                }
                Err(_) => warn!(key = %key, "Skipping metadata entry with non-numeric movie id"),
            }
        }

        info!(
            movies = metadata.len(),
            popular = popular.len(),
            "Loaded movie catalog"
        );

        Ok(Self { metadata, popular })
    }

    /// Title for a movie, [`UNKNOWN_TITLE`] when absent
    pub fn title(&self, movie_id: u64) -> &str {
        self.metadata
            .get(&movie_id)
            .map(|m| m.title.as_str())
            .unwrap_or(UNKNOWN_TITLE)
    }

    pub fn metadata(&self, movie_id: u64) -> Option<&MovieMetadata> {
        self.metadata.get(&movie_id)
    }

    /// The first `k` ids of the popularity list
    pub fn top_popular(&self, k: usize) -> &[u64] {
        &self.popular[..k.min(self.popular.len())]
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_catalog_files() {
        let metadata = write_temp(
            r#"{"1": {"title": "Toy Story", "genres": ["Animation"]}, "2": {"title": "Jumanji"}}"#,
        );
        let popular = write_temp("[2, 1, 50, 7]");

        let catalog = MovieCatalog::load(metadata.path(), popular.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.title(1), "Toy Story");
        assert_eq!(catalog.title(2), "Jumanji");
        assert_eq!(catalog.top_popular(3), &[2, 1, 50]);
        assert!(catalog.metadata(2).unwrap().genres.is_null());
    }

    #[test]
    fn test_unknown_title_default() {
        let catalog = MovieCatalog::default();
        assert_eq!(catalog.title(99), UNKNOWN_TITLE);
    }

    #[test]
    fn test_top_popular_shorter_than_k() {
        let catalog = MovieCatalog::new(HashMap::new(), vec![4, 5]);
        assert_eq!(catalog.top_popular(10), &[4, 5]);
        assert!(catalog.top_popular(0).is_empty());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let popular = write_temp("[]");
        let result = MovieCatalog::load("/nonexistent/movie_metadata.json", popular.path());
        assert!(matches!(result, Err(CatalogError::Io { .. })));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let metadata = write_temp("{}");
        let popular = write_temp("not json");
        let result = MovieCatalog::load(metadata.path(), popular.path());
        assert!(matches!(result, Err(CatalogError::Parse { .. })));
    }

    #[test]
    fn test_non_numeric_keys_are_skipped() {
        let metadata = write_temp(r#"{"abc": {"title": "Bad"}, "3": {"title": "Heat"}}"#);
        let popular = write_temp("[3]");

        let catalog = MovieCatalog::load(metadata.path(), popular.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.title(3), "Heat");
    }
}
