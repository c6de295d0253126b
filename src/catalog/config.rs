//! Catalog storage configuration

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CatalogConfig {
	/// Path where the catalog database file will be stored
	pub database_path: PathBuf,

	/// Page cache size handed to redb (None = redb default)
	pub cache_size_bytes: Option<usize>,
}

impl Default for CatalogConfig {
	fn default() -> Self {
		Self {
			database_path: std::env::temp_dir().join("rename_tracker_catalog.redb"),
			cache_size_bytes: None,
		}
	}
}

impl CatalogConfig {
	/// Configuration pointing at a specific database file
	pub fn with_path(path: impl Into<PathBuf>) -> Self {
		Self { database_path: path.into(), ..Default::default() }
	}

	pub fn with_cache_size(mut self, bytes: usize) -> Self {
		self.cache_size_bytes = Some(bytes);
		self
	}

	pub fn validate(&self) -> Result<(), String> {
		if self.database_path.as_os_str().is_empty() {
			return Err("database_path must not be empty".to_string());
		}
		if self.cache_size_bytes == Some(0) {
			return Err("cache_size_bytes must be greater than 0".to_string());
		}
		Ok(())
	}
}
