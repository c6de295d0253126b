//! Catalog persistence
//!
//! The tracker only talks to the [`CatalogStore`] trait. [`RedbCatalog`] is the
//! embedded implementation used by the binary and the tests.

pub mod config;
pub mod error;
pub mod path_utils;
pub mod redb_store;
pub mod store;
pub mod tables;
pub mod types;

pub use config::CatalogConfig;
pub use error::{CatalogError, CatalogResult};
pub use redb_store::RedbCatalog;
pub use store::CatalogStore;
pub use types::{
	CatalogEntry, NewEntry, RelocationRequest, RenameCounts, RenameEvent, RenameEventFilter,
	RenameStatus,
};
