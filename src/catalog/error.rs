//! Error types for catalog storage operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
	#[error("Catalog initialization failed: {0}")]
	InitializationFailed(String),

	#[error("Serialization error: {0}")]
	Serialization(String),

	#[error("Deserialization error: {0}")]
	Deserialization(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("Catalog corruption detected: {0}")]
	CorruptionError(String),

	#[error("Transaction failed: {0}")]
	TransactionError(String),

	#[error("Catalog entry not found: {0}")]
	EntryNotFound(String),

	#[error("Destination already occupied by entry {existing_id}: {path}")]
	PathConflict { path: String, existing_id: i64 },

	#[error("Catalog operation timeout")]
	Timeout,

	#[error("redb database error: {0}")]
	RedbDatabaseError(#[from] redb::DatabaseError),

	#[error("redb transaction error: {0}")]
	RedbTransactionError(#[from] redb::TransactionError),

	#[error("redb commit error: {0}")]
	RedbCommitError(#[from] redb::CommitError),

	#[error("redb table error: {0}")]
	RedbTableError(#[from] redb::TableError),

	#[error("redb storage error: {0}")]
	RedbStorageError(#[from] redb::StorageError),

	#[error("Invalid configuration: {0}")]
	InvalidConfiguration(String),
}

impl CatalogError {
	/// Check if this error indicates that the operation should be retried
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			CatalogError::Timeout
				| CatalogError::TransactionError(_)
				| CatalogError::RedbTransactionError(_)
				| CatalogError::RedbCommitError(_)
		)
	}

	/// Row missing, as opposed to the store failing
	pub fn is_not_found(&self) -> bool {
		matches!(self, CatalogError::EntryNotFound(_))
	}

	/// Check if this error indicates data corruption
	pub fn is_corruption(&self) -> bool {
		matches!(self, CatalogError::CorruptionError(_))
	}

	/// Get error category for logging and metrics
	pub fn category(&self) -> &'static str {
		match self {
			CatalogError::InitializationFailed(_) => "initialization",
			CatalogError::Serialization(_) | CatalogError::Deserialization(_) => "serialization",
			CatalogError::IoError(_) => "io",
			CatalogError::CorruptionError(_) => "corruption",
			CatalogError::TransactionError(_) => "transaction",
			CatalogError::EntryNotFound(_) => "not_found",
			CatalogError::PathConflict { .. } => "conflict",
			CatalogError::Timeout => "timeout",
			CatalogError::RedbDatabaseError(_)
			| CatalogError::RedbTransactionError(_)
			| CatalogError::RedbCommitError(_)
			| CatalogError::RedbTableError(_)
			| CatalogError::RedbStorageError(_) => "redb",
			CatalogError::InvalidConfiguration(_) => "configuration",
		}
	}
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
