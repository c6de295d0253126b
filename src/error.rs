use crate::config_serde::duration_ms;
use crate::events::SourceId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Core tracker error types
///
/// Storage errors live in `crate::catalog::CatalogError` and are boxed in here.
/// Heuristic matches and expirations without a match are outcomes, not errors;
/// they are logged and counted instead.
#[derive(Error, Debug)]
pub enum TrackerError {
	#[error("Unknown protocol: {protocol}")]
	UnknownProtocol { protocol: String },

	#[error("Configuration error: {parameter} - {reason}")]
	Configuration { parameter: String, reason: String },

	#[error("Move {rename_id} is not in flight (already processed, expired or never matched)")]
	MoveNotInFlight { rename_id: Uuid },

	#[error("Tracker is shutting down")]
	ShuttingDown,

	#[error("Commit failed: {step} of entry {source_id} after {attempts} attempts over {elapsed:?} - {last_error}")]
	CommitFailed {
		step: &'static str,
		source_id: SourceId,
		attempts: u32,
		elapsed: Duration,
		last_error: String,
	},

	#[error("Change source for {storage_root} failed: {reason}")]
	ChangeSource { storage_root: String, reason: String },

	#[error("Event channel closed")]
	ChannelClosed,

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Notify error: {0}")]
	Notify(#[from] notify::Error),

	#[error("JSON serialization error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Catalog error: {0}")]
	Catalog(#[from] Box<crate::catalog::CatalogError>),
}

/// Error recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorRecoveryConfig {
	/// Maximum number of retry attempts for recoverable errors
	pub max_retries: u32,
	/// Initial retry delay
	#[serde(with = "duration_ms")]
	pub initial_retry_delay: Duration,
	/// Maximum retry delay (for exponential backoff)
	#[serde(with = "duration_ms")]
	pub max_retry_delay: Duration,
	/// Exponential backoff multiplier
	pub backoff_multiplier: f64,
	/// Whether to enable exponential backoff
	pub exponential_backoff: bool,
}

impl Default for ErrorRecoveryConfig {
	fn default() -> Self {
		Self {
			max_retries: 3,
			initial_retry_delay: Duration::from_millis(100),
			max_retry_delay: Duration::from_secs(5),
			backoff_multiplier: 2.0,
			exponential_backoff: true,
		}
	}
}

impl ErrorRecoveryConfig {
	/// Calculate the delay for a given retry attempt
	pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
		if !self.exponential_backoff {
			return self.initial_retry_delay;
		}

		let delay_ms = self.initial_retry_delay.as_millis() as f64
			* self.backoff_multiplier.powi(attempt as i32);

		let delay = Duration::from_millis(delay_ms as u64);
		std::cmp::min(delay, self.max_retry_delay)
	}
}

impl TrackerError {
	/// Check if this error indicates that the operation should be retried
	pub fn is_retryable(&self) -> bool {
		match self {
			TrackerError::Io(io_err) => matches!(
				io_err.kind(),
				std::io::ErrorKind::TimedOut
					| std::io::ErrorKind::Interrupted
					| std::io::ErrorKind::WouldBlock
			),
			TrackerError::Catalog(catalog_err) => catalog_err.is_retryable(),
			TrackerError::ChangeSource { .. } => true,

			TrackerError::UnknownProtocol { .. } => false,
			TrackerError::Configuration { .. } => false,
			TrackerError::MoveNotInFlight { .. } => false,
			TrackerError::ShuttingDown => false,
			TrackerError::CommitFailed { .. } => false,
			TrackerError::ChannelClosed => false,
			TrackerError::Notify(_) => false,
			TrackerError::Json(_) => false,
		}
	}

	/// True when the catalog reported that the row does not exist
	pub fn is_not_found(&self) -> bool {
		matches!(self, TrackerError::Catalog(catalog_err) if catalog_err.is_not_found())
	}

	/// Get error category for logging and metrics
	pub fn category(&self) -> &'static str {
		match self {
			TrackerError::UnknownProtocol { .. } => "unknown_protocol",
			TrackerError::Configuration { .. } => "configuration",
			TrackerError::MoveNotInFlight { .. } => "not_in_flight",
			TrackerError::ShuttingDown => "shutdown",
			TrackerError::CommitFailed { .. } => "commit_failure",
			TrackerError::ChangeSource { .. } => "change_source",
			TrackerError::ChannelClosed => "channel",
			TrackerError::Io(_) => "io",
			TrackerError::Notify(_) => "notify",
			TrackerError::Json(_) => "serialization",
			TrackerError::Catalog(_) => "catalog",
		}
	}

	/// Create a configuration error
	pub fn configuration(parameter: &str, reason: impl Into<String>) -> Self {
		TrackerError::Configuration { parameter: parameter.to_string(), reason: reason.into() }
	}

	/// Create an unknown protocol error
	pub fn unknown_protocol(protocol: &str) -> Self {
		TrackerError::UnknownProtocol { protocol: protocol.to_string() }
	}
}

impl From<crate::catalog::CatalogError> for TrackerError {
	fn from(err: crate::catalog::CatalogError) -> Self {
		TrackerError::Catalog(Box::new(err))
	}
}

pub type Result<T> = std::result::Result<T, TrackerError>;
