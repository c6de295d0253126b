//! Move processor
//!
//! Applies a matched move to the catalog in one transaction, retrying
//! transient failures with the configured backoff. When the move cannot be
//! applied the source row is marked deleted instead, so the catalog never
//! keeps a row at a path that no longer exists.

use crate::catalog::{CatalogResult, CatalogStore, RelocationRequest, RenameEvent, RenameStatus};
use crate::correlation::{unmatched_event, CorrelationEngine, ExpiredMoves, MatchedMove};
use crate::error::{Result, TrackerError};
use crate::events::SourceId;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What happened to a matched move
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MoveOutcome {
	/// The row (and its descendants) now live at the new path
	Relocated { rows_updated: u64 },
	/// The rewrite failed; the row was marked deleted and the rename event
	/// recorded as `failed`
	FellBackToDelete { reason: String },
}

impl MoveOutcome {
	pub fn is_relocated(&self) -> bool {
		matches!(self, MoveOutcome::Relocated { .. })
	}
}

/// Catalog write made on behalf of one move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitStep {
	Relocate,
	FinalizeDeletion,
}

impl CommitStep {
	fn as_str(self) -> &'static str {
		match self {
			CommitStep::Relocate => "relocate",
			CommitStep::FinalizeDeletion => "finalize_deletion",
		}
	}
}

pub struct MoveProcessor {
	catalog: Arc<dyn CatalogStore>,
	engine: Arc<CorrelationEngine>,
}

impl MoveProcessor {
	pub fn new(catalog: Arc<dyn CatalogStore>, engine: Arc<CorrelationEngine>) -> Self {
		Self { catalog, engine }
	}

	/// Commit a matched move to `new_path`
	///
	/// Fails only when the move is no longer in flight, or when even the
	/// fallback deletion could not be persisted.
	pub async fn process_move(&self, matched: &MatchedMove, new_path: &str) -> Result<MoveOutcome> {
		let claimed = self.engine.claim(matched.rename_id)?;

		let request = RelocationRequest {
			storage_root: claimed.pending.storage_root.clone(),
			source_id: claimed.source_id(),
			old_path: claimed.old_path().to_string(),
			new_path: new_path.to_string(),
			is_directory: claimed.is_directory(),
		};
		let mut event = claimed.rename_event();
		event.new_path = Some(new_path.to_string());
		let processed = event.clone().with_status(RenameStatus::Processed);

		let catalog = &self.catalog;
		let (request_ref, processed_ref) = (&request, &processed);
		let relocated = self
			.commit(CommitStep::Relocate, request.source_id, move || {
				catalog.relocate(request_ref, processed_ref)
			})
			.await;

		match relocated {
			Ok(rows_updated) => {
				self.engine.complete(&claimed, true);
				info!(
					source_id = request.source_id,
					from = %request.old_path,
					to = %request.new_path,
					rows_updated,
					method = claimed.method.as_str(),
					"Move processed"
				);
				Ok(MoveOutcome::Relocated { rows_updated })
			}
			Err(relocate_error) => {
				warn!(
					source_id = request.source_id,
					from = %request.old_path,
					to = %request.new_path,
					category = relocate_error.category(),
					"Move could not be applied, falling back to delete: {}",
					relocate_error
				);
				let failed = event.with_status(RenameStatus::Failed);
				match self.finalize(request.source_id, Some(&failed)).await {
					Ok(_) => {
						self.engine.complete(&claimed, false);
						Ok(MoveOutcome::FellBackToDelete { reason: relocate_error.to_string() })
					}
					Err(fallback_error) => {
						error!(
							source_id = request.source_id,
							"Fallback delete failed: {}", fallback_error
						);
						self.engine.release(claimed.rename_id);
						Err(fallback_error)
					}
				}
			}
		}
	}

	/// Mark rows deleted for everything a sweep reclaimed. Returns how many
	/// were finalized; failures are logged and skipped.
	pub async fn finalize_expired(&self, expired: ExpiredMoves, audit_unmatched: bool) -> usize {
		let mut finalized = 0;

		for pending in expired.unmatched.iter().chain(expired.evicted.iter()) {
			let event = audit_unmatched.then(|| unmatched_event(pending));
			match self.finalize(pending.source_id, event.as_ref()).await {
				Ok(rows) => {
					debug!(
						source_id = pending.source_id,
						path = %pending.old_path,
						rows,
						"Deletion expired without a matching creation"
					);
					finalized += 1;
				}
				Err(e) => error!(source_id = pending.source_id, "Failed to finalize deletion: {}", e),
			}
		}

		for matched in &expired.stale_in_flight {
			let event = matched.rename_event().with_status(RenameStatus::Expired);
			match self.finalize(matched.source_id(), Some(&event)).await {
				Ok(_) => {
					warn!(
						source_id = matched.source_id(),
						from = %matched.old_path(),
						to = %matched.new_path,
						"Matched move was never committed, expiring it"
					);
					finalized += 1;
				}
				Err(e) => {
					error!(source_id = matched.source_id(), "Failed to expire matched move: {}", e)
				}
			}
		}

		finalized
	}

	async fn finalize(&self, source_id: SourceId, event: Option<&RenameEvent>) -> Result<u64> {
		let catalog = &self.catalog;
		self.commit(CommitStep::FinalizeDeletion, source_id, move || {
			catalog.finalize_deletion(source_id, event)
		})
		.await
	}

	/// Run one catalog write for `source_id`, repeating it while the store
	/// reports transient failures
	///
	/// Each repeat is counted in `commit_retries`. A non-transient error (a
	/// missing row, corruption) is returned as is; a spent retry budget
	/// becomes [`TrackerError::CommitFailed`].
	async fn commit<T, F, Fut>(&self, step: CommitStep, source_id: SourceId, mut write: F) -> Result<T>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = CatalogResult<T>>,
	{
		let policy = &self.engine.config().retry;
		let started = Instant::now();
		let mut attempt = 0u32;

		loop {
			let error = match write().await {
				Ok(value) => {
					if attempt > 0 {
						debug!(
							step = step.as_str(),
							source_id,
							retries = attempt,
							elapsed = ?started.elapsed(),
							"Commit went through after retrying"
						);
					}
					return Ok(value);
				}
				Err(error) => error,
			};

			if !error.is_retryable() {
				return Err(error.into());
			}
			if attempt >= policy.max_retries {
				return Err(TrackerError::CommitFailed {
					step: step.as_str(),
					source_id,
					attempts: attempt + 1,
					elapsed: started.elapsed(),
					last_error: error.to_string(),
				});
			}

			let delay = policy.delay_for_attempt(attempt);
			warn!(
				step = step.as_str(),
				source_id,
				attempt = attempt + 1,
				category = error.category(),
				"Transient commit failure, retrying in {:?}: {}",
				delay,
				error
			);
			self.engine.record_commit_retry();
			tokio::time::sleep(delay).await;
			attempt += 1;
		}
	}
}
