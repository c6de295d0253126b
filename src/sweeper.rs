//! Expiration sweeper
//!
//! A background task that periodically reclaims pending deletions whose move
//! window has passed and finalizes them as real deletions.

use crate::correlation::CorrelationEngine;
use crate::processor::MoveProcessor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Clone)]
pub struct ExpirationSweeper {
	engine: Arc<CorrelationEngine>,
	processor: Arc<MoveProcessor>,
	interval: Duration,
	audit_unmatched: bool,
}

impl ExpirationSweeper {
	pub fn new(engine: Arc<CorrelationEngine>, processor: Arc<MoveProcessor>) -> Self {
		let config = engine.config();
		let interval = config.sweep_interval;
		let audit_unmatched = config.audit_unmatched_expirations;
		Self { engine, processor, interval, audit_unmatched }
	}

	/// One pass: select expired entries under the engine lock, then finalize
	/// them in the catalog. Returns how many were finalized.
	pub async fn sweep_once(&self) -> usize {
		let expired = self.engine.take_expired(Instant::now());
		if expired.is_empty() {
			return 0;
		}

		debug!(
			unmatched = expired.unmatched.len(),
			evicted = expired.evicted.len(),
			stale_in_flight = expired.stale_in_flight.len(),
			"Sweeping expired pending moves"
		);
		self.processor.finalize_expired(expired, self.audit_unmatched).await
	}

	/// Run until `shutdown` flips to true
	pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
		let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		info!(interval = ?self.interval, "Expiration sweeper started");

		loop {
			tokio::select! {
				_ = ticker.tick() => {
					self.sweep_once().await;
				}
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						break;
					}
				}
			}
		}

		info!("Expiration sweeper stopped");
	}

	pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
		tokio::spawn(self.run(shutdown))
	}
}
