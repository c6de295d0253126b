use crate::config_serde::{duration_map_ms, duration_ms};
use crate::error::{ErrorRecoveryConfig, Result, TrackerError};
use crate::protocol::{CapabilityRegistry, Protocol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Configuration for the rename tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
	/// How often the sweeper looks for expired pending moves
	#[serde(with = "duration_ms")]
	pub sweep_interval: Duration,
	/// Maximum number of pending deletions held in memory
	pub max_pending_moves: usize,
	/// Share of the pending set evicted (oldest first) when it is full
	pub eviction_percent: usize,
	/// Matched moves whose commit has not started after this long are expired
	#[serde(with = "duration_ms")]
	pub commit_timeout: Duration,
	/// How long `stop` waits for commits that are already running
	#[serde(with = "duration_ms")]
	pub shutdown_grace: Duration,
	/// Correlate pairs that lack a fingerprint on either side
	pub allow_heuristic_matches: bool,
	/// Record an `expired` rename event for deletions that never matched
	pub audit_unmatched_expirations: bool,
	/// Buffer between change sources and the event router
	pub event_channel_capacity: usize,
	/// Per-protocol move window overrides
	#[serde(with = "duration_map_ms")]
	pub move_window_overrides: BTreeMap<Protocol, Duration>,
	/// Per-protocol poll interval overrides
	#[serde(with = "duration_map_ms")]
	pub poll_interval_overrides: BTreeMap<Protocol, Duration>,
	/// Retry policy for catalog commits
	pub retry: ErrorRecoveryConfig,
}

impl Default for TrackerConfig {
	fn default() -> Self {
		Self {
			sweep_interval: Duration::from_secs(1),
			max_pending_moves: 10_000,
			eviction_percent: 10,
			commit_timeout: Duration::from_secs(30),
			shutdown_grace: Duration::from_secs(5),
			allow_heuristic_matches: true,
			audit_unmatched_expirations: true,
			event_channel_capacity: 1024,
			move_window_overrides: BTreeMap::new(),
			poll_interval_overrides: BTreeMap::new(),
			retry: ErrorRecoveryConfig::default(),
		}
	}
}

impl TrackerConfig {
	/// Load a JSON configuration file; missing fields keep their defaults
	pub fn from_json_file(path: &Path) -> Result<Self> {
		let contents = std::fs::read_to_string(path)?;
		let config: Self = serde_json::from_str(&contents)?;
		config.validate()?;
		Ok(config)
	}

	pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
		self.sweep_interval = interval;
		self
	}

	pub fn with_max_pending_moves(mut self, max_pending_moves: usize) -> Self {
		self.max_pending_moves = max_pending_moves;
		self
	}

	pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
		self.commit_timeout = timeout;
		self
	}

	pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
		self.shutdown_grace = grace;
		self
	}

	pub fn with_heuristic_matches(mut self, allowed: bool) -> Self {
		self.allow_heuristic_matches = allowed;
		self
	}

	pub fn with_unmatched_audit(mut self, enabled: bool) -> Self {
		self.audit_unmatched_expirations = enabled;
		self
	}

	pub fn with_move_window(mut self, protocol: Protocol, window: Duration) -> Self {
		self.move_window_overrides.insert(protocol, window);
		self
	}

	pub fn with_poll_interval(mut self, protocol: Protocol, interval: Duration) -> Self {
		self.poll_interval_overrides.insert(protocol, interval);
		self
	}

	pub fn with_retry(mut self, retry: ErrorRecoveryConfig) -> Self {
		self.retry = retry;
		self
	}

	/// Capability registry with this configuration's overrides applied
	pub fn registry(&self) -> CapabilityRegistry {
		let mut registry = CapabilityRegistry::new();
		for protocol in Protocol::ALL {
			let mut capability = protocol.default_capability();
			if let Some(window) = self.move_window_overrides.get(&protocol) {
				capability = capability.with_move_window(*window);
			}
			if let Some(interval) = self.poll_interval_overrides.get(&protocol) {
				capability.poll_interval = Some(*interval);
			}
			registry = registry.with_override(protocol, capability);
		}
		registry
	}

	/// Validate the configuration and return errors if invalid
	pub fn validate(&self) -> Result<()> {
		if self.max_pending_moves == 0 {
			return Err(TrackerError::configuration(
				"max_pending_moves",
				"must be greater than 0",
			));
		}
		if self.eviction_percent == 0 || self.eviction_percent > 100 {
			return Err(TrackerError::configuration(
				"eviction_percent",
				format!("must be between 1 and 100, got {}", self.eviction_percent),
			));
		}
		if self.event_channel_capacity == 0 {
			return Err(TrackerError::configuration(
				"event_channel_capacity",
				"must be greater than 0",
			));
		}
		if self.commit_timeout.is_zero() {
			return Err(TrackerError::configuration("commit_timeout", "must be greater than 0"));
		}

		let registry = self.registry();
		for protocol in registry.supported_protocols() {
			let capability = registry.capability_for(protocol);
			if capability.move_window.is_zero() {
				return Err(TrackerError::configuration(
					"move_window_overrides",
					format!("{protocol} move window must be greater than 0"),
				));
			}
			if capability.poll_interval.is_some_and(|interval| interval.is_zero()) {
				return Err(TrackerError::configuration(
					"poll_interval_overrides",
					format!("{protocol} poll interval must be greater than 0"),
				));
			}
		}

		let smallest_window = registry.smallest_move_window();
		if self.sweep_interval.is_zero() || self.sweep_interval >= smallest_window {
			return Err(TrackerError::configuration(
				"sweep_interval",
				format!(
					"must be greater than 0 and shorter than the smallest move window ({:?}), got {:?}",
					smallest_window, self.sweep_interval
				),
			));
		}

		Ok(())
	}

	/// Number of entries removed when the pending set is full
	pub fn eviction_batch(&self) -> usize {
		(self.max_pending_moves * self.eviction_percent / 100).max(1)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_default_is_valid() {
		let config = TrackerConfig::default();
		assert!(config.validate().is_ok());
		assert_eq!(config.eviction_batch(), 1000);
	}

	#[test]
	fn test_sweep_interval_must_be_below_smallest_window() {
		let config = TrackerConfig::default().with_sweep_interval(Duration::from_secs(2));
		match config.validate() {
			Err(TrackerError::Configuration { parameter, .. }) => {
				assert_eq!(parameter, "sweep_interval")
			}
			other => panic!("Expected configuration error, got {other:?}"),
		}

		// shrinking the local window below the sweep tick is caught too
		let config = TrackerConfig::default()
			.with_move_window(Protocol::Local, Duration::from_millis(500));
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_overrides_reach_registry() {
		let config = TrackerConfig::default()
			.with_move_window(Protocol::Smb, Duration::from_secs(20))
			.with_poll_interval(Protocol::Smb, Duration::from_millis(250));
		let registry = config.registry();
		let smb = registry.capability_for(Protocol::Smb);
		assert_eq!(smb.move_window, Duration::from_secs(20));
		assert_eq!(smb.poll_interval, Some(Duration::from_millis(250)));
		assert_eq!(registry.move_window(Protocol::Ftp), Duration::from_secs(30));
	}

	#[test]
	fn test_rejects_zero_capacity() {
		assert!(TrackerConfig::default().with_max_pending_moves(0).validate().is_err());
	}

	#[test]
	fn test_from_json_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(
			file,
			r#"{{
				"sweep_interval": 500,
				"allow_heuristic_matches": false,
				"move_window_overrides": {{ "ftp": 45000 }},
				"retry": {{ "max_retries": 1 }}
			}}"#
		)
		.unwrap();

		let config = TrackerConfig::from_json_file(file.path()).unwrap();
		assert_eq!(config.sweep_interval, Duration::from_millis(500));
		assert!(!config.allow_heuristic_matches);
		assert_eq!(config.registry().move_window(Protocol::Ftp), Duration::from_secs(45));
		assert_eq!(config.retry.max_retries, 1);
		assert_eq!(config.max_pending_moves, 10_000);
	}
}
