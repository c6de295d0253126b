//! Protocol capability registry
//!
//! Every storage protocol the catalog understands is a variant of [`Protocol`].
//! The timing policy for each one (push vs poll, how long a deletion stays
//! eligible for move correlation) lives in a single [`CapabilityRegistry`]
//! built once at startup and shared read-only afterwards. Adding a protocol
//! means adding a variant and one default entry here.

use crate::error::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
	Local,
	Smb,
	Ftp,
	Nfs,
	WebDav,
}

impl Protocol {
	pub const ALL: [Protocol; 5] =
		[Protocol::Local, Protocol::Smb, Protocol::Ftp, Protocol::Nfs, Protocol::WebDav];

	pub fn as_str(&self) -> &'static str {
		match self {
			Protocol::Local => "local",
			Protocol::Smb => "smb",
			Protocol::Ftp => "ftp",
			Protocol::Nfs => "nfs",
			Protocol::WebDav => "webdav",
		}
	}

	/// Built-in timing policy for this protocol
	pub fn default_capability(&self) -> ProtocolCapability {
		match self {
			// The OS reports the delete and the create of a rename back to back
			Protocol::Local => ProtocolCapability::real_time(Duration::from_secs(2)),
			Protocol::Nfs => {
				ProtocolCapability::polled(Duration::from_secs(5), Duration::from_secs(1))
			}
			Protocol::Smb => {
				ProtocolCapability::polled(Duration::from_secs(10), Duration::from_secs(2))
			}
			Protocol::WebDav => {
				ProtocolCapability::polled(Duration::from_secs(15), Duration::from_secs(3))
			}
			// Listings are the slowest and coarsest of all the backends
			Protocol::Ftp => {
				ProtocolCapability::polled(Duration::from_secs(30), Duration::from_secs(5))
			}
		}
	}
}

impl fmt::Display for Protocol {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Protocol {
	type Err = TrackerError;

	fn from_str(s: &str) -> Result<Self> {
		match s.trim().to_ascii_lowercase().as_str() {
			"local" | "file" => Ok(Protocol::Local),
			"smb" | "cifs" => Ok(Protocol::Smb),
			"ftp" => Ok(Protocol::Ftp),
			"nfs" => Ok(Protocol::Nfs),
			"webdav" => Ok(Protocol::WebDav),
			_ => Err(TrackerError::unknown_protocol(s)),
		}
	}
}

/// How changes are observed on a protocol and how long a deletion may wait for
/// its matching creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolCapability {
	pub supports_real_time_notification: bool,
	pub requires_polling: bool,
	pub move_window: Duration,
	/// Re-listing cadence for polled protocols
	pub poll_interval: Option<Duration>,
}

impl ProtocolCapability {
	pub fn real_time(move_window: Duration) -> Self {
		Self {
			supports_real_time_notification: true,
			requires_polling: false,
			move_window,
			poll_interval: None,
		}
	}

	pub fn polled(move_window: Duration, poll_interval: Duration) -> Self {
		Self {
			supports_real_time_notification: false,
			requires_polling: true,
			move_window,
			poll_interval: Some(poll_interval),
		}
	}

	pub fn with_move_window(mut self, move_window: Duration) -> Self {
		self.move_window = move_window;
		self
	}
}

/// Immutable lookup table from protocol to capability
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
	entries: BTreeMap<Protocol, ProtocolCapability>,
}

impl Default for CapabilityRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl CapabilityRegistry {
	/// Registry populated with the built-in policy for every protocol
	pub fn new() -> Self {
		let entries = Protocol::ALL
			.iter()
			.map(|protocol| (*protocol, protocol.default_capability()))
			.collect();
		Self { entries }
	}

	/// Replace the capability of one protocol. Only meant for startup wiring.
	pub fn with_override(mut self, protocol: Protocol, capability: ProtocolCapability) -> Self {
		self.entries.insert(protocol, capability);
		self
	}

	/// Look up a protocol by name
	pub fn capabilities(&self, protocol: &str) -> Result<ProtocolCapability> {
		let protocol = Protocol::from_str(protocol)?;
		Ok(self.capability_for(protocol))
	}

	pub fn capability_for(&self, protocol: Protocol) -> ProtocolCapability {
		self.entries
			.get(&protocol)
			.copied()
			.unwrap_or_else(|| protocol.default_capability())
	}

	pub fn move_window(&self, protocol: Protocol) -> Duration {
		self.capability_for(protocol).move_window
	}

	/// The tightest window across all protocols; the sweeper must tick faster
	pub fn smallest_move_window(&self) -> Duration {
		self.entries
			.values()
			.map(|capability| capability.move_window)
			.min()
			.unwrap_or(Duration::ZERO)
	}

	pub fn supported_protocols(&self) -> Vec<Protocol> {
		self.entries.keys().copied().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_lookup_by_name() {
		let registry = CapabilityRegistry::new();
		let local = registry.capabilities("local").unwrap();
		assert!(local.supports_real_time_notification);
		assert!(!local.requires_polling);
		assert_eq!(local.poll_interval, None);

		let smb = registry.capabilities("SMB").unwrap();
		assert!(!smb.supports_real_time_notification);
		assert!(smb.requires_polling);
		assert!(smb.poll_interval.is_some());
	}

	#[test]
	fn test_unknown_protocol() {
		let registry = CapabilityRegistry::new();
		match registry.capabilities("gopher") {
			Err(TrackerError::UnknownProtocol { protocol }) => assert_eq!(protocol, "gopher"),
			other => panic!("Expected UnknownProtocol, got {other:?}"),
		}
	}

	#[test]
	fn test_window_ordering() {
		let registry = CapabilityRegistry::new();
		let local = registry.move_window(Protocol::Local);
		let ftp = registry.move_window(Protocol::Ftp);

		for protocol in [Protocol::Smb, Protocol::Nfs, Protocol::WebDav] {
			let window = registry.move_window(protocol);
			assert!(local < window, "local must be tighter than {protocol}");
			assert!(window < ftp, "ftp must be looser than {protocol}");
		}
		assert_eq!(registry.smallest_move_window(), local);
	}

	#[test]
	fn test_every_polled_protocol_has_interval_below_window() {
		let registry = CapabilityRegistry::new();
		for protocol in registry.supported_protocols() {
			let capability = registry.capability_for(protocol);
			if let Some(interval) = capability.poll_interval {
				assert!(interval < capability.move_window);
			}
		}
	}

	#[test]
	fn test_override() {
		let registry = CapabilityRegistry::new().with_override(
			Protocol::Ftp,
			Protocol::Ftp.default_capability().with_move_window(Duration::from_secs(60)),
		);
		assert_eq!(registry.move_window(Protocol::Ftp), Duration::from_secs(60));
		assert_eq!(registry.supported_protocols().len(), Protocol::ALL.len());
	}

	#[test]
	fn test_protocol_round_trips_through_display() {
		for protocol in Protocol::ALL {
			assert_eq!(protocol.to_string().parse::<Protocol>().unwrap(), protocol);
		}
	}
}
