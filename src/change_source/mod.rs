//! Change sources
//!
//! A change source watches one storage root and turns whatever the backend
//! offers (OS notifications, periodic listings) into [`FileChangeEvent`]s.
//! Sources never correlate anything themselves.

pub mod notify_source;
pub mod polling;

pub use notify_source::NotifyChangeSource;
pub use polling::{
	diff_snapshots, DirectoryLister, ListedEntry, LocalDirectoryLister, PollingChangeSource,
	Snapshot,
};

use crate::error::Result;
use crate::events::FileChangeEvent;
use crate::protocol::Protocol;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[async_trait::async_trait]
pub trait ChangeSource: Send + Sync {
	/// Storage root this source reports for
	fn storage_root(&self) -> &str;

	fn protocol(&self) -> Protocol;

	/// True when the backend pushes changes as they happen
	fn is_real_time(&self) -> bool;

	/// Re-listing cadence for polled backends
	fn poll_interval(&self) -> Option<Duration>;

	/// Produce events until `shutdown` flips to true or the receiver goes away
	async fn run(
		&self, sender: mpsc::Sender<FileChangeEvent>, shutdown: watch::Receiver<bool>,
	) -> Result<()>;
}
