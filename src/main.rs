use clap::Parser;
use rename_tracker::{
	CatalogConfig, ChangeSource, LocalDirectoryLister, NotifyChangeSource, PollingChangeSource,
	Protocol, RedbCatalog, RenameTracker, TrackerConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "rename-tracker")]
#[command(
	about = "Keeps a media catalog's paths correct when files and directories are moved or renamed"
)]
struct Cli {
	/// Directory to watch (a local path or a mounted share)
	#[arg(short, long)]
	path: PathBuf,

	/// Storage root name recorded in the catalog
	#[arg(short, long, default_value = "default")]
	root: String,

	/// Protocol of the storage root: local, smb, ftp, nfs or webdav
	#[arg(long, default_value = "local")]
	protocol: Protocol,

	/// Catalog database file
	#[arg(short, long, default_value = "catalog.redb")]
	database: PathBuf,

	/// Tracker configuration file (JSON)
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Index the whole tree before watching
	#[arg(long)]
	index_on_start: bool,

	/// Skip content fingerprints and correlate on size alone
	#[arg(long)]
	no_fingerprints: bool,

	/// Enable verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	// Initialize tracing
	let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
	tracing_subscriber::fmt().with_max_level(level).init();

	let config = match &cli.config {
		Some(path) => TrackerConfig::from_json_file(path)?,
		None => TrackerConfig::default(),
	};

	let catalog = Arc::new(RedbCatalog::open(CatalogConfig::with_path(&cli.database))?);
	let tracker = Arc::new(RenameTracker::new(catalog, config)?);

	let mut lister = LocalDirectoryLister::new(&cli.path);
	if cli.no_fingerprints {
		lister = lister.without_fingerprints();
	}

	if cli.index_on_start {
		let indexed = tracker.index_root(&lister, &cli.root).await?;
		info!("Indexed {} entries under {:?}", indexed, cli.path);
	}

	let capability = tracker.capabilities(cli.protocol.as_str())?;
	let source: Arc<dyn ChangeSource> = if capability.supports_real_time_notification {
		let mut source = NotifyChangeSource::new(&cli.path, &cli.root);
		if cli.no_fingerprints {
			source = source.without_fingerprints();
		}
		Arc::new(source)
	} else {
		Arc::new(PollingChangeSource::from_registry(
			&cli.root,
			cli.protocol,
			tracker.engine().registry(),
			lister,
		))
	};

	tracker.start()?;
	tracker.watch(source)?;
	info!("Tracking moves under {:?} as {} ({})", cli.path, cli.root, cli.protocol);

	tokio::signal::ctrl_c().await?;
	info!("Shutting down rename tracker...");

	tracker.stop().await;
	let statistics = tracker.get_statistics().await?;
	println!("{}", serde_json::to_string_pretty(&statistics)?);

	Ok(())
}
