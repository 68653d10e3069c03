use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use drone_media_catalog::media::atom::{self, AtomPath};
use drone_media_catalog::scan::{
    open_catalog, AddOutcome, BroadcastNotifier, CatalogEvent, ScanCancel, ScanOrchestrator, ScanSettings,
};
use drone_media_catalog::state::{provenance, SqliteStore};
use drone_media_catalog::CatalogConfig;

#[derive(Parser, Debug)]
#[command(name = "drone-media-catalog", version, about = "Catalogue drone photos and videos")]
struct Cli {
    /// Config file (JSON). Defaults to the user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan every collection and catalogue new media
    Scan,
    /// Scan, then add one file to the collection of its product
    Add { file: PathBuf },
    /// Print the catalog, or one collection of it
    List { collection: Option<String> },
    /// Dump the payload of an atom, e.g. `pvat` or `moov/2:trak/mdhd`
    Atom {
        file: PathBuf,
        #[arg(default_value = "pvat")]
        path: String,
    },
    /// Set the media and run date stored in a video's pvat atom
    Redate { file: PathBuf, date: String },
}

type CliResult = Result<(), Box<dyn Error>>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> CliResult {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = CatalogConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Scan => {
            scan(&config).await?;
        }
        Command::Add { file } => add(&config, &file).await?,
        Command::List { collection } => list(&config, collection.as_deref())?,
        Command::Atom { file, path } => dump_atom(&file, &path)?,
        Command::Redate { file, date } => {
            let record = provenance::change_pvat_date(&file, &date)?;
            println!("✅ {} now dated {}", file.display(), date);
            println!("   product={} uuid={}", record.product_id, record.uuid.as_deref().unwrap_or("-"));
        }
    }
    Ok(())
}

/// Open the stored catalog and wire an orchestrator around it
fn open(config: &CatalogConfig) -> Result<(Arc<ScanOrchestrator>, Arc<BroadcastNotifier>), Box<dyn Error>> {
    let store = Arc::new(SqliteStore::open(&config.database_path)?);
    let catalog = Arc::new(open_catalog(store.as_ref())?);
    let notifier = Arc::new(BroadcastNotifier::new(config.event_capacity));

    let orchestrator = ScanOrchestrator::new(catalog, store, ScanSettings::from(config))
        .with_registry(Arc::new(config.registry()))
        .with_events(notifier.clone());
    orchestrator.init(config.collections.iter().cloned());

    Ok((Arc::new(orchestrator), notifier))
}

async fn scan(config: &CatalogConfig) -> Result<Arc<ScanOrchestrator>, Box<dyn Error>> {
    let (orchestrator, notifier) = open(config)?;
    println!("🔍 Scanning {}", config.media_root.display());

    let mut events = notifier.subscribe();
    let progress = tokio::spawn(async move {
        let mut last_tick = 0;
        loop {
            match events.recv().await {
                Ok(CatalogEvent::Updating(percent)) => {
                    let tick = (percent / 10.0) as u32;
                    if tick > last_tick {
                        last_tick = tick;
                        println!("⏳ {:.0}%", percent);
                    }
                }
                Ok(CatalogEvent::MediaAdded(path)) => println!("➕ {}", path),
                Ok(CatalogEvent::Updated(_)) | Err(RecvError::Closed) => break,
                Ok(CatalogEvent::Init) | Err(RecvError::Lagged(_)) => {}
            }
        }
    });

    let summary = orchestrator.spawn_update(ScanCancel::new()).await??;
    // The printer stops at the terminal event
    progress.await?;

    println!(
        "✅ Scan complete: {} new, {} already catalogued, {} skipped",
        summary.added, summary.already_present, summary.skipped
    );
    if !summary.persisted {
        eprintln!("⚠️  Catalog could not be saved to {}", config.database_path.display());
    }
    Ok(orchestrator)
}

async fn add(config: &CatalogConfig, file: &Path) -> CliResult {
    let orchestrator = scan(config).await?;
    match orchestrator.add_single(file)? {
        AddOutcome::Added(path) => println!("✅ Added {}", path),
        AddOutcome::AlreadyPresent(path) => println!("📊 Already catalogued: {}", path),
        AddOutcome::Rejected(reason) => eprintln!("⚠️  Not added {}: {}", file.display(), reason),
    }
    Ok(())
}

fn list(config: &CatalogConfig, collection: Option<&str>) -> CliResult {
    let store = SqliteStore::open(&config.database_path)?;
    let catalog = open_catalog(&store)?;

    for (key, records) in catalog.snapshot(collection) {
        println!("📁 {} ({} files)", key, records.len());
        for record in records.values() {
            println!(
                "   {:?} {} product={} date={}",
                record.media_type,
                record.file_path,
                record.provenance.product_id,
                record.provenance.media_date.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

fn dump_atom(file: &Path, path: &str) -> CliResult {
    let atom_path: AtomPath = path.parse()?;
    let mut reader = BufReader::new(File::open(file)?);

    match atom::locate_path(&mut reader, &atom_path)? {
        Some(payload) => match std::str::from_utf8(&payload) {
            Ok(text) => println!("{}", text.trim_end_matches('\0')),
            Err(_) => {
                let hex: Vec<String> = payload.iter().map(|b| format!("{:02x}", b)).collect();
                println!("{}", hex.join(" "));
            }
        },
        None => eprintln!("⚠️  No {} atom in {}", atom_path, file.display()),
    }
    Ok(())
}
