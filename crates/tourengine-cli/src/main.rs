//! Tour Engine CLI
//!
//! Thin wrapper around tourengine-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # What is cached on this device
//! tourengine status
//!
//! # Download a tour for offline use
//! tourengine sync 6b1f7c52-3d0a-4e8f-b2a4-91c7d5e3f020
//!
//! # Show a tour (network first, cache when offline)
//! tourengine show riverside
//!
//! # Plan a walking order from where you stand
//! tourengine route riverside --start 50.0020,8.0010
//!
//! # Replay a recorded GPS track against a tour
//! tourengine walk riverside --track walk.json --final-site s5
//!
//! # Notification preferences
//! tourengine prefs radius 75
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tourengine_core::clock::{self, Clock};
use tourengine_core::sync::{MemoryAssetFetcher, MemoryRecordSource, NetworkFlag, SyncBackend};
use tourengine_core::{
    distance, format_distance, Coordinate, EngineConfig, JsonlLayer, ProximityMonitor,
    ProximityOutcome, TourEngine, TourWithSites,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Tour Engine - offline walking tours
#[derive(Parser)]
#[command(name = "tourengine")]
#[command(version = "0.1.0")]
#[command(about = "Tour Engine - offline walking tours")]
#[command(
    long_about = "Cache published walking tours for offline use, plan walking routes and replay GPS tracks against a tour's sites."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.tourengine/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (default: <data-dir>/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Never touch the network; serve everything from the cache
    #[arg(long, global = true)]
    offline: bool,

    /// Serve records from a JSON dataset instead of the configured backend
    #[arg(long, global = true, value_name = "FILE")]
    records: Option<PathBuf>,

    /// Also write structured JSONL logs to this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what the offline cache holds
    Status,

    /// Download a tour and its assets for offline use
    Sync {
        /// Tour ID
        tour_id: String,
    },

    /// Show a tour with its sites
    Show {
        /// Tour ID or slug
        tour: String,
    },

    /// Plan a nearest-neighbour walking order
    Route {
        /// Tour ID or slug
        tour: String,
        /// Starting point as "lat,lon"
        #[arg(long, allow_hyphen_values = true)]
        start: Option<Coordinate>,
    },

    /// Replay a GPS track against a tour's sites
    Walk {
        /// Tour ID or slug
        tour: String,
        /// JSON array of {"latitude", "longitude", "at_ms"?} fixes
        #[arg(long, value_name = "FILE")]
        track: PathBuf,
        /// Site that ends the tour when reached
        #[arg(long)]
        final_site: Option<String>,
    },

    /// Evict cache entries older than the maximum age
    Evict {
        /// Override the configured maximum age
        #[arg(long)]
        max_age_days: Option<u64>,
    },

    /// Remove every cached tour and asset
    Clear,

    /// Notification preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },

    /// Show or reset progress for a tour
    Progress {
        /// Tour ID
        tour_id: String,
        /// Start the tour over
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Subcommand)]
enum PrefsAction {
    /// Show current preferences
    Show,
    /// Turn proximity alerts on
    Enable,
    /// Turn proximity alerts off
    Disable,
    /// Set the alert radius in meters (10-500)
    Radius { meters: f64 },
}

/// One recorded GPS fix
#[derive(Debug, Deserialize)]
struct TrackPoint {
    latitude: f64,
    longitude: f64,
    /// Offset from the start of the walk; defaults to one check interval per fix
    #[serde(default)]
    at_ms: Option<i64>,
}

fn setup_logging(verbosity: u8, log_dir: Option<&Path>) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let jsonl = match log_dir {
        Some(dir) => Some(
            JsonlLayer::new(dir, "cli")
                .with_context(|| format!("Failed to open log directory {}", dir.display()))?,
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(jsonl)
        .init();
    Ok(())
}

/// Get the default data directory (~/.tourengine/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tourengine")
        .join("data")
}

/// Pick the record backend: a local dataset, the configured server, or none.
///
/// Without any backend the engine runs cache-only.
fn build_backend(cli: &Cli, config: &EngineConfig) -> Result<(SyncBackend, bool)> {
    if let Some(path) = &cli.records {
        let records = MemoryRecordSource::from_path(path)
            .with_context(|| format!("Failed to load records from {}", path.display()))?;
        tracing::info!(path = %path.display(), "Serving records from local dataset");
        let network = Arc::new(NetworkFlag::new(!cli.offline));
        let backend = SyncBackend::in_memory(
            Arc::new(records),
            Arc::new(MemoryAssetFetcher::new()),
            network,
        );
        return Ok((backend, true));
    }

    match (&config.backend.base_url, &config.backend.api_key) {
        (Some(base_url), Some(api_key)) => {
            let network = Arc::new(NetworkFlag::new(!cli.offline));
            Ok((SyncBackend::http(base_url, api_key, network)?, true))
        }
        _ => {
            tracing::debug!("No backend configured, running cache-only");
            let backend = SyncBackend::in_memory(
                Arc::new(MemoryRecordSource::new()),
                Arc::new(MemoryAssetFetcher::new()),
                Arc::new(NetworkFlag::new(false)),
            );
            Ok((backend, false))
        }
    }
}

async fn find_tour(engine: &TourEngine, id_or_slug: &str) -> Result<TourWithSites> {
    engine
        .load_tour(id_or_slug)
        .await
        .ok_or_else(|| anyhow::anyhow!("Tour '{}' not found online or in the cache", id_or_slug))
}

fn format_time(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn load_track(path: &Path) -> Result<Vec<TrackPoint>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read track {}", path.display()))?;
    let track: Vec<TrackPoint> = serde_json::from_str(&data)
        .with_context(|| format!("Invalid track file {}", path.display()))?;
    for (i, point) in track.iter().enumerate() {
        if !Coordinate::new(point.latitude, point.longitude).is_valid() {
            anyhow::bail!("Track point {} is not a valid coordinate", i);
        }
    }
    Ok(track)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log_dir.as_deref())?;

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| data_dir.join("config.json"));
    let config = EngineConfig::load(&config_path)?;
    let (backend, has_backend) = build_backend(&cli, &config)?;
    let engine = TourEngine::open(&data_dir, config, backend)?;

    match cli.command {
        Commands::Status => {
            let status = engine.offline_status()?;
            println!("Tour Engine v0.1.0");
            println!();
            println!("Offline cache:");
            println!("  Tours:  {}", status.cached_tours);
            println!("  Sites:  {}", status.cached_sites);
            println!("  Media:  {}", status.cached_media);
            println!("  Assets: {}", status.cached_assets);
            println!("  Size:   {}", status.total_size_estimate);

            let tours = engine.store().list_tours()?;
            if !tours.is_empty() {
                println!();
                println!("Cached tours:");
                for cached in tours {
                    println!(
                        "  {}  {}  (cached {})",
                        cached.entity.slug,
                        cached.entity.name,
                        format_time(cached.cached_at)
                    );
                    println!("    ID: {}", cached.entity.id);
                }
            }
            println!();
            println!("Data directory: {}", engine.data_dir().display());
        }

        Commands::Sync { ref tour_id } => {
            if !has_backend {
                anyhow::bail!(
                    "No backend configured; set backend.base_url and backend.api_key or pass --records"
                );
            }
            if cli.offline {
                anyhow::bail!("Cannot sync while --offline is set");
            }
            let report = engine.sync_tour(tour_id).await?;
            println!("Synced {}", report);
            for failure in &report.asset_failures {
                println!("  asset failed: {} ({})", failure.url, failure.reason);
            }
        }

        Commands::Show { ref tour } => {
            let tour = find_tour(&engine, tour).await?;
            println!("{}", tour.tour.name);
            println!("  ID:   {}", tour.tour.id);
            println!("  Slug: {}", tour.tour.slug);
            if let Some(description) = &tour.tour.description {
                println!("  {}", description);
            }
            println!();
            println!("Sites ({}):", tour.site_count());
            for (i, site) in tour.sites.iter().enumerate() {
                println!(
                    "  {:>2}. {}  [{}]  {}",
                    i + 1,
                    site.site.name,
                    site.site.id,
                    site.site.coordinate()
                );
                if !site.media.is_empty() {
                    println!("      {} media", site.media.len());
                }
            }
        }

        Commands::Route { ref tour, start } => {
            let tour = find_tour(&engine, tour).await?;
            let route = engine.plan_route(&tour, start);

            println!("Route for {} ({} stops)", tour.tour.name, route.stops.len());
            let mut previous = start;
            for (i, stop) in route.stops.iter().enumerate() {
                let here = stop.site.coordinate();
                let hop = previous
                    .map(|from| format!("  +{}", format_distance(distance(from, here))))
                    .unwrap_or_default();
                println!("  {:>2}. {} [{}]{}", i + 1, stop.site.name, stop.site.id, hop);
                previous = Some(here);
            }
            println!();
            println!(
                "Total: {} ({} walk)",
                format_distance(route.total_distance_m),
                route.walking_time
            );
        }

        Commands::Walk {
            ref tour,
            ref track,
            ref final_site,
        } => {
            let tour = find_tour(&engine, tour).await?;
            let track = load_track(track)?;
            let state = engine.state().clone();
            state.start_tour(&tour.tour.id, tour.site_count());

            let proximity = engine.config().proximity.to_config();
            let step = proximity.check_interval.as_millis() as i64;
            let mut monitor = ProximityMonitor::new(tour.plain_sites(), state.clone(), proximity)
                .with_tour(Some(tour.tour.id.clone()))
                .with_final_site(final_site.clone());

            let origin = clock::system().now_millis();
            println!("Walking {} ({} fixes)", tour.tour.name, track.len());
            for (i, point) in track.iter().enumerate() {
                let at = origin + point.at_ms.unwrap_or(i as i64 * step);
                let here = Coordinate::new(point.latitude, point.longitude);
                for outcome in monitor.evaluate(Some(here), at) {
                    match outcome {
                        ProximityOutcome::Alert(alert) => println!(
                            "  Arrived: {} ({} away)",
                            alert.site_name,
                            format_distance(alert.distance_m)
                        ),
                        ProximityOutcome::FinalDestination { site_id } => {
                            println!("  Final destination reached: {}", site_id)
                        }
                    }
                }
            }

            let visited = state.visited_count(&tour.tour.id);
            println!();
            println!("Visited {}/{} sites", visited, tour.site_count());
            if state
                .progress(&tour.tour.id)
                .is_some_and(|p| p.is_complete())
            {
                println!("Tour complete!");
            }
        }

        Commands::Evict { max_age_days } => {
            let max_age = max_age_days.map(|d| std::time::Duration::from_secs(d * 24 * 60 * 60));
            let report = engine.evict(max_age)?;
            println!("Evicted {} cache entries", report.total());
            if report.total() > 0 {
                println!(
                    "  tours: {}, sites: {}, media: {}, links: {}, assets: {}",
                    report.tours, report.sites, report.media, report.links, report.assets
                );
            }
        }

        Commands::Clear => {
            engine.clear_cache()?;
            println!("Offline cache cleared");
        }

        Commands::Prefs { ref action } => {
            let state = engine.state();
            match action {
                PrefsAction::Show => {}
                PrefsAction::Enable => state.set_enabled(true),
                PrefsAction::Disable => state.set_enabled(false),
                PrefsAction::Radius { meters } => {
                    let applied = state.set_radius_meters(*meters);
                    if applied != *meters {
                        println!("Radius clamped to {} m", applied);
                    }
                }
            }
            let prefs = state.preferences();
            println!("Notifications:");
            println!("  Enabled: {}", if prefs.enabled { "yes" } else { "no" });
            println!("  Radius:  {} m", prefs.radius_meters);
            println!("  Dismissed sites: {}", prefs.dismissed_site_ids.len());
        }

        Commands::Progress { ref tour_id, reset } => {
            let state = engine.state();
            if reset {
                state.reset_tour(tour_id);
                println!("Progress reset for {}", tour_id);
            }
            match state.progress(tour_id) {
                Some(progress) => {
                    println!("Progress for {}:", tour_id);
                    if progress.total_sites > 0 {
                        println!(
                            "  Visited: {}/{}",
                            progress.visited_count(),
                            progress.total_sites
                        );
                    } else {
                        println!("  Visited: {}", progress.visited_count());
                    }
                    for site_id in &progress.visited_site_ids {
                        println!("    - {}", site_id);
                    }
                    println!("  Started: {}", format_time(progress.started_at));
                    match progress.completed_at {
                        Some(at) => println!("  Completed: {}", format_time(at)),
                        None => println!("  Completed: no"),
                    }
                }
                None => println!("No progress recorded for {}", tour_id),
            }
        }
    }

    engine.shutdown()?;
    Ok(())
}
