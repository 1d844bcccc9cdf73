//! Bargain notifier - flags underpriced catalog units and posts them to
//! Slack on a rotating branch schedule.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::signal;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{CatalogClient, CatalogSnapshot, Config, ImageCache, RawListing, SlackClient};

mod config;
mod dispatcher;
mod engine;
mod estimator;
mod grouper;
mod images;
mod message;
mod metrics;
mod models;
mod rotation;
mod selector;
mod transport;

use config::NotifierConfig;
use dispatcher::{DispatchCoordinator, DispatchSettings};
use engine::BargainEngine;
use grouper::ListingNormalizer;
use images::CatalogImages;
use message::MessageComposer;
use metrics::SessionTotals;
use rotation::{BranchRotation, CyclePhase, StateError, StateFile, StateLock};
use selector::BargainSelector;
use transport::{DryRunNotifier, MessageHandle, Notifier, SlackNotifier};

/// Bargain notifier - catalog bargain detection with rotating Slack alerts
#[derive(Parser, Debug)]
#[command(name = "bargain-notifier")]
#[command(about = "Detects underpriced catalog units and notifies Slack by branch rotation")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Log messages instead of posting (implied when SLACK_BOT_TOKEN is unset)
    #[arg(long)]
    dry_run: bool,

    /// Refetch the catalog on the first cycle even if the snapshot is fresh
    #[arg(long)]
    refresh_catalog: bool,

    /// Seconds between cycles inside the operating window
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Minimum margin vs the dominant minimum price
    #[arg(long)]
    min_margin: Option<f64>,

    /// Cheapest units considered per model
    #[arg(long)]
    candidate_count: Option<usize>,

    /// Minimum listings per model
    #[arg(long)]
    min_group_size: Option<usize>,

    /// Branches eligible per day
    #[arg(long)]
    batch_size: Option<usize>,

    /// Seconds between two messages
    #[arg(long)]
    message_interval: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delete a previously posted bargain message
    Retract {
        /// Message timestamp returned by Slack
        #[arg(long)]
        ts: String,
    },
}

/// Long-lived collaborators of the run loop.
struct App {
    engine: BargainEngine,
    catalog: CatalogClient,
    config: Config,
    settings: NotifierConfig,
    state_file: StateFile,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with RUST_LOG env var support (default: info)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    let config = Config::from_env()?;
    let settings = build_settings(&args, &config)?;

    info!("Bargain notifier starting...");
    info!(
        "Mode: {}",
        if settings.dry_run { "DRY RUN" } else { "LIVE" }
    );

    let notifier: Arc<dyn Notifier> = if settings.dry_run {
        Arc::new(DryRunNotifier::new(&config.slack_channel_id))
    } else {
        Arc::new(SlackNotifier::new(SlackClient::new(&config)?))
    };

    let app = build_app(config, settings, notifier);

    if let Some(Command::Retract { ts }) = &args.command {
        let handle = MessageHandle {
            channel: app.config.slack_channel_id.clone(),
            ts: ts.clone(),
        };
        return app.engine.retract(&handle).await;
    }

    print_banner(&app);

    let mut totals = SessionTotals::default();

    // Setup graceful shutdown
    let shutdown = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = run_loop(&app, &args, &mut totals) => {
            if let Err(e) = result {
                error!("Error in main loop: {}", e);
            }
        }
        _ = shutdown => {}
    }

    print_summary(&totals);

    Ok(())
}

/// Defaults, then environment, then CLI flags.
fn build_settings(args: &Args, config: &Config) -> Result<NotifierConfig> {
    let mut settings = NotifierConfig::from_env();

    settings.dry_run = args.dry_run || config.slack_bot_token.is_none();
    if let Some(v) = args.min_margin {
        settings.min_margin = Decimal::try_from(v)?;
    }
    if let Some(v) = args.candidate_count {
        settings.candidate_count = v;
    }
    if let Some(v) = args.min_group_size {
        settings.min_group_size = v;
    }
    if let Some(v) = args.batch_size {
        settings.batch_size = v;
    }
    if let Some(v) = args.message_interval {
        settings.message_interval_secs = v;
    }
    if let Some(v) = args.poll_interval {
        settings.poll_interval_secs = v;
    }

    settings.validate()?;
    Ok(settings)
}

fn build_app(config: Config, settings: NotifierConfig, notifier: Arc<dyn Notifier>) -> App {
    let branches = config.branch_names();
    let store = Arc::new(StateFile::new(&config.state_file));
    let catalog = CatalogClient::new(&config);

    let image_cache = ImageCache::load(&config.image_cache_file);
    info!(
        "[IMAGES] {} cached SKUs in {}",
        image_cache.len(),
        image_cache.path().display()
    );
    let images = Arc::new(CatalogImages::new(catalog.clone(), image_cache));

    let coordinator = DispatchCoordinator::new(
        notifier,
        store.clone(),
        MessageComposer::new(&config.slack_channel_id),
        config.families.clone(),
        branches.clone(),
        DispatchSettings {
            message_interval: settings.message_interval(),
            post_attempts: settings.post_attempts,
            retry_initial_delay: Duration::from_millis(settings.retry_initial_delay_ms),
            retry_max_delay: Duration::from_millis(settings.retry_max_delay_ms),
        },
    )
    .with_images(images);

    let engine = BargainEngine::new(
        ListingNormalizer::default(),
        BargainSelector::new(
            settings.candidate_count,
            settings.min_margin,
            settings.min_group_size,
        ),
        BranchRotation::new(branches, settings.batch_size, settings.window),
        coordinator,
        store,
    );

    App {
        engine,
        catalog,
        state_file: StateFile::new(&config.state_file),
        config,
        settings,
    }
}

/// Run cycles until shutdown (or once with `--once`).
async fn run_loop(app: &App, args: &Args, totals: &mut SessionTotals) -> Result<()> {
    let mut force_refresh = args.refresh_catalog;

    loop {
        let now = Local::now().naive_local();
        let window = app.settings.window;

        let wait = if window.contains(now.time()) {
            run_once(app, now, force_refresh, totals).await?;
            force_refresh = false;
            Duration::from_secs(app.settings.poll_interval_secs)
        } else {
            let wait = window.until_open(now);
            info!(
                "Outside operating hours ({:02}:00-{:02}:00); next window in {}m",
                window.start_hour,
                window.end_hour,
                wait.as_secs() / 60
            );
            wait
        };

        if args.once {
            break;
        }

        sleep(wait).await;
    }

    Ok(())
}

/// One guarded cycle: lock, plan, load catalog, detect and dispatch.
async fn run_once(
    app: &App,
    now: NaiveDateTime,
    force_refresh: bool,
    totals: &mut SessionTotals,
) -> Result<()> {
    let _lock = match StateLock::acquire(app.state_file.path()) {
        Ok(lock) => lock,
        Err(StateError::Locked(path)) => {
            warn!("[ROTATION] Another cycle holds {}; skipping", path);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let (state, plan) = app.engine.begin_day(now)?;
    match plan.phase {
        CyclePhase::InProgress => {}
        CyclePhase::Complete => {
            info!("Today's cycle is complete; waiting for the next day");
            return Ok(());
        }
        CyclePhase::IdleWaitingForDay => return Ok(()),
    }

    let listings = if plan.eligible.is_empty() {
        Vec::new()
    } else {
        let listings = load_catalog(app, force_refresh).await;
        if listings.is_empty() {
            warn!("[CATALOG] No listings available; retrying next cycle");
            return Ok(());
        }
        listings
    };

    let outcome = app.engine.run_cycle(state, &plan, &listings).await?;
    totals.record(&outcome.metrics);

    Ok(())
}

/// Reuse a fresh snapshot, or scan the catalog and snapshot the result.
async fn load_catalog(app: &App, force_refresh: bool) -> Vec<RawListing> {
    let path = Path::new(&app.config.catalog_snapshot_file);

    if !force_refresh {
        if let Some(snapshot) = CatalogSnapshot::load(path) {
            if snapshot.is_fresh(Utc::now(), app.settings.catalog_max_age()) {
                info!(
                    "[CATALOG] Using snapshot from {} ({} listings)",
                    snapshot.fetched_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    snapshot.listings.len()
                );
                return snapshot.listings;
            }
        }
    }

    let listings = app
        .catalog
        .fetch_all(&app.config.branches, &app.config.families)
        .await;

    let snapshot = CatalogSnapshot::new(listings);
    if !snapshot.listings.is_empty() {
        if let Err(e) = snapshot.save(path) {
            warn!("[CATALOG] Failed to save snapshot: {}", e);
        }
    }

    snapshot.listings
}

/// Print startup banner.
fn print_banner(app: &App) {
    let s = &app.settings;
    println!(
        r#"
═══════════════════════════════════════════════════════════════
  BARGAIN NOTIFIER - {} MODE
═══════════════════════════════════════════════════════════════
  Branches:         {} ({} per day)
  Families:         {}
  Candidates/model: {}
  Min margin:       ${}
  Min group size:   {}
  Message interval: {}s
  Operating hours:  {:02}:00-{:02}:00
  State file:       {}
═══════════════════════════════════════════════════════════════
"#,
        if s.dry_run { "DRY RUN" } else { "LIVE" },
        app.config.branches.len(),
        s.batch_size,
        app.config.families.join(", "),
        s.candidate_count,
        s.min_margin,
        s.min_group_size,
        s.message_interval_secs,
        s.window.start_hour,
        s.window.end_hour,
        app.config.state_file,
    );
}

/// Print final session summary.
fn print_summary(totals: &SessionTotals) {
    println!(
        r#"
═══════════════════════════════════════════════════════════════
  SESSION SUMMARY
═══════════════════════════════════════════════════════════════
  Cycles run:          {}
  Bargains detected:   {}
  Messages sent:       {}
  Messages failed:     {}
═══════════════════════════════════════════════════════════════
"#,
        totals.cycles, totals.candidates_found, totals.messages_sent, totals.messages_failed
    );
}
