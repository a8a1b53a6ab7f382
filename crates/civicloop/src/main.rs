//! `civicloop` - CLI for the civicloop field app
//!
//! This binary drives the device stores from the command line: log in, record
//! pickups and breakdowns, and sync them to the remote store.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;

use civicloop::assistant::image_data_uri;
use civicloop::cli::{image_mime, Cli, Command, ConfigCommand, PositionArgs};
use civicloop::flows::{
    self, BreakdownDraft, CollectionDraft, LoginForm, LogoutOutcome, RecordContext, SetupForm,
};
use civicloop::location::{FixedLocation, LocationProvider, NoLocation};
use civicloop::sync::{transport_from_config, SyncScheduler};
use civicloop::{init_logging, Config, IdentityStore, Storage, StoreEvent, WasteStore};

/// Stores opened for one command.
struct App {
    config: Config,
    storage: Arc<Storage>,
    identity: IdentityStore,
    records: Arc<WasteStore>,
}

impl App {
    fn open(config: Config) -> anyhow::Result<Self> {
        let path = config.database_path();
        let storage = Arc::new(
            Storage::open(&path)
                .with_context(|| format!("failed to open database at {}", path.display()))?,
        );
        let transport = transport_from_config(&config)?;

        Ok(Self {
            identity: IdentityStore::new(storage.clone()),
            records: Arc::new(WasteStore::new(storage.clone(), transport)),
            storage,
            config,
        })
    }

    fn require_login(&self) -> anyhow::Result<()> {
        if !self.identity.is_authenticated() {
            bail!("not logged in; run `civicloop login --phone <number>` first");
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity(), cli.log_style());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    // Config commands must work without a database
    if let Command::Config(config_cmd) = cli.command {
        return handle_config(&config, config_cmd);
    }

    let app = App::open(config)?;
    match cli.command {
        Command::Login(cmd) => handle_login(
            &app,
            LoginForm {
                phone: cmd.phone,
                name: cmd.name,
                register: cmd.register,
            },
        ),
        Command::Setup(cmd) => handle_setup(
            &app,
            SetupForm {
                role: Some(cmd.role.into()),
                ward: cmd.ward,
            },
        ),
        Command::Role { role } => {
            app.require_login()?;
            let role = role.into();
            app.identity.update_role(role);
            println!("Role switched to {role}.");
            Ok(())
        }
        Command::Logout { yes } => {
            handle_logout(&app, yes);
            Ok(())
        }
        Command::Whoami(flag) => handle_whoami(&app, flag.json),
        Command::Collect(cmd) => {
            app.require_login()?;
            let mut draft = CollectionDraft::new(cmd.status.into())
                .with_scans(cmd.household.iter().map(String::as_str));
            draft.image_url = read_image(cmd.image.as_deref())?;

            let location = location_provider(cmd.position);
            let ctx = record_context(&app, location.as_ref());
            let record = draft.submit(&app.records, &ctx).await?;
            println!(
                "Recorded {} for {} ({})",
                record.status, record.household_id, record.collection_id
            );
            print_pending(&app);
            Ok(())
        }
        Command::Breakdown(cmd) => {
            app.require_login()?;
            let mut draft = BreakdownDraft::new(cmd.details);
            draft.image_url = read_image(cmd.image.as_deref())?;

            let location = location_provider(cmd.position);
            let ctx = record_context(&app, location.as_ref());
            let record = draft.submit(&app.records, &ctx).await?;
            println!("Breakdown reported ({}). Support will be notified on next sync.", record.id);
            print_pending(&app);
            Ok(())
        }
        Command::Records(flag) => handle_records(&app, flag.json),
        Command::Status(flag) => handle_status(&app, flag.json),
        Command::Sync => handle_sync(&app).await,
        Command::Prune => {
            let removed = app.records.clear_synced_records()?;
            println!("Removed {removed} synced records from this device.");
            print_pending(&app);
            Ok(())
        }
        Command::Daemon => handle_daemon(&app).await,
        Command::Config(config_cmd) => handle_config(&app.config, config_cmd),
    }
}

fn location_provider(position: PositionArgs) -> Box<dyn LocationProvider> {
    match position.location() {
        Some(fix) => Box::new(FixedLocation(fix)),
        None => Box::new(NoLocation),
    }
}

fn record_context<'a>(app: &'a App, location: &'a dyn LocationProvider) -> RecordContext<'a> {
    RecordContext {
        driver_id: &app.config.device.driver_id,
        location,
        location_timeout: app.config.location_timeout(),
    }
}

fn read_image(path: Option<&Path>) -> anyhow::Result<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
    Ok(Some(image_data_uri(&bytes, image_mime(path))))
}

fn print_pending(app: &App) {
    let pending = app.records.unsynced_count();
    if pending > 0 {
        println!("{pending} records waiting to sync.");
    }
}

fn handle_login(app: &App, form: LoginForm) -> anyhow::Result<()> {
    let next = flows::login(&app.identity, &form)?;
    println!("Logged in as {}.", app.identity.user().phone_number.unwrap_or_default());
    if next == flows::EntryView::Setup {
        println!("Next: choose your role and ward with `civicloop setup --role <driver|helper>`.");
    }
    Ok(())
}

fn handle_setup(app: &App, form: SetupForm) -> anyhow::Result<()> {
    app.require_login()?;
    let user = flows::complete_setup(&app.identity, &form, &app.config.device.wards)?;
    println!(
        "Ready to work as {} in {}.",
        user.role.map(|r| r.to_string()).unwrap_or_default(),
        user.ward_id.unwrap_or_default()
    );
    Ok(())
}

fn handle_logout(app: &App, yes: bool) {
    match flows::logout(&app.identity, &app.records, yes) {
        LogoutOutcome::LoggedOut => println!("Logged out."),
        LogoutOutcome::NeedsConfirmation { unsynced } => {
            println!("You have {unsynced} unsynced records on this device.");
            println!("Run `civicloop sync` first, or use --yes to log out anyway.");
        }
    }
}

fn handle_whoami(app: &App, json: bool) -> anyhow::Result<()> {
    let user = app.identity.user();
    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
        return Ok(());
    }

    println!("civicloop profile");
    println!("-----------------");
    println!("Next screen:   {}", flows::resolve_entry_view(&app.identity));
    println!("Phone:         {}", user.phone_number.as_deref().unwrap_or("-"));
    println!(
        "Role:          {}",
        user.role.map_or_else(|| "-".to_string(), |r| r.to_string())
    );
    println!("Ward:          {}", user.ward_id.as_deref().unwrap_or("-"));
    println!("Driver id:     {}", app.config.device.driver_id);
    Ok(())
}

fn handle_records(app: &App, json: bool) -> anyhow::Result<()> {
    if json {
        let out = serde_json::json!({
            "collections": app.records.all_records(),
            "breakdowns": app.records.all_breakdowns(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let collections = app.records.recent_records();
    println!("Collections ({})", collections.len());
    for r in &collections {
        println!(
            "  {} {:<10} {:<12} {}",
            r.timestamp.format("%Y-%m-%d %H:%M"),
            r.status,
            r.household_id,
            if r.is_synced { "synced" } else { "pending" }
        );
    }

    let breakdowns = app.records.recent_breakdowns();
    println!("Breakdowns ({})", breakdowns.len());
    for r in &breakdowns {
        println!(
            "  {} {} [{}]",
            r.timestamp.format("%Y-%m-%d %H:%M"),
            r.details,
            if r.is_synced { "synced" } else { "pending" }
        );
    }
    Ok(())
}

fn handle_status(app: &App, json: bool) -> anyhow::Result<()> {
    let stats = app.records.stats();
    let storage = app.storage.stats()?;

    if json {
        let status = serde_json::json!({
            "pending": stats.pending(),
            "collections": stats.collections,
            "pending_collections": stats.pending_collections,
            "breakdowns": stats.breakdowns,
            "pending_breakdowns": stats.pending_breakdowns,
            "by_status": {
                "segregated": stats.segregated,
                "mixed": stats.mixed,
                "rejected": stats.rejected,
                "locked": stats.locked,
            },
            "database_path": app.storage.path(),
            "database_bytes": storage.db_size_bytes,
            "sync_endpoint": app.config.sync.endpoint,
            "sync_interval_secs": app.config.sync.interval_secs,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("civicloop status");
        println!("----------------");
        println!("Pending:       {}", stats.pending());
        println!(
            "Collections:   {} ({} pending)",
            stats.collections, stats.pending_collections
        );
        println!(
            "  Segregated:  {}  Mixed: {}  Rejected: {}  Locked: {}",
            stats.segregated, stats.mixed, stats.rejected, stats.locked
        );
        println!(
            "Breakdowns:    {} ({} pending)",
            stats.breakdowns, stats.pending_breakdowns
        );
        println!("Database:      {}", app.storage.path().display());
        println!(
            "Remote:        {}",
            app.config.sync.endpoint.as_deref().unwrap_or("simulated")
        );
    }
    Ok(())
}

async fn handle_sync(app: &App) -> anyhow::Result<()> {
    let pending = app.records.unsynced_count();
    if pending == 0 {
        println!("Everything is synced.");
        return Ok(());
    }

    println!("Uploading {pending} records...");
    let count = app.records.sync_pending().await.context("sync failed")?;
    println!("Upload complete: {count} records synced.");
    Ok(())
}

async fn handle_daemon(app: &App) -> anyhow::Result<()> {
    let mut events = app.records.subscribe();
    let scheduler = SyncScheduler::spawn(app.records.clone(), app.config.sync_interval());
    println!(
        "Background sync every {}s. Press Ctrl-C to stop.",
        app.config.sync.interval_secs
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            event = events.recv() => {
                if let Ok(StoreEvent::Synced { count }) = event {
                    println!("Synced {count} records.");
                }
            }
        }
    }

    info!("Shutting down background sync");
    scheduler.shutdown().await;
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Sync]");
                println!("  Interval (secs):    {}", config.sync.interval_secs);
                println!(
                    "  Endpoint:           {}",
                    config.sync.endpoint.as_deref().unwrap_or("(simulated)")
                );
                println!("  Collection:         {}", config.sync.collection);
                println!("  Request timeout:    {}s", config.sync.request_timeout_secs);
                println!();
                println!("[Device]");
                println!("  Driver id:          {}", config.device.driver_id);
                println!("  Location timeout:   {}ms", config.device.location_timeout_ms);
                println!("  Wards:              {}", config.device.wards.join(", "));
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
