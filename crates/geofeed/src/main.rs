//! `geofeed` - CLI for the shared location feed
//!
//! This binary is both the producer surface (`capture`) and the operator
//! surface (`list`, `watch`, `remove`, `map`) over one shared record store.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{debug, info};

use geofeed::cli::{
    CaptureCommand, Cli, Command, ConfigCommand, ListCommand, MapCommand, OutputFormat,
    RemoveCommand, WatchCommand,
};
use geofeed::focus::{table_coords, Focus, TILE_ATTRIBUTION, TILE_URL_TEMPLATE};
use geofeed::gate::{Confirm, FixedDecision, PromptConfirm};
use geofeed::producer::{ConsentLocator, StaticLocator};
use geofeed::view::RemovalRequest;
use geofeed::{
    init_logging, Config, Decision, LiveView, MapFocus, Producer, Record, RecordId, RecordStore,
    SqliteStore, ViewState,
};

/// How long to wait for the first snapshot before giving up.
const SYNC_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    // Execute the command
    match cli.command {
        Command::Capture(cmd) => handle_capture(config, &cmd).await,
        Command::List(cmd) => handle_list(&config, &cmd).await,
        Command::Watch(cmd) => handle_watch(&config, &cmd).await,
        Command::Remove(cmd) => handle_remove(&config, &cmd).await,
        Command::Map(cmd) => handle_map(&config, &cmd).await,
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn open_store(config: &Config) -> anyhow::Result<SqliteStore> {
    SqliteStore::from_config(config).with_context(|| {
        format!(
            "failed to open record store at {}",
            config.database_path().display()
        )
    })
}

async fn handle_capture(mut config: Config, cmd: &CaptureCommand) -> anyhow::Result<()> {
    if let (Some(lat), Some(lng)) = (cmd.lat, cmd.lng) {
        config.producer.latitude = Some(lat);
        config.producer.longitude = Some(lng);
    }
    if let Some(device) = &cmd.device {
        config.producer.device_info = Some(device.clone());
    }
    if let Some(permission) = cmd.permission() {
        config.producer.permission = permission;
    }
    config.validate()?;

    let store: Arc<dyn RecordStore> = Arc::new(open_store(&config)?);
    let locator = ConsentLocator::new(
        StaticLocator::new(config.configured_position()),
        config.producer.permission,
        Arc::new(PromptConfirm::stdio()),
    );
    let producer = Producer::from_config(&config, store, Arc::new(locator));

    let record = producer.capture().await?;
    match cmd.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
        OutputFormat::Table => print!("{}", format_table(std::slice::from_ref(&record))),
        OutputFormat::Plain => println!(
            "Captured {} at {} ({})",
            record.id,
            table_coords(&record),
            record.device_info
        ),
    }
    Ok(())
}

/// Subscribe a fresh view and wait for its first snapshot.
async fn synced_view(config: &Config, store: &SqliteStore) -> anyhow::Result<LiveView> {
    let mut view = LiveView::new(config.view.ordering);
    let mut rx = view.watch();
    view.activate(store).await?;

    tokio::time::timeout(SYNC_TIMEOUT, async {
        while rx.borrow_and_update().is_connecting() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .context("timed out waiting for the first snapshot")?;

    Ok(view)
}

async fn handle_list(config: &Config, cmd: &ListCommand) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let view = synced_view(config, &store).await?;
    render(&view.state(), cmd.format)?;
    Ok(())
}

async fn handle_watch(config: &Config, cmd: &WatchCommand) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let interval = cmd
        .interval
        .map_or_else(|| config.poll_interval(), Duration::from_millis);
    if interval.is_zero() {
        bail!("--interval must be greater than 0");
    }

    let mut view = LiveView::new(config.view.ordering);
    let mut rx = view.watch();
    view.activate(&store).await?;
    let watcher = store.watch_external(interval);
    info!(
        database = %store.path().display(),
        collection = store.collection(),
        "Watching for changes, press Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                if !state.is_connecting() {
                    render(&state, cmd.format)?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                break;
            }
        }
    }

    watcher.stop();
    view.deactivate();
    Ok(())
}

async fn handle_remove(config: &Config, cmd: &RemoveCommand) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let gate: Box<dyn Confirm> = if cmd.yes {
        Box::new(FixedDecision(Decision::Proceed))
    } else {
        Box::new(PromptConfirm::stdio())
    };

    let request = RemovalRequest::new(RecordId::new(cmd.id.as_str()));
    match request.confirm(gate.as_ref()) {
        Decision::Proceed => {
            request.execute(&store).await?;
            println!("Removed {}", request.id());
        }
        Decision::Abort => println!("Kept {}", request.id()),
    }
    Ok(())
}

async fn handle_map(config: &Config, cmd: &MapCommand) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let view = synced_view(config, &store).await?;
    let id = RecordId::new(cmd.id.as_str());
    let Some(record) = view.records().into_iter().find(|r| r.id == id) else {
        bail!("record not found: {id}");
    };

    let mut map = MapFocus::new(config.view.focus_zoom);
    let focus = map.focus_record(&record);

    match cmd.format {
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "record": record,
                "focus": focus,
                "deep_link": focus.deep_link(),
                "tiles": TILE_URL_TEMPLATE,
                "attribution": TILE_ATTRIBUTION,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        OutputFormat::Plain | OutputFormat::Table => print!("{}", format_focus(&record, &focus)),
    }
    map.close();
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
                println!("[Store]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Collection:         {}", config.store.collection);
                println!("  Poll interval (ms): {}", config.store.poll_interval_ms);
                println!();
                println!("[Producer]");
                println!("  Device info:        {}", config.device_info());
                match config.configured_position() {
                    Some(position) => println!(
                        "  Position:           {:.6}, {:.6}",
                        position.lat, position.lng
                    ),
                    None => println!("  Position:           (none)"),
                }
                println!("  Permission:         {:?}", config.producer.permission);
                println!();
                println!("[View]");
                println!("  Ordering:           {:?}", config.view.ordering);
                println!("  Focus zoom:         {}", config.view.focus_zoom);
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

fn render(state: &ViewState, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(state)?),
        OutputFormat::Table => print!("{}", format_state_table(state)),
        OutputFormat::Plain => {
            for record in state.records() {
                println!(
                    "{}\t{}\t{}\t{}",
                    record.id,
                    table_coords(record),
                    record.time.to_rfc3339(),
                    record.device_info
                );
            }
        }
    }
    Ok(())
}

fn format_focus(record: &Record, focus: &Focus) -> String {
    format!(
        "Record:      {}\n\
         Device:      {}\n\
         Captured:    {}\n\
         Coordinates: {}\n\
         Zoom:        {}\n\
         Open in map: {}\n\
         Map data:    {TILE_ATTRIBUTION}\n",
        record.id,
        record.device_info,
        record.time.to_rfc3339(),
        focus.coords_label(),
        focus.zoom,
        focus.deep_link(),
    )
}

/// Table view of a live state, headed by the record count.
fn format_state_table(state: &ViewState) -> String {
    match state {
        ViewState::Connecting => "Connecting...\n".to_string(),
        ViewState::Empty => "Records: 0\nNo records.\n".to_string(),
        ViewState::Synced(records) => {
            format!("Records: {}\n{}", records.len(), format_table(records))
        }
    }
}

fn format_table(records: &[Record]) -> String {
    let id_width = records
        .iter()
        .map(|r| r.id.as_str().len())
        .max()
        .unwrap_or(0)
        .max("ID".len());

    let mut out = format!(
        "{:<id_width$}  {:<20}  {:<25}  DEVICE\n",
        "ID", "COORDINATES", "TIME"
    );
    for record in records {
        out.push_str(&format!(
            "{:<id_width$}  {:<20}  {:<25}  {}\n",
            record.id.as_str(),
            table_coords(record),
            record.time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            record.device_info
        ));
    }
    out
}
