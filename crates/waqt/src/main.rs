//! `waqt` - CLI for the prayer schedule service
//!
//! This binary loads the day's prayer timetable for the configured or given
//! location and prints the schedule, once or continuously.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::debug;

use waqt::cli::{render, Cli, Command, ConfigCommand, LocationArgs, TodayCommand, WatchCommand};
use waqt::service::ServiceBuilder;
use waqt::{init_logging, Config, Error, FixedClock};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    match cli.command {
        Command::Today(cmd) => handle_today(load_config(cli.config)?, cmd).await,
        Command::Watch(cmd) => handle_watch(load_config(cli.config)?, cmd).await,
        Command::Methods => {
            let config = load_config(cli.config)?;
            print!("{}", render::methods(config.timetable.method));
            Ok(ExitCode::SUCCESS)
        }
        // Not loaded up front so a broken file can still be inspected
        Command::Config(cmd) => handle_config(cli.config, cmd),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    Config::load_from(path).context("failed to load configuration")
}

/// Fold command-line overrides into the loaded configuration.
fn apply_location_args(config: &mut Config, args: &LocationArgs) -> waqt::Result<()> {
    if let (Some(lat), Some(lon)) = (args.lat, args.lon) {
        config.location.latitude = Some(lat);
        config.location.longitude = Some(lon);
    }
    if let Some(name) = &args.name {
        config.location.name = Some(name.clone());
    }
    if let Some(method) = args.method {
        config.timetable.method = method;
    }
    config.validate()
}

async fn handle_today(mut config: Config, cmd: TodayCommand) -> anyhow::Result<ExitCode> {
    apply_location_args(&mut config, &cmd.location)?;

    let mut builder = ServiceBuilder::from_config(&config)?;
    if cmd.date.is_some() || cmd.at.is_some() {
        let now = Local::now().naive_local();
        let at = cmd
            .date
            .unwrap_or(now.date())
            .and_time(cmd.at.unwrap_or(now.time()));
        debug!(%at, "Using fixed clock");
        builder = builder.clock(Arc::new(FixedClock::new(at)));
    }

    let service = builder.build();
    let result = service.start().await;

    print!("{}", render::render(&service.snapshot(), cmd.format)?);

    Ok(match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    })
}

async fn handle_watch(mut config: Config, cmd: WatchCommand) -> anyhow::Result<ExitCode> {
    if let Some(interval) = cmd.interval {
        config.refresh.interval_secs = interval;
    }
    apply_location_args(&mut config, &cmd.location)?;

    let handle = ServiceBuilder::from_config(&config)?.build().spawn();
    let mut snapshots = handle.subscribe();
    let mut input = spawn_stdin_reader();
    let mut input_open = true;

    eprintln!("Press Enter to refresh, q to quit.");

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.is_loading() {
                    continue;
                }
                if let Some(at) = snapshot.updated_at {
                    println!("--- {} ---", at.format("%H:%M:%S"));
                }
                print!("{}", render::render(&snapshot, cmd.format)?);
            }
            line = input.recv(), if input_open => match line {
                Some(line) if line.trim().eq_ignore_ascii_case("q") => break,
                Some(_) => match handle.refresh_now().await {
                    Ok(()) => eprintln!("Refreshed."),
                    Err(Error::RefreshInProgress) => eprintln!("A refresh is already running."),
                    Err(e) => eprintln!("Refresh failed: {e}"),
                },
                None => input_open = false,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

/// Read stdin lines on a plain thread so a pending read never holds up
/// runtime shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn handle_config(path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<ExitCode> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = load_config(path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print_config(&config);
            }
        }
        ConfigCommand::Path => {
            let path = path.unwrap_or_else(Config::default_config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => {
                    println!("Configuration error: {e}");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_config(config: &Config) {
    let unset = || "(not set)".to_string();

    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[Location]");
    println!(
        "  Latitude:           {}",
        config.location.latitude.map_or_else(unset, |v| v.to_string())
    );
    println!(
        "  Longitude:          {}",
        config.location.longitude.map_or_else(unset, |v| v.to_string())
    );
    println!(
        "  Name:               {}",
        config.location.name.clone().unwrap_or_else(unset)
    );
    println!();
    println!("[Timetable]");
    println!("  Provider:           {}", config.timetable.base_url);
    println!(
        "  Method:             {} ({})",
        config.timetable.method,
        config.timetable.method.id()
    );
    println!("  Timeout (secs):     {}", config.timetable.timeout_secs);
    println!();
    println!("[Geocoding]");
    println!("  Enabled:            {}", config.geocoding.enabled);
    println!("  Provider:           {}", config.geocoding.base_url);
    println!();
    println!("[Refresh]");
    println!("  Interval (secs):    {}", config.refresh.interval_secs);
}
