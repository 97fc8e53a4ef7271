//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Subcommand, ValueEnum};

use crate::timetable::{self, CalculationMethod};

/// Where to compute the schedule for. Overrides `[location]` in the config.
#[derive(Debug, Clone, Default, Args)]
pub struct LocationArgs {
    /// Latitude in degrees
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    pub lat: Option<f64>,

    /// Longitude in degrees
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    pub lon: Option<f64>,

    /// Place label to show instead of a geocoded name
    #[arg(long)]
    pub name: Option<String>,

    /// Calculation method, by name or id (see `waqt methods`)
    #[arg(short, long, value_parser = parse_method)]
    pub method: Option<CalculationMethod>,
}

/// Today command arguments.
#[derive(Debug, Args)]
pub struct TodayCommand {
    /// Location and method overrides
    #[command(flatten)]
    pub location: LocationArgs,

    /// Date to show (DD-MM-YYYY), defaults to today
    #[arg(short, long, value_parser = parse_date)]
    pub date: Option<NaiveDate>,

    /// Compute the next prayer as of this time (HH:MM) instead of now
    #[arg(long, value_parser = parse_time)]
    pub at: Option<NaiveTime>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Watch command arguments.
#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Location and method overrides
    #[command(flatten)]
    pub location: LocationArgs,

    /// Seconds between refreshes, overriding the config
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: OutputFormat,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// Formatted table
    Table,
    /// JSON output
    Json,
}

fn parse_method(s: &str) -> Result<CalculationMethod, String> {
    s.parse().map_err(|e: crate::Error| e.to_string())
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    timetable::parse_date(s).map_err(|e| e.to_string())
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    timetable::parse_time(s).map_err(|e| e.to_string())
}
