//! CLI argument definitions for cadharvest.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fetch` | Harvest one category inside a region and write the report |
//! | `plan` | Show the tiles a region would be split into |
//! | `categories` | List the categories of a catalog |
//!
//! # Examples
//!
//! ```bash
//! cadharvest categories --catalog catalog.json
//! cadharvest plan --catalog catalog.json --category parcels --region moscow.geojson
//! cadharvest fetch --catalog catalog.json --category 36368 --region moscow.geojson \
//!     --output parcels.json --pretty
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use cadharvest_core::Crs;

/// Harvest cadastral vector data from a rate-limited feature service.
#[derive(Debug, Parser)]
#[command(name = "cadharvest", author, version, about)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Pretty-print JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Harvest every feature of a category inside a region.
    ///
    /// Ctrl-C stops the job; the features gathered so far are still written.
    Fetch(FetchArgs),

    /// Print the tiles a region would be partitioned into, without fetching.
    Plan(PlanArgs),

    /// List the categories configured in a catalog.
    Categories(CatalogArgs),
}

#[derive(Debug, Args)]
pub struct CatalogArgs {
    /// Catalog file with the service settings and category table.
    #[arg(long)]
    pub catalog: PathBuf,
}

/// Region and category selection shared by `fetch` and `plan`.
#[derive(Debug, Args)]
pub struct JobArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Category id or name (case-insensitive).
    #[arg(long)]
    pub category: String,

    /// GeoJSON file with a Polygon or MultiPolygon (bare geometry, Feature or
    /// FeatureCollection).
    #[arg(long)]
    pub region: PathBuf,

    /// Coordinate reference system of the region file.
    #[arg(long, value_enum, default_value_t = CrsArg::Wgs84)]
    pub crs: CrsArg,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Write the report here instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Skip the response cache for reads and writes.
    #[arg(long, default_value_t = false)]
    pub no_cache: bool,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub job: JobArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CrsArg {
    /// EPSG:4326, degrees.
    Wgs84,
    /// EPSG:3857, metres.
    WebMercator,
}

impl From<CrsArg> for Crs {
    fn from(value: CrsArg) -> Self {
        match value {
            CrsArg::Wgs84 => Crs::Wgs84,
            CrsArg::WebMercator => Crs::WebMercator,
        }
    }
}
