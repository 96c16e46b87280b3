use serde::Serialize;

use cadharvest_core::{Harvester, Tile, TileLabel};

use crate::cli::PlanArgs;
use crate::error::CliError;

use super::{load_job, write_json};

#[derive(Debug, Serialize)]
struct PlannedTile {
    label: TileLabel,
    area_km2: f64,
    bbox: Option<[f64; 4]>,
}

impl From<&Tile> for PlannedTile {
    fn from(tile: &Tile) -> Self {
        Self {
            label: tile.label.clone(),
            area_km2: tile.area_km2(),
            bbox: tile.bbox(),
        }
    }
}

#[derive(Debug, Serialize)]
struct PlanResponse {
    category: u64,
    region_area_km2: f64,
    split_threshold_km2: Option<f64>,
    tiles: Vec<PlannedTile>,
}

pub fn run(args: &PlanArgs, pretty: bool) -> Result<(), CliError> {
    let input = load_job(&args.job)?;
    let harvester = Harvester::builder(input.catalog.service).build()?;
    let tiles = harvester.plan(&input.region, &input.category)?;

    let response = PlanResponse {
        category: input.category.id,
        region_area_km2: input.region.area_km2(),
        split_threshold_km2: input.category.split_threshold_km2,
        tiles: tiles.iter().map(PlannedTile::from).collect(),
    };
    write_json(&response, None, pretty)
}
