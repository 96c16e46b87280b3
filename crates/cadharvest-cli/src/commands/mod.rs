mod categories;
mod fetch;
mod plan;

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use cadharvest_core::{Catalog, CategoryConfig, QueryRegion};

use crate::cli::{Cli, Command, JobArgs};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::Fetch(args) => fetch::run(args, cli.pretty).await,
        Command::Plan(args) => plan::run(args, cli.pretty),
        Command::Categories(args) => categories::run(args, cli.pretty),
    }
}

/// Catalog, selected category and region of a job.
struct JobInput {
    catalog: Catalog,
    category: CategoryConfig,
    region: QueryRegion,
}

fn load_job(args: &JobArgs) -> Result<JobInput, CliError> {
    let catalog = Catalog::load(&args.catalog.catalog)?;
    let category = catalog.category(&args.category)?.clone();
    let region = load_region(&args.region, args.crs.into())?;
    Ok(JobInput {
        catalog,
        category,
        region,
    })
}

fn load_region(path: &Path, crs: cadharvest_core::Crs) -> Result<QueryRegion, CliError> {
    let raw = fs::read_to_string(path)?;
    let document = serde_json::from_str(&raw).map_err(|source| CliError::Region {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(QueryRegion::from_geojson(&document, crs)?)
}

/// Serializes `value` to `output`, or to stdout when no path is given.
fn write_json<T: Serialize>(value: &T, output: Option<&Path>, pretty: bool) -> Result<(), CliError> {
    let mut rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    rendered.push('\n');

    match output {
        Some(path) => fs::write(path, rendered)?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_file_with_a_feature_collection_loads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("region.geojson");
        fs::write(
            &path,
            r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{},
                "geometry":{"type":"Polygon","coordinates":[[[37.0,55.0],[37.1,55.0],[37.1,55.1],[37.0,55.0]]]}}]}"#,
        )
        .expect("write");

        let region = load_region(&path, cadharvest_core::Crs::Wgs84).expect("region");
        assert!(region.area_km2() > 0.0);
    }

    #[test]
    fn unparsable_region_is_a_validation_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("region.geojson");
        fs::write(&path, "not json").expect("write");

        let error = load_region(&path, cadharvest_core::Crs::Wgs84).expect_err("must fail");
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn json_is_written_to_the_output_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.json");

        write_json(&serde_json::json!({"ok": true}), Some(&path), false).expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "{\"ok\":true}\n");
    }
}
