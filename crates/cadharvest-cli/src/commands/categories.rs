use cadharvest_core::Catalog;

use crate::cli::CatalogArgs;
use crate::error::CliError;

use super::write_json;

pub fn run(args: &CatalogArgs, pretty: bool) -> Result<(), CliError> {
    let catalog = Catalog::load(&args.catalog)?;
    write_json(&catalog.categories, None, pretty)
}
