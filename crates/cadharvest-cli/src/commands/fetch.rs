use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cadharvest_core::{CacheMode, Harvester};

use crate::cli::FetchArgs;
use crate::error::CliError;

use super::{load_job, write_json};

pub async fn run(args: &FetchArgs, pretty: bool) -> Result<(), CliError> {
    let input = load_job(&args.job)?;
    let cache_mode = if args.no_cache {
        CacheMode::Bypass
    } else {
        CacheMode::Use
    };
    let harvester = Harvester::builder(input.catalog.service)
        .cache_mode(cache_mode)
        .build()?;

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, finishing with the tiles gathered so far");
                cancel.cancel();
            }
        }
    });

    let outcome = harvester
        .fetch_dataset_with_cancel(&input.region, &input.category, &cancel)
        .await;
    interrupt.abort();
    let report = outcome?;

    write_json(&report, args.output.as_deref(), pretty)?;
    if let Some(path) = &args.output {
        info!(path = %path.display(), features = report.features.len(), "report written");
    }

    if report.is_complete() {
        Ok(())
    } else {
        Err(CliError::Incomplete {
            failures: report.diagnostics.failure_total(),
        })
    }
}
