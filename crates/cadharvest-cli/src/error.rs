use std::path::PathBuf;

use thiserror::Error;

use cadharvest_core::{CatalogError, HarvestError, ValidationError};

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("failed to parse region '{path}': {source}")]
    Region {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("job incomplete ({failures} failures recorded), partial report written")]
    Incomplete { failures: u64 },

    #[error("{code}: {0}", code = .0.code())]
    Harvest(HarvestError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<HarvestError> for CliError {
    fn from(error: HarvestError) -> Self {
        match error {
            HarvestError::Validation(error) => Self::Validation(error),
            other => Self::Harvest(other),
        }
    }
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Catalog(CatalogError::Io { .. }) => 10,
            Self::Catalog(_) => 2,
            Self::Region { .. } => 2,
            Self::Incomplete { .. } => 3,
            Self::Serialization(_) => 4,
            Self::Harvest(_) => 6,
            Self::Io(_) => 10,
        }
    }
}
