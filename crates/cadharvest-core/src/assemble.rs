use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::{ExternalId, Feature, FeatureCollection};

/// Merges tile results into one collection with at most one feature per
/// external identity.
///
/// The first occurrence of an identity wins. Output is ordered by identity, so
/// the same set of features yields the same collection whatever order the
/// tiles completed in.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureAssembler;

/// Assembled features and the number of duplicates discarded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembly {
    pub collection: FeatureCollection,
    pub duplicates_removed: u64,
}

impl FeatureAssembler {
    pub const fn new() -> Self {
        Self
    }

    pub fn assemble<I>(&self, features: I) -> Assembly
    where
        I: IntoIterator<Item = Feature>,
    {
        let mut by_id: BTreeMap<ExternalId, Feature> = BTreeMap::new();
        let mut duplicates_removed = 0;

        for feature in features {
            match by_id.entry(feature.id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(feature);
                }
                Entry::Occupied(_) => duplicates_removed += 1,
            }
        }

        if duplicates_removed > 0 {
            debug!(
                duplicates_removed,
                kept = by_id.len(),
                "removed features returned by more than one tile"
            );
        }

        Assembly {
            collection: FeatureCollection::new(by_id.into_values().collect()),
            duplicates_removed,
        }
    }
}
