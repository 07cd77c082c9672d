//! Row-level differences between two table snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use super::tables::Tables;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeltaError {
    #[error("cannot remove {0}: row is not present in the current snapshot")]
    MissingRow(String),
}

/// Added and removed rows between two snapshots. Both sides are sparse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Delta {
    pub added: Tables,
    pub removed: Tables,
}

impl Delta {
    /// Compute the delta that turns `prev` into `next`.
    ///
    /// A row whose non-key fields changed shows up once in `removed` (old
    /// content) and once in `added` (new content).
    pub fn compute(prev: &Tables, next: &Tables) -> Self {
        Delta {
            added: Tables::difference(prev, next),
            removed: Tables::difference(next, prev),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Files touched on either side.
    pub fn touched_files(&self) -> BTreeSet<String> {
        let mut files = self.added.files_touched();
        files.extend(self.removed.files_touched());
        files
    }

    pub fn filter_by_files(&self, files: &BTreeSet<String>) -> Self {
        Delta {
            added: self.added.filter_by_files(files),
            removed: self.removed.filter_by_files(files),
        }
    }

    /// Apply to `base`, producing `(base \ removed) ∪ added` in canonical
    /// order. `base` is left untouched on error.
    pub fn apply(&self, base: &Tables) -> Result<Tables, DeltaError> {
        let mut next = base.clone();
        next.remove_rows(&self.removed)
            .map_err(DeltaError::MissingRow)?;
        next.extend_rows(&self.added);
        next.normalize();
        Ok(next)
    }
}
