use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::namespace::NamespacePath;
use crate::value::Value;
use crate::{Error, Result};

/// Write-once map from namespace paths to committed values.
///
/// The store only grows. Writes arrive in batches, one per finished thread,
/// and a batch is applied only after every path in it is known to be fresh.
#[derive(Clone, Debug, Default)]
pub struct DefinitionStore {
    entries: HashMap<NamespacePath, Value>,
}

impl DefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &NamespacePath) -> Option<&Value> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &NamespacePath) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply a batch of puts atomically, returning how many entries were written.
    ///
    /// Fails without writing anything when a path repeats inside the batch or
    /// is already present in the store.
    pub fn commit<I>(&mut self, batch: I) -> Result<usize>
    where
        I: IntoIterator<Item = (NamespacePath, Value)>,
    {
        let batch: Vec<(NamespacePath, Value)> = batch.into_iter().collect();
        let mut seen = HashSet::with_capacity(batch.len());
        for (path, _) in &batch {
            if !seen.insert(path) || self.entries.contains_key(path) {
                return Err(Error::Duplicate { path: path.clone() });
            }
        }
        let written = batch.len();
        for (path, value) in batch {
            trace!(%path, "commit");
            self.entries.insert(path, value);
        }
        Ok(written)
    }

    /// Committed entries ordered by path.
    pub fn entries(&self) -> Vec<(&NamespacePath, &Value)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}
