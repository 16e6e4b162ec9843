use std::collections::{BTreeSet, HashSet};

/// Names uploaded during this process run. Not persisted: after a restart the
/// archive directory is what keeps handled files out of the scan.
#[derive(Debug, Default, Clone)]
pub struct UploadLedger {
    names: HashSet<String>,
}

impl UploadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Returns `true` if the name was not already recorded.
    pub fn record(&mut self, name: &str) -> bool {
        self.names.insert(name.to_string())
    }

    /// Sorted snapshot, for diagnostics.
    pub fn all(&self) -> BTreeSet<String> {
        self.names.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
