//! Cache statistics
//!
//! Row counts of the resolution cache, used by `cache stats` and logged at
//! shutdown.

use std::fmt;

use serde::Serialize;

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of known files
    pub files: u64,
    /// Number of registered mirrors
    pub mirrors: u64,
    /// Records naming a mirror that held the file
    pub pass_records: u64,
    /// Records of exhausted searches
    pub skip_records: u64,
    /// Records whose file or mirror is gone, awaiting pruning
    pub orphan_records: u64,
}

impl CacheStats {
    pub fn total_records(&self) -> u64 {
        self.pass_records + self.skip_records
    }

    /// Average number of outcomes recorded per file
    pub fn records_per_file(&self) -> f64 {
        if self.files == 0 {
            return 0.0;
        }
        self.total_records() as f64 / self.files as f64
    }

    /// Whether pruning would remove anything
    pub fn needs_pruning(&self) -> bool {
        self.orphan_records > 0
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files, {} mirrors, {} records ({} pass, {} skip, {} orphaned)",
            self.files,
            self.mirrors,
            self.total_records(),
            self.pass_records,
            self.skip_records,
            self.orphan_records
        )
    }
}
