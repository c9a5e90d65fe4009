//! Per-device program cache and per-node specialization tracking.

use crate::types::DataType;
use std::collections::HashMap;

/// Index of a compiled program in a device's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHandle(pub usize);

/// Cache of compiled programs, keyed by (source id, build options).
///
/// Owned by one device, so the device is implicit in the key. Entries live
/// for the process lifetime; the cache is not persisted.
#[derive(Default)]
pub struct ProgramCache {
    entries: HashMap<(String, String), ProgramHandle>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a previously compiled (source, options) pair.
    pub fn get(&self, source_id: &str, build_options: &str) -> Option<ProgramHandle> {
        self.entries
            .get(&(source_id.to_string(), build_options.to_string()))
            .copied()
    }

    /// Record a successful compilation and return its handle.
    pub fn insert(&mut self, source_id: &str, build_options: &str) -> ProgramHandle {
        let handle = ProgramHandle(self.entries.len());
        self.entries
            .insert((source_id.to_string(), build_options.to_string()), handle);
        handle
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Input specialization a node's program was last compiled for.
///
/// Nodes compare this against the current input before every dispatch and
/// recompile when the dimensionality or element type changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledFor {
    pub dimensions: u8,
    pub data_type: DataType,
}

impl CompiledFor {
    pub fn matches(&self, dimensions: u8, data_type: DataType) -> bool {
        self.dimensions == dimensions && self.data_type == data_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_on_identical_key() {
        let mut cache = ProgramCache::new();
        let first = cache.insert("algorithms/smoothing", "elem=float");
        assert_eq!(cache.get("algorithms/smoothing", "elem=float"), Some(first));
        // Different options miss
        assert_eq!(cache.get("algorithms/smoothing", "elem=uint8"), None);
    }

    #[test]
    fn test_compiled_for_mismatch() {
        let compiled = CompiledFor {
            dimensions: 2,
            data_type: DataType::Float,
        };
        assert!(compiled.matches(2, DataType::Float));
        assert!(!compiled.matches(3, DataType::Float));
        assert!(!compiled.matches(2, DataType::UInt8));
    }
}
