//! Per-device residency bookkeeping for a data object.
//!
//! Each device that ever touched the object gets an entry holding its
//! buffer (host-visible in this core; a vendor runtime would substitute
//! driver memory), an up-to-date flag and a reference count. Exactly one
//! device is authoritative after any write; the others stay stale until a
//! synchronization copy is made.

use crate::error::{MediFlowError, Result};
use crate::types::DeviceId;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct ResidencyEntry {
    pub buffer: Option<Vec<u8>>,
    pub up_to_date: bool,
    pub ref_count: u32,
}

#[derive(Debug, Default)]
pub(crate) struct ResidencyTable {
    entries: HashMap<DeviceId, ResidencyEntry>,
}

impl ResidencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the initial buffer on `device`, authoritative, refcount 1.
    pub fn install(&mut self, device: DeviceId, buffer: Vec<u8>) {
        self.entries.insert(
            device,
            ResidencyEntry {
                buffer: Some(buffer),
                up_to_date: true,
                ref_count: 1,
            },
        );
    }

    /// The device currently holding an authoritative copy, if any.
    pub fn authoritative_device(&self) -> Option<DeviceId> {
        self.entries
            .iter()
            .find(|(_, e)| e.up_to_date && e.buffer.is_some())
            .map(|(d, _)| *d)
    }

    /// Make `device`'s copy up to date, copying from the authoritative
    /// device if it is absent or stale.
    pub fn ensure_up_to_date(&mut self, device: DeviceId) -> Result<()> {
        let current = self.entries.get(&device);
        if current.map_or(false, |e| e.up_to_date && e.buffer.is_some()) {
            return Ok(());
        }

        let source = self.authoritative_device().ok_or_else(|| {
            MediFlowError::StaleData("no authoritative copy left to synchronize from".to_string())
        })?;
        let bytes = self
            .entries
            .get(&source)
            .and_then(|e| e.buffer.clone())
            .ok_or_else(|| {
                MediFlowError::StaleData("authoritative buffer disappeared".to_string())
            })?;

        tracing::trace!("Synchronizing buffer from {} to {}", source, device);
        let entry = self.entries.entry(device).or_default();
        entry.buffer = Some(bytes);
        entry.up_to_date = true;
        Ok(())
    }

    /// Mark every copy except `keep` stale. `keep` becomes the sole
    /// authoritative copy.
    pub fn mark_others_stale(&mut self, keep: DeviceId) {
        for (device, entry) in self.entries.iter_mut() {
            if *device != keep {
                entry.up_to_date = false;
            }
        }
    }

    /// Increment `device`'s reference count, synchronizing its copy in
    /// first if stale. Returns the new count.
    pub fn retain(&mut self, device: DeviceId) -> Result<u32> {
        self.ensure_up_to_date(device)?;
        let entry = self.entries.entry(device).or_default();
        entry.ref_count += 1;
        Ok(entry.ref_count)
    }

    /// Decrement `device`'s reference count, freeing its buffer at zero.
    /// Returns the new count. Releasing below zero is a caller error.
    pub fn release(&mut self, device: DeviceId) -> Result<u32> {
        let entry = self.entries.get_mut(&device).ok_or_else(|| {
            MediFlowError::Precondition(format!("release on {} which holds no reference", device))
        })?;
        if entry.ref_count == 0 {
            return Err(MediFlowError::Precondition(format!(
                "release on {} would make its reference count negative",
                device
            )));
        }
        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            entry.buffer = None;
            entry.up_to_date = false;
            tracing::trace!("Released last reference on {}; buffer freed", device);
        }
        Ok(entry.ref_count)
    }

    pub fn reference_count(&self, device: DeviceId) -> u32 {
        self.entries.get(&device).map_or(0, |e| e.ref_count)
    }

    pub fn has_buffer(&self, device: DeviceId) -> bool {
        self.entries
            .get(&device)
            .map_or(false, |e| e.buffer.is_some())
    }

    pub fn bytes(&self, device: DeviceId) -> Option<&[u8]> {
        self.entries
            .get(&device)
            .and_then(|e| e.buffer.as_deref())
    }

    pub fn bytes_mut(&mut self, device: DeviceId) -> Option<&mut Vec<u8>> {
        self.entries
            .get_mut(&device)
            .and_then(|e| e.buffer.as_mut())
    }

    /// Drop every buffer. Counts are kept so release() stays balanced.
    pub fn free_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.buffer = None;
            entry.up_to_date = false;
        }
    }

    pub fn any_buffer_retained(&self) -> bool {
        self.entries.values().any(|e| e.ref_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: DeviceId = DeviceId(0);
    const B: DeviceId = DeviceId(1);

    fn table_with_data() -> ResidencyTable {
        let mut table = ResidencyTable::new();
        table.install(A, vec![1, 2, 3]);
        table
    }

    #[test]
    fn test_retain_syncs_stale_copy() {
        let mut table = table_with_data();
        assert!(!table.has_buffer(B));
        table.retain(B).unwrap();
        assert!(table.has_buffer(B));
        assert_eq!(table.bytes(B), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_release_frees_at_zero() {
        let mut table = table_with_data();
        table.retain(A).unwrap(); // count 2
        assert_eq!(table.release(A).unwrap(), 1);
        assert!(table.has_buffer(A));
        assert_eq!(table.release(A).unwrap(), 0);
        assert!(!table.has_buffer(A));
    }

    #[test]
    fn test_release_never_goes_negative() {
        let mut table = table_with_data();
        table.release(A).unwrap();
        assert!(matches!(
            table.release(A),
            Err(MediFlowError::Precondition(_))
        ));
        assert!(matches!(
            table.release(B),
            Err(MediFlowError::Precondition(_))
        ));
    }

    #[test]
    fn test_single_authoritative_copy_after_write() {
        let mut table = table_with_data();
        table.retain(B).unwrap();
        table.mark_others_stale(B);
        assert_eq!(table.authoritative_device(), Some(B));
        // A is stale now; syncing it back copies from B
        table.ensure_up_to_date(A).unwrap();
        assert_eq!(table.bytes(A), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_no_authoritative_copy_is_stale_data() {
        let mut table = table_with_data();
        table.release(A).unwrap(); // frees the only buffer
        assert!(matches!(
            table.ensure_up_to_date(B),
            Err(MediFlowError::StaleData(_))
        ));
    }
}
