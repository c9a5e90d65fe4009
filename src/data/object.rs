//! The data object: an image payload with per-device residency, reference
//! counts, timestamps and an optional link back to the node that produced
//! it.
//!
//! Access to the payload goes through scoped guards: [`ImageReadAccess`]
//! synchronizes the requested device in without invalidating other copies,
//! [`ImageWriteAccess`] synchronizes in and marks every other device stale
//! when it is dropped. The guards hold the object's residency lock, so a
//! write access excludes all other access for its lifetime.

use crate::data::image::ImageDescriptor;
use crate::data::residency::ResidencyTable;
use crate::data::scene::SceneNode;
use crate::device::ExecutionDevice;
use crate::error::{MediFlowError, Result};
use crate::pipeline::process::{resolve_node, NodeRef};
use crate::types::{next_timestamp, DeviceId, NodeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) struct ObjectState {
    pub residency: ResidencyTable,
    pub finalized: bool,
}

/// A unit of pipeline data.
pub struct DataObject {
    descriptor: ImageDescriptor,
    creation_timestamp: AtomicU64,
    modified_timestamp: AtomicU64,
    producer: Mutex<Option<NodeId>>,
    scene_node: Mutex<Option<Arc<SceneNode>>>,
    state: Mutex<ObjectState>,
}

impl DataObject {
    /// Allocate a zero-filled image on `device`. The device starts with
    /// the authoritative copy and a reference count of one.
    pub fn image(descriptor: ImageDescriptor, device: &Arc<ExecutionDevice>) -> Result<Arc<Self>> {
        Self::image_with_data(descriptor, device, vec![0u8; descriptor.len_bytes()])
    }

    /// Create an image from existing bytes, resident on `device`.
    pub fn image_with_data(
        descriptor: ImageDescriptor,
        device: &Arc<ExecutionDevice>,
        bytes: Vec<u8>,
    ) -> Result<Arc<Self>> {
        if descriptor.num_elements() == 0 {
            return Err(MediFlowError::Config(
                "image dimensions must be non-zero".to_string(),
            ));
        }
        if bytes.len() != descriptor.len_bytes() {
            return Err(MediFlowError::Config(format!(
                "image buffer is {} bytes, descriptor requires {}",
                bytes.len(),
                descriptor.len_bytes()
            )));
        }
        let mut residency = ResidencyTable::new();
        residency.install(device.id(), bytes);
        let now = next_timestamp();
        Ok(Arc::new(Self {
            descriptor,
            creation_timestamp: AtomicU64::new(now),
            modified_timestamp: AtomicU64::new(now),
            producer: Mutex::new(None),
            scene_node: Mutex::new(None),
            state: Mutex::new(ObjectState {
                residency,
                finalized: false,
            }),
        }))
    }

    pub fn descriptor(&self) -> ImageDescriptor {
        self.descriptor
    }

    pub fn creation_timestamp(&self) -> u64 {
        self.creation_timestamp.load(Ordering::Relaxed)
    }

    /// Override the creation timestamp. Streamers use this to carry the
    /// acquisition time (in milliseconds) that drives playback pacing.
    pub fn set_creation_timestamp(&self, timestamp: u64) {
        self.creation_timestamp.store(timestamp, Ordering::Relaxed);
    }

    pub fn modified_timestamp(&self) -> u64 {
        self.modified_timestamp.load(Ordering::Relaxed)
    }

    pub fn update_modified_timestamp(&self) {
        self.modified_timestamp
            .store(next_timestamp(), Ordering::Relaxed);
    }

    /// Record which node produced this object.
    pub fn set_producer(&self, node: NodeId) {
        if let Ok(mut producer) = self.producer.lock() {
            *producer = Some(node);
        }
    }

    pub fn producer(&self) -> Option<NodeId> {
        self.producer.lock().ok().and_then(|p| *p)
    }

    /// Resolve the producing node. The relation is weak: a `None` result
    /// means the producer is gone, which is a normal, checked outcome.
    pub fn resolve_producer(&self) -> Option<NodeRef> {
        self.producer().and_then(resolve_node)
    }

    pub fn set_scene_node(&self, node: Arc<SceneNode>) {
        if let Ok(mut scene) = self.scene_node.lock() {
            *scene = Some(node);
        }
    }

    pub fn scene_node(&self) -> Option<Arc<SceneNode>> {
        self.scene_node.lock().ok().and_then(|s| s.clone())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ObjectState>> {
        self.state
            .lock()
            .map_err(|_| MediFlowError::StaleData("data object lock poisoned".to_string()))
    }

    /// Increment `device`'s reference count, synchronizing its copy in
    /// first if necessary. Returns the new count.
    pub fn retain(&self, device: DeviceId) -> Result<u32> {
        let mut state = self.lock_state()?;
        if state.finalized {
            return Err(MediFlowError::StaleData(
                "retain on a finalized data object".to_string(),
            ));
        }
        state.residency.retain(device)
    }

    /// Decrement `device`'s reference count; the buffer is freed exactly
    /// when the count reaches zero. Returns the new count.
    pub fn release(&self, device: DeviceId) -> Result<u32> {
        let mut state = self.lock_state()?;
        state.residency.release(device)
    }

    pub fn reference_count(&self, device: DeviceId) -> u32 {
        self.lock_state()
            .map(|s| s.residency.reference_count(device))
            .unwrap_or(0)
    }

    pub fn has_buffer_on(&self, device: DeviceId) -> bool {
        self.lock_state()
            .map(|s| s.residency.has_buffer(device))
            .unwrap_or(false)
    }

    /// Read the payload on `device`, synchronizing it in if stale. Other
    /// device copies stay valid.
    pub fn read_access(&self, device: DeviceId) -> Result<ImageReadAccess<'_>> {
        let mut state = self.lock_state()?;
        if state.finalized {
            return Err(MediFlowError::StaleData(
                "read access on a finalized data object".to_string(),
            ));
        }
        state.residency.ensure_up_to_date(device)?;
        Ok(ImageReadAccess {
            state,
            device,
            descriptor: self.descriptor,
        })
    }

    /// Write the payload on `device`. On guard drop every other device is
    /// marked stale and the modification timestamp advances.
    pub fn write_access(&self, device: DeviceId) -> Result<ImageWriteAccess<'_>> {
        let mut state = self.lock_state()?;
        if state.finalized {
            return Err(MediFlowError::StaleData(
                "write access on a finalized data object".to_string(),
            ));
        }
        state.residency.ensure_up_to_date(device)?;
        Ok(ImageWriteAccess {
            state,
            device,
            descriptor: self.descriptor,
            modified: &self.modified_timestamp,
        })
    }

    /// Drop every device buffer. Subsequent access attempts fail with a
    /// stale-data error. Used when all consumers of an object are gone.
    pub fn finalize(&self) -> Result<()> {
        let mut state = self.lock_state()?;
        state.residency.free_all();
        state.finalized = true;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.lock_state().map(|s| s.finalized).unwrap_or(true)
    }
}

impl std::fmt::Debug for DataObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataObject")
            .field("descriptor", &self.descriptor)
            .field("creation_timestamp", &self.creation_timestamp())
            .field("modified_timestamp", &self.modified_timestamp())
            .field("producer", &self.producer())
            .finish()
    }
}

/// Scoped read access to an image payload on one device.
pub struct ImageReadAccess<'a> {
    state: MutexGuard<'a, ObjectState>,
    device: DeviceId,
    descriptor: ImageDescriptor,
}

impl ImageReadAccess<'_> {
    pub fn bytes(&self) -> &[u8] {
        self.state.residency.bytes(self.device).unwrap_or(&[])
    }

    /// Element at flat `index`, converted to f64.
    pub fn scalar(&self, index: usize) -> f64 {
        self.descriptor.data_type().read(self.bytes(), index)
    }
}

/// Scoped read/write access to an image payload on one device. Dropping
/// the guard marks all other device copies stale.
pub struct ImageWriteAccess<'a> {
    state: MutexGuard<'a, ObjectState>,
    device: DeviceId,
    descriptor: ImageDescriptor,
    modified: &'a AtomicU64,
}

impl ImageWriteAccess<'_> {
    pub fn bytes(&self) -> &[u8] {
        self.state.residency.bytes(self.device).unwrap_or(&[])
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.state
            .residency
            .bytes_mut(self.device)
            .map(|v| v.as_mut_slice())
            .unwrap_or(&mut [])
    }

    pub fn scalar(&self, index: usize) -> f64 {
        self.descriptor.data_type().read(self.bytes(), index)
    }

    pub fn set_scalar(&mut self, index: usize, value: f64) {
        let data_type = self.descriptor.data_type();
        data_type.write(self.bytes_mut(), index, value);
    }
}

impl Drop for ImageWriteAccess<'_> {
    fn drop(&mut self) {
        self.state.residency.mark_others_stale(self.device);
        self.modified.store(next_timestamp(), Ordering::Relaxed);
    }
}
