//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

use mediflow_rs::data::{DataObject, ImageDescriptor};
use mediflow_rs::device::DeviceManager;
use mediflow_rs::types::{DataType, DeviceId};
use std::sync::Arc;
use std::sync::Once;

static TRACING: Once = Once::new();

/// Initialize tracing once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A uniform 4x4 float image filled with `value`, resident on the host.
pub fn uniform_frame(value: f64) -> Arc<DataObject> {
    let device = DeviceManager::instance().host_device();
    let descriptor = ImageDescriptor::two_d(4, 4, 1, DataType::Float);
    let mut bytes = vec![0u8; descriptor.len_bytes()];
    for i in 0..descriptor.num_elements() {
        DataType::Float.write(&mut bytes, i, value);
    }
    DataObject::image_with_data(descriptor, &device, bytes).expect("test image")
}

/// Uniform frames with values 10, 20, 30, ...
pub fn uniform_frames(count: usize) -> Vec<Arc<DataObject>> {
    (0..count)
        .map(|i| uniform_frame((i as f64 + 1.0) * 10.0))
        .collect()
}

/// Read the first pixel of a frame through a host read access.
pub fn first_pixel(frame: &Arc<DataObject>) -> f64 {
    let host = DeviceManager::instance().host_device().id();
    frame
        .read_access(host)
        .expect("read access")
        .scalar(0)
}

pub fn host_id() -> DeviceId {
    DeviceManager::instance().host_device().id()
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
