//! Residency and reference-count invariants on data objects.

mod common;

use common::{init_tracing, uniform_frame};
use mediflow_rs::data::{DataObject, ImageDescriptor};
use mediflow_rs::device::DeviceManager;
use mediflow_rs::error::MediFlowError;
use mediflow_rs::types::{DataType, DeviceId};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::HashMap;
use std::sync::Arc;

fn test_object() -> Arc<DataObject> {
    let device = DeviceManager::instance().host_device();
    let descriptor = ImageDescriptor::two_d(2, 2, 1, DataType::UInt8);
    DataObject::image_with_data(descriptor, &device, vec![1, 2, 3, 4]).expect("test image")
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Retain(u32),
    Release(u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u32..4).prop_map(Op::Retain),
        (0u32..4).prop_map(Op::Release),
    ]
}

proptest! {
    /// For any retain/release sequence: counts never go negative (an
    /// over-release is rejected), and a device's buffer exists exactly
    /// while its count is positive (after the initial owner released).
    #[test]
    fn reference_counts_never_go_negative(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let object = test_object();
        let origin = DeviceManager::instance().host_device().id();

        // Model: the origin device starts with one reference
        let mut counts: HashMap<u32, u32> = HashMap::new();
        counts.insert(origin.0, 1);

        for op in ops {
            match op {
                Op::Retain(d) => {
                    let device = DeviceId(d + 10);
                    let any_buffer = counts.values().any(|&c| c > 0);
                    match object.retain(device) {
                        Ok(count) => {
                            prop_assert!(any_buffer, "retain succeeded with no source copy");
                            let model = counts.entry(device.0).or_insert(0);
                            *model += 1;
                            prop_assert_eq!(count, *model);
                        }
                        Err(MediFlowError::StaleData(_)) => {
                            prop_assert!(!any_buffer);
                        }
                        Err(e) => return Err(TestCaseError::fail(format!("unexpected: {}", e))),
                    }
                }
                Op::Release(d) => {
                    let device = DeviceId(d + 10);
                    let model = counts.get(&device.0).copied().unwrap_or(0);
                    match object.release(device) {
                        Ok(count) => {
                            prop_assert!(model > 0, "release succeeded at zero count");
                            counts.insert(device.0, model - 1);
                            prop_assert_eq!(count, model - 1);
                            // Freed exactly at zero
                            prop_assert_eq!(object.has_buffer_on(device), count > 0);
                        }
                        Err(MediFlowError::Precondition(_)) => {
                            prop_assert_eq!(model, 0);
                        }
                        Err(e) => return Err(TestCaseError::fail(format!("unexpected: {}", e))),
                    }
                }
            }
        }

        // Final counts agree with the model
        for (device, model) in &counts {
            prop_assert_eq!(object.reference_count(DeviceId(*device)), *model);
        }
    }
}

#[test]
fn write_access_moves_the_authoritative_copy() {
    init_tracing();
    let object = test_object();
    let origin = DeviceManager::instance().host_device().id();
    let other = DeviceId(21);

    {
        let mut access = object.write_access(other).unwrap();
        access.set_scalar(0, 77.0);
    }
    // A read on the origin must resynchronize and observe the write
    let access = object.read_access(origin).unwrap();
    assert_eq!(access.scalar(0), 77.0);
}

#[test]
fn finalized_object_rejects_access_and_retain() {
    init_tracing();
    let object = uniform_frame(1.0);
    let device = common::host_id();
    object.finalize().unwrap();
    assert!(object.is_finalized());
    assert!(matches!(
        object.read_access(device),
        Err(MediFlowError::StaleData(_))
    ));
    assert!(matches!(
        object.write_access(device),
        Err(MediFlowError::StaleData(_))
    ));
    assert!(matches!(
        object.retain(device),
        Err(MediFlowError::StaleData(_))
    ));
}

#[test]
fn releasing_every_copy_makes_the_object_stale() {
    init_tracing();
    let object = test_object();
    let origin = DeviceManager::instance().host_device().id();

    assert_eq!(object.release(origin).unwrap(), 0);
    assert!(!object.has_buffer_on(origin));
    // No copy left anywhere: further access is stale, not a crash
    assert!(matches!(
        object.read_access(DeviceId(33)),
        Err(MediFlowError::StaleData(_))
    ));
}

#[test]
fn scene_node_attachment_survives_with_object() {
    init_tracing();
    use mediflow_rs::data::SceneNode;
    use mediflow_rs::data::IDENTITY;

    let object = test_object();
    let node = SceneNode::root(IDENTITY);
    object.set_scene_node(node.clone());

    let attached = object.scene_node().expect("scene node attached");
    assert!(Arc::ptr_eq(&attached, &node));
}
