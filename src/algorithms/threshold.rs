//! Binary thresholding: segment an image into foreground/background by a
//! lower and/or upper intensity bound.

use crate::data::image::ImageDescriptor;
use crate::data::object::DataObject;
use crate::device::{CompiledFor, ProgramHandle, ProgramSource};
use crate::error::{MediFlowError, Result};
use crate::pipeline::process::{register_node, NodeCore, ProcessNode};
use crate::types::{DataType, DeviceId};
use std::sync::{Arc, Mutex};

const THRESHOLD_SOURCE_2D: ProgramSource = ProgramSource::new(
    "algorithms/binary_thresholding_2d",
    r#"
__kernel void binaryThresholding(
        __read_only image2d_t input,
        __write_only image2d_t output,
        __private float lowerThreshold,
        __private float upperThreshold) {
    const int2 pos = {get_global_id(0), get_global_id(1)};
    float value = READ(input, sampler, pos);
    WRITE(output, pos, (value >= lowerThreshold && value <= upperThreshold) ? 1 : 0);
}
"#,
);

const THRESHOLD_SOURCE_3D: ProgramSource = ProgramSource::new(
    "algorithms/binary_thresholding_3d",
    r#"
__kernel void binaryThresholding(
        __read_only image3d_t input,
        __write_only image3d_t output,
        __private float lowerThreshold,
        __private float upperThreshold) {
    const int4 pos = {get_global_id(0), get_global_id(1), get_global_id(2), 0};
    float value = READ(input, sampler, pos);
    WRITE(output, pos, (value >= lowerThreshold && value <= upperThreshold) ? 1 : 0);
}
"#,
);

/// Segmentation node labeling voxels inside the threshold band with 1.
pub struct BinaryThresholding {
    core: NodeCore,
    lower_threshold: Option<f32>,
    upper_threshold: Option<f32>,
    compiled_for: Option<CompiledFor>,
    program: Option<ProgramHandle>,
}

impl BinaryThresholding {
    pub fn new() -> Arc<Mutex<Self>> {
        let node = Arc::new(Mutex::new(Self {
            core: NodeCore::new()
                .with_input("image", true)
                .with_output("segmentation"),
            lower_threshold: None,
            upper_threshold: None,
            compiled_for: None,
            program: None,
        }));
        register_node(&node);
        node
    }

    pub fn set_lower_threshold(&mut self, threshold: f32) {
        self.lower_threshold = Some(threshold);
        self.core.mark_modified();
    }

    pub fn set_upper_threshold(&mut self, threshold: f32) {
        self.upper_threshold = Some(threshold);
        self.core.mark_modified();
    }

    pub fn lower_threshold(&self) -> Option<f32> {
        self.lower_threshold
    }

    pub fn upper_threshold(&self) -> Option<f32> {
        self.upper_threshold
    }

    fn recompile_if_needed(&mut self, descriptor: &ImageDescriptor) -> Result<()> {
        let dimensions = descriptor.dimensions();
        let data_type = descriptor.data_type();
        if self
            .compiled_for
            .map_or(false, |c| c.matches(dimensions, data_type))
        {
            return Ok(());
        }
        let source = if dimensions == 2 {
            &THRESHOLD_SOURCE_2D
        } else {
            &THRESHOLD_SOURCE_3D
        };
        let build_options = format!("elem={}", data_type);
        let program = self
            .core
            .device()
            .create_program_from_source(source, &build_options)?;
        self.program = Some(program);
        self.compiled_for = Some(CompiledFor {
            dimensions,
            data_type,
        });
        Ok(())
    }
}

impl ProcessNode for BinaryThresholding {
    fn name(&self) -> &str {
        "BinaryThresholding"
    }

    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn execute(&mut self) -> Result<()> {
        if self.lower_threshold.is_none() && self.upper_threshold.is_none() {
            return Err(MediFlowError::Precondition(
                "BinaryThresholding needs at least one threshold before execution".to_string(),
            ));
        }

        let input = self.core.receive_input(0)?;
        let descriptor = input.descriptor();
        if descriptor.components() != 1 {
            return Err(MediFlowError::InvalidInput {
                port: 0,
                message: "expected a single-component image".to_string(),
            });
        }

        let output_descriptor = if descriptor.dimensions() == 2 {
            ImageDescriptor::two_d(descriptor.width(), descriptor.height(), 1, DataType::UInt8)
        } else {
            ImageDescriptor::three_d(
                descriptor.width(),
                descriptor.height(),
                descriptor.depth(),
                1,
                DataType::UInt8,
            )
        };

        let device = self.core.device().clone();
        let output = DataObject::image(output_descriptor, &device)?;
        let lower = self.lower_threshold.unwrap_or(f32::NEG_INFINITY) as f64;
        let upper = self.upper_threshold.unwrap_or(f32::INFINITY) as f64;

        if device.is_host() {
            apply_threshold(&input, &output, device.id(), lower, upper)?;
        } else {
            self.recompile_if_needed(&descriptor)?;
            let task_input = input.clone();
            let task_output = output.clone();
            let device_id = device.id();
            device.dispatch(Box::new(move || {
                if let Err(e) = apply_threshold(&task_input, &task_output, device_id, lower, upper)
                {
                    tracing::error!("Thresholding kernel failed: {}", e);
                }
            }))?;
        }

        self.core.write_output(0, output)
    }
}

fn apply_threshold(
    input: &Arc<DataObject>,
    output: &Arc<DataObject>,
    device: DeviceId,
    lower: f64,
    upper: f64,
) -> Result<()> {
    let input_access = input.read_access(device)?;
    let mut output_access = output.write_access(device)?;
    for index in 0..input.descriptor().num_elements() {
        let value = input_access.scalar(index);
        let label = if value >= lower && value <= upper {
            1.0
        } else {
            0.0
        };
        output_access.set_scalar(index, label);
    }
    Ok(())
}
