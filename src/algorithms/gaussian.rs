//! Gaussian smoothing over 2D images and 3D volumes.
//!
//! The normalized mask is rebuilt only when a parameter or the input
//! dimensionality changed. On a compute device the kernel program is
//! compiled through the device's program cache, specialized by input
//! dimensionality and element type; the specialization is tracked and the
//! program recompiled whenever it no longer matches the input.

use crate::data::image::ImageDescriptor;
use crate::data::object::DataObject;
use crate::device::{CompiledFor, ExecutionDevice, ProgramHandle, ProgramSource};
use crate::error::{MediFlowError, Result};
use crate::pipeline::process::{register_node, NodeCore, ProcessNode};
use crate::types::DeviceId;
use std::sync::{Arc, Mutex};

const SMOOTHING_SOURCE_2D: ProgramSource = ProgramSource::new(
    "algorithms/gaussian_smoothing_2d",
    r#"
__kernel void gaussianSmoothing(
        __read_only image2d_t input,
        __constant float* mask,
        __write_only image2d_t output,
        __private unsigned char maskSize) {
    const int2 pos = {get_global_id(0), get_global_id(1)};
    const int half = (maskSize - 1) / 2;
    float sum = 0.0f;
    for(int y = -half; y <= half; y++) {
        for(int x = -half; x <= half; x++) {
            sum += mask[x + half + (y + half) * maskSize]
                 * READ(input, sampler, pos + (int2)(x, y));
        }
    }
    WRITE(output, pos, sum);
}
"#,
);

const SMOOTHING_SOURCE_3D: ProgramSource = ProgramSource::new(
    "algorithms/gaussian_smoothing_3d",
    r#"
__kernel void gaussianSmoothing(
        __read_only image3d_t input,
        __constant float* mask,
        __write_only image3d_t output,
        __private unsigned char maskSize) {
    const int4 pos = {get_global_id(0), get_global_id(1), get_global_id(2), 0};
    const int half = (maskSize - 1) / 2;
    float sum = 0.0f;
    for(int z = -half; z <= half; z++) {
        for(int y = -half; y <= half; y++) {
            for(int x = -half; x <= half; x++) {
                sum += mask[x + half + (y + half) * maskSize
                         + (z + half) * maskSize * maskSize]
                     * READ(input, sampler, pos + (int4)(x, y, z, 0));
            }
        }
    }
    WRITE(output, pos, sum);
}
"#,
);

/// Gaussian smoothing filter node.
pub struct GaussianSmoothing {
    core: NodeCore,
    mask_size: u8,
    standard_deviation: f32,
    mask: Vec<f32>,
    mask_dimensions: Option<u8>,
    recreate_mask: bool,
    compiled_for: Option<CompiledFor>,
    program: Option<ProgramHandle>,
}

impl GaussianSmoothing {
    pub fn new() -> Arc<Mutex<Self>> {
        let node = Arc::new(Mutex::new(Self {
            core: NodeCore::new()
                .with_input("image", true)
                .with_output("image"),
            mask_size: 3,
            standard_deviation: 1.0,
            mask: Vec::new(),
            mask_dimensions: None,
            recreate_mask: true,
            compiled_for: None,
            program: None,
        }));
        register_node(&node);
        node
    }

    /// Set the mask side length. Must be odd; an even value is rejected
    /// and leaves the previous size in place.
    pub fn set_mask_size(&mut self, size: u8) -> Result<()> {
        if size % 2 != 1 {
            return Err(MediFlowError::Config(
                "mask size of the Gaussian smoothing filter must be odd".to_string(),
            ));
        }
        self.mask_size = size;
        self.recreate_mask = true;
        self.core.mark_modified();
        Ok(())
    }

    /// Set the standard deviation. Must be positive.
    pub fn set_standard_deviation(&mut self, standard_deviation: f32) -> Result<()> {
        if standard_deviation <= 0.0 {
            return Err(MediFlowError::Config(
                "standard deviation of the Gaussian smoothing filter must be positive".to_string(),
            ));
        }
        self.standard_deviation = standard_deviation;
        self.recreate_mask = true;
        self.core.mark_modified();
        Ok(())
    }

    /// Reassign the filter to another device. The mask buffer moves with
    /// it, so it is rebuilt on the next run.
    pub fn set_device(&mut self, device: Arc<ExecutionDevice>) {
        self.core.set_device(device);
        self.recreate_mask = true;
    }

    pub fn mask_size(&self) -> u8 {
        self.mask_size
    }

    pub fn standard_deviation(&self) -> f32 {
        self.standard_deviation
    }

    fn create_mask(&mut self, dimensions: u8) {
        if !self.recreate_mask && self.mask_dimensions == Some(dimensions) {
            return;
        }
        let size = self.mask_size as i32;
        let half = (size - 1) / 2;
        let sigma2 = 2.0 * self.standard_deviation * self.standard_deviation;
        let mut mask = Vec::new();
        let mut sum = 0.0f32;

        if dimensions == 2 {
            mask.reserve((size * size) as usize);
            for y in -half..=half {
                for x in -half..=half {
                    let value = (-((x * x + y * y) as f32) / sigma2).exp();
                    mask.push(value);
                    sum += value;
                }
            }
        } else {
            mask.reserve((size * size * size) as usize);
            for z in -half..=half {
                for y in -half..=half {
                    for x in -half..=half {
                        let value = (-((x * x + y * y + z * z) as f32) / sigma2).exp();
                        mask.push(value);
                        sum += value;
                    }
                }
            }
        }

        for value in &mut mask {
            *value /= sum;
        }

        self.mask = mask;
        self.mask_dimensions = Some(dimensions);
        self.recreate_mask = false;
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
            &SMOOTHING_SOURCE_2D
        } else {
            &SMOOTHING_SOURCE_3D
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

impl ProcessNode for GaussianSmoothing {
    fn name(&self) -> &str {
        "GaussianSmoothing"
    }

    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn execute(&mut self) -> Result<()> {
        let input = self.core.receive_input(0)?;
        let descriptor = input.descriptor();

        if self.mask_dimensions != Some(descriptor.dimensions()) {
            self.recreate_mask = true;
        }
        self.create_mask(descriptor.dimensions());

        let device = self.core.device().clone();
        let output = DataObject::image(descriptor, &device)?;

        if device.is_host() {
            convolve(&input, &output, device.id(), &self.mask, self.mask_size)?;
        } else {
            self.recompile_if_needed(&descriptor)?;
            let mask = self.mask.clone();
            let mask_size = self.mask_size;
            let task_input = input.clone();
            let task_output = output.clone();
            let device_id = device.id();
            device.dispatch(Box::new(move || {
                if let Err(e) = convolve(&task_input, &task_output, device_id, &mask, mask_size) {
                    tracing::error!("Gaussian smoothing kernel failed: {}", e);
                }
            }))?;
        }

        self.core.write_output(0, output)
    }
}

/// Clamp-to-edge convolution of every component, on the given device's
/// buffers. Runs on the host thread or a device queue worker.
fn convolve(
    input: &Arc<DataObject>,
    output: &Arc<DataObject>,
    device: DeviceId,
    mask: &[f32],
    mask_size: u8,
) -> Result<()> {
    let descriptor = input.descriptor();
    let input_access = input.read_access(device)?;
    let mut output_access = output.write_access(device)?;

    let width = descriptor.width() as i64;
    let height = descriptor.height() as i64;
    let depth = descriptor.depth() as i64;
    let components = descriptor.components();
    let size = mask_size as i64;
    let half = (size - 1) / 2;
    let volume = descriptor.dimensions() == 3;

    let clamp = |v: i64, max: i64| v.clamp(0, max - 1) as u32;

    for z in 0..depth {
        for y in 0..height {
            for x in 0..width {
                for c in 0..components {
                    let mut sum = 0.0f64;
                    if volume {
                        for mz in -half..=half {
                            for my in -half..=half {
                                for mx in -half..=half {
                                    let weight = mask[((mx + half)
                                        + (my + half) * size
                                        + (mz + half) * size * size)
                                        as usize] as f64;
                                    let index = descriptor.element_index(
                                        clamp(x + mx, width),
                                        clamp(y + my, height),
                                        clamp(z + mz, depth),
                                        c,
                                    );
                                    sum += weight * input_access.scalar(index);
                                }
                            }
                        }
                    } else {
                        for my in -half..=half {
                            for mx in -half..=half {
                                let weight =
                                    mask[((mx + half) + (my + half) * size) as usize] as f64;
                                let index = descriptor.element_index(
                                    clamp(x + mx, width),
                                    clamp(y + my, height),
                                    0,
                                    c,
                                );
                                sum += weight * input_access.scalar(index);
                            }
                        }
                    }
                    let out_index = descriptor.element_index(x as u32, y as u32, z as u32, c);
                    output_access.set_scalar(out_index, sum);
                }
            }
        }
    }
    Ok(())
}
