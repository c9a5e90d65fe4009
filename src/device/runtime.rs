//! Compute runtime seam.
//!
//! A [`ComputeRuntime`] is the boundary between the pipeline core and a
//! device driver: it validates and builds kernel programs. Vendor GPU
//! runtimes implement this trait outside the core; the built-in
//! [`SoftwareRuntime`] is always available and backs the default compute
//! device, so pipelines run (and tests pass) without any hardware attached.

use crate::error::{MediFlowError, Result};

/// Kernel program source handed to a runtime for compilation.
///
/// The `id` identifies the source for caching purposes; the `source` text
/// is opaque to the core.
#[derive(Debug, Clone)]
pub struct ProgramSource {
    pub id: &'static str,
    pub source: &'static str,
}

impl ProgramSource {
    pub const fn new(id: &'static str, source: &'static str) -> Self {
        Self { id, source }
    }
}

/// Driver-side program compilation, implemented per device family.
pub trait ComputeRuntime: Send {
    /// Human-readable runtime name, used as the device name.
    fn name(&self) -> &str;

    /// Build `source` with the given build options. A build failure is
    /// fatal for the dispatching node and surfaces as a device error.
    fn compile(&mut self, source: &ProgramSource, build_options: &str) -> Result<()>;

    /// Whether devices of this runtime can share a visualization context.
    fn supports_visualization(&self) -> bool {
        false
    }
}

/// Reference runtime executing kernels on host memory.
///
/// Compilation only validates the source; the actual work of a dispatch is
/// the task closure submitted to the device queue.
pub struct SoftwareRuntime;

impl ComputeRuntime for SoftwareRuntime {
    fn name(&self) -> &str {
        "software"
    }

    fn compile(&mut self, source: &ProgramSource, build_options: &str) -> Result<()> {
        if source.source.trim().is_empty() {
            return Err(MediFlowError::Device(format!(
                "program {} has empty source",
                source.id
            )));
        }
        tracing::info!(
            "Compiled program {} (options: {:?})",
            source.id,
            build_options
        );
        Ok(())
    }

    fn supports_visualization(&self) -> bool {
        true
    }
}
