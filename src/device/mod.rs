//! Execution devices and the process-wide device manager.
//!
//! An [`ExecutionDevice`] is a compute target a node can be assigned to:
//! either the host CPU or a queue-backed compute device driven by a
//! [`ComputeRuntime`]. Dispatched work runs asynchronously on the device's
//! queue worker; [`ExecutionDevice::finish`] blocks until the queue drains,
//! which is what a node's `wait_to_finish` relies on.

pub mod manager;
pub mod program;
pub mod queue;
pub mod runtime;

pub use manager::DeviceManager;
pub use program::{CompiledFor, ProgramCache, ProgramHandle};
pub use queue::{DeviceTask, DispatchQueue};
pub use runtime::{ComputeRuntime, ProgramSource, SoftwareRuntime};

use crate::error::{MediFlowError, Result};
use crate::types::DeviceId;
use std::sync::Mutex;

/// A compute target: host CPU or a runtime-backed compute device.
pub struct ExecutionDevice {
    id: DeviceId,
    name: String,
    queue: Option<DispatchQueue>,
    runtime: Option<Mutex<Box<dyn ComputeRuntime>>>,
    programs: Mutex<ProgramCache>,
    visualization_capable: bool,
}

impl ExecutionDevice {
    /// The host CPU device. Dispatch runs inline on the calling thread.
    pub fn host(id: DeviceId) -> Self {
        Self {
            id,
            name: "host".to_string(),
            queue: None,
            runtime: None,
            programs: Mutex::new(ProgramCache::new()),
            visualization_capable: false,
        }
    }

    /// A compute device backed by `runtime`, with its own dispatch queue.
    pub fn compute(id: DeviceId, runtime: Box<dyn ComputeRuntime>) -> Result<Self> {
        let name = runtime.name().to_string();
        let queue = DispatchQueue::new(&name)?;
        let visualization_capable = runtime.supports_visualization();
        Ok(Self {
            id,
            name,
            queue: Some(queue),
            runtime: Some(Mutex::new(runtime)),
            programs: Mutex::new(ProgramCache::new()),
            visualization_capable,
        })
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_host(&self) -> bool {
        self.queue.is_none()
    }

    pub fn supports_visualization(&self) -> bool {
        self.visualization_capable
    }

    /// Run `task` on this device. On the host the task runs inline; on a
    /// compute device it is enqueued and runs asynchronously in dispatch
    /// order.
    pub fn dispatch(&self, task: DeviceTask) -> Result<()> {
        match &self.queue {
            None => {
                task();
                Ok(())
            }
            Some(queue) => queue.dispatch(task),
        }
    }

    /// Block until all work dispatched to this device has completed.
    pub fn finish(&self) -> Result<()> {
        match &self.queue {
            None => Ok(()),
            Some(queue) => queue.finish(),
        }
    }

    /// Compile `source` with `build_options`, or return the cached handle
    /// if an identical (source, options) pair was compiled on this device
    /// before.
    pub fn create_program_from_source(
        &self,
        source: &ProgramSource,
        build_options: &str,
    ) -> Result<ProgramHandle> {
        let runtime = self.runtime.as_ref().ok_or_else(|| {
            MediFlowError::Device("the host device does not compile programs".to_string())
        })?;

        let mut programs = self
            .programs
            .lock()
            .map_err(|_| MediFlowError::Device("program cache lock poisoned".to_string()))?;
        if let Some(handle) = programs.get(source.id, build_options) {
            return Ok(handle);
        }

        runtime
            .lock()
            .map_err(|_| MediFlowError::Device("runtime lock poisoned".to_string()))?
            .compile(source, build_options)?;
        Ok(programs.insert(source.id, build_options))
    }

    /// Number of programs compiled on this device so far.
    pub fn compiled_program_count(&self) -> usize {
        self.programs.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for ExecutionDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("is_host", &self.is_host())
            .finish()
    }
}
