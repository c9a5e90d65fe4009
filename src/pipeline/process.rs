//! Process nodes: pull-based execution and dirty tracking.
//!
//! A node executes when its modified flag is set or, for stream-aware
//! nodes, when the requested timestep differs from the last executed one,
//! so each update consumes exactly one new frame per streaming input.
//! `update` pulls upstream first, so driving the terminal node of a graph
//! recomputes exactly the stale part of it.
//!
//! Nodes live behind `Arc<Mutex<_>>` so the graph can hold shared,
//! mutable references to its producers. Graphs must be acyclic; update on
//! a cyclic graph deadlocks on the node locks.

use crate::config::StreamingConfig;
use crate::data::object::DataObject;
use crate::device::{DeviceManager, ExecutionDevice};
use crate::error::{MediFlowError, Result};
use crate::pipeline::channel::{DataChannel, StreamingMode};
use crate::pipeline::port::{InputConnection, InputPort, OutputPort, OutputSlot};
use crate::types::{next_node_id, NodeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

/// Shared reference to a process node.
pub type NodeRef = Arc<Mutex<dyn ProcessNode>>;

pub(crate) fn lock_node(node: &NodeRef) -> Result<MutexGuard<'_, dyn ProcessNode + 'static>> {
    node.lock()
        .map_err(|_| MediFlowError::Precondition("process node lock poisoned".to_string()))
}

/// A pipeline node. Implementors provide `execute`; the pull protocol,
/// dirty tracking and port bookkeeping live in [`NodeCore`].
pub trait ProcessNode: Send {
    /// Node name for logging and error messages.
    fn name(&self) -> &str;

    fn core(&self) -> &NodeCore;

    fn core_mut(&mut self) -> &mut NodeCore;

    /// Perform this node's computation: read inputs, write outputs.
    fn execute(&mut self) -> Result<()>;

    /// Block until all device work dispatched by this node has completed.
    /// Required before reading results produced on another device.
    fn wait_to_finish(&mut self) -> Result<()> {
        self.core().device().finish()
    }

    /// Whether the given output carries a stream. By default a node
    /// streams iff any of its inputs does.
    fn output_is_dynamic(&self, _index: usize) -> bool {
        self.core().has_dynamic_input()
    }

    /// Pull-execute this node for `timestep` under `mode`: update
    /// upstream producers, then run `execute` if the modified flag is set
    /// or, for a stream-aware node, the requested timestep differs from
    /// the last executed one. A node executes at most once per timestep;
    /// pulling the stream's next frame inside `execute` blocks until the
    /// producer delivers it.
    ///
    /// When the stream behind an input has ended, the `EndOfStream`
    /// status propagates out of here; it reports the normal end of the
    /// run, not a failure.
    fn update(&mut self, timestep: u64, mode: StreamingMode) -> Result<()> {
        self.core().propagate_mode(mode)?;

        for producer in self.core().producers() {
            lock_node(&producer)?.update(timestep, mode)?;
        }

        let stream_step = self.core().has_dynamic_input()
            && self.core().last_executed_timestep() != Some(timestep);
        if self.core().is_modified() || stream_step {
            let name = self.name().to_string();
            self.core().validate_connections(&name)?;
            tracing::debug!("Executing {} at timestep {}", name, timestep);
            self.execute()?;
            self.core_mut().mark_executed(timestep);
        }
        Ok(())
    }
}

/// Per-node state shared by every implementation: identity, device
/// assignment, ports and the modified flag.
pub struct NodeCore {
    id: NodeId,
    device: Arc<ExecutionDevice>,
    modified: bool,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputSlot>,
    last_executed_timestep: Option<u64>,
    streaming: StreamingConfig,
}

impl NodeCore {
    /// New core assigned to the default computation device, marked
    /// modified so the first update executes.
    pub fn new() -> Self {
        Self {
            id: next_node_id(),
            device: DeviceManager::instance().default_computation_device(),
            modified: true,
            inputs: Vec::new(),
            outputs: Vec::new(),
            last_executed_timestep: None,
            streaming: StreamingConfig::default(),
        }
    }

    pub fn with_input(mut self, name: &'static str, required: bool) -> Self {
        self.inputs.push(InputPort::new(name, required));
        self
    }

    pub fn with_output(mut self, name: &'static str) -> Self {
        self.outputs.push(OutputSlot::new(name));
        self
    }

    /// Declare an output whose streaming channel exists from construction.
    /// Streamers use this so the producer thread has a channel to publish
    /// into before any consumer connects.
    pub fn with_dynamic_output(mut self, name: &'static str) -> Self {
        let mut slot = OutputSlot::new(name);
        slot.channel = Some(DataChannel::new_dynamic(&self.streaming));
        self.outputs.push(slot);
        self
    }

    pub fn with_streaming(mut self, streaming: StreamingConfig) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn device(&self) -> &Arc<ExecutionDevice> {
        &self.device
    }

    /// Reassign the node to another device. Marks the node modified.
    pub fn set_device(&mut self, device: Arc<ExecutionDevice>) {
        self.device = device;
        self.modified = true;
    }

    pub fn streaming(&self) -> &StreamingConfig {
        &self.streaming
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Flag the node for re-execution on the next update. Every parameter
    /// setter goes through this after validating its value.
    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    pub(crate) fn mark_executed(&mut self, timestep: u64) {
        self.modified = false;
        self.last_executed_timestep = Some(timestep);
    }

    pub fn last_executed_timestep(&self) -> Option<u64> {
        self.last_executed_timestep
    }

    pub fn input(&self, index: usize) -> Option<&InputPort> {
        self.inputs.get(index)
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Wire `port` into input `index` and register this node as one of
    /// its consumers.
    pub fn connect_input(&mut self, index: usize, port: &OutputPort) -> Result<()> {
        let input = self.inputs.get_mut(index).ok_or_else(|| {
            MediFlowError::Precondition(format!("node has no input port {}", index))
        })?;
        let consumer = port.channel().register_consumer()?;
        input.connection = Some(InputConnection {
            producer: Some(port.producer().clone()),
            channel: port.channel().clone(),
            consumer,
            last_consumed: None,
        });
        self.modified = true;
        Ok(())
    }

    /// Feed a fixed data object into input `index`, with no producing
    /// node behind it.
    pub fn set_input_data(&mut self, index: usize, object: Arc<DataObject>) -> Result<()> {
        let input = self.inputs.get_mut(index).ok_or_else(|| {
            MediFlowError::Precondition(format!("node has no input port {}", index))
        })?;
        let channel = DataChannel::new_static();
        channel.publish(object)?;
        input.connection = Some(InputConnection {
            producer: None,
            channel,
            consumer: None,
            last_consumed: None,
        });
        self.modified = true;
        Ok(())
    }

    pub(crate) fn producers(&self) -> Vec<NodeRef> {
        self.inputs
            .iter()
            .filter_map(|i| i.connection.as_ref())
            .filter_map(|c| c.producer.clone())
            .collect()
    }

    pub fn has_dynamic_input(&self) -> bool {
        self.inputs
            .iter()
            .filter_map(|i| i.connection.as_ref())
            .any(|c| c.channel.is_dynamic())
    }

    /// Frame number this node last consumed from input `index`, if the
    /// input streams and a frame was received.
    pub fn last_consumed_frame(&self, index: usize) -> Option<u64> {
        self.inputs.get(index)?.connection.as_ref()?.last_consumed
    }

    pub(crate) fn propagate_mode(&self, mode: StreamingMode) -> Result<()> {
        for input in &self.inputs {
            if let Some(connection) = &input.connection {
                connection.channel.set_mode(mode)?;
            }
        }
        for output in &self.outputs {
            if let Some(channel) = &output.channel {
                channel.set_mode(mode)?;
            }
        }
        Ok(())
    }

    pub(crate) fn validate_connections(&self, node_name: &str) -> Result<()> {
        for input in &self.inputs {
            if input.required && !input.is_connected() {
                return Err(MediFlowError::Precondition(format!(
                    "{}: required input '{}' is not connected",
                    node_name,
                    input.name()
                )));
            }
        }
        Ok(())
    }

    /// Pull the next data object from input `index`. For a streaming
    /// input this blocks per the active policy and advances this node's
    /// consumed-frame marker.
    pub fn receive_input(&mut self, index: usize) -> Result<Arc<DataObject>> {
        let input = self.inputs.get_mut(index).ok_or_else(|| {
            MediFlowError::Precondition(format!("node has no input port {}", index))
        })?;
        let connection = input.connection.as_mut().ok_or_else(|| {
            MediFlowError::Precondition(format!("input '{}' is not connected", input.name))
        })?;
        let (number, object) = connection.channel.next_frame_with_number(connection.consumer)?;
        if connection.channel.is_dynamic() {
            connection.last_consumed = Some(number);
        }
        Ok(object)
    }

    /// Get or create the channel behind output `index`.
    pub fn output_channel(&mut self, index: usize, dynamic: bool) -> Result<Arc<DataChannel>> {
        let streaming = self.streaming.clone();
        let slot = self.outputs.get_mut(index).ok_or_else(|| {
            MediFlowError::Precondition(format!("node has no output port {}", index))
        })?;
        if let Some(channel) = &slot.channel {
            return Ok(channel.clone());
        }
        let channel = if dynamic {
            DataChannel::new_dynamic(&streaming)
        } else {
            DataChannel::new_static()
        };
        slot.channel = Some(channel.clone());
        Ok(channel)
    }

    pub fn existing_output_channel(&self, index: usize) -> Option<Arc<DataChannel>> {
        self.outputs.get(index).and_then(|s| s.channel.clone())
    }

    /// Publish `object` on output `index`: stamp it, record this node as
    /// its producer and hand it to the channel. On a bounded streaming
    /// channel this is where producer backpressure applies.
    pub fn write_output(&mut self, index: usize, object: Arc<DataObject>) -> Result<()> {
        object.set_producer(self.id);
        object.update_modified_timestamp();
        let dynamic = self.has_dynamic_input();
        let channel = self.output_channel(index, dynamic)?;
        channel.publish(object)
    }
}

impl Default for NodeCore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Node registry ──
//
// Data objects point back at their producer by id. The registry maps ids
// to weak node references; resolution after the node is gone returns None,
// which callers treat as a normal outcome.

fn registry() -> &'static Mutex<HashMap<u64, Weak<Mutex<dyn ProcessNode>>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u64, Weak<Mutex<dyn ProcessNode>>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register a node so data objects it produces can resolve it later.
/// Concrete node constructors call this on the freshly built handle.
pub fn register_node<T: ProcessNode + 'static>(node: &Arc<Mutex<T>>) {
    let id = match node.lock() {
        Ok(guard) => guard.core().id().0,
        Err(_) => return,
    };
    let node_ref: NodeRef = node.clone();
    let weak = Arc::downgrade(&node_ref);
    if let Ok(mut map) = registry().lock() {
        map.insert(id, weak);
    }
}

/// Resolve a node id to a live reference. `None` means the node is gone;
/// the stale entry is pruned.
pub fn resolve_node(id: NodeId) -> Option<NodeRef> {
    let mut map = registry().lock().ok()?;
    match map.get(&id.0) {
        Some(weak) => match weak.upgrade() {
            Some(node) => Some(node),
            None => {
                map.remove(&id.0);
                None
            }
        },
        None => None,
    }
}

// ── Handle ergonomics ──

/// Convenience surface over `Arc<Mutex<impl ProcessNode>>` handles: drive
/// updates, declare connections and obtain output ports without manual
/// locking.
pub trait NodeHandle {
    fn as_node_ref(&self) -> NodeRef;

    fn update(&self, timestep: u64, mode: StreamingMode) -> Result<()> {
        let node = self.as_node_ref();
        let mut guard = lock_node(&node)?;
        guard.update(timestep, mode)
    }

    /// Output port `index` of this node. Required inputs must be wired
    /// first, since whether the output streams is fixed here.
    fn output_port(&self, index: usize) -> Result<OutputPort> {
        let node = self.as_node_ref();
        let channel = {
            let mut guard = lock_node(&node)?;
            let name = guard.name().to_string();
            guard.core().validate_connections(&name)?;
            let dynamic = guard.output_is_dynamic(index);
            guard.core_mut().output_channel(index, dynamic)?
        };
        Ok(OutputPort::new(node, index, channel))
    }

    fn connect_input(&self, index: usize, port: &OutputPort) -> Result<()> {
        let node = self.as_node_ref();
        let mut guard = lock_node(&node)?;
        guard.core_mut().connect_input(index, port)
    }

    fn set_input_data(&self, index: usize, object: Arc<DataObject>) -> Result<()> {
        let node = self.as_node_ref();
        let mut guard = lock_node(&node)?;
        guard.core_mut().set_input_data(index, object)
    }

    fn wait_to_finish(&self) -> Result<()> {
        let node = self.as_node_ref();
        let mut guard = lock_node(&node)?;
        guard.wait_to_finish()
    }
}

impl<T: ProcessNode + 'static> NodeHandle for Arc<Mutex<T>> {
    fn as_node_ref(&self) -> NodeRef {
        self.clone()
    }
}

impl NodeHandle for Arc<Mutex<dyn ProcessNode>> {
    fn as_node_ref(&self) -> NodeRef {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::image::ImageDescriptor;
    use crate::types::DataType;

    struct CountingNode {
        core: NodeCore,
        executions: usize,
    }

    impl CountingNode {
        fn new() -> Arc<Mutex<Self>> {
            let node = Arc::new(Mutex::new(Self {
                core: NodeCore::new()
                    .with_input("image", true)
                    .with_output("image"),
                executions: 0,
            }));
            register_node(&node);
            node
        }
    }

    impl ProcessNode for CountingNode {
        fn name(&self) -> &str {
            "CountingNode"
        }

        fn core(&self) -> &NodeCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut NodeCore {
            &mut self.core
        }

        fn execute(&mut self) -> Result<()> {
            let input = self.core.receive_input(0)?;
            self.executions += 1;
            let output = DataObject::image(input.descriptor(), self.core.device())?;
            self.core.write_output(0, output)
        }
    }

    fn test_image() -> Arc<DataObject> {
        let device = DeviceManager::instance().host_device();
        let desc = ImageDescriptor::two_d(2, 2, 1, DataType::UInt8);
        DataObject::image_with_data(desc, &device, vec![1, 2, 3, 4]).unwrap()
    }

    #[test]
    fn test_update_executes_once_when_unmodified() {
        let node = CountingNode::new();
        node.set_input_data(0, test_image()).unwrap();
        node.update(0, StreamingMode::ProcessAllFrames).unwrap();
        node.update(0, StreamingMode::ProcessAllFrames).unwrap();
        assert_eq!(node.lock().unwrap().executions, 1);
    }

    #[test]
    fn test_update_reexecutes_after_modification() {
        let node = CountingNode::new();
        node.set_input_data(0, test_image()).unwrap();
        node.update(0, StreamingMode::ProcessAllFrames).unwrap();
        node.lock().unwrap().core_mut().mark_modified();
        node.update(1, StreamingMode::ProcessAllFrames).unwrap();
        assert_eq!(node.lock().unwrap().executions, 2);
    }

    #[test]
    fn test_update_without_required_input_fails() {
        let node = CountingNode::new();
        let result = node.update(0, StreamingMode::ProcessAllFrames);
        assert!(matches!(result, Err(MediFlowError::Precondition(_))));
    }

    #[test]
    fn test_output_carries_producer_backlink() {
        let node = CountingNode::new();
        node.set_input_data(0, test_image()).unwrap();
        let port = node.output_port(0).unwrap();
        node.update(0, StreamingMode::ProcessAllFrames).unwrap();
        let output = port.next_frame().unwrap();

        let producer_id = output.producer().unwrap();
        assert_eq!(producer_id, node.lock().unwrap().core().id());
        assert!(output.resolve_producer().is_some());
    }

    #[test]
    fn test_registry_resolution_reports_gone() {
        let id = {
            let node = CountingNode::new();
            let id = node.lock().unwrap().core().id();
            id
        };
        // Node dropped; the weak entry no longer upgrades
        assert!(resolve_node(id).is_none());
    }
}
