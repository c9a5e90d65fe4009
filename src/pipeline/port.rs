//! Ports: the named connection points of a process node.
//!
//! Input ports record where their data comes from (the producing node and
//! the shared channel); output ports own the channel downstream consumers
//! read from. The public [`OutputPort`] handle is what user code holds on
//! to: it can drive the producer and pull results.

use crate::data::dynamic::ConsumerId;
use crate::data::object::DataObject;
use crate::error::{MediFlowError, Result};
use crate::pipeline::channel::{DataChannel, StreamingMode};
use crate::pipeline::process::{lock_node, NodeRef};
use std::sync::{Arc, Mutex};

/// Declared input of a node.
pub struct InputPort {
    pub(crate) name: &'static str,
    pub(crate) required: bool,
    pub(crate) connection: Option<InputConnection>,
}

impl InputPort {
    pub(crate) fn new(name: &'static str, required: bool) -> Self {
        Self {
            name,
            required,
            connection: None,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

pub(crate) struct InputConnection {
    pub producer: Option<NodeRef>,
    pub channel: Arc<DataChannel>,
    pub consumer: Option<ConsumerId>,
    pub last_consumed: Option<u64>,
}

/// Declared output of a node. The channel is created when the first
/// connection is declared.
pub struct OutputSlot {
    pub(crate) name: &'static str,
    pub(crate) channel: Option<Arc<DataChannel>>,
}

impl OutputSlot {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            channel: None,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }
}

/// Handle to one node output, held by downstream code.
///
/// Each handle owns its own consumer cursor on a streaming channel, so two
/// ports on the same output observe the full frame sequence independently.
/// The cursor is registered lazily on the first read, which keeps an
/// unused handle from stalling a bounded lossless queue.
pub struct OutputPort {
    producer: NodeRef,
    index: usize,
    channel: Arc<DataChannel>,
    consumer: Mutex<Option<ConsumerId>>,
}

impl OutputPort {
    pub(crate) fn new(producer: NodeRef, index: usize, channel: Arc<DataChannel>) -> Self {
        Self {
            producer,
            index,
            channel,
            consumer: Mutex::new(None),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn producer(&self) -> &NodeRef {
        &self.producer
    }

    pub fn channel(&self) -> &Arc<DataChannel> {
        &self.channel
    }

    /// Drive the producing node for `timestep` under `mode`.
    pub fn update(&self, timestep: u64, mode: StreamingMode) -> Result<()> {
        let mut node = lock_node(&self.producer)?;
        node.update(timestep, mode)
    }

    fn cursor(&self) -> Result<Option<ConsumerId>> {
        let mut consumer = self
            .consumer
            .lock()
            .map_err(|_| MediFlowError::Channel("output port lock poisoned".to_string()))?;
        if consumer.is_none() {
            *consumer = self.channel.register_consumer()?;
        }
        Ok(*consumer)
    }

    /// The next data object available on this output. Blocks according to
    /// the channel's streaming policy.
    pub fn next_frame(&self) -> Result<Arc<DataObject>> {
        let cursor = self.cursor()?;
        self.channel
            .next_frame_with_number(cursor)
            .map(|(_, object)| object)
    }

    /// Frame by explicit number (store-all traversal).
    pub fn frame_at(&self, number: u64) -> Result<Arc<DataObject>> {
        self.channel.frame_at(number)
    }

    /// Whether the producing stream has signaled its normal end.
    pub fn has_reached_end(&self) -> bool {
        self.channel.has_reached_end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_port_connection_state() {
        let port = InputPort::new("image", true);
        assert_eq!(port.name(), "image");
        assert!(port.required);
        assert!(!port.is_connected());
    }
}
