//! The pipeline execution core: process nodes, ports, data channels and
//! streamer plumbing.
//!
//! Execution is pull-based and lazy. Calling `update` on the terminal node
//! of a graph recursively updates its producers; each node runs its
//! computation only when marked modified or when a streaming input holds a
//! frame it has not consumed. Channels connect node outputs to consumer
//! cursors and buffer frames according to the consumer-selected
//! [`StreamingMode`].

pub mod channel;
pub mod port;
pub mod process;
pub mod streamer;

pub use channel::{DataChannel, StreamingMode};
pub use port::{InputPort, OutputPort, OutputSlot};
pub use process::{register_node, resolve_node, NodeCore, NodeHandle, NodeRef, ProcessNode};
pub use streamer::{FirstFrameSignal, StreamSignals, StreamerCore, StreamerState};
