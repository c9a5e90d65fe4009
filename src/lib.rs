//! # MediFlow-RS: Medical Image Pipeline Core
//!
//! A lazily-evaluated dataflow toolkit for medical image processing. The
//! graph is pull-based: nodes re-run only when marked modified or when a
//! streaming input holds an unconsumed frame. Data objects own per-device
//! residency with reference counting, streaming sources run one background
//! producer thread each, and channels buffer frames under a
//! consumer-selected policy.
//!
//! ## Architecture
//!
//! - **Device**: execution devices with dispatch queues and a per-device
//!   program cache, behind a process-wide [`device::DeviceManager`]
//! - **Data**: [`data::DataObject`] payloads with residency/access scopes,
//!   [`data::DynamicData`] frame sequences, scene-graph attachment
//! - **Pipeline**: the [`pipeline::ProcessNode`] pull/dirty protocol,
//!   ports, [`pipeline::DataChannel`] edges and streamer plumbing
//! - **Streamers & Algorithms**: concrete sources and filters built on the
//!   same contracts external leaves use
//!
//! ## Example
//!
//! ```ignore
//! use mediflow_rs::algorithms::GaussianSmoothing;
//! use mediflow_rs::pipeline::{NodeHandle, StreamingMode};
//! use mediflow_rs::streamers::SequenceStreamer;
//!
//! let source = SequenceStreamer::with_frames(frames);
//! let smoothing = GaussianSmoothing::new();
//! smoothing.connect_input(0, &source.output_port(0)?)?;
//!
//! let port = smoothing.output_port(0)?;
//! smoothing.update(0, StreamingMode::ProcessAllFrames)?;
//! smoothing.wait_to_finish()?;
//! let frame = port.next_frame()?;
//! ```

pub mod algorithms;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod streamers;
pub mod types;

// Re-export commonly used types
pub use config::RuntimeConfig;
pub use data::{DataObject, DynamicData, ImageDescriptor, SceneNode};
pub use device::{DeviceManager, ExecutionDevice};
pub use error::{MediFlowError, Result, ResultExt};
pub use pipeline::{DataChannel, NodeCore, NodeHandle, NodeRef, ProcessNode, StreamingMode};
pub use streamers::SequenceStreamer;
pub use types::{DataType, DeviceId, NodeId};
