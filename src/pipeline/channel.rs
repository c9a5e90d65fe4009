//! Data channels: the edges of the pipeline graph.
//!
//! A channel binds one producer output to any number of consumer cursors.
//! Whether it carries a single object or a stream of frames is fixed when
//! the connection is declared; the buffering policy is chosen by the
//! consumer per update call.

use crate::config::StreamingConfig;
use crate::data::dynamic::{ConsumerId, DynamicData};
use crate::data::object::DataObject;
use crate::error::{MediFlowError, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex};

/// Policy governing how a channel buffers or drops frames relative to
/// consumer pace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamingMode {
    /// Lossless FIFO. The queue is bounded; a producer that outruns its
    /// consumers blocks until a frame is retrieved.
    #[default]
    ProcessAllFrames,
    /// Capacity one; a new frame overwrites an unconsumed one and the
    /// producer never blocks. Consumers observe the most recent frame at
    /// poll time.
    NewestFrameOnly,
    /// Retain the whole run (up to the configured cap) for traversal by
    /// index or in sequence.
    StoreAllFrames,
}

struct StaticSlot {
    slot: Mutex<Option<Arc<DataObject>>>,
    ready: Condvar,
}

enum ChannelContent {
    Static(StaticSlot),
    Dynamic(Arc<DynamicData>),
}

/// The edge connecting a producer output to its consumers.
pub struct DataChannel {
    content: ChannelContent,
}

impl DataChannel {
    /// Channel carrying a single (replaceable) data object.
    pub fn new_static() -> Arc<Self> {
        Arc::new(Self {
            content: ChannelContent::Static(StaticSlot {
                slot: Mutex::new(None),
                ready: Condvar::new(),
            }),
        })
    }

    /// Channel carrying a stream of frames.
    pub fn new_dynamic(config: &StreamingConfig) -> Arc<Self> {
        Arc::new(Self {
            content: ChannelContent::Dynamic(DynamicData::new(
                config.default_mode,
                config.channel_capacity,
                config.max_retained_frames,
            )),
        })
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.content, ChannelContent::Dynamic(_))
    }

    /// The underlying frame sequence of a streaming channel.
    pub fn dynamic(&self) -> Option<Arc<DynamicData>> {
        match &self.content {
            ChannelContent::Dynamic(data) => Some(data.clone()),
            ChannelContent::Static(_) => None,
        }
    }

    /// Apply the consumer-selected streaming mode. No-op on a static
    /// channel.
    pub fn set_mode(&self, mode: StreamingMode) -> Result<()> {
        match &self.content {
            ChannelContent::Dynamic(data) => data.set_mode(mode),
            ChannelContent::Static(_) => Ok(()),
        }
    }

    /// Register a consumer cursor. `None` on a static channel, where no
    /// cursor is needed.
    pub fn register_consumer(&self) -> Result<Option<ConsumerId>> {
        match &self.content {
            ChannelContent::Dynamic(data) => Ok(Some(data.register_consumer()?)),
            ChannelContent::Static(_) => Ok(None),
        }
    }

    /// Publish a data object into the channel.
    pub fn publish(&self, object: Arc<DataObject>) -> Result<()> {
        match &self.content {
            ChannelContent::Dynamic(data) => data.add_frame(object),
            ChannelContent::Static(inner) => {
                let mut slot = inner
                    .slot
                    .lock()
                    .map_err(|_| MediFlowError::Channel("channel lock poisoned".to_string()))?;
                *slot = Some(object);
                inner.ready.notify_all();
                Ok(())
            }
        }
    }

    /// The next frame for `consumer` together with its frame number.
    /// Blocks until one satisfies the active policy; a static channel
    /// blocks until its object is published (frame number 0).
    pub fn next_frame_with_number(
        &self,
        consumer: Option<ConsumerId>,
    ) -> Result<(u64, Arc<DataObject>)> {
        match &self.content {
            ChannelContent::Dynamic(data) => {
                let consumer = consumer.ok_or_else(|| {
                    MediFlowError::Precondition(
                        "streaming channel read without a registered consumer".to_string(),
                    )
                })?;
                data.next_frame(consumer)
            }
            ChannelContent::Static(inner) => {
                let mut slot = inner
                    .slot
                    .lock()
                    .map_err(|_| MediFlowError::Channel("channel lock poisoned".to_string()))?;
                loop {
                    if let Some(object) = slot.as_ref() {
                        return Ok((0, object.clone()));
                    }
                    slot = inner
                        .ready
                        .wait(slot)
                        .map_err(|_| MediFlowError::Channel("channel lock poisoned".to_string()))?;
                }
            }
        }
    }

    /// The current object of a static channel, if already published.
    pub fn current(&self) -> Option<Arc<DataObject>> {
        match &self.content {
            ChannelContent::Static(inner) => inner.slot.lock().ok().and_then(|s| s.clone()),
            ChannelContent::Dynamic(_) => None,
        }
    }

    /// Frame by explicit number on a streaming channel.
    pub fn frame_at(&self, number: u64) -> Result<Arc<DataObject>> {
        match &self.content {
            ChannelContent::Dynamic(data) => data.frame(number),
            ChannelContent::Static(_) => Err(MediFlowError::Precondition(
                "indexed frame access on a non-streaming channel".to_string(),
            )),
        }
    }

    /// Number of the most recently published frame of a streaming channel.
    pub fn newest_frame_number(&self) -> Option<u64> {
        match &self.content {
            ChannelContent::Dynamic(data) => data.newest_frame_number(),
            ChannelContent::Static(_) => None,
        }
    }

    pub fn frames_published(&self) -> u64 {
        match &self.content {
            ChannelContent::Dynamic(data) => data.frames_published(),
            ChannelContent::Static(inner) => {
                u64::from(inner.slot.lock().map_or(false, |s| s.is_some()))
            }
        }
    }

    /// Signal the normal end of the stream.
    pub fn mark_end_of_stream(&self) {
        if let ChannelContent::Dynamic(data) = &self.content {
            data.mark_end_of_stream();
        }
    }

    pub fn has_reached_end(&self) -> bool {
        match &self.content {
            ChannelContent::Dynamic(data) => data.has_reached_end(),
            ChannelContent::Static(_) => false,
        }
    }

    /// Close the channel, waking any blocked producer or consumer.
    pub fn close(&self) {
        if let ChannelContent::Dynamic(data) = &self.content {
            data.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::image::ImageDescriptor;
    use crate::device::ExecutionDevice;
    use crate::types::{DataType, DeviceId};

    fn test_object() -> Arc<DataObject> {
        let device = Arc::new(ExecutionDevice::host(DeviceId(0)));
        let desc = ImageDescriptor::two_d(1, 1, 1, DataType::UInt8);
        DataObject::image_with_data(desc, &device, vec![42]).unwrap()
    }

    #[test]
    fn test_static_channel_returns_published_object() {
        let channel = DataChannel::new_static();
        assert!(channel.current().is_none());
        let obj = test_object();
        channel.publish(obj.clone()).unwrap();
        let (number, read) = channel.next_frame_with_number(None).unwrap();
        assert_eq!(number, 0);
        assert!(Arc::ptr_eq(&obj, &read));
    }

    #[test]
    fn test_static_channel_blocks_until_published() {
        let channel = DataChannel::new_static();
        let reader = {
            let channel = channel.clone();
            std::thread::spawn(move || channel.next_frame_with_number(None))
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(!reader.is_finished());
        channel.publish(test_object()).unwrap();
        reader.join().unwrap().unwrap();
    }

    #[test]
    fn test_dynamic_channel_requires_consumer() {
        let channel = DataChannel::new_dynamic(&StreamingConfig::default());
        assert!(matches!(
            channel.next_frame_with_number(None),
            Err(MediFlowError::Precondition(_))
        ));
    }

    #[test]
    fn test_dynamic_channel_roundtrip() {
        let channel = DataChannel::new_dynamic(&StreamingConfig::default());
        let consumer = channel.register_consumer().unwrap();
        channel.publish(test_object()).unwrap();
        let (number, _) = channel.next_frame_with_number(consumer).unwrap();
        assert_eq!(number, 0);
        assert_eq!(channel.frames_published(), 1);
    }
}
