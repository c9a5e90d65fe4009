//! Dynamic data: an ordered, append-only run of data-object frames exposed
//! as one streaming handle.
//!
//! Frames are numbered in publication order. Each consumer owns a cursor
//! and observes frames in strict arrival order; a frame is evicted only
//! once every registered cursor has moved past it, except under the
//! newest-only policy where unconsumed frames are overwritten.
//!
//! Waiting is condvar-based on both sides: consumers block on "frame
//! added", a lossless producer blocks on "frame consumed" when the queue is
//! full. Neither wait holds the lock while blocked.

use crate::data::object::DataObject;
use crate::error::{MediFlowError, Result};
use crate::pipeline::channel::StreamingMode;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Identifier of one consumer cursor on a dynamic data sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u32);

struct DynInner {
    mode: StreamingMode,
    /// Queue capacity before a lossless producer blocks.
    capacity: usize,
    /// Retention cap for the store-all policy.
    max_retained: usize,
    frames: VecDeque<(u64, Arc<DataObject>)>,
    next_frame_number: u64,
    cursors: HashMap<ConsumerId, u64>,
    next_consumer_id: u32,
    end_of_stream: bool,
    closed: bool,
}

/// A bounded, policy-driven sequence of frames.
pub struct DynamicData {
    inner: Mutex<DynInner>,
    frame_added: Condvar,
    frame_consumed: Condvar,
}

impl DynamicData {
    pub fn new(mode: StreamingMode, capacity: usize, max_retained: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(DynInner {
                mode,
                capacity: capacity.max(1),
                max_retained: max_retained.max(1),
                frames: VecDeque::new(),
                next_frame_number: 0,
                cursors: HashMap::new(),
                next_consumer_id: 0,
                end_of_stream: false,
                closed: false,
            }),
            frame_added: Condvar::new(),
            frame_consumed: Condvar::new(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, DynInner>> {
        self.inner
            .lock()
            .map_err(|_| MediFlowError::Channel("dynamic data lock poisoned".to_string()))
    }

    /// Change the buffering policy. Applies to frames published afterwards.
    pub fn set_mode(&self, mode: StreamingMode) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.mode != mode {
            inner.mode = mode;
            // A policy change can unblock a waiting producer
            self.frame_consumed.notify_all();
        }
        Ok(())
    }

    pub fn mode(&self) -> StreamingMode {
        self.lock().map(|i| i.mode).unwrap_or_default()
    }

    /// Register a consumer cursor starting at the oldest retained frame.
    pub fn register_consumer(&self) -> Result<ConsumerId> {
        let mut inner = self.lock()?;
        let id = ConsumerId(inner.next_consumer_id);
        inner.next_consumer_id += 1;
        let start = inner
            .frames
            .front()
            .map(|(n, _)| *n)
            .unwrap_or(inner.next_frame_number);
        inner.cursors.insert(id, start);
        Ok(id)
    }

    /// Publish a frame. Under the lossless policy this blocks while the
    /// queue is at capacity; under newest-only an unconsumed frame is
    /// overwritten and the producer never blocks.
    pub fn add_frame(&self, object: Arc<DataObject>) -> Result<()> {
        let mut inner = self.lock()?;
        loop {
            if inner.closed {
                return Err(MediFlowError::ThreadStopped);
            }
            let limit = match inner.mode {
                StreamingMode::ProcessAllFrames => Some(inner.capacity),
                StreamingMode::StoreAllFrames => Some(inner.max_retained),
                StreamingMode::NewestFrameOnly => None,
            };
            match limit {
                Some(limit) if inner.frames.len() >= limit => {
                    inner = self
                        .frame_consumed
                        .wait(inner)
                        .map_err(|_| MediFlowError::Channel("dynamic data lock poisoned".to_string()))?;
                }
                _ => break,
            }
        }

        if inner.mode == StreamingMode::NewestFrameOnly && !inner.frames.is_empty() {
            tracing::trace!("Overwriting {} unconsumed frame(s)", inner.frames.len());
            inner.frames.clear();
        }

        let number = inner.next_frame_number;
        inner.next_frame_number += 1;
        inner.frames.push_back((number, object));
        self.frame_added.notify_all();
        Ok(())
    }

    /// Next frame for `consumer` under the active policy. Blocks until one
    /// is available; returns the end-of-stream signal once the producer has
    /// finished and every retained frame was delivered.
    pub fn next_frame(&self, consumer: ConsumerId) -> Result<(u64, Arc<DataObject>)> {
        let mut inner = self.lock()?;
        loop {
            let cursor = *inner.cursors.get(&consumer).ok_or_else(|| {
                MediFlowError::Precondition("unknown consumer cursor".to_string())
            })?;

            let hit = match inner.mode {
                StreamingMode::NewestFrameOnly => inner
                    .frames
                    .back()
                    .filter(|(n, _)| *n >= cursor)
                    .map(|(n, o)| (*n, o.clone())),
                _ => inner
                    .frames
                    .iter()
                    .find(|(n, _)| *n == cursor)
                    .map(|(n, o)| (*n, o.clone())),
            };

            if let Some((number, object)) = hit {
                inner.cursors.insert(consumer, number + 1);
                if inner.mode == StreamingMode::ProcessAllFrames {
                    Self::evict_consumed(&mut inner);
                }
                self.frame_consumed.notify_all();
                return Ok((number, object));
            }

            if inner.end_of_stream || inner.closed {
                return Err(MediFlowError::EndOfStream);
            }
            inner = self
                .frame_added
                .wait(inner)
                .map_err(|_| MediFlowError::Channel("dynamic data lock poisoned".to_string()))?;
        }
    }

    /// Frame by explicit number, for offline traversal of a stored run.
    /// Blocks until the frame is published; an evicted frame is stale.
    pub fn frame(&self, number: u64) -> Result<Arc<DataObject>> {
        let mut inner = self.lock()?;
        loop {
            if let Some((_, object)) = inner.frames.iter().find(|(n, _)| *n == number) {
                return Ok(object.clone());
            }
            if number < inner.next_frame_number {
                return Err(MediFlowError::StaleData(format!(
                    "frame {} was already evicted",
                    number
                )));
            }
            if inner.end_of_stream || inner.closed {
                return Err(MediFlowError::EndOfStream);
            }
            inner = self
                .frame_added
                .wait(inner)
                .map_err(|_| MediFlowError::Channel("dynamic data lock poisoned".to_string()))?;
        }
    }

    fn evict_consumed(inner: &mut DynInner) {
        let Some(min_cursor) = inner.cursors.values().min().copied() else {
            return;
        };
        while inner
            .frames
            .front()
            .map_or(false, |(n, _)| *n < min_cursor)
        {
            inner.frames.pop_front();
        }
    }

    /// Number of the most recently published frame.
    pub fn newest_frame_number(&self) -> Option<u64> {
        self.lock()
            .ok()
            .and_then(|i| i.next_frame_number.checked_sub(1))
    }

    pub fn frames_published(&self) -> u64 {
        self.lock().map(|i| i.next_frame_number).unwrap_or(0)
    }

    /// Mark the normal end of the stream and wake every waiter.
    pub fn mark_end_of_stream(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.end_of_stream = true;
        }
        self.frame_added.notify_all();
        self.frame_consumed.notify_all();
    }

    pub fn has_reached_end(&self) -> bool {
        self.lock().map(|i| i.end_of_stream).unwrap_or(false)
    }

    /// Close the sequence: the producer gets a stop signal on its next
    /// publish, consumers drain what is retained and then see end of
    /// stream.
    pub fn close(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.closed = true;
        }
        self.frame_added.notify_all();
        self.frame_consumed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::image::ImageDescriptor;
    use crate::device::ExecutionDevice;
    use crate::types::{DataType, DeviceId};

    fn frame(value: u8) -> Arc<DataObject> {
        let device = Arc::new(ExecutionDevice::host(DeviceId(0)));
        let desc = ImageDescriptor::two_d(1, 1, 1, DataType::UInt8);
        DataObject::image_with_data(desc, &device, vec![value]).unwrap()
    }

    fn read_value(obj: &Arc<DataObject>) -> u8 {
        obj.read_access(DeviceId(0)).unwrap().scalar(0) as u8
    }

    #[test]
    fn test_lossless_delivery_in_order() {
        let data = DynamicData::new(StreamingMode::ProcessAllFrames, 10, 100);
        let consumer = data.register_consumer().unwrap();
        for v in [1, 2, 3] {
            data.add_frame(frame(v)).unwrap();
        }
        for expected in [1, 2, 3] {
            let (_, obj) = data.next_frame(consumer).unwrap();
            assert_eq!(read_value(&obj), expected);
        }
    }

    #[test]
    fn test_newest_only_overwrites() {
        let data = DynamicData::new(StreamingMode::NewestFrameOnly, 10, 100);
        let consumer = data.register_consumer().unwrap();
        for v in [1, 2, 3] {
            data.add_frame(frame(v)).unwrap();
        }
        let (_, obj) = data.next_frame(consumer).unwrap();
        assert_eq!(read_value(&obj), 3);
    }

    #[test]
    fn test_frame_evicted_only_after_all_cursors_passed() {
        let data = DynamicData::new(StreamingMode::ProcessAllFrames, 10, 100);
        let fast = data.register_consumer().unwrap();
        let slow = data.register_consumer().unwrap();
        data.add_frame(frame(1)).unwrap();
        data.add_frame(frame(2)).unwrap();

        data.next_frame(fast).unwrap();
        data.next_frame(fast).unwrap();
        // Slow consumer still gets both frames in order
        assert_eq!(read_value(&data.next_frame(slow).unwrap().1), 1);
        assert_eq!(read_value(&data.next_frame(slow).unwrap().1), 2);
    }

    #[test]
    fn test_end_of_stream_after_draining() {
        let data = DynamicData::new(StreamingMode::ProcessAllFrames, 10, 100);
        let consumer = data.register_consumer().unwrap();
        data.add_frame(frame(7)).unwrap();
        data.mark_end_of_stream();

        assert_eq!(read_value(&data.next_frame(consumer).unwrap().1), 7);
        assert!(matches!(
            data.next_frame(consumer),
            Err(MediFlowError::EndOfStream)
        ));
    }

    #[test]
    fn test_producer_blocks_at_capacity() {
        let data = DynamicData::new(StreamingMode::ProcessAllFrames, 2, 100);
        let consumer = data.register_consumer().unwrap();
        data.add_frame(frame(1)).unwrap();
        data.add_frame(frame(2)).unwrap();

        let producer = {
            let data = data.clone();
            std::thread::spawn(move || data.add_frame(frame(3)))
        };
        // Give the producer a chance to block
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!producer.is_finished());

        data.next_frame(consumer).unwrap();
        producer.join().unwrap().unwrap();
    }

    #[test]
    fn test_close_unblocks_producer_with_stop() {
        let data = DynamicData::new(StreamingMode::ProcessAllFrames, 1, 100);
        let _consumer = data.register_consumer().unwrap();
        data.add_frame(frame(1)).unwrap();

        let producer = {
            let data = data.clone();
            std::thread::spawn(move || data.add_frame(frame(2)))
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        data.close();
        assert!(matches!(
            producer.join().unwrap(),
            Err(MediFlowError::ThreadStopped)
        ));
    }

    #[test]
    fn test_store_all_pull_by_index() {
        let data = DynamicData::new(StreamingMode::StoreAllFrames, 10, 100);
        for v in [5, 6, 7] {
            data.add_frame(frame(v)).unwrap();
        }
        assert_eq!(read_value(&data.frame(1).unwrap()), 6);
        assert_eq!(read_value(&data.frame(0).unwrap()), 5);
    }
}
