//! Streams a preloaded frame sequence through a pipeline output.
//!
//! The producer loop supports a start index, a step size, a frame cap, a
//! fixed inter-frame sleep, replay counts and infinite looping. With
//! timestamp pacing enabled, the loop sleeps the remaining wall-clock
//! delta between consecutive acquisition timestamps before publishing, so
//! a recorded sequence plays back at its original rate.

use crate::data::object::DataObject;
use crate::error::{MediFlowError, Result};
use crate::pipeline::channel::DataChannel;
use crate::pipeline::process::{register_node, NodeCore, ProcessNode};
use crate::pipeline::streamer::{StreamSignals, StreamerCore, StreamerState};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A streaming source publishing an in-memory frame sequence.
///
/// Parameter setters apply to streams that have not started yet; the
/// producer thread copies its configuration when it spawns.
pub struct SequenceStreamer {
    core: NodeCore,
    stream: StreamerCore,
    frames: Vec<Arc<DataObject>>,
    start_index: usize,
    step_size: usize,
    max_frames: Option<usize>,
    sleep_time: Option<Duration>,
    replays: u32,
    looping: bool,
    use_timestamps: bool,
}

impl SequenceStreamer {
    pub fn new() -> Arc<Mutex<Self>> {
        Self::with_frames(Vec::new())
    }

    pub fn with_frames(frames: Vec<Arc<DataObject>>) -> Arc<Mutex<Self>> {
        let node = Arc::new(Mutex::new(Self {
            core: NodeCore::new().with_dynamic_output("frames"),
            stream: StreamerCore::new(),
            frames,
            start_index: 0,
            step_size: 1,
            max_frames: None,
            sleep_time: None,
            replays: 1,
            looping: false,
            use_timestamps: false,
        }));
        register_node(&node);
        node
    }

    /// Replace the frame sequence. Only valid before streaming starts.
    pub fn set_frames(&mut self, frames: Vec<Arc<DataObject>>) -> Result<()> {
        if self.stream.is_started() {
            return Err(MediFlowError::Precondition(
                "cannot replace frames while streaming".to_string(),
            ));
        }
        self.frames = frames;
        self.core.mark_modified();
        Ok(())
    }

    /// First frame index of every pass.
    pub fn set_start_index(&mut self, index: usize) {
        self.start_index = index;
        self.core.mark_modified();
    }

    /// Stride between consecutive frames. Zero is rejected.
    pub fn set_step_size(&mut self, step: usize) -> Result<()> {
        if step == 0 {
            return Err(MediFlowError::Config(
                "step size can't be 0".to_string(),
            ));
        }
        self.step_size = step;
        self.core.mark_modified();
        Ok(())
    }

    /// Cap the number of frames published per pass.
    pub fn set_maximum_frames(&mut self, count: usize) {
        self.max_frames = Some(count);
        self.core.mark_modified();
    }

    /// Fixed sleep between publications.
    pub fn set_sleep_time(&mut self, sleep: Duration) {
        self.sleep_time = Some(sleep);
        self.core.mark_modified();
    }

    /// Total number of passes over the sequence before the stream ends.
    pub fn set_replays(&mut self, replays: u32) {
        self.replays = replays;
        self.core.mark_modified();
    }

    /// Restart indefinitely instead of ending the stream.
    pub fn enable_looping(&mut self) {
        self.looping = true;
        self.core.mark_modified();
    }

    pub fn disable_looping(&mut self) {
        self.looping = false;
        self.core.mark_modified();
    }

    /// Pace publications by the frames' creation timestamps, interpreted
    /// as acquisition times in milliseconds. Off by default: freshly
    /// created objects carry logical timestamps, not acquisition times.
    pub fn set_use_timestamps(&mut self, use_timestamps: bool) {
        self.use_timestamps = use_timestamps;
        self.core.mark_modified();
    }

    pub fn step_size(&self) -> usize {
        self.step_size
    }

    /// Frames one pass will publish with the current configuration.
    pub fn frame_count(&self) -> usize {
        pass_length(
            self.frames.len(),
            self.start_index,
            self.step_size,
            self.max_frames,
        )
    }

    pub fn state(&self) -> StreamerState {
        self.stream.state()
    }

    pub fn has_reached_end(&self) -> bool {
        self.stream.has_reached_end()
    }

    /// Stop the producer cooperatively and join it. Safe from any thread
    /// except the producer itself; reentrant calls are no-ops.
    pub fn stop(&mut self) {
        if !self.stream.is_started() {
            return;
        }
        self.stream.request_stop();
        if let Some(channel) = self.core.existing_output_channel(0) {
            channel.close();
        }
        self.stream.join();
    }
}

impl ProcessNode for SequenceStreamer {
    fn name(&self) -> &str {
        "SequenceStreamer"
    }

    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn output_is_dynamic(&self, _index: usize) -> bool {
        true
    }

    /// First call spawns the producer thread, then blocks until it
    /// publishes its first frame. With an empty source the signal is
    /// still released and end-of-stream is marked, so the caller never
    /// hangs.
    fn execute(&mut self) -> Result<()> {
        if self.stream.state() == StreamerState::Stopped {
            return Err(MediFlowError::Precondition(
                "streamer was stopped and cannot restart".to_string(),
            ));
        }
        if !self.stream.is_started() {
            let channel = self.core.existing_output_channel(0).ok_or_else(|| {
                MediFlowError::Precondition("streamer output channel missing".to_string())
            })?;
            let context = ProducerContext {
                frames: self.frames.clone(),
                channel,
                start_index: self.start_index,
                step_size: self.step_size,
                max_frames: self.max_frames,
                sleep_time: self.sleep_time,
                replays: self.replays,
                looping: self.looping,
                use_timestamps: self.use_timestamps,
            };
            self.stream
                .start("sequence-streamer", move |signals| {
                    producer_loop(context, signals)
                })?;
        }
        self.stream.wait_first_frame();
        Ok(())
    }
}

impl Drop for SequenceStreamer {
    fn drop(&mut self) {
        // join() refuses a self-join, so dropping from the producer
        // thread cannot deadlock
        self.stop();
    }
}

struct ProducerContext {
    frames: Vec<Arc<DataObject>>,
    channel: Arc<DataChannel>,
    start_index: usize,
    step_size: usize,
    max_frames: Option<usize>,
    sleep_time: Option<Duration>,
    replays: u32,
    looping: bool,
    use_timestamps: bool,
}

fn pass_length(frames: usize, start: usize, step: usize, max: Option<usize>) -> usize {
    if start >= frames || step == 0 {
        return 0;
    }
    let count = (frames - start).div_ceil(step);
    match max {
        Some(max) => count.min(max),
        None => count,
    }
}

fn producer_loop(context: ProducerContext, signals: StreamSignals) {
    let pass_len = pass_length(
        context.frames.len(),
        context.start_index,
        context.step_size,
        context.max_frames,
    );
    let total_passes = context.replays.max(1);
    let mut index = context.start_index;
    let mut published_this_pass = 0usize;
    let mut passes_done = 0u32;
    let mut pacing: Option<(u64, Instant)> = None;

    loop {
        if signals.stop_requested() {
            signals.first_frame.signal();
            signals.transition(StreamerState::Stopped);
            break;
        }

        if pass_len == 0 {
            // No source data: release the waiting consumer, signal the end
            signals.first_frame.signal();
            signals.reached_end.store(true, Ordering::SeqCst);
            context.channel.mark_end_of_stream();
            signals.transition(StreamerState::Finished);
            tracing::info!("Sequence streamer found no frames to publish");
            break;
        }

        if published_this_pass < pass_len {
            let frame = context.frames[index].clone();

            if context.use_timestamps {
                let timestamp = frame.creation_timestamp();
                if let Some((previous, at)) = pacing {
                    let target = Duration::from_millis(timestamp.saturating_sub(previous));
                    let elapsed = at.elapsed();
                    if target > elapsed {
                        std::thread::sleep(target - elapsed);
                    }
                }
                pacing = Some((timestamp, Instant::now()));
            }

            match context.channel.publish(frame) {
                Ok(()) => {}
                Err(MediFlowError::ThreadStopped) => {
                    signals.first_frame.signal();
                    signals.transition(StreamerState::Stopped);
                    break;
                }
                Err(e) => {
                    tracing::error!("Sequence streamer failed to publish: {}", e);
                    signals.first_frame.signal();
                    signals.transition(StreamerState::Stopped);
                    break;
                }
            }
            signals.first_frame.signal();

            if let Some(sleep) = context.sleep_time {
                std::thread::sleep(sleep);
            }
            index += context.step_size;
            published_this_pass += 1;
        } else {
            passes_done += 1;
            if context.looping || passes_done < total_passes {
                index = context.start_index;
                published_this_pass = 0;
                pacing = None;
                signals.transition(StreamerState::Looping);
                tracing::debug!("Restarting stream, pass {}", passes_done + 1);
                continue;
            }
            signals.reached_end.store(true, Ordering::SeqCst);
            context.channel.mark_end_of_stream();
            signals.transition(StreamerState::Finished);
            tracing::info!("Reached end of stream after {} pass(es)", passes_done);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_length() {
        assert_eq!(pass_length(10, 0, 1, None), 10);
        assert_eq!(pass_length(10, 4, 2, None), 3);
        assert_eq!(pass_length(10, 0, 1, Some(4)), 4);
        assert_eq!(pass_length(10, 12, 1, None), 0);
        assert_eq!(pass_length(0, 0, 1, None), 0);
    }

    #[test]
    fn test_step_size_zero_rejected_without_mutation() {
        let streamer = SequenceStreamer::new();
        let mut guard = streamer.lock().unwrap();
        guard.set_step_size(3).unwrap();
        let err = guard.set_step_size(0).unwrap_err();
        assert!(matches!(err, MediFlowError::Config(_)));
        assert_eq!(guard.step_size(), 3);
    }
}
