//! Streamer plumbing: producer-thread lifecycle shared by every streaming
//! source.
//!
//! A streamer's first consumer-facing `execute` spawns one producer thread
//! and blocks on a "first frame inserted" signal, so the pipeline never
//! sees an empty stream handle. Stopping is cooperative: the stop flag is
//! observed once per producer-loop iteration, and the joining side refuses
//! a self-join when stop is reached from the producer thread itself.

use crate::error::{MediFlowError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Streamer lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamerState {
    /// No producer thread yet.
    Idle,
    /// Producer thread running, frames flowing.
    Streaming,
    /// Producer restarted the sequence for a replay pass.
    Looping,
    /// Source exhausted; the end-of-stream mark was published.
    Finished,
    /// Stopped cooperatively before the source was exhausted.
    Stopped,
}

impl StreamerState {
    pub fn is_running(&self) -> bool {
        matches!(self, StreamerState::Streaming | StreamerState::Looping)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StreamerState::Finished | StreamerState::Stopped)
    }

    /// Check if this state transition is valid.
    pub fn can_transition_to(&self, target: &StreamerState) -> bool {
        use StreamerState::*;
        match (self, target) {
            (Idle, Streaming) => true,
            (Streaming, Looping) => true,
            (Streaming, Finished) => true,
            (Streaming, Stopped) => true,
            (Looping, Streaming) => true,
            (Looping, Finished) => true,
            (Looping, Stopped) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

/// One-shot "first frame inserted" handshake between the producer thread
/// and the consumer blocked in `execute`.
pub struct FirstFrameSignal {
    inserted: Mutex<bool>,
    cond: Condvar,
}

impl FirstFrameSignal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inserted: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    /// Release the waiting consumer. Idempotent; only the first call
    /// notifies.
    pub fn signal(&self) {
        let mut inserted = match self.inserted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !*inserted {
            *inserted = true;
            self.cond.notify_all();
        }
    }

    /// Block until the producer signals. The lock is not held across the
    /// producer's publish path, only around this flag.
    pub fn wait(&self) {
        let mut inserted = match self.inserted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !*inserted {
            inserted = match self.cond.wait(inserted) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

/// Shared handles the producer loop works with.
#[derive(Clone)]
pub struct StreamSignals {
    pub state: Arc<Mutex<StreamerState>>,
    pub first_frame: Arc<FirstFrameSignal>,
    pub stop: Arc<AtomicBool>,
    pub reached_end: Arc<AtomicBool>,
}

impl StreamSignals {
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn transition(&self, target: StreamerState) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.can_transition_to(&target) {
            *state = target;
        } else {
            tracing::warn!("Ignoring invalid streamer transition {:?} -> {:?}", *state, target);
        }
    }
}

/// Producer-thread lifecycle owned by a concrete streamer.
pub struct StreamerCore {
    signals: StreamSignals,
    thread: Option<JoinHandle<()>>,
}

impl StreamerCore {
    pub fn new() -> Self {
        Self {
            signals: StreamSignals {
                state: Arc::new(Mutex::new(StreamerState::Idle)),
                first_frame: FirstFrameSignal::new(),
                stop: Arc::new(AtomicBool::new(false)),
                reached_end: Arc::new(AtomicBool::new(false)),
            },
            thread: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.thread.is_some()
    }

    pub fn state(&self) -> StreamerState {
        match self.signals.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn has_reached_end(&self) -> bool {
        self.signals.reached_end.load(Ordering::SeqCst)
    }

    pub fn signals(&self) -> StreamSignals {
        self.signals.clone()
    }

    /// Spawn the producer thread running `body`. Exactly one thread per
    /// streamer; a second call while started is a caller error.
    pub fn start<F>(&mut self, name: &str, body: F) -> Result<()>
    where
        F: FnOnce(StreamSignals) + Send + 'static,
    {
        if self.thread.is_some() {
            return Err(MediFlowError::Precondition(
                "streamer already has a producer thread".to_string(),
            ));
        }
        let signals = self.signals.clone();
        signals.transition(StreamerState::Streaming);
        let thread = std::thread::Builder::new()
            .name(format!("{}-producer", name))
            .spawn(move || body(signals))
            .map_err(|e| {
                MediFlowError::Device(format!("failed to spawn producer thread: {}", e))
            })?;
        self.thread = Some(thread);
        tracing::info!("Streamer {} started", name);
        Ok(())
    }

    /// Block the calling thread until the producer published its first
    /// frame (or found the source empty and released the signal anyway).
    pub fn wait_first_frame(&self) {
        self.signals.first_frame.wait();
    }

    /// Raise the cooperative stop flag. Observed at loop-iteration
    /// granularity by the producer.
    pub fn request_stop(&self) {
        self.signals.stop.store(true, Ordering::SeqCst);
    }

    /// Join the producer thread. Safe to call when already stopped; a
    /// call from the producer thread itself skips the join to avoid
    /// deadlocking on a self-join.
    pub fn join(&mut self) {
        let is_self = self
            .thread
            .as_ref()
            .map(|h| h.thread().id() == std::thread::current().id())
            .unwrap_or(false);
        if is_self {
            tracing::warn!("Streamer join requested from its own producer thread; skipped");
            return;
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Streamer producer thread panicked");
            }
        }
    }
}

impl Default for StreamerCore {
    fn default() -> Self {
        Self::new()
    }
}
