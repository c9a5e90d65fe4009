//! Streaming sources: process nodes owning a background producer thread.

pub mod sequence;

pub use sequence::SequenceStreamer;
