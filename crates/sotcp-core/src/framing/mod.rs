//! Delimiter framing for raw serial byte streams.

pub mod accumulator;

pub use accumulator::{Frame, FrameAccumulator, FrameKind, FramerState};
