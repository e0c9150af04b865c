//! Statistical stack sampler for the strobe engine.
//!
//! A background queue periodically suspends the thread running managed code,
//! walks its frame-pointer chain, resumes it, and stores the trace. Frames
//! whose code could not be identified under suspension are verified later,
//! once allocation and the heap lock are allowed again.

mod config;
mod profiler;
mod queue;
mod report;
mod stats;
mod store;
mod suspend;
mod verify;
mod walker;

pub use config::{
    ConfigError, DEFAULT_INITIAL_FRAME_CAPACITY, DEFAULT_SAMPLING_INTERVAL, SamplerConfig,
};
pub use profiler::{ProfilerError, SamplerState, SamplingProfiler};
pub use stats::{StatsReporting, WalkStats};
pub use store::{SeenExecutables, TraceStore};
pub use strobe_types::{Report, ReportError};
pub use walker::{FrameWalker, WalkOutcome};
