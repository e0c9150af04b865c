//! Script-profiler agent: the inspector-facing side of the sampler.

mod agent;
mod events;

pub use agent::ScriptProfilerAgent;
pub use events::{
    EventError, Frontend, FrontendEvent, ProfilingReason, ScriptEvent, TrackingComplete,
    TrackingStart, decode_event, encode_event,
};
