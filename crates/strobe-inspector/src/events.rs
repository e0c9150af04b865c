use facet::Facet;
use std::error::Error;
use std::fmt;
use std::sync::mpsc;

use strobe_types::Report;
use tracing::debug;

/// Why a script evaluation was profiled.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum ProfilingReason {
    Api,
    Microtask,
    Other,
}

#[derive(Facet, Clone, Debug, PartialEq)]
pub struct TrackingStart {
    pub timestamp: f64,
}

/// One outermost script evaluation, in stopwatch seconds.
#[derive(Facet, Clone, Debug, PartialEq)]
pub struct ScriptEvent {
    pub start_time: f64,
    pub end_time: f64,
    pub kind: ProfilingReason,
}

#[derive(Facet, Clone, Debug, PartialEq)]
pub struct TrackingComplete {
    /// Present only when tracking was started with samples enabled.
    pub samples: Option<Report>,
}

#[derive(Facet, Clone, Debug, PartialEq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum FrontendEvent {
    TrackingStart(TrackingStart),
    TrackingUpdate(ScriptEvent),
    TrackingComplete(TrackingComplete),
}

#[derive(Debug)]
pub enum EventError {
    Json(String),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(err) => write!(f, "frontend event json: {err}"),
        }
    }
}

impl Error for EventError {}

pub fn encode_event(event: &FrontendEvent) -> Result<String, EventError> {
    facet_json::to_string(event).map_err(|e| EventError::Json(e.to_string()))
}

pub fn decode_event(json: &str) -> Result<FrontendEvent, EventError> {
    facet_json::from_str(json).map_err(|e| EventError::Json(e.to_string()))
}

/// Receiver of agent events.
pub trait Frontend: Send {
    fn dispatch(&mut self, event: FrontendEvent);
}

impl Frontend for mpsc::Sender<FrontendEvent> {
    fn dispatch(&mut self, event: FrontendEvent) {
        if let Err(mpsc::SendError(event)) = self.send(event) {
            debug!(event = ?event, "frontend disconnected, event dropped");
        }
    }
}
