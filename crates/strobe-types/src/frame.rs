use crate::{EncodedValue, ExecutableId};

/// One entry of a captured stack trace.
///
/// Only `UnverifiedCallee` may change afterwards; every other state is final.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StackFrame {
    VerifiedExecutable(ExecutableId),
    /// Raw callee slot of a frame whose code block was not registered at walk time.
    UnverifiedCallee(EncodedValue),
    Host,
    Unknown,
}

impl StackFrame {
    /// Filler for pre-sized frame buffers.
    pub const EMPTY: Self = Self::Unknown;

    pub fn is_unverified(&self) -> bool {
        matches!(self, Self::UnverifiedCallee(_))
    }

    pub fn executable(&self) -> Option<ExecutableId> {
        match self {
            Self::VerifiedExecutable(id) => Some(*id),
            _ => None,
        }
    }

    /// Replaces an unverified entry with its resolution. Settled frames are left alone.
    pub fn settle(&mut self, resolved: StackFrame) -> bool {
        debug_assert!(
            !resolved.is_unverified(),
            "a frame can only settle into a verified, host or unknown state"
        );
        if !self.is_unverified() || resolved.is_unverified() {
            return false;
        }
        *self = resolved;
        true
    }
}

/// One captured stack, deepest frame first.
///
/// Frames can only change through [`StackTrace::settle_with`], and only while
/// the trace still needs verification.
#[derive(Clone, Debug, PartialEq)]
pub struct StackTrace {
    timestamp: f64,
    frames: Vec<StackFrame>,
    needs_verification: bool,
}

impl StackTrace {
    pub fn new(timestamp: f64, frames: Vec<StackFrame>, needs_verification: bool) -> Self {
        Self {
            timestamp,
            frames,
            needs_verification,
        }
    }

    /// Capture time in stopwatch seconds.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn needs_verification(&self) -> bool {
        self.needs_verification
    }

    /// Resolves every unverified frame with `resolve`, then clears the flag.
    /// Returns `false` without touching anything if already verified.
    pub fn settle_with(&mut self, mut resolve: impl FnMut(EncodedValue) -> StackFrame) -> bool {
        if !self.needs_verification {
            return false;
        }
        for frame in &mut self.frames {
            if let StackFrame::UnverifiedCallee(callee) = *frame {
                frame.settle(resolve(callee));
            }
        }
        self.needs_verification = false;
        true
    }
}

/// What kind of code an executable holds; drives the report label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutableKind {
    Function { inferred_name: String },
    Host,
    Eval,
    Program,
    Module,
}

impl ExecutableKind {
    pub fn function(name: impl Into<String>) -> Self {
        Self::Function {
            inferred_name: name.into(),
        }
    }

    pub fn anonymous_function() -> Self {
        Self::Function {
            inferred_name: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_frames_never_revert() {
        let exec = ExecutableId::new(3).expect("valid id");
        let mut frame = StackFrame::UnverifiedCallee(EncodedValue::from_bits(0x4000));
        assert!(frame.settle(StackFrame::VerifiedExecutable(exec)));
        assert_eq!(frame, StackFrame::VerifiedExecutable(exec));

        assert!(!frame.settle(StackFrame::Unknown));
        assert_eq!(frame.executable(), Some(exec));

        let mut host = StackFrame::Host;
        assert!(!host.settle(StackFrame::Unknown));
        assert_eq!(host, StackFrame::Host);
    }

    #[test]
    fn verified_traces_are_not_settled_twice() {
        let exec = ExecutableId::new(1).expect("valid id");
        let callee = EncodedValue::from_bits(0x8000);
        let mut trace = StackTrace::new(
            0.5,
            vec![
                StackFrame::VerifiedExecutable(exec),
                StackFrame::UnverifiedCallee(callee),
            ],
            true,
        );

        let mut calls = 0;
        assert!(trace.settle_with(|value| {
            calls += 1;
            assert_eq!(value, callee);
            StackFrame::Host
        }));
        assert_eq!(calls, 1, "only unverified frames are resolved");
        assert!(!trace.needs_verification());
        let settled = trace.clone();

        assert!(!trace.settle_with(|_| StackFrame::Unknown));
        assert_eq!(trace, settled, "a verified trace never changes");
    }
}
