use std::collections::BTreeSet;

use strobe_types::{ExecutableId, StackTrace};

/// Captured traces in capture order.
///
/// Append-only; traces before `next_to_verify` are never scanned again.
#[derive(Debug, Default)]
pub struct TraceStore {
    traces: Vec<StackTrace>,
    next_to_verify: usize,
}

impl TraceStore {
    pub fn push(&mut self, trace: StackTrace) {
        self.traces.push(trace);
    }

    pub fn traces(&self) -> &[StackTrace] {
        &self.traces
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn next_to_verify(&self) -> usize {
        self.next_to_verify
    }

    /// Traces appended since the last verification pass.
    pub(crate) fn unverified_tail(&mut self) -> &mut [StackTrace] {
        &mut self.traces[self.next_to_verify..]
    }

    pub(crate) fn mark_all_verified(&mut self) {
        self.next_to_verify = self.traces.len();
    }

    pub fn clear(&mut self) {
        self.traces.clear();
        self.next_to_verify = 0;
    }
}

/// Executables named by verified frames; reported to the collector as roots.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeenExecutables(BTreeSet<ExecutableId>);

impl SeenExecutables {
    pub fn insert(&mut self, id: ExecutableId) -> bool {
        self.0.insert(id)
    }

    pub fn contains(&self, id: ExecutableId) -> bool {
        self.0.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = ExecutableId> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}
