use strobe_types::{ExecutableKind, Report, StackFrame, TraceLabels, labels};
use strobe_vm::Heap;

use crate::store::TraceStore;

/// Display label of a settled frame. Raw addresses never leak into labels.
pub(crate) fn display_name(heap: &Heap, frame: &StackFrame) -> String {
    match frame {
        StackFrame::Unknown => labels::UNKNOWN.to_string(),
        StackFrame::Host => labels::HOST.to_string(),
        StackFrame::UnverifiedCallee(_) => {
            debug_assert!(false, "frames are verified before they are reported");
            labels::UNKNOWN.to_string()
        }
        StackFrame::VerifiedExecutable(id) => match heap.executable(*id).map(|e| e.kind()) {
            None => labels::UNKNOWN.to_string(),
            Some(ExecutableKind::Host) => labels::HOST.to_string(),
            Some(ExecutableKind::Function { inferred_name }) if inferred_name.is_empty() => {
                labels::ANONYMOUS_FUNCTION.to_string()
            }
            Some(ExecutableKind::Function { inferred_name }) => inferred_name.clone(),
            Some(ExecutableKind::Eval) => labels::EVAL.to_string(),
            Some(ExecutableKind::Program) => labels::GLOBAL.to_string(),
            Some(ExecutableKind::Module) => labels::MODULE.to_string(),
        },
    }
}

pub(crate) fn build_report(store: &TraceStore, heap: &Heap) -> Report {
    Report(
        store
            .traces()
            .iter()
            .map(|trace| {
                TraceLabels(
                    trace
                        .frames()
                        .iter()
                        .map(|frame| display_name(heap, frame))
                        .collect(),
                )
            })
            .collect(),
    )
}
