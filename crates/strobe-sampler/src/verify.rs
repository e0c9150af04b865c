use strobe_types::{EncodedValue, StackFrame};
use strobe_vm::{CellKind, Heap, LockRank, holds_lock_rank};

use crate::store::{SeenExecutables, TraceStore};

/// Settles an unverified callee now that the heap can be inspected.
pub(crate) fn classify_callee(heap: &Heap, callee: EncodedValue) -> StackFrame {
    let Some(cell) = heap.live_cell(callee) else {
        return StackFrame::Unknown;
    };
    match cell.kind() {
        CellKind::Function {
            executable: Some(id),
        } if heap.contains_executable(*id) => StackFrame::VerifiedExecutable(*id),
        CellKind::Function { .. } | CellKind::HostFunction => StackFrame::Host,
        CellKind::Object { host_callable: true } => StackFrame::Host,
        CellKind::Object {
            host_callable: false,
        } => StackFrame::Unknown,
    }
}

/// Resolves every trace appended since the previous pass. Returns how many
/// traces were settled.
///
/// Callers hold the profiler lock and the heap lock.
pub(crate) fn verify_pending(
    store: &mut TraceStore,
    seen: &mut SeenExecutables,
    heap: &Heap,
) -> usize {
    debug_assert!(holds_lock_rank(LockRank::Profiler));
    debug_assert!(holds_lock_rank(LockRank::Heap));

    let mut settled = 0;
    for trace in store.unverified_tail() {
        let changed = trace.settle_with(|callee| {
            let resolved = classify_callee(heap, callee);
            if let StackFrame::VerifiedExecutable(id) = resolved {
                seen.insert(id);
            }
            resolved
        });
        if changed {
            settled += 1;
        }
    }
    store.mark_all_verified();
    settled
}

#[cfg(test)]
mod tests {
    use super::*;
    use strobe_types::{ExecutableKind, StackTrace};
    use strobe_vm::{LockRank, RankedMutex, Vm, VmOptions};

    #[test]
    fn callee_classification() {
        let vm = Vm::new(VmOptions::default());
        let exec = vm.create_executable(ExecutableKind::function("f"));
        let function = vm.create_function(Some(exec));
        let bare = vm.create_function(None);
        let host = vm.create_host_function();
        let callable = vm.create_object(true);
        let plain = vm.create_object(false);

        let heap = vm.heap().lock();
        let classify = |cell| classify_callee(&heap, EncodedValue::from_cell(cell));
        assert_eq!(classify(function), StackFrame::VerifiedExecutable(exec));
        assert_eq!(classify(bare), StackFrame::Host);
        assert_eq!(classify(host), StackFrame::Host);
        assert_eq!(classify(callable), StackFrame::Host);
        assert_eq!(classify(plain), StackFrame::Unknown);
        assert_eq!(
            classify_callee(&heap, EncodedValue::from_int32(3)),
            StackFrame::Unknown
        );
        assert_eq!(
            classify_callee(&heap, EncodedValue::from_bits(0x7000_0000_0040)),
            StackFrame::Unknown
        );
    }

    #[test]
    fn dead_callee_becomes_unknown() {
        let vm = Vm::new(VmOptions::default());
        let exec = vm.create_executable(ExecutableKind::function("gone"));
        let function = vm.create_function(Some(exec));
        vm.release(function);
        vm.release_executable(exec);
        vm.collect_garbage();

        let heap = vm.heap().lock();
        assert_eq!(
            classify_callee(&heap, EncodedValue::from_cell(function)),
            StackFrame::Unknown
        );
    }

    #[test]
    fn verification_is_monotonic_and_fills_the_seen_set() {
        let vm = Vm::new(VmOptions::default());
        let exec = vm.create_executable(ExecutableKind::function("f"));
        let function = vm.create_function(Some(exec));
        let callee = EncodedValue::from_cell(function);

        let profiler_lock = RankedMutex::new(LockRank::Profiler, ());
        let _profiler = profiler_lock.lock();
        let heap = vm.heap().lock();

        let mut store = TraceStore::default();
        let mut seen = SeenExecutables::default();
        store.push(StackTrace::new(
            0.0,
            vec![StackFrame::UnverifiedCallee(callee), StackFrame::Host],
            true,
        ));
        store.push(StackTrace::new(0.1, vec![StackFrame::Unknown], false));

        assert_eq!(verify_pending(&mut store, &mut seen, &heap), 1);
        assert_eq!(store.next_to_verify(), 2);
        assert!(seen.contains(exec));
        assert_eq!(
            store.traces()[0].frames(),
            &[StackFrame::VerifiedExecutable(exec), StackFrame::Host]
        );

        let before: Vec<_> = store.traces().to_vec();
        assert_eq!(verify_pending(&mut store, &mut seen, &heap), 0);
        assert_eq!(store.traces(), before.as_slice(), "second pass is a no-op");

        store.push(StackTrace::new(
            0.2,
            vec![StackFrame::UnverifiedCallee(EncodedValue::from_int32(1))],
            true,
        ));
        assert_eq!(verify_pending(&mut store, &mut seen, &heap), 1);
        assert_eq!(store.traces()[2].frames(), &[StackFrame::Unknown]);
        assert_eq!(seen.len(), 1);
    }
}
