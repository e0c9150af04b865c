use std::sync::Arc;
use std::thread::ThreadId;

use strobe_types::{FramePointer, MachineThreadId};

use crate::code::CodeRegistry;
use crate::stack::{CallFrame, MachineStack};
use crate::suspend::SuspendableThread;
use crate::vm::RootVisitor;

/// An OS thread that has attached to the engine.
#[derive(Clone)]
pub struct MachineThread {
    id: MachineThreadId,
    os_thread: ThreadId,
    name: String,
    stack: Arc<MachineStack>,
    control: Arc<dyn SuspendableThread>,
}

impl MachineThread {
    pub(crate) fn new(
        id: MachineThreadId,
        name: String,
        stack: Arc<MachineStack>,
        control: Arc<dyn SuspendableThread>,
    ) -> Self {
        Self {
            id,
            os_thread: std::thread::current().id(),
            name,
            stack,
            control,
        }
    }

    pub fn id(&self) -> MachineThreadId {
        self.id
    }

    pub fn os_thread(&self) -> ThreadId {
        self.os_thread
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stack(&self) -> &Arc<MachineStack> {
        &self.stack
    }

    pub fn control(&self) -> &Arc<dyn SuspendableThread> {
        &self.control
    }
}

impl std::fmt::Debug for MachineThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineThread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("stack", &self.stack)
            .finish_non_exhaustive()
    }
}

/// Registry of attached threads and their stack bounds.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: Vec<MachineThread>,
}

impl ThreadRegistry {
    pub(crate) fn add(&mut self, thread: MachineThread) {
        self.threads.push(thread);
    }

    pub(crate) fn remove(&mut self, id: MachineThreadId) -> Option<MachineThread> {
        let index = self.threads.iter().position(|t| t.id == id)?;
        Some(self.threads.swap_remove(index))
    }

    pub fn get(&self, id: MachineThreadId) -> Option<&MachineThread> {
        self.threads.iter().find(|t| t.id == id)
    }

    pub fn for_os_thread(&self, os_thread: ThreadId) -> Option<&MachineThread> {
        self.threads.iter().find(|t| t.os_thread == os_thread)
    }

    pub fn for_current_thread(&self) -> Option<&MachineThread> {
        self.for_os_thread(std::thread::current().id())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MachineThread> {
        self.threads.iter()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn stack_containing(&self, fp: FramePointer) -> Option<&MachineStack> {
        self.threads
            .iter()
            .map(|t| t.stack.as_ref())
            .find(|stack| stack.contains(fp))
    }

    /// Whether `fp` lies within some attached thread's `[limit, base]`.
    pub fn is_valid_frame_pointer(&self, fp: FramePointer) -> bool {
        self.stack_containing(fp).is_some()
    }

    pub fn read_frame(&self, fp: FramePointer) -> Option<CallFrame> {
        self.stack_containing(fp)?.read_frame(fp)
    }

    /// Reports every callee and every executable referenced by a live frame.
    pub(crate) fn visit_stack_roots(&self, code: &CodeRegistry, visitor: &mut dyn RootVisitor) {
        for thread in &self.threads {
            for frame in thread.stack.live_frames() {
                visitor.visit_value(frame.callee);
                let Some(block) = frame.code_block.and_then(|id| code.get(id)) else {
                    continue;
                };
                visitor.visit_executable(block.owner());
                for executable in block.inlined_executables() {
                    visitor.visit_executable(executable);
                }
            }
        }
    }
}
