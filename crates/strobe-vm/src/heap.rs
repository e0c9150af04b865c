use std::collections::{HashMap, HashSet};

use strobe_types::{CellAddress, EncodedValue, ExecutableId, ExecutableKind, Value};

use crate::vm::RootVisitor;

pub const BLOCK_SIZE: u64 = 16 * 1024;
pub const CELL_SIZE: u64 = 64;

const HEAP_BASE: u64 = 0x10_0000_0000;

/// One-word filter over block addresses. A negative answer is exact, a
/// positive one only means "maybe".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TinyBloomFilter {
    bits: u64,
}

impl TinyBloomFilter {
    pub fn add(&mut self, bits: u64) {
        self.bits |= bits;
    }

    pub fn rule_out(&self, bits: u64) -> bool {
        bits == 0 || (bits & self.bits) != bits
    }

    pub fn reset(&mut self) {
        self.bits = 0;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellKind {
    /// A managed function object. A function whose executable is absent
    /// wraps code the engine cannot attribute to a source executable.
    Function { executable: Option<ExecutableId> },
    HostFunction,
    /// Any other object; `host_callable` when it carries host call data.
    Object { host_callable: bool },
}

#[derive(Clone, Debug)]
pub struct Cell {
    address: CellAddress,
    kind: CellKind,
}

impl Cell {
    pub fn address(&self) -> CellAddress {
        self.address
    }

    pub fn kind(&self) -> &CellKind {
        &self.kind
    }
}

#[derive(Clone, Debug)]
pub struct Executable {
    id: ExecutableId,
    kind: ExecutableKind,
}

impl Executable {
    pub fn id(&self) -> ExecutableId {
        self.id
    }

    pub fn kind(&self) -> &ExecutableKind {
        &self.kind
    }
}

/// Mark set built during a collection.
#[derive(Debug, Default)]
pub struct Marks {
    cells: HashSet<CellAddress>,
    executables: HashSet<ExecutableId>,
}

impl Marks {
    pub fn is_marked_executable(&self, id: ExecutableId) -> bool {
        self.executables.contains(&id)
    }

    pub fn is_marked_cell(&self, address: CellAddress) -> bool {
        self.cells.contains(&address)
    }
}

impl RootVisitor for Marks {
    fn visit_executable(&mut self, id: ExecutableId) {
        self.executables.insert(id);
    }

    fn visit_value(&mut self, value: EncodedValue) {
        if let Value::Cell(address) = value.decode() {
            self.cells.insert(address);
        }
    }
}

#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub freed_cells: usize,
    pub freed_executables: HashSet<ExecutableId>,
}

/// Object registry of the collector.
///
/// Cell addresses are never reused, so a stale reference can only ever
/// resolve to "not live".
#[derive(Debug)]
pub struct Heap {
    next_cell: u64,
    next_executable: u64,
    filter: TinyBloomFilter,
    blocks: HashSet<u64>,
    cells: HashMap<CellAddress, Cell>,
    executables: HashMap<ExecutableId, Executable>,
    pinned: HashMap<CellAddress, usize>,
    pinned_executables: HashMap<ExecutableId, usize>,
}

impl Default for Heap {
    fn default() -> Self {
        Self {
            next_cell: HEAP_BASE,
            next_executable: 1,
            filter: TinyBloomFilter::default(),
            blocks: HashSet::new(),
            cells: HashMap::new(),
            executables: HashMap::new(),
            pinned: HashMap::new(),
            pinned_executables: HashMap::new(),
        }
    }
}

impl Heap {
    pub(crate) fn allocate_cell(&mut self, kind: CellKind) -> CellAddress {
        let address = CellAddress::new(self.next_cell);
        self.next_cell += CELL_SIZE;
        let block = address.block_base(BLOCK_SIZE);
        if self.blocks.insert(block) {
            self.filter.add(block);
        }
        self.cells.insert(address, Cell { address, kind });
        address
    }

    pub(crate) fn create_executable(&mut self, kind: ExecutableKind) -> ExecutableId {
        let id = ExecutableId::new(self.next_executable)
            .expect("invariant violated: executable ids start at 1");
        self.next_executable += 1;
        self.executables.insert(id, Executable { id, kind });
        id
    }

    pub fn executable(&self, id: ExecutableId) -> Option<&Executable> {
        self.executables.get(&id)
    }

    pub fn contains_executable(&self, id: ExecutableId) -> bool {
        self.executables.contains_key(&id)
    }

    pub fn executable_count(&self) -> usize {
        self.executables.len()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Conservative membership probe: filter, then block set, then the exact
    /// cell. Anything that is not a live cell yields `None`.
    pub fn live_cell(&self, value: EncodedValue) -> Option<&Cell> {
        let Value::Cell(address) = value.decode() else {
            return None;
        };
        let block = address.block_base(BLOCK_SIZE);
        if self.filter.rule_out(block) || !self.blocks.contains(&block) {
            return None;
        }
        self.cells.get(&address)
    }

    pub(crate) fn pin(&mut self, address: CellAddress) {
        *self.pinned.entry(address).or_default() += 1;
    }

    pub(crate) fn unpin(&mut self, address: CellAddress) {
        if let Some(count) = self.pinned.get_mut(&address) {
            *count -= 1;
            if *count == 0 {
                self.pinned.remove(&address);
            }
        }
    }

    pub(crate) fn pin_executable(&mut self, id: ExecutableId) {
        *self.pinned_executables.entry(id).or_default() += 1;
    }

    pub(crate) fn unpin_executable(&mut self, id: ExecutableId) {
        if let Some(count) = self.pinned_executables.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                self.pinned_executables.remove(&id);
            }
        }
    }

    pub(crate) fn visit_pinned(&self, visitor: &mut dyn RootVisitor) {
        for address in self.pinned.keys() {
            visitor.visit_value(EncodedValue::from_cell(*address));
        }
        for id in self.pinned_executables.keys() {
            visitor.visit_executable(*id);
        }
    }

    /// Extends `marks` with everything reachable from already-marked cells.
    pub(crate) fn trace(&self, marks: &mut Marks) {
        marks.cells.retain(|address| self.cells.contains_key(address));
        for address in &marks.cells {
            if let Some(Cell {
                kind: CellKind::Function {
                    executable: Some(executable),
                },
                ..
            }) = self.cells.get(address)
            {
                marks.executables.insert(*executable);
            }
        }
    }

    pub(crate) fn sweep(&mut self, marks: &Marks) -> SweepOutcome {
        let before = self.cells.len();
        self.cells.retain(|address, _| marks.cells.contains(address));
        let freed_executables = self
            .executables
            .keys()
            .filter(|id| !marks.executables.contains(id))
            .copied()
            .collect::<HashSet<_>>();
        self.executables
            .retain(|id, _| marks.executables.contains(id));
        SweepOutcome {
            freed_cells: before - self.cells.len(),
            freed_executables,
        }
    }
}
