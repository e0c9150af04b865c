use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;

use strobe_types::{CallSiteIndex, CodeBlockId, ExecutableId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JitTier {
    Interpreter,
    Baseline,
    Optimizing,
}

/// One compiled form of an executable.
#[derive(Clone, Debug)]
pub struct CodeBlock {
    id: CodeBlockId,
    owner: ExecutableId,
    tier: JitTier,
    /// Executables inlined at a call site, innermost first.
    inline_origins: BTreeMap<CallSiteIndex, Vec<ExecutableId>>,
    /// Machine-code range in executable memory; `None` for interpreted blocks.
    region: Option<Range<u64>>,
}

impl CodeBlock {
    pub(crate) fn new(
        id: CodeBlockId,
        owner: ExecutableId,
        tier: JitTier,
        inline_origins: BTreeMap<CallSiteIndex, Vec<ExecutableId>>,
        region: Option<Range<u64>>,
    ) -> Self {
        Self {
            id,
            owner,
            tier,
            inline_origins,
            region,
        }
    }

    pub fn id(&self) -> CodeBlockId {
        self.id
    }

    pub fn owner(&self) -> ExecutableId {
        self.owner
    }

    pub fn tier(&self) -> JitTier {
        self.tier
    }

    pub fn region(&self) -> Option<&Range<u64>> {
        self.region.as_ref()
    }

    pub fn has_code_origins(&self) -> bool {
        !self.inline_origins.is_empty()
    }

    /// Inlined executables at `site`, innermost first; empty if nothing was inlined there.
    pub fn inline_chain(&self, site: CallSiteIndex) -> &[ExecutableId] {
        self.inline_origins
            .get(&site)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn inlined_executables(&self) -> impl Iterator<Item = ExecutableId> + '_ {
        self.inline_origins.values().flatten().copied()
    }
}

/// Registry of live compiled code blocks.
#[derive(Debug, Default)]
pub struct CodeRegistry {
    blocks: HashMap<CodeBlockId, CodeBlock>,
}

impl CodeRegistry {
    pub(crate) fn register(&mut self, block: CodeBlock) {
        self.blocks.insert(block.id, block);
    }

    pub fn contains(&self, id: CodeBlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    pub fn get(&self, id: CodeBlockId) -> Option<&CodeBlock> {
        self.blocks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub(crate) fn unregister(&mut self, id: CodeBlockId) -> Option<CodeBlock> {
        self.blocks.remove(&id)
    }

    /// Drops every block owned by one of `owners`, or inlining one of them.
    pub(crate) fn unregister_referencing(
        &mut self,
        owners: &HashSet<ExecutableId>,
    ) -> Vec<CodeBlock> {
        let doomed: Vec<CodeBlockId> = self
            .blocks
            .values()
            .filter(|block| {
                owners.contains(&block.owner)
                    || block.inlined_executables().any(|exec| owners.contains(&exec))
            })
            .map(|block| block.id)
            .collect();
        doomed
            .into_iter()
            .filter_map(|id| self.blocks.remove(&id))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CodeBlock> {
        self.blocks.values()
    }
}
