//! Value types shared by the engine model, the sampler and the inspector agent.

use facet::Facet;
use std::error::Error;
use std::fmt;

mod frame;
mod report;
mod value;

pub use frame::{ExecutableKind, StackFrame, StackTrace};
pub use report::{Report, ReportError, TraceLabels, labels};
pub use value::{CellAddress, EncodedValue, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    ZeroId(&'static str),
    EmptyField(&'static str),
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroId(field) => write!(f, "{field} must be non-zero"),
            Self::EmptyField(field) => write!(f, "{field} must be non-empty"),
        }
    }
}

impl Error for InvariantError {}

macro_rules! nonzero_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Facet, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[facet(transparent)]
        pub struct $name(u64);

        impl $name {
            pub fn new(value: u64) -> Result<Self, InvariantError> {
                if value == 0 {
                    return Err(InvariantError::ZeroId($field));
                }
                Ok(Self(value))
            }

            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $field, self.0)
            }
        }
    };
}

nonzero_id!(
    /// Identity of an executable (function body, program, eval or module code).
    ///
    /// Stays valid while the collector considers the executable reachable.
    ExecutableId,
    "executable_id"
);
nonzero_id!(
    /// Identity of one compiled code block registered with the engine.
    CodeBlockId,
    "code_block_id"
);
nonzero_id!(MachineThreadId, "machine_thread_id");

/// Address of one activation record on a machine stack. Zero is the root sentinel.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[facet(transparent)]
pub struct FramePointer(u64);

impl FramePointer {
    pub const NULL: Self = Self(0);

    pub const fn new(address: u64) -> Self {
        Self(address)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FramePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[facet(transparent)]
pub struct InstructionPointer(u64);

impl InstructionPointer {
    pub const fn new(address: u64) -> Self {
        Self(address)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstructionPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Index of a call site inside a compiled code block, used to find inline origins.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[facet(transparent)]
pub struct CallSiteIndex(u32);

impl CallSiteIndex {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

/// The only register state the sampler reads from a suspended thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Registers {
    pub frame_pointer: FramePointer,
    pub instruction_pointer: InstructionPointer,
}
