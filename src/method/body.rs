//! Raw method bodies.
//!
//! A [`MethodBody`] is the position-addressed form of a method: the instruction array (with
//! payload pseudo-instructions in place), the exception table, and the debug list, all of
//! which encode addresses in 16-bit code units. This is what ballooning consumes and what
//! sync produces.

use crate::instructions::{DexDebugInstruction, DexInstruction, SourcePosition};
use crate::method::TryItem;

/// One raw debug record: either a debug-info instruction or a source position.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugRecord {
    /// A debug state-machine instruction, carried through opaquely.
    Instruction(DexDebugInstruction),
    /// A source-position marker.
    Position(SourcePosition),
}

/// A debug record pinned to a code-unit address.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugItem {
    /// Code-unit address the record applies to.
    pub addr: u32,
    /// The record itself.
    pub record: DebugRecord,
}

/// The raw, position-addressed body of a method.
///
/// # Register layout
///
/// Dalvik frames place the `ins` parameter registers at the *top* of the frame: a method with
/// `registers` total registers and `ins` parameters receives its arguments in registers
/// `registers - ins .. registers`. The inliner depends on this to map callee parameters onto
/// the invoke's argument registers.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    registers: u16,
    ins: u16,
    outs: u16,
    instructions: Vec<DexInstruction>,
    tries: Vec<TryItem>,
    debug: Vec<DebugItem>,
}

impl MethodBody {
    /// Creates a body with the given register sizes and instruction array, and no exception
    /// table or debug list.
    #[must_use]
    pub fn new(
        registers: u16,
        ins: u16,
        outs: u16,
        instructions: Vec<DexInstruction>,
    ) -> Self {
        Self {
            registers,
            ins,
            outs,
            instructions,
            tries: Vec::new(),
            debug: Vec::new(),
        }
    }

    /// Attaches an exception table.
    #[must_use]
    pub fn with_tries(mut self, tries: Vec<TryItem>) -> Self {
        self.tries = tries;
        self
    }

    /// Attaches a debug list.
    #[must_use]
    pub fn with_debug(mut self, debug: Vec<DebugItem>) -> Self {
        self.debug = debug;
        self
    }

    /// Returns the total frame size in registers.
    #[must_use]
    pub fn registers(&self) -> u16 {
        self.registers
    }

    /// Returns the number of parameter registers (at the top of the frame).
    #[must_use]
    pub fn ins(&self) -> u16 {
        self.ins
    }

    /// Returns the outgoing-argument register count.
    #[must_use]
    pub fn outs(&self) -> u16 {
        self.outs
    }

    /// Returns the raw instruction array, payload pseudo-instructions included.
    #[must_use]
    pub fn instructions(&self) -> &[DexInstruction] {
        &self.instructions
    }

    /// Returns the exception table.
    #[must_use]
    pub fn tries(&self) -> &[TryItem] {
        &self.tries
    }

    /// Returns the debug list.
    #[must_use]
    pub fn debug(&self) -> &[DebugItem] {
        &self.debug
    }

    /// Returns the total code size in 16-bit code units.
    #[must_use]
    pub fn code_units(&self) -> u32 {
        self.instructions.iter().map(DexInstruction::width).sum()
    }
}
