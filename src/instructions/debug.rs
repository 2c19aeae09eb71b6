//! Opaque debug records.
//!
//! Debug-info instructions and source positions are produced by the container layer and
//! carried through the IR unchanged; the only thing the IR does with them is keep them
//! anchored to the right instruction while the sequence is mutated, and re-address them when
//! the sequence is synced. Their internal structure is therefore deliberately minimal here.

/// A raw debug-info instruction (state-machine opcode plus operand words).
///
/// The IR never interprets the operands; it preserves them and rewrites only the address the
/// record is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexDebugInstruction {
    opcode: u8,
    operands: Vec<u32>,
}

impl DexDebugInstruction {
    /// Creates a debug instruction from its raw opcode and operands.
    #[must_use]
    pub fn new(opcode: u8, operands: Vec<u32>) -> Self {
        Self { opcode, operands }
    }

    /// Returns the raw debug opcode.
    #[must_use]
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Returns the raw operand words.
    #[must_use]
    pub fn operands(&self) -> &[u32] {
        &self.operands
    }
}

/// A source-position marker: the line (and optionally the source file) the following
/// instructions were compiled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    line: u32,
    source: Option<u32>,
}

impl SourcePosition {
    /// Creates a position marker for `line`, optionally naming a source-file pool index.
    #[must_use]
    pub fn new(line: u32, source: Option<u32>) -> Self {
        Self { line, source }
    }

    /// Returns the source line.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Returns the source-file pool index, if one was recorded.
    #[must_use]
    pub fn source(&self) -> Option<u32> {
        self.source
    }
}
