//! Entry nodes and their auxiliary records.
//!
//! An [`Entry`] is one node of the editable sequence: a real instruction, or one of the
//! structural markers that make branch destinations, exception regions and debug positions
//! explicit so that nothing in the sequence depends on addresses. Cross-references between
//! entries ([`BranchTarget::src`], [`TryMark::catch_start`], [`CatchEntry::next`]) are plain
//! [`EntryId`] handles into the owning sequence's arena, which stay valid across insertion
//! and removal.

use std::fmt;

use crate::instructions::{DexDebugInstruction, DexInstruction, SourcePosition};
use crate::ir::EntryId;
use crate::method::TypeId;

/// Whether a try marker opens or closes its protected region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryKind {
    /// First entry of the protected region.
    Start,
    /// Entry just past the protected region.
    End,
}

impl fmt::Display for TryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryKind::Start => write!(f, "TRY_START"),
            TryKind::End => write!(f, "TRY_END"),
        }
    }
}

/// Marks one end of an exception-protected region.
///
/// Both the start and the end marker of a region reference the same `catch_start` - the head
/// of the region's catch chain - which is how sync pairs them back up. The reference is
/// always populated; a try region without handlers cannot exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryMark {
    /// Start or end of the region.
    pub kind: TryKind,
    /// Head of the catch chain handling this region.
    pub catch_start: EntryId,
}

impl TryMark {
    /// Creates a try marker referencing its catch-chain head.
    #[must_use]
    pub fn new(kind: TryKind, catch_start: EntryId) -> Self {
        Self { kind, catch_start }
    }
}

/// A catch-handler entry point.
///
/// Handlers for one region form a chain through `next`, tried in order; `next` is `None`
/// exactly for the terminal handler of the chain (the last typed handler, or the catch-all).
/// `exception` is `None` exactly for a catch-all handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchEntry {
    /// Exception type matched, or `None` for a catch-all.
    pub exception: Option<TypeId>,
    /// Next handler tried for the same region, or `None` for the terminal handler.
    pub next: Option<EntryId>,
}

impl CatchEntry {
    /// Creates a handler record with no successor; chains are linked up afterwards.
    #[must_use]
    pub fn new(exception: Option<TypeId>) -> Self {
        Self { exception, next: None }
    }
}

/// Whether a branch target is the destination of a single-target branch or one case of a
/// switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// Destination of a goto or conditional branch.
    Simple,
    /// One case of a packed/sparse switch; `index` is the position in the payload table,
    /// which is what recovers the correct case value at re-encoding time.
    Multi {
        /// Case position in the switch payload.
        index: u32,
    },
}

/// An explicit branch destination.
///
/// The entry sits at the destination; `src` references (but does not own) the branch or
/// switch instruction entry it belongs to. Re-encoding computes the distance from `src` to
/// this entry and writes it into the instruction, which is why nothing needs to track
/// offsets while the sequence is being mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchTarget {
    /// Single-target or switch-case destination.
    pub kind: BranchKind,
    /// The branch instruction entry this destination belongs to.
    pub src: EntryId,
}

impl BranchTarget {
    /// Creates a simple (single-target) destination for `src`.
    #[must_use]
    pub fn simple(src: EntryId) -> Self {
        Self { kind: BranchKind::Simple, src }
    }

    /// Creates a switch-case destination for case `index` of `src`.
    #[must_use]
    pub fn multi(src: EntryId, index: u32) -> Self {
        Self { kind: BranchKind::Multi { index }, src }
    }
}

/// One node of the editable sequence.
///
/// The seven kinds mirror everything a position-addressed method body encodes implicitly:
/// instructions, branch destinations, exception region bounds and handler entry points,
/// debug records, and [`Entry::Fallthrough`] - a structural anchor for positions that are
/// not otherwise addressable, such as the very start of a method or a synthetic block
/// boundary created by the structured-code builders.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Start or end of an exception-protected region.
    Try(TryMark),
    /// A catch-handler entry point.
    Catch(CatchEntry),
    /// An owned raw instruction.
    Opcode(DexInstruction),
    /// An explicit branch destination.
    Target(BranchTarget),
    /// An owned debug-info instruction.
    Debug(DexDebugInstruction),
    /// An owned source-position marker.
    Position(SourcePosition),
    /// A structural anchor with no payload.
    Fallthrough,
}

impl Entry {
    /// Returns the instruction payload, if this is an opcode entry.
    #[must_use]
    pub fn opcode(&self) -> Option<&DexInstruction> {
        match self {
            Entry::Opcode(insn) => Some(insn),
            _ => None,
        }
    }

    /// Returns the instruction payload mutably, if this is an opcode entry.
    pub fn opcode_mut(&mut self) -> Option<&mut DexInstruction> {
        match self {
            Entry::Opcode(insn) => Some(insn),
            _ => None,
        }
    }

    /// Returns the catch record, if this is a catch entry.
    #[must_use]
    pub fn catch(&self) -> Option<&CatchEntry> {
        match self {
            Entry::Catch(centry) => Some(centry),
            _ => None,
        }
    }

    /// Returns the branch-target record, if this is a target entry.
    #[must_use]
    pub fn target(&self) -> Option<&BranchTarget> {
        match self {
            Entry::Target(target) => Some(target),
            _ => None,
        }
    }

    /// Returns the width this entry contributes to the encoded method, in code units.
    ///
    /// Only opcode entries occupy space; every marker kind is zero-width and resolves to the
    /// address of whatever instruction follows it.
    #[must_use]
    pub fn width(&self) -> u32 {
        match self {
            Entry::Opcode(insn) => insn.width(),
            _ => 0,
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Try(mark) => write!(f, "{} (catch {})", mark.kind, mark.catch_start),
            Entry::Catch(centry) => match centry.exception {
                Some(exception) => write!(f, "CATCH {exception}"),
                None => write!(f, "CATCH <all>"),
            },
            Entry::Opcode(insn) => write!(f, "{insn}"),
            Entry::Target(target) => match target.kind {
                BranchKind::Simple => write!(f, "TARGET <- {}", target.src),
                BranchKind::Multi { index } => {
                    write!(f, "TARGET case {} <- {}", index, target.src)
                }
            },
            Entry::Debug(op) => write!(f, "DEBUG 0x{:02x}", op.opcode()),
            Entry::Position(pos) => write!(f, "POSITION line {}", pos.line()),
            Entry::Fallthrough => write!(f, "FALLTHROUGH"),
        }
    }
}
