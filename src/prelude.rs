//! # dexscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types from the
//! dexscope library. Import this module to get quick access to the essential types for
//! building and mutating method IR.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dexscope operations
pub use crate::Error;

/// The result type used throughout dexscope
pub use crate::Result;

// ================================================================================================
// Raw Instruction Model
// ================================================================================================

/// Owned raw instruction and its opcode/payload model
pub use crate::instructions::{DexInstruction, Format, Opcode, OpcodeFlags, SwitchPayload};

/// Opaque debug records carried through the IR
pub use crate::instructions::{DexDebugInstruction, SourcePosition};

// ================================================================================================
// Method Surface
// ================================================================================================

/// Method identity and raw body types
pub use crate::method::{
    CatchHandler, DebugItem, DebugRecord, Method, MethodBody, MethodId, MethodRc, TryItem, TypeId,
};

// ================================================================================================
// The Mutable IR
// ================================================================================================

/// Entry kinds and their auxiliary records
pub use crate::ir::{BranchKind, BranchTarget, CatchEntry, Entry, TryKind, TryMark};

/// The owning sequence and its stable handles
pub use crate::ir::{EntryId, Sequence};

/// The per-method transform session, its cache, and the scoped sync guard
pub use crate::ir::{MethodTransform, MethodTransformer, TransformRc};

// ================================================================================================
// Analyses
// ================================================================================================

/// Basic block partition and traversal
pub use crate::analysis::{Block, PostOrderSort};

/// Register liveness
pub use crate::analysis::{LivenessMap, RegisterSet};

// ================================================================================================
// Inlining
// ================================================================================================

/// Tail-call inlining entry points
pub use crate::inline::{inline_16regs, inline_tail_call, InlineContext};
