//! The raw Dalvik instruction model consumed and produced by the IR.
//!
//! This module defines the opcode subset the optimizer operates on, the per-opcode encoding
//! formats with their widths in 16-bit code units, the static classification table used by
//! control-flow analysis (branch shape, may-throw, returns), and the owned records that flow
//! through the IR: instructions, switch payloads, and opaque debug information.
//!
//! # Key Types
//! - [`Opcode`] - Opcode enumeration with classification queries
//! - [`Format`] - Encoding forms and their widths
//! - [`OpcodeFlags`] - Per-opcode property bits
//! - [`DexInstruction`] - An owned raw instruction
//! - [`SwitchPayload`] - Case keys and targets for packed/sparse switches
//! - [`DexDebugInstruction`] / [`SourcePosition`] - Debug records carried through unchanged

mod debug;
mod instruction;
mod opcodes;

pub use debug::{DexDebugInstruction, SourcePosition};
pub use instruction::{DexInstruction, SwitchPayload};
pub use opcodes::{Format, Opcode, OpcodeFlags};
