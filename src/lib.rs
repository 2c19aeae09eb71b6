// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # dexscope
//!
//! A mutable intermediate representation for Dalvik bytecode-to-bytecode optimization.
//!
//! Dalvik instructions address one another by position: branch offsets, switch payload tables
//! and the exception table all encode distances in 16-bit code units. That makes the raw
//! instruction array hostile to modification - inserting a single instruction invalidates every
//! offset that crosses it. `dexscope` solves this by *ballooning* the raw array into an editable
//! linked sequence in which branch destinations, exception regions and debug positions are
//! explicit entries rather than encoded distances. Optimization passes mutate the sequence
//! freely, and *syncing* re-encodes it into valid position-addressed bytecode, widening branch
//! encodings as needed until every offset fits (branch relaxation) and rebuilding the exception
//! table from the resolved addresses.
//!
//! ## Features
//!
//! - **Balloon / sync round-trip** - decode raw instructions into an address-independent
//!   sequence, re-encode with a fixed-point branch-relaxation loop
//! - **O(1) sequence editing** - arena-backed doubly-linked entries with stable handles that
//!   survive insertion and removal
//! - **Control flow analysis** - basic block partition with fall-through, branch, switch and
//!   per-handler exception edges, plus postorder traversal
//! - **Register liveness** - backward dataflow over the sequence, memoized per instruction
//! - **Tail-call inlining** - callee splicing with register remapping, including a
//!   liveness-driven variant that keeps the caller within the 16-register budget required for
//!   the compact 4-bit register encodings
//!
//! ## Quick Start
//!
//! ```rust
//! use dexscope::prelude::*;
//!
//! // A trivial method body: return-void
//! let body = MethodBody::new(1, 0, 0, vec![DexInstruction::new(Opcode::ReturnVoid)]);
//! let method = Method::new(MethodId::new(0x0100), "noop", Some(body));
//!
//! // Balloon it, mutate it, write it back.
//! let transform = MethodTransform::get(&method, false)?;
//! {
//!     let mut transform = transform.lock();
//!     transform.push_back(DexInstruction::new(Opcode::Nop));
//!     transform.sync();
//! }
//! assert_eq!(method.body_ref().as_ref().unwrap().instructions().len(), 2);
//! # Ok::<(), dexscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `dexscope` is organized into several key modules:
//!
//! - [`prelude`] - Convenient re-exports of commonly used types
//! - [`instructions`] - The raw Dalvik instruction model: opcodes, encoding widths,
//!   classification flags, debug records
//! - [`method`] - Method identity, bodies, and the raw exception table
//! - [`ir`] - The editable entry sequence, ballooning, syncing, and the per-method transform
//!   session with its process-wide cache
//! - [`analysis`] - Basic block partition, postorder traversal, register liveness
//! - [`inline`] - The tail-call inliner and its liveness-cached context
//! - [`Error`] and [`Result`] - Error handling for malformed external input
//!
//! ## Scope
//!
//! This crate is the IR layer only. Parsing and writing the dex container format, general
//! register allocation, and pass scheduling live in other components; `dexscope` consumes raw
//! instruction and debug objects through [`method::MethodBody`] and produces them back through
//! the same surface.
//!
//! ## Error Handling
//!
//! Malformed *input* (broken branch targets, out-of-range exception regions, missing switch
//! payloads) is reported through [`Result<T, Error>`](Result). Malformed *sequences* - damage
//! done by an optimization pass, such as a dangling branch source or an unterminated try
//! region - are programmer errors and fail fast with a panic; see the `# Panics` sections
//! throughout [`ir`].
//!
//! ## Thread Safety
//!
//! The process-wide transform cache serializes lookup and insertion across threads. The
//! transforms themselves are *not* meant for concurrent mutation: a given method's transform
//! must have one logical owner at a time, and [`ir::MethodTransform::sync_all`] is a barrier to
//! be invoked once after all passes have finished. See [`ir::MethodTransform::get`].

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
///
/// This module provides a curated selection of the most frequently used types
/// from across the dexscope library, allowing for convenient glob imports.
///
/// # Example
///
/// ```rust
/// use dexscope::prelude::*;
///
/// let body = MethodBody::new(1, 0, 0, vec![DexInstruction::new(Opcode::ReturnVoid)]);
/// let method = Method::new(MethodId::new(0x0100), "noop", Some(body));
/// let transform = MethodTransform::get(&method, false)?;
/// # Ok::<(), dexscope::Error>(())
/// ```
pub mod prelude;

/// The raw Dalvik instruction model.
///
/// Defines the opcode subset the IR operates on, per-opcode encoding formats and widths in
/// 16-bit code units, the static classification table (branch shape, may-throw, returns) that
/// control-flow analysis reads, and the owned instruction, switch payload and debug-info
/// records that flow through the sequence.
///
/// # Key Types
///
/// - [`instructions::Opcode`] - The opcode enumeration with classification queries
/// - [`instructions::DexInstruction`] - An owned raw instruction
/// - [`instructions::SwitchPayload`] - Case keys and targets for packed/sparse switches
/// - [`instructions::DexDebugInstruction`] / [`instructions::SourcePosition`] - Opaque debug
///   records carried through the IR unchanged
pub mod instructions;

/// Method identity and raw method bodies.
///
/// The stable interface between the IR and the container layer: a [`method::Method`] couples a
/// token-like [`method::MethodId`] with an optional [`method::MethodBody`] holding the raw
/// instruction array, the exception table and the debug list. Ballooning reads this surface and
/// syncing writes it back.
pub mod method;

/// The editable instruction sequence and the per-method transform session.
///
/// The core of the crate: [`ir::Sequence`] is an arena-backed, doubly-linked, owning list of
/// [`ir::Entry`] nodes; [`ir::MethodTransform`] balloons a method into a sequence, hosts
/// mutation, and syncs the sequence back into position-addressed raw instructions through a
/// branch-relaxation fixed point.
///
/// # Key Types
///
/// - [`ir::Entry`] - The seven-kind tagged node (try markers, catches, opcodes, branch
///   targets, debug, positions, fallthrough anchors)
/// - [`ir::Sequence`] - The owning container with stable [`ir::EntryId`] handles
/// - [`ir::MethodTransform`] - The per-method session and process-wide cache
/// - [`ir::MethodTransformer`] - Scoped guard that guarantees sync on every exit path
pub mod ir;

/// Control-flow and dataflow analyses over the sequence.
///
/// Derived, pull-based views: the basic [`analysis::Block`] partition (with fall-through,
/// branch, switch and per-handler exception edges), postorder traversal, and backward register
/// liveness. All of these are invalidated by sequence mutation and must be rebuilt by the
/// caller before being relied on again.
pub mod analysis;

/// Tail-call inlining.
///
/// [`inline::InlineContext`] scopes several inlines into one caller behind a sync-on-drop
/// guard and a memoized liveness map; [`inline::inline_tail_call`] performs the unconstrained
/// splice and [`inline::inline_16regs`] the 16-register-budget variant.
pub mod inline;

pub(crate) mod utils;

/// `dexscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `dexscope` Error type
///
/// The main error type for all operations in this crate. Reports malformed raw input; the
/// variant docs spell out the full taxonomy and what is asserted fatally instead of reported.
pub use error::Error;
