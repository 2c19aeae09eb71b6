//! The editable instruction sequence and the per-method transform session.
//!
//! This is the core of the crate. A raw Dalvik method body addresses everything by position;
//! [`MethodTransform::get`] *balloons* it into a [`Sequence`] of [`Entry`] nodes in which
//! branch destinations, exception-region bounds and debug positions are explicit, so that
//! optimization passes can insert, remove and replace instructions without any offset
//! bookkeeping. [`MethodTransform::sync`] runs the reverse direction: a fixed-point
//! relaxation loop that assigns addresses, widens goto encodings until every branch offset
//! fits, regenerates switch payloads, rebuilds the exception table and writes the raw body
//! back.
//!
//! # Key Types
//! - [`Entry`] - The seven-kind tagged node
//! - [`Sequence`] / [`EntryId`] - The owning container and its stable handles
//! - [`MethodTransform`] - The per-method session with its process-wide cache
//! - [`MethodTransformer`] - Scoped guard guaranteeing sync on every exit path
//!
//! # Example
//!
//! ```rust
//! use dexscope::prelude::*;
//!
//! let body = MethodBody::new(1, 0, 0, vec![
//!     DexInstruction::new(Opcode::Nop),
//!     DexInstruction::new(Opcode::ReturnVoid),
//! ]);
//! let method = Method::new(MethodId::new(0x0200), "demo", Some(body));
//!
//! let transform = MethodTransform::get(&method, false)?;
//! {
//!     let mut transform = transform.lock();
//!     // Drop the nop.
//!     let nop = transform
//!         .sequence()
//!         .iter()
//!         .find(|(_, e)| e.opcode().map(|i| i.opcode()) == Some(Opcode::Nop))
//!         .map(|(id, _)| id)
//!         .unwrap();
//!     transform.remove_opcode(nop);
//!     transform.sync();
//! }
//! assert_eq!(method.body_ref().as_ref().unwrap().instructions().len(), 1);
//! # Ok::<(), dexscope::Error>(())
//! ```

mod balloon;
mod entry;
mod sequence;
mod sync;
mod transform;

pub use entry::{BranchKind, BranchTarget, CatchEntry, Entry, TryKind, TryMark};
pub use sequence::{EntryId, Iter, Sequence};
pub use transform::{IfElseBlock, MethodTransform, MethodTransformer, TransformRc};
