//! Method identity and raw method bodies.
//!
//! This module is the stable boundary between the IR and the container layer: a [`Method`]
//! couples a token-like [`MethodId`] with an optional [`MethodBody`] holding the raw
//! instruction array, the exception table and the debug list. Ballooning reads this surface;
//! syncing writes the re-encoded result back through it.

mod body;
mod exceptions;

pub use body::{DebugItem, DebugRecord, MethodBody};
pub use exceptions::{CatchHandler, TryItem};

use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};

/// A reference-counted method handle, the unit the transform cache is keyed by.
pub type MethodRc = Arc<Method>;

/// Identity of a method, as assigned by the container layer.
///
/// The value is opaque to the IR; it only needs to be cheap to copy, hash and compare, since
/// the process-wide transform cache is keyed by it and the contract is "at most one transform
/// per identity at a time".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodId(u32);

impl MethodId {
    /// Creates a method identity from its raw token value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        MethodId(value)
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for MethodId {
    fn from(value: u32) -> Self {
        MethodId(value)
    }
}

impl fmt::Debug for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodId(0x{:08x})", self.0)
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Identity of an exception type, used to compare catch handlers.
///
/// Supplied by the container layer's type system; the IR only ever compares these for
/// equality when reconstructing catch chains.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(u32);

impl TypeId {
    /// Creates a type identity from its raw token value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        TypeId(value)
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId(0x{:08x})", self.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// A method as seen by the IR layer: identity, a display name, and an optional body.
///
/// Abstract and native methods have no body. The body sits behind a lock because the sync
/// barrier may write distinct methods back from worker threads while unrelated readers
/// inspect others; mutation of a *given* method is still single-owner by contract (see
/// [`crate::ir::MethodTransform::get`]).
///
/// # Examples
///
/// ```rust
/// use dexscope::prelude::*;
///
/// let body = MethodBody::new(2, 1, 0, vec![
///     DexInstruction::new(Opcode::ReturnVoid),
/// ]);
/// let method = Method::new(MethodId::new(0x0042), "Widget.reset", Some(body));
/// assert_eq!(method.id(), MethodId::new(0x0042));
/// assert!(method.body_ref().is_some());
/// ```
pub struct Method {
    id: MethodId,
    name: String,
    body: RwLock<Option<MethodBody>>,
}

impl Method {
    /// Creates a method handle.
    ///
    /// # Arguments
    ///
    /// * `id` - The method identity the transform cache will key by
    /// * `name` - Human-readable name, used only for diagnostics
    /// * `body` - The raw body, or `None` for abstract/native methods
    #[must_use]
    pub fn new(id: MethodId, name: impl Into<String>, body: Option<MethodBody>) -> MethodRc {
        Arc::new(Method {
            id,
            name: name.into(),
            body: RwLock::new(body),
        })
    }

    /// Returns the method identity.
    #[must_use]
    pub fn id(&self) -> MethodId {
        self.id
    }

    /// Returns the diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a read guard over the raw body.
    #[must_use]
    pub fn body_ref(&self) -> RwLockReadGuard<'_, Option<MethodBody>> {
        self.body.read()
    }

    /// Replaces the raw body; sync uses this to write back re-encoded instructions.
    pub fn set_body(&self, body: Option<MethodBody>) {
        *self.body.write() = body;
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
