//! The per-method transform session and its process-wide cache.
//!
//! A [`MethodTransform`] owns exactly one ballooned [`Sequence`] for one method and, lazily,
//! one basic-block partition. Transforms live in a process-wide cache keyed by method
//! identity - at most one exists per method at a time - and are evicted when synced, so that
//! a later request balloons the freshly written body.

use std::sync::{Arc, OnceLock};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::analysis::{self, Block};
use crate::instructions::{DexInstruction, SwitchPayload};
use crate::ir::balloon::balloon;
use crate::ir::{BranchTarget, Entry, EntryId, Sequence};
use crate::method::{MethodId, MethodRc};
use crate::Result;

/// A shared handle to a cached transform.
///
/// The mutex exists because Rust requires synchronized interior mutability behind a shared
/// handle; it is *not* a license for concurrent mutation. The contract is that a given
/// method's transform has one logical owner at a time, so the lock is uncontended.
pub type TransformRc = Arc<Mutex<MethodTransform>>;

/// The process-wide method-identity to transform cache.
fn cache() -> &'static DashMap<MethodId, TransformRc> {
    static CACHE: OnceLock<DashMap<MethodId, TransformRc>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

/// Insertion anchors produced by [`MethodTransform::make_if_else_block`].
///
/// The emitted skeleton is, in sequence order:
///
/// ```text
/// [if-*]  [else_point]  ...else code...  [goto]  [then_point]  ...then code...  [join]
/// ```
///
/// `then_point` is the branch-taken destination, `else_point` the fall-through anchor, and
/// `join` the destination of the goto that ends the else path. Insert code with
/// [`MethodTransform::insert`] after the respective anchor.
#[derive(Debug, Clone, Copy)]
pub struct IfElseBlock {
    /// The conditional branch entry.
    pub branch: EntryId,
    /// Anchor after which the fall-through (else) code belongs.
    pub else_point: EntryId,
    /// Anchor after which the branch-taken (then) code belongs.
    pub then_point: EntryId,
    /// Anchor where both paths rejoin.
    pub join: EntryId,
}

/// The per-method transform session.
///
/// State machine per method identity: uncached, ballooned (sequence built), mutated by
/// passes, synced (written back and evicted from the cache). See the module documentation of
/// [`crate::ir`] for the full lifecycle and an example.
pub struct MethodTransform {
    method: MethodRc,
    sequence: Sequence,
    blocks: Vec<Block>,
    registers: u16,
    ins: u16,
    outs: u16,
}

impl MethodTransform {
    /// Returns the cached transform for `method`, ballooning the raw body on a miss.
    ///
    /// With `want_cfg` the basic-block partition is built (or rebuilt if empty) before the
    /// handle is returned, which makes the lookup slightly more expensive.
    ///
    /// # Thread Safety
    ///
    /// The cache map serializes lookup and insertion, nothing more: two threads requesting
    /// *different* methods can balloon concurrently, but the returned instance is not
    /// internally synchronized beyond the mutex on the handle, and concurrent passes must
    /// not mutate the same method's transform without external coordination. Partition work
    /// by method.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NoBody`] for a method without code and
    /// [`crate::Error::Malformed`] when the raw body does not decode.
    pub fn get(method: &MethodRc, want_cfg: bool) -> Result<TransformRc> {
        let transform = match cache().entry(method.id()) {
            MapEntry::Occupied(entry) => entry.get().clone(),
            MapEntry::Vacant(entry) => {
                let ballooned = balloon(method)?;
                let transform = Arc::new(Mutex::new(MethodTransform {
                    method: method.clone(),
                    sequence: ballooned.sequence,
                    blocks: Vec::new(),
                    registers: ballooned.registers,
                    ins: ballooned.ins,
                    outs: ballooned.outs,
                }));
                entry.insert(transform.clone());
                transform
            }
        };
        if want_cfg {
            let mut guard = transform.lock();
            if guard.blocks.is_empty() {
                guard.build_cfg();
            }
        }
        Ok(transform)
    }

    /// Creates a transform with an empty sequence for a freshly synthesized method.
    ///
    /// The sequence starts with a single fallthrough anchor (see
    /// [`MethodTransform::main_block`]); register sizes are taken from the method's body if
    /// it has one and are zero otherwise, to be raised by the caller as it emits code.
    ///
    /// # Panics
    ///
    /// Panics if a transform for this method is already cached - at most one instance per
    /// identity may exist.
    pub fn new_method(method: &MethodRc) -> TransformRc {
        let (registers, ins, outs) = match method.body_ref().as_ref() {
            Some(body) => (body.registers(), body.ins(), body.outs()),
            None => (0, 0, 0),
        };
        let mut sequence = Sequence::new();
        sequence.push_back(Entry::Fallthrough);
        let transform = Arc::new(Mutex::new(MethodTransform {
            method: method.clone(),
            sequence,
            blocks: Vec::new(),
            registers,
            ins,
            outs,
        }));
        match cache().entry(method.id()) {
            MapEntry::Occupied(_) => {
                panic!("transform for method {} already exists", method.id())
            }
            MapEntry::Vacant(entry) => {
                entry.insert(transform.clone());
            }
        }
        transform
    }

    /// Syncs every transform still in the cache and empties it.
    ///
    /// This is a barrier: call it once, after all passes across all methods have finished
    /// mutating, before any analysis that depends on raw bytecode. Methods are independent,
    /// so the write-backs run in parallel.
    pub fn sync_all() {
        let pending: Vec<TransformRc> = cache().iter().map(|entry| entry.value().clone()).collect();
        tracing::debug!(transforms = pending.len(), "syncing all cached transforms");
        pending.into_par_iter().for_each(|transform| transform.lock().sync());
    }

    /// Drops the cached transform for `id` without syncing it.
    pub(crate) fn evict(id: MethodId) {
        cache().remove(&id);
    }

    /// Returns the method this transform belongs to.
    #[must_use]
    pub fn method(&self) -> &MethodRc {
        &self.method
    }

    /// Returns the current frame size in registers.
    #[must_use]
    pub fn registers(&self) -> u16 {
        self.registers
    }

    /// Returns the parameter register count.
    #[must_use]
    pub fn ins(&self) -> u16 {
        self.ins
    }

    /// Returns the outgoing-argument register count.
    #[must_use]
    pub fn outs(&self) -> u16 {
        self.outs
    }

    /// Sets the frame size; used by passes that allocate or reclaim registers.
    pub fn set_registers(&mut self, registers: u16) {
        self.registers = registers;
    }

    /// Sets the outgoing-argument register count.
    pub fn set_outs(&mut self, outs: u16) {
        self.outs = outs;
    }

    /// Returns the sequence for iteration and inspection.
    #[must_use]
    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    /// Returns the sequence for direct structural mutation.
    ///
    /// Any mutation invalidates a previously built partition; rebuild with
    /// [`MethodTransform::build_cfg`] before using [`MethodTransform::cfg`] again.
    pub fn sequence_mut(&mut self) -> &mut Sequence {
        &mut self.sequence
    }

    /// Builds (or rebuilds) the basic-block partition over the current sequence.
    ///
    /// # Panics
    ///
    /// Panics if a branch target in the sequence references a detached source entry.
    pub fn build_cfg(&mut self) {
        self.blocks = analysis::partition(&self.sequence);
    }

    /// Returns the basic-block partition as last built.
    ///
    /// Empty until [`MethodTransform::build_cfg`] runs; stale after any sequence mutation.
    /// Dereferencing stale blocks is undefined in the same sense as the rest of the
    /// caller-invalidated contract - rebuild first.
    #[must_use]
    pub fn cfg(&self) -> &[Block] {
        &self.blocks
    }

    /// Appends an instruction at the end of the sequence, taking ownership of it.
    pub fn push_back(&mut self, insn: DexInstruction) -> EntryId {
        self.sequence.push_back(Entry::Opcode(insn))
    }

    /// Inserts instructions after `position`, or at the head for `None`.
    ///
    /// Ownership of the instructions passes to the sequence. The instructions keep their
    /// relative order.
    ///
    /// # Panics
    ///
    /// Panics if `position` identifies a removed entry.
    pub fn insert_after(&mut self, position: Option<EntryId>, opcodes: Vec<DexInstruction>) {
        let mut cursor = position;
        for insn in opcodes {
            let entry = Entry::Opcode(insn);
            cursor = Some(match cursor {
                Some(pos) => self.sequence.insert_after(pos, entry),
                None => self.sequence.push_front(entry),
            });
        }
    }

    /// Replaces the instruction behind `id`, taking ownership of `to` and dropping the old
    /// instruction.
    ///
    /// The entry identity is preserved, so `Target` entries referencing the instruction stay
    /// valid when a branch is replaced by a branch of the same shape. Replacing a branch or
    /// switch with a non-branch drops its now-orphaned target entries.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not identify an attached opcode entry.
    pub fn replace_opcode(&mut self, id: EntryId, to: DexInstruction) {
        let old = match self.sequence.entry(id) {
            Entry::Opcode(insn) => insn.opcode(),
            other => panic!("replace_opcode on non-opcode entry {other}"),
        };
        let old_targeted = old.is_branch() || old.is_switch();
        let new_targeted = to.opcode().is_branch() || to.opcode().is_switch();
        if old_targeted && !new_targeted {
            self.remove_targets_of(id);
        }
        *self.sequence.entry_mut(id) = Entry::Opcode(to);
    }

    /// Removes the instruction behind `id` and returns ownership of it.
    ///
    /// Removing a branch or switch also removes its target entries; the destinations become
    /// plain fall-through positions.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not identify an attached opcode entry.
    pub fn remove_opcode(&mut self, id: EntryId) -> DexInstruction {
        let opcode = match self.sequence.entry(id) {
            Entry::Opcode(insn) => insn.opcode(),
            other => panic!("remove_opcode on non-opcode entry {other}"),
        };
        if opcode.is_branch() || opcode.is_switch() {
            self.remove_targets_of(id);
        }
        match self.sequence.remove(id) {
            Entry::Opcode(insn) => insn,
            _ => unreachable!("entry kind checked above"),
        }
    }

    fn remove_targets_of(&mut self, src: EntryId) {
        let targets: Vec<EntryId> = self
            .sequence
            .iter()
            .filter(|(_, entry)| entry.target().is_some_and(|t| t.src == src))
            .map(|(id, _)| id)
            .collect();
        for target in targets {
            self.sequence.remove(target);
        }
    }

    /// Returns the head anchor of the method - the insertion point for prologue code.
    ///
    /// Ballooned and freshly created sequences start with a [`Entry::Fallthrough`] anchor;
    /// this returns it (or the first entry, if a pass removed the anchor).
    #[must_use]
    pub fn main_block(&self) -> Option<EntryId> {
        self.sequence.first()
    }

    /// Inserts `insn` directly after `cur`, returning its entry id.
    ///
    /// Together with the anchors returned by the `make_*` builders this supports cursor
    /// style code emission: `cur = transform.insert(cur, insn)`.
    ///
    /// # Panics
    ///
    /// Panics if `cur` identifies a removed entry.
    pub fn insert(&mut self, cur: EntryId, insn: DexInstruction) -> EntryId {
        self.sequence.insert_after(cur, Entry::Opcode(insn))
    }

    /// Emits a conditional branch at `cur` and returns `(branch, then_point)`.
    ///
    /// Code inserted after `then_point` (a target entry appended at the end of the method)
    /// runs when the branch is taken; code inserted after `branch` runs on fall-through.
    ///
    /// # Panics
    ///
    /// Panics if `insn` is not a conditional branch, or if `cur` identifies a removed entry.
    pub fn make_if_block(&mut self, cur: EntryId, insn: DexInstruction) -> (EntryId, EntryId) {
        assert!(
            insn.opcode().is_conditional_branch(),
            "make_if_block requires a conditional branch, got {}",
            insn.opcode()
        );
        let branch = self.sequence.insert_after(cur, Entry::Opcode(insn));
        let then_point = self
            .sequence
            .push_back(Entry::Target(BranchTarget::simple(branch)));
        (branch, then_point)
    }

    /// Emits a full if/else skeleton inline at `cur`.
    ///
    /// See [`IfElseBlock`] for the emitted shape and the returned anchors.
    ///
    /// # Panics
    ///
    /// Panics if `insn` is not a conditional branch, or if `cur` identifies a removed entry.
    pub fn make_if_else_block(&mut self, cur: EntryId, insn: DexInstruction) -> IfElseBlock {
        assert!(
            insn.opcode().is_conditional_branch(),
            "make_if_else_block requires a conditional branch, got {}",
            insn.opcode()
        );
        let branch = self.sequence.insert_after(cur, Entry::Opcode(insn));
        let else_point = self.sequence.insert_after(branch, Entry::Fallthrough);
        let goto = self.sequence.insert_after(
            else_point,
            Entry::Opcode(DexInstruction::new(crate::instructions::Opcode::Goto)),
        );
        let then_point = self
            .sequence
            .insert_after(goto, Entry::Target(BranchTarget::simple(branch)));
        let join = self
            .sequence
            .insert_after(then_point, Entry::Target(BranchTarget::simple(goto)));
        IfElseBlock { branch, else_point, then_point, join }
    }

    /// Emits a sparse switch over `case_keys` at `cur`.
    ///
    /// Returns the fall-through (default) anchor and one target anchor per case, in key
    /// order; case code belongs after its anchor, which is appended at the end of the
    /// method. The switch instruction receives a payload carrying the case keys; the
    /// payload's target table is filled in on sync.
    ///
    /// # Panics
    ///
    /// Panics if `insn` is not a switch, if `case_keys` is empty, or if `cur` identifies a
    /// removed entry.
    pub fn make_switch_block(
        &mut self,
        cur: EntryId,
        mut insn: DexInstruction,
        case_keys: &[i32],
    ) -> (EntryId, Vec<EntryId>) {
        assert!(insn.opcode().is_switch(), "make_switch_block requires a switch, got {}", insn.opcode());
        assert!(!case_keys.is_empty(), "a switch needs at least one case");
        insn.set_payload(Some(SwitchPayload::Sparse {
            keys: case_keys.to_vec(),
            targets: vec![0; case_keys.len()],
        }));
        let switch = self.sequence.insert_after(cur, Entry::Opcode(insn));
        let default_point = self.sequence.insert_after(switch, Entry::Fallthrough);
        let case_points = (0..case_keys.len())
            .map(|case| {
                self.sequence
                    .push_back(Entry::Target(BranchTarget::multi(switch, case as u32)))
            })
            .collect();
        (default_point, case_points)
    }
}

/// Scoped holder for a [`MethodTransform`] that guarantees the sync step runs.
///
/// Acquiring one balloons (or looks up) the method's transform; dropping it syncs the
/// sequence back to the raw body on every exit path, including early returns and error
/// paths. Access the transform through [`MethodTransformer::lock`].
///
/// # Examples
///
/// ```rust
/// use dexscope::prelude::*;
///
/// let body = MethodBody::new(1, 0, 0, vec![DexInstruction::new(Opcode::ReturnVoid)]);
/// let method = Method::new(MethodId::new(0x0300), "scoped", Some(body));
/// {
///     let transformer = MethodTransformer::new(&method, false)?;
///     transformer.lock().push_back(DexInstruction::new(Opcode::Nop));
///     // Dropped here: the sequence is synced back automatically.
/// }
/// assert_eq!(method.body_ref().as_ref().unwrap().instructions().len(), 2);
/// # Ok::<(), dexscope::Error>(())
/// ```
pub struct MethodTransformer {
    transform: TransformRc,
}

impl MethodTransformer {
    /// Acquires the transform for `method`, ballooning on a cache miss.
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`MethodTransform::get`].
    pub fn new(method: &MethodRc, want_cfg: bool) -> Result<Self> {
        Ok(Self { transform: MethodTransform::get(method, want_cfg)? })
    }

    /// Locks the underlying transform for use.
    ///
    /// The guard must be dropped before this transformer is, or the sync-on-drop would
    /// self-deadlock; the borrow checker enforces that for stack usage.
    #[must_use]
    pub fn lock(&self) -> MutexGuard<'_, MethodTransform> {
        self.transform.lock()
    }
}

impl Drop for MethodTransformer {
    fn drop(&mut self) {
        // Syncing during a pass panic would hide the original failure behind a second one.
        if !std::thread::panicking() {
            self.transform.lock().sync();
        }
    }
}
