//! Tail-call inlining over the mutable IR.
//!
//! Both entry points splice a callee's ballooned body into a caller at an invoke site,
//! remapping every callee register: parameters land on the invoke's argument registers
//! (Dalvik passes arguments in the top `ins` registers of the callee frame), temporaries on
//! fresh registers appended after the caller's frame - or, in the budget-constrained
//! variant, on caller registers proven dead at the call site, so the combined frame stays
//! within the 16-register ceiling that unlocks the compact 4-bit register encodings.
//!
//! Neither function is a general-purpose inliner. The contract is that the invoke is the
//! final control-affecting instruction on every caller path reaching it; under that
//! precondition the callee's terminal return is dropped and the spliced body simply takes
//! the invoke's place.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::analysis::{LivenessMap, RegisterSet};
use crate::ir::{Entry, EntryId, MethodTransform, MethodTransformer};
use crate::method::MethodRc;
use crate::Result;

/// Carries context for multiple inlines into a single caller.
///
/// Construction acquires the caller's transform behind a [`MethodTransformer`], so the
/// caller's sequence is synced back to raw instructions exactly once, when the context is
/// dropped. With `use_liveness` it also computes the caller's liveness map once, to be
/// shared by every [`inline_16regs`] call made through this context.
///
/// # Examples
///
/// ```rust,ignore
/// let mut context = InlineContext::new(&caller, true)?;
/// for (callee, invoke) in candidates {
///     if !inline_16regs(&mut context, &callee, invoke)? {
///         // Budget exhausted for this callee; fall back or skip.
///     }
/// }
/// // Dropping the context syncs the caller.
/// ```
pub struct InlineContext {
    transformer: MethodTransformer,
    /// Frame size of the caller at context creation, before any splice grew it.
    pub original_regs: u16,
    liveness: Option<LivenessMap>,
}

impl InlineContext {
    /// Acquires the caller's transform (ballooning if needed) and, with `use_liveness`,
    /// computes its liveness map.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::ir::MethodTransform::get`] errors for the caller.
    pub fn new(caller: &MethodRc, use_liveness: bool) -> Result<Self> {
        let transformer = MethodTransformer::new(caller, true)?;
        let (original_regs, liveness) = {
            let transform = transformer.lock();
            let liveness = use_liveness.then(|| {
                LivenessMap::build(transform.sequence(), transform.cfg(), transform.registers())
            });
            (transform.registers(), liveness)
        };
        Ok(Self { transformer, original_regs, liveness })
    }

    /// Returns the registers live immediately after `insn` in the caller.
    ///
    /// The map is computed once, at context creation, and deliberately *not* re-run after
    /// each splice: the cost is amortized across all inlines into this caller on the
    /// assumption that a splice does not disturb liveness at the other call sites. Entries
    /// created by later splices are unknown to the map; perform all inlines for a context
    /// before relying on `live_out` for anything else.
    ///
    /// # Panics
    ///
    /// Panics if the context was created without liveness, or if `insn` did not identify an
    /// instruction when the map was built.
    #[must_use]
    pub fn live_out(&self, insn: EntryId) -> &RegisterSet {
        let map = match self.liveness.as_ref() {
            Some(map) => map,
            None => panic!("InlineContext was created without liveness"),
        };
        match map.live_out(insn) {
            Some(live) => live,
            None => panic!("no liveness recorded for {insn}; was it added after context creation?"),
        }
    }

    /// Returns the guard holding the caller's transform.
    #[must_use]
    pub fn transformer(&self) -> &MethodTransformer {
        &self.transformer
    }
}

/// Inlines tail-called `callee` into `caller` at the invoke entry `invoke`.
///
/// Precondition (not checked at runtime beyond cheap assertions): `invoke` is the final
/// control-affecting instruction on every caller path reaching it - the caller does no work
/// after the call. Violating this is undefined behavior by contract.
///
/// Effects: the invoke entry is removed; the callee's entries (exception regions included,
/// terminal return excluded) take its place with every register remapped - parameters onto
/// the invoke's argument registers, temporaries onto a fresh range appended after the
/// caller's frame; the caller's frame and outgoing-argument sizes are raised accordingly;
/// and the callee's now-unused transform is evicted from the cache. The caller's transform
/// stays ballooned for further mutation; its owner syncs it later.
///
/// # Errors
///
/// Propagates transform-acquisition errors for either method.
///
/// # Panics
///
/// Panics if `invoke` is not an invoke entry of the caller, if the invoke's argument count
/// does not match the callee's parameter count, if the callee does not end in exactly one
/// terminal return, or if caller and callee are the same method.
pub fn inline_tail_call(caller: &MethodRc, callee: &MethodRc, invoke: EntryId) -> Result<()> {
    assert!(
        caller.id() != callee.id(),
        "cannot tail-call inline {} into itself",
        caller.id()
    );
    let caller_rc = MethodTransform::get(caller, false)?;
    let callee_rc = MethodTransform::get(callee, false)?;
    {
        let mut caller_transform = caller_rc.lock();
        let callee_transform = callee_rc.lock();

        let args = invoke_args(&caller_transform, invoke, &callee_transform);
        let newregs = caller_transform.registers();
        let param_base = callee_transform.registers() - callee_transform.ins();
        let map = |reg: u16| {
            if reg >= param_base {
                args[usize::from(reg - param_base)]
            } else {
                newregs + reg
            }
        };
        splice_callee(&mut caller_transform, &callee_transform, invoke, &map);

        caller_transform.set_registers(newregs + param_base);
        let outs = caller_transform.outs().max(callee_transform.outs());
        caller_transform.set_outs(outs);
    }
    MethodTransform::evict(callee.id());
    debug!(caller = %caller.id(), callee = %callee.id(), "tail-call inlined");
    Ok(())
}

/// Budget-constrained variant of [`inline_tail_call`]: succeeds only if the combined frame
/// stays within 16 registers.
///
/// Callee temporaries are assigned to caller registers that the context's cached liveness
/// proves dead at the call site (and that the invoke's arguments do not occupy), extending
/// the frame only as far as register 15. Returns `Ok(false)` - without mutating anything -
/// when no assignment keeps the caller within the ceiling; the caller may then fall back to
/// [`inline_tail_call`] or skip the inline.
///
/// # Errors
///
/// Propagates transform-acquisition errors for the callee.
///
/// # Panics
///
/// As [`inline_tail_call`], and additionally if `context` was created without liveness.
pub fn inline_16regs(
    context: &mut InlineContext,
    callee: &MethodRc,
    invoke: EntryId,
) -> Result<bool> {
    let callee_rc = MethodTransform::get(callee, false)?;
    let mut caller_transform = context.transformer.lock();
    // Checked before taking the callee lock: caller and callee sharing one transform would
    // self-deadlock below.
    assert!(
        caller_transform.method().id() != callee.id(),
        "cannot tail-call inline {} into itself",
        callee.id()
    );
    let callee_transform = callee_rc.lock();

    let caller_regs = caller_transform.registers();
    if caller_regs > 16 {
        trace!(caller = %caller_transform.method().id(), caller_regs, "caller already over the register ceiling");
        return Ok(false);
    }

    let args = invoke_args(&caller_transform, invoke, &callee_transform);
    let param_base = callee_transform.registers() - callee_transform.ins();

    // Registers a temporary must not land on: anything live past the call site, and the
    // argument registers the spliced body reads as its parameters.
    let mut forbidden = RegisterSet::new(16);
    for reg in context.live_out(invoke).iter() {
        forbidden.insert(reg);
    }
    for &arg in &args {
        forbidden.insert(arg);
    }

    let mut assignment: Vec<u16> = Vec::with_capacity(usize::from(param_base));
    let mut frame = caller_regs;
    for _ in 0..param_base {
        let Some(reg) = (0..16u16).find(|&reg| !forbidden.contains(reg)) else {
            trace!(
                caller = %caller_transform.method().id(),
                callee = %callee.id(),
                "no dead register available under the 16-register ceiling"
            );
            return Ok(false);
        };
        forbidden.insert(reg);
        assignment.push(reg);
        frame = frame.max(reg + 1);
    }

    let map = |reg: u16| {
        if reg >= param_base {
            args[usize::from(reg - param_base)]
        } else {
            assignment[usize::from(reg)]
        }
    };
    splice_callee(&mut caller_transform, &callee_transform, invoke, &map);

    caller_transform.set_registers(frame);
    let outs = caller_transform.outs().max(callee_transform.outs());
    caller_transform.set_outs(outs);
    let caller_id = caller_transform.method().id();
    drop(callee_transform);
    drop(caller_transform);
    MethodTransform::evict(callee.id());
    debug!(caller = %caller_id, callee = %callee.id(), frame, "tail-call inlined under register budget");
    Ok(true)
}

/// Validates the invoke entry and returns its argument registers.
fn invoke_args(
    caller: &MethodTransform,
    invoke: EntryId,
    callee: &MethodTransform,
) -> Vec<u16> {
    let insn = match caller.sequence().entry(invoke).opcode() {
        Some(insn) => insn,
        None => panic!("inline call site {invoke} is not an instruction entry"),
    };
    assert!(insn.opcode().is_invoke(), "inline call site {invoke} is {}, not an invoke", insn.opcode());
    let args = insn.srcs().to_vec();
    assert!(
        args.len() == usize::from(callee.ins()),
        "invoke passes {} arguments but {} declares {} parameter registers",
        args.len(),
        callee.method().id(),
        callee.ins()
    );
    args
}

/// Copies the callee's entries into the caller, remapping registers through `map` and entry
/// cross-references onto the caller's arena, then removes the invoke.
///
/// The callee must contain exactly one return - the terminal operation of its normal path -
/// which is dropped. Entries up to the return take the invoke's place; entries after it
/// (exception handlers hanging off the normal path) are pushed at the end of the caller so
/// the caller's own epilogue still follows the splice point directly.
fn splice_callee(
    caller: &mut MethodTransform,
    callee: &MethodTransform,
    invoke: EntryId,
    map: &dyn Fn(u16) -> u16,
) {
    // The callee must have exactly one return; everything past it is handler code.
    let returns: Vec<EntryId> = callee
        .sequence()
        .iter()
        .filter(|(_, entry)| entry.opcode().is_some_and(|insn| insn.opcode().is_return()))
        .map(|(id, _)| id)
        .collect();
    assert!(
        returns.len() == 1,
        "tail-call callee {} must have exactly one return, found {}",
        callee.method().id(),
        returns.len()
    );
    let dropped_return = returns[0];

    // First pass: clone entries (skipping the return) into the caller, remapping registers;
    // cross-references still point into the callee's arena.
    let mut id_map: HashMap<EntryId, EntryId> = HashMap::with_capacity(callee.sequence().len());
    let mut past_return = false;
    for (id, entry) in callee.sequence().iter() {
        if id == dropped_return {
            past_return = true;
            continue;
        }
        let mut cloned = entry.clone();
        if let Entry::Opcode(insn) = &mut cloned {
            insn.remap_registers(map);
        }
        let new_id = if past_return {
            caller.sequence_mut().push_back(cloned)
        } else {
            caller.sequence_mut().insert_before(invoke, cloned)
        };
        id_map.insert(id, new_id);
    }

    // Second pass: rebind cross-references onto the caller's arena.
    let rebind = |old: EntryId, what: &str| -> EntryId {
        match id_map.get(&old) {
            Some(&new) => new,
            None => panic!("callee {what} references {old}, which was not spliced"),
        }
    };
    for &new_id in id_map.values() {
        match caller.sequence_mut().entry_mut(new_id) {
            Entry::Target(target) => target.src = rebind(target.src, "branch target"),
            Entry::Try(mark) => mark.catch_start = rebind(mark.catch_start, "try marker"),
            Entry::Catch(centry) => {
                if let Some(next) = centry.next {
                    centry.next = Some(rebind(next, "catch chain"));
                }
            }
            _ => {}
        }
    }

    caller.remove_opcode(invoke);
}
