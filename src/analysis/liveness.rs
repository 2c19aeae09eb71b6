//! Backward register liveness over the entry sequence.
//!
//! A register is *live* at a program point if some path from that point reaches a read of
//! the register without an intervening redefinition. The analysis is the classic backward
//! dataflow: per-block `USE`/`DEF` bit sets, `OUT[B] = union of IN[S]` over successors,
//! `IN[B] = USE[B] | (OUT[B] - DEF[B])`, iterated to a fixed point, followed by one backward
//! sweep through each block that memoizes the live-out set of every instruction.
//!
//! The memoization is a snapshot: it describes the sequence as it was when the map was
//! built, and no re-derivation happens on mutation. The inliner deliberately amortizes one
//! map across several splices into the same caller - see
//! [`crate::inline::InlineContext::live_out`] for that contract and its documented risk.

use std::collections::HashMap;

use crate::analysis::{Block, PostOrderSort};
use crate::ir::{Entry, EntryId, Sequence};
use crate::utils::RegisterSet;

/// Memoized per-instruction liveness for one sequence snapshot.
///
/// # Examples
///
/// ```rust
/// use dexscope::prelude::*;
///
/// let body = MethodBody::new(2, 0, 0, vec![
///     DexInstruction::new(Opcode::Const).with_dest(0),
///     DexInstruction::new(Opcode::Move).with_dest(1).with_srcs(vec![0]),
///     DexInstruction::new(Opcode::Return).with_srcs(vec![1]),
/// ]);
/// let method = Method::new(MethodId::new(0x0400), "live", Some(body));
/// let transform = MethodTransform::get(&method, true)?;
/// let transform = transform.lock();
///
/// let liveness = LivenessMap::build(transform.sequence(), transform.cfg(), transform.registers());
/// let const_entry = transform
///     .sequence()
///     .iter()
///     .find(|(_, e)| e.opcode().map(|i| i.opcode()) == Some(Opcode::Const))
///     .map(|(id, _)| id)
///     .unwrap();
/// // v0 is read by the move, so it is live out of the const.
/// assert!(liveness.live_out(const_entry).unwrap().contains(0));
/// # Ok::<(), dexscope::Error>(())
/// ```
pub struct LivenessMap {
    live_out: HashMap<EntryId, RegisterSet>,
    registers: u16,
}

impl LivenessMap {
    /// Computes liveness for every instruction of `sequence`, using the block partition for
    /// control flow and `registers` as the frame size.
    #[must_use]
    pub fn build(sequence: &Sequence, blocks: &[Block], registers: u16) -> Self {
        let nregs = usize::from(registers);
        let nblocks = blocks.len();

        // Per-block USE (read before any write) and DEF (written) sets.
        let mut use_sets = Vec::with_capacity(nblocks);
        let mut def_sets = Vec::with_capacity(nblocks);
        for block in blocks {
            let mut uses = RegisterSet::new(nregs);
            let mut defs = RegisterSet::new(nregs);
            for (_, entry) in block.iter(sequence) {
                let Entry::Opcode(insn) = entry else { continue };
                for &src in insn.srcs() {
                    if !defs.contains(src) {
                        uses.insert(src);
                    }
                }
                if let Some(dest) = insn.dest() {
                    defs.insert(dest);
                }
            }
            use_sets.push(uses);
            def_sets.push(defs);
        }

        // Block-level fixed point. Postorder is already the profitable visit order for a
        // backward problem; the worklist handles whatever loops remain.
        let mut in_sets = vec![RegisterSet::new(nregs); nblocks];
        let mut out_sets = vec![RegisterSet::new(nregs); nblocks];
        let mut worklist: Vec<usize> = PostOrderSort::new(blocks).sorted();
        while let Some(block) = worklist.pop() {
            let mut out = RegisterSet::new(nregs);
            for &succ in blocks[block].succs() {
                out.union_with(&in_sets[succ]);
            }
            let mut input = out.clone();
            input.difference_with(&def_sets[block]);
            input.union_with(&use_sets[block]);
            out_sets[block] = out;
            if input != in_sets[block] {
                in_sets[block] = input;
                for &pred in blocks[block].preds() {
                    if !worklist.contains(&pred) {
                        worklist.push(pred);
                    }
                }
            }
        }

        // Per-instruction backward sweep, memoizing live-out at each opcode entry.
        let mut live_out = HashMap::new();
        for block in blocks {
            let opcodes: Vec<(EntryId, &crate::instructions::DexInstruction)> = block
                .iter(sequence)
                .filter_map(|(id, entry)| entry.opcode().map(|insn| (id, insn)))
                .collect();
            let mut live = out_sets[block.id()].clone();
            for (id, insn) in opcodes.into_iter().rev() {
                live_out.insert(id, live.clone());
                if let Some(dest) = insn.dest() {
                    live.remove(dest);
                }
                for &src in insn.srcs() {
                    live.insert(src);
                }
            }
        }

        Self { live_out, registers }
    }

    /// Returns the registers live immediately after `insn`, or `None` if the id did not
    /// identify an instruction when the map was built.
    #[must_use]
    pub fn live_out(&self, insn: EntryId) -> Option<&RegisterSet> {
        self.live_out.get(&insn)
    }

    /// Returns the frame size the map was built for.
    #[must_use]
    pub fn registers(&self) -> u16 {
        self.registers
    }
}
