//! Basic-block partition over the entry sequence.
//!
//! One linear scan cuts the sequence at block leaders - the sequence head, the entry after a
//! branch/switch/return/throw-terminated instruction, any branch target, any catch entry -
//! and a second pass wires the edges: fall-through to the next block, one edge per branch
//! target (switch edges deduplicated per destination block), and, for a block whose last
//! instruction may throw inside an active try region, one edge per handler in the region's
//! catch chain. The partition is a non-owning view; any sequence mutation invalidates it.

use std::collections::HashMap;

use crate::instructions::DexInstruction;
use crate::ir::{Entry, EntryId, Sequence, TryKind};

/// One basic block: an id, a half-open entry range, and its edges.
///
/// Blocks reference the sequence they were derived from but own nothing in it; they are
/// valid only until the next sequence mutation or partition rebuild. Edges are block indices
/// into the same partition.
#[derive(Debug, Clone)]
pub struct Block {
    id: usize,
    begin: EntryId,
    end: Option<EntryId>,
    preds: Vec<usize>,
    succs: Vec<usize>,
}

impl Block {
    /// Returns this block's index in the partition.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the first entry of the block.
    #[must_use]
    pub fn begin(&self) -> EntryId {
        self.begin
    }

    /// Returns the entry just past the block, or `None` if the block ends the sequence.
    #[must_use]
    pub fn end(&self) -> Option<EntryId> {
        self.end
    }

    /// Returns the indices of the predecessor blocks.
    #[must_use]
    pub fn preds(&self) -> &[usize] {
        &self.preds
    }

    /// Returns the indices of the successor blocks.
    #[must_use]
    pub fn succs(&self) -> &[usize] {
        &self.succs
    }

    /// Iterates over the block's entries within `sequence`.
    ///
    /// # Panics
    ///
    /// Panics (while iterating) if the partition is stale and the range walks a removed
    /// entry - stale blocks are undefined to dereference.
    pub fn iter<'a>(&self, sequence: &'a Sequence) -> crate::ir::Iter<'a> {
        sequence.range(self.begin, self.end)
    }

    /// Returns the last real instruction of the block, if it has one.
    #[must_use]
    pub fn last_opcode<'a>(&self, sequence: &'a Sequence) -> Option<(EntryId, &'a DexInstruction)> {
        let mut last = None;
        for (id, entry) in self.iter(sequence) {
            if let Entry::Opcode(insn) = entry {
                last = Some((id, insn));
            }
        }
        last
    }

    /// Returns `true` iff the block's first entry is a catch-handler entry point.
    #[must_use]
    pub fn is_catch(&self, sequence: &Sequence) -> bool {
        matches!(sequence.entry(self.begin), Entry::Catch(_))
    }

    /// Returns `true` iff the block's last real instruction belongs to the may-throw subset
    /// of the instruction set.
    ///
    /// This reads the static classification table
    /// ([`crate::instructions::Opcode::can_throw`]); it is not a dataflow result.
    #[must_use]
    pub fn ends_with_may_throw(&self, sequence: &Sequence) -> bool {
        self.last_opcode(sequence)
            .is_some_and(|(_, insn)| insn.opcode().can_throw())
    }
}

/// Partitions `sequence` into basic blocks and wires their edges.
///
/// # Panics
///
/// Panics if a branch target references a detached source entry - a structural error left
/// behind by a pass.
pub(crate) fn partition(sequence: &Sequence) -> Vec<Block> {
    // Leader scan.
    let mut leaders: Vec<EntryId> = Vec::new();
    let mut split_next = true;
    let mut block_has_opcode = false;
    for (id, entry) in sequence.iter() {
        let marker_leader =
            matches!(entry, Entry::Target(_) | Entry::Catch(_)) && block_has_opcode;
        if split_next || marker_leader {
            leaders.push(id);
            split_next = false;
            block_has_opcode = false;
        }
        if let Entry::Opcode(insn) = entry {
            block_has_opcode = true;
            let opcode = insn.opcode();
            if opcode.is_branch() || opcode.is_switch() || opcode.is_return() || opcode.is_throw()
            {
                split_next = true;
            }
        }
    }

    let mut blocks: Vec<Block> = leaders
        .iter()
        .enumerate()
        .map(|(id, &begin)| Block {
            id,
            begin,
            end: leaders.get(id + 1).copied(),
            preds: Vec::new(),
            succs: Vec::new(),
        })
        .collect();

    // Entry-to-block map; every attached entry belongs to exactly one block.
    let mut block_of: HashMap<EntryId, usize> = HashMap::with_capacity(sequence.len());
    for block in &blocks {
        for (id, _) in sequence.range(block.begin, block.end) {
            block_of.insert(id, block.id);
        }
    }

    let mut edges: Vec<(usize, usize)> = Vec::new();

    // Fall-through edges.
    for block in &blocks {
        if block.id + 1 >= blocks.len() {
            continue;
        }
        let falls_through = match block.last_opcode(sequence) {
            Some((_, insn)) => insn.opcode().can_fall_through(),
            // A block of pure markers continues straight into the next.
            None => true,
        };
        if falls_through {
            edges.push((block.id, block.id + 1));
        }
    }

    // Branch and switch edges, one per target entry, deduplicated per (src, dest) pair so a
    // switch with several cases landing on one block contributes a single edge.
    for (id, entry) in sequence.iter() {
        let Entry::Target(target) = entry else { continue };
        let src_block = *block_of.get(&target.src).unwrap_or_else(|| {
            panic!("target {id} references dangling branch source {}", target.src)
        });
        let dest_block = block_of[&id];
        edges.push((src_block, dest_block));
    }

    // Exception edges: a may-throw block terminator inside an active region reaches every
    // handler in the region's chain, not merely the first.
    let last_opcodes: Vec<Option<EntryId>> = blocks
        .iter()
        .map(|block| block.last_opcode(sequence).map(|(id, _)| id))
        .collect();
    let mut active_chains: Vec<EntryId> = Vec::new();
    let mut current_block = 0usize;
    for (id, entry) in sequence.iter() {
        if current_block + 1 < blocks.len() && blocks[current_block + 1].begin == id {
            current_block += 1;
        }
        match entry {
            Entry::Try(mark) => match mark.kind {
                TryKind::Start => active_chains.push(mark.catch_start),
                TryKind::End => {
                    if let Some(pos) = active_chains.iter().position(|&h| h == mark.catch_start) {
                        active_chains.swap_remove(pos);
                    }
                }
            },
            Entry::Opcode(insn) => {
                if last_opcodes[current_block] == Some(id) && insn.opcode().can_throw() {
                    for &head in &active_chains {
                        let mut cursor = Some(head);
                        while let Some(catch_id) = cursor {
                            edges.push((current_block, block_of[&catch_id]));
                            cursor = sequence
                                .entry(catch_id)
                                .catch()
                                .and_then(|centry| centry.next);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    // Materialize deduplicated successor/predecessor lists; predecessors are the transpose.
    for (src, dest) in edges {
        if !blocks[src].succs.contains(&dest) {
            blocks[src].succs.push(dest);
        }
        if !blocks[dest].preds.contains(&src) {
            blocks[dest].preds.push(src);
        }
    }

    blocks
}
