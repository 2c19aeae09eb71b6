//! Depth-first postorder numbering over the block graph.
//!
//! A standard iterative DFS over successor edges with a visited set keyed by block index;
//! loops are handled by the visited set, not by any depth bound, and the result is
//! deterministic for a fixed successor-edge order. Later analyses consume the order
//! directly (backward dataflow iterates it; forward dataflow iterates its reverse).

use crate::analysis::Block;

/// Builds a postorder-sorted list of block indices from a block partition.
///
/// Traversal starts at block 0, the conventional single entry; blocks unreachable from it
/// are not emitted.
///
/// # Examples
///
/// ```rust,ignore
/// let order = PostOrderSort::new(transform.cfg()).sorted();
/// assert_eq!(order.last(), Some(&0), "the entry block is visited last");
/// ```
pub struct PostOrderSort<'a> {
    blocks: &'a [Block],
}

impl<'a> PostOrderSort<'a> {
    /// Creates a traversal over `blocks`.
    #[must_use]
    pub fn new(blocks: &'a [Block]) -> Self {
        Self { blocks }
    }

    /// Runs the traversal and returns block indices in postorder.
    ///
    /// Every block reachable from block 0 appears exactly once, after all of its successors
    /// reachable via forward edges (back edges excepted, as usual for cyclic graphs).
    #[must_use]
    pub fn sorted(self) -> Vec<usize> {
        let mut postorder = Vec::with_capacity(self.blocks.len());
        if self.blocks.is_empty() {
            return postorder;
        }

        let mut visited = vec![false; self.blocks.len()];
        // (block, index of the next successor to descend into)
        let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
        visited[0] = true;
        while let Some((block, child)) = stack.last_mut() {
            let succs = self.blocks[*block].succs();
            if *child < succs.len() {
                let next = succs[*child];
                *child += 1;
                if !visited[next] {
                    visited[next] = true;
                    stack.push((next, 0));
                }
            } else {
                postorder.push(*block);
                stack.pop();
            }
        }
        postorder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::partition;
    use crate::instructions::{DexInstruction, Opcode};
    use crate::ir::{BranchTarget, Entry, Sequence};

    fn opcode(op: Opcode) -> Entry {
        Entry::Opcode(DexInstruction::new(op))
    }

    #[test]
    fn diamond_emits_entry_last() {
        // b0: if -> b2 / falls to b1; b1 -> b3 (goto); b2 falls to b3; b3: return
        let mut seq = Sequence::new();
        seq.push_back(Entry::Fallthrough);
        let branch = seq.push_back(opcode(Opcode::IfEqz));
        let goto = seq.push_back(opcode(Opcode::Goto));
        let b2_first = seq.push_back(opcode(Opcode::Nop));
        seq.insert_before(b2_first, Entry::Target(BranchTarget::simple(branch)));
        let ret = seq.push_back(opcode(Opcode::ReturnVoid));
        seq.insert_before(ret, Entry::Target(BranchTarget::simple(goto)));

        let blocks = partition(&seq);
        assert_eq!(blocks.len(), 4);

        let order = PostOrderSort::new(&blocks).sorted();
        assert_eq!(order.len(), 4, "all reachable blocks appear exactly once");
        assert_eq!(*order.last().unwrap(), 0, "entry block is emitted last");
        // The join block precedes both of its predecessors in postorder.
        let position = |b: usize| order.iter().position(|&x| x == b).unwrap();
        assert!(position(3) < position(1));
        assert!(position(3) < position(2));
    }

    #[test]
    fn loop_terminates_and_visits_once() {
        // b0 falls into b1; b1 branches back to itself or falls to b2.
        let mut seq = Sequence::new();
        seq.push_back(Entry::Fallthrough);
        seq.push_back(opcode(Opcode::Nop));
        let loop_head = seq.push_back(opcode(Opcode::IfEqz));
        seq.insert_before(loop_head, Entry::Target(BranchTarget::simple(loop_head)));
        seq.push_back(opcode(Opcode::ReturnVoid));

        let blocks = partition(&seq);
        let order = PostOrderSort::new(&blocks).sorted();
        assert_eq!(order.len(), blocks.len(), "cycle must not duplicate or drop blocks");
        assert_eq!(*order.last().unwrap(), 0);
    }

    #[test]
    fn unreachable_blocks_are_not_emitted() {
        // Code after a return with no inbound edge.
        let mut seq = Sequence::new();
        seq.push_back(Entry::Fallthrough);
        seq.push_back(opcode(Opcode::ReturnVoid));
        seq.push_back(opcode(Opcode::Nop));
        seq.push_back(opcode(Opcode::ReturnVoid));

        let blocks = partition(&seq);
        assert_eq!(blocks.len(), 2);
        let order = PostOrderSort::new(&blocks).sorted();
        assert_eq!(order, vec![0], "only the entry block is reachable");
    }

    #[test]
    fn empty_partition_yields_empty_order() {
        assert!(PostOrderSort::new(&[]).sorted().is_empty());
    }
}
