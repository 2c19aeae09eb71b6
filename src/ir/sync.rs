//! Syncing: editable sequence back to a raw method body.
//!
//! [`MethodTransform::try_sync`] is the work-horse: one relaxation pass that assigns a
//! tentative address to every entry, verifies that each branch distance fits its
//! instruction's current encoding form, and either widens one instruction and reports
//! failure (so addresses are recomputed) or finalizes the encoding - patching offsets,
//! regenerating switch payloads at the method tail, rebuilding the exception table from the
//! resolved addresses and writing everything back to the method. Each failed pass strictly
//! widens one goto, widths are bounded by `goto/32`, so the [`MethodTransform::sync`] loop
//! terminates.

use std::collections::HashMap;

use crate::instructions::{DexInstruction, Opcode};
use crate::ir::{BranchKind, Entry, EntryId, MethodTransform, TryKind};
use crate::method::{CatchHandler, DebugItem, DebugRecord, MethodBody, TryItem};

impl MethodTransform {
    /// Runs the relaxation loop to its fixed point and writes the raw body back.
    ///
    /// After the write-back the transform is removed from the process-wide cache; the next
    /// [`MethodTransform::get`] for this method balloons the freshly written body. Mutating
    /// this instance after syncing is a contract violation (the sequence no longer describes
    /// the method).
    ///
    /// # Panics
    ///
    /// Panics on a structurally damaged sequence - a branch without a target entry, a target
    /// whose source is detached or not a branch, an unterminated or unopened try region, a
    /// malformed catch chain - and on encoding infeasibility (a conditional-branch distance
    /// that exceeds its only encoding form). Both indicate a bug in a calling pass, not a
    /// recoverable condition.
    pub fn sync(&mut self) {
        let mut passes = 1u32;
        while !self.try_sync() {
            passes += 1;
        }
        tracing::debug!(method = %self.method().id(), passes, "synced method");
        MethodTransform::evict(self.method().id());
    }

    /// One relaxation pass.
    ///
    /// Returns `false` after widening a branch whose distance no longer fits - every address
    /// computed so far is then stale and the caller must retry. Returns `true` once every
    /// branch fits, in which case the raw body has been written back.
    ///
    /// # Panics
    ///
    /// See [`MethodTransform::sync`].
    pub fn try_sync(&mut self) -> bool {
        // Tentative address assignment. Marker entries are zero-width, so each resolves to
        // the address of the next instruction.
        let mut addrs: HashMap<EntryId, u32> = HashMap::with_capacity(self.sequence().len());
        let mut addr = 0u32;
        for (id, entry) in self.sequence().iter() {
            if let Entry::Opcode(insn) = entry {
                assert!(
                    !insn.opcode().is_payload(),
                    "payload pseudo-instruction {insn} in sequence; payloads are regenerated on sync"
                );
            }
            addrs.insert(id, addr);
            addr += entry.width();
        }

        // Distance check. A non-fitting goto is widened in place and the pass is abandoned;
        // widening only grows widths, so this terminates.
        let mut simple_dists: HashMap<EntryId, i32> = HashMap::new();
        let mut multi_dists: HashMap<EntryId, Vec<(u32, i32)>> = HashMap::new();
        let mut widen: Option<(EntryId, Opcode)> = None;
        for (id, entry) in self.sequence().iter() {
            let Entry::Target(target) = entry else { continue };
            let src_opcode = match self.sequence().get(target.src).and_then(Entry::opcode) {
                Some(insn) => insn.opcode(),
                None => panic!("target {id} references dangling branch source {}", target.src),
            };
            let distance = i64::from(addrs[&id]) - i64::from(addrs[&target.src]);
            let distance = i32::try_from(distance)
                .unwrap_or_else(|_| panic!("branch distance {distance} exceeds the instruction format"));
            match target.kind {
                BranchKind::Simple => {
                    assert!(
                        src_opcode.is_branch(),
                        "simple target {id} references non-branch source {src_opcode}"
                    );
                    if !src_opcode.branch_fits(distance) {
                        match src_opcode.widened() {
                            Some(wider) => {
                                widen = Some((target.src, wider));
                                break;
                            }
                            None => panic!(
                                "branch distance {distance} does not fit {src_opcode} and no wider encoding exists"
                            ),
                        }
                    }
                    let previous = simple_dists.insert(target.src, distance);
                    assert!(
                        previous.is_none(),
                        "branch source {} has more than one simple target",
                        target.src
                    );
                }
                BranchKind::Multi { index } => {
                    assert!(
                        src_opcode.is_switch(),
                        "switch-case target {id} references non-switch source {src_opcode}"
                    );
                    multi_dists.entry(target.src).or_default().push((index, distance));
                }
            }
        }
        if let Some((src, wider)) = widen {
            let method_id = self.method().id();
            let insn = match self.sequence_mut().entry_mut(src) {
                Entry::Opcode(insn) => insn,
                _ => unreachable!("widening candidate was verified to be an opcode"),
            };
            tracing::trace!(
                method = %method_id,
                from = %insn.opcode(),
                to = %wider,
                "widening branch encoding"
            );
            insn.set_opcode(wider);
            return false;
        }

        // Every branch fits; finalize.
        let mut out: Vec<DexInstruction> = Vec::new();
        let mut out_tries: Vec<TryItem> = Vec::new();
        let mut out_debug: Vec<DebugItem> = Vec::new();
        let mut switches: Vec<(usize, EntryId, u32)> = Vec::new();
        let mut open_tries: Vec<(EntryId, u32)> = Vec::new();
        let mut cur = 0u32;
        for (id, entry) in self.sequence().iter() {
            match entry {
                Entry::Opcode(insn) => {
                    let mut encoded = insn.clone();
                    let opcode = insn.opcode();
                    if opcode.is_branch() {
                        let distance = simple_dists.get(&id).copied().unwrap_or_else(|| {
                            panic!("branch {insn} at address {cur} has no target entry")
                        });
                        encoded.set_offset(distance);
                    } else if opcode.is_switch() {
                        assert!(
                            insn.payload().is_some(),
                            "switch {insn} at address {cur} carries no case keys"
                        );
                        switches.push((out.len(), id, cur));
                    }
                    cur += encoded.width();
                    out.push(encoded);
                }
                Entry::Try(mark) => match mark.kind {
                    TryKind::Start => {
                        assert!(
                            !open_tries.iter().any(|(head, _)| *head == mark.catch_start),
                            "try region opened twice for the same catch chain"
                        );
                        open_tries.push((mark.catch_start, cur));
                    }
                    TryKind::End => {
                        let open_idx = open_tries
                            .iter()
                            .position(|(head, _)| *head == mark.catch_start)
                            .unwrap_or_else(|| panic!("TRY_END at address {cur} without a TRY_START"));
                        let (head, start) = open_tries.remove(open_idx);
                        out_tries.push(self.reconstruct_try(head, start, cur, &addrs));
                    }
                },
                Entry::Debug(op) => out_debug.push(DebugItem {
                    addr: cur,
                    record: DebugRecord::Instruction(op.clone()),
                }),
                Entry::Position(pos) => out_debug.push(DebugItem {
                    addr: cur,
                    record: DebugRecord::Position(*pos),
                }),
                Entry::Catch(_) | Entry::Target(_) | Entry::Fallthrough => {}
            }
        }
        assert!(
            open_tries.is_empty(),
            "{} try region(s) left unterminated",
            open_tries.len()
        );

        // Switch payloads regenerate at the method tail, each aligned to an even address.
        for (pos, id, switch_addr) in switches {
            if cur % 2 == 1 {
                out.push(DexInstruction::new(Opcode::Nop));
                cur += 1;
            }
            #[allow(clippy::cast_possible_wrap)]
            out[pos].set_offset((cur - switch_addr) as i32);

            let mut cases = multi_dists.remove(&id).unwrap_or_default();
            cases.sort_by_key(|(index, _)| *index);
            let mut payload = match out[pos].payload() {
                Some(payload) => payload.clone(),
                None => unreachable!("switch payload presence was asserted above"),
            };
            assert!(
                cases.len() == payload.case_count()
                    && cases.iter().enumerate().all(|(j, (index, _))| *index == j as u32),
                "switch at address {} has {} payload cases but targets {:?}",
                switch_addr,
                payload.case_count(),
                cases
            );
            *payload.targets_mut() = cases.into_iter().map(|(_, distance)| distance).collect();

            let payload_opcode = match out[pos].opcode() {
                Opcode::PackedSwitch => Opcode::PackedSwitchPayload,
                Opcode::SparseSwitch => Opcode::SparseSwitchPayload,
                other => unreachable!("collected switch is {other}"),
            };
            // The raw shape keeps case data in the pseudo-instruction only.
            out[pos].set_payload(None);
            let payload_insn = DexInstruction::new(payload_opcode).with_payload(payload);
            cur += payload_insn.width();
            out.push(payload_insn);
        }

        tracing::trace!(method = %self.method().id(), code_units = cur, tries = out_tries.len(), "encoded sequence");
        self.method().set_body(Some(
            MethodBody::new(self.registers(), self.ins(), self.outs(), out)
                .with_tries(out_tries)
                .with_debug(out_debug),
        ));
        true
    }

    /// Rebuilds one exception-table entry from a catch chain and the resolved addresses.
    fn reconstruct_try(
        &self,
        head: EntryId,
        start: u32,
        end: u32,
        addrs: &HashMap<EntryId, u32>,
    ) -> TryItem {
        let mut catches = Vec::new();
        let mut catch_all = None;
        let mut cursor = Some(head);
        while let Some(id) = cursor {
            let centry = match self.sequence().get(id).and_then(Entry::catch) {
                Some(centry) => *centry,
                None => panic!("catch chain references {id} which is not an attached catch entry"),
            };
            let handler_addr = addrs[&id];
            match centry.exception {
                Some(exception) => {
                    assert!(
                        catch_all.is_none(),
                        "typed handler follows a catch-all in the same chain"
                    );
                    catches.push(CatchHandler::new(exception, handler_addr));
                }
                None => {
                    assert!(
                        centry.next.is_none(),
                        "catch-all handler must terminate its chain"
                    );
                    catch_all = Some(handler_addr);
                }
            }
            cursor = centry.next;
        }
        assert!(
            !catches.is_empty() || catch_all.is_some(),
            "try region at [{start}, {end}) reconstructed with no handlers"
        );
        TryItem::new(start, end - start, catches, catch_all)
    }
}
