//! Ballooning: raw method body to editable sequence.
//!
//! A single walk over the raw instruction array converts every encoded distance into an
//! explicit entry: branch offsets become [`Entry::Target`] nodes inserted at the destination,
//! switch payloads dissolve into one `Multi` target per case (the case keys move onto the
//! switch instruction so the payload can be regenerated later), the exception table becomes
//! interleaved `Try`/`Catch` entries with handler chains, and debug records attach to the
//! instruction at their address. The result is fully self-contained: no entry depends on any
//! address.
//!
//! Marker entries landing at the same instruction are ordered `Catch`, `TRY_END`, `Target`,
//! `TRY_START`, debug records, then the instruction itself. The partition relies on this:
//! a handler block must *begin* with its `Catch`, and a region ending where a handler starts
//! must not leak its `TRY_END` past the handler's first instruction.

use std::collections::HashMap;

use crate::instructions::{Opcode, SwitchPayload};
use crate::ir::{BranchTarget, CatchEntry, Entry, EntryId, Sequence, TryKind, TryMark};
use crate::method::{DebugRecord, MethodRc};
use crate::{Error, Result};

/// The product of ballooning one method body.
pub(crate) struct BalloonedBody {
    pub sequence: Sequence,
    pub registers: u16,
    pub ins: u16,
    pub outs: u16,
}

/// Converts `method`'s raw body into a self-contained sequence.
///
/// # Errors
///
/// Returns [`Error::NoBody`] for abstract/native methods and [`Error::Malformed`] for raw
/// input whose encoded addresses do not resolve: branch or handler addresses off instruction
/// boundaries, switch instructions without a matching payload, exception regions extending
/// past the code, or a frame smaller than its parameter count.
pub(crate) fn balloon(method: &MethodRc) -> Result<BalloonedBody> {
    let guard = method.body_ref();
    let body = guard.as_ref().ok_or(Error::NoBody(method.id()))?;

    if body.ins() > body.registers() {
        return Err(malformed_error!(
            "method {} declares {} parameter registers in a frame of {}",
            method.id(),
            body.ins(),
            body.registers()
        ));
    }

    let instructions = body.instructions();

    // Address layout of the raw array. Payload pseudo-instructions keep their place here so
    // that switch offsets resolve, but they do not become sequence entries.
    let mut addresses = Vec::with_capacity(instructions.len());
    let mut index_at_addr = HashMap::new();
    let mut addr = 0u32;
    for (idx, insn) in instructions.iter().enumerate() {
        if insn.opcode().is_payload() && insn.payload().is_none() {
            return Err(malformed_error!(
                "payload pseudo-instruction at address {} carries no payload data",
                addr
            ));
        }
        addresses.push(addr);
        index_at_addr.insert(addr, idx);
        addr += insn.width();
    }
    let code_units = addr;

    let mut sequence = Sequence::new();
    sequence.push_back(Entry::Fallthrough);

    // Opcode entries, in order; payloads are consumed into their switch below.
    let mut entry_of: Vec<Option<EntryId>> = Vec::with_capacity(instructions.len());
    for insn in instructions {
        if insn.opcode().is_payload() {
            entry_of.push(None);
        } else {
            entry_of.push(Some(sequence.push_back(Entry::Opcode(insn.clone()))));
        }
    }

    // Maps a code-unit address to the entry of the instruction at that address.
    let resolve = |addr: i64, what: &str| -> Result<EntryId> {
        if addr < 0 || addr >= i64::from(code_units) {
            return Err(malformed_error!("{} address {} outside method of {} units", what, addr, code_units));
        }
        #[allow(clippy::cast_sign_loss)]
        let idx = index_at_addr.get(&(addr as u32)).copied().ok_or_else(|| {
            malformed_error!("{} address {} is not on an instruction boundary", what, addr)
        })?;
        entry_of[idx].ok_or_else(|| {
            malformed_error!("{} address {} lands on payload data", what, addr)
        })
    };

    // Pass 1: catch chains. Inserted before branch targets so a handler block begins with
    // its Catch entry even when the handler address is also a jump destination.
    let mut chain_heads = Vec::with_capacity(body.tries().len());
    for (try_idx, try_item) in body.tries().iter().enumerate() {
        if try_item.handler_count() == 0 {
            return Err(malformed_error!("try region {} has no handlers", try_idx));
        }
        let mut chain = Vec::with_capacity(try_item.handler_count());
        for catch in &try_item.catches {
            let dest = resolve(i64::from(catch.handler_addr), "catch handler")?;
            chain.push(sequence.insert_before(dest, Entry::Catch(CatchEntry::new(Some(catch.exception)))));
        }
        if let Some(handler_addr) = try_item.catch_all {
            let dest = resolve(i64::from(handler_addr), "catch-all handler")?;
            chain.push(sequence.insert_before(dest, Entry::Catch(CatchEntry::new(None))));
        }
        for pair in chain.windows(2) {
            match sequence.entry_mut(pair[0]) {
                Entry::Catch(centry) => centry.next = Some(pair[1]),
                _ => unreachable!("chain ids were just created as catch entries"),
            }
        }
        chain_heads.push(chain[0]);
    }

    // Pass 2: region end markers.
    for (try_idx, try_item) in body.tries().iter().enumerate() {
        let end_addr = i64::from(try_item.end_addr());
        if try_item.insn_count == 0 || end_addr > i64::from(code_units) {
            return Err(malformed_error!(
                "try region {} covers [{}, {}) in a method of {} units",
                try_idx,
                try_item.start_addr,
                end_addr,
                code_units
            ));
        }
        let mark = Entry::Try(TryMark::new(TryKind::End, chain_heads[try_idx]));
        if end_addr == i64::from(code_units) {
            sequence.push_back(mark);
        } else {
            sequence.insert_before(resolve(end_addr, "try region end")?, mark);
        }
    }

    // Pass 3: branch targets.
    for (idx, insn) in instructions.iter().enumerate() {
        let opcode = insn.opcode();
        if opcode.is_branch() {
            let src = match entry_of[idx] {
                Some(src) => src,
                None => unreachable!("branches are never payload pseudo-instructions"),
            };
            let dest_addr = i64::from(addresses[idx]) + i64::from(insn.offset());
            let dest = resolve(dest_addr, "branch target")?;
            sequence.insert_before(dest, Entry::Target(BranchTarget::simple(src)));
        } else if opcode.is_switch() {
            let src = match entry_of[idx] {
                Some(src) => src,
                None => unreachable!("switches are never payload pseudo-instructions"),
            };
            let payload = switch_payload(method, instructions, &index_at_addr, idx, addresses[idx])?;
            for (case, distance) in payload.targets().iter().enumerate() {
                let dest_addr = i64::from(addresses[idx]) + i64::from(*distance);
                let dest = resolve(dest_addr, "switch case target")?;
                sequence.insert_before(dest, Entry::Target(BranchTarget::multi(src, case as u32)));
            }
            // The case keys travel on the switch instruction from here on; the payload
            // pseudo-instruction is regenerated at sync time.
            match sequence.entry_mut(src) {
                Entry::Opcode(switch_insn) => switch_insn.set_payload(Some(payload)),
                _ => unreachable!("switch entry was just created as an opcode"),
            }
        }
    }

    // Pass 4: region start markers.
    for (try_idx, try_item) in body.tries().iter().enumerate() {
        let start = resolve(i64::from(try_item.start_addr), "try region start")?;
        sequence.insert_before(start, Entry::Try(TryMark::new(TryKind::Start, chain_heads[try_idx])));
    }

    // Pass 5: debug records.
    for item in body.debug() {
        let entry = match &item.record {
            DebugRecord::Instruction(op) => Entry::Debug(op.clone()),
            DebugRecord::Position(pos) => Entry::Position(*pos),
        };
        if i64::from(item.addr) == i64::from(code_units) {
            sequence.push_back(entry);
        } else {
            sequence.insert_before(resolve(i64::from(item.addr), "debug record")?, entry);
        }
    }

    tracing::debug!(
        method = %method.id(),
        instructions = instructions.len(),
        tries = body.tries().len(),
        entries = sequence.len(),
        "ballooned method"
    );

    Ok(BalloonedBody {
        sequence,
        registers: body.registers(),
        ins: body.ins(),
        outs: body.outs(),
    })
}

/// Resolves the payload data for the switch at instruction `idx`.
///
/// A switch either carries its payload inline (synthesized methods) or points at a payload
/// pseudo-instruction through its encoded offset (the raw dex shape).
fn switch_payload(
    method: &MethodRc,
    instructions: &[crate::instructions::DexInstruction],
    index_at_addr: &HashMap<u32, usize>,
    idx: usize,
    switch_addr: u32,
) -> Result<SwitchPayload> {
    let insn = &instructions[idx];
    let payload = match insn.payload() {
        Some(payload) => payload.clone(),
        None => {
            let payload_addr = i64::from(switch_addr) + i64::from(insn.offset());
            #[allow(clippy::cast_sign_loss)]
            let payload_idx = if payload_addr >= 0 {
                index_at_addr.get(&(payload_addr as u32)).copied()
            } else {
                None
            };
            let payload_idx = payload_idx.ok_or_else(|| {
                malformed_error!(
                    "switch at address {} in {} points at {} which is not an instruction",
                    switch_addr,
                    method.id(),
                    payload_addr
                )
            })?;
            instructions[payload_idx]
                .payload()
                .filter(|_| instructions[payload_idx].opcode().is_payload())
                .cloned()
                .ok_or_else(|| {
                    malformed_error!(
                        "switch at address {} points at {} which is not payload data",
                        switch_addr,
                        payload_addr
                    )
                })?
        }
    };

    let wants_packed = insn.opcode() == Opcode::PackedSwitch;
    match &payload {
        SwitchPayload::Packed { .. } if !wants_packed => Err(malformed_error!(
            "sparse-switch at address {} resolved to a packed payload",
            switch_addr
        )),
        SwitchPayload::Sparse { keys, targets } => {
            if wants_packed {
                return Err(malformed_error!(
                    "packed-switch at address {} resolved to a sparse payload",
                    switch_addr
                ));
            }
            if keys.len() != targets.len() {
                return Err(malformed_error!(
                    "sparse payload for switch at address {} has {} keys but {} targets",
                    switch_addr,
                    keys.len(),
                    targets.len()
                ));
            }
            Ok(payload)
        }
        SwitchPayload::Packed { .. } => Ok(payload),
    }
}
