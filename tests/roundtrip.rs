//! Integration tests for the balloon/sync round trip through the public API.
//!
//! These tests simulate real pass pipelines: build a raw body, balloon it, optionally
//! mutate, sync, and verify the re-encoded instructions, offsets, exception table and debug
//! list. Each test uses its own method identity because the transform cache is process-wide.

use dexscope::prelude::*;

/// Balloons `body` under `id`, applies `mutate`, syncs, and returns the re-encoded body.
fn round_trip<F>(id: u32, body: MethodBody, mutate: F) -> MethodBody
where
    F: FnOnce(&mut MethodTransform),
{
    let method = Method::new(MethodId::new(id), format!("round_trip_{id:x}"), Some(body));
    let transform = MethodTransform::get(&method, false).expect("balloon must succeed");
    {
        let mut transform = transform.lock();
        mutate(&mut transform);
        transform.sync();
    }
    let result = method.body_ref().clone().expect("sync must write a body back");
    result
}

#[test]
fn linear_code_round_trips_byte_identically() {
    let instructions = vec![
        DexInstruction::new(Opcode::Nop),
        DexInstruction::new(Opcode::Const).with_dest(0).with_literal(7),
        DexInstruction::new(Opcode::Return).with_srcs(vec![0]),
    ];
    let output = round_trip(0x1001, MethodBody::new(1, 0, 0, instructions.clone()), |_| {});
    assert_eq!(output.instructions(), &instructions[..]);
    assert_eq!(output.registers(), 1);
}

#[test]
fn branches_round_trip_with_identical_offsets() {
    // 0: if-eqz v0, +3    (to the second return)
    // 2: return-void
    // 3: return-void      <- branch target
    let instructions = vec![
        DexInstruction::new(Opcode::IfEqz).with_srcs(vec![0]).with_offset(3),
        DexInstruction::new(Opcode::ReturnVoid),
        DexInstruction::new(Opcode::ReturnVoid),
    ];
    let output = round_trip(0x1002, MethodBody::new(1, 1, 0, instructions.clone()), |_| {});
    assert_eq!(output.instructions(), &instructions[..]);
}

#[test]
fn backward_branch_keeps_negative_offset() {
    // 0: nop
    // 1: goto -1 (back to the nop)
    let instructions = vec![
        DexInstruction::new(Opcode::Nop),
        DexInstruction::new(Opcode::Goto).with_offset(-1),
    ];
    let output = round_trip(0x1003, MethodBody::new(0, 0, 0, instructions.clone()), |_| {});
    assert_eq!(output.instructions(), &instructions[..]);
}

#[test]
fn switch_with_tail_payload_round_trips_byte_identically() {
    // 0: const v0
    // 2: packed-switch v0, +6 (payload at 8)
    // 5: return-void              <- case 0 (+3 from the switch)
    // 6: return-void              <- case 1 (+4 from the switch)
    // 7: nop                      (alignment spacer)
    // 8: packed-switch-payload
    let instructions = vec![
        DexInstruction::new(Opcode::Const).with_dest(0),
        DexInstruction::new(Opcode::PackedSwitch).with_srcs(vec![0]).with_offset(6),
        DexInstruction::new(Opcode::ReturnVoid),
        DexInstruction::new(Opcode::ReturnVoid),
        DexInstruction::new(Opcode::Nop),
        DexInstruction::new(Opcode::PackedSwitchPayload).with_payload(SwitchPayload::Packed {
            first_key: 10,
            targets: vec![3, 4],
        }),
    ];
    let output = round_trip(0x1004, MethodBody::new(1, 0, 0, instructions.clone()), |_| {});
    assert_eq!(
        output.instructions(),
        &instructions[..],
        "tail-resident payload must re-encode in place, alignment nop included"
    );
}

#[test]
fn sparse_switch_preserves_case_keys() {
    // 0: sparse-switch v0, +3 (payload at 3, already aligned... 3 is odd, spacer expected)
    // Layout: switch(3 units) @0, return-void @3, payload after alignment @4.
    let instructions = vec![
        DexInstruction::new(Opcode::SparseSwitch).with_srcs(vec![0]).with_offset(4),
        DexInstruction::new(Opcode::ReturnVoid),
        DexInstruction::new(Opcode::SparseSwitchPayload).with_payload(SwitchPayload::Sparse {
            keys: vec![-100, 42],
            targets: vec![3, 3],
        }),
    ];
    let output = round_trip(0x1005, MethodBody::new(1, 1, 0, instructions), |_| {});

    let payload = output
        .instructions()
        .iter()
        .find_map(DexInstruction::payload)
        .expect("re-encoded body must contain the payload");
    match payload {
        SwitchPayload::Sparse { keys, targets } => {
            assert_eq!(keys, &vec![-100, 42], "case keys survive the round trip");
            assert_eq!(targets.len(), 2);
        }
        SwitchPayload::Packed { .. } => panic!("sparse switch re-encoded as packed"),
    }
}

#[test]
fn exception_table_round_trips() {
    // try [1, 4) { invoke } catch(Throwable-ish 0x30) @4, catch-all @6
    let instructions = vec![
        DexInstruction::new(Opcode::Nop),                                   // 0
        DexInstruction::new(Opcode::InvokeStatic).with_srcs(vec![0]),       // 1 (3 units)
        DexInstruction::new(Opcode::MoveException).with_dest(0),            // 4
        DexInstruction::new(Opcode::ReturnVoid),                            // 5
        DexInstruction::new(Opcode::MoveException).with_dest(0),            // 6
        DexInstruction::new(Opcode::ReturnVoid),                            // 7
    ];
    let tries = vec![TryItem::new(
        1,
        3,
        vec![CatchHandler::new(TypeId::new(0x30), 4)],
        Some(6),
    )];
    let body = MethodBody::new(1, 1, 0, instructions.clone()).with_tries(tries.clone());
    let output = round_trip(0x1006, body, |_| {});

    assert_eq!(output.instructions(), &instructions[..]);
    assert_eq!(output.tries(), &tries[..], "exception table survives the round trip");
}

#[test]
fn debug_records_are_readdressed() {
    let instructions = vec![
        DexInstruction::new(Opcode::Nop),        // 0
        DexInstruction::new(Opcode::ReturnVoid), // 1
    ];
    let debug = vec![
        DebugItem { addr: 0, record: DebugRecord::Position(SourcePosition::new(10, None)) },
        DebugItem { addr: 1, record: DebugRecord::Position(SourcePosition::new(11, None)) },
    ];
    let body = MethodBody::new(0, 0, 0, instructions).with_debug(debug.clone());

    // Drop the leading nop: the second position slides from address 1 to 0.
    let output = round_trip(0x1007, body, |transform| {
        let nop = transform
            .sequence()
            .iter()
            .find(|(_, e)| e.opcode().map(DexInstruction::opcode) == Some(Opcode::Nop))
            .map(|(id, _)| id)
            .expect("nop entry");
        transform.remove_opcode(nop);
    });

    assert_eq!(output.instructions().len(), 1);
    assert_eq!(output.debug().len(), 2);
    assert_eq!(output.debug()[0].addr, 0);
    assert_eq!(output.debug()[1].addr, 0, "position moved back with the removed nop");
}

#[test]
fn inserting_code_relocates_branches_without_bookkeeping() {
    // 0: if-eqz v0, +3; 2: return-void; 3: return-void (target)
    let instructions = vec![
        DexInstruction::new(Opcode::IfEqz).with_srcs(vec![0]).with_offset(3),
        DexInstruction::new(Opcode::ReturnVoid),
        DexInstruction::new(Opcode::ReturnVoid),
    ];
    let output = round_trip(0x1008, MethodBody::new(1, 1, 0, instructions), |transform| {
        // Insert two nops between the branch and its target.
        let branch = transform
            .sequence()
            .iter()
            .find(|(_, e)| e.opcode().map(DexInstruction::opcode) == Some(Opcode::IfEqz))
            .map(|(id, _)| id)
            .expect("branch entry");
        transform.insert_after(
            Some(branch),
            vec![DexInstruction::new(Opcode::Nop), DexInstruction::new(Opcode::Nop)],
        );
    });

    assert_eq!(
        output.instructions()[0].offset(),
        5,
        "branch offset must absorb the two inserted units"
    );
}

#[test]
fn relaxation_widens_goto_and_terminates() {
    // goto +N over 130 units of padding: +130 does not fit the 8-bit form, so sync must
    // widen to goto/16 (one failed pass) and then settle.
    let mut instructions = vec![DexInstruction::new(Opcode::Goto).with_offset(131)];
    for _ in 0..130 {
        instructions.push(DexInstruction::new(Opcode::Nop));
    }
    instructions.push(DexInstruction::new(Opcode::ReturnVoid));

    let method = Method::new(MethodId::new(0x1009), "widen", Some(MethodBody::new(0, 0, 0, instructions)));
    let transform = MethodTransform::get(&method, false).expect("balloon must succeed");
    {
        let mut transform = transform.lock();

        // First pass fails and widens; the second succeeds. Monotonic progress, observable.
        assert!(!transform.try_sync(), "8-bit goto cannot span 131 units");
        assert!(transform.try_sync(), "goto/16 spans it fine");
    }

    let body = method.body_ref().clone().unwrap();
    assert_eq!(body.instructions()[0].opcode(), Opcode::Goto16);
    assert_eq!(
        body.instructions()[0].offset(),
        132,
        "offset grows by the widened instruction's extra unit"
    );
}

#[test]
fn synced_transform_is_evicted_from_the_cache() {
    let body = MethodBody::new(0, 0, 0, vec![DexInstruction::new(Opcode::ReturnVoid)]);
    let method = Method::new(MethodId::new(0x100a), "evict", Some(body));

    let first = MethodTransform::get(&method, false).unwrap();
    first.lock().push_back(DexInstruction::new(Opcode::Nop));
    first.lock().sync();

    // A fresh request balloons the freshly written body rather than reusing the instance.
    let second = MethodTransform::get(&method, false).unwrap();
    assert!(
        !std::sync::Arc::ptr_eq(&first, &second),
        "sync must remove the transform from the cache"
    );
    let count = second
        .lock()
        .sequence()
        .iter()
        .filter(|(_, e)| e.opcode().is_some())
        .count();
    assert_eq!(count, 2, "second balloon sees the written-back nop");
    second.lock().sync();
}

#[test]
fn structured_builders_emit_valid_control_flow() {
    let body = MethodBody::new(1, 0, 0, Vec::new());
    let method = Method::new(MethodId::new(0x100b), "builder", Some(body));
    let transform = MethodTransform::get(&method, false).unwrap();
    {
        let mut transform = transform.lock();
        let head = transform.main_block().expect("ballooned sequence has a head anchor");
        let cur = transform.insert(head, DexInstruction::new(Opcode::Const).with_dest(0));
        let anchors =
            transform.make_if_else_block(cur, DexInstruction::new(Opcode::IfEqz).with_srcs(vec![0]));
        transform
            .insert(anchors.else_point, DexInstruction::new(Opcode::Const).with_dest(0).with_literal(1));
        transform
            .insert(anchors.then_point, DexInstruction::new(Opcode::Const).with_dest(0).with_literal(2));
        transform.insert(anchors.join, DexInstruction::new(Opcode::Return).with_srcs(vec![0]));
        transform.sync();
    }

    let body = method.body_ref().clone().unwrap();
    let opcodes: Vec<Opcode> = body.instructions().iter().map(DexInstruction::opcode).collect();
    assert_eq!(
        opcodes,
        vec![Opcode::Const, Opcode::IfEqz, Opcode::Const, Opcode::Goto, Opcode::Const, Opcode::Return],
    );
    // if-eqz at address 2 jumps over the else path and the goto to the then-const at 7.
    assert_eq!(body.instructions()[1].offset(), 5);
    // The goto at address 6 jumps over the then-const to the return at 9.
    assert_eq!(body.instructions()[3].offset(), 3);
}
