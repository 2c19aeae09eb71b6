//! Integration tests for the tail-call inliner and its liveness-cached context.

use dexscope::prelude::*;

fn opcodes_of(body: &MethodBody) -> Vec<Opcode> {
    body.instructions().iter().map(DexInstruction::opcode).collect()
}

/// Finds the single invoke entry in a ballooned transform.
fn find_invoke(transform: &TransformRc) -> EntryId {
    transform
        .lock()
        .sequence()
        .iter()
        .find(|(_, e)| e.opcode().is_some_and(|i| i.opcode().is_invoke()))
        .map(|(id, _)| id)
        .expect("caller must contain an invoke")
}

#[test]
fn tail_call_inline_remaps_registers_and_drops_invoke() {
    // Caller (1 register): const v0; invoke-static {v0}; return-void
    let caller = Method::new(
        MethodId::new(0x2001),
        "caller",
        Some(MethodBody::new(1, 0, 1, vec![
            DexInstruction::new(Opcode::Const).with_dest(0).with_literal(3),
            DexInstruction::new(Opcode::InvokeStatic).with_srcs(vec![0]).with_index(0x2002),
            DexInstruction::new(Opcode::ReturnVoid),
        ])),
    );
    // Callee (2 registers, 1 in): parameter arrives in v1; move v0 <- v1; return-void
    let callee = Method::new(
        MethodId::new(0x2002),
        "callee",
        Some(MethodBody::new(2, 1, 0, vec![
            DexInstruction::new(Opcode::Move).with_dest(0).with_srcs(vec![1]),
            DexInstruction::new(Opcode::ReturnVoid),
        ])),
    );

    let caller_rc = MethodTransform::get(&caller, false).unwrap();
    let invoke = find_invoke(&caller_rc);
    inline_tail_call(&caller, &callee, invoke).unwrap();
    caller_rc.lock().sync();

    let body = caller.body_ref().clone().unwrap();
    assert_eq!(
        opcodes_of(&body),
        vec![Opcode::Const, Opcode::Move, Opcode::ReturnVoid],
        "invoke replaced by the callee body minus its terminal return"
    );
    // Callee v1 (the parameter) became caller v0; callee v0 (a temporary) became fresh v1.
    let mov = &body.instructions()[1];
    assert_eq!(mov.dest(), Some(1));
    assert_eq!(mov.srcs(), &[0]);
    assert_eq!(body.registers(), 2, "frame grew by the callee's non-parameter register");
    assert!(
        !opcodes_of(&body).iter().any(|op| op.is_invoke()),
        "no reference to the invoke remains"
    );
}

#[test]
fn tail_call_inline_carries_callee_branches() {
    // Caller (1 register): invoke-static {v0}; return-void
    let caller = Method::new(
        MethodId::new(0x2003),
        "caller",
        Some(MethodBody::new(1, 1, 1, vec![
            DexInstruction::new(Opcode::InvokeStatic).with_srcs(vec![0]).with_index(0x2004),
            DexInstruction::new(Opcode::ReturnVoid),
        ])),
    );
    // Callee (1 register, 1 in): if-eqz v0, +3; nop; return-void
    let callee = Method::new(
        MethodId::new(0x2004),
        "callee",
        Some(MethodBody::new(1, 1, 0, vec![
            DexInstruction::new(Opcode::IfEqz).with_srcs(vec![0]).with_offset(3),
            DexInstruction::new(Opcode::Nop),
            DexInstruction::new(Opcode::ReturnVoid),
        ])),
    );

    let caller_rc = MethodTransform::get(&caller, false).unwrap();
    let invoke = find_invoke(&caller_rc);
    inline_tail_call(&caller, &callee, invoke).unwrap();
    caller_rc.lock().sync();

    let body = caller.body_ref().clone().unwrap();
    assert_eq!(
        opcodes_of(&body),
        vec![Opcode::IfEqz, Opcode::Nop, Opcode::ReturnVoid],
        "callee branch spliced; both methods' terminal returns collapse into the caller's"
    );
    assert_eq!(
        body.instructions()[0].offset(),
        3,
        "spliced branch re-resolves to the caller's return past the nop"
    );
}

#[test]
fn tail_call_inline_carries_exception_regions() {
    let caller = Method::new(
        MethodId::new(0x2005),
        "caller",
        Some(MethodBody::new(1, 1, 1, vec![
            DexInstruction::new(Opcode::InvokeStatic).with_srcs(vec![0]).with_index(0x2006),
            DexInstruction::new(Opcode::ReturnVoid),
        ])),
    );
    // Callee: try [0, 3) { invoke } catch-all @4; handler rethrows.
    let callee = Method::new(
        MethodId::new(0x2006),
        "callee",
        Some(
            MethodBody::new(1, 1, 0, vec![
                DexInstruction::new(Opcode::InvokeStatic).with_srcs(vec![0]).with_index(0x0),
                DexInstruction::new(Opcode::ReturnVoid),
                DexInstruction::new(Opcode::MoveException).with_dest(0),
                DexInstruction::new(Opcode::Throw).with_srcs(vec![0]),
            ])
            .with_tries(vec![TryItem::new(0, 3, Vec::new(), Some(4))]),
        ),
    );

    let caller_rc = MethodTransform::get(&caller, false).unwrap();
    let invoke = find_invoke(&caller_rc);
    inline_tail_call(&caller, &callee, invoke).unwrap();
    caller_rc.lock().sync();

    let body = caller.body_ref().clone().unwrap();
    assert_eq!(body.tries().len(), 1, "callee exception region survives the splice");
    assert_eq!(body.tries()[0].start_addr, 0);
    assert_eq!(body.tries()[0].insn_count, 3);
    assert_eq!(
        body.tries()[0].catch_all,
        Some(4),
        "handler address re-based past the caller's return"
    );
}

#[test]
fn inline_16regs_reuses_dead_caller_registers() {
    // Caller (3 registers): const v0; const v1; invoke-static {v1}; return-void.
    // Nothing is live after the invoke, so the callee temporary can reuse v0.
    let caller = Method::new(
        MethodId::new(0x2007),
        "caller",
        Some(MethodBody::new(3, 0, 1, vec![
            DexInstruction::new(Opcode::Const).with_dest(0).with_literal(1),
            DexInstruction::new(Opcode::Const).with_dest(1).with_literal(2),
            DexInstruction::new(Opcode::InvokeStatic).with_srcs(vec![1]).with_index(0x2008),
            DexInstruction::new(Opcode::ReturnVoid),
        ])),
    );
    // Callee (2 registers, 1 in): move v0 <- v1; return-void
    let callee = Method::new(
        MethodId::new(0x2008),
        "callee",
        Some(MethodBody::new(2, 1, 0, vec![
            DexInstruction::new(Opcode::Move).with_dest(0).with_srcs(vec![1]),
            DexInstruction::new(Opcode::ReturnVoid),
        ])),
    );

    let mut context = InlineContext::new(&caller, true).unwrap();
    assert_eq!(context.original_regs, 3);
    let invoke = {
        let transform = context.transformer().lock();
        transform
            .sequence()
            .iter()
            .find(|(_, e)| e.opcode().is_some_and(|i| i.opcode().is_invoke()))
            .map(|(id, _)| id)
            .unwrap()
    };

    assert!(inline_16regs(&mut context, &callee, invoke).unwrap());
    drop(context); // syncs the caller

    let body = caller.body_ref().clone().unwrap();
    assert_eq!(
        opcodes_of(&body),
        vec![Opcode::Const, Opcode::Const, Opcode::Move, Opcode::ReturnVoid],
    );
    let mov = &body.instructions()[2];
    assert_eq!(mov.dest(), Some(0), "temporary reuses dead v0 instead of a fresh register");
    assert_eq!(mov.srcs(), &[1], "parameter stays on the argument register");
    assert_eq!(body.registers(), 3, "frame does not grow past the ceiling");
}

#[test]
fn inline_16regs_fails_without_mutating_when_budget_exhausted() {
    // Caller uses 16 registers and keeps 15 of them live across the call site (the aputs
    // read v0..v14 afterwards); together with the argument register v15 every slot under
    // the ceiling is occupied.
    let mut caller_code = vec![
        DexInstruction::new(Opcode::InvokeStatic).with_srcs(vec![15]).with_index(0x200a),
    ];
    for base in (0..15u16).step_by(3) {
        caller_code.push(
            DexInstruction::new(Opcode::Aput).with_srcs(vec![base, base + 1, base + 2]),
        );
    }
    caller_code.push(DexInstruction::new(Opcode::ReturnVoid));
    let caller = Method::new(
        MethodId::new(0x2009),
        "caller",
        Some(MethodBody::new(16, 16, 2, caller_code)),
    );
    // Callee needs one temporary register.
    let callee = Method::new(
        MethodId::new(0x200a),
        "callee",
        Some(MethodBody::new(2, 1, 0, vec![
            DexInstruction::new(Opcode::Move).with_dest(0).with_srcs(vec![1]),
            DexInstruction::new(Opcode::ReturnVoid),
        ])),
    );

    let mut context = InlineContext::new(&caller, true).unwrap();
    let invoke = {
        let transform = context.transformer().lock();
        transform
            .sequence()
            .iter()
            .find(|(_, e)| e.opcode().is_some_and(|i| i.opcode().is_invoke()))
            .map(|(id, _)| id)
            .unwrap()
    };

    let inlined = inline_16regs(&mut context, &callee, invoke).unwrap();
    assert!(!inlined, "no dead register exists under the ceiling");

    {
        let transform = context.transformer().lock();
        assert!(
            transform.sequence().contains(invoke),
            "failed budget inline must not mutate the caller"
        );
        assert_eq!(transform.registers(), 16);
    }
    drop(context);

    let body = caller.body_ref().clone().unwrap();
    assert!(
        opcodes_of(&body).iter().any(|op| op.is_invoke()),
        "caller still performs the call after the failed inline"
    );
}

#[test]
fn inline_context_syncs_caller_on_drop() {
    let caller = Method::new(
        MethodId::new(0x200b),
        "caller",
        Some(MethodBody::new(1, 1, 1, vec![
            DexInstruction::new(Opcode::InvokeStatic).with_srcs(vec![0]).with_index(0x200c),
            DexInstruction::new(Opcode::ReturnVoid),
        ])),
    );
    let callee = Method::new(
        MethodId::new(0x200c),
        "callee",
        Some(MethodBody::new(1, 1, 0, vec![
            DexInstruction::new(Opcode::Nop),
            DexInstruction::new(Opcode::ReturnVoid),
        ])),
    );

    {
        let mut context = InlineContext::new(&caller, true).unwrap();
        let invoke = {
            let transform = context.transformer().lock();
            transform
                .sequence()
                .iter()
                .find(|(_, e)| e.opcode().is_some_and(|i| i.opcode().is_invoke()))
                .map(|(id, _)| id)
                .unwrap()
        };
        assert!(inline_16regs(&mut context, &callee, invoke).unwrap());
        // No explicit sync: the context guarantees it on scope exit.
    }

    let body = caller.body_ref().clone().unwrap();
    assert_eq!(
        opcodes_of(&body),
        vec![Opcode::Nop, Opcode::ReturnVoid],
        "context drop wrote the spliced body back"
    );
}
