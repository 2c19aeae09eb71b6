//! Opcode definitions, encoding formats, and the static classification table.
//!
//! Each opcode maps to exactly one encoding [`Format`] (the unconditional `goto` family is the
//! one place where the same operation exists in several strictly-wider forms - that is what
//! branch relaxation exploits) and to a set of [`OpcodeFlags`] describing how the instruction
//! affects control flow and whether the VM may raise an exception while executing it. The
//! may-throw classification is a static table over instruction kinds, not a dataflow result.

use bitflags::bitflags;

bitflags! {
    /// Static per-opcode property bits.
    ///
    /// These drive basic-block partitioning and exception-edge construction: a block ends at
    /// any instruction carrying [`BRANCH`](OpcodeFlags::BRANCH), [`SWITCH`](OpcodeFlags::SWITCH),
    /// [`RETURN`](OpcodeFlags::RETURN) or [`THROW`](OpcodeFlags::THROW), and a block whose last
    /// instruction carries [`CAN_THROW`](OpcodeFlags::CAN_THROW) gains an edge to every handler
    /// of the enclosing try region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpcodeFlags: u16 {
        /// Has a single pc-relative branch target (conditional or goto).
        const BRANCH = 0x0001;

        /// Unconditional `goto` family; control never falls through.
        const GOTO = 0x0002;

        /// Multi-way branch through a packed or sparse switch payload.
        const SWITCH = 0x0004;

        /// Leaves the method; control never falls through.
        const RETURN = 0x0008;

        /// Unconditionally raises; control never falls through.
        const THROW = 0x0010;

        /// May raise an exception at runtime (field/array access, invokes, casts,
        /// division, monitor operations, allocation).
        const CAN_THROW = 0x0020;

        /// Method invocation.
        const INVOKE = 0x0040;

        /// Payload pseudo-instruction: data, never executed.
        const PSEUDO = 0x0080;
    }
}

/// Encoding form of an instruction, named after the Dalvik format identifiers.
///
/// The digit is the width in 16-bit code units; the letters describe the operand layout
/// (`t` forms carry a pc-relative branch target). [`Format::Payload`] is the variable-width
/// form of the switch payload pseudo-instructions, whose width depends on the case count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// One unit, no registers (`nop`, `return-void`).
    F10x,
    /// One unit, one 8-bit register (`return`, `throw`, `monitor-enter`).
    F11x,
    /// One unit, two 4-bit registers (`move`, `array-length`).
    F12x,
    /// Two units, three 8-bit registers (`aget`, `add-int`).
    F23x,
    /// One unit, 8-bit branch offset (`goto`).
    F10t,
    /// Two units, 16-bit branch offset (`goto/16`).
    F20t,
    /// Three units, 32-bit branch offset (`goto/32`).
    F30t,
    /// Two units, one register and a 16-bit branch offset (`if-eqz`).
    F21t,
    /// Two units, two registers and a 16-bit branch offset (`if-eq`).
    F22t,
    /// Three units, one register and a 32-bit payload offset (`packed-switch`).
    F31t,
    /// Two units, one register and a 16-bit constant-pool index (`const-string`).
    F21c,
    /// Two units, two registers and a 16-bit constant-pool index (`iget`).
    F22c,
    /// Two units, one register and a 16-bit literal (`const/16` style constants).
    F21s,
    /// Three units, up to five argument registers and a method index (`invoke-*`).
    F35c,
    /// Variable width switch payload data.
    Payload,
}

impl Format {
    /// Returns the width of this form in 16-bit code units.
    ///
    /// [`Format::Payload`] has no fixed width; its size depends on the case count and is
    /// reported by [`crate::instructions::DexInstruction::width`] instead. This returns `0`
    /// for it so that accidental use is loud in address arithmetic.
    #[must_use]
    pub const fn units(self) -> u32 {
        match self {
            Format::F10x | Format::F11x | Format::F12x | Format::F10t => 1,
            Format::F23x
            | Format::F20t
            | Format::F21t
            | Format::F22t
            | Format::F21c
            | Format::F22c
            | Format::F21s => 2,
            Format::F30t | Format::F31t | Format::F35c => 3,
            Format::Payload => 0,
        }
    }
}

/// The Dalvik opcode subset the IR operates on.
///
/// Mnemonics follow the Dalvik bytecode listing (`Display` renders them, e.g.
/// `Opcode::IfEqz` as `if-eqz`). The subset covers every control-flow shape the IR must
/// preserve - conditional branches, the three goto widths, both switch kinds, returns and
/// throws - plus representative members of each may-throw family and enough arithmetic and
/// moves to express real method bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Opcode {
    /// No operation; also used as the alignment spacer before switch payloads.
    Nop,
    /// Register-to-register move.
    Move,
    /// Register-pair move.
    MoveWide,
    /// Object reference move.
    MoveObject,
    /// Fetch the result of the most recent invoke.
    MoveResult,
    /// Fetch a wide invoke result.
    MoveResultWide,
    /// Fetch an object invoke result.
    MoveResultObject,
    /// Fetch the caught exception at a handler entry.
    MoveException,
    /// Return from a `void` method.
    ReturnVoid,
    /// Return a 32-bit value.
    Return,
    /// Return a register pair.
    ReturnWide,
    /// Return an object reference.
    ReturnObject,
    /// Load a 16-bit literal.
    Const,
    /// Load a wide literal.
    ConstWide,
    /// Load a string by pool index.
    ConstString,
    /// Load a class by pool index.
    ConstClass,
    /// Acquire an object monitor.
    MonitorEnter,
    /// Release an object monitor.
    MonitorExit,
    /// Checked downcast.
    CheckCast,
    /// Type test.
    InstanceOf,
    /// Array length query.
    ArrayLength,
    /// Object allocation.
    NewInstance,
    /// Array allocation.
    NewArray,
    /// Raise the exception object in a register.
    Throw,
    /// Unconditional branch, 8-bit offset.
    Goto,
    /// Unconditional branch, 16-bit offset.
    #[strum(serialize = "goto/16")]
    Goto16,
    /// Unconditional branch, 32-bit offset.
    #[strum(serialize = "goto/32")]
    Goto32,
    /// Multi-way branch through a packed payload.
    PackedSwitch,
    /// Multi-way branch through a sparse payload.
    SparseSwitch,
    /// Branch if two registers compare equal.
    IfEq,
    /// Branch if two registers compare unequal.
    IfNe,
    /// Branch if less-than.
    IfLt,
    /// Branch if greater-or-equal.
    IfGe,
    /// Branch if greater-than.
    IfGt,
    /// Branch if less-or-equal.
    IfLe,
    /// Branch if a register is zero.
    IfEqz,
    /// Branch if a register is non-zero.
    IfNez,
    /// Branch if a register is negative.
    IfLtz,
    /// Branch if a register is non-negative.
    IfGez,
    /// Branch if a register is positive.
    IfGtz,
    /// Branch if a register is non-positive.
    IfLez,
    /// Array element load.
    Aget,
    /// Array element store.
    Aput,
    /// Instance field load.
    Iget,
    /// Instance field store.
    Iput,
    /// Static field load.
    Sget,
    /// Static field store.
    Sput,
    /// Virtual dispatch.
    InvokeVirtual,
    /// Superclass dispatch.
    InvokeSuper,
    /// Direct (private/constructor) dispatch.
    InvokeDirect,
    /// Static dispatch.
    InvokeStatic,
    /// Interface dispatch.
    InvokeInterface,
    /// 32-bit addition.
    AddInt,
    /// 32-bit subtraction.
    SubInt,
    /// 32-bit multiplication.
    MulInt,
    /// 32-bit division; throws on a zero divisor.
    DivInt,
    /// 32-bit remainder; throws on a zero divisor.
    RemInt,
    /// Packed switch payload data.
    PackedSwitchPayload,
    /// Sparse switch payload data.
    SparseSwitchPayload,
}

impl Opcode {
    /// Returns the encoding form of this opcode.
    #[must_use]
    pub const fn format(self) -> Format {
        match self {
            Opcode::Nop | Opcode::ReturnVoid => Format::F10x,
            Opcode::MoveResult
            | Opcode::MoveResultWide
            | Opcode::MoveResultObject
            | Opcode::MoveException
            | Opcode::Return
            | Opcode::ReturnWide
            | Opcode::ReturnObject
            | Opcode::MonitorEnter
            | Opcode::MonitorExit
            | Opcode::Throw => Format::F11x,
            Opcode::Move | Opcode::MoveWide | Opcode::MoveObject | Opcode::ArrayLength => {
                Format::F12x
            }
            Opcode::Aget
            | Opcode::Aput
            | Opcode::AddInt
            | Opcode::SubInt
            | Opcode::MulInt
            | Opcode::DivInt
            | Opcode::RemInt => Format::F23x,
            Opcode::Goto => Format::F10t,
            Opcode::Goto16 => Format::F20t,
            Opcode::Goto32 => Format::F30t,
            Opcode::IfEqz
            | Opcode::IfNez
            | Opcode::IfLtz
            | Opcode::IfGez
            | Opcode::IfGtz
            | Opcode::IfLez => Format::F21t,
            Opcode::IfEq
            | Opcode::IfNe
            | Opcode::IfLt
            | Opcode::IfGe
            | Opcode::IfGt
            | Opcode::IfLe => Format::F22t,
            Opcode::PackedSwitch | Opcode::SparseSwitch => Format::F31t,
            Opcode::ConstString
            | Opcode::ConstClass
            | Opcode::CheckCast
            | Opcode::NewInstance
            | Opcode::Sget
            | Opcode::Sput => Format::F21c,
            Opcode::InstanceOf
            | Opcode::NewArray
            | Opcode::Iget
            | Opcode::Iput => Format::F22c,
            Opcode::Const | Opcode::ConstWide => Format::F21s,
            Opcode::InvokeVirtual
            | Opcode::InvokeSuper
            | Opcode::InvokeDirect
            | Opcode::InvokeStatic
            | Opcode::InvokeInterface => Format::F35c,
            Opcode::PackedSwitchPayload | Opcode::SparseSwitchPayload => Format::Payload,
        }
    }

    /// Returns the classification flags of this opcode.
    #[must_use]
    pub const fn flags(self) -> OpcodeFlags {
        match self {
            Opcode::Goto | Opcode::Goto16 | Opcode::Goto32 => {
                OpcodeFlags::BRANCH.union(OpcodeFlags::GOTO)
            }
            Opcode::IfEq
            | Opcode::IfNe
            | Opcode::IfLt
            | Opcode::IfGe
            | Opcode::IfGt
            | Opcode::IfLe
            | Opcode::IfEqz
            | Opcode::IfNez
            | Opcode::IfLtz
            | Opcode::IfGez
            | Opcode::IfGtz
            | Opcode::IfLez => OpcodeFlags::BRANCH,
            Opcode::PackedSwitch | Opcode::SparseSwitch => OpcodeFlags::SWITCH,
            Opcode::ReturnVoid | Opcode::Return | Opcode::ReturnWide | Opcode::ReturnObject => {
                OpcodeFlags::RETURN
            }
            Opcode::Throw => OpcodeFlags::THROW.union(OpcodeFlags::CAN_THROW),
            Opcode::InvokeVirtual
            | Opcode::InvokeSuper
            | Opcode::InvokeDirect
            | Opcode::InvokeStatic
            | Opcode::InvokeInterface => OpcodeFlags::INVOKE.union(OpcodeFlags::CAN_THROW),
            Opcode::MonitorEnter
            | Opcode::MonitorExit
            | Opcode::CheckCast
            | Opcode::ArrayLength
            | Opcode::NewInstance
            | Opcode::NewArray
            | Opcode::Aget
            | Opcode::Aput
            | Opcode::Iget
            | Opcode::Iput
            | Opcode::Sget
            | Opcode::Sput
            | Opcode::DivInt
            | Opcode::RemInt => OpcodeFlags::CAN_THROW,
            Opcode::PackedSwitchPayload | Opcode::SparseSwitchPayload => OpcodeFlags::PSEUDO,
            _ => OpcodeFlags::empty(),
        }
    }

    /// Returns `true` for instructions with a single pc-relative target (gotos and `if-*`).
    #[must_use]
    pub const fn is_branch(self) -> bool {
        self.flags().contains(OpcodeFlags::BRANCH)
    }

    /// Returns `true` for the unconditional `goto` family.
    #[must_use]
    pub const fn is_goto(self) -> bool {
        self.flags().contains(OpcodeFlags::GOTO)
    }

    /// Returns `true` for conditional branches (`if-*`).
    #[must_use]
    pub const fn is_conditional_branch(self) -> bool {
        self.flags().contains(OpcodeFlags::BRANCH) && !self.flags().contains(OpcodeFlags::GOTO)
    }

    /// Returns `true` for `packed-switch` and `sparse-switch`.
    #[must_use]
    pub const fn is_switch(self) -> bool {
        self.flags().contains(OpcodeFlags::SWITCH)
    }

    /// Returns `true` for the return family.
    #[must_use]
    pub const fn is_return(self) -> bool {
        self.flags().contains(OpcodeFlags::RETURN)
    }

    /// Returns `true` for `throw`.
    #[must_use]
    pub const fn is_throw(self) -> bool {
        self.flags().contains(OpcodeFlags::THROW)
    }

    /// Returns `true` if the VM may raise an exception while executing this instruction.
    #[must_use]
    pub const fn can_throw(self) -> bool {
        self.flags().contains(OpcodeFlags::CAN_THROW)
    }

    /// Returns `true` for the invoke family.
    #[must_use]
    pub const fn is_invoke(self) -> bool {
        self.flags().contains(OpcodeFlags::INVOKE)
    }

    /// Returns `true` for payload pseudo-instructions.
    #[must_use]
    pub const fn is_payload(self) -> bool {
        self.flags().contains(OpcodeFlags::PSEUDO)
    }

    /// Returns `true` if control can continue to the following instruction.
    ///
    /// Conditional branches and switches fall through on the untaken path; gotos, returns and
    /// `throw` never do. Payload pseudo-instructions are data and are excluded as well.
    #[must_use]
    pub const fn can_fall_through(self) -> bool {
        !self
            .flags()
            .intersects(OpcodeFlags::GOTO.union(OpcodeFlags::RETURN).union(OpcodeFlags::THROW).union(OpcodeFlags::PSEUDO))
    }

    /// Returns the next strictly wider encoding of the same operation, if one exists.
    ///
    /// This is the widening step of branch relaxation: `goto` grows to `goto/16` grows to
    /// `goto/32`. Conditional branches and switches have exactly one form, so widening them is
    /// impossible - an offset that does not fit their form is an encoding-infeasibility error.
    #[must_use]
    pub const fn widened(self) -> Option<Opcode> {
        match self {
            Opcode::Goto => Some(Opcode::Goto16),
            Opcode::Goto16 => Some(Opcode::Goto32),
            _ => None,
        }
    }

    /// Returns `true` if a pc-relative distance of `offset` code units fits the offset field
    /// of this opcode's current encoding form.
    #[must_use]
    pub const fn branch_fits(self, offset: i32) -> bool {
        match self.format() {
            Format::F10t => offset >= i8::MIN as i32 && offset <= i8::MAX as i32,
            Format::F20t | Format::F21t | Format::F22t => {
                offset >= i16::MIN as i32 && offset <= i16::MAX as i32
            }
            // 32-bit offset fields (goto/32 and the switch payload offset) always fit.
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics_follow_dalvik_spelling() {
        assert_eq!(Opcode::IfEqz.to_string(), "if-eqz");
        assert_eq!(Opcode::Goto16.to_string(), "goto/16");
        assert_eq!(Opcode::Goto32.to_string(), "goto/32");
        assert_eq!(Opcode::MoveResultObject.to_string(), "move-result-object");
        assert_eq!(Opcode::PackedSwitchPayload.to_string(), "packed-switch-payload");
        assert_eq!(Opcode::InvokeStatic.to_string(), "invoke-static");
    }

    #[test]
    fn goto_widening_chain_is_strictly_wider() {
        let mut opcode = Opcode::Goto;
        let mut units = opcode.format().units();
        while let Some(wider) = opcode.widened() {
            assert!(
                wider.format().units() > units,
                "widening {opcode} -> {wider} must grow the encoding"
            );
            units = wider.format().units();
            opcode = wider;
        }
        assert_eq!(opcode, Opcode::Goto32);
    }

    #[test]
    fn conditional_branches_have_no_wider_form() {
        assert_eq!(Opcode::IfEq.widened(), None);
        assert_eq!(Opcode::PackedSwitch.widened(), None);
    }

    #[test]
    fn branch_fit_ranges() {
        assert!(Opcode::Goto.branch_fits(127));
        assert!(!Opcode::Goto.branch_fits(128));
        assert!(Opcode::Goto.branch_fits(-128));
        assert!(!Opcode::Goto.branch_fits(-129));
        assert!(Opcode::Goto16.branch_fits(32767));
        assert!(!Opcode::IfEqz.branch_fits(40000));
        assert!(Opcode::Goto32.branch_fits(i32::MAX));
    }

    #[test]
    fn fall_through_classification() {
        assert!(Opcode::IfEq.can_fall_through(), "conditional branches fall through");
        assert!(Opcode::PackedSwitch.can_fall_through(), "switches fall through on no match");
        assert!(!Opcode::Goto.can_fall_through());
        assert!(!Opcode::ReturnVoid.can_fall_through());
        assert!(!Opcode::Throw.can_fall_through());
    }

    #[test]
    fn may_throw_table() {
        for opcode in [
            Opcode::InvokeStatic,
            Opcode::Iget,
            Opcode::Aput,
            Opcode::CheckCast,
            Opcode::DivInt,
            Opcode::MonitorEnter,
            Opcode::Throw,
        ] {
            assert!(opcode.can_throw(), "{opcode} must be classified as may-throw");
        }
        for opcode in [Opcode::Move, Opcode::Const, Opcode::AddInt, Opcode::Goto] {
            assert!(!opcode.can_throw(), "{opcode} must not be classified as may-throw");
        }
    }
}
