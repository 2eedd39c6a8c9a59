//! This module contains the AST of JVM bytecode as the weaver manipulates it. The representation
//! is slightly different from the usual presentation to make it more convenient to rewrite
//! bytecode. For instance:
//!
//!   - The "wide" instruction doesn't show up at all, but instead gets merged into the
//!     instructions it is allowed to modify
//!
//!   - Some instructions (like the branches) get abstracted into one instruction with a field.
//!     This helps with repetitive pattern matches and also simplifies tasks like inverting a
//!     branch condition.
//!
//!   - Members are referenced symbolically (owner, name, descriptor) rather than through a
//!     constant pool, since the code is going to be spliced across methods and classes.
//!
//!   - `jsr`/`ret` are omitted. Class files targeting version 50 or later cannot contain them.
//!

use super::code::InsnId;
use super::{BaseType, FieldType, MethodDescriptor, RefType, RenderDescriptor};
use crate::util::Width;
use std::ops::Not;

/// Constant loadable with `ldc`, `ldc_w`, or `ldc2_w`
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(RefType),
}

impl Constant {
    /// Type of the value pushed on the stack when loading the constant
    pub fn field_type(&self) -> FieldType {
        match self {
            Constant::Integer(_) => FieldType::int(),
            Constant::Float(_) => FieldType::float(),
            Constant::Long(_) => FieldType::long(),
            Constant::Double(_) => FieldType::double(),
            Constant::String(_) => FieldType::string(),
            Constant::Class(_) => FieldType::object("java/lang/Class"),
        }
    }
}

impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Symbolic reference to a field
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Internal name of the class declaring the field
    pub owner: String,
    pub name: String,
    pub descriptor: FieldType,
}

impl FieldRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, descriptor: FieldType) -> Self {
        FieldRef {
            owner: owner.into(),
            name: name.into(),
            descriptor,
        }
    }
}

/// Symbolic reference to a method
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Internal name of the class declaring the method
    pub owner: String,
    pub name: String,
    pub descriptor: MethodDescriptor,
}

impl MethodRef {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: MethodDescriptor,
    ) -> Self {
        MethodRef {
            owner: owner.into(),
            name: name.into(),
            descriptor,
        }
    }
}

/// Call site of an `invokedynamic`
///
/// The bootstrap method is kept opaque: nothing in the weaver needs to look inside it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IndyRef {
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub bootstrap: String,
}

/// Non-branching JVM bytecode instruction
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Nop,
    AConstNull,
    IConstM1,
    IConst0,
    IConst1,
    IConst2,
    IConst3,
    IConst4,
    IConst5,
    LConst0,
    LConst1,
    FConst0,
    FConst1,
    FConst2,
    DConst0,
    DConst1,
    BiPush(i8),
    SiPush(i16),
    Ldc(Constant), // covers `ldc`, `ldc_w`, and `ldc2_w`
    ILoad(u16),    // covers `iload`, `iload{0,3}`, and `wide iload`
    LLoad(u16),
    FLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IStore(u16), // covers `istore`, `istore{0,3}`, and `wide istore`
    LStore(u16),
    FStore(u16),
    DStore(u16),
    AStore(u16),
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    ISh(ShiftType), // covers `ishr`, `ishl`, and `iushr`
    LSh(ShiftType), // covers `lshr`, `lshl`, and `lushr`
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    IInc(u16, i16), // covers `iinc` and `wide iinc`
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
    LCmp,
    FCmp(CompareMode), // covers `fcmpl` and `fcmpg`
    DCmp(CompareMode), // covers `dcmpl` and `dcmpg`
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    GetField(FieldRef),
    PutField(FieldRef),
    Invoke(InvokeType, MethodRef),
    InvokeDynamic(IndyRef),
    New(String),
    NewArray(BaseType),
    ANewArray(RefType),
    ArrayLength,
    CheckCast(RefType),
    InstanceOf(RefType),
    MonitorEnter,
    MonitorExit,
    MultiANewArray(RefType, u8),
}

impl Instruction {
    /// Numeric opcode of the instruction (the narrowest form where there are several)
    pub fn opcode(&self) -> u8 {
        use Instruction::*;
        match self {
            Nop => 0,
            AConstNull => 1,
            IConstM1 => 2,
            IConst0 => 3,
            IConst1 => 4,
            IConst2 => 5,
            IConst3 => 6,
            IConst4 => 7,
            IConst5 => 8,
            LConst0 => 9,
            LConst1 => 10,
            FConst0 => 11,
            FConst1 => 12,
            FConst2 => 13,
            DConst0 => 14,
            DConst1 => 15,
            BiPush(_) => 16,
            SiPush(_) => 17,
            Ldc(Constant::Long(_) | Constant::Double(_)) => 20,
            Ldc(_) => 18,
            ILoad(_) => 21,
            LLoad(_) => 22,
            FLoad(_) => 23,
            DLoad(_) => 24,
            ALoad(_) => 25,
            IALoad => 46,
            LALoad => 47,
            FALoad => 48,
            DALoad => 49,
            AALoad => 50,
            BALoad => 51,
            CALoad => 52,
            SALoad => 53,
            IStore(_) => 54,
            LStore(_) => 55,
            FStore(_) => 56,
            DStore(_) => 57,
            AStore(_) => 58,
            IAStore => 79,
            LAStore => 80,
            FAStore => 81,
            DAStore => 82,
            AAStore => 83,
            BAStore => 84,
            CAStore => 85,
            SAStore => 86,
            Pop => 87,
            Pop2 => 88,
            Dup => 89,
            DupX1 => 90,
            DupX2 => 91,
            Dup2 => 92,
            Dup2X1 => 93,
            Dup2X2 => 94,
            Swap => 95,
            IAdd => 96,
            LAdd => 97,
            FAdd => 98,
            DAdd => 99,
            ISub => 100,
            LSub => 101,
            FSub => 102,
            DSub => 103,
            IMul => 104,
            LMul => 105,
            FMul => 106,
            DMul => 107,
            IDiv => 108,
            LDiv => 109,
            FDiv => 110,
            DDiv => 111,
            IRem => 112,
            LRem => 113,
            FRem => 114,
            DRem => 115,
            INeg => 116,
            LNeg => 117,
            FNeg => 118,
            DNeg => 119,
            ISh(ShiftType::Left) => 120,
            LSh(ShiftType::Left) => 121,
            ISh(ShiftType::ArithmeticRight) => 122,
            LSh(ShiftType::ArithmeticRight) => 123,
            ISh(ShiftType::LogicalRight) => 124,
            LSh(ShiftType::LogicalRight) => 125,
            IAnd => 126,
            LAnd => 127,
            IOr => 128,
            LOr => 129,
            IXor => 130,
            LXor => 131,
            IInc(_, _) => 132,
            I2L => 133,
            I2F => 134,
            I2D => 135,
            L2I => 136,
            L2F => 137,
            L2D => 138,
            F2I => 139,
            F2L => 140,
            F2D => 141,
            D2I => 142,
            D2L => 143,
            D2F => 144,
            I2B => 145,
            I2C => 146,
            I2S => 147,
            LCmp => 148,
            FCmp(CompareMode::L) => 149,
            FCmp(CompareMode::G) => 150,
            DCmp(CompareMode::L) => 151,
            DCmp(CompareMode::G) => 152,
            GetStatic(_) => 178,
            PutStatic(_) => 179,
            GetField(_) => 180,
            PutField(_) => 181,
            Invoke(InvokeType::Virtual, _) => 182,
            Invoke(InvokeType::Special, _) => 183,
            Invoke(InvokeType::Static, _) => 184,
            Invoke(InvokeType::Interface, _) => 185,
            InvokeDynamic(_) => 186,
            New(_) => 187,
            NewArray(_) => 188,
            ANewArray(_) => 189,
            ArrayLength => 190,
            CheckCast(_) => 192,
            InstanceOf(_) => 193,
            MonitorEnter => 194,
            MonitorExit => 195,
            MultiANewArray(_, _) => 197,
        }
    }

    /// Mnemonic used in listings and diagnostics
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Ldc(_) => "ldc",
            other => opcode_mnemonic(other.opcode()),
        }
    }

    /// Local variable slot read or written by the instruction, along with the width accessed
    pub fn local_slot(&self) -> Option<(u16, usize)> {
        use Instruction::*;
        match self {
            ILoad(s) | FLoad(s) | ALoad(s) | IStore(s) | FStore(s) | AStore(s) => Some((*s, 1)),
            LLoad(s) | DLoad(s) | LStore(s) | DStore(s) => Some((*s, 2)),
            IInc(s, _) => Some((*s, 1)),
            _ => None,
        }
    }

    /// Mutable access to the local variable slot of the instruction
    pub fn local_slot_mut(&mut self) -> Option<&mut u16> {
        use Instruction::*;
        match self {
            ILoad(s) | LLoad(s) | FLoad(s) | DLoad(s) | ALoad(s) | IStore(s) | LStore(s)
            | FStore(s) | DStore(s) | AStore(s) | IInc(s, _) => Some(s),
            _ => None,
        }
    }

    pub fn is_load(&self) -> bool {
        use Instruction::*;
        matches!(self, ILoad(_) | LLoad(_) | FLoad(_) | DLoad(_) | ALoad(_))
    }

    pub fn is_store(&self) -> bool {
        use Instruction::*;
        matches!(self, IStore(_) | LStore(_) | FStore(_) | DStore(_) | AStore(_))
    }

    /// Whether the instruction just pushes a constant
    pub fn is_constant_load(&self) -> bool {
        (0..=20).contains(&self.opcode())
    }

    /// Whether executing the instruction can raise an exception (used for "precise" basic blocks)
    pub fn might_throw(&self) -> bool {
        use Instruction::*;
        matches!(
            self,
            IALoad
                | LALoad
                | FALoad
                | DALoad
                | AALoad
                | BALoad
                | CALoad
                | SALoad
                | IAStore
                | LAStore
                | FAStore
                | DAStore
                | AAStore
                | BAStore
                | CAStore
                | SAStore
                | ArrayLength
                | GetField(_)
                | PutField(_)
                | Invoke(_, _)
                | InvokeDynamic(_)
                | ANewArray(_)
                | NewArray(_)
                | MultiANewArray(_, _)
                | New(_)
                | Ldc(_)
                | CheckCast(_)
                | IDiv
                | IRem
                | LDiv
                | LRem
        )
    }

    /// Net change in operand stack height (in slots) after executing the instruction
    pub fn stack_delta(&self) -> isize {
        use Instruction::*;
        match self {
            Nop => 0,
            AConstNull | IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 => 1,
            LConst0 | LConst1 | DConst0 | DConst1 => 2,
            FConst0 | FConst1 | FConst2 | BiPush(_) | SiPush(_) => 1,
            Ldc(constant) => constant.width() as isize,
            ILoad(_) | FLoad(_) | ALoad(_) => 1,
            LLoad(_) | DLoad(_) => 2,
            IALoad | FALoad | AALoad | BALoad | CALoad | SALoad => -1,
            LALoad | DALoad => 0,
            IStore(_) | FStore(_) | AStore(_) => -1,
            LStore(_) | DStore(_) => -2,
            IAStore | FAStore | AAStore | BAStore | CAStore | SAStore => -3,
            LAStore | DAStore => -4,
            Pop => -1,
            Pop2 => -2,
            Dup | DupX1 | DupX2 => 1,
            Dup2 | Dup2X1 | Dup2X2 => 2,
            Swap => 0,
            IAdd | ISub | IMul | IDiv | IRem | IAnd | IOr | IXor | ISh(_) => -1,
            FAdd | FSub | FMul | FDiv | FRem => -1,
            LAdd | LSub | LMul | LDiv | LRem | LAnd | LOr | LXor => -2,
            DAdd | DSub | DMul | DDiv | DRem => -2,
            LSh(_) => -1,
            INeg | LNeg | FNeg | DNeg | IInc(_, _) => 0,
            I2L | I2D | F2L | F2D => 1,
            L2I | L2F | D2I | D2F => -1,
            I2F | L2D | F2I | D2L | I2B | I2C | I2S => 0,
            LCmp | DCmp(_) => -3,
            FCmp(_) => -1,
            GetStatic(field) => field.descriptor.width() as isize,
            PutStatic(field) => -(field.descriptor.width() as isize),
            GetField(field) => field.descriptor.width() as isize - 1,
            PutField(field) => -(field.descriptor.width() as isize) - 1,
            Invoke(typ, method) => {
                let has_this = *typ != InvokeType::Static;
                let returned = method.descriptor.return_type.as_ref().map_or(0, Width::width);
                returned as isize - method.descriptor.parameter_length(has_this) as isize
            }
            InvokeDynamic(indy) => {
                let returned = indy.descriptor.return_type.as_ref().map_or(0, Width::width);
                returned as isize - indy.descriptor.parameter_length(false) as isize
            }
            New(_) => 1,
            NewArray(_) | ANewArray(_) | ArrayLength | CheckCast(_) | InstanceOf(_) => 0,
            MonitorEnter | MonitorExit => -1,
            MultiANewArray(_, dims) => 1 - *dims as isize,
        }
    }
}

/// Size in bytes of the instruction in a class file
///
/// Where an instruction has several encodings, this picks the one a class writer would pick
/// (eg. `iload_0` over `iload 0`, `ldc_w` for constants since pool indices aren't known yet).
impl Width for Instruction {
    fn width(&self) -> usize {
        use Instruction::*;
        match self {
            BiPush(_) | NewArray(_) => 2,
            SiPush(_) => 3,
            Ldc(_) => 3,
            ILoad(s) | LLoad(s) | FLoad(s) | DLoad(s) | ALoad(s) | IStore(s) | LStore(s)
            | FStore(s) | DStore(s) | AStore(s) => match *s {
                0..=3 => 1,
                4..=255 => 2,
                _ => 4,
            },
            IInc(s, inc) => {
                if *s <= 255 && i8::try_from(*inc).is_ok() {
                    3
                } else {
                    6
                }
            }
            GetStatic(_) | PutStatic(_) | GetField(_) | PutField(_) => 3,
            Invoke(InvokeType::Interface, _) => 5,
            Invoke(_, _) => 3,
            InvokeDynamic(_) => 5,
            New(_) | ANewArray(_) | CheckCast(_) | InstanceOf(_) => 3,
            MultiANewArray(_, _) => 4,
            _ => 1,
        }
    }
}

/// Branching JVM bytecode instruction
///
/// Jump targets are label nodes of the instruction list containing the branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchInstruction {
    If(OrdComparison, InsnId), // covers `ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`
    IfICmp(OrdComparison, InsnId), // covers `if_icmpeq`, `if_icmpne`, `if_icmplt`, ... `if_icmple`
    IfACmp(EqComparison, InsnId), // covers `if_acmpeq`, `if_acmpne`
    IfNull(EqComparison, InsnId), // covers `ifnull`, `ifnonnull`
    Goto(InsnId),                 // covers `goto` and `goto_w`
    TableSwitch {
        /// Jump target if the argument is less than `low` or greater than
        /// `low + targets.len() - 1`
        default: InsnId,

        /// Value associated with the first jump target
        low: i32,

        /// Jump targets
        targets: Vec<InsnId>,
    },
    LookupSwitch {
        /// Jump target if there is no corresponding key
        default: InsnId,

        /// Jump targets (sorted so that the keys are ascending)
        targets: Vec<(i32, InsnId)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    AThrow,
}

impl BranchInstruction {
    /// Numeric opcode of the instruction
    pub fn opcode(&self) -> u8 {
        use BranchInstruction::*;
        match self {
            If(cmp, _) => 153 + cmp.opcode_offset(),
            IfICmp(cmp, _) => 159 + cmp.opcode_offset(),
            IfACmp(EqComparison::EQ, _) => 165,
            IfACmp(EqComparison::NE, _) => 166,
            Goto(_) => 167,
            TableSwitch { .. } => 170,
            LookupSwitch { .. } => 171,
            IReturn => 172,
            LReturn => 173,
            FReturn => 174,
            DReturn => 175,
            AReturn => 176,
            Return => 177,
            AThrow => 191,
            IfNull(EqComparison::EQ, _) => 198,
            IfNull(EqComparison::NE, _) => 199,
        }
    }

    /// Mnemonic used in listings and diagnostics
    pub fn mnemonic(&self) -> &'static str {
        opcode_mnemonic(self.opcode())
    }

    /// Whether control can continue with the next instruction
    pub fn falls_through(&self) -> bool {
        matches!(
            self,
            BranchInstruction::If(_, _)
                | BranchInstruction::IfICmp(_, _)
                | BranchInstruction::IfACmp(_, _)
                | BranchInstruction::IfNull(_, _)
        )
    }

    /// Conditional jump (switches are not included)
    pub fn is_conditional(&self) -> bool {
        self.falls_through()
    }

    pub fn is_switch(&self) -> bool {
        matches!(
            self,
            BranchInstruction::TableSwitch { .. } | BranchInstruction::LookupSwitch { .. }
        )
    }

    pub fn is_return(&self) -> bool {
        use BranchInstruction::*;
        matches!(
            self,
            IReturn | LReturn | FReturn | DReturn | AReturn | Return
        )
    }

    /// Labels the instruction can jump to (excluding the fall through)
    pub fn jump_targets(&self) -> Vec<InsnId> {
        use BranchInstruction::*;
        match self {
            If(_, lbl) | IfICmp(_, lbl) | IfACmp(_, lbl) | IfNull(_, lbl) | Goto(lbl) => {
                vec![*lbl]
            }
            TableSwitch {
                default, targets, ..
            } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().copied());
                ts
            }
            LookupSwitch { default, targets } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().map(|(_, target)| *target));
                ts
            }
            IReturn | LReturn | FReturn | DReturn | AReturn | Return | AThrow => vec![],
        }
    }

    /// Rewrite every label the instruction refers to
    pub fn map_labels(&self, map_label: impl Fn(InsnId) -> InsnId) -> BranchInstruction {
        use BranchInstruction::*;
        match self {
            If(op, lbl) => If(*op, map_label(*lbl)),
            IfICmp(op, lbl) => IfICmp(*op, map_label(*lbl)),
            IfACmp(op, lbl) => IfACmp(*op, map_label(*lbl)),
            IfNull(op, lbl) => IfNull(*op, map_label(*lbl)),
            Goto(lbl) => Goto(map_label(*lbl)),
            TableSwitch {
                default,
                low,
                targets,
            } => TableSwitch {
                default: map_label(*default),
                low: *low,
                targets: targets.iter().map(|lbl| map_label(*lbl)).collect(),
            },
            LookupSwitch { default, targets } => LookupSwitch {
                default: map_label(*default),
                targets: targets
                    .iter()
                    .map(|(key, lbl)| (*key, map_label(*lbl)))
                    .collect(),
            },
            IReturn => IReturn,
            LReturn => LReturn,
            FReturn => FReturn,
            DReturn => DReturn,
            AReturn => AReturn,
            Return => Return,
            AThrow => AThrow,
        }
    }

    /// Operand stack slots consumed by the instruction
    pub fn stack_delta(&self) -> isize {
        use BranchInstruction::*;
        match self {
            If(_, _) | IfNull(_, _) => -1,
            IfICmp(_, _) | IfACmp(_, _) => -2,
            Goto(_) | Return => 0,
            TableSwitch { .. } | LookupSwitch { .. } => -1,
            IReturn | FReturn | AReturn | AThrow => -1,
            LReturn | DReturn => -2,
        }
    }
}

/// Largest size in bytes the instruction may take once offsets are known
///
/// Switches get the worst-case padding. Far jumps need `goto_w`, and a far conditional jump
/// becomes the opposite condition hopping over a `goto_w`.
impl Width for BranchInstruction {
    fn width(&self) -> usize {
        match self {
            BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow => 1,

            BranchInstruction::Goto(_) => 5,

            BranchInstruction::If(_, _)
            | BranchInstruction::IfICmp(_, _)
            | BranchInstruction::IfACmp(_, _)
            | BranchInstruction::IfNull(_, _) => 3 + 5,

            BranchInstruction::TableSwitch { targets, .. } => 1 + 3 + 4 * (3 + targets.len()),

            BranchInstruction::LookupSwitch { targets, .. } => 1 + 3 + 8 * (1 + targets.len()),
        }
    }
}

/// Possible bit shifts
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ShiftType {
    Left,
    LogicalRight,
    ArithmeticRight,
}

/// Comparison modes for floating point
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompareMode {
    /// -1 on NaN
    L,

    /// 1 on NaN
    G,
}

/// Binary comparison operators available for `int` branches
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    NE,
    LT,
    GE,
    GT,
    LE,
}

impl OrdComparison {
    /// Position in the `ifeq`..`ifle` opcode range
    const fn opcode_offset(&self) -> u8 {
        match self {
            OrdComparison::EQ => 0,
            OrdComparison::NE => 1,
            OrdComparison::LT => 2,
            OrdComparison::GE => 3,
            OrdComparison::GT => 4,
            OrdComparison::LE => 5,
        }
    }

    /// Decide the comparison between two integers
    pub fn holds(&self, left: i32, right: i32) -> bool {
        match self {
            OrdComparison::EQ => left == right,
            OrdComparison::NE => left != right,
            OrdComparison::LT => left < right,
            OrdComparison::GE => left >= right,
            OrdComparison::GT => left > right,
            OrdComparison::LE => left <= right,
        }
    }
}

impl Not for OrdComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            OrdComparison::EQ => OrdComparison::NE,
            OrdComparison::GE => OrdComparison::LT,
            OrdComparison::GT => OrdComparison::LE,
            OrdComparison::LE => OrdComparison::GT,
            OrdComparison::LT => OrdComparison::GE,
            OrdComparison::NE => OrdComparison::EQ,
        }
    }
}

/// Equality/inequality comparison operators
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

impl Not for EqComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            EqComparison::EQ => EqComparison::NE,
            EqComparison::NE => EqComparison::EQ,
        }
    }
}

/// Type of method to invoke
///
/// Note: `InvokeDynamic` is kept separate because it has no owner class.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    Interface,
}

/// Mnemonic for a numeric opcode
pub fn opcode_mnemonic(opcode: u8) -> &'static str {
    match opcode {
        0 => "nop",
        1 => "aconst_null",
        2 => "iconst_m1",
        3 => "iconst_0",
        4 => "iconst_1",
        5 => "iconst_2",
        6 => "iconst_3",
        7 => "iconst_4",
        8 => "iconst_5",
        9 => "lconst_0",
        10 => "lconst_1",
        11 => "fconst_0",
        12 => "fconst_1",
        13 => "fconst_2",
        14 => "dconst_0",
        15 => "dconst_1",
        16 => "bipush",
        17 => "sipush",
        18 => "ldc",
        19 => "ldc_w",
        20 => "ldc2_w",
        21 => "iload",
        22 => "lload",
        23 => "fload",
        24 => "dload",
        25 => "aload",
        46 => "iaload",
        47 => "laload",
        48 => "faload",
        49 => "daload",
        50 => "aaload",
        51 => "baload",
        52 => "caload",
        53 => "saload",
        54 => "istore",
        55 => "lstore",
        56 => "fstore",
        57 => "dstore",
        58 => "astore",
        79 => "iastore",
        80 => "lastore",
        81 => "fastore",
        82 => "dastore",
        83 => "aastore",
        84 => "bastore",
        85 => "castore",
        86 => "sastore",
        87 => "pop",
        88 => "pop2",
        89 => "dup",
        90 => "dup_x1",
        91 => "dup_x2",
        92 => "dup2",
        93 => "dup2_x1",
        94 => "dup2_x2",
        95 => "swap",
        96 => "iadd",
        97 => "ladd",
        98 => "fadd",
        99 => "dadd",
        100 => "isub",
        101 => "lsub",
        102 => "fsub",
        103 => "dsub",
        104 => "imul",
        105 => "lmul",
        106 => "fmul",
        107 => "dmul",
        108 => "idiv",
        109 => "ldiv",
        110 => "fdiv",
        111 => "ddiv",
        112 => "irem",
        113 => "lrem",
        114 => "frem",
        115 => "drem",
        116 => "ineg",
        117 => "lneg",
        118 => "fneg",
        119 => "dneg",
        120 => "ishl",
        121 => "lshl",
        122 => "ishr",
        123 => "lshr",
        124 => "iushr",
        125 => "lushr",
        126 => "iand",
        127 => "land",
        128 => "ior",
        129 => "lor",
        130 => "ixor",
        131 => "lxor",
        132 => "iinc",
        133 => "i2l",
        134 => "i2f",
        135 => "i2d",
        136 => "l2i",
        137 => "l2f",
        138 => "l2d",
        139 => "f2i",
        140 => "f2l",
        141 => "f2d",
        142 => "d2i",
        143 => "d2l",
        144 => "d2f",
        145 => "i2b",
        146 => "i2c",
        147 => "i2s",
        148 => "lcmp",
        149 => "fcmpl",
        150 => "fcmpg",
        151 => "dcmpl",
        152 => "dcmpg",
        153 => "ifeq",
        154 => "ifne",
        155 => "iflt",
        156 => "ifge",
        157 => "ifgt",
        158 => "ifle",
        159 => "if_icmpeq",
        160 => "if_icmpne",
        161 => "if_icmplt",
        162 => "if_icmpge",
        163 => "if_icmpgt",
        164 => "if_icmple",
        165 => "if_acmpeq",
        166 => "if_acmpne",
        167 => "goto",
        168 => "jsr",
        169 => "ret",
        170 => "tableswitch",
        171 => "lookupswitch",
        172 => "ireturn",
        173 => "lreturn",
        174 => "freturn",
        175 => "dreturn",
        176 => "areturn",
        177 => "return",
        178 => "getstatic",
        179 => "putstatic",
        180 => "getfield",
        181 => "putfield",
        182 => "invokevirtual",
        183 => "invokespecial",
        184 => "invokestatic",
        185 => "invokeinterface",
        186 => "invokedynamic",
        187 => "new",
        188 => "newarray",
        189 => "anewarray",
        190 => "arraylength",
        191 => "athrow",
        192 => "checkcast",
        193 => "instanceof",
        194 => "monitorenter",
        195 => "monitorexit",
        196 => "wide",
        197 => "multianewarray",
        198 => "ifnull",
        199 => "ifnonnull",
        200 => "goto_w",
        _ => "<unknown>",
    }
}

/// Render a field reference as `owner.name descriptor`
pub(crate) fn render_member(owner: &str, name: &str, descriptor: &impl RenderDescriptor) -> String {
    format!("{}.{} {}", owner, name, descriptor.render())
}
