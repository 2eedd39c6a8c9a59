use super::PureMethodRegistry;
use crate::jvm::analysis::{produced_type, Frame, Interpreter};
use crate::jvm::code::InsnId;
use crate::jvm::{
    BaseType, BranchInstruction, CompareMode, Constant, EqComparison, FieldType, Instruction,
    RefType, ShiftType,
};
use crate::util::Width;

/// Value known at weaving time
#[derive(Clone, Debug, PartialEq)]
pub enum Const {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Class(RefType),
    Null,

    /// Object allocated by the `new` at `site`
    Object { class: String, site: InsnId },

    /// Boxed primitive (eg. the result of `Integer.valueOf(3)`)
    Boxed(BaseType, Box<Const>),
}

impl Const {
    /// Identity of constants, comparing floating point values by their bits
    pub fn same(&self, other: &Const) -> bool {
        match (self, other) {
            (Const::Float(f), Const::Float(g)) => f.to_bits() == g.to_bits(),
            (Const::Double(d), Const::Double(e)) => d.to_bits() == e.to_bits(),
            (Const::Boxed(b, v), Const::Boxed(c, w)) => b == c && v.same(w),
            (a, b) => a == b,
        }
    }

    /// Class of the constant, if it is a non-null reference
    fn class(&self) -> Option<&str> {
        match self {
            Const::String(_) => Some("java/lang/String"),
            Const::Class(_) => Some("java/lang/Class"),
            Const::Object { class, .. } => Some(class),
            Const::Boxed(base, _) => Some(base.wrapper_class()),
            Const::Int(_) | Const::Long(_) | Const::Float(_) | Const::Double(_) | Const::Null => {
                None
            }
        }
    }

    /// Instruction pushing the constant, if there is one
    ///
    /// Objects and boxes only exist at run time and can't be pushed.
    pub fn load(&self) -> Option<Instruction> {
        use crate::jvm::code::{const_double, const_float, const_int, const_long};
        let insn = match self {
            Const::Int(i) => const_int(*i),
            Const::Long(l) => const_long(*l),
            Const::Float(f) => const_float(*f),
            Const::Double(d) => const_double(*d),
            Const::String(s) => Instruction::Ldc(Constant::String(s.clone())),
            Const::Class(c) => Instruction::Ldc(Constant::Class(c.clone())),
            Const::Null => Instruction::AConstNull,
            Const::Object { .. } | Const::Boxed(_, _) => return None,
        };
        Some(insn)
    }
}

/// Superclasses of the classes constants can have, up to `java/lang/Object`
fn superclasses(class: &str) -> &'static [&'static str] {
    match class {
        "java/lang/Integer" | "java/lang/Long" | "java/lang/Float" | "java/lang/Double"
        | "java/lang/Byte" | "java/lang/Short" => &["java/lang/Number", "java/lang/Object"],
        _ => &["java/lang/Object"],
    }
}

/// Interfaces implemented by the classes constants can have
fn interfaces(class: &str) -> &'static [&'static str] {
    match class {
        "java/lang/String" => &[
            "java/io/Serializable",
            "java/lang/Comparable",
            "java/lang/CharSequence",
        ],
        "java/lang/Class" => &["java/io/Serializable", "java/lang/reflect/Type"],
        "java/lang/Integer" | "java/lang/Long" | "java/lang/Float" | "java/lang/Double"
        | "java/lang/Byte" | "java/lang/Short" | "java/lang/Character" | "java/lang/Boolean" => {
            &["java/io/Serializable", "java/lang/Comparable"]
        }
        _ => &[],
    }
}

/// Abstract value of the constant domain
///
/// `cst` is `None` when the value isn't known.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstValue {
    pub size: usize,
    pub cst: Option<Const>,
}

impl ConstValue {
    pub fn unknown(size: usize) -> ConstValue {
        ConstValue { size, cst: None }
    }

    pub fn known(cst: Const) -> ConstValue {
        let size = match cst {
            Const::Long(_) | Const::Double(_) => 2,
            _ => 1,
        };
        ConstValue {
            size,
            cst: Some(cst),
        }
    }

    fn int(&self) -> Option<i32> {
        match self.cst {
            Some(Const::Int(i)) => Some(i),
            _ => None,
        }
    }
}

impl Width for ConstValue {
    fn width(&self) -> usize {
        self.size
    }
}

/// Interpreter computing the values known at weaving time
///
/// Calls are folded only for methods the registry can evaluate; everything else, along with
/// anything read from the heap, is unknown.
pub struct ConstInterpreter<'a> {
    registry: &'a PureMethodRegistry,
}

impl<'a> ConstInterpreter<'a> {
    pub fn new(registry: &'a PureMethodRegistry) -> ConstInterpreter<'a> {
        ConstInterpreter { registry }
    }
}

/// Value of unknown contents produced by the instruction
fn unknown_result(insn: &Instruction) -> ConstValue {
    ConstValue::unknown(produced_type(insn).map_or(1, |typ| typ.width()))
}

fn fold_unary(insn: &Instruction, value: &Const) -> Option<Const> {
    use Instruction::*;
    let folded = match (insn, value) {
        (INeg, Const::Int(i)) => Const::Int(i.wrapping_neg()),
        (LNeg, Const::Long(l)) => Const::Long(l.wrapping_neg()),
        (FNeg, Const::Float(f)) => Const::Float(-f),
        (DNeg, Const::Double(d)) => Const::Double(-d),
        (IInc(_, inc), Const::Int(i)) => Const::Int(i.wrapping_add(i32::from(*inc))),

        // Float to integer casts in Rust saturate and send NaN to 0, exactly like the JVM
        (I2L, Const::Int(i)) => Const::Long(i64::from(*i)),
        (I2F, Const::Int(i)) => Const::Float(*i as f32),
        (I2D, Const::Int(i)) => Const::Double(f64::from(*i)),
        (L2I, Const::Long(l)) => Const::Int(*l as i32),
        (L2F, Const::Long(l)) => Const::Float(*l as f32),
        (L2D, Const::Long(l)) => Const::Double(*l as f64),
        (F2I, Const::Float(f)) => Const::Int(*f as i32),
        (F2L, Const::Float(f)) => Const::Long(*f as i64),
        (F2D, Const::Float(f)) => Const::Double(f64::from(*f)),
        (D2I, Const::Double(d)) => Const::Int(*d as i32),
        (D2L, Const::Double(d)) => Const::Long(*d as i64),
        (D2F, Const::Double(d)) => Const::Float(*d as f32),
        (I2B, Const::Int(i)) => Const::Int(i32::from(*i as i8)),
        (I2C, Const::Int(i)) => Const::Int(i32::from(*i as u16)),
        (I2S, Const::Int(i)) => Const::Int(i32::from(*i as i16)),

        (CheckCast(_), cst) => cst.clone(),
        (InstanceOf(_), Const::Null) => Const::Int(0),
        (InstanceOf(RefType::Object(target)), cst) => {
            let class = cst.class()?;
            let target = target.0.as_str();
            let is_instance = class == target
                || superclasses(class).contains(&target)
                || interfaces(class).contains(&target);
            match cst {
                // A user class may have any supertypes: only the trivial answers are sure
                Const::Object { .. } if !is_instance => return None,
                _ => Const::Int(is_instance as i32),
            }
        }
        (InstanceOf(_), Const::String(_) | Const::Class(_) | Const::Boxed(_, _)) => Const::Int(0),
        _ => return None,
    };
    Some(folded)
}

fn fold_binary(insn: &Instruction, value1: &Const, value2: &Const) -> Option<Const> {
    use Instruction::*;
    let folded = match (insn, value1, value2) {
        (IAdd, Const::Int(a), Const::Int(b)) => Const::Int(a.wrapping_add(*b)),
        (ISub, Const::Int(a), Const::Int(b)) => Const::Int(a.wrapping_sub(*b)),
        (IMul, Const::Int(a), Const::Int(b)) => Const::Int(a.wrapping_mul(*b)),
        (IDiv, Const::Int(a), Const::Int(b)) if *b != 0 => Const::Int(a.wrapping_div(*b)),
        (IRem, Const::Int(a), Const::Int(b)) if *b != 0 => Const::Int(a.wrapping_rem(*b)),
        (IAnd, Const::Int(a), Const::Int(b)) => Const::Int(a & b),
        (IOr, Const::Int(a), Const::Int(b)) => Const::Int(a | b),
        (IXor, Const::Int(a), Const::Int(b)) => Const::Int(a ^ b),
        (ISh(shift), Const::Int(a), Const::Int(b)) => {
            let by = *b as u32;
            Const::Int(match shift {
                ShiftType::Left => a.wrapping_shl(by),
                ShiftType::ArithmeticRight => a.wrapping_shr(by),
                ShiftType::LogicalRight => (*a as u32).wrapping_shr(by) as i32,
            })
        }

        (LAdd, Const::Long(a), Const::Long(b)) => Const::Long(a.wrapping_add(*b)),
        (LSub, Const::Long(a), Const::Long(b)) => Const::Long(a.wrapping_sub(*b)),
        (LMul, Const::Long(a), Const::Long(b)) => Const::Long(a.wrapping_mul(*b)),
        (LDiv, Const::Long(a), Const::Long(b)) if *b != 0 => Const::Long(a.wrapping_div(*b)),
        (LRem, Const::Long(a), Const::Long(b)) if *b != 0 => Const::Long(a.wrapping_rem(*b)),
        (LAnd, Const::Long(a), Const::Long(b)) => Const::Long(a & b),
        (LOr, Const::Long(a), Const::Long(b)) => Const::Long(a | b),
        (LXor, Const::Long(a), Const::Long(b)) => Const::Long(a ^ b),
        (LSh(shift), Const::Long(a), Const::Int(b)) => {
            let by = *b as u32;
            Const::Long(match shift {
                ShiftType::Left => a.wrapping_shl(by),
                ShiftType::ArithmeticRight => a.wrapping_shr(by),
                ShiftType::LogicalRight => (*a as u64).wrapping_shr(by) as i64,
            })
        }

        (FAdd, Const::Float(a), Const::Float(b)) => Const::Float(a + b),
        (FSub, Const::Float(a), Const::Float(b)) => Const::Float(a - b),
        (FMul, Const::Float(a), Const::Float(b)) => Const::Float(a * b),
        (FDiv, Const::Float(a), Const::Float(b)) => Const::Float(a / b),
        (FRem, Const::Float(a), Const::Float(b)) => Const::Float(a % b),
        (DAdd, Const::Double(a), Const::Double(b)) => Const::Double(a + b),
        (DSub, Const::Double(a), Const::Double(b)) => Const::Double(a - b),
        (DMul, Const::Double(a), Const::Double(b)) => Const::Double(a * b),
        (DDiv, Const::Double(a), Const::Double(b)) => Const::Double(a / b),
        (DRem, Const::Double(a), Const::Double(b)) => Const::Double(a % b),

        (LCmp, Const::Long(a), Const::Long(b)) => Const::Int(a.cmp(b) as i32),
        (FCmp(mode), Const::Float(a), Const::Float(b)) => {
            Const::Int(float_compare(f64::from(*a), f64::from(*b), *mode))
        }
        (DCmp(mode), Const::Double(a), Const::Double(b)) => {
            Const::Int(float_compare(*a, *b, *mode))
        }
        _ => return None,
    };
    Some(folded)
}

fn float_compare(a: f64, b: f64, mode: CompareMode) -> i32 {
    match a.partial_cmp(&b) {
        Some(ordering) => ordering as i32,
        None if mode == CompareMode::L => -1,
        None => 1,
    }
}

impl<'a> Interpreter for ConstInterpreter<'a> {
    type Value = ConstValue;

    fn new_value(&self, typ: Option<&FieldType>) -> ConstValue {
        ConstValue::unknown(typ.map_or(1, Width::width))
    }

    fn new_operation(&self, id: InsnId, insn: &Instruction) -> ConstValue {
        use Instruction::*;
        let cst = match insn {
            AConstNull => Const::Null,
            IConstM1 => Const::Int(-1),
            IConst0 => Const::Int(0),
            IConst1 => Const::Int(1),
            IConst2 => Const::Int(2),
            IConst3 => Const::Int(3),
            IConst4 => Const::Int(4),
            IConst5 => Const::Int(5),
            LConst0 => Const::Long(0),
            LConst1 => Const::Long(1),
            FConst0 => Const::Float(0.0),
            FConst1 => Const::Float(1.0),
            FConst2 => Const::Float(2.0),
            DConst0 => Const::Double(0.0),
            DConst1 => Const::Double(1.0),
            BiPush(b) => Const::Int(i32::from(*b)),
            SiPush(s) => Const::Int(i32::from(*s)),
            Ldc(Constant::Integer(i)) => Const::Int(*i),
            Ldc(Constant::Long(l)) => Const::Long(*l),
            Ldc(Constant::Float(f)) => Const::Float(*f),
            Ldc(Constant::Double(d)) => Const::Double(*d),
            Ldc(Constant::String(s)) => Const::String(s.clone()),
            Ldc(Constant::Class(c)) => Const::Class(c.clone()),
            New(class) => Const::Object {
                class: class.clone(),
                site: id,
            },
            _ => return unknown_result(insn),
        };
        ConstValue::known(cst)
    }

    fn copy_operation(&self, _id: InsnId, _insn: &Instruction, value: &ConstValue) -> ConstValue {
        value.clone()
    }

    fn unary_operation(&self, _id: InsnId, insn: &Instruction, value: &ConstValue) -> ConstValue {
        match value.cst.as_ref().and_then(|cst| fold_unary(insn, cst)) {
            Some(cst) => ConstValue::known(cst),
            None => unknown_result(insn),
        }
    }

    fn binary_operation(
        &self,
        _id: InsnId,
        insn: &Instruction,
        value1: &ConstValue,
        value2: &ConstValue,
    ) -> ConstValue {
        let folded = match (&value1.cst, &value2.cst) {
            (Some(a), Some(b)) => fold_binary(insn, a, b),
            _ => None,
        };
        match folded {
            Some(cst) => ConstValue::known(cst),
            None => unknown_result(insn),
        }
    }

    fn ternary_operation(
        &self,
        _id: InsnId,
        _insn: &Instruction,
        _value1: &ConstValue,
        _value2: &ConstValue,
        _value3: &ConstValue,
    ) -> ConstValue {
        ConstValue::unknown(1)
    }

    fn nary_operation(&self, _id: InsnId, insn: &Instruction, values: &[ConstValue]) -> ConstValue {
        if let Instruction::Invoke(typ, method) = insn {
            let args: Option<Vec<Const>> = values.iter().map(|v| v.cst.clone()).collect();
            let result = args.and_then(|args| self.registry.execute(*typ, method, &args));
            if let Some(cst) = result {
                let expected = method.descriptor.return_type.as_ref().map_or(1, Width::width);
                let folded = ConstValue::known(cst);
                if folded.size == expected {
                    return folded;
                }
            }
        }
        unknown_result(insn)
    }

    fn merge(&self, value1: &ConstValue, value2: &ConstValue) -> ConstValue {
        match (&value1.cst, &value2.cst) {
            (Some(a), Some(b)) if value1.size == value2.size && a.same(b) => value1.clone(),
            _ => ConstValue::unknown(value1.size.min(value2.size)),
        }
    }
}

/// Outcome of a conditional jump given the frame before it, when it can be decided
///
/// `Some(true)` means the jump is always taken, `Some(false)` that it never is.
pub fn branch_outcome(branch: &BranchInstruction, frame: &Frame<ConstValue>) -> Option<bool> {
    let top = |index| frame.stack_from_top(index).and_then(|v| v.cst.as_ref());
    match branch {
        BranchInstruction::If(op, _) => {
            let value = frame.stack_from_top(0)?.int()?;
            Some(op.holds(value, 0))
        }
        BranchInstruction::IfICmp(op, _) => {
            let value2 = frame.stack_from_top(0)?.int()?;
            let value1 = frame.stack_from_top(1)?.int()?;
            Some(op.holds(value1, value2))
        }
        BranchInstruction::IfNull(op, _) => {
            let is_null = match top(0)? {
                Const::Null => true,
                other => {
                    other.class()?;
                    false
                }
            };
            Some(is_null == (*op == EqComparison::EQ))
        }
        BranchInstruction::IfACmp(op, _) => {
            let same = match (top(1)?, top(0)?) {
                (Const::Null, Const::Null) => true,
                (Const::Null, other) | (other, Const::Null) => {
                    other.class()?;
                    false
                }
                (
                    Const::Object { site: a, .. },
                    Const::Object { site: b, .. },
                ) if a != b => false,
                _ => return None,
            };
            Some(same == (*op == EqComparison::EQ))
        }
        _ => None,
    }
}

/// Target a switch always jumps to, given the frame before it
pub fn switch_target(branch: &BranchInstruction, frame: &Frame<ConstValue>) -> Option<InsnId> {
    let key = frame.stack_from_top(0)?.int()?;
    match branch {
        BranchInstruction::TableSwitch {
            default,
            low,
            targets,
        } => {
            let offset = i64::from(key) - i64::from(*low);
            let target = usize::try_from(offset)
                .ok()
                .and_then(|offset| targets.get(offset))
                .unwrap_or(default);
            Some(*target)
        }
        BranchInstruction::LookupSwitch { default, targets } => Some(
            targets
                .iter()
                .find(|(k, _)| *k == key)
                .map_or(*default, |(_, target)| *target),
        ),
        _ => None,
    }
}

/// Instructions with one operand worth folding when the operand is known
pub fn might_be_unary_const_op(insn: &Instruction) -> bool {
    use Instruction::*;
    matches!(
        insn,
        INeg | LNeg
            | FNeg
            | DNeg
            | I2L
            | I2F
            | I2D
            | L2I
            | L2F
            | L2D
            | F2I
            | F2L
            | F2D
            | D2I
            | D2L
            | D2F
            | I2B
            | I2C
            | I2S
            | CheckCast(_)
            | InstanceOf(_)
    )
}

/// Instructions with two operands worth folding when both operands are known
pub fn might_be_binary_const_op(insn: &Instruction) -> bool {
    use Instruction::*;
    matches!(
        insn,
        IAdd | LAdd
            | FAdd
            | DAdd
            | ISub
            | LSub
            | FSub
            | DSub
            | IMul
            | LMul
            | FMul
            | DMul
            | IDiv
            | LDiv
            | FDiv
            | DDiv
            | IRem
            | LRem
            | FRem
            | DRem
            | ISh(_)
            | LSh(_)
            | IAnd
            | LAnd
            | IOr
            | LOr
            | IXor
            | LXor
            | LCmp
            | FCmp(_)
            | DCmp(_)
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::analysis::Analyzer;
    use crate::jvm::code::{parse_method, MethodCode};
    use crate::pe::PartialEvaluator;

    fn fold(insn: Instruction, a: Const, b: Const) -> Option<Const> {
        fold_binary(&insn, &a, &b)
    }

    const INTS: [i32; 10] = [
        i32::MIN,
        i32::MIN + 1,
        -65536,
        -7,
        -1,
        0,
        1,
        3,
        i32::MAX - 1,
        i32::MAX,
    ];

    const LONGS: [i64; 10] = [
        i64::MIN,
        i64::MIN + 1,
        -(1 << 40),
        -7,
        -1,
        0,
        1,
        3,
        i64::MAX - 1,
        i64::MAX,
    ];

    const FLOATS: [f32; 12] = [
        f32::NAN,
        f32::NEG_INFINITY,
        -f32::MAX,
        -1.5,
        -0.0,
        0.0,
        1e-3,
        1.0,
        3.0,
        16_777_216.0,
        f32::MAX,
        f32::INFINITY,
    ];

    const SHIFTS: [ShiftType; 3] = [
        ShiftType::Left,
        ShiftType::ArithmeticRight,
        ShiftType::LogicalRight,
    ];

    /// Shift distances, including negative ones and ones past the width of a `long`
    fn distances() -> impl Iterator<Item = i32> {
        -2..=70
    }

    /// `int` operation computed on `long`s, then truncated to the low 32 bits
    fn int_reference(insn: &Instruction, a: i32, b: i32) -> Option<i32> {
        use Instruction::*;
        let (wide_a, wide_b) = (i64::from(a), i64::from(b));
        let wide = match insn {
            IAdd => wide_a + wide_b,
            ISub => wide_a - wide_b,
            IMul => wide_a * wide_b,
            IDiv | IRem if b == 0 => return None,
            IDiv => wide_a / wide_b,
            IRem => wide_a % wide_b,
            IAnd => wide_a & wide_b,
            IOr => wide_a | wide_b,
            IXor => wide_a ^ wide_b,
            ISh(ShiftType::Left) => wide_a << (b & 0x1f),
            ISh(ShiftType::ArithmeticRight) => wide_a >> (b & 0x1f),
            ISh(ShiftType::LogicalRight) => i64::from(a as u32) >> (b & 0x1f),
            other => panic!("no reference for {:?}", other),
        };
        Some(wide as i32)
    }

    /// `long` operation computed on 128 bits, then truncated to the low 64 bits
    fn long_reference(insn: &Instruction, a: i64, b: i64) -> Option<i64> {
        use Instruction::*;
        let (wide_a, wide_b) = (i128::from(a), i128::from(b));
        let wide = match insn {
            LAdd => wide_a + wide_b,
            LSub => wide_a - wide_b,
            LMul => wide_a * wide_b,
            LDiv | LRem if b == 0 => return None,
            LDiv => wide_a / wide_b,
            LRem => wide_a % wide_b,
            LAnd => wide_a & wide_b,
            LOr => wide_a | wide_b,
            LXor => wide_a ^ wide_b,
            other => panic!("no reference for {:?}", other),
        };
        Some(wide as i64)
    }

    fn long_shift_reference(shift: ShiftType, a: i64, distance: i32) -> i64 {
        let distance = distance & 0x3f;
        match shift {
            ShiftType::Left => (i128::from(a) << distance) as i64,
            ShiftType::ArithmeticRight => (i128::from(a) >> distance) as i64,
            ShiftType::LogicalRight => (i128::from(a as u64) >> distance) as i64,
        }
    }

    /// `float` operation computed on `double`s and rounded once more (exact for these operations)
    fn float_reference(insn: &Instruction, a: f32, b: f32) -> f32 {
        use Instruction::*;
        let (wide_a, wide_b) = (f64::from(a), f64::from(b));
        let wide = match insn {
            FAdd => wide_a + wide_b,
            FSub => wide_a - wide_b,
            FMul => wide_a * wide_b,
            FDiv => wide_a / wide_b,
            FRem => wide_a % wide_b,
            other => panic!("no reference for {:?}", other),
        };
        wide as f32
    }

    fn compare_reference(a: f64, b: f64, mode: CompareMode) -> i32 {
        if a > b {
            1
        } else if a == b {
            0
        } else if a < b {
            -1
        } else if mode == CompareMode::L {
            -1
        } else {
            1
        }
    }

    fn to_int_reference(value: f64) -> i32 {
        if value.is_nan() {
            0
        } else if value >= 2_147_483_647.0 {
            i32::MAX
        } else if value <= -2_147_483_648.0 {
            i32::MIN
        } else {
            value.trunc() as i32
        }
    }

    fn to_long_reference(value: f64) -> i64 {
        if value.is_nan() {
            0
        } else if value >= 9_223_372_036_854_775_807.0 {
            i64::MAX
        } else if value <= -9_223_372_036_854_775_808.0 {
            i64::MIN
        } else {
            value.trunc() as i64
        }
    }

    /// Same constant, any NaN being as good as any other
    fn agrees(folded: &Option<Const>, expected: &Const) -> bool {
        match (folded, expected) {
            (Some(Const::Float(f)), Const::Float(g)) if f.is_nan() && g.is_nan() => true,
            (Some(Const::Double(d)), Const::Double(e)) if d.is_nan() && e.is_nan() => true,
            (Some(folded), expected) => folded.same(expected),
            (None, _) => false,
        }
    }

    #[test]
    fn integer_arithmetic_wraps() {
        assert_eq!(
            fold(Instruction::IAdd, Const::Int(i32::MAX), Const::Int(1)),
            Some(Const::Int(i32::MIN))
        );
        assert_eq!(
            fold(Instruction::IDiv, Const::Int(i32::MIN), Const::Int(-1)),
            Some(Const::Int(i32::MIN))
        );
        assert_eq!(fold(Instruction::IRem, Const::Int(3), Const::Int(0)), None);
        assert_eq!(
            fold(
                Instruction::ISh(ShiftType::Left),
                Const::Int(1),
                Const::Int(33)
            ),
            Some(Const::Int(2))
        );
        assert_eq!(
            fold(
                Instruction::LSh(ShiftType::LogicalRight),
                Const::Long(-1),
                Const::Int(60)
            ),
            Some(Const::Long(15))
        );
    }

    #[test]
    fn int_folding_agrees_with_wide_arithmetic() {
        use Instruction::*;
        for insn in [IAdd, ISub, IMul, IDiv, IRem, IAnd, IOr, IXor] {
            for a in INTS {
                for b in INTS {
                    let folded = fold(insn.clone(), Const::Int(a), Const::Int(b));
                    let expected = int_reference(&insn, a, b).map(Const::Int);
                    assert_eq!(folded, expected, "{:?} {} {}", insn, a, b);
                }
            }
        }

        for shift in SHIFTS {
            let insn = ISh(shift);
            for a in INTS {
                for distance in distances() {
                    let folded = fold(insn.clone(), Const::Int(a), Const::Int(distance));
                    let expected = int_reference(&insn, a, distance).map(Const::Int);
                    assert_eq!(folded, expected, "{:?} {} {}", insn, a, distance);
                }
            }
        }
    }

    #[test]
    fn long_folding_agrees_with_wide_arithmetic() {
        use Instruction::*;
        for insn in [LAdd, LSub, LMul, LDiv, LRem, LAnd, LOr, LXor] {
            for a in LONGS {
                for b in LONGS {
                    let folded = fold(insn.clone(), Const::Long(a), Const::Long(b));
                    let expected = long_reference(&insn, a, b).map(Const::Long);
                    assert_eq!(folded, expected, "{:?} {} {}", insn, a, b);
                }
            }
        }

        for shift in SHIFTS {
            for a in LONGS {
                for distance in distances() {
                    let folded = fold(LSh(shift), Const::Long(a), Const::Int(distance));
                    let expected = long_shift_reference(shift, a, distance);
                    assert_eq!(
                        folded,
                        Some(Const::Long(expected)),
                        "{:?} {} {}",
                        shift,
                        a,
                        distance
                    );
                }
            }
        }

        for a in LONGS {
            for b in LONGS {
                let expected = compare_reference(a as f64, b as f64, CompareMode::G);
                let folded = fold(LCmp, Const::Long(a), Const::Long(b));
                // Neighbouring longs may collapse into one double
                if a as f64 != b as f64 {
                    assert_eq!(folded, Some(Const::Int(expected)), "lcmp {} {}", a, b);
                }
                assert_eq!(folded, Some(Const::Int(a.cmp(&b) as i32)), "lcmp {} {}", a, b);
            }
        }
    }

    #[test]
    fn float_folding_agrees_with_double_rounding() {
        use Instruction::*;
        for insn in [FAdd, FSub, FMul, FDiv, FRem] {
            for a in FLOATS {
                for b in FLOATS {
                    let folded = fold(insn.clone(), Const::Float(a), Const::Float(b));
                    let expected = Const::Float(float_reference(&insn, a, b));
                    assert!(
                        agrees(&folded, &expected),
                        "{:?} {} {}: {:?} instead of {:?}",
                        insn,
                        a,
                        b,
                        folded,
                        expected
                    );
                }
            }
        }

        // Division by zero never throws on floating point values
        for insn in [DDiv, DRem] {
            for a in FLOATS {
                let folded = fold(insn.clone(), Const::Double(f64::from(a)), Const::Double(0.0));
                assert!(matches!(folded, Some(Const::Double(_))), "{:?} {}", insn, a);
            }
        }
        assert!(agrees(
            &fold(DRem, Const::Double(-7.5), Const::Double(2.0)),
            &Const::Double(-1.5)
        ));
        assert!(agrees(
            &fold(DMul, Const::Double(-0.0), Const::Double(3.0)),
            &Const::Double(-0.0)
        ));
    }

    #[test]
    fn comparisons_follow_the_jvm_on_every_pair() {
        for mode in [CompareMode::L, CompareMode::G] {
            for a in FLOATS {
                for b in FLOATS {
                    let expected = compare_reference(f64::from(a), f64::from(b), mode);
                    assert_eq!(
                        fold(Instruction::FCmp(mode), Const::Float(a), Const::Float(b)),
                        Some(Const::Int(expected)),
                        "fcmp{:?} {} {}",
                        mode,
                        a,
                        b
                    );
                    let (a, b) = (f64::from(a), f64::from(b));
                    assert_eq!(
                        fold(Instruction::DCmp(mode), Const::Double(a), Const::Double(b)),
                        Some(Const::Int(expected)),
                        "dcmp{:?} {} {}",
                        mode,
                        a,
                        b
                    );
                }
            }
        }
    }

    #[test]
    fn conversions_saturate_on_every_value() {
        let mut values: Vec<f64> = FLOATS.iter().map(|f| f64::from(*f)).collect();
        values.extend([
            0.999,
            -0.999,
            2_147_483_520.0,
            3e9,
            -3e9,
            1e19,
            -1e19,
            -9_223_372_036_854_775_808.0,
        ]);
        for value in values {
            let float = value as f32;
            assert_eq!(
                fold_unary(&Instruction::F2I, &Const::Float(float)),
                Some(Const::Int(to_int_reference(f64::from(float)))),
                "f2i {}",
                float
            );
            assert_eq!(
                fold_unary(&Instruction::F2L, &Const::Float(float)),
                Some(Const::Long(to_long_reference(f64::from(float)))),
                "f2l {}",
                float
            );
            assert_eq!(
                fold_unary(&Instruction::D2I, &Const::Double(value)),
                Some(Const::Int(to_int_reference(value))),
                "d2i {}",
                value
            );
            assert_eq!(
                fold_unary(&Instruction::D2L, &Const::Double(value)),
                Some(Const::Long(to_long_reference(value))),
                "d2l {}",
                value
            );
        }

        for a in INTS {
            let low = a & 0xffff;
            assert_eq!(
                fold_unary(&Instruction::I2B, &Const::Int(a)),
                Some(Const::Int(((a & 0xff) ^ 0x80) - 0x80))
            );
            assert_eq!(
                fold_unary(&Instruction::I2C, &Const::Int(a)),
                Some(Const::Int(low))
            );
            assert_eq!(
                fold_unary(&Instruction::I2S, &Const::Int(a)),
                Some(Const::Int((low ^ 0x8000) - 0x8000))
            );
            assert_eq!(
                fold_unary(&Instruction::INeg, &Const::Int(a)),
                int_reference(&Instruction::ISub, 0, a).map(Const::Int)
            );
        }
    }

    fn evaluate(listing: &str) -> MethodCode {
        let mut method = parse_method(listing).unwrap();
        let registry = PureMethodRegistry::standard();
        PartialEvaluator::new(&registry)
            .evaluate(&mut method)
            .unwrap();
        method
    }

    /// Constant on the stack when the method returns, if known
    fn returned(method: &MethodCode) -> Option<Const> {
        let insns = &method.instructions;
        let registry = PureMethodRegistry::standard();
        let frames = Analyzer::new(ConstInterpreter::new(&registry))
            .analyze(method)
            .unwrap();
        let ret = insns.iter().find(|id| insns.node(*id).is_return())?;
        frames.get(&ret)?.stack_from_top(0)?.cst.clone()
    }

    fn real_count(method: &MethodCode) -> usize {
        let insns = &method.instructions;
        insns.iter().filter(|id| insns.node(*id).is_real()).count()
    }

    #[test]
    fn evaluated_int_code_returns_the_jvm_result() {
        use Instruction::*;
        let operands = [i32::MIN, -1, 0, 1, 7, i32::MAX];
        let operations = [
            IAdd,
            ISub,
            IMul,
            IDiv,
            IRem,
            ISh(ShiftType::Left),
            ISh(ShiftType::ArithmeticRight),
            ISh(ShiftType::LogicalRight),
        ];
        for insn in operations {
            for a in operands {
                for b in operands.iter().copied().chain([31, 32, 33]) {
                    let method = evaluate(&format!(
                        "method static f ()I\n  ldc {}\n  ldc {}\n  {}\n  ireturn\n",
                        a,
                        b,
                        insn.mnemonic()
                    ));
                    match int_reference(&insn, a, b) {
                        Some(expected) => {
                            assert_eq!(real_count(&method), 2, "{:?} {} {}", insn, a, b);
                            assert_eq!(
                                returned(&method),
                                Some(Const::Int(expected)),
                                "{:?} {} {}",
                                insn,
                                a,
                                b
                            );
                        }
                        // Division by zero throws at run time, so it stays
                        None => assert_eq!(real_count(&method), 4, "{:?} {} {}", insn, a, b),
                    }
                }
            }
        }
    }

    #[test]
    fn evaluated_long_code_returns_the_jvm_result() {
        use Instruction::*;
        let operands = [i64::MIN, -1, 0, 1, 7, i64::MAX];
        for insn in [LAdd, LSub, LMul, LDiv, LRem] {
            for a in operands {
                for b in operands {
                    let method = evaluate(&format!(
                        "method static f ()J\n  ldc {}L\n  ldc {}L\n  {}\n  lreturn\n",
                        a,
                        b,
                        insn.mnemonic()
                    ));
                    match long_reference(&insn, a, b) {
                        Some(expected) => assert_eq!(
                            returned(&method),
                            Some(Const::Long(expected)),
                            "{:?} {} {}",
                            insn,
                            a,
                            b
                        ),
                        None => assert_eq!(real_count(&method), 4, "{:?} {} {}", insn, a, b),
                    }
                }
            }
        }
        for shift in SHIFTS {
            for distance in [-1, 0, 63, 64, 65] {
                let method = evaluate(&format!(
                    "method static f ()J\n  ldc -5L\n  ldc {}\n  {}\n  lreturn\n",
                    distance,
                    LSh(shift).mnemonic()
                ));
                assert_eq!(
                    returned(&method),
                    Some(Const::Long(long_shift_reference(shift, -5, distance))),
                    "{:?} {}",
                    shift,
                    distance
                );
            }
        }
    }

    #[test]
    fn conversions_follow_the_jvm() {
        assert_eq!(
            fold_unary(&Instruction::F2I, &Const::Float(f32::NAN)),
            Some(Const::Int(0))
        );
        assert_eq!(
            fold_unary(&Instruction::D2L, &Const::Double(1e300)),
            Some(Const::Long(i64::MAX))
        );
        assert_eq!(
            fold_unary(&Instruction::I2C, &Const::Int(-1)),
            Some(Const::Int(0xffff))
        );
        assert_eq!(
            fold_unary(&Instruction::I2B, &Const::Int(200)),
            Some(Const::Int(-56))
        );
    }

    #[test]
    fn nan_comparisons_depend_on_the_mode() {
        let nan = Const::Float(f32::NAN);
        assert_eq!(
            fold(Instruction::FCmp(CompareMode::L), nan.clone(), Const::Float(0.0)),
            Some(Const::Int(-1))
        );
        assert_eq!(
            fold(Instruction::FCmp(CompareMode::G), nan, Const::Float(0.0)),
            Some(Const::Int(1))
        );
        assert_eq!(
            fold(Instruction::LCmp, Const::Long(1), Const::Long(2)),
            Some(Const::Int(-1))
        );
    }

    #[test]
    fn instance_checks() {
        let string = Const::String(String::from("s"));
        let instance_of = |class: &str| Instruction::InstanceOf(RefType::object(class));
        assert_eq!(
            fold_unary(&instance_of("java/lang/CharSequence"), &string),
            Some(Const::Int(1))
        );
        assert_eq!(
            fold_unary(&instance_of("java/lang/Integer"), &string),
            Some(Const::Int(0))
        );
        assert_eq!(
            fold_unary(&instance_of("java/lang/Integer"), &Const::Null),
            Some(Const::Int(0))
        );
        let object = Const::Object {
            class: String::from("me/Foo"),
            site: InsnId(0),
        };
        assert_eq!(
            fold_unary(&instance_of("java/lang/Object"), &object),
            Some(Const::Int(1))
        );
        assert_eq!(fold_unary(&instance_of("me/Bar"), &object), None);
    }

    #[test]
    fn merges_keep_only_agreeing_constants() {
        let registry = PureMethodRegistry::default();
        let interpreter = ConstInterpreter::new(&registry);
        let zero = ConstValue::known(Const::Float(0.0));
        let negative_zero = ConstValue::known(Const::Float(-0.0));
        assert_eq!(interpreter.merge(&zero, &zero), zero);
        assert_eq!(interpreter.merge(&zero, &negative_zero), ConstValue::unknown(1));
    }

    #[test]
    fn branches_and_switches_are_decided() {
        let method = parse_method(
            r#"
            method static f ()I
              iconst_2
              tableswitch 0 ZERO ONE default DEFAULT
            ZERO:
              iconst_0
              ireturn
            ONE:
              iconst_1
              ireturn
            DEFAULT:
              aconst_null
              ifnull NULL
              iconst_3
              ireturn
            NULL:
              iconst_4
              ireturn
            "#,
        )
        .unwrap();
        let insns = &method.instructions;
        let registry = PureMethodRegistry::standard();
        let frames = Analyzer::new(ConstInterpreter::new(&registry))
            .analyze(&method)
            .unwrap();

        let switch = insns.get(1).unwrap();
        let default = insns.get(8).unwrap();
        assert_eq!(
            switch_target(insns.branch(switch).unwrap(), &frames[&switch]),
            Some(default)
        );

        let ifnull = insns.get(10).unwrap();
        assert_eq!(
            branch_outcome(insns.branch(ifnull).unwrap(), &frames[&ifnull]),
            Some(true)
        );
    }
}
