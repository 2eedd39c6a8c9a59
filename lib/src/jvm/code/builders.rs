//! Helpers for the instruction shapes the weaver emits or pattern matches
//!
//! These are free functions rather than methods on [`InsnList`] because most of the time the
//! caller is assembling a detached list that gets spliced in later.

use super::{InsnId, InsnList, Node};
use crate::jvm::{
    BaseType, BranchInstruction, Constant, FieldRef, FieldType, Instruction, InvokeType,
    MethodDescriptor, MethodRef, RefType,
};

/// Value known at weaving time that can be pushed onto the stack
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
}

impl Literal {
    /// Type of the value once on the stack
    pub fn field_type(&self) -> FieldType {
        match self {
            Literal::Boolean(_) => FieldType::Base(BaseType::Boolean),
            Literal::Byte(_) => FieldType::Base(BaseType::Byte),
            Literal::Char(_) => FieldType::Base(BaseType::Char),
            Literal::Short(_) => FieldType::Base(BaseType::Short),
            Literal::Int(_) => FieldType::int(),
            Literal::Long(_) => FieldType::long(),
            Literal::Float(_) => FieldType::float(),
            Literal::Double(_) => FieldType::double(),
            Literal::String(_) => FieldType::string(),
        }
    }
}

/// Push an `int` using the shortest encoding
pub fn const_int(integer: i32) -> Instruction {
    match integer {
        -1 => Instruction::IConstM1,
        0 => Instruction::IConst0,
        1 => Instruction::IConst1,
        2 => Instruction::IConst2,
        3 => Instruction::IConst3,
        4 => Instruction::IConst4,
        5 => Instruction::IConst5,
        -128..=127 => Instruction::BiPush(integer as i8),
        -32768..=32767 => Instruction::SiPush(integer as i16),
        _ => Instruction::Ldc(Constant::Integer(integer)),
    }
}

/// Push a `long`, using `lconst_*` where possible
pub fn const_long(long: i64) -> Instruction {
    match long {
        0 => Instruction::LConst0,
        1 => Instruction::LConst1,
        _ => Instruction::Ldc(Constant::Long(long)),
    }
}

/// Push a `float`, using `fconst_*` where possible
pub fn const_float(float: f32) -> Instruction {
    match float {
        f if f == 0.0 && f.is_sign_positive() => Instruction::FConst0,
        f if f == 1.0 => Instruction::FConst1,
        f if f == 2.0 => Instruction::FConst2,
        _ => Instruction::Ldc(Constant::Float(float)),
    }
}

/// Push a `double`, using `dconst_*` where possible
pub fn const_double(double: f64) -> Instruction {
    match double {
        d if d == 0.0 && d.is_sign_positive() => Instruction::DConst0,
        d if d == 1.0 => Instruction::DConst1,
        _ => Instruction::Ldc(Constant::Double(double)),
    }
}

/// Push a literal
pub fn load_literal(literal: &Literal) -> Instruction {
    match literal {
        Literal::Boolean(b) => const_int(*b as i32),
        Literal::Byte(b) => const_int(*b as i32),
        Literal::Char(c) => const_int(*c as i32),
        Literal::Short(s) => const_int(*s as i32),
        Literal::Int(i) => const_int(*i),
        Literal::Long(l) => const_long(*l),
        Literal::Float(f) => const_float(*f),
        Literal::Double(d) => const_double(*d),
        Literal::String(s) => Instruction::Ldc(Constant::String(s.clone())),
    }
}

/// Load a local variable of the given type
pub fn load_var(field_type: &FieldType, slot: u16) -> Instruction {
    match field_type {
        FieldType::Base(
            BaseType::Int | BaseType::Char | BaseType::Short | BaseType::Byte | BaseType::Boolean,
        ) => Instruction::ILoad(slot),
        FieldType::Base(BaseType::Float) => Instruction::FLoad(slot),
        FieldType::Base(BaseType::Long) => Instruction::LLoad(slot),
        FieldType::Base(BaseType::Double) => Instruction::DLoad(slot),
        FieldType::Ref(_) => Instruction::ALoad(slot),
    }
}

/// Store into a local variable of the given type
pub fn store_var(field_type: &FieldType, slot: u16) -> Instruction {
    match field_type {
        FieldType::Base(
            BaseType::Int | BaseType::Char | BaseType::Short | BaseType::Byte | BaseType::Boolean,
        ) => Instruction::IStore(slot),
        FieldType::Base(BaseType::Float) => Instruction::FStore(slot),
        FieldType::Base(BaseType::Long) => Instruction::LStore(slot),
        FieldType::Base(BaseType::Double) => Instruction::DStore(slot),
        FieldType::Ref(_) => Instruction::AStore(slot),
    }
}

/// Instructions pushing the default (zero) value of a type
///
/// Arrays get a `checkcast` after the `null` so the verifier sees the right type.
pub fn default_value(field_type: &FieldType) -> Vec<Instruction> {
    match field_type {
        FieldType::Base(
            BaseType::Int | BaseType::Char | BaseType::Short | BaseType::Byte | BaseType::Boolean,
        ) => vec![Instruction::IConst0],
        FieldType::Base(BaseType::Float) => vec![Instruction::FConst0],
        FieldType::Base(BaseType::Long) => vec![Instruction::LConst0],
        FieldType::Base(BaseType::Double) => vec![Instruction::DConst0],
        FieldType::Ref(RefType::Object(_)) => vec![Instruction::AConstNull],
        FieldType::Ref(array) => {
            vec![Instruction::AConstNull, Instruction::CheckCast(array.clone())]
        }
    }
}

/// Return instruction for a method returning the given type
pub fn return_insn(return_type: Option<&FieldType>) -> BranchInstruction {
    match return_type {
        None => BranchInstruction::Return,
        Some(FieldType::Base(
            BaseType::Int | BaseType::Char | BaseType::Short | BaseType::Byte | BaseType::Boolean,
        )) => BranchInstruction::IReturn,
        Some(FieldType::Base(BaseType::Float)) => BranchInstruction::FReturn,
        Some(FieldType::Base(BaseType::Long)) => BranchInstruction::LReturn,
        Some(FieldType::Base(BaseType::Double)) => BranchInstruction::DReturn,
        Some(FieldType::Ref(_)) => BranchInstruction::AReturn,
    }
}

/// `invokestatic Wrapper.valueOf` turning a primitive on the stack into its box
pub fn box_value(base_type: BaseType) -> Instruction {
    let wrapper = base_type.wrapper_class();
    invoke_static(
        wrapper,
        "valueOf",
        MethodDescriptor {
            parameters: vec![FieldType::Base(base_type)],
            return_type: Some(FieldType::object(wrapper)),
        },
    )
}

/// Whether the instruction is `Wrapper.valueOf(primitive)`, and if so for which primitive
pub fn boxed_type(insn: &Instruction) -> Option<BaseType> {
    match insn {
        Instruction::Invoke(InvokeType::Static, method) if method.name == "valueOf" => {
            let base = BaseType::from_wrapper_class(&method.owner)?;
            if method.descriptor.parameters == [FieldType::Base(base)] {
                Some(base)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Whether the instruction is `Wrapper.xxxValue()`, and if so for which primitive
pub fn unboxed_type(insn: &Instruction) -> Option<BaseType> {
    match insn {
        Instruction::Invoke(InvokeType::Virtual, method)
            if method.descriptor.parameters.is_empty() =>
        {
            let base = BaseType::from_wrapper_class(&method.owner)?;
            let expected = format!("{}Value", base.java_name());
            if method.name == expected {
                Some(base)
            } else {
                None
            }
        }
        _ => None,
    }
}

pub fn get_static(owner: &str, name: &str, field_type: FieldType) -> Instruction {
    Instruction::GetStatic(FieldRef::new(owner, name, field_type))
}

pub fn put_static(owner: &str, name: &str, field_type: FieldType) -> Instruction {
    Instruction::PutStatic(FieldRef::new(owner, name, field_type))
}

pub fn get_field(owner: &str, name: &str, field_type: FieldType) -> Instruction {
    Instruction::GetField(FieldRef::new(owner, name, field_type))
}

pub fn put_field(owner: &str, name: &str, field_type: FieldType) -> Instruction {
    Instruction::PutField(FieldRef::new(owner, name, field_type))
}

pub fn invoke_static(owner: &str, name: &str, descriptor: MethodDescriptor) -> Instruction {
    Instruction::Invoke(InvokeType::Static, MethodRef::new(owner, name, descriptor))
}

pub fn invoke_virtual(owner: &str, name: &str, descriptor: MethodDescriptor) -> Instruction {
    Instruction::Invoke(InvokeType::Virtual, MethodRef::new(owner, name, descriptor))
}

/// `Thread.currentThread()`
pub fn current_thread() -> Instruction {
    invoke_static(
        "java/lang/Thread",
        "currentThread",
        MethodDescriptor {
            parameters: vec![],
            return_type: Some(FieldType::object("java/lang/Thread")),
        },
    )
}

/// Append a jump to the label
pub fn jump_to(list: &mut InsnList, target: InsnId) -> InsnId {
    list.push_branch(BranchInstruction::Goto(target))
}

/// Integer pushed by a constant instruction (`iconst_*`, `bipush`, `sipush`, `ldc int`)
pub fn int_constant_operand(insn: &Instruction) -> Option<i32> {
    match insn {
        Instruction::IConstM1 => Some(-1),
        Instruction::IConst0 => Some(0),
        Instruction::IConst1 => Some(1),
        Instruction::IConst2 => Some(2),
        Instruction::IConst3 => Some(3),
        Instruction::IConst4 => Some(4),
        Instruction::IConst5 => Some(5),
        Instruction::BiPush(b) => Some(*b as i32),
        Instruction::SiPush(s) => Some(*s as i32),
        Instruction::Ldc(Constant::Integer(i)) => Some(*i),
        _ => None,
    }
}

/// String pushed by an `ldc`
pub fn string_constant_operand(insn: &Instruction) -> Option<&str> {
    match insn {
        Instruction::Ldc(Constant::String(s)) => Some(s),
        _ => None,
    }
}

/// Class literal pushed by the instruction
///
/// Reference types come from `ldc`, while primitive class literals are read from the `TYPE`
/// field of the corresponding wrapper class.
pub fn type_constant_operand(insn: &Instruction) -> Option<FieldType> {
    match insn {
        Instruction::Ldc(Constant::Class(ref_type)) => Some(FieldType::Ref(ref_type.clone())),
        Instruction::GetStatic(field) if field.name == "TYPE" => {
            BaseType::from_wrapper_class(&field.owner).map(FieldType::Base)
        }
        _ => None,
    }
}

/// Name of the enum constant loaded, if the instruction loads a constant of the given enum
pub fn enum_constant_operand<'a>(insn: &'a Instruction, enum_class: &str) -> Option<&'a str> {
    match insn {
        Instruction::GetStatic(field) if field.owner == enum_class => Some(&field.name),
        _ => None,
    }
}

/// Closest line number marker at or before the node
pub fn line_number(list: &InsnList, id: InsnId) -> Option<u32> {
    let mut cursor = Some(id);
    while let Some(current) = cursor {
        if let Node::Line(line) = list.node(current) {
            return Some(*line);
        }
        cursor = list.prev(current);
    }
    None
}

/// Build a detached list from instructions
pub fn insn_list(insns: impl IntoIterator<Item = Instruction>) -> InsnList {
    let mut list = InsnList::new();
    for insn in insns {
        list.push_insn(insn);
    }
    list
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::RenderDescriptor;

    #[test]
    fn shortest_constant_encodings() {
        assert_eq!(const_int(5), Instruction::IConst5);
        assert_eq!(const_int(-100), Instruction::BiPush(-100));
        assert_eq!(const_int(1000), Instruction::SiPush(1000));
        assert_eq!(const_int(100_000), Instruction::Ldc(Constant::Integer(100_000)));
        assert_eq!(const_long(1), Instruction::LConst1);
        assert_eq!(const_float(-0.0), Instruction::Ldc(Constant::Float(-0.0)));
        assert_eq!(load_literal(&Literal::Boolean(true)), Instruction::IConst1);
        assert_eq!(load_literal(&Literal::Char(65)), Instruction::BiPush(65));
    }

    #[test]
    fn defaults_and_boxing() {
        assert_eq!(default_value(&FieldType::long()), vec![Instruction::LConst0]);
        let arr = FieldType::array(FieldType::int());
        assert_eq!(default_value(&arr).len(), 2);

        let boxing = box_value(BaseType::Int);
        match &boxing {
            Instruction::Invoke(InvokeType::Static, m) => {
                assert_eq!(m.owner, "java/lang/Integer");
                assert_eq!(m.descriptor.render(), "(I)Ljava/lang/Integer;");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(boxed_type(&boxing), Some(BaseType::Int));

        let unboxing = invoke_virtual(
            "java/lang/Integer",
            "intValue",
            MethodDescriptor {
                parameters: vec![],
                return_type: Some(FieldType::int()),
            },
        );
        assert_eq!(unboxed_type(&unboxing), Some(BaseType::Int));
    }

    #[test]
    fn constant_operands() {
        assert_eq!(int_constant_operand(&Instruction::IConstM1), Some(-1));
        assert_eq!(int_constant_operand(&Instruction::ILoad(1)), None);
        let prim = get_static("java/lang/Integer", "TYPE", FieldType::object("java/lang/Class"));
        assert_eq!(type_constant_operand(&prim), Some(FieldType::int()));
        let cls = Instruction::Ldc(Constant::Class(RefType::object("java/lang/String")));
        assert_eq!(type_constant_operand(&cls), Some(FieldType::string()));
    }
}
