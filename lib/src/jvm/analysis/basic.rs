use super::{produced_type, Interpreter};
use crate::jvm::code::InsnId;
use crate::jvm::{BaseType, FieldType, Instruction};
use crate::util::Width;

/// Value as the verifier sees it, with all references collapsed
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BasicValue {
    /// Empty local, second half of a wide local, or the merge of incompatible values
    Uninitialized,
    Int,
    Float,
    Long,
    Double,
    Reference,
}

impl BasicValue {
    pub fn of_type(typ: &FieldType) -> BasicValue {
        match typ {
            FieldType::Base(BaseType::Long) => BasicValue::Long,
            FieldType::Base(BaseType::Double) => BasicValue::Double,
            FieldType::Base(BaseType::Float) => BasicValue::Float,
            FieldType::Base(_) => BasicValue::Int,
            FieldType::Ref(_) => BasicValue::Reference,
        }
    }

    /// Representative type for loading or storing the value (`None` when uninitialized)
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            BasicValue::Uninitialized => None,
            BasicValue::Int => Some(FieldType::int()),
            BasicValue::Float => Some(FieldType::float()),
            BasicValue::Long => Some(FieldType::long()),
            BasicValue::Double => Some(FieldType::double()),
            BasicValue::Reference => Some(FieldType::java_object()),
        }
    }
}

impl Width for BasicValue {
    fn width(&self) -> usize {
        match self {
            BasicValue::Long | BasicValue::Double => 2,
            _ => 1,
        }
    }
}

/// Interpreter tracking only the kind of every value
#[derive(Copy, Clone, Debug, Default)]
pub struct BasicInterpreter;

impl BasicInterpreter {
    fn produce(&self, insn: &Instruction) -> BasicValue {
        produced_type(insn).map_or(BasicValue::Uninitialized, |typ| BasicValue::of_type(&typ))
    }
}

impl Interpreter for BasicInterpreter {
    type Value = BasicValue;

    fn new_value(&self, typ: Option<&FieldType>) -> BasicValue {
        typ.map_or(BasicValue::Uninitialized, BasicValue::of_type)
    }

    fn new_operation(&self, _id: InsnId, insn: &Instruction) -> BasicValue {
        self.produce(insn)
    }

    fn copy_operation(&self, _id: InsnId, _insn: &Instruction, value: &BasicValue) -> BasicValue {
        *value
    }

    fn unary_operation(&self, _id: InsnId, insn: &Instruction, _value: &BasicValue) -> BasicValue {
        self.produce(insn)
    }

    fn binary_operation(
        &self,
        _id: InsnId,
        insn: &Instruction,
        _value1: &BasicValue,
        _value2: &BasicValue,
    ) -> BasicValue {
        self.produce(insn)
    }

    fn ternary_operation(
        &self,
        _id: InsnId,
        _insn: &Instruction,
        _value1: &BasicValue,
        _value2: &BasicValue,
        _value3: &BasicValue,
    ) -> BasicValue {
        BasicValue::Uninitialized
    }

    fn nary_operation(
        &self,
        _id: InsnId,
        insn: &Instruction,
        _values: &[BasicValue],
    ) -> BasicValue {
        self.produce(insn)
    }

    fn merge(&self, value1: &BasicValue, value2: &BasicValue) -> BasicValue {
        if value1 == value2 {
            *value1
        } else {
            BasicValue::Uninitialized
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::analysis::Analyzer;
    use crate::jvm::code::parse_method;

    #[test]
    fn merging_different_kinds_gives_uninitialized() {
        let method = parse_method(
            r#"
            method static f (I)V
              iload 0
              ifeq OTHER
              iconst_1
              istore 1
              goto JOIN
            OTHER:
              aconst_null
              astore 1
            JOIN:
              return
            "#,
        )
        .unwrap();
        let frames = Analyzer::new(BasicInterpreter).analyze(&method).unwrap();
        let ret = method.instructions.last().unwrap();
        assert_eq!(frames[&ret].local(1), Some(&BasicValue::Uninitialized));
        assert_eq!(frames[&ret].local(0), Some(&BasicValue::Int));
    }

    #[test]
    fn stores_clobber_wide_neighbours() {
        let method = parse_method(
            r#"
            method static f ()V
              lconst_1
              lstore 0
              iconst_0
              istore 1
              return
            "#,
        )
        .unwrap();
        let frames = Analyzer::new(BasicInterpreter).analyze(&method).unwrap();
        let ret = method.instructions.last().unwrap();
        assert_eq!(frames[&ret].local(0), Some(&BasicValue::Uninitialized));
        assert_eq!(frames[&ret].local(1), Some(&BasicValue::Int));
    }
}
