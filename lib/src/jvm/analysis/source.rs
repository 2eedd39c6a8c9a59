use super::{produced_type, Interpreter};
use crate::jvm::code::InsnId;
use crate::jvm::{FieldType, Instruction};
use crate::util::Width;
use std::collections::BTreeSet;

/// Value along with the instructions that may have produced it
///
/// Parameters, the exception of a handler, and empty slots have no producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceValue {
    pub size: usize,
    pub insns: BTreeSet<InsnId>,
}

impl SourceValue {
    fn produced_by(size: usize, id: InsnId) -> SourceValue {
        SourceValue {
            size,
            insns: BTreeSet::from([id]),
        }
    }
}

impl Width for SourceValue {
    fn width(&self) -> usize {
        self.size
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct SourceInterpreter;

impl SourceInterpreter {
    fn produce(&self, id: InsnId, insn: &Instruction) -> SourceValue {
        let size = produced_type(insn).map_or(1, |typ| typ.width());
        SourceValue::produced_by(size, id)
    }
}

impl Interpreter for SourceInterpreter {
    type Value = SourceValue;

    fn new_value(&self, typ: Option<&FieldType>) -> SourceValue {
        SourceValue {
            size: typ.map_or(1, Width::width),
            insns: BTreeSet::new(),
        }
    }

    fn new_operation(&self, id: InsnId, insn: &Instruction) -> SourceValue {
        self.produce(id, insn)
    }

    /// The copying instruction becomes the source (eg. of a value loaded from a local)
    fn copy_operation(&self, id: InsnId, _insn: &Instruction, value: &SourceValue) -> SourceValue {
        SourceValue::produced_by(value.size, id)
    }

    fn unary_operation(&self, id: InsnId, insn: &Instruction, _value: &SourceValue) -> SourceValue {
        self.produce(id, insn)
    }

    fn binary_operation(
        &self,
        id: InsnId,
        insn: &Instruction,
        _value1: &SourceValue,
        _value2: &SourceValue,
    ) -> SourceValue {
        self.produce(id, insn)
    }

    fn ternary_operation(
        &self,
        id: InsnId,
        _insn: &Instruction,
        _value1: &SourceValue,
        _value2: &SourceValue,
        _value3: &SourceValue,
    ) -> SourceValue {
        SourceValue::produced_by(1, id)
    }

    fn nary_operation(
        &self,
        id: InsnId,
        insn: &Instruction,
        _values: &[SourceValue],
    ) -> SourceValue {
        self.produce(id, insn)
    }

    fn merge(&self, value1: &SourceValue, value2: &SourceValue) -> SourceValue {
        if value2.insns.is_subset(&value1.insns) && value1.size == value2.size {
            return value1.clone();
        }
        SourceValue {
            size: value1.size.min(value2.size),
            insns: value1.insns.union(&value2.insns).copied().collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::analysis::Analyzer;
    use crate::jvm::code::parse_method;

    #[test]
    fn sources_merge_across_branches() {
        let method = parse_method(
            r#"
            method static f (I)I
              iload 0
              ifeq OTHER
              iconst_1
              goto JOIN
            OTHER:
              iconst_2
            JOIN:
              ireturn
            "#,
        )
        .unwrap();
        let insns = &method.instructions;
        let frames = Analyzer::new(SourceInterpreter).analyze(&method).unwrap();
        let ret = insns.last().unwrap();
        let top = frames[&ret].stack_from_top(0).unwrap();
        let one = insns.get(2).unwrap();
        let two = insns.get(5).unwrap();
        assert_eq!(top.insns, BTreeSet::from([one, two]));
        assert_eq!(top.size, 1);
    }

    #[test]
    fn copies_are_their_own_source() {
        let method = parse_method(
            r#"
            method static f ()V
              dconst_1
              dup2
              pop2
              pop2
              return
            "#,
        )
        .unwrap();
        let insns = &method.instructions;
        let frames = Analyzer::new(SourceInterpreter).analyze(&method).unwrap();
        let dconst = insns.get(0).unwrap();
        let dup2 = insns.get(1).unwrap();
        let first_pop = insns.get(2).unwrap();
        let frame = &frames[&first_pop];
        assert_eq!(frame.stack_from_top(0).unwrap().insns, BTreeSet::from([dup2]));
        assert_eq!(frame.stack_from_top(1).unwrap().insns, BTreeSet::from([dconst]));
        assert_eq!(frame.stack_from_top(0).unwrap().size, 2);
    }
}
