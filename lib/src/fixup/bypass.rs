use crate::jvm::code::{invoke_static, MethodCode, Node};
use crate::jvm::{BaseType, BranchInstruction, FieldType, MethodDescriptor, OrdComparison};
use crate::snippet::context::BYPASS_CHECK;

/// Keep the original code of an instrumented method, to run when the bypass is on
///
/// ```text
///     invokestatic BypassCheck.executeUninstrumented ()Z
///     ifne ORIGINAL
///     <instrumented code>
/// ORIGINAL:
///     <original code>
/// ```
///
/// Exactly one of the two versions runs per invocation: neither can fall through into the code
/// after it.
pub fn create_bypass(instrumented: &mut MethodCode, original: &MethodCode) {
    let insns = &mut instrumented.instructions;
    let check = MethodDescriptor {
        parameters: vec![],
        return_type: Some(FieldType::Base(BaseType::Boolean)),
    };
    let original_start = insns.push_label();
    insns.push_front(Node::Branch(BranchInstruction::If(
        OrdComparison::NE,
        original_start,
    )));
    insns.push_front(Node::Insn(invoke_static(
        BYPASS_CHECK,
        "executeUninstrumented",
        check,
    )));

    let map = insns.splice_after(original_start, original.instructions.clone());
    instrumented.try_catch_blocks.extend(
        original
            .try_catch_blocks
            .iter()
            .map(|tcb| tcb.remap(&map)),
    );
    instrumented.max_locals = instrumented.max_locals.max(original.max_locals);
    instrumented.max_stack = instrumented.max_stack.max(original.max_stack).max(1);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{parse_method, render_instruction};
    use crate::jvm::Instruction;

    #[test]
    fn original_code_behind_check() {
        let original = parse_method(
            r#"
            method static f ()V
            L0:
              invokestatic A.g ()V
            L1:
              return
            L2:
              pop
              return
            try L0 L1 L2 *
            "#,
        )
        .unwrap();
        let mut instrumented = original.clone();
        instrumented
            .instructions
            .push_front(Node::Insn(Instruction::Nop));

        create_bypass(&mut instrumented, &original);

        let insns = &instrumented.instructions;
        let rendered: Vec<String> = insns
            .iter()
            .filter_map(|id| match insns.node(id) {
                Node::Insn(insn) => Some(render_instruction(insn)),
                Node::Branch(branch) => Some(branch.mnemonic().to_owned()),
                _ => None,
            })
            .collect();
        assert_eq!(
            rendered,
            vec![
                "invokestatic ch/usi/dag/disl/dynamicbypass/BypassCheck.executeUninstrumented ()Z",
                "ifne",
                "nop",
                "invokestatic A.g ()V",
                "return",
                "pop",
                "return",
                "invokestatic A.g ()V",
                "return",
                "pop",
                "return"
            ]
        );

        // The jump lands on the copy, which has its own handler
        let jump = insns.next(insns.first().unwrap()).unwrap();
        let target = insns.branch(jump).unwrap().jump_targets()[0];
        let copy = &instrumented.try_catch_blocks[1];
        assert!(insns.is_before(target, copy.start));
        assert!(insns.is_before(instrumented.try_catch_blocks[0].handler, target));
        instrumented.validate_labels().unwrap();
    }
}
