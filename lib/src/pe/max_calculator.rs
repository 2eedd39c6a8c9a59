use crate::cfg::ControlFlowGraph;
use crate::jvm::code::{InsnList, MethodCode, Node, TryCatchBlock};
use crate::jvm::MethodDescriptor;

/// Number of local slots the code needs: the parameters, plus every slot it reads or writes
pub fn max_locals(insns: &InsnList, descriptor: &MethodDescriptor, is_static: bool) -> usize {
    let mut max = descriptor.parameter_length(!is_static);
    for id in insns {
        if let Some((slot, width)) = insns.insn(id).and_then(|insn| insn.local_slot()) {
            max = max.max(slot as usize + width);
        }
    }
    max
}

/// Deepest the operand stack gets, in slots
///
/// Each block is walked once, with the height it is first reached with: the code starts with
/// an empty stack and handlers with just the exception.
pub fn max_stack(insns: &InsnList, tcbs: &[TryCatchBlock]) -> usize {
    let cfg = ControlFlowGraph::build(insns, tcbs);
    let mut visited = vec![false; cfg.blocks().len()];
    let mut max = 0;

    let mut roots = vec![];
    if let Some(first) = insns.first().and_then(|first| cfg.block_of(insns, first)) {
        roots.push((first, 0));
    }
    for tcb in tcbs {
        if let Some(handler) = cfg.block_of(insns, tcb.handler) {
            roots.push((handler, 1));
        }
    }

    for root in roots {
        let mut worklist = vec![root];
        while let Some((index, entry_height)) = worklist.pop() {
            if std::mem::replace(&mut visited[index], true) {
                continue;
            }
            let block = cfg.block(index);
            let mut height = entry_height as isize;
            max = max.max(entry_height);
            for id in block.nodes(insns) {
                height += match insns.node(id) {
                    Node::Insn(insn) => insn.stack_delta(),
                    Node::Branch(branch) => branch.stack_delta(),
                    Node::Label | Node::Line(_) => 0,
                };
                max = max.max(height.max(0) as usize);
            }
            for successor in block.successors.iter().rev() {
                worklist.push((*successor, height.max(0) as usize));
            }
        }
    }
    max
}

/// Recompute `max_locals` and `max_stack` of a method from its code
pub fn compute_maxs(method: &mut MethodCode) {
    method.max_locals = max_locals(
        &method.instructions,
        &method.descriptor,
        method.is_static(),
    );
    method.max_stack = max_stack(&method.instructions, &method.try_catch_blocks);
}
