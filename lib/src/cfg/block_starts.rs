use crate::jvm::code::{InsnId, InsnList, Node, TryCatchBlock};
use std::collections::HashSet;

/// Real instructions that begin a basic block, in list order
///
/// A block starts at the first instruction, at every jump or switch target, after every
/// conditional jump, and at every exception handler. In `precise` mode a block also starts after
/// every instruction that may throw, so each such instruction ends its block.
///
/// Starts given as virtual nodes are moved forward to the next real instruction; a start with
/// no real instruction after it is dropped.
pub fn block_starts(insns: &InsnList, tcbs: &[TryCatchBlock], precise: bool) -> Vec<InsnId> {
    let mut starts: HashSet<InsnId> = HashSet::new();
    let mut add = |id: Option<InsnId>| {
        if let Some(real) = id.and_then(|id| insns.first_real_from(id)) {
            starts.insert(real);
        }
    };

    add(insns.first());
    for id in insns {
        let node = insns.node(id);
        if let Node::Branch(branch) = node {
            for target in branch.jump_targets() {
                add(Some(target));
            }
            if branch.is_conditional() {
                add(insns.next_real(id));
            }
        }
        if precise && node.might_throw() {
            add(insns.next(id));
        }
    }
    for tcb in tcbs {
        add(Some(tcb.handler));
    }

    insns.iter().filter(|id| starts.contains(id)).collect()
}
