//! Partial evaluation of woven code
//!
//! Once snippets are woven, a lot of their code depends only on values known at weaving time:
//! static context values, constant guards, boxing of constants. The [`PartialEvaluator`] folds
//! that code away with a fixed sequence of passes over the method:
//!
//!   1. conditional jumps and switches on known values become unconditional, and the blocks no
//!      longer reachable are dropped
//!   2. operations on known operands, and loads of locals holding known values, become constant
//!      loads
//!   3. stores that are never read are dropped, then values that are produced without side
//!      effects and immediately popped are dropped (repeated until neither finds anything)
//!   4. jumps to the next instruction are dropped
//!   5. exception handlers protecting no instructions are dropped
//!
//! Every pass recomputes the control flow graph and frames it needs from the current code.
//! Which calls are free of side effects (and how to compute them) is decided by a
//! [`PureMethodRegistry`].

mod constant;
mod max_calculator;
mod pure_methods;

pub use constant::*;
pub use max_calculator::*;
pub use pure_methods::*;

use crate::cfg::ControlFlowGraph;
use crate::jvm::analysis::{Analyzer, Frame, Frames, SourceInterpreter, SourceValue};
use crate::jvm::code::{InsnId, InsnList, MethodCode, Node, TryCatchBlock};
use crate::jvm::{BranchInstruction, Error, Instruction, InvokeType};
use crate::util::Width;
use log::debug;
use std::collections::{HashMap, HashSet, VecDeque};

pub struct PartialEvaluator<'a> {
    registry: &'a PureMethodRegistry,
}

impl<'a> PartialEvaluator<'a> {
    pub fn new(registry: &'a PureMethodRegistry) -> PartialEvaluator<'a> {
        PartialEvaluator { registry }
    }

    /// Simplify the method in place
    ///
    /// Returns whether the code or the exception table changed. The code may legitimately fall
    /// off its end (eg. a snippet body before it gets spliced somewhere).
    pub fn evaluate(&self, method: &mut MethodCode) -> Result<bool, Error> {
        let before = real_nodes(&method.instructions);
        let handlers_before = method.try_catch_blocks.len();

        let appended = method.instructions.push_branch(BranchInstruction::Return);
        compute_maxs(method);

        self.conditional_reduction(method)?;
        self.replace_load_with_ldc(method)?;
        loop {
            let mut removed = remove_dead_store(method);
            removed |= self.remove_pop(method)?;
            if !removed {
                break;
            }
        }
        remove_unused_jump(&mut method.instructions);
        remove_unused_handler(method);

        method.instructions.remove(appended);

        let after = real_nodes(&method.instructions);
        let changed = before != after || handlers_before != method.try_catch_blocks.len();
        if changed {
            debug!(
                "partial evaluation of {}: {} instructions left of {}",
                method.display_name(),
                after.len(),
                before.len()
            );
        }
        Ok(changed)
    }

    fn const_frames(&self, method: &MethodCode) -> Result<Frames<ConstValue>, Error> {
        Analyzer::new(ConstInterpreter::new(self.registry)).analyze(method)
    }

    /// Turn decided conditional jumps and switches into `pop`s and `goto`s
    fn conditional_reduction(&self, method: &mut MethodCode) -> Result<bool, Error> {
        let frames = self.const_frames(method)?;
        let mut cfg = ControlFlowGraph::build(&method.instructions, &method.try_catch_blocks);
        let insns = &mut method.instructions;
        let mut changed = false;

        for index in 0..cfg.blocks().len() {
            let exit = cfg.block(index).exit;
            let (branch, frame) = match (insns.branch(exit), frames.get(&exit)) {
                (Some(branch), Some(frame)) => (branch.clone(), frame),
                _ => continue,
            };

            let (operands, target) = if branch.is_conditional() {
                let operands = match branch {
                    BranchInstruction::IfICmp(_, _) | BranchInstruction::IfACmp(_, _) => 2,
                    _ => 1,
                };
                match branch_outcome(&branch, frame) {
                    Some(true) => (operands, branch.jump_targets().first().copied()),
                    Some(false) => (operands, None),
                    None => continue,
                }
            } else if let Some(target) = switch_target(&branch, frame) {
                (1, Some(target))
            } else {
                continue;
            };

            // The exit is rewritten in place so that the block keeps its bounds
            for _ in 1..operands {
                insns.insert_before(exit, Node::Insn(Instruction::Pop));
            }
            match target {
                Some(target) => {
                    insns.insert_before(exit, Node::Insn(Instruction::Pop));
                    *insns.node_mut(exit) = Node::Branch(BranchInstruction::Goto(target));
                }
                None => *insns.node_mut(exit) = Node::Insn(Instruction::Pop),
            }

            let kept = match target {
                Some(target) => cfg.block_of(insns, target),
                None => insns.next(exit).and_then(|next| cfg.block_of(insns, next)),
            };
            let block = cfg.block(index);
            let dropped: Vec<usize> = block
                .successors
                .iter()
                .chain(block.joins.iter())
                .copied()
                .filter(|succ| Some(*succ) != kept)
                .collect();
            for succ in dropped {
                cfg.unlink(index, succ);
            }
            changed = true;
        }

        changed |= remove_unused_bb(insns, &method.try_catch_blocks, &cfg);
        Ok(changed)
    }

    /// Replace operations whose result is known by a constant load
    ///
    /// The operands are popped just before the constant is pushed; those pops are cleaned up
    /// along with the operands by `remove_pop`.
    fn replace_load_with_ldc(&self, method: &mut MethodCode) -> Result<bool, Error> {
        use crate::jvm::analysis::Interpreter;

        let frames = self.const_frames(method)?;
        let interpreter = ConstInterpreter::new(self.registry);
        let insns = &mut method.instructions;
        let mut changed = false;

        for id in insns.ids() {
            let (insn, frame) = match (insns.insn(id), frames.get(&id)) {
                (Some(insn), Some(frame)) => (insn.clone(), frame),
                _ => continue,
            };

            match insn {
                Instruction::IInc(slot, _) => {
                    let folded = match frame.local(slot as usize) {
                        Some(value) => interpreter.unary_operation(id, &insn, value),
                        None => continue,
                    };
                    if let Some(Const::Int(value)) = folded.cst {
                        insns.insert_before(id, Node::Insn(crate::jvm::code::const_int(value)));
                        *insns.node_mut(id) = Node::Insn(Instruction::IStore(slot));
                        changed = true;
                    }
                }
                _ if insn.is_load() => {
                    let load = insn
                        .local_slot()
                        .and_then(|(slot, _)| frame.local(slot as usize))
                        .and_then(|value| value.cst.as_ref())
                        .and_then(Const::load);
                    if let Some(load) = load {
                        *insns.node_mut(id) = Node::Insn(load);
                        changed = true;
                    }
                }
                _ if might_be_unary_const_op(&insn) => {
                    let value = match frame.stack_from_top(0) {
                        Some(value) => value,
                        None => continue,
                    };
                    let folded = interpreter.unary_operation(id, &insn, value);
                    if let Some(load) = folded.cst.as_ref().and_then(Const::load) {
                        insns.insert_before(id, Node::Insn(pop_for(value)));
                        *insns.node_mut(id) = Node::Insn(load);
                        changed = true;
                    }
                }
                _ if might_be_binary_const_op(&insn) => {
                    let operands = (frame.stack_from_top(1), frame.stack_from_top(0));
                    let (value1, value2) = match operands {
                        (Some(value1), Some(value2)) => (value1, value2),
                        _ => continue,
                    };
                    let folded = interpreter.binary_operation(id, &insn, value1, value2);
                    if let Some(load) = folded.cst.as_ref().and_then(Const::load) {
                        insns.insert_before(id, Node::Insn(pop_for(value2)));
                        insns.insert_before(id, Node::Insn(pop_for(value1)));
                        *insns.node_mut(id) = Node::Insn(load);
                        changed = true;
                    }
                }
                _ => (),
            }
        }

        Ok(changed)
    }

    /// Drop `pop`s along with the side-effect free instructions producing the popped values
    fn remove_pop(&self, method: &mut MethodCode) -> Result<bool, Error> {
        let frames = Analyzer::new(SourceInterpreter).analyze(method)?;
        let insns = &mut method.instructions;
        let readers = readers(insns, &frames);
        let mut changed = false;

        for pop in insns.ids() {
            let popped = match (insns.insn(pop), frames.get(&pop)) {
                (Some(Instruction::Pop), Some(frame)) => vec![frame.stack_from_top(0)],
                (Some(Instruction::Pop2), Some(frame)) => {
                    match frame.stack_from_top(0) {
                        Some(top) if top.size == 2 => vec![Some(top)],
                        top => vec![top, frame.stack_from_top(1)],
                    }
                }
                _ => continue,
            };
            let sources: Option<Vec<&SourceValue>> = popped.into_iter().collect();
            let sources = match sources {
                Some(sources) => sources,
                None => continue,
            };

            let view: &InsnList = insns;
            let removable = sources.iter().all(|value| {
                !value.insns.is_empty()
                    && value
                        .insns
                        .iter()
                        .all(|source| self.removable_source(view, &frames, &readers, *source, pop))
            });
            if !removable {
                continue;
            }

            for value in sources {
                for source in &value.insns {
                    remove_source(insns, &frames, &readers, *source);
                }
            }
            insns.remove(pop);
            changed = true;
        }

        Ok(changed)
    }

    /// Whether the value produced by `source` can disappear along with the `pop` consuming it
    fn removable_source(
        &self,
        insns: &InsnList,
        frames: &Frames<SourceValue>,
        readers: &HashMap<InsnId, Vec<InsnId>>,
        source: InsnId,
        pop: InsnId,
    ) -> bool {
        if !insns.contains(source) {
            return false;
        }
        let insn = match insns.insn(source) {
            Some(insn) => insn,
            None => return false,
        };
        let read_by = readers.get(&source).map_or(&[][..], Vec::as_slice);

        match insn {
            Instruction::New(_) => match allocation_dup(insns, source) {
                Some(dup) => {
                    read_by.iter().all(|reader| *reader == pop || *reader == dup)
                        && readers.get(&dup).map_or(false, |inits| {
                            inits
                                .iter()
                                .all(|init| self.is_pure_constructor(insns, frames, *init, dup))
                        })
                }
                None => read_by == [pop],
            },
            Instruction::Invoke(
                InvokeType::Virtual | InvokeType::Special | InvokeType::Static,
                method,
            ) => {
                read_by == [pop] && self.registry.is_registered(method)
            }
            Instruction::Nop => false,
            _ => read_by == [pop] && (insn.is_constant_load() || insn.is_load()),
        }
    }

    /// Whether `init` is a registered constructor call on the object duplicated by `dup`
    fn is_pure_constructor(
        &self,
        insns: &InsnList,
        frames: &Frames<SourceValue>,
        init: InsnId,
        dup: InsnId,
    ) -> bool {
        match (insns.insn(init), frames.get(&init)) {
            (Some(Instruction::Invoke(InvokeType::Special, method)), Some(frame))
                if method.name == "<init>" =>
            {
                let receiver = frame.stack_from_top(method.descriptor.parameters.len());
                receiver.map_or(false, |value| value.insns.contains(&dup))
                    && self.registry.is_registered(method)
            }
            _ => false,
        }
    }
}

/// Real nodes of the list, in order
fn real_nodes(insns: &InsnList) -> Vec<Node> {
    insns
        .iter()
        .map(|id| insns.node(id))
        .filter(|node| node.is_real())
        .cloned()
        .collect()
}

fn pop_for<V: Width>(value: &V) -> Instruction {
    if value.width() == 2 {
        Instruction::Pop2
    } else {
        Instruction::Pop
    }
}

/// `dup` right after a `new`, as in the usual allocation sequence
fn allocation_dup(insns: &InsnList, new: InsnId) -> Option<InsnId> {
    let next = insns.next_real(new)?;
    match insns.insn(next) {
        Some(Instruction::Dup) => Some(next),
        _ => None,
    }
}

/// Instructions reading the values produced by each instruction
///
/// `dup`s and `swap` count as readers of the values they copy.
fn readers(insns: &InsnList, frames: &Frames<SourceValue>) -> HashMap<InsnId, Vec<InsnId>> {
    let mut readers: HashMap<InsnId, Vec<InsnId>> = HashMap::new();
    for id in insns {
        let frame = match frames.get(&id) {
            Some(frame) => frame,
            None => continue,
        };
        for index in 0..read_entries(insns.node(id), frame) {
            if let Some(value) = frame.stack_from_top(index) {
                for source in &value.insns {
                    let read_by = readers.entry(*source).or_default();
                    if !read_by.contains(&id) {
                        read_by.push(id);
                    }
                }
            }
        }
    }
    readers
}

/// Number of stack entries a node reads
fn read_entries(node: &Node, frame: &Frame<SourceValue>) -> usize {
    use Instruction::*;
    match node {
        Node::Label | Node::Line(_) => 0,
        Node::Branch(branch) => match branch {
            BranchInstruction::IfICmp(_, _) | BranchInstruction::IfACmp(_, _) => 2,
            BranchInstruction::Goto(_) | BranchInstruction::Return => 0,
            _ => 1,
        },
        Node::Insn(insn) => match insn {
            Pop | Dup => 1,
            Pop2 | Dup2 => entries_spanning(frame, 2),
            DupX1 | Swap => 2,
            DupX2 | Dup2X1 => entries_spanning(frame, 3),
            Dup2X2 => entries_spanning(frame, 4),
            IStore(_) | LStore(_) | FStore(_) | DStore(_) | AStore(_) | PutStatic(_)
            | MonitorEnter | MonitorExit | INeg | LNeg | FNeg | DNeg | I2L | I2F | I2D | L2I
            | L2F | L2D | F2I | F2L | F2D | D2I | D2L | D2F | I2B | I2C | I2S | GetField(_)
            | NewArray(_) | ANewArray(_) | ArrayLength | CheckCast(_) | InstanceOf(_) => 1,
            IALoad | LALoad | FALoad | DALoad | AALoad | BALoad | CALoad | SALoad | IAdd
            | LAdd | FAdd | DAdd | ISub | LSub | FSub | DSub | IMul | LMul | FMul | DMul
            | IDiv | LDiv | FDiv | DDiv | IRem | LRem | FRem | DRem | ISh(_) | LSh(_) | IAnd
            | LAnd | IOr | LOr | IXor | LXor | LCmp | FCmp(_) | DCmp(_) | PutField(_) => 2,
            IAStore | LAStore | FAStore | DAStore | AAStore | BAStore | CAStore | SAStore => 3,
            Invoke(typ, method) => {
                method.descriptor.parameters.len() + (*typ != InvokeType::Static) as usize
            }
            InvokeDynamic(indy) => indy.descriptor.parameters.len(),
            MultiANewArray(_, dims) => *dims as usize,
            _ => 0,
        },
    }
}

/// Number of entries from the top of the stack covering at least `slots` slots
fn entries_spanning(frame: &Frame<SourceValue>, slots: usize) -> usize {
    let mut covered = 0;
    let mut entries = 0;
    while covered < slots {
        match frame.stack_from_top(entries) {
            Some(value) => covered += value.size,
            None => break,
        }
        entries += 1;
    }
    entries
}

/// Remove an instruction whose only product is about to be popped
///
/// Calls leave their arguments to be popped instead. An allocation takes its `dup` and
/// constructor calls along.
fn remove_source(
    insns: &mut InsnList,
    frames: &Frames<SourceValue>,
    readers: &HashMap<InsnId, Vec<InsnId>>,
    source: InsnId,
) {
    if !insns.contains(source) {
        return;
    }
    match insns.insn(source).cloned() {
        Some(Instruction::Invoke(typ, method)) => {
            pop_arguments(insns, frames, source, typ, method.descriptor.parameters.len());
        }
        Some(Instruction::New(_)) => {
            if let Some(dup) = allocation_dup(insns, source) {
                for init in readers.get(&dup).into_iter().flatten() {
                    if let Some(Instruction::Invoke(_, method)) = insns.insn(*init).cloned() {
                        let count = method.descriptor.parameters.len();
                        pop_arguments(insns, frames, *init, InvokeType::Static, count);
                        insns.remove(*init);
                    }
                }
                insns.remove(dup);
            }
        }
        _ => (),
    }
    insns.remove(source);
}

/// Insert `pop`s after a call for each of its arguments (and its receiver)
fn pop_arguments(
    insns: &mut InsnList,
    frames: &Frames<SourceValue>,
    call: InsnId,
    typ: InvokeType,
    parameters: usize,
) {
    let frame = match frames.get(&call) {
        Some(frame) => frame,
        None => return,
    };
    let count = parameters + (typ != InvokeType::Static) as usize;
    let mut cursor = call;
    for index in 0..count {
        if let Some(value) = frame.stack_from_top(index) {
            cursor = insns.insert_after(cursor, Node::Insn(pop_for(value)));
        }
    }
}

/// Drop blocks nothing jumps or falls into
///
/// The first block and exception handlers are always kept. Only real instructions are removed,
/// so labels other code refers to remain valid.
fn remove_unused_bb(insns: &mut InsnList, tcbs: &[TryCatchBlock], cfg: &ControlFlowGraph) -> bool {
    let mut kept: HashSet<usize> = HashSet::new();
    if let Some(first) = insns.first().and_then(|first| cfg.block_of(insns, first)) {
        kept.insert(first);
    }
    for tcb in tcbs {
        if let Some(handler) = cfg.block_of(insns, tcb.handler) {
            kept.insert(handler);
        }
    }

    let mut removed: HashSet<usize> = HashSet::new();
    let mut changed = false;
    loop {
        let live = |index: &usize| !removed.contains(index);
        let dead = cfg.blocks().iter().map(|bb| bb.index).find(|index| {
            live(index)
                && !kept.contains(index)
                && !cfg.block(*index).predecessors.iter().any(live)
                && !cfg
                    .blocks()
                    .iter()
                    .any(|bb| live(&bb.index) && bb.joins.contains(index))
        });
        let dead = match dead {
            Some(dead) => dead,
            None => break,
        };

        for id in cfg.block(dead).nodes(insns) {
            if insns.node(id).is_real() {
                insns.remove(id);
                changed = true;
            }
        }
        removed.insert(dead);
    }
    changed
}

/// What a node does with a local variable slot
enum SlotAccess {
    Read,
    Overwrite,
    None,
}

fn slot_access(insns: &InsnList, id: InsnId, slot: usize, width: usize) -> SlotAccess {
    let insn = match insns.insn(id) {
        Some(insn) => insn,
        None => return SlotAccess::None,
    };
    let (other, other_width) = match insn.local_slot() {
        Some((other, other_width)) => (other as usize, other_width),
        None => return SlotAccess::None,
    };
    let overlaps = other < slot + width && slot < other + other_width;
    if !overlaps {
        SlotAccess::None
    } else if insn.is_store() {
        if other == slot && other_width >= width {
            SlotAccess::Overwrite
        } else {
            SlotAccess::None
        }
    } else {
        SlotAccess::Read
    }
}

/// Whether the local written by `store` may be read before being overwritten
fn read_after_store(
    insns: &InsnList,
    tcbs: &[TryCatchBlock],
    cfg: &ControlFlowGraph,
    store: InsnId,
    slot: usize,
    width: usize,
) -> bool {
    let start = match cfg.block_of(insns, store) {
        Some(start) => start,
        None => return true,
    };

    // Handlers protecting some node of a block
    let handlers_of = |index: usize| -> Vec<usize> {
        let nodes: Vec<usize> = cfg
            .block(index)
            .nodes(insns)
            .into_iter()
            .filter_map(|id| insns.index_of(id))
            .collect();
        tcbs.iter()
            .filter(|tcb| match (insns.index_of(tcb.start), insns.index_of(tcb.end)) {
                (Some(start), Some(end)) => nodes.iter().any(|pos| (start..end).contains(pos)),
                _ => true,
            })
            .filter_map(|tcb| cfg.block_of(insns, tcb.handler))
            .collect()
    };
    let onward = |index: usize| -> Vec<usize> {
        let block = cfg.block(index);
        let mut next: Vec<usize> = block
            .successors
            .iter()
            .chain(block.joins.iter())
            .copied()
            .collect();
        next.extend(handlers_of(index));
        next
    };

    // Rest of the block of the store
    let exit = cfg.block(start).exit;
    let mut cursor = insns.next(store).filter(|_| store != exit);
    let mut overwritten = false;
    while let Some(id) = cursor {
        match slot_access(insns, id, slot, width) {
            SlotAccess::Read => return true,
            SlotAccess::Overwrite => {
                overwritten = true;
                break;
            }
            SlotAccess::None => (),
        }
        if id == exit {
            break;
        }
        cursor = insns.next(id);
    }

    let mut queue: VecDeque<usize> = VecDeque::new();
    let mut seen: HashSet<usize> = HashSet::new();
    if overwritten {
        queue.extend(handlers_of(start));
    } else {
        queue.extend(onward(start));
    }

    while let Some(index) = queue.pop_front() {
        if !seen.insert(index) {
            continue;
        }
        let mut overwritten = false;
        for id in cfg.block(index).nodes(insns) {
            match slot_access(insns, id, slot, width) {
                SlotAccess::Read => return true,
                SlotAccess::Overwrite => {
                    overwritten = true;
                    break;
                }
                SlotAccess::None => (),
            }
        }
        if overwritten {
            queue.extend(handlers_of(index));
        } else {
            queue.extend(onward(index));
        }
    }
    false
}

/// Replace stores to locals that are never read again by `pop`s
fn remove_dead_store(method: &mut MethodCode) -> bool {
    let cfg = ControlFlowGraph::build(&method.instructions, &method.try_catch_blocks);
    let insns = &mut method.instructions;
    let mut changed = false;

    for id in insns.ids() {
        let (slot, width) = match insns.insn(id) {
            Some(insn) if insn.is_store() => match insn.local_slot() {
                Some((slot, width)) => (slot as usize, width),
                None => continue,
            },
            _ => continue,
        };
        if read_after_store(insns, &method.try_catch_blocks, &cfg, id, slot, width) {
            continue;
        }
        let pop = if width == 2 {
            Instruction::Pop2
        } else {
            Instruction::Pop
        };
        *insns.node_mut(id) = Node::Insn(pop);
        changed = true;
    }
    changed
}

/// Drop jumps to the very next instruction (conditional ones still pop their operands)
fn remove_unused_jump(insns: &mut InsnList) -> bool {
    let mut changed = false;
    for id in insns.ids() {
        let branch = match insns.branch(id) {
            Some(branch) => branch.clone(),
            None => continue,
        };
        let lands_next = |target: &InsnId| insns.last_real_to(*target) == Some(id);
        let targets = branch.jump_targets();
        if targets.is_empty() || !targets.iter().all(lands_next) {
            continue;
        }

        match branch {
            BranchInstruction::Goto(_) => insns.remove(id),
            BranchInstruction::IfICmp(_, _) | BranchInstruction::IfACmp(_, _) => {
                insns.insert_before(id, Node::Insn(Instruction::Pop));
                *insns.node_mut(id) = Node::Insn(Instruction::Pop);
            }
            _ => *insns.node_mut(id) = Node::Insn(Instruction::Pop),
        }
        changed = true;
    }
    changed
}

/// Drop exception table entries protecting no real instruction, then the code of their handlers
/// if nothing else reaches it
fn remove_unused_handler(method: &mut MethodCode) -> bool {
    // Built while the handlers are still registered, so that each one starts its own block
    let cfg = ControlFlowGraph::build(&method.instructions, &method.try_catch_blocks);
    let insns = &method.instructions;
    let before = method.try_catch_blocks.len();
    method.try_catch_blocks.retain(|tcb| {
        match (insns.index_of(tcb.start), insns.index_of(tcb.end)) {
            (Some(start), Some(end)) => insns.has_real_between(start, end),
            _ => true,
        }
    });
    if method.try_catch_blocks.len() == before {
        return false;
    }

    remove_unused_bb(&mut method.instructions, &method.try_catch_blocks, &cfg);
    true
}
