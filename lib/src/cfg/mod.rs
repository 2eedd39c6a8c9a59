//! Basic blocks and the control flow between them
//!
//! A [`ControlFlowGraph`] is built in two steps: partitioning the instructions into blocks (at
//! the starts computed by [`block_starts`]) and then visiting the blocks reachable from a root,
//! linking successors and predecessors. Visiting again from another root (eg. an exception
//! handler) only adds the newly reachable blocks. Edges leading back into blocks reached by an
//! earlier visit are not recorded as successors, but as joins.

mod block_starts;

pub use block_starts::*;

use crate::jvm::code::{InsnId, InsnList, Node, TryCatchBlock};
use crate::jvm::BranchInstruction;
use std::collections::{BTreeSet, HashMap};

/// Maximal run of instructions with a single entry and a single exit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicBlock {
    /// Position of the block in the method
    pub index: usize,

    /// First real instruction of the block
    pub entrance: InsnId,

    /// Last real instruction of the block
    pub exit: InsnId,

    pub successors: BTreeSet<usize>,
    pub predecessors: BTreeSet<usize>,

    /// Blocks of an earlier visit this block continues into
    pub joins: BTreeSet<usize>,
}

impl BasicBlock {
    fn new(index: usize, entrance: InsnId, exit: InsnId) -> BasicBlock {
        BasicBlock {
            index,
            entrance,
            exit,
            successors: BTreeSet::new(),
            predecessors: BTreeSet::new(),
            joins: BTreeSet::new(),
        }
    }

    /// Nodes from the entrance to the exit, virtual nodes included
    pub fn nodes(&self, insns: &InsnList) -> Vec<InsnId> {
        let mut nodes = vec![];
        let mut cursor = Some(self.entrance);
        while let Some(id) = cursor {
            nodes.push(id);
            if id == self.exit {
                break;
            }
            cursor = insns.next(id);
        }
        nodes
    }

    /// Number of real instructions in the block
    pub fn size(&self, insns: &InsnList) -> usize {
        self.nodes(insns)
            .into_iter()
            .filter(|id| insns.node(*id).is_real())
            .count()
    }
}

#[derive(Clone, Debug)]
pub struct ControlFlowGraph {
    blocks: Vec<BasicBlock>,
    by_entrance: HashMap<InsnId, usize>,

    /// Blocks in the order they were reached, over all visits so far
    connected: Vec<usize>,

    /// Number of connected blocks before the current visit
    connected_size: usize,

    /// Blocks ending with a return or `athrow`
    method_exits: BTreeSet<usize>,
}

impl ControlFlowGraph {
    /// Partition the instructions into blocks, without linking any of them
    pub fn new(insns: &InsnList, tcbs: &[TryCatchBlock]) -> ControlFlowGraph {
        let starts = block_starts(insns, tcbs, false);
        let mut blocks = Vec::with_capacity(starts.len());
        for (index, start) in starts.iter().enumerate() {
            let exit = match starts.get(index + 1) {
                Some(next) => insns.prev(*next).and_then(|prev| insns.last_real_to(prev)),
                None => insns.last().and_then(|last| insns.last_real_to(last)),
            };
            blocks.push(BasicBlock::new(index, *start, exit.unwrap_or(*start)));
        }
        let by_entrance = blocks.iter().map(|bb| (bb.entrance, bb.index)).collect();
        ControlFlowGraph {
            blocks,
            by_entrance,
            connected: vec![],
            connected_size: 0,
            method_exits: BTreeSet::new(),
        }
    }

    /// Partition the instructions and link every block reachable from the first instruction or
    /// from an exception handler
    pub fn build(insns: &InsnList, tcbs: &[TryCatchBlock]) -> ControlFlowGraph {
        let mut cfg = ControlFlowGraph::new(insns, tcbs);
        if let Some(first) = insns.first() {
            cfg.visit(insns, first);
        }
        for tcb in tcbs {
            cfg.visit(insns, tcb.handler);
        }
        cfg
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [BasicBlock] {
        &mut self.blocks
    }

    pub fn block(&self, index: usize) -> &BasicBlock {
        &self.blocks[index]
    }

    /// Blocks reached by some visit, in the order they were reached
    pub fn connected(&self) -> &[usize] {
        &self.connected
    }

    pub fn method_exits(&self) -> &BTreeSet<usize> {
        &self.method_exits
    }

    /// Index of the block containing a node
    ///
    /// Virtual nodes belong to the block of the next real instruction.
    pub fn block_of(&self, insns: &InsnList, id: InsnId) -> Option<usize> {
        let mut cursor = insns.first_real_from(id);
        while let Some(current) = cursor {
            if let Some(index) = self.by_entrance.get(&current) {
                return Some(*index);
            }
            cursor = insns.prev(current);
        }
        None
    }

    /// Link the block containing `node` to `current`, queueing it if it is new
    ///
    /// A block reached by an earlier visit is recorded as a join of `current` instead, and
    /// `exit` is added to `joins`.
    fn try_visit(
        &mut self,
        insns: &InsnList,
        current: usize,
        node: Option<InsnId>,
        exit: InsnId,
        joins: &mut Vec<InsnId>,
    ) {
        let bb = match node.and_then(|node| self.block_of(insns, node)) {
            Some(bb) => bb,
            None => return,
        };

        match self.connected.iter().position(|c| *c == bb) {
            Some(pos) if pos < self.connected_size => {
                self.blocks[current].joins.insert(bb);
                joins.push(exit);
            }
            Some(_) => self.link(current, bb),
            None => {
                self.link(current, bb);
                self.connected.push(bb);
            }
        }
    }

    fn link(&mut self, from: usize, to: usize) {
        self.blocks[from].successors.insert(to);
        self.blocks[to].predecessors.insert(from);
    }

    /// Forget the edge from one block to another (joins included)
    pub fn unlink(&mut self, from: usize, to: usize) {
        self.blocks[from].successors.remove(&to);
        self.blocks[from].joins.remove(&to);
        self.blocks[to].predecessors.remove(&from);
    }

    /// Link every block reachable from `root`
    ///
    /// Returns the exits of the blocks that flow into blocks of an earlier visit. On the first
    /// visit there are none; for an exception handler these are where the handler joins the
    /// code it protects.
    pub fn visit(&mut self, insns: &InsnList, root: InsnId) -> Vec<InsnId> {
        let mut joins = vec![];
        let root_block = match self.block_of(insns, root) {
            Some(bb) => bb,
            None => return joins,
        };
        if !self.connected.contains(&root_block) {
            self.connected.push(root_block);
        }

        let mut i = self.connected_size;
        while i < self.connected.len() {
            let current = self.connected[i];
            let exit = self.blocks[current].exit;
            match insns.node(exit) {
                Node::Branch(branch)
                    if branch.is_return() || *branch == BranchInstruction::AThrow =>
                {
                    self.method_exits.insert(current);
                }
                Node::Branch(branch) => {
                    for target in branch.jump_targets() {
                        self.try_visit(insns, current, Some(target), exit, &mut joins);
                    }
                    if branch.falls_through() {
                        self.try_visit(insns, current, insns.next(exit), exit, &mut joins);
                    }
                }
                _ => self.try_visit(insns, current, insns.next(exit), exit, &mut joins),
            }
            i += 1;
        }
        self.connected_size = self.connected.len();
        joins
    }

    /// Exits of the blocks without successors
    pub fn ends(&self) -> Vec<InsnId> {
        self.blocks
            .iter()
            .filter(|bb| bb.successors.is_empty())
            .map(|bb| bb.exit)
            .collect()
    }

    /// Blocks with an edge into `index`, whichever visit recorded it
    fn sources(&self, index: usize) -> Vec<usize> {
        self.blocks
            .iter()
            .filter(|bb| bb.successors.contains(&index) || bb.joins.contains(&index))
            .map(|bb| bb.index)
            .collect()
    }

    /// Dominators of every block
    ///
    /// Entries are the block of the first instruction and the blocks of the exception handlers.
    /// Blocks no entry reaches are dominated by every block.
    pub fn dominators(&self, insns: &InsnList, tcbs: &[TryCatchBlock]) -> Vec<BTreeSet<usize>> {
        let count = self.blocks.len();
        let all: BTreeSet<usize> = (0..count).collect();
        let entries: BTreeSet<usize> = insns
            .first()
            .into_iter()
            .chain(tcbs.iter().map(|tcb| tcb.handler))
            .filter_map(|id| self.block_of(insns, id))
            .collect();
        let sources: Vec<Vec<usize>> = (0..count).map(|index| self.sources(index)).collect();

        let mut dominators: Vec<BTreeSet<usize>> = (0..count)
            .map(|index| {
                if entries.contains(&index) {
                    BTreeSet::from([index])
                } else {
                    all.clone()
                }
            })
            .collect();

        let mut changed = true;
        while changed {
            changed = false;
            for index in (0..count).filter(|index| !entries.contains(index)) {
                let mut dominated: Option<BTreeSet<usize>> = None;
                for source in &sources[index] {
                    dominated = Some(match dominated {
                        None => dominators[*source].clone(),
                        Some(dominated) => dominated
                            .intersection(&dominators[*source])
                            .copied()
                            .collect(),
                    });
                }
                let mut dominated = dominated.unwrap_or_else(|| all.clone());
                dominated.insert(index);
                if dominated != dominators[index] {
                    dominators[index] = dominated;
                    changed = true;
                }
            }
        }
        dominators
    }

    /// Whether a block is entered through a back edge, from a block it dominates
    pub fn is_loop_header(&self, dominators: &[BTreeSet<usize>], index: usize) -> bool {
        self.sources(index)
            .into_iter()
            .any(|source| dominators[source].contains(&index))
    }
}
