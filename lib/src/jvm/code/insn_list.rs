use crate::jvm::{BranchInstruction, Instruction};
use std::cell::RefCell;
use std::collections::HashMap;

/// Handle to a node of an `InsnList`
///
/// Handles are only meaningful for the list that created them (or a `Clone` of that list). They
/// stay valid across insertions and removals, which is what lets weaving regions, analysis
/// frames, and exception tables refer to nodes while the list is being rewritten.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct InsnId(pub(crate) usize);

/// Correspondence between the nodes of a list spliced into another list and their new handles
pub type NodeMap = HashMap<InsnId, InsnId>;

/// Node of an instruction list
///
/// Labels and line markers are virtual: they take up no space in the bytecode and serve as stable
/// anchors for jumps, exception ranges, and insertion points.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Label,
    Line(u32),
    Insn(Instruction),
    Branch(BranchInstruction),
}

impl Node {
    /// Real nodes are the ones that end up as bytecode
    pub fn is_real(&self) -> bool {
        matches!(self, Node::Insn(_) | Node::Branch(_))
    }

    pub fn is_label(&self) -> bool {
        matches!(self, Node::Label)
    }

    pub fn as_insn(&self) -> Option<&Instruction> {
        match self {
            Node::Insn(insn) => Some(insn),
            _ => None,
        }
    }

    pub fn as_branch(&self) -> Option<&BranchInstruction> {
        match self {
            Node::Branch(branch) => Some(branch),
            _ => None,
        }
    }

    /// Numeric opcode, `None` for virtual nodes
    pub fn opcode(&self) -> Option<u8> {
        match self {
            Node::Insn(insn) => Some(insn.opcode()),
            Node::Branch(branch) => Some(branch.opcode()),
            Node::Label | Node::Line(_) => None,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Node::Insn(insn) => insn.mnemonic(),
            Node::Branch(branch) => branch.mnemonic(),
            Node::Label => "label",
            Node::Line(_) => "line",
        }
    }

    /// Jumps, switches, returns, and `athrow`: anything that transfers control elsewhere
    pub fn is_branch(&self) -> bool {
        matches!(self, Node::Branch(_))
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Node::Branch(b) if b.is_return())
    }

    pub fn is_athrow(&self) -> bool {
        matches!(self, Node::Branch(BranchInstruction::AThrow))
    }

    /// Whether executing the node can raise an exception
    pub fn might_throw(&self) -> bool {
        match self {
            Node::Insn(insn) => insn.might_throw(),
            Node::Branch(branch) => *branch == BranchInstruction::AThrow,
            Node::Label | Node::Line(_) => false,
        }
    }
}

#[derive(Clone, Debug)]
struct Slot {
    node: Node,
    prev: Option<InsnId>,
    next: Option<InsnId>,
    linked: bool,
}

/// Positions of linked nodes, rebuilt lazily after structural changes
#[derive(Clone, Debug)]
struct PositionIndex {
    order: Vec<InsnId>,
    positions: Vec<Option<usize>>,
}

/// Mutable, doubly-linked sequence of nodes stored in an arena
///
/// Insertion and removal relative to a known node are `O(1)`. Positional queries (`index_of`,
/// `is_before`) go through a position index that is recomputed on first use after the list
/// changes shape. Removed nodes stay in the arena (their handles remain readable) but are no
/// longer part of the sequence.
#[derive(Clone, Debug, Default)]
pub struct InsnList {
    slots: Vec<Slot>,
    first: Option<InsnId>,
    last: Option<InsnId>,
    len: usize,
    index: RefCell<Option<PositionIndex>>,
}

impl InsnList {
    pub fn new() -> InsnList {
        InsnList::default()
    }

    /// Number of nodes in the sequence (virtual ones included)
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn first(&self) -> Option<InsnId> {
        self.first
    }

    pub fn last(&self) -> Option<InsnId> {
        self.last
    }

    pub fn next(&self, id: InsnId) -> Option<InsnId> {
        self.slots[id.0].next
    }

    pub fn prev(&self, id: InsnId) -> Option<InsnId> {
        self.slots[id.0].prev
    }

    /// Whether the node is currently part of the sequence
    pub fn contains(&self, id: InsnId) -> bool {
        self.slots.get(id.0).map_or(false, |slot| slot.linked)
    }

    pub fn node(&self, id: InsnId) -> &Node {
        &self.slots[id.0].node
    }

    pub fn node_mut(&mut self, id: InsnId) -> &mut Node {
        &mut self.slots[id.0].node
    }

    /// Instruction at the node, if it is a non-branching instruction
    pub fn insn(&self, id: InsnId) -> Option<&Instruction> {
        self.node(id).as_insn()
    }

    /// Instruction at the node, if it is a branching instruction
    pub fn branch(&self, id: InsnId) -> Option<&BranchInstruction> {
        self.node(id).as_branch()
    }

    fn invalidate(&mut self) {
        *self.index.get_mut() = None;
    }

    fn alloc(&mut self, node: Node) -> InsnId {
        let id = InsnId(self.slots.len());
        self.slots.push(Slot {
            node,
            prev: None,
            next: None,
            linked: false,
        });
        id
    }

    fn link_between(&mut self, id: InsnId, prev: Option<InsnId>, next: Option<InsnId>) {
        {
            let slot = &mut self.slots[id.0];
            slot.prev = prev;
            slot.next = next;
            slot.linked = true;
        }
        match prev {
            Some(p) => self.slots[p.0].next = Some(id),
            None => self.first = Some(id),
        }
        match next {
            Some(n) => self.slots[n.0].prev = Some(id),
            None => self.last = Some(id),
        }
        self.len += 1;
        self.invalidate();
    }

    /// Add a node at the end
    pub fn push_back(&mut self, node: Node) -> InsnId {
        let id = self.alloc(node);
        let last = self.last;
        self.link_between(id, last, None);
        id
    }

    /// Add a node at the start
    pub fn push_front(&mut self, node: Node) -> InsnId {
        let id = self.alloc(node);
        let first = self.first;
        self.link_between(id, None, first);
        id
    }

    /// Add an instruction at the end
    pub fn push_insn(&mut self, insn: Instruction) -> InsnId {
        self.push_back(Node::Insn(insn))
    }

    /// Add a branch at the end
    pub fn push_branch(&mut self, branch: BranchInstruction) -> InsnId {
        self.push_back(Node::Branch(branch))
    }

    /// Add a new label at the end
    pub fn push_label(&mut self) -> InsnId {
        self.push_back(Node::Label)
    }

    pub fn insert_before(&mut self, loc: InsnId, node: Node) -> InsnId {
        let id = self.alloc(node);
        let prev = self.slots[loc.0].prev;
        self.link_between(id, prev, Some(loc));
        id
    }

    pub fn insert_after(&mut self, loc: InsnId, node: Node) -> InsnId {
        let id = self.alloc(node);
        let next = self.slots[loc.0].next;
        self.link_between(id, Some(loc), next);
        id
    }

    /// Unlink a node from the sequence (no-op if it is already unlinked)
    pub fn remove(&mut self, id: InsnId) {
        if !self.contains(id) {
            return;
        }
        let (prev, next) = {
            let slot = &mut self.slots[id.0];
            slot.linked = false;
            (slot.prev.take(), slot.next.take())
        };
        match prev {
            Some(p) => self.slots[p.0].next = next,
            None => self.first = next,
        }
        match next {
            Some(n) => self.slots[n.0].prev = prev,
            None => self.last = prev,
        }
        self.len -= 1;
        self.invalidate();
    }

    /// Move all of the nodes of `other` into this list, right after `loc`
    pub fn splice_after(&mut self, loc: InsnId, other: InsnList) -> NodeMap {
        let mut cursor = loc;
        self.splice_with(other, |list, node| {
            cursor = list.insert_after(cursor, node);
            cursor
        })
    }

    /// Move all of the nodes of `other` into this list, right before `loc`
    pub fn splice_before(&mut self, loc: InsnId, other: InsnList) -> NodeMap {
        self.splice_with(other, |list, node| list.insert_before(loc, node))
    }

    /// Move all of the nodes of `other` to the start of this list
    pub fn splice_front(&mut self, other: InsnList) -> NodeMap {
        match self.first {
            Some(first) => self.splice_before(first, other),
            None => self.splice_back(other),
        }
    }

    /// Move all of the nodes of `other` to the end of this list
    pub fn splice_back(&mut self, other: InsnList) -> NodeMap {
        self.splice_with(other, |list, node| list.push_back(node))
    }

    fn splice_with(
        &mut self,
        mut other: InsnList,
        mut place: impl FnMut(&mut InsnList, Node) -> InsnId,
    ) -> NodeMap {
        let mut map = NodeMap::new();
        let mut placed = vec![];
        for old_id in other.ids() {
            let node = std::mem::replace(&mut other.slots[old_id.0].node, Node::Label);
            let new_id = place(self, node);
            map.insert(old_id, new_id);
            placed.push(new_id);
        }

        // Jumps inside the spliced code must follow their labels to the new handles
        for new_id in placed {
            if let Node::Branch(branch) = &self.slots[new_id.0].node {
                let remapped = branch.map_labels(|lbl| map.get(&lbl).copied().unwrap_or(lbl));
                self.slots[new_id.0].node = Node::Branch(remapped);
            }
        }
        map
    }

    /// Iterate over the handles of the nodes, in order
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.first,
        }
    }

    /// Snapshot of the handles in order (safe to hold while mutating the list)
    pub fn ids(&self) -> Vec<InsnId> {
        self.iter().collect()
    }

    fn with_index<A>(&self, f: impl FnOnce(&PositionIndex) -> A) -> A {
        let mut cache = self.index.borrow_mut();
        let index = cache.get_or_insert_with(|| {
            let order: Vec<InsnId> = self.iter().collect();
            let mut positions = vec![None; self.slots.len()];
            for (pos, id) in order.iter().enumerate() {
                positions[id.0] = Some(pos);
            }
            PositionIndex { order, positions }
        });
        f(index)
    }

    /// Position of a node in the sequence, counting virtual nodes
    pub fn index_of(&self, id: InsnId) -> Option<usize> {
        self.with_index(|index| index.positions.get(id.0).copied().flatten())
    }

    /// Node at a position in the sequence
    pub fn get(&self, position: usize) -> Option<InsnId> {
        self.with_index(|index| index.order.get(position).copied())
    }

    /// Whether `a` comes strictly before `b` in the sequence
    pub fn is_before(&self, a: InsnId, b: InsnId) -> bool {
        match (self.index_of(a), self.index_of(b)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }

    /// Whether there is a real instruction at some position in `from..to`
    pub fn has_real_between(&self, from: usize, to: usize) -> bool {
        if from >= to {
            return false;
        }
        self.with_index(|index| {
            index.order[from.min(index.order.len())..to.min(index.order.len())]
                .iter()
                .any(|id| self.slots[id.0].node.is_real())
        })
    }

    /// First real instruction at or after `id`
    pub fn first_real_from(&self, id: InsnId) -> Option<InsnId> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if self.node(current).is_real() {
                return Some(current);
            }
            cursor = self.next(current);
        }
        None
    }

    /// Last real instruction at or before `id`
    pub fn last_real_to(&self, id: InsnId) -> Option<InsnId> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if self.node(current).is_real() {
                return Some(current);
            }
            cursor = self.prev(current);
        }
        None
    }

    /// First real instruction strictly after `id`
    pub fn next_real(&self, id: InsnId) -> Option<InsnId> {
        self.next(id).and_then(|next| self.first_real_from(next))
    }

    /// Last real instruction strictly before `id`
    pub fn prev_real(&self, id: InsnId) -> Option<InsnId> {
        self.prev(id).and_then(|prev| self.last_real_to(prev))
    }

    /// First real instruction of the whole list
    pub fn first_real(&self) -> Option<InsnId> {
        self.first.and_then(|first| self.first_real_from(first))
    }

    /// Last real instruction of the whole list
    pub fn last_real(&self) -> Option<InsnId> {
        self.last.and_then(|last| self.last_real_to(last))
    }

    /// Number of real instructions
    pub fn real_len(&self) -> usize {
        self.iter().filter(|id| self.node(*id).is_real()).count()
    }
}

/// Iterator over the handles of an `InsnList`
pub struct Iter<'a> {
    list: &'a InsnList,
    cursor: Option<InsnId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = InsnId;

    fn next(&mut self) -> Option<InsnId> {
        let id = self.cursor?;
        self.cursor = self.list.next(id);
        Some(id)
    }
}

impl<'a> IntoIterator for &'a InsnList {
    type Item = InsnId;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::OrdComparison;

    fn nodes(list: &InsnList) -> Vec<Node> {
        list.iter().map(|id| list.node(id).clone()).collect()
    }

    #[test]
    fn insert_and_remove() {
        let mut list = InsnList::new();
        let a = list.push_insn(Instruction::IConst1);
        let c = list.push_insn(Instruction::IConst3);
        let b = list.insert_after(a, Node::Insn(Instruction::IConst2));
        let z = list.push_front(Node::Label);
        assert_eq!(list.ids(), vec![z, a, b, c]);
        assert_eq!(list.index_of(b), Some(2));
        assert!(list.is_before(a, c));
        assert!(!list.is_before(c, a));

        list.remove(b);
        assert!(!list.contains(b));
        assert_eq!(list.ids(), vec![z, a, c]);
        assert_eq!(list.index_of(c), Some(2));
        assert_eq!(list.index_of(b), None);
        assert_eq!(list.len(), 3);

        // Removed nodes are still readable
        assert_eq!(list.node(b), &Node::Insn(Instruction::IConst2));
    }

    #[test]
    fn real_instruction_navigation() {
        let mut list = InsnList::new();
        let l0 = list.push_label();
        let a = list.push_insn(Instruction::Nop);
        let l1 = list.push_label();
        let l2 = list.push_back(Node::Line(4));
        let b = list.push_branch(BranchInstruction::Return);

        assert_eq!(list.first_real_from(l0), Some(a));
        assert_eq!(list.first_real_from(l1), Some(b));
        assert_eq!(list.last_real_to(l2), Some(a));
        assert_eq!(list.next_real(a), Some(b));
        assert_eq!(list.prev_real(b), Some(a));
        assert_eq!(list.prev_real(a), None);
        assert!(list.has_real_between(2, 5));
        assert!(!list.has_real_between(2, 4));
        assert!(!list.has_real_between(3, 3));
        assert_eq!(list.real_len(), 2);
    }

    #[test]
    fn splice_remaps_jumps() {
        let mut snippet = InsnList::new();
        let target = snippet.push_label();
        snippet.push_insn(Instruction::IConst0);
        snippet.push_branch(BranchInstruction::If(OrdComparison::EQ, target));

        let mut method = InsnList::new();
        let start = method.push_label();
        method.push_branch(BranchInstruction::Return);

        let map = method.splice_after(start, snippet);
        let new_target = map[&target];
        assert_eq!(method.len(), 5);
        assert_eq!(method.get(1), Some(new_target));
        assert_eq!(
            nodes(&method)[3],
            Node::Branch(BranchInstruction::If(OrdComparison::EQ, new_target))
        );
    }

    #[test]
    fn splice_before_keeps_order() {
        let mut list = InsnList::new();
        let ret = list.push_branch(BranchInstruction::Return);

        let mut prefix = InsnList::new();
        prefix.push_insn(Instruction::IConst1);
        prefix.push_insn(Instruction::Pop);
        list.splice_before(ret, prefix);

        let mut front = InsnList::new();
        front.push_insn(Instruction::Nop);
        list.splice_front(front);

        assert_eq!(
            nodes(&list),
            vec![
                Node::Insn(Instruction::Nop),
                Node::Insn(Instruction::IConst1),
                Node::Insn(Instruction::Pop),
                Node::Branch(BranchInstruction::Return),
            ]
        );
    }
}
