use super::{Error, SnippetMarking};
use crate::jvm::analysis::{
    Analyzer, BasicInterpreter, BasicValue, Frame, Frames, SourceInterpreter, SourceValue,
};
use crate::jvm::code::{load_var, store_var, InsnId, InsnList, MethodCode, Node};
use crate::jvm::{FieldType, Instruction};
use crate::util::Width;

/// Identifies a shadow of a snippet in a weaving run
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShadowKey {
    /// Index of the snippet marking
    pub snippet: usize,

    /// Index of the shadow in the marking
    pub shadow: usize,
}

/// State shared by all snippets woven into one method
///
/// Built before any code gets inserted: every weaving location gets its own label (so that
/// snippets woven at the same place stack up in order), and the method is analyzed once. Frames
/// are looked up by node, so they stay valid while code is inserted around those nodes.
pub struct WeavingInfo {
    /// Snippet marking indices, highest order first
    sorted_snippets: Vec<usize>,
    basic_frames: Frames<BasicValue>,
    source_frames: Frames<SourceValue>,
    ret_frame: Option<Frame<BasicValue>>,
}

impl WeavingInfo {
    /// Insert the weaving labels and analyze the method
    ///
    /// Weaving regions of the shadows are rewritten to point at the new labels.
    pub fn new(
        method: &mut MethodCode,
        markings: &mut [SnippetMarking],
    ) -> Result<WeavingInfo, Error> {
        let mut sorted_snippets: Vec<usize> = (0..markings.len()).collect();
        sorted_snippets.sort_by_key(|index| std::cmp::Reverse(markings[*index].snippet.order));

        let insns = &mut method.instructions;

        for index in &sorted_snippets {
            for shadow in &mut markings[*index].shadows {
                let region = &mut shadow.weaving_region;
                region.start = insns.insert_before(region.start, Node::Label);
            }
        }

        // Ends left to derive: an end that jumps moves to the node before it
        for index in &sorted_snippets {
            for shadow in &mut markings[*index].shadows {
                if shadow.weaving_region.ends.is_some() {
                    continue;
                }
                let mut ends = Vec::with_capacity(shadow.region_ends.len());
                for end in &shadow.region_ends {
                    if !insns.node(*end).is_branch() {
                        ends.push(*end);
                    } else if let Some(prev) = insns.prev(*end) {
                        ends.push(prev);
                    } else {
                        // Nothing to weave after: give the jump a label to weave after instead
                        ends.push(insns.insert_before(*end, Node::Label));
                    }
                }
                shadow.weaving_region.ends = Some(ends);
            }
        }

        for index in &sorted_snippets {
            for shadow in &mut markings[*index].shadows {
                let region = &mut shadow.weaving_region;
                if let Some(ends) = region.ends.as_mut() {
                    for end in ends.iter_mut() {
                        *end = insns.insert_after(*end, Node::Label);
                    }
                }
                region.after_throw_start =
                    insns.insert_before(region.after_throw_start, Node::Label);
                region.after_throw_end = insns.insert_after(region.after_throw_end, Node::Label);
            }
        }

        let basic_frames = Analyzer::new(BasicInterpreter).analyze(method)?;
        let source_frames = Analyzer::new(SourceInterpreter).analyze(method)?;
        let ret_frame = method
            .instructions
            .last_real()
            .and_then(|last| basic_frames.get(&last))
            .cloned();

        Ok(WeavingInfo {
            sorted_snippets,
            basic_frames,
            source_frames,
            ret_frame,
        })
    }

    /// Indices of the snippet markings, in weaving order
    pub fn sorted_snippets(&self) -> &[usize] {
        &self.sorted_snippets
    }

    /// Frame at a node (`None` if the node is unreachable or was inserted after the analysis)
    pub fn basic_frame(&self, id: InsnId) -> Option<&Frame<BasicValue>> {
        self.basic_frames.get(&id)
    }

    pub fn source_frame(&self, id: InsnId) -> Option<&Frame<SourceValue>> {
        self.source_frames.get(&id)
    }

    /// Frame at the last instruction of the method
    pub fn ret_frame(&self) -> Option<&Frame<BasicValue>> {
        self.ret_frame.as_ref()
    }

    pub fn stack_not_empty(&self, loc: InsnId) -> bool {
        self.basic_frame(loc).map_or(false, |frame| frame.stack_len() > 0)
    }

    /// Slots needed to back up the stack at a location
    pub fn stack_height(&self, loc: InsnId) -> usize {
        self.basic_frame(loc).map_or(0, |frame| frame.stack_height())
    }

    /// Store the whole stack into locals, starting at `first_slot` with the top of the stack
    pub fn backup_stack(&self, loc: InsnId, first_slot: usize) -> Result<InsnList, Error> {
        let mut code = InsnList::new();
        let mut slot = first_slot;
        if let Some(frame) = self.basic_frame(loc) {
            for value in frame.stack().rev() {
                code.push_insn(store_var(&stack_type(value)?, slot_u16(slot)?));
                slot += value.width();
            }
        }
        Ok(code)
    }

    /// Load back the stack stored by [`WeavingInfo::backup_stack`], followed by a label
    pub fn restore_stack(&self, loc: InsnId, first_slot: usize) -> Result<InsnList, Error> {
        let mut code = InsnList::new();
        let mut front = code.push_label();
        let mut slot = first_slot;
        if let Some(frame) = self.basic_frame(loc) {
            // The top of the stack was stored first, so it is loaded last
            for value in frame.stack().rev() {
                let load = load_var(&stack_type(value)?, slot_u16(slot)?);
                front = code.insert_before(front, Node::Insn(load));
                slot += value.width();
            }
        }
        Ok(code)
    }
}

fn stack_type(value: &BasicValue) -> Result<FieldType, Error> {
    value
        .field_type()
        .ok_or_else(|| Error::Fatal(String::from("uninitialized value on the operand stack")))
}

pub(super) fn slot_u16(slot: usize) -> Result<u16, Error> {
    u16::try_from(slot)
        .map_err(|_| Error::Fatal(format!("local variable slot {} out of range", slot)))
}

/// Copy a stack value into a local, right where it gets produced
///
/// `operand` is the index of the value counted from the top of the stack in `frame`. Each
/// instruction that may have produced the value is followed by a `dup` and a store into `slot`.
/// Values produced by `dup2`-like instructions may be two separate one slot values, in which case
/// the copy is made where the duplicated value was produced instead. Returns the size of the value.
pub fn dup_stack(
    frame: &Frame<SourceValue>,
    method: &mut MethodCode,
    operand: usize,
    field_type: &FieldType,
    slot: usize,
) -> Result<usize, Error> {
    let source = frame.stack_from_top(operand).ok_or_else(|| {
        Error::Fatal(format!(
            "stack item {} not found in a frame of {} items",
            operand,
            frame.stack_len()
        ))
    })?;

    for producer in &source.insns {
        let producer = *producer;
        let produced_by = method.instructions.insn(producer).cloned();

        // A one slot value out of a `dup2` is one of two values it copied
        if source.size == 1 {
            let copied = match produced_by {
                Some(Instruction::Dup2) => Some(operand + 2),
                Some(Instruction::Dup2X1) => Some(operand + 3),
                Some(Instruction::Dup2X2) => {
                    let x2 = frame.stack_from_top(operand + 2).map_or(1, |value| value.size);
                    Some(operand + 4 - x2)
                }
                _ => None,
            };
            if let Some(copied) = copied {
                dup_stack(frame, method, copied, field_type, slot)?;
                continue;
            }
        }

        let store = Node::Insn(store_var(field_type, slot_u16(slot)?));
        let insns = &mut method.instructions;
        if let Some(Instruction::Swap) = produced_by {
            let below = operand
                .checked_sub(1)
                .and_then(|below| frame.stack_from_top(below));
            if below.map_or(false, |value| value.insns.contains(&producer)) {
                insns.insert_before(producer, Node::Insn(Instruction::Dup));
                insns.insert_before(producer, store);
                continue;
            }
        }

        let dup = if source.size == 2 {
            Instruction::Dup2
        } else {
            Instruction::Dup
        };
        let dup = insns.insert_after(producer, Node::Insn(dup));
        insns.insert_after(dup, store);
    }

    Ok(source.size)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{parse_method, render_node};

    fn rendered(insns: &InsnList) -> Vec<String> {
        insns
            .iter()
            .filter_map(|id| render_node(insns.node(id)))
            .collect()
    }

    fn find(method: &MethodCode, mnemonic: &str) -> InsnId {
        let insns = &method.instructions;
        insns
            .iter()
            .find(|id| insns.node(*id).mnemonic() == mnemonic)
            .unwrap()
    }

    #[test]
    fn stack_backup_and_restore() {
        let method = parse_method(
            r#"
            method static f (JI)V
              lload 0
              iload 2
              invokestatic A.g (JI)V
              return
            "#,
        )
        .unwrap();
        let call = find(&method, "invokestatic");

        let info = WeavingInfo {
            sorted_snippets: vec![],
            basic_frames: Analyzer::new(BasicInterpreter).analyze(&method).unwrap(),
            source_frames: Analyzer::new(SourceInterpreter).analyze(&method).unwrap(),
            ret_frame: None,
        };

        assert!(info.stack_not_empty(call));
        assert_eq!(info.stack_height(call), 3);
        assert_eq!(
            rendered(&info.backup_stack(call, 5).unwrap()),
            vec!["istore 5", "lstore 6"]
        );
        let restore = info.restore_stack(call, 5).unwrap();
        assert_eq!(rendered(&restore), vec!["lload 6", "iload 5"]);
        assert!(restore.node(restore.last().unwrap()).is_label());
    }

    #[test]
    fn duplicate_stack_values_where_produced() {
        let mut method = parse_method(
            r#"
            method static f (I)V
              iload 0
              bipush 7
              invokestatic A.g (II)V
              return
            "#,
        )
        .unwrap();
        let call = find(&method, "invokestatic");
        let frames = Analyzer::new(SourceInterpreter).analyze(&method).unwrap();
        let frame = frames[&call].clone();

        let size = dup_stack(&frame, &mut method, 1, &FieldType::int(), 3).unwrap();
        assert_eq!(size, 1);
        assert_eq!(
            rendered(&method.instructions),
            vec!["iload 0", "dup", "istore 3", "bipush 7", "invokestatic A.g (II)V", "return"]
        );
    }

    #[test]
    fn duplicate_through_swap() {
        let mut method = parse_method(
            r#"
            method static f (II)V
              iload 0
              iload 1
              swap
              invokestatic A.g (II)V
              return
            "#,
        )
        .unwrap();
        let call = find(&method, "invokestatic");
        let frames = Analyzer::new(SourceInterpreter).analyze(&method).unwrap();
        let frame = frames[&call].clone();

        // Both values come out of the swap: copy the top one before it runs
        dup_stack(&frame, &mut method, 1, &FieldType::int(), 4).unwrap();
        assert_eq!(
            rendered(&method.instructions),
            vec![
                "iload 0",
                "iload 1",
                "dup",
                "istore 4",
                "swap",
                "invokestatic A.g (II)V",
                "return"
            ]
        );
    }
}
