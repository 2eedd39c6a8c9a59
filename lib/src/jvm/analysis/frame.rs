use super::Interpreter;
use crate::jvm::code::{InsnId, Node};
use crate::jvm::{AnalysisErrorKind, BranchInstruction, Instruction, InvokeType};
use crate::util::{SlotStack, Width};

/// State of the local variables and operand stack before a node executes
///
/// Every local slot holds a value: the second slot of a `long` or `double` holds an empty
/// value, as do slots that were never written. The stack holds one entry per value, so a
/// `long` is one entry spanning two slots.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame<V: Width> {
    locals: Vec<V>,
    stack: SlotStack<V>,
}

impl<V: Clone + Width> Frame<V> {
    /// Frame with `max_locals` empty locals and an empty stack
    pub fn new(max_locals: usize, empty: V) -> Frame<V> {
        Frame {
            locals: vec![empty; max_locals],
            stack: SlotStack::new(),
        }
    }

    pub fn locals(&self) -> &[V] {
        &self.locals
    }

    pub fn local(&self, slot: usize) -> Option<&V> {
        self.locals.get(slot)
    }

    /// Overwrite a local, growing the locals with empty values when needed
    pub fn set_local<I: Interpreter<Value = V>>(&mut self, slot: usize, value: V, interpreter: &I) {
        while self.locals.len() <= slot {
            self.locals.push(interpreter.new_empty_value());
        }
        self.locals[slot] = value;
    }

    /// Number of values on the stack
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Number of slots used on the stack
    pub fn stack_height(&self) -> usize {
        self.stack.height()
    }

    /// Stack values, bottom first
    pub fn stack(&self) -> impl DoubleEndedIterator<Item = &V> + '_ {
        self.stack.iter()
    }

    /// Stack value by its entry index counted from the top (`0` is the top)
    pub fn stack_from_top(&self, index: usize) -> Option<&V> {
        self.stack.get_from_top(index)
    }

    /// Stack value found `depth` slots below the top
    pub fn stack_at_depth(&self, mut depth: usize) -> Option<&V> {
        let mut index = 0;
        while depth > 0 {
            depth = depth.saturating_sub(self.stack.get_from_top(index)?.width());
            index += 1;
        }
        self.stack.get_from_top(index)
    }

    pub fn push(&mut self, value: V) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<V, AnalysisErrorKind> {
        self.stack.pop().ok_or(AnalysisErrorKind::EmptyStack)
    }

    fn pop_expecting_width(&mut self, expected: usize) -> Result<V, AnalysisErrorKind> {
        let value = self.pop()?;
        let found = value.width();
        if found == expected {
            Ok(value)
        } else {
            Err(AnalysisErrorKind::InvalidWidth(found))
        }
    }

    fn pop_many(&mut self, count: usize) -> Result<Vec<V>, AnalysisErrorKind> {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.pop()?);
        }
        values.reverse();
        Ok(values)
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    /// Merge another frame reaching the same node into this one
    ///
    /// Returns whether this frame changed.
    pub fn merge<I: Interpreter<Value = V>>(
        &mut self,
        other: &Frame<V>,
        interpreter: &I,
    ) -> Result<bool, AnalysisErrorKind>
    where
        V: PartialEq,
    {
        if self.stack.len() != other.stack.len() {
            return Err(AnalysisErrorKind::IncompatibleStackHeights(
                self.stack_height(),
                other.stack_height(),
            ));
        }

        let mut changed = false;
        let slots = self.locals.len().max(other.locals.len());
        for slot in 0..slots {
            let empty = interpreter.new_empty_value();
            let mine = self.locals.get(slot).unwrap_or(&empty);
            let theirs = other.locals.get(slot).unwrap_or(&empty);
            let merged = interpreter.merge(mine, theirs);
            if &merged != mine {
                changed = true;
                self.set_local(slot, merged, interpreter);
            } else if slot >= self.locals.len() {
                self.set_local(slot, merged, interpreter);
            }
        }

        let mut stack = SlotStack::new();
        for (mine, theirs) in self.stack.iter().zip(other.stack.iter()) {
            let merged = interpreter.merge(mine, theirs);
            changed |= &merged != mine;
            stack.push(merged);
        }
        self.stack = stack;

        Ok(changed)
    }

    /// Update the frame to reflect the effects of executing a node
    pub fn execute<I: Interpreter<Value = V>>(
        &mut self,
        id: InsnId,
        node: &Node,
        interpreter: &I,
    ) -> Result<(), AnalysisErrorKind> {
        match node {
            Node::Label | Node::Line(_) => Ok(()),
            Node::Insn(insn) => self.execute_insn(id, insn, interpreter),
            Node::Branch(branch) => self.execute_branch(branch),
        }
    }

    fn execute_branch(&mut self, branch: &BranchInstruction) -> Result<(), AnalysisErrorKind> {
        use BranchInstruction::*;
        match branch {
            If(_, _) | IfNull(_, _) | TableSwitch { .. } | LookupSwitch { .. } | AThrow => {
                self.pop()?;
            }
            IfICmp(_, _) | IfACmp(_, _) => {
                self.pop()?;
                self.pop()?;
            }
            IReturn | FReturn | AReturn => {
                self.pop_expecting_width(1)?;
            }
            LReturn | DReturn => {
                self.pop_expecting_width(2)?;
            }
            Goto(_) | Return => (),
        }
        Ok(())
    }

    fn store_local<I: Interpreter<Value = V>>(&mut self, slot: usize, value: V, interpreter: &I) {
        let wide = value.width() == 2;
        self.set_local(slot, value, interpreter);
        if wide {
            self.set_local(slot + 1, interpreter.new_empty_value(), interpreter);
        }
        if slot > 0 && self.locals.get(slot - 1).map_or(false, |v| v.width() == 2) {
            self.set_local(slot - 1, interpreter.new_empty_value(), interpreter);
        }
    }

    fn execute_insn<I: Interpreter<Value = V>>(
        &mut self,
        id: InsnId,
        insn: &Instruction,
        interpreter: &I,
    ) -> Result<(), AnalysisErrorKind> {
        use Instruction::*;

        match insn {
            Nop => (),

            AConstNull | IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5
            | LConst0 | LConst1 | FConst0 | FConst1 | FConst2 | DConst0 | DConst1 | BiPush(_)
            | SiPush(_) | Ldc(_) | GetStatic(_) | New(_) => {
                let value = interpreter.new_operation(id, insn);
                self.push(value);
            }

            ILoad(slot) | LLoad(slot) | FLoad(slot) | DLoad(slot) | ALoad(slot) => {
                let value = match self.local(*slot as usize) {
                    Some(local) => interpreter.copy_operation(id, insn, local),
                    None => interpreter.copy_operation(id, insn, &interpreter.new_empty_value()),
                };
                self.push(value);
            }

            IStore(slot) | LStore(slot) | FStore(slot) | DStore(slot) | AStore(slot) => {
                let value = self.pop()?;
                let value = interpreter.copy_operation(id, insn, &value);
                self.store_local(*slot as usize, value, interpreter);
            }

            IInc(slot, _) => {
                let slot = *slot as usize;
                let current = self
                    .local(slot)
                    .cloned()
                    .unwrap_or_else(|| interpreter.new_empty_value());
                let value = interpreter.unary_operation(id, insn, &current);
                self.set_local(slot, value, interpreter);
            }

            Pop => {
                self.pop_expecting_width(1)?;
            }
            Pop2 => {
                if self.pop()?.width() == 1 {
                    self.pop_expecting_width(1)?;
                }
            }

            Dup => {
                let v1 = self.pop_expecting_width(1)?;
                let copy = interpreter.copy_operation(id, insn, &v1);
                self.push(v1);
                self.push(copy);
            }
            DupX1 => {
                let v1 = self.pop_expecting_width(1)?;
                let v2 = self.pop_expecting_width(1)?;
                self.push(interpreter.copy_operation(id, insn, &v1));
                self.push(v2);
                self.push(v1);
            }
            DupX2 => {
                let v1 = self.pop_expecting_width(1)?;
                let v2 = self.pop()?;
                match v2.width() {
                    // Form 1
                    1 => {
                        let v3 = self.pop_expecting_width(1)?;
                        self.push(interpreter.copy_operation(id, insn, &v1));
                        self.push(v3);
                        self.push(v2);
                        self.push(v1);
                    }

                    // Form 2
                    _ => {
                        self.push(interpreter.copy_operation(id, insn, &v1));
                        self.push(v2);
                        self.push(v1);
                    }
                }
            }
            Dup2 => {
                let v1 = self.pop()?;
                match v1.width() {
                    // Form 1
                    1 => {
                        let v2 = self.pop_expecting_width(1)?;
                        let copy2 = interpreter.copy_operation(id, insn, &v2);
                        let copy1 = interpreter.copy_operation(id, insn, &v1);
                        self.push(v2);
                        self.push(v1);
                        self.push(copy2);
                        self.push(copy1);
                    }

                    // Form 2
                    _ => {
                        let copy = interpreter.copy_operation(id, insn, &v1);
                        self.push(v1);
                        self.push(copy);
                    }
                }
            }
            Dup2X1 => {
                let v1 = self.pop()?;
                match v1.width() {
                    // Form 1
                    1 => {
                        let v2 = self.pop_expecting_width(1)?;
                        let v3 = self.pop_expecting_width(1)?;
                        self.push(interpreter.copy_operation(id, insn, &v2));
                        self.push(interpreter.copy_operation(id, insn, &v1));
                        self.push(v3);
                        self.push(v2);
                        self.push(v1);
                    }

                    // Form 2
                    _ => {
                        let v2 = self.pop_expecting_width(1)?;
                        self.push(interpreter.copy_operation(id, insn, &v1));
                        self.push(v2);
                        self.push(v1);
                    }
                }
            }
            Dup2X2 => {
                let v1 = self.pop()?;
                if v1.width() == 1 {
                    let v2 = self.pop_expecting_width(1)?;
                    let v3 = self.pop()?;
                    if v3.width() == 1 {
                        // Form 1
                        let v4 = self.pop_expecting_width(1)?;
                        self.push(interpreter.copy_operation(id, insn, &v2));
                        self.push(interpreter.copy_operation(id, insn, &v1));
                        self.push(v4);
                        self.push(v3);
                        self.push(v2);
                        self.push(v1);
                    } else {
                        // Form 3
                        self.push(interpreter.copy_operation(id, insn, &v2));
                        self.push(interpreter.copy_operation(id, insn, &v1));
                        self.push(v3);
                        self.push(v2);
                        self.push(v1);
                    }
                } else {
                    let v2 = self.pop()?;
                    if v2.width() == 1 {
                        // Form 2
                        let v3 = self.pop_expecting_width(1)?;
                        self.push(interpreter.copy_operation(id, insn, &v1));
                        self.push(v3);
                        self.push(v2);
                        self.push(v1);
                    } else {
                        // Form 4
                        self.push(interpreter.copy_operation(id, insn, &v1));
                        self.push(v2);
                        self.push(v1);
                    }
                }
            }
            Swap => {
                let v2 = self.pop_expecting_width(1)?;
                let v1 = self.pop_expecting_width(1)?;
                self.push(interpreter.copy_operation(id, insn, &v2));
                self.push(interpreter.copy_operation(id, insn, &v1));
            }

            INeg | LNeg | FNeg | DNeg | I2L | I2F | I2D | L2I | L2F | L2D | F2I | F2L | F2D
            | D2I | D2L | D2F | I2B | I2C | I2S | GetField(_) | NewArray(_) | ANewArray(_)
            | ArrayLength | CheckCast(_) | InstanceOf(_) => {
                let v1 = self.pop()?;
                let value = interpreter.unary_operation(id, insn, &v1);
                self.push(value);
            }

            PutStatic(_) | MonitorEnter | MonitorExit => {
                let v1 = self.pop()?;
                interpreter.unary_operation(id, insn, &v1);
            }

            IALoad | LALoad | FALoad | DALoad | AALoad | BALoad | CALoad | SALoad | IAdd | LAdd
            | FAdd | DAdd | ISub | LSub | FSub | DSub | IMul | LMul | FMul | DMul | IDiv
            | LDiv | FDiv | DDiv | IRem | LRem | FRem | DRem | ISh(_) | LSh(_) | IAnd | LAnd
            | IOr | LOr | IXor | LXor | LCmp | FCmp(_) | DCmp(_) => {
                let v2 = self.pop()?;
                let v1 = self.pop()?;
                let value = interpreter.binary_operation(id, insn, &v1, &v2);
                self.push(value);
            }

            PutField(_) => {
                let v2 = self.pop()?;
                let v1 = self.pop()?;
                interpreter.binary_operation(id, insn, &v1, &v2);
            }

            IAStore | LAStore | FAStore | DAStore | AAStore | BAStore | CAStore | SAStore => {
                let v3 = self.pop()?;
                let v2 = self.pop()?;
                let v1 = self.pop()?;
                interpreter.ternary_operation(id, insn, &v1, &v2, &v3);
            }

            Invoke(typ, method) => {
                let count =
                    method.descriptor.parameters.len() + (*typ != InvokeType::Static) as usize;
                let values = self.pop_many(count)?;
                let value = interpreter.nary_operation(id, insn, &values);
                if method.descriptor.return_type.is_some() {
                    self.push(value);
                }
            }
            InvokeDynamic(indy) => {
                let values = self.pop_many(indy.descriptor.parameters.len())?;
                let value = interpreter.nary_operation(id, insn, &values);
                if indy.descriptor.return_type.is_some() {
                    self.push(value);
                }
            }
            MultiANewArray(_, dims) => {
                let values = self.pop_many(*dims as usize)?;
                let value = interpreter.nary_operation(id, insn, &values);
                self.push(value);
            }
        }

        Ok(())
    }
}
