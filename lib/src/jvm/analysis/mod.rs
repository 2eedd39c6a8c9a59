//! Data-flow analysis of method code
//!
//! The analyzer computes, for every reachable node, the frame holding before the node executes.
//! What the frame tracks is up to an [`Interpreter`]: the JVM type of values
//! ([`BasicInterpreter`]), the nodes that may have produced them ([`SourceInterpreter`]), or
//! anything else that can be computed by abstract interpretation (eg. constants).
//!
//! Control flow follows jumps, switches and fall through, plus an edge from every node covered
//! by an exception table entry to the entry's handler (with the frame before the node, an empty
//! stack and the exception pushed).

mod basic;
mod frame;
mod source;

pub use basic::*;
pub use frame::*;
pub use source::*;

use crate::jvm::code::{InsnId, MethodCode, Node, TryCatchBlock};
use crate::jvm::{AnalysisErrorKind, Error, FieldType, Instruction};
use crate::util::Width;
use log::trace;
use std::collections::HashMap;
use std::fmt::Debug;

/// Abstract semantics of the instructions
///
/// Each operation receives the node being executed and the values it consumes, and returns the
/// value it produces. Operations whose result is discarded (eg. `putfield`) are still called.
pub trait Interpreter {
    type Value: Clone + PartialEq + Debug + Width;

    /// Value of the given type (`None` asks for an empty or uninitialized slot)
    fn new_value(&self, typ: Option<&FieldType>) -> Self::Value;

    fn new_parameter_value(&self, typ: &FieldType) -> Self::Value {
        self.new_value(Some(typ))
    }

    fn new_empty_value(&self) -> Self::Value {
        self.new_value(None)
    }

    /// Value pushed on entry to an exception handler
    fn new_exception_value(&self, tcb: &TryCatchBlock) -> Self::Value {
        let class = tcb.exception.as_deref().unwrap_or("java/lang/Throwable");
        self.new_value(Some(&FieldType::object(class)))
    }

    /// Constant loads, `getstatic`, `new`
    fn new_operation(&self, id: InsnId, insn: &Instruction) -> Self::Value;

    /// Local loads and stores, `dup*`, `swap`
    fn copy_operation(&self, id: InsnId, insn: &Instruction, value: &Self::Value) -> Self::Value;

    fn unary_operation(&self, id: InsnId, insn: &Instruction, value: &Self::Value)
        -> Self::Value;

    fn binary_operation(
        &self,
        id: InsnId,
        insn: &Instruction,
        value1: &Self::Value,
        value2: &Self::Value,
    ) -> Self::Value;

    fn ternary_operation(
        &self,
        id: InsnId,
        insn: &Instruction,
        value1: &Self::Value,
        value2: &Self::Value,
        value3: &Self::Value,
    ) -> Self::Value;

    /// Invocations and `multianewarray` (arguments are in push order)
    fn nary_operation(&self, id: InsnId, insn: &Instruction, values: &[Self::Value])
        -> Self::Value;

    /// Value of a slot reached through two control flow paths
    fn merge(&self, value1: &Self::Value, value2: &Self::Value) -> Self::Value;
}

/// Frames of a method, keyed by node (unreachable nodes have no frame)
pub type Frames<V> = HashMap<InsnId, Frame<V>>;

pub struct Analyzer<I: Interpreter> {
    interpreter: I,
}

impl<I: Interpreter> Analyzer<I> {
    pub fn new(interpreter: I) -> Analyzer<I> {
        Analyzer { interpreter }
    }

    pub fn interpreter(&self) -> &I {
        &self.interpreter
    }

    /// Frame on entry to the method: the receiver (if any) then the parameters
    pub fn initial_frame(&self, method: &MethodCode) -> Frame<I::Value> {
        let interpreter = &self.interpreter;
        let mut frame = Frame::new(method.max_locals, interpreter.new_empty_value());
        let mut slot = 0;
        if !method.is_static() {
            let this = interpreter.new_parameter_value(&FieldType::object(method.owner.as_str()));
            frame.set_local(slot, this, interpreter);
            slot += 1;
        }
        for parameter in &method.descriptor.parameters {
            frame.set_local(slot, interpreter.new_parameter_value(parameter), interpreter);
            if parameter.width() == 2 {
                frame.set_local(slot + 1, interpreter.new_empty_value(), interpreter);
            }
            slot += parameter.width();
        }
        frame
    }

    /// Compute the frame before every reachable node of the method
    pub fn analyze(&self, method: &MethodCode) -> Result<Frames<I::Value>, Error> {
        let insns = &method.instructions;
        let ids = insns.ids();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let position: HashMap<InsnId, usize> =
            ids.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();
        let lookup = |lbl: InsnId| -> Result<usize, Error> {
            position.get(&lbl).copied().ok_or_else(|| {
                Error::DanglingLabel(format!("{:?} in {}", lbl, method.display_name()))
            })
        };

        // Exception table entries covering each position
        let mut handlers: Vec<Vec<(&TryCatchBlock, usize)>> = vec![vec![]; ids.len()];
        for tcb in &method.try_catch_blocks {
            let start = lookup(tcb.start)?;
            let end = lookup(tcb.end)?;
            let handler = lookup(tcb.handler)?;
            for covered in handlers.iter_mut().take(end).skip(start) {
                covered.push((tcb, handler));
            }
        }

        let mut frames: Vec<Option<Frame<I::Value>>> = vec![None; ids.len()];
        let mut queued = vec![false; ids.len()];
        let mut worklist = vec![0];
        frames[0] = Some(self.initial_frame(method));
        queued[0] = true;

        while let Some(pos) = worklist.pop() {
            queued[pos] = false;
            let id = ids[pos];
            let before = match &frames[pos] {
                Some(frame) => frame.clone(),
                None => continue,
            };
            let fail = |kind: AnalysisErrorKind| Error::Analysis { index: pos, kind };

            let node = insns.node(id);
            let mut after = before.clone();
            after.execute(id, node, &self.interpreter).map_err(fail)?;

            let mut successors = vec![];
            let falls_through = match node {
                Node::Branch(branch) => {
                    for target in branch.jump_targets() {
                        successors.push(lookup(target)?);
                    }
                    branch.falls_through()
                }
                _ => true,
            };
            if falls_through {
                if pos + 1 < ids.len() {
                    successors.push(pos + 1);
                } else {
                    return Err(fail(AnalysisErrorKind::FallsOffEnd));
                }
            }

            for succ in successors {
                self.merge_into(&mut frames, &mut worklist, &mut queued, succ, &after)
                    .map_err(fail)?;
            }
            for (tcb, handler) in &handlers[pos] {
                let mut frame = before.clone();
                frame.clear_stack();
                frame.push(self.interpreter.new_exception_value(tcb));
                self.merge_into(&mut frames, &mut worklist, &mut queued, *handler, &frame)
                    .map_err(fail)?;
            }
        }

        trace!(
            "analyzed {}: {} of {} nodes reachable",
            method.display_name(),
            frames.iter().filter(|f| f.is_some()).count(),
            ids.len()
        );

        Ok(ids
            .into_iter()
            .zip(frames)
            .filter_map(|(id, frame)| frame.map(|frame| (id, frame)))
            .collect())
    }

    fn merge_into(
        &self,
        frames: &mut [Option<Frame<I::Value>>],
        worklist: &mut Vec<usize>,
        queued: &mut [bool],
        pos: usize,
        frame: &Frame<I::Value>,
    ) -> Result<(), AnalysisErrorKind> {
        let changed = match &mut frames[pos] {
            Some(existing) => existing.merge(frame, &self.interpreter)?,
            empty => {
                *empty = Some(frame.clone());
                true
            }
        };
        if changed && !queued[pos] {
            queued[pos] = true;
            worklist.push(pos);
        }
        Ok(())
    }
}

/// Static type of the value an instruction pushes
///
/// `None` for instructions that push nothing of their own (stores, `dup`s, void calls, ...).
/// Values whose precise type depends on the operands get the most general type: `aaload` and
/// `aconst_null` produce `java/lang/Object`.
pub fn produced_type(insn: &Instruction) -> Option<FieldType> {
    use Instruction::*;
    let int = FieldType::int;
    let typ = match insn {
        AConstNull | ALoad(_) | AALoad => FieldType::java_object(),
        IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 | BiPush(_)
        | SiPush(_) | ILoad(_) | IALoad | BALoad | CALoad | SALoad | IAdd | ISub | IMul | IDiv
        | IRem | INeg | ISh(_) | IAnd | IOr | IXor | IInc(_, _) | L2I | F2I | D2I | I2B | I2C
        | I2S | LCmp | FCmp(_) | DCmp(_) | ArrayLength | InstanceOf(_) => int(),
        LConst0 | LConst1 | LLoad(_) | LALoad | LAdd | LSub | LMul | LDiv | LRem | LNeg
        | LSh(_) | LAnd | LOr | LXor | I2L | F2L | D2L => FieldType::long(),
        FConst0 | FConst1 | FConst2 | FLoad(_) | FALoad | FAdd | FSub | FMul | FDiv | FRem
        | FNeg | I2F | L2F | D2F => FieldType::float(),
        DConst0 | DConst1 | DLoad(_) | DALoad | DAdd | DSub | DMul | DDiv | DRem | DNeg | I2D
        | L2D | F2D => FieldType::double(),
        Ldc(constant) => constant.field_type(),
        GetStatic(field) | GetField(field) => field.descriptor.clone(),
        Invoke(_, method) => method.descriptor.return_type.clone()?,
        InvokeDynamic(indy) => indy.descriptor.return_type.clone()?,
        New(class) => FieldType::object(class.as_str()),
        NewArray(base) => FieldType::array(FieldType::Base(*base)),
        ANewArray(elem) => FieldType::array(FieldType::Ref(elem.clone())),
        CheckCast(typ) | MultiANewArray(typ, _) => FieldType::Ref(typ.clone()),
        Nop | IStore(_) | LStore(_) | FStore(_) | DStore(_) | AStore(_) | IAStore | LAStore
        | FAStore | DAStore | AAStore | BAStore | CAStore | SAStore | Pop | Pop2 | Dup
        | DupX1 | DupX2 | Dup2 | Dup2X1 | Dup2X2 | Swap | PutStatic(_) | PutField(_)
        | MonitorEnter | MonitorExit => return None,
    };
    Some(typ)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::parse_method;

    #[test]
    fn frames_follow_control_flow() {
        let method = parse_method(
            r#"
            method static f (I)I
              iload 0
              ifeq ZERO
              iconst_1
              goto END
            ZERO:
              iconst_2
            END:
              ireturn
            DEAD:
              iconst_3
              ireturn
            "#,
        )
        .unwrap();
        let frames = Analyzer::new(BasicInterpreter).analyze(&method).unwrap();
        let insns = &method.instructions;

        let ret = insns.get(7).unwrap();
        assert_eq!(insns.node(ret).mnemonic(), "ireturn");
        let frame = &frames[&ret];
        assert_eq!(frame.stack_len(), 1);
        assert_eq!(frame.stack_from_top(0), Some(&BasicValue::Int));

        let dead = insns.get(9).unwrap();
        assert!(!frames.contains_key(&dead));
    }

    #[test]
    fn handlers_see_the_exception() {
        let method = parse_method(
            r#"
            method static f ()V
            START:
              invokestatic A.g ()V
            END:
              return
            HANDLER:
              astore 0
              return
              try START END HANDLER java/lang/Exception
            "#,
        )
        .unwrap();
        let frames = Analyzer::new(BasicInterpreter).analyze(&method).unwrap();
        let insns = &method.instructions;
        let store = insns.next(insns.get(4).unwrap()).unwrap();
        assert_eq!(insns.node(store).mnemonic(), "astore");
        assert_eq!(frames[&store].stack_from_top(0), Some(&BasicValue::Reference));
    }

    #[test]
    fn falling_off_the_end_is_an_error() {
        let method = parse_method(
            r#"
            method static f ()V
              iconst_1
              pop
            "#,
        )
        .unwrap();
        let err = Analyzer::new(BasicInterpreter).analyze(&method).unwrap_err();
        assert!(matches!(
            err,
            Error::Analysis {
                kind: AnalysisErrorKind::FallsOffEnd,
                ..
            }
        ));
    }

    #[test]
    fn mismatched_stacks_are_rejected() {
        let method = parse_method(
            r#"
            method static f (I)V
              iload 0
              ifeq SKIP
              iconst_1
            SKIP:
              return
            "#,
        )
        .unwrap();
        let err = Analyzer::new(BasicInterpreter).analyze(&method).unwrap_err();
        assert!(matches!(
            err,
            Error::Analysis {
                kind: AnalysisErrorKind::IncompatibleStackHeights(_, _),
                ..
            }
        ));
    }

    #[test]
    fn wide_values_use_two_slots() {
        let method = parse_method(
            r#"
            method static f (JI)V
              lload 0
              iload 2
              pop
              dup2
              pop2
              lstore 3
              return
            "#,
        )
        .unwrap();
        let frames = Analyzer::new(BasicInterpreter).analyze(&method).unwrap();
        let insns = &method.instructions;
        let entry = frames[&insns.first().unwrap()].clone();
        assert_eq!(entry.local(0), Some(&BasicValue::Long));
        assert_eq!(entry.local(1), Some(&BasicValue::Uninitialized));
        assert_eq!(entry.local(2), Some(&BasicValue::Int));

        let pop2 = insns.get(4).unwrap();
        assert_eq!(frames[&pop2].stack_height(), 4);
        assert_eq!(frames[&pop2].stack_len(), 2);
        assert_eq!(frames[&pop2].stack_at_depth(2), Some(&BasicValue::Long));
    }
}
