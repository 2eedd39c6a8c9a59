use super::{insn_region, MarkedRegion};
use crate::cfg::{block_starts, ControlFlowGraph};
use crate::jvm::code::{InsnId, MethodCode, Node};
use crate::jvm::{opcode_mnemonic, Instruction, InvokeType};
use crate::weaver::Error;
use std::collections::BTreeSet;

/// Strategy picking out the regions of a method to weave around
pub trait Marker {
    fn mark(&self, method: &MethodCode) -> Vec<MarkedRegion>;

    /// Whether every region is a single instruction selected by opcode
    ///
    /// Argument processors reading the arguments of a call site need the region to be exactly
    /// one invocation, which only this kind of marker can guarantee.
    fn is_bytecode_marker(&self) -> bool {
        false
    }
}

/// The whole method, exiting at every return
#[derive(Copy, Clone, Debug, Default)]
pub struct BodyMarker;

impl Marker for BodyMarker {
    fn mark(&self, method: &MethodCode) -> Vec<MarkedRegion> {
        let insns = &method.instructions;
        let (first, last) = match (insns.first(), insns.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return vec![],
        };
        let returns: Vec<InsnId> = insns
            .iter()
            .filter(|id| insns.node(*id).is_return())
            .collect();

        // Exceptions thrown anywhere in the body are caught, not just up to the last return
        let mut region = MarkedRegion::with_default_weaving_region(method, first, returns);
        if let Some(weaving_region) = region.weaving_region.as_mut() {
            weaving_region.after_throw_end = last;
        }
        vec![region]
    }
}

/// The whole method like [`BodyMarker`], except that constructors start after the call to the
/// superclass (or another) constructor
///
/// The `java/lang/Object` constructor calls no other constructor, and starts at its first
/// instruction.
#[derive(Copy, Clone, Debug, Default)]
pub struct AfterInitBodyMarker;

impl AfterInitBodyMarker {
    fn body_start(method: &MethodCode) -> Option<InsnId> {
        let insns = &method.instructions;
        let first = insns.first()?;
        if method.name != "<init>" {
            return Some(first);
        }

        // The first `<init>` call not matching a `new` initializes `this`
        let mut pending_news = 0;
        for id in insns {
            match insns.node(id) {
                Node::Insn(Instruction::New(_)) => pending_news += 1,
                Node::Insn(Instruction::Invoke(InvokeType::Special, callee))
                    if callee.name == "<init>" =>
                {
                    if pending_news == 0 {
                        return insns.next(id).or(Some(id));
                    }
                    pending_news -= 1;
                }
                _ => (),
            }
        }
        Some(first)
    }
}

impl Marker for AfterInitBodyMarker {
    fn mark(&self, method: &MethodCode) -> Vec<MarkedRegion> {
        let insns = &method.instructions;
        let (start, last) = match (AfterInitBodyMarker::body_start(method), insns.last()) {
            (Some(start), Some(last)) => (start, last),
            _ => return vec![],
        };
        let returns: Vec<InsnId> = insns
            .iter()
            .filter(|id| insns.node(*id).is_return())
            .collect();

        let mut region = MarkedRegion::with_default_weaving_region(method, start, returns);
        if let Some(weaving_region) = region.weaving_region.as_mut() {
            weaving_region.after_throw_end = last;
        }
        vec![region]
    }
}

/// Every basic block, from its first to its last real instruction
#[derive(Copy, Clone, Debug, Default)]
pub struct BasicBlockMarker {
    /// Also end blocks after every instruction that might throw
    pub precise: bool,
}

impl Marker for BasicBlockMarker {
    fn mark(&self, method: &MethodCode) -> Vec<MarkedRegion> {
        let insns = &method.instructions;
        let last = match insns.last_real() {
            Some(last) => last,
            None => return vec![],
        };
        let mut separators = block_starts(insns, &method.try_catch_blocks, self.precise);
        separators.push(last);

        let mut regions = vec![];
        for i in 0..separators.len() - 1 {
            let start = separators[i];
            let mut end = separators[i + 1];
            if i + 2 != separators.len() {
                end = insns.prev(end).unwrap_or(start);
            }
            let end = insns.last_real_to(end).unwrap_or(start);
            regions.push(MarkedRegion::with_default_weaving_region(
                method,
                start,
                vec![end],
            ));
        }
        regions
    }
}

/// Every instruction with one of the given opcodes
#[derive(Clone, Debug)]
pub struct BytecodeMarker {
    opcodes: BTreeSet<u8>,
}

impl BytecodeMarker {
    pub fn new(opcodes: impl IntoIterator<Item = u8>) -> Result<BytecodeMarker, Error> {
        let opcodes: BTreeSet<u8> = opcodes.into_iter().collect();
        if opcodes.is_empty() {
            return Err(Error::InvalidMarker(String::from(
                "bytecode marker needs at least one opcode",
            )));
        }
        Ok(BytecodeMarker { opcodes })
    }

    /// Marker from a comma separated list of mnemonics (eg. `invokevirtual, invokestatic`)
    pub fn from_mnemonics(mnemonics: &str) -> Result<BytecodeMarker, Error> {
        BytecodeMarker::new(parse_opcodes(mnemonics)?)
    }

    fn marks(&self, node: &Node) -> bool {
        match node.opcode() {
            Some(opcode) => self.opcodes.contains(&opcode),
            None => false,
        }
    }
}

fn parse_opcodes(mnemonics: &str) -> Result<Vec<u8>, Error> {
    let mut opcodes = vec![];
    for mnemonic in mnemonics.split(',').map(str::trim).filter(|m| !m.is_empty()) {
        let mnemonic = mnemonic.to_ascii_lowercase();
        let opcode = (0..=u8::MAX)
            .find(|op| opcode_mnemonic(*op) == mnemonic)
            .ok_or_else(|| Error::InvalidMarker(format!("unknown instruction `{}`", mnemonic)))?;
        opcodes.push(opcode);
    }
    Ok(opcodes)
}

impl Marker for BytecodeMarker {
    fn mark(&self, method: &MethodCode) -> Vec<MarkedRegion> {
        let insns = &method.instructions;
        insns
            .iter()
            .filter(|id| self.marks(insns.node(*id)))
            .map(|id| MarkedRegion::with_default_weaving_region(method, id, vec![id]))
            .collect()
    }

    fn is_bytecode_marker(&self) -> bool {
        true
    }
}

/// Like [`BytecodeMarker`], but "after" code always goes right after the instruction, even when
/// it is a jump
#[derive(Clone, Debug)]
pub struct StrictBytecodeMarker {
    marker: BytecodeMarker,
}

impl StrictBytecodeMarker {
    pub fn new(opcodes: impl IntoIterator<Item = u8>) -> Result<StrictBytecodeMarker, Error> {
        Ok(StrictBytecodeMarker {
            marker: BytecodeMarker::new(opcodes)?,
        })
    }

    pub fn from_mnemonics(mnemonics: &str) -> Result<StrictBytecodeMarker, Error> {
        StrictBytecodeMarker::new(parse_opcodes(mnemonics)?)
    }
}

impl Marker for StrictBytecodeMarker {
    fn mark(&self, method: &MethodCode) -> Vec<MarkedRegion> {
        let insns = &method.instructions;
        insns
            .iter()
            .filter(|id| self.marker.marks(insns.node(*id)))
            .map(insn_region)
            .collect()
    }

    fn is_bytecode_marker(&self) -> bool {
        true
    }
}

/// Every try block of the exception table
#[derive(Copy, Clone, Debug, Default)]
pub struct TryClauseMarker;

impl Marker for TryClauseMarker {
    fn mark(&self, method: &MethodCode) -> Vec<MarkedRegion> {
        let insns = &method.instructions;
        let mut regions = vec![];
        for tcb in &method.try_catch_blocks {
            let start = insns.first_real_from(tcb.start);
            let end = insns.last_real_to(tcb.end);
            if let (Some(start), Some(end)) = (start, end) {
                regions.push(MarkedRegion::with_default_weaving_region(
                    method,
                    start,
                    vec![end],
                ));
            }
        }
        regions
    }
}

/// Every exception handler, up to where it rejoins the code it protects
#[derive(Copy, Clone, Debug, Default)]
pub struct ExceptionHandlerMarker;

impl Marker for ExceptionHandlerMarker {
    fn mark(&self, method: &MethodCode) -> Vec<MarkedRegion> {
        let insns = &method.instructions;
        let mut cfg = ControlFlowGraph::new(insns, &method.try_catch_blocks);
        if let Some(first) = insns.first() {
            cfg.visit(insns, first);
        }

        let mut regions = vec![];
        for tcb in &method.try_catch_blocks {
            let exits = cfg.visit(insns, tcb.handler);
            if let Some(start) = insns.first_real_from(tcb.handler) {
                regions.push(MarkedRegion::with_default_weaving_region(
                    method, start, exits,
                ));
            }
        }
        regions
    }
}

/// Every constructor call completing the initialization of a `new` object
///
/// Calls to `<init>` with no pending `new` are super or this constructor calls, and are skipped.
#[derive(Copy, Clone, Debug, Default)]
pub struct NewObjMarker;

impl Marker for NewObjMarker {
    fn mark(&self, method: &MethodCode) -> Vec<MarkedRegion> {
        let insns = &method.instructions;
        let mut pending_news = 0;
        let mut regions = vec![];
        for id in insns {
            match insns.node(id) {
                Node::Insn(Instruction::New(_)) => pending_news += 1,
                Node::Insn(Instruction::Invoke(InvokeType::Special, callee))
                    if callee.name == "<init>" && pending_news > 0 =>
                {
                    pending_news -= 1;
                    regions.push(insn_region(id));
                }
                _ => (),
            }
        }
        regions
    }
}

/// Every real instruction matching a predicate
pub struct InsnMarker<F> {
    predicate: F,
}

impl<F: Fn(&Node) -> bool> InsnMarker<F> {
    pub fn new(predicate: F) -> InsnMarker<F> {
        InsnMarker { predicate }
    }
}

impl<F: Fn(&Node) -> bool> Marker for InsnMarker<F> {
    fn mark(&self, method: &MethodCode) -> Vec<MarkedRegion> {
        let insns = &method.instructions;
        insns
            .iter()
            .filter(|id| {
                let node = insns.node(*id);
                node.is_real() && (self.predicate)(node)
            })
            .map(insn_region)
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::parse_method;

    fn branching_method() -> MethodCode {
        parse_method(
            r#"
            method static f (I)I
              iload 0
              ifeq ZERO
              iconst_1
              ireturn
            ZERO:
              iconst_0
              ireturn
            "#,
        )
        .unwrap()
    }

    #[test]
    fn body_covers_everything() {
        let method = branching_method();
        let insns = &method.instructions;
        let regions = BodyMarker.mark(&method);
        assert_eq!(regions.len(), 1);

        let region = &regions[0];
        assert_eq!(region.start, insns.first().unwrap());
        assert_eq!(region.ends.len(), 2);
        assert!(region.ends.iter().all(|end| insns.node(*end).is_return()));
        let weaving = region.weaving_region.as_ref().unwrap();
        assert_eq!(weaving.after_throw_end, insns.last().unwrap());
    }

    #[test]
    fn one_region_per_block() {
        let method = branching_method();
        let insns = &method.instructions;
        let regions = BasicBlockMarker { precise: false }.mark(&method);
        assert_eq!(regions.len(), 3);

        let mnemonics: Vec<(&str, &str)> = regions
            .iter()
            .map(|r| (insns.node(r.start).mnemonic(), insns.node(r.ends[0]).mnemonic()))
            .collect();
        assert_eq!(
            mnemonics,
            vec![
                ("iload", "ifeq"),
                ("iconst_1", "ireturn"),
                ("iconst_0", "ireturn")
            ]
        );
    }

    #[test]
    fn bytecode_marker_by_mnemonic() {
        let method = branching_method();
        let insns = &method.instructions;
        let marker = BytecodeMarker::from_mnemonics("ireturn").unwrap();
        assert!(marker.is_bytecode_marker());
        let regions = marker.mark(&method);
        assert_eq!(regions.len(), 2);
        assert!(regions.iter().all(|r| insns.node(r.start).is_return()));

        assert!(matches!(
            BytecodeMarker::from_mnemonics("frobnicate"),
            Err(Error::InvalidMarker(_))
        ));
        assert!(matches!(
            BytecodeMarker::new(vec![]),
            Err(Error::InvalidMarker(_))
        ));
    }

    #[test]
    fn strict_bytecode_marker_weaves_after_jumps() {
        let method = branching_method();
        let insns = &method.instructions;
        let jump = insns.get(1).unwrap();

        let strict = StrictBytecodeMarker::from_mnemonics("IFEQ").unwrap();
        assert!(strict.is_bytecode_marker());
        let regions = strict.mark(&method);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].start, jump);
        let weaving = regions[0].weaving_region.as_ref().unwrap();
        assert_eq!(weaving.ends, Some(vec![jump]));
        assert_eq!(weaving.after_throw_end, jump);

        // The lenient marker leaves the ends to be moved in front of the jump
        let lenient = BytecodeMarker::from_mnemonics("ifeq").unwrap().mark(&method);
        assert_eq!(lenient[0].start, jump);
        assert_eq!(lenient[0].weaving_region.as_ref().unwrap().ends, None);

        assert!(matches!(
            StrictBytecodeMarker::from_mnemonics("ifeq, jump"),
            Err(Error::InvalidMarker(_))
        ));
        assert!(matches!(
            StrictBytecodeMarker::from_mnemonics(" , "),
            Err(Error::InvalidMarker(_))
        ));
    }

    #[test]
    fn constructor_body_starts_after_super_call() {
        let method = parse_method(
            r#"
            class app/Point
            method <init> (I)V
              aload 0
              new app/Origin
              dup
              invokespecial app/Origin.<init> ()V
              invokespecial app/Base.<init> (Lapp/Origin;)V
              aload 0
              iload 1
              putfield app/Point.x I
              return
            "#,
        )
        .unwrap();
        let insns = &method.instructions;
        let regions = AfterInitBodyMarker.mark(&method);
        assert_eq!(regions.len(), 1);
        assert_eq!(insns.index_of(regions[0].start), Some(5));
        assert_eq!(regions[0].ends, vec![insns.get(8).unwrap()]);
        let weaving = regions[0].weaving_region.as_ref().unwrap();
        assert_eq!(weaving.after_throw_start, regions[0].start);
        assert_eq!(weaving.after_throw_end, insns.last().unwrap());

        let object = parse_method(
            r#"
            class java/lang/Object
            method <init> ()V
              return
            "#,
        )
        .unwrap();
        let regions = AfterInitBodyMarker.mark(&object);
        assert_eq!(regions[0].start, object.instructions.first().unwrap());

        // Other methods behave like the plain body marker
        let method = branching_method();
        let after_init = AfterInitBodyMarker.mark(&method);
        let body = BodyMarker.mark(&method);
        assert_eq!(after_init[0].start, body[0].start);
        assert_eq!(after_init[0].ends, body[0].ends);
    }

    #[test]
    fn try_clauses_and_handlers() {
        let method = parse_method(
            r#"
            method static f ()V
            START:
              invokestatic A.g ()V
              invokestatic A.h ()V
            END:
              goto DONE
            HANDLER:
              pop
              goto DONE
            DONE:
              return
              try START END HANDLER *
            "#,
        )
        .unwrap();
        let insns = &method.instructions;

        let tries = TryClauseMarker.mark(&method);
        assert_eq!(tries.len(), 1);
        assert_eq!(insns.node(tries[0].start).mnemonic(), "invokestatic");
        assert_eq!(tries[0].ends, vec![insns.get(2).unwrap()]);

        let handlers = ExceptionHandlerMarker.mark(&method);
        assert_eq!(handlers.len(), 1);
        assert_eq!(insns.node(handlers[0].start).mnemonic(), "pop");
        assert_eq!(handlers[0].ends.len(), 1);
        assert_eq!(insns.node(handlers[0].ends[0]).mnemonic(), "goto");
    }

    #[test]
    fn new_objects_skip_super_calls() {
        let method = parse_method(
            r#"
            method <init> ()V
              aload 0
              invokespecial java/lang/Object.<init> ()V
              new java/lang/Object
              dup
              invokespecial java/lang/Object.<init> ()V
              pop
              return
            "#,
        )
        .unwrap();
        let insns = &method.instructions;
        let regions = NewObjMarker.mark(&method);
        assert_eq!(regions.len(), 1);
        assert_eq!(insns.index_of(regions[0].start), Some(4));
    }

    #[test]
    fn predicate_marker() {
        let method = branching_method();
        let marker = InsnMarker::new(|node: &Node| node.mnemonic() == "iconst_1");
        let regions = marker.mark(&method);
        assert_eq!(regions.len(), 1);
    }
}
