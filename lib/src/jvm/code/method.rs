use super::{InsnId, InsnList, Node, NodeMap};
use crate::jvm::{
    Error, FieldAccessFlags, FieldType, MethodAccessFlags, MethodDescriptor, RenderDescriptor,
};
use crate::util::Width;

/// Entry of a method's exception table
///
/// The protected range is `start..end` (end exclusive). All three nodes are labels of the
/// instruction list owning the method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TryCatchBlock {
    pub start: InsnId,
    pub end: InsnId,
    pub handler: InsnId,

    /// Internal name of the caught class (`None` catches everything)
    pub exception: Option<String>,
}

impl TryCatchBlock {
    pub fn new(start: InsnId, end: InsnId, handler: InsnId, exception: Option<String>) -> Self {
        TryCatchBlock {
            start,
            end,
            handler,
            exception,
        }
    }

    /// Follow the labels through a splice
    pub fn remap(&self, map: &NodeMap) -> TryCatchBlock {
        let lookup = |lbl: InsnId| map.get(&lbl).copied().unwrap_or(lbl);
        TryCatchBlock {
            start: lookup(self.start),
            end: lookup(self.end),
            handler: lookup(self.handler),
            exception: self.exception.clone(),
        }
    }
}

/// Method along with its (mutable) code
#[derive(Clone, Debug)]
pub struct MethodCode {
    /// Internal name of the declaring class
    pub owner: String,
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub access_flags: MethodAccessFlags,
    pub instructions: InsnList,
    pub try_catch_blocks: Vec<TryCatchBlock>,
    pub max_locals: usize,
    pub max_stack: usize,
}

impl MethodCode {
    /// Method with an empty body, with enough locals for its parameters
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: MethodDescriptor,
        access_flags: MethodAccessFlags,
    ) -> MethodCode {
        let has_this = !access_flags.contains(MethodAccessFlags::STATIC);
        let max_locals = descriptor.parameter_length(has_this);
        MethodCode {
            owner: owner.into(),
            name: name.into(),
            descriptor,
            access_flags,
            instructions: InsnList::new(),
            try_catch_blocks: vec![],
            max_locals,
            max_stack: 0,
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    /// Local slot holding the parameter with the given index on entry
    pub fn parameter_slot(&self, index: usize) -> usize {
        self.descriptor.parameter_slot(index, !self.is_static())
    }

    /// `Owner.name(descriptor)` as used in diagnostics
    pub fn display_name(&self) -> String {
        format!("{}.{}{}", self.owner, self.name, self.descriptor.render())
    }

    /// Upper bound on the bytecode size of the method
    pub fn code_size(&self) -> usize {
        self.instructions
            .iter()
            .map(|id| match self.instructions.node(id) {
                Node::Insn(insn) => insn.width(),
                Node::Branch(branch) => branch.width(),
                Node::Label | Node::Line(_) => 0,
            })
            .sum()
    }

    /// Check that every jump target and exception table label is a label in the code
    pub fn validate_labels(&self) -> Result<(), Error> {
        let insns = &self.instructions;
        let check = |lbl: InsnId, what: &str| -> Result<(), Error> {
            if insns.contains(lbl) && insns.node(lbl).is_label() {
                Ok(())
            } else {
                Err(Error::DanglingLabel(format!(
                    "{} in {} refers to {:?}",
                    what,
                    self.display_name(),
                    lbl
                )))
            }
        };

        for id in insns {
            if let Some(branch) = insns.branch(id) {
                for target in branch.jump_targets() {
                    check(target, branch.mnemonic())?;
                }
            }
        }
        for tcb in &self.try_catch_blocks {
            check(tcb.start, "exception table start")?;
            check(tcb.end, "exception table end")?;
            check(tcb.handler, "exception handler")?;
        }
        Ok(())
    }
}

/// Field declared by a class
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDecl {
    pub access_flags: FieldAccessFlags,
    pub name: String,
    pub descriptor: FieldType,
}

/// Methods and fields of a class, as far as instrumentation is concerned
#[derive(Clone, Debug)]
pub struct ClassCode {
    /// Internal name of the class
    pub name: String,
    pub methods: Vec<MethodCode>,
    pub fields: Vec<FieldDecl>,
}
