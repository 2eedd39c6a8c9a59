//! Values snippets can read about the place they are woven at
//!
//! A static context is a class whose no-argument methods describe a shadow: the name of the
//! instrumented method, the index of the basic block, the opcode of the marked instruction, etc.
//! Snippets call these methods, and the weaver replaces each call with a constant load. Values
//! are computed once per shadow, ahead of weaving, into a [`StaticContextValues`] cache.

use super::Error;
use crate::cfg::{block_starts, ControlFlowGraph};
use crate::jvm::code::{Literal, MethodCode};
use crate::jvm::{Instruction, MethodAccessFlags, RenderDescriptor};
use crate::shadow::Shadow;
use elsa::sync::FrozenMap;
use std::collections::BTreeMap;
use std::fmt;

pub const METHOD_STATIC_CONTEXT: &str = "ch/usi/dag/disl/staticcontext/MethodStaticContext";
pub const BASIC_BLOCK_STATIC_CONTEXT: &str =
    "ch/usi/dag/disl/staticcontext/BasicBlockStaticContext";
pub const LOOP_STATIC_CONTEXT: &str = "ch/usi/dag/disl/staticcontext/LoopStaticContext";
pub const BYTECODE_STATIC_CONTEXT: &str = "ch/usi/dag/disl/staticcontext/BytecodeStaticContext";
pub const INVOCATION_STATIC_CONTEXT: &str =
    "ch/usi/dag/disl/staticcontext/MethodInvocationStaticContext";
pub const FIELD_ACCESS_STATIC_CONTEXT: &str =
    "ch/usi/dag/disl/staticcontext/FieldAccessStaticContext";

/// Method of a static context class, called from a snippet
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StaticContextMethod {
    /// Internal name of the static context class
    pub owner: String,
    pub name: String,
}

impl StaticContextMethod {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> StaticContextMethod {
        StaticContextMethod {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// `Owner.name`
    pub fn id(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }
}

impl fmt::Display for StaticContextMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

/// What a static context gets to look at
#[derive(Copy, Clone, Debug)]
pub struct ShadowContext<'a> {
    pub method: &'a MethodCode,
    pub shadow: &'a Shadow,
}

pub trait StaticContext: Send + Sync {
    /// Internal name of the class snippets call
    fn class_name(&self) -> &str;

    /// Whether the context has a method with this name
    fn provides(&self, name: &str) -> bool;

    /// Value of a method at a shadow
    ///
    /// `Ok(None)` is a `null` (only possible for `String` methods).
    fn evaluate(&self, name: &str, context: &ShadowContext) -> Result<Option<Literal>, Error>;
}

fn no_such_method(owner: &str, name: &str) -> Error {
    Error::Fatal(format!("static context {} has no method {}", owner, name))
}

fn string(value: impl Into<String>) -> Option<Literal> {
    Some(Literal::String(value.into()))
}

fn boolean(value: bool) -> Option<Literal> {
    Some(Literal::Boolean(value))
}

/// Internal name to a Java class name (`java/lang/String` to `java.lang.String`)
fn class_name(internal_name: &str) -> String {
    internal_name.replace('/', ".")
}

/// Information about the instrumented method
#[derive(Copy, Clone, Debug, Default)]
pub struct MethodStaticContext;

impl MethodStaticContext {
    const METHODS: &'static [&'static str] = &[
        "thisClassName",
        "thisClassSimpleName",
        "thisClassCanonicalName",
        "thisMethodName",
        "thisMethodFullName",
        "thisMethodDescriptor",
        "isMethodConstructor",
        "isMethodInitializer",
        "isMethodBridge",
        "isMethodFinal",
        "isMethodPrivate",
        "isMethodProtected",
        "isMethodPublic",
        "isMethodStatic",
        "isMethodSynchronized",
        "isMethodVarArgs",
    ];
}

impl StaticContext for MethodStaticContext {
    fn class_name(&self) -> &str {
        METHOD_STATIC_CONTEXT
    }

    fn provides(&self, name: &str) -> bool {
        MethodStaticContext::METHODS.contains(&name)
    }

    fn evaluate(&self, name: &str, context: &ShadowContext) -> Result<Option<Literal>, Error> {
        let method = context.method;
        let flag = |flag: MethodAccessFlags| boolean(method.access_flags.contains(flag));
        let value = match name {
            "thisClassName" => string(&method.owner),
            "thisClassSimpleName" => {
                let simple = method.owner.rsplit('/').next().unwrap_or(&method.owner);
                string(simple.rsplit('$').next().unwrap_or(simple))
            }
            "thisClassCanonicalName" => string(class_name(&method.owner).replace('$', ".")),
            "thisMethodName" => string(&method.name),
            "thisMethodFullName" => string(format!("{}.{}", method.owner, method.name)),
            "thisMethodDescriptor" => string(method.descriptor.render()),
            "isMethodConstructor" => boolean(method.name == "<init>"),
            "isMethodInitializer" => boolean(method.name == "<clinit>"),
            "isMethodBridge" => flag(MethodAccessFlags::BRIDGE),
            "isMethodFinal" => flag(MethodAccessFlags::FINAL),
            "isMethodPrivate" => flag(MethodAccessFlags::PRIVATE),
            "isMethodProtected" => flag(MethodAccessFlags::PROTECTED),
            "isMethodPublic" => flag(MethodAccessFlags::PUBLIC),
            "isMethodStatic" => flag(MethodAccessFlags::STATIC),
            "isMethodSynchronized" => flag(MethodAccessFlags::SYNCHRONIZED),
            "isMethodVarArgs" => flag(MethodAccessFlags::VARARGS),
            other => return Err(no_such_method(METHOD_STATIC_CONTEXT, other)),
        };
        Ok(value)
    }
}

/// Position of the shadow among the basic blocks of the method
///
/// Meant for shadows marked by a basic block marker: the region start is the first instruction
/// of a block.
#[derive(Copy, Clone, Debug, Default)]
pub struct BasicBlockStaticContext;

impl StaticContext for BasicBlockStaticContext {
    fn class_name(&self) -> &str {
        BASIC_BLOCK_STATIC_CONTEXT
    }

    fn provides(&self, name: &str) -> bool {
        matches!(name, "getTotBBs" | "getBBSize" | "getBBindex")
    }

    fn evaluate(&self, name: &str, context: &ShadowContext) -> Result<Option<Literal>, Error> {
        let insns = &context.method.instructions;
        let shadow = context.shadow;
        let value = match name {
            "getTotBBs" => {
                block_starts(insns, &context.method.try_catch_blocks, false).len() as i32
            }
            "getBBSize" => {
                // The start counts even when it is also an end
                let mut count = 1;
                let mut cursor = Some(shadow.region_start);
                while let Some(id) = cursor {
                    if shadow.region_ends.contains(&id) {
                        break;
                    }
                    if insns.node(id).is_real() {
                        count += 1;
                    }
                    cursor = insns.next(id);
                }
                count
            }
            "getBBindex" => {
                let starts = block_starts(insns, &context.method.try_catch_blocks, false);
                let start = insns.first_real_from(shadow.region_start);
                match starts.iter().position(|id| Some(*id) == start) {
                    Some(index) => index as i32,
                    None => -1,
                }
            }
            other => return Err(no_such_method(BASIC_BLOCK_STATIC_CONTEXT, other)),
        };
        Ok(Some(Literal::Int(value)))
    }
}

/// Basic block information, plus whether the block is the head of a loop
#[derive(Copy, Clone, Debug, Default)]
pub struct LoopStaticContext;

impl StaticContext for LoopStaticContext {
    fn class_name(&self) -> &str {
        LOOP_STATIC_CONTEXT
    }

    fn provides(&self, name: &str) -> bool {
        name == "isFirstOfLoop" || BasicBlockStaticContext.provides(name)
    }

    fn evaluate(&self, name: &str, context: &ShadowContext) -> Result<Option<Literal>, Error> {
        match name {
            "isFirstOfLoop" => {
                let method = context.method;
                let insns = &method.instructions;
                let cfg = ControlFlowGraph::build(insns, &method.try_catch_blocks);
                let first_of_loop = match cfg.block_of(insns, context.shadow.region_start) {
                    Some(index) => {
                        let dominators = cfg.dominators(insns, &method.try_catch_blocks);
                        cfg.is_loop_header(&dominators, index)
                    }
                    None => false,
                };
                Ok(boolean(first_of_loop))
            }
            other if BasicBlockStaticContext.provides(other) => {
                BasicBlockStaticContext.evaluate(other, context)
            }
            other => Err(no_such_method(LOOP_STATIC_CONTEXT, other)),
        }
    }
}

/// Opcode of the marked instruction
#[derive(Copy, Clone, Debug, Default)]
pub struct BytecodeStaticContext;

impl StaticContext for BytecodeStaticContext {
    fn class_name(&self) -> &str {
        BYTECODE_STATIC_CONTEXT
    }

    fn provides(&self, name: &str) -> bool {
        name == "getBytecodeNumber"
    }

    fn evaluate(&self, name: &str, context: &ShadowContext) -> Result<Option<Literal>, Error> {
        if name != "getBytecodeNumber" {
            return Err(no_such_method(BYTECODE_STATIC_CONTEXT, name));
        }
        let node = context.method.instructions.node(context.shadow.region_start);
        Ok(Some(Literal::Int(node.opcode().map_or(-1, i32::from))))
    }
}

/// Method invoked by the marked instruction
#[derive(Copy, Clone, Debug, Default)]
pub struct MethodInvocationStaticContext;

impl StaticContext for MethodInvocationStaticContext {
    fn class_name(&self) -> &str {
        INVOCATION_STATIC_CONTEXT
    }

    fn provides(&self, name: &str) -> bool {
        matches!(
            name,
            "isValid"
                | "invocationTarget"
                | "getName"
                | "getDescriptor"
                | "getReturnTypeDescriptor"
                | "getOwnerInternalName"
        )
    }

    fn evaluate(&self, name: &str, context: &ShadowContext) -> Result<Option<Literal>, Error> {
        let insns = &context.method.instructions;
        let callee = match insns.insn(context.shadow.region_start) {
            Some(Instruction::Invoke(_, callee)) => Some(callee),
            _ => None,
        };
        if name == "isValid" {
            return Ok(boolean(callee.is_some()));
        }
        let callee = callee.ok_or_else(|| {
            Error::Fatal(format!(
                "{}.{} used on a region not starting with an invocation",
                INVOCATION_STATIC_CONTEXT, name
            ))
        })?;
        let value = match name {
            "invocationTarget" => string(format!(
                "{}.{}{}",
                callee.owner,
                callee.name,
                callee.descriptor.render()
            )),
            "getName" => string(&callee.name),
            "getDescriptor" => string(callee.descriptor.render()),
            "getReturnTypeDescriptor" => match &callee.descriptor.return_type {
                Some(return_type) => string(return_type.render()),
                None => string("V"),
            },
            "getOwnerInternalName" => string(&callee.owner),
            other => return Err(no_such_method(INVOCATION_STATIC_CONTEXT, other)),
        };
        Ok(value)
    }
}

/// Field accessed by the marked instruction
#[derive(Copy, Clone, Debug, Default)]
pub struct FieldAccessStaticContext;

impl StaticContext for FieldAccessStaticContext {
    fn class_name(&self) -> &str {
        FIELD_ACCESS_STATIC_CONTEXT
    }

    fn provides(&self, name: &str) -> bool {
        matches!(
            name,
            "isValid" | "getName" | "getDescriptor" | "getOwnerClassName" | "getOwnerInternalName"
        )
    }

    fn evaluate(&self, name: &str, context: &ShadowContext) -> Result<Option<Literal>, Error> {
        let field = match context.method.instructions.insn(context.shadow.region_start) {
            Some(
                Instruction::GetField(field)
                | Instruction::PutField(field)
                | Instruction::GetStatic(field)
                | Instruction::PutStatic(field),
            ) => Some(field),
            _ => None,
        };
        if name == "isValid" {
            return Ok(boolean(field.is_some()));
        }
        let field = field.ok_or_else(|| {
            Error::Fatal(format!(
                "{}.{} used on a region not starting with a field access",
                FIELD_ACCESS_STATIC_CONTEXT, name
            ))
        })?;
        let value = match name {
            "getName" => string(&field.name),
            "getDescriptor" => string(field.descriptor.render()),
            "getOwnerClassName" => string(class_name(&field.owner)),
            "getOwnerInternalName" => string(&field.owner),
            other => return Err(no_such_method(FIELD_ACCESS_STATIC_CONTEXT, other)),
        };
        Ok(value)
    }
}

/// Static contexts known to the weaver, by class name
pub struct StaticContexts {
    contexts: BTreeMap<String, Box<dyn StaticContext>>,
}

impl StaticContexts {
    pub fn new() -> StaticContexts {
        StaticContexts {
            contexts: BTreeMap::new(),
        }
    }

    /// Every context this crate provides
    pub fn standard() -> StaticContexts {
        let mut contexts = StaticContexts::new();
        contexts.register(Box::new(MethodStaticContext));
        contexts.register(Box::new(BasicBlockStaticContext));
        contexts.register(Box::new(LoopStaticContext));
        contexts.register(Box::new(BytecodeStaticContext));
        contexts.register(Box::new(MethodInvocationStaticContext));
        contexts.register(Box::new(FieldAccessStaticContext));
        contexts
    }

    /// Add a context (replacing any other context with the same class name)
    pub fn register(&mut self, context: Box<dyn StaticContext>) {
        self.contexts
            .insert(context.class_name().to_string(), context);
    }

    pub fn get(&self, owner: &str) -> Option<&dyn StaticContext> {
        self.contexts.get(owner).map(|context| context.as_ref())
    }

    pub fn is_static_context(&self, owner: &str) -> bool {
        self.contexts.contains_key(owner)
    }

    /// Evaluate a method at a shadow
    pub fn evaluate(
        &self,
        method: &StaticContextMethod,
        context: &ShadowContext,
    ) -> Result<Option<Literal>, Error> {
        match self.get(&method.owner) {
            Some(static_context) => static_context.evaluate(&method.name, context),
            None => Err(Error::Fatal(format!(
                "no static context registered for {}",
                method.owner
            ))),
        }
    }
}

impl Default for StaticContexts {
    fn default() -> StaticContexts {
        StaticContexts::standard()
    }
}

impl fmt::Debug for StaticContexts {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.contexts.keys()).finish()
    }
}

/// Static context values of every shadow of a method
///
/// Values are computed on first use and then published. If two threads race to compute the same
/// value, the first one to publish wins and both see its value.
pub struct StaticContextValues<K> {
    values: FrozenMap<(K, StaticContextMethod), Box<Option<Literal>>>,
}

impl<K: Clone + Eq + std::hash::Hash> StaticContextValues<K> {
    pub fn new() -> StaticContextValues<K> {
        StaticContextValues {
            values: FrozenMap::new(),
        }
    }

    /// Value if already computed
    pub fn get(&self, key: &K, method: &StaticContextMethod) -> Option<&Option<Literal>> {
        self.values.get(&(key.clone(), method.clone()))
    }

    /// Value, computing and publishing it if needed
    pub fn get_or_compute(
        &self,
        key: &K,
        method: &StaticContextMethod,
        compute: impl FnOnce() -> Result<Option<Literal>, Error>,
    ) -> Result<&Option<Literal>, Error> {
        if let Some(value) = self.get(key, method) {
            return Ok(value);
        }
        let value = compute()?;
        Ok(self
            .values
            .insert((key.clone(), method.clone()), Box::new(value)))
    }
}

impl<K: Clone + Eq + std::hash::Hash> Default for StaticContextValues<K> {
    fn default() -> StaticContextValues<K> {
        StaticContextValues::new()
    }
}
