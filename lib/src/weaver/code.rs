use super::info::{dup_stack, slot_u16, ShadowKey, WeavingInfo};
use super::processors::{ProcessorInstance, ProcessorInstances, ProcessorMethodInstance};
use super::static_context::{StaticContextMethod, StaticContextValues};
use super::{Error, PartialEvaluationLevel};
use crate::jvm::analysis::BasicValue;
use crate::jvm::code::{
    box_value, boxed_type, const_int, default_value, enum_constant_operand, get_field,
    get_static, int_constant_operand, load_literal, load_var, store_var, string_constant_operand,
    type_constant_operand, unboxed_type, InsnId, InsnList, MethodCode, Node, TryCatchBlock,
};
use crate::jvm::{
    BranchInstruction, Constant, FieldType, Instruction, InvokeType, MethodRef, ParseDescriptor,
    RefType, RenderDescriptor,
};
use crate::pe::{max_locals, PartialEvaluator, PureMethodRegistry};
use crate::shadow::Shadow;
use crate::snippet::context::{
    ArgumentContextCall, ArgumentProcessorContextCall, ArgumentProcessorMode, ContextCall,
    DynamicContextCall, ARGUMENT_PROCESSOR_MODE,
};
use crate::snippet::{Code, Snippet};
use crate::util::Width;
use log::warn;
use std::collections::HashSet;

/// What every snippet woven into one method shares
pub struct WeavingEnv<'w> {
    pub info: &'w WeavingInfo,
    pub static_values: &'w StaticContextValues<ShadowKey>,
    pub processors: &'w ProcessorInstances<'w>,
    pub partial_evaluation: PartialEvaluationLevel,
    pub registry: &'w PureMethodRegistry,
}

/// Code spliced into the snippet
#[derive(Default)]
struct Fragment {
    instructions: InsnList,
    try_catch_blocks: Vec<TryCatchBlock>,

    /// Instructions accessing locals of the method, which must not be shifted
    fixed: HashSet<InsnId>,
}

/// Copy of a snippet specialized for one weaving location
///
/// Locals of the snippet end up after the locals of the method: the code is written with the
/// snippet numbering, then shifted by the number of locals the method has when it gets woven.
/// Instructions that access the locals of the method itself are kept in `fixed`.
pub struct WeavingCode<'w> {
    env: &'w WeavingEnv<'w>,
    snippet: &'w Snippet,
    key: ShadowKey,
    shadow: &'w Shadow,
    loc: InsnId,
    code: Code,

    /// Locals used by the snippet code, in snippet numbering
    max_locals: usize,
    fixed: HashSet<InsnId>,
}

impl<'w> WeavingCode<'w> {
    pub fn new(
        env: &'w WeavingEnv<'w>,
        snippet: &'w Snippet,
        key: ShadowKey,
        shadow: &'w Shadow,
        loc: InsnId,
    ) -> WeavingCode<'w> {
        let code = snippet.code.code.clone();
        let max_locals = max_locals(&code.instructions, &code.descriptor, true);
        WeavingCode {
            env,
            snippet,
            key,
            shadow,
            loc,
            code,
            max_locals,
            fixed: HashSet::new(),
        }
    }

    /// Resolve everything the code asks of its context
    ///
    /// Locals needed along the way are allocated in `method` (its `max_locals` grows). When
    /// `throwing`, the code is meant to run as an exception handler: it saves the exception on
    /// entry and rethrows it at the end.
    pub fn transform(&mut self, method: &mut MethodCode, throwing: bool) -> Result<(), Error> {
        self.rewrite_processor_applications(method)?;
        self.rewrite_processor_context_calls(method)?;
        self.rewrite_static_context_calls()?;
        self.rewrite_class_context_calls()?;
        self.fix_local_index(method)?;

        // Folding happens before dynamic context values get materialized, so that code the
        // evaluator drops never forces copies of stack values
        self.optimize(method)?;
        self.rewrite_dynamic_context_calls(method, throwing)
    }

    pub fn into_parts(self) -> (InsnList, Vec<TryCatchBlock>) {
        (self.code.instructions, self.code.try_catch_blocks)
    }

    fn invalid(&self, id: InsnId, message: String) -> Error {
        Error::InvalidContextUsage {
            location: self.code.location(id),
            message,
        }
    }

    fn literal_error(
        &self,
        call: InsnId,
        argument: &str,
        interface: &str,
        method: &str,
        kind: &str,
    ) -> Error {
        self.invalid(
            call,
            format!(
                "the '{}' argument of {}.{}() MUST be a {} literal",
                argument, interface, method, kind
            ),
        )
    }

    /// The `count` real instructions right before `call`, in code order
    fn operands(&self, call: InsnId, count: usize) -> Result<Vec<InsnId>, Error> {
        let insns = &self.code.instructions;
        let mut operands = Vec::with_capacity(count);
        let mut cursor = call;
        for _ in 0..count {
            cursor = insns.prev_real(cursor).ok_or_else(|| {
                self.invalid(call, String::from("context call is missing its arguments"))
            })?;
            operands.push(cursor);
        }
        operands.reverse();
        Ok(operands)
    }

    fn context_calls(
        &self,
        select: impl Fn(ContextCall) -> bool,
    ) -> Result<Vec<(InsnId, ContextCall)>, Error> {
        let insns = &self.code.instructions;
        let mut calls = vec![];
        for id in insns {
            match insns.insn(id).map(ContextCall::of) {
                Some(Ok(Some(call))) if select(call) => calls.push((id, call)),
                Some(Err(message)) => return Err(self.invalid(id, message)),
                _ => (),
            }
        }
        Ok(calls)
    }

    /// Splice the processor code in place of every `ArgumentProcessorContext.apply`
    fn rewrite_processor_applications(&mut self, method: &mut MethodCode) -> Result<(), Error> {
        let env = self.env;
        let applications: Vec<InsnId> = self
            .snippet
            .code
            .processor_applications
            .keys()
            .copied()
            .collect();
        for apply in applications {
            if let Some(instance) = env.processors.get(self.key, apply) {
                let fragment = self.processor_code(method, instance)?;
                self.splice_after(apply, fragment);
            }

            let operands = self.operands(apply, 3)?;
            let insns = &mut self.code.instructions;
            remove_expected(insns, operands[2], "getstatic")?;
            remove_expected(insns, operands[1], "ldc")?;
            remove_expected(insns, operands[0], "aload")?;
            insns.remove(apply);
        }
        Ok(())
    }

    fn splice_after(&mut self, loc: InsnId, fragment: Fragment) {
        let map = self.code.instructions.splice_after(loc, fragment.instructions);
        self.fixed
            .extend(fragment.fixed.iter().filter_map(|id| map.get(id).copied()));
        self.code
            .try_catch_blocks
            .extend(fragment.try_catch_blocks.iter().map(|tcb| tcb.remap(&map)));
    }

    /// Code of all the processor methods applied, one after the other
    fn processor_code(
        &mut self,
        method: &mut MethodCode,
        instance: &ProcessorInstance,
    ) -> Result<Fragment, Error> {
        let mut fragment = Fragment::default();
        for applied in &instance.methods {
            let mut code = applied.code.instructions.clone();
            rewrite_argument_context_calls(applied, &mut code)?;
            let arg_type = applied.kind.primary_type();

            let mut fixed = None;
            match instance.mode {
                ArgumentProcessorMode::MethodArgs => {
                    // The processor receives the argument in its first local
                    code.push_front(Node::Insn(store_var(&arg_type, 0)));
                    shift_locals(&mut code, self.max_locals, &HashSet::new())?;
                    let slot = slot_u16(method.parameter_slot(applied.position))?;
                    fixed = Some(code.push_front(Node::Insn(load_var(&arg_type, slot))));
                    self.max_locals = required_locals(
                        &code,
                        self.max_locals + arg_type.width(),
                        &fixed.into_iter().collect::<HashSet<_>>(),
                    );
                }
                ArgumentProcessorMode::CallSiteArgs => {
                    // The argument is copied (where it gets pushed) straight into the first
                    // local of the processor
                    let frame = self.env.info.source_frame(self.loc).ok_or_else(|| {
                        Error::Fatal(format!(
                            "no frame at the call site processed in {}",
                            method.display_name()
                        ))
                    })?;
                    let operand = applied.total_count - 1 - applied.position;
                    let slot = method.max_locals + self.max_locals;
                    let size = dup_stack(frame, method, operand, &arg_type, slot)?;
                    shift_locals(&mut code, self.max_locals, &HashSet::new())?;
                    self.max_locals =
                        required_locals(&code, self.max_locals + size, &HashSet::new());
                }
            }

            let map = fragment.instructions.splice_back(code);
            fragment
                .fixed
                .extend(fixed.and_then(|id| map.get(&id).copied()));
            fragment.try_catch_blocks.extend(
                applied
                    .code
                    .try_catch_blocks
                    .iter()
                    .map(|tcb| tcb.remap(&map)),
            );
        }
        Ok(fragment)
    }

    /// `ArgumentProcessorContext.getArgs` and `getReceiver`
    fn rewrite_processor_context_calls(&mut self, method: &mut MethodCode) -> Result<(), Error> {
        let calls = self.context_calls(|call| {
            matches!(
                call,
                ContextCall::ArgumentProcessor(
                    ArgumentProcessorContextCall::Args | ArgumentProcessorContextCall::Receiver
                )
            )
        })?;

        for (id, call) in calls {
            let is_args =
                call == ContextCall::ArgumentProcessor(ArgumentProcessorContextCall::Args);
            let name = if is_args { "getArgs" } else { "getReceiver" };
            let operands = self.operands(id, 2)?;
            let mode = self
                .code
                .instructions
                .insn(operands[1])
                .and_then(|insn| enum_constant_operand(insn, ARGUMENT_PROCESSOR_MODE))
                .and_then(ArgumentProcessorMode::from_constant)
                .ok_or_else(|| {
                    let interface = "ArgumentProcessorContext";
                    self.literal_error(id, "mode", interface, name, "ArgumentProcessorMode")
                })?;

            let fragment = if is_args {
                self.args_code(method, mode)?
            } else {
                self.receiver_code(method, mode)?
            };
            self.splice_after(id, fragment);

            let insns = &mut self.code.instructions;
            remove_expected(insns, operands[1], "getstatic")?;
            remove_expected(insns, operands[0], "aload")?;
            insns.remove(id);
        }
        Ok(())
    }

    /// Invocation at the start of the shadow
    fn callee(&self, method: &MethodCode) -> Result<(InsnId, InvokeType, MethodRef), Error> {
        let insns = &method.instructions;
        let callee = insns.first_real_from(self.shadow.region_start);
        match callee.and_then(|id| insns.insn(id).map(|insn| (id, insn))) {
            Some((id, Instruction::Invoke(typ, callee))) => Ok((id, *typ, callee.clone())),
            _ => Err(Error::Fatal(format!(
                "call site arguments requested in {} where no method is invoked",
                method.display_name()
            ))),
        }
    }

    /// `Object[]` of the arguments
    fn args_code(
        &mut self,
        method: &mut MethodCode,
        mode: ArgumentProcessorMode,
    ) -> Result<Fragment, Error> {
        let mut fragment = Fragment::default();
        match mode {
            ArgumentProcessorMode::MethodArgs => {
                let parameters = method.descriptor.parameters.clone();
                let mut slot = if method.is_static() { 0 } else { 1 };
                let code = &mut fragment.instructions;
                push_array_header(code, parameters.len());
                for (index, parameter) in parameters.iter().enumerate() {
                    code.push_insn(Instruction::Dup);
                    code.push_insn(const_int(index as i32));
                    let load = code.push_insn(load_var(parameter, slot_u16(slot)?));
                    fragment.fixed.insert(load);
                    push_box(code, parameter);
                    code.push_insn(Instruction::AAStore);
                    slot += parameter.width();
                }
            }
            ArgumentProcessorMode::CallSiteArgs => {
                let (callee_id, _, callee) = self.callee(method)?;
                let frame = self.env.info.source_frame(callee_id).ok_or_else(|| {
                    Error::Fatal(format!(
                        "no frame at the call site processed in {}",
                        method.display_name()
                    ))
                })?;
                let parameters = &callee.descriptor.parameters;
                let first_slot = method.max_locals + self.max_locals;
                let mut arg_slot = 0;
                let code = &mut fragment.instructions;
                push_array_header(code, parameters.len());
                for (index, parameter) in parameters.iter().enumerate() {
                    let operand = parameters.len() - 1 - index;
                    dup_stack(frame, method, operand, parameter, first_slot + arg_slot)?;
                    code.push_insn(Instruction::Dup);
                    code.push_insn(const_int(index as i32));
                    code.push_insn(load_var(parameter, slot_u16(self.max_locals + arg_slot)?));
                    push_box(code, parameter);
                    code.push_insn(Instruction::AAStore);
                    arg_slot += parameter.width();
                }
                self.max_locals += arg_slot;
            }
        }
        Ok(fragment)
    }

    /// The receiver (`null` for static methods)
    fn receiver_code(
        &mut self,
        method: &mut MethodCode,
        mode: ArgumentProcessorMode,
    ) -> Result<Fragment, Error> {
        let mut fragment = Fragment::default();
        match mode {
            ArgumentProcessorMode::MethodArgs => {
                if method.is_static() {
                    fragment.instructions.push_insn(Instruction::AConstNull);
                } else {
                    let load = fragment.instructions.push_insn(Instruction::ALoad(0));
                    fragment.fixed.insert(load);
                }
            }
            ArgumentProcessorMode::CallSiteArgs => {
                let (callee_id, typ, callee) = self.callee(method)?;
                if typ == InvokeType::Static {
                    fragment.instructions.push_insn(Instruction::AConstNull);
                } else {
                    let frame = self.env.info.source_frame(callee_id).ok_or_else(|| {
                        Error::Fatal(format!(
                            "no frame at the call site processed in {}",
                            method.display_name()
                        ))
                    })?;
                    let operand = callee.descriptor.parameters.len();
                    let slot = method.max_locals + self.max_locals;
                    dup_stack(frame, method, operand, &FieldType::java_object(), slot)?;
                    fragment
                        .instructions
                        .push_insn(Instruction::ALoad(slot_u16(self.max_locals)?));
                    self.max_locals += 1;
                }
            }
        }
        Ok(fragment)
    }

    /// Replace static context calls by the values computed for the shadow
    fn rewrite_static_context_calls(&mut self) -> Result<(), Error> {
        let insns = &mut self.code.instructions;
        let calls: Vec<(InsnId, StaticContextMethod)> = insns
            .iter()
            .filter_map(|id| match insns.insn(id) {
                Some(Instruction::Invoke(InvokeType::Virtual, method)) => {
                    Some((id, StaticContextMethod::new(&method.owner, &method.name)))
                }
                _ => None,
            })
            .collect();

        for (id, context_method) in calls {
            let value = match self.env.static_values.get(&self.key, &context_method) {
                Some(value) => value,
                None => continue,
            };
            let load = match value {
                Some(literal) => load_literal(literal),
                None => Instruction::AConstNull,
            };
            insns.insert_after(id, Node::Insn(load));
            let context = insns
                .prev_real(id)
                .ok_or_else(|| {
                    Error::Fatal(String::from("static context call without a context"))
                })?;
            remove_expected(insns, context, "aload")?;
            insns.remove(id);
        }
        Ok(())
    }

    /// `ClassContext.asClass(name)` becomes a class literal
    fn rewrite_class_context_calls(&mut self) -> Result<(), Error> {
        for (id, _) in self.context_calls(|call| call == ContextCall::AsClass)? {
            let operands = self.operands(id, 2)?;
            let name = self
                .code
                .instructions
                .insn(operands[1])
                .and_then(string_constant_operand)
                .map(|name| name.replace('.', "/"))
                .ok_or_else(|| {
                    self.literal_error(id, "name", "ClassContext", "asClass", "String")
                })?;

            let insns = &mut self.code.instructions;
            let class = Constant::Class(RefType::object(name));
            insns.insert_after(id, Node::Insn(Instruction::Ldc(class)));
            remove_expected(insns, operands[1], "ldc")?;
            remove_expected(insns, operands[0], "aload")?;
            insns.remove(id);
        }
        Ok(())
    }

    /// Move the locals of the snippet past the ones of the method
    fn fix_local_index(&mut self, method: &mut MethodCode) -> Result<(), Error> {
        let base = method.max_locals;
        shift_locals(&mut self.code.instructions, base, &self.fixed)?;
        let required =
            required_locals(&self.code.instructions, base + self.max_locals, &self.fixed);
        method.max_locals = method.max_locals.max(required);
        Ok(())
    }

    fn optimize(&mut self, method: &MethodCode) -> Result<(), Error> {
        let max_rounds = self.env.partial_evaluation.max_rounds();
        if max_rounds == Some(0) {
            return Ok(());
        }

        // The snippet is evaluated as if it were the body of the method
        let mut scratch = MethodCode::new(
            method.owner.clone(),
            method.name.clone(),
            method.descriptor.clone(),
            method.access_flags,
        );
        scratch.instructions = std::mem::take(&mut self.code.instructions);
        scratch.try_catch_blocks = std::mem::take(&mut self.code.try_catch_blocks);

        let evaluator = PartialEvaluator::new(self.env.registry);
        let mut rounds = 0;
        let result = loop {
            if max_rounds.map_or(false, |max| rounds >= max) {
                break Ok(());
            }
            rounds += 1;
            match evaluator.evaluate(&mut scratch) {
                Ok(true) => (),
                Ok(false) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        self.code.instructions = scratch.instructions;
        self.code.try_catch_blocks = scratch.try_catch_blocks;
        result.map_err(Error::from)
    }

    fn rewrite_dynamic_context_calls(
        &mut self,
        method: &mut MethodCode,
        throwing: bool,
    ) -> Result<(), Error> {
        let exception_slot = if throwing {
            let slot = method.max_locals;
            method.max_locals += 1;
            Some(slot_u16(slot)?)
        } else {
            None
        };

        for (id, call) in self.context_calls(|call| matches!(call, ContextCall::Dynamic(_)))? {
            let call = match call {
                ContextCall::Dynamic(call) => call,
                _ => continue,
            };
            let value = self.dynamic_value(method, id, call, exception_slot)?;

            let insns = &mut self.code.instructions;
            let mut cursor = id;
            for insn in value.instructions {
                cursor = insns.insert_after(cursor, Node::Insn(insn));
            }
            if let Some(value_type) = &value.value_type {
                if let FieldType::Base(base) = value_type {
                    cursor = insns.insert_after(cursor, Node::Insn(box_value(*base)));
                }
                remove_cast_to(insns, cursor, &boxed_ref_type(value_type));
            }

            remove_expected(insns, value.removed[0], "aload")?;
            for operand in &value.removed[1..] {
                insns.remove(*operand);
            }
            insns.remove(id);
        }

        remove_redundant_boxing(&mut self.code.instructions);

        if let Some(slot) = exception_slot {
            let insns = &mut self.code.instructions;
            insns.push_front(Node::Insn(Instruction::AStore(slot)));
            insns.push_insn(Instruction::ALoad(slot));
            insns.push_branch(BranchInstruction::AThrow);
        }
        Ok(())
    }

    fn dynamic_value(
        &self,
        method: &mut MethodCode,
        id: InsnId,
        call: DynamicContextCall,
        exception_slot: Option<u16>,
    ) -> Result<DynamicValue, Error> {
        let value = match call {
            DynamicContextCall::This => {
                let this = if method.is_static() {
                    Instruction::AConstNull
                } else {
                    Instruction::ALoad(0)
                };
                DynamicValue::new(vec![this], None, self.operands(id, 1)?)
            }
            DynamicContextCall::Exception => {
                let exception = match exception_slot {
                    Some(slot) => Instruction::ALoad(slot),
                    None => Instruction::AConstNull,
                };
                DynamicValue::new(vec![exception], None, self.operands(id, 1)?)
            }
            DynamicContextCall::StackValue => self.stack_value(method, id)?,
            DynamicContextCall::MethodArgumentValue => self.method_argument_value(method, id)?,
            DynamicContextCall::LocalVariableValue => self.local_variable_value(id)?,

            // The owner object is left in place: it has to be pushed by a single instruction
            DynamicContextCall::InstanceFieldByType => {
                let operands = self.operands(id, 5)?;
                let name = "getInstanceFieldValue";
                let owner = self.owner_literal(id, operands[2], "ownerType", name)?;
                let field_name = self.string_literal(id, operands[3], "fieldName", name)?;
                let field_type = self.class_literal(id, operands[4], "fieldType", name)?;
                let load = get_field(&owner, &field_name, field_type.clone());
                let removed = vec![operands[0], operands[2], operands[3], operands[4]];
                DynamicValue::new(vec![load], Some(field_type), removed)
            }
            DynamicContextCall::InstanceFieldByName => {
                let operands = self.operands(id, 6)?;
                let name = "getInstanceFieldValue";
                let owner = self.string_literal(id, operands[2], "ownerName", name)?;
                let field_name = self.string_literal(id, operands[3], "fieldName", name)?;
                let field_type = self.descriptor_literal(id, operands[4], "fieldDesc", name)?;
                self.class_literal(id, operands[5], "type", name)?;
                let load = get_field(&owner.replace('.', "/"), &field_name, field_type.clone());
                let removed = vec![operands[0], operands[2], operands[3], operands[4], operands[5]];
                DynamicValue::new(vec![load], Some(field_type), removed)
            }
            DynamicContextCall::StaticFieldByType => {
                let operands = self.operands(id, 4)?;
                let name = "getStaticFieldValue";
                let owner = self.owner_literal(id, operands[1], "ownerType", name)?;
                let field_name = self.string_literal(id, operands[2], "fieldName", name)?;
                let field_type = self.class_literal(id, operands[3], "fieldType", name)?;
                let load = get_static(&owner, &field_name, field_type.clone());
                DynamicValue::new(vec![load], Some(field_type), operands)
            }
            DynamicContextCall::StaticFieldByName => {
                let operands = self.operands(id, 5)?;
                let name = "getStaticFieldValue";
                let owner = self.string_literal(id, operands[1], "ownerName", name)?;
                let field_name = self.string_literal(id, operands[2], "fieldName", name)?;
                let field_type = self.descriptor_literal(id, operands[3], "fieldDesc", name)?;
                self.class_literal(id, operands[4], "valueType", name)?;
                let load = get_static(&owner.replace('.', "/"), &field_name, field_type.clone());
                DynamicValue::new(vec![load], Some(field_type), operands)
            }
        };
        Ok(value)
    }

    /// `getStackValue(itemIndex, type)`: the value is copied into a fresh local where it is pushed
    fn stack_value(&self, method: &mut MethodCode, id: InsnId) -> Result<DynamicValue, Error> {
        let name = "getStackValue";
        let operands = self.operands(id, 3)?;
        let value_type = self.class_literal(id, operands[2], "type", name)?;
        let index = self.int_literal(id, operands[1], "itemIndex", name)?;

        let info = self.env.info;
        let frame = match info.basic_frame(self.loc) {
            Some(frame) => frame,
            None => {
                self.warn_unreachable(method, id);
                return Ok(DynamicValue::new(
                    default_value(&value_type),
                    Some(value_type),
                    operands,
                ));
            }
        };

        let item = usize::try_from(index)
            .ok()
            .filter(|item| *item < frame.stack_len())
            .ok_or_else(|| {
                self.invalid(
                    id,
                    format!(
                        "accessing stack (item {}) outside the stack frame ({} items)",
                        index,
                        frame.stack_len()
                    ),
                )
            })?;
        let what = format!("stack item {}", item);
        self.check_value(id, &value_type, frame.stack_from_top(item), what)?;

        let source = info.source_frame(self.loc).ok_or_else(|| {
            Error::Fatal(format!(
                "no source frame at a reachable location of {}",
                method.display_name()
            ))
        })?;
        let slot = method.max_locals;
        let size = dup_stack(source, method, item, &value_type, slot)?;
        method.max_locals += size;

        let load = load_var(&value_type, slot_u16(slot)?);
        Ok(DynamicValue::new(vec![load], Some(value_type), operands))
    }

    /// `getMethodArgumentValue(argumentIndex, type)`
    fn method_argument_value(
        &self,
        method: &MethodCode,
        id: InsnId,
    ) -> Result<DynamicValue, Error> {
        let name = "getMethodArgumentValue";
        let operands = self.operands(id, 3)?;
        let value_type = self.class_literal(id, operands[2], "type", name)?;
        let index = self.int_literal(id, operands[1], "argumentIndex", name)?;

        let count = method.descriptor.parameters.len();
        let index = usize::try_from(index)
            .ok()
            .filter(|index| *index < count)
            .ok_or_else(|| {
                self.invalid(
                    id,
                    format!("accessing invalid parameter {} (method only has {})", index, count),
                )
            })?;
        let slot = method.parameter_slot(index);

        let info = self.env.info;
        if let Some(frame) = info.basic_frame(self.loc).or_else(|| info.ret_frame()) {
            let what = format!("method parameter {}", index);
            self.check_value(id, &value_type, frame.local(slot), what)?;
        }

        let load = load_var(&value_type, slot_u16(slot)?);
        Ok(DynamicValue::new(vec![load], Some(value_type), operands))
    }

    /// `getLocalVariableValue(slotIndex, type)`
    fn local_variable_value(&self, id: InsnId) -> Result<DynamicValue, Error> {
        let name = "getLocalVariableValue";
        let operands = self.operands(id, 3)?;
        let value_type = self.class_literal(id, operands[2], "type", name)?;
        let slot = self.int_literal(id, operands[1], "slotIndex", name)?;

        let info = self.env.info;
        let frame = info.basic_frame(self.loc).or_else(|| info.ret_frame());
        let available = frame.map_or(usize::MAX, |frame| frame.locals().len());
        let slot = usize::try_from(slot)
            .ok()
            .filter(|slot| *slot < available)
            .ok_or_else(|| {
                self.invalid(
                    id,
                    format!(
                        "accessing invalid variable slot ({}) -- method only has {} slots",
                        slot, available
                    ),
                )
            })?;
        if let Some(frame) = frame {
            let what = format!("variable slot {}", slot);
            self.check_value(id, &value_type, frame.local(slot), what)?;
        }

        let load = load_var(&value_type, slot_u16(slot)?);
        Ok(DynamicValue::new(vec![load], Some(value_type), operands))
    }

    fn warn_unreachable(&self, method: &MethodCode, id: InsnId) {
        warn!(
            "{}: dynamic context value requested at an unreachable location of {}, using the \
             default value",
            self.code.location(id),
            method.display_name()
        );
    }

    /// The verifier must see the expected kind of value
    fn check_value(
        &self,
        id: InsnId,
        expected: &FieldType,
        actual: Option<&BasicValue>,
        accessed: String,
    ) -> Result<(), Error> {
        let expected = BasicValue::of_type(expected);
        let actual = actual.copied().unwrap_or(BasicValue::Uninitialized);
        if expected == actual {
            return Ok(());
        }
        Err(self.invalid(
            id,
            format!(
                "expected {} but found {} when accessing {}",
                value_name(expected),
                value_name(actual),
                accessed
            ),
        ))
    }

    fn int_literal(
        &self,
        call: InsnId,
        operand: InsnId,
        argument: &str,
        method: &str,
    ) -> Result<i32, Error> {
        self.code
            .instructions
            .insn(operand)
            .and_then(int_constant_operand)
            .ok_or_else(|| self.literal_error(call, argument, "DynamicContext", method, "integer"))
    }

    fn string_literal(
        &self,
        call: InsnId,
        operand: InsnId,
        argument: &str,
        method: &str,
    ) -> Result<String, Error> {
        self.code
            .instructions
            .insn(operand)
            .and_then(string_constant_operand)
            .map(String::from)
            .ok_or_else(|| self.literal_error(call, argument, "DynamicContext", method, "String"))
    }

    fn class_literal(
        &self,
        call: InsnId,
        operand: InsnId,
        argument: &str,
        method: &str,
    ) -> Result<FieldType, Error> {
        self.code
            .instructions
            .insn(operand)
            .and_then(type_constant_operand)
            .ok_or_else(|| self.literal_error(call, argument, "DynamicContext", method, "Class"))
    }

    /// Class literal naming the class declaring a field
    fn owner_literal(
        &self,
        call: InsnId,
        operand: InsnId,
        argument: &str,
        method: &str,
    ) -> Result<String, Error> {
        match self.class_literal(call, operand, argument, method)? {
            FieldType::Ref(ref_type) => Ok(ref_type.internal_name()),
            FieldType::Base(base) => Err(self.invalid(
                call,
                format!("{} does not declare fields", base.java_name()),
            )),
        }
    }

    fn descriptor_literal(
        &self,
        call: InsnId,
        operand: InsnId,
        argument: &str,
        method: &str,
    ) -> Result<FieldType, Error> {
        let descriptor = self.string_literal(call, operand, argument, method)?;
        FieldType::parse(&descriptor).map_err(|_| {
            self.invalid(call, format!("invalid field descriptor \"{}\"", descriptor))
        })
    }
}

/// Replacement of a dynamic context call
struct DynamicValue {
    instructions: Vec<Instruction>,

    /// Type of the value, if it must be boxed when primitive
    value_type: Option<FieldType>,

    /// Instructions pushing the arguments (starting with the context itself)
    removed: Vec<InsnId>,
}

impl DynamicValue {
    fn new(
        instructions: Vec<Instruction>,
        value_type: Option<FieldType>,
        removed: Vec<InsnId>,
    ) -> Self {
        DynamicValue {
            instructions,
            value_type,
            removed,
        }
    }
}

fn value_name(value: BasicValue) -> &'static str {
    match value {
        BasicValue::Uninitialized => "nothing",
        BasicValue::Int => "int",
        BasicValue::Float => "float",
        BasicValue::Long => "long",
        BasicValue::Double => "double",
        BasicValue::Reference => "a reference",
    }
}

/// Fold the `ArgumentContext` calls of a processor method for one argument
fn rewrite_argument_context_calls(
    applied: &ProcessorMethodInstance,
    insns: &mut InsnList,
) -> Result<(), Error> {
    let invalid = |id: InsnId, message: String| Error::InvalidContextUsage {
        location: applied.code.location(id),
        message,
    };

    let mut calls = vec![];
    for id in insns.iter() {
        match insns.insn(id).map(ContextCall::of) {
            Some(Ok(Some(ContextCall::Argument(call)))) => calls.push((id, call)),
            Some(Err(message)) => return Err(invalid(id, message)),
            _ => (),
        }
    }

    for (id, call) in calls {
        let value = match call {
            ArgumentContextCall::Position => const_int(applied.position as i32),
            ArgumentContextCall::TotalCount => const_int(applied.total_count as i32),
            ArgumentContextCall::TypeDescriptor => {
                Instruction::Ldc(Constant::String(applied.arg_type.render()))
            }
        };
        insns.insert_after(id, Node::Insn(value));
        let context = insns
            .prev_real(id)
            .ok_or_else(|| invalid(id, String::from("context call is missing its arguments")))?;
        remove_expected(insns, context, "aload")?;
        insns.remove(id);
    }
    Ok(())
}

/// Remove an instruction the rewriting expects to find there
fn remove_expected(insns: &mut InsnList, id: InsnId, expected: &str) -> Result<(), Error> {
    let found = insns.node(id).mnemonic();
    if found != expected {
        return Err(Error::Fatal(format!(
            "refusing to remove instruction: expected {}, found {}",
            expected, found
        )));
    }
    insns.remove(id);
    Ok(())
}

fn shift_locals(insns: &mut InsnList, offset: usize, fixed: &HashSet<InsnId>) -> Result<(), Error> {
    for id in insns.ids() {
        if fixed.contains(&id) {
            continue;
        }
        if let Node::Insn(insn) = insns.node_mut(id) {
            if let Some(slot) = insn.local_slot_mut() {
                *slot = slot_u16(*slot as usize + offset)?;
            }
        }
    }
    Ok(())
}

/// Locals needed: at least `floor`, and enough for every access outside of `fixed`
fn required_locals(insns: &InsnList, floor: usize, fixed: &HashSet<InsnId>) -> usize {
    insns
        .iter()
        .filter(|id| !fixed.contains(id))
        .filter_map(|id| insns.insn(id).and_then(|insn| insn.local_slot()))
        .map(|(slot, width)| slot as usize + width)
        .fold(floor, usize::max)
}

fn push_array_header(code: &mut InsnList, length: usize) {
    code.push_insn(const_int(length as i32));
    code.push_insn(Instruction::ANewArray(RefType::object("java/lang/Object")));
}

fn push_box(code: &mut InsnList, field_type: &FieldType) {
    if let FieldType::Base(base) = field_type {
        code.push_insn(box_value(*base));
    }
}

/// Reference type of a value once boxed
fn boxed_ref_type(field_type: &FieldType) -> RefType {
    match field_type {
        FieldType::Base(base) => RefType::object(base.wrapper_class()),
        FieldType::Ref(ref_type) => ref_type.clone(),
    }
}

/// Drop a `checkcast` right after `after` if it casts to what is already there
fn remove_cast_to(insns: &mut InsnList, after: InsnId, ref_type: &RefType) {
    if let Some(next) = insns.next_real(after) {
        if insns.insn(next) == Some(&Instruction::CheckCast(ref_type.clone())) {
            insns.remove(next);
        }
    }
}

/// Drop `Wrapper.valueOf` immediately followed by the matching `xxxValue()`
fn remove_redundant_boxing(insns: &mut InsnList) {
    let pairs: Vec<(InsnId, InsnId)> = insns
        .iter()
        .filter_map(|unboxing| {
            let base = insns.insn(unboxing).and_then(unboxed_type)?;
            let mut boxing = insns.prev(unboxing)?;
            while let Node::Line(_) = insns.node(boxing) {
                boxing = insns.prev(boxing)?;
            }
            if insns.insn(boxing).and_then(boxed_type) == Some(base) {
                Some((boxing, unboxing))
            } else {
                None
            }
        })
        .collect();

    for (boxing, unboxing) in pairs {
        insns.remove(boxing);
        insns.remove(unboxing);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{parse_method, render_node};
    use crate::localvar::LocalVars;
    use crate::shadow::{BodyMarker, Marker};
    use crate::snippet::{SnippetCode, SnippetKind, UnprocessedCode};
    use crate::weaver::{CodeOptions, SnippetMarking, StaticContexts};
    use std::collections::HashMap;

    const DYNAMIC: &str = "ch/usi/dag/disl/dynamiccontext/DynamicContext";

    fn snippet(listing: &str) -> Snippet {
        let template = UnprocessedCode::new("Instr", parse_method(listing).unwrap());
        let code = SnippetCode::prepare(
            &template,
            false,
            false,
            &HashMap::new(),
            CodeOptions::empty(),
            &LocalVars::new(),
            &StaticContexts::standard(),
        )
        .unwrap();
        let marker: Box<dyn Marker + Send + Sync> = Box::new(BodyMarker);
        Snippet::new(SnippetKind::Before, 0, marker, code)
    }

    fn rendered(insns: &InsnList) -> Vec<String> {
        insns
            .iter()
            .filter_map(|id| render_node(insns.node(id)))
            .collect()
    }

    /// Weave-ready transform of the snippet at the start of the method
    fn transform(
        method: &mut MethodCode,
        snippet: &Snippet,
        throwing: bool,
    ) -> Result<Vec<String>, Error> {
        let mut markings = vec![SnippetMarking {
            snippet,
            shadows: crate::shadow::Shadow::mark(snippet.marker.as_ref(), method),
        }];
        let info = WeavingInfo::new(method, &mut markings)?;
        let static_values = StaticContextValues::new();
        let processors = ProcessorInstances::default();
        let registry = PureMethodRegistry::standard();
        let env = WeavingEnv {
            info: &info,
            static_values: &static_values,
            processors: &processors,
            partial_evaluation: PartialEvaluationLevel::None,
            registry: &registry,
        };
        let key = ShadowKey {
            snippet: 0,
            shadow: 0,
        };
        let shadow = &markings[0].shadows[0];
        let mut code = WeavingCode::new(&env, snippet, key, shadow, shadow.weaving_region.start);
        code.transform(method, throwing)?;
        let (insns, _) = code.into_parts();
        Ok(rendered(&insns))
    }

    #[test]
    fn locals_move_past_the_method() {
        let mut method = parse_method(
            r#"
            method static f (IJ)V
              return
            "#,
        )
        .unwrap();
        let snippet = snippet(
            r#"
            method static before ()V
              iconst_5
              istore 0
              iinc 0 1
              return
            "#,
        );
        let code = transform(&mut method, &snippet, false).unwrap();
        assert_eq!(code, vec!["iconst_5", "istore 3", "iinc 3 1"]);
        assert_eq!(method.max_locals, 4);
    }

    #[test]
    fn this_and_exception() {
        let mut method = parse_method(
            r#"
            method f ()V
              return
            "#,
        )
        .unwrap();
        let snippet = snippet(&format!(
            r#"
            method static after (L{0};)V
              aload 0
              invokeinterface {0}.getThis ()Ljava/lang/Object;
              pop
              aload 0
              invokeinterface {0}.getException ()Ljava/lang/Throwable;
              pop
              return
            "#,
            DYNAMIC
        ));
        let code = transform(&mut method, &snippet, true).unwrap();
        // The context parameter takes the first snippet slot, the exception comes after it
        assert_eq!(
            code,
            vec!["astore 2", "aload 0", "pop", "aload 2", "pop", "aload 2", "athrow"]
        );
        assert_eq!(method.max_locals, 3);
    }

    #[test]
    fn stack_values_are_copied_and_boxed() {
        let mut method = parse_method(
            r#"
            method static f (I)V
              iload 0
              invokestatic A.g (I)V
              return
            "#,
        )
        .unwrap();
        let call = method
            .instructions
            .iter()
            .find(|id| method.instructions.node(*id).mnemonic() == "invokestatic")
            .unwrap();

        let snippet = snippet(&format!(
            r#"
            method static before (L{0};)V
              aload 0
              iconst_0
              getstatic java/lang/Integer.TYPE Ljava/lang/Class;
              invokeinterface {0}.getStackValue (ILjava/lang/Class;)Ljava/lang/Object;
              checkcast java/lang/Integer
              invokevirtual java/lang/Integer.intValue ()I
              pop
              return
            "#,
            DYNAMIC
        ));

        // Weave at the call, where the argument is on the stack
        let mut markings = vec![SnippetMarking {
            snippet: &snippet,
            shadows: vec![crate::shadow::insn_region(call).into_shadow(&method)],
        }];
        let info = WeavingInfo::new(&mut method, &mut markings).unwrap();
        let static_values = StaticContextValues::new();
        let processors = ProcessorInstances::default();
        let registry = PureMethodRegistry::standard();
        let env = WeavingEnv {
            info: &info,
            static_values: &static_values,
            processors: &processors,
            partial_evaluation: PartialEvaluationLevel::None,
            registry: &registry,
        };
        let shadow = &markings[0].shadows[0];
        let key = ShadowKey {
            snippet: 0,
            shadow: 0,
        };
        let mut code = WeavingCode::new(&env, &snippet, key, shadow, shadow.weaving_region.start);
        code.transform(&mut method, false).unwrap();
        let (insns, _) = code.into_parts();

        // Boxing and unboxing cancel out
        assert_eq!(rendered(&insns), vec!["iload 2", "pop"]);
        assert_eq!(
            rendered(&method.instructions),
            vec!["iload 0", "dup", "istore 2", "invokestatic A.g (I)V", "return"]
        );
        assert_eq!(method.max_locals, 3);
    }

    #[test]
    fn stack_value_outside_the_frame() {
        let mut method = parse_method(
            r#"
            method static f ()V
              return
            "#,
        )
        .unwrap();
        let snippet = snippet(&format!(
            r#"
            method static before (L{0};)V
              aload 0
              iconst_0
              ldc class java/lang/String
              invokeinterface {0}.getStackValue (ILjava/lang/Class;)Ljava/lang/Object;
              pop
              return
            "#,
            DYNAMIC
        ));
        match transform(&mut method, &snippet, false) {
            Err(Error::InvalidContextUsage { location, message }) => {
                assert_eq!(location, "snippet Instr.before");
                assert_eq!(message, "accessing stack (item 0) outside the stack frame (0 items)");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn method_arguments_are_checked() {
        let listing = |index: i32, class: &str| {
            format!(
                r#"
                method static before (L{0};)V
                  aload 0
                  bipush {1}
                  ldc class {2}
                  invokeinterface {0}.getMethodArgumentValue (ILjava/lang/Class;)Ljava/lang/Object;
                  pop
                  return
                "#,
                DYNAMIC, index, class
            )
        };
        let method = parse_method(
            r#"
            method f (JLjava/lang/String;)V
              return
            "#,
        )
        .unwrap();

        let code = transform(&mut method.clone(), &snippet(&listing(1, "java/lang/String")), false);
        assert_eq!(code.unwrap(), vec!["aload 3", "pop"]);

        let wrong_type = snippet(&listing(0, "java/lang/String"));
        let wrong_type = transform(&mut method.clone(), &wrong_type, false);
        match wrong_type {
            Err(Error::InvalidContextUsage { message, .. }) => assert_eq!(
                message,
                "expected a reference but found long when accessing method parameter 0"
            ),
            other => panic!("unexpected result {:?}", other),
        }

        let out_of_range = snippet(&listing(2, "java/lang/String"));
        let out_of_range = transform(&mut method.clone(), &out_of_range, false);
        match out_of_range {
            Err(Error::InvalidContextUsage { message, .. }) => {
                assert_eq!(message, "accessing invalid parameter 2 (method only has 2)")
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn literals_are_required() {
        let mut method = parse_method(
            r#"
            method static f (I)V
              return
            "#,
        )
        .unwrap();
        let snippet = snippet(&format!(
            r#"
            method static before (L{0};I)V
              aload 0
              iload 1
              ldc class java/lang/String
              invokeinterface {0}.getLocalVariableValue (ILjava/lang/Class;)Ljava/lang/Object;
              pop
              return
            "#,
            DYNAMIC
        ));
        match transform(&mut method, &snippet, false) {
            Err(Error::InvalidContextUsage { message, .. }) => assert_eq!(
                message,
                "the 'slotIndex' argument of DynamicContext.getLocalVariableValue() MUST be a \
                 integer literal"
            ),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn fields_and_class_literals() {
        let mut method = parse_method(
            r#"
            method f ()V
              return
            "#,
        )
        .unwrap();
        let snippet = snippet(&format!(
            r#"
            method static before (L{0};Lch/usi/dag/disl/classcontext/ClassContext;)V
              aload 0
              aload 0
              invokeinterface {0}.getThis ()Ljava/lang/Object;
              ldc class app/Main
              ldc "count"
              getstatic java/lang/Integer.TYPE Ljava/lang/Class;
              invokeinterface {0}.getInstanceFieldValue (Ljava/lang/Object;Ljava/lang/Class;Ljava/lang/String;Ljava/lang/Class;)Ljava/lang/Object;
              pop
              aload 0
              ldc "app.Main"
              ldc "NAME"
              ldc "Ljava/lang/String;"
              ldc class java/lang/String
              invokeinterface {0}.getStaticFieldValue (Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;Ljava/lang/Class;)Ljava/lang/Object;
              pop
              aload 1
              ldc "app.Other"
              invokeinterface ch/usi/dag/disl/classcontext/ClassContext.asClass (Ljava/lang/String;)Ljava/lang/Class;
              pop
              return
            "#,
            DYNAMIC
        ));
        let code = transform(&mut method, &snippet, false).unwrap();
        assert_eq!(
            code,
            vec![
                "aload 0",
                "getfield app/Main.count I",
                "invokestatic java/lang/Integer.valueOf (I)Ljava/lang/Integer;",
                "pop",
                "getstatic app/Main.NAME Ljava/lang/String;",
                "pop",
                "ldc class app/Other",
                "pop"
            ]
        );
    }

    #[test]
    fn remove_only_expected_instructions() {
        let mut insns = InsnList::new();
        let nop = insns.push_insn(Instruction::Nop);
        match remove_expected(&mut insns, nop, "aload") {
            Err(Error::Fatal(message)) => assert_eq!(
                message,
                "refusing to remove instruction: expected aload, found nop"
            ),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(insns.len(), 1);
    }
}
